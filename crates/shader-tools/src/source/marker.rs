//! Trailing source-language marker of emitted textual artifacts
//!
//! Every textual artifact ends with `/*$SHADER_SOURCE_LANGUAGE=<int>*/` so
//! that a later pass can recover the original source language without
//! re-parsing.

use crate::types::SourceLanguage;

pub const SOURCE_LANGUAGE_MARKER_PREFIX: &str = "/*$SHADER_SOURCE_LANGUAGE=";
const MARKER_SUFFIX: &str = "*/";

pub fn append_source_language_marker(source: &mut String, language: SourceLanguage) {
    if !source.is_empty() && !source.ends_with('\n') {
        source.push('\n');
    }
    source.push_str(SOURCE_LANGUAGE_MARKER_PREFIX);
    source.push_str(&(language as i32).to_string());
    source.push_str(MARKER_SUFFIX);
}

/// Byte range of the marker, found by scanning backwards from the end
fn find_marker(source: &str) -> Option<(usize, SourceLanguage)> {
    let trimmed = source.trim_end_matches(|c: char| c.is_ascii_whitespace() || c == '\0');
    let body = trimmed.strip_suffix(MARKER_SUFFIX)?;
    let start = body.rfind(SOURCE_LANGUAGE_MARKER_PREFIX)?;
    let value = &body[start + SOURCE_LANGUAGE_MARKER_PREFIX.len()..];
    let language = value.trim().parse::<i32>().ok().and_then(SourceLanguage::from_i32)?;
    Some((start, language))
}

/// Returns the language recorded in the marker, or `Default` when absent
pub fn parse_source_language_marker(source: &str) -> SourceLanguage {
    find_marker(source).map(|(_, language)| language).unwrap_or_default()
}

/// Source text without its trailing marker
pub fn strip_source_language_marker(source: &str) -> &str {
    match find_marker(source) {
        Some((start, _)) => &source[..start],
        None => source,
    }
}
