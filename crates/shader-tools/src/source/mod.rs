//! Shader source acquisition
//!
//! Reads shader text from an inline buffer or through a stream factory,
//! unrolls `#include` directives and prepends macro definitions.

mod includes;
mod macros;
mod marker;

pub use includes::{IncludeDirective, IncludeSyntaxError, IncludeUnroller, MAX_INCLUDE_DEPTH, find_includes, normalize_include_path};
pub use macros::{
    ShaderMacro, append_platform_definition, append_shader_macros, append_shader_type_definitions, dedup_macros, macros_to_defines, platform_definition,
    shader_type_definitions,
};
pub use marker::{SOURCE_LANGUAGE_MARKER_PREFIX, append_source_language_marker, parse_source_language_marker, strip_source_language_marker};

use crate::error::ShaderError;
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

/// Opens shader source files by virtual path
///
/// Any `Fn(&str) -> io::Result<String>` closure is a factory, so callers can
/// serve sources from whatever storage they own.
pub trait ShaderSourceFactory: Send + Sync {
    fn open(&self, path: &str) -> io::Result<String>;
}

impl<F> ShaderSourceFactory for F
where
    F: Fn(&str) -> io::Result<String> + Send + Sync,
{
    fn open(&self, path: &str) -> io::Result<String> {
        self(path)
    }
}

/// Resolves paths against a list of search directories, first match wins
#[derive(Debug, Clone, Default)]
pub struct FileSystemSourceFactory {
    search_dirs: Vec<PathBuf>,
}

impl FileSystemSourceFactory {
    pub fn new<I, P>(search_dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            search_dirs: search_dirs.into_iter().map(|dir| dir.as_ref().to_path_buf()).collect(),
        }
    }
}

impl ShaderSourceFactory for FileSystemSourceFactory {
    fn open(&self, path: &str) -> io::Result<String> {
        let relative = Path::new(path);
        if relative.is_absolute() || self.search_dirs.is_empty() {
            return std::fs::read_to_string(relative);
        }
        for dir in &self.search_dirs {
            let candidate = dir.join(relative);
            if candidate.is_file() {
                return std::fs::read_to_string(candidate);
            }
        }
        Err(io::Error::new(io::ErrorKind::NotFound, format!("File not found: {path}")))
    }
}

/// In-memory file set keyed by normalized path
#[derive(Debug, Clone, Default)]
pub struct MemorySourceFactory {
    files: HashMap<String, String>,
}

impl MemorySourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }

    pub fn insert(&mut self, path: &str, source: impl Into<String>) {
        self.files.insert(normalize_include_path(path), source.into());
    }
}

impl ShaderSourceFactory for MemorySourceFactory {
    fn open(&self, path: &str) -> io::Result<String> {
        self.files
            .get(&normalize_include_path(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("File not found: {path}")))
    }
}

/// Loads the raw text of a shader given exactly one of an inline source or a file path
///
/// # Arguments
/// * `shader` - Display name used in errors
/// * `source` - Inline source text
/// * `file_path` - Path opened through `factory`
/// * `factory` - Stream factory, required when `file_path` is set
///
/// # Returns
/// The source text, not yet include-unrolled
pub fn read_shader_source(shader: &str, source: Option<&str>, file_path: Option<&str>, factory: Option<&dyn ShaderSourceFactory>) -> Result<String, ShaderError> {
    match (source, file_path) {
        (Some(source), None) => Ok(source.to_string()),
        (None, Some(path)) => {
            let factory = factory.ok_or_else(|| ShaderError::MissingStreamFactory { shader: shader.to_string() })?;
            factory.open(path).map_err(|e| {
                tracing::debug!("failed to open '{path}': {e}");
                ShaderError::SourceNotFound {
                    shader: shader.to_string(),
                    path: path.to_string(),
                }
            })
        }
        _ => Err(ShaderError::SourceConflict { shader: shader.to_string() }),
    }
}
