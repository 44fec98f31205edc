//! Rewriting of `@group(G) @binding(B)` attribute pairs in WGSL text

use regex::{Captures, Regex};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::LazyLock;

/// Attribute pairs in either order; comments are matched first so that
/// commented-out declarations are skipped as a whole
static BINDING_ATTRIBUTES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<comment>//[^\n]*|/\*(?s:.*?)\*/)|@group\(\s*(?P<g1>\d+)\s*\)(?P<sep1>\s*)@binding\(\s*(?P<b1>\d+)\s*\)|@binding\(\s*(?P<b2>\d+)\s*\)(?P<sep2>\s*)@group\(\s*(?P<g2>\d+)\s*\)",
    )
    .unwrap()
});

/// `(group, binding)` of every attribute pair, in source order
pub fn find_wgsl_bindings(source: &str) -> Vec<(u32, u32)> {
    BINDING_ATTRIBUTES
        .captures_iter(source)
        .filter_map(|caps| {
            let (group, binding, _, _) = split(&caps)?;
            Some((group.parse().ok()?, binding.parse().ok()?))
        })
        .collect()
}

fn split<'c>(caps: &'c Captures<'_>) -> Option<(&'c str, &'c str, &'c str, bool)> {
    if caps.name("comment").is_some() {
        return None;
    }
    Some(match caps.name("g1") {
        Some(group) => (group.as_str(), &caps["b1"], &caps["sep1"], true),
        None => (&caps["g2"], &caps["b2"], &caps["sep2"], false),
    })
}

/// Moves resource declarations to new coordinates, matched by their current ones
///
/// Identifiers are never consulted, so declarations whose names a WGSL
/// writer has legalised are still found. Everything outside the attribute
/// pairs, the trailing source-language marker included, is kept verbatim.
///
/// # Returns
/// The rewritten text and the pre-remap coordinates that were found
pub fn rewrite_wgsl_bindings(source: &str, moves: &FxHashMap<(u32, u32), (u32, u32)>) -> (String, FxHashSet<(u32, u32)>) {
    let mut found = FxHashSet::default();
    let rewritten = BINDING_ATTRIBUTES.replace_all(source, |caps: &Captures<'_>| {
        let Some((group, binding, separator, group_first)) = split(caps) else {
            return caps[0].to_string();
        };
        let current = match (group.parse::<u32>(), binding.parse::<u32>()) {
            (Ok(group), Ok(binding)) => (group, binding),
            _ => return caps[0].to_string(),
        };
        let Some(&(new_group, new_binding)) = moves.get(&current) else {
            return caps[0].to_string();
        };
        found.insert(current);
        if group_first {
            format!("@group({new_group}){separator}@binding({new_binding})")
        } else {
            format!("@binding({new_binding}){separator}@group({new_group})")
        }
    });
    (rewritten.into_owned(), found)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "@group(0) @binding(0) var<uniform> cbFrame: Frame;\n\
                          @group(0) @binding(1)\nvar g_Tex_0_: texture_2d<f32>;\n\
                          @binding(2) @group(0) var g_Sampler: sampler;\n\
                          @group(1) @binding(0) var<storage> g_Data: array<u32>;\n\
                          /*$SHADER_SOURCE_LANGUAGE=1*/";

    #[test]
    fn test_find_bindings() {
        assert_eq!(find_wgsl_bindings(SOURCE), vec![(0, 0), (0, 1), (0, 2), (1, 0)]);
    }

    #[test]
    fn test_rewrite_by_coordinates() {
        let moves: FxHashMap<(u32, u32), (u32, u32)> = [((0, 0), (0, 1)), ((0, 1), (2, 4)), ((0, 2), (2, 5))].into_iter().collect();
        let (rewritten, found) = rewrite_wgsl_bindings(SOURCE, &moves);
        assert_eq!(found.len(), 3);
        assert!(rewritten.contains("@group(0) @binding(1) var<uniform> cbFrame"));
        assert!(rewritten.contains("@group(2) @binding(4)\nvar g_Tex_0_"));
        assert!(rewritten.contains("@binding(5) @group(2) var g_Sampler"));
        assert!(rewritten.contains("@group(1) @binding(0) var<storage> g_Data"));
        assert!(rewritten.ends_with("/*$SHADER_SOURCE_LANGUAGE=1*/"));
    }

    #[test]
    fn test_untouched_without_moves() {
        let (rewritten, found) = rewrite_wgsl_bindings(SOURCE, &FxHashMap::default());
        assert_eq!(rewritten, SOURCE);
        assert!(found.is_empty());
    }

    #[test]
    fn test_comments_are_skipped() {
        let source = "// @group(0) @binding(5) var old_tex: texture_2d<f32>;\n\
                      /* @group(0) @binding(5)\n   var older_tex: texture_2d<f32>; */\n\
                      @group(0) @binding(6) var g_Tex: texture_2d<f32>;\n";
        assert_eq!(find_wgsl_bindings(source), vec![(0, 6)]);

        let moves: FxHashMap<(u32, u32), (u32, u32)> = [((0, 5), (1, 0))].into_iter().collect();
        let (rewritten, found) = rewrite_wgsl_bindings(source, &moves);
        assert_eq!(rewritten, source);
        assert!(found.is_empty());
    }
}
