use crate::types::ShaderStage;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Caller-supplied `#define`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderMacro {
    pub name: String,
    #[serde(default)]
    pub definition: String,
}

impl ShaderMacro {
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: definition.into(),
        }
    }
}

/// Drops every macro that is redefined later in the list
///
/// The surviving definitions keep their relative order, so the last
/// definition of each name wins.
pub fn dedup_macros(macros: &[ShaderMacro]) -> Vec<&ShaderMacro> {
    let mut seen = FxHashSet::default();
    let mut kept: Vec<&ShaderMacro> = macros.iter().rev().filter(|m| seen.insert(m.name.as_str())).collect();
    kept.reverse();
    kept
}

pub fn append_shader_macros(source: &mut String, macros: &[ShaderMacro]) {
    for m in dedup_macros(macros) {
        source.push_str("#define ");
        source.push_str(&m.name);
        source.push(' ');
        source.push_str(&m.definition);
        source.push('\n');
    }
}

/// Macros as a define table for naga's GLSL preprocessor
pub fn macros_to_defines(macros: &[ShaderMacro]) -> naga::FastHashMap<String, String> {
    dedup_macros(macros).into_iter().map(|m| (m.name.clone(), m.definition.clone())).collect()
}

pub fn shader_type_definitions(stage: ShaderStage) -> &'static [&'static str] {
    match stage {
        ShaderStage::Vertex => &["VERTEX_SHADER"],
        ShaderStage::Pixel => &["FRAGMENT_SHADER", "PIXEL_SHADER"],
        ShaderStage::Geometry => &["GEOMETRY_SHADER"],
        ShaderStage::Hull => &["TESS_CONTROL_SHADER", "HULL_SHADER"],
        ShaderStage::Domain => &["TESS_EVALUATION_SHADER", "DOMAIN_SHADER"],
        ShaderStage::Compute => &["COMPUTE_SHADER"],
        ShaderStage::Amplification => &["TASK_SHADER", "AMPLIFICATION_SHADER"],
        ShaderStage::Mesh => &["MESH_SHADER"],
        ShaderStage::RayGen => &["RAY_GEN_SHADER"],
        ShaderStage::RayMiss => &["RAY_MISS_SHADER"],
        ShaderStage::RayClosestHit => &["RAY_CLOSEST_HIT_SHADER"],
        ShaderStage::RayAnyHit => &["RAY_ANY_HIT_SHADER"],
        ShaderStage::RayIntersection => &["RAY_INTERSECTION_SHADER"],
        ShaderStage::Callable => &["CALLABLE_SHADER"],
        ShaderStage::Tile => &["TILE_SHADER"],
    }
}

pub fn append_shader_type_definitions(source: &mut String, stage: ShaderStage) {
    for name in shader_type_definitions(stage) {
        source.push_str("#define ");
        source.push_str(name);
        source.push_str(" 1\n");
    }
}

/// Platform macro name for the host the tools are built for
pub fn platform_definition() -> &'static str {
    if cfg!(target_os = "windows") {
        "PLATFORM_WIN32"
    } else if cfg!(target_os = "macos") {
        "PLATFORM_MACOS"
    } else if cfg!(target_os = "ios") {
        "PLATFORM_IOS"
    } else if cfg!(target_os = "tvos") {
        "PLATFORM_TVOS"
    } else if cfg!(target_os = "android") {
        "PLATFORM_ANDROID"
    } else if cfg!(target_os = "emscripten") || cfg!(target_arch = "wasm32") {
        "PLATFORM_EMSCRIPTEN"
    } else {
        "PLATFORM_LINUX"
    }
}

pub fn append_platform_definition(source: &mut String) {
    source.push_str("#define ");
    source.push_str(platform_definition());
    source.push_str(" 1\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_definition_wins() {
        let macros = vec![
            ShaderMacro::new("QUALITY", "1"),
            ShaderMacro::new("USE_SHADOWS", "1"),
            ShaderMacro::new("QUALITY", "3"),
        ];
        let mut source = String::new();
        append_shader_macros(&mut source, &macros);
        assert_eq!(source, "#define USE_SHADOWS 1\n#define QUALITY 3\n");

        let defines = macros_to_defines(&macros);
        assert_eq!(defines.get("QUALITY").map(String::as_str), Some("3"));
        assert_eq!(defines.len(), 2);
    }

    #[test]
    fn test_pixel_stage_definitions() {
        let mut source = String::new();
        append_shader_type_definitions(&mut source, ShaderStage::Pixel);
        assert_eq!(source, "#define FRAGMENT_SHADER 1\n#define PIXEL_SHADER 1\n");
    }

    #[test]
    fn test_macro_yaml() {
        let yaml = r#"
- name: MAX_LIGHTS
  definition: "8"
- name: USE_IBL
"#;
        let macros: Vec<ShaderMacro> = serde_norway::from_str(yaml).unwrap();
        assert_eq!(macros[0], ShaderMacro::new("MAX_LIGHTS", "8"));
        assert_eq!(macros[1].definition, "");
    }
}
