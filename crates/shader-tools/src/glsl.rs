//! GLSL source assembly for OpenGL and OpenGL ES back ends
//!
//! Produces the final text handed to a GL driver: version directive,
//! extensions, feature and stage macros, precision qualifiers for ES, user
//! macros and finally the shader body.

use crate::{
    error::ShaderError,
    source::{ShaderMacro, append_platform_definition, append_shader_macros, append_shader_type_definitions},
    types::{CompileFlags, DeviceType, ShaderStage, ShaderVersion, SourceLanguage},
};

/// Which compiler will consume the generated GLSL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetGlslCompiler {
    /// The GL driver compiles the text
    #[default]
    Driver,
    /// The IR front end compiles the text to SPIR-V
    IrFrontEnd,
}

/// Maximum language versions supported by the device, zero when unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaxShaderVersions {
    pub glsl: ShaderVersion,
    pub glessl: ShaderVersion,
}

/// Device capabilities that affect the generated header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlslFeatures {
    pub separable_programs: bool,
    pub cubemap_arrays: bool,
    pub texture_2d_ms: bool,
    pub compute_shaders: bool,
}

/// Request passed to an HLSL-to-GLSL converter
#[derive(Debug, Clone)]
pub struct HlslConversionRequest<'a> {
    pub shader: &'a str,
    pub source: &'a str,
    pub entry_point: &'a str,
    pub stage: ShaderStage,
    pub sampler_suffix: &'a str,
    pub use_in_out_location_qualifiers: bool,
    pub use_row_major_matrices: bool,
    pub file_name: Option<&'a str>,
}

/// Source-to-source converter from HLSL to GLSL
pub trait HlslToGlsl: Send + Sync {
    fn convert(&self, request: &HlslConversionRequest<'_>) -> Result<String, String>;
}

const MOBILE_PLATFORM: bool = cfg!(any(target_os = "android", target_os = "ios", target_os = "tvos", target_os = "emscripten"));

fn is_essl(device: DeviceType) -> bool {
    match device {
        DeviceType::OpenGl => false,
        DeviceType::OpenGles => true,
        _ => MOBILE_PLATFORM,
    }
}

/// Picks the GLSL version and dialect for a shader
///
/// A requested version above the compiler maximum is clamped with a warning,
/// never rejected. When nothing is requested, the compiler maximum applies,
/// then a platform default.
///
/// # Returns
/// The version and `true` for ESSL
pub fn get_glsl_version(
    requested_glsl: ShaderVersion,
    requested_glessl: ShaderVersion,
    target: TargetGlslCompiler,
    device: DeviceType,
    max_versions: &MaxShaderVersions,
) -> (ShaderVersion, bool) {
    let is_es = is_essl(device);

    let mut compiler_version = if is_es { max_versions.glessl } else { max_versions.glsl };
    if target == TargetGlslCompiler::IrFrontEnd {
        if is_es {
            compiler_version = compiler_version.max(ShaderVersion::new(3, 1));
        } else if cfg!(target_os = "macos") {
            compiler_version = ShaderVersion::new(4, 3);
        }
    }

    let requested = if is_es { requested_glessl } else { requested_glsl };
    let version = if !requested.is_unspecified() {
        if !compiler_version.is_unspecified() && requested > compiler_version {
            tracing::warn!("Requested GLSL version ({requested}) is greater than the maximum supported version ({compiler_version})");
            compiler_version
        } else {
            requested
        }
    } else if !compiler_version.is_unspecified() {
        compiler_version
    } else if is_es {
        match device {
            DeviceType::OpenGles => ShaderVersion::new(3, 0),
            _ => ShaderVersion::new(3, 1),
        }
    } else if cfg!(target_os = "macos") {
        ShaderVersion::new(4, 1)
    } else {
        ShaderVersion::new(4, 3)
    };

    (version, is_es)
}

fn append_gles_extensions(stage: ShaderStage, features: &GlslFeatures, version: ShaderVersion, source: &mut String) {
    let es31 = version >= ShaderVersion::new(3, 1);
    let es32 = version >= ShaderVersion::new(3, 2);

    if features.separable_programs && !es31 {
        source.push_str("#extension GL_EXT_separate_shader_objects : enable\n");
    }
    if features.cubemap_arrays && !es32 {
        source.push_str("#extension GL_EXT_texture_cube_map_array : enable\n");
    }
    if stage == ShaderStage::Geometry && !es32 {
        source.push_str("#extension GL_EXT_geometry_shader : enable\n");
    }
    if matches!(stage, ShaderStage::Hull | ShaderStage::Domain) && !es32 {
        source.push_str("#extension GL_EXT_tessellation_shader : enable\n");
    }
}

fn append_precision(source: &mut String, types: &[&str]) {
    for ty in types {
        source.push_str("precision highp ");
        source.push_str(ty);
        source.push_str(";\n");
    }
}

fn append_precision_qualifiers(features: &GlslFeatures, version: ShaderVersion, source: &mut String) {
    let es32 = version >= ShaderVersion::new(3, 2);

    // highp uint is left out: some drivers reject it
    append_precision(
        source,
        &[
            "float",
            "int",
            "sampler2D",
            "sampler3D",
            "samplerCube",
            "samplerCubeShadow",
            "sampler2DShadow",
            "sampler2DArray",
            "sampler2DArrayShadow",
            "isampler2D",
            "isampler3D",
            "isamplerCube",
            "isampler2DArray",
            "usampler2D",
            "usampler3D",
            "usamplerCube",
            "usampler2DArray",
        ],
    );
    if es32 {
        append_precision(source, &["samplerBuffer", "isamplerBuffer", "usamplerBuffer"]);
    }
    if features.cubemap_arrays {
        append_precision(source, &["samplerCubeArray", "samplerCubeArrayShadow", "isamplerCubeArray", "usamplerCubeArray"]);
    }
    if features.texture_2d_ms {
        append_precision(source, &["sampler2DMS", "isampler2DMS", "usampler2DMS"]);
    }
    if features.compute_shaders {
        append_precision(
            source,
            &[
                "image2D",
                "image3D",
                "imageCube",
                "image2DArray",
                "iimage2D",
                "iimage3D",
                "iimageCube",
                "iimage2DArray",
                "uimage2D",
                "uimage3D",
                "uimageCube",
                "uimage2DArray",
            ],
        );
        if es32 {
            append_precision(source, &["imageBuffer", "iimageBuffer", "uimageBuffer"]);
        }
    }
}

/// Everything needed to build a GL-ready source string
pub struct GlslBuildAttribs<'a> {
    pub shader: &'a str,
    pub stage: ShaderStage,
    pub language: SourceLanguage,
    /// Include-unrolled source body
    pub source: &'a str,
    pub file_name: Option<&'a str>,
    pub entry_point: &'a str,
    pub macros: &'a [ShaderMacro],
    pub glsl_version: ShaderVersion,
    pub glessl_version: ShaderVersion,
    /// Extension directives inserted right after the builtin ones
    pub extensions: Option<&'a str>,
    pub extra_definitions: Option<&'a str>,
    pub target: TargetGlslCompiler,
    pub device: DeviceType,
    pub max_versions: MaxShaderVersions,
    pub features: GlslFeatures,
    pub zero_to_one_clip_z: bool,
    pub compile_flags: CompileFlags,
    pub use_combined_samplers: bool,
    pub combined_sampler_suffix: &'a str,
    pub hlsl_converter: Option<&'a dyn HlslToGlsl>,
}

/// Builds the complete GLSL text for a GL or GLES driver
pub fn build_glsl_source_string(attribs: &GlslBuildAttribs<'_>) -> Result<String, ShaderError> {
    match attribs.language {
        SourceLanguage::Default | SourceLanguage::Glsl | SourceLanguage::Hlsl => {}
        SourceLanguage::GlslVerbatim => {
            if !attribs.macros.is_empty() {
                tracing::warn!("Shader macros are ignored when compiling GLSL verbatim (shader '{}')", attribs.shader);
            }
            return Ok(attribs.source.to_string());
        }
        other => {
            return Err(ShaderError::Unsupported {
                shader: attribs.shader.to_string(),
                message: format!("{other} sources cannot be compiled to GLSL"),
            });
        }
    }

    let (version, is_es) = get_glsl_version(attribs.glsl_version, attribs.glessl_version, attribs.target, attribs.device, &attribs.max_versions);

    let mut glsl = format!("#version {}{}0 {}\n", version.major, version.minor, if is_es { "es" } else { "core" });

    // Extensions must directly follow the version directive
    if is_es {
        append_gles_extensions(attribs.stage, &attribs.features, version, &mut glsl);
    }
    if let Some(extensions) = attribs.extensions.filter(|ext| !ext.is_empty()) {
        glsl.push_str(extensions);
        glsl.push('\n');
    }

    if is_es {
        glsl.push_str("#ifndef GL_ES\n#  define GL_ES 1\n#endif\n");
    } else {
        glsl.push_str("#define DESKTOP_GL 1\n");
    }

    if attribs.zero_to_one_clip_z {
        glsl.push_str("#define _NDC_ZERO_TO_ONE 1\n");
    }
    if let Some(extra) = attribs.extra_definitions {
        glsl.push_str(extra);
    }

    append_platform_definition(&mut glsl);
    append_shader_type_definitions(&mut glsl, attribs.stage);

    if is_es {
        append_precision_qualifiers(&attribs.features, version, &mut glsl);
    }

    // row_major here is ignored for matrices inside structures on some drivers
    glsl.push_str("layout(std140) uniform;\n");

    append_shader_macros(&mut glsl, attribs.macros);

    if is_es && version == ShaderVersion::new(3, 0) && attribs.features.separable_programs && attribs.stage == ShaderStage::Vertex {
        glsl.push_str("out vec4 gl_Position;\n");
    }

    if attribs.language == SourceLanguage::Hlsl {
        if !attribs.use_combined_samplers {
            return Err(ShaderError::Unsupported {
                shader: attribs.shader.to_string(),
                message: "Combined texture samplers are required to convert HLSL source to GLSL".to_string(),
            });
        }
        let converter = attribs.hlsl_converter.ok_or_else(|| ShaderError::MissingFrontEnd {
            shader: attribs.shader.to_string(),
            language: SourceLanguage::Hlsl,
        })?;
        let request = HlslConversionRequest {
            shader: attribs.shader,
            source: attribs.source,
            entry_point: attribs.entry_point,
            stage: attribs.stage,
            sampler_suffix: attribs.combined_sampler_suffix,
            use_in_out_location_qualifiers: attribs.features.separable_programs,
            use_row_major_matrices: attribs.compile_flags.contains(CompileFlags::PACK_MATRIX_ROW_MAJOR),
            file_name: attribs.file_name,
        };
        let converted = converter.convert(&request).map_err(|log| ShaderError::Translate {
            shader: attribs.shader.to_string(),
            diagnostics: crate::error::Diagnostics::new(format!("Failed to convert HLSL source to GLSL: {log}"), attribs.source),
        })?;
        glsl.push_str(&converted);
    } else {
        glsl.push_str(attribs.source);
    }

    Ok(glsl)
}

/// Parses `#extension NAME : behavior` directives
///
/// # Returns
/// `(name, behavior)` pairs in source order; the behavior is empty when the
/// colon is missing
pub fn get_glsl_extensions(source: &str) -> Vec<(String, String)> {
    let re = regex::Regex::new(r"(?m)^[ \t]*#[ \t]*extension[ \t]+(?P<name>[A-Za-z_][A-Za-z0-9_]*)(?:[ \t]*:[ \t]*(?P<behavior>[A-Za-z_][A-Za-z0-9_]*))?").unwrap();
    re.captures_iter(source)
        .map(|caps| {
            let name = caps["name"].to_string();
            let behavior = caps.name("behavior").map(|m| m.as_str().to_string()).unwrap_or_default();
            (name, behavior)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attribs<'a>(source: &'a str, device: DeviceType) -> GlslBuildAttribs<'a> {
        GlslBuildAttribs {
            shader: "Test",
            stage: ShaderStage::Vertex,
            language: SourceLanguage::Glsl,
            source,
            file_name: None,
            entry_point: "main",
            macros: &[],
            glsl_version: ShaderVersion::default(),
            glessl_version: ShaderVersion::default(),
            extensions: None,
            extra_definitions: None,
            target: TargetGlslCompiler::Driver,
            device,
            max_versions: MaxShaderVersions::default(),
            features: GlslFeatures::default(),
            zero_to_one_clip_z: false,
            compile_flags: CompileFlags::empty(),
            use_combined_samplers: true,
            combined_sampler_suffix: "_sampler",
            hlsl_converter: None,
        }
    }

    struct UppercaseConverter;

    impl HlslToGlsl for UppercaseConverter {
        fn convert(&self, request: &HlslConversionRequest<'_>) -> Result<String, String> {
            assert!(request.use_row_major_matrices);
            Ok(format!("// converted {}\n{}", request.entry_point, request.source.to_uppercase()))
        }
    }

    #[test]
    fn test_version_clamped_to_compiler_max() {
        let max = MaxShaderVersions {
            glsl: ShaderVersion::new(4, 1),
            glessl: ShaderVersion::new(3, 0),
        };
        let (version, is_es) = get_glsl_version(ShaderVersion::new(4, 6), ShaderVersion::default(), TargetGlslCompiler::Driver, DeviceType::OpenGl, &max);
        assert_eq!(version, ShaderVersion::new(4, 1));
        assert!(!is_es);

        let (version, is_es) = get_glsl_version(ShaderVersion::default(), ShaderVersion::new(3, 2), TargetGlslCompiler::Driver, DeviceType::OpenGles, &max);
        assert_eq!(version, ShaderVersion::new(3, 0));
        assert!(is_es);
    }

    #[test]
    fn test_version_defaults() {
        let none = MaxShaderVersions::default();
        let (version, _) = get_glsl_version(ShaderVersion::default(), ShaderVersion::default(), TargetGlslCompiler::Driver, DeviceType::OpenGles, &none);
        assert_eq!(version, ShaderVersion::new(3, 0));

        let (version, _) = get_glsl_version(ShaderVersion::default(), ShaderVersion::default(), TargetGlslCompiler::IrFrontEnd, DeviceType::OpenGles, &none);
        assert_eq!(version, ShaderVersion::new(3, 1));

        let max = MaxShaderVersions {
            glsl: ShaderVersion::new(4, 5),
            glessl: ShaderVersion::new(3, 2),
        };
        let (version, _) = get_glsl_version(ShaderVersion::new(4, 2), ShaderVersion::default(), TargetGlslCompiler::Driver, DeviceType::OpenGl, &max);
        assert_eq!(version, ShaderVersion::new(4, 2));
    }

    #[test]
    fn test_desktop_header_order() {
        let macros = [ShaderMacro::new("MAX_LIGHTS", "4")];
        let mut attribs = attribs("void main() {}\n", DeviceType::OpenGl);
        attribs.max_versions.glsl = ShaderVersion::new(4, 5);
        attribs.macros = &macros;
        attribs.zero_to_one_clip_z = true;
        attribs.extensions = Some("#extension GL_ARB_shader_draw_parameters : enable");
        let glsl = build_glsl_source_string(&attribs).unwrap();

        let order = [
            "#version 450 core\n",
            "#extension GL_ARB_shader_draw_parameters : enable\n",
            "#define DESKTOP_GL 1\n",
            "#define _NDC_ZERO_TO_ONE 1\n",
            "#define VERTEX_SHADER 1\n",
            "layout(std140) uniform;\n",
            "#define MAX_LIGHTS 4\n",
            "void main() {}\n",
        ];
        let mut last = 0;
        for piece in order {
            let at = glsl[last..].find(piece).unwrap_or_else(|| panic!("'{piece}' missing or out of order in:\n{glsl}"));
            last += at + piece.len();
        }
        assert!(glsl.starts_with("#version 450 core\n"));
        assert!(!glsl.contains("precision highp"));
        assert!(glsl.contains(&format!("#define {} 1\n", crate::source::platform_definition())));
    }

    #[test]
    fn test_es_header() {
        let mut attribs = attribs("void main() {}\n", DeviceType::OpenGles);
        attribs.max_versions.glessl = ShaderVersion::new(3, 0);
        attribs.features.separable_programs = true;
        attribs.features.cubemap_arrays = true;
        let glsl = build_glsl_source_string(&attribs).unwrap();

        assert!(glsl.starts_with("#version 300 es\n#extension GL_EXT_separate_shader_objects : enable\n#extension GL_EXT_texture_cube_map_array : enable\n"));
        assert!(glsl.contains("#ifndef GL_ES\n#  define GL_ES 1\n#endif\n"));
        assert!(glsl.contains("precision highp float;\n"));
        assert!(glsl.contains("precision highp samplerCubeArray;\n"));
        assert!(!glsl.contains("precision highp uint;"));
        assert!(!glsl.contains("precision highp samplerBuffer;"));
        assert!(glsl.contains("out vec4 gl_Position;\nvoid main() {}\n"));
    }

    #[test]
    fn test_verbatim_ignores_macros() {
        let macros = [ShaderMacro::new("IGNORED", "1")];
        let mut attribs = attribs("#version 330\nvoid main() {}", DeviceType::OpenGl);
        attribs.language = SourceLanguage::GlslVerbatim;
        attribs.macros = &macros;
        assert_eq!(build_glsl_source_string(&attribs).unwrap(), "#version 330\nvoid main() {}");
    }

    #[test]
    fn test_hlsl_conversion() {
        let mut attribs = attribs("float4 main() : SV_Target { return 1; }", DeviceType::OpenGl);
        attribs.language = SourceLanguage::Hlsl;
        assert!(matches!(build_glsl_source_string(&attribs), Err(ShaderError::MissingFrontEnd { .. })));

        attribs.use_combined_samplers = false;
        attribs.hlsl_converter = Some(&UppercaseConverter);
        assert!(matches!(build_glsl_source_string(&attribs), Err(ShaderError::Unsupported { .. })));

        attribs.use_combined_samplers = true;
        attribs.compile_flags = CompileFlags::PACK_MATRIX_ROW_MAJOR;
        let glsl = build_glsl_source_string(&attribs).unwrap();
        assert!(glsl.ends_with("// converted main\nFLOAT4 MAIN() : SV_TARGET { RETURN 1; }"));
    }

    #[test]
    fn test_get_glsl_extensions() {
        let source = "#version 450\n#extension GL_ARB_shader_draw_parameters : enable\n  # extension GL_EXT_samplerless_texture_functions:require\n#extension GL_OES_broken\n";
        let extensions = get_glsl_extensions(source);
        assert_eq!(
            extensions,
            vec![
                ("GL_ARB_shader_draw_parameters".to_string(), "enable".to_string()),
                ("GL_EXT_samplerless_texture_functions".to_string(), "require".to_string()),
                ("GL_OES_broken".to_string(), String::new()),
            ]
        );
    }
}
