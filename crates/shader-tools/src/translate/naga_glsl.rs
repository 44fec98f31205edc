use super::{IrRequest, SourceToIr, module_to_spirv};
use crate::{
    error::{Diagnostics, ShaderError},
    source::{append_shader_macros, append_shader_type_definitions, macros_to_defines, shader_type_definitions},
};
use rustc_hash::{FxHashMap, FxHashSet};

/// Vulkan-flavoured GLSL to SPIR-V through naga's GLSL front end
#[derive(Debug, Clone, Copy, Default)]
pub struct NagaGlslFrontEnd;

impl SourceToIr for NagaGlslFrontEnd {
    fn to_ir(&self, request: &IrRequest<'_>) -> Result<Vec<u32>, ShaderError> {
        let stage = request.stage.to_naga().ok_or_else(|| ShaderError::Unsupported {
            shader: request.shader.to_string(),
            message: format!("{} shaders cannot be compiled by the GLSL front end", request.stage),
        })?;

        let mut defines = naga::FastHashMap::default();
        if request.preamble {
            defines.insert("GLSLANG".to_string(), String::new());
            for name in shader_type_definitions(request.stage) {
                defines.insert(name.to_string(), "1".to_string());
            }
            defines.extend(macros_to_defines(request.macros));
        }

        let options = naga::front::glsl::Options { stage, defines };
        let mut module = naga::front::glsl::Frontend::default().parse(&options, request.source).map_err(|e| ShaderError::Parse {
            shader: request.shader.to_string(),
            diagnostics: Diagnostics::new(e.emit_to_string(request.source), expanded_source(request)),
        })?;

        if request.assign_bindings {
            let assigned = assign_bindings(&mut module);
            if assigned > 0 {
                tracing::debug!("assigned bindings to {assigned} resources of shader '{}'", request.shader);
            }
        }

        module_to_spirv(&module, request.shader, &expanded_source(request), request.spirv_version)
    }
}

/// The source as the preprocessor sees it, with the defines written out
///
/// The defines follow the `#version` directive, which has to stay first.
pub fn expanded_source(request: &IrRequest<'_>) -> String {
    if !request.preamble {
        return request.source.to_string();
    }

    let mut preamble = String::from("#define GLSLANG\n");
    append_shader_type_definitions(&mut preamble, request.stage);
    append_shader_macros(&mut preamble, request.macros);

    let source = request.source;
    let start = source.len() - source.trim_start().len();
    let split = if source[start..].starts_with("#version") {
        source[start..].find('\n').map_or(source.len(), |end| start + end + 1)
    } else {
        0
    };

    let (head, tail) = source.split_at(split);
    let mut expanded = String::with_capacity(source.len() + preamble.len() + 1);
    expanded.push_str(head);
    if !head.is_empty() && !head.ends_with('\n') {
        expanded.push('\n');
    }
    expanded.push_str(&preamble);
    expanded.push_str(tail);
    expanded
}

/// Gives each resource without a binding, or whose binding collides with an
/// earlier declaration, the next free index of its group
///
/// Resources without a binding go to group 0.
///
/// # Returns
/// Number of resources that were (re)assigned
pub fn assign_bindings(module: &mut naga::Module) -> usize {
    let mut used: FxHashMap<u32, FxHashSet<u32>> = FxHashMap::default();
    let mut pending = Vec::new();

    for (handle, var) in module.global_variables.iter() {
        if !matches!(var.space, naga::AddressSpace::Uniform | naga::AddressSpace::Storage { .. } | naga::AddressSpace::Handle) {
            continue;
        }
        match &var.binding {
            Some(binding) if used.entry(binding.group).or_default().insert(binding.binding) => {}
            _ => pending.push(handle),
        }
    }

    for &handle in &pending {
        let var = &mut module.global_variables[handle];
        let group = var.binding.as_ref().map_or(0, |binding| binding.group);
        let taken = used.entry(group).or_default();
        let binding = (0u32..).find(|index| !taken.contains(index)).unwrap_or_default();
        taken.insert(binding);
        tracing::debug!("resource '{}' assigned to group {group} binding {binding}", var.name.as_deref().unwrap_or_default());
        var.binding = Some(naga::ResourceBinding { group, binding });
    }

    pending.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        reflect::{NagaReflector, ReflectBindings, ReflectRequest, ResourceCategory},
        source::ShaderMacro,
        translate::{Artifact, SpirvVersion},
        types::{ShaderStage, SourceLanguage},
    };

    const TINTED_FS: &str = r#"#version 450
layout(set = 0, binding = 0) uniform Globals {
    vec4 tint;
} globals;
layout(set = 0, binding = 1) uniform texture2D g_Texture;
layout(set = 0, binding = 2) uniform sampler g_Texture_sampler;

layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 o_color;

void main() {
#ifdef FRAGMENT_SHADER
    o_color = texture(sampler2D(g_Texture, g_Texture_sampler), v_uv) * globals.tint * TINT_SCALE;
#endif
}
"#;

    fn request<'a>(source: &'a str, macros: &'a [ShaderMacro]) -> IrRequest<'a> {
        IrRequest {
            shader: "Tinted",
            stage: ShaderStage::Pixel,
            entry_point: None,
            source,
            macros,
            preamble: true,
            spirv_version: SpirvVersion::Vk100,
            assign_bindings: true,
            file_name: None,
        }
    }

    #[test]
    fn test_glsl_to_spirv() {
        let macros = [ShaderMacro::new("TINT_SCALE", "2.0")];
        let words = NagaGlslFrontEnd.to_ir(&request(TINTED_FS, &macros)).unwrap();
        assert_eq!(words[0], 0x0723_0203);

        let reflected = NagaReflector
            .reflect(&Artifact::Spirv(words), &ReflectRequest::new("Tinted", SourceLanguage::Glsl))
            .unwrap();
        assert_eq!(reflected.stage, ShaderStage::Pixel);
        let list = &reflected.resources;
        assert_eq!(list.find("globals").unwrap().category, ResourceCategory::UniformBuffer);
        assert_eq!(list.find("g_Texture").unwrap().bind_index, 1);
        assert_eq!(list.find("g_Texture_sampler").unwrap().category, ResourceCategory::Sampler);
    }

    #[test]
    fn test_missing_macro_fails_with_diagnostics() {
        let err = NagaGlslFrontEnd.to_ir(&request(TINTED_FS, &[])).unwrap_err();
        let diagnostics = err.diagnostics().unwrap();
        let (version, body) = TINTED_FS.split_once('\n').unwrap();
        assert_eq!(diagnostics.source, format!("{version}\n#define GLSLANG\n#define FRAGMENT_SHADER 1\n#define PIXEL_SHADER 1\n{body}"));
        assert!(diagnostics.to_blob().ends_with(body));
    }

    #[test]
    fn test_diagnostics_carry_user_defines() {
        let source = "#version 450\nvoid main() { float x = MY_MACRO + ; }\n";
        let macros = [ShaderMacro::new("MY_MACRO", "2.0")];
        let mut request = request(source, &macros);
        request.stage = ShaderStage::Vertex;
        let err = NagaGlslFrontEnd.to_ir(&request).unwrap_err();

        let blob = err.diagnostics().unwrap().to_blob();
        assert!(blob.contains("#version 450\n#define GLSLANG\n#define VERTEX_SHADER 1\n#define MY_MACRO 2.0\nvoid main()"));
    }

    #[test]
    fn test_expanded_source_without_version() {
        let macros = [ShaderMacro::new("QUALITY", "1"), ShaderMacro::new("QUALITY", "3")];
        let request = request("void main() {}", &macros);
        assert_eq!(
            expanded_source(&request),
            "#define GLSLANG\n#define FRAGMENT_SHADER 1\n#define PIXEL_SHADER 1\n#define QUALITY 3\nvoid main() {}"
        );

        let verbatim = IrRequest { preamble: false, ..request };
        assert_eq!(expanded_source(&verbatim), "void main() {}");
    }

    #[test]
    fn test_unsupported_stage() {
        let mut request = request(TINTED_FS, &[]);
        request.stage = ShaderStage::Geometry;
        assert!(matches!(NagaGlslFrontEnd.to_ir(&request), Err(ShaderError::Unsupported { .. })));
    }

    #[test]
    fn test_assign_bindings() {
        let mut module = naga::Module::default();
        let ty = module.types.insert(
            naga::Type {
                name: None,
                inner: naga::TypeInner::Sampler { comparison: false },
            },
            naga::Span::UNDEFINED,
        );
        let declared = [("a", Some((0, 0))), ("b", Some((0, 0))), ("c", None), ("d", Some((1, 0))), ("e", Some((0, 1)))];
        for (name, binding) in declared {
            module.global_variables.append(
                naga::GlobalVariable {
                    name: Some(name.to_string()),
                    space: naga::AddressSpace::Handle,
                    binding: binding.map(|(group, binding)| naga::ResourceBinding { group, binding }),
                    ty,
                    init: None,
                },
                naga::Span::UNDEFINED,
            );
        }

        assert_eq!(assign_bindings(&mut module), 2);
        let bindings: Vec<(u32, u32)> = module
            .global_variables
            .iter()
            .map(|(_, var)| var.binding.as_ref().map(|b| (b.group, b.binding)).unwrap())
            .collect();
        assert_eq!(bindings, vec![(0, 0), (0, 2), (0, 3), (1, 0), (0, 1)]);
    }
}
