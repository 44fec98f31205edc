//! Resource reflection over naga modules

use super::{ResourceAttribs, ResourceCategory, ResourceDimension, ResourceList, SampleType, TexelFormat, load_buffer_layout};
use crate::{
    error::{Diagnostics, ShaderError},
    source::parse_source_language_marker,
    translate::Artifact,
    types::{ShaderStage, SourceLanguage},
};

/// Parameters of one reflection pass
#[derive(Debug, Clone, Copy)]
pub struct ReflectRequest<'a> {
    pub shader: &'a str,
    /// Language the shader was originally authored in
    pub source_language: SourceLanguage,
    pub stage: Option<ShaderStage>,
    pub entry_point: Option<&'a str>,
    pub combined_sampler_suffix: Option<&'a str>,
    pub load_buffer_layout: bool,
}

impl<'a> ReflectRequest<'a> {
    pub fn new(shader: &'a str, source_language: SourceLanguage) -> Self {
        Self {
            shader,
            source_language,
            stage: None,
            entry_point: None,
            combined_sampler_suffix: None,
            load_buffer_layout: false,
        }
    }
}

/// Result of reflecting one entry point
#[derive(Debug, Clone)]
pub struct ReflectedModule {
    pub entry_point: String,
    pub stage: ShaderStage,
    pub resources: ResourceList,
}

/// Extracts the resource list of a translated artifact
pub trait ReflectBindings: Send + Sync {
    fn reflect(&self, artifact: &Artifact, request: &ReflectRequest<'_>) -> Result<ReflectedModule, ShaderError>;
}

/// Reflection backed by naga's front ends and validator
#[derive(Debug, Clone, Copy, Default)]
pub struct NagaReflector;

pub(crate) fn validate_module(module: &naga::Module, shader: &str, source: &str) -> Result<naga::valid::ModuleInfo, ShaderError> {
    let mut validator = naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all());
    validator.validate(module).map_err(|e| ShaderError::Parse {
        shader: shader.to_string(),
        diagnostics: Diagnostics::new(e.emit_to_string(source), source),
    })
}

pub(crate) fn parse_wgsl(source: &str, shader: &str) -> Result<naga::Module, ShaderError> {
    naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::Parse {
        shader: shader.to_string(),
        diagnostics: Diagnostics::new(e.emit_to_string(source), source),
    })
}

pub(crate) fn parse_spirv(words: &[u32], shader: &str) -> Result<naga::Module, ShaderError> {
    let options = naga::front::spv::Options {
        adjust_coordinate_space: false,
        strict_capabilities: false,
        block_ctx_dump_prefix: None,
    };
    naga::front::spv::Frontend::new(words.iter().cloned(), &options).parse().map_err(|e| ShaderError::Parse {
        shader: shader.to_string(),
        diagnostics: Diagnostics::new(format!("SPIR-V parse error: {e}"), String::new()),
    })
}

impl ReflectBindings for NagaReflector {
    fn reflect(&self, artifact: &Artifact, request: &ReflectRequest<'_>) -> Result<ReflectedModule, ShaderError> {
        match artifact {
            Artifact::Wgsl(text) => {
                let module = parse_wgsl(text, request.shader)?;
                let info = validate_module(&module, request.shader, text)?;
                // A round-tripped artifact remembers the language it came from
                let mut request = *request;
                if request.source_language.is_wgsl_like() {
                    let marked = parse_source_language_marker(text);
                    if marked != SourceLanguage::Default {
                        request.source_language = marked;
                    }
                }
                reflect_module(&module, &info, &request)
            }
            Artifact::Spirv(words) => {
                let module = parse_spirv(words, request.shader)?;
                let info = validate_module(&module, request.shader, "")?;
                reflect_module(&module, &info, request)
            }
            Artifact::Glsl(_) => Err(ShaderError::Unsupported {
                shader: request.shader.to_string(),
                message: "GLSL artifacts are reflected by the driver after linking".to_string(),
            }),
        }
    }
}

/// Picks the entry point to reflect
///
/// With a name, the entry point must exist. Without one, the first entry
/// point of the requested stage wins (with a warning when there are several),
/// and a module without a requested stage must have exactly one entry point.
pub fn select_entry_point(module: &naga::Module, shader: &str, stage: Option<ShaderStage>, entry_point: Option<&str>) -> Result<usize, ShaderError> {
    if module.entry_points.is_empty() {
        return Err(ShaderError::NoEntryPoints { shader: shader.to_string() });
    }

    let stage_matches = |ep: &naga::EntryPoint| stage.is_none_or(|stage| ShaderStage::from_naga(ep.stage) == stage);

    let candidates: Vec<usize> = module
        .entry_points
        .iter()
        .enumerate()
        .filter(|(_, ep)| stage_matches(ep) && entry_point.is_none_or(|name| ep.name == name))
        .map(|(index, _)| index)
        .collect();

    match (candidates.len(), entry_point, stage) {
        (0, Some(name), _) => Err(ShaderError::EntryPointNotFound {
            shader: shader.to_string(),
            entry_point: name.to_string(),
        }),
        (0, None, Some(stage)) => Err(ShaderError::EntryPointNotFound {
            shader: shader.to_string(),
            entry_point: format!("<{stage} stage>"),
        }),
        (1, _, _) => Ok(candidates[0]),
        (_, None, None) => Err(ShaderError::AmbiguousEntryPoint { shader: shader.to_string() }),
        (_, _, _) => {
            let first = &module.entry_points[candidates[0]];
            tracing::warn!(
                "Shader '{shader}' contains {} matching entry points; using the first one, '{}'",
                candidates.len(),
                first.name
            );
            Ok(candidates[0])
        }
    }
}

/// Recovers the semantic name of a buffer whose variable name was synthesized
///
/// Compilers that declare several buffers of one struct type name the first
/// variable after the type plus a numeric suffix (`g_Buff0_1 : g_Buff0`).
/// Atomic variants of a type carry an `_atomic` suffix.
pub fn alternative_resource_name(variable_name: &str, type_name: &str) -> Option<String> {
    let type_name = type_name.strip_suffix("_atomic").unwrap_or(type_name);
    if type_name.is_empty() || variable_name == type_name {
        return None;
    }
    let digits = variable_name.strip_prefix(type_name)?.strip_prefix('_')?;
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(type_name.to_string())
    } else {
        None
    }
}

/// Undoes the `_` a WGSL writer appends to identifiers ending in a digit
pub fn restore_legalized_name(name: &str) -> &str {
    match name.strip_suffix('_') {
        Some(stripped) if stripped.ends_with(|c: char| c.is_ascii_digit()) => stripped,
        _ => name,
    }
}

fn image_dimension(dim: naga::ImageDimension, arrayed: bool) -> ResourceDimension {
    match (dim, arrayed) {
        (naga::ImageDimension::D1, false) => ResourceDimension::Tex1D,
        (naga::ImageDimension::D1, true) => ResourceDimension::Tex1DArray,
        (naga::ImageDimension::D2, false) => ResourceDimension::Tex2D,
        (naga::ImageDimension::D2, true) => ResourceDimension::Tex2DArray,
        (naga::ImageDimension::D3, _) => ResourceDimension::Tex3D,
        (naga::ImageDimension::Cube, false) => ResourceDimension::Cube,
        (naga::ImageDimension::Cube, true) => ResourceDimension::CubeArray,
    }
}

fn texel_format(format: naga::StorageFormat) -> TexelFormat {
    use naga::StorageFormat as F;
    match format {
        F::Bgra8Unorm => TexelFormat::Bgra8Unorm,
        F::Rgba8Unorm => TexelFormat::Rgba8Unorm,
        F::Rgba8Snorm => TexelFormat::Rgba8Snorm,
        F::Rgba8Uint => TexelFormat::Rgba8Uint,
        F::Rgba8Sint => TexelFormat::Rgba8Sint,
        F::Rgba16Uint => TexelFormat::Rgba16Uint,
        F::Rgba16Sint => TexelFormat::Rgba16Sint,
        F::Rgba16Float => TexelFormat::Rgba16Float,
        F::R32Uint => TexelFormat::R32Uint,
        F::R32Sint => TexelFormat::R32Sint,
        F::R32Float => TexelFormat::R32Float,
        F::Rg32Uint => TexelFormat::Rg32Uint,
        F::Rg32Sint => TexelFormat::Rg32Sint,
        F::Rg32Float => TexelFormat::Rg32Float,
        F::Rgba32Uint => TexelFormat::Rgba32Uint,
        F::Rgba32Sint => TexelFormat::Rgba32Sint,
        F::Rgba32Float => TexelFormat::Rgba32Float,
        F::R8Unorm => TexelFormat::R8Unorm,
        _ => TexelFormat::Unknown,
    }
}

fn sampled_kind(kind: naga::ScalarKind) -> SampleType {
    match kind {
        naga::ScalarKind::Float => SampleType::Float,
        naga::ScalarKind::Sint => SampleType::SInt,
        naga::ScalarKind::Uint => SampleType::UInt,
        _ => SampleType::Unknown,
    }
}

fn storage_stride(module: &naga::Module, ty: naga::Handle<naga::Type>) -> u32 {
    match &module.types[ty].inner {
        naga::TypeInner::Array { stride, .. } => *stride,
        naga::TypeInner::Struct { members, .. } => members
            .last()
            .and_then(|member| match module.types[member.ty].inner {
                naga::TypeInner::Array {
                    size: naga::ArraySize::Dynamic,
                    stride,
                    ..
                } => Some(stride),
                _ => None,
            })
            .unwrap_or(0),
        _ => 0,
    }
}

fn classify(module: &naga::Module, var: &naga::GlobalVariable, binding: &naga::ResourceBinding, name: &str) -> Result<ResourceAttribs, String> {
    let (ty, array_size) = match &module.types[var.ty].inner {
        naga::TypeInner::BindingArray { base, size } => match size {
            naga::ArraySize::Constant(count) => (*base, count.get()),
            _ => return Err("runtime-sized binding array".to_string()),
        },
        _ => (var.ty, 1),
    };

    let mut attribs = match var.space {
        naga::AddressSpace::Uniform => {
            let mut attribs = ResourceAttribs::new(name, ResourceCategory::UniformBuffer, binding.group, binding.binding);
            attribs.static_size = module.types[ty].inner.size(module.to_ctx());
            attribs
        }
        naga::AddressSpace::Storage { access } => {
            let category = if access.contains(naga::StorageAccess::STORE) {
                ResourceCategory::ReadWriteStorageBuffer
            } else {
                ResourceCategory::ReadOnlyStorageBuffer
            };
            let mut attribs = ResourceAttribs::new(name, category, binding.group, binding.binding);
            attribs.stride = storage_stride(module, ty);
            attribs
        }
        naga::AddressSpace::Handle => match &module.types[ty].inner {
            naga::TypeInner::Image { dim, arrayed, class } => {
                let dimension = image_dimension(*dim, *arrayed);
                let (category, sample_type, format) = match *class {
                    naga::ImageClass::Sampled { kind, multi } => (
                        if multi { ResourceCategory::MultisampledTexture } else { ResourceCategory::SampledTexture },
                        sampled_kind(kind),
                        TexelFormat::Unknown,
                    ),
                    naga::ImageClass::Depth { multi } => (
                        if multi { ResourceCategory::DepthTextureMultisampled } else { ResourceCategory::DepthTexture },
                        SampleType::Depth,
                        TexelFormat::Unknown,
                    ),
                    naga::ImageClass::Storage { format, access } => {
                        let category = if !access.contains(naga::StorageAccess::LOAD) {
                            ResourceCategory::WriteOnlyStorageTexture
                        } else if !access.contains(naga::StorageAccess::STORE) {
                            ResourceCategory::ReadOnlyStorageTexture
                        } else {
                            ResourceCategory::ReadWriteStorageTexture
                        };
                        let format = texel_format(format);
                        (category, format.sample_type(), format)
                    }
                    #[allow(unreachable_patterns)]
                    _ => return Err("unknown image class".to_string()),
                };
                ResourceAttribs::new(name, category, binding.group, binding.binding)
                    .with_dimension(dimension)
                    .with_sample_type(sample_type)
                    .with_format(format)
            }
            naga::TypeInner::Sampler { comparison } => {
                let category = if *comparison { ResourceCategory::ComparisonSampler } else { ResourceCategory::Sampler };
                ResourceAttribs::new(name, category, binding.group, binding.binding)
            }
            naga::TypeInner::AccelerationStructure { .. } => {
                ResourceAttribs::new(name, ResourceCategory::AccelerationStructure, binding.group, binding.binding)
            }
            other => return Err(format!("{other:?}")),
        },
        other => return Err(format!("resource in address space {other:?}")),
    };
    attribs.array_size = array_size;
    Ok(attribs)
}

/// Reflects the resources one entry point of a validated module uses
pub fn reflect_module(module: &naga::Module, info: &naga::valid::ModuleInfo, request: &ReflectRequest<'_>) -> Result<ReflectedModule, ShaderError> {
    let ep_index = select_entry_point(module, request.shader, request.stage, request.entry_point)?;
    let entry_point = &module.entry_points[ep_index];
    let ep_info = info.get_entry_point(ep_index);

    let mut resources = Vec::new();
    for (handle, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else {
            continue;
        };
        if !matches!(var.space, naga::AddressSpace::Uniform | naga::AddressSpace::Storage { .. } | naga::AddressSpace::Handle) {
            continue;
        }
        if ep_info[handle].is_empty() {
            continue;
        }

        let name = var.name.clone().unwrap_or_default();
        let mut attribs = classify(module, var, binding, &name).map_err(|kind| ShaderError::UnsupportedResource {
            shader: request.shader.to_string(),
            resource: name.clone(),
            kind,
        })?;

        if !request.source_language.is_wgsl_like() {
            let restored = restore_legalized_name(&name);
            let type_name = restore_legalized_name(module.types[var.ty].name.as_deref().unwrap_or_default());
            let alt_name = match attribs.category.is_buffer() {
                true => alternative_resource_name(restored, type_name),
                false => None,
            };
            match alt_name {
                Some(alt_name) => attribs = attribs.with_alt_name(&alt_name),
                None if restored != name => attribs = attribs.with_alt_name(restored),
                None => {}
            }
        }
        if attribs.category == ResourceCategory::ExternalTexture {
            tracing::warn!("External textures are not currently supported (resource '{name}' in shader '{}')", request.shader);
        }
        if request.load_buffer_layout && attribs.category == ResourceCategory::UniformBuffer {
            attribs.buffer_layout = Some(load_buffer_layout(module, var.ty, request.source_language));
        }
        resources.push(attribs);
    }

    let stage = ShaderStage::from_naga(entry_point.stage);
    let resources = ResourceList::new(request.shader, stage, request.source_language, resources)?.with_combined_sampler_suffix(request.combined_sampler_suffix);

    Ok(ReflectedModule {
        entry_point: entry_point.name.clone(),
        stage,
        resources,
    })
}
