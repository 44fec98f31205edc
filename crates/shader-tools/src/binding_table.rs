//! Resource-binding table handed to the pipeline layout builder

use crate::{
    error::ShaderError,
    reflect::{ResourceAttribs, ResourceCategory, ResourceDimension, ResourceList, SampleType, ShaderResourceType, TexelFormat},
    remap::{LayoutFlags, ResourceMapping},
    types::{DeviceType, ShaderStages},
};
use serde::Serialize;

/// WebGPU binding type, finer grained than the category where WebGPU needs it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum WebGpuBindingType {
    #[default]
    Default,
    FilteringSampler,
    NonFilteringSampler,
    ComparisonSampler,
    FloatTexture,
    FloatTextureMs,
    UnfilterableFloatTexture,
    UnfilterableFloatTextureMs,
    SIntTexture,
    SIntTextureMs,
    UIntTexture,
    UIntTextureMs,
    DepthTexture,
    DepthTextureMs,
    WriteOnlyTextureUav,
    ReadOnlyTextureUav,
    ReadWriteTextureUav,
}

/// Back-end specific part of a table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackendAttribs {
    WebGpu {
        binding_type: WebGpuBindingType,
        /// Set for textures and storage textures only
        texture_view_dim: Option<ResourceDimension>,
        /// Set for storage textures only
        uav_texture_format: Option<TexelFormat>,
    },
    Vulkan,
    Gl,
    Metal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingTableEntry {
    /// Layout name of the resource
    pub name: String,
    pub stages: ShaderStages,
    pub category: ResourceCategory,
    pub resource_type: ShaderResourceType,
    pub array_size: u32,
    pub bind_group: u32,
    pub bind_index: u32,
    pub flags: LayoutFlags,
    pub backend: BackendAttribs,
}

/// Chooses the WebGPU binding type of a resource
pub fn webgpu_binding_type(res: &ResourceAttribs, flags: LayoutFlags) -> WebGpuBindingType {
    use WebGpuBindingType as T;

    let unfilterable = flags.contains(LayoutFlags::UNFILTERABLE_FLOAT_TEXTURE);
    let multisampled = res.is_multisampled();
    let pick = |single: T, ms: T| if multisampled { ms } else { single };

    match res.category {
        ResourceCategory::Sampler if flags.contains(LayoutFlags::NON_FILTERING_SAMPLER) => T::NonFilteringSampler,
        ResourceCategory::Sampler => T::FilteringSampler,
        ResourceCategory::ComparisonSampler => T::ComparisonSampler,
        ResourceCategory::SampledTexture | ResourceCategory::MultisampledTexture => match res.sample_type {
            SampleType::Float if !unfilterable => pick(T::FloatTexture, T::FloatTextureMs),
            SampleType::Float | SampleType::UnfilterableFloat => pick(T::UnfilterableFloatTexture, T::UnfilterableFloatTextureMs),
            SampleType::SInt => pick(T::SIntTexture, T::SIntTextureMs),
            SampleType::UInt => pick(T::UIntTexture, T::UIntTextureMs),
            SampleType::Depth => pick(T::DepthTexture, T::DepthTextureMs),
            SampleType::Unknown => T::Default,
        },
        ResourceCategory::DepthTexture => T::DepthTexture,
        ResourceCategory::DepthTextureMultisampled => T::DepthTextureMs,
        ResourceCategory::WriteOnlyStorageTexture => T::WriteOnlyTextureUav,
        ResourceCategory::ReadOnlyStorageTexture => T::ReadOnlyTextureUav,
        ResourceCategory::ReadWriteStorageTexture => T::ReadWriteTextureUav,
        _ => T::Default,
    }
}

fn backend_attribs(device: DeviceType, res: &ResourceAttribs, flags: LayoutFlags) -> BackendAttribs {
    match device {
        DeviceType::WebGpu => {
            let is_texture = matches!(
                res.category,
                ResourceCategory::SampledTexture
                    | ResourceCategory::MultisampledTexture
                    | ResourceCategory::DepthTexture
                    | ResourceCategory::DepthTextureMultisampled
            );
            let is_storage_texture = res.category.shader_resource_type() == ShaderResourceType::TextureUav;
            BackendAttribs::WebGpu {
                binding_type: webgpu_binding_type(res, flags),
                texture_view_dim: (is_texture || is_storage_texture).then_some(res.dimension),
                uav_texture_format: is_storage_texture.then_some(res.format),
            }
        }
        DeviceType::Vulkan => BackendAttribs::Vulkan,
        DeviceType::OpenGl | DeviceType::OpenGles => BackendAttribs::Gl,
        DeviceType::Metal => BackendAttribs::Metal,
    }
}

/// Builds the ordered binding table of a pipeline from its remapped stages
///
/// Each layout entry appears once, in the order it is first met, with the
/// union of the stages that use it. A layout entry restricted to some stages
/// must not be used by any other.
pub fn build_binding_table(stages: &[&ResourceList], mapping: &ResourceMapping, device: DeviceType) -> Result<Vec<BindingTableEntry>, ShaderError> {
    let mut table: Vec<BindingTableEntry> = Vec::new();

    for list in stages {
        let stage_mask = list.stage().mask();
        for res in list.iter() {
            let resolved = mapping.resolve(list.shader_name(), &res.name, res.alt_name.as_deref(), list.emulated_array_suffix())?;
            if !resolved.entry.stages.contains(stage_mask) {
                return Err(ShaderError::Layout(format!(
                    "resource '{}' is used by the {} stage of shader '{}', which its layout entry excludes",
                    resolved.key,
                    list.stage(),
                    list.shader_name()
                )));
            }

            if let Some(entry) = table.iter_mut().find(|entry| entry.name == resolved.key) {
                entry.stages |= stage_mask;
                continue;
            }
            table.push(BindingTableEntry {
                name: resolved.key.to_string(),
                stages: stage_mask,
                category: res.category,
                resource_type: res.category.shader_resource_type(),
                array_size: resolved.entry.array_size,
                bind_group: resolved.entry.group,
                bind_index: resolved.entry.binding,
                flags: resolved.entry.flags,
                backend: backend_attribs(device, res, resolved.entry.flags),
            });
        }
    }
    Ok(table)
}
