use crate::LayoutError;
use shader_tools::{
    BackendAttribs, BindingTableEntry, ResourceCategory, ShaderStages, WebGpuBindingType,
    reflect::{ResourceDimension, TexelFormat},
};
use std::num::NonZeroU32;

/// Layout entries of one bind group, sorted by binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindGroupEntries {
    pub group: u32,
    pub entries: Vec<wgpu::BindGroupLayoutEntry>,
}

fn visibility(entry: &BindingTableEntry) -> Result<wgpu::ShaderStages, LayoutError> {
    let supported = ShaderStages::VERTEX | ShaderStages::PIXEL | ShaderStages::COMPUTE;
    if !supported.contains(entry.stages) {
        return Err(LayoutError::UnsupportedStages { name: entry.name.clone() });
    }

    let mut stages = wgpu::ShaderStages::NONE;
    if entry.stages.contains(ShaderStages::VERTEX) {
        stages |= wgpu::ShaderStages::VERTEX;
    }
    if entry.stages.contains(ShaderStages::PIXEL) {
        stages |= wgpu::ShaderStages::FRAGMENT;
    }
    if entry.stages.contains(ShaderStages::COMPUTE) {
        stages |= wgpu::ShaderStages::COMPUTE;
    }
    Ok(stages)
}

fn view_dimension(name: &str, dimension: Option<ResourceDimension>) -> Result<wgpu::TextureViewDimension, LayoutError> {
    match dimension.unwrap_or(ResourceDimension::Tex2D) {
        ResourceDimension::Tex1D => Ok(wgpu::TextureViewDimension::D1),
        ResourceDimension::Tex2D => Ok(wgpu::TextureViewDimension::D2),
        ResourceDimension::Tex2DArray => Ok(wgpu::TextureViewDimension::D2Array),
        ResourceDimension::Tex3D => Ok(wgpu::TextureViewDimension::D3),
        ResourceDimension::Cube => Ok(wgpu::TextureViewDimension::Cube),
        ResourceDimension::CubeArray => Ok(wgpu::TextureViewDimension::CubeArray),
        dimension => Err(LayoutError::UnsupportedDimension {
            name: name.to_string(),
            dimension,
        }),
    }
}

fn storage_format(name: &str, format: Option<TexelFormat>) -> Result<wgpu::TextureFormat, LayoutError> {
    use wgpu::TextureFormat as F;

    let format = format.unwrap_or_default();
    Ok(match format {
        TexelFormat::R8Unorm => F::R8Unorm,
        TexelFormat::Rgba8Unorm => F::Rgba8Unorm,
        TexelFormat::Rgba8Snorm => F::Rgba8Snorm,
        TexelFormat::Rgba8Uint => F::Rgba8Uint,
        TexelFormat::Rgba8Sint => F::Rgba8Sint,
        TexelFormat::Bgra8Unorm => F::Bgra8Unorm,
        TexelFormat::Rgba16Uint => F::Rgba16Uint,
        TexelFormat::Rgba16Sint => F::Rgba16Sint,
        TexelFormat::Rgba16Float => F::Rgba16Float,
        TexelFormat::R32Uint => F::R32Uint,
        TexelFormat::R32Sint => F::R32Sint,
        TexelFormat::R32Float => F::R32Float,
        TexelFormat::Rg32Uint => F::Rg32Uint,
        TexelFormat::Rg32Sint => F::Rg32Sint,
        TexelFormat::Rg32Float => F::Rg32Float,
        TexelFormat::Rgba32Uint => F::Rgba32Uint,
        TexelFormat::Rgba32Sint => F::Rgba32Sint,
        TexelFormat::Rgba32Float => F::Rgba32Float,
        TexelFormat::Unknown => {
            return Err(LayoutError::UnsupportedFormat {
                name: name.to_string(),
                format,
            });
        }
    })
}

fn buffer(ty: wgpu::BufferBindingType) -> wgpu::BindingType {
    wgpu::BindingType::Buffer {
        ty,
        has_dynamic_offset: false,
        min_binding_size: None,
    }
}

/// Converts one table entry to a wgpu layout entry
pub fn layout_entry(entry: &BindingTableEntry) -> Result<wgpu::BindGroupLayoutEntry, LayoutError> {
    let BackendAttribs::WebGpu {
        binding_type,
        texture_view_dim,
        uav_texture_format,
    } = entry.backend
    else {
        return Err(LayoutError::NotWebGpu { name: entry.name.clone() });
    };

    let texture = |sample_type: wgpu::TextureSampleType, multisampled: bool| -> Result<wgpu::BindingType, LayoutError> {
        Ok(wgpu::BindingType::Texture {
            sample_type,
            view_dimension: view_dimension(&entry.name, texture_view_dim)?,
            multisampled,
        })
    };
    let storage_texture = |access: wgpu::StorageTextureAccess| -> Result<wgpu::BindingType, LayoutError> {
        Ok(wgpu::BindingType::StorageTexture {
            access,
            format: storage_format(&entry.name, uav_texture_format)?,
            view_dimension: view_dimension(&entry.name, texture_view_dim)?,
        })
    };

    use wgpu::TextureSampleType as S;
    use WebGpuBindingType as T;
    let ty = match binding_type {
        T::FilteringSampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        T::NonFilteringSampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
        T::ComparisonSampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
        T::FloatTexture => texture(S::Float { filterable: true }, false)?,
        T::FloatTextureMs => texture(S::Float { filterable: true }, true)?,
        T::UnfilterableFloatTexture => texture(S::Float { filterable: false }, false)?,
        T::UnfilterableFloatTextureMs => texture(S::Float { filterable: false }, true)?,
        T::SIntTexture => texture(S::Sint, false)?,
        T::SIntTextureMs => texture(S::Sint, true)?,
        T::UIntTexture => texture(S::Uint, false)?,
        T::UIntTextureMs => texture(S::Uint, true)?,
        T::DepthTexture => texture(S::Depth, false)?,
        T::DepthTextureMs => texture(S::Depth, true)?,
        T::WriteOnlyTextureUav => storage_texture(wgpu::StorageTextureAccess::WriteOnly)?,
        T::ReadOnlyTextureUav => storage_texture(wgpu::StorageTextureAccess::ReadOnly)?,
        T::ReadWriteTextureUav => storage_texture(wgpu::StorageTextureAccess::ReadWrite)?,
        T::Default => match entry.category {
            ResourceCategory::UniformBuffer => buffer(wgpu::BufferBindingType::Uniform),
            ResourceCategory::ReadOnlyStorageBuffer => buffer(wgpu::BufferBindingType::Storage { read_only: true }),
            ResourceCategory::ReadWriteStorageBuffer => buffer(wgpu::BufferBindingType::Storage { read_only: false }),
            category => {
                return Err(LayoutError::UnsupportedResource {
                    name: entry.name.clone(),
                    category,
                });
            }
        },
    };

    Ok(wgpu::BindGroupLayoutEntry {
        binding: entry.bind_index,
        visibility: visibility(entry)?,
        ty,
        count: if entry.array_size > 1 { NonZeroU32::new(entry.array_size) } else { None },
    })
}

/// Groups a binding table into per-group layout entries
///
/// The result is indexed by group; groups nothing binds to are present with
/// no entries so that the list can back a pipeline layout directly.
pub fn bind_group_layout_entries(table: &[BindingTableEntry]) -> Result<Vec<BindGroupEntries>, LayoutError> {
    let group_count = table.iter().map(|entry| entry.bind_group + 1).max().unwrap_or(0);
    let mut groups: Vec<BindGroupEntries> = (0..group_count).map(|group| BindGroupEntries { group, entries: Vec::new() }).collect();
    let mut owners: Vec<Vec<(u32, &str)>> = vec![Vec::new(); group_count as usize];

    for entry in table {
        let group = entry.bind_group as usize;
        if let Some((_, first)) = owners[group].iter().find(|(binding, _)| *binding == entry.bind_index) {
            return Err(LayoutError::DuplicateBinding {
                first: first.to_string(),
                second: entry.name.clone(),
                group: entry.bind_group,
                binding: entry.bind_index,
            });
        }
        owners[group].push((entry.bind_index, &entry.name));
        groups[group].entries.push(layout_entry(entry)?);
    }

    // Sort by binding number
    for group in &mut groups {
        group.entries.sort_by_key(|entry| entry.binding);
    }
    Ok(groups)
}

/// Creates one bind group layout per group of the table
pub fn create_bind_group_layouts(device: &wgpu::Device, label: &str, table: &[BindingTableEntry]) -> Result<Vec<wgpu::BindGroupLayout>, LayoutError> {
    let groups = bind_group_layout_entries(table)?;
    tracing::debug!("Creating {} bind group layouts for '{label}'", groups.len());

    Ok(groups
        .iter()
        .map(|group| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &group.entries,
            })
        })
        .collect())
}
