//! Canonical shader resource reflection
//!
//! A [`ResourceList`] is the backend-independent view of every resource a
//! shader stage binds. It is built once per reflected shader and never
//! mutated; remapping produces a new list.

mod buffer_layout;
mod naga_reflect;

pub use buffer_layout::{BasicType, BufferLayoutDesc, VariableClass, VariableDesc, load_buffer_layout};
pub use naga_reflect::{
    NagaReflector, ReflectBindings, ReflectRequest, ReflectedModule, alternative_resource_name, reflect_module, restore_legalized_name, select_entry_point,
};
pub(crate) use naga_reflect::{parse_spirv, parse_wgsl, validate_module};

use crate::{
    error::{ResourceProperty, ShaderError},
    types::{ShaderStage, SourceLanguage},
};
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::{fmt, sync::Arc};

/// Kind of a shader-visible binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceCategory {
    UniformBuffer,
    ReadOnlyStorageBuffer,
    ReadWriteStorageBuffer,
    Sampler,
    ComparisonSampler,
    SampledTexture,
    MultisampledTexture,
    DepthTexture,
    DepthTextureMultisampled,
    WriteOnlyStorageTexture,
    ReadOnlyStorageTexture,
    ReadWriteStorageTexture,
    ExternalTexture,
    AtomicCounter,
    InputAttachment,
    AccelerationStructure,
}

/// Contiguous run of a [`ResourceList`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CategoryGroup {
    UniformBuffer,
    StorageBuffer,
    Texture,
    StorageTexture,
    Sampler,
    ExternalTexture,
    AtomicCounter,
    InputAttachment,
    AccelerationStructure,
}

impl CategoryGroup {
    pub const COUNT: usize = 9;

    pub const ALL: [CategoryGroup; Self::COUNT] = [
        CategoryGroup::UniformBuffer,
        CategoryGroup::StorageBuffer,
        CategoryGroup::Texture,
        CategoryGroup::StorageTexture,
        CategoryGroup::Sampler,
        CategoryGroup::ExternalTexture,
        CategoryGroup::AtomicCounter,
        CategoryGroup::InputAttachment,
        CategoryGroup::AccelerationStructure,
    ];
}

/// Engine-level resource type a category is exposed as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ShaderResourceType {
    ConstantBuffer,
    BufferSrv,
    BufferUav,
    TextureSrv,
    TextureUav,
    Sampler,
    AccelStruct,
    InputAttachment,
    Unknown,
}

impl ResourceCategory {
    pub fn group(self) -> CategoryGroup {
        use ResourceCategory::*;
        match self {
            UniformBuffer => CategoryGroup::UniformBuffer,
            ReadOnlyStorageBuffer | ReadWriteStorageBuffer => CategoryGroup::StorageBuffer,
            SampledTexture | MultisampledTexture | DepthTexture | DepthTextureMultisampled => CategoryGroup::Texture,
            WriteOnlyStorageTexture | ReadOnlyStorageTexture | ReadWriteStorageTexture => CategoryGroup::StorageTexture,
            Sampler | ComparisonSampler => CategoryGroup::Sampler,
            ExternalTexture => CategoryGroup::ExternalTexture,
            AtomicCounter => CategoryGroup::AtomicCounter,
            InputAttachment => CategoryGroup::InputAttachment,
            AccelerationStructure => CategoryGroup::AccelerationStructure,
        }
    }

    pub fn shader_resource_type(self) -> ShaderResourceType {
        use ResourceCategory::*;
        match self {
            UniformBuffer => ShaderResourceType::ConstantBuffer,
            ReadOnlyStorageBuffer => ShaderResourceType::BufferSrv,
            ReadWriteStorageBuffer | AtomicCounter => ShaderResourceType::BufferUav,
            Sampler | ComparisonSampler => ShaderResourceType::Sampler,
            SampledTexture | MultisampledTexture | DepthTexture | DepthTextureMultisampled => ShaderResourceType::TextureSrv,
            WriteOnlyStorageTexture | ReadOnlyStorageTexture | ReadWriteStorageTexture => ShaderResourceType::TextureUav,
            ExternalTexture => ShaderResourceType::Unknown,
            InputAttachment => ShaderResourceType::InputAttachment,
            AccelerationStructure => ShaderResourceType::AccelStruct,
        }
    }

    pub fn is_buffer(self) -> bool {
        matches!(self.group(), CategoryGroup::UniformBuffer | CategoryGroup::StorageBuffer)
    }

    pub fn is_multisampled(self) -> bool {
        matches!(self, ResourceCategory::MultisampledTexture | ResourceCategory::DepthTextureMultisampled)
    }

    fn short_name(self) -> &'static str {
        use ResourceCategory::*;
        match self {
            UniformBuffer => "UB",
            ReadOnlyStorageBuffer => "RO SB",
            ReadWriteStorageBuffer => "RW SB",
            Sampler => "Sampler",
            ComparisonSampler => "Cmp Sampler",
            SampledTexture => "Tex",
            MultisampledTexture => "Tex MS",
            DepthTexture => "Depth Tex",
            DepthTextureMultisampled => "Depth Tex MS",
            WriteOnlyStorageTexture => "WO StTex",
            ReadOnlyStorageTexture => "RO StTex",
            ReadWriteStorageTexture => "RW StTex",
            ExternalTexture => "Ext Tex",
            AtomicCounter => "Atomic Counter",
            InputAttachment => "Input Attachment",
            AccelerationStructure => "Accel Struct",
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ResourceDimension {
    #[default]
    Undefined,
    Buffer,
    Tex1D,
    Tex1DArray,
    Tex2D,
    Tex2DArray,
    Tex3D,
    Cube,
    CubeArray,
}

impl fmt::Display for ResourceDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceDimension::Undefined => "undefined",
            ResourceDimension::Buffer => "buffer",
            ResourceDimension::Tex1D => "1D",
            ResourceDimension::Tex1DArray => "1D array",
            ResourceDimension::Tex2D => "2D",
            ResourceDimension::Tex2DArray => "2D array",
            ResourceDimension::Tex3D => "3D",
            ResourceDimension::Cube => "cube",
            ResourceDimension::CubeArray => "cube array",
        };
        f.write_str(name)
    }
}

/// How texture components are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SampleType {
    #[default]
    Unknown,
    Float,
    UnfilterableFloat,
    UInt,
    SInt,
    Depth,
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Texel format of a storage texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum TexelFormat {
    #[default]
    Unknown,
    R8Unorm,
    Rgba8Unorm,
    Rgba8Snorm,
    Rgba8Uint,
    Rgba8Sint,
    Bgra8Unorm,
    Rgba16Uint,
    Rgba16Sint,
    Rgba16Float,
    R32Uint,
    R32Sint,
    R32Float,
    Rg32Uint,
    Rg32Sint,
    Rg32Float,
    Rgba32Uint,
    Rgba32Sint,
    Rgba32Float,
}

impl TexelFormat {
    /// Component interpretation implied by the format
    pub fn sample_type(self) -> SampleType {
        use TexelFormat::*;
        match self {
            Unknown => SampleType::Unknown,
            Rgba8Uint | Rgba16Uint | R32Uint | Rg32Uint | Rgba32Uint => SampleType::UInt,
            Rgba8Sint | Rgba16Sint | R32Sint | Rg32Sint | Rgba32Sint => SampleType::SInt,
            _ => SampleType::Float,
        }
    }
}

impl fmt::Display for TexelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One canonical resource as seen by the pipeline layout builder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceAttribs {
    /// Identifier as it appears in the emitted source
    pub name: Arc<str>,
    /// De-mangled name recovered from a compiler-synthesized identifier
    pub alt_name: Option<Arc<str>>,
    pub category: ResourceCategory,
    pub array_size: u32,
    pub dimension: ResourceDimension,
    pub sample_type: SampleType,
    /// Only meaningful for storage textures
    pub format: TexelFormat,
    pub bind_group: u32,
    pub bind_index: u32,
    /// Byte size of a uniform buffer
    pub static_size: u32,
    /// Element stride of a storage buffer
    pub stride: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_layout: Option<BufferLayoutDesc>,
    /// Separately declared members of an emulated array, empty otherwise
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<ArrayElementBinding>,
}

/// One separately bound member of an emulated resource array
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrayElementBinding {
    pub name: Arc<str>,
    pub index: u32,
    pub bind_group: u32,
    pub bind_index: u32,
}

impl ResourceAttribs {
    pub fn new(name: &str, category: ResourceCategory, bind_group: u32, bind_index: u32) -> Self {
        Self {
            name: Arc::from(name),
            alt_name: None,
            category,
            array_size: 1,
            dimension: if category.is_buffer() { ResourceDimension::Buffer } else { ResourceDimension::Undefined },
            sample_type: SampleType::Unknown,
            format: TexelFormat::Unknown,
            bind_group,
            bind_index,
            static_size: 0,
            stride: 0,
            buffer_layout: None,
            elements: Vec::new(),
        }
    }

    pub fn with_dimension(mut self, dimension: ResourceDimension) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_sample_type(mut self, sample_type: SampleType) -> Self {
        self.sample_type = sample_type;
        self
    }

    pub fn with_format(mut self, format: TexelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_array_size(mut self, array_size: u32) -> Self {
        self.array_size = array_size;
        self
    }

    pub fn with_alt_name(mut self, alt_name: &str) -> Self {
        self.alt_name = Some(Arc::from(alt_name));
        self
    }

    /// Name used for grouping and layout lookups: the de-mangled name when one was recovered
    pub fn semantic_name(&self) -> &str {
        self.alt_name.as_deref().unwrap_or(&self.name)
    }

    pub fn is_multisampled(&self) -> bool {
        self.category.is_multisampled()
    }

    /// `(name, group, binding)` of every declaration backing this resource
    pub fn declarations(&self) -> Vec<(&str, u32, u32)> {
        if self.elements.is_empty() {
            vec![(&*self.name, self.bind_group, self.bind_index)]
        } else {
            self.elements.iter().map(|el| (&*el.name, el.bind_group, el.bind_index)).collect()
        }
    }

    /// First binding-relevant property two declarations disagree on
    ///
    /// Category, dimension, sample type and texel format are compared; the
    /// array size is compared only when `compare_array_size` is set.
    pub fn first_incompatibility(&self, other: &ResourceAttribs, compare_array_size: bool) -> Option<(ResourceProperty, String, String)> {
        if self.category != other.category {
            return Some((ResourceProperty::Category, self.category.to_string(), other.category.to_string()));
        }
        if self.dimension != other.dimension {
            return Some((ResourceProperty::Dimension, self.dimension.to_string(), other.dimension.to_string()));
        }
        if self.sample_type != other.sample_type {
            return Some((ResourceProperty::SampleType, self.sample_type.to_string(), other.sample_type.to_string()));
        }
        if self.format != other.format {
            return Some((ResourceProperty::Format, self.format.to_string(), other.format.to_string()));
        }
        if compare_array_size && self.array_size != other.array_size {
            return Some((ResourceProperty::ArraySize, self.array_size.to_string(), other.array_size.to_string()));
        }
        None
    }
}

/// Shares identical name strings between the resources of a list
#[derive(Debug, Default)]
pub struct NameInterner {
    names: FxHashSet<Arc<str>>,
}

impl NameInterner {
    pub fn intern(&mut self, name: &str) -> Arc<str> {
        if let Some(existing) = self.names.get(name) {
            return existing.clone();
        }
        let name: Arc<str> = Arc::from(name);
        self.names.insert(name.clone());
        name
    }

    fn intern_attribs(&mut self, attribs: &mut ResourceAttribs) {
        attribs.name = self.intern(&attribs.name);
        if let Some(alt_name) = attribs.alt_name.take() {
            attribs.alt_name = Some(self.intern(&alt_name));
        }
        for element in &mut attribs.elements {
            element.name = self.intern(&element.name);
        }
    }
}

/// Immutable per-stage resource collection, partitioned by [`CategoryGroup`]
#[derive(Debug, Clone, Serialize)]
pub struct ResourceList {
    shader_name: String,
    stage: ShaderStage,
    source_language: SourceLanguage,
    resources: Vec<ResourceAttribs>,
    /// `(start, count)` of each category group
    #[serde(skip)]
    ranges: [(usize, usize); CategoryGroup::COUNT],
    combined_sampler_suffix: Option<String>,
    emulated_array_suffix: Option<String>,
}

impl ResourceList {
    /// Builds the list and checks the per-stage invariants
    ///
    /// Array sizes must be at least one and no two resources may share a
    /// `(bind_group, bind_index)` pair.
    pub fn new(shader_name: &str, stage: ShaderStage, source_language: SourceLanguage, resources: Vec<ResourceAttribs>) -> Result<Self, ShaderError> {
        let mut seen = rustc_hash::FxHashMap::default();
        for res in &resources {
            if res.array_size == 0 {
                return Err(ShaderError::UnsupportedResource {
                    shader: shader_name.to_string(),
                    resource: res.name.to_string(),
                    kind: "zero-sized resource array".to_string(),
                });
            }
            for (name, group, binding) in res.declarations() {
                if let Some(previous) = seen.insert((group, binding), name.to_string()) {
                    return Err(ShaderError::Unsupported {
                        shader: shader_name.to_string(),
                        message: format!("resources '{previous}' and '{name}' share group {group} binding {binding}"),
                    });
                }
            }
        }
        Ok(Self::from_parts(shader_name, stage, source_language, resources))
    }

    /// Builds the list without the uniqueness check
    pub(crate) fn from_parts(shader_name: &str, stage: ShaderStage, source_language: SourceLanguage, mut resources: Vec<ResourceAttribs>) -> Self {
        resources.sort_by_key(|res| res.category.group());

        let mut interner = NameInterner::default();
        for res in &mut resources {
            interner.intern_attribs(res);
        }

        let mut ranges = [(0, 0); CategoryGroup::COUNT];
        let mut start = 0;
        for (i, group) in CategoryGroup::ALL.iter().enumerate() {
            let count = resources[start..].iter().take_while(|res| res.category.group() == *group).count();
            ranges[i] = (start, count);
            start += count;
        }

        Self {
            shader_name: shader_name.to_string(),
            stage,
            source_language,
            resources,
            ranges,
            combined_sampler_suffix: None,
            emulated_array_suffix: None,
        }
    }

    pub fn with_combined_sampler_suffix(mut self, suffix: Option<&str>) -> Self {
        self.combined_sampler_suffix = suffix.filter(|s| !s.is_empty()).map(str::to_string);
        self
    }

    pub fn with_emulated_array_suffix(mut self, suffix: Option<&str>) -> Self {
        self.emulated_array_suffix = suffix.filter(|s| !s.is_empty()).map(str::to_string);
        self
    }

    pub fn shader_name(&self) -> &str {
        &self.shader_name
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn source_language(&self) -> SourceLanguage {
        self.source_language
    }

    pub fn combined_sampler_suffix(&self) -> Option<&str> {
        self.combined_sampler_suffix.as_deref()
    }

    pub fn emulated_array_suffix(&self) -> Option<&str> {
        self.emulated_array_suffix.as_deref()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResourceAttribs> {
        self.resources.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ResourceAttribs> {
        self.resources.get(index)
    }

    /// All resources of one category group, without scanning the list
    pub fn group(&self, group: CategoryGroup) -> &[ResourceAttribs] {
        let (start, count) = self.ranges[group as usize];
        &self.resources[start..start + count]
    }

    pub fn uniform_buffers(&self) -> &[ResourceAttribs] {
        self.group(CategoryGroup::UniformBuffer)
    }

    pub fn storage_buffers(&self) -> &[ResourceAttribs] {
        self.group(CategoryGroup::StorageBuffer)
    }

    pub fn textures(&self) -> &[ResourceAttribs] {
        self.group(CategoryGroup::Texture)
    }

    pub fn storage_textures(&self) -> &[ResourceAttribs] {
        self.group(CategoryGroup::StorageTexture)
    }

    pub fn samplers(&self) -> &[ResourceAttribs] {
        self.group(CategoryGroup::Sampler)
    }

    pub fn external_textures(&self) -> &[ResourceAttribs] {
        self.group(CategoryGroup::ExternalTexture)
    }

    pub fn find(&self, name: &str) -> Option<&ResourceAttribs> {
        self.resources.iter().find(|res| &*res.name == name || res.alt_name.as_deref() == Some(name))
    }

    /// Sampler assigned to a texture through the combined sampler suffix
    pub fn find_combined_sampler(&self, texture: &str) -> Option<&ResourceAttribs> {
        let suffix = self.combined_sampler_suffix.as_deref()?;
        let sampler_name = format!("{texture}{suffix}");
        self.samplers().iter().find(|res| res.semantic_name() == sampler_name)
    }

    pub fn into_resources(self) -> Vec<ResourceAttribs> {
        self.resources
    }

    /// Human-readable resource report
    pub fn dump_resources(&self) -> String {
        use std::fmt::Write;

        let mut out = format!("Shader '{}' resource stats: total resources: {}:", self.shader_name, self.resources.len());
        for res in &self.resources {
            let _ = write!(out, "\n  {} '{}", res.category.short_name(), res.name);
            if res.array_size > 1 {
                let _ = write!(out, "[{}]", res.array_size);
            }
            out.push('\'');
            if let Some(alt_name) = &res.alt_name {
                let _ = write!(out, " (alt '{alt_name}')");
            }
            let _ = write!(out, " group {} binding {}", res.bind_group, res.bind_index);
        }
        out
    }
}

impl<'a> IntoIterator for &'a ResourceList {
    type Item = &'a ResourceAttribs;
    type IntoIter = std::slice::Iter<'a, ResourceAttribs>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.iter()
    }
}
