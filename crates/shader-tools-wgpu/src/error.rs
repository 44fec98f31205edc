use shader_tools::{ResourceCategory, reflect::ResourceDimension, reflect::TexelFormat};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("resource '{name}' was not built for a WebGPU device")]
    NotWebGpu { name: String },

    #[error("resource '{name}' of category {category} has no wgpu binding type")]
    UnsupportedResource { name: String, category: ResourceCategory },

    #[error("resource '{name}' is visible to stages wgpu cannot express")]
    UnsupportedStages { name: String },

    #[error("resource '{name}' has no wgpu view dimension for {dimension}")]
    UnsupportedDimension { name: String, dimension: ResourceDimension },

    #[error("storage texture '{name}' has no wgpu format for {format}")]
    UnsupportedFormat { name: String, format: TexelFormat },

    #[error("resources '{first}' and '{second}' both use group {group} binding {binding}")]
    DuplicateBinding { first: String, second: String, group: u32, binding: u32 },
}
