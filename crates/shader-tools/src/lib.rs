//! Shader translation and resource-binding remapping
//!
//! This crate turns one shader source (GLSL, WGSL, or HLSL through a
//! registered front end) into the artifact each back end consumes, reflects
//! the resources the shader references into a backend-independent
//! [`ResourceList`], and remaps their bind-group/binding pairs to an explicit
//! pipeline resource layout loaded from YAML.

mod cache;
mod error;

pub mod arrays;
pub mod binding_table;
pub mod glsl;
pub mod pipeline;
pub mod reflect;
pub mod remap;
pub mod shader;
pub mod source;
pub mod translate;
pub mod types;

pub use binding_table::{BackendAttribs, BindingTableEntry, WebGpuBindingType, build_binding_table};
pub use cache::ConversionCache;
pub use error::{Diagnostics, ResourceProperty, ShaderError, shader_display_name};
pub use pipeline::{AsyncPipeline, RemappedPipeline, RemappedShader, remap_pipeline};
pub use reflect::{ResourceAttribs, ResourceCategory, ResourceList};
pub use remap::{BindingRemapper, RemapMode, RemapOptions, ResourceMapping, VerifySeverity};
pub use shader::{CompileContext, CompiledShader, Shader, ShaderCreateInfo, ShaderState, TaskQueue, ThreadTaskQueue, compile};
pub use translate::{Artifact, SpirvVersion};
pub use types::{CompileFlags, DeviceType, ShaderStage, ShaderStages, SourceLanguage};
