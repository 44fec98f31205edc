//! wgpu bind group layouts from shader-tools binding tables
//!
//! This crate is the WebGPU back end's consumer of the resource-binding
//! table: every entry becomes a `wgpu::BindGroupLayoutEntry`, grouped and
//! sorted the way a pipeline layout expects them.

mod error;
mod layout;

pub use error::LayoutError;
pub use layout::{BindGroupEntries, bind_group_layout_entries, create_bind_group_layouts, layout_entry};
