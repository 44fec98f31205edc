//! Front ends and back ends that move shaders between representations
//!
//! Every compiler involved sits behind one of two narrow traits:
//! [`SourceToIr`] lowers source text to SPIR-V words and [`IrToText`]
//! raises SPIR-V back to WGSL text. The naga-backed implementations live in
//! the submodules; engines register their own where naga has no front end.

mod naga_glsl;
mod naga_wgsl;

pub use naga_glsl::{NagaGlslFrontEnd, assign_bindings};
pub use naga_wgsl::{NagaWgslBackEnd, module_to_spirv, wgsl_to_spirv};

use crate::{error::ShaderError, source::ShaderMacro, types::ShaderStage};
use serde::{Deserialize, Serialize};

/// Output of the translation stage, in the form the back end consumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// WGSL text ending with the source-language marker
    Wgsl(String),
    /// SPIR-V words
    Spirv(Vec<u32>),
    /// GLSL text for a GL driver
    Glsl(String),
}

impl Artifact {
    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Wgsl(_) => "WGSL",
            Artifact::Spirv(_) => "SPIR-V",
            Artifact::Glsl(_) => "GLSL",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Artifact::Wgsl(text) | Artifact::Glsl(text) => Some(text),
            Artifact::Spirv(_) => None,
        }
    }

    pub fn as_words(&self) -> Option<&[u32]> {
        match self {
            Artifact::Spirv(words) => Some(words),
            _ => None,
        }
    }

    /// Little-endian SPIR-V bytes or UTF-8 text
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Artifact::Spirv(words) => words.iter().flat_map(|word| word.to_le_bytes()).collect(),
            Artifact::Wgsl(text) | Artifact::Glsl(text) => text.as_bytes().to_vec(),
        }
    }
}

/// Target environment of generated SPIR-V
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpirvVersion {
    #[default]
    Vk100,
    Vk110,
    Vk110Spirv14,
    Vk120,
    Gl,
    Gles,
}

impl SpirvVersion {
    /// SPIR-V language version the environment accepts
    pub fn language_version(self) -> (u8, u8) {
        match self {
            SpirvVersion::Vk100 | SpirvVersion::Gl | SpirvVersion::Gles => (1, 0),
            SpirvVersion::Vk110 => (1, 3),
            SpirvVersion::Vk110Spirv14 => (1, 4),
            SpirvVersion::Vk120 => (1, 5),
        }
    }
}

/// Input of a source-to-IR compile
#[derive(Debug, Clone)]
pub struct IrRequest<'a> {
    pub shader: &'a str,
    pub stage: ShaderStage,
    pub entry_point: Option<&'a str>,
    /// Include-unrolled source
    pub source: &'a str,
    pub macros: &'a [ShaderMacro],
    /// Define `GLSLANG` and the stage macros ahead of the user macros
    pub preamble: bool,
    pub spirv_version: SpirvVersion,
    /// Give every resource a concrete binding, resolving missing and colliding ones
    pub assign_bindings: bool,
    pub file_name: Option<&'a str>,
}

/// Compiles source text to SPIR-V
pub trait SourceToIr: Send + Sync {
    fn to_ir(&self, request: &IrRequest<'_>) -> Result<Vec<u32>, ShaderError>;
}

/// Converts SPIR-V to WGSL text
///
/// The returned text ends with the marker of `original_language`.
pub trait IrToText: Send + Sync {
    fn to_text(&self, shader: &str, ir: &[u32], original_language: crate::types::SourceLanguage) -> Result<String, ShaderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spirv_versions() {
        assert_eq!(SpirvVersion::default().language_version(), (1, 0));
        assert_eq!(SpirvVersion::Vk110.language_version(), (1, 3));
        assert_eq!(SpirvVersion::Vk110Spirv14.language_version(), (1, 4));
        assert_eq!(SpirvVersion::Vk120.language_version(), (1, 5));
        assert_eq!(SpirvVersion::Gles.language_version(), (1, 0));
    }

    #[test]
    fn test_artifact_bytes() {
        let spirv = Artifact::Spirv(vec![0x0723_0203, 1]);
        assert_eq!(spirv.to_bytes(), vec![0x03, 0x02, 0x23, 0x07, 1, 0, 0, 0]);
        assert_eq!(spirv.as_text(), None);
        assert_eq!(Artifact::Glsl("void main() {}".to_string()).as_text(), Some("void main() {}"));
        assert_eq!(Artifact::Wgsl(String::new()).kind(), "WGSL");
    }
}
