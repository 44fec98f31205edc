//! Enumerations shared by every stage of the shader toolchain.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Error returned when a textual enum value is not recognized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Language the shader source was authored in
///
/// The discriminants are stable: they are what the trailing source-language
/// marker stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLanguage {
    #[default]
    Default = 0,
    Hlsl = 1,
    Glsl = 2,
    GlslVerbatim = 3,
    Msl = 4,
    MslVerbatim = 5,
    MetalBytecode = 6,
    Wgsl = 7,
}

impl SourceLanguage {
    pub const ALL: [SourceLanguage; 8] = [
        SourceLanguage::Default,
        SourceLanguage::Hlsl,
        SourceLanguage::Glsl,
        SourceLanguage::GlslVerbatim,
        SourceLanguage::Msl,
        SourceLanguage::MslVerbatim,
        SourceLanguage::MetalBytecode,
        SourceLanguage::Wgsl,
    ];

    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|lang| *lang as i32 == value)
    }

    /// WGSL and unspecified sources keep WGSL naming and matrix conventions
    pub fn is_wgsl_like(self) -> bool {
        matches!(self, SourceLanguage::Wgsl | SourceLanguage::Default)
    }
}

impl fmt::Display for SourceLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceLanguage::Default => "default",
            SourceLanguage::Hlsl => "HLSL",
            SourceLanguage::Glsl => "GLSL",
            SourceLanguage::GlslVerbatim => "GLSL verbatim",
            SourceLanguage::Msl => "MSL",
            SourceLanguage::MslVerbatim => "MSL verbatim",
            SourceLanguage::MetalBytecode => "Metal bytecode",
            SourceLanguage::Wgsl => "WGSL",
        };
        f.write_str(name)
    }
}

impl FromStr for SourceLanguage {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(SourceLanguage::Default),
            "hlsl" => Ok(SourceLanguage::Hlsl),
            "glsl" => Ok(SourceLanguage::Glsl),
            "glsl_verbatim" | "glsl-verbatim" => Ok(SourceLanguage::GlslVerbatim),
            "msl" => Ok(SourceLanguage::Msl),
            "msl_verbatim" | "msl-verbatim" => Ok(SourceLanguage::MslVerbatim),
            "wgsl" => Ok(SourceLanguage::Wgsl),
            _ => Err(ParseEnumError { kind: "source language", value: s.to_string() }),
        }
    }
}

bitflags! {
    /// Set of shader stages a resource is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const PIXEL = 1 << 1;
        const GEOMETRY = 1 << 2;
        const HULL = 1 << 3;
        const DOMAIN = 1 << 4;
        const COMPUTE = 1 << 5;
        const AMPLIFICATION = 1 << 6;
        const MESH = 1 << 7;
        const RAY_GEN = 1 << 8;
        const RAY_MISS = 1 << 9;
        const RAY_CLOSEST_HIT = 1 << 10;
        const RAY_ANY_HIT = 1 << 11;
        const RAY_INTERSECTION = 1 << 12;
        const CALLABLE = 1 << 13;
        const TILE = 1 << 14;
    }
}

/// A single pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Geometry,
    Hull,
    Domain,
    Compute,
    Amplification,
    Mesh,
    RayGen,
    RayMiss,
    RayClosestHit,
    RayAnyHit,
    RayIntersection,
    Callable,
    Tile,
}

impl ShaderStage {
    pub fn mask(self) -> ShaderStages {
        match self {
            ShaderStage::Vertex => ShaderStages::VERTEX,
            ShaderStage::Pixel => ShaderStages::PIXEL,
            ShaderStage::Geometry => ShaderStages::GEOMETRY,
            ShaderStage::Hull => ShaderStages::HULL,
            ShaderStage::Domain => ShaderStages::DOMAIN,
            ShaderStage::Compute => ShaderStages::COMPUTE,
            ShaderStage::Amplification => ShaderStages::AMPLIFICATION,
            ShaderStage::Mesh => ShaderStages::MESH,
            ShaderStage::RayGen => ShaderStages::RAY_GEN,
            ShaderStage::RayMiss => ShaderStages::RAY_MISS,
            ShaderStage::RayClosestHit => ShaderStages::RAY_CLOSEST_HIT,
            ShaderStage::RayAnyHit => ShaderStages::RAY_ANY_HIT,
            ShaderStage::RayIntersection => ShaderStages::RAY_INTERSECTION,
            ShaderStage::Callable => ShaderStages::CALLABLE,
            ShaderStage::Tile => ShaderStages::TILE,
        }
    }

    /// Stage as understood by naga, if naga can compile it
    pub fn to_naga(self) -> Option<naga::ShaderStage> {
        match self {
            ShaderStage::Vertex => Some(naga::ShaderStage::Vertex),
            ShaderStage::Pixel => Some(naga::ShaderStage::Fragment),
            ShaderStage::Compute => Some(naga::ShaderStage::Compute),
            _ => None,
        }
    }

    pub fn from_naga(stage: naga::ShaderStage) -> Self {
        match stage {
            naga::ShaderStage::Vertex => ShaderStage::Vertex,
            naga::ShaderStage::Fragment => ShaderStage::Pixel,
            #[allow(unreachable_patterns)]
            _ => ShaderStage::Compute,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Pixel => "pixel",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Hull => "hull",
            ShaderStage::Domain => "domain",
            ShaderStage::Compute => "compute",
            ShaderStage::Amplification => "amplification",
            ShaderStage::Mesh => "mesh",
            ShaderStage::RayGen => "ray generation",
            ShaderStage::RayMiss => "ray miss",
            ShaderStage::RayClosestHit => "ray closest hit",
            ShaderStage::RayAnyHit => "ray any hit",
            ShaderStage::RayIntersection => "ray intersection",
            ShaderStage::Callable => "callable",
            ShaderStage::Tile => "tile",
        };
        f.write_str(name)
    }
}

impl FromStr for ShaderStage {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vertex" | "vs" => Ok(ShaderStage::Vertex),
            "pixel" | "fragment" | "ps" | "fs" => Ok(ShaderStage::Pixel),
            "geometry" | "gs" => Ok(ShaderStage::Geometry),
            "hull" | "tess_control" => Ok(ShaderStage::Hull),
            "domain" | "tess_evaluation" => Ok(ShaderStage::Domain),
            "compute" | "cs" => Ok(ShaderStage::Compute),
            "amplification" | "task" => Ok(ShaderStage::Amplification),
            "mesh" => Ok(ShaderStage::Mesh),
            _ => Err(ParseEnumError { kind: "shader stage", value: s.to_string() }),
        }
    }
}

/// Graphics back end a shader is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Vulkan,
    WebGpu,
    OpenGl,
    OpenGles,
    Metal,
}

impl DeviceType {
    /// Whether the back end consumes a textual GLSL artifact
    pub fn uses_glsl_text(self) -> bool {
        matches!(self, DeviceType::OpenGl | DeviceType::OpenGles)
    }
}

impl FromStr for DeviceType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vulkan" | "vk" => Ok(DeviceType::Vulkan),
            "webgpu" | "wgpu" => Ok(DeviceType::WebGpu),
            "gl" | "opengl" => Ok(DeviceType::OpenGl),
            "gles" | "opengles" => Ok(DeviceType::OpenGles),
            "metal" | "mtl" => Ok(DeviceType::Metal),
            _ => Err(ParseEnumError { kind: "device type", value: s.to_string() }),
        }
    }
}

bitflags! {
    /// Shader compilation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CompileFlags: u32 {
        /// Matrices in uniform buffers are packed row-major
        const PACK_MATRIX_ROW_MAJOR = 1 << 0;
        /// Produce the artifact without a resource list
        const SKIP_REFLECTION = 1 << 1;
    }
}

/// Major/minor language version, e.g. GLSL 4.5 or ESSL 3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ShaderVersion {
    pub major: u8,
    pub minor: u8,
}

impl ShaderVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// The zero version means "not specified"
    pub fn is_unspecified(&self) -> bool {
        self.major == 0 && self.minor == 0
    }
}

impl fmt::Display for ShaderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
