//! Error taxonomy for shader translation, reflection and remapping

use crate::types::{ShaderStage, SourceLanguage};
use std::any::Any;
use std::fmt;

/// Name used in messages when a shader has none
pub const NULL_SHADER_NAME: &str = "<null>";

/// Returns the display name of a possibly anonymous shader
pub fn shader_display_name(name: Option<&str>) -> String {
    match name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => NULL_SHADER_NAME.to_string(),
    }
}

/// Compiler log plus the source it was produced for
///
/// The source is the fully expanded text that was handed to the front end, so
/// a failure can be reproduced from the blob alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub log: String,
    pub source: String,
}

impl Diagnostics {
    pub fn new(log: impl Into<String>, source: impl Into<String>) -> Self {
        Self { log: log.into(), source: source.into() }
    }

    /// Single blob: the log followed by the source
    pub fn to_blob(&self) -> String {
        let mut blob = String::with_capacity(self.log.len() + self.source.len() + 1);
        blob.push_str(&self.log);
        if !blob.is_empty() && !blob.ends_with('\n') {
            blob.push('\n');
        }
        blob.push_str(&self.source);
        blob
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.log)
    }
}

/// Resource attribute that two declarations of the same resource disagree on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceProperty {
    Category,
    Dimension,
    SampleType,
    Format,
    ArraySize,
}

impl fmt::Display for ResourceProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceProperty::Category => "resource category",
            ResourceProperty::Dimension => "dimension",
            ResourceProperty::SampleType => "sample type",
            ResourceProperty::Format => "texel format",
            ResourceProperty::ArraySize => "array size",
        };
        f.write_str(name)
    }
}

/// Errors raised while turning shader sources into remapped artifacts
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShaderError {
    #[error("Shader '{shader}': exactly one of the source, the file path or the byte code must be provided")]
    SourceConflict { shader: String },

    #[error("Shader '{shader}': the source contains #include directives, but no input stream factory was provided")]
    MissingStreamFactory { shader: String },

    #[error("Failed to load shader source file '{path}' (shader '{shader}')")]
    SourceNotFound { shader: String, path: String },

    #[error("Shader '{shader}': {file}: [{line},{offset}]: {message}")]
    IncludeSyntax {
        shader: String,
        file: String,
        line: usize,
        offset: usize,
        message: &'static str,
    },

    #[error("Shader '{shader}': include depth limit of {limit} exceeded while unrolling '{path}'")]
    IncludeDepth { shader: String, path: String, limit: usize },

    #[error("Failed to parse shader source '{shader}':\n{diagnostics}")]
    Parse { shader: String, diagnostics: Diagnostics },

    #[error("Failed to translate shader '{shader}':\n{diagnostics}")]
    Translate { shader: String, diagnostics: Diagnostics },

    #[error("Shader '{shader}': no front end registered for source language {language}")]
    MissingFrontEnd { shader: String, language: SourceLanguage },

    #[error("Shader '{shader}': {message}")]
    Unsupported { shader: String, message: String },

    #[error("The program '{shader}' does not contain any entry points")]
    NoEntryPoints { shader: String },

    #[error("The program '{shader}' contains more than one entry point. Please specify the entry point name.")]
    AmbiguousEntryPoint { shader: String },

    #[error("Entry point '{entry_point}' is not found in shader '{shader}'")]
    EntryPointNotFound { shader: String, entry_point: String },

    #[error("Shader '{shader}': resource '{resource}' has unsupported type: {kind}")]
    UnsupportedResource { shader: String, resource: String, kind: String },

    #[error(
        "Shader '{shader}': resource '{resource}' is declared incompatibly in {stage_a} and {stage_b} stages: {property} differs ({value_a} vs {value_b})"
    )]
    IncompatibleResource {
        shader: String,
        resource: String,
        stage_a: ShaderStage,
        stage_b: ShaderStage,
        property: ResourceProperty,
        value_a: String,
        value_b: String,
    },

    #[error("Shader '{shader}': resource '{resource}' is not found in the resource mapping")]
    UnresolvedResource { shader: String, resource: String },

    #[error("Shader '{shader}': array element '{resource}' index {index} is out of range of '{array}[{array_size}]'")]
    ArrayIndexOutOfRange {
        shader: String,
        resource: String,
        array: String,
        index: u32,
        array_size: u32,
    },

    #[error(
        "Shader '{shader}': resource '{resource}' is bound at (group {actual_group}, binding {actual_binding}) but the layout requires (group {expected_group}, binding {expected_binding})"
    )]
    BindingMismatch {
        shader: String,
        resource: String,
        expected_group: u32,
        expected_binding: u32,
        actual_group: u32,
        actual_binding: u32,
    },

    #[error("Shader '{shader}': failed to rewrite bindings: {message}")]
    Rewrite { shader: String, message: String },

    #[error("Invalid resource layout: {0}")]
    Layout(String),

    #[error("Shader '{shader}' is not ready")]
    NotReady { shader: String },

    #[error("Shader '{shader}': {task} panicked: {message}")]
    Panicked { shader: String, task: &'static str, message: String },
}

impl ShaderError {
    /// Name of the shader the error refers to, if any
    pub fn shader_name(&self) -> Option<&str> {
        match self {
            ShaderError::SourceConflict { shader }
            | ShaderError::MissingStreamFactory { shader }
            | ShaderError::SourceNotFound { shader, .. }
            | ShaderError::IncludeSyntax { shader, .. }
            | ShaderError::IncludeDepth { shader, .. }
            | ShaderError::Parse { shader, .. }
            | ShaderError::Translate { shader, .. }
            | ShaderError::MissingFrontEnd { shader, .. }
            | ShaderError::Unsupported { shader, .. }
            | ShaderError::NoEntryPoints { shader }
            | ShaderError::AmbiguousEntryPoint { shader }
            | ShaderError::EntryPointNotFound { shader, .. }
            | ShaderError::UnsupportedResource { shader, .. }
            | ShaderError::IncompatibleResource { shader, .. }
            | ShaderError::UnresolvedResource { shader, .. }
            | ShaderError::ArrayIndexOutOfRange { shader, .. }
            | ShaderError::BindingMismatch { shader, .. }
            | ShaderError::Rewrite { shader, .. }
            | ShaderError::NotReady { shader }
            | ShaderError::Panicked { shader, .. } => Some(shader),
            ShaderError::Layout(_) => None,
        }
    }

    /// Turns the payload of a caught panic into an error
    pub fn from_panic(shader: &str, task: &'static str, payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => payload.downcast_ref::<&str>().map_or_else(|| "unknown panic payload".to_string(), |message| message.to_string()),
        };
        ShaderError::Panicked {
            shader: shader.to_string(),
            task,
            message,
        }
    }

    /// Diagnostics blob of a parse or translation failure
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            ShaderError::Parse { diagnostics, .. } | ShaderError::Translate { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}
