use super::{IrToText, SpirvVersion};
use crate::{
    error::{Diagnostics, ShaderError},
    reflect::{parse_spirv, parse_wgsl, validate_module},
    source::{append_source_language_marker, strip_source_language_marker},
    types::SourceLanguage,
};

/// SPIR-V to WGSL through naga's SPIR-V front end and WGSL writer
#[derive(Debug, Clone, Copy, Default)]
pub struct NagaWgslBackEnd;

impl IrToText for NagaWgslBackEnd {
    fn to_text(&self, shader: &str, ir: &[u32], original_language: SourceLanguage) -> Result<String, ShaderError> {
        let module = parse_spirv(ir, shader)?;
        let info = validate_module(&module, shader, "")?;
        let mut text = naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::empty()).map_err(|e| ShaderError::Translate {
            shader: shader.to_string(),
            diagnostics: Diagnostics::new(format!("Failed to write WGSL: {e}"), String::new()),
        })?;
        append_source_language_marker(&mut text, original_language);
        Ok(text)
    }
}

/// Writes a validated module as SPIR-V with debug names
pub fn module_to_spirv(module: &naga::Module, shader: &str, source: &str, version: SpirvVersion) -> Result<Vec<u32>, ShaderError> {
    let info = validate_module(module, shader, source)?;

    let mut options = naga::back::spv::Options {
        lang_version: version.language_version(),
        ..Default::default()
    };
    // Resource names survive into reflection only through OpName
    options.flags.insert(naga::back::spv::WriterFlags::DEBUG);
    options.flags.remove(naga::back::spv::WriterFlags::ADJUST_COORDINATE_SPACE);

    naga::back::spv::write_vec(module, &info, &options, None).map_err(|e| ShaderError::Translate {
        shader: shader.to_string(),
        diagnostics: Diagnostics::new(format!("Failed to write SPIR-V: {e}"), source),
    })
}

/// Compiles WGSL text, with or without a trailing marker, to SPIR-V
pub fn wgsl_to_spirv(shader: &str, source: &str, version: SpirvVersion) -> Result<Vec<u32>, ShaderError> {
    let source = strip_source_language_marker(source);
    let module = parse_wgsl(source, shader)?;
    module_to_spirv(&module, shader, source, version)
}
