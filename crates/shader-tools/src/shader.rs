//! Shader objects: translation and reflection behind a lock-free readiness flag

use crate::{
    arrays::merge_emulated_arrays,
    cache::ConversionCache,
    error::{Diagnostics, ShaderError, shader_display_name},
    glsl::{GlslBuildAttribs, GlslFeatures, HlslToGlsl, MaxShaderVersions, TargetGlslCompiler, build_glsl_source_string},
    reflect::{NagaReflector, ReflectBindings, ReflectRequest, ResourceList},
    remap::SPV_MAGIC,
    source::{IncludeUnroller, ShaderMacro, ShaderSourceFactory, parse_source_language_marker, read_shader_source},
    translate::{Artifact, IrRequest, IrToText, NagaGlslFrontEnd, NagaWgslBackEnd, SourceToIr, SpirvVersion, wgsl_to_spirv},
    types::{CompileFlags, DeviceType, ShaderStage, ShaderVersion, SourceLanguage},
};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU8, Ordering},
};

pub const DEFAULT_COMBINED_SAMPLER_SUFFIX: &str = "_sampler";

/// Everything a caller supplies to create one shader
#[derive(Debug, Clone)]
pub struct ShaderCreateInfo {
    pub name: Option<String>,
    pub source_language: SourceLanguage,
    pub stage: ShaderStage,
    /// Entry point to reflect; the only entry point of the stage when `None`
    pub entry_point: Option<String>,
    pub macros: Vec<ShaderMacro>,
    pub source: Option<String>,
    pub file_path: Option<String>,
    pub byte_code: Option<Vec<u32>>,
    pub compile_flags: CompileFlags,
    pub use_combined_texture_samplers: bool,
    pub combined_sampler_suffix: Option<String>,
    /// Suffix separating an emulated array's base name from the element index
    pub emulated_array_index_suffix: Option<String>,
    pub load_full_buffer_reflection: bool,
    pub glsl_version: ShaderVersion,
    pub glessl_version: ShaderVersion,
    pub glsl_extensions: Option<String>,
}

impl ShaderCreateInfo {
    pub fn new(name: &str, stage: ShaderStage, source_language: SourceLanguage) -> Self {
        Self {
            name: Some(name.to_string()),
            source_language,
            stage,
            entry_point: None,
            macros: Vec::new(),
            source: None,
            file_path: None,
            byte_code: None,
            compile_flags: CompileFlags::empty(),
            use_combined_texture_samplers: false,
            combined_sampler_suffix: None,
            emulated_array_index_suffix: None,
            load_full_buffer_reflection: false,
            glsl_version: ShaderVersion::default(),
            glessl_version: ShaderVersion::default(),
            glsl_extensions: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_file_path(mut self, path: &str) -> Self {
        self.file_path = Some(path.to_string());
        self
    }

    pub fn with_byte_code(mut self, words: Vec<u32>) -> Self {
        self.byte_code = Some(words);
        self
    }

    pub fn with_entry_point(mut self, entry_point: &str) -> Self {
        self.entry_point = Some(entry_point.to_string());
        self
    }

    pub fn with_macro(mut self, name: &str, definition: &str) -> Self {
        self.macros.push(ShaderMacro::new(name, definition));
        self
    }

    pub fn with_compile_flags(mut self, flags: CompileFlags) -> Self {
        self.compile_flags = flags;
        self
    }

    pub fn with_combined_samplers(mut self, suffix: Option<&str>) -> Self {
        self.use_combined_texture_samplers = true;
        self.combined_sampler_suffix = suffix.map(str::to_string);
        self
    }

    pub fn with_emulated_array_suffix(mut self, suffix: &str) -> Self {
        self.emulated_array_index_suffix = Some(suffix.to_string());
        self
    }

    pub fn with_full_buffer_reflection(mut self) -> Self {
        self.load_full_buffer_reflection = true;
        self
    }

    pub fn combined_sampler_suffix(&self) -> &str {
        self.combined_sampler_suffix.as_deref().unwrap_or(DEFAULT_COMBINED_SAMPLER_SUFFIX)
    }
}

/// Settings of the OpenGL and OpenGL ES source builder
#[derive(Debug, Clone, Default)]
pub struct GlSettings {
    pub target: TargetGlslCompiler,
    pub max_versions: MaxShaderVersions,
    pub features: GlslFeatures,
    pub zero_to_one_clip_z: bool,
    pub extra_definitions: Option<String>,
}

/// Device-wide collaborators shared by every compile
pub struct CompileContext {
    pub device: DeviceType,
    pub spirv_version: SpirvVersion,
    pub factory: Option<Arc<dyn ShaderSourceFactory>>,
    pub glsl_front_end: Arc<dyn SourceToIr>,
    pub hlsl_front_end: Option<Arc<dyn SourceToIr>>,
    pub ir_to_text: Arc<dyn IrToText>,
    pub hlsl_converter: Option<Arc<dyn HlslToGlsl>>,
    pub reflector: Arc<dyn ReflectBindings>,
    /// Include-unrolled sources keyed by file path
    pub cache: Arc<ConversionCache<String>>,
    pub gl: GlSettings,
}

impl CompileContext {
    pub fn new(device: DeviceType) -> Self {
        Self {
            device,
            spirv_version: SpirvVersion::default(),
            factory: None,
            glsl_front_end: Arc::new(NagaGlslFrontEnd),
            hlsl_front_end: None,
            ir_to_text: Arc::new(NagaWgslBackEnd),
            hlsl_converter: None,
            reflector: Arc::new(NagaReflector),
            cache: Arc::new(ConversionCache::new()),
            gl: GlSettings::default(),
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn ShaderSourceFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_spirv_version(mut self, version: SpirvVersion) -> Self {
        self.spirv_version = version;
        self
    }

    pub fn with_glsl_front_end(mut self, front_end: Arc<dyn SourceToIr>) -> Self {
        self.glsl_front_end = front_end;
        self
    }

    pub fn with_hlsl_front_end(mut self, front_end: Arc<dyn SourceToIr>) -> Self {
        self.hlsl_front_end = Some(front_end);
        self
    }

    pub fn with_ir_to_text(mut self, back_end: Arc<dyn IrToText>) -> Self {
        self.ir_to_text = back_end;
        self
    }

    pub fn with_hlsl_converter(mut self, converter: Arc<dyn HlslToGlsl>) -> Self {
        self.hlsl_converter = Some(converter);
        self
    }

    pub fn with_reflector(mut self, reflector: Arc<dyn ReflectBindings>) -> Self {
        self.reflector = reflector;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ConversionCache<String>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_gl_settings(mut self, gl: GlSettings) -> Self {
        self.gl = gl;
        self
    }

    /// Language an unspecified source is compiled as on this device
    pub fn resolve_language(&self, language: SourceLanguage) -> SourceLanguage {
        match (language, self.device) {
            (SourceLanguage::Default, DeviceType::WebGpu) => SourceLanguage::Wgsl,
            (SourceLanguage::Default, _) => SourceLanguage::Hlsl,
            (language, _) => language,
        }
    }
}

/// Result of a successful compile
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub name: String,
    pub stage: ShaderStage,
    pub entry_point: String,
    /// Language the shader was authored in, recovered from the marker for round-tripped text
    pub source_language: SourceLanguage,
    pub artifact: Artifact,
    /// `None` for GL artifacts and when reflection was skipped
    pub resources: Option<ResourceList>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ShaderState {
    Uninitialized = 0,
    Translating = 1,
    Reflecting = 2,
    Ready = 3,
    Failed = 4,
}

impl ShaderState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ShaderState::Translating,
            2 => ShaderState::Reflecting,
            3 => ShaderState::Ready,
            4 => ShaderState::Failed,
            _ => ShaderState::Uninitialized,
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, ShaderState::Ready | ShaderState::Failed)
    }
}

struct Translation {
    artifact: Artifact,
    /// SPIR-V to reflect in place of a text artifact that was generated from it
    ir: Option<Vec<u32>>,
    language: SourceLanguage,
}

/// Translates and reflects one shader on the calling thread
pub fn compile(ctx: &CompileContext, info: &ShaderCreateInfo) -> Result<CompiledShader, ShaderError> {
    compile_with_progress(ctx, info, &|_| {})
}

fn compile_with_progress(ctx: &CompileContext, info: &ShaderCreateInfo, progress: &dyn Fn(ShaderState)) -> Result<CompiledShader, ShaderError> {
    let name = shader_display_name(info.name.as_deref());
    let provided = [info.source.is_some(), info.file_path.is_some(), info.byte_code.is_some()];
    if provided.iter().filter(|p| **p).count() != 1 {
        return Err(ShaderError::SourceConflict { shader: name });
    }

    progress(ShaderState::Translating);
    let translation = match &info.byte_code {
        Some(words) => translate_byte_code(ctx, info, &name, words)?,
        None => {
            let language = ctx.resolve_language(info.source_language);
            let source = load_source(ctx, info, &name, language)?;
            translate_source(ctx, info, &name, &source, language)?
        }
    };

    let skip_reflection = info.compile_flags.contains(CompileFlags::SKIP_REFLECTION) || matches!(translation.artifact, Artifact::Glsl(_));
    let mut entry_point = info.entry_point.clone().unwrap_or_else(|| "main".to_string());
    let mut resources = None;

    if !skip_reflection {
        progress(ShaderState::Reflecting);
        let ir = translation.ir.map(Artifact::Spirv);
        let target = ir.as_ref().unwrap_or(&translation.artifact);
        let request = ReflectRequest {
            shader: &name,
            source_language: translation.language,
            stage: Some(info.stage),
            entry_point: info.entry_point.as_deref(),
            combined_sampler_suffix: info.use_combined_texture_samplers.then(|| info.combined_sampler_suffix()),
            load_buffer_layout: info.load_full_buffer_reflection,
        };
        let reflected = ctx.reflector.reflect(target, &request)?;
        entry_point = reflected.entry_point;

        let mut list = reflected.resources;
        if let Some(suffix) = info.emulated_array_index_suffix.as_deref().filter(|s| !s.is_empty()) {
            list = merge_emulated_arrays(list, suffix)?;
        }
        resources = Some(list);
    }

    Ok(CompiledShader {
        name,
        stage: info.stage,
        entry_point,
        source_language: translation.language,
        artifact: translation.artifact,
        resources,
    })
}

fn load_source(ctx: &CompileContext, info: &ShaderCreateInfo, name: &str, language: SourceLanguage) -> Result<Arc<String>, ShaderError> {
    let factory = ctx.factory.as_deref();
    // WGSL has no preprocessor to consume #line
    let unroll = |raw: &str, path: Option<&str>| IncludeUnroller::new(name, factory).line_markers(!language.is_wgsl_like()).unroll(raw, path);

    match &info.file_path {
        Some(path) => ctx.cache.get_or_insert_with(path, || {
            let raw = read_shader_source(name, None, Some(path), factory)?;
            unroll(&raw, Some(path))
        }),
        None => {
            let raw = read_shader_source(name, info.source.as_deref(), None, factory)?;
            Ok(Arc::new(unroll(&raw, None)?))
        }
    }
}

fn unsupported(name: &str, message: String) -> ShaderError {
    ShaderError::Unsupported {
        shader: name.to_string(),
        message,
    }
}

fn translate_byte_code(ctx: &CompileContext, info: &ShaderCreateInfo, name: &str, words: &[u32]) -> Result<Translation, ShaderError> {
    if words.first() != Some(&SPV_MAGIC) {
        return Err(ShaderError::Parse {
            shader: name.to_string(),
            diagnostics: Diagnostics::new("invalid SPIR-V header", ""),
        });
    }

    match ctx.device {
        DeviceType::Vulkan => Ok(Translation {
            artifact: Artifact::Spirv(words.to_vec()),
            ir: None,
            language: info.source_language,
        }),
        DeviceType::WebGpu => Ok(Translation {
            artifact: Artifact::Wgsl(ctx.ir_to_text.to_text(name, words, info.source_language)?),
            ir: Some(words.to_vec()),
            language: info.source_language,
        }),
        device => Err(unsupported(name, format!("SPIR-V byte code is not supported on {device:?} devices"))),
    }
}

fn translate_source(ctx: &CompileContext, info: &ShaderCreateInfo, name: &str, source: &str, language: SourceLanguage) -> Result<Translation, ShaderError> {
    if ctx.device == DeviceType::Metal {
        return Err(unsupported(name, "Metal devices are not supported".to_string()));
    }

    if ctx.device.uses_glsl_text() {
        return match language {
            SourceLanguage::Glsl | SourceLanguage::GlslVerbatim | SourceLanguage::Hlsl => Ok(Translation {
                artifact: Artifact::Glsl(build_gl_source(ctx, info, name, source, language)?),
                ir: None,
                language,
            }),
            other => Err(unsupported(name, format!("{other} sources are not supported on {:?} devices", ctx.device))),
        };
    }

    match language {
        SourceLanguage::Wgsl => {
            // Text that went through the IR keeps the language it was authored in
            let language = match parse_source_language_marker(source) {
                SourceLanguage::Default => SourceLanguage::Wgsl,
                marked => marked,
            };
            let artifact = match ctx.device {
                DeviceType::WebGpu => Artifact::Wgsl(source.to_string()),
                _ => Artifact::Spirv(wgsl_to_spirv(name, source, ctx.spirv_version)?),
            };
            Ok(Translation { artifact, ir: None, language })
        }
        SourceLanguage::Glsl | SourceLanguage::GlslVerbatim => compile_to_ir(ctx, ctx.glsl_front_end.as_ref(), info, name, source, language),
        SourceLanguage::Hlsl => {
            let front_end = ctx.hlsl_front_end.as_deref().ok_or_else(|| ShaderError::MissingFrontEnd {
                shader: name.to_string(),
                language,
            })?;
            compile_to_ir(ctx, front_end, info, name, source, language)
        }
        other => Err(unsupported(name, format!("{other} sources are not supported on {:?} devices", ctx.device))),
    }
}

fn compile_to_ir(
    ctx: &CompileContext,
    front_end: &dyn SourceToIr,
    info: &ShaderCreateInfo,
    name: &str,
    source: &str,
    language: SourceLanguage,
) -> Result<Translation, ShaderError> {
    let verbatim = language == SourceLanguage::GlslVerbatim;
    if verbatim && !info.macros.is_empty() {
        tracing::warn!("Shader macros are ignored when compiling GLSL verbatim (shader '{name}')");
    }

    let request = IrRequest {
        shader: name,
        stage: info.stage,
        entry_point: info.entry_point.as_deref(),
        source,
        macros: if verbatim { &[][..] } else { info.macros.as_slice() },
        preamble: !verbatim,
        spirv_version: ctx.spirv_version,
        assign_bindings: true,
        file_name: info.file_path.as_deref(),
    };
    let ir = front_end.to_ir(&request)?;

    if ctx.device == DeviceType::WebGpu {
        let text = ctx.ir_to_text.to_text(name, &ir, language)?;
        return Ok(Translation {
            artifact: Artifact::Wgsl(text),
            ir: Some(ir),
            language,
        });
    }
    Ok(Translation {
        artifact: Artifact::Spirv(ir),
        ir: None,
        language,
    })
}

fn build_gl_source(ctx: &CompileContext, info: &ShaderCreateInfo, name: &str, source: &str, language: SourceLanguage) -> Result<String, ShaderError> {
    let attribs = GlslBuildAttribs {
        shader: name,
        stage: info.stage,
        language,
        source,
        file_name: info.file_path.as_deref(),
        entry_point: info.entry_point.as_deref().unwrap_or("main"),
        macros: &info.macros,
        glsl_version: info.glsl_version,
        glessl_version: info.glessl_version,
        extensions: info.glsl_extensions.as_deref(),
        extra_definitions: ctx.gl.extra_definitions.as_deref(),
        target: ctx.gl.target,
        device: ctx.device,
        max_versions: ctx.gl.max_versions,
        features: ctx.gl.features,
        zero_to_one_clip_z: ctx.gl.zero_to_one_clip_z,
        compile_flags: info.compile_flags,
        use_combined_samplers: info.use_combined_texture_samplers,
        combined_sampler_suffix: info.combined_sampler_suffix(),
        hlsl_converter: ctx.hlsl_converter.as_deref(),
    };
    build_glsl_source_string(&attribs)
}

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool that runs asynchronous compiles
pub trait TaskQueue: Send + Sync {
    fn submit(&self, task: Task);
}

/// Runs every task on a thread of its own
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadTaskQueue;

impl TaskQueue for ThreadTaskQueue {
    fn submit(&self, task: Task) {
        std::thread::spawn(task);
    }
}

/// A shader that is compiled once, possibly on another thread
///
/// The outcome is written before the state flips to `Ready` or `Failed`,
/// so a reader that observes a final state may read it without locking.
pub struct Shader {
    name: String,
    state: AtomicU8,
    outcome: OnceLock<Result<Arc<CompiledShader>, ShaderError>>,
    lock: Mutex<()>,
    finished: Condvar,
}

impl Shader {
    fn new(info: &ShaderCreateInfo) -> Self {
        Self {
            name: shader_display_name(info.name.as_deref()),
            state: AtomicU8::new(ShaderState::Uninitialized as u8),
            outcome: OnceLock::new(),
            lock: Mutex::new(()),
            finished: Condvar::new(),
        }
    }

    /// Compiles on the calling thread; the returned shader is already final
    pub fn create(ctx: &CompileContext, info: &ShaderCreateInfo) -> Arc<Shader> {
        let shader = Arc::new(Self::new(info));
        shader.run(ctx, info);
        shader
    }

    /// Queues the compile and returns immediately
    pub fn create_async(ctx: Arc<CompileContext>, info: ShaderCreateInfo, queue: &dyn TaskQueue) -> Arc<Shader> {
        let shader = Arc::new(Self::new(&info));
        let task_shader = Arc::clone(&shader);
        queue.submit(Box::new(move || task_shader.run(&ctx, &info)));
        shader
    }

    fn set_state(&self, state: ShaderState) {
        tracing::debug!("Shader '{}' -> {state:?}", self.name);
        self.state.store(state as u8, Ordering::Release);
    }

    fn run(&self, ctx: &CompileContext, info: &ShaderCreateInfo) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| compile_with_progress(ctx, info, &|state| self.set_state(state))))
            .unwrap_or_else(|payload| Err(ShaderError::from_panic(&self.name, "compilation", payload)));
        let state = match &result {
            Ok(_) => ShaderState::Ready,
            Err(e) => {
                tracing::debug!("Shader '{}' failed: {e}", self.name);
                ShaderState::Failed
            }
        };
        let _ = self.outcome.set(result.map(Arc::new));

        let _guard = self.lock.lock();
        self.set_state(state);
        self.finished.notify_all();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ShaderState {
        ShaderState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ShaderState::Ready
    }

    /// The outcome, or `None` while the compile is still running
    pub fn poll(&self) -> Option<Result<Arc<CompiledShader>, ShaderError>> {
        if !self.state().is_final() {
            return None;
        }
        self.outcome.get().cloned()
    }

    /// The outcome, or [`ShaderError::NotReady`] while the compile is still running
    pub fn compiled(&self) -> Result<Arc<CompiledShader>, ShaderError> {
        self.poll().unwrap_or_else(|| Err(ShaderError::NotReady { shader: self.name.clone() }))
    }

    /// Blocks until the shader is final
    pub fn wait(&self) -> Result<Arc<CompiledShader>, ShaderError> {
        let mut guard = self.lock.lock();
        while !self.state().is_final() {
            self.finished.wait(&mut guard);
        }
        drop(guard);
        self.compiled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        reflect::{ReflectedModule, ResourceCategory},
        source::{MemorySourceFactory, strip_source_language_marker},
    };

    const GBUFFER_FS: &str = r#"#version 450
layout(set = 0, binding = 0) uniform Material {
    vec4 albedo;
} material;
layout(set = 0, binding = 1) uniform texture2D g_Albedo;
layout(set = 0, binding = 2) uniform sampler g_Albedo_sampler;

layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 o_color;

void main() {
    o_color = texture(sampler2D(g_Albedo, g_Albedo_sampler), v_uv) * material.albedo * ALBEDO_SCALE;
}
"#;

    const ATLAS_WGSL: &str = r#"
@group(0) @binding(0) var g_Tex_0: texture_2d<f32>;
@group(0) @binding(1) var g_Tex_1: texture_2d<f32>;
@group(0) @binding(2) var g_Tex_2: texture_2d<f32>;
@group(0) @binding(3) var g_Sampler: sampler;

@fragment
fn main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(g_Tex_0, g_Sampler, uv) + textureSample(g_Tex_1, g_Sampler, uv) + textureSample(g_Tex_2, g_Sampler, uv);
}
"#;

    fn gbuffer_info() -> ShaderCreateInfo {
        ShaderCreateInfo::new("GBuffer", ShaderStage::Pixel, SourceLanguage::Glsl)
            .with_source(GBUFFER_FS)
            .with_macro("ALBEDO_SCALE", "0.5")
    }

    #[test]
    fn test_glsl_on_webgpu() {
        let ctx = CompileContext::new(DeviceType::WebGpu);
        let compiled = compile(&ctx, &gbuffer_info()).unwrap();

        let Artifact::Wgsl(text) = &compiled.artifact else {
            panic!("expected WGSL, got {}", compiled.artifact.kind());
        };
        assert_eq!(parse_source_language_marker(text), SourceLanguage::Glsl);
        assert_eq!(compiled.entry_point, "main");

        let resources = compiled.resources.as_ref().unwrap();
        assert_eq!(resources.len(), 3);
        assert_eq!(resources.find("material").unwrap().category, ResourceCategory::UniformBuffer);
        assert_eq!(resources.find("g_Albedo").unwrap().bind_index, 1);
    }

    #[test]
    fn test_round_trip_is_not_translated_again() {
        let ctx = CompileContext::new(DeviceType::WebGpu);
        let first = compile(&ctx, &gbuffer_info()).unwrap();
        let text = first.artifact.as_text().unwrap();

        let info = ShaderCreateInfo::new("GBuffer", ShaderStage::Pixel, SourceLanguage::Wgsl).with_source(text);
        let second = compile(&ctx, &info).unwrap();
        assert_eq!(second.artifact, first.artifact);
        assert_eq!(second.source_language, SourceLanguage::Glsl);
        assert_eq!(second.resources.unwrap().len(), 3);
    }

    #[test]
    fn test_glsl_on_vulkan() {
        let ctx = CompileContext::new(DeviceType::Vulkan).with_spirv_version(SpirvVersion::Vk110);
        let compiled = compile(&ctx, &gbuffer_info()).unwrap();
        let words = compiled.artifact.as_words().unwrap();
        assert_eq!(words[0], SPV_MAGIC);
        assert_eq!(words[1], 0x0001_0300);
        assert!(compiled.resources.unwrap().find("g_Albedo_sampler").is_some());
    }

    #[test]
    fn test_glsl_on_gl_has_no_resources() {
        let ctx = CompileContext::new(DeviceType::OpenGl);
        let mut info = gbuffer_info();
        info.glsl_version = ShaderVersion::new(4, 3);
        let compiled = compile(&ctx, &info).unwrap();
        let Artifact::Glsl(text) = &compiled.artifact else {
            panic!("expected GLSL");
        };
        assert!(text.starts_with("#version 430 core\n"));
        assert!(text.contains("#define ALBEDO_SCALE 0.5"));
        assert!(compiled.resources.is_none());
    }

    #[test]
    fn test_wgsl_on_vulkan_merges_arrays() {
        let ctx = CompileContext::new(DeviceType::Vulkan);
        let info = ShaderCreateInfo::new("Atlas", ShaderStage::Pixel, SourceLanguage::Wgsl)
            .with_source(ATLAS_WGSL)
            .with_emulated_array_suffix("_");
        let compiled = compile(&ctx, &info).unwrap();
        assert!(compiled.artifact.as_words().is_some());

        let resources = compiled.resources.unwrap();
        assert_eq!(resources.len(), 2);
        let atlas = resources.find("g_Tex").unwrap();
        assert_eq!(atlas.array_size, 3);
        assert_eq!(atlas.elements.len(), 3);
        assert_eq!(resources.emulated_array_suffix(), Some("_"));
    }

    #[test]
    fn test_default_language_on_webgpu_is_wgsl() {
        let ctx = CompileContext::new(DeviceType::WebGpu);
        let info = ShaderCreateInfo::new("Atlas", ShaderStage::Pixel, SourceLanguage::Default).with_source(ATLAS_WGSL);
        let compiled = compile(&ctx, &info).unwrap();
        assert_eq!(compiled.source_language, SourceLanguage::Wgsl);
        assert_eq!(compiled.resources.unwrap().len(), 4);
    }

    #[test]
    fn test_hlsl_requires_front_end() {
        let ctx = CompileContext::new(DeviceType::Vulkan);
        let info = ShaderCreateInfo::new("Lit", ShaderStage::Pixel, SourceLanguage::Hlsl).with_source("float4 main() : SV_Target { return 0; }");
        let err = compile(&ctx, &info).unwrap_err();
        assert_eq!(err.to_string(), "Shader 'Lit': no front end registered for source language HLSL");
    }

    struct WgslBackedFrontEnd;

    impl SourceToIr for WgslBackedFrontEnd {
        fn to_ir(&self, request: &IrRequest<'_>) -> Result<Vec<u32>, ShaderError> {
            assert!(request.preamble);
            wgsl_to_spirv(request.shader, ATLAS_WGSL, request.spirv_version)
        }
    }

    #[test]
    fn test_registered_hlsl_front_end() {
        let ctx = CompileContext::new(DeviceType::WebGpu).with_hlsl_front_end(Arc::new(WgslBackedFrontEnd));
        let info = ShaderCreateInfo::new("Lit", ShaderStage::Pixel, SourceLanguage::Hlsl).with_source("float4 main() : SV_Target { return 0; }");
        let compiled = compile(&ctx, &info).unwrap();
        assert_eq!(parse_source_language_marker(compiled.artifact.as_text().unwrap()), SourceLanguage::Hlsl);
        assert!(compiled.resources.unwrap().find("g_Tex_2").is_some());
    }

    struct PanickingFrontEnd;

    impl SourceToIr for PanickingFrontEnd {
        fn to_ir(&self, _request: &IrRequest<'_>) -> Result<Vec<u32>, ShaderError> {
            panic!("front end crashed");
        }
    }

    fn panicking_context() -> CompileContext {
        CompileContext::new(DeviceType::Vulkan).with_hlsl_front_end(Arc::new(PanickingFrontEnd))
    }

    fn lit_info() -> ShaderCreateInfo {
        ShaderCreateInfo::new("Lit", ShaderStage::Pixel, SourceLanguage::Hlsl).with_source("float4 main() : SV_Target { return 0; }")
    }

    #[test]
    fn test_panicking_front_end_fails_the_shader() {
        let shader = Shader::create(&panicking_context(), &lit_info());
        assert_eq!(shader.state(), ShaderState::Failed);
        assert_eq!(shader.compiled().unwrap_err().to_string(), "Shader 'Lit': compilation panicked: front end crashed");

        let threaded = Shader::create_async(Arc::new(panicking_context()), lit_info(), &ThreadTaskQueue);
        assert!(matches!(threaded.wait(), Err(ShaderError::Panicked { .. })));
        assert_eq!(threaded.state(), ShaderState::Failed);

        let sibling = Shader::create_async(Arc::new(CompileContext::new(DeviceType::WebGpu)), gbuffer_info(), &ThreadTaskQueue);
        assert!(sibling.wait().is_ok());
    }

    struct CountingReflector(std::sync::atomic::AtomicUsize);

    impl ReflectBindings for CountingReflector {
        fn reflect(&self, artifact: &Artifact, request: &ReflectRequest<'_>) -> Result<ReflectedModule, ShaderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            NagaReflector.reflect(artifact, request)
        }
    }

    #[test]
    fn test_skip_reflection() {
        let reflector = Arc::new(CountingReflector(Default::default()));
        let ctx = CompileContext::new(DeviceType::WebGpu).with_reflector(reflector.clone());
        let info = ShaderCreateInfo::new("Atlas", ShaderStage::Pixel, SourceLanguage::Wgsl)
            .with_source(ATLAS_WGSL)
            .with_compile_flags(CompileFlags::SKIP_REFLECTION);
        let compiled = compile(&ctx, &info).unwrap();
        assert!(compiled.resources.is_none());
        assert_eq!(reflector.0.load(Ordering::SeqCst), 0);

        compile(&ctx, &info.with_compile_flags(CompileFlags::empty())).unwrap();
        assert_eq!(reflector.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_file_sources_are_cached() {
        let factory = MemorySourceFactory::new()
            .with_file("atlas.wgsl", "#include \"bindings.wgsl\"\n@fragment fn main() -> @location(0) vec4<f32> { return textureLoad(g_Tex_0, vec2<i32>(0), 0); }\n")
            .with_file("bindings.wgsl", "@group(0) @binding(0) var g_Tex_0: texture_2d<f32>;\n");
        let ctx = CompileContext::new(DeviceType::WebGpu).with_factory(Arc::new(factory));
        let info = ShaderCreateInfo::new("Atlas", ShaderStage::Pixel, SourceLanguage::Wgsl).with_file_path("atlas.wgsl");

        let first = compile(&ctx, &info).unwrap();
        let second = compile(&ctx, &info).unwrap();
        assert_eq!(first.artifact, second.artifact);
        assert_eq!(ctx.cache.len(), 1);
        assert!(!strip_source_language_marker(first.artifact.as_text().unwrap()).contains("#line"));
    }

    #[test]
    fn test_source_conflict() {
        let ctx = CompileContext::new(DeviceType::WebGpu);
        let both = ShaderCreateInfo::new("Atlas", ShaderStage::Pixel, SourceLanguage::Wgsl)
            .with_source(ATLAS_WGSL)
            .with_file_path("atlas.wgsl");
        assert!(matches!(compile(&ctx, &both), Err(ShaderError::SourceConflict { .. })));

        let mut neither = ShaderCreateInfo::new("x", ShaderStage::Pixel, SourceLanguage::Wgsl);
        neither.name = None;
        assert_eq!(
            compile(&ctx, &neither).unwrap_err().to_string(),
            "Shader '<null>': exactly one of the source, the file path or the byte code must be provided"
        );
    }

    #[test]
    fn test_byte_code() {
        let words = wgsl_to_spirv("Atlas", ATLAS_WGSL, SpirvVersion::Vk100).unwrap();
        let info = ShaderCreateInfo::new("Atlas", ShaderStage::Pixel, SourceLanguage::Wgsl).with_byte_code(words.clone());

        let vulkan = compile(&CompileContext::new(DeviceType::Vulkan), &info).unwrap();
        assert_eq!(vulkan.artifact, Artifact::Spirv(words));

        let webgpu = compile(&CompileContext::new(DeviceType::WebGpu), &info).unwrap();
        assert!(webgpu.artifact.as_text().is_some());
        assert!(webgpu.resources.unwrap().find("g_Tex_1").is_some());

        let gl = compile(&CompileContext::new(DeviceType::OpenGles), &info);
        assert!(matches!(gl, Err(ShaderError::Unsupported { .. })));

        let garbage = ShaderCreateInfo::new("Bad", ShaderStage::Pixel, SourceLanguage::Wgsl).with_byte_code(vec![1, 2, 3]);
        assert!(matches!(compile(&CompileContext::new(DeviceType::Vulkan), &garbage), Err(ShaderError::Parse { .. })));
    }

    #[test]
    fn test_sync_shader_states() {
        let ctx = CompileContext::new(DeviceType::WebGpu);
        let shader = Shader::create(&ctx, &gbuffer_info());
        assert_eq!(shader.state(), ShaderState::Ready);
        assert!(shader.is_ready());
        assert_eq!(shader.compiled().unwrap().name, "GBuffer");

        let failed = Shader::create(&ctx, &ShaderCreateInfo::new("Broken", ShaderStage::Pixel, SourceLanguage::Glsl).with_source(GBUFFER_FS));
        assert_eq!(failed.state(), ShaderState::Failed);
        let err = failed.compiled().unwrap_err();
        assert_eq!(err.shader_name(), Some("Broken"));
        let blob = err.diagnostics().unwrap().to_blob();
        assert!(blob.contains("#define GLSLANG\n#define FRAGMENT_SHADER 1\n"));
        assert!(blob.ends_with(GBUFFER_FS.split_once('\n').unwrap().1));
    }

    /// Holds tasks until released
    #[derive(Default)]
    struct ManualQueue(Mutex<Vec<Task>>);

    impl TaskQueue for ManualQueue {
        fn submit(&self, task: Task) {
            self.0.lock().push(task);
        }
    }

    #[test]
    fn test_async_shader() {
        let ctx = Arc::new(CompileContext::new(DeviceType::WebGpu));
        let queue = ManualQueue::default();
        let shader = Shader::create_async(Arc::clone(&ctx), gbuffer_info(), &queue);
        assert_eq!(shader.state(), ShaderState::Uninitialized);
        assert!(shader.poll().is_none());
        assert!(matches!(shader.compiled(), Err(ShaderError::NotReady { .. })));

        let tasks = std::mem::take(&mut *queue.0.lock());
        let worker = std::thread::spawn(move || tasks.into_iter().for_each(|task| task()));
        assert!(shader.wait().is_ok());
        worker.join().unwrap();
        assert_eq!(shader.state(), ShaderState::Ready);

        let threaded = Shader::create_async(ctx, gbuffer_info(), &ThreadTaskQueue);
        assert_eq!(threaded.wait().unwrap().stage, ShaderStage::Pixel);
    }
}
