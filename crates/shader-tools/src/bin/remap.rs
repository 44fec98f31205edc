//! Binding remap tool
//!
//! This binary compiles a shader, remaps its resources to the layout given
//! in a YAML file and writes the rewritten artifact: WGSL text for WebGPU,
//! SPIR-V words for Vulkan.

use clap::Parser;
use shader_tools::{
    BindingRemapper, CompileContext, DeviceType, RemapMode, RemapOptions, ResourceMapping, ShaderCreateInfo, ShaderStage, SourceLanguage, VerifySeverity,
    compile, remap_pipeline, source::FileSystemSourceFactory,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Remaps shader resource bindings to a pipeline layout")]
struct Args {
    /// Shader source file
    shader: PathBuf,

    /// Pipeline resource layout (YAML)
    #[arg(long)]
    layout: PathBuf,

    #[arg(short, long)]
    stage: ShaderStage,

    #[arg(short, long, default_value = "wgsl")]
    language: SourceLanguage,

    #[arg(short, long, default_value = "webgpu")]
    device: DeviceType,

    #[arg(short, long)]
    entry_point: Option<String>,

    /// Macro definitions as NAME=VALUE
    #[arg(short = 'D', long = "define")]
    defines: Vec<String>,

    /// Merge `<name><suffix><index>` resources into arrays
    #[arg(long)]
    array_suffix: Option<String>,

    /// Only check the bindings the shader already has
    #[arg(long)]
    verify_only: bool,

    /// Report verify-only mismatches as warnings
    #[arg(long)]
    warn: bool,

    /// Output file, stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mapping = ResourceMapping::from_yaml(&fs::read_to_string(&args.layout)?)?;
    let options = RemapOptions {
        mode: if args.verify_only { RemapMode::VerifyOnly } else { RemapMode::Rewrite },
        verify_severity: if args.warn { VerifySeverity::Warn } else { VerifySeverity::Error },
        emulated_array_suffix: args.array_suffix.clone(),
    };
    let remapper = BindingRemapper::new(mapping, options);

    let shader_dir = args.shader.parent().unwrap_or(Path::new("."));
    let ctx = CompileContext::new(args.device).with_factory(Arc::new(FileSystemSourceFactory::new([shader_dir])));

    let name = args.shader.file_stem().and_then(|stem| stem.to_str()).unwrap_or("shader");
    let file_name = args.shader.file_name().and_then(|name| name.to_str()).ok_or("shader path has no file name")?;
    let mut info = ShaderCreateInfo::new(name, args.stage, args.language).with_file_path(file_name);
    info.entry_point = args.entry_point.clone();
    for define in &args.defines {
        let (macro_name, definition) = define.split_once('=').unwrap_or((define.as_str(), "1"));
        info = info.with_macro(macro_name, definition);
    }
    if let Some(suffix) = &args.array_suffix {
        info = info.with_emulated_array_suffix(suffix);
    }

    let compiled = compile(&ctx, &info)?;
    let pipeline = remap_pipeline(name, &[&compiled], &remapper, args.device)?;

    let stage = &pipeline.stages[0];
    for planned in &stage.plan {
        tracing::info!(
            "{}: (group {}, binding {}) -> (group {}, binding {})",
            planned.name,
            planned.from.0,
            planned.from.1,
            planned.to.0,
            planned.to.1
        );
    }

    let bytes = stage.artifact.to_bytes();
    match &args.output {
        Some(path) => fs::write(path, bytes)?,
        None => std::io::stdout().write_all(&bytes)?,
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("Error remapping shader '{}': {e}", args.shader.display());
        process::exit(1);
    }
}
