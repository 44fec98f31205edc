//! Shader reflection tool
//!
//! This binary compiles a shader for the requested back end, reflects the
//! resources it references and prints them, either as the resource stats
//! report or as JSON.

use clap::Parser;
use shader_tools::{CompileContext, DeviceType, ShaderCreateInfo, ShaderStage, SourceLanguage, compile, source::FileSystemSourceFactory};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Reflects a shader and dumps its resources")]
struct Args {
    /// Shader source file
    shader: PathBuf,

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

    /// Additional include search directories
    #[arg(short = 'I', long = "include-dir")]
    include_dirs: Vec<PathBuf>,

    /// Merge `<name><suffix><index>` resources into arrays
    #[arg(long)]
    array_suffix: Option<String>,

    /// Reflect combined texture samplers with this suffix
    #[arg(long)]
    combined_sampler_suffix: Option<String>,

    /// Reflect the full layout of uniform buffers
    #[arg(long)]
    buffer_layout: bool,

    /// Print JSON instead of the stats report
    #[arg(long)]
    json: bool,
}

fn shader_info(args: &Args) -> Result<ShaderCreateInfo, Box<dyn std::error::Error>> {
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
    if let Some(suffix) = &args.combined_sampler_suffix {
        info = info.with_combined_samplers(Some(suffix));
    }
    if args.buffer_layout {
        info = info.with_full_buffer_reflection();
    }
    Ok(info)
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    // The shader directory is searched first, then the include directories
    let shader_dir = args.shader.parent().unwrap_or(Path::new(".")).to_path_buf();
    let factory = FileSystemSourceFactory::new(std::iter::once(shader_dir).chain(args.include_dirs.iter().cloned()));
    let ctx = CompileContext::new(args.device).with_factory(Arc::new(factory));

    let compiled = compile(&ctx, &shader_info(args)?)?;
    let Some(resources) = &compiled.resources else {
        return Err(format!("shader '{}' carries no reflection on {:?} devices", compiled.name, args.device).into());
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(resources)?);
    } else {
        println!("{}", resources.dump_resources());
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("Error analyzing shader '{}': {e}", args.shader.display());
        process::exit(1);
    }
}
