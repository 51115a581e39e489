use std::path::PathBuf;

use clap::Parser;
use renderer::types::DEFAULT_CAPTURE_FPS;
use renderer::ColorSpaceMode;

#[derive(Parser, Debug)]
#[command(
    name = "shaderun",
    author,
    version,
    about = "Live ShaderToy-style fragment shader preview"
)]
pub struct Args {
    /// Fragment shader defining `void mainImage(out vec4 fragColor, in vec2 fragCoord)`.
    #[arg(value_name = "FRAGMENT")]
    pub fragment: PathBuf,

    /// Window width in pixels; 0 or omitted opens a fullscreen window.
    #[arg(value_name = "WIDTH", requires = "height")]
    pub width: Option<u32>,

    /// Window height in pixels; 0 or omitted opens a fullscreen window.
    #[arg(value_name = "HEIGHT")]
    pub height: Option<u32>,

    /// Encode rendered frames into this video file.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Frame rate of the captured video and of the `--fixed-step` clock.
    #[arg(
        long,
        value_name = "FPS",
        default_value_t = DEFAULT_CAPTURE_FPS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub fps: u32,

    /// Advance time by exactly 1/FPS per frame instead of following the wall clock.
    #[arg(long)]
    pub fixed_step: bool,

    /// Close after rendering this many frames.
    #[arg(long, value_name = "COUNT")]
    pub frames: Option<u64>,

    /// Do not reload when the shader file changes (F5 still reloads).
    #[arg(long)]
    pub no_watch: bool,

    /// Output color space handling: `auto`, `gamma`, or `linear`.
    #[arg(
        long,
        value_name = "MODE",
        value_parser = parse_color_space,
        default_value = "auto"
    )]
    pub color_space: ColorSpaceMode,

    /// Video encoder executable fed with raw rgb24 frames.
    #[arg(long, value_name = "PATH", env = "SHADERUN_ENCODER")]
    pub encoder: Option<PathBuf>,
}

/// Parses the process arguments. Usage errors exit with status 1.
pub fn parse() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    }
}

pub fn parse_color_space(value: &str) -> Result<ColorSpaceMode, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("color space must not be empty".to_string());
    }

    let normalized = trimmed.to_ascii_lowercase();
    match normalized.as_str() {
        "auto" => Ok(ColorSpaceMode::Auto),
        "gamma" | "srgb-off" | "shadertoy" => Ok(ColorSpaceMode::Gamma),
        "linear" | "srgb" => Ok(ColorSpaceMode::Linear),
        other => Err(format!(
            "unknown color space '{other}'; expected auto, gamma, or linear"
        )),
    }
}
