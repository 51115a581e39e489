use anyhow::Result;
use renderer::{CaptureConfig, Renderer, RendererConfig, WindowSize};
use tracing_subscriber::EnvFilter;

use crate::cli::Args;

pub fn run(args: Args) -> Result<()> {
    initialise_tracing();
    let config = build_config(args);
    tracing::debug!(?config, "starting renderer");
    Renderer::new(config).run()
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_config(args: Args) -> RendererConfig {
    let capture = args.output.map(|output| CaptureConfig {
        output,
        fps: args.fps,
        encoder: args.encoder,
    });

    RendererConfig {
        shader_source: args.fragment,
        window_size: WindowSize::from_dimensions(args.width, args.height),
        capture,
        fixed_step: args.fixed_step,
        fps: args.fps,
        max_frames: args.frames,
        watch: !args.no_watch,
        color_space: args.color_space,
    }
}
