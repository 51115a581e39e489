//! Renderer crate for shaderun, a live ShaderToy-style fragment shader preview.
//!
//! The flow from a file on disk to pixels:
//!
//! ```text
//!   CLI / shaderun
//!          │ RendererConfig
//!          ▼
//!   Renderer::run ──▶ FragmentSource ──▶ winit event loop ──▶ FrameLoop::iterate()
//!                                                                  │
//!   SourceWatcher / F5 ──▶ ReloadController ◀───────────────────────┤
//!                                                                  ├─▶ UniformTable ─▶ Backend
//!                                                                  └─▶ FrameSink (capture)
//! ```
//!
//! [`FrameLoop`] owns the running program, its [`UniformTable`] and the frame
//! clock. Reload requests from any thread are applied at the top of an
//! iteration on the render thread, so a frame never mixes an old program with
//! a new uniform table. The loop is written against the [`Backend`] trait;
//! [`GpuBackend`] is the wgpu implementation used by the binary.

pub mod backend;
pub mod capture;
pub mod compile;
pub mod error;
pub mod gpu;
pub mod reload;
pub mod render_loop;
pub mod runtime;
pub mod state;
pub mod types;
pub mod uniforms;
mod window;

use anyhow::{Context, Result};
use tracing::info;

pub use backend::{Backend, Viewport};
pub use capture::{CaptureConfig, EncoderSink, FrameSink};
pub use compile::{FragmentSource, PREAMBLE, VERTEX_SHADER_GLSL};
pub use error::{
    CaptureSinkError, FrameError, LoadError, LoopError, ShaderError, ShaderStage,
    SourceReadError, WindowInitError,
};
pub use gpu::{GpuBackend, GpuProgram};
pub use reload::{reload_channel, ReloadController, ReloadHandle, ReloadReason, SourceWatcher};
pub use render_loop::{FrameLoop, FrameOutcome, LoopConfig, LoopState};
pub use runtime::{FixedStepTimeSource, InputSnapshot, SystemTimeSource, TimeSource};
pub use types::{ColorSpaceMode, RendererConfig, WindowSize};
pub use uniforms::{UniformName, UniformTable, UniformValue};

/// Entry point that owns the configuration for one run.
pub struct Renderer {
    config: RendererConfig,
}

impl Renderer {
    /// Builds a renderer for the supplied configuration.
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    /// Reads and checks the shader, opens the window and renders until it closes.
    ///
    /// The source is read and compiled on the CPU before any window exists, so
    /// an unreadable or broken shader fails without flashing a window.
    pub fn run(&mut self) -> Result<()> {
        let path = &self.config.shader_source;
        let fragment = FragmentSource::read(path)?;
        let program = compile::compile_program(VERTEX_SHADER_GLSL, fragment.as_str())
            .with_context(|| format!("failed to compile {}", path.display()))?;
        info!(
            path = %path.display(),
            uniforms = ?program.active_uniforms(),
            "shader compiled"
        );
        drop(program);

        window::run_window(&self.config, fragment)
    }
}
