use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::backend::Backend;
use crate::capture::BoxedFrameSink;
use crate::compile::FragmentSource;
use crate::error::{CaptureSinkError, FrameError, LoopError, ShaderError};
use crate::reload::{ReloadController, ReloadOutcome};
use crate::runtime::{BoxedTimeSource, ClockState, FrameClock, InputSnapshot};
use crate::state::{ActiveProgram, RunnerState};
use crate::uniforms::{UniformName, UniformTable, UniformValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Closing,
}

/// What one call to [`FrameLoop::iterate`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was drawn and presented; `frame` is the iFrame value it used.
    Rendered { frame: u64 },
    /// Nothing was drawn and the clock did not advance.
    Skipped,
    /// The loop is closing; no more frames will be drawn.
    Closed,
}

/// Per-run settings for the frame loop.
pub struct LoopConfig {
    pub time_source: BoxedTimeSource,
    pub sink: Option<BoxedFrameSink>,
    /// Close after this many rendered frames.
    pub max_frames: Option<u64>,
}

struct RenderStats {
    last_update: Instant,
    frames_since_update: u32,
    frames_per_second: f32,
}

impl RenderStats {
    fn new() -> Self {
        Self {
            last_update: Instant::now(),
            frames_since_update: 0,
            frames_per_second: 0.0,
        }
    }

    fn record(&mut self, clock: &ClockState) {
        let now = Instant::now();
        self.frames_since_update += 1;
        let elapsed = now.saturating_duration_since(self.last_update);
        if elapsed >= Duration::from_secs(1) {
            self.frames_per_second = self.frames_since_update as f32 / elapsed.as_secs_f32();
            self.frames_since_update = 0;
            self.last_update = now;
            debug!(
                fps = self.frames_per_second.round(),
                frame_index = clock.frame_index,
                time = clock.current_time,
                "render stats"
            );
        }
    }
}

/// Drives one backend: polls reloads, pushes uniforms, draws, captures and
/// presents, once per call to [`iterate`](Self::iterate).
pub struct FrameLoop<B: Backend> {
    backend: B,
    runner: RunnerState<B::Program>,
    reload: ReloadController,
    sink: Option<BoxedFrameSink>,
    max_frames: Option<u64>,
    rendered: u64,
    /// Time zero is taken at the first timed frame, not when the program built.
    epoch_pending: bool,
    state: LoopState,
    pixels: Vec<u8>,
    stats: RenderStats,
}

impl<B: Backend> FrameLoop<B> {
    /// Builds the initial program. Any shader error here is fatal to the caller.
    pub fn start(
        mut backend: B,
        source_path: PathBuf,
        fragment: FragmentSource,
        config: LoopConfig,
        reload: ReloadController,
    ) -> Result<Self, ShaderError> {
        let active = ActiveProgram::build(&mut backend, fragment)?;
        info!(
            path = %source_path.display(),
            uniforms = ?active.uniforms().present_names(),
            "shader loaded"
        );
        let runner = RunnerState::new(source_path, active, FrameClock::new(config.time_source));
        let state = if config.max_frames == Some(0) {
            LoopState::Closing
        } else {
            LoopState::Running
        };

        Ok(Self {
            backend,
            runner,
            reload,
            sink: config.sink,
            max_frames: config.max_frames,
            rendered: 0,
            epoch_pending: true,
            state,
            pixels: Vec::new(),
            stats: RenderStats::new(),
        })
    }

    /// Renders one frame for `input`.
    ///
    /// Pending reloads are applied first, so the whole frame sees one program
    /// and the uniform table that belongs to it.
    pub fn iterate(&mut self, input: &InputSnapshot) -> Result<FrameOutcome, LoopError> {
        if self.state == LoopState::Closing {
            return Ok(FrameOutcome::Closed);
        }

        if let Some(ReloadOutcome::Swapped) = self.reload.poll(&mut self.backend, &mut self.runner)
        {
            debug!("clock reset after reload");
        }

        if input.viewport.is_empty() {
            trace!("viewport is empty, skipping frame");
            return Ok(FrameOutcome::Skipped);
        }

        match self.backend.begin_frame(input.viewport) {
            Ok(()) => {}
            Err(err @ (FrameError::Reconfigure | FrameError::Timeout)) => {
                warn!(error = %err, "skipping frame");
                return Ok(FrameOutcome::Skipped);
            }
            Err(err) => {
                self.state = LoopState::Closing;
                return Err(err.into());
            }
        }

        self.backend.bind_program(self.runner.active().handle());
        if std::mem::take(&mut self.epoch_pending) {
            self.runner.clock_mut().reset();
        }
        let timing = self.runner.clock_mut().tick();
        let table = *self.runner.active().uniforms();
        let viewport = input.viewport;
        table.write(
            &mut self.backend,
            UniformName::Resolution,
            UniformValue::Vec3([viewport.width as f32, viewport.height as f32, 1.0]),
        );
        table.write(
            &mut self.backend,
            UniformName::Time,
            UniformValue::Float(timing.time as f32),
        );
        table.write(
            &mut self.backend,
            UniformName::TimeDelta,
            UniformValue::Float(timing.delta as f32),
        );
        table.write(
            &mut self.backend,
            UniformName::Frame,
            UniformValue::Float(timing.frame as f32),
        );
        table.write(
            &mut self.backend,
            UniformName::Pointer,
            UniformValue::Vec4(input.pointer),
        );
        table.write(
            &mut self.backend,
            UniformName::KeyInput,
            UniformValue::Vec4(input.key),
        );
        self.backend.draw_quad();

        if let Some(sink) = self.sink.as_mut() {
            if let Err(err) = self.backend.read_pixels(&mut self.pixels) {
                self.state = LoopState::Closing;
                return Err(err.into());
            }
            if let Err(err) = sink.write_frame(&self.pixels) {
                self.state = LoopState::Closing;
                return Err(err.into());
            }
        }

        self.backend.present();
        self.rendered += 1;
        self.stats.record(&self.runner.clock());

        if self.max_frames.is_some_and(|limit| self.rendered >= limit) {
            info!(frames = self.rendered, "frame limit reached");
            self.state = LoopState::Closing;
        }

        Ok(FrameOutcome::Rendered {
            frame: timing.frame,
        })
    }

    /// Stops rendering after the current frame.
    pub fn request_close(&mut self) {
        if self.state == LoopState::Running {
            debug!("close requested");
        }
        self.state = LoopState::Closing;
    }

    /// Closes the loop and the capture sink, flushing buffered frames.
    /// Calling it again is a no-op.
    pub fn shutdown(&mut self) -> Result<(), CaptureSinkError> {
        self.state = LoopState::Closing;
        match self.sink.take() {
            Some(mut sink) => sink.finish(),
            None => Ok(()),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn clock(&self) -> ClockState {
        self.runner.clock()
    }

    pub fn uniform_table(&self) -> &UniformTable {
        self.runner.active().uniforms()
    }

    pub fn program(&self) -> &B::Program {
        self.runner.active().handle()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.rendered
    }

    pub fn is_capturing(&self) -> bool {
        self.sink.is_some()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}
