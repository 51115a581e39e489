use std::time::Instant;

use crate::backend::Viewport;

/// Abstraction over where frame times originate from.
pub trait TimeSource: Send {
    /// Moves the epoch to "now"; the next `elapsed` starts from zero again.
    fn reset(&mut self);
    /// Seconds since the epoch, sampled once per rendered frame.
    fn elapsed(&mut self) -> f64;
}

/// Convenient alias for owning time sources behind trait objects.
pub type BoxedTimeSource = Box<dyn TimeSource>;

/// Time source backed by the system monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        self.origin = Instant::now();
    }

    fn elapsed(&mut self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Advances by exactly one step per sample, so frame N is evaluated at `N * step`.
#[derive(Debug, Clone, Copy)]
pub struct FixedStepTimeSource {
    step: f64,
    samples: u64,
}

impl FixedStepTimeSource {
    pub fn new(step: f64) -> Self {
        Self {
            step: step.max(0.0),
            samples: 0,
        }
    }

    pub fn from_fps(fps: u32) -> Self {
        Self::new(1.0 / f64::from(fps.max(1)))
    }
}

impl TimeSource for FixedStepTimeSource {
    fn reset(&mut self) {
        self.samples = 0;
    }

    fn elapsed(&mut self) -> f64 {
        let now = self.samples as f64 * self.step;
        self.samples = self.samples.saturating_add(1);
        now
    }
}

/// Frame counter and the two most recent timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClockState {
    pub frame_index: u64,
    pub previous_time: f64,
    pub current_time: f64,
}

impl ClockState {
    /// Advances the clock to `now` and returns the values for this frame.
    pub fn tick(&mut self, now: f64) -> FrameTiming {
        let current = now.max(self.current_time);
        let timing = FrameTiming {
            time: current,
            delta: current - self.previous_time,
            frame: self.frame_index,
        };
        self.current_time = current;
        self.previous_time = current;
        self.frame_index = self.frame_index.saturating_add(1);
        timing
    }
}

/// Values pushed to the shader for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    pub time: f64,
    pub delta: f64,
    pub frame: u64,
}

/// Clock state paired with the time source that feeds it.
pub struct FrameClock {
    state: ClockState,
    source: BoxedTimeSource,
}

impl FrameClock {
    pub fn new(source: BoxedTimeSource) -> Self {
        Self {
            state: ClockState::default(),
            source,
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    /// Back to frame zero at time zero.
    pub fn reset(&mut self) {
        self.source.reset();
        self.state = ClockState::default();
    }

    pub fn tick(&mut self) -> FrameTiming {
        let now = self.source.elapsed();
        self.state.tick(now)
    }
}

/// Per-frame input captured by the window layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputSnapshot {
    pub viewport: Viewport,
    /// `xy` is the cursor, `zw` the held click position; bottom-left origin.
    pub pointer: [f32; 4],
    pub key: [f32; 4],
}

impl InputSnapshot {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            pointer: [0.0; 4],
            key: [0.0; 4],
        }
    }
}

/// Converts a top-left-origin cursor row into the shader's bottom-left origin.
pub fn flip_pointer_y(raw_y: f64, viewport_height: u32) -> f32 {
    (f64::from(viewport_height) - raw_y) as f32
}
