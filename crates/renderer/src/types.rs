use std::path::PathBuf;

use crate::capture::CaptureConfig;

/// Default frame rate for captures when none is given.
pub const DEFAULT_CAPTURE_FPS: u32 = 60;

/// Colour-space handling for the swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpaceMode {
    /// Choose a sensible default based on ShaderToy expectations (gamma-encoded swapchain).
    #[default]
    Auto,
    /// Treat shader outputs as gamma-encoded; use non-sRGB surfaces.
    Gamma,
    /// Treat shader outputs as linear and use sRGB swapchains for conversion.
    Linear,
}

/// Window size request. Fullscreen covers the primary monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowSize {
    #[default]
    Fullscreen,
    Windowed { width: u32, height: u32 },
}

impl WindowSize {
    /// `0` or a missing dimension selects fullscreen.
    pub fn from_dimensions(width: Option<u32>, height: Option<u32>) -> Self {
        match (width, height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => {
                WindowSize::Windowed { width, height }
            }
            _ => WindowSize::Fullscreen,
        }
    }
}

/// Configuration consumed by the renderer when starting up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    /// Path to the ShaderToy-style fragment shader that should be rendered.
    pub shader_source: PathBuf,
    pub window_size: WindowSize,
    /// Stream frames to an encoder when set.
    pub capture: Option<CaptureConfig>,
    /// Advance time by exactly `1 / fps` per frame instead of reading the wall clock.
    pub fixed_step: bool,
    /// Nominal frame rate for the fixed-step clock when no capture rate is set.
    pub fps: u32,
    /// Close after this many rendered frames.
    pub max_frames: Option<u64>,
    /// Reload automatically when the shader file changes on disk.
    pub watch: bool,
    pub color_space: ColorSpaceMode,
}

impl RendererConfig {
    /// Rate used by the fixed-step clock; a capture's rate wins.
    pub fn fixed_step_fps(&self) -> u32 {
        self.capture
            .as_ref()
            .map(|capture| capture.fps)
            .unwrap_or(self.fps)
            .max(1)
    }
}

impl Default for RendererConfig {
    /// Fullscreen, watched, no capture, no shader selected.
    fn default() -> Self {
        Self {
            shader_source: PathBuf::new(),
            window_size: WindowSize::default(),
            capture: None,
            fixed_step: false,
            fps: DEFAULT_CAPTURE_FPS,
            max_frames: None,
            watch: true,
            color_space: ColorSpaceMode::default(),
        }
    }
}
