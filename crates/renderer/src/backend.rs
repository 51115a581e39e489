use crate::error::{FrameError, ShaderError};
use crate::uniforms::{UniformName, UniformSlot, UniformValue};

/// Drawable area in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Size of one packed RGB frame at this resolution.
    pub fn rgb_frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// The thin drawing API the render loop is written against.
///
/// Implementations own the full-screen quad for their whole lifetime. Frame
/// calls arrive in a fixed order: `begin_frame`, `bind_program`, any number of
/// `set_uniform`, `draw_quad`, optionally `read_pixels`, then `present`.
pub trait Backend {
    /// Linked program. Dropping it releases the GPU side.
    type Program;

    /// Compiles both stages and links them into a program.
    fn compile_program(
        &mut self,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self::Program, ShaderError>;

    /// Location of `name` in `program`, or `None` when the shader does not use it.
    fn uniform_slot(&self, program: &Self::Program, name: UniformName) -> Option<UniformSlot>;

    /// Clears the frame buffer and matches the viewport to `viewport`.
    fn begin_frame(&mut self, viewport: Viewport) -> Result<(), FrameError>;

    fn bind_program(&mut self, program: &Self::Program);

    fn set_uniform(&mut self, slot: UniformSlot, value: UniformValue);

    fn draw_quad(&mut self);

    /// Replaces `pixels` with the rendered frame as packed RGB rows, top row first.
    fn read_pixels(&mut self, pixels: &mut Vec<u8>) -> Result<(), FrameError>;

    fn present(&mut self);
}
