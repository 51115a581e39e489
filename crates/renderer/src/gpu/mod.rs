//! wgpu implementation of [`Backend`](crate::backend::Backend).
//!
//! - `context` owns wgpu instance/device/surface wiring and reconfigures the
//!   swapchain when the window resizes.
//! - `pipeline` links reflected GLSL into render pipelines that share one
//!   uniform bind group layout.
//! - `quad` holds the immutable full-screen vertex buffer.
//! - `readback` copies presented frames back to the CPU for capture.
//! - `state` glues everything together behind the `Backend` trait.

mod context;
mod pipeline;
mod quad;
mod readback;
mod state;

pub use pipeline::GpuProgram;
pub use state::GpuBackend;
