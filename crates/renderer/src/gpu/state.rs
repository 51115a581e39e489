use std::sync::Arc;

use tracing::{debug, warn};
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::backend::{Backend, Viewport};
use crate::capture::PixelOrder;
use crate::compile::VIEWPORT_BINDING;
use crate::error::{CaptureSinkError, FrameError, ShaderError, WindowInitError};
use crate::types::ColorSpaceMode;
use crate::uniforms::{UniformName, UniformSlot, UniformValue};

use super::context::SurfaceContext;
use super::pipeline::{block_offset, GpuProgram, UniformBindings};
use super::quad::QuadGeometry;
use super::readback::{self, Readback};

/// Work recorded between `begin_frame` and `present`.
struct FrameInFlight {
    surface: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: Option<wgpu::CommandEncoder>,
}

/// [`Backend`] that draws into a window surface with wgpu.
pub struct GpuBackend {
    context: SurfaceContext,
    bindings: UniformBindings,
    quad: QuadGeometry,
    next_generation: u64,
    bound: Option<(wgpu::RenderPipeline, u64)>,
    frame: Option<FrameInFlight>,
    capture_order: Option<PixelOrder>,
    readback: Option<Readback>,
}

impl GpuBackend {
    /// Creates the surface for `window`. With `capture` set the surface is
    /// configured so rendered frames can be copied back to the CPU.
    pub fn new(
        window: Arc<Window>,
        size: PhysicalSize<u32>,
        color_space: ColorSpaceMode,
        capture: bool,
    ) -> Result<Self, WindowInitError> {
        let context = SurfaceContext::new(window, size, color_space, capture)
            .map_err(|err| WindowInitError::Gpu(format!("{err:#}")))?;
        let bindings = UniformBindings::new(&context.device);
        let quad = QuadGeometry::new(&context.device);

        Ok(Self {
            context,
            bindings,
            quad,
            next_generation: 1,
            bound: None,
            frame: None,
            capture_order: None,
            readback: None,
        })
    }

    /// Checks the surface can be read back and enables [`Backend::read_pixels`].
    pub fn enable_capture(&mut self) -> Result<(), CaptureSinkError> {
        if !self.context.surface_supports_copy {
            return Err(CaptureSinkError::Unsupported(
                "surface does not support COPY_SRC".to_string(),
            ));
        }
        let order = readback::pixel_order(self.context.surface_format)?;
        self.capture_order = Some(order);
        Ok(())
    }

    fn write_block(&self, binding: u32, data: [f32; 4]) {
        self.context.queue.write_buffer(
            &self.bindings.buffer,
            block_offset(binding),
            bytemuck::cast_slice(&data),
        );
    }

    fn submit(&mut self) {
        let Some(encoder) = self.frame.as_mut().and_then(|frame| frame.encoder.take()) else {
            return;
        };
        self.context.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl Backend for GpuBackend {
    type Program = GpuProgram;

    fn compile_program(
        &mut self,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<GpuProgram, ShaderError> {
        let generation = self.next_generation;
        let program = GpuProgram::build(
            &self.context.device,
            &self.bindings,
            self.context.surface_format,
            generation,
            vertex_source,
            fragment_source,
        )?;
        self.next_generation += 1;
        debug!(generation, "linked shader pipeline");
        Ok(program)
    }

    fn uniform_slot(&self, program: &GpuProgram, name: UniformName) -> Option<UniformSlot> {
        program
            .uses(name)
            .then(|| UniformSlot::new(program.generation(), name.binding()))
    }

    fn begin_frame(&mut self, viewport: Viewport) -> Result<(), FrameError> {
        // A frame that was never presented is dropped here.
        self.frame = None;
        self.bound = None;

        let size = PhysicalSize::new(viewport.width, viewport.height);
        if size != self.context.size() {
            self.context.resize(size);
        }

        let surface = match self.context.surface.get_current_texture() {
            Ok(surface) => surface,
            Err(wgpu::SurfaceError::Timeout) => return Err(FrameError::Timeout),
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(FrameError::OutOfMemory),
            Err(err) => {
                warn!(error = %err, "surface unavailable, reconfiguring");
                self.context.reconfigure();
                return Err(FrameError::Reconfigure);
            }
        };
        let view = surface
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("render encoder"),
                });

        self.write_block(
            VIEWPORT_BINDING,
            [viewport.width as f32, viewport.height as f32, 0.0, 0.0],
        );
        self.frame = Some(FrameInFlight {
            surface,
            view,
            encoder: Some(encoder),
        });
        Ok(())
    }

    fn bind_program(&mut self, program: &GpuProgram) {
        self.bound = Some((program.pipeline.clone(), program.generation()));
    }

    fn set_uniform(&mut self, slot: UniformSlot, value: UniformValue) {
        let Some((_, generation)) = self.bound.as_ref() else {
            return;
        };
        if slot.generation() != *generation {
            warn!(
                slot_generation = slot.generation(),
                program_generation = *generation,
                "ignoring uniform slot from another program"
            );
            return;
        }
        self.write_block(slot.binding(), value.to_std140());
    }

    fn draw_quad(&mut self) {
        let Some((pipeline, _)) = self.bound.as_ref() else {
            return;
        };
        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        let Some(encoder) = frame.encoder.as_mut() else {
            return;
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("shader pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &frame.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.bindings.bind_group, &[]);
        pass.set_vertex_buffer(0, self.quad.buffer().slice(..));
        pass.draw(0..self.quad.vertex_count(), 0..1);
    }

    fn read_pixels(&mut self, pixels: &mut Vec<u8>) -> Result<(), FrameError> {
        let Some(order) = self.capture_order else {
            return Err(FrameError::Readback("capture is not enabled".to_string()));
        };
        let Some(frame) = self.frame.as_mut() else {
            return Err(FrameError::Readback("no frame in flight".to_string()));
        };
        let viewport = Viewport::new(frame.surface.texture.width(), frame.surface.texture.height());
        if self
            .readback
            .as_ref()
            .is_none_or(|readback| readback.viewport() != viewport)
        {
            self.readback = Some(Readback::new(&self.context.device, viewport, order));
        }
        let Some(readback) = self.readback.as_ref() else {
            return Err(FrameError::Readback("no readback buffer".to_string()));
        };
        let Some(encoder) = frame.encoder.as_mut() else {
            return Err(FrameError::Readback("frame was already submitted".to_string()));
        };

        readback.encode_copy(encoder, &frame.surface.texture);
        self.submit();
        match self.readback.as_ref() {
            Some(readback) => readback.read(&self.context.device, pixels),
            None => Err(FrameError::Readback("no readback buffer".to_string())),
        }
    }

    fn present(&mut self) {
        self.submit();
        self.bound = None;
        if let Some(frame) = self.frame.take() {
            frame.surface.present();
        }
    }
}
