use std::borrow::Cow;
use std::num::NonZeroU64;

use crate::compile::{self, VIEWPORT_BINDING};
use crate::error::ShaderError;
use crate::uniforms::{UniformName, UNIFORM_COUNT};

use super::quad::QuadGeometry;

/// Distance between uniform blocks inside the shared buffer.
pub(crate) const UNIFORM_STRIDE: u64 = 256;
/// One std140 row per block.
pub(crate) const UNIFORM_BLOCK_SIZE: u64 = 16;
const BLOCK_COUNT: u32 = VIEWPORT_BINDING + 1;

/// Bind group shared by every program: one buffer, one block per binding.
pub(crate) struct UniformBindings {
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub pipeline_layout: wgpu::PipelineLayout,
}

impl UniformBindings {
    pub fn new(device: &wgpu::Device) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("uniform blocks"),
            size: UNIFORM_STRIDE * u64::from(BLOCK_COUNT),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let layout_entries: Vec<_> = (0..BLOCK_COUNT)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: if binding == VIEWPORT_BINDING {
                    wgpu::ShaderStages::VERTEX
                } else {
                    wgpu::ShaderStages::FRAGMENT
                },
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(UNIFORM_BLOCK_SIZE),
                },
                count: None,
            })
            .collect();
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &layout_entries,
        });

        let group_entries: Vec<_> = (0..BLOCK_COUNT)
            .map(|binding| wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: block_offset(binding),
                    size: NonZeroU64::new(UNIFORM_BLOCK_SIZE),
                }),
            })
            .collect();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &layout,
            entries: &group_entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shader pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        Self {
            buffer,
            bind_group,
            pipeline_layout,
        }
    }
}

pub(crate) fn block_offset(binding: u32) -> u64 {
    u64::from(binding) * UNIFORM_STRIDE
}

/// A linked render pipeline and the uniforms its fragment stage reads.
pub struct GpuProgram {
    pub(crate) pipeline: wgpu::RenderPipeline,
    pub(crate) generation: u64,
    active: [bool; UNIFORM_COUNT],
}

impl GpuProgram {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn uses(&self, name: UniformName) -> bool {
        self.active[name.binding() as usize]
    }

    /// Compiles and reflects both stages, then links the validated naga
    /// modules into a pipeline without reparsing the GLSL.
    ///
    /// Linking runs inside a validation error scope so interface mismatches
    /// come back as [`ShaderError::Link`] instead of a device panic.
    pub(crate) fn build(
        device: &wgpu::Device,
        bindings: &UniformBindings,
        surface_format: wgpu::TextureFormat,
        generation: u64,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<Self, ShaderError> {
        let compiled = compile::compile_program(vertex_source, fragment_source)?;
        let mut active = [false; UNIFORM_COUNT];
        for name in compiled.active_uniforms() {
            active[name.binding() as usize] = true;
        }
        let (vertex_ir, fragment_ir) = compiled.into_modules();

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("fullscreen quad vertex"),
            source: wgpu::ShaderSource::Naga(Cow::Owned(vertex_ir)),
        });
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("user fragment"),
            source: wgpu::ShaderSource::Naga(Cow::Owned(fragment_ir)),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("shader pipeline"),
            layout: Some(&bindings.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some("main"),
                buffers: &[QuadGeometry::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(ShaderError::Link {
                log: error.to_string(),
            });
        }

        Ok(Self {
            pipeline,
            generation,
            active,
        })
    }
}
