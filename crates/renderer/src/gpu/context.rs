use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::types::ColorSpaceMode;

/// Device, queue and the window surface they present to.
pub(crate) struct SurfaceContext {
    _instance: wgpu::Instance,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pub surface_format: wgpu::TextureFormat,
    pub surface_supports_copy: bool,
}

impl SurfaceContext {
    /// Opens a device for `window`. With `want_copy` the swapchain textures
    /// are also copy sources so frames can be read back.
    pub(crate) fn new(
        window: Arc<Window>,
        size: PhysicalSize<u32>,
        color_space: ColorSpaceMode,
        want_copy: bool,
    ) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });
        let surface = instance
            .create_surface(window)
            .context("failed to create rendering surface")?;
        let (adapter, device, queue) = open_device(&instance, &surface, size)?;

        let caps = surface.get_capabilities(&adapter);
        if caps.formats.is_empty() {
            anyhow::bail!("surface is not compatible with the selected adapter");
        }
        let surface_format = select_format(&caps.formats, color_space);
        let surface_supports_copy = caps.usages.contains(wgpu::TextureUsages::COPY_SRC);
        if want_copy && !surface_supports_copy {
            tracing::warn!("surface does not advertise COPY_SRC; frames cannot be captured");
        }

        let config = surface_config(
            &caps,
            surface_format,
            size,
            want_copy && surface_supports_copy,
        );
        surface.configure(&device, &config);

        Ok(Self {
            _instance: instance,
            surface,
            device,
            queue,
            config,
            surface_format,
            surface_supports_copy,
        })
    }

    pub(crate) fn size(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.config.width, self.config.height)
    }

    /// Matches the swapchain to `size`; zero-sized requests are ignored.
    pub(crate) fn resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        self.config.width = size.width;
        self.config.height = size.height;
        self.reconfigure();
    }

    /// Reapplies the current configuration, e.g. after the surface was lost.
    pub(crate) fn reconfigure(&mut self) {
        self.surface.configure(&self.device, &self.config);
    }
}

fn open_device(
    instance: &wgpu::Instance,
    surface: &wgpu::Surface<'static>,
    size: PhysicalSize<u32>,
) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: Some(surface),
        force_fallback_adapter: false,
    }))
    .context("failed to find a suitable GPU adapter")?;

    let info = adapter.get_info();
    tracing::debug!(
        name = %info.name,
        backend = ?info.backend,
        device_type = ?info.device_type,
        "selected GPU adapter"
    );

    let limits = adapter.limits();
    let max = limits.max_texture_dimension_2d;
    if size.width > max || size.height > max {
        anyhow::bail!(
            "window is {}x{} but the GPU supports at most {max}x{max}",
            size.width,
            size.height
        );
    }

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("shaderun device"),
        required_features: wgpu::Features::empty(),
        required_limits: limits,
        memory_hints: wgpu::MemoryHints::Performance,
        trace: wgpu::Trace::default(),
    }))
    .context("failed to create GPU device")?;

    Ok((adapter, device, queue))
}

/// Vsync-paced configuration for `format`, falling back to the first
/// advertised present mode when `Fifo` is missing.
fn surface_config(
    caps: &wgpu::SurfaceCapabilities,
    format: wgpu::TextureFormat,
    size: PhysicalSize<u32>,
    copy_src: bool,
) -> wgpu::SurfaceConfiguration {
    let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT;
    if copy_src {
        usage |= wgpu::TextureUsages::COPY_SRC;
    }
    let present_mode = if caps.present_modes.contains(&wgpu::PresentMode::Fifo) {
        wgpu::PresentMode::Fifo
    } else {
        caps.present_modes
            .first()
            .copied()
            .unwrap_or(wgpu::PresentMode::Fifo)
    };
    tracing::debug!(?present_mode, ?format, "configuring surface");

    wgpu::SurfaceConfiguration {
        usage,
        format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode,
        alpha_mode: caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto),
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    }
}

/// Auto and Gamma write shader output verbatim (non-sRGB); Linear lets the
/// swapchain encode to sRGB.
fn select_format(formats: &[wgpu::TextureFormat], mode: ColorSpaceMode) -> wgpu::TextureFormat {
    let wants_srgb = mode == ColorSpaceMode::Linear;
    match formats.iter().find(|format| format.is_srgb() == wants_srgb) {
        Some(format) => *format,
        None => {
            let fallback = formats[0];
            tracing::warn!(?fallback, ?mode, "no matching surface format; using fallback");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gamma_prefers_non_srgb_formats() {
        let formats = [
            wgpu::TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm,
        ];
        assert_eq!(
            select_format(&formats, ColorSpaceMode::Auto),
            wgpu::TextureFormat::Bgra8Unorm
        );
        assert_eq!(
            select_format(&formats, ColorSpaceMode::Gamma),
            wgpu::TextureFormat::Bgra8Unorm
        );
        assert_eq!(
            select_format(&formats, ColorSpaceMode::Linear),
            wgpu::TextureFormat::Bgra8UnormSrgb
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [wgpu::TextureFormat::Rgba8Unorm];
        assert_eq!(
            select_format(&formats, ColorSpaceMode::Linear),
            wgpu::TextureFormat::Rgba8Unorm
        );
    }
}
