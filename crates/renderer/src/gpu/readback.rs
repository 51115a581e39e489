use crate::backend::Viewport;
use crate::capture::{pack_rgb, PixelOrder};
use crate::error::{CaptureSinkError, FrameError};

const BYTES_PER_PIXEL: u32 = 4;

/// Channel order of a surface format, if frames in it can be captured.
pub(crate) fn pixel_order(format: wgpu::TextureFormat) -> Result<PixelOrder, CaptureSinkError> {
    match format {
        wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => {
            Ok(PixelOrder::Rgba)
        }
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {
            Ok(PixelOrder::Bgra)
        }
        other => Err(CaptureSinkError::Unsupported(format!(
            "surface format {other:?} is not 8-bit RGBA/BGRA"
        ))),
    }
}

pub(crate) fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Staging buffer the surface texture is copied into before packing.
pub(crate) struct Readback {
    buffer: wgpu::Buffer,
    viewport: Viewport,
    padded_bytes_per_row: u32,
    order: PixelOrder,
}

impl Readback {
    pub(crate) fn new(device: &wgpu::Device, viewport: Viewport, order: PixelOrder) -> Self {
        let padded_bytes_per_row = padded_bytes_per_row(viewport.width);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(viewport.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            viewport,
            padded_bytes_per_row,
            order,
        }
    }

    pub(crate) fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub(crate) fn encode_copy(&self, encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture) {
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.viewport.height),
                },
            },
            wgpu::Extent3d {
                width: self.viewport.width,
                height: self.viewport.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Waits for the copy submitted with [`encode_copy`](Self::encode_copy)
    /// and unpacks it into `pixels`.
    pub(crate) fn read(
        &self,
        device: &wgpu::Device,
        pixels: &mut Vec<u8>,
    ) -> Result<(), FrameError> {
        let slice = self.buffer.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| FrameError::Readback(err.to_string()))?;
        rx.recv()
            .map_err(|err| FrameError::Readback(err.to_string()))?
            .map_err(|err| FrameError::Readback(err.to_string()))?;

        {
            let data = slice.get_mapped_range();
            pack_rgb(
                &data,
                self.viewport,
                self.padded_bytes_per_row as usize,
                self.order,
                pixels,
            );
        }
        self.buffer.unmap();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1), 256);
    }

    #[test]
    fn only_eight_bit_four_channel_formats_are_capturable() {
        assert_eq!(
            pixel_order(wgpu::TextureFormat::Bgra8UnormSrgb).unwrap(),
            PixelOrder::Bgra
        );
        assert_eq!(
            pixel_order(wgpu::TextureFormat::Rgba8Unorm).unwrap(),
            PixelOrder::Rgba
        );
        assert!(pixel_order(wgpu::TextureFormat::Rgba16Float).is_err());
    }
}
