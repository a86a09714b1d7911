//! Offscreen colour targets.

use glam::UVec2;

use crate::error::{Error, Result};
use crate::gpu::context::{RenderContext, OFFSCREEN_FORMAT};

/// An owned colour texture that passes can sample from and render into.
pub struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: UVec2,
}

impl RenderTarget {
    /// Allocate a target of `size`; zero dimensions are clamped to one texel.
    pub fn new(ctx: &RenderContext, size: UVec2, label: &str) -> Result<Self> {
        let size = size.max(UVec2::ONE);
        let texture = ctx.scoped(label, || {
            Ok(ctx.device().create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: size.x,
                    height: size.y,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: OFFSCREEN_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            }))
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self { texture, view, size })
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        OFFSCREEN_FORMAT
    }

    pub(crate) fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.size.x,
            height: self.size.y,
            depth_or_array_layers: 1,
        }
    }

    /// Record a clear to transparent black.
    pub(crate) fn encode_clear(&self, encoder: &mut wgpu::CommandEncoder) {
        let _render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Render Target"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        // Pass ends immediately, clearing the texture
    }

    /// Clear the target to transparent black.
    pub fn clear(&self, ctx: &RenderContext) -> Result<()> {
        ctx.scoped("clear render target", || {
            let mut encoder = ctx
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Clear Encoder"),
                });
            self.encode_clear(&mut encoder);
            ctx.queue().submit(Some(encoder.finish()));
            Ok(())
        })
    }

    /// Copy the target back to the CPU, rows in texture order (row 0 first).
    pub fn read_pixels(&self, ctx: &RenderContext) -> Result<image::RgbaImage> {
        let (width, height) = (self.size.x, self.size.y);

        let unpadded_bytes_per_row = 4 * width;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let output_buffer = ctx.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded_bytes_per_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        ctx.scoped("read back render target", || {
            let mut encoder = ctx
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Readback Encoder"),
                });
            encoder.copy_texture_to_buffer(
                wgpu::ImageCopyTexture {
                    texture: &self.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyBuffer {
                    buffer: &output_buffer,
                    layout: wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(padded_bytes_per_row),
                        rows_per_image: Some(height),
                    },
                },
                self.extent(),
            );
            ctx.queue().submit(Some(encoder.finish()));
            Ok(())
        })?;

        let buffer_slice = output_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        ctx.device().poll(wgpu::Maintain::Wait);

        let mapped = rx
            .recv()
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));
        if let Err(message) = mapped {
            return Err(Error::Resource {
                context: "map readback buffer".to_string(),
                message,
            });
        }

        let data = buffer_slice.get_mapped_range();
        let mut unpadded = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        for row in 0..height {
            let start = (row * padded_bytes_per_row) as usize;
            let end = start + unpadded_bytes_per_row as usize;
            unpadded.extend_from_slice(&data[start..end]);
        }
        drop(data);
        output_buffer.unmap();

        image::RgbaImage::from_raw(width, height, unpadded).ok_or_else(|| Error::Resource {
            context: "read back render target".to_string(),
            message: "readback size mismatch".to_string(),
        })
    }
}
