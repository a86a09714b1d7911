//! Textures uploaded from CPU images.
//!
//! Uploaded textures store rows bottom-up, matching what a standard-quad pass
//! writes into a render target.

use std::fmt;

use glam::UVec2;
use wgpu::util::DeviceExt;

use crate::error::Result;
use crate::gpu::context::{RenderContext, Transient, OFFSCREEN_FORMAT};
use crate::surface;

/// Upload `image` as a transient, sampled texture.
pub(crate) fn upload_image(
    ctx: &RenderContext,
    image: &image::RgbaImage,
    kind: &'static str,
) -> Result<Transient<wgpu::Texture>> {
    let bytes = surface::bottom_up_bytes(image);
    let size = UVec2::new(image.width(), image.height());

    let texture = ctx.scoped(kind, || {
        Ok(ctx.device().create_texture_with_data(
            ctx.queue(),
            &wgpu::TextureDescriptor {
                label: Some(kind),
                size: wgpu::Extent3d {
                    width: size.x,
                    height: size.y,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: OFFSCREEN_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &bytes,
        ))
    })?;

    Ok(ctx.transients().track(kind, texture))
}

/// Texture bound to a shader's auxiliary sampler slot.
///
/// Passed by value inside [`PassParams`](crate::params::PassParams); the pass
/// drops it once the draw that used it has been submitted.
pub struct AuxTexture {
    view: wgpu::TextureView,
    texture: Transient<wgpu::Texture>,
    size: UVec2,
}

impl AuxTexture {
    /// Upload an image. Empty images become a single transparent texel.
    pub fn from_image(ctx: &RenderContext, image: &image::RgbaImage) -> Result<Self> {
        let texture = if image.width() == 0 || image.height() == 0 {
            upload_image(ctx, &image::RgbaImage::new(1, 1), "Auxiliary Texture")?
        } else {
            upload_image(ctx, image, "Auxiliary Texture")?
        };
        Ok(Self::wrap(texture))
    }

    /// Take ownership of an existing texture. It must be a filterable float 2D texture.
    pub fn from_texture(ctx: &RenderContext, texture: wgpu::Texture) -> Self {
        Self::wrap(ctx.transients().track("Auxiliary Texture", texture))
    }

    fn wrap(texture: Transient<wgpu::Texture>) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let size = UVec2::new(texture.width(), texture.height());
        Self { view, texture, size }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }
}

impl fmt::Debug for AuxTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuxTexture").field("size", &self.size).finish()
    }
}
