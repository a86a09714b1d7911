//! A single shader pass.
//!
//! A [`Pass`] owns one compiled vertex+fragment pair, the bind group layouts
//! derived from its reflected interface, a uniform buffer with its CPU-side
//! shadow, and the standard full-screen quad. Every draw records its own
//! command encoder and submits it before returning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use glam::{IVec2, UVec2, Vec2};
use serde::{Deserialize, Serialize};
use wgpu::util::DeviceExt;

use crate::error::{ConfigurationError, Error, Result, Stage};
use crate::gpu::context::{RenderContext, Transient, OFFSCREEN_FORMAT};
use crate::gpu::geometry::{self, QuadVertex, QUAD_TOPOLOGY, QUAD_VERTEX_COUNT};
use crate::gpu::reflect::{self, ShaderInterface, AUX_GROUP, ENTRY_POINT, PRIMARY_GROUP, UNIFORM_GROUP};
use crate::gpu::target::RenderTarget;
use crate::gpu::texture::{upload_image, AuxTexture};
use crate::params::{Applied, PassParams, UniformShadow, UniformValue};
use crate::shader_source::{ShaderLoader, ShaderSources};
use crate::surface;

/// How a pass's output is combined with what the destination already holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    /// Overwrite the destination.
    #[default]
    Replace,
    /// Source-alpha over.
    Alpha,
}

impl BlendMode {
    pub fn state(self) -> wgpu::BlendState {
        match self {
            BlendMode::Replace => wgpu::BlendState::REPLACE,
            BlendMode::Alpha => wgpu::BlendState::ALPHA_BLENDING,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassOptions {
    /// Size surfaces are composited to and placed quads are mapped against.
    pub screen_size: UVec2,
    pub blend: BlendMode,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            screen_size: UVec2::new(1920, 1080),
            blend: BlendMode::Replace,
        }
    }
}

/// Where a draw writes.
#[derive(Clone, Copy)]
pub enum Destination<'a> {
    Target(&'a RenderTarget),
    /// Any external colour view, typically the current swapchain frame.
    Screen {
        view: &'a wgpu::TextureView,
        format: wgpu::TextureFormat,
    },
}

impl<'a> Destination<'a> {
    pub fn view(&self) -> &'a wgpu::TextureView {
        match *self {
            Destination::Target(target) => target.view(),
            Destination::Screen { view, .. } => view,
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        match *self {
            Destination::Target(target) => target.format(),
            Destination::Screen { format, .. } => format,
        }
    }
}

impl<'a> From<&'a RenderTarget> for Destination<'a> {
    fn from(target: &'a RenderTarget) -> Self {
        Destination::Target(target)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Filtering {
    Linear,
    Nearest,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Geometry {
    Standard,
    Flipped,
    Placed { top_left: Vec2, size: Vec2 },
}

impl Geometry {
    fn full_screen(flip_y: bool) -> Self {
        if flip_y {
            Geometry::Flipped
        } else {
            Geometry::Standard
        }
    }
}

/// One draw, as recorded by `Pass::draw`.
struct DrawCall<'a> {
    input: &'a wgpu::TextureView,
    filtering: Filtering,
    output: Destination<'a>,
    geometry: Geometry,
    load: wgpu::LoadOp<wgpu::Color>,
    /// Copy the output target into this one after drawing, in the same submission.
    copy_into: Option<&'a RenderTarget>,
}

/// A compiled shader program and everything needed to draw with it.
pub struct Pass {
    label: String,
    bundle: PathBuf,
    options: PassOptions,
    interface: ShaderInterface,

    vertex_module: wgpu::ShaderModule,
    fragment_module: wgpu::ShaderModule,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,

    primary_layout: wgpu::BindGroupLayout,
    aux_layout: wgpu::BindGroupLayout,
    uniform_bind_group: wgpu::BindGroup,
    uniforms: Option<(UniformShadow, wgpu::Buffer)>,

    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    /// Bound to auxiliary slots no parameter fills.
    placeholder_view: wgpu::TextureView,
    quad_buffer: wgpu::Buffer,
}

impl Pass {
    /// Load the bundle at `bundle` through `loader` and compile it.
    pub fn new(
        ctx: &RenderContext,
        loader: &ShaderLoader,
        bundle: impl AsRef<Path>,
        options: PassOptions,
    ) -> Result<Self> {
        let sources = loader.load(bundle)?;
        Self::from_sources(ctx, &sources, options)
    }

    pub fn from_sources(ctx: &RenderContext, sources: &ShaderSources, options: PassOptions) -> Result<Self> {
        let device = ctx.device();
        let bundle = sources.bundle.clone();
        let label = bundle
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| bundle.display().to_string());

        let compiled = reflect::compile(sources)?;
        let interface = compiled.interface;

        let vertex_module = create_module(ctx, &bundle, Stage::Vertex, compiled.vertex)?;
        let fragment_module = create_module(ctx, &bundle, Stage::Fragment, compiled.fragment)?;

        let primary_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pass Primary Texture Layout"),
            entries: &[
                texture_entry(reflect::PRIMARY_TEXTURE_BINDING),
                sampler_entry(reflect::PRIMARY_SAMPLER_BINDING),
            ],
        });

        let uniform_entries: Vec<_> = interface
            .uniforms
            .iter()
            .map(|_| wgpu::BindGroupLayoutEntry {
                binding: reflect::UNIFORM_BINDING,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pass Uniform Layout"),
            entries: &uniform_entries,
        });

        let mut aux_entries: Vec<_> = interface
            .aux_textures
            .iter()
            .map(|slot| texture_entry(slot.binding))
            .collect();
        aux_entries.extend(interface.aux_sampler.map(sampler_entry));
        let aux_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pass Auxiliary Texture Layout"),
            entries: &aux_entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("Pass Pipeline Layout: {}", label)),
            bind_group_layouts: &[&primary_layout, &uniform_layout, &aux_layout],
            push_constant_ranges: &[],
        });

        let uniforms = interface.uniforms.clone().map(|layout| {
            let shadow = UniformShadow::new(layout);
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("Pass Uniform Buffer: {}", label)),
                contents: shadow.bytes(),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
            (shadow, buffer)
        });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Pass Uniform Bind Group"),
            layout: &uniform_layout,
            entries: &uniforms
                .iter()
                .map(|(_, buffer)| wgpu::BindGroupEntry {
                    binding: reflect::UNIFORM_BINDING,
                    resource: buffer.as_entire_binding(),
                })
                .collect::<Vec<_>>(),
        });

        let linear_sampler = create_sampler(device, "Pass Linear Sampler", wgpu::FilterMode::Linear);
        let nearest_sampler = create_sampler(device, "Pass Nearest Sampler", wgpu::FilterMode::Nearest);

        let placeholder = device.create_texture_with_data(
            ctx.queue(),
            &wgpu::TextureDescriptor {
                label: Some("Pass Placeholder Texture"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
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
            &[0, 0, 0, 0],
        );
        let placeholder_view = placeholder.create_view(&wgpu::TextureViewDescriptor::default());

        let quad_buffer = geometry::standard_quad().create_buffer(device, "Standard Quad Buffer");

        let mut pass = Self {
            label,
            bundle,
            options,
            interface,
            vertex_module,
            fragment_module,
            pipeline_layout,
            pipelines: HashMap::new(),
            primary_layout,
            aux_layout,
            uniform_bind_group,
            uniforms,
            linear_sampler,
            nearest_sampler,
            placeholder_view,
            quad_buffer,
        };
        pass.ensure_pipeline(ctx, OFFSCREEN_FORMAT)?;

        log::debug!(
            "compiled pass {:?}: {} uniform(s), {} auxiliary texture(s)",
            pass.bundle,
            pass.interface.uniforms.as_ref().map_or(0, |u| u.fields.len()),
            pass.interface.aux_textures.len()
        );
        Ok(pass)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn bundle(&self) -> &Path {
        &self.bundle
    }

    pub fn options(&self) -> PassOptions {
        self.options
    }

    pub fn screen_size(&self) -> UVec2 {
        self.options.screen_size
    }

    pub fn interface(&self) -> &ShaderInterface {
        &self.interface
    }

    /// Current contents of the uniform block, if the shaders declare one.
    pub fn uniform_bytes(&self) -> Option<&[u8]> {
        self.uniforms.as_ref().map(|(shadow, _)| shadow.bytes())
    }

    /// Draw `input` over the whole of `output`.
    ///
    /// With `flip_y` the flipped quad is used, which inverts the row order
    /// of what is written.
    pub fn draw_from_texture(
        &mut self,
        ctx: &RenderContext,
        input: &wgpu::TextureView,
        output: Destination<'_>,
        flip_y: bool,
        params: PassParams,
    ) -> Result<()> {
        self.draw(
            ctx,
            DrawCall {
                input,
                filtering: Filtering::Linear,
                output,
                geometry: Geometry::full_screen(flip_y),
                load: wgpu::LoadOp::Load,
                copy_into: None,
            },
            params,
        )
    }

    /// Composite `surface` at `top_left` onto a transparent screen-sized
    /// canvas and draw it over the whole of `output`, unflipped.
    pub fn draw_from_surface(
        &mut self,
        ctx: &RenderContext,
        surface: &image::RgbaImage,
        top_left: IVec2,
        output: Destination<'_>,
        params: PassParams,
    ) -> Result<()> {
        self.draw_surface(ctx, surface, top_left, output, false, params)
    }

    pub(crate) fn draw_surface(
        &mut self,
        ctx: &RenderContext,
        surface: &image::RgbaImage,
        top_left: IVec2,
        output: Destination<'_>,
        flip_y: bool,
        params: PassParams,
    ) -> Result<()> {
        let canvas = surface::compose(surface, top_left, self.options.screen_size);
        let texture = upload_image(ctx, &canvas, "Promoted Surface Texture")?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        self.draw(
            ctx,
            DrawCall {
                input: &view,
                filtering: Filtering::Nearest,
                output,
                geometry: Geometry::full_screen(flip_y),
                load: wgpu::LoadOp::Load,
                copy_into: None,
            },
            params,
        )
    }

    /// Read `target` and write the result back into it.
    ///
    /// Renders into a cleared scratch target of the same size, then copies
    /// it over `target` in the same submission.
    pub fn draw_in_place(
        &mut self,
        ctx: &RenderContext,
        target: &RenderTarget,
        flip_y: bool,
        params: PassParams,
    ) -> Result<()> {
        let scratch = RenderTarget::new(ctx, target.size(), "In-Place Scratch Target")?;
        let scratch = ctx.transients().track("In-Place Scratch Target", scratch);

        self.draw(
            ctx,
            DrawCall {
                input: target.view(),
                filtering: Filtering::Linear,
                output: Destination::Target(&*scratch),
                geometry: Geometry::full_screen(flip_y),
                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                copy_into: Some(target),
            },
            params,
        )
    }

    /// Draw `input` into the pixel rectangle at `top_left` of size `size`,
    /// leaving the rest of `output` untouched.
    pub fn draw_texture_at(
        &mut self,
        ctx: &RenderContext,
        input: &wgpu::TextureView,
        top_left: Vec2,
        size: Vec2,
        output: Destination<'_>,
        params: PassParams,
    ) -> Result<()> {
        self.draw(
            ctx,
            DrawCall {
                input,
                filtering: Filtering::Linear,
                output,
                geometry: Geometry::Placed { top_left, size },
                load: wgpu::LoadOp::Load,
                copy_into: None,
            },
            params,
        )
    }

    fn draw(&mut self, ctx: &RenderContext, call: DrawCall<'_>, params: PassParams) -> Result<()> {
        self.ensure_pipeline(ctx, call.output.format())?;
        let aux = self.apply_params(params);

        let context = format!("draw pass {}", self.label);
        ctx.scoped(&context, || {
            if let Some((shadow, buffer)) = &self.uniforms {
                ctx.queue().write_buffer(buffer, 0, shadow.bytes());
            }

            let quad = self.transient_quad(ctx, call.geometry);
            let vertex_buffer = quad.as_deref().unwrap_or(&self.quad_buffer);

            let mut encoder = ctx
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Pass Encoder"),
                });
            self.record(ctx, &mut encoder, &call, vertex_buffer, &aux)?;

            if let (Some(into), Destination::Target(from)) = (call.copy_into, call.output) {
                encoder.copy_texture_to_texture(
                    from.texture().as_image_copy(),
                    into.texture().as_image_copy(),
                    into.extent(),
                );
            }

            ctx.queue().submit(Some(encoder.finish()));
            Ok(())
        })
    }

    fn record(
        &self,
        ctx: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        call: &DrawCall<'_>,
        vertex_buffer: &wgpu::Buffer,
        aux: &HashMap<u32, AuxTexture>,
    ) -> Result<()> {
        let device = ctx.device();
        let format = call.output.format();
        let pipeline = self.pipelines.get(&format).ok_or_else(|| Error::Validation {
            context: format!("draw pass {}", self.label),
            message: format!("no pipeline for {:?}", format),
        })?;

        let sampler = match call.filtering {
            Filtering::Linear => &self.linear_sampler,
            Filtering::Nearest => &self.nearest_sampler,
        };
        let primary_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Pass Primary Bind Group"),
            layout: &self.primary_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: reflect::PRIMARY_TEXTURE_BINDING,
                    resource: wgpu::BindingResource::TextureView(call.input),
                },
                wgpu::BindGroupEntry {
                    binding: reflect::PRIMARY_SAMPLER_BINDING,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        let mut aux_entries: Vec<_> = self
            .interface
            .aux_textures
            .iter()
            .map(|slot| wgpu::BindGroupEntry {
                binding: slot.binding,
                resource: wgpu::BindingResource::TextureView(
                    aux.get(&slot.binding).map_or(&self.placeholder_view, AuxTexture::view),
                ),
            })
            .collect();
        if let Some(binding) = self.interface.aux_sampler {
            aux_entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
            });
        }
        let aux_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Pass Auxiliary Bind Group"),
            layout: &self.aux_layout,
            entries: &aux_entries,
        });

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&format!("Pass: {}", self.label)),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: call.output.view(),
                resolve_target: None,
                ops: wgpu::Operations {
                    load: call.load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(PRIMARY_GROUP, &primary_bind_group, &[]);
        render_pass.set_bind_group(UNIFORM_GROUP, &self.uniform_bind_group, &[]);
        render_pass.set_bind_group(AUX_GROUP, &aux_bind_group, &[]);
        render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
        render_pass.draw(0..QUAD_VERTEX_COUNT, 0..1);
        Ok(())
    }

    /// Write uniform values into the shadow and collect auxiliary textures by binding.
    fn apply_params(&mut self, params: PassParams) -> HashMap<u32, AuxTexture> {
        let mut aux = HashMap::new();

        for (name, value) in params {
            let value = match value {
                UniformValue::Texture(texture) => {
                    match self.interface.aux_binding(&name) {
                        Some(binding) => {
                            aux.insert(binding, texture);
                        }
                        None => log::trace!("pass {} has no auxiliary texture {:?}", self.label, name),
                    }
                    continue;
                }
                other => other,
            };

            let Some((shadow, _)) = self.uniforms.as_mut() else {
                log::trace!("pass {} has no uniform block, ignoring {:?}", self.label, name);
                continue;
            };
            match shadow.apply(&name, &value) {
                Applied::Written => {}
                Applied::Unknown => log::trace!("pass {} has no uniform {:?}", self.label, name),
                Applied::Mismatch { expected } => log::warn!(
                    "pass {}: uniform {:?} is {:?}, ignoring {:?} value",
                    self.label,
                    name,
                    expected,
                    value.kind()
                ),
            }
        }
        aux
    }

    fn transient_quad(&self, ctx: &RenderContext, geometry: Geometry) -> Option<Transient<wgpu::Buffer>> {
        let (quad, kind) = match geometry {
            Geometry::Standard => return None,
            Geometry::Flipped => (geometry::flipped_quad(), "Flipped Quad Buffer"),
            Geometry::Placed { top_left, size } => (
                geometry::placed_quad(top_left, size, self.options.screen_size.as_vec2()),
                "Placed Quad Buffer",
            ),
        };
        let buffer = quad.create_buffer(ctx.device(), kind);
        Some(ctx.transients().track(kind, buffer))
    }

    fn ensure_pipeline(&mut self, ctx: &RenderContext, format: wgpu::TextureFormat) -> Result<()> {
        if self.pipelines.contains_key(&format) {
            return Ok(());
        }

        let pipeline = ctx
            .scoped("create render pipeline", || {
                Ok(ctx.device().create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(&format!("Pass Pipeline: {}", self.label)),
                    layout: Some(&self.pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &self.vertex_module,
                        entry_point: Some(ENTRY_POINT),
                        buffers: &[QuadVertex::desc()],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &self.fragment_module,
                        entry_point: Some(ENTRY_POINT),
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: Some(self.options.blend.state()),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: QUAD_TOPOLOGY,
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                }))
            })
            .map_err(|e| match e {
                Error::Validation { message, .. } => ConfigurationError::PipelineLink {
                    bundle: self.bundle.clone(),
                    message,
                }
                .into(),
                other => other,
            })?;

        log::debug!("created {:?} pipeline for pass {}", format, self.label);
        self.pipelines.insert(format, pipeline);
        Ok(())
    }
}

fn create_module(ctx: &RenderContext, bundle: &Path, stage: Stage, module: naga::Module) -> Result<wgpu::ShaderModule> {
    ctx.scoped("create shader module", || {
        Ok(ctx.device().create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{} ({})", bundle.display(), stage)),
            source: wgpu::ShaderSource::Naga(std::borrow::Cow::Owned(module)),
        }))
    })
    .map_err(|e| match e {
        Error::Validation { message, .. } => ConfigurationError::ShaderCompile {
            bundle: bundle.to_path_buf(),
            stage,
            message,
        }
        .into(),
        other => other,
    })
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn create_sampler(device: &wgpu::Device, label: &str, filter: wgpu::FilterMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_mode_serde() {
        assert_eq!(serde_json::to_string(&BlendMode::Alpha).unwrap(), "\"alpha\"");
        let mode: BlendMode = serde_json::from_str("\"replace\"").unwrap();
        assert_eq!(mode, BlendMode::Replace);
        assert!(serde_json::from_str::<BlendMode>("\"additive\"").is_err());
    }

    #[test]
    fn test_blend_states() {
        assert_eq!(BlendMode::default().state(), wgpu::BlendState::REPLACE);
        assert_eq!(BlendMode::Alpha.state(), wgpu::BlendState::ALPHA_BLENDING);
    }

    #[test]
    fn test_default_options() {
        let options = PassOptions::default();
        assert_eq!(options.screen_size, UVec2::new(1920, 1080));
        assert_eq!(options.blend, BlendMode::Replace);
    }

    #[test]
    fn test_geometry_selection() {
        assert_eq!(Geometry::full_screen(false), Geometry::Standard);
        assert_eq!(Geometry::full_screen(true), Geometry::Flipped);
    }
}
