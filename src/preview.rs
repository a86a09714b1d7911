//! Windowed preview of a chain.
//!
//! The chain runs every frame on the input image and its last pass draws
//! straight into the window's swapchain texture.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use glam::IVec2;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::EventLoop;
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowBuilder};

use crate::chain_config::{ChainConfig, ParamPlan};
use crate::gpu::chainer::{Chainer, PassInput};
use crate::gpu::context::RenderContext;
use crate::gpu::pass::Destination;

struct Preview {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    ctx: RenderContext,
    chain: Chainer,
    plan: ParamPlan,
    image: image::RgbaImage,
    started: Instant,
}

impl Preview {
    fn resize(&mut self, size: PhysicalSize<u32>) {
        self.surface_config.width = size.width.max(1);
        self.surface_config.height = size.height.max(1);
        self.surface.configure(self.ctx.device(), &self.surface_config);
    }

    fn frame(&mut self) -> Result<()> {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.resize(self.window.inner_size());
                return Ok(());
            }
            Err(e) => return Err(e).context("failed to acquire swapchain texture"),
        };
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());

        clear_view(&self.ctx, &view)?;
        let params = self.plan.build(&self.ctx, self.started.elapsed().as_secs_f32())?;
        self.chain.render(
            &self.ctx,
            PassInput::Surface {
                surface: &self.image,
                top_left: IVec2::ZERO,
            },
            Destination::Screen {
                view: &view,
                format: self.surface_config.format,
            },
            Some(params),
        )?;

        // A failed frame returns above and is dropped without being presented.
        frame.present();
        Ok(())
    }
}

fn clear_view(ctx: &RenderContext, view: &wgpu::TextureView) -> crate::error::Result<()> {
    ctx.scoped("clear swapchain texture", || {
        let mut encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Preview Clear Encoder"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Preview Clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
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
        ctx.queue().submit(Some(encoder.finish()));
        Ok(())
    })
}

/// Open a window and run `config` on `image` until it is closed.
pub fn run(config: ChainConfig, image: image::RgbaImage) -> Result<()> {
    let event_loop = EventLoop::new().context("failed to create event loop")?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("shader-chain preview")
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .build(&event_loop)
            .context("failed to create window")?,
    );

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let surface = instance
        .create_surface(Arc::clone(&window))
        .context("failed to create window surface")?;
    let ctx = pollster::block_on(RenderContext::for_surface(&instance, Some(&surface)))?;

    let adapter = ctx.adapter().context("context has no adapter")?;
    let caps = surface.get_capabilities(adapter);
    let format = caps
        .formats
        .iter()
        .copied()
        .find(|f| !f.is_srgb())
        .or_else(|| caps.formats.first().copied())
        .context("window surface reports no formats")?;
    let size = window.inner_size();
    let surface_config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode: wgpu::PresentMode::Fifo,
        alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    surface.configure(ctx.device(), &surface_config);
    log::info!("presenting as {:?} at {}x{}", format, surface_config.width, surface_config.height);

    let chain = config.build(&ctx).context("failed to build chain")?;
    let plan = config.param_plan()?;

    let mut preview = Preview {
        window,
        surface,
        surface_config,
        ctx,
        chain,
        plan,
        image,
        started: Instant::now(),
    };

    event_loop
        .run(move |event, elwt| match event {
            Event::WindowEvent { event, window_id } if window_id == preview.window.id() => match event {
                WindowEvent::CloseRequested
                | WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            physical_key: PhysicalKey::Code(KeyCode::Escape),
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                } => elwt.exit(),
                WindowEvent::Resized(size) => preview.resize(size),
                WindowEvent::RedrawRequested => {
                    if let Err(e) = preview.frame() {
                        log::error!("skipping frame: {:#}", e);
                    }
                }
                _ => {}
            },
            Event::AboutToWait => preview.window.request_redraw(),
            _ => {}
        })
        .context("event loop terminated with error")?;

    Ok(())
}
