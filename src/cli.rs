use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glam::IVec2;
use std::path::{Path, PathBuf};

use crate::chain_config::ChainConfig;
use crate::gpu::chainer::PassInput;
use crate::gpu::context::RenderContext;
use crate::gpu::pass::Destination;
use crate::gpu::reflect::UniformKind;
use crate::gpu::target::RenderTarget;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an image through a chain and write the frames to disk
    Render {
        /// Chain config (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Input image
        #[arg(long)]
        input: PathBuf,

        /// Output directory for frames
        #[arg(long)]
        out: PathBuf,

        /// Number of frames to render
        #[arg(long, default_value_t = 1)]
        frames: u32,

        /// Frames per second, used to derive the time fed to `time` uniforms
        #[arg(long, default_value_t = 60.0)]
        fps: f32,
    },
    /// Print the parameters every pass of a chain accepts
    Inspect {
        /// Chain config (JSON)
        #[arg(long)]
        config: PathBuf,
    },
    /// Show a chain applied to an image in a window
    Preview {
        /// Chain config (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Input image
        #[arg(long)]
        input: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { config, input, out, frames, fps } => {
            render_offline(&config, &input, &out, frames, fps)?;
        }
        Commands::Inspect { config } => {
            inspect(&config)?;
        }
        Commands::Preview { config, input } => {
            let config = load_config(&config)?;
            let image = load_image(&input)?;
            crate::preview::run(config, image)?;
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<ChainConfig> {
    ChainConfig::from_file(path).with_context(|| format!("failed to load chain config {:?}", path))
}

fn load_image(path: &Path) -> Result<image::RgbaImage> {
    let image = image::open(path).with_context(|| format!("failed to open input image {:?}", path))?;
    Ok(image.to_rgba8())
}

fn render_offline(config_path: &Path, input: &Path, out_dir: &Path, frames: u32, fps: f32) -> Result<()> {
    if fps <= 0.0 {
        anyhow::bail!("FPS must be positive");
    }

    let config = load_config(config_path)?;
    let surface = load_image(input)?;
    std::fs::create_dir_all(out_dir)?;

    let ctx = pollster::block_on(RenderContext::headless())?;
    let mut chain = config.build(&ctx).context("failed to build chain")?;
    let plan = config.param_plan()?;
    let target = RenderTarget::new(&ctx, config.screen_size(), "Output Target")?;

    println!("Rendering {} frame(s) to {:?}...", frames, out_dir);

    for i in 0..frames {
        let time = i as f32 / fps;
        target.clear(&ctx)?;

        let params = plan.build(&ctx, time)?;
        chain
            .render(
                &ctx,
                PassInput::Surface {
                    surface: &surface,
                    top_left: IVec2::ZERO,
                },
                Destination::Target(&target),
                Some(params),
            )
            .with_context(|| format!("frame {} failed", i))?;

        let pixels = target.read_pixels(&ctx)?;
        let path = out_dir.join(format!("frame_{:05}.png", i));
        pixels
            .save(&path)
            .with_context(|| format!("failed to write {:?}", path))?;

        if i % 60 == 0 {
            println!("Rendered frame {}/{}", i, frames);
        }
    }

    log::debug!("{} transient(s) alive after rendering", ctx.live_transients());
    println!("Done.");
    Ok(())
}

fn inspect(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    println!("{}x{}, {} pass(es)", config.width, config.height, config.passes.len());

    for (index, (bundle, interface)) in config.reflect()?.into_iter().enumerate() {
        println!("[{}] {:?}", index, bundle);
        match &interface.uniforms {
            Some(layout) => {
                let mut fields: Vec<_> = layout.fields.iter().collect();
                fields.sort_by_key(|(_, field)| field.offset);
                for (name, field) in fields {
                    let kind = match field.kind {
                        UniformKind::Other => "(not settable)".to_string(),
                        kind => format!("{:?}", kind).to_lowercase(),
                    };
                    println!("    {:<24} {:<16} offset {}", name, kind, field.offset);
                }
            }
            None => println!("    (no uniforms)"),
        }
        for slot in &interface.aux_textures {
            println!("    {:<24} {:<16} binding {}", slot.name, "texture", slot.binding);
        }
    }
    Ok(())
}
