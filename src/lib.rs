pub mod error;
pub mod gpu;
pub mod shader_source;
pub mod params;
pub mod surface;
pub mod chain_config;

pub mod cli;
pub mod preview;

pub use chain_config::ChainConfig;
pub use error::{ConfigurationError, Error, Result, Stage};
pub use gpu::chainer::{Chainer, PassInput};
pub use gpu::context::RenderContext;
pub use gpu::pass::{BlendMode, Destination, Pass, PassOptions};
pub use gpu::target::RenderTarget;
pub use gpu::texture::AuxTexture;
pub use params::{PassParams, UniformValue};
pub use shader_source::{ShaderLoader, ShaderSources};
