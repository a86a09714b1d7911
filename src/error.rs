//! Error types for the shader chain.
//!
//! Construction problems (missing or broken shader bundles, empty chains, bad
//! configs) are [`ConfigurationError`]s and are never retried. GPU failures while
//! drawing surface as [`Error::Resource`] or [`Error::Validation`] and abort the
//! current frame.

use std::fmt;
use std::path::PathBuf;

/// Shader stage of a bundle file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    /// File name of this stage inside a shader bundle directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Stage::Vertex => "vertex_shader.glsl",
            Stage::Fragment => "fragment_shader.glsl",
        }
    }

    pub(crate) fn naga_stage(self) -> naga::ShaderStage {
        match self {
            Stage::Vertex => naga::ShaderStage::Vertex,
            Stage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Vertex => f.write_str("vertex"),
            Stage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Fatal setup errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("required {stage} shader source not found for bundle {bundle:?} (and no default to fall back to)")]
    MissingShaderSource { bundle: PathBuf, stage: Stage },

    #[error("failed to compile {stage} shader of bundle {bundle:?}: {message}")]
    ShaderCompile {
        bundle: PathBuf,
        stage: Stage,
        message: String,
    },

    #[error("fragment shader of bundle {bundle:?} does not declare `texture2D tex` at set 0, binding 0")]
    MissingPrimaryTexture { bundle: PathBuf },

    #[error("unsupported shader resource `{name}` in bundle {bundle:?}: {reason}")]
    UnsupportedBinding {
        bundle: PathBuf,
        name: String,
        reason: String,
    },

    #[error("failed to create render pipeline for bundle {bundle:?}: {message}")]
    PipelineLink { bundle: PathBuf, message: String },

    #[error("a shader chain needs at least one pass")]
    EmptyChain,

    #[error("invalid chain config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// GPU allocation failure. Not retried.
    #[error("GPU resource error during {context}: {message}")]
    Resource { context: String, message: String },

    #[error("GPU validation error during {context}: {message}")]
    Validation { context: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Map an error captured by a wgpu error scope.
    pub(crate) fn from_wgpu(context: impl Into<String>, error: wgpu::Error) -> Self {
        let context = context.into();
        match error {
            wgpu::Error::OutOfMemory { .. } => Error::Resource {
                context,
                message: error.to_string(),
            },
            other => Error::Validation {
                context,
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
