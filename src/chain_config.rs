//! JSON description of a shader chain.
//!
//! ```json
//! {
//!   "width": 1280,
//!   "height": 720,
//!   "passes": [
//!     { "bundle": "shaders/tint", "params": { "color": [1.0, 0.8, 0.6], "darkness_mult": 0.9 } },
//!     { "bundle": "shaders/crt", "blend": "alpha", "time": "u_time" }
//!   ]
//! }
//! ```
//!
//! Relative paths are resolved against the directory holding the config file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glam::UVec2;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, Result};
use crate::gpu::chainer::Chainer;
use crate::gpu::context::RenderContext;
use crate::gpu::pass::{BlendMode, Pass, PassOptions};
use crate::gpu::reflect::{self, ShaderInterface};
use crate::gpu::texture::AuxTexture;
use crate::params::{PassParams, UniformValue};
use crate::shader_source::ShaderLoader;

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// Output width in pixels.
    #[serde(default = "default_width")]
    pub width: u32,

    /// Output height in pixels.
    #[serde(default = "default_height")]
    pub height: u32,

    /// Bundle supplying stages a pass's own bundle lacks. The built-in
    /// pass-through shaders when absent.
    #[serde(default)]
    pub default_bundle: Option<PathBuf>,

    pub passes: Vec<PassConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassConfig {
    pub bundle: PathBuf,

    #[serde(default)]
    pub blend: BlendMode,

    #[serde(default)]
    pub params: BTreeMap<String, ParamConfig>,

    /// Uniform fed with the elapsed time in seconds on every frame.
    #[serde(default)]
    pub time: Option<String>,
}

/// A parameter value as written in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamConfig {
    Number(f32),
    /// 2, 3 or 4 components, or 16 for a column-major 4x4 matrix.
    Vector(Vec<f32>),
    Texture { texture: PathBuf },
}

impl ParamConfig {
    /// The uniform value this parameter denotes, `None` for textures.
    pub fn to_uniform(&self) -> std::result::Result<Option<UniformValue>, ConfigurationError> {
        let value = match self {
            ParamConfig::Number(v) => UniformValue::Float(*v),
            ParamConfig::Vector(v) => match v.len() {
                2 => UniformValue::Vec2([v[0], v[1]]),
                3 => UniformValue::Vec3([v[0], v[1], v[2]]),
                4 => UniformValue::Vec4([v[0], v[1], v[2], v[3]]),
                16 => UniformValue::Mat4(glam::Mat4::from_cols_slice(v).to_cols_array_2d()),
                n => {
                    return Err(ConfigurationError::InvalidConfig(format!(
                        "vector parameters need 2, 3, 4 or 16 components, got {}",
                        n
                    )))
                }
            },
            ParamConfig::Texture { .. } => return Ok(None),
        };
        Ok(Some(value))
    }
}

impl ChainConfig {
    /// Read a config file and resolve its relative paths.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&text)?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ConfigurationError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Make relative bundle, default bundle and texture paths relative to `dir`.
    pub fn resolve_paths(&mut self, dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };

        if let Some(default_bundle) = self.default_bundle.as_mut() {
            resolve(default_bundle);
        }
        for pass in &mut self.passes {
            resolve(&mut pass.bundle);
            for param in pass.params.values_mut() {
                if let ParamConfig::Texture { texture } = param {
                    resolve(texture);
                }
            }
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        if self.passes.is_empty() {
            return Err(ConfigurationError::EmptyChain);
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigurationError::InvalidConfig(
                "width and height must be positive".to_string(),
            ));
        }
        for (index, pass) in self.passes.iter().enumerate() {
            for (name, param) in &pass.params {
                param.to_uniform().map_err(|e| {
                    ConfigurationError::InvalidConfig(format!("pass {} parameter {:?}: {}", index, name, e))
                })?;
            }
        }
        Ok(())
    }

    pub fn screen_size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    pub fn loader(&self) -> ShaderLoader {
        match &self.default_bundle {
            Some(dir) => ShaderLoader::new(dir),
            None => ShaderLoader::embedded(),
        }
    }

    /// Compile every pass on the GPU and chain them.
    pub fn build(&self, ctx: &RenderContext) -> Result<Chainer> {
        let loader = self.loader();
        let passes = self
            .passes
            .iter()
            .map(|pass| {
                let options = PassOptions {
                    screen_size: self.screen_size(),
                    blend: pass.blend,
                };
                Pass::new(ctx, &loader, &pass.bundle, options)
            })
            .collect::<Result<Vec<_>>>()?;
        Chainer::new(ctx, passes, self.screen_size())
    }

    /// Load and reflect every bundle without touching a GPU.
    pub fn reflect(&self) -> Result<Vec<(PathBuf, ShaderInterface)>> {
        let loader = self.loader();
        self.passes
            .iter()
            .map(|pass| {
                let sources = loader.load(&pass.bundle)?;
                let compiled = reflect::compile(&sources)?;
                Ok((pass.bundle.clone(), compiled.interface))
            })
            .collect()
    }

    /// Decode texture parameters so frames can be parameterised cheaply.
    pub fn param_plan(&self) -> Result<ParamPlan> {
        let mut passes = Vec::with_capacity(self.passes.len());
        for pass in &self.passes {
            let mut values = Vec::with_capacity(pass.params.len());
            for (name, param) in &pass.params {
                let planned = match param {
                    ParamConfig::Texture { texture } => {
                        log::debug!("decoding texture parameter {:?} from {:?}", name, texture);
                        PlannedParam::Image(image::open(texture)?.to_rgba8())
                    }
                    other => PlannedParam::Config(other.clone()),
                };
                values.push((name.clone(), planned));
            }
            passes.push(PlannedPass {
                values,
                time: pass.time.clone(),
            });
        }
        Ok(ParamPlan { passes })
    }
}

#[derive(Debug)]
enum PlannedParam {
    Config(ParamConfig),
    Image(image::RgbaImage),
}

#[derive(Debug)]
struct PlannedPass {
    values: Vec<(String, PlannedParam)>,
    time: Option<String>,
}

/// Per-pass parameters of a config, ready to be turned into [`PassParams`] each frame.
#[derive(Debug)]
pub struct ParamPlan {
    passes: Vec<PlannedPass>,
}

impl ParamPlan {
    /// Parameter maps for one frame at `time` seconds. Texture parameters are
    /// uploaded afresh; each pass releases its copy after drawing.
    pub fn build(&self, ctx: &RenderContext, time: f32) -> Result<Vec<PassParams>> {
        self.passes
            .iter()
            .map(|pass| {
                let mut params = PassParams::new();
                for (name, planned) in &pass.values {
                    match planned {
                        PlannedParam::Config(config) => {
                            if let Some(value) = config.to_uniform()? {
                                params.set(name.clone(), value);
                            }
                        }
                        PlannedParam::Image(image) => {
                            params.set(name.clone(), AuxTexture::from_image(ctx, image)?);
                        }
                    }
                }
                if let Some(name) = &pass.time {
                    params.set(name.clone(), time);
                }
                Ok(params)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::fs;

    #[test]
    fn test_defaults() {
        let config = ChainConfig::from_json(r#"{ "passes": [ { "bundle": "a" } ] }"#).unwrap();
        assert_eq!(config.screen_size(), UVec2::new(1920, 1080));
        assert!(config.default_bundle.is_none());
        assert_eq!(config.passes[0].blend, BlendMode::Replace);
        assert!(config.passes[0].params.is_empty());
        assert!(config.passes[0].time.is_none());
    }

    #[test]
    fn test_param_shapes() {
        let config = ChainConfig::from_json(
            r#"{
                "width": 64,
                "height": 32,
                "defaultBundle": "defaults",
                "passes": [{
                    "bundle": "tint",
                    "blend": "alpha",
                    "time": "time",
                    "params": {
                        "darkness_mult": 0.5,
                        "color": [1.0, 0.5, 0.25],
                        "noise": { "texture": "noise.png" }
                    }
                }]
            }"#,
        )
        .unwrap();

        let pass = &config.passes[0];
        assert_eq!(pass.blend, BlendMode::Alpha);
        assert_eq!(pass.params["darkness_mult"], ParamConfig::Number(0.5));
        assert_eq!(pass.params["color"], ParamConfig::Vector(vec![1.0, 0.5, 0.25]));
        assert_eq!(
            pass.params["noise"],
            ParamConfig::Texture {
                texture: PathBuf::from("noise.png")
            }
        );
        match pass.params["color"].to_uniform() {
            Ok(Some(UniformValue::Vec3(v))) => assert_eq!(v, [1.0, 0.5, 0.25]),
            other => panic!("unexpected value: {:?}", other),
        }
        assert!(matches!(pass.params["noise"].to_uniform(), Ok(None)));
    }

    #[test]
    fn test_matrix_parameter_is_column_major() {
        let mut cols = [0.0f32; 16];
        cols[0] = 1.0;
        cols[5] = 1.0;
        cols[10] = 1.0;
        cols[15] = 1.0;
        cols[12] = 3.0; // x translation
        let value = ParamConfig::Vector(cols.to_vec()).to_uniform().unwrap();
        match value {
            Some(UniformValue::Mat4(m)) => assert_eq!(m[3], [3.0, 0.0, 0.0, 1.0]),
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn test_validation_errors() {
        let err = ChainConfig::from_json(r#"{ "passes": [] }"#).unwrap_err();
        assert!(matches!(err, Error::Configuration(ConfigurationError::EmptyChain)));

        let err = ChainConfig::from_json(r#"{ "width": 0, "passes": [ { "bundle": "a" } ] }"#).unwrap_err();
        assert!(matches!(err, Error::Configuration(ConfigurationError::InvalidConfig(_))));

        let err = ChainConfig::from_json(r#"{ "passes": [ { "bundle": "a", "params": { "v": [1.0, 2.0, 3.0, 4.0, 5.0] } } ] }"#)
            .unwrap_err();
        assert!(err.to_string().contains("\"v\""));

        let err = ChainConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, Error::Configuration(ConfigurationError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_file_resolves_relative_paths() {
        let dir = std::env::temp_dir().join(format!("shader-chain-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("chain.json");
        fs::write(
            &path,
            r#"{
                "defaultBundle": "defaults",
                "passes": [
                    { "bundle": "tint", "params": { "noise": { "texture": "noise.png" } } },
                    { "bundle": "/abs/crt" }
                ]
            }"#,
        )
        .unwrap();

        let config = ChainConfig::from_file(&path).unwrap();
        assert_eq!(config.default_bundle, Some(dir.join("defaults")));
        assert_eq!(config.passes[0].bundle, dir.join("tint"));
        assert_eq!(
            config.passes[0].params["noise"],
            ParamConfig::Texture {
                texture: dir.join("noise.png")
            }
        );
        assert_eq!(config.passes[1].bundle, PathBuf::from("/abs/crt"));
    }

    #[test]
    fn test_reflect_without_gpu() {
        let mut config = ChainConfig::from_json(
            r#"{ "passes": [ { "bundle": "does-not-exist" }, { "bundle": "shaders/tint" } ] }"#,
        )
        .unwrap();
        config.resolve_paths(Path::new(env!("CARGO_MANIFEST_DIR")));

        let interfaces = config.reflect().unwrap();
        assert_eq!(interfaces.len(), 2);
        assert!(interfaces[0].1.uniforms.is_none());
        let tint = interfaces[1].1.uniforms.as_ref().unwrap();
        assert!(tint.field("color").is_some());
        assert!(tint.field("darkness_mult").is_some());
    }

    #[test]
    fn test_demo_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/chain.json");
        let config = ChainConfig::from_file(&path).unwrap();
        assert_eq!(config.screen_size(), UVec2::new(1280, 720));

        let interfaces = config.reflect().unwrap();
        assert_eq!(interfaces.len(), 4);
        assert_eq!(interfaces[2].1.aux_binding("noise"), Some(0));

        let plan = config.param_plan().unwrap();
        assert_eq!(plan.len(), 4);
    }
}
