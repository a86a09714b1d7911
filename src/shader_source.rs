//! Shader bundle loading.
//!
//! A bundle is a directory holding `vertex_shader.glsl` and
//! `fragment_shader.glsl`. Each stage missing from a bundle falls back to the
//! default bundle; a stage missing from both is a configuration error.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::error::{ConfigurationError, Error, Result, Stage};

const PASS_THROUGH_VERTEX: &str = include_str!("../shaders/pass_through/vertex_shader.glsl");
const PASS_THROUGH_FRAGMENT: &str = include_str!("../shaders/pass_through/fragment_shader.glsl");

/// Vertex and fragment source text of one pass.
#[derive(Clone, Debug)]
pub struct ShaderSources {
    /// Bundle the sources were resolved for; used in error messages.
    pub bundle: PathBuf,
    pub vertex: Cow<'static, str>,
    pub fragment: Cow<'static, str>,
}

impl ShaderSources {
    /// The built-in pass-through pair.
    pub fn pass_through() -> Self {
        Self {
            bundle: PathBuf::from("<pass-through>"),
            vertex: Cow::Borrowed(PASS_THROUGH_VERTEX),
            fragment: Cow::Borrowed(PASS_THROUGH_FRAGMENT),
        }
    }

    pub fn new(
        bundle: impl Into<PathBuf>,
        vertex: impl Into<Cow<'static, str>>,
        fragment: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            bundle: bundle.into(),
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }

    pub fn stage(&self, stage: Stage) -> &str {
        match stage {
            Stage::Vertex => &self.vertex,
            Stage::Fragment => &self.fragment,
        }
    }
}

#[derive(Clone, Debug)]
enum DefaultBundle {
    Embedded,
    Directory(PathBuf),
}

/// Resolves bundle directories to shader sources.
#[derive(Clone, Debug)]
pub struct ShaderLoader {
    default_bundle: DefaultBundle,
}

impl Default for ShaderLoader {
    fn default() -> Self {
        Self::embedded()
    }
}

impl ShaderLoader {
    /// Loader whose default bundle is a directory on disk.
    pub fn new(default_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_bundle: DefaultBundle::Directory(default_dir.into()),
        }
    }

    /// Loader falling back to the built-in pass-through shaders.
    pub fn embedded() -> Self {
        Self {
            default_bundle: DefaultBundle::Embedded,
        }
    }

    pub fn load(&self, bundle: impl AsRef<Path>) -> Result<ShaderSources> {
        let bundle = bundle.as_ref();
        let vertex = self.load_stage(bundle, Stage::Vertex)?;
        let fragment = self.load_stage(bundle, Stage::Fragment)?;
        Ok(ShaderSources {
            bundle: bundle.to_path_buf(),
            vertex,
            fragment,
        })
    }

    fn load_stage(&self, bundle: &Path, stage: Stage) -> Result<Cow<'static, str>> {
        if let Some(source) = read_if_present(&bundle.join(stage.file_name()))? {
            return Ok(Cow::Owned(source));
        }

        match &self.default_bundle {
            DefaultBundle::Embedded => {
                log::debug!("bundle {:?} has no {} shader, using pass-through", bundle, stage);
                Ok(Cow::Borrowed(pass_through_stage(stage)))
            }
            DefaultBundle::Directory(dir) => {
                let fallback = dir.join(stage.file_name());
                match read_if_present(&fallback)? {
                    Some(source) => {
                        log::debug!("bundle {:?} has no {} shader, using {:?}", bundle, stage, fallback);
                        Ok(Cow::Owned(source))
                    }
                    None => Err(ConfigurationError::MissingShaderSource {
                        bundle: bundle.to_path_buf(),
                        stage,
                    }
                    .into()),
                }
            }
        }
    }
}

fn pass_through_stage(stage: Stage) -> &'static str {
    match stage {
        Stage::Vertex => PASS_THROUGH_VERTEX,
        Stage::Fragment => PASS_THROUGH_FRAGMENT,
    }
}

fn read_if_present(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(source) => Ok(Some(source)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("shader-chain-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_bundle_sources_are_used() {
        let dir = scratch_dir("bundle");
        fs::write(dir.join("vertex_shader.glsl"), "// vs").unwrap();
        fs::write(dir.join("fragment_shader.glsl"), "// fs").unwrap();

        let sources = ShaderLoader::embedded().load(&dir).unwrap();
        assert_eq!(sources.vertex, "// vs");
        assert_eq!(sources.fragment, "// fs");
        assert_eq!(sources.bundle, dir);
    }

    #[test]
    fn test_missing_stage_falls_back_to_embedded() {
        let dir = scratch_dir("partial");
        fs::write(dir.join("fragment_shader.glsl"), "// fs").unwrap();

        let sources = ShaderLoader::embedded().load(&dir).unwrap();
        assert_eq!(sources.vertex, PASS_THROUGH_VERTEX);
        assert_eq!(sources.fragment, "// fs");
    }

    #[test]
    fn test_missing_stage_falls_back_to_default_dir() {
        let default = scratch_dir("default");
        fs::write(default.join("vertex_shader.glsl"), "// default vs").unwrap();
        fs::write(default.join("fragment_shader.glsl"), "// default fs").unwrap();
        let bundle = scratch_dir("empty");

        let sources = ShaderLoader::new(&default).load(&bundle).unwrap();
        assert_eq!(sources.vertex, "// default vs");
        assert_eq!(sources.fragment, "// default fs");
    }

    #[test]
    fn test_missing_everywhere_names_the_stage() {
        let default = scratch_dir("default-vs-only");
        fs::write(default.join("vertex_shader.glsl"), "// default vs").unwrap();
        let bundle = scratch_dir("nothing");

        let err = ShaderLoader::new(&default).load(&bundle).unwrap_err();
        match err {
            Error::Configuration(ConfigurationError::MissingShaderSource { stage, bundle: b }) => {
                assert_eq!(stage, Stage::Fragment);
                assert_eq!(b, bundle);
            }
            other => panic!("unexpected error: {}", other),
        }

        let err = ShaderLoader::new(bundle.join("missing-default")).load(&bundle).unwrap_err();
        assert!(err.to_string().contains("vertex"));
    }
}
