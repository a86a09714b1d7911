//! Shader compilation and reflection.
//!
//! Shaders are Vulkan-flavoured GLSL parsed by naga. The parsed modules are
//! handed to wgpu as-is and also walked to build the pass's uniform
//! namespace. Resource bindings follow a fixed convention:
//!
//! | set | binding | resource |
//! |-----|---------|----------|
//! | 0   | 0       | `texture2D tex`, the primary input |
//! | 0   | 1       | primary `sampler` |
//! | 1   | 0       | optional uniform block; member names are parameter names |
//! | 2   | any     | auxiliary `texture2D`s plus at most one `sampler` |

use std::collections::BTreeMap;
use std::path::Path;

use naga::{AddressSpace, ImageClass, ImageDimension, Module, ResourceBinding, Scalar, ScalarKind, TypeInner, VectorSize};

use crate::error::{ConfigurationError, Stage};
use crate::shader_source::ShaderSources;

pub const PRIMARY_GROUP: u32 = 0;
pub const UNIFORM_GROUP: u32 = 1;
pub const AUX_GROUP: u32 = 2;

pub const PRIMARY_TEXTURE_BINDING: u32 = 0;
pub const PRIMARY_SAMPLER_BINDING: u32 = 1;
pub const UNIFORM_BINDING: u32 = 0;

/// Name of the primary input texture every fragment shader must declare.
pub const PRIMARY_TEXTURE_NAME: &str = "tex";

/// Entry point name of GLSL stages.
pub const ENTRY_POINT: &str = "main";

/// Types a uniform block member can be written with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    /// Declared, but not settable from a parameter map (ints, arrays, ...).
    Other,
}

impl UniformKind {
    pub fn byte_size(self) -> usize {
        match self {
            UniformKind::Float => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 => 12,
            UniformKind::Vec4 => 16,
            UniformKind::Mat4 => 64,
            UniformKind::Other => 0,
        }
    }

    fn from_type(inner: &TypeInner) -> Self {
        match *inner {
            TypeInner::Scalar(scalar) if scalar == Scalar::F32 => UniformKind::Float,
            TypeInner::Vector { size, scalar } if scalar == Scalar::F32 => match size {
                VectorSize::Bi => UniformKind::Vec2,
                VectorSize::Tri => UniformKind::Vec3,
                VectorSize::Quad => UniformKind::Vec4,
            },
            TypeInner::Matrix {
                columns: VectorSize::Quad,
                rows: VectorSize::Quad,
                scalar,
            } if scalar == Scalar::F32 => UniformKind::Mat4,
            _ => UniformKind::Other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformField {
    pub offset: u32,
    pub kind: UniformKind,
}

/// Layout of the set 1 uniform block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UniformLayout {
    /// Block size in bytes, as declared.
    pub size: u32,
    pub fields: BTreeMap<String, UniformField>,
}

impl UniformLayout {
    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.fields.get(name)
    }

    /// Buffer size: the block size rounded up to 16 bytes.
    pub fn buffer_size(&self) -> u64 {
        (self.size.max(16) as u64).div_ceil(16) * 16
    }

    fn merge(&mut self, other: UniformLayout, bundle: &Path) -> Result<(), ConfigurationError> {
        for (name, field) in other.fields {
            match self.fields.get(&name) {
                Some(existing) if *existing != field => {
                    return Err(ConfigurationError::UnsupportedBinding {
                        bundle: bundle.to_path_buf(),
                        name,
                        reason: "uniform block member differs between vertex and fragment stage".to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    self.fields.insert(name, field);
                }
            }
        }
        self.size = self.size.max(other.size);
        Ok(())
    }
}

/// Auxiliary texture slot in set 2.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuxTextureSlot {
    pub name: String,
    pub binding: u32,
}

/// Resources declared by a vertex+fragment pair.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShaderInterface {
    pub uniforms: Option<UniformLayout>,
    pub aux_textures: Vec<AuxTextureSlot>,
    pub aux_sampler: Option<u32>,
    has_primary_texture: bool,
}

impl ShaderInterface {
    pub fn aux_binding(&self, name: &str) -> Option<u32> {
        self.aux_textures
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.binding)
    }

    fn merge(&mut self, other: ShaderInterface, bundle: &Path) -> Result<(), ConfigurationError> {
        if let Some(theirs) = other.uniforms {
            match self.uniforms.as_mut() {
                Some(mine) => mine.merge(theirs, bundle)?,
                None => self.uniforms = Some(theirs),
            }
        }

        for slot in other.aux_textures {
            match self.aux_textures.iter().find(|s| s.binding == slot.binding) {
                Some(existing) if existing.name != slot.name => {
                    return Err(unsupported(bundle, &slot.name, "set 2 binding is declared with different names per stage"));
                }
                Some(_) => {}
                None => self.aux_textures.push(slot),
            }
        }
        self.aux_textures.sort_by_key(|slot| slot.binding);

        match (self.aux_sampler, other.aux_sampler) {
            (Some(a), Some(b)) if a != b => {
                return Err(unsupported(bundle, "sampler", "only one set 2 sampler is supported"));
            }
            (None, theirs) => self.aux_sampler = theirs,
            _ => {}
        }

        self.has_primary_texture |= other.has_primary_texture;
        Ok(())
    }
}

/// Parsed modules of one pass plus their merged interface.
#[derive(Debug)]
pub struct CompiledShaders {
    pub vertex: Module,
    pub fragment: Module,
    pub interface: ShaderInterface,
}

/// Parse, validate and reflect both stages of `sources`.
pub fn compile(sources: &ShaderSources) -> Result<CompiledShaders, ConfigurationError> {
    let bundle = sources.bundle.as_path();

    let vertex = parse(bundle, Stage::Vertex, &sources.vertex)?;
    let fragment = parse(bundle, Stage::Fragment, &sources.fragment)?;

    let mut interface = reflect(bundle, &vertex, false)?;
    let fragment_interface = reflect(bundle, &fragment, true)?;
    if !fragment_interface.has_primary_texture {
        return Err(ConfigurationError::MissingPrimaryTexture {
            bundle: bundle.to_path_buf(),
        });
    }
    interface.merge(fragment_interface, bundle)?;

    Ok(CompiledShaders {
        vertex,
        fragment,
        interface,
    })
}

fn parse(bundle: &Path, stage: Stage, source: &str) -> Result<Module, ConfigurationError> {
    let compile_error = |message: String| ConfigurationError::ShaderCompile {
        bundle: bundle.to_path_buf(),
        stage,
        message,
    };

    let mut frontend = naga::front::glsl::Frontend::default();
    let module = frontend
        .parse(&naga::front::glsl::Options::from(stage.naga_stage()), source)
        .map_err(|e| compile_error(e.to_string()))?;

    naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::empty())
        .validate(&module)
        .map_err(|e| compile_error(e.as_inner().to_string()))?;

    Ok(module)
}

fn unsupported(bundle: &Path, name: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::UnsupportedBinding {
        bundle: bundle.to_path_buf(),
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn is_sampled_2d(inner: &TypeInner) -> bool {
    matches!(
        *inner,
        TypeInner::Image {
            dim: ImageDimension::D2,
            arrayed: false,
            class: ImageClass::Sampled {
                kind: ScalarKind::Float,
                multi: false,
            },
        }
    )
}

fn is_filtering_sampler(inner: &TypeInner) -> bool {
    matches!(*inner, TypeInner::Sampler { comparison: false })
}

fn reflect(bundle: &Path, module: &Module, is_fragment: bool) -> Result<ShaderInterface, ConfigurationError> {
    let mut interface = ShaderInterface::default();

    for (_, var) in module.global_variables.iter() {
        let Some(ResourceBinding { group, binding }) = var.binding.clone() else {
            continue;
        };
        let name = var.name.clone().unwrap_or_default();
        let inner = &module.types[var.ty].inner;

        match (group, binding) {
            (PRIMARY_GROUP, PRIMARY_TEXTURE_BINDING) => {
                if name != PRIMARY_TEXTURE_NAME || !is_sampled_2d(inner) {
                    return Err(unsupported(bundle, &name, "set 0 binding 0 is reserved for `texture2D tex`"));
                }
                interface.has_primary_texture = true;
            }
            (PRIMARY_GROUP, PRIMARY_SAMPLER_BINDING) => {
                if !is_filtering_sampler(inner) {
                    return Err(unsupported(bundle, &name, "set 0 binding 1 is reserved for the primary sampler"));
                }
            }
            (PRIMARY_GROUP, _) => {
                return Err(unsupported(bundle, &name, "set 0 only holds `tex` and its sampler"));
            }
            (UNIFORM_GROUP, UNIFORM_BINDING) => {
                let TypeInner::Struct { ref members, span } = *inner else {
                    return Err(unsupported(bundle, &name, "set 1 binding 0 must be a uniform block"));
                };
                if var.space != AddressSpace::Uniform {
                    return Err(unsupported(bundle, &name, "set 1 binding 0 must be a uniform block"));
                }

                let fields = members
                    .iter()
                    .filter_map(|member| {
                        let member_name = member.name.clone()?;
                        let kind = UniformKind::from_type(&module.types[member.ty].inner);
                        Some((member_name, UniformField { offset: member.offset, kind }))
                    })
                    .collect();
                interface.uniforms = Some(UniformLayout { size: span, fields });
            }
            (UNIFORM_GROUP, _) => {
                return Err(unsupported(bundle, &name, "set 1 only holds one uniform block at binding 0"));
            }
            (AUX_GROUP, _) if is_sampled_2d(inner) => {
                interface.aux_textures.push(AuxTextureSlot { name, binding });
            }
            (AUX_GROUP, _) if is_filtering_sampler(inner) => {
                if interface.aux_sampler.replace(binding).is_some() {
                    return Err(unsupported(bundle, &name, "only one set 2 sampler is supported"));
                }
            }
            (AUX_GROUP, _) => {
                return Err(unsupported(bundle, &name, "set 2 holds only `texture2D`s and one sampler"));
            }
            _ => {
                return Err(unsupported(bundle, &name, "only sets 0, 1 and 2 are used"));
            }
        }
    }

    if !is_fragment {
        // `tex` is only required of the fragment stage.
        interface.has_primary_texture = false;
    }
    interface.aux_textures.sort_by_key(|slot| slot.binding);
    Ok(interface)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = include_str!("../../shaders/pass_through/vertex_shader.glsl");

    fn sources(fragment: &str) -> ShaderSources {
        ShaderSources::new("test-bundle", VS, fragment.to_string())
    }

    #[test]
    fn test_pass_through_has_no_parameters() {
        let compiled = compile(&ShaderSources::pass_through()).unwrap();
        assert!(compiled.interface.uniforms.is_none());
        assert!(compiled.interface.aux_textures.is_empty());
        assert_eq!(compiled.interface.aux_sampler, None);
    }

    #[test]
    fn test_uniform_block_offsets() {
        let fs = r#"#version 450
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 f_color;
layout(set = 0, binding = 0) uniform texture2D tex;
layout(set = 0, binding = 1) uniform sampler tex_sampler;
layout(set = 1, binding = 0) uniform Params {
    float time;
    vec3 color;
    vec2 offset;
    mat4 transform;
    int mode;
};
void main() {
    vec4 c = texture(sampler2D(tex, tex_sampler), uv + offset);
    f_color = transform * vec4(c.rgb * color * time, float(mode));
}
"#;
        let compiled = compile(&sources(fs)).unwrap();
        let layout = compiled.interface.uniforms.unwrap();

        assert_eq!(layout.field("time"), Some(&UniformField { offset: 0, kind: UniformKind::Float }));
        assert_eq!(layout.field("color"), Some(&UniformField { offset: 16, kind: UniformKind::Vec3 }));
        assert_eq!(layout.field("offset"), Some(&UniformField { offset: 32, kind: UniformKind::Vec2 }));
        assert_eq!(layout.field("transform"), Some(&UniformField { offset: 48, kind: UniformKind::Mat4 }));
        assert_eq!(layout.field("mode").map(|f| f.kind), Some(UniformKind::Other));
        assert!(layout.field("missing").is_none());
        assert_eq!(layout.buffer_size() % 16, 0);
        assert!(layout.buffer_size() >= 116);
    }

    #[test]
    fn test_aux_textures_are_reflected() {
        let compiled = compile(&ShaderSources::new(
            "noise_overlay",
            include_str!("../../shaders/noise_overlay/vertex_shader.glsl"),
            include_str!("../../shaders/noise_overlay/fragment_shader.glsl"),
        ))
        .unwrap();

        let interface = compiled.interface;
        assert_eq!(interface.aux_binding("noise"), Some(0));
        assert_eq!(interface.aux_sampler, Some(1));
        let layout = interface.uniforms.unwrap();
        assert_eq!(layout.field("u_transform").map(|f| f.kind), Some(UniformKind::Mat4));
        assert_eq!(layout.field("time").map(|f| f.offset), Some(64));
    }

    #[test]
    fn test_missing_primary_texture() {
        let fs = r#"#version 450
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 f_color;
void main() {
    f_color = vec4(uv, 0.0, 1.0);
}
"#;
        let err = compile(&sources(fs)).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingPrimaryTexture { .. }));
    }

    #[test]
    fn test_wrongly_named_primary_texture() {
        let fs = r#"#version 450
layout(location = 0) in vec2 uv;
layout(location = 0) out vec4 f_color;
layout(set = 0, binding = 0) uniform texture2D u_texture;
layout(set = 0, binding = 1) uniform sampler s;
void main() {
    f_color = texture(sampler2D(u_texture, s), uv);
}
"#;
        let err = compile(&sources(fs)).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnsupportedBinding { ref name, .. } if name == "u_texture"));
    }

    #[test]
    fn test_syntax_error_reports_stage() {
        let err = compile(&sources("#version 450\nvoid main( {")).unwrap_err();
        match err {
            ConfigurationError::ShaderCompile { stage, .. } => assert_eq!(stage, Stage::Fragment),
            other => panic!("unexpected error: {}", other),
        }
    }
}
