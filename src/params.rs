//! Per-pass parameter maps.
//!
//! A parameter map binds uniform block members by name and auxiliary
//! textures by the name of their `texture2D` declaration. Names a shader does
//! not declare are ignored: passes in one chain accept different parameters.

use std::collections::HashMap;

use crate::gpu::reflect::{UniformKind, UniformLayout};
use crate::gpu::texture::AuxTexture;

/// Value of one named pass parameter.
#[derive(Debug)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    /// Column-major 4x4 matrix.
    Mat4([[f32; 4]; 4]),
    /// Auxiliary texture; the pass takes ownership and releases it after the draw.
    Texture(AuxTexture),
}

impl UniformValue {
    /// Uniform kind this value can be written to, `None` for textures.
    pub fn kind(&self) -> Option<UniformKind> {
        match self {
            UniformValue::Float(_) => Some(UniformKind::Float),
            UniformValue::Vec2(_) => Some(UniformKind::Vec2),
            UniformValue::Vec3(_) => Some(UniformKind::Vec3),
            UniformValue::Vec4(_) => Some(UniformKind::Vec4),
            UniformValue::Mat4(_) => Some(UniformKind::Mat4),
            UniformValue::Texture(_) => None,
        }
    }

    /// Convert to bytes for GPU upload.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Float(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Vec2(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Vec3(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Vec4(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Mat4(m) => bytemuck::cast_slice(m).to_vec(),
            UniformValue::Texture(_) => Vec::new(),
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(v: [f32; 2]) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<glam::Vec2> for UniformValue {
    fn from(v: glam::Vec2) -> Self {
        UniformValue::Vec2(v.to_array())
    }
}

impl From<glam::Vec3> for UniformValue {
    fn from(v: glam::Vec3) -> Self {
        UniformValue::Vec3(v.to_array())
    }
}

impl From<glam::Vec4> for UniformValue {
    fn from(v: glam::Vec4) -> Self {
        UniformValue::Vec4(v.to_array())
    }
}

impl From<glam::Mat4> for UniformValue {
    fn from(m: glam::Mat4) -> Self {
        UniformValue::Mat4(m.to_cols_array_2d())
    }
}

impl From<AuxTexture> for UniformValue {
    fn from(t: AuxTexture) -> Self {
        UniformValue::Texture(t)
    }
}

/// Named parameters for one pass invocation.
#[derive(Debug, Default)]
pub struct PassParams {
    values: HashMap<String, UniformValue>,
}

impl PassParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<UniformValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl IntoIterator for PassParams {
    type Item = (String, UniformValue);
    type IntoIter = std::collections::hash_map::IntoIter<String, UniformValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<K: Into<String>, V: Into<UniformValue>> FromIterator<(K, V)> for PassParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = PassParams::new();
        for (k, v) in iter {
            params.set(k, v);
        }
        params
    }
}

/// Normalise a per-pass parameter list to exactly `pass_count` entries.
///
/// Missing trailing entries become empty maps. Surplus entries have no pass
/// to go to and are dropped.
pub fn pad_params(params: Option<Vec<PassParams>>, pass_count: usize) -> Vec<PassParams> {
    let mut params = params.unwrap_or_default();
    if params.len() > pass_count {
        log::warn!(
            "{} parameter maps given for {} passes, ignoring the surplus",
            params.len(),
            pass_count
        );
        params.truncate(pass_count);
    }
    params.resize_with(pass_count, PassParams::default);
    params
}

/// Outcome of writing one value into a uniform shadow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Written,
    /// No member of that name; not an error.
    Unknown,
    Mismatch { expected: UniformKind },
}

/// CPU-side copy of a pass's uniform block.
///
/// Values persist between draws, so a parameter left out of a map keeps its
/// previous value.
#[derive(Clone, Debug)]
pub struct UniformShadow {
    layout: UniformLayout,
    data: Vec<u8>,
}

impl UniformShadow {
    /// Zeroed block, except 4x4 matrices which start as identity.
    pub fn new(layout: UniformLayout) -> Self {
        let mut shadow = Self {
            data: vec![0; layout.buffer_size() as usize],
            layout,
        };
        let identity = UniformValue::Mat4(glam::Mat4::IDENTITY.to_cols_array_2d());
        let matrices: Vec<String> = shadow
            .layout
            .fields
            .iter()
            .filter(|(_, f)| f.kind == UniformKind::Mat4)
            .map(|(name, _)| name.clone())
            .collect();
        for name in matrices {
            shadow.apply(&name, &identity);
        }
        shadow
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn apply(&mut self, name: &str, value: &UniformValue) -> Applied {
        let Some(field) = self.layout.field(name) else {
            return Applied::Unknown;
        };
        if value.kind() != Some(field.kind) {
            return Applied::Mismatch { expected: field.kind };
        }

        let bytes = value.to_bytes();
        let start = field.offset as usize;
        let end = start + bytes.len();
        if end > self.data.len() {
            return Applied::Mismatch { expected: field.kind };
        }
        self.data[start..end].copy_from_slice(&bytes);
        Applied::Written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::reflect::UniformField;
    use std::collections::BTreeMap;

    fn layout() -> UniformLayout {
        let mut fields = BTreeMap::new();
        fields.insert("time".to_string(), UniformField { offset: 0, kind: UniformKind::Float });
        fields.insert("color".to_string(), UniformField { offset: 16, kind: UniformKind::Vec3 });
        fields.insert("transform".to_string(), UniformField { offset: 32, kind: UniformKind::Mat4 });
        UniformLayout { size: 96, fields }
    }

    fn read_f32(bytes: &[u8], offset: usize) -> f32 {
        f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_pad_params_fills_missing_entries() {
        let params = pad_params(Some(vec![PassParams::new().with("time", 1.0f32)]), 3);
        assert_eq!(params.len(), 3);
        assert_eq!(params[0].len(), 1);
        assert!(params[1].is_empty());
        assert!(params[2].is_empty());
    }

    #[test]
    fn test_pad_params_none() {
        let params = pad_params(None, 2);
        assert_eq!(params.len(), 2);
        assert!(params.iter().all(PassParams::is_empty));
    }

    #[test]
    fn test_pad_params_never_below_pass_count() {
        for given in 0..6 {
            let list = (0..given).map(|_| PassParams::new()).collect();
            assert_eq!(pad_params(Some(list), 4).len(), 4);
        }
    }

    #[test]
    fn test_shadow_writes_at_offsets() {
        let mut shadow = UniformShadow::new(layout());
        assert_eq!(shadow.apply("time", &UniformValue::Float(2.5)), Applied::Written);
        assert_eq!(shadow.apply("color", &UniformValue::Vec3([0.25, 0.5, 0.75])), Applied::Written);

        let bytes = shadow.bytes();
        assert_eq!(read_f32(bytes, 0), 2.5);
        assert_eq!(read_f32(bytes, 16), 0.25);
        assert_eq!(read_f32(bytes, 20), 0.5);
        assert_eq!(read_f32(bytes, 24), 0.75);
    }

    #[test]
    fn test_shadow_matrices_start_as_identity() {
        let shadow = UniformShadow::new(layout());
        let bytes = shadow.bytes();
        assert_eq!(read_f32(bytes, 32), 1.0);
        assert_eq!(read_f32(bytes, 36), 0.0);
        assert_eq!(read_f32(bytes, 32 + 20), 1.0);
        assert_eq!(read_f32(bytes, 32 + 60), 1.0);
    }

    #[test]
    fn test_shadow_ignores_unknown_and_mismatched() {
        let mut shadow = UniformShadow::new(layout());
        let before = shadow.bytes().to_vec();

        assert_eq!(shadow.apply("nope", &UniformValue::Float(1.0)), Applied::Unknown);
        assert_eq!(
            shadow.apply("time", &UniformValue::Vec2([1.0, 2.0])),
            Applied::Mismatch { expected: UniformKind::Float }
        );
        assert_eq!(shadow.bytes(), &before[..]);
    }

    #[test]
    fn test_values_persist_between_applies() {
        let mut shadow = UniformShadow::new(layout());
        shadow.apply("time", &UniformValue::Float(4.0));
        shadow.apply("color", &UniformValue::Vec3([1.0, 1.0, 1.0]));
        assert_eq!(read_f32(shadow.bytes(), 0), 4.0);
    }

    #[test]
    fn test_from_iter() {
        let params: PassParams = [("a", 1.0f32), ("b", 2.0)].into_iter().collect();
        assert_eq!(params.len(), 2);
        assert!(matches!(params.get("b"), Some(UniformValue::Float(v)) if *v == 2.0));
    }
}
