//! Quad geometry shared by every pass.
//!
//! All passes draw one triangle strip of four vertices without an index
//! buffer; only the vertex data differs between the variants.

use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use wgpu::util::DeviceExt;

/// Primitive topology used for every quad.
pub const QUAD_TOPOLOGY: wgpu::PrimitiveTopology = wgpu::PrimitiveTopology::TriangleStrip;

/// Vertices per quad draw.
pub const QUAD_VERTEX_COUNT: u32 = 4;

/// Vertex for quad rendering.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

impl QuadVertex {
    const ATTRIBS: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

/// Four strip-ordered vertices: top-left, top-right, bottom-left, bottom-right.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Quad {
    pub vertices: [QuadVertex; 4],
}

impl Quad {
    pub fn create_buffer(&self, device: &wgpu::Device, label: &str) -> wgpu::Buffer {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&self.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        })
    }
}

/// Full-screen quad with the UV origin at the top-left corner of clip space.
pub fn standard_quad() -> Quad {
    Quad {
        vertices: [
            QuadVertex { position: [-1.0, 1.0], uv: [0.0, 0.0] },
            QuadVertex { position: [1.0, 1.0], uv: [1.0, 0.0] },
            QuadVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
            QuadVertex { position: [1.0, -1.0], uv: [1.0, 1.0] },
        ],
    }
}

/// Full-screen quad with the UV origin at the bottom-left corner of clip space.
pub fn flipped_quad() -> Quad {
    Quad {
        vertices: [
            QuadVertex { position: [-1.0, -1.0], uv: [0.0, 0.0] },
            QuadVertex { position: [1.0, -1.0], uv: [1.0, 0.0] },
            QuadVertex { position: [-1.0, 1.0], uv: [0.0, 1.0] },
            QuadVertex { position: [1.0, 1.0], uv: [1.0, 1.0] },
        ],
    }
}

/// Quad covering the pixel rectangle `[top_left, top_left + size)` of a screen.
///
/// Pixel Y grows downward and clip Y grows upward, hence the negated height.
pub fn placed_quad(top_left: Vec2, size: Vec2, screen_size: Vec2) -> Quad {
    let x = 2.0 * (top_left.x / screen_size.x - 0.5);
    let y = -2.0 * (top_left.y / screen_size.y - 0.5);
    let w = 2.0 * (size.x / screen_size.x);
    let h = -2.0 * (size.y / screen_size.y);

    Quad {
        vertices: [
            QuadVertex { position: [x, y], uv: [0.0, 0.0] },
            QuadVertex { position: [x + w, y], uv: [1.0, 0.0] },
            QuadVertex { position: [x, y + h], uv: [0.0, 1.0] },
            QuadVertex { position: [x + w, y + h], uv: [1.0, 1.0] },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: [f32; 2], b: [f32; 2]) {
        assert!(
            (a[0] - b[0]).abs() < 1e-5 && (a[1] - b[1]).abs() < 1e-5,
            "{:?} != {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_vertex_layout_size() {
        assert_eq!(std::mem::size_of::<QuadVertex>(), 16);
        assert_eq!(QuadVertex::desc().array_stride, 16);
    }

    #[test]
    fn test_standard_and_flipped_share_uvs() {
        let standard = standard_quad();
        let flipped = flipped_quad();
        for (s, f) in standard.vertices.iter().zip(flipped.vertices.iter()) {
            assert_eq!(s.uv, f.uv);
            assert_eq!(s.position[0], f.position[0]);
            assert_eq!(s.position[1], -f.position[1]);
        }
    }

    #[test]
    fn test_standard_quad_covers_clip_space() {
        let q = standard_quad();
        assert_eq!(q.vertices[0].position, [-1.0, 1.0]);
        assert_eq!(q.vertices[0].uv, [0.0, 0.0]);
        assert_eq!(q.vertices[3].position, [1.0, -1.0]);
        assert_eq!(q.vertices[3].uv, [1.0, 1.0]);
    }

    #[test]
    fn test_placed_quad_corners() {
        let cases = [
            (Vec2::new(1920.0, 1080.0), Vec2::new(100.0, 50.0), Vec2::new(300.0, 200.0)),
            (Vec2::new(800.0, 600.0), Vec2::new(0.0, 0.0), Vec2::new(800.0, 600.0)),
            (Vec2::new(640.0, 480.0), Vec2::new(320.0, 240.0), Vec2::new(1.0, 1.0)),
        ];

        for (screen, tl, size) in cases {
            let q = placed_quad(tl, size, screen);
            let (w, h) = (screen.x, screen.y);
            let br = tl + size;

            approx(q.vertices[0].position, [2.0 * tl.x / w - 1.0, 1.0 - 2.0 * tl.y / h]);
            approx(q.vertices[3].position, [2.0 * br.x / w - 1.0, 1.0 - 2.0 * br.y / h]);
            approx(q.vertices[1].position, [2.0 * br.x / w - 1.0, 1.0 - 2.0 * tl.y / h]);
            approx(q.vertices[2].position, [2.0 * tl.x / w - 1.0, 1.0 - 2.0 * br.y / h]);
        }
    }

    #[test]
    fn test_full_screen_placement_matches_standard() {
        let screen = Vec2::new(1024.0, 512.0);
        let q = placed_quad(Vec2::ZERO, screen, screen);
        assert_eq!(q, standard_quad());
    }
}
