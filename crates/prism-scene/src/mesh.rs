// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use prism_render::{AttributeFormat, MeshData, VertexAttribute, VertexLayout};

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn layout() -> VertexLayout {
        VertexLayout {
            stride: std::mem::size_of::<Vertex>() as u32,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    offset: 0,
                    format: AttributeFormat::Float3,
                },
                VertexAttribute {
                    location: 1,
                    offset: 12,
                    format: AttributeFormat::Float3,
                },
                VertexAttribute {
                    location: 2,
                    offset: 24,
                    format: AttributeFormat::Float2,
                },
            ],
        }
    }
}

// Corners of each face, counter-clockwise when seen from outside the cube.
const FACES: [([[f32; 3]; 4], [f32; 3]); 6] = [
    ([[1., -1., -1.], [1., 1., -1.], [1., 1., 1.], [1., -1., 1.]], [1.0, 0.2, 0.2]),
    ([[-1., -1., -1.], [-1., -1., 1.], [-1., 1., 1.], [-1., 1., -1.]], [0.2, 1.0, 0.2]),
    ([[-1., 1., -1.], [-1., 1., 1.], [1., 1., 1.], [1., 1., -1.]], [0.2, 0.2, 1.0]),
    ([[-1., -1., -1.], [1., -1., -1.], [1., -1., 1.], [-1., -1., 1.]], [1.0, 1.0, 0.2]),
    ([[-1., -1., 1.], [1., -1., 1.], [1., 1., 1.], [-1., 1., 1.]], [1.0, 0.2, 1.0]),
    ([[-1., -1., -1.], [-1., 1., -1.], [1., 1., -1.], [1., -1., -1.]], [0.2, 1.0, 1.0]),
];

const FACE_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

/// Axis-aligned cube centred on the origin, four vertices per face so every
/// face gets its own color and UVs.
pub fn cube(half_extent: f32) -> MeshData {
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (corners, color) in FACES {
        let base = vertices.len() as u16;
        for (corner, uv) in corners.iter().zip(FACE_UVS) {
            vertices.push(Vertex {
                pos: corner.map(|c| c * half_extent),
                color,
                uv,
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    MeshData {
        vertices: bytemuck::cast_slice(&vertices).to_vec(),
        indices,
        layout: Vertex::layout(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn cube_shape() {
        let mesh = cube(0.5);
        mesh.validate().unwrap();
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.indices.len(), 36);
        assert_eq!(mesh.layout.stride, 32);
    }

    #[test]
    fn every_triangle_faces_outward() {
        let mesh = cube(0.5);
        let verts: &[Vertex] = bytemuck::cast_slice(&mesh.vertices);
        for tri in mesh.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(verts[i as usize].pos));
            let normal = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(normal.dot(centroid) > 0.0, "inward triangle {tri:?}");
        }
    }
}
