// SPDX-License-Identifier: CEPL-1.0
//! Demo content: a spinning, vertex-colored (optionally textured) cube.

mod mesh;
mod texture;
mod uniforms;

pub use mesh::{cube, Vertex};
pub use texture::checkerboard;
pub use uniforms::UniformBufferObject;

use prism_render::SceneData;

/// Everything a renderer needs at construction time.
pub fn demo_scene() -> SceneData {
    SceneData {
        mesh: cube(0.5),
        texture: Some(checkerboard(256, 8)),
        uniform_size: std::mem::size_of::<UniformBufferObject>() as u64,
    }
}
