// SPDX-License-Identifier: CEPL-1.0
//! Content handed to a renderer at construction. The renderer treats all of it
//! as opaque bytes plus a layout description.

use anyhow::{ensure, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeFormat {
    Float2,
    Float3,
}

impl AttributeFormat {
    pub const fn size(self) -> u32 {
        match self {
            AttributeFormat::Float2 => 8,
            AttributeFormat::Float3 => 12,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub offset: u32,
    pub format: AttributeFormat,
}

/// Single interleaved binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.stride > 0, "vertex stride is zero");
        for a in &self.attributes {
            ensure!(
                a.offset + a.format.size() <= self.stride,
                "attribute at location {} overruns stride {}",
                a.location,
                self.stride
            );
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct MeshData {
    pub vertices: Vec<u8>,
    pub indices: Vec<u16>,
    pub layout: VertexLayout,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / self.layout.stride.max(1) as usize
    }

    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;
        ensure!(!self.indices.is_empty(), "mesh has no indices");
        ensure!(
            self.vertices.len() % self.layout.stride as usize == 0,
            "vertex bytes are not a multiple of the stride"
        );
        let count = self.vertex_count();
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= count) {
            anyhow::bail!("index {bad} out of range for {count} vertices");
        }
        Ok(())
    }
}

/// Tightly packed RGBA8 texels, row-major.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TextureData {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.width > 0 && self.height > 0, "empty texture");
        ensure!(
            self.rgba.len() as u64 == u64::from(self.width) * u64::from(self.height) * 4,
            "texture is {}x{} but holds {} bytes",
            self.width,
            self.height,
            self.rgba.len()
        );
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SceneData {
    pub mesh: MeshData,
    /// Only read when texturing is enabled.
    pub texture: Option<TextureData>,
    /// Bytes reserved per swapchain image for `render`'s uniform upload.
    pub uniform_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> VertexLayout {
        VertexLayout {
            stride: 20,
            attributes: vec![
                VertexAttribute { location: 0, offset: 0, format: AttributeFormat::Float3 },
                VertexAttribute { location: 1, offset: 12, format: AttributeFormat::Float2 },
            ],
        }
    }

    #[test]
    fn layout_overrun_is_rejected() {
        let mut l = layout();
        assert!(l.validate().is_ok());
        l.stride = 16;
        assert!(l.validate().is_err());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mesh = MeshData { vertices: vec![0; 60], indices: vec![0, 1, 3], layout: layout() };
        assert_eq!(mesh.vertex_count(), 3);
        assert!(mesh.validate().is_err());
        let mesh = MeshData { indices: vec![0, 1, 2], ..mesh };
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn texture_size_must_match() {
        let t = TextureData { width: 2, height: 2, rgba: vec![255; 16] };
        assert!(t.validate().is_ok());
        let t = TextureData { rgba: vec![255; 15], ..t };
        assert!(t.validate().is_err());
    }
}
