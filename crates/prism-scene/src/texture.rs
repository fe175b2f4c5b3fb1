// SPDX-License-Identifier: CEPL-1.0
use prism_render::TextureData;

const LIGHT: [u8; 4] = [235, 235, 235, 255];
const DARK: [u8; 4] = [40, 40, 48, 255];

/// `size`×`size` RGBA8 checkerboard with `cells` squares per side.
pub fn checkerboard(size: u32, cells: u32) -> TextureData {
    let cell = (size / cells.max(1)).max(1);
    let mut rgba = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let texel = if ((x / cell) + (y / cell)) % 2 == 0 { LIGHT } else { DARK };
            rgba.extend_from_slice(&texel);
        }
    }
    TextureData {
        width: size,
        height: size,
        rgba,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternates_per_cell() {
        let tex = checkerboard(4, 2);
        tex.validate().unwrap();
        let at = |x: usize, y: usize| &tex.rgba[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(at(0, 0), LIGHT);
        assert_eq!(at(1, 1), LIGHT);
        assert_eq!(at(2, 0), DARK);
        assert_eq!(at(0, 2), DARK);
        assert_eq!(at(3, 3), LIGHT);
    }
}
