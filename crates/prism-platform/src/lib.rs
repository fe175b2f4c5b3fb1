// SPDX-License-Identifier: CEPL-1.0
//! Window-system glue. The app reaches winit through this crate.

pub use winit;

use anyhow::{Context, Result};
use prism_render::RenderSize;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

/// Creates the single main window.
pub fn create_main_window(
    event_loop: &ActiveEventLoop,
    title: &str,
    size: RenderSize,
) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(size.width.max(1), size.height.max(1)));
    let window = event_loop.create_window(attrs).context("create_window")?;
    tracing::info!("window '{}' created", title);
    Ok(window)
}

/// Current framebuffer size in pixels.
pub fn framebuffer_extent(window: &Window) -> RenderSize {
    to_render_size(window.inner_size())
}

pub fn to_render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_size_maps_through() {
        let s = to_render_size(PhysicalSize::new(1280, 0));
        assert_eq!(s, RenderSize::new(1280, 0));
        assert!(s.is_zero());
    }
}
