// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;
use std::time::Duration;

mod resize;
mod scene;

pub use resize::ResizeFlag;
pub use scene::{AttributeFormat, MeshData, SceneData, TextureData, VertexAttribute, VertexLayout};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero framebuffer in at least one axis.
    pub const fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

bitflags::bitflags! {
    /// Optional parts of the fixed pipeline.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct RenderFeatures: u32 {
        const DEPTH = 1 << 0;
        const TEXTURING = 1 << 1;
    }
}

impl Default for RenderFeatures {
    fn default() -> Self {
        RenderFeatures::DEPTH
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PresentPreference {
    /// Triple-buffered, low latency; falls back to FIFO when unsupported.
    #[default]
    LowLatency,
    /// Plain FIFO vsync.
    Vsync,
}

#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub features: RenderFeatures,
    pub present: PresentPreference,
    pub clear_color: [f32; 4],
    /// Directory holding precompiled SPIR-V. `None` uses the embedded set.
    pub shader_dir: Option<PathBuf>,
    /// `None` waits on acquire forever.
    pub acquire_timeout: Option<Duration>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            features: RenderFeatures::default(),
            present: PresentPreference::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shader_dir: None,
            acquire_timeout: None,
        }
    }
}

/// What one `Renderer::render` call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// The surface went stale while acquiring; nothing was submitted.
    Recreated,
    /// Presented, then rebuilt because the surface went stale or the window resized.
    PresentedAndRecreated,
    /// Zero-sized framebuffer; nothing happened.
    Paused,
}

impl FrameStatus {
    pub const fn presented(self) -> bool {
        matches!(self, FrameStatus::Presented | FrameStatus::PresentedAndRecreated)
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        scene: &SceneData,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Records the new framebuffer size. The rebuild itself happens inside the
    /// next `render` call.
    fn resize(&mut self, size: RenderSize);

    /// Draws one frame. `uniforms` is copied into the acquired image's uniform
    /// buffer before submission.
    fn render(&mut self, uniforms: &[u8]) -> Result<FrameStatus>;

    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()>;

    fn set_vsync(&mut self, _on: bool) {}

    /// Handle the windowing side raises when the framebuffer changes.
    fn resize_flag(&self) -> ResizeFlag;
}
