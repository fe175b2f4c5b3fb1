// SPDX-License-Identifier: CEPL-1.0
use crate::init::InitStep;
use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VkError>;

/// Everything the Vulkan backend can fail with. Apart from the two staleness
/// conditions the frame driver absorbs, each of these is fatal.
#[derive(Debug, Error)]
pub enum VkError {
    #[error("no suitable GPU: {0}")]
    NoSuitableDevice(String),
    #[error("device creation failed in {0}: {1}")]
    DeviceCreation(&'static str, vk::Result),
    #[error("swapchain creation failed in {0}: {1}")]
    SwapchainCreation(&'static str, vk::Result),
    #[error("render pass creation failed in {0}: {1}")]
    RenderPassCreation(&'static str, vk::Result),
    #[error("pipeline creation failed in {0}: {1}")]
    PipelineCreation(&'static str, vk::Result),
    #[error("acquire_next_image: {0}")]
    AcquireImage(vk::Result),
    #[error("queue_present: {0}")]
    Present(vk::Result),
    #[error("unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    #[error("sync object creation failed in {0}: {1}")]
    SyncObjectCreation(&'static str, vk::Result),
    #[error("resource allocation failed in {0}: {1}")]
    ResourceAllocation(&'static str, vk::Result),
    #[error("resource allocation failed: no memory type in {type_bits:#b} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },
    /// A Vulkan call outside the creation taxonomy (submit, fence waits, ...).
    #[error("{0}: {1}")]
    Vulkan(&'static str, vk::Result),
    #[error("Vulkan loader: {0}")]
    Loading(#[from] ash::LoadingError),
    #[error("window handle: {0}")]
    Window(String),
    #[error("shader: {0}")]
    Shader(String),
    #[error("scene data: {0}")]
    Scene(String),
    #[error("init step {step} runs before its prerequisite {needs}")]
    InitOrder { step: InitStep, needs: InitStep },
    #[error("init step {step} failed: {source}")]
    Init {
        step: InitStep,
        #[source]
        source: Box<VkError>,
    },
}

impl VkError {
    /// The failure without any init-step wrapping.
    pub fn root(&self) -> &VkError {
        match self {
            VkError::Init { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Tags a raw `VkResult` with the taxonomy variant and the call that failed.
pub(crate) trait VkResultExt<T> {
    fn map_vk(self, kind: fn(&'static str, vk::Result) -> VkError, op: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    #[inline]
    fn map_vk(self, kind: fn(&'static str, vk::Result) -> VkError, op: &'static str) -> Result<T> {
        self.map_err(|r| kind(op, r))
    }
}
