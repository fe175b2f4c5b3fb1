// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend for [`prism_render::Renderer`].
//!
//! Everything that talks to the driver lives behind two seams: the frame loop
//! goes through [`FrameBackend`] and swapchain assembly through
//! [`SwapchainOps`], so both can be exercised without a GPU.

pub mod descriptors;
pub mod device;
pub mod error;
pub mod frame;
pub mod init;
pub mod memory;
pub mod pipeline;
mod renderer;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use error::{Result, VkError};
pub use frame::{Acquire, FrameBackend, FrameDriver, Present};
pub use init::{InitFailure, InitPlan, InitStep};
pub use renderer::VkRenderer;
pub use swapchain::{
    plan_rebuild, Rebuild, SurfaceSnapshot, SwapchainManager, SwapchainOps, SwapchainPlan, SwapchainState,
};
pub use sync::{FrameRing, FrameSync, SlotState, MAX_FRAMES_IN_FLIGHT};

/// Re-exported so backend implementations outside the crate can name handles.
pub use ash::vk;
