// SPDX-License-Identifier: CEPL-1.0
//! Double-buffered frame synchronization.
//!
//! Each slot owns an image-acquired semaphore, a rendering-complete semaphore
//! and a fence that signals when the slot's last submission retired. The ring
//! also remembers which slot last wrote each swapchain image, so an image that
//! comes back around early is not rendered into while still in flight.

use crate::error::{Result, VkError, VkResultExt};
use crate::frame::FrameBackend;
use ash::vk;

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Fence starts signaled so the first wait on a fresh slot returns at once.
    pub unsafe fn create(device: &ash::Device) -> Result<Self> {
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };

        let image_available = device
            .create_semaphore(&sem_ci, None)
            .map_vk(VkError::SyncObjectCreation, "create_semaphore(image_available)")?;
        let render_finished = match device.create_semaphore(&sem_ci, None) {
            Ok(s) => s,
            Err(e) => {
                device.destroy_semaphore(image_available, None);
                return Err(VkError::SyncObjectCreation("create_semaphore(render_finished)", e));
            }
        };
        let in_flight = match device.create_fence(&fence_ci, None) {
            Ok(f) => f,
            Err(e) => {
                device.destroy_semaphore(render_finished, None);
                device.destroy_semaphore(image_available, None);
                return Err(VkError::SyncObjectCreation("create_fence(in_flight)", e));
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_fence(self.in_flight, None);
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_semaphore(self.image_available, None);
    }
}

/// Creates all slots, releasing the ones already made if a later one fails.
pub unsafe fn create_frame_syncs(device: &ash::Device, count: usize) -> Result<Vec<FrameSync>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        match FrameSync::create(device) {
            Ok(s) => out.push(s),
            Err(e) => {
                for s in out.iter().rev() {
                    s.destroy(device);
                }
                return Err(e);
            }
        }
    }
    Ok(out)
}

/// `Free -> Submitted -> Complete -> Free`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Handed to the caller, no outstanding work.
    Free,
    /// Work submitted, fence not yet observed.
    Submitted,
    /// Fence observed signaled, not yet reacquired.
    Complete,
}

pub struct FrameRing {
    slots: Vec<FrameSync>,
    states: Vec<SlotState>,
    /// Last slot that wrote each swapchain image.
    images_in_flight: Vec<Option<usize>>,
    current: usize,
}

impl FrameRing {
    pub fn new(slots: Vec<FrameSync>, image_count: usize) -> Self {
        let states = vec![SlotState::Free; slots.len()];
        Self {
            slots,
            states,
            images_in_flight: vec![None; image_count],
            current: 0,
        }
    }

    #[inline]
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }

    /// Blocks until `slot`'s last submission retired, then hands it out.
    pub fn acquire_slot<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        slot: usize,
    ) -> Result<FrameSync> {
        self.wait_slot(backend, slot)?;
        self.states[slot] = SlotState::Free;
        Ok(self.slots[slot])
    }

    /// Waits on another slot's fence without taking it over.
    pub fn wait_slot<B: FrameBackend + ?Sized>(&mut self, backend: &mut B, slot: usize) -> Result<()> {
        backend.wait_fence(self.slots[slot].in_flight)?;
        if self.states[slot] == SlotState::Submitted {
            self.states[slot] = SlotState::Complete;
        }
        Ok(())
    }

    pub fn image_owner(&self, image_index: usize) -> Option<usize> {
        self.images_in_flight.get(image_index).copied().flatten()
    }

    pub fn mark_image_in_use(&mut self, image_index: usize, slot: usize) {
        if image_index >= self.images_in_flight.len() {
            self.images_in_flight.resize(image_index + 1, None);
        }
        self.images_in_flight[image_index] = Some(slot);
    }

    pub fn mark_submitted(&mut self, slot: usize) {
        self.states[slot] = SlotState::Submitted;
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    /// New swapchain generation. Callers have idled the device, so every
    /// submitted slot has retired and no image has an owner.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, None);
        for s in &mut self.states {
            if *s == SlotState::Submitted {
                *s = SlotState::Complete;
            }
        }
    }
}
