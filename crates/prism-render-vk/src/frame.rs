// SPDX-License-Identifier: CEPL-1.0
//! One acquire -> submit -> present iteration, and the recreation it triggers
//! when the surface goes stale.

use crate::error::Result;
use crate::sync::{FrameRing, FrameSync};
use ash::vk;
use prism_render::{FrameStatus, ResizeFlag};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    /// Suboptimal images are still rendered and presented.
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Present {
    Ok,
    Suboptimal,
    OutOfDate,
}

/// The GPU-facing half of a frame. The Vulkan renderer implements it over the
/// real device; tests drive the driver through recording mocks.
pub trait FrameBackend {
    fn wait_fence(&mut self, fence: vk::Fence) -> Result<()>;
    fn reset_fence(&mut self, fence: vk::Fence) -> Result<()>;
    /// Acquires the next presentable image, signaling `signal` when it is ready.
    fn acquire_image(&mut self, signal: vk::Semaphore) -> Result<Acquire>;
    /// Writes per-image data (uniforms) before the image's commands run.
    fn prepare_image(&mut self, image_index: u32, uniforms: &[u8]) -> Result<()>;
    /// Submits the image's command buffer: waits `image_available` at color
    /// output, signals `render_finished` and `in_flight`.
    fn submit(&mut self, image_index: u32, sync: &FrameSync) -> Result<()>;
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<Present>;
    fn wait_idle(&mut self) -> Result<()>;
    /// Tears down and rebuilds everything tied to the surface. Returns the new
    /// image count.
    fn recreate(&mut self) -> Result<usize>;
}

pub struct FrameDriver {
    ring: FrameRing,
}

impl FrameDriver {
    pub fn new(ring: FrameRing) -> Self {
        Self { ring }
    }

    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut FrameRing {
        &mut self.ring
    }

    /// Runs one frame.
    ///
    /// The slot counter only advances once a submission went through; staleness
    /// at acquire rebuilds and returns without touching it.
    pub fn drive_frame<B: FrameBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        resize: &ResizeFlag,
        uniforms: &[u8],
    ) -> Result<FrameStatus> {
        let slot = self.ring.current();
        let sync = self.ring.acquire_slot(backend, slot)?;

        let image_index = match backend.acquire_image(sync.image_available)? {
            Acquire::Ready {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    debug!("acquire: image {image_index} suboptimal, rendering anyway");
                }
                image_index
            }
            Acquire::OutOfDate => {
                debug!("acquire: swapchain out of date, recreating");
                // The rebuild uses the latest extent, so a pending resize is served too.
                resize.take();
                self.recreate(backend)?;
                return Ok(FrameStatus::Recreated);
            }
        };
        let image = image_index as usize;

        if let Some(owner) = self.ring.image_owner(image) {
            if owner != slot {
                self.ring.wait_slot(backend, owner)?;
            }
        }
        self.ring.mark_image_in_use(image, slot);

        backend.prepare_image(image_index, uniforms)?;

        backend.reset_fence(sync.in_flight)?;
        backend.submit(image_index, &sync)?;
        self.ring.mark_submitted(slot);

        let presented = backend.present(image_index, sync.render_finished)?;
        let resized = resize.take();

        let status = match presented {
            Present::Ok if !resized => FrameStatus::Presented,
            _ => {
                debug!(?presented, resized, "present: recreating swapchain");
                self.recreate(backend)?;
                FrameStatus::PresentedAndRecreated
            }
        };

        self.ring.advance();
        Ok(status)
    }

    fn recreate<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<()> {
        backend.wait_idle()?;
        let image_count = backend.recreate()?;
        self.ring.reset_images(image_count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VkError;
    use crate::sync::MAX_FRAMES_IN_FLIGHT;
    use ash::vk::Handle;
    use std::collections::VecDeque;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Ev {
        Wait(u64),
        Reset(u64),
        Acquire(u64),
        Prepare(u32),
        Submit(u32, u64),
        Present(u32),
        Idle,
        Recreate,
    }

    struct Mock {
        events: Vec<Ev>,
        acquires: VecDeque<Acquire>,
        presents: VecDeque<Present>,
        image_count: usize,
        next_image: u32,
    }

    impl Mock {
        fn new(image_count: usize) -> Self {
            Self {
                events: Vec::new(),
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                image_count,
                next_image: 0,
            }
        }
    }

    impl FrameBackend for Mock {
        fn wait_fence(&mut self, fence: vk::Fence) -> Result<()> {
            self.events.push(Ev::Wait(fence.as_raw()));
            Ok(())
        }
        fn reset_fence(&mut self, fence: vk::Fence) -> Result<()> {
            self.events.push(Ev::Reset(fence.as_raw()));
            Ok(())
        }
        fn acquire_image(&mut self, signal: vk::Semaphore) -> Result<Acquire> {
            self.events.push(Ev::Acquire(signal.as_raw()));
            Ok(self.acquires.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count as u32;
                Acquire::Ready {
                    image_index,
                    suboptimal: false,
                }
            }))
        }
        fn prepare_image(&mut self, image_index: u32, _: &[u8]) -> Result<()> {
            self.events.push(Ev::Prepare(image_index));
            Ok(())
        }
        fn submit(&mut self, image_index: u32, sync: &FrameSync) -> Result<()> {
            self.events.push(Ev::Submit(image_index, sync.in_flight.as_raw()));
            Ok(())
        }
        fn present(&mut self, image_index: u32, _: vk::Semaphore) -> Result<Present> {
            self.events.push(Ev::Present(image_index));
            Ok(self.presents.pop_front().unwrap_or(Present::Ok))
        }
        fn wait_idle(&mut self) -> Result<()> {
            self.events.push(Ev::Idle);
            Ok(())
        }
        fn recreate(&mut self) -> Result<usize> {
            self.events.push(Ev::Recreate);
            Ok(self.image_count)
        }
    }

    const FENCE: [u64; 2] = [100, 101];

    fn driver(image_count: usize) -> FrameDriver {
        let slots = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|i| FrameSync {
                image_available: vk::Semaphore::from_raw(10 + i as u64),
                render_finished: vk::Semaphore::from_raw(20 + i as u64),
                in_flight: vk::Fence::from_raw(FENCE[i]),
            })
            .collect();
        FrameDriver::new(FrameRing::new(slots, image_count))
    }

    #[test]
    fn plain_frame_follows_protocol_order() {
        let mut d = driver(3);
        let mut b = Mock::new(3);
        let flag = ResizeFlag::new();

        let status = d.drive_frame(&mut b, &flag, &[]).unwrap();
        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(
            b.events,
            vec![
                Ev::Wait(FENCE[0]),
                Ev::Acquire(10),
                Ev::Prepare(0),
                Ev::Reset(FENCE[0]),
                Ev::Submit(0, FENCE[0]),
                Ev::Present(0),
            ]
        );
        assert_eq!(d.ring().current(), 1);
    }

    #[test]
    fn reused_slot_fence_is_waited_before_reset_and_submit() {
        let mut d = driver(3);
        let mut b = Mock::new(3);
        let flag = ResizeFlag::new();

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            d.drive_frame(&mut b, &flag, &[]).unwrap();
        }
        let start = b.events.len();
        d.drive_frame(&mut b, &flag, &[]).unwrap();
        let frame = &b.events[start..];

        let wait = frame.iter().position(|e| *e == Ev::Wait(FENCE[0])).unwrap();
        let reset = frame.iter().position(|e| *e == Ev::Reset(FENCE[0])).unwrap();
        let submit = frame.iter().position(|e| matches!(e, Ev::Submit(..))).unwrap();
        assert_eq!(wait, 0);
        assert!(wait < reset && reset < submit);
    }

    #[test]
    fn out_of_date_at_acquire_rebuilds_without_advancing() {
        let mut d = driver(3);
        let mut b = Mock::new(3);
        b.acquires.push_back(Acquire::OutOfDate);
        let flag = ResizeFlag::new();
        flag.raise();

        let status = d.drive_frame(&mut b, &flag, &[]).unwrap();
        assert_eq!(status, FrameStatus::Recreated);
        assert_eq!(d.ring().current(), 0);
        assert!(!flag.is_raised());
        assert_eq!(
            b.events,
            vec![Ev::Wait(FENCE[0]), Ev::Acquire(10), Ev::Idle, Ev::Recreate]
        );
        // Fence was never reset, so the retry does not deadlock on it.
        assert!(!b.events.iter().any(|e| matches!(e, Ev::Reset(_))));
    }

    #[test]
    fn consecutive_out_of_date_each_rebuild_once() {
        let mut d = driver(3);
        let mut b = Mock::new(3);
        b.acquires.push_back(Acquire::OutOfDate);
        b.acquires.push_back(Acquire::OutOfDate);
        let flag = ResizeFlag::new();

        assert_eq!(d.drive_frame(&mut b, &flag, &[]).unwrap(), FrameStatus::Recreated);
        assert_eq!(d.drive_frame(&mut b, &flag, &[]).unwrap(), FrameStatus::Recreated);
        assert_eq!(d.drive_frame(&mut b, &flag, &[]).unwrap(), FrameStatus::Presented);

        let rebuilds = b.events.iter().filter(|e| **e == Ev::Recreate).count();
        assert_eq!(rebuilds, 2);
        // Each rebuild is preceded by an idle wait.
        for (i, e) in b.events.iter().enumerate() {
            if *e == Ev::Recreate {
                assert_eq!(b.events[i - 1], Ev::Idle);
            }
        }
        assert_eq!(d.ring().current(), 1);
    }

    #[test]
    fn suboptimal_acquire_still_presents() {
        let mut d = driver(3);
        let mut b = Mock::new(3);
        b.acquires.push_back(Acquire::Ready {
            image_index: 1,
            suboptimal: true,
        });
        let status = d.drive_frame(&mut b, &ResizeFlag::new(), &[]).unwrap();
        assert_eq!(status, FrameStatus::Presented);
        assert!(b.events.contains(&Ev::Present(1)));
    }

    #[test]
    fn stale_present_or_resize_rebuilds_and_advances() {
        for (present, resized) in [
            (Present::OutOfDate, false),
            (Present::Suboptimal, false),
            (Present::Ok, true),
        ] {
            let mut d = driver(3);
            let mut b = Mock::new(3);
            b.presents.push_back(present);
            let flag = ResizeFlag::new();
            if resized {
                flag.raise();
            }

            let status = d.drive_frame(&mut b, &flag, &[]).unwrap();
            assert_eq!(status, FrameStatus::PresentedAndRecreated, "{present:?}");
            assert!(!flag.is_raised());
            assert_eq!(&b.events[b.events.len() - 2..], &[Ev::Idle, Ev::Recreate]);
            assert_eq!(d.ring().current(), 1);
        }
    }

    #[test]
    fn image_still_owned_by_other_slot_is_waited_on() {
        let mut d = driver(3);
        let mut b = Mock::new(3);
        b.acquires.push_back(Acquire::Ready {
            image_index: 2,
            suboptimal: false,
        });
        b.acquires.push_back(Acquire::Ready {
            image_index: 2,
            suboptimal: false,
        });
        let flag = ResizeFlag::new();

        d.drive_frame(&mut b, &flag, &[]).unwrap();
        let start = b.events.len();
        d.drive_frame(&mut b, &flag, &[]).unwrap();

        assert_eq!(
            &b.events[start..],
            &[
                Ev::Wait(FENCE[1]),
                Ev::Acquire(11),
                Ev::Wait(FENCE[0]),
                Ev::Prepare(2),
                Ev::Reset(FENCE[1]),
                Ev::Submit(2, FENCE[1]),
                Ev::Present(2),
            ]
        );
        assert_eq!(d.ring().image_owner(2), Some(1));
    }

    #[test]
    fn image_owned_by_same_slot_is_not_waited_twice() {
        let mut d = driver(2);
        let mut b = Mock::new(2);
        let flag = ResizeFlag::new();

        // Images 0,1 then 0 again on slot 0: its fence was already waited.
        for _ in 0..3 {
            d.drive_frame(&mut b, &flag, &[]).unwrap();
        }
        let waits_on_slot0 = b
            .events
            .iter()
            .filter(|e| **e == Ev::Wait(FENCE[0]))
            .count();
        assert_eq!(waits_on_slot0, 2);
    }

    #[test]
    fn acquire_failure_is_fatal_and_leaves_counter() {
        struct Failing(Mock);
        impl FrameBackend for Failing {
            fn wait_fence(&mut self, f: vk::Fence) -> Result<()> {
                self.0.wait_fence(f)
            }
            fn reset_fence(&mut self, f: vk::Fence) -> Result<()> {
                self.0.reset_fence(f)
            }
            fn acquire_image(&mut self, _: vk::Semaphore) -> Result<Acquire> {
                Err(VkError::AcquireImage(vk::Result::ERROR_DEVICE_LOST))
            }
            fn prepare_image(&mut self, i: u32, u: &[u8]) -> Result<()> {
                self.0.prepare_image(i, u)
            }
            fn submit(&mut self, i: u32, s: &FrameSync) -> Result<()> {
                self.0.submit(i, s)
            }
            fn present(&mut self, i: u32, w: vk::Semaphore) -> Result<Present> {
                self.0.present(i, w)
            }
            fn wait_idle(&mut self) -> Result<()> {
                self.0.wait_idle()
            }
            fn recreate(&mut self) -> Result<usize> {
                self.0.recreate()
            }
        }

        let mut d = driver(3);
        let mut b = Failing(Mock::new(3));
        let err = d.drive_frame(&mut b, &ResizeFlag::new(), &[]).unwrap_err();
        assert!(matches!(err, VkError::AcquireImage(vk::Result::ERROR_DEVICE_LOST)));
        assert_eq!(d.ring().current(), 0);
    }
}
