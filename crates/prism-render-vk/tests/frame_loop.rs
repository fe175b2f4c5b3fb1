// SPDX-License-Identifier: CEPL-1.0
//! Frame loop over a fake GPU: the driver's recreation path rebuilds whole
//! swapchain generations through `SwapchainManager`, and every handle the fake
//! hands out is tracked until destroyed.

use prism_render::{FrameStatus, PresentPreference, RenderSize, ResizeFlag};
use prism_render_vk::device::QueueFamilies;
use prism_render_vk::memory::GpuImage;
use prism_render_vk::vk::{self, Handle};
use prism_render_vk::{
    plan_rebuild, Acquire, FrameBackend, FrameDriver, FrameRing, FrameSync, Present, Rebuild, Result,
    SurfaceSnapshot, SwapchainManager, SwapchainOps, SwapchainPlan, MAX_FRAMES_IN_FLIGHT,
};
use std::collections::{HashSet, VecDeque};

/// Handle bookkeeping shared by every generation.
#[derive(Default)]
struct Handles {
    next: u64,
    live: HashSet<u64>,
}

impl Handles {
    fn make(&mut self) -> u64 {
        self.next += 1;
        self.live.insert(self.next);
        self.next
    }

    fn free(&mut self, raw: u64) {
        assert!(self.live.remove(&raw), "double free or unknown handle {raw}");
    }
}

impl SwapchainOps for Handles {
    fn create_chain(&mut self, _: &SwapchainPlan) -> Result<vk::SwapchainKHR> {
        Ok(vk::SwapchainKHR::from_raw(self.make()))
    }
    fn chain_images(&mut self, _: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        // Owned by the chain; not tracked.
        Ok((0..3).map(|i| vk::Image::from_raw(10_000 + i)).collect())
    }
    fn create_color_view(&mut self, _: vk::Image, _: vk::Format) -> Result<vk::ImageView> {
        Ok(vk::ImageView::from_raw(self.make()))
    }
    fn create_depth(&mut self, _: vk::Extent2D, _: vk::Format) -> Result<GpuImage> {
        Ok(GpuImage {
            image: vk::Image::from_raw(self.make()),
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
        })
    }
    fn create_framebuffer(
        &mut self,
        _: vk::RenderPass,
        attachments: &[vk::ImageView],
        _: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        assert!(!attachments.is_empty());
        Ok(vk::Framebuffer::from_raw(self.make()))
    }
    fn destroy_framebuffer(&mut self, fb: vk::Framebuffer) {
        self.free(fb.as_raw());
    }
    fn destroy_depth(&mut self, depth: &GpuImage) {
        self.free(depth.image.as_raw());
    }
    fn destroy_color_view(&mut self, view: vk::ImageView) {
        self.free(view.as_raw());
    }
    fn destroy_chain(&mut self, chain: vk::SwapchainKHR) {
        self.free(chain.as_raw());
    }
}

struct FakeGpu {
    handles: Handles,
    swapchains: SwapchainManager,
    surface: RenderSize,
    resize: ResizeFlag,
    acquires: VecDeque<Acquire>,
    presents: VecDeque<Present>,
    next_image: u32,
    waited: Vec<u64>,
    submitted: Vec<u32>,
    uploads: Vec<(u32, Vec<u8>)>,
}

impl FakeGpu {
    fn new(surface: RenderSize) -> Self {
        let mut gpu = Self {
            handles: Handles::default(),
            swapchains: SwapchainManager::new(),
            surface,
            resize: ResizeFlag::new(),
            acquires: VecDeque::new(),
            presents: VecDeque::new(),
            next_image: 0,
            waited: Vec::new(),
            submitted: Vec::new(),
            uploads: Vec::new(),
        };
        gpu.build().unwrap();
        gpu
    }

    fn snapshot(&self) -> SurfaceSnapshot {
        SurfaceSnapshot {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 0,
                current_extent: vk::Extent2D {
                    width: self.surface.width,
                    height: self.surface.height,
                },
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    fn build(&mut self) -> Result<usize> {
        let rebuild = plan_rebuild(
            &self.snapshot(),
            self.surface,
            PresentPreference::LowLatency,
            QueueFamilies {
                graphics: 0,
                present: 0,
            },
            Some(vk::Format::D32_SFLOAT),
            &self.resize,
        )?;
        let plan: SwapchainPlan = match rebuild {
            Rebuild::Planned(plan) => plan,
            Rebuild::Deferred => return Ok(self.swapchains.current().map_or(0, |s| s.image_count())),
        };
        let render_pass = vk::RenderPass::from_raw(1);
        let state = self.swapchains.build(&mut self.handles, &plan, render_pass)?;
        Ok(state.image_count())
    }

    /// Chain + one view and one framebuffer per image + shared depth.
    fn expected_live(&self) -> usize {
        let n = self.swapchains.current().map_or(0, |s| s.image_count());
        1 + 2 * n + 1
    }
}

impl FrameBackend for FakeGpu {
    fn wait_fence(&mut self, fence: vk::Fence) -> Result<()> {
        self.waited.push(fence.as_raw());
        Ok(())
    }
    fn reset_fence(&mut self, _: vk::Fence) -> Result<()> {
        Ok(())
    }
    fn acquire_image(&mut self, _: vk::Semaphore) -> Result<Acquire> {
        Ok(self.acquires.pop_front().unwrap_or_else(|| {
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % 3;
            Acquire::Ready {
                image_index,
                suboptimal: false,
            }
        }))
    }
    fn prepare_image(&mut self, image_index: u32, uniforms: &[u8]) -> Result<()> {
        self.uploads.push((image_index, uniforms.to_vec()));
        Ok(())
    }
    fn submit(&mut self, image_index: u32, _: &FrameSync) -> Result<()> {
        self.submitted.push(image_index);
        Ok(())
    }
    fn present(&mut self, _: u32, _: vk::Semaphore) -> Result<Present> {
        Ok(self.presents.pop_front().unwrap_or(Present::Ok))
    }
    fn wait_idle(&mut self) -> Result<()> {
        Ok(())
    }
    fn recreate(&mut self) -> Result<usize> {
        self.build()
    }
}

fn ring() -> FrameRing {
    let slots = (0..MAX_FRAMES_IN_FLIGHT as u64)
        .map(|i| FrameSync {
            image_available: vk::Semaphore::from_raw(500 + i),
            render_finished: vk::Semaphore::from_raw(600 + i),
            in_flight: vk::Fence::from_raw(700 + i),
        })
        .collect();
    FrameRing::new(slots, 3)
}

#[test]
fn steady_frames_cycle_slots_and_upload_uniforms() {
    let mut gpu = FakeGpu::new(RenderSize::new(800, 600));
    let mut driver = FrameDriver::new(ring());
    let resize = ResizeFlag::new();

    for frame in 0..6u8 {
        let status = driver.drive_frame(&mut gpu, &resize, &[frame; 4]).unwrap();
        assert_eq!(status, FrameStatus::Presented);
    }

    assert_eq!(gpu.submitted, vec![0, 1, 2, 0, 1, 2]);
    assert_eq!(gpu.uploads[4], (1, vec![4; 4]));
    assert_eq!(gpu.swapchains.generation(), 1);
    assert_eq!(driver.ring().current(), 0);
    assert_eq!(&gpu.waited[..2], &[700, 701]);
}

#[test]
fn resize_rebuilds_at_the_new_extent_after_presenting() {
    let mut gpu = FakeGpu::new(RenderSize::new(800, 600));
    let mut driver = FrameDriver::new(ring());
    let resize = ResizeFlag::new();

    driver.drive_frame(&mut gpu, &resize, &[]).unwrap();
    gpu.surface = RenderSize::new(1024, 768);
    resize.raise();

    let status = driver.drive_frame(&mut gpu, &resize, &[]).unwrap();
    assert_eq!(status, FrameStatus::PresentedAndRecreated);
    assert!(!resize.is_raised());

    let state = gpu.swapchains.current().unwrap();
    assert_eq!((state.extent.width, state.extent.height), (1024, 768));
    assert_eq!(state.present_mode, vk::PresentModeKHR::MAILBOX);
    assert_eq!(gpu.swapchains.generation(), 2);
    assert_eq!(gpu.handles.live.len(), gpu.expected_live());
    assert_eq!(driver.ring().current(), 0);
}

#[test]
fn repeated_staleness_leaves_one_generation_and_no_leaks() {
    let mut gpu = FakeGpu::new(RenderSize::new(640, 480));
    let mut driver = FrameDriver::new(ring());
    let resize = ResizeFlag::new();

    gpu.acquires.extend([Acquire::OutOfDate, Acquire::OutOfDate]);
    assert_eq!(driver.drive_frame(&mut gpu, &resize, &[]).unwrap(), FrameStatus::Recreated);
    assert_eq!(driver.drive_frame(&mut gpu, &resize, &[]).unwrap(), FrameStatus::Recreated);
    assert!(gpu.submitted.is_empty());
    assert_eq!(driver.ring().current(), 0);

    assert_eq!(gpu.swapchains.generation(), 3);
    assert_eq!(gpu.handles.live.len(), gpu.expected_live());
    assert_eq!(gpu.expected_live(), 8);

    gpu.presents.push_back(Present::Suboptimal);
    let status = driver.drive_frame(&mut gpu, &resize, &[]).unwrap();
    assert_eq!(status, FrameStatus::PresentedAndRecreated);
    assert_eq!(gpu.handles.live.len(), gpu.expected_live());

    gpu.swapchains.destroy(&mut gpu.handles);
    assert!(gpu.handles.live.is_empty());
}

#[test]
fn minimized_surface_keeps_the_old_generation_until_visible() {
    let mut gpu = FakeGpu::new(RenderSize::new(800, 600));
    let resize = gpu.resize.clone();
    let mut driver = FrameDriver::new(ring());

    gpu.surface = RenderSize::new(0, 0);
    resize.raise();
    let status = driver.drive_frame(&mut gpu, &resize, &[]).unwrap();
    assert_eq!(status, FrameStatus::PresentedAndRecreated);
    assert!(resize.is_raised(), "deferred rebuild must be retried");
    assert_eq!(gpu.swapchains.generation(), 1);
    assert_eq!(gpu.handles.live.len(), gpu.expected_live());
    let extent = gpu.swapchains.current().unwrap().extent;
    assert_eq!((extent.width, extent.height), (800, 600));

    // Still minimized: the retry defers again.
    driver.drive_frame(&mut gpu, &resize, &[]).unwrap();
    assert!(resize.is_raised());
    assert_eq!(gpu.swapchains.generation(), 1);

    gpu.surface = RenderSize::new(1280, 720);
    let status = driver.drive_frame(&mut gpu, &resize, &[]).unwrap();
    assert_eq!(status, FrameStatus::PresentedAndRecreated);
    assert!(!resize.is_raised());
    assert_eq!(gpu.swapchains.generation(), 2);
    let extent = gpu.swapchains.current().unwrap().extent;
    assert_eq!((extent.width, extent.height), (1280, 720));
    assert_eq!(gpu.handles.live.len(), gpu.expected_live());
    assert_eq!(gpu.expected_live(), 8);
}
