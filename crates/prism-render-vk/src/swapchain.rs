// SPDX-License-Identifier: CEPL-1.0
//! Presentable image chain: policy, creation and teardown.
//!
//! Policy lives in plain functions over a [`SurfaceSnapshot`] so it can be
//! tested without a device. Creation goes through [`SwapchainOps`], which the
//! renderer implements over ash and tests implement with handle counters.

use crate::device::QueueFamilies;
use crate::error::{Result, VkError, VkResultExt};
use crate::memory::{self, GpuImage};
use ash::khr::{surface, swapchain};
use ash::vk;
use prism_render::{PresentPreference, RenderSize, ResizeFlag};
use tracing::{debug, info};

pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Surface capabilities at one point in time.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSnapshot {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSnapshot {
    pub unsafe fn query(
        loader: &surface::Instance,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        Ok(Self {
            capabilities: loader
                .get_physical_device_surface_capabilities(phys, surface)
                .map_vk(VkError::SwapchainCreation, "get_physical_device_surface_capabilities")?,
            formats: loader
                .get_physical_device_surface_formats(phys, surface)
                .map_vk(VkError::SwapchainCreation, "get_physical_device_surface_formats")?,
            present_modes: loader
                .get_physical_device_surface_present_modes(phys, surface)
                .map_vk(VkError::SwapchainCreation, "get_physical_device_surface_present_modes")?,
        })
    }

    /// A minimized window reports a 0x0 current extent on most platforms.
    pub fn is_zero_sized(&self) -> bool {
        let e = self.capabilities.current_extent;
        e.width == 0 || e.height == 0
    }
}

/// sRGB BGRA8 when offered, else whatever the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|&f| f == PREFERRED_FORMAT)
        .or_else(|| formats.first().copied())
}

/// FIFO is the only mode every surface must support.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preference: PresentPreference,
) -> vk::PresentModeKHR {
    match preference {
        PresentPreference::LowLatency if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// The surface's own extent, unless it reports the `u32::MAX` "you pick"
/// sentinel; then the hint clamped to the allowed range.
pub fn resolve_extent(caps: &vk::SurfaceCapabilitiesKHR, hint: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: hint
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: hint
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

/// Concurrent access when graphics and present are different families.
pub fn sharing_mode(families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.graphics != families.present {
        (vk::SharingMode::CONCURRENT, families.unique())
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

/// Every decision needed to create one generation of the chain.
#[derive(Clone, Debug, PartialEq)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub sharing_mode: vk::SharingMode,
    pub queue_families: Vec<u32>,
    pub depth_format: Option<vk::Format>,
}

impl SwapchainPlan {
    pub fn from_snapshot(
        snapshot: &SurfaceSnapshot,
        hint: RenderSize,
        preference: PresentPreference,
        families: QueueFamilies,
        depth_format: Option<vk::Format>,
    ) -> Result<Self> {
        let caps = &snapshot.capabilities;
        let surface_format = choose_surface_format(&snapshot.formats).ok_or(
            VkError::SwapchainCreation("choose_surface_format", vk::Result::ERROR_FORMAT_NOT_SUPPORTED),
        )?;
        let (sharing_mode, queue_families) = sharing_mode(families);
        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&snapshot.present_modes, preference),
            extent: resolve_extent(caps, hint),
            min_image_count: image_count(caps),
            pre_transform: caps.current_transform,
            sharing_mode,
            queue_families,
            depth_format,
        })
    }
}

/// What a rebuild should do with the surface as it is right now.
#[derive(Clone, Debug, PartialEq)]
pub enum Rebuild {
    /// Zero-sized surface: keep the current generation and retry later.
    Deferred,
    Planned(SwapchainPlan),
}

/// Plans a rebuild from a fresh snapshot. A minimized surface defers it and
/// raises `resize` again, so the driver retries after a later present.
pub fn plan_rebuild(
    snapshot: &SurfaceSnapshot,
    hint: RenderSize,
    preference: PresentPreference,
    families: QueueFamilies,
    depth_format: Option<vk::Format>,
    resize: &ResizeFlag,
) -> Result<Rebuild> {
    if snapshot.is_zero_sized() {
        debug!("surface is zero-sized, keeping the current swapchain");
        resize.raise();
        return Ok(Rebuild::Deferred);
    }
    SwapchainPlan::from_snapshot(snapshot, hint, preference, families, depth_format).map(Rebuild::Planned)
}

/// Handle-level operations the manager needs. Implemented over ash for the
/// renderer and over counters in tests.
pub trait SwapchainOps {
    fn create_chain(&mut self, plan: &SwapchainPlan) -> Result<vk::SwapchainKHR>;
    fn chain_images(&mut self, chain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;
    fn create_color_view(&mut self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView>;
    fn create_depth(&mut self, extent: vk::Extent2D, format: vk::Format) -> Result<GpuImage>;
    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer>;

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);
    fn destroy_depth(&mut self, depth: &GpuImage);
    fn destroy_color_view(&mut self, view: vk::ImageView);
    fn destroy_chain(&mut self, chain: vk::SwapchainKHR);
}

/// One generation: chain, views, optional shared depth target, framebuffers.
#[derive(Debug)]
pub struct SwapchainState {
    pub chain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub depth: Option<GpuImage>,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl SwapchainState {
    /// Chain, images and one color view per image.
    pub fn create<O: SwapchainOps + ?Sized>(ops: &mut O, plan: &SwapchainPlan) -> Result<Self> {
        let chain = ops.create_chain(plan)?;
        let images = match ops.chain_images(chain) {
            Ok(i) => i,
            Err(e) => {
                ops.destroy_chain(chain);
                return Err(e);
            }
        };

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            match ops.create_color_view(image, plan.surface_format.format) {
                Ok(v) => views.push(v),
                Err(e) => {
                    for &v in views.iter().rev() {
                        ops.destroy_color_view(v);
                    }
                    ops.destroy_chain(chain);
                    return Err(e);
                }
            }
        }

        Ok(Self {
            chain,
            format: plan.surface_format.format,
            color_space: plan.surface_format.color_space,
            present_mode: plan.present_mode,
            extent: plan.extent,
            images,
            views,
            depth: None,
            framebuffers: Vec::new(),
        })
    }

    pub fn attach_depth<O: SwapchainOps + ?Sized>(&mut self, ops: &mut O, format: vk::Format) -> Result<()> {
        self.depth = Some(ops.create_depth(self.extent, format)?);
        Ok(())
    }

    /// One framebuffer per view, sharing the depth target if there is one.
    pub fn create_framebuffers<O: SwapchainOps + ?Sized>(
        &mut self,
        ops: &mut O,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        let mut framebuffers = Vec::with_capacity(self.views.len());
        for &view in &self.views {
            let mut attachments = vec![view];
            if let Some(depth) = &self.depth {
                attachments.push(depth.view);
            }
            match ops.create_framebuffer(render_pass, &attachments, self.extent) {
                Ok(fb) => framebuffers.push(fb),
                Err(e) => {
                    for &fb in framebuffers.iter().rev() {
                        ops.destroy_framebuffer(fb);
                    }
                    return Err(e);
                }
            }
        }
        self.framebuffers = framebuffers;
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Reverse creation order: framebuffers, depth, views, chain.
    pub fn destroy<O: SwapchainOps + ?Sized>(mut self, ops: &mut O) {
        for fb in self.framebuffers.drain(..).rev() {
            ops.destroy_framebuffer(fb);
        }
        if let Some(depth) = self.depth.take() {
            ops.destroy_depth(&depth);
        }
        for v in self.views.drain(..).rev() {
            ops.destroy_color_view(v);
        }
        ops.destroy_chain(self.chain);
    }
}

/// Owns the live generation. Callers idle the device before `build` replaces
/// one generation with the next, and before `destroy`.
#[derive(Debug, Default)]
pub struct SwapchainManager {
    current: Option<SwapchainState>,
    generation: u64,
}

impl SwapchainManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&SwapchainState> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut SwapchainState> {
        self.current.as_mut()
    }

    /// Number of generations built so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Takes ownership of a generation assembled step by step during init.
    pub fn adopt(&mut self, state: SwapchainState) {
        log_generation(&state);
        self.current = Some(state);
        self.generation += 1;
    }

    /// Builds a full generation. On failure everything created so far is
    /// destroyed before the error is returned.
    pub fn build<O: SwapchainOps + ?Sized>(
        &mut self,
        ops: &mut O,
        plan: &SwapchainPlan,
        render_pass: vk::RenderPass,
    ) -> Result<&SwapchainState> {
        self.destroy(ops);

        let mut state = SwapchainState::create(ops, plan).map_err(into_swapchain_error)?;
        let rest = match plan.depth_format {
            Some(fmt) => state.attach_depth(ops, fmt),
            None => Ok(()),
        }
        .and_then(|_| state.create_framebuffers(ops, render_pass));
        if let Err(e) = rest {
            state.destroy(ops);
            return Err(into_swapchain_error(e));
        }

        log_generation(&state);
        self.generation += 1;
        Ok(self.current.insert(state))
    }

    pub fn destroy<O: SwapchainOps + ?Sized>(&mut self, ops: &mut O) {
        if let Some(state) = self.current.take() {
            state.destroy(ops);
        }
    }
}

fn log_generation(state: &SwapchainState) {
    info!(
        "swapchain: {:?}/{:?}, {:?}, {}x{}, {} images",
        state.format,
        state.color_space,
        state.present_mode,
        state.extent.width,
        state.extent.height,
        state.image_count()
    );
}

/// Anything that goes wrong while building the chain is a swapchain failure.
pub(crate) fn into_swapchain_error(e: VkError) -> VkError {
    match e {
        VkError::ResourceAllocation(op, r) | VkError::Vulkan(op, r) => VkError::SwapchainCreation(op, r),
        other => other,
    }
}

/// [`SwapchainOps`] over a live device.
pub struct AshSwapchainOps<'a> {
    pub device: &'a ash::Device,
    pub loader: &'a swapchain::Device,
    pub surface: vk::SurfaceKHR,
    pub memory_props: &'a vk::PhysicalDeviceMemoryProperties,
}

impl SwapchainOps for AshSwapchainOps<'_> {
    fn create_chain(&mut self, plan: &SwapchainPlan) -> Result<vk::SwapchainKHR> {
        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface,
            min_image_count: plan.min_image_count,
            image_format: plan.surface_format.format,
            image_color_space: plan.surface_format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: plan.sharing_mode,
            queue_family_index_count: plan.queue_families.len() as u32,
            p_queue_family_indices: plan.queue_families.as_ptr(),
            pre_transform: plan.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };
        unsafe {
            self.loader
                .create_swapchain(&info, None)
                .map_vk(VkError::SwapchainCreation, "create_swapchain")
        }
    }

    fn chain_images(&mut self, chain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        unsafe {
            self.loader
                .get_swapchain_images(chain)
                .map_vk(VkError::SwapchainCreation, "get_swapchain_images")
        }
    }

    fn create_color_view(&mut self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
        unsafe {
            memory::create_view(self.device, image, format, vk::ImageAspectFlags::COLOR)
                .map_vk(VkError::SwapchainCreation, "create_image_view")
        }
    }

    fn create_depth(&mut self, extent: vk::Extent2D, format: vk::Format) -> Result<GpuImage> {
        unsafe {
            memory::create_image(
                self.device,
                self.memory_props,
                extent,
                format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                vk::ImageAspectFlags::DEPTH,
            )
        }
    }

    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        let ci = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        unsafe {
            self.device
                .create_framebuffer(&ci, None)
                .map_vk(VkError::SwapchainCreation, "create_framebuffer")
        }
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn destroy_depth(&mut self, depth: &GpuImage) {
        unsafe { depth.destroy(self.device) }
    }

    fn destroy_color_view(&mut self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn destroy_chain(&mut self, chain: vk::SwapchainKHR) {
        unsafe { self.loader.destroy_swapchain(chain, None) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::collections::HashSet;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_srgb_bgra_pair() {
        let other = fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let wrong_cs = fmt(
            vk::Format::B8G8R8A8_SRGB,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        );
        assert_eq!(
            choose_surface_format(&[other, wrong_cs, PREFERRED_FORMAT]),
            Some(PREFERRED_FORMAT)
        );
        assert_eq!(choose_surface_format(&[wrong_cs, other]), Some(wrong_cs));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn mailbox_when_available_else_fifo() {
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let fifo = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&both, PresentPreference::LowLatency),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&fifo, PresentPreference::LowLatency),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&both, PresentPreference::Vsync),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn fixed_extent_ignores_hint() {
        let c = caps(2, 0);
        let e = resolve_extent(&c, RenderSize::new(10, 10000));
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn flexible_extent_clamps_hint() {
        let mut c = caps(2, 0);
        c.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        let e = resolve_extent(&c, RenderSize::new(10, 10000));
        assert_eq!((e.width, e.height), (10, 4096));
        let e = resolve_extent(&c, RenderSize::new(0, 0));
        assert_eq!((e.width, e.height), (1, 1));
    }

    #[test]
    fn image_count_policy() {
        assert_eq!(image_count(&caps(2, 0)), 3);
        assert_eq!(image_count(&caps(2, 2)), 2);
        assert_eq!(image_count(&caps(1, 8)), 2);
    }

    #[test]
    fn sharing_follows_family_split() {
        let same = QueueFamilies {
            graphics: 0,
            present: 0,
        };
        assert_eq!(sharing_mode(same), (vk::SharingMode::EXCLUSIVE, vec![]));
        let split = QueueFamilies {
            graphics: 0,
            present: 2,
        };
        assert_eq!(sharing_mode(split), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }

    #[test]
    fn plan_needs_at_least_one_format() {
        let snap = SurfaceSnapshot {
            capabilities: caps(2, 0),
            formats: vec![],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let fam = QueueFamilies {
            graphics: 0,
            present: 0,
        };
        let err = SwapchainPlan::from_snapshot(&snap, RenderSize::new(1, 1), Default::default(), fam, None)
            .unwrap_err();
        assert!(matches!(err, VkError::SwapchainCreation("choose_surface_format", _)));
    }

    /// Hands out unique handles and tracks which are alive.
    #[derive(Default)]
    struct Counting {
        next: u64,
        images_per_chain: usize,
        live: HashSet<u64>,
        fail_framebuffer_at: Option<usize>,
        framebuffers_made: usize,
    }

    impl Counting {
        fn make(&mut self) -> u64 {
            self.next += 1;
            self.live.insert(self.next);
            self.next
        }
        fn kill(&mut self, raw: u64) {
            assert!(self.live.remove(&raw), "double destroy of {raw}");
        }
    }

    impl SwapchainOps for Counting {
        fn create_chain(&mut self, _: &SwapchainPlan) -> Result<vk::SwapchainKHR> {
            Ok(vk::SwapchainKHR::from_raw(self.make()))
        }
        fn chain_images(&mut self, _: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
            // Images belong to the chain; not tracked.
            Ok((0..self.images_per_chain)
                .map(|i| vk::Image::from_raw(10_000 + i as u64))
                .collect())
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
            assert_eq!(attachments.len(), 2, "color + depth");
            if self.fail_framebuffer_at == Some(self.framebuffers_made) {
                return Err(VkError::SwapchainCreation(
                    "create_framebuffer",
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                ));
            }
            self.framebuffers_made += 1;
            Ok(vk::Framebuffer::from_raw(self.make()))
        }
        fn destroy_framebuffer(&mut self, fb: vk::Framebuffer) {
            self.kill(fb.as_raw());
        }
        fn destroy_depth(&mut self, depth: &GpuImage) {
            self.kill(depth.image.as_raw());
        }
        fn destroy_color_view(&mut self, view: vk::ImageView) {
            self.kill(view.as_raw());
        }
        fn destroy_chain(&mut self, chain: vk::SwapchainKHR) {
            self.kill(chain.as_raw());
        }
    }

    fn plan() -> SwapchainPlan {
        let snap = SurfaceSnapshot {
            capabilities: caps(2, 0),
            formats: vec![PREFERRED_FORMAT],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let fam = QueueFamilies {
            graphics: 0,
            present: 0,
        };
        SwapchainPlan::from_snapshot(
            &snap,
            RenderSize::new(800, 600),
            PresentPreference::LowLatency,
            fam,
            Some(vk::Format::D32_SFLOAT),
        )
        .unwrap()
    }

    #[test]
    fn rebuilds_leave_exactly_one_generation() {
        let mut ops = Counting {
            images_per_chain: 3,
            ..Default::default()
        };
        let mut mgr = SwapchainManager::new();
        let rp = vk::RenderPass::from_raw(1);

        mgr.build(&mut ops, &plan(), rp).unwrap();
        mgr.build(&mut ops, &plan(), rp).unwrap();
        mgr.build(&mut ops, &plan(), rp).unwrap();

        let state = mgr.current().unwrap();
        assert_eq!(mgr.generation(), 3);
        assert_eq!(state.views.len(), 3);
        assert_eq!(state.framebuffers.len(), 3);
        // chain + depth + a view and a framebuffer per image
        assert_eq!(ops.live.len(), 2 + 2 * state.image_count());

        mgr.destroy(&mut ops);
        assert!(ops.live.is_empty());
        assert!(mgr.current().is_none());
    }

    #[test]
    fn failed_build_rolls_back_everything() {
        let mut ops = Counting {
            images_per_chain: 3,
            fail_framebuffer_at: Some(1),
            ..Default::default()
        };
        let mut mgr = SwapchainManager::new();

        let err = mgr
            .build(&mut ops, &plan(), vk::RenderPass::from_raw(1))
            .unwrap_err();
        assert!(matches!(err, VkError::SwapchainCreation("create_framebuffer", _)));
        assert!(ops.live.is_empty(), "leaked: {:?}", ops.live);
        assert!(mgr.current().is_none());
        assert_eq!(mgr.generation(), 0);
    }

    #[test]
    fn minimized_surface_defers_and_reraises_resize() {
        let fam = QueueFamilies {
            graphics: 0,
            present: 0,
        };
        let mut snap = SurfaceSnapshot {
            capabilities: caps(2, 0),
            formats: vec![PREFERRED_FORMAT],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        snap.capabilities.current_extent = vk::Extent2D { width: 0, height: 0 };
        let flag = ResizeFlag::new();

        let r = plan_rebuild(&snap, RenderSize::new(0, 0), PresentPreference::Vsync, fam, None, &flag).unwrap();
        assert_eq!(r, Rebuild::Deferred);
        assert!(flag.take());

        snap.capabilities.current_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let r = plan_rebuild(&snap, RenderSize::new(640, 480), PresentPreference::Vsync, fam, None, &flag).unwrap();
        let Rebuild::Planned(plan) = r else {
            panic!("expected a plan");
        };
        assert_eq!(plan.extent, vk::Extent2D { width: 640, height: 480 });
        assert!(!flag.is_raised());
    }
}
