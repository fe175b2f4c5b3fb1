// SPDX-License-Identifier: CEPL-1.0
//! [`VkRenderer`]: runs the init plan against a real device, owns the
//! resulting GPU state and implements [`FrameBackend`] over it.

use crate::descriptors;
use crate::device::{self, DebugMessenger, DeviceContext, QueueFamilies};
use crate::error::{Result, VkError, VkResultExt};
use crate::frame::{Acquire, FrameBackend, FrameDriver, Present};
use crate::init::{InitPlan, InitStep};
use crate::memory::{GpuBuffer, GpuImage, Uploader};
use crate::pipeline::{self, PipelineDesc, ShaderSet};
use crate::swapchain::{
    into_swapchain_error, plan_rebuild, AshSwapchainOps, Rebuild, SurfaceSnapshot, SwapchainManager,
    SwapchainPlan, SwapchainState,
};
use crate::sync::{self, FrameRing, FrameSync, MAX_FRAMES_IN_FLIGHT};
use crate::texture;
use anyhow::Context;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use prism_render::{
    FrameStatus, PresentPreference, RenderFeatures, RenderSettings, RenderSize, Renderer,
    ResizeFlag, SceneData, VertexLayout,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::mem;
use tracing::{debug, info, warn};

/// Rebuilt, in this order, after a new chain and render pass exist.
const REBUILT_WITH_CHAIN: [InitStep; 5] = [
    InitStep::Pipeline,
    InitStep::UniformBuffers,
    InitStep::DescriptorPool,
    InitStep::DescriptorSets,
    InitStep::CommandBuffers,
];

fn missing(step: InitStep, needs: InitStep) -> VkError {
    VkError::InitOrder { step, needs }
}

fn ash_ops(ctx: &DeviceContext) -> AshSwapchainOps<'_> {
    AshSwapchainOps {
        device: &ctx.device,
        loader: &ctx.swapchain_loader,
        surface: ctx.surface,
        memory_props: &ctx.memory_props,
    }
}

fn uploader(ctx: &DeviceContext, pool: vk::CommandPool) -> Uploader<'_> {
    Uploader {
        device: &ctx.device,
        memory_props: &ctx.memory_props,
        pool,
        queue: ctx.graphics_queue,
    }
}

#[derive(Clone, Copy)]
struct SelectedAdapter {
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
    memory_props: vk::PhysicalDeviceMemoryProperties,
    depth_format: Option<vk::Format>,
}

/// Instance-level objects that exist before the logical device does.
struct Bootstrap {
    entry: Entry,
    validation: bool,
    instance: Option<Instance>,
    debug: Option<DebugMessenger>,
    surface_loader: Option<surface::Instance>,
    surface: vk::SurfaceKHR,
    adapter: Option<SelectedAdapter>,
}

impl Bootstrap {
    fn new(entry: Entry) -> Self {
        Self {
            entry,
            validation: false,
            instance: None,
            debug: None,
            surface_loader: None,
            surface: vk::SurfaceKHR::null(),
            adapter: None,
        }
    }

    unsafe fn step(
        &mut self,
        step: InitStep,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        features: RenderFeatures,
    ) -> Result<()> {
        match step {
            InitStep::Instance => {
                self.validation = device::validation_available(&self.entry);
                self.instance = Some(device::create_instance(&self.entry, display, self.validation)?);
            }
            InitStep::DebugMessenger => {
                if self.validation {
                    let instance = self.instance.as_ref().ok_or(missing(step, InitStep::Instance))?;
                    self.debug = Some(DebugMessenger::create(&self.entry, instance)?);
                }
            }
            InitStep::Surface => {
                let instance = self.instance.as_ref().ok_or(missing(step, InitStep::Instance))?;
                self.surface = ash_window::create_surface(&self.entry, instance, display, window, None)
                    .map_vk(VkError::DeviceCreation, "create_surface")?;
                self.surface_loader = Some(surface::Instance::new(&self.entry, instance));
            }
            InitStep::Adapter => {
                let instance = self.instance.as_ref().ok_or(missing(step, InitStep::Instance))?;
                let loader = self.surface_loader.as_ref().ok_or(missing(step, InitStep::Surface))?;
                let (phys, families) = device::select_adapter(instance, loader, self.surface, features)?;
                let depth_format = if features.contains(RenderFeatures::DEPTH) {
                    let format = device::pick_depth_format(instance, phys)?;
                    debug!(?format, "depth format");
                    Some(format)
                } else {
                    None
                };
                self.adapter = Some(SelectedAdapter {
                    phys,
                    families,
                    memory_props: instance.get_physical_device_memory_properties(phys),
                    depth_format,
                });
            }
            other => unreachable!("{other} runs once the logical device exists"),
        }
        Ok(())
    }

    /// Hands everything over to a [`DeviceContext`]. Callers have checked
    /// that the instance and surface exist.
    fn take_context(
        &mut self,
        adapter: SelectedAdapter,
        device: ash::Device,
        graphics_queue: vk::Queue,
        present_queue: vk::Queue,
        swapchain_loader: swapchain::Device,
    ) -> Option<DeviceContext> {
        let instance = self.instance.take()?;
        let surface_loader = self.surface_loader.take()?;
        Some(DeviceContext {
            entry: self.entry.clone(),
            instance,
            debug: self.debug.take(),
            surface_loader,
            surface: mem::take(&mut self.surface),
            adapter: adapter.phys,
            families: adapter.families,
            device,
            graphics_queue,
            present_queue,
            memory_props: adapter.memory_props,
            swapchain_loader,
        })
    }

    /// Reverse of whatever was created.
    unsafe fn destroy(&mut self) {
        if let Some(d) = self.debug.take() {
            d.destroy();
        }
        if let Some(loader) = &self.surface_loader {
            loader.destroy_surface(mem::take(&mut self.surface), None);
        }
        if let Some(instance) = self.instance.take() {
            instance.destroy_instance(None);
        }
    }
}

/// Executor state for one run of the init plan.
struct Boot<'a> {
    display: RawDisplayHandle,
    window: RawWindowHandle,
    size: RenderSize,
    settings: &'a RenderSettings,
    scene: &'a SceneData,
    shaders: ShaderSet,
    resize: ResizeFlag,
    done: Vec<InitStep>,
    pending: Option<Bootstrap>,
    gpu: Option<GpuState>,
}

impl Boot<'_> {
    unsafe fn step(&mut self, step: InitStep) -> Result<()> {
        match step {
            InitStep::Instance | InitStep::DebugMessenger | InitStep::Surface | InitStep::Adapter => {
                let boot = self.pending.as_mut().ok_or(missing(step, InitStep::Instance))?;
                boot.step(step, self.display, self.window, self.settings.features)?;
                self.done.push(step);
                Ok(())
            }
            InitStep::LogicalDevice => self.create_device(),
            _ => {
                let gpu = self.gpu.as_mut().ok_or(missing(step, InitStep::LogicalDevice))?;
                gpu.init_step(step, self.scene)
            }
        }
    }

    unsafe fn create_device(&mut self) -> Result<()> {
        let step = InitStep::LogicalDevice;
        let boot = self.pending.as_mut().ok_or(missing(step, InitStep::Instance))?;
        if boot.surface_loader.is_none() {
            return Err(missing(step, InitStep::Surface));
        }
        let adapter = boot.adapter.ok_or(missing(step, InitStep::Adapter))?;
        let instance = boot.instance.as_ref().ok_or(missing(step, InitStep::Instance))?;

        let (device, graphics_queue, present_queue) =
            device::create_logical_device(instance, adapter.phys, adapter.families, self.settings.features)?;
        let swapchain_loader = swapchain::Device::new(instance, &device);

        let ctx = boot
            .take_context(adapter, device, graphics_queue, present_queue, swapchain_loader)
            .ok_or(missing(step, InitStep::Surface))?;
        self.pending = None;
        self.done.push(step);

        self.gpu = Some(GpuState {
            ctx,
            features: self.settings.features,
            present: self.settings.present,
            depth_format: adapter.depth_format,
            extent_hint: self.size,
            timeout: self
                .settings
                .acquire_timeout
                .map_or(u64::MAX, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)),
            clear_color: self.settings.clear_color,
            shaders: mem::take(&mut self.shaders),
            vertex_layout: self.scene.mesh.layout.clone(),
            index_count: self.scene.mesh.indices.len() as u32,
            uniform_size: self.scene.uniform_size,
            resize: self.resize.clone(),
            swapchains: SwapchainManager::new(),
            res: Resources::default(),
            syncs: Vec::new(),
            built: mem::take(&mut self.done),
        });
        Ok(())
    }

    /// Tears down whatever the failed run left behind, newest first.
    unsafe fn abort(&mut self) {
        // GpuState's drop walks its own completed steps in reverse.
        drop(self.gpu.take());
        if let Some(mut boot) = self.pending.take() {
            boot.destroy();
        }
    }
}

/// Handles created after the logical device. Null until their step runs.
#[derive(Default)]
struct Resources {
    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    command_pool: vk::CommandPool,
    texture: Option<GpuImage>,
    sampler: vk::Sampler,
    vertex: Option<GpuBuffer>,
    index: Option<GpuBuffer>,
    uniforms: Vec<GpuBuffer>,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
    command_buffers: Vec<vk::CommandBuffer>,
}

/// Everything living on the device. Dropping it idles the device and tears
/// down the completed init steps in reverse.
pub(crate) struct GpuState {
    ctx: DeviceContext,
    features: RenderFeatures,
    present: PresentPreference,
    depth_format: Option<vk::Format>,
    extent_hint: RenderSize,
    timeout: u64,
    clear_color: [f32; 4],
    shaders: ShaderSet,
    vertex_layout: VertexLayout,
    index_count: u32,
    uniform_size: vk::DeviceSize,
    resize: ResizeFlag,
    swapchains: SwapchainManager,
    res: Resources,
    syncs: Vec<FrameSync>,
    built: Vec<InitStep>,
}

impl GpuState {
    fn image_count(&self) -> usize {
        self.swapchains.current().map_or(0, SwapchainState::image_count)
    }

    fn current_chain(&self, step: InitStep) -> Result<&SwapchainState> {
        self.swapchains
            .current()
            .ok_or(missing(step, InitStep::Swapchain))
    }

    fn plan_swapchain(&self, snapshot: &SurfaceSnapshot) -> Result<SwapchainPlan> {
        SwapchainPlan::from_snapshot(
            snapshot,
            self.extent_hint,
            self.present,
            self.ctx.families,
            self.depth_format,
        )
    }

    /// Steps that need scene content, then everything else.
    unsafe fn init_step(&mut self, step: InitStep, scene: &SceneData) -> Result<()> {
        match step {
            InitStep::Swapchain => {
                let plan = self.plan_swapchain(&self.ctx.snapshot()?)?;
                let mut ops = ash_ops(&self.ctx);
                let state = SwapchainState::create(&mut ops, &plan).map_err(into_swapchain_error)?;
                self.swapchains.adopt(state);
            }
            InitStep::TextureImage => {
                let tex = scene.texture.as_ref().ok_or_else(|| {
                    VkError::Scene("texturing is enabled but the scene has no texture".into())
                })?;
                let up = uploader(&self.ctx, self.res.command_pool);
                self.res.texture = Some(texture::create_texture_image(&up, tex)?);
            }
            InitStep::VertexBuffer => {
                let up = uploader(&self.ctx, self.res.command_pool);
                self.res.vertex = Some(
                    up.device_local_buffer(vk::BufferUsageFlags::VERTEX_BUFFER, &scene.mesh.vertices)?,
                );
            }
            InitStep::IndexBuffer => {
                let up = uploader(&self.ctx, self.res.command_pool);
                self.res.index = Some(up.device_local_buffer(
                    vk::BufferUsageFlags::INDEX_BUFFER,
                    bytemuck::cast_slice(&scene.mesh.indices),
                )?);
            }
            other => self.build_step(other)?,
        }
        self.built.push(step);
        Ok(())
    }

    /// Steps that only read device state. The per-swapchain ones among them
    /// are rerun on every rebuild.
    unsafe fn build_step(&mut self, step: InitStep) -> Result<()> {
        let device = &self.ctx.device;
        match step {
            InitStep::RenderPass => {
                let color = self.current_chain(step)?.format;
                self.res.render_pass = pipeline::create_render_pass(device, color, self.depth_format)?;
            }
            InitStep::DescriptorLayout => {
                self.res.set_layout = pipeline::create_descriptor_set_layout(device, self.features)?;
            }
            InitStep::Pipeline => {
                let extent = self.current_chain(step)?.extent;
                let (layout, pipeline) = pipeline::create_pipeline(
                    device,
                    &PipelineDesc {
                        render_pass: self.res.render_pass,
                        extent,
                        set_layout: self.res.set_layout,
                        vertex_layout: &self.vertex_layout,
                        shaders: &self.shaders,
                        features: self.features,
                    },
                )?;
                self.res.pipeline_layout = layout;
                self.res.pipeline = pipeline;
            }
            InitStep::CommandPool => {
                let ci = vk::CommandPoolCreateInfo {
                    s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                    flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                    queue_family_index: self.ctx.families.graphics,
                    ..Default::default()
                };
                self.res.command_pool = device
                    .create_command_pool(&ci, None)
                    .map_vk(VkError::ResourceAllocation, "create_command_pool")?;
            }
            InitStep::DepthResources => {
                let format = self.depth_format.ok_or(VkError::SwapchainCreation(
                    "pick_depth_format",
                    vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
                ))?;
                let mut ops = ash_ops(&self.ctx);
                let state = self
                    .swapchains
                    .current_mut()
                    .ok_or(missing(step, InitStep::Swapchain))?;
                state
                    .attach_depth(&mut ops, format)
                    .map_err(into_swapchain_error)?;
            }
            InitStep::Framebuffers => {
                let render_pass = self.res.render_pass;
                let mut ops = ash_ops(&self.ctx);
                let state = self
                    .swapchains
                    .current_mut()
                    .ok_or(missing(step, InitStep::Swapchain))?;
                state.create_framebuffers(&mut ops, render_pass)?;
            }
            InitStep::TextureSampler => {
                self.res.sampler = texture::create_sampler(device)?;
            }
            InitStep::UniformBuffers => {
                let count = self.image_count();
                self.res.uniforms = descriptors::create_uniform_buffers(
                    device,
                    &self.ctx.memory_props,
                    self.uniform_size,
                    count,
                )?;
            }
            InitStep::DescriptorPool => {
                let count = self.image_count() as u32;
                self.res.descriptor_pool = descriptors::create_descriptor_pool(device, self.features, count)?;
            }
            InitStep::DescriptorSets => {
                let sampler = self.res.sampler;
                let texture = self.res.texture.map(|t| (t.view, sampler));
                self.res.descriptor_sets = descriptors::allocate_descriptor_sets(
                    device,
                    self.res.descriptor_pool,
                    self.res.set_layout,
                    &self.res.uniforms,
                    texture,
                )?;
            }
            InitStep::CommandBuffers => {
                let ai = vk::CommandBufferAllocateInfo {
                    s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                    command_pool: self.res.command_pool,
                    level: vk::CommandBufferLevel::PRIMARY,
                    command_buffer_count: self.image_count() as u32,
                    ..Default::default()
                };
                self.res.command_buffers = device
                    .allocate_command_buffers(&ai)
                    .map_vk(VkError::ResourceAllocation, "allocate_command_buffers")?;
                self.record()?;
            }
            InitStep::SyncObjects => {
                self.syncs = sync::create_frame_syncs(device, MAX_FRAMES_IN_FLIGHT)?;
            }
            other => unreachable!("{other} is not built from device state alone"),
        }
        Ok(())
    }

    /// Undoes one step. Safe on steps whose handles are already null.
    unsafe fn teardown_step(&mut self, step: InitStep) {
        let device = &self.ctx.device;
        match step {
            InitStep::CommandBuffers => {
                if !self.res.command_buffers.is_empty() {
                    device.free_command_buffers(self.res.command_pool, &self.res.command_buffers);
                    self.res.command_buffers.clear();
                }
            }
            // Freed with the pool.
            InitStep::DescriptorSets => self.res.descriptor_sets.clear(),
            InitStep::DescriptorPool => {
                device.destroy_descriptor_pool(mem::take(&mut self.res.descriptor_pool), None)
            }
            InitStep::UniformBuffers => {
                for b in self.res.uniforms.drain(..).rev() {
                    b.destroy(device);
                }
            }
            InitStep::IndexBuffer => {
                if let Some(b) = self.res.index.take() {
                    b.destroy(device);
                }
            }
            InitStep::VertexBuffer => {
                if let Some(b) = self.res.vertex.take() {
                    b.destroy(device);
                }
            }
            InitStep::TextureSampler => device.destroy_sampler(mem::take(&mut self.res.sampler), None),
            InitStep::TextureImage => {
                if let Some(t) = self.res.texture.take() {
                    t.destroy(device);
                }
            }
            InitStep::Framebuffers => {
                if let Some(state) = self.swapchains.current_mut() {
                    for fb in state.framebuffers.drain(..).rev() {
                        device.destroy_framebuffer(fb, None);
                    }
                }
            }
            InitStep::DepthResources => {
                if let Some(depth) = self.swapchains.current_mut().and_then(|s| s.depth.take()) {
                    depth.destroy(device);
                }
            }
            InitStep::CommandPool => device.destroy_command_pool(mem::take(&mut self.res.command_pool), None),
            InitStep::Pipeline => {
                device.destroy_pipeline(mem::take(&mut self.res.pipeline), None);
                device.destroy_pipeline_layout(mem::take(&mut self.res.pipeline_layout), None);
            }
            InitStep::DescriptorLayout => {
                device.destroy_descriptor_set_layout(mem::take(&mut self.res.set_layout), None)
            }
            InitStep::RenderPass => device.destroy_render_pass(mem::take(&mut self.res.render_pass), None),
            InitStep::Swapchain => {
                let mut ops = ash_ops(&self.ctx);
                self.swapchains.destroy(&mut ops);
            }
            InitStep::SyncObjects => {
                for s in self.syncs.drain(..).rev() {
                    s.destroy(device);
                }
            }
            InitStep::LogicalDevice => self.ctx.device.destroy_device(None),
            InitStep::Adapter => {}
            InitStep::Surface => self
                .ctx
                .surface_loader
                .destroy_surface(mem::take(&mut self.ctx.surface), None),
            InitStep::DebugMessenger => {
                if let Some(d) = self.ctx.debug.take() {
                    d.destroy();
                }
            }
            InitStep::Instance => self.ctx.instance.destroy_instance(None),
        }
    }

    /// Destroys the current generation, newest first.
    unsafe fn destroy_generation(&mut self) {
        let steps: Vec<InitStep> = self
            .built
            .iter()
            .rev()
            .copied()
            .filter(|s| s.per_swapchain())
            .collect();
        for step in steps {
            self.teardown_step(step);
        }
    }

    /// Replaces the current generation. The device must be idle.
    ///
    /// A zero-sized surface keeps the old generation and re-raises the resize
    /// flag so the rebuild is retried once the window is visible again.
    unsafe fn rebuild(&mut self) -> Result<usize> {
        let rebuild = plan_rebuild(
            &self.ctx.snapshot()?,
            self.extent_hint,
            self.present,
            self.ctx.families,
            self.depth_format,
            &self.resize,
        )?;
        let Rebuild::Planned(plan) = rebuild else {
            return Ok(self.image_count());
        };

        self.destroy_generation();

        self.res.render_pass =
            pipeline::create_render_pass(&self.ctx.device, plan.surface_format.format, plan.depth_format)?;
        let mut ops = ash_ops(&self.ctx);
        self.swapchains.build(&mut ops, &plan, self.res.render_pass)?;
        for step in REBUILT_WITH_CHAIN {
            self.build_step(step)?;
        }
        Ok(self.image_count())
    }

    /// Records one command buffer per image: clear, bind, draw indexed.
    unsafe fn record(&self) -> Result<()> {
        let step = InitStep::CommandBuffers;
        let device = &self.ctx.device;
        let state = self.current_chain(step)?;
        let vertex = self.res.vertex.ok_or(missing(step, InitStep::VertexBuffer))?;
        let index = self.res.index.ok_or(missing(step, InitStep::IndexBuffer))?;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let clear_count = if state.depth.is_some() { 2 } else { 1 };

        for (i, (&cmd, &framebuffer)) in self
            .res
            .command_buffers
            .iter()
            .zip(&state.framebuffers)
            .enumerate()
        {
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                ..Default::default()
            };
            device
                .begin_command_buffer(cmd, &begin)
                .map_vk(VkError::Vulkan, "begin_command_buffer")?;

            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: self.res.render_pass,
                framebuffer,
                render_area: vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: state.extent,
                },
                clear_value_count: clear_count,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };
            device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.res.pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[vertex.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, index.buffer, 0, vk::IndexType::UINT16);
            if let Some(&set) = self.res.descriptor_sets.get(i) {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.res.pipeline_layout,
                    0,
                    &[set],
                    &[],
                );
            }
            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
            device.cmd_end_render_pass(cmd);

            device
                .end_command_buffer(cmd)
                .map_vk(VkError::Vulkan, "end_command_buffer")?;
        }
        Ok(())
    }
}

impl FrameBackend for GpuState {
    fn wait_fence(&mut self, fence: vk::Fence) -> Result<()> {
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[fence], true, self.timeout)
                .map_vk(VkError::Vulkan, "wait_for_fences")
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<()> {
        unsafe {
            self.ctx
                .device
                .reset_fences(&[fence])
                .map_vk(VkError::Vulkan, "reset_fences")
        }
    }

    fn acquire_image(&mut self, signal: vk::Semaphore) -> Result<Acquire> {
        let Some(chain) = self.swapchains.current().map(|s| s.chain) else {
            return Ok(Acquire::OutOfDate);
        };
        let acquired = unsafe {
            self.ctx
                .swapchain_loader
                .acquire_next_image(chain, self.timeout, signal, vk::Fence::null())
        };
        match acquired {
            Ok((image_index, suboptimal)) => Ok(Acquire::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(e) => Err(VkError::AcquireImage(e)),
        }
    }

    fn prepare_image(&mut self, image_index: u32, uniforms: &[u8]) -> Result<()> {
        if uniforms.is_empty() {
            return Ok(());
        }
        let ubo = self
            .res
            .uniforms
            .get(image_index as usize)
            .ok_or(missing(InitStep::CommandBuffers, InitStep::UniformBuffers))?;
        unsafe { ubo.write(&self.ctx.device, uniforms) }
    }

    fn submit(&mut self, image_index: u32, sync: &FrameSync) -> Result<()> {
        let cmd = *self
            .res
            .command_buffers
            .get(image_index as usize)
            .ok_or(missing(InitStep::SyncObjects, InitStep::CommandBuffers))?;
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.image_available,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &sync.render_finished,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.graphics_queue, std::slice::from_ref(&si), sync.in_flight)
                .map_vk(VkError::Vulkan, "queue_submit")
        }
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<Present> {
        let Some(chain) = self.swapchains.current().map(|s| s.chain) else {
            return Ok(Present::OutOfDate);
        };
        let pi = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &chain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.ctx.swapchain_loader.queue_present(self.ctx.present_queue, &pi) } {
            Ok(false) => Ok(Present::Ok),
            Ok(true) => Ok(Present::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::OutOfDate),
            Err(e) => Err(VkError::Present(e)),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe {
            self.ctx
                .device
                .device_wait_idle()
                .map_vk(VkError::Vulkan, "device_wait_idle")
        }
    }

    fn recreate(&mut self) -> Result<usize> {
        unsafe { self.rebuild() }
    }
}

impl Drop for GpuState {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.ctx.device.device_wait_idle() {
                warn!("device_wait_idle during teardown: {e}");
            }
            while let Some(step) = self.built.pop() {
                self.teardown_step(step);
            }
        }
        debug!("vulkan state destroyed");
    }
}

pub struct VkRenderer {
    driver: FrameDriver,
    gpu: GpuState,
    resize: ResizeFlag,
    size: RenderSize,
}

impl VkRenderer {
    fn create(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        scene: &SceneData,
    ) -> Result<Self> {
        scene
            .mesh
            .validate()
            .map_err(|e| VkError::Scene(format!("{e:#}")))?;
        if scene.uniform_size == 0 {
            return Err(VkError::Scene("uniform size is zero".into()));
        }

        let display = display
            .display_handle()
            .map_err(|e| VkError::Window(e.to_string()))?
            .as_raw();
        let window = window
            .window_handle()
            .map_err(|e| VkError::Window(e.to_string()))?
            .as_raw();

        let shaders = ShaderSet::load(settings.shader_dir.as_deref())?;
        let plan = InitPlan::new(settings.features)?;
        let entry = unsafe { Entry::load()? };
        let resize = ResizeFlag::new();

        let mut boot = Boot {
            display,
            window,
            size,
            settings,
            scene,
            shaders,
            resize: resize.clone(),
            done: Vec::with_capacity(plan.steps().len()),
            pending: Some(Bootstrap::new(entry)),
            gpu: None,
        };
        let result = plan.run(|step| unsafe { boot.step(step) });
        if let Err(failure) = result {
            debug!(
                step = %failure.step,
                completed = failure.completed.len(),
                "init failed, tearing down"
            );
            unsafe { boot.abort() };
            return Err(failure.into());
        }
        let gpu = boot
            .gpu
            .take()
            .ok_or(missing(InitStep::SyncObjects, InitStep::LogicalDevice))?;

        let ring = FrameRing::new(gpu.syncs.clone(), gpu.image_count());
        Ok(Self {
            driver: FrameDriver::new(ring),
            gpu,
            resize,
            size,
        })
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
        scene: &SceneData,
    ) -> anyhow::Result<Self> {
        let r = Self::create(window, display, size, settings, scene).context("Vulkan init")?;
        let chain = r.gpu.current_chain(InitStep::Swapchain)?;
        info!(
            "Vulkan renderer ready ({}x{}, {:?}, {} images, features {:?})",
            chain.extent.width,
            chain.extent.height,
            chain.format,
            chain.image_count(),
            r.gpu.features
        );
        Ok(r)
    }

    fn resize(&mut self, size: RenderSize) {
        if size == self.size {
            return;
        }
        if size.is_zero() != self.size.is_zero() {
            info!(
                "framebuffer {}x{} -> rendering {}",
                size.width,
                size.height,
                if size.is_zero() { "paused" } else { "resumed" }
            );
        }
        self.size = size;
        self.gpu.extent_hint = size;
        self.resize.raise();
    }

    fn render(&mut self, uniforms: &[u8]) -> anyhow::Result<FrameStatus> {
        if self.size.is_zero() {
            return Ok(FrameStatus::Paused);
        }
        let status = self
            .driver
            .drive_frame(&mut self.gpu, &self.resize, uniforms)
            .context("Vulkan frame")?;
        Ok(status)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) -> anyhow::Result<()> {
        self.gpu.clear_color = rgba;
        self.gpu.wait_idle()?;
        unsafe { self.gpu.record() }.context("re-recording command buffers")?;
        Ok(())
    }

    fn set_vsync(&mut self, on: bool) {
        let present = if on {
            PresentPreference::Vsync
        } else {
            PresentPreference::LowLatency
        };
        if present != self.gpu.present {
            info!("present preference -> {present:?}");
            self.gpu.present = present;
            self.resize.raise();
        }
    }

    fn resize_flag(&self) -> ResizeFlag {
        self.resize.clone()
    }
}
