// SPDX-License-Identifier: CEPL-1.0
//! Instance, adapter and logical device.

use crate::error::{Result, VkError, VkResultExt};
use crate::swapchain::SurfaceSnapshot;
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use prism_render::RenderFeatures;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr};
use tracing::{debug, info, warn};

const APP_NAME: &CStr = c"prism";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Depth formats in order of preference.
pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// First family with graphics and first family that can present, stopping as
/// soon as both are known.
pub fn resolve_families(flags: &[vk::QueueFlags], present: &[bool]) -> (Option<u32>, Option<u32>) {
    let mut graphics = None;
    let mut presenting = None;
    for (i, f) in flags.iter().enumerate() {
        if graphics.is_none() && f.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(i as u32);
        }
        if presenting.is_none() && present.get(i).copied().unwrap_or(false) {
            presenting = Some(i as u32);
        }
        if graphics.is_some() && presenting.is_some() {
            break;
        }
    }
    (graphics, presenting)
}

/// What adapter selection needs to know about one physical device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdapterReport {
    pub name: String,
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
    pub swapchain_extension: bool,
    pub format_count: usize,
    pub present_mode_count: usize,
    pub sampler_anisotropy: bool,
}

impl AdapterReport {
    pub fn families(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics_family?,
            present: self.present_family?,
        })
    }

    /// Why this adapter cannot be used, or `None` if it can.
    pub fn rejection(&self, features: RenderFeatures) -> Option<&'static str> {
        if self.graphics_family.is_none() {
            Some("no graphics queue family")
        } else if self.present_family.is_none() {
            Some("no queue family can present to the surface")
        } else if !self.swapchain_extension {
            Some("VK_KHR_swapchain unsupported")
        } else if self.format_count == 0 {
            Some("surface reports no formats")
        } else if self.present_mode_count == 0 {
            Some("surface reports no present modes")
        } else if features.contains(RenderFeatures::TEXTURING) && !self.sampler_anisotropy {
            Some("samplerAnisotropy unsupported")
        } else {
            None
        }
    }
}

/// First eligible adapter in enumeration order.
pub fn first_eligible(
    reports: &[AdapterReport],
    features: RenderFeatures,
) -> Option<(usize, QueueFamilies)> {
    reports.iter().enumerate().find_map(|(i, r)| match r.rejection(features) {
        None => r.families().map(|f| (i, f)),
        Some(_) => None,
    })
}

pub struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub unsafe fn create(entry: &Entry, instance: &Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let handle = loader
            .create_debug_utils_messenger(&ci, None)
            .map_vk(VkError::Vulkan, "create_debug_utils_messenger")?;
        Ok(Self { loader, handle })
    }

    pub unsafe fn destroy(&self) {
        self.loader.destroy_debug_utils_messenger(self.handle, None);
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: "vulkan", "[{types:?}] {msg}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: "vulkan", "[{types:?}] {msg}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::debug!(target: "vulkan", "[{types:?}] {msg}")
        }
        _ => tracing::trace!(target: "vulkan", "[{types:?}] {msg}"),
    }
    vk::FALSE
}

/// Validation is a debug-build feature, and only if the layer is installed.
pub unsafe fn validation_available(entry: &Entry) -> bool {
    if !cfg!(debug_assertions) {
        return false;
    }
    let found = entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default()
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER);
    if !found {
        warn!("{VALIDATION_LAYER:?} not installed, running without validation");
    }
    found
}

pub unsafe fn create_instance(
    entry: &Entry,
    display: RawDisplayHandle,
    validation: bool,
) -> Result<Instance> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: vk::make_api_version(0, 0, 1, 0),
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: vk::make_api_version(0, 0, 1, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let wsi = ash_window::enumerate_required_extensions(display)
        .map_vk(VkError::DeviceCreation, "enumerate_required_extensions")?;
    let mut extensions: Vec<*const c_char> = wsi.to_vec();
    let mut layers: Vec<*const c_char> = Vec::new();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    entry
        .create_instance(&create_info, None)
        .map_vk(VkError::DeviceCreation, "create_instance")
}

pub unsafe fn probe_adapter(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Result<AdapterReport> {
    let props = instance.get_physical_device_properties(phys);
    let name = CStr::from_ptr(props.device_name.as_ptr())
        .to_string_lossy()
        .into_owned();

    let qprops = instance.get_physical_device_queue_family_properties(phys);
    let flags: Vec<_> = qprops.iter().map(|q| q.queue_flags).collect();
    let present: Vec<bool> = (0..qprops.len() as u32)
        .map(|i| {
            surface_loader
                .get_physical_device_surface_support(phys, i, surface)
                .unwrap_or(false)
        })
        .collect();
    let (graphics_family, present_family) = resolve_families(&flags, &present);

    let swapchain_extension = instance
        .enumerate_device_extension_properties(phys)
        .map_vk(VkError::Vulkan, "enumerate_device_extension_properties")?
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME);

    let (format_count, present_mode_count) = if swapchain_extension {
        (
            surface_loader
                .get_physical_device_surface_formats(phys, surface)
                .map(|f| f.len())
                .unwrap_or(0),
            surface_loader
                .get_physical_device_surface_present_modes(phys, surface)
                .map(|m| m.len())
                .unwrap_or(0),
        )
    } else {
        (0, 0)
    };

    let sampler_anisotropy = instance.get_physical_device_features(phys).sampler_anisotropy == vk::TRUE;

    Ok(AdapterReport {
        name,
        graphics_family,
        present_family,
        swapchain_extension,
        format_count,
        present_mode_count,
        sampler_anisotropy,
    })
}

pub unsafe fn select_adapter(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    features: RenderFeatures,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let adapters = instance
        .enumerate_physical_devices()
        .map_vk(VkError::Vulkan, "enumerate_physical_devices")?;
    if adapters.is_empty() {
        return Err(VkError::NoSuitableDevice("no Vulkan adapters".into()));
    }

    let mut reports = Vec::with_capacity(adapters.len());
    for &phys in &adapters {
        reports.push(probe_adapter(instance, surface_loader, surface, phys)?);
    }

    match first_eligible(&reports, features) {
        Some((i, families)) => {
            info!(
                "adapter: {} (graphics family {}, present family {})",
                reports[i].name, families.graphics, families.present
            );
            Ok((adapters[i], families))
        }
        None => {
            let why: Vec<String> = reports
                .iter()
                .map(|r| format!("{}: {}", r.name, r.rejection(features).unwrap_or("?")))
                .collect();
            Err(VkError::NoSuitableDevice(why.join("; ")))
        }
    }
}

/// One queue per distinct family. Returns (device, graphics queue, present queue).
pub unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
    features: RenderFeatures,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let enabled = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: features.contains(RenderFeatures::TEXTURING).into(),
        ..Default::default()
    };
    let device_exts = [swapchain::NAME.as_ptr()];

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &enabled,
        ..Default::default()
    };
    let device = instance
        .create_device(phys, &dinfo, None)
        .map_vk(VkError::DeviceCreation, "create_device")?;

    let graphics = device.get_device_queue(families.graphics, 0);
    let present = device.get_device_queue(families.present, 0);
    debug!("logical device created with {} queue(s)", queue_infos.len());
    Ok((device, graphics, present))
}

pub fn first_supported_format(
    candidates: &[vk::Format],
    supports: impl Fn(vk::Format) -> bool,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&f| supports(f))
}

pub unsafe fn pick_depth_format(instance: &Instance, phys: vk::PhysicalDevice) -> Result<vk::Format> {
    first_supported_format(&DEPTH_CANDIDATES, |fmt| {
        instance
            .get_physical_device_format_properties(phys, fmt)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
    .ok_or(VkError::SwapchainCreation(
        "pick_depth_format",
        vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
    ))
}

/// Everything tied to the instance and logical device. Built once; outlives
/// every swapchain generation.
pub struct DeviceContext {
    pub entry: Entry,
    pub instance: Instance,
    pub debug: Option<DebugMessenger>,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub adapter: vk::PhysicalDevice,
    pub families: QueueFamilies,
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub memory_props: vk::PhysicalDeviceMemoryProperties,
    pub swapchain_loader: swapchain::Device,
}

impl DeviceContext {
    /// Fresh surface query; never reuse one across a resize.
    pub unsafe fn snapshot(&self) -> Result<SurfaceSnapshot> {
        SurfaceSnapshot::query(&self.surface_loader, self.adapter, self.surface)
    }
}
