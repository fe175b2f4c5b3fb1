// SPDX-License-Identifier: CEPL-1.0
//! Buffers, images and the one-shot command path used to fill them.

use crate::error::{Result, VkError, VkResultExt};
use ash::vk;

/// First memory type allowed by `type_bits` whose properties include `flags`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..props.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize].property_flags.contains(flags)
        })
        .ok_or(VkError::NoMemoryType { type_bits, flags })
}

#[derive(Clone, Copy, Debug)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }

    /// Fails instead of truncating when `len` bytes do not fit.
    pub fn check_fits(&self, len: usize) -> Result<()> {
        if len as vk::DeviceSize > self.size {
            return Err(VkError::Scene(format!(
                "{len} bytes written to a {}-byte buffer",
                self.size
            )));
        }
        Ok(())
    }

    /// Copies `bytes` into a host-visible buffer.
    pub unsafe fn write(&self, device: &ash::Device, bytes: &[u8]) -> Result<()> {
        self.check_fits(bytes.len())?;
        let len = bytes.len();
        let ptr = device
            .map_memory(self.memory, 0, len as vk::DeviceSize, vk::MemoryMapFlags::empty())
            .map_vk(VkError::ResourceAllocation, "map_memory")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), len);
        device.unmap_memory(self.memory);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl GpuImage {
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

pub unsafe fn create_buffer(
    device: &ash::Device,
    memory_props: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    flags: vk::MemoryPropertyFlags,
) -> Result<GpuBuffer> {
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let buffer = device
        .create_buffer(&bci, None)
        .map_vk(VkError::ResourceAllocation, "create_buffer")?;

    let req = device.get_buffer_memory_requirements(buffer);
    let memory = match allocate(device, memory_props, req, flags) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_buffer(buffer, None);
            return Err(e);
        }
    };
    if let Err(e) = device.bind_buffer_memory(buffer, memory, 0) {
        device.destroy_buffer(buffer, None);
        device.free_memory(memory, None);
        return Err(VkError::ResourceAllocation("bind_buffer_memory", e));
    }
    Ok(GpuBuffer {
        buffer,
        memory,
        size,
    })
}

unsafe fn allocate(
    device: &ash::Device,
    memory_props: &vk::PhysicalDeviceMemoryProperties,
    req: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(memory_props, req.memory_type_bits, flags)?;
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index,
        ..Default::default()
    };
    device
        .allocate_memory(&mai, None)
        .map_vk(VkError::ResourceAllocation, "allocate_memory")
}

pub unsafe fn create_image(
    device: &ash::Device,
    memory_props: &vk::PhysicalDeviceMemoryProperties,
    extent: vk::Extent2D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    aspect: vk::ImageAspectFlags,
) -> Result<GpuImage> {
    let img_ci = vk::ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO,
        image_type: vk::ImageType::TYPE_2D,
        format,
        extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
        mip_levels: 1,
        array_layers: 1,
        samples: vk::SampleCountFlags::TYPE_1,
        tiling: vk::ImageTiling::OPTIMAL,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        ..Default::default()
    };
    let image = device
        .create_image(&img_ci, None)
        .map_vk(VkError::ResourceAllocation, "create_image")?;

    let req = device.get_image_memory_requirements(image);
    let memory = match allocate(device, memory_props, req, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_image(image, None);
            return Err(e);
        }
    };
    if let Err(e) = device.bind_image_memory(image, memory, 0) {
        device.destroy_image(image, None);
        device.free_memory(memory, None);
        return Err(VkError::ResourceAllocation("bind_image_memory", e));
    }

    let view = match create_view(device, image, format, aspect) {
        Ok(v) => v,
        Err(e) => {
            device.destroy_image(image, None);
            device.free_memory(memory, None);
            return Err(VkError::ResourceAllocation("create_image_view", e));
        }
    };
    Ok(GpuImage {
        image,
        memory,
        view,
    })
}

pub unsafe fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> ash::prelude::VkResult<vk::ImageView> {
    let view_ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: subresource(aspect_mask),
        ..Default::default()
    };
    device.create_image_view(&view_ci, None)
}

pub(crate) fn subresource(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Command pool and queue used for blocking transfer work.
#[derive(Clone, Copy)]
pub struct Uploader<'a> {
    pub device: &'a ash::Device,
    pub memory_props: &'a vk::PhysicalDeviceMemoryProperties,
    pub pool: vk::CommandPool,
    pub queue: vk::Queue,
}

impl Uploader<'_> {
    /// Records `record` into a throwaway command buffer, submits it and waits
    /// for the queue to drain.
    pub unsafe fn one_shot<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let device = self.device;
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = device
            .allocate_command_buffers(&ai)
            .map_vk(VkError::ResourceAllocation, "allocate_command_buffers(one-shot)")?[0];

        let result = (|| -> Result<()> {
            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            device
                .begin_command_buffer(cmd, &bi)
                .map_vk(VkError::Vulkan, "begin_command_buffer(one-shot)")?;
            record(cmd);
            device
                .end_command_buffer(cmd)
                .map_vk(VkError::Vulkan, "end_command_buffer(one-shot)")?;

            let si = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            device
                .queue_submit(self.queue, std::slice::from_ref(&si), vk::Fence::null())
                .map_vk(VkError::Vulkan, "queue_submit(one-shot)")?;
            device
                .queue_wait_idle(self.queue)
                .map_vk(VkError::Vulkan, "queue_wait_idle(one-shot)")
        })();

        device.free_command_buffers(self.pool, std::slice::from_ref(&cmd));
        result
    }

    /// Host-visible staging buffer holding `bytes`. Caller destroys it.
    pub unsafe fn staging(&self, bytes: &[u8]) -> Result<GpuBuffer> {
        let staging = create_buffer(
            self.device,
            self.memory_props,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        if let Err(e) = staging.write(self.device, bytes) {
            staging.destroy(self.device);
            return Err(e);
        }
        Ok(staging)
    }

    /// Device-local buffer with `usage`, filled from `bytes` through a staging copy.
    pub unsafe fn device_local_buffer(
        &self,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> Result<GpuBuffer> {
        let size = bytes.len() as vk::DeviceSize;
        let dst = create_buffer(
            self.device,
            self.memory_props,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        if let Err(e) = self.upload_via_staging(dst.buffer, bytes) {
            dst.destroy(self.device);
            return Err(e);
        }
        Ok(dst)
    }

    pub unsafe fn upload_via_staging(&self, dst: vk::Buffer, bytes: &[u8]) -> Result<()> {
        let staging = self.staging(bytes)?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: staging.size,
        };
        let result = self.one_shot(|cmd| {
            self.device
                .cmd_copy_buffer(cmd, staging.buffer, dst, std::slice::from_ref(&region));
        });
        staging.destroy(self.device);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_write_is_rejected() {
        let ubo = GpuBuffer {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            size: 192,
        };
        assert!(ubo.check_fits(192).is_ok());
        assert!(ubo.check_fits(0).is_ok());
        let err = ubo.check_fits(193).unwrap_err();
        assert!(matches!(err, VkError::Scene(_)), "{err}");
        assert!(err.to_string().contains("193"));
    }

    fn props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &f) in flags.iter().enumerate() {
            p.memory_types[i].property_flags = f;
        }
        p
    }

    #[test]
    fn picks_first_type_allowed_and_matching() {
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type(&p, 0b111, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&p, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            1
        );
        assert_eq!(
            find_memory_type(&p, 0b100, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            2
        );
    }

    #[test]
    fn no_match_is_an_allocation_error() {
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&p, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        assert!(matches!(err, VkError::NoMemoryType { type_bits: 1, .. }));

        // Type bits beyond memory_type_count are ignored.
        let err = find_memory_type(&p, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap_err();
        assert!(matches!(err, VkError::NoMemoryType { .. }));
    }
}
