// SPDX-License-Identifier: CEPL-1.0
//! Per-image uniform buffers and the descriptor sets that point at them.

use crate::error::{Result, VkError, VkResultExt};
use crate::memory::{self, GpuBuffer};
use crate::pipeline::{SAMPLER_BINDING, UNIFORM_BINDING};
use ash::vk;
use prism_render::RenderFeatures;

pub fn pool_sizes(features: RenderFeatures, count: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes = vec![vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: count,
    }];
    if features.contains(RenderFeatures::TEXTURING) {
        sizes.push(vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: count,
        });
    }
    sizes
}

/// One host-visible, coherent buffer per swapchain image.
pub unsafe fn create_uniform_buffers(
    device: &ash::Device,
    memory_props: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    count: usize,
) -> Result<Vec<GpuBuffer>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        match memory::create_buffer(
            device,
            memory_props,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) {
            Ok(b) => out.push(b),
            Err(e) => {
                for b in out.iter().rev() {
                    b.destroy(device);
                }
                return Err(e);
            }
        }
    }
    Ok(out)
}

pub unsafe fn create_descriptor_pool(
    device: &ash::Device,
    features: RenderFeatures,
    count: u32,
) -> Result<vk::DescriptorPool> {
    let sizes = pool_sizes(features, count);
    let ci = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets: count,
        pool_size_count: sizes.len() as u32,
        p_pool_sizes: sizes.as_ptr(),
        ..Default::default()
    };
    device
        .create_descriptor_pool(&ci, None)
        .map_vk(VkError::ResourceAllocation, "create_descriptor_pool")
}

/// Allocates one set per uniform buffer and points each at its buffer and,
/// when given, the shared texture.
pub unsafe fn allocate_descriptor_sets(
    device: &ash::Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    uniforms: &[GpuBuffer],
    texture: Option<(vk::ImageView, vk::Sampler)>,
) -> Result<Vec<vk::DescriptorSet>> {
    let layouts = vec![layout; uniforms.len()];
    let ai = vk::DescriptorSetAllocateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
        descriptor_pool: pool,
        descriptor_set_count: layouts.len() as u32,
        p_set_layouts: layouts.as_ptr(),
        ..Default::default()
    };
    let sets = device
        .allocate_descriptor_sets(&ai)
        .map_vk(VkError::ResourceAllocation, "allocate_descriptor_sets")?;

    for (&set, ubo) in sets.iter().zip(uniforms) {
        let buffer_info = vk::DescriptorBufferInfo {
            buffer: ubo.buffer,
            offset: 0,
            range: ubo.size,
        };
        let image_info = texture.map(|(view, sampler)| vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        });

        let mut writes = vec![vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: UNIFORM_BINDING,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            p_buffer_info: &buffer_info,
            ..Default::default()
        }];
        if let Some(info) = &image_info {
            writes.push(vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: SAMPLER_BINDING,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                p_image_info: info,
                ..Default::default()
            });
        }
        device.update_descriptor_sets(&writes, &[]);
    }
    Ok(sets)
}
