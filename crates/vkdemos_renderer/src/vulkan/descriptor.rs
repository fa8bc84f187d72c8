//! Descriptor set layouts, pools and writes

use anyhow::Context;
use ash::vk;
use log::debug;

use super::Device;

/// Represents a descriptor set layout.
///
/// Descriptor set layouts define the structure of descriptor sets,
/// which are used to bind resources (images, buffers, etc.) to shaders.
pub struct DescriptorSetLayout {
    /// The Vulkan descriptor set layout handle
    handle: vk::DescriptorSetLayout,
    /// The device that owns this layout
    device: ash::Device,
}

impl DescriptorSetLayout {
    /// Creates a new descriptor set layout from bindings.
    pub fn new(
        device: &Device,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> anyhow::Result<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let handle = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)
        }
        .context("Failed to create descriptor set layout")?;

        debug!(
            "Created descriptor set layout with {} bindings",
            bindings.len()
        );

        Ok(Self {
            handle,
            device: device.handle().clone(),
        })
    }

    /// Returns the descriptor set layout handle.
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.handle, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// A single-descriptor layout binding.
pub fn layout_binding(
    binding: u32,
    descriptor_type: vk::DescriptorType,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(binding)
        .descriptor_type(descriptor_type)
        .descriptor_count(1)
        .stage_flags(stages)
}

/// Pool sizes covering every binding in `bindings`, merged per descriptor type.
pub fn pool_sizes_for(bindings: &[vk::DescriptorSetLayoutBinding]) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for binding in bindings {
        match sizes.iter_mut().find(|size| size.ty == binding.descriptor_type) {
            Some(size) => size.descriptor_count += binding.descriptor_count,
            None => sizes.push(vk::DescriptorPoolSize {
                ty: binding.descriptor_type,
                descriptor_count: binding.descriptor_count,
            }),
        }
    }
    sizes
}

/// A descriptor pool. Sets allocated from it are released with the pool.
pub struct DescriptorPool {
    handle: vk::DescriptorPool,
    device: ash::Device,
}

impl DescriptorPool {
    /// Creates a pool able to hold `max_sets` sets drawing from `pool_sizes`.
    pub fn new(
        device: &Device,
        pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> anyhow::Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(pool_sizes)
            .max_sets(max_sets);

        let handle = unsafe { device.handle().create_descriptor_pool(&create_info, None) }
            .context("Failed to create descriptor pool")?;

        debug!("Created descriptor pool for {max_sets} sets");

        Ok(Self {
            handle,
            device: device.handle().clone(),
        })
    }

    /// Allocates one set per layout.
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> anyhow::Result<Vec<vk::DescriptorSet>> {
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.handle)
            .set_layouts(layouts);

        unsafe { self.device.allocate_descriptor_sets(&allocate_info) }
            .context("Failed to allocate descriptor sets")
    }

    /// Points `binding` of `set` at storage image `view`, used in the `GENERAL` layout.
    pub fn write_storage_image(&self, set: vk::DescriptorSet, binding: u32, view: vk::ImageView) {
        self.write_image(
            set,
            binding,
            vk::DescriptorType::STORAGE_IMAGE,
            view,
            vk::ImageLayout::GENERAL,
        );
    }

    /// Points `binding` of `set` at input attachment `view`.
    pub fn write_input_attachment(&self, set: vk::DescriptorSet, binding: u32, view: vk::ImageView) {
        self.write_image(
            set,
            binding,
            vk::DescriptorType::INPUT_ATTACHMENT,
            view,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
    }

    /// Points `binding` of `set` at the whole of `buffer` as a uniform buffer.
    pub fn write_uniform_buffer(&self, set: vk::DescriptorSet, binding: u32, buffer: vk::Buffer) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info);
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
    }

    fn write_image(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) {
        let image_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: view,
            image_layout: layout,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .descriptor_type(descriptor_type)
            .image_info(&image_info);
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.handle, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_merge_by_type() {
        let bindings = [
            layout_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            ),
            layout_binding(
                1,
                vk::DescriptorType::INPUT_ATTACHMENT,
                vk::ShaderStageFlags::FRAGMENT,
            ),
            layout_binding(
                2,
                vk::DescriptorType::INPUT_ATTACHMENT,
                vk::ShaderStageFlags::FRAGMENT,
            ),
            layout_binding(
                3,
                vk::DescriptorType::INPUT_ATTACHMENT,
                vk::ShaderStageFlags::FRAGMENT,
            ),
        ];
        let sizes = pool_sizes_for(&bindings);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 1);
        assert_eq!(sizes[1].ty, vk::DescriptorType::INPUT_ATTACHMENT);
        assert_eq!(sizes[1].descriptor_count, 3);
    }

    #[test]
    fn layout_binding_holds_one_descriptor() {
        let binding = layout_binding(
            4,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::ShaderStageFlags::COMPUTE,
        );
        assert_eq!(binding.binding, 4);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::COMPUTE);
    }
}
