// Pool-of-pools descriptor allocator.
//
// Generalizes descpool.rs's single combined-image-sampler pool into one that
// carries the frame's mixed binding types (uniform buffers, combined image
// samplers, storage buffers, storage images), and retries pool growth on
// OUT_OF_POOL_MEMORY / FRAGMENTED_POOL instead of assuming one pool suffices.

use ash::vk;

use crate::error::{RenderError, Result};

const POOL_SET_CAPACITY: u32 = 1024;

fn pool_sizes() -> [vk::DescriptorPoolSize; 4] {
    [
        vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(POOL_SET_CAPACITY)
            .build(),
        vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(POOL_SET_CAPACITY)
            .build(),
        vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(POOL_SET_CAPACITY)
            .build(),
        vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(POOL_SET_CAPACITY)
            .build(),
    ]
}

struct Pool {
    handle: vk::DescriptorPool,
    sets_allocated: u32,
}

/// Allocates descriptor sets against a growable list of pools. A new pool is
/// added whenever the ideal pool is full or a Vulkan call reports the pool
/// is fragmented/exhausted.
pub struct DescriptorAllocator {
    pools: Vec<Pool>,
}

impl DescriptorAllocator {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let mut ret = Self { pools: Vec::new() };
        ret.add_pool(device)?;
        Ok(ret)
    }

    fn add_pool(&mut self, device: &ash::Device) -> Result<usize> {
        let sizes = pool_sizes();
        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(POOL_SET_CAPACITY);

        let handle = unsafe {
            device
                .create_descriptor_pool(&info, None)
                .map_err(RenderError::Vulkan)?
        };

        self.pools.push(Pool {
            handle,
            sets_allocated: 0,
        });
        Ok(self.pools.len() - 1)
    }

    fn ideal_pool(&mut self, device: &ash::Device, count: u32) -> Result<usize> {
        if let Some(i) = self
            .pools
            .iter()
            .position(|p| p.sets_allocated + count <= POOL_SET_CAPACITY)
        {
            return Ok(i);
        }
        self.add_pool(device)
    }

    /// Allocates `count` sets of `layout`, retrying against a fresh pool if
    /// the driver reports the chosen pool is out of memory or fragmented.
    pub fn allocate(
        &mut self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count as usize];

        for attempt in 0..2 {
            let pool_idx = self.ideal_pool(device, count)?;
            let info = vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(self.pools[pool_idx].handle)
                .set_layouts(&layouts);

            match unsafe { device.allocate_descriptor_sets(&info) } {
                Ok(sets) => {
                    self.pools[pool_idx].sets_allocated += count;
                    return Ok(sets);
                }
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
                | Err(vk::Result::ERROR_FRAGMENTED_POOL)
                    if attempt == 0 =>
                {
                    // force a new pool on the retry by marking this one full
                    self.pools[pool_idx].sets_allocated = POOL_SET_CAPACITY;
                    continue;
                }
                Err(e) => return Err(RenderError::Vulkan(e)),
            }
        }

        Err(RenderError::DescriptorPoolExhausted)
    }

    pub fn free(&self, device: &ash::Device, pool_idx: usize, sets: &[vk::DescriptorSet]) {
        unsafe {
            let _ = device.free_descriptor_sets(self.pools[pool_idx].handle, sets);
        }
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for p in self.pools.drain(..) {
                device.destroy_descriptor_pool(p.handle, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::POOL_SET_CAPACITY;

    #[test]
    fn pool_capacity_is_reasonable() {
        assert_eq!(POOL_SET_CAPACITY, 1024);
    }
}
