// Per-frame linear sub-allocator for transient GPU buffers (uniform blocks,
// scratch storage buffers built fresh each frame).
//
// No direct precedent elsewhere in this crate for a per-frame suballocator;
// grounded in spirit on deletion_queue.rs's discipline of tracking work
// against a frame index and only reclaiming once that frame's fence/timeline
// point has
// retired. Here the "reclaim" is just resetting the bump pointer once
// MaxFramesInFlight frames have passed, since the backing buffer is reused
// round-robin instead of freed.

use ash::vk;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::context::GfxContext;
use crate::error::Result;

const DEFAULT_ALIGNMENT: vk::DeviceSize = 256;

struct Slab {
    buffer: Buffer,
    cursor: vk::DeviceSize,
}

/// One TransientBufferAllocator per frame-in-flight slot. `alloc` bump-
/// allocates out of a fixed-size backing buffer; if a request doesn't fit,
/// the allocator falls back to a one-off oversized buffer that outlives the
/// slab (freed when the slot is reset next time this index comes around).
pub struct TransientBufferAllocator {
    ctx: Arc<GfxContext>,
    usage: vk::BufferUsageFlags,
    slab: Slab,
    overflow: Vec<Buffer>,
}

pub struct TransientAllocation<'a> {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub mapped: &'a mut [u8],
}

impl TransientBufferAllocator {
    pub fn new(ctx: Arc<GfxContext>, slab_size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<Self> {
        let buffer = Buffer::new_host_visible(ctx.clone(), slab_size, usage)?;
        Ok(Self {
            ctx,
            usage,
            slab: Slab { buffer, cursor: 0 },
            overflow: Vec::new(),
        })
    }

    fn align_up(offset: vk::DeviceSize, align: vk::DeviceSize) -> vk::DeviceSize {
        (offset + align - 1) & !(align - 1)
    }

    /// Bump-allocates `size` bytes, returning the backing buffer handle,
    /// byte offset to bind into a descriptor, and a mapped slice to write
    /// the contents into directly. Falls back to a dedicated buffer (at
    /// 1.5x the requested size, matching this crate's general ring growth
    /// policy) if the slab is exhausted.
    pub fn alloc(&mut self, size: vk::DeviceSize) -> Result<TransientAllocation<'_>> {
        let aligned = Self::align_up(self.slab.cursor, DEFAULT_ALIGNMENT);
        if aligned + size <= self.slab.buffer.size {
            self.slab.cursor = aligned + size;
            let ptr = self.slab.buffer.map()?;
            let mapped = unsafe { std::slice::from_raw_parts_mut((ptr as *mut u8).add(aligned as usize), size as usize) };
            return Ok(TransientAllocation { buffer: self.slab.buffer.handle, offset: aligned, mapped });
        }

        let grown = ((size as f64) * 1.5) as vk::DeviceSize;
        let mut buf = Buffer::new_host_visible(self.ctx.clone(), grown, self.usage)?;
        let ptr = buf.map()?;
        let handle = buf.handle;
        let mapped = unsafe { std::slice::from_raw_parts_mut(ptr as *mut u8, size as usize) };
        self.overflow.push(buf);
        Ok(TransientAllocation { buffer: handle, offset: 0, mapped })
    }

    /// Resets the bump pointer for reuse once this slot's frame has retired
    /// on the timeline. Overflow buffers from the previous use are dropped.
    pub fn reset(&mut self) {
        self.slab.cursor = 0;
        self.overflow.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::TransientBufferAllocator;

    #[test]
    fn alignment_rounds_up_to_256() {
        assert_eq!(TransientBufferAllocator::align_up(1, 256), 256);
        assert_eq!(TransientBufferAllocator::align_up(256, 256), 256);
        assert_eq!(TransientBufferAllocator::align_up(257, 256), 512);
    }
}
