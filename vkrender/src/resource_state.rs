// Named access states for images/buffers, and the barrier construction that
// transitions between them.
//
// device.rs builds vk::ImageMemoryBarrier literals inline wherever a
// transition is needed (see update_image_contents_from_damaged_data and
// acquire_dmabuf_image_from_external_queue). This module gives those
// transitions names so callers say what state a resource is *in* rather than
// re-deriving stage/access masks at each call site.

use ash::vk;

/// The canonical resource states this renderer moves images and buffers
/// through across a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessState {
    Undefined,
    TransferDst,
    TransferSrc,
    ColorAttachment,
    DepthAttachmentWrite,
    DepthAttachmentReadOnly,
    ShaderReadOnly,
    ShaderReadWrite,
    IndirectCommandRead,
    VertexInput,
    PresentSrc,
}

struct StageAccess {
    stage: vk::PipelineStageFlags2,
    access: vk::AccessFlags2,
    layout: vk::ImageLayout,
}

fn stage_access(state: AccessState) -> StageAccess {
    match state {
        AccessState::Undefined => StageAccess {
            stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
            access: vk::AccessFlags2::NONE,
            layout: vk::ImageLayout::UNDEFINED,
        },
        AccessState::TransferDst => StageAccess {
            stage: vk::PipelineStageFlags2::TRANSFER,
            access: vk::AccessFlags2::TRANSFER_WRITE,
            layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        },
        AccessState::TransferSrc => StageAccess {
            stage: vk::PipelineStageFlags2::TRANSFER,
            access: vk::AccessFlags2::TRANSFER_READ,
            layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        },
        AccessState::ColorAttachment => StageAccess {
            stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            access: vk::AccessFlags2::COLOR_ATTACHMENT_READ
                | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        },
        AccessState::DepthAttachmentWrite => StageAccess {
            stage: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            access: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        },
        AccessState::DepthAttachmentReadOnly => StageAccess {
            stage: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            access: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
            layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        },
        AccessState::ShaderReadOnly => StageAccess {
            stage: vk::PipelineStageFlags2::FRAGMENT_SHADER
                | vk::PipelineStageFlags2::COMPUTE_SHADER
                | vk::PipelineStageFlags2::VERTEX_SHADER,
            access: vk::AccessFlags2::SHADER_READ,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        },
        AccessState::ShaderReadWrite => StageAccess {
            stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
            access: vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
            layout: vk::ImageLayout::GENERAL,
        },
        AccessState::IndirectCommandRead => StageAccess {
            stage: vk::PipelineStageFlags2::DRAW_INDIRECT,
            access: vk::AccessFlags2::INDIRECT_COMMAND_READ,
            layout: vk::ImageLayout::UNDEFINED,
        },
        AccessState::VertexInput => StageAccess {
            stage: vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT | vk::PipelineStageFlags2::INDEX_INPUT,
            access: vk::AccessFlags2::VERTEX_ATTRIBUTE_READ | vk::AccessFlags2::INDEX_READ,
            layout: vk::ImageLayout::UNDEFINED,
        },
        AccessState::PresentSrc => StageAccess {
            stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            access: vk::AccessFlags2::MEMORY_READ,
            layout: vk::ImageLayout::PRESENT_SRC_KHR,
        },
    }
}

/// Records and issues the barrier for a resource moving from one named
/// state to another.
pub struct ResourceState;

impl ResourceState {
    pub fn image_barrier(
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        from: AccessState,
        to: AccessState,
        mip_levels: u32,
        array_layers: u32,
    ) -> vk::ImageMemoryBarrier2 {
        let src = stage_access(from);
        let dst = stage_access(to);

        vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(src.stage)
            .src_access_mask(src.access)
            .dst_stage_mask(dst.stage)
            .dst_access_mask(dst.access)
            .old_layout(src.layout)
            .new_layout(dst.layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(mip_levels)
                    .base_array_layer(0)
                    .layer_count(array_layers)
                    .build(),
            )
            .build()
    }

    pub fn buffer_barrier(
        buffer: vk::Buffer,
        from: AccessState,
        to: AccessState,
        size: vk::DeviceSize,
    ) -> vk::BufferMemoryBarrier2 {
        let src = stage_access(from);
        let dst = stage_access(to);

        vk::BufferMemoryBarrier2::builder()
            .src_stage_mask(src.stage)
            .src_access_mask(src.access)
            .dst_stage_mask(dst.stage)
            .dst_access_mask(dst.access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(0)
            .size(size)
            .build()
    }

    /// Release half of a queue-family ownership transfer: records on the
    /// *source* queue's command buffer. Per the Vulkan spec, a release
    /// barrier's dst access/stage are ignored by the implementation, but
    /// synchronization2 still requires a value, so both are NONE.
    pub fn buffer_release_barrier(
        buffer: vk::Buffer,
        from: AccessState,
        src_queue_family: u32,
        dst_queue_family: u32,
        size: vk::DeviceSize,
    ) -> vk::BufferMemoryBarrier2 {
        let src = stage_access(from);

        vk::BufferMemoryBarrier2::builder()
            .src_stage_mask(src.stage)
            .src_access_mask(src.access)
            .dst_stage_mask(vk::PipelineStageFlags2::NONE)
            .dst_access_mask(vk::AccessFlags2::NONE)
            .src_queue_family_index(src_queue_family)
            .dst_queue_family_index(dst_queue_family)
            .buffer(buffer)
            .offset(0)
            .size(size)
            .build()
    }

    /// Acquire half of a queue-family ownership transfer: records on the
    /// *destination* queue's command buffer, matching the family indices and
    /// buffer range of the corresponding release.
    pub fn buffer_acquire_barrier(
        buffer: vk::Buffer,
        to: AccessState,
        src_queue_family: u32,
        dst_queue_family: u32,
        size: vk::DeviceSize,
    ) -> vk::BufferMemoryBarrier2 {
        let dst = stage_access(to);

        vk::BufferMemoryBarrier2::builder()
            .src_stage_mask(vk::PipelineStageFlags2::NONE)
            .src_access_mask(vk::AccessFlags2::NONE)
            .dst_stage_mask(dst.stage)
            .dst_access_mask(dst.access)
            .src_queue_family_index(src_queue_family)
            .dst_queue_family_index(dst_queue_family)
            .buffer(buffer)
            .offset(0)
            .size(size)
            .build()
    }

    /// Release half of a queue-family ownership transfer for an image.
    pub fn image_release_barrier(
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        from: AccessState,
        to_layout: AccessState,
        src_queue_family: u32,
        dst_queue_family: u32,
        mip_levels: u32,
        array_layers: u32,
    ) -> vk::ImageMemoryBarrier2 {
        let src = stage_access(from);
        let dst_layout = stage_access(to_layout).layout;

        vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(src.stage)
            .src_access_mask(src.access)
            .dst_stage_mask(vk::PipelineStageFlags2::NONE)
            .dst_access_mask(vk::AccessFlags2::NONE)
            .old_layout(src.layout)
            .new_layout(dst_layout)
            .src_queue_family_index(src_queue_family)
            .dst_queue_family_index(dst_queue_family)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(mip_levels)
                    .base_array_layer(0)
                    .layer_count(array_layers)
                    .build(),
            )
            .build()
    }

    /// Acquire half of a queue-family ownership transfer for an image. Layout
    /// must match the release's `to_layout` exactly.
    pub fn image_acquire_barrier(
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        layout: AccessState,
        to: AccessState,
        src_queue_family: u32,
        dst_queue_family: u32,
        mip_levels: u32,
        array_layers: u32,
    ) -> vk::ImageMemoryBarrier2 {
        let same_layout = stage_access(layout).layout;
        let dst = stage_access(to);

        vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(vk::PipelineStageFlags2::NONE)
            .src_access_mask(vk::AccessFlags2::NONE)
            .dst_stage_mask(dst.stage)
            .dst_access_mask(dst.access)
            .old_layout(same_layout)
            .new_layout(dst.layout)
            .src_queue_family_index(src_queue_family)
            .dst_queue_family_index(dst_queue_family)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(mip_levels)
                    .base_array_layer(0)
                    .layer_count(array_layers)
                    .build(),
            )
            .build()
    }

    pub unsafe fn submit_image_barrier(
        device: &ash::Device,
        cbuf: vk::CommandBuffer,
        barrier: vk::ImageMemoryBarrier2,
    ) {
        let barriers = [barrier];
        let dep_info = vk::DependencyInfo::builder().image_memory_barriers(&barriers);
        device.cmd_pipeline_barrier2(cbuf, &dep_info);
    }

    pub unsafe fn submit_buffer_barrier(
        device: &ash::Device,
        cbuf: vk::CommandBuffer,
        barrier: vk::BufferMemoryBarrier2,
    ) {
        let barriers = [barrier];
        let dep_info = vk::DependencyInfo::builder().buffer_memory_barriers(&barriers);
        device.cmd_pipeline_barrier2(cbuf, &dep_info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_states_use_depth_layout() {
        assert_eq!(
            stage_access(AccessState::DepthAttachmentWrite).layout,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            stage_access(AccessState::DepthAttachmentReadOnly).layout,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn present_state_uses_memory_read() {
        assert_eq!(stage_access(AccessState::PresentSrc).access, vk::AccessFlags2::MEMORY_READ);
    }
}
