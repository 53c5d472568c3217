// Dynamic-rendering attachment binding.
//
// Replaces the render-pass/framebuffer-object caching pattern in lume-rhi's
// begin_render_pass (mod.rs caches VkRenderPass/VkFramebuffer in a HashMap,
// but render_pass.rs's end() destroys both on every call -- a cache that's
// invalidated on every use isn't a cache). Dynamic rendering needs neither
// object: vkCmdBeginRendering takes the attachment views directly.

use ash::vk;

pub struct ColorAttachment {
    pub view: vk::ImageView,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_color: [f32; 4],
}

pub struct DepthAttachment {
    pub view: vk::ImageView,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    /// Reverse-Z: cleared depth is 0.0, not 1.0.
    pub clear_depth: f32,
}

pub struct RenderingScope;

impl RenderingScope {
    pub unsafe fn begin(
        device: &ash::Device,
        cbuf: vk::CommandBuffer,
        render_area: vk::Rect2D,
        color: &[ColorAttachment],
        depth: Option<&DepthAttachment>,
    ) {
        let color_infos: Vec<vk::RenderingAttachmentInfo> = color
            .iter()
            .map(|c| {
                vk::RenderingAttachmentInfo::builder()
                    .image_view(c.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(c.load_op)
                    .store_op(c.store_op)
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: c.clear_color,
                        },
                    })
                    .build()
            })
            .collect();

        let depth_info = depth.map(|d| {
            vk::RenderingAttachmentInfo::builder()
                .image_view(d.view)
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .load_op(d.load_op)
                .store_op(d.store_op)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: d.clear_depth,
                        stencil: 0,
                    },
                })
                .build()
        });

        let mut info = vk::RenderingInfo::builder()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_infos);
        if let Some(ref d) = depth_info {
            info = info.depth_attachment(d);
        }

        device.cmd_begin_rendering(cbuf, &info);
    }

    pub unsafe fn end(device: &ash::Device, cbuf: vk::CommandBuffer) {
        device.cmd_end_rendering(cbuf);
    }
}
