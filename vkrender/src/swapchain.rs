// Swapchain: acquire, present, and recreate-on-resize.
//
// Grounded on thundr's display/vkswapchain/mod.rs acquire/present/advance
// cycle, narrowed from a multi-backend Display trait down to a single
// concrete winit-surface implementation (this crate never imports foreign
// dmabufs or drives a DRM/KMS output directly). Swapchain images are created
// with the mutable-format flag plus an sRGB and a linear view each: the
// finalize pass writes through the linear view while presentation reads the
// sRGB one.

use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use crate::context::GfxContext;
use crate::error::{RenderError, Result};

pub struct SwapchainImage {
    pub image: vk::Image,
    pub srgb_view: vk::ImageView,
    pub linear_view: vk::ImageView,
}

pub struct Swapchain {
    ctx: Arc<GfxContext>,
    loader: khr::Swapchain,
    surface_loader: khr::Surface,
    pub surface: vk::SurfaceKHR,
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<SwapchainImage>,
}

impl Swapchain {
    pub fn new(ctx: Arc<GfxContext>, surface: vk::SurfaceKHR, width: u32, height: u32) -> Result<Self> {
        let surface_loader = khr::Surface::new(&ctx.entry, &ctx.instance);
        let loader = khr::Swapchain::new(&ctx.instance, &ctx.device);

        let mut sc = Self {
            ctx,
            loader,
            surface_loader,
            surface,
            handle: vk::SwapchainKHR::null(),
            format: vk::Format::B8G8R8A8_SRGB,
            extent: vk::Extent2D { width, height },
            images: Vec::new(),
        };
        sc.recreate(width, height)?;
        Ok(sc)
    }

    pub fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.ctx.pdev, self.surface)
                .map_err(RenderError::Vulkan)?
        };
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.ctx.pdev, self.surface)
                .map_err(RenderError::Vulkan)?
        };
        let surface_format = formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_SRGB)
            .copied()
            .unwrap_or(formats[0]);

        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };

        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }

        let view_formats = [vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_UNORM];
        let mut format_list = vk::ImageFormatListCreateInfo::builder().view_formats(&view_formats);

        let old_swapchain = self.handle;
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .flags(vk::SwapchainCreateFlagsKHR::MUTABLE_FORMAT)
            .push_next(&mut format_list)
            .old_swapchain(old_swapchain);

        let new_handle = unsafe {
            self.loader
                .create_swapchain(&create_info, None)
                .map_err(RenderError::Vulkan)?
        };

        self.destroy_images();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }

        self.handle = new_handle;
        self.format = surface_format.format;
        self.extent = extent;

        let raw_images = unsafe {
            self.loader
                .get_swapchain_images(self.handle)
                .map_err(RenderError::Vulkan)?
        };
        self.images = raw_images
            .into_iter()
            .map(|image| self.make_views(image))
            .collect::<Result<Vec<_>>>()?;

        Ok(())
    }

    fn make_views(&self, image: vk::Image) -> Result<SwapchainImage> {
        let make = |format: vk::Format| -> Result<vk::ImageView> {
            let info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .subresource_range(
                    vk::ImageSubresourceRange::builder()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1)
                        .build(),
                );
            unsafe {
                self.ctx
                    .device
                    .create_image_view(&info, None)
                    .map_err(RenderError::Vulkan)
            }
        };

        Ok(SwapchainImage {
            image,
            srgb_view: make(vk::Format::B8G8R8A8_SRGB)?,
            linear_view: make(vk::Format::B8G8R8A8_UNORM)?,
        })
    }

    fn destroy_images(&mut self) {
        unsafe {
            for img in self.images.drain(..) {
                self.ctx.device.destroy_image_view(img.srgb_view, None);
                self.ctx.device.destroy_image_view(img.linear_view, None);
            }
        }
    }

    /// Acquires the next image, signaling `sema` on completion. Returns
    /// `SwapchainOutOfDate`/`SwapchainSuboptimal` for the frame loop to
    /// handle via `recreate` rather than panicking.
    pub fn acquire_next_image(&self, sema: vk::Semaphore) -> Result<u32> {
        let (index, suboptimal) = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, sema, vk::Fence::null())
                .map_err(|e| match e {
                    vk::Result::ERROR_OUT_OF_DATE_KHR => RenderError::SwapchainOutOfDate,
                    _ => RenderError::Vulkan(e),
                })?
        };
        if suboptimal {
            return Err(RenderError::SwapchainSuboptimal);
        }
        Ok(index)
    }

    pub fn present(&self, queue: vk::Queue, wait_sema: vk::Semaphore, image_index: u32) -> Result<()> {
        let wait = [wait_sema];
        let swapchains = [self.handle];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let result = unsafe { self.loader.queue_present(queue, &info) };
        match result {
            Ok(false) => Ok(()),
            Ok(true) => Err(RenderError::SwapchainSuboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::SwapchainOutOfDate),
            Err(e) => Err(RenderError::Vulkan(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_images();
        unsafe {
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
            }
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
