// GfxContext: instance, physical/logical device, queues, and the frame
// timeline semaphore. This is the thing every other module borrows from.
//
// Grounded on the instance/device setup in instance.rs and device.rs, widened
// to select a discrete GPU with the feature set a dynamic-rendering,
// descriptor-indexing, GPU-driven renderer actually needs.

use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use std::ffi::{CStr, CString};
use std::os::raw::c_void;
use std::sync::{Arc, RwLock};

use crate::error::{RenderError, Result};
use utils::log;

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> u32 {
    log::error!(
        "[VK][{:?}][{:?}] {:?}",
        message_severity,
        message_types,
        CStr::from_ptr((*p_callback_data).p_message)
    );
    vk::FALSE
}

/// Indices of the queue families this context picked. Graphics and present
/// are very commonly the same family; transfer is kept distinct so uploads
/// can run concurrently with rendering.
#[derive(Clone, Copy, Debug)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub transfer: u32,
    pub present: u32,
}

/// The device feature/extension set this renderer requires. Extends the
/// narrower capability probe in platform.rs with dynamic rendering,
/// synchronization2, and scalar block layout.
pub struct RequiredFeatures;

impl RequiredFeatures {
    fn device_extensions() -> Vec<*const i8> {
        vec![
            khr::Swapchain::name().as_ptr(),
            khr::DynamicRendering::name().as_ptr(),
            khr::Synchronization2::name().as_ptr(),
            vk::KhrShaderDrawParametersFn::name().as_ptr(),
            vk::ExtScalarBlockLayoutFn::name().as_ptr(),
            vk::ExtDescriptorIndexingFn::name().as_ptr(),
            vk::KhrDrawIndirectCountFn::name().as_ptr(),
        ]
    }
}

fn contains_extensions(exts: &[vk::ExtensionProperties], req: &[*const i8]) -> bool {
    req.iter().all(|r| {
        let rstr = unsafe { CStr::from_ptr(*r as *const std::os::raw::c_char) };
        exts.iter().any(|e| {
            let estr = unsafe { CStr::from_ptr(e.extension_name.as_ptr()) };
            rstr == estr
        })
    })
}

pub struct GfxContext {
    pub entry: Entry,
    pub instance: ash::Instance,
    debug_loader: ext::DebugUtils,
    debug_callback: vk::DebugUtilsMessengerEXT,

    pub pdev: vk::PhysicalDevice,
    pub mem_props: vk::PhysicalDeviceMemoryProperties,
    pub device: ash::Device,
    pub families: QueueFamilies,

    pub graphics_queue: vk::Queue,
    pub transfer_queue: vk::Queue,
    pub present_queue: vk::Queue,

    /// Monotonically increasing frame timeline semaphore. Renderers signal
    /// the next value on their final submission; the frame loop waits for
    /// `MaxFramesInFlight` points back before reusing per-frame resources.
    pub(crate) timeline: RwLock<TimelineState>,
}

pub(crate) struct TimelineState {
    pub semaphore: vk::Semaphore,
    pub point: u64,
}

impl GfxContext {
    pub fn new(display_extensions: &[*const i8]) -> Result<Arc<Self>> {
        let entry = Entry::linked();
        let app_name = CString::new("vkrender").unwrap();

        let layer_names = vec![
            #[cfg(debug_assertions)]
            CString::new("VK_LAYER_KHRONOS_validation").unwrap(),
        ];
        let layer_names_raw: Vec<*const i8> = layer_names.iter().map(|n| n.as_ptr()).collect();

        let mut extension_names_raw = display_extensions.to_vec();
        extension_names_raw.push(ext::DebugUtils::name().as_ptr());

        let appinfo = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(0)
            .engine_name(&app_name)
            .engine_version(0)
            .api_version(vk::API_VERSION_1_2)
            .build();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&appinfo)
            .enabled_layer_names(&layer_names_raw)
            .enabled_extension_names(&extension_names_raw);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(|e| RenderError::DeviceSelection(format!("vkCreateInstance: {:?}", e)))?
        };

        let (debug_loader, debug_callback) = Self::setup_debug(&entry, &instance);

        let pdev = Self::select_pdev(&instance)?;
        let mem_props = unsafe { instance.get_physical_device_memory_properties(pdev) };

        let props = unsafe { instance.enumerate_device_extension_properties(pdev) }
            .map_err(|e| RenderError::DeviceSelection(format!("{:?}", e)))?;
        if !contains_extensions(&props, &RequiredFeatures::device_extensions()) {
            return Err(RenderError::MissingFeature(
                "device is missing one of: dynamic_rendering, synchronization2, \
                 scalar_block_layout, descriptor_indexing, draw_indirect_count"
                    .to_string(),
            ));
        }

        let families = Self::select_queue_families(&instance, pdev);
        let device = Self::create_device(&instance, pdev, &families)?;

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let transfer_queue = unsafe { device.get_device_queue(families.transfer, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };

        let mut timeline_type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let sema_info = vk::SemaphoreCreateInfo::builder().push_next(&mut timeline_type_info);
        let timeline_sema = unsafe {
            device
                .create_semaphore(&sema_info, None)
                .map_err(RenderError::Vulkan)?
        };

        log::debug!("selected physical device {:?}, families {:?}", pdev, families);

        Ok(Arc::new(Self {
            entry,
            instance,
            debug_loader,
            debug_callback,
            pdev,
            mem_props,
            device,
            families,
            graphics_queue,
            transfer_queue,
            present_queue,
            timeline: RwLock::new(TimelineState {
                semaphore: timeline_sema,
                point: 0,
            }),
        }))
    }

    fn setup_debug(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> (ext::DebugUtils, vk::DebugUtilsMessengerEXT) {
        let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let loader = ext::DebugUtils::new(entry, instance);
        let callback = unsafe { loader.create_debug_utils_messenger(&debug_info, None).unwrap() };
        (loader, callback)
    }

    /// Picks the first discrete GPU, falling back to the first device of any
    /// kind if no discrete GPU is present.
    fn select_pdev(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let pdevices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(|e| RenderError::DeviceSelection(format!("{:?}", e)))?
        };

        let discrete = pdevices.iter().find(|&&pdev| {
            let props = unsafe { instance.get_physical_device_properties(pdev) };
            props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
        });

        discrete
            .or_else(|| pdevices.first())
            .copied()
            .ok_or_else(|| RenderError::DeviceSelection("no Vulkan physical devices".to_string()))
    }

    fn select_queue_families(instance: &ash::Instance, pdev: vk::PhysicalDevice) -> QueueFamilies {
        let props = unsafe { instance.get_physical_device_queue_family_properties(pdev) };

        let find = |flags: vk::QueueFlags| -> u32 {
            props
                .iter()
                .enumerate()
                .find(|(_, p)| p.queue_flags.contains(flags))
                .map(|(i, _)| i as u32)
                .unwrap_or(0)
        };

        let graphics = find(vk::QueueFlags::GRAPHICS);
        let transfer = props
            .iter()
            .enumerate()
            .find(|(i, p)| {
                p.queue_flags.contains(vk::QueueFlags::TRANSFER)
                    && !p.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                    && *i as u32 != graphics
            })
            .map(|(i, _)| i as u32)
            .unwrap_or(graphics);

        QueueFamilies {
            graphics,
            transfer,
            present: graphics,
        }
    }

    fn create_device(
        instance: &ash::Instance,
        pdev: vk::PhysicalDevice,
        families: &QueueFamilies,
    ) -> Result<ash::Device> {
        let mut unique_families = vec![families.graphics];
        if families.transfer != families.graphics {
            unique_families.push(families.transfer);
        }

        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&f| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(f)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let features = vk::PhysicalDeviceFeatures::builder()
            .shader_clip_distance(true)
            .multi_draw_indirect(true)
            .vertex_pipeline_stores_and_atomics(true)
            .fragment_stores_and_atomics(true)
            .depth_clamp(true)
            .build();

        let mut vk12 = vk::PhysicalDeviceVulkan12Features::builder()
            .timeline_semaphore(true)
            .descriptor_indexing(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_variable_descriptor_count(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_update_unused_while_pending(true)
            .scalar_block_layout(true)
            .draw_indirect_count(true)
            .build();

        let mut vk13 = vk::PhysicalDeviceVulkan13Features::builder()
            .dynamic_rendering(true)
            .synchronization2(true)
            .build();

        let extensions = RequiredFeatures::device_extensions();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features)
            .push_next(&mut vk12)
            .push_next(&mut vk13);

        unsafe {
            instance
                .create_device(pdev, &create_info, None)
                .map_err(RenderError::Vulkan)
        }
    }

    pub fn find_memory_type_index(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        self.mem_props.memory_types[..self.mem_props.memory_type_count as usize]
            .iter()
            .enumerate()
            .find(|(i, ty)| (type_bits & (1 << i)) != 0 && ty.property_flags.contains(flags))
            .map(|(i, _)| i as u32)
    }

    /// Bumps the frame timeline and returns the point the next submission
    /// should signal.
    pub(crate) fn next_timeline_point(&self) -> (vk::Semaphore, u64) {
        let mut t = self.timeline.write().unwrap();
        t.point += 1;
        (t.semaphore, t.point)
    }

    pub fn wait_idle(&self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
    }
}

impl Drop for GfxContext {
    fn drop(&mut self) {
        unsafe {
            self.wait_idle();
            let t = self.timeline.read().unwrap();
            self.device.destroy_semaphore(t.semaphore, None);
            self.device.destroy_device(None);
            self.debug_loader
                .destroy_debug_utils_messenger(self.debug_callback, None);
            self.instance.destroy_instance(None);
        }
    }
}
