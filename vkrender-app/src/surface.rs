// Per-backend VkSurfaceKHR creation from a winit window: Xlib, Wayland, and
// Win32, the three desktop backends winit hands out raw handles for.

use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::os::raw::c_char;

use vkrender::RenderError;

pub fn required_instance_extensions(display: RawDisplayHandle) -> anyhow::Result<Vec<*const c_char>> {
    let mut exts = vec![khr::Surface::name().as_ptr()];
    exts.push(match display {
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name().as_ptr(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name().as_ptr(),
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name().as_ptr(),
        other => anyhow::bail!("unsupported display backend: {:?}", other),
    });
    Ok(exts)
}

/// # Safety
/// `entry`/`instance` must outlive the returned surface, and `window`/
/// `display` must refer to a still-live window.
pub unsafe fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<vk::SurfaceKHR, RenderError> {
    match (display, window) {
        (RawDisplayHandle::Xlib(d), RawWindowHandle::Xlib(w)) => {
            let loader = khr::XlibSurface::new(entry, instance);
            let info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(d.display.map(|p| p.as_ptr()).unwrap_or(std::ptr::null_mut()) as *mut vk::Display)
                .window(w.window);
            loader.create_xlib_surface(&info, None).map_err(RenderError::Vulkan)
        }
        (RawDisplayHandle::Wayland(d), RawWindowHandle::Wayland(w)) => {
            let loader = khr::WaylandSurface::new(entry, instance);
            let info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(d.display.as_ptr())
                .surface(w.surface.as_ptr());
            loader.create_wayland_surface(&info, None).map_err(RenderError::Vulkan)
        }
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(w)) => {
            let loader = khr::Win32Surface::new(entry, instance);
            let info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(w.hinstance.map(|h| h.get()).unwrap_or(0) as vk::HINSTANCE)
                .hwnd(w.hwnd.get() as vk::HWND);
            loader.create_win32_surface(&info, None).map_err(RenderError::Vulkan)
        }
        _ => Err(RenderError::DeviceSelection("unsupported windowing backend".to_string())),
    }
}
