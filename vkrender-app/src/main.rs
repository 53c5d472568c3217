// Windowed frontend: owns the winit event loop, free-fly camera, and input
// state, and drives vkrender::Engine one frame at a time.

mod camera;
mod input;
mod surface;

use cgmath::{InnerSpace, Point3, Vector3};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::event::{DeviceEvent, DeviceId, ElementState, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::{Window, WindowId};

use vkrender::{Camera as EngineCamera, Engine, EngineConfig, GfxContext, SunLight};

use camera::Camera;
use input::InputState;

const MOUSE_SENSITIVITY: f32 = 0.0025;
const MOVE_SPEED: f32 = 4.0;
const SPRINT_MULTIPLIER: f32 = 4.0;

struct App {
    config: EngineConfig,
    window: Option<Window>,
    ctx: Option<Arc<GfxContext>>,
    engine: Option<Engine>,
    camera: Camera,
    input: InputState,
    sun: SunLight,
    last_frame: Instant,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        let aspect = config.window_width as f32 / config.window_height as f32;
        Self {
            config,
            window: None,
            ctx: None,
            engine: None,
            camera: Camera::new(Point3::new(0.0, 1.5, 4.0), aspect),
            input: InputState::new(),
            sun: SunLight {
                direction: Vector3::new(-0.4, -1.0, -0.3).normalize(),
                radiance: Vector3::new(4.0, 3.8, 3.4),
                ambient: Vector3::new(0.05, 0.06, 0.08),
            },
            last_frame: Instant::now(),
        }
    }

    fn load_scene_and_engine(&mut self, window: &Window) -> anyhow::Result<()> {
        let display_handle = window.display_handle()?.as_raw();
        let window_handle = window.window_handle()?.as_raw();

        let extensions = surface::required_instance_extensions(display_handle)?;
        let ctx = GfxContext::new(&extensions)?;
        let vk_surface = unsafe { surface::create_surface(&ctx.entry, &ctx.instance, display_handle, window_handle)? };

        let resources = Path::new(&self.config.resources_path);
        if !resources.exists() {
            anyhow::bail!("resources directory {:?} does not exist", resources);
        }

        let scene_path = resources.join("scene.gltf");
        let scene = vkrender::gltf_loader::load(&scene_path)?;

        let mut uploader = vkrender::ImageUploader::new(ctx.clone())?;
        let skybox_dir = resources.join("skybox");
        let faces = [
            skybox_dir.join("right.png"),
            skybox_dir.join("left.png"),
            skybox_dir.join("top.png"),
            skybox_dir.join("bottom.png"),
            skybox_dir.join("front.png"),
            skybox_dir.join("back.png"),
        ];
        let cubemap = uploader.load_cubemap(&faces)?;

        let size = window.inner_size();
        let engine = Engine::new(ctx.clone(), vk_surface, size.width.max(1), size.height.max(1), self.config.clone(), scene, cubemap.view)?;

        self.camera.aspect = size.width as f32 / size.height.max(1) as f32;
        self.ctx = Some(ctx);
        self.engine = Some(engine);
        // cubemap's device-local image must outlive the descriptor set the
        // skybox pass samples from; Engine doesn't take ownership of it, so
        // leak it for the process lifetime rather than add a field purely
        // for this one frontend-owned resource.
        std::mem::forget(cubemap);
        Ok(())
    }

    fn render_frame(&mut self) {
        let Some(engine) = self.engine.as_mut() else { return };

        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32().min(0.1);
        self.last_frame = now;

        let speed = if self.input.sprint { MOVE_SPEED * SPRINT_MULTIPLIER } else { MOVE_SPEED };
        let forward = self.camera.forward();
        let right = self.camera.right();
        let mut delta = Vector3::new(0.0, 0.0, 0.0);
        if self.input.forward {
            delta += forward;
        }
        if self.input.back {
            delta -= forward;
        }
        if self.input.right {
            delta += right;
        }
        if self.input.left {
            delta -= right;
        }
        if self.input.up {
            delta += Vector3::unit_y();
        }
        if self.input.down {
            delta -= Vector3::unit_y();
        }
        if delta.magnitude2() > 0.0 {
            self.camera.position += delta.normalize() * speed * dt;
        }

        let engine_camera = EngineCamera {
            view: self.camera.view_matrix(),
            projection: self.camera.projection_matrix(),
            position: Vector3::new(self.camera.position.x, self.camera.position.y, self.camera.position.z),
            fovy_radians: self.camera.fovy.0,
            aspect: self.camera.aspect,
        };

        match engine.render(&engine_camera, &self.sun) {
            Ok(()) => {}
            Err(vkrender::RenderError::SwapchainOutOfDate) | Err(vkrender::RenderError::SwapchainSuboptimal) => {
                if let Some(window) = &self.window {
                    let size = window.inner_size();
                    if let Err(e) = engine.resize(size.width.max(1), size.height.max(1)) {
                        utils::log::error!("swapchain recreate failed: {:?}", e);
                    }
                }
            }
            Err(e) => utils::log::error!("frame failed: {:?}", e),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs = Window::default_attributes()
            .with_title("vkrender")
            .with_inner_size(winit::dpi::LogicalSize::new(self.config.window_width, self.config.window_height));
        let window = event_loop.create_window(attrs).expect("failed to create window");

        if let Err(e) = self.load_scene_and_engine(&window) {
            utils::log::error!("startup failed: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
        self.last_frame = Instant::now();
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if self.input.captured {
                self.camera.rotate(delta.0 as f32, delta.1 as f32, MOUSE_SENSITIVITY);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(engine) = self.engine.as_mut() {
                    if size.width > 0 && size.height > 0 {
                        self.camera.aspect = size.width as f32 / size.height as f32;
                        if let Err(e) = engine.resize(size.width, size.height) {
                            utils::log::error!("resize failed: {:?}", e);
                        }
                    }
                }
            }
            WindowEvent::KeyboardInput { event: key_event, .. } => {
                if key_event.logical_key == Key::Named(NamedKey::F5) && key_event.state == ElementState::Pressed {
                    utils::log::debug!("pipeline reload requested (not yet wired to a shader watcher)");
                }
                self.input.handle_key(&key_event.logical_key, key_event.state);
            }
            WindowEvent::MouseInput { state: ElementState::Pressed, button: MouseButton::Left, .. } => {
                self.input.captured = true;
                if let Some(window) = &self.window {
                    let _ = window.set_cursor_grab(winit::window::CursorGrabMode::Confined);
                    window.set_cursor_visible(false);
                }
            }
            WindowEvent::RedrawRequested => {
                self.render_frame();
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }

        if !self.input.captured {
            if let Some(window) = &self.window {
                let _ = window.set_cursor_grab(winit::window::CursorGrabMode::None);
                window.set_cursor_visible(true);
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let config = EngineConfig::load(Path::new("config.toml"))?;

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}
