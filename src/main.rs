// =============================================================================
// GFX-SIMPLE - Demo for the gfx-core renderer
// =============================================================================
//
// Opens a window, uploads one colored quad (vertex + index buffer) and
// presents it every redraw.
//
// FRAME FLOW (inside Renderer::present):
// 1. Wait for the view's previous frame (in-flight fence)
// 2. Acquire swapchain image
// 3. Record: clear, bind pipeline + buffers, indexed draw
// 4. Submit to the graphics queue
// 5. Present
//
// Resizes are forwarded to the renderer, which rebuilds the swapchain on
// the next frame.
//
// =============================================================================

use anyhow::{Context, Result};
use gfx_core::{
    AttributeType, Config, FramebufferCreateInfo, FramebufferHandle, NativeWindow, Renderer, VertexLayout,
};
use glam::Vec3;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

const VERT_SHADER_PATH: &str = "shaders/triangle.vert.spv";
const FRAG_SHADER_PATH: &str = "shaders/triangle.frag.spv";

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    // Initialize logging
    init_logging();
    log::info!("Starting gfx-simple");
    log::info!("Window: {}x{}", config.window.width, config.window.height);
    log::info!("Present mode: {:?}", config.renderer.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// `info` unless RUST_LOG says otherwise
fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

// =============================================================================
// DEMO GEOMETRY
// =============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: Vec3,
    color: Vec3,
}

const QUAD: [Vertex; 4] = [
    Vertex { position: Vec3::new(-0.5, -0.5, 0.0), color: Vec3::new(1.0, 0.0, 0.0) },
    Vertex { position: Vec3::new(0.5, -0.5, 0.0), color: Vec3::new(0.0, 1.0, 0.0) },
    Vertex { position: Vec3::new(0.5, 0.5, 0.0), color: Vec3::new(0.0, 0.0, 1.0) },
    Vertex { position: Vec3::new(-0.5, 0.5, 0.0), color: Vec3::new(1.0, 1.0, 1.0) },
];

const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

fn vertex_layout() -> Result<VertexLayout> {
    Ok(VertexLayout::builder()
        .add("position", 3, AttributeType::F32)
        .add("color", 3, AttributeType::F32)
        .build()?)
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    // Declared before the window: the renderer's surface must go first.
    renderer: Option<Renderer>,
    view: FramebufferHandle,
    window: Option<Window>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            view: FramebufferHandle::NULL,
            window: None,
            frame_count: 0,
            last_fps_update: Instant::now(),
        }
    }

    /// Renderer, view, shaders, buffers and program, in dependency order.
    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        let native = NativeWindow::from_window(window)?;
        let mut renderer = Renderer::create(&self.config, Some(native))?;

        let size = window.inner_size();
        let view = renderer.create_framebuffer(&FramebufferCreateInfo {
            native_window: Some(native),
            width: size.width,
            height: size.height,
        });
        anyhow::ensure!(view.is_valid(), "failed to create the window view");

        let vert_code = std::fs::read(VERT_SHADER_PATH)
            .with_context(|| format!("Failed to read {} (is glslc installed?)", VERT_SHADER_PATH))?;
        let frag_code = std::fs::read(FRAG_SHADER_PATH)
            .with_context(|| format!("Failed to read {} (is glslc installed?)", FRAG_SHADER_PATH))?;
        let vert = renderer.create_shader(&vert_code);
        let frag = renderer.create_shader(&frag_code);
        anyhow::ensure!(vert.is_valid() && frag.is_valid(), "failed to create shader modules");

        let layout = vertex_layout()?;
        let vertices = renderer.create_vertex_buffer(bytemuck::cast_slice(&QUAD), &layout);
        let indices = renderer.create_index_buffer(&QUAD_INDICES);
        anyhow::ensure!(vertices.is_valid() && indices.is_valid(), "failed to upload geometry");

        // The attached layout feeds the pipeline's vertex input.
        anyhow::ensure!(renderer.attach_vertex_buffer(vertices), "failed to attach vertex buffer");
        anyhow::ensure!(renderer.set_index_buffer(indices), "failed to bind index buffer");

        let program = renderer.create_view_program(view, vert, frag);
        anyhow::ensure!(program.is_valid(), "failed to link the view program");

        // Modules are baked into the pipeline now.
        renderer.release_shader(vert);
        renderer.release_shader(frag);

        if let Some(adapter) = renderer.adapter() {
            log::info!("Rendering on {}", adapter.name);
        }

        self.view = view;
        self.renderer = Some(renderer);
        Ok(())
    }

    fn render_frame(&mut self) {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return;
        };
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            return;
        }

        // Letterbox to a centered square.
        let side = size.width.min(size.height);
        let x = ((size.width - side) / 2) as i32;
        let y = ((size.height - side) / 2) as i32;
        renderer.set_viewport(self.view, x, y, side, side);

        if renderer.present() {
            self.update_fps();
        }
    }

    fn update_fps(&mut self) {
        self.frame_count += 1;
        let elapsed = self.last_fps_update.elapsed().as_secs_f64();
        if elapsed < 1.0 {
            return;
        }

        let fps = self.frame_count as f64 / elapsed;
        if let Some(window) = &self.window {
            window.set_title(&format!("{} - {:.0} FPS", self.config.window.title, fps));
        }
        if let Some(renderer) = &self.renderer {
            let stats = renderer.stats();
            log::debug!(
                "{:.0} FPS, {} presented, {} dropped, {} swapchain rebuilds",
                fps,
                stats.frames_presented,
                stats.frames_dropped,
                stats.swapchain_recreations
            );
        }

        self.frame_count = 0;
        self.last_fps_update = Instant::now();
    }

    fn shutdown(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.shutdown();
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => w,
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            log::error!("Failed to initialize renderer: {:#}", e);
            self.shutdown();
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize_framebuffer(self.view, size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => self.render_frame(),

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown();
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
