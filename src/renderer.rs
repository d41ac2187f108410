// Renderer - the client-facing facade
//
// Owns the device and every registry. Errors stop here: creation calls
// return the family's NULL handle, mutation calls return false, and a
// failed frame is logged and counted as dropped. Only `Renderer::create`
// reports an error, since nothing works without a device.
//
// Teardown order on shutdown: views, programs, buffers, shaders, upload
// recycler, graphics command pool, device.

use crate::backend::buffer::{self, BufferUsage, GpuBuffer};
use crate::backend::command::{CommandDevice, CommandRecycler};
use crate::backend::record::{BindSlot, BoundBuffer, DrawState, ViewportRect};
use crate::backend::shader;
use crate::backend::view::{FrameOutcome, View, ViewSettings, ViewState};
use crate::backend::{AdapterDescriptor, NativeWindow, VulkanDevice};
use crate::config::Config;
use crate::error::GfxError;
use crate::handle::{BufferHandle, FramebufferHandle, ProgramHandle, ShaderHandle};
use crate::registry::Registry;
use crate::vertex::VertexLayout;
use anyhow::{Context, Result};
use ash::vk;

/// Parameters of `Renderer::create_framebuffer`
#[derive(Debug, Clone, Copy)]
pub struct FramebufferCreateInfo {
    /// Window to present to. `None` renders offscreen.
    pub native_window: Option<NativeWindow>,
    pub width: u32,
    pub height: u32,
}

/// Frame counters since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_submitted: u64,
    pub frames_presented: u64,
    /// Frames lost to a failed record, submit or present.
    pub frames_dropped: u64,
    /// Frames with nothing to draw into (zero extent, out-of-date swapchain).
    pub frames_skipped: u64,
    pub swapchain_recreations: u64,
}

impl FrameStats {
    /// Fold one view's `View::submit` result into the counters.
    ///
    /// `recreations` is how many target rebuilds the call performed,
    /// counted whether or not the frame itself made it to the queue.
    fn count_submit(&mut self, result: &Result<FrameOutcome>, recreations: u64) {
        self.swapchain_recreations += recreations;
        match result {
            Ok(FrameOutcome::Submitted(_)) => self.frames_submitted += 1,
            Ok(FrameOutcome::Skipped) => self.frames_skipped += 1,
            Err(_) => self.frames_dropped += 1,
        }
    }
}

/// Whether a view takes part in a submit pass.
///
/// The pass run by `present` only picks up views this tick has not
/// submitted yet.
fn wants_submit(state: ViewState, submitted_this_tick: bool, only_pending: bool) -> bool {
    state == ViewState::Ready && !(only_pending && submitted_this_tick)
}

fn wants_present(state: ViewState) -> bool {
    state == ViewState::Submitted
}

/// Bind `buffer` to `slot` in every given draw state.
fn bind_all<'a>(draws: impl IntoIterator<Item = &'a mut DrawState>, slot: BindSlot, buffer: BoundBuffer) {
    for draw in draws {
        draw.bind(slot, buffer);
    }
}

struct ViewEntry {
    view: View,
    program: ProgramHandle,
    submitted_this_tick: bool,
}

struct ProgramEntry {
    view: FramebufferHandle,
}

struct BufferEntry {
    gpu: GpuBuffer,
    usage: BufferUsage,
    count: u32,
    layout: Option<VertexLayout>,
}

pub struct Renderer {
    views: Registry<FramebufferHandle, ViewEntry>,
    shaders: Registry<ShaderHandle, vk::ShaderModule>,
    programs: Registry<ProgramHandle, ProgramEntry>,
    buffers: Registry<BufferHandle, BufferEntry>,
    vertex_layout: Option<VertexLayout>,
    bound_vertex: Option<BufferHandle>,
    bound_index: Option<BufferHandle>,
    uploads: Option<CommandRecycler>,
    graphics_pool: vk::CommandPool,
    settings: ViewSettings,
    stats: FrameStats,
    // `None` once shut down.
    device: Option<VulkanDevice>,
}

impl Renderer {
    /// Validate `config`, open the device and set up command pools.
    ///
    /// `window` is needed unless `renderer.headless` is set. An error here
    /// means no renderer exists and the caller must abort.
    pub fn create(config: &Config, window: Option<NativeWindow>) -> Result<Self> {
        config.validate()?;

        if config.renderer.headless && window.is_some() {
            log::warn!("Headless renderer ignores the supplied native window");
        }

        let device = VulkanDevice::new(config, window.as_ref()).context("Failed to create Vulkan device")?;

        let uploads = CommandRecycler::new(
            &device.device,
            device.transfer_queue().family,
            config.renderer.command_buffer_count,
        )
        .map_err(|e| GfxError::init(format!("upload command recycler: {:?}", e)))?;

        let graphics_pool = match device.device.create_pool(device.graphics_queue().family) {
            Ok(pool) => pool,
            Err(e) => {
                uploads.destroy(&device.device);
                return Err(GfxError::init(format!("graphics command pool: {:?}", e)).into());
            }
        };

        log::info!(
            "Renderer ready on {} ({} upload command buffers)",
            device.adapter().name,
            uploads.capacity()
        );

        Ok(Self {
            views: Registry::new(),
            shaders: Registry::new(),
            programs: Registry::new(),
            buffers: Registry::new(),
            vertex_layout: None,
            bound_vertex: None,
            bound_index: None,
            uploads: Some(uploads),
            graphics_pool,
            settings: ViewSettings {
                min_image_count: config.renderer.min_image_count,
                present_mode: config.renderer.present_mode.to_vk(),
                clear_color: config.renderer.clear_color,
            },
            stats: FrameStats::default(),
            device: Some(device),
        })
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    pub fn create_framebuffer(&mut self, info: &FramebufferCreateInfo) -> FramebufferHandle {
        let Some(device) = self.device.as_ref() else {
            log::error!("{}", GfxError::lifecycle("create_framebuffer after shutdown"));
            return FramebufferHandle::NULL;
        };

        let extent = vk::Extent2D {
            width: info.width,
            height: info.height,
        };
        let mut view = match View::new(
            device,
            info.native_window.as_ref(),
            extent,
            self.graphics_pool,
            &self.settings,
        ) {
            Ok(view) => view,
            Err(e) => {
                log::error!("create_framebuffer failed: {:#}", e);
                return FramebufferHandle::NULL;
            }
        };

        // New views pick up whatever is currently bound.
        if let Some(bound) = self.bound_vertex.and_then(|h| self.bound(h)) {
            view.draw_state_mut().bind(BindSlot::Vertex, bound);
        }
        if let Some(bound) = self.bound_index.and_then(|h| self.bound(h)) {
            view.draw_state_mut().bind(BindSlot::Index, bound);
        }

        let entry = ViewEntry {
            view,
            program: ProgramHandle::NULL,
            submitted_this_tick: false,
        };
        match self.views.insert(entry) {
            Ok(handle) => handle,
            Err(mut entry) => {
                log::error!("Framebuffer handles exhausted");
                entry.view.destroy(device);
                FramebufferHandle::NULL
            }
        }
    }

    /// Wrap already-compiled SPIR-V in a shader module.
    pub fn create_shader(&mut self, bytecode: &[u8]) -> ShaderHandle {
        let Some(device) = self.device.as_ref() else {
            log::error!("{}", GfxError::lifecycle("create_shader after shutdown"));
            return ShaderHandle::NULL;
        };

        let module = match shader::create_shader_module(&device.device, bytecode) {
            Ok(module) => module,
            Err(e) => {
                log::error!("create_shader failed: {:#}", e);
                return ShaderHandle::NULL;
            }
        };

        match self.shaders.insert(module) {
            Ok(handle) => handle,
            Err(module) => {
                log::error!("Shader handles exhausted");
                unsafe { device.device.destroy_shader_module(module, None) };
                ShaderHandle::NULL
            }
        }
    }

    /// Link both stages into `view`'s pipeline, using the layout of the
    /// last attached vertex buffer as vertex input.
    pub fn create_view_program(
        &mut self,
        view: FramebufferHandle,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
    ) -> ProgramHandle {
        let Some(device) = self.device.as_ref() else {
            log::error!("{}", GfxError::lifecycle("create_view_program after shutdown"));
            return ProgramHandle::NULL;
        };

        let (Some(&vert_module), Some(&frag_module)) = (self.shaders.get(vertex), self.shaders.get(fragment)) else {
            log::error!("create_view_program: shader {:?} or {:?} does not resolve", vertex, fragment);
            return ProgramHandle::NULL;
        };
        let Some(entry) = self.views.get_mut(view) else {
            log::error!("create_view_program: {:?} does not resolve", view);
            return ProgramHandle::NULL;
        };

        // Taken before linking so an exhausted family leaves the view untouched.
        let Some(handle) = self.programs.reserve() else {
            log::error!("Program handles exhausted");
            return ProgramHandle::NULL;
        };

        if let Err(e) = entry
            .view
            .link_program(device, vert_module, frag_module, self.vertex_layout.as_ref())
        {
            log::error!("create_view_program failed: {:#}", e);
            return ProgramHandle::NULL;
        }
        self.programs.fill(handle, ProgramEntry { view });

        // The previous program of this view no longer owns its pipeline.
        let previous = std::mem::replace(&mut entry.program, handle);
        if self.programs.remove(previous).is_some() {
            log::debug!("{:?} replaced {:?} on {:?}", handle, previous, view);
        }
        handle
    }

    /// Upload vertex data described by `layout`.
    ///
    /// The vertex count is `data.len() / layout.stride()`.
    pub fn create_vertex_buffer(&mut self, data: &[u8], layout: &VertexLayout) -> BufferHandle {
        let count = match layout.vertex_count(data.len()) {
            Ok(count) => count,
            Err(e) => {
                log::error!("create_vertex_buffer failed: {}", e);
                return BufferHandle::NULL;
            }
        };
        self.upload(data, BufferUsage::Vertex, count, Some(layout.clone()))
    }

    pub fn create_index_buffer(&mut self, indices: &[u32]) -> BufferHandle {
        let Ok(count) = u32::try_from(indices.len()) else {
            log::error!("create_index_buffer failed: {} indices", indices.len());
            return BufferHandle::NULL;
        };
        self.upload(bytemuck::cast_slice(indices), BufferUsage::Index, count, None)
    }

    fn upload(
        &mut self,
        data: &[u8],
        usage: BufferUsage,
        count: u32,
        layout: Option<VertexLayout>,
    ) -> BufferHandle {
        let (Some(device), Some(uploads)) = (self.device.as_ref(), self.uploads.as_mut()) else {
            log::error!("{}", GfxError::lifecycle("buffer upload after shutdown"));
            return BufferHandle::NULL;
        };

        let name = match usage {
            BufferUsage::Vertex => "vertex buffer",
            BufferUsage::Index => "index buffer",
        };
        let gpu = match buffer::upload_device_local(device, uploads, name, data, usage) {
            Ok(gpu) => gpu,
            Err(e) => {
                log::error!("{} upload failed: {:#}", name, e);
                return BufferHandle::NULL;
            }
        };
        log::debug!("Uploaded {} ({} bytes, {} elements)", name, gpu.size, count);

        match self.buffers.insert(BufferEntry {
            gpu,
            usage,
            count,
            layout,
        }) {
            Ok(handle) => handle,
            Err(mut entry) => {
                log::error!("Buffer handles exhausted");
                entry.gpu.destroy(device);
                BufferHandle::NULL
            }
        }
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    pub fn set_viewport(&mut self, view: FramebufferHandle, x: i32, y: i32, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            log::error!("set_viewport: empty viewport {}x{}", width, height);
            return false;
        }
        match self.views.get_mut(view) {
            Some(entry) => {
                entry.view.set_viewport(ViewportRect { x, y, width, height });
                true
            }
            None => {
                log::error!("set_viewport: {:?} does not resolve", view);
                false
            }
        }
    }

    /// Bind `handle` as vertex input and record its layout for programs
    /// linked from now on.
    pub fn attach_vertex_buffer(&mut self, handle: BufferHandle) -> bool {
        let Some(layout) = self
            .buffers
            .get(handle)
            .filter(|b| b.usage == BufferUsage::Vertex)
            .and_then(|b| b.layout.clone())
        else {
            log::error!("attach_vertex_buffer: {:?} is not a vertex buffer", handle);
            return false;
        };
        self.vertex_layout = Some(layout);
        self.set_vertex_buffer(handle)
    }

    /// Bind `handle` as the vertex buffer of every view.
    pub fn set_vertex_buffer(&mut self, handle: BufferHandle) -> bool {
        let Some(bound) = self.bound_as(handle, BufferUsage::Vertex) else {
            log::error!("set_vertex_buffer: {:?} is not a vertex buffer", handle);
            return false;
        };
        bind_all(
            self.views.iter_mut().map(|(_, entry)| entry.view.draw_state_mut()),
            BindSlot::Vertex,
            bound,
        );
        self.bound_vertex = Some(handle);
        true
    }

    /// Bind `handle` as the index buffer of every view. Draws become indexed.
    pub fn set_index_buffer(&mut self, handle: BufferHandle) -> bool {
        let Some(bound) = self.bound_as(handle, BufferUsage::Index) else {
            log::error!("set_index_buffer: {:?} is not an index buffer", handle);
            return false;
        };
        bind_all(
            self.views.iter_mut().map(|(_, entry)| entry.view.draw_state_mut()),
            BindSlot::Index,
            bound,
        );
        self.bound_index = Some(handle);
        true
    }

    /// Rebuild `view` at the new size on its next frame.
    ///
    /// A zero size is accepted and pauses the view until the next resize.
    pub fn resize_framebuffer(&mut self, view: FramebufferHandle, width: u32, height: u32) -> bool {
        match self.views.get_mut(view) {
            Some(entry) => {
                log::debug!("Resize {:?} to {}x{}", view, width, height);
                entry.view.resize(width, height);
                true
            }
            None => {
                log::error!("resize_framebuffer: {:?} does not resolve", view);
                false
            }
        }
    }

    fn bound(&self, handle: BufferHandle) -> Option<BoundBuffer> {
        self.buffers.get(handle).map(|b| BoundBuffer {
            buffer: b.gpu.buffer,
            count: b.count,
        })
    }

    fn bound_as(&self, handle: BufferHandle, usage: BufferUsage) -> Option<BoundBuffer> {
        self.buffers
            .get(handle)
            .filter(|b| b.usage == usage)
            .and_then(|_| self.bound(handle))
    }

    // =========================================================================
    // FRAME
    // =========================================================================

    /// Wait, acquire, record and submit every ready view.
    ///
    /// Returns false if any view dropped its frame.
    pub fn submit(&mut self) -> bool {
        self.submit_views(false)
    }

    /// Present every submitted view, submitting ready views first if this
    /// tick has not submitted them yet.
    ///
    /// Returns false if any view dropped its frame.
    pub fn present(&mut self) -> bool {
        let mut ok = self.submit_views(true);

        let Some(device) = self.device.as_ref() else {
            return false;
        };
        let Some(queue) = device.present_queue() else {
            // Headless: offscreen views have nothing to present.
            for (_, entry) in self.views.iter_mut() {
                entry.submitted_this_tick = false;
            }
            return ok;
        };

        for (handle, entry) in self.views.iter_mut() {
            entry.submitted_this_tick = false;
            if !wants_present(entry.view.state()) {
                continue;
            }
            match entry.view.present(device, queue.queue) {
                Ok(()) => self.stats.frames_presented += 1,
                Err(e) => {
                    log::error!("Present of {:?} failed, frame dropped: {:#}", handle, e);
                    self.stats.frames_dropped += 1;
                    ok = false;
                }
            }
        }
        ok
    }

    fn submit_views(&mut self, only_pending: bool) -> bool {
        let Some(device) = self.device.as_ref() else {
            log::error!("{}", GfxError::lifecycle("frame after shutdown"));
            return false;
        };
        let queue = device.graphics_queue().queue;
        let mut ok = true;

        for (handle, entry) in self.views.iter_mut() {
            if !wants_submit(entry.view.state(), entry.submitted_this_tick, only_pending) {
                continue;
            }
            entry.submitted_this_tick = true;

            let rebuilt_before = entry.view.recreations();
            let result = entry.view.submit(device, queue);
            match &result {
                Ok(FrameOutcome::Submitted(call)) => log::trace!("{:?} submitted {:?}", handle, call),
                Ok(FrameOutcome::Skipped) => log::trace!("{:?} skipped its frame", handle),
                Err(e) => {
                    log::error!("Frame for {:?} dropped: {:#}", handle, e);
                    ok = false;
                }
            }
            self.stats
                .count_submit(&result, entry.view.recreations() - rebuilt_before);
        }

        if let Some(uploads) = self.uploads.as_mut() {
            uploads.update(&device.device);
        }
        ok
    }

    // =========================================================================
    // RELEASE
    // =========================================================================

    pub fn release_shader(&mut self, handle: ShaderHandle) -> bool {
        let Some(device) = self.device.as_ref() else {
            return false;
        };
        match self.shaders.remove(handle) {
            Some(module) => {
                // Pipelines keep working once built.
                unsafe { device.device.destroy_shader_module(module, None) };
                true
            }
            None => {
                log::error!("release_shader: {:?} does not resolve", handle);
                false
            }
        }
    }

    pub fn release_buffer(&mut self, handle: BufferHandle) -> bool {
        let Some(device) = self.device.as_ref() else {
            return false;
        };
        if !self.buffers.contains(handle) {
            log::error!("release_buffer: {:?} does not resolve", handle);
            return false;
        }
        if let Err(e) = device.wait_idle() {
            log::error!("release_buffer: {:#}", e);
            return false;
        }

        let Some(mut entry) = self.buffers.remove(handle) else {
            return false;
        };
        for (_, view) in self.views.iter_mut() {
            view.view.draw_state_mut().unbind(entry.gpu.buffer);
        }
        if self.bound_vertex == Some(handle) {
            self.bound_vertex = None;
        }
        if self.bound_index == Some(handle) {
            self.bound_index = None;
        }
        entry.gpu.destroy(device);
        true
    }

    /// Drop `handle`'s pipeline. Its view goes back to Uninitialized.
    pub fn release_program(&mut self, handle: ProgramHandle) -> bool {
        let Some(device) = self.device.as_ref() else {
            return false;
        };
        let Some(program) = self.programs.remove(handle) else {
            log::error!("release_program: {:?} does not resolve", handle);
            return false;
        };
        let Some(entry) = self.views.get_mut(program.view) else {
            return true;
        };
        if entry.program != handle {
            return true;
        }
        if let Err(e) = device.wait_idle() {
            log::error!("release_program: {:#}", e);
        }
        entry.view.unlink_program(device);
        entry.program = ProgramHandle::NULL;
        true
    }

    pub fn release_framebuffer(&mut self, handle: FramebufferHandle) -> bool {
        let Some(device) = self.device.as_ref() else {
            return false;
        };
        if !self.views.contains(handle) {
            log::error!("release_framebuffer: {:?} does not resolve", handle);
            return false;
        }
        if let Err(e) = device.wait_idle() {
            log::error!("release_framebuffer: {:#}", e);
            return false;
        }
        let Some(mut entry) = self.views.remove(handle) else {
            return false;
        };
        self.programs.remove(entry.program);
        entry.view.destroy(device);
        true
    }

    // =========================================================================
    // TEARDOWN
    // =========================================================================

    /// Wait for the device and destroy everything, device last.
    ///
    /// A second call is a lifecycle violation and returns false.
    pub fn shutdown(&mut self) -> bool {
        let Some(device) = self.device.take() else {
            log::error!("{}", GfxError::lifecycle("shutdown called twice"));
            return false;
        };
        log::info!("Shutting down renderer");

        if let Err(e) = device.wait_idle() {
            log::warn!("Device not idle at shutdown: {:#}", e);
        }

        for (_, mut entry) in self.views.drain() {
            entry.view.destroy(&device);
        }
        self.programs.drain();
        for (_, mut entry) in self.buffers.drain() {
            entry.gpu.destroy(&device);
        }
        for (_, module) in self.shaders.drain() {
            unsafe { device.device.destroy_shader_module(module, None) };
        }
        if let Some(uploads) = self.uploads.take() {
            uploads.destroy(&device.device);
        }
        device.device.free_pool(self.graphics_pool);
        self.graphics_pool = vk::CommandPool::null();
        self.bound_vertex = None;
        self.bound_index = None;

        log::info!(
            "Frames submitted: {}, presented: {}, dropped: {}",
            self.stats.frames_submitted,
            self.stats.frames_presented,
            self.stats.frames_dropped
        );
        drop(device);
        true
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// The selected adapter, `None` after shutdown.
    pub fn adapter(&self) -> Option<&AdapterDescriptor> {
        self.device.as_ref().map(|d| d.adapter())
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn view_state(&self, view: FramebufferHandle) -> Option<ViewState> {
        self.views.get(view).map(|entry| entry.view.state())
    }

    pub fn is_shut_down(&self) -> bool {
        self.device.is_none()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if self.device.is_some() {
            log::warn!("Renderer dropped without shutdown()");
            self.shutdown();
        }
    }
}

#[cfg(test)]
#[path = "renderer_tests.rs"]
mod tests;
