// View - one render target and its frame loop
//
// A view is either window-backed (surface + swapchain, presents) or
// offscreen (one device-local color image, never presents). Per frame:
//
//   wait in-flight fence -> [recreate] -> acquire -> record -> submit -> present
//
// The pipeline is built lazily by `link_program`; until then the view is
// Uninitialized and skipped by the frame loop. Teardown runs in reverse
// creation order: pipeline, render pass, sync, framebuffers, swapchain or
// image, surface.

use super::buffer::OffscreenImage;
use super::command::{CommandDevice, Submission};
use super::pipeline::{self, GraphicsPipeline};
use super::record::{self, CommandRecorder, DrawCall, DrawState, PassTarget, ViewportRect};
use super::surface::NativeWindow;
use super::swapchain::{Acquired, Swapchain, SwapchainRequest, PREFERRED_SURFACE_FORMAT};
use super::sync::FrameSync;
use super::VulkanDevice;
use crate::error::GfxError;
use crate::vertex::VertexLayout;
use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;

/// Lifecycle of a view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// Created, no program linked yet.
    Uninitialized,
    Ready,
    /// Frame submitted, presentation pending.
    Submitted,
    Destroyed,
}

/// What `View::submit` did this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Submitted(DrawCall),
    /// Nothing to draw into (minimized, or the swapchain went out of date).
    Skipped,
}

/// Per-view settings taken from the renderer configuration
#[derive(Debug, Clone, Copy)]
pub struct ViewSettings {
    pub min_image_count: u32,
    pub present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],
}

/// Command buffer, queue and semaphores one frame is submitted with
#[derive(Debug, Clone, Copy)]
pub struct FrameSubmit<'a> {
    pub queue: vk::Queue,
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphores: &'a [vk::Semaphore],
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// Re-record `frame.command_buffer` and submit it guarded by `fence`.
///
/// The fence is only reset right before the submit. If the submit fails
/// the fence is replaced by a fresh signaled one so the next wait on it
/// cannot hang.
pub fn record_and_submit<D: CommandDevice + CommandRecorder>(
    device: &D,
    fence: &mut vk::Fence,
    frame: &FrameSubmit<'_>,
    target: &PassTarget,
    draw: &DrawState,
) -> VkResult<DrawCall> {
    device.reset_buffer(frame.command_buffer)?;
    let call = record::record_frame(device, frame.command_buffer, target, draw)?;

    device.reset_fence(*fence)?;
    let submission = Submission {
        command_buffer: frame.command_buffer,
        wait_semaphores: frame.wait_semaphores,
        wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        signal_semaphores: frame.signal_semaphores,
    };
    if let Err(e) = device.submit(frame.queue, &submission, *fence) {
        match device.create_signaled_fence() {
            Ok(fresh) => {
                device.free_fence(*fence);
                *fence = fresh;
            }
            Err(fence_err) => log::error!("Could not replace in-flight fence: {:?}", fence_err),
        }
        return Err(e);
    }

    Ok(call)
}

/// Give up on a frame whose swapchain image was acquired but never
/// submitted.
///
/// `image_available` still carries the acquire's signal, so it is swapped
/// for a fresh unsignaled semaphore once `queue` is idle.
pub fn drop_acquired_frame<D: CommandDevice>(
    device: &D,
    queue: vk::Queue,
    image_available: &mut vk::Semaphore,
) -> VkResult<()> {
    device.wait_queue_idle(queue)?;
    let fresh = device.create_unsignaled_semaphore()?;
    device.free_semaphore(*image_available);
    *image_available = fresh;
    Ok(())
}

/// State a view moves to once its frame is on the queue
pub fn state_after_submit(offscreen: bool) -> ViewState {
    if offscreen {
        ViewState::Ready
    } else {
        ViewState::Submitted
    }
}

/// What swapchain recreation needs to know about a swapchain
pub trait RetiringSwapchain {
    fn handle(&self) -> vk::SwapchainKHR;
    fn surface_format(&self) -> vk::SurfaceFormatKHR;
}

impl RetiringSwapchain for Swapchain {
    fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }
}

/// Replace `current` with the swapchain `build` makes from it.
///
/// Passing a swapchain as `old_swapchain` retires it whether or not the
/// build succeeds, so `current` is destroyed in every case. After a failed
/// build or a format change it is left with a null handle and the next
/// attempt starts from scratch.
pub fn rebuild_swapchain<S: RetiringSwapchain>(
    current: &mut S,
    build: impl FnOnce(vk::SwapchainKHR) -> Result<S>,
    mut destroy: impl FnMut(&mut S),
) -> Result<()> {
    let old_format = current.surface_format();
    let built = build(current.handle());
    destroy(current);
    let mut fresh = built.context("Failed to recreate swapchain")?;

    let new_format = fresh.surface_format();
    if new_format.format != old_format.format || new_format.color_space != old_format.color_space {
        destroy(&mut fresh);
        return Err(GfxError::resource(format!(
            "surface format changed from {:?} to {:?}",
            old_format.format, new_format.format
        ))
        .into());
    }

    *current = fresh;
    Ok(())
}

enum Target {
    Window {
        surface: vk::SurfaceKHR,
        swapchain: Swapchain,
    },
    Offscreen(OffscreenImage),
}

impl Target {
    fn format(&self) -> vk::Format {
        match self {
            Target::Window { swapchain, .. } => swapchain.format.format,
            Target::Offscreen(image) => image.format,
        }
    }

    fn extent(&self) -> vk::Extent2D {
        match self {
            Target::Window { swapchain, .. } => swapchain.extent,
            Target::Offscreen(image) => image.extent,
        }
    }

    fn image_views(&self) -> Vec<vk::ImageView> {
        match self {
            Target::Window { swapchain, .. } => swapchain.image_views.clone(),
            Target::Offscreen(image) => vec![image.view],
        }
    }

    fn destroy(&mut self, device: &VulkanDevice) {
        match self {
            Target::Window { surface, swapchain } => {
                swapchain.destroy(device);
                if *surface != vk::SurfaceKHR::null() {
                    device.destroy_surface(*surface);
                    *surface = vk::SurfaceKHR::null();
                }
            }
            Target::Offscreen(image) => image.destroy(device),
        }
    }
}

pub struct View {
    state: ViewState,
    target: Target,
    render_pass: vk::RenderPass,
    pipeline: Option<GraphicsPipeline>,
    framebuffers: Vec<vk::Framebuffer>,
    sync: FrameSync,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    draw: DrawState,
    image_index: u32,
    request: SwapchainRequest,
    clear_color: [f32; 4],
    needs_recreate: bool,
    recreations: u64,
}

impl View {
    /// Build the render target, render pass, sync objects and the view's
    /// command buffer from `command_pool`.
    ///
    /// Without a window, or on a headless device, the view renders offscreen.
    pub fn new(
        device: &VulkanDevice,
        window: Option<&NativeWindow>,
        extent: vk::Extent2D,
        command_pool: vk::CommandPool,
        settings: &ViewSettings,
    ) -> Result<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(GfxError::resource(format!(
                "view extent {}x{} is empty",
                extent.width, extent.height
            ))
            .into());
        }

        let graphics = device.graphics_queue();
        let request = SwapchainRequest {
            extent,
            min_image_count: settings.min_image_count,
            preferred_format: PREFERRED_SURFACE_FORMAT,
            present_mode: settings.present_mode,
            graphics_family: graphics.family,
            present_family: device.present_queue().map_or(graphics.family, |q| q.family),
        };

        let mut target = match window.filter(|_| !device.is_headless()) {
            Some(window) => {
                let surface = device.create_surface(window)?;
                match Swapchain::new(device, surface, &request, vk::SwapchainKHR::null()) {
                    Ok(swapchain) => Target::Window { surface, swapchain },
                    Err(e) => {
                        device.destroy_surface(surface);
                        return Err(e);
                    }
                }
            }
            None => Target::Offscreen(OffscreenImage::new(device, extent)?),
        };

        let final_layout = match target {
            Target::Window { .. } => vk::ImageLayout::PRESENT_SRC_KHR,
            Target::Offscreen(_) => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let render_pass = match pipeline::create_render_pass(&device.device, target.format(), final_layout) {
            Ok(render_pass) => render_pass,
            Err(e) => {
                target.destroy(device);
                return Err(e);
            }
        };

        let sync = match FrameSync::new(&device.device) {
            Ok(sync) => sync,
            Err(e) => {
                unsafe { device.device.destroy_render_pass(render_pass, None) };
                target.destroy(device);
                return Err(GfxError::resource(format!("frame sync objects: {:?}", e)).into());
            }
        };

        let command_buffer = match device.device.allocate_buffers(command_pool, 1) {
            Ok(buffers) if !buffers.is_empty() => buffers[0],
            result => {
                sync.destroy(&device.device);
                unsafe { device.device.destroy_render_pass(render_pass, None) };
                target.destroy(device);
                return Err(GfxError::resource(format!("view command buffer: {:?}", result.err())).into());
            }
        };

        log::info!(
            "Created {} view {}x{}",
            if matches!(target, Target::Window { .. }) { "window" } else { "offscreen" },
            target.extent().width,
            target.extent().height
        );

        Ok(Self {
            state: ViewState::Uninitialized,
            target,
            render_pass,
            pipeline: None,
            framebuffers: Vec::new(),
            sync,
            command_pool,
            command_buffer,
            draw: DrawState::default(),
            image_index: 0,
            request,
            clear_color: settings.clear_color,
            needs_recreate: false,
            recreations: 0,
        })
    }

    /// Build framebuffers and the graphics pipeline for the two stages.
    ///
    /// Relinking replaces the previous pipeline once the last frame is done.
    pub fn link_program(
        &mut self,
        device: &VulkanDevice,
        vertex: vk::ShaderModule,
        fragment: vk::ShaderModule,
        layout: Option<&VertexLayout>,
    ) -> Result<()> {
        if self.state == ViewState::Destroyed {
            return Err(GfxError::lifecycle("link_program on a destroyed view").into());
        }

        if self.framebuffers.is_empty() {
            self.framebuffers = pipeline::create_framebuffers(
                &device.device,
                &self.target.image_views(),
                self.render_pass,
                self.target.extent(),
            )?;
        }

        let built = pipeline::create_graphics_pipeline(&device.device, self.render_pass, vertex, fragment, layout)?;

        if let Some(old) = self.pipeline.replace(built) {
            device
                .device
                .wait_fence(self.sync.in_flight_fence, u64::MAX)
                .map_err(|e| GfxError::submission(format!("waiting before relink: {:?}", e)))?;
            old.destroy(&device.device);
        }

        if self.state == ViewState::Uninitialized {
            self.state = ViewState::Ready;
        }
        Ok(())
    }

    /// Destroy the pipeline and framebuffers. The view stops drawing until
    /// the next `link_program`.
    pub fn unlink_program(&mut self, device: &VulkanDevice) {
        if let Err(e) = device.device.wait_fence(self.sync.in_flight_fence, u64::MAX) {
            log::warn!("In-flight fence wait failed before unlink: {:?}", e);
        }
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.destroy(&device.device);
        }
        pipeline::destroy_framebuffers(&device.device, &mut self.framebuffers);
        if self.state != ViewState::Destroyed {
            self.state = ViewState::Uninitialized;
        }
    }

    /// Steps 1 to 4 of the frame: wait, acquire, record, submit.
    pub fn submit(&mut self, device: &VulkanDevice, queue: vk::Queue) -> Result<FrameOutcome> {
        if self.state != ViewState::Ready {
            return Err(GfxError::lifecycle(format!("submit on a view in state {:?}", self.state)).into());
        }
        let Some(graphics_pipeline) = self.pipeline else {
            return Err(GfxError::lifecycle("submit on a view without a pipeline").into());
        };

        // Step 1: backpressure
        device
            .device
            .wait_fence(self.sync.in_flight_fence, u64::MAX)
            .map_err(|e| GfxError::submission(format!("in-flight fence wait: {:?}", e)))?;

        if self.needs_recreate && !self.recreate(device)? {
            return Ok(FrameOutcome::Skipped);
        }

        // Step 2: acquire
        let window = matches!(self.target, Target::Window { .. });
        self.image_index = match &self.target {
            Target::Window { swapchain, .. } => match swapchain.acquire(device, self.sync.image_available)? {
                Acquired::Image { index, suboptimal } => {
                    if suboptimal {
                        log::debug!("Swapchain is suboptimal, recreating next frame");
                        self.needs_recreate = true;
                    }
                    index
                }
                Acquired::OutOfDate => {
                    log::debug!("Swapchain out of date on acquire");
                    self.needs_recreate = true;
                    return Ok(FrameOutcome::Skipped);
                }
            },
            Target::Offscreen(_) => 0,
        };

        // Steps 3 and 4: record and submit
        let result = self.record_acquired(device, queue, graphics_pipeline.pipeline, window);
        match result {
            Ok(call) => {
                self.state = state_after_submit(!window);
                Ok(FrameOutcome::Submitted(call))
            }
            Err(e) => {
                if window {
                    self.release_acquired_image(device, queue);
                }
                Err(e)
            }
        }
    }

    fn record_acquired(
        &mut self,
        device: &VulkanDevice,
        queue: vk::Queue,
        pipeline: vk::Pipeline,
        window: bool,
    ) -> Result<DrawCall> {
        let framebuffer = self
            .framebuffers
            .get(self.image_index as usize)
            .copied()
            .ok_or_else(|| GfxError::lifecycle(format!("no framebuffer for image {}", self.image_index)))?;

        let pass = PassTarget {
            render_pass: self.render_pass,
            framebuffer,
            extent: self.target.extent(),
            pipeline: Some(pipeline),
            clear_color: self.clear_color,
        };

        let waits = [self.sync.image_available];
        let signals = [self.sync.render_finished];
        let frame = FrameSubmit {
            queue,
            command_buffer: self.command_buffer,
            wait_semaphores: if window { &waits[..] } else { &[] },
            signal_semaphores: if window { &signals[..] } else { &[] },
        };
        let call = record_and_submit(&device.device, &mut self.sync.in_flight_fence, &frame, &pass, &self.draw)
            .map_err(|e| GfxError::submission(format!("frame submit: {:?}", e)))?;
        Ok(call)
    }

    /// Reset the acquire semaphore after a dropped frame. The acquired image
    /// is handed back by retiring the swapchain on the next frame.
    fn release_acquired_image(&mut self, device: &VulkanDevice, queue: vk::Queue) {
        if let Err(e) = drop_acquired_frame(&device.device, queue, &mut self.sync.image_available) {
            log::error!("Could not replace the acquire semaphore: {:?}", e);
        }
        self.needs_recreate = true;
    }

    /// Step 5: present the image submitted by the last `submit`.
    pub fn present(&mut self, device: &VulkanDevice, queue: vk::Queue) -> Result<()> {
        if self.state != ViewState::Submitted {
            return Err(GfxError::lifecycle(format!("present on a view in state {:?}", self.state)).into());
        }
        self.state = ViewState::Ready;

        let Target::Window { swapchain, .. } = &self.target else {
            return Ok(());
        };
        if swapchain.present(device, queue, self.image_index, &[self.sync.render_finished])? {
            log::debug!("Swapchain needs recreation after present");
            self.needs_recreate = true;
        }
        Ok(())
    }

    /// Rebuild the swapchain (or offscreen image) for the requested extent.
    ///
    /// Returns false when the extent is zero and the frame should be skipped.
    fn recreate(&mut self, device: &VulkanDevice) -> Result<bool> {
        let extent = self.request.extent;
        if extent.width == 0 || extent.height == 0 {
            return Ok(false);
        }

        log::info!("Recreating view target at {}x{}", extent.width, extent.height);
        pipeline::destroy_framebuffers(&device.device, &mut self.framebuffers);

        match &mut self.target {
            Target::Window { surface, swapchain } => {
                let surface = *surface;
                let request = &self.request;
                rebuild_swapchain(
                    swapchain,
                    |old| Swapchain::new(device, surface, request, old),
                    |retired| retired.destroy(device),
                )?;
            }
            Target::Offscreen(image) => {
                let fresh = OffscreenImage::new(device, extent)?;
                image.destroy(device);
                *image = fresh;
            }
        }

        if self.pipeline.is_some() {
            self.framebuffers = pipeline::create_framebuffers(
                &device.device,
                &self.target.image_views(),
                self.render_pass,
                self.target.extent(),
            )?;
        }

        self.needs_recreate = false;
        self.recreations += 1;
        Ok(true)
    }

    /// Request a new extent. The target is rebuilt at the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.request.extent = vk::Extent2D { width, height };
        self.needs_recreate = true;
    }

    pub fn set_viewport(&mut self, viewport: ViewportRect) {
        self.draw.viewport = Some(viewport);
    }


    pub fn state(&self) -> ViewState {
        self.state
    }

    pub fn needs_recreate(&self) -> bool {
        self.needs_recreate
    }

    /// Successful target rebuilds since creation.
    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.target.extent()
    }

    pub fn is_offscreen(&self) -> bool {
        matches!(self.target, Target::Offscreen(_))
    }

    pub fn draw_state(&self) -> &DrawState {
        &self.draw
    }

    /// Buffers and viewport the next frame records with.
    pub fn draw_state_mut(&mut self) -> &mut DrawState {
        &mut self.draw
    }

    /// Tear everything down. The view's last frame is waited for first.
    pub fn destroy(&mut self, device: &VulkanDevice) {
        if self.state == ViewState::Destroyed {
            log::warn!("View destroyed twice");
            return;
        }
        if let Err(e) = device.device.wait_fence(self.sync.in_flight_fence, u64::MAX) {
            log::warn!("In-flight fence wait failed during view teardown: {:?}", e);
        }

        if let Some(pipeline) = self.pipeline.take() {
            pipeline.destroy(&device.device);
        }
        unsafe { device.device.destroy_render_pass(self.render_pass, None) };
        self.render_pass = vk::RenderPass::null();
        self.sync.destroy(&device.device);
        pipeline::destroy_framebuffers(&device.device, &mut self.framebuffers);
        self.target.destroy(device);
        device.device.free_buffers(self.command_pool, &[self.command_buffer]);

        self.state = ViewState::Destroyed;
    }
}

#[cfg(test)]
#[path = "view_tests.rs"]
mod tests;
