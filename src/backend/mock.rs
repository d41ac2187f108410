// Test doubles for the device seams
//
// `MockDevice` hands out fake handles and keeps fence state in memory.
// Submitted work never completes on its own: tests call `complete_all()`
// or `complete(buffer)` to play the GPU. Recorded commands are kept as
// strings, one per call.

use super::command::{CommandDevice, Submission};
use super::record::CommandRecorder;
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct MockSubmission {
    pub queue: vk::Queue,
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    fences: HashMap<vk::Fence, bool>,
    semaphores: Vec<vk::Semaphore>,
    freed_semaphores: Vec<vk::Semaphore>,
    queue_idle_waits: usize,
    submissions: Vec<MockSubmission>,
    fence_resets: usize,
    fence_waits: usize,
    buffer_resets: usize,
    freed_fences: usize,
    freed_buffers: usize,
    freed_pools: usize,
    fail_next_submit: Option<vk::Result>,
    commands: Vec<String>,
}

#[derive(Default)]
pub struct MockDevice {
    state: RefCell<MockState>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_raw(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        state.next_handle += 1;
        state.next_handle
    }

    /// Make the next `submit` fail with `result`.
    pub fn fail_next_submit(&self, result: vk::Result) {
        self.state.borrow_mut().fail_next_submit = Some(result);
    }

    /// Signal the fence of every submission so far.
    pub fn complete_all(&self) {
        let mut state = self.state.borrow_mut();
        let fences: Vec<vk::Fence> = state.submissions.iter().map(|s| s.fence).collect();
        for fence in fences {
            state.fences.insert(fence, true);
        }
    }

    /// Signal the fence of the latest submission of `buffer`.
    pub fn complete(&self, buffer: vk::CommandBuffer) {
        let mut state = self.state.borrow_mut();
        if let Some(fence) = state
            .submissions
            .iter()
            .rev()
            .find(|s| s.command_buffer == buffer)
            .map(|s| s.fence)
        {
            state.fences.insert(fence, true);
        }
    }

    pub fn submissions(&self) -> Vec<MockSubmission> {
        self.state.borrow().submissions.clone()
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> Option<bool> {
        self.state.borrow().fences.get(&fence).copied()
    }

    pub fn live_fences(&self) -> usize {
        self.state.borrow().fences.len()
    }

    pub fn fence_resets(&self) -> usize {
        self.state.borrow().fence_resets
    }

    pub fn fence_waits(&self) -> usize {
        self.state.borrow().fence_waits
    }

    pub fn buffer_resets(&self) -> usize {
        self.state.borrow().buffer_resets
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.borrow_mut().commands.clear();
    }

    fn push(&self, command: String) {
        self.state.borrow_mut().commands.push(command);
    }

    pub fn live_semaphores(&self) -> Vec<vk::Semaphore> {
        self.state.borrow().semaphores.clone()
    }

    pub fn freed_semaphores(&self) -> Vec<vk::Semaphore> {
        self.state.borrow().freed_semaphores.clone()
    }

    pub fn queue_idle_waits(&self) -> usize {
        self.state.borrow().queue_idle_waits
    }

    pub fn freed(&self) -> (usize, usize, usize) {
        let state = self.state.borrow();
        (state.freed_fences, state.freed_buffers, state.freed_pools)
    }
}

impl CommandDevice for MockDevice {
    fn create_pool(&self, _queue_family: u32) -> VkResult<vk::CommandPool> {
        Ok(vk::CommandPool::from_raw(self.next_raw()))
    }

    fn allocate_buffers(&self, _pool: vk::CommandPool, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(self.next_raw()))
            .collect())
    }

    fn create_signaled_fence(&self) -> VkResult<vk::Fence> {
        let fence = vk::Fence::from_raw(self.next_raw());
        self.state.borrow_mut().fences.insert(fence, true);
        Ok(fence)
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        state.fence_resets += 1;
        match state.fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(vk::Result::ERROR_DEVICE_LOST),
        }
    }

    fn is_fence_signaled(&self, fence: vk::Fence) -> VkResult<bool> {
        self.state
            .borrow()
            .fences
            .get(&fence)
            .copied()
            .ok_or(vk::Result::ERROR_DEVICE_LOST)
    }

    fn wait_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        // Waiting is where the simulated GPU catches up.
        let mut state = self.state.borrow_mut();
        state.fence_waits += 1;
        match state.fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = true;
                Ok(())
            }
            None => Err(vk::Result::ERROR_DEVICE_LOST),
        }
    }

    fn reset_buffer(&self, _buffer: vk::CommandBuffer) -> VkResult<()> {
        self.state.borrow_mut().buffer_resets += 1;
        Ok(())
    }

    fn submit(&self, queue: vk::Queue, submission: &Submission<'_>, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.fail_next_submit.take() {
            return Err(err);
        }
        state.submissions.push(MockSubmission {
            queue,
            command_buffer: submission.command_buffer,
            wait_semaphores: submission.wait_semaphores.to_vec(),
            wait_stage: submission.wait_stage,
            signal_semaphores: submission.signal_semaphores.to_vec(),
            fence,
        });
        Ok(())
    }

    fn wait_queue_idle(&self, _queue: vk::Queue) -> VkResult<()> {
        self.state.borrow_mut().queue_idle_waits += 1;
        Ok(())
    }

    fn create_unsignaled_semaphore(&self) -> VkResult<vk::Semaphore> {
        let semaphore = vk::Semaphore::from_raw(self.next_raw());
        self.state.borrow_mut().semaphores.push(semaphore);
        Ok(semaphore)
    }

    fn free_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.borrow_mut();
        state.semaphores.retain(|s| *s != semaphore);
        state.freed_semaphores.push(semaphore);
    }

    fn free_fence(&self, fence: vk::Fence) {
        let mut state = self.state.borrow_mut();
        state.fences.remove(&fence);
        state.freed_fences += 1;
    }

    fn free_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        self.state.borrow_mut().freed_buffers += buffers.len();
    }

    fn free_pool(&self, _pool: vk::CommandPool) {
        self.state.borrow_mut().freed_pools += 1;
    }
}

impl CommandRecorder for MockDevice {
    fn begin(&self, _cb: vk::CommandBuffer, one_time: bool) -> VkResult<()> {
        self.push(format!("begin(one_time={})", one_time));
        Ok(())
    }

    fn end(&self, _cb: vk::CommandBuffer) -> VkResult<()> {
        self.push("end".to_string());
        Ok(())
    }

    fn begin_render_pass(
        &self,
        _cb: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        _framebuffer: vk::Framebuffer,
        area: vk::Rect2D,
        _clear_color: [f32; 4],
    ) {
        self.push(format!("begin_render_pass({}x{})", area.extent.width, area.extent.height));
    }

    fn end_render_pass(&self, _cb: vk::CommandBuffer) {
        self.push("end_render_pass".to_string());
    }

    fn bind_pipeline(&self, _cb: vk::CommandBuffer, _pipeline: vk::Pipeline) {
        self.push("bind_pipeline".to_string());
    }

    fn set_viewport(&self, _cb: vk::CommandBuffer, viewport: vk::Viewport) {
        self.push(format!(
            "set_viewport({},{},{},{})",
            viewport.x, viewport.y, viewport.width, viewport.height
        ));
    }

    fn set_scissor(&self, _cb: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.push(format!(
            "set_scissor({},{},{},{})",
            scissor.offset.x, scissor.offset.y, scissor.extent.width, scissor.extent.height
        ));
    }

    fn bind_vertex_buffer(&self, _cb: vk::CommandBuffer, buffer: vk::Buffer) {
        self.push(format!("bind_vertex_buffer({:#x})", buffer.as_raw()));
    }

    fn bind_index_buffer(&self, _cb: vk::CommandBuffer, buffer: vk::Buffer) {
        self.push(format!("bind_index_buffer({:#x})", buffer.as_raw()));
    }

    fn draw(&self, _cb: vk::CommandBuffer, vertex_count: u32) {
        self.push(format!("draw({})", vertex_count));
    }

    fn draw_indexed(&self, _cb: vk::CommandBuffer, index_count: u32) {
        self.push(format!("draw_indexed({})", index_count));
    }

    fn copy_buffer(&self, _cb: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        self.push(format!("copy_buffer({:#x}->{:#x}, {})", src.as_raw(), dst.as_raw(), size));
    }
}
