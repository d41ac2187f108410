// Command buffer recycling
//
// A fixed set of command buffers, each paired with a fence, handed out
// from an index-linked free list. A slot only goes back on the free list
// once its fence has been observed signaled, so a buffer is never
// re-recorded while the GPU may still be reading it.
//
// Slot states: Free -> Acquired -> Submitted -> (fence signaled) -> Free
//
// The device is passed into every call instead of being stored, so the
// recycler owns nothing but its handles. `CommandDevice` is the seam that
// lets the whole lifecycle run against a mock in tests.

use ash::prelude::VkResult;
use ash::vk;
use std::collections::HashMap;

/// Device operations needed to manage pools, fences and submissions
pub trait CommandDevice {
    fn create_pool(&self, queue_family: u32) -> VkResult<vk::CommandPool>;
    fn allocate_buffers(&self, pool: vk::CommandPool, count: u32) -> VkResult<Vec<vk::CommandBuffer>>;
    fn create_signaled_fence(&self) -> VkResult<vk::Fence>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn is_fence_signaled(&self, fence: vk::Fence) -> VkResult<bool>;
    fn wait_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()>;
    fn reset_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()>;
    fn submit(&self, queue: vk::Queue, submission: &Submission<'_>, fence: vk::Fence) -> VkResult<()>;
    fn wait_queue_idle(&self, queue: vk::Queue) -> VkResult<()>;
    fn create_unsignaled_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn free_semaphore(&self, semaphore: vk::Semaphore);
    fn free_fence(&self, fence: vk::Fence);
    fn free_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn free_pool(&self, pool: vk::CommandPool);
}

/// One queue submission of a single recorded command buffer
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphores: &'a [vk::Semaphore],
    /// Stage every wait semaphore blocks.
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphores: &'a [vk::Semaphore],
}

impl CommandDevice for ash::Device {
    fn create_pool(&self, queue_family: u32) -> VkResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        unsafe { self.create_command_pool(&info, None) }
    }

    fn allocate_buffers(&self, pool: vk::CommandPool, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.allocate_command_buffers(&info) }
    }

    fn create_signaled_fence(&self) -> VkResult<vk::Fence> {
        let info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        unsafe { self.create_fence(&info, None) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.reset_fences(&[fence]) }
    }

    fn is_fence_signaled(&self, fence: vk::Fence) -> VkResult<bool> {
        unsafe { self.get_fence_status(fence) }
    }

    fn wait_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()> {
        unsafe { self.wait_for_fences(&[fence], true, timeout) }
    }

    fn reset_buffer(&self, buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty()) }
    }

    fn submit(&self, queue: vk::Queue, submission: &Submission<'_>, fence: vk::Fence) -> VkResult<()> {
        let wait_stages = vec![submission.wait_stage; submission.wait_semaphores.len()];
        let command_buffers = [submission.command_buffer];

        let info = vk::SubmitInfo::default()
            .wait_semaphores(submission.wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(submission.signal_semaphores);

        unsafe { self.queue_submit(queue, &[info], fence) }
    }

    fn wait_queue_idle(&self, queue: vk::Queue) -> VkResult<()> {
        unsafe { self.queue_wait_idle(queue) }
    }

    fn create_unsignaled_semaphore(&self) -> VkResult<vk::Semaphore> {
        unsafe { self.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
    }

    fn free_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.destroy_semaphore(semaphore, None) }
    }

    fn free_fence(&self, fence: vk::Fence) {
        unsafe { self.destroy_fence(fence, None) }
    }

    fn free_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.free_command_buffers(pool, buffers) }
    }

    fn free_pool(&self, pool: vk::CommandPool) {
        unsafe { self.destroy_command_pool(pool, None) }
    }
}

#[derive(Debug)]
struct Slot {
    buffer: vk::CommandBuffer,
    fence: vk::Fence,
    submitted: bool,
    usage_count: u32,
    next_free: Option<usize>,
}

/// Fixed-capacity pool of fence-guarded command buffers
pub struct CommandRecycler {
    pool: vk::CommandPool,
    slots: Vec<Slot>,
    free_head: Option<usize>,
    free_count: usize,
    active: HashMap<vk::CommandBuffer, usize>,
    destroyed: bool,
}

impl CommandRecycler {
    /// Allocate `count` buffers and `count` pre-signaled fences on `queue_family`.
    pub fn new<D: CommandDevice>(device: &D, queue_family: u32, count: u32) -> VkResult<Self> {
        let pool = device.create_pool(queue_family)?;

        let buffers = match device.allocate_buffers(pool, count) {
            Ok(buffers) => buffers,
            Err(e) => {
                device.free_pool(pool);
                return Err(e);
            }
        };

        let mut slots = Vec::with_capacity(buffers.len());
        for (i, &buffer) in buffers.iter().enumerate() {
            match device.create_signaled_fence() {
                Ok(fence) => slots.push(Slot {
                    buffer,
                    fence,
                    submitted: false,
                    usage_count: 0,
                    next_free: (i + 1 < buffers.len()).then_some(i + 1),
                }),
                Err(e) => {
                    for slot in &slots {
                        device.free_fence(slot.fence);
                    }
                    device.free_buffers(pool, &buffers);
                    device.free_pool(pool);
                    return Err(e);
                }
            }
        }

        log::debug!("Command recycler ready: {} buffers on family {}", slots.len(), queue_family);

        Ok(Self {
            pool,
            free_head: (!slots.is_empty()).then_some(0),
            free_count: slots.len(),
            slots,
            active: HashMap::new(),
            destroyed: false,
        })
    }

    /// Take a buffer off the free list, reset and ready for recording.
    ///
    /// Returns `None` when every buffer is in use. The pool never grows.
    pub fn acquire<D: CommandDevice>(&mut self, device: &D) -> Option<vk::CommandBuffer> {
        let index = self.free_head?;

        if let Err(e) = device.reset_buffer(self.slots[index].buffer) {
            log::error!("Failed to reset command buffer: {:?}", e);
            return None;
        }

        let slot = &mut self.slots[index];
        self.free_head = slot.next_free.take();
        self.free_count -= 1;
        slot.submitted = false;
        slot.usage_count += 1;
        self.active.insert(slot.buffer, index);

        Some(slot.buffer)
    }

    /// Submit a recorded buffer, guarded by its slot fence.
    ///
    /// Buffers that were not acquired from this recycler, or that are
    /// already in flight, are refused without touching any fence.
    pub fn submit<D: CommandDevice>(
        &mut self,
        device: &D,
        buffer: vk::CommandBuffer,
        queue: vk::Queue,
        wait_semaphores: &[vk::Semaphore],
        signal_semaphores: &[vk::Semaphore],
        wait_stage: vk::PipelineStageFlags,
    ) -> VkResult<()> {
        let Some(&index) = self.active.get(&buffer) else {
            log::error!("Submit of command buffer {:?} not acquired from this recycler", buffer);
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        let slot = &mut self.slots[index];
        if slot.submitted {
            log::error!("Command buffer {:?} is already in flight", buffer);
            return Err(vk::Result::ERROR_UNKNOWN);
        }

        device.reset_fence(slot.fence)?;

        let submission = Submission {
            command_buffer: buffer,
            wait_semaphores,
            wait_stage,
            signal_semaphores,
        };
        device.submit(queue, &submission, slot.fence)?;

        slot.submitted = true;
        Ok(())
    }

    /// Reclaim every submitted buffer whose fence has signaled.
    ///
    /// Returns how many buffers went back on the free list.
    pub fn update<D: CommandDevice>(&mut self, device: &D) -> usize {
        let finished: Vec<usize> = self
            .active
            .values()
            .copied()
            .filter(|&index| {
                let slot = &self.slots[index];
                slot.submitted
                    && match device.is_fence_signaled(slot.fence) {
                        Ok(signaled) => signaled,
                        Err(e) => {
                            log::warn!("Fence status query failed: {:?}", e);
                            false
                        }
                    }
            })
            .collect();

        for &index in &finished {
            self.push_free(index);
        }
        finished.len()
    }

    /// Block until `buffer` completes if it is in flight. No-op otherwise.
    pub fn wait_for<D: CommandDevice>(&self, device: &D, buffer: vk::CommandBuffer) -> VkResult<()> {
        match self.active.get(&buffer) {
            Some(&index) if self.slots[index].submitted => {
                device.wait_fence(self.slots[index].fence, u64::MAX)
            }
            _ => Ok(()),
        }
    }

    /// Return an acquired buffer that was never submitted.
    pub fn release(&mut self, buffer: vk::CommandBuffer) -> bool {
        match self.active.get(&buffer) {
            Some(&index) if !self.slots[index].submitted => {
                self.push_free(index);
                true
            }
            _ => false,
        }
    }

    /// Destroy fences, buffers and the pool. The device must be idle.
    pub fn destroy<D: CommandDevice>(mut self, device: &D) {
        if !self.active.is_empty() {
            log::debug!("Destroying recycler with {} active buffers", self.active.len());
        }
        for slot in &self.slots {
            device.free_fence(slot.fence);
        }
        let buffers: Vec<vk::CommandBuffer> = self.slots.iter().map(|s| s.buffer).collect();
        if !buffers.is_empty() {
            device.free_buffers(self.pool, &buffers);
        }
        device.free_pool(self.pool);

        self.slots.clear();
        self.active.clear();
        self.free_head = None;
        self.free_count = 0;
        self.destroyed = true;
    }

    fn push_free(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        self.active.remove(&slot.buffer);
        slot.submitted = false;
        slot.next_free = self.free_head;
        self.free_head = Some(index);
        self.free_count += 1;
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_count
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_submitted(&self, buffer: vk::CommandBuffer) -> bool {
        self.active
            .get(&buffer)
            .map_or(false, |&index| self.slots[index].submitted)
    }

    /// How many times the slot owning `buffer` has been acquired.
    pub fn usage_count(&self, buffer: vk::CommandBuffer) -> Option<u32> {
        self.slots
            .iter()
            .find(|s| s.buffer == buffer)
            .map(|s| s.usage_count)
    }

    pub fn pool(&self) -> vk::CommandPool {
        self.pool
    }
}

impl Drop for CommandRecycler {
    fn drop(&mut self) {
        if !self.destroyed {
            log::warn!(
                "CommandRecycler dropped without destroy(): {} buffers leaked",
                self.slots.len()
            );
        }
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
