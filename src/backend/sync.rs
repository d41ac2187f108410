// Synchronization primitives
//
// Per-view semaphore pair plus the in-flight fence that bounds how far
// the CPU can run ahead of the GPU.

use ash::prelude::VkResult;
use ash::vk;

/// Frame synchronization - one per view
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> VkResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        unsafe {
            let image_available = device.create_semaphore(&semaphore_info, None)?;
            let render_finished = match device.create_semaphore(&semaphore_info, None) {
                Ok(s) => s,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(e);
                }
            };
            let in_flight_fence = match device.create_fence(&fence_info, None) {
                Ok(f) => f,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                    return Err(e);
                }
            };
            Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_fence(self.in_flight_fence, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_semaphore(self.image_available, None);
        }
    }
}
