// GPU memory: vertex/index buffers and offscreen images
//
// Vertex and index data is uploaded through a host-visible staging buffer
// and a one-shot transfer submission. The upload blocks until the
// transfer queue is idle before the staging buffer is freed, which keeps
// its lifetime trivially correct at the cost of upload throughput.

use super::command::CommandRecycler;
use super::record;
use super::VulkanDevice;
use crate::error::GfxError;
use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

/// What a buffer is bound as when drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
}

impl BufferUsage {
    fn flags(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        }
    }
}

/// A buffer plus the allocation backing it
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
}

impl GpuBuffer {
    /// Create and bind a buffer in `location`.
    ///
    /// With more than one entry in `families` the buffer is shared
    /// concurrently, so no ownership transfer is needed between queues.
    pub fn new(
        device: &VulkanDevice,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        families: &[u32],
    ) -> Result<Self> {
        let mut buffer_info = vk::BufferCreateInfo::default().size(size).usage(usage);
        buffer_info = if families.len() > 1 {
            buffer_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(families)
        } else {
            buffer_info.sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .map_err(|e| GfxError::resource(format!("vkCreateBuffer '{}': {:?}", name, e)))?;
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = match device.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            device.free(allocation);
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(GfxError::resource(format!("vkBindBufferMemory '{}': {:?}", name, e)).into());
        }

        Ok(Self {
            buffer,
            size,
            allocation: Some(allocation),
        })
    }

    /// Copy `data` into a host-visible buffer.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| GfxError::resource("buffer memory is not host visible"))?;
        if data.len() > mapped.len() {
            return Err(GfxError::resource(format!(
                "{} bytes do not fit in a {} byte buffer",
                data.len(),
                mapped.len()
            ))
            .into());
        }
        mapped[..data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn destroy(&mut self, device: &VulkanDevice) {
        if let Some(allocation) = self.allocation.take() {
            device.free(allocation);
        }
        if self.buffer != vk::Buffer::null() {
            unsafe { device.device.destroy_buffer(self.buffer, None) };
            self.buffer = vk::Buffer::null();
        }
    }
}

/// Upload `data` into a new device-local buffer.
///
/// Blocks until the transfer queue is idle.
pub fn upload_device_local(
    device: &VulkanDevice,
    recycler: &mut CommandRecycler,
    name: &str,
    data: &[u8],
    usage: BufferUsage,
) -> Result<GpuBuffer> {
    if data.is_empty() {
        return Err(GfxError::resource(format!("'{}' has no data to upload", name)).into());
    }
    let size = data.len() as vk::DeviceSize;

    let transfer = device.transfer_queue();
    let graphics = device.graphics_queue();
    let families: Vec<u32> = if transfer.family == graphics.family {
        vec![graphics.family]
    } else {
        vec![graphics.family, transfer.family]
    };

    let mut staging = GpuBuffer::new(
        device,
        &format!("{} (staging)", name),
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        &[transfer.family],
    )?;

    let result = staging.write(data).and_then(|()| {
        let mut destination = GpuBuffer::new(
            device,
            name,
            size,
            vk::BufferUsageFlags::TRANSFER_DST | usage.flags(),
            MemoryLocation::GpuOnly,
            &families,
        )?;
        match copy_and_wait(device, recycler, staging.buffer, destination.buffer, size) {
            Ok(()) => Ok(destination),
            Err(e) => {
                destination.destroy(device);
                Err(e)
            }
        }
    });

    staging.destroy(device);
    result
}

fn copy_and_wait(
    device: &VulkanDevice,
    recycler: &mut CommandRecycler,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<()> {
    let transfer = device.transfer_queue();

    let cb = match recycler.acquire(&device.device) {
        Some(cb) => cb,
        None => {
            recycler.update(&device.device);
            recycler
                .acquire(&device.device)
                .ok_or_else(|| GfxError::resource("no free transfer command buffer"))?
        }
    };

    if let Err(e) = record::record_copy(&device.device, cb, src, dst, size) {
        recycler.release(cb);
        return Err(GfxError::resource(format!("recording upload failed: {:?}", e)).into());
    }

    if let Err(e) = recycler.submit(
        &device.device,
        cb,
        transfer.queue,
        &[],
        &[],
        vk::PipelineStageFlags::TRANSFER,
    ) {
        recycler.release(cb);
        return Err(GfxError::submission(format!("upload submit failed: {:?}", e)).into());
    }

    device
        .queue_wait_idle(transfer.queue)
        .context("Waiting for upload to finish")?;
    recycler.update(&device.device);
    Ok(())
}

/// Device-local color image rendered to by headless views
pub struct OffscreenImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    allocation: Option<Allocation>,
}

impl OffscreenImage {
    pub const FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

    pub fn new(device: &VulkanDevice, extent: vk::Extent2D) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(Self::FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .map_err(|e| GfxError::resource(format!("vkCreateImage: {:?}", e)))?;
        let requirements = unsafe { device.device.get_image_memory_requirements(image) };

        let allocation = match device.allocate(&AllocationCreateDesc {
            name: "offscreen color",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut target = Self {
            image,
            view: vk::ImageView::null(),
            format: Self::FORMAT,
            extent,
            allocation: Some(allocation),
        };

        let bound = target.allocation.as_ref().map(|a| unsafe {
            device.device.bind_image_memory(image, a.memory(), a.offset())
        });
        if let Some(Err(e)) = bound {
            target.destroy(device);
            return Err(GfxError::resource(format!("vkBindImageMemory: {:?}", e)).into());
        }

        match super::swapchain::create_color_view(&device.device, image, Self::FORMAT) {
            Ok(view) => target.view = view,
            Err(e) => {
                target.destroy(device);
                return Err(e);
            }
        }

        Ok(target)
    }

    pub fn destroy(&mut self, device: &VulkanDevice) {
        unsafe {
            if self.view != vk::ImageView::null() {
                device.device.destroy_image_view(self.view, None);
                self.view = vk::ImageView::null();
            }
            if self.image != vk::Image::null() {
                device.device.destroy_image(self.image, None);
                self.image = vk::Image::null();
            }
        }
        if let Some(allocation) = self.allocation.take() {
            device.free(allocation);
        }
    }
}
