// Swapchain - Window presentation
//
// Parameter negotiation is split into pure `select_*` functions working
// on the queried surface data. `Swapchain` itself only creates, acquires,
// presents and destroys. It holds no device reference: the owning view
// passes the device in and decides the destruction order.

use super::VulkanDevice;
use crate::error::GfxError;
use anyhow::{Context, Result};
use ash::vk;

/// Present modes scanned in order when the configured one is unavailable
pub const PRESENT_MODE_PREFERENCE: [vk::PresentModeKHR; 4] = [
    vk::PresentModeKHR::MAILBOX,
    vk::PresentModeKHR::FIFO_RELAXED,
    vk::PresentModeKHR::FIFO,
    vk::PresentModeKHR::IMMEDIATE,
];

/// Format requested for window-backed views
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Requested format, else the first sRGB-nonlinear one, else the first.
pub fn select_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    // A lone UNDEFINED entry means the surface takes any format.
    if let [only] = available {
        if only.format == vk::Format::UNDEFINED {
            return Some(preferred);
        }
    }

    available
        .iter()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| {
            available
                .iter()
                .find(|f| f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        })
        .or_else(|| available.first())
        .copied()
}

/// Configured mode if supported, then the preference scan, then FIFO.
pub fn select_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    std::iter::once(preferred)
        .chain(PRESENT_MODE_PREFERENCE)
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO) // FIFO is always supported
}

/// Surface-fixed extent when reported, else `requested` clamped per axis.
pub fn select_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: requested
            .width
            .max(caps.min_image_extent.width)
            .min(caps.max_image_extent.width),
        height: requested
            .height
            .max(caps.min_image_extent.height)
            .min(caps.max_image_extent.height),
    }
}

/// `clamp(requested, min + 1, max)`, with `max == 0` meaning unbounded.
pub fn select_image_count(caps: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let count = requested.max(caps.min_image_count.saturating_add(1));
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

pub fn select_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|&flag| supported.contains(flag))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Everything a swapchain build needs besides the surface
#[derive(Debug, Clone, Copy)]
pub struct SwapchainRequest {
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub preferred_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub graphics_family: u32,
    pub present_family: u32,
}

/// Outcome of acquiring the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Build a swapchain for `surface`, retiring `old` if it is not null.
    pub fn new(
        device: &VulkanDevice,
        surface: vk::SurfaceKHR,
        request: &SwapchainRequest,
        old: vk::SwapchainKHR,
    ) -> Result<Self> {
        let loader = device.swapchain_loader()?;
        let physical_device = device.physical_device();

        let caps = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)
        }
        .context("Failed to query surface capabilities")?;
        let formats = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
        }
        .context("Failed to query surface formats")?;
        let present_modes = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)
        }
        .context("Failed to query present modes")?;

        if !caps
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        {
            return Err(GfxError::resource("surface does not support color attachment usage").into());
        }

        let format = select_surface_format(&formats, request.preferred_format)
            .ok_or_else(|| GfxError::resource("surface reports no formats"))?;
        let present_mode = select_present_mode(&present_modes, request.present_mode);
        let extent = select_extent(&caps, request.extent);
        let image_count = select_image_count(&caps, request.min_image_count);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            format.format,
            present_mode
        );

        let families = [request.graphics_family, request.present_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(select_composite_alpha(caps.supported_composite_alpha))
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        create_info = if request.graphics_family != request.present_family {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let handle = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|e| GfxError::resource(format!("vkCreateSwapchainKHR: {:?}", e)))?;

        let images = match unsafe { loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(handle, None) };
                return Err(GfxError::resource(format!("vkGetSwapchainImagesKHR: {:?}", e)).into());
            }
        };

        let mut swapchain = Self {
            handle,
            images,
            image_views: Vec::new(),
            format,
            extent,
            present_mode,
        };

        for &image in &swapchain.images {
            match create_color_view(&device.device, image, format.format) {
                Ok(view) => swapchain.image_views.push(view),
                Err(e) => {
                    swapchain.destroy(device);
                    return Err(e);
                }
            }
        }

        log::info!("Created swapchain with {} images", swapchain.images.len());
        Ok(swapchain)
    }

    /// Acquire the next image, signaling `semaphore` when it is ready.
    pub fn acquire(&self, device: &VulkanDevice, semaphore: vk::Semaphore) -> Result<Acquired> {
        let loader = device.swapchain_loader()?;
        let result = unsafe {
            loader.acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(GfxError::submission(format!("vkAcquireNextImageKHR: {:?}", e)).into()),
        }
    }

    /// Present `image_index` once `wait_semaphores` signal.
    ///
    /// Returns true when the swapchain should be recreated.
    pub fn present(
        &self,
        device: &VulkanDevice,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let loader = device.swapchain_loader()?;
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GfxError::submission(format!("vkQueuePresentKHR: {:?}", e)).into()),
        }
    }

    pub fn destroy(&mut self, device: &VulkanDevice) {
        unsafe {
            for view in self.image_views.drain(..) {
                device.device.destroy_image_view(view, None);
            }
        }
        if self.handle != vk::SwapchainKHR::null() {
            if let Ok(loader) = device.swapchain_loader() {
                unsafe { loader.destroy_swapchain(self.handle, None) };
            }
            self.handle = vk::SwapchainKHR::null();
        }
        self.images.clear();
    }
}

/// 2D color view over the first mip and layer of `image`.
pub fn create_color_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }
        .map_err(|e| GfxError::resource(format!("vkCreateImageView: {:?}", e)).into())
}

#[cfg(test)]
#[path = "swapchain_tests.rs"]
mod tests;
