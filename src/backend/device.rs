// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layers
// - Adapter discovery and selection (see adapter.rs)
// - Logical device + one queue per unique family, resolved once per role
// - Memory allocator setup
//
// The renderer owns the only `VulkanDevice`. Everything else borrows it
// for the duration of a call and is destroyed before it.

use super::adapter::{self, AdapterDescriptor, QueueRole, SelectionCriteria};
use super::surface::NativeWindow;
use crate::config::{BackendKind, Config};
use crate::error::GfxError;
use anyhow::{Context, Result};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::ffi::{c_char, CStr, CString};
use std::mem::ManuallyDrop;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance-level objects. Dropped after the logical device.
struct InstanceContext {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Queue handle and family resolved for one role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedQueue {
    pub family: u32,
    pub queue: vk::Queue,
}

#[derive(Debug, Clone, Copy)]
struct ResolvedQueues {
    graphics: ResolvedQueue,
    transfer: ResolvedQueue,
    compute: Option<ResolvedQueue>,
    present: Option<ResolvedQueue>,
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Order matters for drop: allocator and device go before the instance.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub surface_loader: ash::khr::surface::Instance,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
    queues: ResolvedQueues,
    adapter: AdapterDescriptor,
    headless: bool,
    context: InstanceContext,
}

impl VulkanDevice {
    /// Create the instance, pick an adapter and open a logical device on it.
    ///
    /// `window` is used to choose surface extensions and to probe present
    /// support. It is required unless the configuration is headless.
    pub fn new(config: &Config, window: Option<&NativeWindow>) -> Result<Self> {
        match config.renderer.backend {
            BackendKind::Vulkan | BackendKind::Auto => {}
            other => {
                return Err(GfxError::init(format!("{:?} backend is not available in this build", other)).into())
            }
        }

        let headless = config.renderer.headless;
        let window = if headless { None } else { window };
        if !headless && window.is_none() {
            return Err(GfxError::init("a native window is required unless renderer.headless is set").into());
        }

        log::info!("Creating Vulkan device: {}", config.renderer.app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .map_err(|e| GfxError::init(format!("failed to load the Vulkan library: {}", e)))?;

        // Step 2: Create instance (+ debug messenger)
        let validation = config.debug.validation_layers;
        let context = Self::create_instance(entry, &config.renderer.app_name, validation, window)?;
        let surface_loader = ash::khr::surface::Instance::new(&context.entry, &context.instance);

        // Step 3: Pick physical device, probing present support on a throwaway surface
        let probe = match window {
            Some(w) => Some(
                unsafe { w.create_surface(&context.entry, &context.instance) }
                    .map_err(|e| GfxError::init(format!("failed to create probe surface: {:?}", e)))?,
            ),
            None => None,
        };
        let selected = Self::pick_adapter(config, &context.instance, &surface_loader, probe, headless);
        if let Some(surface) = probe {
            unsafe { surface_loader.destroy_surface(surface, None) };
        }
        let adapter = selected?;

        log::info!("Selected GPU: {} ({:?})", adapter.name, adapter.device_type);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(adapter.api_version),
            vk::api_version_minor(adapter.api_version),
            vk::api_version_patch(adapter.api_version)
        );

        // Step 4: Create logical device
        let device = Self::create_logical_device(config, &context.instance, &adapter, headless)?;

        // Step 5: Resolve every role's queue exactly once
        let queues = Self::resolve_queues(&device, &adapter, headless);

        // Step 6: Create memory allocator
        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: context.instance.clone(),
            device: device.clone(),
            physical_device: adapter.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(GfxError::init(format!("failed to create memory allocator: {}", e)).into());
            }
        };

        let swapchain_loader =
            (!headless).then(|| ash::khr::swapchain::Device::new(&context.instance, &device));

        Ok(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            surface_loader,
            swapchain_loader,
            queues,
            adapter,
            headless,
            context,
        })
    }

    fn create_instance(
        entry: Entry,
        app_name: &str,
        enable_validation: bool,
        window: Option<&NativeWindow>,
    ) -> Result<InstanceContext> {
        let app_name_cstr = CString::new(app_name).context("app_name contains a NUL byte")?;
        let engine_name = c"gfx-core";

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        // Platform-specific surface extensions
        let mut extensions: Vec<*const c_char> = match window {
            Some(w) => w.required_extensions()?.to_vec(),
            None => Vec::new(),
        };

        // Validation layers
        let layer_names = if enable_validation {
            let available = unsafe { entry.enumerate_instance_layer_properties() }
                .context("Failed to enumerate instance layers")?;
            let found = available
                .iter()
                .any(|layer| layer.layer_name_as_c_str().map_or(false, |name| name == VALIDATION_LAYER));
            if !found {
                return Err(GfxError::init("validation requested but VK_LAYER_KHRONOS_validation is not installed").into());
            }
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| GfxError::init(format!("vkCreateInstance: {:?}", e)))?;

        let mut context = InstanceContext {
            entry,
            instance,
            debug_utils: None,
        };

        if enable_validation {
            context.debug_utils = Some(Self::setup_debug_messenger(&context.entry, &context.instance)?);
        }

        Ok(context)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_adapter(
        config: &Config,
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        probe: Option<vk::SurfaceKHR>,
        headless: bool,
    ) -> Result<AdapterDescriptor> {
        let candidates = adapter::enumerate_adapters(instance, probe.map(|s| (surface_loader, s)))?;

        let mut criteria = SelectionCriteria {
            required_features: config.adapter.required_features.clone(),
            required_extensions: config.adapter.required_extensions.clone(),
            required_roles: vec![QueueRole::Graphics, QueueRole::Transfer],
        };
        if !headless {
            criteria
                .required_extensions
                .push(ash::khr::swapchain::NAME.to_string_lossy().into_owned());
            criteria.required_roles.push(QueueRole::Present);
        }

        Ok(adapter::select_adapter(candidates, &criteria)?)
    }

    fn create_logical_device(
        config: &Config,
        instance: &ash::Instance,
        adapter: &AdapterDescriptor,
        headless: bool,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let mut families = vec![adapter.queues.graphics, adapter.queues.transfer, adapter.queues.compute];
        if !headless {
            families.push(adapter.queues.present);
        }
        let mut families: Vec<u32> = families.into_iter().flatten().collect();
        families.sort_unstable();
        families.dedup();

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        // Required device extensions
        let extra: Vec<CString> = config
            .adapter
            .required_extensions
            .iter()
            .map(|name| CString::new(name.as_str()))
            .collect::<Result<_, _>>()
            .context("extension name contains a NUL byte")?;
        let mut extensions: Vec<*const c_char> = extra.iter().map(|e| e.as_ptr()).collect();
        if !headless {
            extensions.push(ash::khr::swapchain::NAME.as_ptr());
        }

        let mut features = vk::PhysicalDeviceFeatures::default();
        for feature in &config.adapter.required_features {
            feature.enable(&mut features);
        }

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(adapter.physical_device, &create_info, None) }
            .map_err(|e| GfxError::init(format!("vkCreateDevice: {:?}", e)))?;

        log::debug!("Logical device created with queue families {:?}", families);
        Ok(device)
    }

    fn resolve_queues(device: &ash::Device, adapter: &AdapterDescriptor, headless: bool) -> ResolvedQueues {
        let resolve = |family: u32| ResolvedQueue {
            family,
            queue: unsafe { device.get_device_queue(family, 0) },
        };

        // Selection guarantees graphics and transfer families exist.
        let graphics_family = adapter.queues.graphics.unwrap_or(0);
        let graphics = resolve(graphics_family);
        let transfer = adapter
            .queues
            .transfer
            .map(resolve)
            .unwrap_or(graphics);
        let compute = adapter.queues.compute.map(resolve);
        let present = if headless { None } else { adapter.queues.present.map(resolve) };

        ResolvedQueues { graphics, transfer, compute, present }
    }

    pub fn queue(&self, role: QueueRole) -> Option<ResolvedQueue> {
        match role {
            QueueRole::Graphics => Some(self.queues.graphics),
            QueueRole::Transfer => Some(self.queues.transfer),
            QueueRole::Compute => self.queues.compute,
            QueueRole::Present => self.queues.present,
        }
    }

    pub fn graphics_queue(&self) -> ResolvedQueue {
        self.queues.graphics
    }

    pub fn transfer_queue(&self) -> ResolvedQueue {
        self.queues.transfer
    }

    pub fn present_queue(&self) -> Option<ResolvedQueue> {
        self.queues.present
    }

    pub fn adapter(&self) -> &AdapterDescriptor {
        &self.adapter
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.adapter.physical_device
    }

    pub fn is_headless(&self) -> bool {
        self.headless
    }

    pub fn swapchain_loader(&self) -> Result<&ash::khr::swapchain::Device> {
        self.swapchain_loader
            .as_ref()
            .ok_or_else(|| GfxError::lifecycle("swapchain use on a headless device").into())
    }

    /// Create a presentation surface for `window`.
    pub fn create_surface(&self, window: &NativeWindow) -> Result<vk::SurfaceKHR> {
        if self.headless {
            return Err(GfxError::resource("cannot create a surface on a headless device").into());
        }
        let surface = unsafe { window.create_surface(&self.context.entry, &self.context.instance) }
            .map_err(|e| GfxError::resource(format!("failed to create surface: {:?}", e)))?;

        let present = self.queues.present.map_or(false, |q| unsafe {
            self.surface_loader
                .get_physical_device_surface_support(self.adapter.physical_device, q.family, surface)
                .unwrap_or(false)
        });
        if !present {
            self.destroy_surface(surface);
            return Err(GfxError::resource("present queue family cannot present to this surface").into());
        }
        Ok(surface)
    }

    pub fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        unsafe { self.surface_loader.destroy_surface(surface, None) };
    }

    pub fn allocate(&self, desc: &AllocationCreateDesc<'_>) -> Result<Allocation> {
        self.allocator
            .lock()
            .allocate(desc)
            .map_err(|e| GfxError::resource(format!("allocation '{}' failed: {}", desc.name, e)).into())
    }

    pub fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::warn!("Failed to free allocation: {}", e);
        }
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| GfxError::submission(format!("vkDeviceWaitIdle: {:?}", e)))?;
        Ok(())
    }

    pub fn queue_wait_idle(&self, queue: vk::Queue) -> Result<()> {
        unsafe { self.device.queue_wait_idle(queue) }
            .map_err(|e| GfxError::submission(format!("vkQueueWaitIdle: {:?}", e)))?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        if let Err(e) = self.wait_idle() {
            log::warn!("Device not idle at teardown: {:#}", e);
        }

        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        // `context` drops next: messenger, then instance.
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let message = (*p_callback_data)
        .message_as_c_str()
        .map(|m| m.to_string_lossy())
        .unwrap_or_default();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message);
        }
        _ => {
            log::debug!("[Vulkan] {}", message);
        }
    }

    vk::FALSE
}
