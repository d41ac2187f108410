// Adapter selection
//
// Every physical device is captured once as a plain `AdapterDescriptor`.
// Scoring and selection then work on that data alone, so they can be
// exercised without a GPU.
//
// Score: max 2D image dimension, plus a discrete bonus above any u32 so a
// discrete GPU always outranks an integrated one. 0 (disqualified) when a
// required feature is missing.

use crate::config::DeviceFeature;
use crate::error::GfxError;
use anyhow::{Context, Result};
use ash::vk;
use std::collections::BTreeSet;

const DISCRETE_BONUS: u64 = 1 << 32;

/// Role a queue family is negotiated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Present,
    Compute,
    Transfer,
}

/// One entry of an adapter's queue family table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    /// Can present to the probe surface. Always false without one.
    pub present: bool,
}

/// Family index per role, `None` when the adapter has no such family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn get(&self, role: QueueRole) -> Option<u32> {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Present => self.present,
            QueueRole::Compute => self.compute,
            QueueRole::Transfer => self.transfer,
        }
    }

    /// Distinct family indices in use, ascending.
    pub fn unique_families(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = [self.graphics, self.present, self.compute, self.transfer]
            .into_iter()
            .flatten()
            .collect();
        set.into_iter().collect()
    }

    /// Resolve each role from a queue family table.
    pub fn discover(families: &[QueueFamilyInfo]) -> Self {
        let graphics = first_family(families, |f| f.flags.contains(vk::QueueFlags::GRAPHICS));

        let compute = first_family(families, |f| {
            f.flags.contains(vk::QueueFlags::COMPUTE) && !f.flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .or_else(|| first_family(families, |f| f.flags.contains(vk::QueueFlags::COMPUTE)));

        // Graphics and compute families accept transfer work even when the
        // TRANSFER bit is not reported.
        let transfer = first_family(families, |f| {
            f.flags.contains(vk::QueueFlags::TRANSFER)
                && !f.flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .or_else(|| first_family(families, |f| f.flags.contains(vk::QueueFlags::TRANSFER)))
        .or(graphics)
        .or(compute);

        let present = graphics
            .filter(|&g| families[g as usize].present)
            .or_else(|| first_family(families, |f| f.present));

        Self { graphics, present, compute, transfer }
    }
}

fn first_family(families: &[QueueFamilyInfo], pred: impl Fn(&QueueFamilyInfo) -> bool) -> Option<u32> {
    families.iter().position(pred).map(|i| i as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHeapInfo {
    pub size: vk::DeviceSize,
    pub device_local: bool,
}

/// Immutable snapshot of one physical device
#[derive(Debug, Clone)]
pub struct AdapterDescriptor {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub features: vk::PhysicalDeviceFeatures,
    pub max_image_dimension_2d: u32,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub queues: QueueFamilyIndices,
    pub extensions: BTreeSet<String>,
    pub memory_heaps: Vec<MemoryHeapInfo>,
}

impl AdapterDescriptor {
    pub fn is_discrete(&self) -> bool {
        self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    pub fn supports_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    pub fn device_local_memory(&self) -> vk::DeviceSize {
        self.memory_heaps
            .iter()
            .filter(|h| h.device_local)
            .map(|h| h.size)
            .sum()
    }
}

/// What an adapter must provide to be eligible
#[derive(Debug, Clone, Default)]
pub struct SelectionCriteria {
    pub required_features: Vec<DeviceFeature>,
    pub required_extensions: Vec<String>,
    pub required_roles: Vec<QueueRole>,
}

/// Capability score of an adapter, 0 when a required feature is absent.
pub fn score_adapter(adapter: &AdapterDescriptor, required_features: &[DeviceFeature]) -> u64 {
    if required_features.iter().any(|f| !f.is_supported(&adapter.features)) {
        return 0;
    }

    let mut score = u64::from(adapter.max_image_dimension_2d);
    if adapter.is_discrete() {
        score += DISCRETE_BONUS;
    }
    score
}

/// Why an adapter was not eligible, if it was not.
pub fn rejection_reason(adapter: &AdapterDescriptor, criteria: &SelectionCriteria) -> Option<String> {
    if let Some(ext) = criteria
        .required_extensions
        .iter()
        .find(|ext| !adapter.supports_extension(ext))
    {
        return Some(format!("missing extension {}", ext));
    }
    if let Some(role) = criteria
        .required_roles
        .iter()
        .find(|role| adapter.queues.get(**role).is_none())
    {
        return Some(format!("no {:?} queue family", role));
    }
    if let Some(feature) = criteria
        .required_features
        .iter()
        .find(|f| !f.is_supported(&adapter.features))
    {
        return Some(format!("missing feature {:?}", feature));
    }
    None
}

/// Pick the highest-scoring eligible adapter. Ties go to the first enumerated.
pub fn select_adapter(
    candidates: Vec<AdapterDescriptor>,
    criteria: &SelectionCriteria,
) -> Result<AdapterDescriptor, GfxError> {
    let mut best: Option<(u64, AdapterDescriptor)> = None;

    for adapter in candidates {
        if let Some(reason) = rejection_reason(&adapter, criteria) {
            log::info!("Skipping adapter '{}': {}", adapter.name, reason);
            continue;
        }

        let score = score_adapter(&adapter, &criteria.required_features);
        log::debug!("Adapter '{}' ({:?}) scored {}", adapter.name, adapter.device_type, score);

        if score == 0 {
            continue;
        }
        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((score, adapter));
        }
    }

    best.map(|(_, adapter)| adapter)
        .ok_or_else(|| GfxError::init("no adapter satisfies the required features, extensions and queue roles"))
}

/// Capture a descriptor for every physical device.
///
/// Present support is probed against `surface` when one is given.
pub fn enumerate_adapters(
    instance: &ash::Instance,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> Result<Vec<AdapterDescriptor>> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    if devices.is_empty() {
        return Err(GfxError::init("no Vulkan-capable GPU found").into());
    }

    let described = keep_described(devices.into_iter().map(|pd| describe_adapter(instance, pd, surface)));
    if described.is_empty() {
        return Err(GfxError::init("no physical device could be queried").into());
    }
    Ok(described)
}

/// Drop adapters whose capabilities could not be read, logging each.
pub fn keep_described(results: impl IntoIterator<Item = Result<AdapterDescriptor>>) -> Vec<AdapterDescriptor> {
    results
        .into_iter()
        .filter_map(|result| match result {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                log::warn!("Skipping adapter: {:#}", e);
                None
            }
        })
        .collect()
}

fn describe_adapter(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> Result<AdapterDescriptor> {
    let props = unsafe { instance.get_physical_device_properties(physical_device) };
    let features = unsafe { instance.get_physical_device_features(physical_device) };
    let memory = unsafe { instance.get_physical_device_memory_properties(physical_device) };
    let family_props =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let name = props
        .device_name_as_c_str()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".to_string());

    let queue_families: Vec<QueueFamilyInfo> = family_props
        .iter()
        .enumerate()
        .map(|(index, family)| {
            let present = surface.map_or(false, |(loader, surface)| unsafe {
                loader
                    .get_physical_device_surface_support(physical_device, index as u32, surface)
                    .unwrap_or(false)
            });
            QueueFamilyInfo {
                flags: family.queue_flags,
                queue_count: family.queue_count,
                present,
            }
        })
        .collect();

    let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .with_context(|| format!("Failed to query extensions of '{}'", name))?
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .map(|s| s.to_string_lossy().into_owned())
        .collect();

    let memory_heaps = memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .map(|heap| MemoryHeapInfo {
            size: heap.size,
            device_local: heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL),
        })
        .collect();

    let queues = QueueFamilyIndices::discover(&queue_families);

    Ok(AdapterDescriptor {
        physical_device,
        name,
        device_type: props.device_type,
        api_version: props.api_version,
        features,
        max_image_dimension_2d: props.limits.max_image_dimension2_d,
        queue_families,
        queues,
        extensions,
        memory_heaps,
    })
}

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;
