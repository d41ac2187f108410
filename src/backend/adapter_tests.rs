//! Unit tests for adapter scoring, queue discovery and selection
//!
//! Descriptors are built by hand, no GPU is needed.

use super::*;

fn family(flags: vk::QueueFlags, present: bool) -> QueueFamilyInfo {
    QueueFamilyInfo { flags, queue_count: 1, present }
}

fn features_with_geometry() -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures { geometry_shader: vk::TRUE, ..Default::default() }
}

fn adapter(name: &str, device_type: vk::PhysicalDeviceType, max_dim: u32) -> AdapterDescriptor {
    let queue_families = vec![family(
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        true,
    )];
    AdapterDescriptor {
        physical_device: vk::PhysicalDevice::null(),
        name: name.to_string(),
        device_type,
        api_version: vk::API_VERSION_1_3,
        features: features_with_geometry(),
        max_image_dimension_2d: max_dim,
        queues: QueueFamilyIndices::discover(&queue_families),
        queue_families,
        extensions: ["VK_KHR_swapchain".to_string()].into_iter().collect(),
        memory_heaps: vec![MemoryHeapInfo { size: 1 << 30, device_local: true }],
    }
}

fn windowed_criteria() -> SelectionCriteria {
    SelectionCriteria {
        required_features: vec![DeviceFeature::GeometryShader],
        required_extensions: vec!["VK_KHR_swapchain".to_string()],
        required_roles: vec![QueueRole::Graphics, QueueRole::Present, QueueRole::Transfer],
    }
}

// ============================================================================
// SCORING
// ============================================================================

#[test]
fn test_discrete_bonus_is_added_to_image_dimension() {
    let discrete = adapter("d", vk::PhysicalDeviceType::DISCRETE_GPU, 16384);
    let integrated = adapter("i", vk::PhysicalDeviceType::INTEGRATED_GPU, 16384);

    assert_eq!(score_adapter(&discrete, &[]), (1u64 << 32) + 16384);
    assert_eq!(score_adapter(&integrated, &[]), 16384);
}

#[test]
fn test_smallest_discrete_outscores_largest_integrated() {
    let discrete = adapter("d", vk::PhysicalDeviceType::DISCRETE_GPU, 1);
    let integrated = adapter("i", vk::PhysicalDeviceType::INTEGRATED_GPU, u32::MAX);

    assert!(score_adapter(&discrete, &[]) > score_adapter(&integrated, &[]));
}

#[test]
fn test_missing_required_feature_scores_zero() {
    let mut gpu = adapter("no-gs", vk::PhysicalDeviceType::DISCRETE_GPU, 16384);
    gpu.features.geometry_shader = vk::FALSE;

    assert_eq!(score_adapter(&gpu, &[DeviceFeature::GeometryShader]), 0);
    assert!(score_adapter(&gpu, &[]) > 0);
}

// ============================================================================
// SELECTION
// ============================================================================

#[test]
fn test_discrete_wins_over_larger_integrated() {
    let candidates = vec![
        adapter("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU, 16384),
        adapter("discrete", vk::PhysicalDeviceType::DISCRETE_GPU, 8192),
    ];

    let chosen = select_adapter(candidates, &windowed_criteria()).unwrap();

    assert_eq!(chosen.name, "discrete");
}

#[test]
fn test_ties_resolve_to_first_enumerated() {
    let candidates = vec![
        adapter("first", vk::PhysicalDeviceType::DISCRETE_GPU, 8192),
        adapter("second", vk::PhysicalDeviceType::DISCRETE_GPU, 8192),
    ];

    let chosen = select_adapter(candidates, &windowed_criteria()).unwrap();

    assert_eq!(chosen.name, "first");
}

#[test]
fn test_adapter_missing_extension_is_never_selected() {
    let mut best = adapter("best-but-no-swapchain", vk::PhysicalDeviceType::DISCRETE_GPU, 32768);
    best.extensions.clear();
    let fallback = adapter("fallback", vk::PhysicalDeviceType::INTEGRATED_GPU, 4096);

    let chosen = select_adapter(vec![best, fallback], &windowed_criteria()).unwrap();

    assert_eq!(chosen.name, "fallback");
}

#[test]
fn test_adapter_missing_queue_role_is_never_selected() {
    let mut no_present = adapter("no-present", vk::PhysicalDeviceType::DISCRETE_GPU, 32768);
    no_present.queue_families[0].present = false;
    no_present.queues = QueueFamilyIndices::discover(&no_present.queue_families);

    let result = select_adapter(vec![no_present.clone()], &windowed_criteria());
    assert!(matches!(result, Err(GfxError::Initialization(_))));

    let headless = SelectionCriteria {
        required_roles: vec![QueueRole::Graphics, QueueRole::Transfer],
        ..windowed_criteria()
    };
    assert!(select_adapter(vec![no_present], &headless).is_ok());
}

#[test]
fn test_discrete_and_integrated_pairs_across_real_limits() {
    for integrated_dim in [4096, 8192, 16384, 32768] {
        for discrete_dim in [4096, 8192, 16384, 32768] {
            let candidates = vec![
                adapter("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU, integrated_dim),
                adapter("discrete", vk::PhysicalDeviceType::DISCRETE_GPU, discrete_dim),
            ];

            let chosen = select_adapter(candidates, &windowed_criteria()).unwrap();

            assert_eq!(chosen.name, "discrete", "{} vs {}", integrated_dim, discrete_dim);
        }
    }
}

#[test]
fn test_adapter_that_failed_to_describe_is_skipped() {
    let results = vec![
        Err(anyhow::anyhow!("extension query failed")),
        Ok(adapter("readable", vk::PhysicalDeviceType::INTEGRATED_GPU, 8192)),
    ];

    let described = keep_described(results);

    assert_eq!(described.len(), 1);
    assert_eq!(described[0].name, "readable");
    assert!(select_adapter(described, &windowed_criteria()).is_ok());
}

#[test]
fn test_no_candidates_is_initialization_failure() {
    let result = select_adapter(Vec::new(), &windowed_criteria());
    assert!(matches!(result, Err(GfxError::Initialization(_))));
}

#[test]
fn test_rejection_reason_names_the_gap() {
    let mut gpu = adapter("x", vk::PhysicalDeviceType::DISCRETE_GPU, 1);
    gpu.features = vk::PhysicalDeviceFeatures::default();

    let reason = rejection_reason(&gpu, &windowed_criteria()).unwrap();
    assert!(reason.contains("GeometryShader"));
}

// ============================================================================
// QUEUE DISCOVERY
// ============================================================================

#[test]
fn test_dedicated_transfer_and_compute_families_are_preferred() {
    let families = [
        family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, true),
        family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, false),
        family(vk::QueueFlags::TRANSFER, false),
    ];

    let q = QueueFamilyIndices::discover(&families);

    assert_eq!(q.graphics, Some(0));
    assert_eq!(q.present, Some(0));
    assert_eq!(q.compute, Some(1));
    assert_eq!(q.transfer, Some(2));
    assert_eq!(q.unique_families(), vec![0, 1, 2]);
}

#[test]
fn test_transfer_falls_back_to_graphics() {
    let families = [family(vk::QueueFlags::GRAPHICS, false)];

    let q = QueueFamilyIndices::discover(&families);

    assert_eq!(q.transfer, Some(0));
    assert_eq!(q.present, None);
    assert_eq!(q.compute, None);
}

#[test]
fn test_transfer_falls_back_to_compute_without_graphics() {
    let families = [family(vk::QueueFlags::COMPUTE, false)];

    let q = QueueFamilyIndices::discover(&families);

    assert_eq!(q.graphics, None);
    assert_eq!(q.compute, Some(0));
    assert_eq!(q.transfer, Some(0));
}

#[test]
fn test_present_prefers_graphics_family() {
    let families = [
        family(vk::QueueFlags::TRANSFER, true),
        family(vk::QueueFlags::GRAPHICS, true),
    ];

    assert_eq!(QueueFamilyIndices::discover(&families).present, Some(1));
}

#[test]
fn test_present_uses_separate_family_when_graphics_cannot() {
    let families = [
        family(vk::QueueFlags::GRAPHICS, false),
        family(vk::QueueFlags::TRANSFER, true),
    ];

    let q = QueueFamilyIndices::discover(&families);

    assert_eq!(q.present, Some(1));
    assert_eq!(q.get(QueueRole::Present), Some(1));
}
