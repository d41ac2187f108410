//! Unit tests for configuration parsing and validation

use super::*;

// ============================================================================
// PARSING
// ============================================================================

#[test]
fn test_empty_file_gives_defaults() {
    let config = Config::from_toml("").unwrap();

    assert_eq!(config.renderer.backend, BackendKind::Vulkan);
    assert_eq!(config.renderer.command_buffer_count, 16);
    assert_eq!(config.renderer.present_mode, PresentMode::Mailbox);
    assert_eq!(config.adapter.required_features, vec![DeviceFeature::GeometryShader]);
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_sections_keep_other_defaults() {
    let config = Config::from_toml(
        r#"
        [renderer]
        headless = true
        present_mode = "fifo_relaxed"

        [adapter]
        required_features = ["fill_mode_non_solid", "wide_lines"]
        required_extensions = ["VK_KHR_maintenance1"]
        "#,
    )
    .unwrap();

    assert!(config.renderer.headless);
    assert_eq!(config.renderer.present_mode, PresentMode::FifoRelaxed);
    assert_eq!(config.renderer.min_image_count, 3);
    assert_eq!(
        config.adapter.required_features,
        vec![DeviceFeature::FillModeNonSolid, DeviceFeature::WideLines]
    );
    assert_eq!(config.adapter.required_extensions, vec!["VK_KHR_maintenance1"]);
    assert_eq!(config.window.width, 1280);
}

#[test]
fn test_unknown_names_fail_to_parse() {
    assert!(Config::from_toml("[renderer]\nbackend = \"opengl\"").is_err());
    assert!(Config::from_toml("[renderer]\npresent_mode = \"vsync\"").is_err());
    assert!(Config::from_toml("[adapter]\nrequired_features = [\"tessellation\"]").is_err());
}

#[test]
fn test_missing_file_gives_defaults() {
    let config = Config::load_from_path("definitely/not/here.toml").unwrap();
    assert_eq!(config.renderer.app_name, "gfx-core");
}

#[test]
fn test_present_mode_mapping() {
    assert_eq!(PresentMode::Mailbox.to_vk(), vk::PresentModeKHR::MAILBOX);
    assert_eq!(PresentMode::FifoRelaxed.to_vk(), vk::PresentModeKHR::FIFO_RELAXED);
    assert_eq!(PresentMode::Fifo.to_vk(), vk::PresentModeKHR::FIFO);
    assert_eq!(PresentMode::Immediate.to_vk(), vk::PresentModeKHR::IMMEDIATE);
}

// ============================================================================
// VALIDATION
// ============================================================================

fn field_of(config: &Config) -> &'static str {
    match config.validate() {
        Err(GfxError::InvalidConfig { field, .. }) => field,
        other => panic!("expected InvalidConfig, got {:?}", other),
    }
}

#[test]
fn test_zero_command_buffers_rejected() {
    let mut config = Config::default();
    config.renderer.command_buffer_count = 0;
    assert_eq!(field_of(&config), "renderer.command_buffer_count");
}

#[test]
fn test_zero_window_extent_rejected() {
    let mut config = Config::default();
    config.window.height = 0;
    assert_eq!(field_of(&config), "window");
}

#[test]
fn test_zero_image_count_rejected() {
    let mut config = Config::default();
    config.renderer.min_image_count = 0;
    assert_eq!(field_of(&config), "renderer.min_image_count");
}

#[test]
fn test_blank_app_name_rejected() {
    let mut config = Config::default();
    config.renderer.app_name = "   ".to_string();
    assert_eq!(field_of(&config), "renderer.app_name");
}

#[test]
fn test_non_finite_clear_color_rejected() {
    let mut config = Config::default();
    config.renderer.clear_color[2] = f32::NAN;
    assert_eq!(field_of(&config), "renderer.clear_color");
}

// ============================================================================
// FEATURES
// ============================================================================

#[test]
fn test_feature_enable_then_supported() {
    let mut features = vk::PhysicalDeviceFeatures::default();
    assert!(!DeviceFeature::GeometryShader.is_supported(&features));

    DeviceFeature::GeometryShader.enable(&mut features);

    assert!(DeviceFeature::GeometryShader.is_supported(&features));
    assert!(!DeviceFeature::WideLines.is_supported(&features));
}
