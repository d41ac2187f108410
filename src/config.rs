// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Explicit configuration structs for the renderer and its demo. Every
// section has sensible defaults, so a missing file or a partial file both
// work. `validate()` is run once by `Renderer::create` before any GPU work.

use crate::error::GfxError;
use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub adapter: AdapterConfig,
    pub debug: DebugConfig,
}

/// Window settings (demo binary)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "gfx-simple".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics API the backend is built on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Vulkan,
    Dx12,
    Metal,
    Auto,
}

/// Presentation modes in the order they are preferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    Mailbox,
    FifoRelaxed,
    Fifo,
    Immediate,
}

impl PresentMode {
    pub fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
            PresentMode::Fifo => vk::PresentModeKHR::FIFO,
            PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

/// Renderer settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub backend: BackendKind,
    pub app_name: String,
    /// No presentation queue is required and views render offscreen.
    pub headless: bool,
    /// Capacity of the command buffer recycler.
    pub command_buffer_count: u32,
    pub present_mode: PresentMode,
    /// Requested swapchain image count before clamping to surface limits.
    pub min_image_count: u32,
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Vulkan,
            app_name: "gfx-core".to_string(),
            headless: false,
            command_buffer_count: 16,
            present_mode: PresentMode::Mailbox,
            min_image_count: 3,
            clear_color: [0.1, 0.1, 0.12, 1.0],
        }
    }
}

/// Optional device features an adapter can be required to support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFeature {
    GeometryShader,
    FillModeNonSolid,
    SamplerAnisotropy,
    WideLines,
}

impl DeviceFeature {
    pub fn is_supported(self, features: &vk::PhysicalDeviceFeatures) -> bool {
        let flag = match self {
            DeviceFeature::GeometryShader => features.geometry_shader,
            DeviceFeature::FillModeNonSolid => features.fill_mode_non_solid,
            DeviceFeature::SamplerAnisotropy => features.sampler_anisotropy,
            DeviceFeature::WideLines => features.wide_lines,
        };
        flag == vk::TRUE
    }

    pub fn enable(self, features: &mut vk::PhysicalDeviceFeatures) {
        match self {
            DeviceFeature::GeometryShader => features.geometry_shader = vk::TRUE,
            DeviceFeature::FillModeNonSolid => features.fill_mode_non_solid = vk::TRUE,
            DeviceFeature::SamplerAnisotropy => features.sampler_anisotropy = vk::TRUE,
            DeviceFeature::WideLines => features.wide_lines = vk::TRUE,
        }
    }
}

/// Adapter requirements
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub required_features: Vec<DeviceFeature>,
    /// Device extensions beyond the swapchain extension.
    pub required_extensions: Vec<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            required_features: vec![DeviceFeature::GeometryShader],
            required_extensions: Vec::new(),
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject values that would only fail later, deep inside the backend.
    pub fn validate(&self) -> Result<(), GfxError> {
        fn invalid(field: &'static str, reason: &str) -> Result<(), GfxError> {
            Err(GfxError::InvalidConfig { field, reason: reason.to_string() })
        }

        if self.window.width == 0 || self.window.height == 0 {
            return invalid("window", "width and height must be non-zero");
        }
        if self.renderer.app_name.trim().is_empty() {
            return invalid("renderer.app_name", "must not be empty");
        }
        if self.renderer.command_buffer_count == 0 {
            return invalid("renderer.command_buffer_count", "must be at least 1");
        }
        if self.renderer.min_image_count == 0 {
            return invalid("renderer.min_image_count", "must be at least 1");
        }
        if self.renderer.clear_color.iter().any(|c| !c.is_finite()) {
            return invalid("renderer.clear_color", "components must be finite");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
