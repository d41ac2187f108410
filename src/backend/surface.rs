// Native window handles
//
// The platform layer hands the renderer raw display/window handles, which
// pass through untouched to `ash_window` for surface creation.

use crate::error::GfxError;
use anyhow::Result;
use ash::prelude::VkResult;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::c_char;

/// Opaque platform window a view can present to.
///
/// The window must outlive every view created from it.
#[derive(Debug, Clone, Copy)]
pub struct NativeWindow {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

impl NativeWindow {
    pub fn from_window<W: HasDisplayHandle + HasWindowHandle + ?Sized>(window: &W) -> Result<Self> {
        let display = window
            .display_handle()
            .map_err(|e| GfxError::init(format!("display handle unavailable: {}", e)))?
            .as_raw();
        let window = window
            .window_handle()
            .map_err(|e| GfxError::init(format!("window handle unavailable: {}", e)))?
            .as_raw();
        Ok(Self { display, window })
    }

    /// Instance extensions needed to create surfaces on this display.
    pub fn required_extensions(&self) -> Result<&'static [*const c_char]> {
        ash_window::enumerate_required_extensions(self.display)
            .map_err(|e| GfxError::init(format!("unsupported windowing platform: {:?}", e)).into())
    }

    /// # Safety
    /// The window behind the handles must still be alive.
    pub unsafe fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> VkResult<vk::SurfaceKHR> {
        ash_window::create_surface(entry, instance, self.display, self.window, None)
    }
}
