// Shader module loading
//
// Accepts already-compiled SPIR-V bytes. `read_spv` takes care of word
// alignment and endianness and rejects data that is not SPIR-V.

use crate::error::GfxError;
use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;

pub fn create_shader_module(device: &ash::Device, bytecode: &[u8]) -> Result<vk::ShaderModule> {
    if bytecode.is_empty() {
        return Err(GfxError::resource("empty shader bytecode").into());
    }

    let words = ash::util::read_spv(&mut Cursor::new(bytecode))
        .map_err(|e| GfxError::resource(format!("invalid SPIR-V: {}", e)))?;

    let create_info = vk::ShaderModuleCreateInfo::default().code(&words);

    unsafe { device.create_shader_module(&create_info, None) }
        .map_err(|e| GfxError::resource(format!("vkCreateShaderModule: {:?}", e)))
        .context("Failed to create shader module")
}
