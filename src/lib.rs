// gfx-core - GPU resource and command lifecycle on Vulkan
//
// Adapter selection, a logical device with resolved queue roles, a
// fence-guarded command buffer recycler, u16 handle registries and the
// per-view acquire/record/submit/present loop, behind the `Renderer`
// facade.

pub mod backend;
pub mod config;
pub mod error;
pub mod handle;
pub mod registry;
pub mod renderer;
pub mod vertex;

pub use backend::NativeWindow;
pub use config::Config;
pub use error::GfxError;
pub use handle::{BufferHandle, FramebufferHandle, Handle, HandleAllocator, ProgramHandle, ShaderHandle};
pub use registry::Registry;
pub use renderer::{FrameStats, FramebufferCreateInfo, Renderer};
pub use vertex::{AttributeType, VertexLayout};
