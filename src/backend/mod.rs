// Backend module - Vulkan abstraction layer
//
// Design: thin wrappers around ash, each owning its handles explicitly.
// The device is borrowed into every call; nothing here keeps a reference
// to it. Command submission and recording go through traits so the frame
// and recycling logic can run against a mock.

pub mod adapter;
pub mod buffer;
pub mod command;
pub mod device;
pub mod pipeline;
pub mod record;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod view;

#[cfg(test)]
pub(crate) mod mock;

pub use adapter::{AdapterDescriptor, QueueRole};
pub use command::{CommandDevice, CommandRecycler};
pub use device::VulkanDevice;
pub use record::{CommandRecorder, DrawCall};
pub use surface::NativeWindow;
pub use swapchain::Swapchain;
pub use view::{View, ViewState};
