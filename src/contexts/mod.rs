#![allow(missing_docs)]
pub mod render_context;
pub mod vulkan_context;

pub use render_context::RenderContext;
pub use vulkan_context::VulkanContext;
