#![deny(missing_docs)]
#![allow(clippy::missing_safety_doc)]

//! Yarra is a small scene renderer built directly on Vulkan. It loads a glTF
//! binary (GLB), uploads its geometry, materials and textures into GPU-resident
//! buffers, and renders a shadow pass followed by a blended forward pass, with
//! all CPU/GPU hand-off serialised through a single timeline fence.
//!
//! The crate deliberately stops at the renderer's edge: windowing, input and
//! swapchain presentation belong to the caller, which hands in images to draw
//! into and derived camera state each frame.

pub use ash::vk;

pub use contexts::{RenderContext, VulkanContext};
pub use yarra_error::YarraError;

/// A tool to import GLB models into Yarra
pub mod asset_importer;
/// Wrappers around external state the renderer interacts with
pub mod contexts;
/// GPU-facing resource management: buffers, descriptors, frames and passes
pub mod rendering;
mod yarra_error;

/// Yarra result type
pub type Result<T> = std::result::Result<T, YarraError>;

/// Format used for the colour render targets
pub const COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
/// Format used for depth attachments
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
/// Format used for sampled textures
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Side length of the (square) shadow map
pub const SHADOW_MAP_SIZE: u32 = 1024;
