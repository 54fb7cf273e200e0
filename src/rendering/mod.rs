/// GPU buffers with explicit resource-state tracking
pub mod buffer;

/// Descriptor tables: fixed-capacity texture arrays and buffer address tables
pub mod descriptors;

/// The CPU/GPU synchronisation fence
pub mod fence;

/// Frame-in-flight state and the recording state machine
pub mod frame;

/// Geometry buffer registry and vertex/index stream views
pub mod geometry;

/// A wrapper around an image
pub mod image;

/// Material records and the material table
pub mod material;

/// Functionality for interacting with GPU memory
pub mod memory;

/// Drawable primitives and texture-slot resolution
pub mod primitive;

/// Shared data for a scene
pub mod scene_data;

/// The depth-only shadow render target
pub mod shadow_map;

/// Render targets handed in by the caller
pub mod swapchain;

/// Texture decode, upload and the texture table
pub mod texture;

/// Staging-buffer uploads into device-local memory
pub mod upload;
