use ash::vk::Result as VulkanResult;
use thiserror::Error;

/// Errors raised by the renderer. Most GPU failures are unrecoverable without a
/// device reset, which is out of scope; callers are expected to abort the load
/// or frame in progress.
#[derive(Error, Debug)]
pub enum YarraError {
    /// A Vulkan call failed
    #[error("There was a problem with a Vulkan operation")]
    VulkanError(#[from] VulkanResult),
    /// A write or address computation went past the end of a fixed-size table
    #[error("Descriptor table capacity exceeded: index {index} >= capacity {capacity}")]
    OutOfCapacity {
        /// The fixed capacity of the table
        capacity: u32,
        /// The offending slot index
        index: u32,
    },
    /// Asset data referenced an array element that does not exist
    #[error("{kind} index {index} is out of bounds (len {len})")]
    IndexOutOfBounds {
        /// Which collaborator-supplied array was indexed
        kind: &'static str,
        /// The offending index
        index: usize,
        /// The length of the array
        len: usize,
    },
    /// A frame method was called out of sequence
    #[error("Invalid frame state: expected {expected}, found {actual}")]
    InvalidFrameState {
        /// The phase the frame must be in for the call
        expected: &'static str,
        /// The phase the frame was actually in
        actual: &'static str,
    },
    /// A buffer was used while in a state incompatible with the operation
    #[error("Invalid resource state: expected {expected:?}, found {actual:?}")]
    InvalidResourceState {
        /// The state required by the operation
        expected: crate::rendering::buffer::ResourceState,
        /// The state the buffer was actually in
        actual: crate::rendering::buffer::ResourceState,
    },
    /// The list was empty
    #[error("The list was empty")]
    EmptyListError,
    /// Mapping host-visible memory produced a null pointer
    #[error("Mapping host-visible memory returned a null pointer")]
    MemoryMapFailed,
    /// The physical device exposes no graphics-capable queue family
    #[error("The physical device has no graphics queue family")]
    NoGraphicsQueue,
    /// The data provided is not usable for this operation
    #[error("The format provided is not supported for this operation")]
    InvalidFormatError,
    /// Wrapper for IO failures
    #[error(transparent)]
    IO(#[from] std::io::Error),
    /// Wrapper for everything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn messages_name_the_failure() {
        assert_eq!(
            YarraError::MemoryMapFailed.to_string(),
            "Mapping host-visible memory returned a null pointer"
        );
        assert_eq!(
            YarraError::NoGraphicsQueue.to_string(),
            "The physical device has no graphics queue family"
        );
        let dangling = YarraError::IndexOutOfBounds {
            kind: "material",
            index: 9,
            len: 4,
        };
        assert_eq!(dangling.to_string(), "material index 9 is out of bounds (len 4)");
    }
}
