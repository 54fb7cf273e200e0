use crate::{contexts::VulkanContext, Result, YarraError};
use ash::vk;

/// Where a frame is in its lifecycle. The only legal cycle is
/// Idle -> Recording -> Submitted -> Idle; anything else is a programming
/// error surfaced as [`YarraError::InvalidFrameState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Not recording and with no work in flight
    Idle,
    /// Commands are being recorded into the frame's command buffer
    Recording,
    /// Submitted; the frame's resources are owned by the GPU until its fence
    /// target is reached
    Submitted,
}

impl FramePhase {
    fn name(self) -> &'static str {
        match self {
            FramePhase::Idle => "Idle",
            FramePhase::Recording => "Recording",
            FramePhase::Submitted => "Submitted",
        }
    }
}

/// One frame's recording state: its own command pool and buffer, the fence
/// value its last submission will signal, and its lifecycle phase. The pool
/// is reset at the top of each recording, which is only legal because the
/// phase machine proves the previous submission has retired.
pub struct Frame {
    /// The frame's command pool
    pub command_pool: vk::CommandPool,
    /// The frame's command buffer
    pub command_buffer: vk::CommandBuffer,
    /// The fence value the frame's last submission signals
    pub fence_target: u64,
    phase: FramePhase,
}

impl Frame {
    /// Create an idle frame with its own pool and primary command buffer.
    pub fn new(vulkan_context: &VulkanContext) -> Result<Self> {
        let device = &vulkan_context.device;
        let command_pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::builder()
                    .queue_family_index(vulkan_context.queue_family_index),
                None,
            )
        }?;
        let command_buffer = unsafe {
            device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
        }?[0];

        Ok(Self {
            command_pool,
            command_buffer,
            fence_target: 0,
            phase: FramePhase::Idle,
        })
    }

    /// The frame's current phase.
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Move Idle -> Recording.
    pub fn begin_recording(&mut self) -> Result<()> {
        self.advance(FramePhase::Idle, FramePhase::Recording)
    }

    /// Move Recording -> Submitted, remembering the fence value the
    /// submission signals.
    pub fn mark_submitted(&mut self, fence_target: u64) -> Result<()> {
        self.advance(FramePhase::Recording, FramePhase::Submitted)?;
        self.fence_target = fence_target;
        Ok(())
    }

    /// Move Submitted -> Idle. Only call once the fence has passed
    /// [`Frame::fence_target`].
    pub fn retire(&mut self) -> Result<()> {
        self.advance(FramePhase::Submitted, FramePhase::Idle)
    }

    fn advance(&mut self, expected: FramePhase, next: FramePhase) -> Result<()> {
        if self.phase != expected {
            return Err(YarraError::InvalidFrameState {
                expected: expected.name(),
                actual: self.phase.name(),
            });
        }
        self.phase = next;
        Ok(())
    }

    /// safety: the frame must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_command_pool(self.command_pool, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_frame() -> Frame {
        Frame {
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            fence_target: 0,
            phase: FramePhase::Idle,
        }
    }

    #[test]
    pub fn legal_cycle_round_trips() {
        let mut frame = idle_frame();
        frame.begin_recording().unwrap();
        assert_eq!(frame.phase(), FramePhase::Recording);
        frame.mark_submitted(7).unwrap();
        assert_eq!(frame.phase(), FramePhase::Submitted);
        assert_eq!(frame.fence_target, 7);
        frame.retire().unwrap();
        assert_eq!(frame.phase(), FramePhase::Idle);
    }

    #[test]
    pub fn double_begin_is_rejected() {
        let mut frame = idle_frame();
        frame.begin_recording().unwrap();
        match frame.begin_recording() {
            Err(YarraError::InvalidFrameState { expected, actual }) => {
                assert_eq!(expected, "Idle");
                assert_eq!(actual, "Recording");
            }
            other => panic!("expected InvalidFrameState, got {other:?}"),
        }
    }

    #[test]
    pub fn submit_without_recording_is_rejected() {
        let mut frame = idle_frame();
        assert!(frame.mark_submitted(1).is_err());
    }

    #[test]
    pub fn retire_without_submit_is_rejected() {
        let mut frame = idle_frame();
        frame.begin_recording().unwrap();
        assert!(frame.retire().is_err());
    }
}
