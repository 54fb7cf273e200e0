use crate::{contexts::VulkanContext, Result};
use ash::vk;
use std::slice::from_ref as slice_from_ref;

/// The single CPU/GPU synchronisation primitive: a timeline semaphore whose
/// counter only ever increases. Every submission site reserves the next target
/// value, attaches a GPU-side signal of it to its submission, and waits on it
/// before touching any resource that submission references.
pub struct TimelineFence {
    /// The underlying timeline semaphore
    pub semaphore: vk::Semaphore,
    next_value: u64,
}

impl TimelineFence {
    /// Create the fence with its counter at zero. Failure here is fatal - the
    /// renderer cannot sequence any GPU work without it.
    pub fn new(device: &ash::Device) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);
        let semaphore = unsafe { device.create_semaphore(&create_info, None) }?;

        Ok(Self {
            semaphore,
            next_value: 1,
        })
    }

    /// Reserve the next counter value. The caller takes responsibility for
    /// attaching a GPU-side signal of the returned value to its submission.
    pub fn next_target(&mut self) -> u64 {
        let target = self.next_value;
        self.next_value += 1;
        target
    }

    /// Reserve the next counter value and schedule a GPU-side signal of it
    /// behind all currently queued work, via an otherwise empty submission.
    pub fn signal_and_get_target(&mut self, vulkan_context: &VulkanContext) -> Result<u64> {
        let target = self.next_target();
        let signal_values = [target];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::builder()
            .signal_semaphores(slice_from_ref(&self.semaphore))
            .push_next(&mut timeline_info);

        unsafe {
            vulkan_context.device.queue_submit(
                vulkan_context.graphics_queue,
                slice_from_ref(&submit_info),
                vk::Fence::null(),
            )
        }?;

        Ok(target)
    }

    /// Block the calling thread until the device's completed counter reaches
    /// `target`. The wait is unbounded: a lost device shows up as a hang, not
    /// an error (see DESIGN.md).
    pub fn wait_until(&self, device: &ash::Device, target: u64) -> Result<()> {
        let semaphores = [self.semaphore];
        let values = [target];
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { device.wait_semaphores(&wait_info, u64::MAX) }?;
        Ok(())
    }

    /// Non-blocking read of the device's completed counter.
    pub fn current_completed(&self, device: &ash::Device) -> Result<u64> {
        unsafe { device.get_semaphore_counter_value(self.semaphore) }.map_err(Into::into)
    }

    /// safety: the fence must not be in use by any in-flight submission.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_semaphore(self.semaphore, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contexts::VulkanContext;

    #[test]
    pub fn targets_are_strictly_increasing() {
        let mut fence = TimelineFence {
            semaphore: vk::Semaphore::null(),
            next_value: 1,
        };

        let mut previous = 0;
        for _ in 0..100 {
            let target = fence.next_target();
            assert!(target > previous);
            previous = target;
        }
    }

    #[test]
    #[ignore = "requires a Vulkan driver"]
    pub fn fence_round_trip() {
        let vulkan_context = VulkanContext::testing().unwrap();
        let device = &vulkan_context.device;
        let mut fence = TimelineFence::new(device).unwrap();

        let first = fence.signal_and_get_target(&vulkan_context).unwrap();
        fence.wait_until(device, first).unwrap();
        assert!(fence.current_completed(device).unwrap() >= first);

        let second = fence.signal_and_get_target(&vulkan_context).unwrap();
        assert!(second > first);
        fence.wait_until(device, second).unwrap();
        assert!(fence.current_completed(device).unwrap() >= second);

        unsafe { fence.destroy(device) };
    }
}
