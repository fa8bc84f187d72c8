//! Synchronization primitives and frames-in-flight bookkeeping

use anyhow::Context;
use ash::vk;
use log::debug;

use super::Device;

/// A Vulkan fence for CPU-GPU synchronization.
pub struct Fence {
    handle: vk::Fence,
    device: ash::Device,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// If `signaled` is true, the fence starts in the signaled state, which is useful for the
    /// first frame where there's no prior work to wait on.
    pub fn new(device: &Device, signaled: bool) -> anyhow::Result<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);

        let handle = unsafe { device.handle().create_fence(&create_info, None) }
            .context("Failed to create fence")?;

        Ok(Self {
            handle,
            device: device.handle().clone(),
        })
    }

    /// Blocks until the fence is signaled.
    pub fn wait(&self) -> anyhow::Result<()> {
        unsafe { self.device.wait_for_fences(&[self.handle], true, u64::MAX) }
            .context("Failed to wait for fence")?;
        Ok(())
    }

    /// Resets the fence to the unsignaled state.
    pub fn reset(&self) -> anyhow::Result<()> {
        unsafe { self.device.reset_fences(&[self.handle]) }.context("Failed to reset fence")?;
        Ok(())
    }

    /// Returns the fence handle.
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.handle, None);
        }
    }
}

/// A Vulkan semaphore for GPU-GPU synchronization.
pub struct Semaphore {
    handle: vk::Semaphore,
    device: ash::Device,
}

impl Semaphore {
    /// Creates a new semaphore.
    pub fn new(device: &Device) -> anyhow::Result<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();

        let handle = unsafe { device.handle().create_semaphore(&create_info, None) }
            .context("Failed to create semaphore")?;

        Ok(Self {
            handle,
            device: device.handle().clone(),
        })
    }

    /// Returns the semaphore handle.
    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.handle, None);
        }
    }
}

/// The objects one frame in flight synchronizes with.
pub struct FrameSync {
    /// Signaled when the acquired swapchain image can be rendered to
    pub image_available: Semaphore,
    /// Signaled when rendering finished and the image can be presented
    pub render_finished: Semaphore,
    /// Signaled when the frame's submission completed on the GPU
    pub in_flight: Fence,
}

impl FrameSync {
    /// Creates `count` frames, their fences already signaled.
    pub fn new_frames(device: &Device, count: usize) -> anyhow::Result<Vec<Self>> {
        let frames = (0..count)
            .map(|_| {
                Ok(Self {
                    image_available: Semaphore::new(device)?,
                    render_finished: Semaphore::new(device)?,
                    in_flight: Fence::new(device, true)?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        debug!("Created sync objects for {} frames in flight", count);
        Ok(frames)
    }
}

/// Remembers which frame last rendered to each swapchain image.
///
/// A swapchain may hand out an image whose previous frame is still executing. That frame's
/// fence has to be waited on before the image is reused.
#[derive(Debug, Clone)]
pub struct ImagesInFlight {
    frames: Vec<Option<usize>>,
}

impl ImagesInFlight {
    /// Tracks `image_count` swapchain images, none of them in use.
    pub fn new(image_count: usize) -> Self {
        Self {
            frames: vec![None; image_count],
        }
    }

    /// Records that `frame` now uses `image`. Returns the frame that used it before, whose
    /// fence must be waited on first. A frame reusing its own image returns `None` since its
    /// fence was already waited on.
    pub fn claim(&mut self, image: usize, frame: usize) -> Option<usize> {
        let previous = self.frames.get_mut(image)?.replace(frame);
        previous.filter(|&previous| previous != frame)
    }
}

/// Index of the frame after `current` with `frames_in_flight` frames rotating.
pub fn next_frame(current: usize, frames_in_flight: usize) -> usize {
    (current + 1) % frames_in_flight
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_use_of_image_needs_no_wait() {
        let mut images = ImagesInFlight::new(3);
        assert_eq!(images.claim(0, 0), None);
        assert_eq!(images.claim(1, 1), None);
    }

    #[test]
    fn reuse_by_other_frame_waits_on_previous() {
        let mut images = ImagesInFlight::new(3);
        images.claim(2, 0);
        assert_eq!(images.claim(2, 1), Some(0));
        assert_eq!(images.claim(2, 0), Some(1));
    }

    #[test]
    fn reuse_by_same_frame_does_not_wait() {
        let mut images = ImagesInFlight::new(2);
        images.claim(1, 1);
        assert_eq!(images.claim(1, 1), None);
    }

    #[test]
    fn unknown_image_is_ignored() {
        let mut images = ImagesInFlight::new(1);
        assert_eq!(images.claim(5, 0), None);
    }

    #[test]
    fn frames_rotate() {
        assert_eq!(next_frame(0, 2), 1);
        assert_eq!(next_frame(1, 2), 0);
    }
}
