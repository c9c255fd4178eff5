use crate::error::{MagnifyError, MagnifyResult};
use crate::geometry::{Placement, Size};
use crate::statistics::FrameStatistics;

/// GPU device context that owns the host swap chain and per-frame command
/// recording. Construction is the initialization step.
pub trait RenderDevice {
    type Texture;

    /// Size of the host back buffer.
    fn host_size(&self) -> Size;

    /// Waits for the current command slot to be reusable and opens the
    /// command list for recording.
    fn begin_frame(&mut self) -> MagnifyResult<()>;

    /// Closes and submits the command list, presents, and advances to the
    /// next slot. Per-call GPU failures are logged; only device loss is
    /// returned as an error.
    fn end_frame(&mut self) -> MagnifyResult<()>;

    /// Blocks until every submitted command has completed.
    fn wait_for_gpu(&mut self) -> MagnifyResult<()>;

    /// Records a copy of `placement` from `texture` into the current back
    /// buffer.
    fn copy_to_back_buffer(
        &mut self,
        texture: &Self::Texture,
        placement: &Placement,
    ) -> MagnifyResult<()>;

    fn statistics(&self) -> &FrameStatistics;
}

/// Swap chain and pacing decisions derived from the session flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapChainPolicy {
    pub vsync: bool,
    pub low_latency: bool,
    pub tearing_supported: bool,
}

impl SwapChainPolicy {
    /// Fails with `VsyncOffUnsupported` when vsync is off and the adapter
    /// cannot present with tearing.
    pub fn new(vsync: bool, low_latency: bool, tearing_supported: bool) -> MagnifyResult<Self> {
        if !vsync && !tearing_supported {
            return Err(MagnifyError::VsyncOffUnsupported);
        }
        Ok(Self {
            vsync,
            low_latency,
            tearing_supported,
        })
    }

    /// Number of rotating command slots (allocator + fence value).
    pub const fn frame_slots(&self) -> usize {
        if self.low_latency { 1 } else { 2 }
    }

    pub const fn back_buffer_count(&self) -> u32 {
        if self.vsync && !self.low_latency { 3 } else { 2 }
    }

    pub const fn max_frame_latency(&self) -> u32 {
        self.frame_slots() as u32
    }

    /// `(sync_interval, allow_tearing)` for each present call.
    pub const fn present_params(&self) -> (u32, bool) {
        if self.vsync { (1, false) } else { (0, true) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vsync_off_without_tearing_is_rejected() {
        let err = SwapChainPolicy::new(false, true, false).unwrap_err();
        assert_eq!(err.reason(), crate::error::ErrorReason::VsyncOffNotSupported);
    }

    #[test]
    fn low_latency_uses_one_slot_and_two_buffers() {
        let policy = SwapChainPolicy::new(true, true, false).unwrap();
        assert_eq!(policy.frame_slots(), 1);
        assert_eq!(policy.back_buffer_count(), 2);
        assert_eq!(policy.max_frame_latency(), 1);
        assert_eq!(policy.present_params(), (1, false));
    }

    #[test]
    fn vsync_without_low_latency_triple_buffers() {
        let policy = SwapChainPolicy::new(true, false, true).unwrap();
        assert_eq!(policy.frame_slots(), 2);
        assert_eq!(policy.back_buffer_count(), 3);
    }

    #[test]
    fn vsync_off_presents_immediately_with_tearing() {
        let policy = SwapChainPolicy::new(false, false, true).unwrap();
        assert_eq!(policy.back_buffer_count(), 2);
        assert_eq!(policy.present_params(), (0, true));
    }
}
