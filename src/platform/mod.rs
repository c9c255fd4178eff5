#[cfg(target_os = "windows")]
pub(crate) mod windows;

#[cfg(target_os = "windows")]
pub use windows::WindowsPlatform as NativePlatform;

#[cfg(not(target_os = "windows"))]
pub use unsupported::UnsupportedPlatform as NativePlatform;

#[cfg(not(target_os = "windows"))]
mod unsupported {
    use crate::config::SessionConfig;
    use crate::device::RenderDevice;
    use crate::effect::{EffectPlan, EffectRunner, KernelRegistry};
    use crate::error::{MagnifyError, MagnifyResult};
    use crate::frame_source::{FrameSource, FrameSourceKind};
    use crate::geometry::{Placement, Size};
    use crate::session::SessionPlatform;
    use crate::statistics::FrameStatistics;
    use crate::window::WindowId;

    fn unsupported_error() -> MagnifyError {
        MagnifyError::Platform(anyhow::anyhow!(
            "window magnification is only supported on Windows"
        ))
    }

    /// Placeholder platform: construction always fails.
    pub struct UnsupportedPlatform {
        _private: (),
    }

    impl UnsupportedPlatform {
        pub fn new(
            _source: WindowId,
            _host: WindowId,
            _kernels: KernelRegistry,
        ) -> MagnifyResult<Self> {
            Err(unsupported_error())
        }
    }

    /// Uninhabited device type for targets without a GPU backend.
    pub enum UnsupportedDevice {}

    impl RenderDevice for UnsupportedDevice {
        type Texture = ();

        fn host_size(&self) -> Size {
            match *self {}
        }

        fn begin_frame(&mut self) -> MagnifyResult<()> {
            match *self {}
        }

        fn end_frame(&mut self) -> MagnifyResult<()> {
            match *self {}
        }

        fn wait_for_gpu(&mut self) -> MagnifyResult<()> {
            match *self {}
        }

        fn copy_to_back_buffer(&mut self, _texture: &(), _placement: &Placement) -> MagnifyResult<()> {
            match *self {}
        }

        fn statistics(&self) -> &FrameStatistics {
            match *self {}
        }
    }

    impl SessionPlatform for UnsupportedPlatform {
        type Device = UnsupportedDevice;

        fn create_device(&mut self, _config: &SessionConfig) -> MagnifyResult<UnsupportedDevice> {
            Err(unsupported_error())
        }

        fn create_source(
            &mut self,
            _kind: FrameSourceKind,
            device: &mut UnsupportedDevice,
        ) -> MagnifyResult<Box<dyn FrameSource<UnsupportedDevice>>> {
            match *device {}
        }

        fn create_effects(
            &mut self,
            device: &mut UnsupportedDevice,
            _plan: &EffectPlan,
        ) -> MagnifyResult<Box<dyn EffectRunner<UnsupportedDevice>>> {
            match *device {}
        }
    }
}
