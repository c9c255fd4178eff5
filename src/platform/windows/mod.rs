pub(crate) mod adapter;
pub(crate) mod com;
pub(crate) mod d3d11;
pub(crate) mod device;
pub(crate) mod duplication;
pub(crate) mod dwm;
pub(crate) mod effects;
pub(crate) mod gdi;
pub(crate) mod shared;
pub(crate) mod wgc;
pub(crate) mod window;

use crate::config::SessionConfig;
use crate::effect::{EffectPlan, EffectRunner, KernelRegistry};
use crate::error::MagnifyResult;
use crate::frame_source::{FrameSource, FrameSourceKind};
use crate::session::SessionPlatform;
use crate::window::WindowId;

use device::D3D12DeviceContext;

use com::ApartmentGuard;
use window::SendHwnd;

/// Direct3D 12 backed platform: one device context per renderer, frame
/// sources built on demand, and compute kernels from the registry.
pub struct WindowsPlatform {
    source: SendHwnd,
    host: SendHwnd,
    kernels: KernelRegistry,
    _apartment: ApartmentGuard,
}

impl WindowsPlatform {
    /// Validates both windows and enters the multithreaded apartment the
    /// compositor capture objects need. Host-registered kernels take
    /// precedence over the bundled ones.
    pub fn new(source: WindowId, host: WindowId, mut kernels: KernelRegistry) -> MagnifyResult<Self> {
        let source = window::to_hwnd(source);
        let host = window::to_hwnd(host);
        window::ensure_window(source, "source")?;
        window::ensure_window(host, "host")?;

        let apartment = ApartmentGuard::enter_multithreaded()?;
        effects::register_builtin_kernels(&mut kernels);
        log::debug!("{} compute kernels available", kernels.len());

        Ok(Self {
            source: SendHwnd(source),
            host: SendHwnd(host),
            kernels,
            _apartment: apartment,
        })
    }
}

impl SessionPlatform for WindowsPlatform {
    type Device = D3D12DeviceContext;

    fn create_device(&mut self, config: &SessionConfig) -> MagnifyResult<D3D12DeviceContext> {
        D3D12DeviceContext::new(self.host.0, config)
    }

    fn create_source(
        &mut self,
        kind: FrameSourceKind,
        device: &mut D3D12DeviceContext,
    ) -> MagnifyResult<Box<dyn FrameSource<D3D12DeviceContext>>> {
        let (source, host) = (self.source.0, self.host.0);
        Ok(match kind {
            FrameSourceKind::GraphicsCapture => {
                Box::new(wgc::GraphicsCaptureSource::new(source, host, device)?)
            }
            FrameSourceKind::DesktopDuplication => {
                Box::new(duplication::DesktopDuplicationSource::new(source, host, device)?)
            }
            FrameSourceKind::DwmSharedSurface => {
                Box::new(dwm::DwmSharedSurfaceSource::new(source, device)?)
            }
            FrameSourceKind::Gdi => Box::new(gdi::GdiSource::new(source, device)?),
        })
    }

    fn create_effects(
        &mut self,
        device: &mut D3D12DeviceContext,
        plan: &EffectPlan,
    ) -> MagnifyResult<Box<dyn EffectRunner<D3D12DeviceContext>>> {
        Ok(Box::new(effects::ComputeEffectChain::new(
            device,
            plan,
            &self.kernels,
        )?))
    }
}
