use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::SessionConfig;
use crate::device::RenderDevice;
use crate::effect::{EffectPlan, EffectRunner, KernelRegistry, PassThrough};
use crate::error::{ErrorKind, MagnifyError, MagnifyResult};
use crate::frame_source::{FrameSource, FrameSourceKind, UpdateState, select_with_fallback};
use crate::platform::NativePlatform;
use crate::renderer::Renderer;
use crate::window::WindowId;

/// Factory for everything a session needs from the graphics stack.
pub trait SessionPlatform {
    type Device: RenderDevice;

    fn create_device(&mut self, config: &SessionConfig) -> MagnifyResult<Self::Device>;

    fn create_source(
        &mut self,
        kind: FrameSourceKind,
        device: &mut Self::Device,
    ) -> MagnifyResult<Box<dyn FrameSource<Self::Device>>>;

    /// Builds the executor for a non-empty plan.
    fn create_effects(
        &mut self,
        device: &mut Self::Device,
        plan: &EffectPlan,
    ) -> MagnifyResult<Box<dyn EffectRunner<Self::Device>>>;
}

/// What one session tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Rendered(UpdateState),
    /// A transient capture error was logged and skipped.
    Skipped,
    /// The frame source failed and the session restarted on another variant.
    Restarted(FrameSourceKind),
}

pub struct SessionBuilder {
    source: WindowId,
    host: WindowId,
    config: SessionConfig,
    kernels: KernelRegistry,
}

impl SessionBuilder {
    pub fn new(source: WindowId, host: WindowId) -> Self {
        Self {
            source,
            host,
            config: SessionConfig::default(),
            kernels: KernelRegistry::new(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers compute bytecode for an effect that has no built-in kernel,
    /// or replaces a built-in one.
    pub fn with_kernel(mut self, name: impl Into<String>, bytecode: Vec<u8>) -> Self {
        self.kernels.register(name, bytecode);
        self
    }

    pub fn build(self) -> MagnifyResult<Session<NativePlatform>> {
        let platform = NativePlatform::new(self.source, self.host, self.kernels)?;
        Session::start(platform, self.config)
    }
}

pub struct Session<P: SessionPlatform> {
    platform: P,
    config: SessionConfig,
    renderer: Option<Renderer<P::Device>>,
    consecutive_transient_errors: u32,
}

impl<P: SessionPlatform> Session<P> {
    pub fn start(mut platform: P, config: SessionConfig) -> MagnifyResult<Self> {
        config.validate()?;
        let priority = config.capture.normalized_priority();
        let renderer = build_renderer(&mut platform, &config, &priority)?;
        Ok(Self {
            platform,
            config,
            renderer: Some(renderer),
            consecutive_transient_errors: 0,
        })
    }

    pub fn tick(&mut self) -> MagnifyResult<TickOutcome> {
        let renderer = self
            .renderer
            .as_mut()
            .ok_or_else(|| MagnifyError::FatalCapture("session has ended".to_string()))?;

        let err = match renderer.tick() {
            Ok(state) => {
                self.consecutive_transient_errors = 0;
                return Ok(TickOutcome::Rendered(state));
            }
            Err(err) => err,
        };

        let err = if err.is_retryable() {
            self.consecutive_transient_errors += 1;
            if self.consecutive_transient_errors < self.config.max_consecutive_transient_errors {
                log::warn!(
                    "capture failed ({} in a row): {err:#}",
                    self.consecutive_transient_errors
                );
                return Ok(TickOutcome::Skipped);
            }
            err.into_fatal_capture()
        } else {
            err
        };

        if err.kind() != ErrorKind::FatalCapture {
            self.stop();
            return Err(err);
        }
        self.restart_after(err)
    }

    fn restart_after(&mut self, err: MagnifyError) -> MagnifyResult<TickOutcome> {
        let failed = match self.renderer.as_ref() {
            Some(renderer) => renderer.source_kind(),
            None => return Err(err),
        };
        log::warn!("frame source {} stopped: {err:#}", failed.as_str());
        self.stop();

        let remaining = self.config.capture.remaining_after(failed);
        if remaining.is_empty() {
            return Err(err);
        }

        let renderer = build_renderer(&mut self.platform, &self.config, &remaining)?;
        let kind = renderer.source_kind();
        self.renderer = Some(renderer);
        self.consecutive_transient_errors = 0;
        Ok(TickOutcome::Restarted(kind))
    }

    /// Ticks until `stop` is set or the session fails.
    pub fn run_until(&mut self, stop: &AtomicBool) -> MagnifyResult<()> {
        let idle_sleep = Duration::from_millis(self.config.idle_sleep_ms);
        while !stop.load(Ordering::Acquire) {
            match self.tick()? {
                TickOutcome::Rendered(UpdateState::NewFrame) | TickOutcome::Restarted(_) => {}
                _ => {
                    if !idle_sleep.is_zero() {
                        std::thread::sleep(idle_sleep);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn source_kind(&self) -> Option<FrameSourceKind> {
        self.renderer.as_ref().map(Renderer::source_kind)
    }

    pub fn is_screen_capture(&self) -> bool {
        self.renderer
            .as_ref()
            .is_some_and(Renderer::is_screen_capture)
    }

    pub fn has_rounded_corners(&self) -> bool {
        self.renderer
            .as_ref()
            .is_some_and(Renderer::has_rounded_corners)
    }

    pub fn renderer(&self) -> Option<&Renderer<P::Device>> {
        self.renderer.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.renderer.is_some()
    }

    /// Drains the GPU and releases the renderer.
    pub fn stop(&mut self) {
        if let Some(mut renderer) = self.renderer.take()
            && let Err(err) = renderer.shutdown()
        {
            log::warn!("failed to drain GPU work on shutdown: {err:#}");
        }
    }
}

impl<P: SessionPlatform> Drop for Session<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_renderer<P: SessionPlatform>(
    platform: &mut P,
    config: &SessionConfig,
    priority: &[FrameSourceKind],
) -> MagnifyResult<Renderer<P::Device>> {
    let mut device = platform.create_device(config)?;
    let (_, source) =
        select_with_fallback(priority, |kind| platform.create_source(kind, &mut device))?;
    let plan = EffectPlan::build(&config.effects, source.source_size(), device.host_size())?;
    let effects: Box<dyn EffectRunner<P::Device>> = if plan.is_empty() {
        Box::new(PassThrough)
    } else {
        platform.create_effects(&mut device, &plan)?
    };
    Renderer::new(device, source, effects, plan, config.idle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_source::FrameSourcePolicy;
    use crate::geometry::Size;
    use crate::testing::{MockDevice, ScriptedSource, SizedRunner};
    use rustc_hash::FxHashMap;

    type Script = Vec<MagnifyResult<UpdateState>>;

    #[derive(Default)]
    struct MockPlatform {
        scripts: FxHashMap<FrameSourceKind, Script>,
        unavailable: Vec<FrameSourceKind>,
        devices_created: u32,
    }

    impl SessionPlatform for MockPlatform {
        type Device = MockDevice;

        fn create_device(&mut self, _config: &SessionConfig) -> MagnifyResult<MockDevice> {
            self.devices_created += 1;
            Ok(MockDevice::new(1920, 1080))
        }

        fn create_source(
            &mut self,
            kind: FrameSourceKind,
            _device: &mut MockDevice,
        ) -> MagnifyResult<Box<dyn FrameSource<MockDevice>>> {
            if self.unavailable.contains(&kind) {
                return Err(MagnifyError::Initialization(format!(
                    "{} unavailable",
                    kind.as_str()
                )));
            }
            let script = self.scripts.remove(&kind).unwrap_or_default();
            let source = ScriptedSource::new(kind, Size::new(800, 600), script);
            let source: Box<dyn FrameSource<MockDevice>> = match kind {
                FrameSourceKind::DesktopDuplication | FrameSourceKind::GraphicsCapture => {
                    Box::new(source.with_rounded_corners())
                }
                _ => Box::new(source),
            };
            Ok(source)
        }

        fn create_effects(
            &mut self,
            _device: &mut MockDevice,
            plan: &EffectPlan,
        ) -> MagnifyResult<Box<dyn EffectRunner<MockDevice>>> {
            Ok(Box::new(SizedRunner::new(plan.output_size())))
        }
    }

    fn config_with(priority: Vec<FrameSourceKind>) -> SessionConfig {
        SessionConfig {
            capture: FrameSourcePolicy { priority },
            max_consecutive_transient_errors: 3,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn start_skips_unavailable_variants() {
        crate::testing::init_logging();
        let platform = MockPlatform {
            unavailable: vec![FrameSourceKind::GraphicsCapture],
            ..Default::default()
        };
        let session = Session::start(platform, SessionConfig::default()).unwrap();
        assert_eq!(session.source_kind(), Some(FrameSourceKind::DesktopDuplication));
        assert!(session.is_running());
    }

    #[test]
    fn rounded_corners_follow_the_selected_variant() {
        let platform = MockPlatform {
            unavailable: vec![FrameSourceKind::GraphicsCapture, FrameSourceKind::DesktopDuplication],
            ..Default::default()
        };
        let session = Session::start(platform, SessionConfig::default()).unwrap();
        assert_eq!(session.source_kind(), Some(FrameSourceKind::DwmSharedSurface));
        assert!(!session.has_rounded_corners());

        let session = Session::start(MockPlatform::default(), SessionConfig::default()).unwrap();
        assert!(session.has_rounded_corners());
    }

    #[test]
    fn gpu_failure_skips_the_frame_and_keeps_running() {
        crate::testing::init_logging();
        let mut platform = MockPlatform::default();
        platform.scripts.insert(
            FrameSourceKind::GraphicsCapture,
            vec![
                Err(MagnifyError::Platform(anyhow::anyhow!(
                    "ID3D12CommandQueue::Wait failed: E_INVALIDARG"
                ))),
                Ok(UpdateState::NewFrame),
            ],
        );
        let mut session = Session::start(platform, SessionConfig::default()).unwrap();

        assert_eq!(session.tick().unwrap(), TickOutcome::Skipped);
        assert!(session.is_running());
        assert_eq!(
            session.tick().unwrap(),
            TickOutcome::Rendered(UpdateState::NewFrame)
        );
    }

    #[test]
    fn fatal_capture_restarts_on_the_next_variant() {
        crate::testing::init_logging();
        let mut platform = MockPlatform::default();
        platform.scripts.insert(
            FrameSourceKind::GraphicsCapture,
            vec![
                Ok(UpdateState::NewFrame),
                Err(MagnifyError::FatalCapture("item closed".into())),
            ],
        );
        platform
            .scripts
            .insert(FrameSourceKind::Gdi, vec![Ok(UpdateState::NewFrame)]);
        let config = config_with(vec![FrameSourceKind::GraphicsCapture, FrameSourceKind::Gdi]);
        let mut session = Session::start(platform, config).unwrap();

        assert_eq!(
            session.tick().unwrap(),
            TickOutcome::Rendered(UpdateState::NewFrame)
        );
        assert_eq!(
            session.tick().unwrap(),
            TickOutcome::Restarted(FrameSourceKind::Gdi)
        );
        assert_eq!(
            session.tick().unwrap(),
            TickOutcome::Rendered(UpdateState::NewFrame)
        );
        assert_eq!(session.platform.devices_created, 2);
    }

    #[test]
    fn repeated_transient_errors_escalate() {
        crate::testing::init_logging();
        let mut platform = MockPlatform::default();
        platform.scripts.insert(
            FrameSourceKind::DwmSharedSurface,
            (0..3)
                .map(|_| Err(MagnifyError::TransientCapture("busy".into())))
                .collect(),
        );
        let config = config_with(vec![FrameSourceKind::DwmSharedSurface]);
        let mut session = Session::start(platform, config).unwrap();

        assert_eq!(session.tick().unwrap(), TickOutcome::Skipped);
        assert_eq!(session.tick().unwrap(), TickOutcome::Skipped);
        let err = session.tick().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FatalCapture);
        assert!(!session.is_running());
    }

    #[test]
    fn success_resets_the_transient_error_count() {
        let mut platform = MockPlatform::default();
        platform.scripts.insert(
            FrameSourceKind::Gdi,
            vec![
                Err(MagnifyError::Timeout),
                Err(MagnifyError::Timeout),
                Ok(UpdateState::NoUpdate),
                Err(MagnifyError::Timeout),
                Err(MagnifyError::Timeout),
            ],
        );
        let config = config_with(vec![FrameSourceKind::Gdi]);
        let mut session = Session::start(platform, config).unwrap();
        for _ in 0..5 {
            assert!(session.tick().is_ok());
        }
        assert!(session.is_running());
    }

    #[test]
    fn device_loss_ends_the_session() {
        let mut platform = MockPlatform::default();
        platform
            .scripts
            .insert(FrameSourceKind::Gdi, vec![Ok(UpdateState::NewFrame)]);
        let config = config_with(vec![FrameSourceKind::Gdi, FrameSourceKind::DesktopDuplication]);
        let mut session = Session::start(platform, config).unwrap();
        if let Some(renderer) = session.renderer.as_mut() {
            renderer.device_mut().lose_device_on_present = true;
        }
        assert!(matches!(session.tick(), Err(MagnifyError::DeviceLost)));
        assert!(!session.is_running());
    }

    #[test]
    fn effect_chain_is_planned_against_the_selected_source() {
        let mut config = config_with(vec![FrameSourceKind::Gdi]);
        config.effects = SessionConfig::from_json(
            r#"{"effects": [{"effect": "scale", "type": "pixel", "scale": 2}]}"#,
        )
        .unwrap()
        .effects;
        let session = Session::start(MockPlatform::default(), config).unwrap();
        let renderer = session.renderer().unwrap();
        assert_eq!(renderer.plan().output_size(), Size::new(1600, 1200));
        assert_eq!(renderer.placement().dst_x, 160);
    }

    #[test]
    fn run_until_returns_when_stopped() {
        let stop = AtomicBool::new(true);
        let mut session = Session::start(MockPlatform::default(), SessionConfig::default()).unwrap();
        session.run_until(&stop).unwrap();
        assert!(session.is_running());
    }
}
