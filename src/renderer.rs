use crate::config::IdlePolicy;
use crate::device::RenderDevice;
use crate::effect::{EffectPlan, EffectRunner};
use crate::error::{MagnifyError, MagnifyResult};
use crate::frame_source::{FrameSource, FrameSourceKind, UpdateState};
use crate::geometry::Placement;

/// Drives one tick of the magnifier: capture, run the effect chain, place the
/// result in the host back buffer and present.
pub struct Renderer<D: RenderDevice> {
    device: D,
    source: Box<dyn FrameSource<D>>,
    effects: Box<dyn EffectRunner<D>>,
    plan: EffectPlan,
    placement: Placement,
    idle: IdlePolicy,
    frame_open: bool,
    has_presented: bool,
}

impl<D: RenderDevice> Renderer<D> {
    pub fn new(
        device: D,
        source: Box<dyn FrameSource<D>>,
        effects: Box<dyn EffectRunner<D>>,
        plan: EffectPlan,
        idle: IdlePolicy,
    ) -> MagnifyResult<Self> {
        if plan.input_size() != source.source_size() {
            return Err(MagnifyError::Initialization(format!(
                "effect plan expects {}x{} input but {} produces {}x{}",
                plan.input_size().width,
                plan.input_size().height,
                source.kind().as_str(),
                source.source_size().width,
                source.source_size().height
            )));
        }
        let placement = Placement::center(device.host_size(), plan.output_size());
        if placement.is_empty() {
            return Err(MagnifyError::Geometry(
                "output placement does not intersect the host".to_string(),
            ));
        }

        Ok(Self {
            device,
            source,
            effects,
            plan,
            placement,
            idle,
            frame_open: false,
            has_presented: false,
        })
    }

    /// Runs one render step. A frame that produced nothing to present stays
    /// open and is reused by the next tick. GPU call failures abandon the
    /// frame and come back as `TransientCapture`; device loss is returned
    /// as is.
    pub fn tick(&mut self) -> MagnifyResult<UpdateState> {
        self.step().map_err(|err| match err {
            MagnifyError::Platform(inner) => {
                log::error!("abandoning this frame: {inner:#}");
                MagnifyError::TransientCapture(format!("{inner:#}"))
            }
            other => other,
        })
    }

    fn step(&mut self) -> MagnifyResult<UpdateState> {
        if !self.frame_open {
            self.device.begin_frame()?;
            self.frame_open = true;
        }

        let state = self.source.capture_frame(&mut self.device)?;
        match state {
            UpdateState::NewFrame => {
                self.render_and_present()?;
                self.source.release_frame();
            }
            UpdateState::NoUpdate
                if self.idle == IdlePolicy::PresentPrevious && self.has_presented =>
            {
                self.present_previous()?;
            }
            UpdateState::NoUpdate | UpdateState::Waiting => {}
        }
        Ok(state)
    }

    fn render_and_present(&mut self) -> MagnifyResult<()> {
        let image = self.effects.run(&mut self.device, self.source.output())?;
        self.device.copy_to_back_buffer(image, &self.placement)?;
        self.frame_open = false;
        self.device.end_frame()?;
        self.has_presented = true;
        Ok(())
    }

    /// Presents the last effect output again without dispatching the chain.
    fn present_previous(&mut self) -> MagnifyResult<()> {
        let image = self.effects.last_output(self.source.output());
        self.device.copy_to_back_buffer(image, &self.placement)?;
        self.frame_open = false;
        self.device.end_frame()
    }

    /// Drains outstanding GPU work before teardown.
    pub fn shutdown(&mut self) -> MagnifyResult<()> {
        self.device.wait_for_gpu()
    }

    pub fn source_kind(&self) -> FrameSourceKind {
        self.source.kind()
    }

    pub fn is_screen_capture(&self) -> bool {
        self.source.is_screen_capture()
    }

    /// True when the captured image carries the source window's rounded
    /// corners, which the host has to mask.
    pub fn has_rounded_corners(&self) -> bool {
        self.source.has_rounded_corners()
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn plan(&self) -> &EffectPlan {
        &self.plan
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    #[cfg(test)]
    pub(crate) fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{EffectRecord, PassThrough};
    use crate::geometry::Size;
    use crate::testing::{MockDevice, ScriptedSource, SizedRunner};
    use serde_json::json;

    fn renderer_with(
        script: Vec<MagnifyResult<UpdateState>>,
        idle: IdlePolicy,
    ) -> Renderer<MockDevice> {
        let source = ScriptedSource::new(FrameSourceKind::Gdi, Size::new(640, 480), script);
        let plan = EffectPlan::build(&[], Size::new(640, 480), Size::new(1920, 1080)).unwrap();
        Renderer::new(
            MockDevice::new(1920, 1080),
            Box::new(source),
            Box::new(PassThrough),
            plan,
            idle,
        )
        .unwrap()
    }

    #[test]
    fn doubled_output_is_centered_and_clipped_in_the_host() {
        crate::testing::init_logging();
        let records: Vec<EffectRecord> = [
            json!({"effect": "scale", "type": "mitchell", "scale": [2, 2]}),
            json!({"effect": "sharpen", "type": "builtIn"}),
        ]
        .iter()
        .map(|value| EffectRecord::from_value(value).unwrap())
        .collect();
        let plan =
            EffectPlan::build(&records, Size::new(800, 600), Size::new(1920, 1080)).unwrap();
        let source = ScriptedSource::new(
            FrameSourceKind::DesktopDuplication,
            Size::new(800, 600),
            [Ok(UpdateState::NewFrame)],
        );
        let mut renderer = Renderer::new(
            MockDevice::new(1920, 1080),
            Box::new(source),
            Box::new(SizedRunner::new(plan.output_size())),
            plan,
            IdlePolicy::Skip,
        )
        .unwrap();

        assert_eq!(renderer.tick().unwrap(), UpdateState::NewFrame);

        let (texture, placement) = renderer.device().copies[0];
        assert_eq!(texture.size, Size::new(1600, 1200));
        assert_eq!(placement.dst_x, 160);
        assert_eq!(placement.dst_y, 0);
        assert_eq!(placement.src_y, 60);
        assert_eq!((placement.width, placement.height), (1600, 1080));
        assert_eq!(renderer.device().presented, 1);
    }

    #[test]
    fn waiting_keeps_the_frame_open_without_presenting() {
        let mut renderer = renderer_with(
            vec![
                Ok(UpdateState::Waiting),
                Ok(UpdateState::Waiting),
                Ok(UpdateState::NewFrame),
            ],
            IdlePolicy::Skip,
        );
        assert_eq!(renderer.tick().unwrap(), UpdateState::Waiting);
        assert_eq!(renderer.tick().unwrap(), UpdateState::Waiting);
        assert_eq!(renderer.device().begun, 1);
        assert_eq!(renderer.device().presented, 0);

        assert_eq!(renderer.tick().unwrap(), UpdateState::NewFrame);
        assert_eq!(renderer.device().begun, 1);
        assert_eq!(renderer.device().presented, 1);
        assert!(!renderer.device().frame_open);
    }

    #[test]
    fn idle_skip_presents_nothing_on_no_update() {
        let mut renderer = renderer_with(
            vec![Ok(UpdateState::NewFrame), Ok(UpdateState::NoUpdate)],
            IdlePolicy::Skip,
        );
        renderer.tick().unwrap();
        assert_eq!(renderer.tick().unwrap(), UpdateState::NoUpdate);
        assert_eq!(renderer.device().presented, 1);
        assert_eq!(renderer.device().copies.len(), 1);
    }

    #[test]
    fn idle_present_previous_repeats_the_last_image() {
        let mut renderer = renderer_with(
            vec![
                Ok(UpdateState::NoUpdate),
                Ok(UpdateState::NewFrame),
                Ok(UpdateState::NoUpdate),
            ],
            IdlePolicy::PresentPrevious,
        );
        renderer.tick().unwrap();
        assert_eq!(renderer.device().presented, 0);
        renderer.tick().unwrap();
        renderer.tick().unwrap();
        assert_eq!(renderer.device().presented, 2);
        assert_eq!(renderer.device().copies[1].0.id, 1);
    }

    #[test]
    fn idle_present_previous_does_not_rerun_the_effect_chain() {
        let records = [EffectRecord::from_value(
            &json!({"effect": "scale", "type": "mitchell", "scale": [2, 2]}),
        )
        .unwrap()];
        let plan =
            EffectPlan::build(&records, Size::new(800, 600), Size::new(1920, 1080)).unwrap();
        let runner = SizedRunner::new(plan.output_size());
        let runs = runner.runs();
        let source = ScriptedSource::new(
            FrameSourceKind::DesktopDuplication,
            Size::new(800, 600),
            [
                Ok(UpdateState::NewFrame),
                Ok(UpdateState::NoUpdate),
                Ok(UpdateState::NoUpdate),
            ],
        );
        let mut renderer = Renderer::new(
            MockDevice::new(1920, 1080),
            Box::new(source),
            Box::new(runner),
            plan,
            IdlePolicy::PresentPrevious,
        )
        .unwrap();

        for _ in 0..3 {
            renderer.tick().unwrap();
        }
        assert_eq!(runs.get(), 1);
        assert_eq!(renderer.device().presented, 3);
        assert!(renderer.device().copies.iter().all(|(texture, _)| texture.id == 2));
    }

    #[test]
    fn gpu_failure_abandons_the_frame_and_is_retryable() {
        crate::testing::init_logging();
        let mut renderer = renderer_with(
            vec![
                Err(MagnifyError::Platform(anyhow::anyhow!(
                    "ID3D12CommandQueue::Wait failed: E_INVALIDARG"
                ))),
                Ok(UpdateState::NewFrame),
            ],
            IdlePolicy::Skip,
        );
        let err = renderer.tick().unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("E_INVALIDARG"));
        assert_eq!(renderer.device().presented, 0);

        assert_eq!(renderer.tick().unwrap(), UpdateState::NewFrame);
        assert_eq!(renderer.device().presented, 1);
    }

    #[test]
    fn transient_error_leaves_the_frame_open_for_the_next_tick() {
        let mut renderer = renderer_with(
            vec![
                Err(MagnifyError::TransientCapture("surface busy".into())),
                Ok(UpdateState::NewFrame),
            ],
            IdlePolicy::Skip,
        );
        let err = renderer.tick().unwrap_err();
        assert!(err.is_retryable());
        assert!(renderer.device().frame_open);

        assert_eq!(renderer.tick().unwrap(), UpdateState::NewFrame);
        assert_eq!(renderer.device().begun, 1);
    }

    #[test]
    fn device_loss_on_present_is_returned() {
        let mut renderer = renderer_with(vec![Ok(UpdateState::NewFrame)], IdlePolicy::Skip);
        renderer.device_mut().lose_device_on_present = true;
        let err = renderer.tick().unwrap_err();
        assert!(matches!(err, MagnifyError::DeviceLost));
    }

    #[test]
    fn mismatched_plan_is_rejected() {
        let source = ScriptedSource::new(FrameSourceKind::Gdi, Size::new(640, 480), Vec::new());
        let plan = EffectPlan::build(&[], Size::new(800, 600), Size::new(1920, 1080)).unwrap();
        let result = Renderer::new(
            MockDevice::new(1920, 1080),
            Box::new(source),
            Box::new(PassThrough),
            plan,
            IdlePolicy::Skip,
        );
        assert!(result.is_err());
    }

    #[test]
    fn shutdown_waits_for_the_gpu() {
        let mut renderer = renderer_with(vec![], IdlePolicy::Skip);
        renderer.shutdown().unwrap();
        assert_eq!(renderer.device().gpu_waits, 1);
    }
}
