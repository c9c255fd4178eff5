use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::device::RenderDevice;
use crate::effect::EffectRunner;
use crate::error::{MagnifyError, MagnifyResult};
use crate::frame_source::{FrameSource, FrameSourceKind, UpdateState};
use crate::geometry::{Placement, Size};
use crate::statistics::FrameStatistics;

/// Routes `log` output through the test harness. Safe to call from every test.
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MockTexture {
    pub(crate) id: u32,
    pub(crate) size: Size,
}

pub(crate) struct MockDevice {
    host: Size,
    pub(crate) frame_open: bool,
    pub(crate) begun: u32,
    pub(crate) presented: u32,
    pub(crate) gpu_waits: u32,
    pub(crate) copies: Vec<(MockTexture, Placement)>,
    pub(crate) lose_device_on_present: bool,
    statistics: FrameStatistics,
}

impl MockDevice {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            host: Size::new(width, height),
            frame_open: false,
            begun: 0,
            presented: 0,
            gpu_waits: 0,
            copies: Vec::new(),
            lose_device_on_present: false,
            statistics: FrameStatistics::new(),
        }
    }
}

impl RenderDevice for MockDevice {
    type Texture = MockTexture;

    fn host_size(&self) -> Size {
        self.host
    }

    fn begin_frame(&mut self) -> MagnifyResult<()> {
        if self.frame_open {
            return Err(MagnifyError::Initialization(
                "begin_frame called twice".into(),
            ));
        }
        self.frame_open = true;
        self.begun += 1;
        Ok(())
    }

    fn end_frame(&mut self) -> MagnifyResult<()> {
        if !self.frame_open {
            return Err(MagnifyError::Initialization(
                "end_frame without begin_frame".into(),
            ));
        }
        self.frame_open = false;
        if self.lose_device_on_present {
            return Err(MagnifyError::DeviceLost);
        }
        self.presented += 1;
        self.statistics.tick();
        Ok(())
    }

    fn wait_for_gpu(&mut self) -> MagnifyResult<()> {
        self.gpu_waits += 1;
        Ok(())
    }

    fn copy_to_back_buffer(
        &mut self,
        texture: &MockTexture,
        placement: &Placement,
    ) -> MagnifyResult<()> {
        if !self.frame_open {
            return Err(MagnifyError::Initialization(
                "copy recorded outside a frame".into(),
            ));
        }
        self.copies.push((*texture, *placement));
        Ok(())
    }

    fn statistics(&self) -> &FrameStatistics {
        &self.statistics
    }
}

/// Frame source that replays a fixed script of capture results.
pub(crate) struct ScriptedSource {
    kind: FrameSourceKind,
    output: MockTexture,
    script: VecDeque<MagnifyResult<UpdateState>>,
    rounded_corners: bool,
    pub(crate) released: u32,
}

impl ScriptedSource {
    pub(crate) fn new(
        kind: FrameSourceKind,
        size: Size,
        script: impl IntoIterator<Item = MagnifyResult<UpdateState>>,
    ) -> Self {
        Self {
            kind,
            output: MockTexture { id: 1, size },
            script: script.into_iter().collect(),
            rounded_corners: false,
            released: 0,
        }
    }

    pub(crate) fn with_rounded_corners(mut self) -> Self {
        self.rounded_corners = true;
        self
    }
}

impl FrameSource<MockDevice> for ScriptedSource {
    fn kind(&self) -> FrameSourceKind {
        self.kind
    }

    fn source_size(&self) -> Size {
        self.output.size
    }

    fn capture_frame(&mut self, device: &mut MockDevice) -> MagnifyResult<UpdateState> {
        if !device.frame_open {
            return Err(MagnifyError::Initialization(
                "capture outside a frame".into(),
            ));
        }
        self.script
            .pop_front()
            .unwrap_or(Ok(UpdateState::NoUpdate))
    }

    fn output(&self) -> &MockTexture {
        &self.output
    }

    fn release_frame(&mut self) {
        self.released += 1;
    }

    fn has_rounded_corners(&self) -> bool {
        self.rounded_corners
    }
}

/// Effect runner standing in for a planned chain: every run yields a
/// texture of the planned output size.
pub(crate) struct SizedRunner {
    output: MockTexture,
    runs: Rc<Cell<u32>>,
}

impl SizedRunner {
    pub(crate) fn new(output_size: Size) -> Self {
        Self {
            output: MockTexture {
                id: 2,
                size: output_size,
            },
            runs: Rc::default(),
        }
    }

    /// Dispatch counter that stays readable after the runner is boxed.
    pub(crate) fn runs(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.runs)
    }
}

impl EffectRunner<MockDevice> for SizedRunner {
    fn run<'a>(
        &'a mut self,
        device: &mut MockDevice,
        _input: &'a MockTexture,
    ) -> MagnifyResult<&'a MockTexture> {
        if !device.frame_open {
            return Err(MagnifyError::Initialization(
                "effects recorded outside a frame".into(),
            ));
        }
        self.runs.set(self.runs.get() + 1);
        Ok(&self.output)
    }

    fn last_output<'a>(&'a self, _input: &'a MockTexture) -> &'a MockTexture {
        &self.output
    }
}
