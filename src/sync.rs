//! Cross-device frame hand-off.
//!
//! A producer on a secondary device copies the tracked region into a shared
//! texture, signals a shared fence with a monotonically increasing value and
//! then publishes that value. The render device polls the published value,
//! makes its queue wait on the fence, and copies the shared texture into the
//! frame source output. Value 0 means no frame has been produced yet.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::device::RenderDevice;
use crate::error::{MagnifyError, MagnifyResult};
use crate::frame_source::UpdateState;
use crate::geometry::{Rect, any_region_overlaps};

#[derive(Default)]
struct SignalState {
    version: u64,
    closed: bool,
}

/// Published fence value shared between a producer thread or callback and
/// the render thread.
#[derive(Default)]
pub struct FrameSignal {
    state: Mutex<SignalState>,
    cv: Condvar,
    version_hint: AtomicU64,
    closed_hint: AtomicBool,
}

fn poisoned_lock_error() -> MagnifyError {
    MagnifyError::Platform(anyhow::anyhow!(
        "frame signal synchronization mutex was poisoned"
    ))
}

impl FrameSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publishes `version` once its fence signal has been submitted. Values
    /// that do not advance the published one are ignored.
    pub fn publish(&self, version: u64) {
        if let Ok(mut state) = self.state.lock() {
            if version <= state.version {
                return;
            }
            state.version = version;
            self.version_hint.store(version, Ordering::Release);
            self.cv.notify_all();
        }
    }

    /// Marks the producer as gone. Readers report `FatalCapture` from then on.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            self.closed_hint.store(true, Ordering::Release);
            self.cv.notify_all();
        }
    }

    pub fn published(&self) -> u64 {
        self.version_hint.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed_hint.load(Ordering::Acquire)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameVersion {
    /// Nothing has been published yet.
    Waiting,
    /// The published value was already consumed.
    Unchanged,
    /// A value this reader has not seen before.
    Advanced(u64),
}

/// Consumer-side view of a `FrameSignal`. Each published value is reported
/// as `Advanced` at most once.
pub struct FrameVersionReader {
    signal: Arc<FrameSignal>,
    last_seen: u64,
}

impl FrameVersionReader {
    pub fn new(signal: Arc<FrameSignal>) -> Self {
        Self {
            signal,
            last_seen: 0,
        }
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    pub fn poll(&mut self) -> MagnifyResult<FrameVersion> {
        if self.signal.is_closed() {
            return Err(MagnifyError::FatalCapture(
                "frame producer has stopped".to_string(),
            ));
        }
        Ok(self.observe(self.signal.published()))
    }

    /// Polls, and when nothing new is available blocks for up to `timeout`
    /// waiting for a publish.
    pub fn wait(&mut self, timeout: Duration) -> MagnifyResult<FrameVersion> {
        let polled = self.poll()?;
        if matches!(polled, FrameVersion::Advanced(_)) || timeout.is_zero() {
            return Ok(polled);
        }

        let deadline = Instant::now() + timeout;
        let signal = Arc::clone(&self.signal);
        let mut state = signal
            .state
            .lock()
            .map_err(|_| poisoned_lock_error())?;
        loop {
            if state.closed {
                return Err(MagnifyError::FatalCapture(
                    "frame producer has stopped".to_string(),
                ));
            }
            if state.version > self.last_seen {
                let version = state.version;
                return Ok(self.observe(version));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(self.observe(state.version));
            }
            let (next, _timeout) = signal
                .cv
                .wait_timeout(state, deadline.duration_since(now))
                .map_err(|_| poisoned_lock_error())?;
            state = next;
        }
    }

    fn observe(&mut self, version: u64) -> FrameVersion {
        if version == 0 {
            FrameVersion::Waiting
        } else if version <= self.last_seen {
            FrameVersion::Unchanged
        } else {
            self.last_seen = version;
            FrameVersion::Advanced(version)
        }
    }
}

/// Secondary-device half of the bridge.
pub trait BridgeWriter {
    /// Copies `region` of the captured image into the shared texture.
    fn copy_region(&mut self, region: &Rect) -> MagnifyResult<()>;

    /// Signals the shared fence with `value` and submits pending work.
    fn signal(&mut self, value: u64) -> MagnifyResult<()>;
}

/// Render-device half of the bridge.
pub trait BridgeReader<D: RenderDevice> {
    /// Makes the render queue wait for `value` on the shared fence, then
    /// records the copy from the shared texture into the source output.
    fn wait_and_copy(&mut self, device: &mut D, value: u64) -> MagnifyResult<()>;
}

pub struct SharedFrameProducer<W> {
    writer: W,
    signal: Arc<FrameSignal>,
    tracked: Rect,
    counter: u64,
}

impl<W: BridgeWriter> SharedFrameProducer<W> {
    pub fn new(writer: W, signal: Arc<FrameSignal>, tracked: Rect) -> Self {
        Self {
            writer,
            signal,
            tracked,
            counter: 0,
        }
    }

    pub fn tracked(&self) -> &Rect {
        &self.tracked
    }

    /// Moves the copied region, for sources whose target is only known once
    /// capture has started.
    pub fn retarget(&mut self, tracked: Rect) {
        self.tracked = tracked;
    }

    /// Tells the consumer no further frames will arrive.
    pub fn close(&self) {
        self.signal.close();
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Copies and publishes a frame only when a moved or dirty region
    /// touches the tracked rectangle. Returns whether a frame was published.
    pub fn publish_if_changed(&mut self, moved: &[Rect], dirty: &[Rect]) -> MagnifyResult<bool> {
        if !any_region_overlaps(&self.tracked, moved, dirty) {
            return Ok(false);
        }
        self.publish_frame()?;
        Ok(true)
    }

    /// Copies the tracked region, signals the next fence value and
    /// publishes it. The counter only advances once the signal succeeded.
    pub fn publish_frame(&mut self) -> MagnifyResult<u64> {
        let next = self.counter + 1;
        self.writer.copy_region(&self.tracked)?;
        self.writer.signal(next)?;
        self.counter = next;
        self.signal.publish(next);
        Ok(next)
    }
}

pub struct SharedFrameConsumer<R> {
    versions: FrameVersionReader,
    reader: R,
}

impl<R> SharedFrameConsumer<R> {
    pub fn new(signal: Arc<FrameSignal>, reader: R) -> Self {
        Self {
            versions: FrameVersionReader::new(signal),
            reader,
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Non-blocking capture step.
    pub fn capture<D>(&mut self, device: &mut D) -> MagnifyResult<UpdateState>
    where
        D: RenderDevice,
        R: BridgeReader<D>,
    {
        let version = self.versions.poll()?;
        self.apply(device, version)
    }

    /// Capture step that first waits up to `timeout` for a publish.
    pub fn capture_with_wait<D>(
        &mut self,
        device: &mut D,
        timeout: Duration,
    ) -> MagnifyResult<UpdateState>
    where
        D: RenderDevice,
        R: BridgeReader<D>,
    {
        let version = self.versions.wait(timeout)?;
        self.apply(device, version)
    }

    fn apply<D>(&mut self, device: &mut D, version: FrameVersion) -> MagnifyResult<UpdateState>
    where
        D: RenderDevice,
        R: BridgeReader<D>,
    {
        match version {
            FrameVersion::Waiting => Ok(UpdateState::Waiting),
            FrameVersion::Unchanged => Ok(UpdateState::NoUpdate),
            FrameVersion::Advanced(value) => {
                self.reader.wait_and_copy(device, value)?;
                Ok(UpdateState::NewFrame)
            }
        }
    }
}
