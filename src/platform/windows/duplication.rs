use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::Graphics::Direct3D11::ID3D11Texture2D;
use windows::Win32::Graphics::Direct3D12::ID3D12Resource;
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO,
    DXGI_OUTDUPL_MOVE_RECT, IDXGIOutput1, IDXGIOutputDuplication, IDXGIResource,
};
use windows::core::Interface;

use crate::env_config::duplication_timeout;
use crate::error::{MagnifyError, MagnifyResult};
use crate::frame_source::{FrameSource, FrameSourceKind, UpdateState};
use crate::geometry::{Rect, Size, validate_crop};
use crate::sync::{FrameSignal, SharedFrameConsumer, SharedFrameProducer};

use super::adapter;
use super::d3d11;
use super::device::D3D12DeviceContext;
use super::shared::{self, D3D11BridgeWriter, D3D12BridgeReader, SharedTexturePair};
use super::window::{self, to_rect};

const WORKER_JOIN_TIMEOUT: Duration = Duration::from_millis(1000);
const WORKER_JOIN_POLL: Duration = Duration::from_millis(5);

/// Change metadata of one acquired frame, in monitor coordinates.
#[derive(Default)]
struct FrameMetadata {
    buffer: Vec<u8>,
    moved: Vec<Rect>,
    dirty: Vec<Rect>,
}

impl FrameMetadata {
    fn read(
        &mut self,
        duplication: &IDXGIOutputDuplication,
        info: &DXGI_OUTDUPL_FRAME_INFO,
    ) -> windows::core::Result<()> {
        self.moved.clear();
        self.dirty.clear();
        let total = info.TotalMetadataBufferSize;
        if total == 0 {
            return Ok(());
        }
        if self.buffer.len() < total as usize {
            self.buffer.resize(total as usize, 0);
        }

        let mut used = total;
        unsafe {
            duplication.GetFrameMoveRects(
                total,
                self.buffer.as_mut_ptr() as *mut DXGI_OUTDUPL_MOVE_RECT,
                &mut used,
            )
        }?;
        let count = used as usize / std::mem::size_of::<DXGI_OUTDUPL_MOVE_RECT>();
        let moves = unsafe {
            std::slice::from_raw_parts(self.buffer.as_ptr() as *const DXGI_OUTDUPL_MOVE_RECT, count)
        };
        self.moved
            .extend(moves.iter().map(|entry| to_rect(entry.DestinationRect)));

        let mut used = total;
        unsafe {
            duplication.GetFrameDirtyRects(total, self.buffer.as_mut_ptr() as *mut RECT, &mut used)
        }?;
        let count = used as usize / std::mem::size_of::<RECT>();
        let dirty =
            unsafe { std::slice::from_raw_parts(self.buffer.as_ptr() as *const RECT, count) };
        self.dirty.extend(dirty.iter().copied().map(to_rect));
        Ok(())
    }
}

/// State moved onto the duplication thread.
struct DuplicationWorker {
    duplication: IDXGIOutputDuplication,
    producer: SharedFrameProducer<D3D11BridgeWriter>,
    stop: Arc<AtomicBool>,
}

// SAFETY: the duplication interface and the secondary device context are
// used exclusively by the worker thread after the move.
unsafe impl Send for DuplicationWorker {}

impl DuplicationWorker {
    fn run(mut self) {
        let timeout_ms = duplication_timeout().as_millis().min(u128::from(u32::MAX)) as u32;
        let mut metadata = FrameMetadata::default();
        let mut holding_frame = false;

        while !self.stop.load(Ordering::Acquire) {
            if holding_frame {
                let _ = unsafe { self.duplication.ReleaseFrame() };
                holding_frame = false;
            }

            let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource: Option<IDXGIResource> = None;
            match unsafe { self.duplication.AcquireNextFrame(timeout_ms, &mut info, &mut resource) }
            {
                Ok(()) => holding_frame = true,
                Err(err) if err.code() == DXGI_ERROR_WAIT_TIMEOUT => continue,
                Err(err) if err.code() == DXGI_ERROR_ACCESS_LOST => {
                    log::error!("desktop duplication access was lost");
                    self.producer.close();
                    break;
                }
                Err(err) => {
                    log::error!("AcquireNextFrame failed: {err}");
                    continue;
                }
            }

            if let Err(err) = metadata.read(&self.duplication, &info) {
                log::error!("failed to read duplication metadata: {err}");
                continue;
            }

            let Some(texture) = resource.and_then(|res| res.cast::<ID3D11Texture2D>().ok())
            else {
                continue;
            };
            self.producer.writer_mut().set_source(texture);
            if let Err(err) = self
                .producer
                .publish_if_changed(&metadata.moved, &metadata.dirty)
            {
                log::warn!("failed to publish a duplicated frame: {err}");
            }
            self.producer.writer_mut().clear_source();
        }

        if holding_frame {
            let _ = unsafe { self.duplication.ReleaseFrame() };
        }
        log::debug!("desktop duplication worker exited");
    }
}

/// Duplicates the monitor showing the source window on a background thread
/// and publishes frames whose change metadata touches the window.
pub(crate) struct DesktopDuplicationSource {
    consumer: SharedFrameConsumer<D3D12BridgeReader>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    size: Size,
}

impl DesktopDuplicationSource {
    pub(crate) fn new(
        source: HWND,
        host: HWND,
        device: &mut D3D12DeviceContext,
    ) -> MagnifyResult<Self> {
        window::require_build(window::DESKTOP_DUPLICATION_MIN_BUILD, "desktop duplication")?;

        window::center_on_work_area(source)?;
        let client = window::client_rect_on_screen(source)?;
        let monitor = window::monitor_of(source)?;
        if !monitor.bounds.contains(&client) {
            return Err(MagnifyError::Initialization(
                "source window spans more than one monitor".to_string(),
            ));
        }
        let tracked = validate_crop(client.relative_to(&monitor.bounds))?;
        let size = tracked.size().ok_or_else(|| {
            MagnifyError::Geometry("source window has an empty client area".to_string())
        })?;

        let secondary = d3d11::create_secondary_device(device.adapter())
            .map_err(MagnifyError::Platform)?;
        let output = shared::create_output_texture(device.device(), size)?;
        let pair = SharedTexturePair::new(device.device(), &secondary.device, size)?;

        let output1: IDXGIOutput1 =
            adapter::find_output(device.factory(), device.adapter(), monitor.handle)?
                .ok_or_else(|| {
                    MagnifyError::Initialization(
                        "no DXGI output shows the source window's monitor".to_string(),
                    )
                })?
                .cast()
                .context("failed to query IDXGIOutput1")
                .map_err(MagnifyError::Platform)?;
        let duplication = unsafe { output1.DuplicateOutput(&secondary.device) }
            .map_err(|err| MagnifyError::Initialization(format!("DuplicateOutput failed: {err}")))?;

        window::exclude_from_capture(host)?;

        let (writer, reader) = pair.into_bridge(secondary.context.clone(), output);
        let signal = FrameSignal::new();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = DuplicationWorker {
            duplication,
            producer: SharedFrameProducer::new(writer, signal.clone(), tracked),
            stop: stop.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("snow-magnify-duplication".to_string())
            .spawn(move || worker.run())
            .map_err(|err| {
                MagnifyError::Platform(anyhow::anyhow!(
                    "failed to spawn the desktop duplication thread: {err}"
                ))
            })?;

        log::info!(
            "desktop duplication started for a {}x{} region at ({}, {})",
            size.width,
            size.height,
            tracked.left,
            tracked.top
        );
        Ok(Self {
            consumer: SharedFrameConsumer::new(signal, reader),
            stop,
            worker: Some(handle),
            size,
        })
    }
}

impl FrameSource<D3D12DeviceContext> for DesktopDuplicationSource {
    fn kind(&self) -> FrameSourceKind {
        FrameSourceKind::DesktopDuplication
    }

    fn source_size(&self) -> Size {
        self.size
    }

    fn capture_frame(&mut self, device: &mut D3D12DeviceContext) -> MagnifyResult<UpdateState> {
        self.consumer.capture(device)
    }

    fn output(&self) -> &ID3D12Resource {
        self.consumer.reader().output()
    }

    fn is_screen_capture(&self) -> bool {
        true
    }

    fn has_rounded_corners(&self) -> bool {
        true
    }
}

impl Drop for DesktopDuplicationSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        let Some(handle) = self.worker.take() else {
            return;
        };
        let deadline = Instant::now() + WORKER_JOIN_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(WORKER_JOIN_POLL);
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            log::warn!("desktop duplication thread did not exit in time, detaching it");
        }
    }
}
