use std::sync::{Arc, Mutex};

use anyhow::Context;
use windows::Foundation::{EventRegistrationToken, TypedEventHandler};
use windows::Graphics::Capture::{
    Direct3D11CaptureFrame, Direct3D11CaptureFramePool, GraphicsCaptureItem,
    GraphicsCaptureSession,
};
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Graphics::SizeInt32;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11Texture2D};
use windows::Win32::Graphics::Direct3D12::ID3D12Resource;
use windows::Win32::Graphics::Dxgi::IDXGIDevice;
use windows::Win32::Graphics::Gdi::HMONITOR;
use windows::Win32::System::WinRT::Direct3D11::{
    CreateDirect3D11DeviceFromDXGIDevice, IDirect3DDxgiInterfaceAccess,
};
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;
use windows::core::{IInspectable, Interface};

use crate::env_config::graphics_capture_wait;
use crate::error::{MagnifyError, MagnifyResult};
use crate::frame_source::{
    CaptureTargetStage, FrameSource, FrameSourceKind, UpdateState, resolve_capture_target,
};
use crate::geometry::{Rect, Size, validate_crop};
use crate::sync::{FrameSignal, SharedFrameConsumer, SharedFrameProducer};

use super::d3d11;
use super::device::D3D12DeviceContext;
use super::shared::{self, D3D11BridgeWriter, D3D12BridgeReader, SharedTexturePair};
use super::window::{self, AppWindowStyle};

const FRAME_POOL_BUFFERS: i32 = 1;

type SharedProducer = Arc<Mutex<SharedFrameProducer<D3D11BridgeWriter>>>;

fn create_winrt_device(device: &ID3D11Device) -> MagnifyResult<IDirect3DDevice> {
    let dxgi_device: IDXGIDevice = device
        .cast()
        .context("failed to cast ID3D11Device to IDXGIDevice")
        .map_err(MagnifyError::Platform)?;
    let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device) }
        .context("CreateDirect3D11DeviceFromDXGIDevice failed")
        .map_err(MagnifyError::Platform)?;
    inspectable
        .cast()
        .context("failed to cast IInspectable to IDirect3DDevice")
        .map_err(MagnifyError::Platform)
}

fn create_window_capture_item(window: HWND) -> MagnifyResult<GraphicsCaptureItem> {
    let interop = windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()
        .context("failed to get IGraphicsCaptureItemInterop factory")
        .map_err(MagnifyError::Platform)?;
    unsafe { interop.CreateForWindow(window) }
        .context("IGraphicsCaptureItemInterop::CreateForWindow failed")
        .map_err(MagnifyError::Platform)
}

fn create_monitor_capture_item(monitor: HMONITOR) -> MagnifyResult<GraphicsCaptureItem> {
    let interop = windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()
        .context("failed to get IGraphicsCaptureItemInterop factory")
        .map_err(MagnifyError::Platform)?;
    unsafe { interop.CreateForMonitor(monitor) }
        .context("IGraphicsCaptureItemInterop::CreateForMonitor failed")
        .map_err(MagnifyError::Platform)
}

fn validate_support() -> MagnifyResult<()> {
    window::require_build(window::GRAPHICS_CAPTURE_MIN_BUILD, "graphics capture")?;
    let supported = GraphicsCaptureSession::IsSupported()
        .context("GraphicsCaptureSession::IsSupported failed")
        .map_err(MagnifyError::Platform)?;
    if supported {
        Ok(())
    } else {
        Err(MagnifyError::Initialization(
            "graphics capture is not supported on this system".into(),
        ))
    }
}

fn frame_texture(frame: &Direct3D11CaptureFrame) -> windows::core::Result<ID3D11Texture2D> {
    let access: IDirect3DDxgiInterfaceAccess = frame.Surface()?.cast()?;
    unsafe { access.GetInterface() }
}

/// A running capture session. Handlers are removed and the session closed
/// on drop.
struct CaptureSession {
    item: GraphicsCaptureItem,
    frame_pool: Direct3D11CaptureFramePool,
    session: GraphicsCaptureSession,
    frame_arrived_token: EventRegistrationToken,
    closed_token: EventRegistrationToken,
}

impl CaptureSession {
    /// Starts capturing `item`. Every arriving frame copies `frame_box` into
    /// the shared texture and publishes it.
    fn start(
        winrt_device: &IDirect3DDevice,
        item: GraphicsCaptureItem,
        frame_box: Rect,
        producer: &SharedProducer,
        signal: &Arc<FrameSignal>,
    ) -> MagnifyResult<Self> {
        producer
            .lock()
            .map_err(|_| MagnifyError::Platform(anyhow::anyhow!("frame producer lock poisoned")))?
            .retarget(frame_box);

        let frame_pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            winrt_device,
            DirectXPixelFormat::B8G8R8A8UIntNormalized,
            FRAME_POOL_BUFFERS,
            SizeInt32 {
                Width: frame_box.right,
                Height: frame_box.bottom,
            },
        )
        .context("Direct3D11CaptureFramePool::CreateFreeThreaded failed")
        .map_err(MagnifyError::Platform)?;
        let session = frame_pool
            .CreateCaptureSession(&item)
            .context("Direct3D11CaptureFramePool::CreateCaptureSession failed")
            .map_err(MagnifyError::Platform)?;
        // Best effort: neither setter exists on every OS build.
        let _ = session.SetIsCursorCaptureEnabled(false);
        let _ = session.SetIsBorderRequired(false);

        let producer_for_frames = producer.clone();
        let frame_arrived_token = frame_pool
            .FrameArrived(
                &TypedEventHandler::<Direct3D11CaptureFramePool, IInspectable>::new(
                    move |sender, _| {
                        if let Some(pool) = sender {
                            publish_newest_frame(pool, &producer_for_frames);
                        }
                        Ok(())
                    },
                ),
            )
            .context("Direct3D11CaptureFramePool::FrameArrived registration failed")
            .map_err(MagnifyError::Platform)?;

        let signal_for_closed = signal.clone();
        let closed_token = item
            .Closed(
                &TypedEventHandler::<GraphicsCaptureItem, IInspectable>::new(move |_, _| {
                    log::warn!("the captured item was closed");
                    signal_for_closed.close();
                    Ok(())
                }),
            )
            .context("GraphicsCaptureItem::Closed registration failed")
            .map_err(MagnifyError::Platform)?;

        let capture = Self {
            item,
            frame_pool,
            session,
            frame_arrived_token,
            closed_token,
        };
        capture
            .session
            .StartCapture()
            .context("GraphicsCaptureSession::StartCapture failed")
            .map_err(MagnifyError::Platform)?;
        Ok(capture)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        let _ = self.frame_pool.RemoveFrameArrived(self.frame_arrived_token);
        let _ = self.item.RemoveClosed(self.closed_token);
        let _ = self.session.Close();
        let _ = self.frame_pool.Close();
    }
}

fn publish_newest_frame(pool: &Direct3D11CaptureFramePool, producer: &SharedProducer) {
    let mut newest: Option<Direct3D11CaptureFrame> = None;
    while let Ok(frame) = pool.TryGetNextFrame() {
        if let Some(previous) = newest.replace(frame) {
            let _ = previous.Close();
        }
    }
    let Some(frame) = newest else {
        return;
    };

    match frame_texture(&frame) {
        Ok(texture) => {
            if let Ok(mut producer) = producer.lock() {
                producer.writer_mut().set_source(texture);
                if let Err(err) = producer.publish_frame() {
                    log::warn!("failed to publish a captured frame: {err}");
                }
                producer.writer_mut().clear_source();
            }
        }
        Err(err) => log::warn!("captured frame has no D3D11 surface: {err}"),
    }
    let _ = frame.Close();
}

struct ResolvedTarget {
    capture: CaptureSession,
    style: Option<AppWindowStyle>,
}

/// Compositor capture of the source window, falling back to a restyled
/// window and finally to the monitor that shows it.
pub(crate) struct GraphicsCaptureSource {
    capture: CaptureSession,
    consumer: SharedFrameConsumer<D3D12BridgeReader>,
    _style: Option<AppWindowStyle>,
    screen_capture: bool,
    size: Size,
}

impl GraphicsCaptureSource {
    pub(crate) fn new(
        source: HWND,
        host: HWND,
        device: &mut D3D12DeviceContext,
    ) -> MagnifyResult<Self> {
        validate_support()?;

        let client = window::client_rect_on_screen(source)?;
        let size = client.size().ok_or_else(|| {
            MagnifyError::Geometry("source window has an empty client area".to_string())
        })?;

        let secondary = d3d11::create_secondary_device(device.adapter())
            .map_err(MagnifyError::Platform)?;
        let winrt_device = create_winrt_device(&secondary.device)?;
        let output = shared::create_output_texture(device.device(), size)?;
        let pair = SharedTexturePair::new(device.device(), &secondary.device, size)?;
        let (writer, reader) = pair.into_bridge(secondary.context.clone(), output);

        let signal = FrameSignal::new();
        let producer: SharedProducer = Arc::new(Mutex::new(SharedFrameProducer::new(
            writer,
            signal.clone(),
            Rect::default(),
        )));

        let resolved = resolve_capture_target(|stage| {
            let (item, frame_box, style) = match stage {
                CaptureTargetStage::Window => {
                    let (item, frame_box) = window_target(source, &client)?;
                    (item, frame_box, None)
                }
                CaptureTargetStage::StyledWindow => {
                    let Some(style) = AppWindowStyle::apply(source) else {
                        return Ok(None);
                    };
                    let (item, frame_box) = window_target(source, &client)?;
                    (item, frame_box, Some(style))
                }
                CaptureTargetStage::Monitor => {
                    let (item, frame_box) = monitor_target(source, host)?;
                    (item, frame_box, None)
                }
            };
            let capture = CaptureSession::start(&winrt_device, item, frame_box, &producer, &signal)?;
            Ok(Some(ResolvedTarget { capture, style }))
        })?;

        let screen_capture = resolved.is_screen_capture();
        log::info!(
            "graphics capture started on the {} ({}x{})",
            resolved.stage.as_str(),
            size.width,
            size.height
        );
        let ResolvedTarget { capture, style } = resolved.value;
        Ok(Self {
            capture,
            consumer: SharedFrameConsumer::new(signal, reader),
            _style: style,
            screen_capture,
            size,
        })
    }
}

fn window_target(source: HWND, client: &Rect) -> MagnifyResult<(GraphicsCaptureItem, Rect)> {
    let frame = window::extended_frame_bounds(source)?;
    if !frame.contains(client) {
        return Err(MagnifyError::Initialization(format!(
            "client area {client:?} lies outside the window frame {frame:?}"
        )));
    }
    let frame_box = validate_crop(client.relative_to(&frame))?;
    let item = create_window_capture_item(source)?;
    Ok((item, frame_box))
}

fn monitor_target(source: HWND, host: HWND) -> MagnifyResult<(GraphicsCaptureItem, Rect)> {
    window::require_build(
        window::DESKTOP_DUPLICATION_MIN_BUILD,
        "capturing the monitor while excluding the host",
    )?;
    window::center_on_work_area(source)?;
    let client = window::client_rect_on_screen(source)?;
    let monitor = window::monitor_of(source)?;
    if !monitor.bounds.contains(&client) {
        return Err(MagnifyError::Initialization(
            "source window spans more than one monitor".to_string(),
        ));
    }
    let frame_box = validate_crop(client.relative_to(&monitor.bounds))?;
    window::exclude_from_capture(host)?;
    let item = create_monitor_capture_item(monitor.handle)?;
    Ok((item, frame_box))
}

impl FrameSource<D3D12DeviceContext> for GraphicsCaptureSource {
    fn kind(&self) -> FrameSourceKind {
        FrameSourceKind::GraphicsCapture
    }

    fn source_size(&self) -> Size {
        self.size
    }

    fn capture_frame(&mut self, device: &mut D3D12DeviceContext) -> MagnifyResult<UpdateState> {
        self.consumer.capture_with_wait(device, graphics_capture_wait())
    }

    fn output(&self) -> &ID3D12Resource {
        self.consumer.reader().output()
    }

    fn is_screen_capture(&self) -> bool {
        self.screen_capture
    }

    fn has_rounded_corners(&self) -> bool {
        true
    }
}
