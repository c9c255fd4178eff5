use std::ffi::c_void;

use windows::Win32::Foundation::{BOOL, HANDLE, HWND};
use windows::Win32::Graphics::Direct3D12::{
    D3D12_BOX, D3D12_RESOURCE_STATE_COMMON, D3D12_RESOURCE_STATE_COPY_SOURCE, ID3D12Resource,
};
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows::core::{s, w};

use crate::error::{MagnifyError, MagnifyResult};
use crate::frame_source::{FrameSource, FrameSourceKind, UpdateState};
use crate::geometry::{Rect, Size, validate_crop};

use super::device::{D3D12DeviceContext, subresource_location};
use super::shared;
use super::window;

/// Undocumented user32 export that returns the compositor's shared surface
/// for a window.
type DwmGetDxSharedSurfaceFn = unsafe extern "system" fn(
    hwnd: HWND,
    surface: *mut HANDLE,
    adapter_luid: *mut c_void,
    format: *mut u32,
    present_flags: *mut u32,
    update_id: *mut u64,
) -> BOOL;

fn load_shared_surface_query() -> MagnifyResult<DwmGetDxSharedSurfaceFn> {
    let user32 = unsafe { GetModuleHandleW(w!("user32.dll")) }.map_err(|err| {
        MagnifyError::Initialization(format!("user32.dll is not loaded: {err}"))
    })?;
    let proc = unsafe { GetProcAddress(user32, s!("DwmGetDxSharedSurface")) }.ok_or_else(|| {
        MagnifyError::Initialization("DwmGetDxSharedSurface is not exported by user32".into())
    })?;
    // SAFETY: the export has had this signature since it first shipped.
    Ok(unsafe { std::mem::transmute::<_, DwmGetDxSharedSurfaceFn>(proc) })
}

/// Opens the compositor's surface for the source window each frame and
/// copies the client region out of it.
pub(crate) struct DwmSharedSurfaceSource {
    source: window::SendHwnd,
    query: DwmGetDxSharedSurfaceFn,
    frame_box: D3D12_BOX,
    size: Size,
    output: ID3D12Resource,
    surface: Option<ID3D12Resource>,
}

impl DwmSharedSurfaceSource {
    pub(crate) fn new(source: HWND, device: &mut D3D12DeviceContext) -> MagnifyResult<Self> {
        let query = load_shared_surface_query()?;

        let client = window::client_rect_on_screen(source)?;
        let mapping = window::dpi_mapping(source).ok_or_else(|| {
            MagnifyError::Initialization("failed to read the source window DPI".to_string())
        })?;
        window::log_dpi_scale(&mapping);
        let frame_rect = validate_crop(mapping.map_rect(&client))?;
        let size = frame_rect.size().ok_or_else(|| {
            MagnifyError::Geometry("source window has an empty client area".to_string())
        })?;
        let output = shared::create_output_texture(device.device(), size)?;

        log::info!(
            "sharing the compositor surface, {}x{} at ({}, {})",
            size.width,
            size.height,
            frame_rect.left,
            frame_rect.top
        );
        Ok(Self {
            source: window::SendHwnd(source),
            query,
            frame_box: copy_box(&frame_rect),
            size,
            output,
            surface: None,
        })
    }

    fn open_surface(&self, device: &D3D12DeviceContext) -> MagnifyResult<ID3D12Resource> {
        let mut handle = HANDLE::default();
        let found = unsafe {
            (self.query)(
                self.source.0,
                &mut handle,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if !found.as_bool() || handle.is_invalid() || handle.0.is_null() {
            return Err(MagnifyError::TransientCapture(
                "DwmGetDxSharedSurface returned no surface".to_string(),
            ));
        }

        let mut surface: Option<ID3D12Resource> = None;
        unsafe { device.device().OpenSharedHandle(handle, &mut surface) }.map_err(|err| {
            MagnifyError::TransientCapture(format!("OpenSharedHandle failed: {err}"))
        })?;
        surface.ok_or_else(|| {
            MagnifyError::TransientCapture("OpenSharedHandle returned no resource".to_string())
        })
    }
}

fn copy_box(rect: &Rect) -> D3D12_BOX {
    D3D12_BOX {
        left: rect.left as u32,
        top: rect.top as u32,
        front: 0,
        right: rect.right as u32,
        bottom: rect.bottom as u32,
        back: 1,
    }
}

impl FrameSource<D3D12DeviceContext> for DwmSharedSurfaceSource {
    fn kind(&self) -> FrameSourceKind {
        FrameSourceKind::DwmSharedSurface
    }

    fn source_size(&self) -> Size {
        self.size
    }

    fn capture_frame(&mut self, device: &mut D3D12DeviceContext) -> MagnifyResult<UpdateState> {
        self.release_frame();
        let surface = self.open_surface(device)?;

        device.record_transition(
            &surface,
            D3D12_RESOURCE_STATE_COMMON,
            D3D12_RESOURCE_STATE_COPY_SOURCE,
        );
        shared::copy_into_output(device, &self.output, |device| unsafe {
            device.command_list().CopyTextureRegion(
                &subresource_location(&self.output),
                0,
                0,
                0,
                &subresource_location(&surface),
                Some(&self.frame_box),
            );
        });
        device.record_transition(
            &surface,
            D3D12_RESOURCE_STATE_COPY_SOURCE,
            D3D12_RESOURCE_STATE_COMMON,
        );

        device.retire(surface.clone());
        self.surface = Some(surface);
        Ok(UpdateState::NewFrame)
    }

    fn output(&self) -> &ID3D12Resource {
        &self.output
    }

    fn release_frame(&mut self) {
        self.surface = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_box_spans_the_cropped_region() {
        let frame_box = copy_box(&Rect::new(8, 31, 808, 631));
        assert_eq!((frame_box.left, frame_box.top), (8, 31));
        assert_eq!((frame_box.right, frame_box.bottom), (808, 631));
        assert_eq!((frame_box.front, frame_box.back), (0, 1));
    }
}
