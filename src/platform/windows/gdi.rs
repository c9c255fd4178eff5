use anyhow::Context;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_RESOURCE_MISC_GDI_COMPATIBLE,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT, ID3D11DeviceContext, ID3D11Resource,
    ID3D11Texture2D,
};
use windows::Win32::Graphics::Direct3D11on12::{D3D11_RESOURCE_FLAGS, ID3D11On12Device};
use windows::Win32::Graphics::Direct3D12::ID3D12Resource;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::IDXGISurface1;
use windows::Win32::Graphics::Gdi::{
    BitBlt, DCX_LOCKWINDOWUPDATE, DCX_WINDOW, GetDCEx, HRGN, ReleaseDC, SRCCOPY,
};
use windows::core::Interface;

use crate::error::{MagnifyError, MagnifyResult};
use crate::frame_source::{FrameSource, FrameSourceKind, UpdateState};
use crate::geometry::{Rect, Size, validate_crop};

use super::d3d11;
use super::device::D3D12DeviceContext;
use super::shared::{self, OUTPUT_RESTING_STATE};
use super::window;

/// Blits the source window's device context into a GDI-compatible texture
/// and copies it into the output through a layered D3D11 device on the
/// render queue.
pub(crate) struct GdiSource {
    source: window::SendHwnd,
    frame_rect: Rect,
    size: Size,
    context: ID3D11DeviceContext,
    on12: ID3D11On12Device,
    gdi_texture: ID3D11Texture2D,
    gdi_surface: IDXGISurface1,
    wrapped_output: ID3D11Resource,
    output: ID3D12Resource,
}

impl GdiSource {
    pub(crate) fn new(source: HWND, device: &mut D3D12DeviceContext) -> MagnifyResult<Self> {
        let client = window::client_rect_on_screen(source)?;
        let mapping = match window::dpi_mapping(source) {
            Some(mapping) => {
                window::log_dpi_scale(&mapping);
                mapping
            }
            None => {
                log::warn!("failed to read the source window DPI, assuming a scale of 1");
                window::identity_window_mapping(source)?
            }
        };
        let frame_rect = validate_crop(mapping.map_rect(&client))?;
        let size = frame_rect.size().ok_or_else(|| {
            MagnifyError::Geometry("source window has an empty client area".to_string())
        })?;

        let layered = d3d11::create_layered_device(device.device(), device.queue())
            .map_err(MagnifyError::Platform)?;
        let output = shared::create_output_texture(device.device(), size)?;

        let desc = D3D11_TEXTURE2D_DESC {
            Width: size.width,
            Height: size.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_SHADER_RESOURCE.0 | D3D11_BIND_RENDER_TARGET.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: D3D11_RESOURCE_MISC_GDI_COMPATIBLE.0 as u32,
        };
        let mut gdi_texture: Option<ID3D11Texture2D> = None;
        unsafe { layered.device.CreateTexture2D(&desc, None, Some(&mut gdi_texture)) }
            .map_err(|err| {
                MagnifyError::Initialization(format!(
                    "failed to create the GDI-compatible texture: {err}"
                ))
            })?;
        let gdi_texture = gdi_texture.ok_or_else(|| {
            MagnifyError::Initialization("CreateTexture2D returned no texture".into())
        })?;
        let gdi_surface: IDXGISurface1 = gdi_texture
            .cast()
            .context("GDI-compatible texture does not expose IDXGISurface1")
            .map_err(MagnifyError::Platform)?;

        let flags = D3D11_RESOURCE_FLAGS::default();
        let mut wrapped_output: Option<ID3D11Resource> = None;
        unsafe {
            layered.on12.CreateWrappedResource(
                &output,
                &flags,
                OUTPUT_RESTING_STATE,
                OUTPUT_RESTING_STATE,
                &mut wrapped_output,
            )
        }
        .context("ID3D11On12Device::CreateWrappedResource failed")
        .map_err(MagnifyError::Platform)?;
        let wrapped_output = wrapped_output.ok_or_else(|| {
            MagnifyError::Initialization("CreateWrappedResource returned no resource".into())
        })?;

        log::info!(
            "GDI capture of a {}x{} region at ({}, {}) in window space",
            size.width,
            size.height,
            frame_rect.left,
            frame_rect.top
        );
        Ok(Self {
            source: window::SendHwnd(source),
            frame_rect,
            size,
            context: layered.context,
            on12: layered.on12,
            gdi_texture,
            gdi_surface,
            wrapped_output,
            output,
        })
    }

    fn blit(&self) -> MagnifyResult<()> {
        let target = unsafe { self.gdi_surface.GetDC(true) }.map_err(|err| {
            MagnifyError::TransientCapture(format!("IDXGISurface1::GetDC failed: {err}"))
        })?;

        let hwnd = self.source.0;
        let source_dc = unsafe { GetDCEx(hwnd, HRGN::default(), DCX_LOCKWINDOWUPDATE | DCX_WINDOW) };
        if source_dc.is_invalid() {
            let _ = unsafe { self.gdi_surface.ReleaseDC(None) };
            return Err(MagnifyError::TransientCapture(
                "GetDCEx returned no device context for the source window".to_string(),
            ));
        }

        if let Err(err) = unsafe {
            BitBlt(
                target,
                0,
                0,
                self.frame_rect.width(),
                self.frame_rect.height(),
                source_dc,
                self.frame_rect.left,
                self.frame_rect.top,
                SRCCOPY,
            )
        } {
            log::error!("BitBlt from the source window failed: {err}");
        }

        unsafe {
            ReleaseDC(hwnd, source_dc);
        }
        unsafe { self.gdi_surface.ReleaseDC(None) }
            .map_err(|err| MagnifyError::TransientCapture(format!("ReleaseDC failed: {err}")))
    }
}

impl FrameSource<D3D12DeviceContext> for GdiSource {
    fn kind(&self) -> FrameSourceKind {
        FrameSourceKind::Gdi
    }

    fn source_size(&self) -> Size {
        self.size
    }

    fn capture_frame(&mut self, _device: &mut D3D12DeviceContext) -> MagnifyResult<UpdateState> {
        let wrapped = [Some(self.wrapped_output.clone())];
        unsafe { self.on12.AcquireWrappedResources(&wrapped) };

        let blitted = self.blit();
        if blitted.is_ok() {
            unsafe { self.context.CopyResource(&self.wrapped_output, &self.gdi_texture) };
        }

        unsafe { self.on12.ReleaseWrappedResources(&wrapped) };
        unsafe { self.context.Flush() };

        blitted.map(|()| UpdateState::NewFrame)
    }

    fn output(&self) -> &ID3D12Resource {
        &self.output
    }
}
