use anyhow::{Context, Result};
use windows::Win32::Graphics::Direct3D::{D3D_DRIVER_TYPE_UNKNOWN, D3D_FEATURE_LEVEL_11_0};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION, D3D11CreateDevice, ID3D11Device,
    ID3D11Device5, ID3D11DeviceContext, ID3D11DeviceContext4,
};
use windows::Win32::Graphics::Direct3D11on12::{D3D11On12CreateDevice, ID3D11On12Device};
use windows::Win32::Graphics::Direct3D12::{ID3D12CommandQueue, ID3D12Device};
use windows::Win32::Graphics::Dxgi::{IDXGIAdapter, IDXGIAdapter1};
use windows::core::{IUnknown, Interface};

/// Secondary D3D11 device used by the capture producers. The fence-capable
/// interfaces are required to signal the shared bridge fence.
pub(crate) struct SecondaryDevice {
    pub(crate) device: ID3D11Device5,
    pub(crate) context: ID3D11DeviceContext4,
}

/// Creates a free-threaded D3D11 device on the renderer's adapter. Capture
/// callbacks touch the device from a thread other than the creator's, so
/// the single-threaded flag is never set.
pub(crate) fn create_secondary_device(adapter: &IDXGIAdapter1) -> Result<SecondaryDevice> {
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;
    let feature_levels = [D3D_FEATURE_LEVEL_11_0];
    let adapter: IDXGIAdapter = adapter.cast().context("adapter is not an IDXGIAdapter")?;

    unsafe {
        D3D11CreateDevice(
            &adapter,
            D3D_DRIVER_TYPE_UNKNOWN,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            Some(&feature_levels),
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )
    }
    .context("D3D11CreateDevice failed")?;

    let device = device.context("D3D11CreateDevice did not return a device")?;
    let context = context.context("D3D11CreateDevice did not return a device context")?;
    Ok(SecondaryDevice {
        device: device
            .cast()
            .context("D3D11 device does not expose ID3D11Device5")?,
        context: context
            .cast()
            .context("D3D11 context does not expose ID3D11DeviceContext4")?,
    })
}

/// D3D11 device layered over the render device, submitting to its queue.
pub(crate) struct LayeredDevice {
    pub(crate) device: ID3D11Device,
    pub(crate) context: ID3D11DeviceContext,
    pub(crate) on12: ID3D11On12Device,
}

pub(crate) fn create_layered_device(
    device: &ID3D12Device,
    queue: &ID3D12CommandQueue,
) -> Result<LayeredDevice> {
    let queues: [Option<IUnknown>; 1] = [Some(queue.cast().context("queue is not an IUnknown")?)];
    let mut layered: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;

    unsafe {
        D3D11On12CreateDevice(
            device,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT.0 as u32,
            None,
            Some(&queues),
            0,
            Some(&mut layered),
            Some(&mut context),
            None,
        )
    }
    .context("D3D11On12CreateDevice failed")?;

    let device = layered.context("D3D11On12CreateDevice did not return a device")?;
    let context = context.context("D3D11On12CreateDevice did not return a device context")?;
    let on12 = device
        .cast()
        .context("layered device does not expose ID3D11On12Device")?;
    Ok(LayeredDevice {
        device,
        context,
        on12,
    })
}
