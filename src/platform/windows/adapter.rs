use anyhow::Context;
use windows::Win32::Foundation::DXGI_ERROR_NOT_FOUND;
use windows::Win32::Graphics::Direct3D::{
    D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_12_0,
    D3D_FEATURE_LEVEL_12_1, D3D_FEATURE_LEVEL_12_2,
};
use windows::Win32::Graphics::Direct3D12::{
    D3D12_FEATURE_DATA_FEATURE_LEVELS, D3D12_FEATURE_FEATURE_LEVELS, D3D12CreateDevice,
    ID3D12Device,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ADAPTER_DESC1, DXGI_ADAPTER_FLAG_SOFTWARE, IDXGIAdapter1, IDXGIFactory4, IDXGIOutput,
};
use windows::Win32::Graphics::Gdi::HMONITOR;

use crate::error::{MagnifyError, MagnifyResult};

/// Which adapter the device context should be created on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AdapterChoice {
    Enumerated(u32),
    Warp,
}

/// Enumeration-time facts about one adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AdapterCandidate {
    pub(crate) index: u32,
    pub(crate) software: bool,
    pub(crate) supports_d3d12: bool,
}

/// Preferred index first, then the first hardware adapter, then WARP.
pub(crate) fn choose_adapter(
    preferred: Option<u32>,
    candidates: &[AdapterCandidate],
) -> AdapterChoice {
    if let Some(index) = preferred
        && candidates
            .iter()
            .any(|candidate| candidate.index == index && candidate.supports_d3d12)
    {
        return AdapterChoice::Enumerated(index);
    }
    candidates
        .iter()
        .find(|candidate| !candidate.software && candidate.supports_d3d12)
        .map_or(AdapterChoice::Warp, |candidate| {
            AdapterChoice::Enumerated(candidate.index)
        })
}

pub(crate) struct SelectedAdapter {
    pub(crate) adapter: IDXGIAdapter1,
    pub(crate) device: ID3D12Device,
}

pub(crate) fn select_adapter(
    factory: &IDXGIFactory4,
    preferred: Option<u32>,
) -> MagnifyResult<SelectedAdapter> {
    let adapters = enumerate_adapters(factory)?;
    let candidates: Vec<AdapterCandidate> = adapters
        .iter()
        .enumerate()
        .map(|(index, (adapter, desc))| AdapterCandidate {
            index: index as u32,
            software: desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0,
            supports_d3d12: supports_d3d12(adapter),
        })
        .collect();

    if let Some(index) = preferred
        && !candidates
            .iter()
            .any(|candidate| candidate.index == index && candidate.supports_d3d12)
    {
        log::warn!("adapter {index} is unavailable or lacks D3D12 support, falling back");
    }

    let adapter = match choose_adapter(preferred, &candidates) {
        AdapterChoice::Enumerated(index) => adapters
            .into_iter()
            .nth(index as usize)
            .map(|(adapter, _)| adapter)
            .ok_or_else(|| {
                MagnifyError::Initialization(format!("adapter {index} disappeared"))
            })?,
        AdapterChoice::Warp => {
            log::warn!("no hardware adapter supports D3D12, using WARP");
            unsafe { factory.EnumWarpAdapter::<IDXGIAdapter1>() }.map_err(|err| {
                MagnifyError::Initialization(format!("WARP adapter is unavailable: {err}"))
            })?
        }
    };

    let desc = unsafe { adapter.GetDesc1() }
        .context("IDXGIAdapter1::GetDesc1 failed")
        .map_err(MagnifyError::Platform)?;
    log::info!(
        "using adapter {} (vendor {:#06x}, device {:#06x})",
        utf16z_to_string(&desc.Description),
        desc.VendorId,
        desc.DeviceId
    );

    let mut device: Option<ID3D12Device> = None;
    unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }.map_err(
        |err| MagnifyError::Initialization(format!("D3D12CreateDevice failed: {err}")),
    )?;
    let device = device
        .ok_or_else(|| MagnifyError::Initialization("D3D12CreateDevice returned no device".into()))?;
    log_max_feature_level(&device);

    Ok(SelectedAdapter { adapter, device })
}

fn enumerate_adapters(
    factory: &IDXGIFactory4,
) -> MagnifyResult<Vec<(IDXGIAdapter1, DXGI_ADAPTER_DESC1)>> {
    let mut adapters = Vec::new();
    let mut adapter_idx = 0u32;
    loop {
        let adapter = match unsafe { factory.EnumAdapters1(adapter_idx) } {
            Ok(adapter) => adapter,
            Err(err) if err.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(err) => {
                return Err(MagnifyError::Platform(
                    anyhow::Error::from(err).context(format!("EnumAdapters1({adapter_idx}) failed")),
                ));
            }
        };
        let desc = unsafe { adapter.GetDesc1() }
            .context("IDXGIAdapter1::GetDesc1 failed")
            .map_err(MagnifyError::Platform)?;
        adapters.push((adapter, desc));
        adapter_idx += 1;
    }
    Ok(adapters)
}

fn supports_d3d12(adapter: &IDXGIAdapter1) -> bool {
    unsafe {
        D3D12CreateDevice(
            adapter,
            D3D_FEATURE_LEVEL_11_0,
            std::ptr::null_mut::<Option<ID3D12Device>>(),
        )
    }
    .is_ok()
}

fn log_max_feature_level(device: &ID3D12Device) {
    let requested: [D3D_FEATURE_LEVEL; 5] = [
        D3D_FEATURE_LEVEL_12_2,
        D3D_FEATURE_LEVEL_12_1,
        D3D_FEATURE_LEVEL_12_0,
        D3D_FEATURE_LEVEL_11_1,
        D3D_FEATURE_LEVEL_11_0,
    ];
    let mut data = D3D12_FEATURE_DATA_FEATURE_LEVELS {
        NumFeatureLevels: requested.len() as u32,
        pFeatureLevelsRequested: requested.as_ptr(),
        MaxSupportedFeatureLevel: D3D_FEATURE_LEVEL_11_0,
    };
    let queried = unsafe {
        device.CheckFeatureSupport(
            D3D12_FEATURE_FEATURE_LEVELS,
            &mut data as *mut _ as *mut std::ffi::c_void,
            std::mem::size_of::<D3D12_FEATURE_DATA_FEATURE_LEVELS>() as u32,
        )
    };
    if queried.is_err() {
        log::warn!("failed to query the maximum feature level");
        return;
    }
    let name = match data.MaxSupportedFeatureLevel {
        D3D_FEATURE_LEVEL_12_2 => "12.2",
        D3D_FEATURE_LEVEL_12_1 => "12.1",
        D3D_FEATURE_LEVEL_12_0 => "12.0",
        D3D_FEATURE_LEVEL_11_1 => "11.1",
        _ => "11.0",
    };
    log::info!("maximum supported feature level: {name}");
}

/// Finds the output showing `monitor`, searching `preferred` first and then
/// every other adapter.
pub(crate) fn find_output(
    factory: &IDXGIFactory4,
    preferred: &IDXGIAdapter1,
    monitor: HMONITOR,
) -> MagnifyResult<Option<IDXGIOutput>> {
    if let Some(output) = output_on_adapter(preferred, monitor)? {
        return Ok(Some(output));
    }
    let preferred_luid = unsafe { preferred.GetDesc1() }
        .map(|desc| desc.AdapterLuid)
        .ok();
    for (adapter, desc) in enumerate_adapters(factory)? {
        if Some(desc.AdapterLuid) == preferred_luid {
            continue;
        }
        if let Some(output) = output_on_adapter(&adapter, monitor)? {
            log::info!(
                "monitor is attached to another adapter ({})",
                utf16z_to_string(&desc.Description)
            );
            return Ok(Some(output));
        }
    }
    Ok(None)
}

fn output_on_adapter(
    adapter: &IDXGIAdapter1,
    monitor: HMONITOR,
) -> MagnifyResult<Option<IDXGIOutput>> {
    let mut output_idx = 0u32;
    loop {
        let output = match unsafe { adapter.EnumOutputs(output_idx) } {
            Ok(output) => output,
            Err(err) if err.code() == DXGI_ERROR_NOT_FOUND => return Ok(None),
            Err(err) => {
                return Err(MagnifyError::Platform(
                    anyhow::Error::from(err).context(format!("EnumOutputs({output_idx}) failed")),
                ));
            }
        };
        let desc = unsafe { output.GetDesc() }
            .context("IDXGIOutput::GetDesc failed")
            .map_err(MagnifyError::Platform)?;
        if desc.Monitor == monitor {
            return Ok(Some(output));
        }
        output_idx += 1;
    }
}

pub(crate) fn utf16z_to_string(input: &[u16]) -> String {
    let len = input.iter().position(|&ch| ch == 0).unwrap_or(input.len());
    String::from_utf16_lossy(&input[..len])
}
