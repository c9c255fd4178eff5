use anyhow::Context;
use windows::Wdk::System::SystemServices::RtlGetVersion;
use windows::Win32::Foundation::{HWND, POINT, RECT};
use windows::Win32::Graphics::Dwm::{DWMWA_EXTENDED_FRAME_BOUNDS, DwmGetWindowAttribute};
use windows::Win32::Graphics::Gdi::{
    ClientToScreen, GetMonitorInfoW, HMONITOR, MONITOR_DEFAULTTONEAREST, MONITORINFO,
    MonitorFromWindow,
};
use windows::Win32::System::SystemInformation::OSVERSIONINFOW;
use windows::Win32::UI::HiDpi::{GetDpiForMonitor, GetDpiForWindow, MDT_EFFECTIVE_DPI};
use windows::Win32::UI::WindowsAndMessaging::{
    GWL_EXSTYLE, GetClientRect, GetWindowLongPtrW, GetWindowRect, IsWindow,
    SWP_NOACTIVATE, SWP_NOSIZE, SWP_NOZORDER, SetWindowDisplayAffinity, SetWindowLongPtrW,
    SetWindowPos, WDA_EXCLUDEFROMCAPTURE, WS_EX_APPWINDOW, WS_EX_TOOLWINDOW,
};

use crate::error::{MagnifyError, MagnifyResult};
use crate::geometry::{DpiMapping, Rect, center_in_work_area};
use crate::window::WindowId;

pub(crate) const DESKTOP_DUPLICATION_MIN_BUILD: u32 = 19041;
pub(crate) const GRAPHICS_CAPTURE_MIN_BUILD: u32 = 18362;

/// Wrapper around `HWND` to satisfy `Send`. Window handles are plain
/// integer-sized values that are valid from any thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SendHwnd(pub(crate) HWND);

// SAFETY: see the type documentation.
unsafe impl Send for SendHwnd {}
unsafe impl Sync for SendHwnd {}

pub(crate) fn to_hwnd(window: WindowId) -> HWND {
    HWND(window.raw_handle() as *mut std::ffi::c_void)
}

pub(crate) fn to_rect(rect: RECT) -> Rect {
    Rect::new(rect.left, rect.top, rect.right, rect.bottom)
}

pub(crate) fn ensure_window(hwnd: HWND, role: &str) -> MagnifyResult<()> {
    if hwnd.0.is_null() || !unsafe { IsWindow(hwnd) }.as_bool() {
        return Err(MagnifyError::Initialization(format!(
            "{role} window handle is not a window"
        )));
    }
    Ok(())
}

/// Client area of `hwnd` in screen coordinates.
pub(crate) fn client_rect_on_screen(hwnd: HWND) -> MagnifyResult<Rect> {
    let mut client = RECT::default();
    unsafe { GetClientRect(hwnd, &mut client) }
        .context("GetClientRect failed for the source window")
        .map_err(MagnifyError::Platform)?;
    let mut origin = POINT::default();
    if !unsafe { ClientToScreen(hwnd, &mut origin) }.as_bool() {
        return Err(MagnifyError::Platform(anyhow::anyhow!(
            "ClientToScreen failed for the source window"
        )));
    }
    Ok(to_rect(client).translated(origin.x, origin.y))
}

pub(crate) fn window_rect(hwnd: HWND) -> MagnifyResult<Rect> {
    let mut rect = RECT::default();
    unsafe { GetWindowRect(hwnd, &mut rect) }
        .context("GetWindowRect failed")
        .map_err(MagnifyError::Platform)?;
    Ok(to_rect(rect))
}

/// Visible window bounds without the drop shadow.
pub(crate) fn extended_frame_bounds(hwnd: HWND) -> MagnifyResult<Rect> {
    let mut rect = RECT::default();
    unsafe {
        DwmGetWindowAttribute(
            hwnd,
            DWMWA_EXTENDED_FRAME_BOUNDS,
            &mut rect as *mut RECT as *mut std::ffi::c_void,
            std::mem::size_of::<RECT>() as u32,
        )
    }
    .context("DwmGetWindowAttribute(DWMWA_EXTENDED_FRAME_BOUNDS) failed")
    .map_err(MagnifyError::Platform)?;
    Ok(to_rect(rect))
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct MonitorArea {
    pub(crate) handle: HMONITOR,
    pub(crate) bounds: Rect,
    pub(crate) work_area: Rect,
}

pub(crate) fn monitor_of(hwnd: HWND) -> MagnifyResult<MonitorArea> {
    let handle = unsafe { MonitorFromWindow(hwnd, MONITOR_DEFAULTTONEAREST) };
    let mut info = MONITORINFO {
        cbSize: std::mem::size_of::<MONITORINFO>() as u32,
        ..Default::default()
    };
    if !unsafe { GetMonitorInfoW(handle, &mut info) }.as_bool() {
        return Err(MagnifyError::Platform(anyhow::anyhow!(
            "GetMonitorInfoW failed for the source window's monitor"
        )));
    }
    Ok(MonitorArea {
        handle,
        bounds: to_rect(info.rcMonitor),
        work_area: to_rect(info.rcWork),
    })
}

/// Moves `hwnd` so it lies fully inside its monitor's work area. Returns
/// whether the window was moved.
pub(crate) fn center_on_work_area(hwnd: HWND) -> MagnifyResult<bool> {
    let window = window_rect(hwnd)?;
    let monitor = monitor_of(hwnd)?;
    let Some(target) = center_in_work_area(&window, &monitor.work_area) else {
        return Ok(false);
    };
    unsafe {
        SetWindowPos(
            hwnd,
            HWND::default(),
            target.left,
            target.top,
            0,
            0,
            SWP_NOSIZE | SWP_NOZORDER | SWP_NOACTIVATE,
        )
    }
    .context("SetWindowPos failed while centering the source window")
    .map_err(MagnifyError::Platform)?;
    log::info!("moved the source window into the work area at ({}, {})", target.left, target.top);
    Ok(true)
}

/// Hides the host from screen capture so it never magnifies itself.
pub(crate) fn exclude_from_capture(host: HWND) -> MagnifyResult<()> {
    unsafe { SetWindowDisplayAffinity(host, WDA_EXCLUDEFROMCAPTURE) }
        .map_err(|err| {
            MagnifyError::Initialization(format!("SetWindowDisplayAffinity failed: {err}"))
        })
}

/// Scale and offset from screen pixels into the window's own device-context
/// space, derived from the window's DPI and the DPI of its monitor.
pub(crate) fn dpi_mapping(hwnd: HWND) -> Option<DpiMapping> {
    let window_dpi = unsafe { GetDpiForWindow(hwnd) };
    let monitor = monitor_of(hwnd).ok()?;
    let (mut dpi_x, mut dpi_y) = (0u32, 0u32);
    unsafe { GetDpiForMonitor(monitor.handle, MDT_EFFECTIVE_DPI, &mut dpi_x, &mut dpi_y) }.ok()?;
    let origin = window_rect(hwnd).ok()?;
    mapping_for(window_dpi, dpi_x, &origin)
}

fn mapping_for(window_dpi: u32, monitor_dpi: u32, window: &Rect) -> Option<DpiMapping> {
    if window_dpi == 0 || monitor_dpi == 0 {
        return None;
    }
    let a = f64::from(window_dpi) / f64::from(monitor_dpi);
    Some(DpiMapping {
        a,
        bx: -f64::from(window.left) * a,
        by: -f64::from(window.top) * a,
    })
}

/// The mapping used when the DPI query fails: the client offset inside the
/// window rectangle at scale 1.
pub(crate) fn identity_window_mapping(hwnd: HWND) -> MagnifyResult<DpiMapping> {
    let window = window_rect(hwnd)?;
    Ok(DpiMapping {
        bx: -f64::from(window.left),
        by: -f64::from(window.top),
        ..DpiMapping::IDENTITY
    })
}

pub(crate) fn log_dpi_scale(mapping: &DpiMapping) {
    if mapping.a > 0.0 {
        log::info!("source window DPI scale is {:.3}", 1.0 / mapping.a);
    }
}

/// Extended style with the tool-window bit swapped for the app-window bit,
/// or `None` when the style already qualifies.
pub(crate) fn app_window_style(ex_style: u32) -> Option<u32> {
    let styled = (ex_style & !WS_EX_TOOLWINDOW.0) | WS_EX_APPWINDOW.0;
    (styled != ex_style).then_some(styled)
}

/// Temporarily restyles a window as an app window. The original extended
/// style comes back on drop.
pub(crate) struct AppWindowStyle {
    hwnd: SendHwnd,
    original: isize,
}

impl AppWindowStyle {
    /// Returns `None` when the window already has the wanted style.
    pub(crate) fn apply(hwnd: HWND) -> Option<Self> {
        let original = unsafe { GetWindowLongPtrW(hwnd, GWL_EXSTYLE) };
        let styled = app_window_style(original as u32)?;
        unsafe { SetWindowLongPtrW(hwnd, GWL_EXSTYLE, styled as isize) };
        log::info!("changed the source window style from {original:#x} to {styled:#x}");
        Some(Self {
            hwnd: SendHwnd(hwnd),
            original,
        })
    }
}

impl Drop for AppWindowStyle {
    fn drop(&mut self) {
        unsafe { SetWindowLongPtrW(self.hwnd.0, GWL_EXSTYLE, self.original) };
    }
}

/// Windows build number from the kernel, unaffected by compatibility shims.
pub(crate) fn os_build_number() -> u32 {
    let mut info = OSVERSIONINFOW {
        dwOSVersionInfoSize: std::mem::size_of::<OSVERSIONINFOW>() as u32,
        ..Default::default()
    };
    let status = unsafe { RtlGetVersion(&mut info) };
    if status.is_err() {
        log::warn!("RtlGetVersion failed: {status:?}");
        return 0;
    }
    info.dwBuildNumber
}

pub(crate) const fn build_at_least(build: u32, required: u32) -> bool {
    build >= required
}

pub(crate) fn require_build(required: u32, feature: &str) -> MagnifyResult<()> {
    let build = os_build_number();
    if build_at_least(build, required) {
        return Ok(());
    }
    Err(MagnifyError::Initialization(format!(
        "{feature} needs Windows build {required} or later (running {build})"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpi_unaware_window_maps_into_scaled_window_space() {
        let window = Rect::new(100, 50, 900, 650);
        let mapping = mapping_for(96, 144, &window).unwrap();
        let client = Rect::new(130, 110, 880, 620);
        let mapped = mapping.map_rect(&client);
        assert_eq!(mapped, Rect::new(20, 40, 520, 380));
    }

    #[test]
    fn aware_window_maps_to_its_own_origin() {
        let window = Rect::new(-1920, 0, -1000, 700);
        let mapping = mapping_for(144, 144, &window).unwrap();
        assert_eq!(
            mapping.map_rect(&Rect::new(-1910, 30, -1010, 690)),
            Rect::new(10, 30, 910, 690)
        );
        assert!(mapping_for(0, 96, &window).is_none());
    }

    #[test]
    fn tool_window_is_restyled_once() {
        let tool = WS_EX_TOOLWINDOW.0 | 0x100;
        let styled = app_window_style(tool).unwrap();
        assert_eq!(styled & WS_EX_TOOLWINDOW.0, 0);
        assert_ne!(styled & WS_EX_APPWINDOW.0, 0);
        assert_eq!(app_window_style(styled), None);
    }

    #[test]
    fn build_gate_compares_inclusively() {
        assert!(build_at_least(19041, DESKTOP_DUPLICATION_MIN_BUILD));
        assert!(!build_at_least(18363, DESKTOP_DUPLICATION_MIN_BUILD));
        assert!(build_at_least(18362, GRAPHICS_CAPTURE_MIN_BUILD));
    }
}
