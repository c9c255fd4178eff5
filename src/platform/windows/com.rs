use anyhow::Context;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::System::WinRT::{RO_INIT_MULTITHREADED, RoInitialize, RoUninitialize};

use crate::error::{MagnifyError, MagnifyResult};

/// Keeps the calling thread in the multithreaded Windows Runtime apartment
/// while graphics-capture objects are alive on it.
pub(crate) struct ApartmentGuard {
    should_uninit: bool,
}

impl ApartmentGuard {
    pub(crate) fn enter_multithreaded() -> MagnifyResult<Self> {
        match unsafe { RoInitialize(RO_INIT_MULTITHREADED) } {
            Ok(()) => Ok(Self {
                should_uninit: true,
            }),
            // Thread already lives in a single-threaded apartment owned by the host.
            Err(err) if err.code() == RPC_E_CHANGED_MODE => Ok(Self {
                should_uninit: false,
            }),
            Err(err) => Err(err)
                .context("RoInitialize(RO_INIT_MULTITHREADED) failed")
                .map_err(MagnifyError::Platform),
        }
    }
}

impl Drop for ApartmentGuard {
    fn drop(&mut self) {
        if self.should_uninit {
            unsafe {
                RoUninitialize();
            }
        }
    }
}
