//! Real-time window magnifier runtime.
//!
//! A [`Session`] captures a source window through one of several frame
//! sources, runs a configurable GPU effect chain over each new frame, and
//! presents the result centered in a host window.

pub mod config;
pub mod device;
pub mod effect;
pub(crate) mod env_config;
pub mod error;
pub mod frame_source;
pub mod geometry;
mod platform;
pub mod renderer;
pub mod session;
pub mod statistics;
pub mod sync;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{IdlePolicy, SessionConfig};
pub use effect::{EffectPlan, EffectRecord, KernelRegistry};
pub use error::{ErrorKind, ErrorReason, MagnifyError, MagnifyResult};
pub use frame_source::{FrameSourceKind, FrameSourcePolicy, UpdateState};
pub use geometry::{Placement, Rect, Size};
pub use platform::NativePlatform;
pub use session::{Session, SessionBuilder, SessionPlatform, TickOutcome};
pub use window::WindowId;

/// Starts a magnifier session for `source`, presenting into `host`.
pub fn magnify(
    source: WindowId,
    host: WindowId,
    config: SessionConfig,
) -> MagnifyResult<Session<NativePlatform>> {
    SessionBuilder::new(source, host).with_config(config).build()
}
