use std::fmt;

#[derive(Debug)]
pub enum MagnifyError {
    /// Device, swap chain, frame source or effect setup failed.
    Initialization(String),

    /// Source rectangle resolution or cropping failed.
    Geometry(String),

    /// A single capture attempt failed; the next tick may succeed.
    TransientCapture(String),

    /// The frame source can no longer produce frames.
    FatalCapture(String),

    ConfigValidation(String),

    /// Vsync off was requested but the adapter cannot present with tearing.
    VsyncOffUnsupported,

    DeviceLost,

    Timeout,

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Initialization,
    Geometry,
    TransientCapture,
    FatalCapture,
    ConfigValidation,
}

/// Reason surfaced to the user when a session fails to start or stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorReason {
    CaptureFailed,
    CropFailed,
    VsyncOffNotSupported,
    Generic,
}

impl MagnifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Initialization(_)
            | Self::VsyncOffUnsupported
            | Self::DeviceLost
            | Self::Platform(_) => ErrorKind::Initialization,
            Self::Geometry(_) => ErrorKind::Geometry,
            Self::TransientCapture(_) | Self::Timeout => ErrorKind::TransientCapture,
            Self::FatalCapture(_) => ErrorKind::FatalCapture,
            Self::ConfigValidation(_) => ErrorKind::ConfigValidation,
        }
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientCapture)
    }

    pub fn reason(&self) -> ErrorReason {
        match self {
            Self::Geometry(_) => ErrorReason::CropFailed,
            Self::VsyncOffUnsupported => ErrorReason::VsyncOffNotSupported,
            Self::TransientCapture(_) | Self::FatalCapture(_) | Self::Timeout => {
                ErrorReason::CaptureFailed
            }
            _ => ErrorReason::Generic,
        }
    }

    /// Flattens the error into a `FatalCapture`, keeping the message.
    pub(crate) fn into_fatal_capture(self) -> Self {
        match self {
            Self::FatalCapture(_) => self,
            other => Self::FatalCapture(format!("{other:#}")),
        }
    }
}

impl fmt::Display for MagnifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialization(message) => write!(f, "initialization failed: {message}"),
            Self::Geometry(message) => write!(f, "invalid source geometry: {message}"),
            Self::TransientCapture(message) => write!(f, "capture attempt failed: {message}"),
            Self::FatalCapture(message) => write!(f, "frame source stopped: {message}"),
            Self::ConfigValidation(message) => write!(f, "invalid configuration: {message}"),
            Self::VsyncOffUnsupported => {
                write!(f, "vsync off requires tearing support, which this adapter lacks")
            }
            Self::DeviceLost => write!(f, "graphics device was removed or reset"),
            Self::Timeout => write!(f, "timed out waiting for a frame"),
            Self::Platform(inner) => {
                if f.alternate() {
                    write!(f, "{inner:#}")
                } else {
                    write!(f, "{inner}")
                }
            }
        }
    }
}

impl std::error::Error for MagnifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type MagnifyResult<T> = Result<T, MagnifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_covers_every_variant() {
        assert_eq!(
            MagnifyError::VsyncOffUnsupported.kind(),
            ErrorKind::Initialization
        );
        assert_eq!(MagnifyError::DeviceLost.kind(), ErrorKind::Initialization);
        assert_eq!(MagnifyError::Timeout.kind(), ErrorKind::TransientCapture);
        assert_eq!(
            MagnifyError::Platform(anyhow::anyhow!("boom")).kind(),
            ErrorKind::Initialization
        );
        assert_eq!(
            MagnifyError::ConfigValidation("x".into()).kind(),
            ErrorKind::ConfigValidation
        );
    }

    #[test]
    fn only_transient_capture_is_retryable() {
        assert!(MagnifyError::TransientCapture("dwm".into()).is_retryable());
        assert!(MagnifyError::Timeout.is_retryable());
        assert!(MagnifyError::FatalCapture("closed".into()).is_fatal());
        assert!(MagnifyError::Geometry("empty".into()).is_fatal());
    }

    #[test]
    fn reasons_match_user_facing_categories() {
        assert_eq!(
            MagnifyError::Geometry("negative".into()).reason(),
            ErrorReason::CropFailed
        );
        assert_eq!(
            MagnifyError::VsyncOffUnsupported.reason(),
            ErrorReason::VsyncOffNotSupported
        );
        assert_eq!(
            MagnifyError::FatalCapture("gone".into()).reason(),
            ErrorReason::CaptureFailed
        );
        assert_eq!(
            MagnifyError::Initialization("no adapter".into()).reason(),
            ErrorReason::Generic
        );
    }

    #[test]
    fn fatal_capture_conversion_keeps_message() {
        let err = MagnifyError::TransientCapture("surface busy".into()).into_fatal_capture();
        assert_eq!(err.kind(), ErrorKind::FatalCapture);
        assert!(err.to_string().contains("surface busy"));
    }
}
