use serde::Deserialize;

use crate::device::RenderDevice;
use crate::error::{ErrorKind, MagnifyError, MagnifyResult};
use crate::geometry::Size;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameSourceKind {
    /// Compositor window capture with window/styled-window/monitor fallback.
    GraphicsCapture,

    /// Full-screen output duplication on a background thread.
    DesktopDuplication,

    /// Per-window compositor surface sharing.
    DwmSharedSurface,

    /// Legacy device-context blit.
    Gdi,
}

impl FrameSourceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GraphicsCapture => "graphics-capture",
            Self::DesktopDuplication => "desktop-duplication",
            Self::DwmSharedSurface => "dwm-shared-surface",
            Self::Gdi => "gdi",
        }
    }
}

pub const DEFAULT_FRAME_SOURCE_PRIORITY: [FrameSourceKind; 4] = [
    FrameSourceKind::GraphicsCapture,
    FrameSourceKind::DesktopDuplication,
    FrameSourceKind::DwmSharedSurface,
    FrameSourceKind::Gdi,
];

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct FrameSourcePolicy {
    pub priority: Vec<FrameSourceKind>,
}

impl FrameSourcePolicy {
    pub fn only(kind: FrameSourceKind) -> Self {
        Self {
            priority: vec![kind],
        }
    }

    pub fn normalized_priority(&self) -> Vec<FrameSourceKind> {
        let mut normalized = Vec::new();
        for kind in &self.priority {
            if !normalized.contains(kind) {
                normalized.push(*kind);
            }
        }
        if normalized.is_empty() {
            normalized.extend(DEFAULT_FRAME_SOURCE_PRIORITY);
        }
        normalized
    }

    /// Variants still to try after `failed` stopped producing frames.
    pub fn remaining_after(&self, failed: FrameSourceKind) -> Vec<FrameSourceKind> {
        let normalized = self.normalized_priority();
        match normalized.iter().position(|kind| *kind == failed) {
            Some(index) => normalized[index + 1..].to_vec(),
            None => Vec::new(),
        }
    }
}

impl Default for FrameSourcePolicy {
    fn default() -> Self {
        Self {
            priority: DEFAULT_FRAME_SOURCE_PRIORITY.to_vec(),
        }
    }
}

/// Result of a successful `capture_frame` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateState {
    /// No frame has been produced yet.
    Waiting,
    /// The output texture still holds the previous frame.
    NoUpdate,
    /// The output texture holds a new frame.
    NewFrame,
}

/// A strategy that yields source-window frames into a GPU texture owned by
/// the render device. Construction is the initialization step; a variant
/// that cannot start returns an error from its constructor.
pub trait FrameSource<D: RenderDevice> {
    fn kind(&self) -> FrameSourceKind;

    /// Size of the output texture, equal to the cropped source region.
    fn source_size(&self) -> Size;

    /// Records any copies into the device's open command list and reports
    /// whether the output changed.
    fn capture_frame(&mut self, device: &mut D) -> MagnifyResult<UpdateState>;

    fn output(&self) -> &D::Texture;

    /// Drops per-frame resources once the frame has been consumed.
    fn release_frame(&mut self) {}

    /// True when the source captures a whole monitor rather than the window.
    fn is_screen_capture(&self) -> bool {
        false
    }

    /// True when frames keep the window's rounded corners and the host
    /// should mask them.
    fn has_rounded_corners(&self) -> bool {
        false
    }
}

/// Tries each variant in priority order. Geometry and configuration errors
/// apply to every variant and stop the search.
pub fn select_with_fallback<T>(
    priority: &[FrameSourceKind],
    mut create: impl FnMut(FrameSourceKind) -> MagnifyResult<T>,
) -> MagnifyResult<(FrameSourceKind, T)> {
    let mut errors: Vec<(FrameSourceKind, MagnifyError)> = Vec::new();

    for kind in priority {
        match create(*kind) {
            Ok(source) => {
                log::info!("using frame source {}", kind.as_str());
                return Ok((*kind, source));
            }
            Err(err)
                if matches!(err.kind(), ErrorKind::Geometry | ErrorKind::ConfigValidation) =>
            {
                return Err(err);
            }
            Err(err) => {
                log::warn!("frame source {} unavailable: {err:#}", kind.as_str());
                errors.push((*kind, err));
            }
        }
    }

    Err(MagnifyError::Initialization(format!(
        "no frame source could be initialized: {}",
        format_source_errors(&errors)
    )))
}

fn format_source_errors(errors: &[(FrameSourceKind, MagnifyError)]) -> String {
    if errors.is_empty() {
        return "no variants to try".to_string();
    }
    let mut combined = String::new();
    for (index, (kind, error)) in errors.iter().enumerate() {
        if index != 0 {
            combined.push_str("; ");
        }
        combined.push_str(kind.as_str());
        combined.push_str(": ");
        combined.push_str(&error.to_string());
    }
    combined
}

/// Target attempted by the compositor capture variant, in fallback order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureTargetStage {
    Window,
    /// The window again, after its extended style was made capturable.
    StyledWindow,
    /// The monitor containing the window, with the host excluded.
    Monitor,
}

impl CaptureTargetStage {
    pub const ORDER: [Self; 3] = [Self::Window, Self::StyledWindow, Self::Monitor];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Window => "window",
            Self::StyledWindow => "styled window",
            Self::Monitor => "monitor",
        }
    }
}

#[derive(Debug)]
pub struct ResolvedCapture<T> {
    pub stage: CaptureTargetStage,
    pub value: T,
}

impl<T> ResolvedCapture<T> {
    pub fn is_screen_capture(&self) -> bool {
        self.stage == CaptureTargetStage::Monitor
    }
}

/// Walks window, styled window, then monitor. `attempt` returns `Ok(None)`
/// to skip a stage that does not apply. Geometry and configuration errors
/// end the walk.
pub fn resolve_capture_target<T>(
    mut attempt: impl FnMut(CaptureTargetStage) -> MagnifyResult<Option<T>>,
) -> MagnifyResult<ResolvedCapture<T>> {
    let mut failures = Vec::new();
    for stage in CaptureTargetStage::ORDER {
        match attempt(stage) {
            Ok(Some(value)) => return Ok(ResolvedCapture { stage, value }),
            Ok(None) => log::debug!("capture target stage {} skipped", stage.as_str()),
            Err(err) if matches!(err.kind(), ErrorKind::Geometry | ErrorKind::ConfigValidation) => {
                return Err(err);
            }
            Err(err) => {
                log::warn!("capturing {} failed: {err:#}", stage.as_str());
                failures.push(format!("{}: {err}", stage.as_str()));
            }
        }
    }
    Err(MagnifyError::Initialization(format!(
        "no capture target could be created ({})",
        failures.join("; ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_priority_drops_duplicates_and_defaults_when_empty() {
        let policy = FrameSourcePolicy {
            priority: vec![
                FrameSourceKind::Gdi,
                FrameSourceKind::Gdi,
                FrameSourceKind::DesktopDuplication,
            ],
        };
        assert_eq!(
            policy.normalized_priority(),
            vec![FrameSourceKind::Gdi, FrameSourceKind::DesktopDuplication]
        );
        let empty = FrameSourcePolicy { priority: vec![] };
        assert_eq!(empty.normalized_priority(), DEFAULT_FRAME_SOURCE_PRIORITY.to_vec());
    }

    #[test]
    fn remaining_after_skips_the_failed_variant() {
        let policy = FrameSourcePolicy::default();
        assert_eq!(
            policy.remaining_after(FrameSourceKind::DwmSharedSurface),
            vec![FrameSourceKind::Gdi]
        );
        assert!(policy.remaining_after(FrameSourceKind::Gdi).is_empty());
    }

    #[test]
    fn fallback_returns_first_success_and_collects_failures() {
        let mut tried = Vec::new();
        let (kind, value) = select_with_fallback(&DEFAULT_FRAME_SOURCE_PRIORITY, |kind| {
            tried.push(kind);
            match kind {
                FrameSourceKind::DwmSharedSurface => Ok(7),
                _ => Err(MagnifyError::Initialization("unsupported".into())),
            }
        })
        .unwrap();
        assert_eq!(kind, FrameSourceKind::DwmSharedSurface);
        assert_eq!(value, 7);
        assert_eq!(tried.len(), 3);
    }

    #[test]
    fn geometry_error_stops_fallback() {
        let mut attempts = 0;
        let err = select_with_fallback::<()>(&DEFAULT_FRAME_SOURCE_PRIORITY, |_| {
            attempts += 1;
            Err(MagnifyError::Geometry("empty client area".into()))
        })
        .unwrap_err();
        assert_eq!(attempts, 1);
        assert_eq!(err.kind(), ErrorKind::Geometry);
    }

    #[test]
    fn exhausted_fallback_names_every_variant() {
        let err = select_with_fallback::<()>(
            &[FrameSourceKind::Gdi, FrameSourceKind::DesktopDuplication],
            |kind| Err(MagnifyError::Initialization(kind.as_str().to_string())),
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("gdi: "));
        assert!(message.contains("desktop-duplication: "));
    }

    #[test]
    fn monitor_fallback_marks_screen_capture() {
        let resolved = resolve_capture_target(|stage| match stage {
            CaptureTargetStage::Window => Err(MagnifyError::Platform(anyhow::anyhow!(
                "CreateForWindow failed"
            ))),
            CaptureTargetStage::StyledWindow => Err(MagnifyError::Platform(anyhow::anyhow!(
                "CreateForWindow failed"
            ))),
            CaptureTargetStage::Monitor => Ok(Some("monitor item")),
        })
        .unwrap();
        assert_eq!(resolved.stage, CaptureTargetStage::Monitor);
        assert!(resolved.is_screen_capture());
    }

    #[test]
    fn direct_window_capture_is_not_screen_capture() {
        let resolved = resolve_capture_target(|_| Ok(Some(1u8))).unwrap();
        assert_eq!(resolved.stage, CaptureTargetStage::Window);
        assert!(!resolved.is_screen_capture());
    }

    #[test]
    fn skipped_styled_stage_moves_on_to_monitor() {
        let mut seen = Vec::new();
        let resolved = resolve_capture_target(|stage| {
            seen.push(stage);
            match stage {
                CaptureTargetStage::Window => Err(MagnifyError::TransientCapture("no".into())),
                CaptureTargetStage::StyledWindow => Ok(None),
                CaptureTargetStage::Monitor => Ok(Some(())),
            }
        })
        .unwrap();
        assert_eq!(seen, CaptureTargetStage::ORDER.to_vec());
        assert!(resolved.is_screen_capture());
    }

    #[test]
    fn crop_failure_stops_the_target_walk() {
        let mut seen = Vec::new();
        let err = resolve_capture_target::<()>(|stage| {
            seen.push(stage);
            Err(MagnifyError::Geometry("client area leaves the frame bounds".into()))
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Geometry);
        assert_eq!(seen, vec![CaptureTargetStage::Window]);

        let mut attempts = 0;
        let err = select_with_fallback::<()>(&DEFAULT_FRAME_SOURCE_PRIORITY, |_| {
            attempts += 1;
            resolve_capture_target(|_| Err(MagnifyError::Geometry("negative crop".into())))
                .map(|_: ResolvedCapture<()>| ())
        })
        .unwrap_err();
        assert_eq!(attempts, 1);
        assert_eq!(err.reason(), crate::error::ErrorReason::CropFailed);
    }

    #[test]
    fn policy_deserializes_from_camel_case_names() {
        let policy: FrameSourcePolicy =
            serde_json::from_str(r#"["desktopDuplication", "gdi"]"#).unwrap();
        assert_eq!(
            policy.priority,
            vec![FrameSourceKind::DesktopDuplication, FrameSourceKind::Gdi]
        );
    }
}
