use serde::Deserialize;

use crate::effect::EffectRecord;
use crate::error::{MagnifyError, MagnifyResult};
use crate::frame_source::FrameSourcePolicy;

/// What the render loop does on a tick that produced no new frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdlePolicy {
    /// Present the previously rendered image again.
    PresentPrevious,
    /// Keep the frame open and present nothing.
    #[default]
    Skip,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    pub capture: FrameSourcePolicy,
    pub vsync: bool,
    pub low_latency: bool,
    pub adapter_index: Option<u32>,
    pub idle: IdlePolicy,
    pub idle_sleep_ms: u64,
    pub max_consecutive_transient_errors: u32,
    pub effects: Vec<EffectRecord>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture: FrameSourcePolicy::default(),
            vsync: true,
            low_latency: true,
            adapter_index: None,
            idle: IdlePolicy::default(),
            idle_sleep_ms: 1,
            max_consecutive_transient_errors: 30,
            effects: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(raw: &str) -> MagnifyResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|err| MagnifyError::ConfigValidation(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MagnifyResult<()> {
        if self.max_consecutive_transient_errors == 0 {
            return Err(MagnifyError::ConfigValidation(
                "maxConsecutiveTransientErrors must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_source::FrameSourceKind;

    #[test]
    fn empty_object_yields_defaults() {
        let config = SessionConfig::from_json("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert!(config.vsync);
        assert_eq!(config.idle, IdlePolicy::Skip);
    }

    #[test]
    fn full_document_round_trips_into_typed_fields() {
        let config = SessionConfig::from_json(
            r#"{
                "capture": ["gdi", "desktopDuplication"],
                "vsync": false,
                "lowLatency": false,
                "adapterIndex": 1,
                "idle": "presentPrevious",
                "idleSleepMs": 4,
                "effects": [
                    {"effect": "scale", "type": "pixel", "scale": 2},
                    {"effect": "sharpen", "type": "builtIn", "sharpness": 1}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.capture.normalized_priority(),
            vec![FrameSourceKind::Gdi, FrameSourceKind::DesktopDuplication]
        );
        assert!(!config.vsync);
        assert_eq!(config.adapter_index, Some(1));
        assert_eq!(config.idle, IdlePolicy::PresentPrevious);
        assert_eq!(config.effects.len(), 2);
        assert_eq!(config.effects[1].kernel_name(), "builtIn");
    }

    #[test]
    fn invalid_effect_surfaces_as_config_validation() {
        let err = SessionConfig::from_json(
            r#"{"effects": [{"effect": "scale", "type": "HQBicubic", "sharpness": 3}]}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigValidation);
        assert!(err.to_string().contains("sharpness"));
    }

    #[test]
    fn unknown_capture_variant_is_rejected() {
        assert!(SessionConfig::from_json(r#"{"capture": ["magnification"]}"#).is_err());
    }

    #[test]
    fn zero_error_budget_is_rejected() {
        assert!(SessionConfig::from_json(r#"{"maxConsecutiveTransientErrors": 0}"#).is_err());
    }
}
