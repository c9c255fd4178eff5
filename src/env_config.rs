/// Centralized environment-variable parsing helpers.
///
/// Tuning knobs that are not part of `SessionConfig` are read through these
/// helpers once per process.
use std::sync::OnceLock;
use std::time::Duration;

const DEFAULT_DUPLICATION_TIMEOUT_MS: u64 = 500;
const DEFAULT_GRAPHICS_CAPTURE_WAIT_MS: u64 = 1;

/// Returns `true` when the environment variable is set to a truthy value
/// (`1`, `true`, `yes`, or `on`, case-insensitive, trimmed).
#[inline]
pub(crate) fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| parse_truthy(&raw))
        .unwrap_or(false)
}

/// Parses the environment variable as a `u64`, returning `Some` only when
/// the value is a valid positive (> 0) integer.
#[inline]
pub(crate) fn env_var_positive_u64(var_name: &str) -> Option<u64> {
    std::env::var(var_name)
        .ok()
        .and_then(|raw| parse_positive_u64(&raw))
}

fn parse_truthy(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
}

fn parse_positive_u64(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}

/// Declares a cached boolean feature flag backed by a `OnceLock<bool>`.
///
/// `enabled_unless(fn_name, "ENV_VAR")` is on by default and turned off by a
/// truthy value; `enabled_when(fn_name, "ENV_VAR")` is off by default.
macro_rules! define_env_flag {
    (enabled_unless($vis:vis $fn_name:ident, $var:expr)) => {
        #[inline]
        $vis fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| !$crate::env_config::env_var_truthy($var))
        }
    };
    (enabled_when($vis:vis $fn_name:ident, $var:expr)) => {
        #[inline]
        $vis fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| $crate::env_config::env_var_truthy($var))
        }
    };
}

pub(crate) use define_env_flag;

define_env_flag!(enabled_when(pub(crate) d3d_debug_layer_enabled, "SNOW_MAGNIFY_D3D_DEBUG"));

/// Poll timeout for `AcquireNextFrame` on the duplication worker.
pub(crate) fn duplication_timeout() -> Duration {
    static VALUE: OnceLock<u64> = OnceLock::new();
    Duration::from_millis(*VALUE.get_or_init(|| {
        env_var_positive_u64("SNOW_MAGNIFY_DUPLICATION_TIMEOUT_MS")
            .unwrap_or(DEFAULT_DUPLICATION_TIMEOUT_MS)
    }))
}

/// Bounded wait for a compositor capture callback inside `capture_frame`.
pub(crate) fn graphics_capture_wait() -> Duration {
    static VALUE: OnceLock<u64> = OnceLock::new();
    Duration::from_millis(*VALUE.get_or_init(|| {
        env_var_positive_u64("SNOW_MAGNIFY_GRAPHICS_CAPTURE_WAIT_MS")
            .unwrap_or(DEFAULT_GRAPHICS_CAPTURE_WAIT_MS)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values_are_case_insensitive_and_trimmed() {
        assert!(parse_truthy(" ON "));
        assert!(parse_truthy("Yes"));
        assert!(parse_truthy("1"));
        assert!(!parse_truthy("0"));
        assert!(!parse_truthy("enabled"));
    }

    #[test]
    fn positive_u64_rejects_zero_and_garbage() {
        assert_eq!(parse_positive_u64("250"), Some(250));
        assert_eq!(parse_positive_u64(" 16 "), Some(16));
        assert_eq!(parse_positive_u64("0"), None);
        assert_eq!(parse_positive_u64("-3"), None);
        assert_eq!(parse_positive_u64("soon"), None);
    }

    #[test]
    fn unset_knobs_fall_back_to_defaults() {
        assert!(!env_var_truthy("SNOW_MAGNIFY_TEST_FLAG_THAT_IS_NEVER_SET"));
        assert_eq!(
            env_var_positive_u64("SNOW_MAGNIFY_TEST_KNOB_THAT_IS_NEVER_SET"),
            None
        );
    }
}
