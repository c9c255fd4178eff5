use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{MagnifyError, MagnifyResult};

/// Scale factor requested by a scaling effect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScaleFactor {
    /// Largest uniform factor that keeps the output inside the host.
    Fit,
    Factor { x: f32, y: f32 },
}

impl ScaleFactor {
    pub const IDENTITY: Self = Self::Factor { x: 1.0, y: 1.0 };
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScaleEffect {
    Anime4K { curve_height: f32, denoise: bool },
    Anime4KDarkLines,
    Anime4KThinLines { strength: f32 },
    Jinc2 {
        scale: ScaleFactor,
        window_sinc: f32,
        sinc: f32,
        ar_strength: f32,
    },
    Mitchell { scale: ScaleFactor, sharper: bool },
    HqBicubic { scale: ScaleFactor, sharpness: f32 },
    Lanczos6 { scale: ScaleFactor, ar_strength: f32 },
    Pixel { scale: u32 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum SharpenEffect {
    Adaptive { curve_height: f32 },
    BuiltIn { sharpness: f32, threshold: f32 },
}

/// One validated entry of the effect chain configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum EffectRecord {
    Scale(ScaleEffect),
    Sharpen(SharpenEffect),
}

impl EffectRecord {
    /// Name used to look up the compute kernel for this effect.
    pub fn kernel_name(&self) -> &'static str {
        match self {
            Self::Scale(scale) => match scale {
                ScaleEffect::Anime4K { .. } => "Anime4K",
                ScaleEffect::Anime4KDarkLines => "Anime4KDarkLines",
                ScaleEffect::Anime4KThinLines { .. } => "Anime4KThinLines",
                ScaleEffect::Jinc2 { .. } => "jinc2",
                ScaleEffect::Mitchell { .. } => "mitchell",
                ScaleEffect::HqBicubic { .. } => "HQBicubic",
                ScaleEffect::Lanczos6 { .. } => "lanczos6",
                ScaleEffect::Pixel { .. } => "pixel",
            },
            Self::Sharpen(sharpen) => match sharpen {
                SharpenEffect::Adaptive { .. } => "adaptive",
                SharpenEffect::BuiltIn { .. } => "builtIn",
            },
        }
    }

    pub fn from_value(value: &Value) -> MagnifyResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| invalid("effect record must be a JSON object"))?;
        let effect = required_str(object, "effect")?;
        let subtype = required_str(object, "type")?;

        match effect {
            "scale" => parse_scale(subtype, object).map(Self::Scale),
            "sharpen" => parse_sharpen(subtype, object).map(Self::Sharpen),
            other => Err(invalid(format!("unknown effect {other:?}"))),
        }
    }
}

impl TryFrom<Value> for EffectRecord {
    type Error = MagnifyError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(&value)
    }
}

fn parse_scale(subtype: &str, object: &Map<String, Value>) -> MagnifyResult<ScaleEffect> {
    let effect = match subtype {
        "Anime4K" => ScaleEffect::Anime4K {
            curve_height: check(
                "curveHeight",
                number_or(object, "curveHeight", 0.0)?,
                |v| v >= 0.0,
                "must be >= 0",
            )?,
            denoise: bool_or(object, "useDenoiseVersion", false)?,
        },
        "Anime4KDarkLines" => ScaleEffect::Anime4KDarkLines,
        "Anime4KThinLines" => ScaleEffect::Anime4KThinLines {
            strength: check(
                "strength",
                number_or(object, "strength", 0.6)?,
                |v| v > 0.0,
                "must be > 0",
            )?,
        },
        "jinc2" => ScaleEffect::Jinc2 {
            scale: scale_factor(object)?,
            window_sinc: check(
                "windowSinc",
                number_or(object, "windowSinc", 0.44)?,
                |v| v > 0.0,
                "must be > 0",
            )?,
            sinc: check("sinc", number_or(object, "sinc", 0.82)?, |v| v > 0.0, "must be > 0")?,
            ar_strength: unit_interval(object, "ARStrength", 0.5)?,
        },
        "mitchell" => ScaleEffect::Mitchell {
            scale: scale_factor(object)?,
            sharper: bool_or(object, "useSharperVersion", false)?,
        },
        "HQBicubic" => ScaleEffect::HqBicubic {
            scale: scale_factor(object)?,
            sharpness: unit_interval(object, "sharpness", 0.5)?,
        },
        "lanczos6" => ScaleEffect::Lanczos6 {
            scale: scale_factor(object)?,
            ar_strength: unit_interval(object, "ARStrength", 0.5)?,
        },
        "pixel" => ScaleEffect::Pixel {
            scale: integer_scale(object)?,
        },
        other => return Err(invalid(format!("unknown scale type {other:?}"))),
    };
    Ok(effect)
}

fn parse_sharpen(subtype: &str, object: &Map<String, Value>) -> MagnifyResult<SharpenEffect> {
    match subtype {
        "adaptive" => Ok(SharpenEffect::Adaptive {
            curve_height: check(
                "curveHeight",
                number_or(object, "curveHeight", 0.3)?,
                |v| v > 0.0,
                "must be > 0",
            )?,
        }),
        "builtIn" => Ok(SharpenEffect::BuiltIn {
            sharpness: check(
                "sharpness",
                number_or(object, "sharpness", 0.4)?,
                |v| (0.0..=10.0).contains(&v),
                "must be within [0, 10]",
            )?,
            threshold: unit_interval(object, "threshold", 0.3)?,
        }),
        other => Err(invalid(format!("unknown sharpen type {other:?}"))),
    }
}

fn invalid(message: impl Into<String>) -> MagnifyError {
    MagnifyError::ConfigValidation(message.into())
}

fn required_str<'a>(object: &'a Map<String, Value>, key: &str) -> MagnifyResult<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("effect record needs a string {key:?}")))
}

fn number_or(object: &Map<String, Value>, key: &str, default: f32) -> MagnifyResult<f32> {
    match object.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| invalid(format!("{key} must be a number"))),
    }
}

fn bool_or(object: &Map<String, Value>, key: &str, default: bool) -> MagnifyResult<bool> {
    match object.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_bool()
            .ok_or_else(|| invalid(format!("{key} must be a boolean"))),
    }
}

fn check(
    key: &str,
    value: f32,
    accept: impl Fn(f32) -> bool,
    requirement: &str,
) -> MagnifyResult<f32> {
    if value.is_finite() && accept(value) {
        Ok(value)
    } else {
        Err(invalid(format!("{key} {requirement}, got {value}")))
    }
}

fn unit_interval(object: &Map<String, Value>, key: &str, default: f32) -> MagnifyResult<f32> {
    check(
        key,
        number_or(object, key, default)?,
        |v| (0.0..=1.0).contains(&v),
        "must be within [0, 1]",
    )
}

fn scale_factor(object: &Map<String, Value>) -> MagnifyResult<ScaleFactor> {
    let Some(value) = object.get("scale") else {
        return Ok(ScaleFactor::IDENTITY);
    };
    let components = value
        .as_array()
        .filter(|array| array.len() == 2)
        .ok_or_else(|| invalid("scale must be an array of two numbers"))?;

    let mut parsed = [0.0f32; 2];
    for (slot, component) in parsed.iter_mut().zip(components) {
        *slot = check(
            "scale",
            component
                .as_f64()
                .ok_or_else(|| invalid("scale components must be numbers"))? as f32,
            |v| v >= 0.0,
            "components must be >= 0",
        )?;
    }

    if parsed[0] == 0.0 || parsed[1] == 0.0 {
        Ok(ScaleFactor::Fit)
    } else {
        Ok(ScaleFactor::Factor {
            x: parsed[0],
            y: parsed[1],
        })
    }
}

fn integer_scale(object: &Map<String, Value>) -> MagnifyResult<u32> {
    let Some(value) = object.get("scale") else {
        return Ok(1);
    };
    value
        .as_u64()
        .filter(|scale| *scale > 0 && *scale <= u32::MAX as u64)
        .map(|scale| scale as u32)
        .ok_or_else(|| invalid("pixel scale must be a positive integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_scale_and_sharpen_records() {
        let scale = EffectRecord::from_value(&json!({
            "effect": "scale",
            "type": "lanczos6",
            "scale": [2.0, 1.5],
            "ARStrength": 0.7
        }))
        .unwrap();
        assert_eq!(
            scale,
            EffectRecord::Scale(ScaleEffect::Lanczos6 {
                scale: ScaleFactor::Factor { x: 2.0, y: 1.5 },
                ar_strength: 0.7,
            })
        );
        assert_eq!(scale.kernel_name(), "lanczos6");

        let sharpen = EffectRecord::from_value(&json!({
            "effect": "sharpen",
            "type": "builtIn",
            "sharpness": 2.5,
            "threshold": 0.1
        }))
        .unwrap();
        assert_eq!(sharpen.kernel_name(), "builtIn");
    }

    #[test]
    fn zero_scale_component_means_fit() {
        let record = EffectRecord::from_value(&json!({
            "effect": "scale",
            "type": "mitchell",
            "scale": [0, 3],
        }))
        .unwrap();
        assert_eq!(
            record,
            EffectRecord::Scale(ScaleEffect::Mitchell {
                scale: ScaleFactor::Fit,
                sharper: false,
            })
        );
    }

    #[test]
    fn out_of_range_parameters_are_rejected() {
        let cases = [
            json!({"effect": "scale", "type": "HQBicubic", "sharpness": 1.5}),
            json!({"effect": "scale", "type": "jinc2", "sinc": 0}),
            json!({"effect": "scale", "type": "Anime4K", "curveHeight": -0.1}),
            json!({"effect": "scale", "type": "Anime4KThinLines", "strength": 0}),
            json!({"effect": "scale", "type": "mitchell", "scale": [-1, 2]}),
            json!({"effect": "scale", "type": "mitchell", "scale": [2]}),
            json!({"effect": "scale", "type": "pixel", "scale": 1.5}),
            json!({"effect": "sharpen", "type": "builtIn", "sharpness": 11}),
            json!({"effect": "sharpen", "type": "adaptive", "curveHeight": 0}),
        ];
        for case in cases {
            let err = EffectRecord::from_value(&case).unwrap_err();
            assert_eq!(
                err.kind(),
                crate::error::ErrorKind::ConfigValidation,
                "{case}"
            );
        }
    }

    #[test]
    fn unknown_effects_and_wrong_types_are_rejected() {
        assert!(EffectRecord::from_value(&json!({"effect": "blur", "type": "gauss"})).is_err());
        assert!(EffectRecord::from_value(&json!({"effect": "scale", "type": "xbr"})).is_err());
        assert!(EffectRecord::from_value(&json!({"effect": "scale"})).is_err());
        assert!(
            EffectRecord::from_value(
                &json!({"effect": "scale", "type": "mitchell", "useSharperVersion": "yes"})
            )
            .is_err()
        );
        assert!(EffectRecord::from_value(&json!(["scale"])).is_err());
    }

    #[test]
    fn omitted_parameters_use_defaults() {
        let record =
            EffectRecord::from_value(&json!({"effect": "scale", "type": "pixel", "extra": 1}))
                .unwrap();
        assert_eq!(record, EffectRecord::Scale(ScaleEffect::Pixel { scale: 1 }));
    }
}
