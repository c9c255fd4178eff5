use crate::effect::config::{EffectRecord, ScaleEffect, ScaleFactor, SharpenEffect};
use crate::error::{MagnifyError, MagnifyResult};
use crate::geometry::Size;

/// Work-group edge length shared by every effect kernel.
pub const THREAD_GROUP_SIZE: u32 = 16;

/// Number of 32-bit root constants each kernel receives at `b0`.
pub const CONSTANT_WORDS: usize = 12;

/// Constant block layout: input size, output size, scale factors, inverse
/// input size, then four kernel-specific float parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectConstants {
    pub input: Size,
    pub output: Size,
    pub scale: [f32; 2],
    pub params: [f32; 4],
}

impl EffectConstants {
    pub fn to_words(&self) -> [u32; CONSTANT_WORDS] {
        [
            self.input.width,
            self.input.height,
            self.output.width,
            self.output.height,
            self.scale[0].to_bits(),
            self.scale[1].to_bits(),
            (1.0 / self.input.width as f32).to_bits(),
            (1.0 / self.input.height as f32).to_bits(),
            self.params[0].to_bits(),
            self.params[1].to_bits(),
            self.params[2].to_bits(),
            self.params[3].to_bits(),
        ]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedEffect {
    pub kernel: &'static str,
    pub input_size: Size,
    pub output_size: Size,
    pub constants: EffectConstants,
}

impl PlannedEffect {
    /// Work groups per axis covering the output.
    pub fn dispatch_size(&self) -> (u32, u32) {
        (
            self.output_size.width.div_ceil(THREAD_GROUP_SIZE),
            self.output_size.height.div_ceil(THREAD_GROUP_SIZE),
        )
    }
}

/// First phase of the effect chain: every node's sizes and constants,
/// resolved before any GPU resource exists.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EffectPlan {
    input_size: Size,
    nodes: Vec<PlannedEffect>,
}

impl EffectPlan {
    pub fn build(records: &[EffectRecord], source: Size, host: Size) -> MagnifyResult<Self> {
        if source.is_empty() {
            return Err(MagnifyError::Geometry(format!(
                "effect chain input {}x{} is empty",
                source.width, source.height
            )));
        }

        let mut nodes = Vec::with_capacity(records.len());
        let mut current = source;
        for (index, record) in records.iter().enumerate() {
            let node = plan_node(record, current, host).map_err(|err| match err {
                MagnifyError::ConfigValidation(message) => {
                    MagnifyError::ConfigValidation(format!("effect #{index}: {message}"))
                }
                other => other,
            })?;
            log::debug!(
                "effect #{index} {}: {}x{} -> {}x{}",
                node.kernel,
                node.input_size.width,
                node.input_size.height,
                node.output_size.width,
                node.output_size.height
            );
            current = node.output_size;
            nodes.push(node);
        }

        Ok(Self {
            input_size: source,
            nodes,
        })
    }

    pub fn input_size(&self) -> Size {
        self.input_size
    }

    /// Size of the final image, the input size for an empty chain.
    pub fn output_size(&self) -> Size {
        self.nodes
            .last()
            .map(|node| node.output_size)
            .unwrap_or(self.input_size)
    }

    pub fn nodes(&self) -> &[PlannedEffect] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn plan_node(record: &EffectRecord, input: Size, host: Size) -> MagnifyResult<PlannedEffect> {
    let (scale, params) = match record {
        EffectRecord::Scale(scale) => match scale {
            ScaleEffect::Anime4K {
                curve_height,
                denoise,
            } => (
                [2.0, 2.0],
                [*curve_height, if *denoise { 1.0 } else { 0.0 }, 0.0, 0.0],
            ),
            ScaleEffect::Anime4KDarkLines => ([1.0, 1.0], [0.0; 4]),
            ScaleEffect::Anime4KThinLines { strength } => ([1.0, 1.0], [*strength, 0.0, 0.0, 0.0]),
            ScaleEffect::Jinc2 {
                scale,
                window_sinc,
                sinc,
                ar_strength,
            } => (
                resolve_factor(*scale, input, host),
                [*window_sinc, *sinc, *ar_strength, 0.0],
            ),
            ScaleEffect::Mitchell { scale, sharper } => {
                let (b, c) = if *sharper {
                    (0.0, 0.75)
                } else {
                    (1.0 / 3.0, 1.0 / 3.0)
                };
                (resolve_factor(*scale, input, host), [b, c, 0.0, 0.0])
            }
            ScaleEffect::HqBicubic { scale, sharpness } => (
                resolve_factor(*scale, input, host),
                [0.0, 0.5 + 0.25 * sharpness, 0.0, 0.0],
            ),
            ScaleEffect::Lanczos6 { scale, ar_strength } => (
                resolve_factor(*scale, input, host),
                [*ar_strength, 0.0, 0.0, 0.0],
            ),
            ScaleEffect::Pixel { scale } => ([*scale as f32; 2], [0.0; 4]),
        },
        EffectRecord::Sharpen(sharpen) => match sharpen {
            SharpenEffect::Adaptive { curve_height } => {
                ([1.0, 1.0], [*curve_height, 0.0, 0.0, 0.0])
            }
            SharpenEffect::BuiltIn {
                sharpness,
                threshold,
            } => ([1.0, 1.0], [*sharpness, *threshold, 0.0, 0.0]),
        },
    };

    let output = Size::new(
        scaled_dimension(input.width, scale[0]),
        scaled_dimension(input.height, scale[1]),
    );
    if output.is_empty() {
        return Err(MagnifyError::ConfigValidation(format!(
            "{} would produce an empty {}x{} output",
            record.kernel_name(),
            output.width,
            output.height
        )));
    }

    Ok(PlannedEffect {
        kernel: record.kernel_name(),
        input_size: input,
        output_size: output,
        constants: EffectConstants {
            input,
            output,
            scale,
            params,
        },
    })
}

fn resolve_factor(factor: ScaleFactor, input: Size, host: Size) -> [f32; 2] {
    match factor {
        ScaleFactor::Factor { x, y } => [x, y],
        ScaleFactor::Fit => {
            let fit = (host.width as f32 / input.width as f32)
                .min(host.height as f32 / input.height as f32);
            [fit, fit]
        }
    }
}

fn scaled_dimension(dimension: u32, factor: f32) -> u32 {
    let scaled = (dimension as f64 * factor as f64).round();
    scaled.clamp(0.0, u32::MAX as f64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(values: serde_json::Value) -> Vec<EffectRecord> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|value| EffectRecord::from_value(value).unwrap())
            .collect()
    }

    #[test]
    fn scale_then_sharpen_doubles_the_input() {
        let chain = records(json!([
            {"effect": "scale", "type": "mitchell", "scale": [2, 2]},
            {"effect": "sharpen", "type": "builtIn"},
        ]));
        let plan = EffectPlan::build(&chain, Size::new(800, 600), Size::new(1920, 1080)).unwrap();
        assert_eq!(plan.nodes().len(), 2);
        assert_eq!(plan.nodes()[0].output_size, Size::new(1600, 1200));
        assert_eq!(plan.nodes()[1].input_size, Size::new(1600, 1200));
        assert_eq!(plan.output_size(), Size::new(1600, 1200));
    }

    #[test]
    fn fit_scale_uses_the_limiting_axis() {
        let chain = records(json!([
            {"effect": "scale", "type": "lanczos6", "scale": [0, 0]},
        ]));
        let plan = EffectPlan::build(&chain, Size::new(800, 600), Size::new(1920, 1080)).unwrap();
        assert_eq!(plan.output_size(), Size::new(1440, 1080));
        assert_eq!(plan.nodes()[0].constants.scale, [1.8, 1.8]);
    }

    #[test]
    fn empty_chain_passes_the_source_size_through() {
        let plan = EffectPlan::build(&[], Size::new(640, 480), Size::new(1920, 1080)).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.output_size(), Size::new(640, 480));
    }

    #[test]
    fn anime4k_doubles_and_packs_denoise_flag() {
        let chain = records(json!([
            {"effect": "scale", "type": "Anime4K", "useDenoiseVersion": true},
        ]));
        let plan = EffectPlan::build(&chain, Size::new(100, 50), Size::new(1920, 1080)).unwrap();
        let node = &plan.nodes()[0];
        assert_eq!(node.output_size, Size::new(200, 100));
        assert_eq!(node.constants.params[1], 1.0);
    }

    #[test]
    fn sharper_mitchell_uses_catmull_like_coefficients() {
        let chain = records(json!([
            {"effect": "scale", "type": "mitchell", "useSharperVersion": true},
        ]));
        let plan = EffectPlan::build(&chain, Size::new(10, 10), Size::new(10, 10)).unwrap();
        assert_eq!(plan.nodes()[0].constants.params[..2], [0.0, 0.75]);
    }

    #[test]
    fn sizes_round_to_nearest() {
        let chain = records(json!([
            {"effect": "scale", "type": "HQBicubic", "scale": [1.5, 1.25]},
        ]));
        let plan = EffectPlan::build(&chain, Size::new(101, 10), Size::new(1, 1)).unwrap();
        assert_eq!(plan.output_size(), Size::new(152, 13));
    }

    #[test]
    fn collapsing_scale_is_a_config_error() {
        let chain = records(json!([
            {"effect": "scale", "type": "jinc2", "scale": [0.001, 1]},
        ]));
        let err = EffectPlan::build(&chain, Size::new(100, 100), Size::new(100, 100)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigValidation);
        assert!(err.to_string().contains("effect #0"));
    }

    #[test]
    fn dispatch_covers_partial_groups_and_constants_pack_sizes() {
        let chain = records(json!([{"effect": "scale", "type": "pixel", "scale": 3}]));
        let plan = EffectPlan::build(&chain, Size::new(33, 7), Size::new(1, 1)).unwrap();
        let node = &plan.nodes()[0];
        assert_eq!(node.output_size, Size::new(99, 21));
        assert_eq!(node.dispatch_size(), (7, 2));
        let words = node.constants.to_words();
        assert_eq!(&words[..4], &[33, 7, 99, 21]);
        assert_eq!(f32::from_bits(words[4]), 3.0);
    }
}
