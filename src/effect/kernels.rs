use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::effect::EffectPlan;
use crate::error::{MagnifyError, MagnifyResult};

/// Compute bytecode by kernel name. Every kernel follows the same binding
/// contract: input at `t0`, output at `u0`, a linear clamp sampler at `s0`
/// and the packed constants at `b0`.
#[derive(Clone, Debug, Default)]
pub struct KernelRegistry {
    kernels: FxHashMap<String, Arc<[u8]>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the bytecode for `name`.
    pub fn register(&mut self, name: impl Into<String>, bytecode: impl Into<Arc<[u8]>>) {
        self.kernels.insert(name.into(), bytecode.into());
    }

    pub fn get(&self, name: &str) -> Option<&Arc<[u8]>> {
        self.kernels.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kernels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Fails when any planned node has no registered kernel.
    pub fn check_plan(&self, plan: &EffectPlan) -> MagnifyResult<()> {
        let mut missing: Vec<&str> = plan
            .nodes()
            .iter()
            .map(|node| node.kernel)
            .filter(|name| !self.contains(name))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.dedup();
        Err(MagnifyError::Initialization(format!(
            "no compute kernel registered for {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectRecord;
    use crate::geometry::Size;
    use serde_json::json;

    fn plan_for(values: &[serde_json::Value]) -> EffectPlan {
        let records: Vec<EffectRecord> = values
            .iter()
            .map(|value| EffectRecord::from_value(value).unwrap())
            .collect();
        EffectPlan::build(&records, Size::new(320, 240), Size::new(1280, 720)).unwrap()
    }

    #[test]
    fn plan_with_registered_kernels_passes() {
        let mut registry = KernelRegistry::new();
        registry.register("pixel", vec![0u8; 4]);
        registry.register("builtIn", vec![1u8; 4]);
        let plan = plan_for(&[
            json!({"effect": "scale", "type": "pixel", "scale": 2}),
            json!({"effect": "sharpen", "type": "builtIn"}),
        ]);
        registry.check_plan(&plan).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn missing_kernel_is_an_initialization_error() {
        let registry = KernelRegistry::new();
        let plan = plan_for(&[
            json!({"effect": "scale", "type": "Anime4K"}),
            json!({"effect": "scale", "type": "Anime4KDarkLines"}),
        ]);
        let err = registry.check_plan(&plan).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Initialization);
        assert!(err.to_string().contains("Anime4K, Anime4KDarkLines"));
    }

    #[test]
    fn registering_again_replaces_the_bytecode() {
        let mut registry = KernelRegistry::new();
        registry.register("jinc2", vec![1u8]);
        registry.register("jinc2", vec![2u8, 3]);
        assert_eq!(registry.get("jinc2").map(|code| code.len()), Some(2));
    }
}
