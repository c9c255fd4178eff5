//! Effect chain: configuration records, the size/constant plan built from
//! them, and the runner seam that executes a plan on the GPU.

pub mod config;
pub mod kernels;
pub mod plan;

pub use config::{EffectRecord, ScaleEffect, ScaleFactor, SharpenEffect};
pub use kernels::KernelRegistry;
pub use plan::{EffectConstants, EffectPlan, PlannedEffect, THREAD_GROUP_SIZE};

use crate::device::RenderDevice;
use crate::error::MagnifyResult;

/// Second phase of the effect chain: records the planned dispatches into
/// the device's open command list and yields the final image.
pub trait EffectRunner<D: RenderDevice> {
    fn run<'a>(&'a mut self, device: &mut D, input: &'a D::Texture)
    -> MagnifyResult<&'a D::Texture>;

    /// Final image of the most recent `run`, left in a copyable state.
    fn last_output<'a>(&'a self, input: &'a D::Texture) -> &'a D::Texture;
}

/// Runner for an empty chain: the source output is presented as is.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl<D: RenderDevice> EffectRunner<D> for PassThrough {
    fn run<'a>(
        &'a mut self,
        _device: &mut D,
        input: &'a D::Texture,
    ) -> MagnifyResult<&'a D::Texture> {
        Ok(input)
    }

    fn last_output<'a>(&'a self, input: &'a D::Texture) -> &'a D::Texture {
        input
    }
}
