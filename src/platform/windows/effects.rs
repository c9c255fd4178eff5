use std::ffi::c_void;
use std::sync::OnceLock;

use anyhow::Context;
use windows::Win32::Graphics::Direct3D::{D3D_ROOT_SIGNATURE_VERSION_1, ID3DBlob};
use windows::Win32::Graphics::Direct3D12::{
    D3D12_COMPARISON_FUNC_NEVER, D3D12_COMPUTE_PIPELINE_STATE_DESC, D3D12_CPU_DESCRIPTOR_HANDLE,
    D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING, D3D12_DESCRIPTOR_HEAP_DESC,
    D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE, D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
    D3D12_DESCRIPTOR_RANGE, D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
    D3D12_DESCRIPTOR_RANGE_TYPE_SRV, D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
    D3D12_FILTER_MIN_MAG_MIP_LINEAR, D3D12_FLOAT32_MAX, D3D12_GPU_DESCRIPTOR_HANDLE,
    D3D12_HEAP_FLAG_NONE, D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS,
    D3D12_RESOURCE_STATE_COPY_SOURCE, D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE,
    D3D12_RESOURCE_STATE_UNORDERED_ACCESS, D3D12_RESOURCE_STATES, D3D12_ROOT_CONSTANTS,
    D3D12_ROOT_DESCRIPTOR_TABLE, D3D12_ROOT_PARAMETER, D3D12_ROOT_PARAMETER_0,
    D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS, D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
    D3D12_ROOT_SIGNATURE_DESC, D3D12_ROOT_SIGNATURE_FLAG_NONE, D3D12_SHADER_BYTECODE,
    D3D12_SHADER_RESOURCE_VIEW_DESC, D3D12_SHADER_RESOURCE_VIEW_DESC_0,
    D3D12_SHADER_VISIBILITY_ALL, D3D12_SRV_DIMENSION_TEXTURE2D,
    D3D12_STATIC_BORDER_COLOR_TRANSPARENT_BLACK, D3D12_STATIC_SAMPLER_DESC, D3D12_TEX2D_SRV,
    D3D12_TEX2D_UAV, D3D12_TEXTURE_ADDRESS_MODE_CLAMP, D3D12_UAV_DIMENSION_TEXTURE2D,
    D3D12_UNORDERED_ACCESS_VIEW_DESC, D3D12_UNORDERED_ACCESS_VIEW_DESC_0,
    D3D12SerializeRootSignature, ID3D12DescriptorHeap, ID3D12Device, ID3D12PipelineState,
    ID3D12Resource, ID3D12RootSignature,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_R8G8B8A8_UNORM,
};

use crate::device::RenderDevice;
use crate::effect::plan::CONSTANT_WORDS;
use crate::effect::{EffectPlan, EffectRunner, KernelRegistry};
use crate::error::{MagnifyError, MagnifyResult};

use super::device::D3D12DeviceContext;
use super::shared;

/// Entry points of the bundled kernel file and the effect names they serve.
const BUILTIN_KERNELS: [(&str, &[&str]); 4] = [
    ("pixel_main", &["pixel"]),
    ("bicubic_main", &["mitchell", "HQBicubic"]),
    ("lanczos6_main", &["lanczos6"]),
    ("sharpen_main", &["builtIn"]),
];

#[cfg(not(has_precompiled_effects))]
const HLSL_SOURCE: &str = include_str!("effects_cs.hlsl");

#[cfg(has_precompiled_effects)]
fn precompiled(entry: &str) -> Option<&'static [u8]> {
    match entry {
        "pixel_main" => Some(include_bytes!(env!("EFFECT_PIXEL_CSO_PATH"))),
        "bicubic_main" => Some(include_bytes!(env!("EFFECT_BICUBIC_CSO_PATH"))),
        "lanczos6_main" => Some(include_bytes!(env!("EFFECT_LANCZOS6_CSO_PATH"))),
        "sharpen_main" => Some(include_bytes!(env!("EFFECT_SHARPEN_CSO_PATH"))),
        _ => None,
    }
}

#[cfg(not(has_precompiled_effects))]
fn compile_shader_runtime(entry: &str) -> MagnifyResult<Vec<u8>> {
    use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;
    use windows::core::PCSTR;

    let source = HLSL_SOURCE.as_bytes();
    let entry_z = format!("{entry}\0");
    let mut blob: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;

    let hr = unsafe {
        D3DCompile(
            source.as_ptr() as *const c_void,
            source.len(),
            None,
            None,
            None,
            PCSTR::from_raw(entry_z.as_ptr()),
            PCSTR::from_raw(b"cs_5_0\0".as_ptr()),
            0,
            0,
            &mut blob,
            Some(&mut errors),
        )
    };

    if let Err(e) = hr {
        let msg = errors.map(|b| blob_to_string(&b)).unwrap_or_default();
        return Err(MagnifyError::Platform(
            anyhow::anyhow!("HLSL compile of {entry} failed: {msg}").context(e.to_string()),
        ));
    }
    let blob = blob
        .ok_or_else(|| MagnifyError::Platform(anyhow::anyhow!("D3DCompile returned no blob")))?;
    Ok(blob_bytes(&blob).to_vec())
}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    let ptr = unsafe { blob.GetBufferPointer() } as *const u8;
    let len = unsafe { blob.GetBufferSize() };
    unsafe { std::slice::from_raw_parts(ptr, len) }
}

fn blob_to_string(blob: &ID3DBlob) -> String {
    String::from_utf8_lossy(blob_bytes(blob))
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

/// Bytecode of one bundled entry point, compiled at most once per process.
fn cached_bytecode(index: usize) -> &'static MagnifyResult<Vec<u8>> {
    static BYTECODE: [OnceLock<MagnifyResult<Vec<u8>>>; BUILTIN_KERNELS.len()] =
        [const { OnceLock::new() }; BUILTIN_KERNELS.len()];
    BYTECODE[index].get_or_init(|| {
        let entry = BUILTIN_KERNELS[index].0;
        #[cfg(has_precompiled_effects)]
        {
            precompiled(entry).map(<[u8]>::to_vec).ok_or_else(|| {
                MagnifyError::Platform(anyhow::anyhow!("no precompiled bytecode for {entry}"))
            })
        }
        #[cfg(not(has_precompiled_effects))]
        {
            compile_shader_runtime(entry)
        }
    })
}

/// Adds the bundled kernels for every effect name the host has not
/// registered itself. Kernels that fail to compile are skipped and show up
/// later as missing.
pub(crate) fn register_builtin_kernels(registry: &mut KernelRegistry) {
    for (index, (entry, names)) in BUILTIN_KERNELS.iter().enumerate() {
        if names.iter().all(|name| registry.contains(name)) {
            continue;
        }
        match cached_bytecode(index) {
            Ok(bytecode) => {
                for name in names.iter().filter(|name| !registry.contains(name)) {
                    registry.register(*name, bytecode.as_slice());
                }
            }
            Err(err) => log::warn!("built-in kernel {entry} is unavailable: {err:#}"),
        }
    }
}

/// Shader-visible heap slots of node `index`: its input view then its
/// output view.
const fn descriptor_slots(index: usize) -> (u32, u32) {
    (2 * index as u32, 2 * index as u32 + 1)
}

fn root_parameter_table(range: &D3D12_DESCRIPTOR_RANGE) -> D3D12_ROOT_PARAMETER {
    D3D12_ROOT_PARAMETER {
        ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
        Anonymous: D3D12_ROOT_PARAMETER_0 {
            DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                NumDescriptorRanges: 1,
                pDescriptorRanges: range,
            },
        },
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    }
}

fn create_root_signature(device: &ID3D12Device) -> MagnifyResult<ID3D12RootSignature> {
    let srv_range = D3D12_DESCRIPTOR_RANGE {
        RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        NumDescriptors: 1,
        BaseShaderRegister: 0,
        RegisterSpace: 0,
        OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
    };
    let uav_range = D3D12_DESCRIPTOR_RANGE {
        RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
        ..srv_range
    };
    let parameters = [
        D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                Constants: D3D12_ROOT_CONSTANTS {
                    ShaderRegister: 0,
                    RegisterSpace: 0,
                    Num32BitValues: CONSTANT_WORDS as u32,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        },
        root_parameter_table(&srv_range),
        root_parameter_table(&uav_range),
    ];
    let sampler = D3D12_STATIC_SAMPLER_DESC {
        Filter: D3D12_FILTER_MIN_MAG_MIP_LINEAR,
        AddressU: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressV: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressW: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        MipLODBias: 0.0,
        MaxAnisotropy: 0,
        ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
        BorderColor: D3D12_STATIC_BORDER_COLOR_TRANSPARENT_BLACK,
        MinLOD: 0.0,
        MaxLOD: D3D12_FLOAT32_MAX,
        ShaderRegister: 0,
        RegisterSpace: 0,
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    };
    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: parameters.as_ptr(),
        NumStaticSamplers: 1,
        pStaticSamplers: &sampler,
        Flags: D3D12_ROOT_SIGNATURE_FLAG_NONE,
    };

    let mut blob: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    if let Err(err) = unsafe {
        D3D12SerializeRootSignature(&desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut blob, Some(&mut errors))
    } {
        let detail = errors.map(|b| blob_to_string(&b)).unwrap_or_default();
        return Err(MagnifyError::Initialization(format!(
            "failed to serialize the effect root signature: {err} {detail}"
        )));
    }
    let blob = blob.ok_or_else(|| {
        MagnifyError::Initialization("D3D12SerializeRootSignature returned no blob".into())
    })?;
    unsafe { device.CreateRootSignature(0, blob_bytes(&blob)) }
        .context("CreateRootSignature failed for the effect chain")
        .map_err(MagnifyError::Platform)
}

fn create_pipeline(
    device: &ID3D12Device,
    root_signature: &ID3D12RootSignature,
    kernel: &str,
    bytecode: &[u8],
) -> MagnifyResult<ID3D12PipelineState> {
    let desc = D3D12_COMPUTE_PIPELINE_STATE_DESC {
        pRootSignature: unsafe { std::mem::transmute_copy(root_signature) },
        CS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: bytecode.as_ptr() as *const c_void,
            BytecodeLength: bytecode.len(),
        },
        ..Default::default()
    };
    unsafe { device.CreateComputePipelineState(&desc) }.map_err(|err| {
        MagnifyError::Initialization(format!("kernel {kernel} was rejected by the device: {err}"))
    })
}

struct EffectPass {
    kernel: &'static str,
    pipeline: ID3D12PipelineState,
    constants: [u32; CONSTANT_WORDS],
    dispatch: (u32, u32),
}

/// Intermediate image written by one pass and the state it was last left in.
struct Intermediate {
    texture: ID3D12Resource,
    state: D3D12_RESOURCE_STATES,
}

/// Executes a planned chain as compute dispatches on the render device's
/// command list. Each pass reads the previous image and writes its own
/// RGBA intermediate; the last one is left ready for the back-buffer copy.
pub(crate) struct ComputeEffectChain {
    root_signature: ID3D12RootSignature,
    heap: ID3D12DescriptorHeap,
    descriptor_size: u32,
    passes: Vec<EffectPass>,
    intermediates: Vec<Intermediate>,
    bound_input: Option<ID3D12Resource>,
}

impl ComputeEffectChain {
    pub(crate) fn new(
        device: &D3D12DeviceContext,
        plan: &EffectPlan,
        kernels: &KernelRegistry,
    ) -> MagnifyResult<Self> {
        kernels.check_plan(plan)?;
        let d3d = device.device();
        let root_signature = create_root_signature(d3d)?;

        let mut passes = Vec::with_capacity(plan.nodes().len());
        let mut intermediates = Vec::with_capacity(plan.nodes().len());
        for node in plan.nodes() {
            let bytecode = kernels.get(node.kernel).ok_or_else(|| {
                MagnifyError::Initialization(format!("no compute kernel registered for {}", node.kernel))
            })?;
            passes.push(EffectPass {
                kernel: node.kernel,
                pipeline: create_pipeline(d3d, &root_signature, node.kernel, bytecode)?,
                constants: node.constants.to_words(),
                dispatch: node.dispatch_size(),
            });
            intermediates.push(Intermediate {
                texture: shared::create_texture(
                    d3d,
                    node.output_size,
                    DXGI_FORMAT_R8G8B8A8_UNORM,
                    D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS,
                    D3D12_HEAP_FLAG_NONE,
                    D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
                )?,
                state: D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
            });
        }

        let heap: ID3D12DescriptorHeap = unsafe {
            d3d.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
                NumDescriptors: 2 * passes.len() as u32,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE,
                NodeMask: 0,
            })
        }
        .context("CreateDescriptorHeap failed for the effect chain")
        .map_err(MagnifyError::Platform)?;
        let descriptor_size =
            unsafe { d3d.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV) };

        let chain = Self {
            root_signature,
            heap,
            descriptor_size,
            passes,
            intermediates,
            bound_input: None,
        };
        for index in 0..chain.passes.len() {
            let (srv, uav) = descriptor_slots(index);
            if index > 0 {
                chain.write_srv(
                    d3d,
                    &chain.intermediates[index - 1].texture,
                    DXGI_FORMAT_R8G8B8A8_UNORM,
                    srv,
                );
            }
            chain.write_uav(d3d, &chain.intermediates[index].texture, uav);
        }

        log::info!(
            "effect chain ready: {}",
            chain
                .passes
                .iter()
                .map(|pass| pass.kernel)
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Ok(chain)
    }

    fn cpu_handle(&self, slot: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        let start = unsafe { self.heap.GetCPUDescriptorHandleForHeapStart() };
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + (slot * self.descriptor_size) as usize,
        }
    }

    fn gpu_handle(&self, slot: u32) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        let start = unsafe { self.heap.GetGPUDescriptorHandleForHeapStart() };
        D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + u64::from(slot * self.descriptor_size),
        }
    }

    fn write_srv(&self, device: &ID3D12Device, texture: &ID3D12Resource, format: DXGI_FORMAT, slot: u32) {
        let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: format,
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: 1,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                },
            },
        };
        unsafe { device.CreateShaderResourceView(texture, Some(&desc), self.cpu_handle(slot)) };
    }

    fn write_uav(&self, device: &ID3D12Device, texture: &ID3D12Resource, slot: u32) {
        let desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            ViewDimension: D3D12_UAV_DIMENSION_TEXTURE2D,
            Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_UAV {
                    MipSlice: 0,
                    PlaneSlice: 0,
                },
            },
        };
        unsafe {
            device.CreateUnorderedAccessView(
                texture,
                None::<&ID3D12Resource>,
                Some(&desc),
                self.cpu_handle(slot),
            )
        };
    }

    /// Points the first pass at the frame source output. The descriptor is
    /// only rewritten once the GPU has stopped reading the old one.
    fn bind_input(&mut self, device: &mut D3D12DeviceContext, input: &ID3D12Resource) -> MagnifyResult<()> {
        if self.bound_input.as_ref() == Some(input) {
            return Ok(());
        }
        if self.bound_input.is_some() {
            device.wait_for_gpu()?;
        }
        let (srv, _) = descriptor_slots(0);
        self.write_srv(device.device(), input, DXGI_FORMAT_B8G8R8A8_UNORM, srv);
        self.bound_input = Some(input.clone());
        Ok(())
    }

    fn transition(device: &D3D12DeviceContext, image: &mut Intermediate, wanted: D3D12_RESOURCE_STATES) {
        if image.state != wanted {
            device.record_transition(&image.texture, image.state, wanted);
            image.state = wanted;
        }
    }
}

impl EffectRunner<D3D12DeviceContext> for ComputeEffectChain {
    fn run<'a>(
        &'a mut self,
        device: &mut D3D12DeviceContext,
        input: &'a ID3D12Resource,
    ) -> MagnifyResult<&'a ID3D12Resource> {
        self.bind_input(device, input)?;

        let list = device.command_list().clone();
        unsafe {
            list.SetDescriptorHeaps(&[Some(self.heap.clone())]);
            list.SetComputeRootSignature(&self.root_signature);
        }

        for index in 0..self.passes.len() {
            if index > 0 {
                Self::transition(
                    device,
                    &mut self.intermediates[index - 1],
                    D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE,
                );
            }
            Self::transition(
                device,
                &mut self.intermediates[index],
                D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
            );

            let (srv, uav) = descriptor_slots(index);
            let pass = &self.passes[index];
            unsafe {
                list.SetPipelineState(&pass.pipeline);
                list.SetComputeRoot32BitConstants(
                    0,
                    CONSTANT_WORDS as u32,
                    pass.constants.as_ptr() as *const c_void,
                    0,
                );
                list.SetComputeRootDescriptorTable(1, self.gpu_handle(srv));
                list.SetComputeRootDescriptorTable(2, self.gpu_handle(uav));
                list.Dispatch(pass.dispatch.0, pass.dispatch.1, 1);
            }
        }

        let last = self
            .intermediates
            .last_mut()
            .ok_or_else(|| MagnifyError::Platform(anyhow::anyhow!("effect chain has no passes")))?;
        Self::transition(device, last, D3D12_RESOURCE_STATE_COPY_SOURCE);
        Ok(&last.texture)
    }

    fn last_output<'a>(&'a self, input: &'a ID3D12Resource) -> &'a ID3D12Resource {
        self.intermediates.last().map_or(input, |last| &last.texture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_bundled_effect_name_is_unique() {
        let mut names: Vec<&str> = BUILTIN_KERNELS
            .iter()
            .flat_map(|(_, names)| names.iter().copied())
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
        assert!(names.contains(&"HQBicubic"));
        assert!(names.contains(&"mitchell"));
    }

    #[test]
    fn descriptor_slots_interleave_input_and_output() {
        assert_eq!(descriptor_slots(0), (0, 1));
        assert_eq!(descriptor_slots(3), (6, 7));
    }

    #[test]
    fn host_kernels_are_not_replaced() {
        let mut registry = KernelRegistry::new();
        for (_, names) in BUILTIN_KERNELS {
            for name in names {
                registry.register(*name, vec![0xAB]);
            }
        }
        register_builtin_kernels(&mut registry);
        assert_eq!(registry.get("lanczos6").map(|code| code.to_vec()), Some(vec![0xAB]));
        assert_eq!(registry.get("HQBicubic").map(|code| code.to_vec()), Some(vec![0xAB]));
    }
}
