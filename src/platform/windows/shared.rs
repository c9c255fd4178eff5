use anyhow::Context;
use windows::Win32::Foundation::{CloseHandle, GENERIC_ALL, HANDLE};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BOX, ID3D11Device5, ID3D11DeviceContext4, ID3D11Fence, ID3D11Texture2D,
};
use windows::Win32::Graphics::Direct3D12::{
    D3D12_CPU_PAGE_PROPERTY_UNKNOWN, D3D12_FENCE_FLAG_SHARED, D3D12_HEAP_FLAG_NONE,
    D3D12_HEAP_FLAG_SHARED, D3D12_HEAP_FLAGS, D3D12_HEAP_PROPERTIES, D3D12_HEAP_TYPE_DEFAULT,
    D3D12_MEMORY_POOL_UNKNOWN, D3D12_RESOURCE_DESC, D3D12_RESOURCE_DIMENSION_TEXTURE2D,
    D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET, D3D12_RESOURCE_FLAG_ALLOW_SIMULTANEOUS_ACCESS,
    D3D12_RESOURCE_FLAG_NONE, D3D12_RESOURCE_FLAGS, D3D12_RESOURCE_STATE_COMMON,
    D3D12_RESOURCE_STATE_COPY_DEST, D3D12_RESOURCE_STATE_COPY_SOURCE,
    D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE, D3D12_RESOURCE_STATES,
    D3D12_TEXTURE_LAYOUT_UNKNOWN, ID3D12Device, ID3D12Fence, ID3D12Resource,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC,
};
use windows::core::PCWSTR;

use crate::error::{MagnifyError, MagnifyResult};
use crate::geometry::{Rect, Size};
use crate::sync::{BridgeReader, BridgeWriter};

use super::device::D3D12DeviceContext;

/// State every frame-source output rests in between frames: readable by
/// copies and by compute shaders.
pub(crate) const OUTPUT_RESTING_STATE: D3D12_RESOURCE_STATES = D3D12_RESOURCE_STATES(
    D3D12_RESOURCE_STATE_COPY_SOURCE.0 | D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE.0,
);

pub(crate) fn create_texture(
    device: &ID3D12Device,
    size: Size,
    format: DXGI_FORMAT,
    flags: D3D12_RESOURCE_FLAGS,
    heap_flags: D3D12_HEAP_FLAGS,
    initial_state: D3D12_RESOURCE_STATES,
) -> MagnifyResult<ID3D12Resource> {
    let heap_props = D3D12_HEAP_PROPERTIES {
        Type: D3D12_HEAP_TYPE_DEFAULT,
        CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
        MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
        CreationNodeMask: 0,
        VisibleNodeMask: 0,
    };
    let desc = D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
        Alignment: 0,
        Width: u64::from(size.width),
        Height: size.height,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: format,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
        Flags: flags,
    };

    let mut resource: Option<ID3D12Resource> = None;
    unsafe {
        device.CreateCommittedResource(
            &heap_props,
            heap_flags,
            &desc,
            initial_state,
            None,
            &mut resource,
        )
    }
    .map_err(|err| {
        MagnifyError::Initialization(format!(
            "failed to create a {}x{} texture: {err}",
            size.width, size.height
        ))
    })?;
    resource.ok_or_else(|| {
        MagnifyError::Initialization("CreateCommittedResource returned no resource".into())
    })
}

/// BGRA output texture of a frame source, created in its resting state.
pub(crate) fn create_output_texture(
    device: &ID3D12Device,
    size: Size,
) -> MagnifyResult<ID3D12Resource> {
    create_texture(
        device,
        size,
        DXGI_FORMAT_B8G8R8A8_UNORM,
        D3D12_RESOURCE_FLAG_NONE,
        D3D12_HEAP_FLAG_NONE,
        OUTPUT_RESTING_STATE,
    )
}

/// Records `copy` bracketed by the transitions `output` needs to be a copy
/// destination.
pub(crate) fn copy_into_output(
    device: &D3D12DeviceContext,
    output: &ID3D12Resource,
    copy: impl FnOnce(&D3D12DeviceContext),
) {
    device.record_transition(output, OUTPUT_RESTING_STATE, D3D12_RESOURCE_STATE_COPY_DEST);
    copy(device);
    device.record_transition(output, D3D12_RESOURCE_STATE_COPY_DEST, OUTPUT_RESTING_STATE);
}

struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

/// A texture and fence created on the render device and opened on the
/// secondary D3D11 device.
pub(crate) struct SharedTexturePair {
    texture12: ID3D12Resource,
    fence12: ID3D12Fence,
    texture11: ID3D11Texture2D,
    fence11: ID3D11Fence,
}

impl SharedTexturePair {
    pub(crate) fn new(
        device: &ID3D12Device,
        secondary: &ID3D11Device5,
        size: Size,
    ) -> MagnifyResult<Self> {
        let texture12 = create_texture(
            device,
            size,
            DXGI_FORMAT_B8G8R8A8_UNORM,
            D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET | D3D12_RESOURCE_FLAG_ALLOW_SIMULTANEOUS_ACCESS,
            D3D12_HEAP_FLAG_SHARED,
            D3D12_RESOURCE_STATE_COMMON,
        )?;
        let fence12: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_SHARED) }
            .map_err(|err| MagnifyError::Initialization(format!("shared CreateFence failed: {err}")))?;

        let texture_handle = OwnedHandle(
            unsafe { device.CreateSharedHandle(&texture12, None, GENERIC_ALL.0, PCWSTR::null()) }
                .context("CreateSharedHandle failed for the shared texture")
                .map_err(MagnifyError::Platform)?,
        );
        let texture11: ID3D11Texture2D = unsafe { secondary.OpenSharedResource1(texture_handle.0) }
            .context("OpenSharedResource1 failed")
            .map_err(MagnifyError::Platform)?;

        let fence_handle = OwnedHandle(
            unsafe { device.CreateSharedHandle(&fence12, None, GENERIC_ALL.0, PCWSTR::null()) }
                .context("CreateSharedHandle failed for the shared fence")
                .map_err(MagnifyError::Platform)?,
        );
        let fence11: ID3D11Fence = unsafe { secondary.OpenSharedFence(fence_handle.0) }
            .context("OpenSharedFence failed")
            .map_err(MagnifyError::Platform)?;

        Ok(Self {
            texture12,
            fence12,
            texture11,
            fence11,
        })
    }

    /// Splits the pair into the producer half and the render-queue half.
    /// The reader copies into `output`, which must rest in
    /// [`OUTPUT_RESTING_STATE`].
    pub(crate) fn into_bridge(
        self,
        context: ID3D11DeviceContext4,
        output: ID3D12Resource,
    ) -> (D3D11BridgeWriter, D3D12BridgeReader) {
        (
            D3D11BridgeWriter {
                context,
                shared: self.texture11,
                fence: self.fence11,
                source: None,
            },
            D3D12BridgeReader {
                fence: self.fence12,
                shared: self.texture12,
                output,
            },
        )
    }
}

/// Copies captured regions into the shared texture on the secondary device.
pub(crate) struct D3D11BridgeWriter {
    context: ID3D11DeviceContext4,
    shared: ID3D11Texture2D,
    fence: ID3D11Fence,
    source: Option<ID3D11Texture2D>,
}

// SAFETY: the secondary device is created without the single-threaded flag,
// and the writer is only used by one thread at a time behind its owner.
unsafe impl Send for D3D11BridgeWriter {}

impl D3D11BridgeWriter {
    /// Image the next `copy_region` reads from.
    pub(crate) fn set_source(&mut self, texture: ID3D11Texture2D) {
        self.source = Some(texture);
    }

    pub(crate) fn clear_source(&mut self) {
        self.source = None;
    }
}

impl BridgeWriter for D3D11BridgeWriter {
    fn copy_region(&mut self, region: &Rect) -> MagnifyResult<()> {
        let source = self.source.as_ref().ok_or_else(|| {
            MagnifyError::TransientCapture("no captured image to copy from".to_string())
        })?;
        let src_box = D3D11_BOX {
            left: region.left.max(0) as u32,
            top: region.top.max(0) as u32,
            front: 0,
            right: region.right.max(0) as u32,
            bottom: region.bottom.max(0) as u32,
            back: 1,
        };
        unsafe {
            self.context
                .CopySubresourceRegion(&self.shared, 0, 0, 0, 0, source, 0, Some(&src_box));
        }
        Ok(())
    }

    fn signal(&mut self, value: u64) -> MagnifyResult<()> {
        unsafe { self.context.Signal(&self.fence, value) }
            .map_err(|err| MagnifyError::TransientCapture(format!("shared fence signal failed: {err}")))?;
        unsafe { self.context.Flush() };
        Ok(())
    }
}

/// Makes the render queue wait on the shared fence and moves the shared
/// image into the frame source's output.
pub(crate) struct D3D12BridgeReader {
    fence: ID3D12Fence,
    shared: ID3D12Resource,
    output: ID3D12Resource,
}

impl D3D12BridgeReader {
    pub(crate) fn output(&self) -> &ID3D12Resource {
        &self.output
    }
}

impl BridgeReader<D3D12DeviceContext> for D3D12BridgeReader {
    fn wait_and_copy(&mut self, device: &mut D3D12DeviceContext, value: u64) -> MagnifyResult<()> {
        unsafe { device.queue().Wait(&self.fence, value) }
            .map_err(|err| device.classify(err, "ID3D12CommandQueue::Wait failed"))?;
        copy_into_output(device, &self.output, |device| unsafe {
            device.command_list().CopyResource(&self.output, &self.shared);
        });
        Ok(())
    }
}
