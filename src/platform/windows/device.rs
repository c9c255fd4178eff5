use std::mem::ManuallyDrop;

use anyhow::Context;
use windows::Win32::Foundation::{
    BOOL, CloseHandle, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET, HANDLE, HWND, RECT,
    WAIT_TIMEOUT,
};
use windows::Win32::Graphics::Direct3D12::{
    D3D12_BOX, D3D12_COMMAND_LIST_TYPE_DIRECT, D3D12_COMMAND_QUEUE_DESC,
    D3D12_CPU_DESCRIPTOR_HANDLE, D3D12_DESCRIPTOR_HEAP_DESC, D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
    D3D12_FENCE_FLAG_NONE, D3D12_RESOURCE_BARRIER, D3D12_RESOURCE_BARRIER_0,
    D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES, D3D12_RESOURCE_BARRIER_FLAG_NONE,
    D3D12_RESOURCE_BARRIER_TYPE_TRANSITION, D3D12_RESOURCE_STATE_COPY_DEST,
    D3D12_RESOURCE_STATE_PRESENT, D3D12_RESOURCE_STATE_RENDER_TARGET, D3D12_RESOURCE_STATES, D3D12_RESOURCE_TRANSITION_BARRIER,
    D3D12_TEXTURE_COPY_LOCATION, D3D12_TEXTURE_COPY_LOCATION_0,
    D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX, D3D12GetDebugInterface, ID3D12CommandAllocator,
    ID3D12CommandQueue, ID3D12Debug, ID3D12DescriptorHeap, ID3D12Device, ID3D12Fence, ID3D12GraphicsCommandList,
    ID3D12Resource,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_ALPHA_MODE_UNSPECIFIED, DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM,
    DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory2, DXGI_CREATE_FACTORY_DEBUG, DXGI_CREATE_FACTORY_FLAGS,
    DXGI_FEATURE_PRESENT_ALLOW_TEARING, DXGI_MWA_NO_ALT_ENTER, DXGI_MWA_NO_PRINT_SCREEN,
    DXGI_PRESENT, DXGI_PRESENT_ALLOW_TEARING, DXGI_SCALING_NONE, DXGI_SWAP_CHAIN_DESC1,
    DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING, DXGI_SWAP_CHAIN_FLAG_FRAME_LATENCY_WAITABLE_OBJECT,
    DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL, DXGI_USAGE_RENDER_TARGET_OUTPUT, IDXGIAdapter1,
    IDXGIFactory4, IDXGIFactory5, IDXGIOutput2, IDXGIOutput6, IDXGISwapChain1, IDXGISwapChain3,
};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};
use windows::Win32::UI::WindowsAndMessaging::GetClientRect;
use windows::core::{IUnknown, Interface, PCWSTR};

use crate::config::SessionConfig;
use crate::device::{RenderDevice, SwapChainPolicy};
use crate::env_config::d3d_debug_layer_enabled;
use crate::error::{MagnifyError, MagnifyResult};
use crate::geometry::{Placement, Size};
use crate::statistics::FrameStatistics;

use super::adapter::{self, SelectedAdapter};

const FRAME_LATENCY_WAIT_MS: u32 = 1000;
const FENCE_WAIT_MS: u32 = 1000;
const LETTERBOX_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Whether a slot fence wait lets the slot's retired objects go. An expired
/// wait keeps them alive and lets the frame proceed.
fn slot_drained(waited: MagnifyResult<()>) -> MagnifyResult<bool> {
    match waited {
        Ok(()) => Ok(true),
        Err(MagnifyError::Timeout) => {
            log::warn!("command slot fence did not complete within {FENCE_WAIT_MS} ms");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Remembers which back buffers have had their letterbox margins cleared.
/// Flip-sequential buffers keep their contents, so each needs one clear.
#[derive(Debug)]
struct BackBufferClears {
    cleared: Vec<bool>,
}

impl BackBufferClears {
    fn new(count: usize) -> Self {
        Self {
            cleared: vec![false; count],
        }
    }

    /// True the first time `index` is used, false afterwards.
    fn needs_clear(&mut self, index: usize) -> bool {
        match self.cleared.get_mut(index) {
            Some(cleared) if !*cleared => {
                *cleared = true;
                true
            }
            _ => false,
        }
    }
}

/// Builds a transition barrier that borrows `resource` without touching its
/// reference count.
pub(crate) fn transition_barrier(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: before,
                StateAfter: after,
            }),
        },
    }
}

/// Copy location addressing subresource 0 of `resource`.
pub(crate) fn subresource_location(resource: &ID3D12Resource) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(resource) },
        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            SubresourceIndex: 0,
        },
    }
}

/// One rotating command slot: its allocator, the fence value that marks its
/// last submission, and objects kept alive until that submission retires.
struct CommandSlot {
    allocator: ID3D12CommandAllocator,
    fence_value: u64,
    retired: Vec<IUnknown>,
}

/// D3D12 device, direct queue and flip-model swap chain bound to the host
/// window.
pub struct D3D12DeviceContext {
    factory: IDXGIFactory4,
    adapter: IDXGIAdapter1,
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
    swap_chain: IDXGISwapChain3,
    back_buffers: Vec<ID3D12Resource>,
    back_buffer_format: DXGI_FORMAT,
    rtv_heap: ID3D12DescriptorHeap,
    rtv_descriptor_size: u32,
    back_buffer_clears: BackBufferClears,
    latency_waitable: HANDLE,
    command_list: ID3D12GraphicsCommandList,
    slots: Vec<CommandSlot>,
    slot_index: usize,
    fence: ID3D12Fence,
    fence_event: HANDLE,
    last_fence_value: u64,
    first_frame: bool,
    back_buffer_in_copy: Option<u32>,
    policy: SwapChainPolicy,
    host_size: Size,
    statistics: FrameStatistics,
}

// SAFETY: every D3D12 and DXGI interface held here is free-threaded, and the
// context is only driven by the thread that owns the session.
unsafe impl Send for D3D12DeviceContext {}

impl D3D12DeviceContext {
    /// Creates the device on the configured adapter and the swap chain for
    /// `host`. The back buffers are BGRA when no effect runs.
    pub(crate) fn new(host: HWND, config: &SessionConfig) -> MagnifyResult<Self> {
        let debug = d3d_debug_layer_enabled();
        if debug {
            enable_debug_layer();
        }

        let factory_flags = if debug {
            DXGI_CREATE_FACTORY_DEBUG
        } else {
            DXGI_CREATE_FACTORY_FLAGS(0)
        };
        let factory: IDXGIFactory4 = unsafe { CreateDXGIFactory2(factory_flags) }
            .map_err(|err| MagnifyError::Initialization(format!("CreateDXGIFactory2 failed: {err}")))?;

        let tearing_supported = query_tearing_support(&factory);
        let policy = SwapChainPolicy::new(config.vsync, config.low_latency, tearing_supported)?;

        let SelectedAdapter { adapter, device } =
            adapter::select_adapter(&factory, config.adapter_index)?;

        let queue: ID3D12CommandQueue = unsafe {
            device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })
        }
        .map_err(|err| MagnifyError::Initialization(format!("CreateCommandQueue failed: {err}")))?;

        let host_size = client_size(host)?;
        let back_buffer_format = if config.effects.is_empty() {
            DXGI_FORMAT_B8G8R8A8_UNORM
        } else {
            DXGI_FORMAT_R8G8B8A8_UNORM
        };
        let swap_chain =
            create_swap_chain(&factory, &queue, host, host_size, back_buffer_format, &policy)?;

        unsafe { factory.MakeWindowAssociation(host, DXGI_MWA_NO_ALT_ENTER | DXGI_MWA_NO_PRINT_SCREEN) }
            .context("MakeWindowAssociation failed")
            .map_err(MagnifyError::Platform)?;
        unsafe { swap_chain.SetMaximumFrameLatency(policy.max_frame_latency()) }
            .context("SetMaximumFrameLatency failed")
            .map_err(MagnifyError::Platform)?;
        let latency_waitable = unsafe { swap_chain.GetFrameLatencyWaitableObject() };
        log_composition_support(&swap_chain);

        let back_buffers = (0..policy.back_buffer_count())
            .map(|index| unsafe { swap_chain.GetBuffer::<ID3D12Resource>(index) })
            .collect::<windows::core::Result<Vec<_>>>()
            .context("IDXGISwapChain::GetBuffer failed")
            .map_err(MagnifyError::Platform)?;

        let rtv_heap: ID3D12DescriptorHeap = unsafe {
            device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                NumDescriptors: back_buffers.len() as u32,
                ..Default::default()
            })
        }
        .map_err(|err| {
            MagnifyError::Initialization(format!("CreateDescriptorHeap failed for the back buffers: {err}"))
        })?;
        let rtv_descriptor_size =
            unsafe { device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) };
        let mut rtv_handle = unsafe { rtv_heap.GetCPUDescriptorHandleForHeapStart() };
        for back_buffer in &back_buffers {
            unsafe { device.CreateRenderTargetView(back_buffer, None, rtv_handle) };
            rtv_handle.ptr += rtv_descriptor_size as usize;
        }

        let slots = (0..policy.frame_slots())
            .map(|_| {
                unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }.map(
                    |allocator| CommandSlot {
                        allocator,
                        fence_value: 0,
                        retired: Vec::new(),
                    },
                )
            })
            .collect::<windows::core::Result<Vec<_>>>()
            .map_err(|err| {
                MagnifyError::Initialization(format!("CreateCommandAllocator failed: {err}"))
            })?;

        // Created open: the first frame records without a reset.
        let command_list: ID3D12GraphicsCommandList = unsafe {
            device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &slots[0].allocator, None)
        }
        .map_err(|err| MagnifyError::Initialization(format!("CreateCommandList failed: {err}")))?;

        let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }
            .map_err(|err| MagnifyError::Initialization(format!("CreateFence failed: {err}")))?;
        let fence_event = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }
            .context("CreateEventW failed")
            .map_err(MagnifyError::Platform)?;

        log::info!(
            "device context ready: host {}x{}, {} back buffers, {} command slots, vsync {}, tearing {}",
            host_size.width,
            host_size.height,
            back_buffers.len(),
            slots.len(),
            policy.vsync,
            policy.tearing_supported
        );

        Ok(Self {
            factory,
            adapter,
            device,
            queue,
            swap_chain,
            back_buffer_clears: BackBufferClears::new(back_buffers.len()),
            back_buffers,
            back_buffer_format,
            rtv_heap,
            rtv_descriptor_size,
            latency_waitable,
            command_list,
            slots,
            slot_index: 0,
            fence,
            fence_event,
            last_fence_value: 0,
            first_frame: true,
            back_buffer_in_copy: None,
            policy,
            host_size,
            statistics: FrameStatistics::new(),
        })
    }

    pub(crate) fn device(&self) -> &ID3D12Device {
        &self.device
    }

    pub(crate) fn queue(&self) -> &ID3D12CommandQueue {
        &self.queue
    }

    pub(crate) fn command_list(&self) -> &ID3D12GraphicsCommandList {
        &self.command_list
    }

    pub(crate) fn adapter(&self) -> &IDXGIAdapter1 {
        &self.adapter
    }

    pub(crate) fn factory(&self) -> &IDXGIFactory4 {
        &self.factory
    }

    pub fn back_buffer_format(&self) -> DXGI_FORMAT {
        self.back_buffer_format
    }

    pub fn policy(&self) -> &SwapChainPolicy {
        &self.policy
    }

    /// Keeps `object` alive until the commands recorded in the current slot
    /// have executed.
    pub(crate) fn retire(&mut self, object: impl Into<IUnknown>) {
        self.slots[self.slot_index].retired.push(object.into());
    }

    pub(crate) fn record_transition(
        &self,
        resource: &ID3D12Resource,
        before: D3D12_RESOURCE_STATES,
        after: D3D12_RESOURCE_STATES,
    ) {
        unsafe {
            self.command_list
                .ResourceBarrier(&[transition_barrier(resource, before, after)]);
        }
    }

    /// Maps a failed call to `DeviceLost` when the device has been removed.
    pub(crate) fn classify(&self, err: windows::core::Error, what: &'static str) -> MagnifyError {
        if self.is_device_removed() || is_device_loss_code(&err) {
            log::error!("{what} failed because the device was lost: {err}");
            return MagnifyError::DeviceLost;
        }
        MagnifyError::Platform(anyhow::Error::from(err).context(what))
    }

    fn rtv_handle(&self, index: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        let start = unsafe { self.rtv_heap.GetCPUDescriptorHandleForHeapStart() };
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + (index * self.rtv_descriptor_size) as usize,
        }
    }

    fn is_device_removed(&self) -> bool {
        unsafe { self.device.GetDeviceRemovedReason() }.is_err()
    }

    fn wait_for_fence(&self, value: u64, timeout_ms: u32) -> MagnifyResult<()> {
        if unsafe { self.fence.GetCompletedValue() } >= value {
            return Ok(());
        }
        unsafe { self.fence.SetEventOnCompletion(value, self.fence_event) }
            .map_err(|err| self.classify(err, "ID3D12Fence::SetEventOnCompletion failed"))?;
        if unsafe { WaitForSingleObject(self.fence_event, timeout_ms) } == WAIT_TIMEOUT {
            return Err(MagnifyError::Timeout);
        }
        Ok(())
    }

    fn signal_queue(&mut self) -> MagnifyResult<u64> {
        let value = self.last_fence_value + 1;
        unsafe { self.queue.Signal(&self.fence, value) }
            .map_err(|err| self.classify(err, "ID3D12CommandQueue::Signal failed"))?;
        self.last_fence_value = value;
        Ok(value)
    }
}

impl RenderDevice for D3D12DeviceContext {
    type Texture = ID3D12Resource;

    fn host_size(&self) -> Size {
        self.host_size
    }

    fn begin_frame(&mut self) -> MagnifyResult<()> {
        if unsafe { WaitForSingleObject(self.latency_waitable, FRAME_LATENCY_WAIT_MS) }
            == WAIT_TIMEOUT
        {
            log::warn!("frame latency waitable timed out after {FRAME_LATENCY_WAIT_MS} ms");
        }

        let slot_fence = self.slots[self.slot_index].fence_value;
        if slot_drained(self.wait_for_fence(slot_fence, FENCE_WAIT_MS))? {
            self.slots[self.slot_index].retired.clear();
        }

        if self.first_frame {
            self.first_frame = false;
            return Ok(());
        }

        let allocator = &self.slots[self.slot_index].allocator;
        unsafe { allocator.Reset() }
            .map_err(|err| self.classify(err, "ID3D12CommandAllocator::Reset failed"))?;
        unsafe { self.command_list.Reset(allocator, None) }
            .map_err(|err| self.classify(err, "ID3D12GraphicsCommandList::Reset failed"))?;
        Ok(())
    }

    fn end_frame(&mut self) -> MagnifyResult<()> {
        if let Some(index) = self.back_buffer_in_copy.take() {
            let back_buffer = &self.back_buffers[index as usize];
            self.record_transition(
                back_buffer,
                D3D12_RESOURCE_STATE_COPY_DEST,
                D3D12_RESOURCE_STATE_PRESENT,
            );
        }

        unsafe { self.command_list.Close() }
            .map_err(|err| self.classify(err, "ID3D12GraphicsCommandList::Close failed"))?;
        let list = self
            .command_list
            .cast()
            .context("command list is not an ID3D12CommandList")
            .map_err(MagnifyError::Platform)?;
        unsafe { self.queue.ExecuteCommandLists(&[Some(list)]) };

        let (sync_interval, allow_tearing) = self.policy.present_params();
        let flags = if allow_tearing {
            DXGI_PRESENT_ALLOW_TEARING
        } else {
            DXGI_PRESENT(0)
        };
        let presented = unsafe { self.swap_chain.Present(sync_interval, flags) };
        if presented == DXGI_ERROR_DEVICE_REMOVED || presented == DXGI_ERROR_DEVICE_RESET {
            log::error!("present failed because the device was lost: {presented:?}");
            return Err(MagnifyError::DeviceLost);
        }
        if let Err(err) = presented.ok() {
            log::error!("IDXGISwapChain::Present failed: {err}");
        }

        let value = self.signal_queue()?;
        self.slots[self.slot_index].fence_value = value;
        self.slot_index = (self.slot_index + 1) % self.slots.len();
        self.statistics.tick();
        Ok(())
    }

    fn wait_for_gpu(&mut self) -> MagnifyResult<()> {
        let value = self.signal_queue()?;
        self.wait_for_fence(value, FENCE_WAIT_MS)?;
        for slot in &mut self.slots {
            slot.retired.clear();
        }
        Ok(())
    }

    fn copy_to_back_buffer(
        &mut self,
        texture: &ID3D12Resource,
        placement: &Placement,
    ) -> MagnifyResult<()> {
        let index = unsafe { self.swap_chain.GetCurrentBackBufferIndex() };
        let back_buffer = self
            .back_buffers
            .get(index as usize)
            .cloned()
            .ok_or_else(|| MagnifyError::Platform(anyhow::anyhow!("back buffer {index} is missing")))?;

        if self.back_buffer_in_copy.is_none() {
            if self.back_buffer_clears.needs_clear(index as usize) {
                self.record_transition(
                    &back_buffer,
                    D3D12_RESOURCE_STATE_PRESENT,
                    D3D12_RESOURCE_STATE_RENDER_TARGET,
                );
                unsafe {
                    self.command_list
                        .ClearRenderTargetView(self.rtv_handle(index), &LETTERBOX_COLOR, None);
                }
                self.record_transition(
                    &back_buffer,
                    D3D12_RESOURCE_STATE_RENDER_TARGET,
                    D3D12_RESOURCE_STATE_COPY_DEST,
                );
            } else {
                self.record_transition(
                    &back_buffer,
                    D3D12_RESOURCE_STATE_PRESENT,
                    D3D12_RESOURCE_STATE_COPY_DEST,
                );
            }
            self.back_buffer_in_copy = Some(index);
        }

        let src_box = D3D12_BOX {
            left: placement.src_x,
            top: placement.src_y,
            front: 0,
            right: placement.src_x + placement.width,
            bottom: placement.src_y + placement.height,
            back: 1,
        };
        unsafe {
            self.command_list.CopyTextureRegion(
                &subresource_location(&back_buffer),
                placement.dst_x,
                placement.dst_y,
                0,
                &subresource_location(texture),
                Some(&src_box),
            );
        }
        Ok(())
    }

    fn statistics(&self) -> &FrameStatistics {
        &self.statistics
    }
}

impl Drop for D3D12DeviceContext {
    fn drop(&mut self) {
        // An expired drain leaks the in-flight objects.
        if let Err(err) = self.wait_for_gpu() {
            log::warn!("failed to drain GPU work while dropping the device context: {err}");
        }
        unsafe {
            let _ = CloseHandle(self.fence_event);
            let _ = CloseHandle(self.latency_waitable);
        }
    }
}

fn is_device_loss_code(err: &windows::core::Error) -> bool {
    err.code() == DXGI_ERROR_DEVICE_REMOVED || err.code() == DXGI_ERROR_DEVICE_RESET
}

fn enable_debug_layer() {
    let mut debug: Option<ID3D12Debug> = None;
    match unsafe { D3D12GetDebugInterface(&mut debug) } {
        Ok(()) => {
            if let Some(debug) = debug {
                unsafe { debug.EnableDebugLayer() };
                log::info!("D3D12 debug layer enabled");
            }
        }
        Err(err) => log::warn!("D3D12 debug layer is unavailable: {err}"),
    }
}

fn query_tearing_support(factory: &IDXGIFactory4) -> bool {
    let Ok(factory5) = factory.cast::<IDXGIFactory5>() else {
        return false;
    };
    let mut allow = BOOL::default();
    let queried = unsafe {
        factory5.CheckFeatureSupport(
            DXGI_FEATURE_PRESENT_ALLOW_TEARING,
            &mut allow as *mut BOOL as *mut std::ffi::c_void,
            std::mem::size_of::<BOOL>() as u32,
        )
    };
    queried.is_ok() && allow.as_bool()
}

fn client_size(hwnd: HWND) -> MagnifyResult<Size> {
    let mut rect = RECT::default();
    unsafe { GetClientRect(hwnd, &mut rect) }
        .context("GetClientRect failed for the host window")
        .map_err(MagnifyError::Platform)?;
    let width = (rect.right - rect.left).max(0) as u32;
    let height = (rect.bottom - rect.top).max(0) as u32;
    if width == 0 || height == 0 {
        return Err(MagnifyError::Initialization(
            "host window has an empty client area".to_string(),
        ));
    }
    Ok(Size::new(width, height))
}

fn create_swap_chain(
    factory: &IDXGIFactory4,
    queue: &ID3D12CommandQueue,
    host: HWND,
    size: Size,
    format: DXGI_FORMAT,
    policy: &SwapChainPolicy,
) -> MagnifyResult<IDXGISwapChain3> {
    let mut flags = DXGI_SWAP_CHAIN_FLAG_FRAME_LATENCY_WAITABLE_OBJECT.0;
    if policy.tearing_supported {
        flags |= DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING.0;
    }
    let desc = DXGI_SWAP_CHAIN_DESC1 {
        Width: size.width,
        Height: size.height,
        Format: format,
        Stereo: false.into(),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: policy.back_buffer_count(),
        Scaling: DXGI_SCALING_NONE,
        // Letterbox margins are drawn once and must survive every flip.
        SwapEffect: DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL,
        AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
        Flags: flags as u32,
    };
    let swap_chain: IDXGISwapChain1 =
        unsafe { factory.CreateSwapChainForHwnd(queue, host, &desc, None, None) }.map_err(
            |err| MagnifyError::Initialization(format!("CreateSwapChainForHwnd failed: {err}")),
        )?;
    swap_chain
        .cast()
        .map_err(|err| MagnifyError::Initialization(format!("IDXGISwapChain3 unavailable: {err}")))
}

fn log_composition_support(swap_chain: &IDXGISwapChain3) {
    let Ok(output) = (unsafe { swap_chain.GetContainingOutput() }) else {
        return;
    };
    if let Ok(output2) = output.cast::<IDXGIOutput2>() {
        let overlays = unsafe { output2.SupportsOverlays() }.as_bool();
        log::info!("multiplane overlay support: {overlays}");
    }
    if let Ok(output6) = output.cast::<IDXGIOutput6>()
        && let Ok(flags) = unsafe { output6.CheckHardwareCompositionSupport() }
    {
        log::info!("hardware composition support flags: {flags:#x}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_slot_wait_keeps_the_frame_going() {
        assert!(slot_drained(Ok(())).unwrap());
        assert!(!slot_drained(Err(MagnifyError::Timeout)).unwrap());
        assert!(matches!(
            slot_drained(Err(MagnifyError::DeviceLost)),
            Err(MagnifyError::DeviceLost)
        ));
    }

    #[test]
    fn each_back_buffer_is_cleared_once() {
        let mut clears = BackBufferClears::new(3);
        assert!(clears.needs_clear(0));
        assert!(clears.needs_clear(1));
        assert!(!clears.needs_clear(0));
        assert!(clears.needs_clear(2));
        assert!(!clears.needs_clear(1));
        assert!(!clears.needs_clear(3));
    }
}
