//! Host/device buffer pairs backing the engine's bindings.
//!
//! Each binding gets one pinned (page-locked) host region and one device
//! region of identical logical size, allocated once at load and reused for
//! every call. Both sides are context-affine: they are created, used, and
//! dropped on the executor thread only.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaSlice, CudaStream, DevicePtr};
use ndarray::{ArrayD, IxDyn};

use crate::cuda::stream::raw_stream;
use crate::cuda::sys::{self, CUdeviceptr};
use crate::error::CudaError;

/// Page-locked host memory holding `len` f32 elements.
///
/// Pinning keeps the region resident so the driver can DMA to and from it
/// asynchronously.
pub struct PinnedHostBuffer {
    ptr: NonNull<f32>,
    len: usize,
}

impl PinnedHostBuffer {
    /// Allocate a zeroed, page-locked region for `len` f32 elements.
    pub fn alloc(len: usize) -> Result<Self, CudaError> {
        let bytes = len * std::mem::size_of::<f32>();
        let mut raw: *mut c_void = std::ptr::null_mut();
        // SAFETY: raw is valid out storage for the allocation pointer.
        let rc = unsafe { sys::cu_mem_host_alloc(&mut raw, bytes, 0)? };
        sys::check_cu(rc, "cuMemHostAlloc")?;

        let ptr = NonNull::new(raw as *mut f32)
            .ok_or_else(|| CudaError::Alloc("cuMemHostAlloc returned a null region".into()))?;
        // SAFETY: the region is freshly allocated, byte-aligned for f32, and
        // `bytes` long.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, len) };
        Ok(Self { ptr, len })
    }

    /// Number of f32 elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[f32] {
        // SAFETY: ptr covers `len` initialized f32 elements for self's lifetime.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        // SAFETY: ptr covers `len` initialized f32 elements and we hold
        // exclusive access through &mut self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    fn as_raw(&self) -> *mut c_void {
        self.ptr.as_ptr() as *mut c_void
    }
}

// SAFETY: the region is exclusively owned and only ever touched from the
// executor thread that allocated it.
unsafe impl Send for PinnedHostBuffer {}

impl Drop for PinnedHostBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr came from cuMemHostAlloc and is freed exactly once.
        let _ = unsafe { sys::cu_mem_free_host(self.as_raw()) };
    }
}

/// A pinned host region paired with a device region of identical logical
/// size, backing one engine binding.
pub struct HostDeviceBuffer {
    pub host: PinnedHostBuffer,
    device: CudaSlice<f32>,
}

impl HostDeviceBuffer {
    /// Allocate both sides for `len` f32 elements on `device`.
    pub fn alloc(device: &Arc<CudaDevice>, len: usize) -> Result<Self, CudaError> {
        let host = PinnedHostBuffer::alloc(len)?;
        let device = device
            .alloc_zeros::<f32>(len)
            .map_err(|e| CudaError::Alloc(e.to_string()))?;
        Ok(Self { host, device })
    }

    /// Raw device address, as recorded in the execution-time binding list.
    pub fn device_address(&self) -> CUdeviceptr {
        *self.device.device_ptr()
    }

    /// Logical size of either side in bytes.
    pub fn byte_len(&self) -> usize {
        self.host.len() * std::mem::size_of::<f32>()
    }

    /// Enqueue an asynchronous host-to-device copy of the whole region on
    /// `stream`.
    pub fn upload(&mut self, stream: &CudaStream) -> Result<(), CudaError> {
        // SAFETY: both regions are live, identically sized, and the host side
        // is pinned.
        let rc = unsafe {
            sys::cu_memcpy_htod_async(
                self.device_address(),
                self.host.as_raw(),
                self.byte_len(),
                raw_stream(stream),
            )?
        };
        sys::check_cu(rc, "cuMemcpyHtoDAsync")
    }

    /// Enqueue an asynchronous device-to-host copy of the whole region on
    /// `stream`.
    pub fn download(&mut self, stream: &CudaStream) -> Result<(), CudaError> {
        // SAFETY: both regions are live, identically sized, and the host side
        // is pinned.
        let rc = unsafe {
            sys::cu_memcpy_dtoh_async(
                self.host.as_raw(),
                self.device_address(),
                self.byte_len(),
                raw_stream(stream),
            )?
        };
        sys::check_cu(rc, "cuMemcpyDtoHAsync")
    }
}

/// An output binding's buffer pair plus its recorded shape, so the raw host
/// region can be read back as a multi-dimensional array.
pub struct OutputBuffer {
    pub mem: HostDeviceBuffer,
    shape: Vec<usize>,
}

impl OutputBuffer {
    pub fn new(mem: HostDeviceBuffer, shape: Vec<usize>) -> Self {
        Self { mem, shape }
    }

    /// Recorded binding shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Current contents of the host region, shaped by the recorded binding
    /// shape. The copy decouples the caller from the next call's overwrite.
    pub fn to_array(&self) -> ArrayD<f32> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.mem.host.as_slice().to_vec())
            .expect("host region length matches the recorded binding shape")
    }
}
