//! CUDA stream helpers over the `cudarc` stream type.

use cudarc::driver::CudaStream;

use crate::cuda::sys::{self, CUstream};
use crate::error::CudaError;

/// Raw driver handle of a `cudarc` stream, for driver API calls.
#[inline]
pub fn raw_stream(stream: &CudaStream) -> CUstream {
    stream.stream as CUstream
}

/// Block until every operation enqueued on `stream` has completed.
pub fn synchronize(stream: &CudaStream) -> Result<(), CudaError> {
    // SAFETY: the handle comes from a live cudarc stream on this context.
    let rc = unsafe { sys::cu_stream_synchronize(raw_stream(stream))? };
    sys::check_cu(rc, "cuStreamSynchronize")
}
