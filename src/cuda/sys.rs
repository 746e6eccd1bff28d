//! Minimal CUDA driver FFI for pinned host memory and stream-ordered copies.
//!
//! Only the handful of driver entry points the buffer layer needs and that
//! `cudarc`'s device API does not surface. On Linux the symbols are resolved
//! from the installed driver with `dlopen`/`dlsym`; elsewhere they are linked
//! directly.

#[cfg(target_os = "linux")]
use std::ffi::{CStr, CString, c_char};
use std::ffi::{c_uint, c_void};
#[cfg(target_os = "linux")]
use std::sync::OnceLock;

use crate::error::CudaError;

pub type CUresult = i32;
pub type CUdeviceptr = u64;
pub type CUstream = *mut c_void;

pub const CUDA_SUCCESS: CUresult = 0;

#[cfg(not(target_os = "linux"))]
unsafe extern "C" {
    fn cuMemHostAlloc(pp: *mut *mut c_void, bytesize: usize, Flags: c_uint) -> CUresult;
    fn cuMemFreeHost(p: *mut c_void) -> CUresult;
    fn cuMemcpyHtoDAsync_v2(
        dstDevice: CUdeviceptr,
        srcHost: *const c_void,
        ByteCount: usize,
        hStream: CUstream,
    ) -> CUresult;
    fn cuMemcpyDtoHAsync_v2(
        dstHost: *mut c_void,
        srcDevice: CUdeviceptr,
        ByteCount: usize,
        hStream: CUstream,
    ) -> CUresult;
    fn cuStreamSynchronize(hStream: CUstream) -> CUresult;
}

#[cfg(target_os = "linux")]
unsafe extern "C" {
    fn dlopen(filename: *const c_char, flags: i32) -> *mut c_void;
    fn dlerror() -> *const c_char;
    fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
}

#[cfg(target_os = "linux")]
const RTLD_NOW: i32 = 2;
#[cfg(target_os = "linux")]
const RTLD_GLOBAL: i32 = 0x100;

#[cfg(target_os = "linux")]
struct CudaDriverApi {
    cu_mem_host_alloc: unsafe extern "C" fn(*mut *mut c_void, usize, c_uint) -> CUresult,
    cu_mem_free_host: unsafe extern "C" fn(*mut c_void) -> CUresult,
    cu_memcpy_htod_async:
        unsafe extern "C" fn(CUdeviceptr, *const c_void, usize, CUstream) -> CUresult,
    cu_memcpy_dtoh_async:
        unsafe extern "C" fn(*mut c_void, CUdeviceptr, usize, CUstream) -> CUresult,
    cu_stream_synchronize: unsafe extern "C" fn(CUstream) -> CUresult,
}

#[cfg(target_os = "linux")]
static CUDA_DRIVER_API: OnceLock<Result<CudaDriverApi, String>> = OnceLock::new();

#[cfg(target_os = "linux")]
fn last_dl_error() -> String {
    // SAFETY: dlerror returns a thread-local C string or null.
    unsafe {
        let p = dlerror();
        if p.is_null() {
            "unknown dl error".to_string()
        } else {
            CStr::from_ptr(p).to_string_lossy().to_string()
        }
    }
}

#[cfg(target_os = "linux")]
fn load_symbol<T>(handle: *mut c_void, name: &'static str) -> Result<T, String> {
    let cname = CString::new(name).map_err(|_| format!("invalid CUDA symbol name: {name}"))?;
    // SAFETY: handle is a valid dlopen handle and cname is NUL-terminated.
    let ptr = unsafe { dlsym(handle, cname.as_ptr()) };
    if ptr.is_null() {
        Err(format!("dlsym({name}) failed: {}", last_dl_error()))
    } else {
        // SAFETY: ptr points to a driver function with signature T.
        Ok(unsafe { std::mem::transmute_copy(&ptr) })
    }
}

#[cfg(target_os = "linux")]
fn init_driver_api() -> Result<CudaDriverApi, String> {
    let mut handle = std::ptr::null_mut();
    let mut last_err = "unknown dlopen error".to_string();
    for candidate in ["libcuda.so.1", "libcuda.so"] {
        let soname =
            CString::new(candidate).map_err(|_| format!("invalid CUDA soname: {candidate}"))?;
        // SAFETY: static soname and valid dlopen flags.
        handle = unsafe { dlopen(soname.as_ptr(), RTLD_NOW | RTLD_GLOBAL) };
        if !handle.is_null() {
            break;
        }
        last_err = last_dl_error();
    }
    if handle.is_null() {
        return Err(format!("dlopen(libcuda.so.1|libcuda.so) failed: {last_err}"));
    }

    Ok(CudaDriverApi {
        cu_mem_host_alloc: load_symbol(handle, "cuMemHostAlloc")?,
        cu_mem_free_host: load_symbol(handle, "cuMemFreeHost")?,
        cu_memcpy_htod_async: load_symbol(handle, "cuMemcpyHtoDAsync_v2")?,
        cu_memcpy_dtoh_async: load_symbol(handle, "cuMemcpyDtoHAsync_v2")?,
        cu_stream_synchronize: load_symbol(handle, "cuStreamSynchronize")?,
    })
}

#[cfg(target_os = "linux")]
fn driver_api() -> Result<&'static CudaDriverApi, CudaError> {
    let api = CUDA_DRIVER_API.get_or_init(init_driver_api);
    api.as_ref()
        .map_err(|err| CudaError::Unavailable(err.clone()))
}

/// Call `cuMemHostAlloc`.
///
/// # Safety
/// `pp` must be a valid, writable pointer to pointer-sized storage.
pub unsafe fn cu_mem_host_alloc(
    pp: *mut *mut c_void,
    bytesize: usize,
    flags: c_uint,
) -> Result<CUresult, CudaError> {
    #[cfg(target_os = "linux")]
    {
        let api = driver_api()?;
        // SAFETY: function pointer resolved from the driver with this signature.
        Ok(unsafe { (api.cu_mem_host_alloc)(pp, bytesize, flags) })
    }
    #[cfg(not(target_os = "linux"))]
    {
        // SAFETY: FFI call into the CUDA driver API.
        Ok(unsafe { cuMemHostAlloc(pp, bytesize, flags) })
    }
}

/// Call `cuMemFreeHost`.
///
/// # Safety
/// `p` must be a pointer previously returned by `cuMemHostAlloc`.
pub unsafe fn cu_mem_free_host(p: *mut c_void) -> Result<CUresult, CudaError> {
    #[cfg(target_os = "linux")]
    {
        let api = driver_api()?;
        // SAFETY: function pointer resolved from the driver with this signature.
        Ok(unsafe { (api.cu_mem_free_host)(p) })
    }
    #[cfg(not(target_os = "linux"))]
    {
        // SAFETY: FFI call into the CUDA driver API.
        Ok(unsafe { cuMemFreeHost(p) })
    }
}

/// Call `cuMemcpyHtoDAsync_v2`.
///
/// # Safety
/// `dst` must be a valid device allocation of at least `byte_count` bytes,
/// `src` a pinned host region of the same size, and `stream` a live stream on
/// the current context.
pub unsafe fn cu_memcpy_htod_async(
    dst: CUdeviceptr,
    src: *const c_void,
    byte_count: usize,
    stream: CUstream,
) -> Result<CUresult, CudaError> {
    #[cfg(target_os = "linux")]
    {
        let api = driver_api()?;
        // SAFETY: function pointer resolved from the driver with this signature.
        Ok(unsafe { (api.cu_memcpy_htod_async)(dst, src, byte_count, stream) })
    }
    #[cfg(not(target_os = "linux"))]
    {
        // SAFETY: FFI call into the CUDA driver API.
        Ok(unsafe { cuMemcpyHtoDAsync_v2(dst, src, byte_count, stream) })
    }
}

/// Call `cuMemcpyDtoHAsync_v2`.
///
/// # Safety
/// `dst` must be a pinned host region of at least `byte_count` bytes, `src` a
/// valid device allocation of the same size, and `stream` a live stream on
/// the current context.
pub unsafe fn cu_memcpy_dtoh_async(
    dst: *mut c_void,
    src: CUdeviceptr,
    byte_count: usize,
    stream: CUstream,
) -> Result<CUresult, CudaError> {
    #[cfg(target_os = "linux")]
    {
        let api = driver_api()?;
        // SAFETY: function pointer resolved from the driver with this signature.
        Ok(unsafe { (api.cu_memcpy_dtoh_async)(dst, src, byte_count, stream) })
    }
    #[cfg(not(target_os = "linux"))]
    {
        // SAFETY: FFI call into the CUDA driver API.
        Ok(unsafe { cuMemcpyDtoHAsync_v2(dst, src, byte_count, stream) })
    }
}

/// Call `cuStreamSynchronize`.
///
/// # Safety
/// `stream` must be a valid stream handle from the active context.
pub unsafe fn cu_stream_synchronize(stream: CUstream) -> Result<CUresult, CudaError> {
    #[cfg(target_os = "linux")]
    {
        let api = driver_api()?;
        // SAFETY: function pointer resolved from the driver with this signature.
        Ok(unsafe { (api.cu_stream_synchronize)(stream) })
    }
    #[cfg(not(target_os = "linux"))]
    {
        // SAFETY: FFI call into the CUDA driver API.
        Ok(unsafe { cuStreamSynchronize(stream) })
    }
}

#[inline]
pub fn check_cu(result: CUresult, call: &'static str) -> Result<(), CudaError> {
    if result == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(CudaError::Driver { call, code: result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_cu_maps_status_codes() {
        assert!(check_cu(CUDA_SUCCESS, "cuMemHostAlloc").is_ok());
        match check_cu(2, "cuMemHostAlloc") {
            Err(CudaError::Driver { call, code }) => {
                assert_eq!(call, "cuMemHostAlloc");
                assert_eq!(code, 2);
            }
            other => panic!("expected driver error, got {other:?}"),
        }
    }
}
