//! Execution plan wrapper: ONNX Runtime restricted to the TensorRT
//! execution provider, driven through device-pointer IO binding.
//!
//! # Device-pointer binding
//!
//! The engine's input and output tensors are bound directly to the buffer
//! set's device addresses through ORT's IO binding API, so execution reads
//! and writes our device regions in place and no extra staging copies occur.
//!
//! # Stream ordering
//!
//! The provider executes on its own internal stream and `run_binding` is
//! synchronous: it returns only after all device kernels have completed, at
//! which point global memory is coherent for any later reader. The caller
//! must drain the work stream carrying the input copy before invoking
//! [`execute`], and owns the post-execution output copies and their
//! synchronize.

use std::path::Path;

use ort::session::Session;
use ort::sys as ort_sys;
use ort::value::Value as OrtValue;

use ort::execution_providers::TensorRTExecutionProvider;

use crate::cuda::sys::CUdeviceptr;
use crate::engine::binding::{Binding, BindingRole};
use crate::error::{InferError, LoadError};

/// Deserialize the model artifact at `path` into an execution plan bound to
/// `device_ordinal`, refusing to fall back to any non-TensorRT provider.
pub fn open(path: &Path, device_ordinal: usize) -> Result<Session, LoadError> {
    let artifact_err = |reason: String| LoadError::Artifact {
        path: path.display().to_string(),
        reason,
    };

    let trt_ep = TensorRTExecutionProvider::default()
        .with_device_id(device_ordinal as i32)
        .with_engine_cache(true)
        .with_engine_cache_path(
            path.parent()
                .unwrap_or(path)
                .join("trt_cache")
                .to_string_lossy()
                .to_string(),
        );

    Session::builder()
        .map_err(|e| artifact_err(e.to_string()))?
        .with_execution_providers([trt_ep.build().error_on_failure()])
        .map_err(|e| artifact_err(e.to_string()))?
        .with_intra_threads(1)
        .map_err(|e| artifact_err(e.to_string()))?
        .commit_from_file(path)
        .map_err(|e| artifact_err(e.to_string()))
}

/// Derive the binding table from the plan's port metadata.
///
/// Every port must be a fixed-shape f32 tensor; the table is immutable for
/// the life of the loaded engine.
pub fn bindings(session: &Session) -> Result<Vec<Binding>, LoadError> {
    let mut table = Vec::new();

    let inputs = session.inputs();
    for index in 0..inputs.len() {
        let info = &inputs[index];
        let name = info.name().to_string();
        let dims = match info.dtype() {
            ort::value::ValueType::Tensor { ty, shape, .. } => {
                let ty = ty.clone();
                if ty != ort::tensor::TensorElementType::Float32 {
                    return Err(LoadError::Metadata(format!(
                        "binding {name} has element type {ty:?}, expected f32"
                    )));
                }
                shape.clone()
            }
            other => {
                return Err(LoadError::Metadata(format!(
                    "binding {name} is not a tensor port: {other:?}"
                )));
            }
        };
        table.push(port_binding(name, BindingRole::Input, &dims)?);
    }

    let outputs = session.outputs();
    for index in 0..outputs.len() {
        let info = &outputs[index];
        let name = info.name().to_string();
        let dims = match info.dtype() {
            ort::value::ValueType::Tensor { ty, shape, .. } => {
                let ty = ty.clone();
                if ty != ort::tensor::TensorElementType::Float32 {
                    return Err(LoadError::Metadata(format!(
                        "binding {name} has element type {ty:?}, expected f32"
                    )));
                }
                shape.clone()
            }
            other => {
                return Err(LoadError::Metadata(format!(
                    "binding {name} is not a tensor port: {other:?}"
                )));
            }
        };
        table.push(port_binding(name, BindingRole::Output, &dims)?);
    }

    Ok(table)
}

fn port_binding(name: String, role: BindingRole, dims: &[i64]) -> Result<Binding, LoadError> {
    let mut shape = Vec::with_capacity(dims.len());
    for &dim in dims {
        if dim <= 0 {
            return Err(LoadError::Metadata(format!(
                "binding {name} has a dynamic or non-positive dim in {dims:?}"
            )));
        }
        shape.push(dim as usize);
    }
    Ok(Binding { name, role, shape })
}

/// Run the plan once over the recorded device addresses, in plan binding
/// order. Blocks until device execution has completed.
pub fn execute(
    session: &mut Session,
    bindings: &[Binding],
    addresses: &[CUdeviceptr],
    device_ordinal: usize,
) -> Result<(), InferError> {
    let mut io = session
        .create_binding()
        .map_err(|e| InferError::Execution(e.to_string()))?;

    for (binding, &address) in bindings.iter().zip(addresses) {
        // SAFETY: each address is a live device allocation of exactly
        // `byte_len` bytes owned by the buffer set for this engine.
        let tensor = unsafe {
            device_tensor(address, binding.byte_len(), &binding.shape, device_ordinal)?
        };
        match binding.role {
            BindingRole::Input => io
                .bind_input(&binding.name, &tensor)
                .map_err(|e| InferError::Execution(e.to_string()))?,
            BindingRole::Output => io
                .bind_output(&binding.name, tensor)
                .map_err(|e| InferError::Execution(e.to_string()))?,
        }
    }

    session
        .run_binding(&io)
        .map_err(|e| InferError::Execution(e.to_string()))?;
    Ok(())
}

/// Wrap a raw device allocation as an ORT tensor value without copying.
///
/// # Safety
/// `address` must point to a live device allocation of at least `bytes`
/// bytes that outlives the returned value.
unsafe fn device_tensor(
    address: CUdeviceptr,
    bytes: usize,
    shape: &[usize],
    device_ordinal: usize,
) -> Result<OrtValue, InferError> {
    let api = ort::api();
    let dims: Vec<i64> = shape.iter().map(|&d| d as i64).collect();

    let name = std::ffi::CString::new("Cuda").expect("static allocator name is valid");
    let mut mem_info_ptr: *mut ort_sys::OrtMemoryInfo = std::ptr::null_mut();
    // SAFETY: name is NUL-terminated and mem_info_ptr is valid out storage.
    let status = unsafe {
        (api.CreateMemoryInfo)(
            name.as_ptr(),
            ort_sys::OrtAllocatorType::OrtDeviceAllocator,
            device_ordinal as i32,
            ort_sys::OrtMemType::OrtMemTypeDefault,
            &mut mem_info_ptr,
        )
    };
    if !status.0.is_null() {
        // SAFETY: a non-null status must be released exactly once.
        unsafe { (api.ReleaseStatus)(status.0) };
        return Err(InferError::Execution(
            "failed to create CUDA memory info".into(),
        ));
    }

    let mut value_ptr: *mut ort_sys::OrtValue = std::ptr::null_mut();
    // SAFETY: mem_info_ptr is valid, the data pointer covers `bytes` bytes of
    // device memory, and dims describe exactly that extent.
    let status = unsafe {
        (api.CreateTensorWithDataAsOrtValue)(
            mem_info_ptr,
            address as *mut std::ffi::c_void,
            bytes as _,
            dims.as_ptr(),
            dims.len() as _,
            ort::tensor::TensorElementType::Float32.into(),
            &mut value_ptr,
        )
    };
    // The tensor does not take ownership of the memory info.
    // SAFETY: mem_info_ptr came from CreateMemoryInfo above.
    unsafe { (api.ReleaseMemoryInfo)(mem_info_ptr) };

    if !status.0.is_null() {
        // SAFETY: a non-null status must be released exactly once.
        unsafe { (api.ReleaseStatus)(status.0) };
        return Err(InferError::Execution(
            "failed to wrap device memory as a tensor".into(),
        ));
    }

    let ptr = std::ptr::NonNull::new(value_ptr)
        .ok_or_else(|| InferError::Execution("tensor creation returned null".into()))?;
    // SAFETY: ptr is a freshly created OrtValue we own.
    Ok(unsafe { ort::value::Value::<ort::value::DynValueTypeMarker>::from_ptr(ptr, None) })
}
