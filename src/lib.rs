//! TensorRT-accelerated detection inference core for multi-object tracking.
//!
//! The crate wraps a pre-compiled, device-resident detection engine behind a
//! thread-safe call surface. CUDA execution contexts are only valid on the
//! thread that created them, so all device work is funnelled through a
//! dedicated worker thread ([`Executor`]); callers on any thread submit work
//! and block for the result. The loaded engine owns one pinned-host/device
//! buffer pair per engine binding, allocated once at load and reused for
//! every call.
//!
//! The GPU backend (CUDA device handle, pinned memory, ONNX Runtime TensorRT
//! execution provider) is gated behind the `tensorrt` feature; the executor,
//! preprocessing stage, and binding validation build and test without it.

pub mod engine;
pub mod error;
pub mod executor;
pub mod preprocess;

#[cfg(feature = "tensorrt")]
pub mod cuda;

pub use engine::{Binding, BindingRole};
pub use error::{CudaError, ExecutorError, InferError, LoadError};
pub use executor::Executor;
pub use preprocess::preprocess;

#[cfg(feature = "tensorrt")]
pub use engine::{DetectorConfig, TrtDetector};
