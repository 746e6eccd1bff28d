//! Error types for the executor, engine lifecycle, and inference calls.

use thiserror::Error;

/// Failures raised by the CUDA driver layer.
#[derive(Debug, Error)]
pub enum CudaError {
    /// A driver API call returned a non-success status code.
    #[error("{call} failed with CUDA error code {code}")]
    Driver { call: &'static str, code: i32 },

    /// The driver library could not be loaded or a symbol was missing.
    #[error("CUDA driver unavailable: {0}")]
    Unavailable(String),

    /// A device memory allocation was rejected.
    #[error("device allocation failed: {0}")]
    Alloc(String),
}

/// Failures of the dedicated worker thread itself, as distinct from failures
/// of the tasks it runs.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Worker-thread startup (device initialization) failed. Delivered to the
    /// first caller blocked in `submit`.
    #[error("executor startup failed: {0}")]
    Init(String),

    /// The executor has been stopped or its worker thread has exited; the
    /// task was not run.
    #[error("executor is not running")]
    Stopped,

    /// A task panicked on the worker thread.
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Failures while loading a model artifact into a ready engine.
///
/// Every variant is fatal to the `load` call: the engine is left unloaded
/// with no partial state and the error is never retried internally.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The model artifact could not be read or deserialized into an
    /// execution plan.
    #[error("failed to load model artifact {path}: {reason}")]
    Artifact { path: String, reason: String },

    /// The plan's port metadata is not usable (non-tensor port, dynamic or
    /// non-positive dims, unsupported element type).
    #[error("unsupported engine metadata: {0}")]
    Metadata(String),

    /// The plan does not report exactly one input and two output bindings,
    /// which means the artifact was built for a different model family.
    #[error("engine reports {inputs} input and {outputs} output bindings, expected 1 and 2")]
    BindingArity { inputs: usize, outputs: usize },

    /// The input binding's shape cannot yield a (height, width) resolution.
    #[error("bad dims of binding {name}: {dims:?}")]
    InputShape { name: String, dims: Vec<usize> },

    /// Host or device buffer allocation failed.
    #[error("failed to allocate CUDA resources")]
    Allocation(#[source] CudaError),

    /// The worker thread could not run the load task.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Failures of a single inference call.
///
/// After an execution or transfer failure the engine's device state is
/// undefined; callers should reload rather than continue.
#[derive(Debug, Error)]
pub enum InferError {
    /// The engine has been closed; its buffers are gone.
    #[error("engine is unloaded")]
    Closed,

    /// The input image is not a non-empty H×W×3 array.
    #[error("expected a non-empty HxWx3 image, got {dim:?}")]
    ImageShape { dim: (usize, usize, usize) },

    /// The execution plan failed on the device.
    #[error("inference execution failed: {0}")]
    Execution(String),

    /// A host/device transfer or stream synchronization failed.
    #[error("device transfer failed")]
    Transfer(#[source] CudaError),

    /// The worker thread could not run the inference task.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}
