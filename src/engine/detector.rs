//! Detection engine lifecycle and the per-call inference pipeline.
//!
//! A [`TrtDetector`] owns one [`Executor`] whose worker thread holds the only
//! device handle and the loaded engine state. Loading, every inference call,
//! and teardown each run as a single task on that thread; callers never touch
//! the device state directly.

use std::path::Path;
use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaStream};
use ndarray::{Array3, ArrayD};
use ort::session::Session;
use tracing::{debug, info};

use crate::cuda::stream;
use crate::engine::binding::{self, Binding};
use crate::engine::buffers::{self, BufferSet};
use crate::engine::session;
use crate::error::{CudaError, ExecutorError, InferError, LoadError};
use crate::executor::Executor;
use crate::preprocess;

/// Detector construction options.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// CUDA device ordinal among the devices visible to the process.
    pub device_ordinal: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { device_ordinal: 0 }
    }
}

/// Everything a loaded engine owns on the worker thread: the execution plan,
/// its work stream, the buffer set, and the immutable binding table.
struct EngineState {
    session: Session,
    work_stream: CudaStream,
    buffers: BufferSet,
    bindings: Vec<Binding>,
    input_hw: (usize, usize),
}

/// Thread-confined worker state: the device handle created once at executor
/// start, plus the slot for the loaded engine.
struct DeviceWorker {
    device: Arc<CudaDevice>,
    engine: Option<EngineState>,
}

impl DeviceWorker {
    fn start(ordinal: usize) -> Result<Self, ExecutorError> {
        let device = CudaDevice::new(ordinal)
            .map_err(|e| ExecutorError::Init(format!("CUDA device {ordinal}: {e}")))?;
        info!(ordinal, "CUDA device initialized");
        Ok(Self {
            device,
            engine: None,
        })
    }
}

/// Shapes resolved by the load task, cached on the caller side.
struct LoadedShapes {
    input_hw: (usize, usize),
    output_shapes: [Vec<usize>; 2],
}

/// TensorRT-backed detection inference engine.
///
/// Safe to share behind an `Arc` and call from any thread; concurrent
/// [`infer`](Self::infer) calls serialize on the executor, one call in flight
/// at a time.
pub struct TrtDetector {
    executor: Executor<DeviceWorker>,
    device_ordinal: usize,
    input_hw: (usize, usize),
    output_shapes: [Vec<usize>; 2],
}

impl TrtDetector {
    /// Load the engine artifact at `model_path` on the default device.
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, LoadError> {
        Self::load_with(model_path, DetectorConfig::default())
    }

    /// Load the engine artifact at `model_path` with explicit options.
    ///
    /// Spawns the worker thread (which creates the device handle), then runs
    /// deserialization, binding validation, and buffer allocation as one task
    /// on it. On any failure the worker is stopped again and no partial state
    /// survives.
    pub fn load_with(
        model_path: impl AsRef<Path>,
        config: DetectorConfig,
    ) -> Result<Self, LoadError> {
        let ordinal = config.device_ordinal;
        let executor = Executor::spawn(move || DeviceWorker::start(ordinal))?;

        let path = model_path.as_ref().to_path_buf();
        let loaded = executor.submit(move |worker| load_engine(worker, &path, ordinal));
        match loaded {
            Ok(Ok(shapes)) => Ok(Self {
                executor,
                device_ordinal: ordinal,
                input_hw: shapes.input_hw,
                output_shapes: shapes.output_shapes,
            }),
            Ok(Err(err)) => {
                executor.stop();
                Err(err)
            }
            Err(err) => {
                executor.stop();
                Err(err.into())
            }
        }
    }

    /// Run one inference call over a BGR frame of any resolution.
    ///
    /// Returns the two output tensors shaped by their recorded bindings, in
    /// the model family's fixed order: **second output binding first, then
    /// the first**. Callers rely on these positions; the order is part of the
    /// call contract.
    ///
    /// The buffer set is overwritten in place on every call; the returned
    /// arrays are the caller's own copies.
    pub fn infer(&self, image: Array3<u8>) -> Result<(ArrayD<f32>, ArrayD<f32>), InferError> {
        let dim = image.dim();
        if dim.2 != 3 || dim.0 == 0 || dim.1 == 0 {
            return Err(InferError::ImageShape { dim });
        }

        let ordinal = self.device_ordinal;
        self.executor
            .submit(move |worker| run_inference(worker, &image, ordinal))?
    }

    /// Engine input resolution as (height, width).
    pub fn input_shape(&self) -> (usize, usize) {
        self.input_hw
    }

    /// Recorded output binding shapes, in plan binding order.
    pub fn output_shapes(&self) -> &[Vec<usize>; 2] {
        &self.output_shapes
    }

    /// Unload the engine and stop the worker thread.
    ///
    /// The buffer set, work stream, and execution plan are released by a task
    /// on the worker thread (they are context-affine) before the thread is
    /// joined. Consuming `self` makes any later call impossible.
    pub fn close(self) -> Result<(), InferError> {
        let released = self.executor.submit(|worker| {
            if worker.engine.take().is_some() {
                debug!("engine state released");
            }
        });
        self.executor.stop();
        released.map_err(InferError::Executor)
    }
}

fn load_engine(
    worker: &mut DeviceWorker,
    path: &Path,
    ordinal: usize,
) -> Result<LoadedShapes, LoadError> {
    info!(path = %path.display(), "deserializing inference engine");
    let session = session::open(path, ordinal)?;
    let bindings = session::bindings(&session)?;
    binding::validate(&bindings)?;
    let input_hw = binding::input_resolution(&bindings)?;
    info!(height = input_hw.0, width = input_hw.1, "engine input resolved");

    let work_stream = worker
        .device
        .fork_default_stream()
        .map_err(|e| LoadError::Allocation(CudaError::Alloc(e.to_string())))?;
    let buffers = buffers::allocate(&worker.device, &bindings)?;
    let output_shapes = [
        buffers.outputs[0].shape().to_vec(),
        buffers.outputs[1].shape().to_vec(),
    ];

    // Nothing is stored until every step has succeeded.
    worker.engine = Some(EngineState {
        session,
        work_stream,
        buffers,
        bindings,
        input_hw,
    });
    Ok(LoadedShapes {
        input_hw,
        output_shapes,
    })
}

fn run_inference(
    worker: &mut DeviceWorker,
    image: &Array3<u8>,
    ordinal: usize,
) -> Result<(ArrayD<f32>, ArrayD<f32>), InferError> {
    let engine = worker.engine.as_mut().ok_or(InferError::Closed)?;
    let (height, width) = engine.input_hw;

    let frame = preprocess::preprocess(&image.view(), height, width);
    let samples = frame
        .as_slice()
        .expect("freshly built planar frame is contiguous");
    engine
        .buffers
        .input
        .host
        .as_mut_slice()
        .copy_from_slice(samples);

    engine
        .buffers
        .input
        .upload(&engine.work_stream)
        .map_err(InferError::Transfer)?;
    // The provider executes on its own stream; the input copy must have
    // drained before execution is enqueued.
    stream::synchronize(&engine.work_stream).map_err(InferError::Transfer)?;

    session::execute(
        &mut engine.session,
        &engine.bindings,
        engine.buffers.addresses(),
        ordinal,
    )?;

    for output in engine.buffers.outputs.iter_mut() {
        output
            .mem
            .download(&engine.work_stream)
            .map_err(InferError::Transfer)?;
    }
    // Read barrier: every transfer above must be host-visible before the
    // host regions are reinterpreted.
    stream::synchronize(&engine.work_stream).map_err(InferError::Transfer)?;

    // Fixed output order for this model family: second binding, then first.
    Ok((
        engine.buffers.outputs[1].to_array(),
        engine.buffers.outputs[0].to_array(),
    ))
}
