//! Inference engine: binding model, buffer set, execution plan, lifecycle.

mod binding;

pub use binding::{Binding, BindingRole, input_resolution, validate};

#[cfg(feature = "tensorrt")]
mod buffers;
#[cfg(feature = "tensorrt")]
mod detector;
#[cfg(feature = "tensorrt")]
mod session;

#[cfg(feature = "tensorrt")]
pub use buffers::BufferSet;
#[cfg(feature = "tensorrt")]
pub use detector::{DetectorConfig, TrtDetector};
