//! CUDA device plumbing: driver FFI, pinned/device buffer pairs, and stream
//! helpers. Everything in here is context-affine and must only be touched
//! from the executor thread.

pub mod memory;
pub mod stream;
pub mod sys;

pub use memory::{HostDeviceBuffer, OutputBuffer, PinnedHostBuffer};
