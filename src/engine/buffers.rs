//! The fixed buffer set backing a loaded engine's bindings.

use std::sync::Arc;

use cudarc::driver::CudaDevice;
use tracing::info;

use crate::cuda::memory::{HostDeviceBuffer, OutputBuffer};
use crate::cuda::sys::CUdeviceptr;
use crate::engine::binding::{self, Binding, BindingRole};
use crate::error::LoadError;

/// One host/device pair per engine binding: the single input buffer, the two
/// shape-carrying output buffers, and the device addresses of all three in
/// plan binding order (the order the execution call consumes).
pub struct BufferSet {
    pub input: HostDeviceBuffer,
    pub outputs: [OutputBuffer; 2],
    addresses: Vec<CUdeviceptr>,
}

impl BufferSet {
    /// Device addresses in plan binding order.
    pub fn addresses(&self) -> &[CUdeviceptr] {
        &self.addresses
    }
}

/// Allocate the buffer set for a validated binding table.
///
/// For every binding the element count is computed from its shape and a
/// pinned host region plus a device region are allocated; outputs keep their
/// shapes for later reinterpretation. Any allocation failure is wrapped as a
/// single resource-allocation error carrying the driver cause.
pub fn allocate(device: &Arc<CudaDevice>, bindings: &[Binding]) -> Result<BufferSet, LoadError> {
    binding::validate(bindings)?;

    let mut input = None;
    let mut outputs = Vec::with_capacity(2);
    let mut addresses = Vec::with_capacity(bindings.len());

    for binding in bindings {
        let buffer = HostDeviceBuffer::alloc(device, binding.element_count())
            .map_err(LoadError::Allocation)?;
        addresses.push(buffer.device_address());

        match binding.role {
            BindingRole::Input => input = Some(buffer),
            BindingRole::Output => {
                info!(name = %binding.name, shape = ?binding.shape, "output binding");
                outputs.push(OutputBuffer::new(buffer, binding.shape.clone()));
            }
        }
    }

    // The arity was validated above; these conversions re-state it.
    let input = input.ok_or(LoadError::BindingArity {
        inputs: 0,
        outputs: outputs.len(),
    })?;
    let outputs: [OutputBuffer; 2] =
        outputs
            .try_into()
            .map_err(|rest: Vec<OutputBuffer>| LoadError::BindingArity {
                inputs: 1,
                outputs: rest.len(),
            })?;

    Ok(BufferSet {
        input,
        outputs,
        addresses,
    })
}
