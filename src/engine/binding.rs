//! Binding descriptors derived from a loaded execution plan.
//!
//! The binding table is a runtime-validated contract: it is checked once at
//! load time and treated as immutable for the life of the loaded engine.

use crate::error::LoadError;

/// Whether a binding feeds the plan or is produced by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingRole {
    Input,
    Output,
}

/// One named port of a loaded execution plan, in plan declaration order.
#[derive(Debug, Clone)]
pub struct Binding {
    /// Port name as declared by the plan.
    pub name: String,
    /// Input or output role.
    pub role: BindingRole,
    /// Fixed element shape; all dims are positive once a plan has loaded.
    pub shape: Vec<usize>,
}

impl Binding {
    /// Number of f32 elements covered by the shape.
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of the backing buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.element_count() * std::mem::size_of::<f32>()
    }

    fn is_input(&self) -> bool {
        self.role == BindingRole::Input
    }
}

/// Check that the plan exposes exactly one input and two output bindings.
///
/// Any other arity means the artifact was built for a different model family;
/// failing here prevents later data from being silently misinterpreted.
pub fn validate(bindings: &[Binding]) -> Result<(), LoadError> {
    let inputs = bindings.iter().filter(|b| b.is_input()).count();
    let outputs = bindings.len() - inputs;
    if inputs != 1 || outputs != 2 {
        return Err(LoadError::BindingArity { inputs, outputs });
    }
    Ok(())
}

/// Derive the engine's input resolution from the single input binding.
///
/// The shape must have at least three dimensions, its last two are taken as
/// (height, width), and the total element count must be exactly `3 * H * W`
/// (one three-channel frame).
pub fn input_resolution(bindings: &[Binding]) -> Result<(usize, usize), LoadError> {
    let input = bindings
        .iter()
        .find(|b| b.is_input())
        .ok_or(LoadError::BindingArity {
            inputs: 0,
            outputs: bindings.len(),
        })?;

    let dims = &input.shape;
    if dims.len() < 3 {
        return Err(LoadError::InputShape {
            name: input.name.clone(),
            dims: dims.clone(),
        });
    }

    let height = dims[dims.len() - 2];
    let width = dims[dims.len() - 1];
    if input.element_count() != 3 * height * width {
        return Err(LoadError::InputShape {
            name: input.name.clone(),
            dims: dims.clone(),
        });
    }
    Ok((height, width))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(name: &str, role: BindingRole, shape: &[usize]) -> Binding {
        Binding {
            name: name.to_string(),
            role,
            shape: shape.to_vec(),
        }
    }

    fn model_family() -> Vec<Binding> {
        vec![
            binding("images", BindingRole::Input, &[1, 3, 608, 1088]),
            binding("hm", BindingRole::Output, &[1, 152, 272, 6]),
            binding("id", BindingRole::Output, &[1, 152, 272, 128]),
        ]
    }

    #[test]
    fn test_validate_accepts_one_input_two_outputs() {
        assert!(validate(&model_family()).is_ok());
    }

    #[test]
    fn test_validate_rejects_two_inputs() {
        let mut bindings = model_family();
        bindings.push(binding("extra", BindingRole::Input, &[1, 3, 32, 32]));
        match validate(&bindings) {
            Err(LoadError::BindingArity { inputs, outputs }) => {
                assert_eq!((inputs, outputs), (2, 2));
            }
            other => panic!("expected arity error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_wrong_output_count() {
        let mut one_output = model_family();
        one_output.pop();
        assert!(matches!(
            validate(&one_output),
            Err(LoadError::BindingArity {
                inputs: 1,
                outputs: 1
            })
        ));

        let mut three_outputs = model_family();
        three_outputs.push(binding("wh", BindingRole::Output, &[1, 152, 272, 2]));
        assert!(matches!(
            validate(&three_outputs),
            Err(LoadError::BindingArity {
                inputs: 1,
                outputs: 3
            })
        ));
    }

    #[test]
    fn test_input_resolution_takes_last_two_dims() {
        let (h, w) = input_resolution(&model_family()).unwrap();
        assert_eq!((h, w), (608, 1088));
    }

    #[test]
    fn test_input_resolution_rejects_low_rank() {
        let bindings = vec![binding("images", BindingRole::Input, &[608, 1088])];
        match input_resolution(&bindings) {
            Err(LoadError::InputShape { name, dims }) => {
                assert_eq!(name, "images");
                assert_eq!(dims, vec![608, 1088]);
            }
            other => panic!("expected shape error, got {other:?}"),
        }
    }

    #[test]
    fn test_input_resolution_rejects_non_frame_count() {
        // Batch axis of 2: element count is twice a single frame.
        let bindings = vec![binding("images", BindingRole::Input, &[2, 3, 608, 1088])];
        assert!(matches!(
            input_resolution(&bindings),
            Err(LoadError::InputShape { .. })
        ));
    }

    #[test]
    fn test_element_and_byte_counts() {
        let b = binding("hm", BindingRole::Output, &[1, 152, 272, 6]);
        assert_eq!(b.element_count(), 152 * 272 * 6);
        assert_eq!(b.byte_len(), 152 * 272 * 6 * 4);
    }
}
