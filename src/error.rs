use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Shape error: {0}")]
    ShapeError(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Incompatible shapes for operation {op}: {shape_a:?} and {shape_b:?}")]
    IncompatibleShapes {
        op: String,
        shape_a: Vec<usize>,
        shape_b: Vec<usize>,
    },

    #[error("Batch count mismatch for operation {op}: {batch_a} and {batch_b}")]
    BatchMismatch {
        op: String,
        batch_a: usize,
        batch_b: usize,
    },

    #[error("Reshape error: {0}")]
    ReshapeError(String),

    #[error("Axis error: {0}")]
    AxisError(String),

    #[error("Index out of bounds: index {index}, size {size}")]
    IndexOutOfBounds { index: usize, size: usize },

    #[error("Dimension mismatch: expected {0}, got {1}")]
    DimensionMismatch(usize, usize),

    #[error("Function {function} expects {expected} input(s), got {actual}")]
    ArityMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("Function {function} has no recorded call that produced tensor {tensor_id}")]
    MissingHistory { function: String, tensor_id: usize },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Internal logic error: {0}")]
    InternalLogicError(String),

    #[error("Gradient check error: analytical={analytical:?}, numerical={numerical:?}, max_rel_error={max_rel_error}, max_abs_error={max_abs_error}, at_index={at_index}")]
    GradientCheckError {
        analytical: Vec<f64>,
        numerical: Vec<f64>,
        max_rel_error: f64,
        max_abs_error: f64,
        at_index: usize,
    },

    #[cfg(feature = "serialization")]
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
