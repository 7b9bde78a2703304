//! A define-by-run automatic differentiation library
//!
//! This library records a computation graph while ordinary tensor code runs and
//! differentiates it on demand:
//! - Batch-aware n-dimensional tensors with paired value and gradient buffers
//! - Functions that remember every forward call until it is differentiated
//! - Use-count gated backward traversal that accumulates fan-out gradients
//! - Shape utilities (sum over axes, split, concatenate, reshape)
//!
//! # Features
//! - `debug_logs` - Prints graph construction and traversal steps
//! - `serialization` - JSON snapshots of tensor values via serde
//! - `double_precision` - Makes [`Precision`] an alias for `f64`
//!
//! # Example
//! ```rust
//! use eager_grad::{ops, Tensor};
//!
//! fn main() -> Result<(), eager_grad::Error> {
//!     let a = Tensor::<f32>::from_vec(vec![1.0, 2.0, 3.0], &[3])?;
//!     let b = Tensor::<f32>::from_vec(vec![4.0, 5.0, 6.0], &[3])?;
//!
//!     // Every operation records its producer on the result
//!     let c = ops::mul(&a, &b)?;
//!     let loss = ops::sum(&c, &[], false)?;
//!     assert_eq!(loss.to_vec(), vec![32.0]);
//!
//!     // Seed with ones and back-propagate from `c`
//!     c.backward()?;
//!     assert_eq!(a.grad_to_vec(), vec![4.0, 5.0, 6.0]);
//!     Ok(())
//! }
//! ```

// --- Central debug_println macro definition ---
/// Conditional logging macro. Prints if 'debug_logs' feature is enabled.
#[cfg(feature = "debug_logs")]
#[macro_export]
macro_rules! debug_println {
    ($($arg:tt)*) => {
        ::std::println!("[DEBUG {}] {}", module_path!(), ::std::format_args!($($arg)*))
    };
}

/// Conditional logging macro (disabled version). Does nothing.
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
macro_rules! debug_println {
    ($($arg:tt)*) => {};
}

pub mod error;
pub mod graph;
pub mod init;
pub mod ops;
pub mod parameter;
pub mod scalar;
pub mod stack;
pub mod tensor;
mod tensor_debug_impl;
pub mod util;

pub mod test_utils;

pub use error::Error;
pub use graph::{
    backward_from, BackwardPass, DualInputFunction, Function, FunctionKind,
    NeedPreviousInputFunction, Op, SingleInputFunction,
};
pub use parameter::Parameter;
pub use scalar::Real;
pub use stack::FunctionStack;
#[cfg(feature = "serialization")]
pub use tensor::TensorSnapshot;
pub use tensor::Tensor;

/// Element type selected by the `double_precision` feature.
#[cfg(not(feature = "double_precision"))]
pub type Precision = f32;

/// Element type selected by the `double_precision` feature.
#[cfg(feature = "double_precision")]
pub type Precision = f64;
