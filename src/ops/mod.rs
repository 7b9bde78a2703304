//! Tensor operations.
//!
//! Differentiable operations build a fresh [`Op`] around a kernel from
//! [`arithmetic`] or [`trigonometric`] and run its forward pass, so the result
//! carries its producer. Structural operations from [`structural`] copy data
//! and gradient into new leaves.

use crate::error::Error;
use crate::graph::{DualInputFunction, Function, Op, SingleInputFunction};
use crate::scalar::Real;
use crate::tensor::Tensor;

pub mod arithmetic;
pub mod structural;
pub mod trigonometric;

pub use structural::{concatenate, divide_batches, reshape, split, sum};

fn single_output<T: Real>(name: &str, outputs: Vec<Tensor<T>>) -> Result<Tensor<T>, Error> {
    outputs.into_iter().next().ok_or_else(|| {
        Error::InternalLogicError(format!("{} produced no output", name))
    })
}

fn unary<T: Real>(
    name: &str,
    kernel: impl SingleInputFunction<T> + 'static,
    x: &Tensor<T>,
) -> Result<Tensor<T>, Error> {
    let op = Op::single_input(name, kernel);
    single_output(name, op.forward(&[x.clone()])?)
}

fn binary<T: Real>(
    name: &str,
    kernel: impl DualInputFunction<T> + 'static,
    a: &Tensor<T>,
    b: &Tensor<T>,
) -> Result<Tensor<T>, Error> {
    let op = Op::dual_input(name, kernel);
    single_output(name, op.forward(&[a.clone(), b.clone()])?)
}

/// Element-wise addition. Both operands must share shape and batch count.
///
/// # Errors
/// * `Error::IncompatibleShapes` if the per-sample shapes differ
/// * `Error::BatchMismatch` if the batch counts differ
pub fn add<T: Real>(a: &Tensor<T>, b: &Tensor<T>) -> Result<Tensor<T>, Error> {
    binary("Add", arithmetic::Add, a, b)
}

/// Element-wise subtraction `a - b`.
pub fn sub<T: Real>(a: &Tensor<T>, b: &Tensor<T>) -> Result<Tensor<T>, Error> {
    binary("Sub", arithmetic::Sub, a, b)
}

/// Element-wise multiplication.
pub fn mul<T: Real>(a: &Tensor<T>, b: &Tensor<T>) -> Result<Tensor<T>, Error> {
    binary("Mul", arithmetic::Mul, a, b)
}

/// Element-wise division `a / b`.
pub fn div<T: Real>(a: &Tensor<T>, b: &Tensor<T>) -> Result<Tensor<T>, Error> {
    binary("Div", arithmetic::Div, a, b)
}

/// `x + c` for every element.
pub fn add_const<T: Real>(x: &Tensor<T>, c: T) -> Result<Tensor<T>, Error> {
    binary("AddConst", arithmetic::AddConst, x, &Tensor::scalar(c))
}

/// `x - c` for every element.
pub fn sub_const<T: Real>(x: &Tensor<T>, c: T) -> Result<Tensor<T>, Error> {
    binary("SubConst", arithmetic::SubConst, x, &Tensor::scalar(c))
}

/// `c - x` for every element.
pub fn const_sub<T: Real>(c: T, x: &Tensor<T>) -> Result<Tensor<T>, Error> {
    binary("ConstSub", arithmetic::ConstSub, &Tensor::scalar(c), x)
}

/// `x * c` for every element.
pub fn mul_const<T: Real>(x: &Tensor<T>, c: T) -> Result<Tensor<T>, Error> {
    binary("MulConst", arithmetic::MulConst, x, &Tensor::scalar(c))
}

/// `x / c` for every element.
pub fn div_const<T: Real>(x: &Tensor<T>, c: T) -> Result<Tensor<T>, Error> {
    binary("DivConst", arithmetic::DivConst, x, &Tensor::scalar(c))
}

/// `c / x` for every element.
pub fn const_div<T: Real>(c: T, x: &Tensor<T>) -> Result<Tensor<T>, Error> {
    binary("ConstDiv", arithmetic::ConstDiv, &Tensor::scalar(c), x)
}

/// Element-wise sine. Gradient: `cos(x)`.
pub fn sin<T: Real>(x: &Tensor<T>) -> Result<Tensor<T>, Error> {
    unary("Sin", trigonometric::Sin, x)
}

/// Element-wise cosine. Gradient: `-sin(x)`.
pub fn cos<T: Real>(x: &Tensor<T>) -> Result<Tensor<T>, Error> {
    unary("Cos", trigonometric::Cos, x)
}

/// Element-wise tangent. Gradient: `1 / cos(x)^2`.
pub fn tan<T: Real>(x: &Tensor<T>) -> Result<Tensor<T>, Error> {
    unary("Tan", trigonometric::Tan, x)
}

/// Element-wise arctangent. Gradient: `1 / (1 + x^2)`.
pub fn arctan<T: Real>(x: &Tensor<T>) -> Result<Tensor<T>, Error> {
    unary("ArcTan", trigonometric::ArcTan, x)
}
