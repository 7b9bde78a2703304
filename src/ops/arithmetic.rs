//! Element-wise arithmetic kernels.
//!
//! Tensor-tensor kernels require both operands to share shape and batch count.
//! Constant kernels take the constant as a one-element tensor: `*Const` kernels
//! read `(x, c)` and `Const*` kernels read `(c, x)`. The constant never
//! receives gradient.

use crate::error::Error;
use crate::graph::DualInputFunction;
use crate::scalar::Real;
use crate::tensor::Tensor;

fn check_same_layout<T: Real>(op: &str, a: &Tensor<T>, b: &Tensor<T>) -> Result<(), Error> {
    let (shape_a, shape_b) = (a.shape(), b.shape());
    if shape_a != shape_b {
        return Err(Error::IncompatibleShapes {
            op: op.to_string(),
            shape_a,
            shape_b,
        });
    }
    let (batch_a, batch_b) = (a.batch_count(), b.batch_count());
    if batch_a != batch_b {
        return Err(Error::BatchMismatch {
            op: op.to_string(),
            batch_a,
            batch_b,
        });
    }
    Ok(())
}

fn constant_of<T: Real>(op: &str, c: &Tensor<T>) -> Result<T, Error> {
    if c.len() != 1 {
        return Err(Error::ShapeError(format!(
            "{} expects a one-element constant, got shape {:?} with batch {}",
            op,
            c.shape(),
            c.batch_count()
        )));
    }
    Ok(c.data()[0])
}

fn zip_map<T: Real>(a: &Tensor<T>, b: &Tensor<T>, f: impl Fn(T, T) -> T) -> Result<Tensor<T>, Error> {
    let data = a
        .data()
        .iter()
        .zip(b.data().iter())
        .map(|(&x, &y)| f(x, y))
        .collect();
    Tensor::new(data, &a.shape(), a.batch_count())
}

fn map<T: Real>(x: &Tensor<T>, f: impl Fn(T) -> T) -> Result<Tensor<T>, Error> {
    let data = x.data().iter().map(|&v| f(v)).collect();
    Tensor::new(data, &x.shape(), x.batch_count())
}

fn scaled_grad<T: Real>(y: &Tensor<T>, f: impl Fn(T) -> T) -> Vec<T> {
    y.grad().iter().map(|&g| f(g)).collect()
}

pub struct Add;

impl<T: Real> DualInputFunction<T> for Add {
    fn forward(&self, a: &Tensor<T>, b: &Tensor<T>) -> Result<Tensor<T>, Error> {
        check_same_layout("Add", a, b)?;
        zip_map(a, b, |x, y| x + y)
    }

    fn backward(&self, y: &Tensor<T>, a: &Tensor<T>, b: &Tensor<T>) -> Result<(), Error> {
        let gy = y.grad_to_vec();
        a.accumulate_grad(&gy)?;
        b.accumulate_grad(&gy)
    }
}

pub struct Sub;

impl<T: Real> DualInputFunction<T> for Sub {
    fn forward(&self, a: &Tensor<T>, b: &Tensor<T>) -> Result<Tensor<T>, Error> {
        check_same_layout("Sub", a, b)?;
        zip_map(a, b, |x, y| x - y)
    }

    fn backward(&self, y: &Tensor<T>, a: &Tensor<T>, b: &Tensor<T>) -> Result<(), Error> {
        let gy = y.grad_to_vec();
        let neg: Vec<T> = gy.iter().map(|&g| -g).collect();
        a.accumulate_grad(&gy)?;
        b.accumulate_grad(&neg)
    }
}

pub struct Mul;

impl<T: Real> DualInputFunction<T> for Mul {
    fn forward(&self, a: &Tensor<T>, b: &Tensor<T>) -> Result<Tensor<T>, Error> {
        check_same_layout("Mul", a, b)?;
        zip_map(a, b, |x, y| x * y)
    }

    fn backward(&self, y: &Tensor<T>, a: &Tensor<T>, b: &Tensor<T>) -> Result<(), Error> {
        // Contributions are computed before either accumulation so that
        // `a` and `b` may be the same tensor.
        let (ga, gb): (Vec<T>, Vec<T>) = {
            let gy = y.grad();
            let (av, bv) = (a.data(), b.data());
            gy.iter()
                .zip(av.iter().zip(bv.iter()))
                .map(|(&g, (&x, &w))| (g * w, g * x))
                .unzip()
        };
        a.accumulate_grad(&ga)?;
        b.accumulate_grad(&gb)
    }
}

pub struct Div;

impl<T: Real> DualInputFunction<T> for Div {
    fn forward(&self, a: &Tensor<T>, b: &Tensor<T>) -> Result<Tensor<T>, Error> {
        check_same_layout("Div", a, b)?;
        zip_map(a, b, |x, y| x / y)
    }

    fn backward(&self, y: &Tensor<T>, a: &Tensor<T>, b: &Tensor<T>) -> Result<(), Error> {
        let (ga, gb): (Vec<T>, Vec<T>) = {
            let gy = y.grad();
            let (av, bv) = (a.data(), b.data());
            gy.iter()
                .zip(av.iter().zip(bv.iter()))
                .map(|(&g, (&x, &w))| (g / w, -g * x / (w * w)))
                .unzip()
        };
        a.accumulate_grad(&ga)?;
        b.accumulate_grad(&gb)
    }
}

/// `x + c`
pub struct AddConst;

impl<T: Real> DualInputFunction<T> for AddConst {
    fn forward(&self, x: &Tensor<T>, c: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let c = constant_of("AddConst", c)?;
        map(x, |v| v + c)
    }

    fn backward(&self, y: &Tensor<T>, x: &Tensor<T>, _c: &Tensor<T>) -> Result<(), Error> {
        x.accumulate_grad(&y.grad_to_vec())
    }
}

/// `x - c`
pub struct SubConst;

impl<T: Real> DualInputFunction<T> for SubConst {
    fn forward(&self, x: &Tensor<T>, c: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let c = constant_of("SubConst", c)?;
        map(x, |v| v - c)
    }

    fn backward(&self, y: &Tensor<T>, x: &Tensor<T>, _c: &Tensor<T>) -> Result<(), Error> {
        x.accumulate_grad(&y.grad_to_vec())
    }
}

/// `c - x`
pub struct ConstSub;

impl<T: Real> DualInputFunction<T> for ConstSub {
    fn forward(&self, c: &Tensor<T>, x: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let c = constant_of("ConstSub", c)?;
        map(x, |v| c - v)
    }

    fn backward(&self, y: &Tensor<T>, _c: &Tensor<T>, x: &Tensor<T>) -> Result<(), Error> {
        x.accumulate_grad(&scaled_grad(y, |g| -g))
    }
}

/// `x * c`
pub struct MulConst;

impl<T: Real> DualInputFunction<T> for MulConst {
    fn forward(&self, x: &Tensor<T>, c: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let c = constant_of("MulConst", c)?;
        map(x, |v| v * c)
    }

    fn backward(&self, y: &Tensor<T>, x: &Tensor<T>, c: &Tensor<T>) -> Result<(), Error> {
        let c = constant_of("MulConst", c)?;
        x.accumulate_grad(&scaled_grad(y, |g| g * c))
    }
}

/// `x / c`
pub struct DivConst;

impl<T: Real> DualInputFunction<T> for DivConst {
    fn forward(&self, x: &Tensor<T>, c: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let c = constant_of("DivConst", c)?;
        map(x, |v| v / c)
    }

    fn backward(&self, y: &Tensor<T>, x: &Tensor<T>, c: &Tensor<T>) -> Result<(), Error> {
        let c = constant_of("DivConst", c)?;
        x.accumulate_grad(&scaled_grad(y, |g| g / c))
    }
}

/// `c / x`
pub struct ConstDiv;

impl<T: Real> DualInputFunction<T> for ConstDiv {
    fn forward(&self, c: &Tensor<T>, x: &Tensor<T>) -> Result<Tensor<T>, Error> {
        let c = constant_of("ConstDiv", c)?;
        map(x, |v| c / v)
    }

    fn backward(&self, y: &Tensor<T>, c: &Tensor<T>, x: &Tensor<T>) -> Result<(), Error> {
        let c = constant_of("ConstDiv", c)?;
        let gx: Vec<T> = {
            let gy = y.grad();
            let xv = x.data();
            gy.iter()
                .zip(xv.iter())
                .map(|(&g, &v)| -g * c / (v * v))
                .collect()
        };
        x.accumulate_grad(&gx)
    }
}
