use crate::error::Error;
use crate::graph::SingleInputFunction;
use crate::scalar::Real;
use crate::tensor::Tensor;

fn map<T: Real>(x: &Tensor<T>, f: impl Fn(T) -> T) -> Result<Tensor<T>, Error> {
    let data = x.data().iter().map(|&v| f(v)).collect();
    Tensor::new(data, &x.shape(), x.batch_count())
}

/// Accumulates `gy * derivative(x)` into `x`.
fn chain<T: Real>(y: &Tensor<T>, x: &Tensor<T>, derivative: impl Fn(T) -> T) -> Result<(), Error> {
    let gx: Vec<T> = {
        let gy = y.grad();
        let xv = x.data();
        gy.iter()
            .zip(xv.iter())
            .map(|(&g, &v)| g * derivative(v))
            .collect()
    };
    x.accumulate_grad(&gx)
}

pub struct Sin;

impl<T: Real> SingleInputFunction<T> for Sin {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>, Error> {
        map(x, T::sin)
    }

    fn backward(&self, y: &Tensor<T>, x: &Tensor<T>) -> Result<(), Error> {
        chain(y, x, T::cos)
    }
}

pub struct Cos;

impl<T: Real> SingleInputFunction<T> for Cos {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>, Error> {
        map(x, T::cos)
    }

    fn backward(&self, y: &Tensor<T>, x: &Tensor<T>) -> Result<(), Error> {
        chain(y, x, |v| -v.sin())
    }
}

pub struct Tan;

impl<T: Real> SingleInputFunction<T> for Tan {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>, Error> {
        map(x, T::tan)
    }

    fn backward(&self, y: &Tensor<T>, x: &Tensor<T>) -> Result<(), Error> {
        chain(y, x, |v| {
            let c = v.cos();
            T::one() / (c * c)
        })
    }
}

pub struct ArcTan;

impl<T: Real> SingleInputFunction<T> for ArcTan {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>, Error> {
        map(x, T::atan)
    }

    fn backward(&self, y: &Tensor<T>, x: &Tensor<T>) -> Result<(), Error> {
        chain(y, x, |v| T::one() / (T::one() + v * v))
    }
}
