use crate::error::Error;
use crate::scalar::Real;
use crate::tensor::Tensor;
use crate::util;
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

fn sample_tensor<T, D, R>(dist: &D, rng: &mut R, shape: &[usize]) -> Result<Tensor<T>, Error>
where
    T: Real,
    D: Distribution<f64>,
    R: Rng + ?Sized,
{
    util::validate_shape(shape)?;
    let size = util::shape_product(shape);
    let mut data = Vec::with_capacity(size);
    for _ in 0..size {
        data.push(T::from_f64(dist.sample(rng)));
    }
    Tensor::from_vec(data, shape)
}

/// Leaf tensor with values drawn from U(low, high).
pub fn uniform_with_rng<T: Real, R: Rng + ?Sized>(
    rng: &mut R,
    shape: &[usize],
    low: f64,
    high: f64,
) -> Result<Tensor<T>, Error> {
    if high <= low {
        return Err(Error::InvalidOperation(format!(
            "Upper bound ({}) must be greater than lower bound ({}) for uniform distribution",
            high, low
        )));
    }
    let dist = Uniform::new(low, high).map_err(|e| Error::InvalidOperation(e.to_string()))?;
    sample_tensor(&dist, rng, shape)
}

pub fn uniform<T: Real>(shape: &[usize], low: f64, high: f64) -> Result<Tensor<T>, Error> {
    uniform_with_rng(&mut rand::rng(), shape, low, high)
}

/// Leaf tensor with values drawn from N(mean, std_dev^2).
pub fn normal_with_rng<T: Real, R: Rng + ?Sized>(
    rng: &mut R,
    shape: &[usize],
    mean: f64,
    std_dev: f64,
) -> Result<Tensor<T>, Error> {
    if std_dev < 0.0 {
        return Err(Error::InvalidOperation(format!(
            "Standard deviation ({}) must be non-negative for normal distribution",
            std_dev
        )));
    }
    let dist = Normal::new(mean, std_dev).map_err(|e| Error::InvalidOperation(e.to_string()))?;
    sample_tensor(&dist, rng, shape)
}

pub fn normal<T: Real>(shape: &[usize], mean: f64, std_dev: f64) -> Result<Tensor<T>, Error> {
    normal_with_rng(&mut rand::rng(), shape, mean, std_dev)
}

/// Kaiming uniform initialization: U(-b, b) with `b = sqrt(6 / fan_in)`.
pub fn kaiming_uniform_with_rng<T: Real, R: Rng + ?Sized>(
    rng: &mut R,
    fan_in: usize,
    shape: &[usize],
) -> Result<Tensor<T>, Error> {
    if fan_in == 0 {
        return Err(Error::InvalidOperation(
            "Fan-in cannot be zero for Kaiming initialization".to_string(),
        ));
    }
    let bound = (6.0 / fan_in as f64).sqrt();
    uniform_with_rng(rng, shape, -bound, bound)
}

pub fn kaiming_uniform<T: Real>(fan_in: usize, shape: &[usize]) -> Result<Tensor<T>, Error> {
    kaiming_uniform_with_rng(&mut rand::rng(), fan_in, shape)
}
