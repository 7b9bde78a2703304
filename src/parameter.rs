//! Trainable tensors exposed by functions.

use crate::error::Error;
use crate::scalar::Real;
use crate::tensor::Tensor;

/// A named trainable tensor and the tensor its gradient accumulates into.
///
/// Built with [`Parameter::new`], the gradient is the value tensor's own
/// gradient buffer. Built with [`Parameter::with_gradient`], backward kernels
/// accumulate into the *values* of a separate gradient tensor, and
/// `train_count` is tracked on the value tensor.
#[derive(Debug, Clone)]
pub struct Parameter<T: Real> {
    name: String,
    value: Tensor<T>,
    gradient: Tensor<T>,
}

impl<T: Real> Parameter<T> {
    pub fn new(name: impl Into<String>, value: Tensor<T>) -> Self {
        let gradient = value.clone();
        Self {
            name: name.into(),
            value,
            gradient,
        }
    }

    /// # Errors
    /// `Error::IncompatibleShapes` unless `gradient` matches `value` in shape
    /// and batch count.
    pub fn with_gradient(
        name: impl Into<String>,
        value: Tensor<T>,
        gradient: Tensor<T>,
    ) -> Result<Self, Error> {
        let name = name.into();
        if value.shape() != gradient.shape() || value.batch_count() != gradient.batch_count() {
            return Err(Error::IncompatibleShapes {
                op: format!("Parameter {}", name),
                shape_a: value.shape(),
                shape_b: gradient.shape(),
            });
        }
        Ok(Self {
            name,
            value,
            gradient,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Tensor<T> {
        &self.value
    }

    pub fn gradient(&self) -> &Tensor<T> {
        &self.gradient
    }

    fn shares_buffer(&self) -> bool {
        self.value == self.gradient
    }

    /// Current accumulated gradient.
    pub fn gradient_values(&self) -> Vec<T> {
        if self.shares_buffer() {
            self.value.grad_to_vec()
        } else {
            self.gradient.to_vec()
        }
    }

    /// Adds `contribution` to the accumulated gradient.
    pub fn accumulate(&self, contribution: &[T]) -> Result<(), Error> {
        if self.shares_buffer() {
            return self.value.accumulate_grad(contribution);
        }
        let mut current = self.gradient.to_vec();
        if current.len() != contribution.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![current.len()],
                actual: vec![contribution.len()],
            });
        }
        for (g, &c) in current.iter_mut().zip(contribution) {
            *g += c;
        }
        self.gradient.set_data(current)
    }

    pub fn count_up(&self) {
        self.value.count_up();
    }

    pub fn train_count(&self) -> usize {
        self.value.train_count()
    }

    /// Averages the gradient over the accumulated backward passes.
    /// Returns `false` when the train count is zero.
    pub fn reduce_gradient(&self) -> Result<bool, Error> {
        if self.shares_buffer() {
            return Ok(self.value.reduce_gradient());
        }
        let count = self.value.train_count();
        if count == 0 {
            return Ok(false);
        }
        let divisor = T::from_f64(count as f64);
        let averaged = self.gradient.data().iter().map(|&g| g / divisor).collect();
        self.gradient.set_data(averaged)?;
        Ok(true)
    }

    /// Zeroes the gradient and resets the train count.
    pub fn clear_gradient(&self) -> Result<(), Error> {
        if self.shares_buffer() {
            self.value.clear_gradient();
            return Ok(());
        }
        self.gradient.set_data(vec![T::zero(); self.gradient.len()])?;
        self.value.clear_gradient();
        Ok(())
    }

    /// Applies `rule(values, gradient)` to the value buffer in place.
    ///
    /// ```rust
    /// use eager_grad::{Parameter, Tensor};
    ///
    /// let w = Parameter::new("w", Tensor::<f32>::from_vec(vec![1.0, 2.0], &[2]).unwrap());
    /// w.accumulate(&[0.5, -0.5]).unwrap();
    /// w.update(|values, grad| {
    ///     for (v, g) in values.iter_mut().zip(grad) {
    ///         *v -= 0.5 * g;
    ///     }
    /// });
    /// assert_eq!(w.value().to_vec(), vec![0.75, 2.25]);
    /// ```
    pub fn update<F>(&self, rule: F)
    where
        F: FnOnce(&mut [T], &[T]),
    {
        if self.shares_buffer() {
            self.value.update_with_grad(rule);
        } else {
            let gradient = self.gradient.to_vec();
            self.value.update_with_grad(|values, _| rule(values, &gradient));
        }
    }
}
