use crate::{
    error::Error,
    graph::{self, Op},
    ops,
    scalar::Real,
    util,
};
use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn};
use std::{
    cell::{Ref, RefCell},
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

static TENSOR_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn next_id() -> usize {
    TENSOR_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

const DEFAULT_NAME: &str = "Tensor";

/// Portable form of a tensor's value. Gradients, counters and the producer
/// link are never part of a snapshot.
#[cfg(feature = "serialization")]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TensorSnapshot {
    pub name: String,
    pub shape: Vec<usize>,
    pub batch_count: usize,
    pub data: Vec<f64>,
}

pub(crate) struct TensorData<T: Real> {
    pub id: usize,
    pub name: String,
    pub data: Vec<T>,
    pub grad: Vec<T>,
    pub shape: Vec<usize>,
    pub batch_count: usize,
    pub producer: Option<Op<T>>,
    pub use_count: usize,
    pub train_count: usize,
}

impl<T: Real> TensorData<T> {
    fn length(&self) -> usize {
        util::shape_product(&self.shape)
    }
}

/// A batch of dense n-dimensional samples with paired value and gradient buffers.
///
/// `Tensor` is a cheap handle: cloning it shares the same buffers, exactly as
/// the computation graph does when it records a tensor as an input. Use
/// [`Tensor::deep_clone`] for an independent copy.
///
/// `data` and `grad` both hold `length() * batch_count()` elements in
/// row-major order, with the batch index outermost.
///
/// # Example
/// ```rust
/// use eager_grad::{ops, Tensor};
///
/// fn main() -> Result<(), eager_grad::Error> {
///     let x = Tensor::<f64>::from_vec(vec![0.5, 1.0], &[2])?;
///     let y = ops::sin(&ops::cos(&x)?)?;
///     y.backward()?;
///
///     let expected = -(0.5f64).sin() * (0.5f64).cos().cos();
///     assert!((x.grad()[0] - expected).abs() < 1e-12);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Tensor<T: Real> {
    pub(crate) inner: Rc<RefCell<TensorData<T>>>,
}

impl<T: Real> Clone for Tensor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Real> PartialEq for Tensor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<T: Real> Eq for Tensor<T> {}

impl<T: Real> Hash for Tensor<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl<T: Real> Tensor<T> {
    /// Builds a tensor from buffers whose lengths the caller already checked.
    pub(crate) fn from_buffers(
        data: Vec<T>,
        grad: Vec<T>,
        shape: Vec<usize>,
        batch_count: usize,
    ) -> Self {
        debug_assert_eq!(data.len(), util::shape_product(&shape) * batch_count);
        debug_assert_eq!(grad.len(), data.len());
        Self {
            inner: Rc::new(RefCell::new(TensorData {
                id: next_id(),
                name: DEFAULT_NAME.to_string(),
                data,
                grad,
                shape,
                batch_count,
                producer: None,
                use_count: 0,
                train_count: 0,
            })),
        }
    }

    /// Creates a leaf tensor from flat data holding `batch_count` samples of `shape`.
    ///
    /// # Errors
    /// * `Error::ShapeError` if an extent or `batch_count` is zero
    /// * `Error::ShapeMismatch` if `data.len() != product(shape) * batch_count`
    pub fn new(data: Vec<T>, shape: &[usize], batch_count: usize) -> Result<Self, Error> {
        let expected = checked_len(shape, batch_count)?;
        if data.len() != expected {
            return Err(Error::ShapeMismatch {
                expected: vec![expected],
                actual: vec![data.len()],
            });
        }
        let grad = vec![T::zero(); data.len()];
        Ok(Self::from_buffers(data, grad, shape.to_vec(), batch_count))
    }

    /// Creates a single-sample leaf tensor.
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self, Error> {
        Self::new(data, shape, 1)
    }

    /// Creates a zero-filled leaf tensor.
    pub fn zeros(shape: &[usize], batch_count: usize) -> Result<Self, Error> {
        let size = checked_len(shape, batch_count)?;
        Self::new(vec![T::zero(); size], shape, batch_count)
    }

    /// A zero-filled leaf with this tensor's shape and batch count.
    pub fn zeros_like(&self) -> Self {
        let inner = self.inner.borrow();
        let size = inner.data.len();
        Self::from_buffers(
            vec![T::zero(); size],
            vec![T::zero(); size],
            inner.shape.clone(),
            inner.batch_count,
        )
    }

    /// A one-element tensor of shape `[1]`.
    pub fn scalar(value: T) -> Self {
        Self::from_buffers(vec![value], vec![T::zero()], vec![1], 1)
    }

    /// Creates a leaf tensor from a native multi-dimensional array. The shape is
    /// the array's extents and the batch count is one.
    pub fn from_ndarray<S, D>(array: &ArrayBase<S, D>) -> Result<Self, Error>
    where
        S: Data<Elem = T>,
        D: Dimension,
    {
        let shape = array.shape().to_vec();
        let data: Vec<T> = array.iter().copied().collect();
        Self::new(data, &shape, 1)
    }

    /// Stacks equally shaped tensors along a new leading batch axis. Both data
    /// and gradient buffers are copied.
    pub fn from_batch(samples: &[Tensor<T>]) -> Result<Self, Error> {
        let first = samples.first().ok_or_else(|| {
            Error::InvalidOperation("Cannot build a batch from zero samples".to_string())
        })?;
        let shape = first.shape();
        let mut data = Vec::new();
        let mut grad = Vec::new();
        let mut batch_count = 0;
        for sample in samples {
            let inner = sample.inner.borrow();
            if inner.shape != shape {
                return Err(Error::IncompatibleShapes {
                    op: "from_batch".to_string(),
                    shape_a: shape,
                    shape_b: inner.shape.clone(),
                });
            }
            data.extend_from_slice(&inner.data);
            grad.extend_from_slice(&inner.grad);
            batch_count += inner.batch_count;
        }
        Ok(Self::from_buffers(data, grad, shape, batch_count))
    }

    /// Copies the values into an `ndarray`. A leading batch axis is added when
    /// the tensor holds more than one sample.
    pub fn to_ndarray(&self) -> Result<ArrayD<T>, Error> {
        let inner = self.inner.borrow();
        let mut dims = Vec::with_capacity(inner.shape.len() + 1);
        if inner.batch_count > 1 {
            dims.push(inner.batch_count);
        }
        dims.extend_from_slice(&inner.shape);
        ArrayD::from_shape_vec(IxDyn(&dims), inner.data.clone())
            .map_err(|e| Error::ShapeError(e.to_string()))
    }

    pub fn id(&self) -> usize {
        self.inner.borrow().id
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.inner.borrow_mut().name = name.into();
    }

    /// Builder-style [`Tensor::set_name`].
    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.set_name(name);
        self
    }

    /// Per-sample shape; the batch axis is not included.
    pub fn shape(&self) -> Vec<usize> {
        self.inner.borrow().shape.clone()
    }

    pub fn rank(&self) -> usize {
        self.inner.borrow().shape.len()
    }

    pub fn batch_count(&self) -> usize {
        self.inner.borrow().batch_count
    }

    /// Elements per sample.
    pub fn length(&self) -> usize {
        self.inner.borrow().length()
    }

    /// Elements across all samples.
    pub fn len(&self) -> usize {
        self.inner.borrow().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> Ref<'_, [T]> {
        Ref::map(self.inner.borrow(), |inner| inner.data.as_slice())
    }

    pub fn grad(&self) -> Ref<'_, [T]> {
        Ref::map(self.inner.borrow(), |inner| inner.grad.as_slice())
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.inner.borrow().data.clone()
    }

    pub fn grad_to_vec(&self) -> Vec<T> {
        self.inner.borrow().grad.clone()
    }

    /// The gradient laid out like `to_string()` lays out the data.
    pub fn grad_to_string(&self) -> String {
        GradDisplay(self).to_string()
    }

    /// Name, shape, batch count, data and gradient, for inspecting accumulation.
    pub fn summary(&self) -> String {
        format!(
            "{} {:?} x{}\ndata:\n{}\ngrad:\n{}",
            self.name(),
            self.shape(),
            self.batch_count(),
            self,
            self.grad_to_string()
        )
    }

    /// Replaces the values. The element count must not change.
    pub fn set_data(&self, data: Vec<T>) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        if data.len() != inner.data.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![inner.data.len()],
                actual: vec![data.len()],
            });
        }
        inner.data = data;
        Ok(())
    }

    /// Overwrites the gradient buffer, e.g. to inject a synthetic gradient
    /// before [`Tensor::propagate`].
    pub fn set_grad(&self, grad: Vec<T>) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        if grad.len() != inner.grad.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![inner.grad.len()],
                actual: vec![grad.len()],
            });
        }
        inner.grad = grad;
        Ok(())
    }

    /// Adds `contribution` element-wise into the gradient buffer.
    pub fn accumulate_grad(&self, contribution: &[T]) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        if contribution.len() != inner.grad.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![inner.grad.len()],
                actual: vec![contribution.len()],
            });
        }
        for (g, &c) in inner.grad.iter_mut().zip(contribution) {
            *g += c;
        }
        Ok(())
    }

    /// Gives `f` the value buffer mutably alongside the gradient buffer.
    /// Optimizers use this to apply an update in place.
    pub fn update_with_grad<F>(&self, f: F)
    where
        F: FnOnce(&mut [T], &[T]),
    {
        let mut inner = self.inner.borrow_mut();
        let TensorData { data, grad, .. } = &mut *inner;
        f(data, grad);
    }

    /// Flat offset of an element, batch offset included.
    ///
    /// # Errors
    /// * `Error::DimensionMismatch` if `indices` does not name every axis
    /// * `Error::IndexOutOfBounds` if the batch or any axis index is too large
    pub fn local_index(&self, batch_index: usize, indices: &[usize]) -> Result<usize, Error> {
        let inner = self.inner.borrow();
        if batch_index >= inner.batch_count {
            return Err(Error::IndexOutOfBounds {
                index: batch_index,
                size: inner.batch_count,
            });
        }
        if indices.len() != inner.shape.len() {
            return Err(Error::DimensionMismatch(inner.shape.len(), indices.len()));
        }
        for (&i, &extent) in indices.iter().zip(inner.shape.iter()) {
            if i >= extent {
                return Err(Error::IndexOutOfBounds {
                    index: i,
                    size: extent,
                });
            }
        }
        Ok(util::local_index(&inner.shape, batch_index, indices))
    }

    /// Per-axis index of a flat offset. The batch part of `flat` is dropped;
    /// it is `flat / length()`.
    pub fn dimensions_index(&self, flat: usize) -> Result<Vec<usize>, Error> {
        let inner = self.inner.borrow();
        if flat >= inner.data.len() {
            return Err(Error::IndexOutOfBounds {
                index: flat,
                size: inner.data.len(),
            });
        }
        Ok(util::dimensions_index(&inner.shape, flat))
    }

    pub fn get(&self, batch_index: usize, indices: &[usize]) -> Result<T, Error> {
        let index = self.local_index(batch_index, indices)?;
        Ok(self.inner.borrow().data[index])
    }

    pub fn set(&self, batch_index: usize, indices: &[usize], value: T) -> Result<(), Error> {
        let index = self.local_index(batch_index, indices)?;
        self.inner.borrow_mut().data[index] = value;
        Ok(())
    }

    /// Changes the per-sample shape in place. A single `-1` extent is inferred
    /// from the remaining ones. Data and gradient keep their element order.
    ///
    /// # Errors
    /// * `Error::ReshapeError` for two wildcards, a non-positive extent, or a
    ///   wildcard the other extents do not divide
    /// * `Error::ShapeMismatch` if the new shape has a different element count
    pub fn reshape(&self, shape: &[isize]) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        let resolved = util::resolve_reshape(inner.length(), shape)?;
        inner.shape = resolved;
        Ok(())
    }

    /// Independent copy of buffers and bookkeeping. Shares nothing mutable
    /// with `self`, keeps the producer link, and receives a fresh id.
    pub fn deep_clone(&self) -> Self {
        let inner = self.inner.borrow();
        Self {
            inner: Rc::new(RefCell::new(TensorData {
                id: next_id(),
                name: inner.name.clone(),
                data: inner.data.clone(),
                grad: inner.grad.clone(),
                shape: inner.shape.clone(),
                batch_count: inner.batch_count,
                producer: inner.producer.clone(),
                use_count: inner.use_count,
                train_count: inner.train_count,
            })),
        }
    }

    /// Copies sample `batch_index` (data and gradient) into a new leaf.
    pub fn single_sample(&self, batch_index: usize) -> Result<Self, Error> {
        let inner = self.inner.borrow();
        if batch_index >= inner.batch_count {
            return Err(Error::IndexOutOfBounds {
                index: batch_index,
                size: inner.batch_count,
            });
        }
        let length = inner.length();
        let range = batch_index * length..(batch_index + 1) * length;
        Ok(Self::from_buffers(
            inner.data[range.clone()].to_vec(),
            inner.grad[range].to_vec(),
            inner.shape.clone(),
            1,
        ))
    }

    /// Seeds the gradient with ones and back-propagates through the graph.
    pub fn backward(&self) -> Result<(), Error> {
        {
            let mut inner = self.inner.borrow_mut();
            let size = inner.grad.len();
            inner.grad = vec![T::one(); size];
        }
        graph::backward_from(self).map(|_| ())
    }

    /// Back-propagates the gradient already held by this tensor.
    pub fn propagate(&self) -> Result<(), Error> {
        graph::backward_from(self).map(|_| ())
    }

    /// Averages the accumulated gradient over `train_count` backward passes.
    /// Returns `false`, leaving the gradient untouched, when nothing was accumulated.
    pub fn reduce_gradient(&self) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.train_count == 0 {
            return false;
        }
        let count = T::from_f64(inner.train_count as f64);
        for g in inner.grad.iter_mut() {
            *g /= count;
        }
        true
    }

    /// Zeroes the gradient and resets the train count.
    pub fn clear_gradient(&self) {
        let mut inner = self.inner.borrow_mut();
        let size = inner.data.len();
        inner.grad = vec![T::zero(); size];
        inner.train_count = 0;
    }

    /// Records one more backward pass accumulated into the gradient.
    pub fn count_up(&self) {
        self.inner.borrow_mut().train_count += 1;
    }

    pub fn train_count(&self) -> usize {
        self.inner.borrow().train_count
    }

    /// Consumers that have read this tensor but not yet sent their gradient back.
    pub fn use_count(&self) -> usize {
        self.inner.borrow().use_count
    }

    pub(crate) fn retain_use(&self) {
        self.inner.borrow_mut().use_count += 1;
    }

    /// Marks one consumer's contribution as delivered and returns how many remain.
    pub(crate) fn release_use(&self) -> Result<usize, Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.use_count == 0 {
            return Err(Error::InternalLogicError(format!(
                "Tensor {} received more gradient contributions than recorded uses",
                inner.id
            )));
        }
        inner.use_count -= 1;
        Ok(inner.use_count)
    }

    /// The function whose forward call created this tensor, if any.
    pub fn producer(&self) -> Option<Op<T>> {
        self.inner.borrow().producer.clone()
    }

    pub(crate) fn set_producer(&self, producer: Option<Op<T>>) {
        self.inner.borrow_mut().producer = producer;
    }

    /// `true` for external inputs, parameters and cut tensors.
    pub fn is_leaf(&self) -> bool {
        self.inner.borrow().producer.is_none()
    }

    /// Drops the producer link so later traversals stop at this tensor.
    pub fn cut_graph(&self) {
        let mut inner = self.inner.borrow_mut();
        if let Some(_op) = inner.producer.take() {
            debug_println!("cut graph at tensor {} (producer {})", inner.id, _op.name());
        }
    }

    /// Element-wise `self + other`. Calls `eager_grad::ops::add`.
    pub fn add(&self, other: &Tensor<T>) -> Result<Tensor<T>, Error> {
        ops::add(self, other)
    }

    /// Element-wise `self - other`. Calls `eager_grad::ops::sub`.
    pub fn sub(&self, other: &Tensor<T>) -> Result<Tensor<T>, Error> {
        ops::sub(self, other)
    }

    /// Element-wise `self * other`. Calls `eager_grad::ops::mul`.
    pub fn mul(&self, other: &Tensor<T>) -> Result<Tensor<T>, Error> {
        ops::mul(self, other)
    }

    /// Element-wise `self / other`. Calls `eager_grad::ops::div`.
    pub fn div(&self, other: &Tensor<T>) -> Result<Tensor<T>, Error> {
        ops::div(self, other)
    }

    pub fn add_scalar(&self, value: T) -> Result<Tensor<T>, Error> {
        ops::add_const(self, value)
    }

    pub fn sub_scalar(&self, value: T) -> Result<Tensor<T>, Error> {
        ops::sub_const(self, value)
    }

    pub fn mul_scalar(&self, value: T) -> Result<Tensor<T>, Error> {
        ops::mul_const(self, value)
    }

    pub fn div_scalar(&self, value: T) -> Result<Tensor<T>, Error> {
        ops::div_const(self, value)
    }

    /// `value - self`.
    pub fn rsub_scalar(&self, value: T) -> Result<Tensor<T>, Error> {
        ops::const_sub(value, self)
    }

    /// `value / self`.
    pub fn rdiv_scalar(&self, value: T) -> Result<Tensor<T>, Error> {
        ops::const_div(value, self)
    }

    pub fn sin(&self) -> Result<Tensor<T>, Error> {
        ops::sin(self)
    }

    pub fn cos(&self) -> Result<Tensor<T>, Error> {
        ops::cos(self)
    }

    pub fn tan(&self) -> Result<Tensor<T>, Error> {
        ops::tan(self)
    }

    pub fn arctan(&self) -> Result<Tensor<T>, Error> {
        ops::arctan(self)
    }

    #[cfg(feature = "serialization")]
    pub fn snapshot(&self) -> TensorSnapshot {
        let inner = self.inner.borrow();
        TensorSnapshot {
            name: inner.name.clone(),
            shape: inner.shape.clone(),
            batch_count: inner.batch_count,
            data: inner.data.iter().map(|v| v.as_f64()).collect(),
        }
    }

    /// Rebuilds a leaf tensor from a snapshot. A new id is generated.
    #[cfg(feature = "serialization")]
    pub fn from_snapshot(snapshot: TensorSnapshot) -> Result<Self, Error> {
        let data = snapshot.data.into_iter().map(T::from_f64).collect();
        let tensor = Self::new(data, &snapshot.shape, snapshot.batch_count)?;
        tensor.set_name(snapshot.name);
        Ok(tensor)
    }

    #[cfg(feature = "serialization")]
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(&self.snapshot()).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize tensor: {}", e))
        })
    }

    #[cfg(feature = "serialization")]
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let snapshot: TensorSnapshot = serde_json::from_str(json).map_err(|e| {
            Error::SerializationError(format!("Failed to deserialize tensor: {}", e))
        })?;
        Self::from_snapshot(snapshot)
    }
}

/// Buffer length for `batch_count` samples of `shape`, validating both.
fn checked_len(shape: &[usize], batch_count: usize) -> Result<usize, Error> {
    util::validate_shape(shape)?;
    if batch_count == 0 {
        return Err(Error::ShapeError(
            "Batch count must be positive".to_string(),
        ));
    }
    util::checked_size(shape, batch_count)
}

fn write_sample<T: Real>(f: &mut fmt::Formatter<'_>, data: &[T], shape: &[usize]) -> fmt::Result {
    match shape.split_first() {
        None => write!(f, "{}", data[0]),
        Some((&extent, rest)) => {
            let step = util::shape_product(rest);
            write!(f, "[")?;
            for i in 0..extent {
                if i > 0 {
                    f.write_str(if rest.is_empty() { " " } else { "\n" })?;
                }
                write_sample(f, &data[i * step..(i + 1) * step], rest)?;
            }
            write!(f, "]")
        }
    }
}

/// Nested brackets per axis; samples of a batch are wrapped in braces.
fn write_buffer<T: Real>(
    f: &mut fmt::Formatter<'_>,
    buffer: &[T],
    shape: &[usize],
    batch_count: usize,
) -> fmt::Result {
    if batch_count == 1 {
        return write_sample(f, buffer, shape);
    }
    let length = util::shape_product(shape);
    for batch in 0..batch_count {
        if batch > 0 {
            f.write_str(",\n")?;
        }
        write!(f, "{{")?;
        write_sample(f, &buffer[batch * length..(batch + 1) * length], shape)?;
        write!(f, "}}")?;
    }
    Ok(())
}

/// Renders a tensor's gradient buffer in the `Display` layout.
struct GradDisplay<'a, T: Real>(&'a Tensor<T>);

impl<T: Real> fmt::Display for GradDisplay<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.inner.borrow();
        write_buffer(f, &inner.grad, &inner.shape, inner.batch_count)
    }
}

impl<T: Real> fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        write_buffer(f, &inner.data, &inner.shape, inner.batch_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_nested() {
        let t = Tensor::<f32>::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        assert_eq!(t.to_string(), "[[1 2]\n[3 4]]");

        let b = Tensor::<f32>::new(vec![1.0, 2.0], &[1], 2).unwrap();
        assert_eq!(b.to_string(), "{[1]},\n{[2]}");
    }

    #[test]
    fn test_grad_rendering() {
        let t = Tensor::<f32>::new(vec![1.0, 2.0, 3.0, 4.0], &[2], 2)
            .unwrap()
            .with_name("w");
        t.accumulate_grad(&[0.5, 0.0, -1.0, 2.0]).unwrap();
        assert_eq!(t.grad_to_string(), "{[0.5 0]},\n{[-1 2]}");
        assert_eq!(
            t.summary(),
            "w [2] x2\ndata:\n{[1 2]},\n{[3 4]}\ngrad:\n{[0.5 0]},\n{[-1 2]}"
        );
    }

    #[test]
    fn test_release_use_below_zero_is_an_error() {
        let t = Tensor::<f32>::scalar(1.0);
        t.retain_use();
        assert_eq!(t.release_use().unwrap(), 0);
        assert!(matches!(t.release_use(), Err(Error::InternalLogicError(_))));
    }
}
