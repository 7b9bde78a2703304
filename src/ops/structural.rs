//! Shape-changing operations. These copy both value and gradient buffers into
//! new leaf tensors and are not recorded in the graph.

use crate::error::Error;
use crate::scalar::Real;
use crate::tensor::Tensor;
use crate::util;

/// Sums one axis of every sample. Returns the reduced buffers and shape.
fn sum_axis<T: Real>(
    data: &[T],
    grad: &[T],
    shape: &[usize],
    batch_count: usize,
    axis: usize,
) -> (Vec<T>, Vec<T>, Vec<usize>) {
    let mut reduced_shape = shape.to_vec();
    reduced_shape.remove(axis);
    let length = util::shape_product(shape);
    let reduced_length = util::shape_product(&reduced_shape);

    let mut out_data = vec![T::zero(); reduced_length * batch_count];
    let mut out_grad = vec![T::zero(); reduced_length * batch_count];
    for i in 0..length {
        let mut index = util::dimensions_index(shape, i);
        index.remove(axis);
        let target = util::local_index(&reduced_shape, 0, &index);
        for b in 0..batch_count {
            out_data[b * reduced_length + target] += data[b * length + i];
            out_grad[b * reduced_length + target] += grad[b * length + i];
        }
    }
    (out_data, out_grad, reduced_shape)
}

/// Sums over `axes` (every axis when empty), per sample. With `keep_dims` the
/// reduced axes stay in place with extent 1, numpy-style: axis 1 of `[2, 3, 4]`
/// gives `[2, 1, 4]`, not `[1, 2, 4]`. Element order is the same either way.
pub fn sum<T: Real>(x: &Tensor<T>, axes: &[usize], keep_dims: bool) -> Result<Tensor<T>, Error> {
    let axes = util::normalize_axes(x.rank(), axes)?;
    let batch_count = x.batch_count();
    let mut shape = x.shape();
    let mut data = x.to_vec();
    let mut grad = x.grad_to_vec();

    // Reducing in ascending order shifts later axes left by one per step.
    for (removed, &axis) in axes.iter().enumerate() {
        let (d, g, s) = sum_axis(&data, &grad, &shape, batch_count, axis - removed);
        data = d;
        grad = g;
        shape = s;
    }
    if keep_dims {
        for &axis in &axes {
            shape.insert(axis, 1);
        }
    }
    Ok(Tensor::from_buffers(data, grad, shape, batch_count))
}

fn check_axis(rank: usize, axis: usize) -> Result<(), Error> {
    if axis >= rank {
        return Err(Error::AxisError(format!(
            "Axis {} is out of range for rank {}",
            axis, rank
        )));
    }
    Ok(())
}

/// Copies the sub-block of every sample starting at `offset` along `axis`
/// with the extents of `piece_shape`.
fn extract<T: Real>(
    source: &[T],
    shape: &[usize],
    batch_count: usize,
    piece_shape: &[usize],
    axis: usize,
    offset: usize,
) -> Vec<T> {
    let piece_length = util::shape_product(piece_shape);
    let mut out = Vec::with_capacity(piece_length * batch_count);
    for b in 0..batch_count {
        for j in 0..piece_length {
            let mut index = util::dimensions_index(piece_shape, j);
            index[axis] += offset;
            out.push(source[util::local_index(shape, b, &index)]);
        }
    }
    out
}

/// Splits every sample along `axis` at the given ascending interior points.
/// `k` points yield `k + 1` pieces.
///
/// # Errors
/// * `Error::AxisError` if `axis` is out of range
/// * `Error::InvalidOperation` if `points` is empty, not strictly ascending,
///   or touches either end of the axis
pub fn split<T: Real>(x: &Tensor<T>, points: &[usize], axis: usize) -> Result<Vec<Tensor<T>>, Error> {
    let shape = x.shape();
    check_axis(shape.len(), axis)?;
    let extent = shape[axis];
    if points.is_empty() {
        return Err(Error::InvalidOperation(
            "split needs at least one split point".to_string(),
        ));
    }
    let mut bounds = Vec::with_capacity(points.len() + 2);
    bounds.push(0);
    for &p in points {
        let previous = bounds[bounds.len() - 1];
        if p <= previous || p >= extent {
            return Err(Error::InvalidOperation(format!(
                "Split points {:?} must be strictly ascending inside (0, {})",
                points, extent
            )));
        }
        bounds.push(p);
    }
    bounds.push(extent);

    let batch_count = x.batch_count();
    let data = x.data();
    let grad = x.grad();
    let pieces = bounds
        .windows(2)
        .map(|w| {
            let mut piece_shape = shape.clone();
            piece_shape[axis] = w[1] - w[0];
            let piece_data = extract(&data, &shape, batch_count, &piece_shape, axis, w[0]);
            let piece_grad = extract(&grad, &shape, batch_count, &piece_shape, axis, w[0]);
            Tensor::from_buffers(piece_data, piece_grad, piece_shape, batch_count)
        })
        .collect();
    Ok(pieces)
}

/// Joins two tensors along `axis`. All other extents and the batch count must agree.
pub fn concatenate<T: Real>(a: &Tensor<T>, b: &Tensor<T>, axis: usize) -> Result<Tensor<T>, Error> {
    let (shape_a, shape_b) = (a.shape(), b.shape());
    let compatible = shape_a.len() == shape_b.len()
        && shape_a
            .iter()
            .zip(shape_b.iter())
            .enumerate()
            .all(|(i, (x, y))| i == axis || x == y);
    if !compatible {
        return Err(Error::IncompatibleShapes {
            op: "concatenate".to_string(),
            shape_a,
            shape_b,
        });
    }
    check_axis(shape_a.len(), axis)?;
    let (batch_a, batch_b) = (a.batch_count(), b.batch_count());
    if batch_a != batch_b {
        return Err(Error::BatchMismatch {
            op: "concatenate".to_string(),
            batch_a,
            batch_b,
        });
    }

    let mut shape = shape_a.clone();
    shape[axis] += shape_b[axis];
    let length = util::shape_product(&shape);
    let mut data = vec![T::zero(); length * batch_a];
    let mut grad = vec![T::zero(); length * batch_a];

    for (source, source_shape, offset) in [(a, &shape_a, 0), (b, &shape_b, shape_a[axis])] {
        let source_length = util::shape_product(source_shape);
        let (sd, sg) = (source.data(), source.grad());
        for batch in 0..batch_a {
            for j in 0..source_length {
                let mut index = util::dimensions_index(source_shape, j);
                index[axis] += offset;
                let target = util::local_index(&shape, batch, &index);
                data[target] = sd[batch * source_length + j];
                grad[target] = sg[batch * source_length + j];
            }
        }
    }
    Ok(Tensor::from_buffers(data, grad, shape, batch_a))
}

/// Copy of `x` with a new per-sample shape. A single `-1` extent is inferred.
pub fn reshape<T: Real>(x: &Tensor<T>, shape: &[isize]) -> Result<Tensor<T>, Error> {
    let resolved = util::resolve_reshape(x.length(), shape)?;
    Ok(Tensor::from_buffers(
        x.to_vec(),
        x.grad_to_vec(),
        resolved,
        x.batch_count(),
    ))
}

/// One single-sample tensor per batch entry.
pub fn divide_batches<T: Real>(x: &Tensor<T>) -> Result<Vec<Tensor<T>>, Error> {
    (0..x.batch_count()).map(|i| x.single_sample(i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_keep_dims_middle_axis() {
        let x = Tensor::<f64>::from_vec((0..24).map(f64::from).collect(), &[2, 3, 4]).unwrap();
        let s = sum(&x, &[1], true).unwrap();
        assert_eq!(s.shape(), vec![2, 1, 4]);
        // x[0, :, 0] = 0, 4, 8
        assert_eq!(s.get(0, &[0, 0, 0]).unwrap(), 12.0);
        // x[1, :, 3] = 15, 19, 23
        assert_eq!(s.get(0, &[1, 0, 3]).unwrap(), 57.0);
    }

    #[test]
    fn test_sum_all_axes_per_sample() {
        let x = Tensor::<f32>::new(vec![1.0, 2.0, 3.0, 4.0], &[2], 2).unwrap();
        let s = sum(&x, &[], false).unwrap();
        assert!(s.shape().is_empty());
        assert_eq!(s.batch_count(), 2);
        assert_eq!(s.to_vec(), vec![3.0, 7.0]);
    }
}
