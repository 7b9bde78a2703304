//! Shape algebra shared by tensors and structural operations.
//!
//! Element order is row-major: the last axis varies fastest, and the batch
//! index sits in front of the first axis.

use crate::error::Error;

/// Number of elements described by a per-sample shape. An empty shape is one element.
pub fn shape_product(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Rejects zero extents and shapes whose element count overflows `usize`.
/// `shape_product` cannot overflow on a shape that passes.
pub fn validate_shape(shape: &[usize]) -> Result<(), Error> {
    if let Some(axis) = shape.iter().position(|&d| d == 0) {
        return Err(Error::ShapeError(format!(
            "Extent of axis {} in shape {:?} must be positive",
            axis, shape
        )));
    }
    checked_size(shape, 1).map(|_| ())
}

/// Total element count of `batch_count` samples of `shape`, or
/// `Error::ShapeError` on overflow.
pub fn checked_size(shape: &[usize], batch_count: usize) -> Result<usize, Error> {
    shape
        .iter()
        .try_fold(batch_count, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| {
            Error::ShapeError(format!(
                "Shape {:?} with {} sample(s) has too many elements",
                shape, batch_count
            ))
        })
}

/// Flat offset of `indices` inside sample `batch_index`, multiply-accumulating
/// from the last axis to the first. Callers guarantee `indices.len() == shape.len()`.
pub fn local_index(shape: &[usize], batch_index: usize, indices: &[usize]) -> usize {
    let mut index = 0;
    let mut stride = 1;
    for (&i, &extent) in indices.iter().zip(shape.iter()).rev() {
        index += i * stride;
        stride *= extent;
    }
    batch_index * shape_product(shape) + index
}

/// Per-axis index of a flat offset; any batch offset is discarded first.
pub fn dimensions_index(shape: &[usize], flat: usize) -> Vec<usize> {
    let mut rest = flat % shape_product(shape);
    let mut result = vec![0; shape.len()];
    for axis in (0..shape.len()).rev() {
        result[axis] = rest % shape[axis];
        rest /= shape[axis];
    }
    result
}

/// Resolves a reshape request against `length` elements. `-1` marks the one
/// extent to infer.
pub fn resolve_reshape(length: usize, requested: &[isize]) -> Result<Vec<usize>, Error> {
    let mut wildcard = None;
    let mut known = 1usize;
    for (axis, &dim) in requested.iter().enumerate() {
        match dim {
            -1 => {
                if wildcard.is_some() {
                    return Err(Error::ReshapeError(format!(
                        "More than one inferred extent in {:?}",
                        requested
                    )));
                }
                wildcard = Some(axis);
            }
            d if d <= 0 => {
                return Err(Error::ReshapeError(format!(
                    "Extent {} at axis {} of {:?} must be positive or -1",
                    d, axis, requested
                )));
            }
            d => {
                known = known.checked_mul(d as usize).ok_or_else(|| {
                    Error::ReshapeError(format!(
                        "Extents {:?} have too many elements",
                        requested
                    ))
                })?;
            }
        }
    }

    let mut shape: Vec<usize> = requested.iter().map(|&d| d.max(0) as usize).collect();
    match wildcard {
        Some(axis) => {
            if length % known != 0 {
                return Err(Error::ReshapeError(format!(
                    "Extents {:?} do not evenly divide {} elements",
                    requested, length
                )));
            }
            shape[axis] = length / known;
        }
        None => {
            if known != length {
                return Err(Error::ShapeMismatch {
                    expected: vec![length],
                    actual: vec![known],
                });
            }
        }
    }
    Ok(shape)
}

/// Sorts `axes` after rejecting duplicates and out-of-range entries. An empty
/// request selects every axis.
pub fn normalize_axes(rank: usize, axes: &[usize]) -> Result<Vec<usize>, Error> {
    if axes.is_empty() {
        return Ok((0..rank).collect());
    }
    let mut sorted = axes.to_vec();
    sorted.sort_unstable();
    if sorted.windows(2).any(|w| w[0] == w[1]) {
        return Err(Error::AxisError(format!("Duplicate axes in {:?}", axes)));
    }
    if let Some(&last) = sorted.last() {
        if last >= rank {
            return Err(Error::AxisError(format!(
                "Axis {} is out of range for rank {}",
                last, rank
            )));
        }
    }
    Ok(sorted)
}
