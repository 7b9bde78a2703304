use crate::{Error, Real, Tensor};

/// Checks the gradient of a function with respect to a specific input tensor.
///
/// # Arguments
/// * `func`: A closure that takes a slice of input tensors and returns a one-element tensor (the loss).
/// * `inputs`: Leaf input tensors.
/// * `input_idx_to_check`: The index in the `inputs` slice for which to check the gradient.
/// * `epsilon`: A small value for finite difference perturbation (e.g., 1e-6 for `f64`).
/// * `tolerance`: The maximum allowed relative or absolute difference between analytical and numerical gradients.
///
/// # Returns
/// * `Ok(())` if the gradients match within the tolerance.
/// * `Err(Error::GradientCheckError)` describing the worst mismatch otherwise.
pub fn check_gradient<T, F>(
    func: F,
    inputs: &[Tensor<T>],
    input_idx_to_check: usize,
    epsilon: f64,
    tolerance: f64,
) -> Result<(), Error>
where
    T: Real,
    F: Fn(&[Tensor<T>]) -> Result<Tensor<T>, Error>,
{
    if input_idx_to_check >= inputs.len() {
        return Err(Error::InvalidOperation(format!(
            "input_idx_to_check ({}) is out of bounds for inputs slice (len {})",
            input_idx_to_check,
            inputs.len()
        )));
    }

    let analytical = compute_analytical_gradient(&func, inputs, input_idx_to_check)?;
    let numerical = compute_numerical_gradient(&func, inputs, input_idx_to_check, epsilon)?;
    compare_gradients(&analytical, &numerical, tolerance)
}

fn scalar_loss<T: Real>(loss: &Tensor<T>) -> Result<f64, Error> {
    if loss.len() != 1 {
        return Err(Error::InvalidOperation(format!(
            "Function must return a one-element tensor for gradient checking, got shape {:?} with batch {}",
            loss.shape(),
            loss.batch_count()
        )));
    }
    Ok(loss.data()[0].as_f64())
}

fn compute_analytical_gradient<T, F>(
    func: &F,
    inputs: &[Tensor<T>],
    input_idx_to_check: usize,
) -> Result<Vec<f64>, Error>
where
    T: Real,
    F: Fn(&[Tensor<T>]) -> Result<Tensor<T>, Error>,
{
    for input in inputs {
        input.clear_gradient();
    }

    let loss = func(inputs)?;
    scalar_loss(&loss)?;
    loss.backward()?;

    Ok(inputs[input_idx_to_check]
        .grad()
        .iter()
        .map(|g| g.as_f64())
        .collect())
}

fn compute_numerical_gradient<T, F>(
    func: &F,
    original_inputs: &[Tensor<T>],
    input_idx_to_check: usize,
    epsilon: f64,
) -> Result<Vec<f64>, Error>
where
    T: Real,
    F: Fn(&[Tensor<T>]) -> Result<Tensor<T>, Error>,
{
    let target = &original_inputs[input_idx_to_check];
    let shape = target.shape();
    let batch_count = target.batch_count();
    let original_data = target.to_vec();
    let mut inputs = original_inputs.to_vec();
    let mut numerical = Vec::with_capacity(original_data.len());

    for i in 0..original_data.len() {
        let mut evaluate = |delta: f64| -> Result<f64, Error> {
            let mut data = original_data.clone();
            data[i] = T::from_f64(data[i].as_f64() + delta);
            inputs[input_idx_to_check] = Tensor::new(data, &shape, batch_count)?;
            scalar_loss(&func(&inputs)?)
        };
        let loss_plus = evaluate(epsilon)?;
        let loss_minus = evaluate(-epsilon)?;
        // Central difference formula
        numerical.push((loss_plus - loss_minus) / (2.0 * epsilon));
    }

    Ok(numerical)
}

fn compare_gradients(analytical: &[f64], numerical: &[f64], tolerance: f64) -> Result<(), Error> {
    if analytical.len() != numerical.len() {
        return Err(Error::InternalLogicError(format!(
            "Gradient size mismatch: analytical size={}, numerical size={}",
            analytical.len(),
            numerical.len()
        )));
    }

    let mut max_rel_err = 0.0;
    let mut max_abs_err = 0.0;
    let mut max_err_idx = 0;

    for (i, (a, n)) in analytical.iter().zip(numerical.iter()).enumerate() {
        let abs_err = (a - n).abs();
        let rel_err = if a.abs() > 1e-8 && n.abs() > 1e-8 {
            abs_err / a.abs().max(n.abs())
        } else {
            abs_err
        };

        if rel_err > max_rel_err {
            max_rel_err = rel_err;
            max_abs_err = abs_err;
            max_err_idx = i;
        }
    }

    if max_rel_err <= tolerance {
        Ok(())
    } else {
        Err(Error::GradientCheckError {
            analytical: analytical.to_vec(),
            numerical: numerical.to_vec(),
            max_rel_error: max_rel_err,
            max_abs_error: max_abs_err,
            at_index: max_err_idx,
        })
    }
}

pub fn assert_tensor_eq<T: Real>(actual: &Tensor<T>, expected: &[T]) {
    let actual = actual.to_vec();
    assert_eq!(actual.len(), expected.len(), "Tensor lengths don't match");
    for (i, (a_val, e_val)) in actual.iter().zip(expected.iter()).enumerate() {
        assert_eq!(
            *a_val, *e_val,
            "Values at index {i} don't match: actual={a_val}, expected={e_val}"
        );
    }
}

pub fn assert_grad_close<T: Real>(tensor: &Tensor<T>, expected: &[f64], tol: f64) {
    let grad = tensor.grad_to_vec();
    assert_eq!(grad.len(), expected.len(), "Gradient lengths don't match");
    for (i, (g, e)) in grad.iter().zip(expected.iter()).enumerate() {
        let g = g.as_f64();
        assert!(
            (g - e).abs() < tol,
            "Gradients at index {i} aren't close enough: actual={g}, expected={e}, diff={}, tol={tol}",
            (g - e).abs()
        );
    }
}
