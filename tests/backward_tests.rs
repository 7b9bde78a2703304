use approx::assert_abs_diff_eq;
use eager_grad::graph::{
    backward_from, Function, NeedPreviousInputFunction, Op, SingleInputFunction,
};
use eager_grad::test_utils::assert_grad_close;
use eager_grad::{ops, Error, Tensor};
use std::cell::RefCell;
use std::rc::Rc;

fn tensor(data: Vec<f64>, shape: &[usize]) -> Tensor<f64> {
    Tensor::from_vec(data, shape).unwrap()
}

/// Sine kernel that records the upstream gradient it sees on every backward call.
struct RecordingSin {
    seen: Rc<RefCell<Vec<Vec<f64>>>>,
}

impl SingleInputFunction<f64> for RecordingSin {
    fn forward(&self, x: &Tensor<f64>) -> Result<Tensor<f64>, Error> {
        let data = x.data().iter().map(|v| v.sin()).collect();
        Tensor::new(data, &x.shape(), x.batch_count())
    }

    fn backward(&self, y: &Tensor<f64>, x: &Tensor<f64>) -> Result<(), Error> {
        let gy = y.grad_to_vec();
        self.seen.borrow_mut().push(gy.clone());
        let gx: Vec<f64> = gy
            .iter()
            .zip(x.data().iter())
            .map(|(g, v)| g * v.cos())
            .collect();
        x.accumulate_grad(&gx)
    }
}

#[test]
fn test_sin_cos_chain_matches_closed_form() -> Result<(), Error> {
    let values = vec![-1.2, 0.0, 0.5, 2.0];
    let x = tensor(values.clone(), &[4]);
    let y = ops::sin(&ops::cos(&x)?)?;
    y.backward()?;

    for (g, v) in x.grad_to_vec().iter().zip(values.iter()) {
        assert_abs_diff_eq!(*g, -v.sin() * v.cos().cos(), epsilon = 1e-12);
    }
    Ok(())
}

#[test]
fn test_long_chain_reaches_leaf() -> Result<(), Error> {
    let x = tensor(vec![0.3], &[1]);
    let mut h = x.clone();
    for _ in 0..50 {
        h = h.mul_scalar(1.01)?;
    }
    h.backward()?;
    assert_abs_diff_eq!(x.grad()[0], 1.01f64.powi(50), epsilon = 1e-9);
    Ok(())
}

#[test]
fn test_fan_out_accumulates_both_contributions() -> Result<(), Error> {
    let x = tensor(vec![1.0, 2.0, 3.0], &[3]);
    let a = x.add_scalar(1.0)?;
    let b = x.mul_scalar(3.0)?;
    assert_eq!(x.use_count(), 2);

    a.set_grad(vec![0.5, 0.5, 0.5])?;
    b.set_grad(vec![1.0, 2.0, 3.0])?;
    a.propagate()?;
    b.propagate()?;

    // 0.5 from the add branch plus 3 * upstream from the mul branch
    assert_eq!(x.grad_to_vec(), vec![3.5, 6.5, 9.5]);
    assert_eq!(x.use_count(), 0);
    Ok(())
}

#[test]
fn test_self_product_gradient() -> Result<(), Error> {
    let x = tensor(vec![1.5, -2.0], &[2]);
    let y = ops::mul(&x, &x)?;
    assert_eq!(x.use_count(), 2);
    y.backward()?;
    assert_grad_close(&x, &[3.0, -4.0], 1e-12);
    assert_eq!(x.use_count(), 0);
    Ok(())
}

#[test]
fn test_use_count_gates_non_leaf() -> Result<(), Error> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sin = Op::single_input(
        "RecordingSin",
        RecordingSin {
            seen: Rc::clone(&seen),
        },
    );

    let x = tensor(vec![0.25, 1.0], &[2]);
    let h = sin.forward(&[x.clone()])?.remove(0);
    let a = h.add_scalar(1.0)?;
    let b = h.sub_scalar(2.0)?;
    let loss = ops::add(&a, &b)?;
    assert_eq!(h.use_count(), 2);

    loss.set_grad(vec![1.0, 1.0])?;
    let pass = backward_from(&loss)?;

    // Add, AddConst, SubConst, then the sine exactly once
    assert_eq!(pass.steps, 4);
    assert!(pass.dangling.is_empty());
    assert_eq!(h.use_count(), 0);
    assert_eq!(*seen.borrow(), vec![vec![2.0, 2.0]]);
    assert_eq!(sin.pending_calls(), 0);
    assert_grad_close(&x, &[2.0 * 0.25f64.cos(), 2.0 * 1.0f64.cos()], 1e-12);
    Ok(())
}

#[test]
fn test_unseeded_branch_leaves_dangling_use() -> Result<(), Error> {
    let x = tensor(vec![0.5], &[1]);
    let h = ops::sin(&x)?;
    let used = h.add_scalar(1.0)?;
    let _unused = h.mul_scalar(2.0)?;

    used.set_grad(vec![1.0])?;
    let pass = backward_from(&used)?;

    assert_eq!(pass.steps, 1);
    assert_eq!(pass.dangling, vec![h.clone()]);
    assert_eq!(h.use_count(), 1);
    assert_eq!(h.grad_to_vec(), vec![1.0]);
    // Truncated: nothing reached the leaf
    assert_eq!(x.grad_to_vec(), vec![0.0]);
    Ok(())
}

#[test]
fn test_graph_cut_stops_traversal() -> Result<(), Error> {
    let x = tensor(vec![0.5], &[1]);
    let h = ops::sin(&x)?;
    let sin = h.producer().unwrap();
    h.cut_graph();
    assert!(h.is_leaf());

    let z = ops::cos(&h)?;
    z.backward()?;
    assert_abs_diff_eq!(h.grad()[0], -(0.5f64.sin()).sin(), epsilon = 1e-12);
    assert_eq!(x.grad_to_vec(), vec![0.0]);

    // The first segment can still be finished by hand from the cut point
    assert_eq!(sin.pending_calls(), 1);
    let inputs = sin.backward_step(&h)?;
    assert_eq!(inputs, vec![x.clone()]);
    assert_abs_diff_eq!(
        x.grad()[0],
        -(0.5f64.sin()).sin() * 0.5f64.cos(),
        epsilon = 1e-12
    );
    Ok(())
}

#[test]
fn test_shared_op_history_is_matched_by_output() -> Result<(), Error> {
    let square = Op::dual_input("Mul", eager_grad::ops::arithmetic::Mul);
    let a = tensor(vec![2.0], &[1]);
    let b = tensor(vec![3.0], &[1]);

    let ya = square.forward(&[a.clone(), a.clone()])?.remove(0);
    let yb = square.forward(&[b.clone(), b.clone()])?.remove(0);
    assert_eq!(square.pending_calls(), 2);
    assert_eq!(square.previous_inputs()[0], vec![a.clone(), a.clone()]);

    // Differentiate the older call first
    ya.backward()?;
    assert_eq!(a.grad_to_vec(), vec![4.0]);
    assert_eq!(b.grad_to_vec(), vec![0.0]);
    assert_eq!(square.pending_calls(), 1);

    yb.backward()?;
    assert_eq!(b.grad_to_vec(), vec![6.0]);
    assert_eq!(square.pending_calls(), 0);

    // A second backward over the same output has no history left
    assert!(matches!(
        ya.backward(),
        Err(Error::MissingHistory { .. })
    ));
    Ok(())
}

#[test]
fn test_reset_history() -> Result<(), Error> {
    let op = Op::single_input("Sin", eager_grad::ops::trigonometric::Sin);
    let x = tensor(vec![0.1], &[1]);
    let y = op.forward(&[x.clone()])?.remove(0);
    op.reset_history();
    assert_eq!(op.pending_calls(), 0);
    assert!(matches!(y.backward(), Err(Error::MissingHistory { .. })));
    Ok(())
}

#[test]
fn test_arithmetic_gradients() -> Result<(), Error> {
    let a = tensor(vec![2.0, -1.0], &[2]);
    let b = tensor(vec![4.0, 0.5], &[2]);

    ops::div(&a, &b)?.backward()?;
    assert_grad_close(&a, &[0.25, 2.0], 1e-12);
    assert_grad_close(&b, &[-2.0 / 16.0, 1.0 / 0.25], 1e-12);

    a.clear_gradient();
    b.clear_gradient();
    ops::sub(&a, &b)?.backward()?;
    assert_grad_close(&a, &[1.0, 1.0], 1e-12);
    assert_grad_close(&b, &[-1.0, -1.0], 1e-12);

    a.clear_gradient();
    a.rsub_scalar(3.0)?.backward()?;
    assert_grad_close(&a, &[-1.0, -1.0], 1e-12);

    a.clear_gradient();
    a.rdiv_scalar(3.0)?.backward()?;
    assert_grad_close(&a, &[-3.0 / 4.0, -3.0], 1e-12);

    a.clear_gradient();
    a.div_scalar(4.0)?.backward()?;
    assert_grad_close(&a, &[0.25, 0.25], 1e-12);

    a.clear_gradient();
    a.sub_scalar(4.0)?.backward()?;
    assert_grad_close(&a, &[1.0, 1.0], 1e-12);
    Ok(())
}

#[test]
fn test_trigonometric_gradients() -> Result<(), Error> {
    let x = tensor(vec![0.3, -0.7], &[2]);

    x.tan()?.backward()?;
    let expected: Vec<f64> = [0.3f64, -0.7].iter().map(|v| 1.0 / (v.cos() * v.cos())).collect();
    assert_grad_close(&x, &expected, 1e-12);

    x.clear_gradient();
    x.arctan()?.backward()?;
    let expected: Vec<f64> = [0.3f64, -0.7].iter().map(|v| 1.0 / (1.0 + v * v)).collect();
    assert_grad_close(&x, &expected, 1e-12);
    Ok(())
}

#[test]
fn test_batched_backward() -> Result<(), Error> {
    let x = Tensor::<f64>::new(vec![1.0, 2.0, 3.0, 4.0], &[2], 2)?;
    let w = Tensor::<f64>::new(vec![0.5, 0.5, 2.0, 2.0], &[2], 2)?;
    ops::mul(&x, &w)?.backward()?;
    assert_eq!(x.grad_to_vec(), vec![0.5, 0.5, 2.0, 2.0]);
    assert_eq!(w.grad_to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    Ok(())
}

#[test]
fn test_backward_on_leaf_only_seeds() -> Result<(), Error> {
    let x = tensor(vec![1.0, 2.0], &[2]);
    x.backward()?;
    assert_eq!(x.grad_to_vec(), vec![1.0, 1.0]);
    Ok(())
}

/// `x^2`, differentiated from the retained input rather than the output.
struct Square;

impl NeedPreviousInputFunction<f64> for Square {
    fn forward(&self, x: &Tensor<f64>) -> Result<Tensor<f64>, Error> {
        let data = x.data().iter().map(|v| v * v).collect();
        Tensor::new(data, &x.shape(), x.batch_count())
    }

    fn backward(&self, y: &Tensor<f64>, x: &Tensor<f64>) -> Result<Option<Vec<f64>>, Error> {
        let gx = y
            .grad()
            .iter()
            .zip(x.data().iter())
            .map(|(g, v)| 2.0 * g * v)
            .collect();
        Ok(Some(gx))
    }
}

#[test]
fn test_need_previous_input_gradient_flows_upstream() -> Result<(), Error> {
    let values = [0.5f64, -1.0];
    let x = tensor(values.to_vec(), &[2]);
    let h = ops::sin(&x)?;
    let square = Op::need_previous_input("Square", Square);
    let y = square.forward(&[h.clone()])?.remove(0);
    assert_eq!(square.previous_inputs(), vec![vec![h.clone()]]);

    y.set_grad(vec![1.0, 1.0])?;
    let pass = backward_from(&y)?;
    assert_eq!(pass.steps, 2);
    assert!(pass.dangling.is_empty());
    assert_eq!(h.use_count(), 0);

    let expected_h: Vec<f64> = values.iter().map(|v| 2.0 * v.sin()).collect();
    assert_grad_close(&h, &expected_h, 1e-12);
    // d/dx sin(x)^2 = 2 sin(x) cos(x)
    let expected_x: Vec<f64> = values.iter().map(|v| 2.0 * v.sin() * v.cos()).collect();
    assert_grad_close(&x, &expected_x, 1e-12);
    Ok(())
}
