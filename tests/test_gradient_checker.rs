use eager_grad::{ops, test_utils::check_gradient, Error, Tensor};

const EPSILON: f64 = 1e-6;
const TOLERANCE: f64 = 1e-5;

#[test]
fn test_sin_cos_chain_with_grad_check() -> Result<(), Error> {
    let x = Tensor::<f64>::from_vec(vec![0.7], &[1])?;
    let f = |inputs: &[Tensor<f64>]| -> Result<Tensor<f64>, Error> {
        ops::sin(&ops::cos(&inputs[0])?)
    };
    check_gradient(f, &[x], 0, EPSILON, TOLERANCE)?;
    Ok(())
}

#[test]
fn test_mul_backward_with_grad_check() -> Result<(), Error> {
    let a = Tensor::<f64>::from_vec(vec![1.3], &[1])?;
    let b = Tensor::<f64>::from_vec(vec![-0.4], &[1])?;
    let f = |inputs: &[Tensor<f64>]| -> Result<Tensor<f64>, Error> {
        let ab = ops::mul(&inputs[0], &inputs[1])?;
        ops::add(&ab, &inputs[0])
    };
    let inputs = vec![a, b];
    check_gradient(f, &inputs, 0, EPSILON, TOLERANCE)?;
    check_gradient(f, &inputs, 1, EPSILON, TOLERANCE)?;
    Ok(())
}

#[test]
fn test_div_backward_with_grad_check() -> Result<(), Error> {
    let a = Tensor::<f64>::from_vec(vec![2.5], &[1])?;
    let b = Tensor::<f64>::from_vec(vec![0.8], &[1])?;
    let f = |inputs: &[Tensor<f64>]| -> Result<Tensor<f64>, Error> {
        let q = ops::div(&inputs[0], &inputs[1])?;
        ops::const_div(1.0, &q.add_scalar(2.0)?)
    };
    let inputs = vec![a, b];
    check_gradient(f, &inputs, 0, EPSILON, TOLERANCE)?;
    check_gradient(f, &inputs, 1, EPSILON, TOLERANCE)?;
    Ok(())
}

#[test]
fn test_fan_out_with_grad_check() -> Result<(), Error> {
    let x = Tensor::<f64>::from_vec(vec![0.35], &[1])?;
    let f = |inputs: &[Tensor<f64>]| -> Result<Tensor<f64>, Error> {
        let h = inputs[0].tan()?;
        let a = h.arctan()?;
        let b = h.mul_scalar(3.0)?;
        let c = ops::mul(&a, &b)?;
        ops::sub(&c, &h)
    };
    check_gradient(f, &[x], 0, EPSILON, TOLERANCE)?;
    Ok(())
}

#[test]
fn test_vector_input_with_grad_check() -> Result<(), Error> {
    let x = Tensor::<f64>::from_vec(vec![0.1, -0.5, 1.2], &[3])?;
    // sum_i sin(x_i), built from graph-recorded element picks
    let f = |inputs: &[Tensor<f64>]| -> Result<Tensor<f64>, Error> {
        let s = inputs[0].sin()?;
        let mut acc = Pick::apply(&s, 0)?;
        for i in 1..3 {
            acc = ops::add(&acc, &Pick::apply(&s, i)?)?;
        }
        Ok(acc)
    };
    check_gradient(f, &[x], 0, EPSILON, TOLERANCE)?;
    Ok(())
}

/// One-element view of `t[index]` that stays connected to the graph.
struct Pick {
    index: usize,
}

impl Pick {
    fn apply(t: &Tensor<f64>, index: usize) -> Result<Tensor<f64>, Error> {
        use eager_grad::{Function, Op};
        let op = Op::single_input("Pick", Pick { index });
        Ok(op.forward(&[t.clone()])?.remove(0))
    }
}

impl eager_grad::SingleInputFunction<f64> for Pick {
    fn forward(&self, x: &Tensor<f64>) -> Result<Tensor<f64>, Error> {
        Tensor::from_vec(vec![x.data()[self.index]], &[1])
    }

    fn backward(&self, y: &Tensor<f64>, x: &Tensor<f64>) -> Result<(), Error> {
        let mut gx = vec![0.0; x.len()];
        gx[self.index] = y.grad()[0];
        x.accumulate_grad(&gx)
    }
}

#[test]
fn test_checker_reports_wrong_gradient() {
    struct Broken;

    impl eager_grad::SingleInputFunction<f64> for Broken {
        fn forward(&self, x: &Tensor<f64>) -> Result<Tensor<f64>, Error> {
            let data = x.data().iter().map(|v| v * v).collect();
            Tensor::new(data, &x.shape(), x.batch_count())
        }

        fn backward(&self, y: &Tensor<f64>, x: &Tensor<f64>) -> Result<(), Error> {
            // Missing the factor of two
            let gx: Vec<f64> = y.grad().iter().zip(x.data().iter()).map(|(g, v)| g * v).collect();
            x.accumulate_grad(&gx)
        }
    }

    let x = Tensor::<f64>::from_vec(vec![1.5], &[1]).unwrap();
    let f = |inputs: &[Tensor<f64>]| -> Result<Tensor<f64>, Error> {
        use eager_grad::{Function, Op};
        Ok(Op::single_input("Broken", Broken).forward(inputs)?.remove(0))
    };
    let result = check_gradient(f, &[x], 0, EPSILON, TOLERANCE);
    assert!(matches!(result, Err(Error::GradientCheckError { .. })));
}

#[test]
fn test_checker_rejects_non_scalar_loss() {
    let x = Tensor::<f64>::from_vec(vec![1.0, 2.0], &[2]).unwrap();
    let f = |inputs: &[Tensor<f64>]| -> Result<Tensor<f64>, Error> { inputs[0].sin() };
    assert!(matches!(
        check_gradient(f, &[x], 0, EPSILON, TOLERANCE),
        Err(Error::InvalidOperation(_))
    ));

    let y = Tensor::<f64>::from_vec(vec![1.0], &[1]).unwrap();
    let g = |inputs: &[Tensor<f64>]| -> Result<Tensor<f64>, Error> { inputs[0].sin() };
    assert!(check_gradient(g, &[y], 3, EPSILON, TOLERANCE).is_err());
}
