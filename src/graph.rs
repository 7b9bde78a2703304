//! Functions, their call history, and the backward traversal.
//!
//! Every differentiable operation is an [`Op`]: a named handle around a kernel
//! plus the list of forward calls not yet differentiated. Calling
//! [`Function::forward`] on an `Op` stamps the op onto its output as the
//! producer and records which inputs were read. [`backward_from`] then walks
//! producer links from a root tensor, sending a tensor's gradient further back
//! only once every consumer that read it has contributed.

use crate::error::Error;
use crate::parameter::Parameter;
use crate::scalar::Real;
use crate::tensor::Tensor;

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// Forward/backward contract shared by primitive ops and composites.
pub trait Function<T: Real> {
    fn name(&self) -> &str;

    /// Computes outputs from `inputs` and records the call for a later backward pass.
    fn forward(&self, inputs: &[Tensor<T>]) -> Result<Vec<Tensor<T>>, Error>;

    /// Back-propagates from each of `outputs` using the gradient they already hold.
    fn backward(&self, outputs: &[Tensor<T>]) -> Result<(), Error> {
        for y in outputs {
            backward_from(y)?;
        }
        Ok(())
    }

    /// Trainable tensors owned by this function.
    fn parameters(&self) -> Vec<Parameter<T>> {
        Vec::new()
    }

    /// Forgets forward calls that were never differentiated.
    fn reset_history(&self) {}
}

/// Kernel of a one-input op. `backward` reads `y`'s gradient and accumulates
/// into `x`'s gradient.
pub trait SingleInputFunction<T: Real> {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>, Error>;

    fn backward(&self, y: &Tensor<T>, x: &Tensor<T>) -> Result<(), Error>;

    fn parameters(&self) -> Vec<Parameter<T>> {
        Vec::new()
    }
}

/// Kernel of a two-input op.
pub trait DualInputFunction<T: Real> {
    fn forward(&self, a: &Tensor<T>, b: &Tensor<T>) -> Result<Tensor<T>, Error>;

    fn backward(&self, y: &Tensor<T>, a: &Tensor<T>, b: &Tensor<T>) -> Result<(), Error>;

    fn parameters(&self) -> Vec<Parameter<T>> {
        Vec::new()
    }
}

/// Kernel of a one-input op whose backward needs the input values, typically to
/// route gradient into parameters. Returning `Some` adds that gradient to the
/// input; `None` means the input receives nothing.
pub trait NeedPreviousInputFunction<T: Real> {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>, Error>;

    fn backward(&self, y: &Tensor<T>, x: &Tensor<T>) -> Result<Option<Vec<T>>, Error>;

    fn parameters(&self) -> Vec<Parameter<T>> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    SingleInput,
    DualInput,
    NeedPreviousInput,
}

impl FunctionKind {
    pub fn arity(self) -> usize {
        match self {
            FunctionKind::SingleInput | FunctionKind::NeedPreviousInput => 1,
            FunctionKind::DualInput => 2,
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FunctionKind::SingleInput => write!(f, "SingleInput"),
            FunctionKind::DualInput => write!(f, "DualInput"),
            FunctionKind::NeedPreviousInput => write!(f, "NeedPreviousInput"),
        }
    }
}

enum Kernel<T: Real> {
    Single(Box<dyn SingleInputFunction<T>>),
    Dual(Box<dyn DualInputFunction<T>>),
    NeedPrevious(Box<dyn NeedPreviousInputFunction<T>>),
}

impl<T: Real> Kernel<T> {
    fn kind(&self) -> FunctionKind {
        match self {
            Kernel::Single(_) => FunctionKind::SingleInput,
            Kernel::Dual(_) => FunctionKind::DualInput,
            Kernel::NeedPrevious(_) => FunctionKind::NeedPreviousInput,
        }
    }

    fn parameters(&self) -> Vec<Parameter<T>> {
        match self {
            Kernel::Single(k) => k.parameters(),
            Kernel::Dual(k) => k.parameters(),
            Kernel::NeedPrevious(k) => k.parameters(),
        }
    }
}

/// One undifferentiated forward call.
struct CallRecord<T: Real> {
    output_id: usize,
    inputs: Vec<Tensor<T>>,
}

struct OpInner<T: Real> {
    name: String,
    kernel: Kernel<T>,
    history: RefCell<Vec<CallRecord<T>>>,
}

/// Shared handle to a differentiable operation and its pending calls.
///
/// Cloning shares the kernel and the history, which is how every output tensor
/// refers back to the op that produced it.
pub struct Op<T: Real> {
    inner: Rc<OpInner<T>>,
}

impl<T: Real> Clone for Op<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Real> Op<T> {
    fn with_kernel(name: impl Into<String>, kernel: Kernel<T>) -> Self {
        Self {
            inner: Rc::new(OpInner {
                name: name.into(),
                kernel,
                history: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn single_input(
        name: impl Into<String>,
        kernel: impl SingleInputFunction<T> + 'static,
    ) -> Self {
        Self::with_kernel(name, Kernel::Single(Box::new(kernel)))
    }

    pub fn dual_input(name: impl Into<String>, kernel: impl DualInputFunction<T> + 'static) -> Self {
        Self::with_kernel(name, Kernel::Dual(Box::new(kernel)))
    }

    pub fn need_previous_input(
        name: impl Into<String>,
        kernel: impl NeedPreviousInputFunction<T> + 'static,
    ) -> Self {
        Self::with_kernel(name, Kernel::NeedPrevious(Box::new(kernel)))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> FunctionKind {
        self.inner.kernel.kind()
    }

    /// Forward calls still waiting for their backward step.
    pub fn pending_calls(&self) -> usize {
        self.inner.history.borrow().len()
    }

    /// Inputs of each pending call, oldest first.
    pub fn previous_inputs(&self) -> Vec<Vec<Tensor<T>>> {
        self.inner
            .history
            .borrow()
            .iter()
            .map(|record| record.inputs.clone())
            .collect()
    }

    /// `true` if both handles refer to the same op.
    pub fn ptr_eq(&self, other: &Op<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Differentiates the forward call that produced `y` and returns that call's
    /// inputs. The call is removed from the history, so each call is
    /// differentiated at most once.
    ///
    /// # Errors
    /// `Error::MissingHistory` if no pending call produced `y`.
    pub fn backward_step(&self, y: &Tensor<T>) -> Result<Vec<Tensor<T>>, Error> {
        let y_id = y.id();
        let record = {
            let mut history = self.inner.history.borrow_mut();
            let position = history
                .iter()
                .rposition(|record| record.output_id == y_id)
                .ok_or_else(|| Error::MissingHistory {
                    function: self.inner.name.clone(),
                    tensor_id: y_id,
                })?;
            history.remove(position)
        };

        match &self.inner.kernel {
            Kernel::Single(k) => k.backward(y, &record.inputs[0])?,
            Kernel::Dual(k) => k.backward(y, &record.inputs[0], &record.inputs[1])?,
            Kernel::NeedPrevious(k) => {
                if let Some(gx) = k.backward(y, &record.inputs[0])? {
                    record.inputs[0].accumulate_grad(&gx)?;
                }
            }
        }

        for parameter in self.inner.kernel.parameters() {
            parameter.count_up();
        }

        Ok(record.inputs)
    }
}

impl<T: Real> Function<T> for Op<T> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn forward(&self, inputs: &[Tensor<T>]) -> Result<Vec<Tensor<T>>, Error> {
        let kind = self.kind();
        if inputs.len() != kind.arity() {
            return Err(Error::ArityMismatch {
                function: self.inner.name.clone(),
                expected: kind.arity(),
                actual: inputs.len(),
            });
        }

        let output = match &self.inner.kernel {
            Kernel::Single(k) => k.forward(&inputs[0])?,
            Kernel::Dual(k) => k.forward(&inputs[0], &inputs[1])?,
            Kernel::NeedPrevious(k) => k.forward(&inputs[0])?,
        };
        if inputs.iter().any(|x| x == &output) {
            return Err(Error::InternalLogicError(format!(
                "Function {} returned one of its inputs as output",
                self.inner.name
            )));
        }

        output.set_producer(Some(self.clone()));
        for x in inputs {
            x.retain_use();
        }
        self.inner.history.borrow_mut().push(CallRecord {
            output_id: output.id(),
            inputs: inputs.to_vec(),
        });

        debug_println!(
            "{} forward: inputs {:?} -> output {} {:?}",
            self.inner.name,
            inputs.iter().map(|x| x.id()).collect::<Vec<_>>(),
            output.id(),
            output.shape()
        );
        Ok(vec![output])
    }

    fn parameters(&self) -> Vec<Parameter<T>> {
        self.inner.kernel.parameters()
    }

    /// Drops pending calls. Use counts already added to their inputs are kept,
    /// so those inputs stop gradient flow until they are rebuilt.
    fn reset_history(&self) {
        self.inner.history.borrow_mut().clear();
    }
}

impl<T: Real> fmt::Debug for Op<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Op")
            .field("name", &self.inner.name)
            .field("kind", &self.kind())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

/// Outcome of one traversal.
#[derive(Debug)]
pub struct BackwardPass<T: Real> {
    /// Backward steps executed.
    pub steps: usize,
    /// Tensors that received gradient but still had unreported consumers when
    /// the traversal ended, so their gradient was not sent further back.
    pub dangling: Vec<Tensor<T>>,
}

/// Propagates the gradient held by `root` through its producers.
///
/// A tensor is differentiated through its own producer only when its use
/// count drops to zero, i.e. after every consumer has contributed. Tensors left
/// with outstanding uses are reported in [`BackwardPass::dangling`]; this is
/// how truncated or partially differentiated graphs end.
pub fn backward_from<T: Real>(root: &Tensor<T>) -> Result<BackwardPass<T>, Error> {
    debug_println!("backward from tensor {}", root.id());
    let mut worklist = vec![root.clone()];
    let mut waiting: HashSet<Tensor<T>> = HashSet::new();
    let mut steps = 0;

    while let Some(y) = worklist.pop() {
        let Some(producer) = y.producer() else {
            continue;
        };
        debug_println!("backward through {} for tensor {}", producer.name(), y.id());
        let inputs = producer.backward_step(&y)?;
        steps += 1;

        for x in inputs {
            if x.release_use()? == 0 {
                waiting.remove(&x);
                worklist.push(x);
            } else {
                waiting.insert(x);
            }
        }
    }

    let dangling: Vec<Tensor<T>> = waiting.into_iter().collect();
    for _x in &dangling {
        debug_println!(
            "tensor {} still has {} unreported consumer(s) after backward",
            _x.id(),
            _x.use_count()
        );
    }
    Ok(BackwardPass { steps, dangling })
}
