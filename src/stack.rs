//! Ordered composition of functions.

use crate::error::Error;
use crate::graph::Function;
use crate::parameter::Parameter;
use crate::scalar::Real;
use crate::tensor::Tensor;

/// Runs its children in order, feeding each one's outputs to the next.
///
/// The stack records no history of its own. Its outputs carry the last
/// child's producer, so backward from them walks every child in reverse.
pub struct FunctionStack<T: Real> {
    name: String,
    functions: Vec<Box<dyn Function<T>>>,
}

impl<T: Real> FunctionStack<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn with_functions(name: impl Into<String>, functions: Vec<Box<dyn Function<T>>>) -> Self {
        Self {
            name: name.into(),
            functions,
        }
    }

    pub fn push(&mut self, function: impl Function<T> + 'static) {
        self.functions.push(Box::new(function));
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn functions(&self) -> &[Box<dyn Function<T>>] {
        &self.functions
    }
}

impl<T: Real> Function<T> for FunctionStack<T> {
    fn name(&self) -> &str {
        &self.name
    }

    /// An empty stack returns its inputs unchanged.
    fn forward(&self, inputs: &[Tensor<T>]) -> Result<Vec<Tensor<T>>, Error> {
        let mut current = inputs.to_vec();
        for function in &self.functions {
            debug_println!("{} -> {}", self.name, function.name());
            current = function.forward(&current)?;
        }
        Ok(current)
    }

    fn parameters(&self) -> Vec<Parameter<T>> {
        self.functions
            .iter()
            .flat_map(|function| function.parameters())
            .collect()
    }

    fn reset_history(&self) {
        for function in &self.functions {
            function.reset_history();
        }
    }
}
