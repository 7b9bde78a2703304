use crate::scalar::Real;
use crate::tensor::TensorData;
use std::fmt;

impl<T: Real> fmt::Debug for TensorData<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorData")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("batch_count", &self.batch_count)
            .field("data_len", &self.data.len())
            .field("producer", &self.producer.as_ref().map(|op| op.name()))
            .field("use_count", &self.use_count)
            .field("train_count", &self.train_count)
            .finish()
    }
}
