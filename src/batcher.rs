use burn::tensor::{backend::Backend, Int, Tensor};

use crate::prep::Windows;

/// Minibatch of windows split into model inputs and next-token targets
#[derive(Debug, Clone)]
pub struct WindowBatch<B: Backend> {
    /// Context tokens [batch_size, context_size]
    pub context: Tensor<B, 2, Int>,
    /// Token following each context [batch_size]
    pub target: Tensor<B, 1, Int>,
}

/// Batcher turning id windows into tensors on one device
#[derive(Clone)]
pub struct WindowBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> WindowBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Split every window into its first `width - 1` ids and its last id.
    pub fn batch(&self, windows: &Windows) -> WindowBatch<B> {
        let num_windows = windows.num_windows();
        let context_size = windows.width().saturating_sub(1);

        let mut context = Vec::with_capacity(num_windows * context_size);
        let mut target = Vec::with_capacity(num_windows);
        for row in windows.rows() {
            let (last, head) = match row.split_last() {
                Some(split) => split,
                None => continue,
            };
            context.extend(head.iter().map(|&id| id as i64));
            target.push(*last as i64);
        }

        WindowBatch {
            context: Tensor::<B, 1, Int>::from_data(&*context, &self.device)
                .reshape([num_windows, context_size]),
            target: Tensor::<B, 1, Int>::from_data(&*target, &self.device),
        }
    }

    /// Whole windows as model input, for windows that carry no target.
    pub fn inputs(&self, windows: &Windows) -> Tensor<B, 2, Int> {
        let ids: Vec<i64> = windows.ids().iter().map(|&id| id as i64).collect();
        Tensor::<B, 1, Int>::from_data(&*ids, &self.device)
            .reshape([windows.num_windows(), windows.width()])
    }

    /// One single-token window per id.
    pub fn singletons(&self, ids: &[usize]) -> Tensor<B, 2, Int> {
        let ids: Vec<i64> = ids.iter().map(|&id| id as i64).collect();
        Tensor::<B, 1, Int>::from_data(&*ids, &self.device).reshape([ids.len(), 1])
    }
}
