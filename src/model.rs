use burn::{
    config::Config,
    module::Module,
    nn::{loss::CrossEntropyLossConfig, Embedding, EmbeddingConfig, Linear, LinearConfig},
    tensor::{backend::{AutodiffBackend, Backend}, Int, Tensor},
    train::{ClassificationOutput, TrainOutput, InferenceStep, TrainStep},
};

use crate::batcher::WindowBatch;
use crate::cell::{RecurrentLayer, RecurrentLayerConfig};
use crate::params::Flavor;

/// Recurrent language model config
#[derive(Config, Debug)]
pub struct RnnLmConfig {
    /// Vocabulary size
    num_tokens: usize,
    #[config(default = 512)]
    hidden_size: usize,
    #[config(default = 1)]
    num_layers: usize,
    #[config(default = "Flavor::Srn")]
    flavor: Flavor,
}

impl RnnLmConfig {
    pub fn num_tokens(&self) -> usize {
        self.num_tokens
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> RnnLm<B> {
        // Embedding width equals the hidden width
        let token_emb = EmbeddingConfig::new(self.num_tokens, self.hidden_size).init(device);

        let layers = (0..self.num_layers)
            .map(|_| {
                RecurrentLayerConfig::new(self.hidden_size, self.hidden_size)
                    .with_flavor(self.flavor)
                    .init(device)
            })
            .collect();

        let to_logits = LinearConfig::new(self.hidden_size, self.num_tokens).init(device);

        RnnLm {
            token_emb,
            layers,
            to_logits,
        }
    }
}

/// Output of a forward pass over a batch of contexts
#[derive(Debug, Clone)]
pub struct RnnOutput<B: Backend> {
    /// Next-token logits [batch_size, vocab_size]
    pub logits: Tensor<B, 2>,
    /// Last-layer hidden state after the final context token [batch_size, hidden_size]
    pub encodings: Tensor<B, 2>,
}

/// Embedding, a stack of recurrent layers, and a projection to the vocabulary
///
/// Every forward call starts from a zero hidden state; nothing carries over
/// between minibatches, and the batch size is read from the input.
#[derive(Module, Debug)]
pub struct RnnLm<B: Backend> {
    token_emb: Embedding<B>,
    layers: Vec<RecurrentLayer<B>>,
    to_logits: Linear<B>,
}

impl<B: Backend> RnnLm<B> {
    /// # Arguments
    ///
    /// * `x` - Context token ids [batch_size, context_size]
    pub fn forward(&self, x: Tensor<B, 2, Int>) -> RnnOutput<B> {
        let [batch_size, seq_len] = x.dims();
        let hidden_size = self.hidden_size();

        let mut h = self.token_emb.forward(x);
        for layer in &self.layers {
            h = layer.forward(h);
        }

        let encodings = h
            .slice([0..batch_size, seq_len - 1..seq_len, 0..hidden_size])
            .reshape([batch_size, hidden_size]);
        let logits = self.to_logits.forward(encodings.clone());

        RnnOutput { logits, encodings }
    }

    /// Cross-entropy of the next-token prediction for every window in the batch.
    pub fn forward_classification(&self, batch: WindowBatch<B>) -> ClassificationOutput<B> {
        let output = self.forward(batch.context);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.logits.device())
            .forward(output.logits.clone(), batch.target.clone());

        ClassificationOutput::new(loss, output.logits, batch.target)
    }

    /// Input embedding rows for `ids` [num_ids, hidden_size]
    pub fn embedding_rows(&self, ids: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        self.token_emb.weight.val().select(0, ids)
    }

    /// Output projection rows for `ids` [num_ids, hidden_size]
    pub fn output_rows(&self, ids: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        // Linear weight is [hidden_size, vocab_size]
        self.to_logits.weight.val().select(1, ids).transpose()
    }

    pub fn vocab_size(&self) -> usize {
        self.token_emb.weight.dims()[0]
    }

    pub fn hidden_size(&self) -> usize {
        self.token_emb.weight.dims()[1]
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

impl<B: AutodiffBackend> TrainStep for RnnLm<B> {
    type Input = WindowBatch<B>;
    type Output = ClassificationOutput<B>;

    fn step(&self, batch: WindowBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let output = self.forward_classification(batch);
        let grads = output.loss.backward();

        TrainOutput::new(self, grads, output)
    }
}

impl<B: Backend> InferenceStep for RnnLm<B> {
    type Input = WindowBatch<B>;
    type Output = ClassificationOutput<B>;

    fn step(&self, batch: WindowBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "ndarray")]
    use burn::backend::ndarray::{NdArray, NdArrayDevice};
    #[cfg(feature = "ndarray")]
    type TestBackend = NdArray<f32>;

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_forward_shapes_follow_input() {
        let device = NdArrayDevice::default();
        let model = RnnLmConfig::new(11)
            .with_hidden_size(8)
            .with_num_layers(2)
            .init::<TestBackend>(&device);

        for batch_size in [4, 1] {
            let x = Tensor::<TestBackend, 2, Int>::zeros([batch_size, 3], &device);
            let output = model.forward(x);
            assert_eq!(output.logits.dims(), [batch_size, 11]);
            assert_eq!(output.encodings.dims(), [batch_size, 8]);
        }
        assert_eq!(model.vocab_size(), 11);
        assert_eq!(model.num_layers(), 2);
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_forward_is_stateless() {
        let device = NdArrayDevice::default();
        let model = RnnLmConfig::new(5)
            .with_hidden_size(4)
            .with_flavor(Flavor::Lstm)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 1, Int>::from_data(&*vec![1i64, 2, 3, 4], &device).reshape([2, 2]);

        let first: Vec<f32> = model.forward(x.clone()).logits.into_data().iter::<f32>().collect();
        let second: Vec<f32> = model.forward(x).logits.into_data().iter::<f32>().collect();
        assert_eq!(first, second);
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_representation_rows() {
        let device = NdArrayDevice::default();
        let model = RnnLmConfig::new(7).with_hidden_size(3).init::<TestBackend>(&device);
        let ids = Tensor::<TestBackend, 1, Int>::from_data(&*vec![0i64, 6], &device);

        assert_eq!(model.embedding_rows(ids.clone()).dims(), [2, 3]);
        assert_eq!(model.output_rows(ids).dims(), [2, 3]);
    }
}
