use burn::{
    config::Config,
    module::Module,
    nn::{Linear, LinearConfig},
    tensor::{activation, backend::Backend, Tensor},
};

use crate::params::Flavor;

/// Configuration for one recurrent layer.
///
/// Both flavors share the same layout: an input projection with bias and a
/// bias-free hidden projection, each producing `num_gates * hidden_size` features.
///
/// SRN:  h_t = tanh(W x_t + U h_{t-1} + b)
///
/// LSTM: [i, f, g, o] = W x_t + U h_{t-1} + b
///       c_t = σ(f) ⊙ c_{t-1} + σ(i) ⊙ tanh(g)
///       h_t = σ(o) ⊙ tanh(c_t)
#[derive(Config, Debug)]
pub struct RecurrentLayerConfig {
    /// Dimension of the input features
    input_size: usize,
    /// Dimension of the hidden state
    hidden_size: usize,
    #[config(default = "Flavor::Srn")]
    flavor: Flavor,
}

impl RecurrentLayerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> RecurrentLayer<B> {
        let gate_size = self.flavor.num_gates() * self.hidden_size;

        RecurrentLayer {
            input_proj: LinearConfig::new(self.input_size, gate_size).init(device),
            hidden_proj: LinearConfig::new(self.hidden_size, gate_size)
                .with_bias(false)
                .init(device),
            flavor: self.flavor,
            hidden_size: self.hidden_size,
        }
    }
}

/// Recurrent layer unrolled over a whole window, starting from a zero state
#[derive(Module, Debug)]
pub struct RecurrentLayer<B: Backend> {
    input_proj: Linear<B>,
    hidden_proj: Linear<B>,
    #[module(skip)]
    flavor: Flavor,
    #[module(skip)]
    hidden_size: usize,
}

impl<B: Backend> RecurrentLayer<B> {
    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// # Arguments
    ///
    /// * `x` - Input features [batch_size, seq_len, input_size]
    ///
    /// # Returns
    ///
    /// * Hidden state at every step [batch_size, seq_len, hidden_size]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch_size, seq_len, _] = x.dims();
        let device = x.device();
        let gate_size = self.flavor.num_gates() * self.hidden_size;

        // Input contributions for all steps at once
        let projected = self.input_proj.forward(x);

        let mut hidden = Tensor::<B, 2>::zeros([batch_size, self.hidden_size], &device);
        let mut cell = Tensor::<B, 2>::zeros([batch_size, self.hidden_size], &device);
        let mut outputs = Vec::with_capacity(seq_len);

        for t in 0..seq_len {
            let x_t = projected
                .clone()
                .slice([0..batch_size, t..t + 1, 0..gate_size])
                .reshape([batch_size, gate_size]);
            let pre = x_t + self.hidden_proj.forward(hidden.clone());

            match self.flavor {
                Flavor::Srn => {
                    hidden = activation::tanh(pre);
                }
                Flavor::Lstm => {
                    let h = self.hidden_size;
                    let gate = |k: usize| pre.clone().slice([0..batch_size, k * h..(k + 1) * h]);
                    let (i, f, g, o) = (gate(0), gate(1), gate(2), gate(3));
                    cell = activation::sigmoid(f) * cell
                        + activation::sigmoid(i) * activation::tanh(g);
                    hidden = activation::sigmoid(o) * activation::tanh(cell.clone());
                }
            }

            outputs.push(hidden.clone().unsqueeze_dim::<3>(1));
        }

        Tensor::cat(outputs, 1)
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
    fn test_init_shapes() {
        let device = NdArrayDevice::default();

        let srn = RecurrentLayerConfig::new(6, 4).init::<TestBackend>(&device);
        assert_eq!(srn.input_proj.weight.dims(), [6, 4]);
        assert_eq!(srn.hidden_proj.weight.dims(), [4, 4]);
        assert!(srn.hidden_proj.bias.is_none());

        let lstm = RecurrentLayerConfig::new(6, 4)
            .with_flavor(Flavor::Lstm)
            .init::<TestBackend>(&device);
        assert_eq!(lstm.input_proj.weight.dims(), [6, 16]);
        assert_eq!(lstm.hidden_proj.weight.dims(), [4, 16]);
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_forward_shapes_and_range() {
        let device = NdArrayDevice::default();
        let x = Tensor::<TestBackend, 3>::ones([3, 5, 6], &device);

        for flavor in [Flavor::Srn, Flavor::Lstm] {
            let layer = RecurrentLayerConfig::new(6, 4)
                .with_flavor(flavor)
                .init::<TestBackend>(&device);
            let out = layer.forward(x.clone());
            assert_eq!(out.dims(), [3, 5, 4]);
            assert!(out.into_data().iter::<f32>().all(|v| v.abs() <= 1.0));
        }
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_steps_do_not_see_the_future() {
        let device = NdArrayDevice::default();
        let layer = RecurrentLayerConfig::new(2, 3)
            .with_flavor(Flavor::Lstm)
            .init::<TestBackend>(&device);

        let a = Tensor::<TestBackend, 3>::from_floats([[[1.0, 0.0], [0.0, 1.0]]], &device);
        let b = Tensor::<TestBackend, 3>::from_floats([[[1.0, 0.0], [5.0, -5.0]]], &device);
        let first_a: Vec<f32> = layer.forward(a).slice([0..1, 0..1, 0..3]).into_data().iter::<f32>().collect();
        let first_b: Vec<f32> = layer.forward(b).slice([0..1, 0..1, 0..3]).into_data().iter::<f32>().collect();
        assert_eq!(first_a, first_b);
    }
}
