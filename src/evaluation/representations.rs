use burn::tensor::{backend::Backend, Int, Tensor};

use crate::batcher::WindowBatcher;
use crate::model::RnnLm;
use crate::params::Representation;
use crate::prep::Prep;

/// One vector per probe id, in the order of `ids`.
pub fn probe_vectors<B: Backend>(
    model: &RnnLm<B>,
    prep: &Prep,
    batcher: &WindowBatcher<B>,
    ids: &[usize],
    representation: Representation,
    max_contexts: usize,
) -> Vec<Vec<f32>> {
    if ids.is_empty() {
        return Vec::new();
    }

    let rows = match representation {
        Representation::NoContext => model.embedding_rows(id_tensor(ids, &batcher.device)),
        Representation::Output => model.output_rows(id_tensor(ids, &batcher.device)),
        Representation::Contextual => {
            let encodings = ids
                .iter()
                .map(|&id| {
                    let contexts = prep.contexts_ending_in(id, max_contexts);
                    let inputs = if contexts.is_empty() {
                        batcher.singletons(&[id])
                    } else {
                        batcher.inputs(&contexts)
                    };
                    model.forward(inputs).encodings.mean_dim(0)
                })
                .collect();
            Tensor::cat(encodings, 0)
        }
    };

    to_rows(rows)
}

fn id_tensor<B: Backend>(ids: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let ids: Vec<i64> = ids.iter().map(|&id| id as i64).collect();
    Tensor::<B, 1, Int>::from_data(&*ids, device)
}

fn to_rows<B: Backend>(tensor: Tensor<B, 2>) -> Vec<Vec<f32>> {
    let [_, dim] = tensor.dims();
    let values: Vec<f32> = tensor.into_data().iter::<f32>().collect();
    values.chunks(dim.max(1)).map(<[f32]>::to_vec).collect()
}

#[cfg(all(test, feature = "ndarray"))]
mod tests {
    use super::*;
    use crate::model::RnnLmConfig;
    use crate::prep::PrepConfig;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_every_representation_has_hidden_width() {
        let device = Default::default();
        let tokens: Vec<String> = "a b c a b c d a b".split_whitespace().map(str::to_string).collect();
        let prep = PrepConfig::new(1, 2).init(&tokens, None).unwrap();
        let model = RnnLmConfig::new(prep.num_types())
            .with_hidden_size(5)
            .init::<TestBackend>(&device);
        let batcher = WindowBatcher::<TestBackend>::new(device);
        let ids = [prep.vocab().id("c").unwrap(), prep.vocab().id("d").unwrap()];

        for representation in [
            Representation::NoContext,
            Representation::Output,
            Representation::Contextual,
        ] {
            let vectors = probe_vectors(&model, &prep, &batcher, &ids, representation, 4);
            assert_eq!(vectors.len(), 2);
            assert!(vectors.iter().all(|v| v.len() == 5));
        }
    }
}
