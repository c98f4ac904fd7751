pub mod metrics;
pub mod representations;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use burn::{
    tensor::{backend::Backend, cast::ToElement},
    train::{ClassificationOutput, InferenceStep},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batcher::WindowBatcher;
use crate::errors::{Result, RnnLmError};
use crate::model::RnnLm;
use crate::params::{EvalConfig, Representation};
use crate::prep::{Prep, Windows};

pub use metrics::ProbeSpace;

/// Probe to category mapping for every structure, keyed by structure name
pub type Structures = BTreeMap<String, BTreeMap<String, String>>;

pub const TRAIN_PP: &str = "train_pp";
pub const TEST_PP: &str = "test_pp";

/// Scalar values collected at evaluation checkpoints, one list per metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Performance {
    series: BTreeMap<String, Vec<f32>>,
}

impl Default for Performance {
    fn default() -> Self {
        Self::new()
    }
}

impl Performance {
    /// Empty record holding the two perplexity series.
    pub fn new() -> Self {
        let series = [TRAIN_PP, TEST_PP]
            .into_iter()
            .map(|name| (name.to_string(), Vec::new()))
            .collect();
        Self { series }
    }

    pub fn append(&mut self, name: &str, value: f32) {
        self.series.entry(name.to_string()).or_default().push(value);
    }

    pub fn get(&self, name: &str) -> Option<&[f32]> {
        self.series.get(name).map(Vec::as_slice)
    }

    /// Most recent value of every non-empty series
    pub fn latest(&self) -> impl Iterator<Item = (&str, f32)> {
        self.series
            .iter()
            .filter_map(|(name, values)| values.last().map(|&v| (name.as_str(), v)))
    }

    /// One labeled series per non-empty metric, indexed by `steps`.
    pub fn into_series(self, steps: &[usize]) -> Result<Vec<TimeSeries>> {
        self.series
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| {
                if values.len() != steps.len() {
                    return Err(RnnLmError::SeriesMisaligned {
                        name,
                        values: values.len(),
                        steps: steps.len(),
                    });
                }
                Ok(TimeSeries {
                    name,
                    steps: steps.to_vec(),
                    values,
                })
            })
            .collect()
    }
}

/// Values of one metric indexed by the training step they were recorded at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub name: String,
    pub steps: Vec<usize>,
    pub values: Vec<f32>,
}

/// Checkpoint evaluation of a model, inference only
///
/// Probe vectors are computed once per representation and structure and
/// shared by every metric of the same checkpoint.
pub struct Evaluation<'a, B: Backend> {
    model: &'a RnnLm<B>,
    prep: &'a Prep,
    structures: &'a Structures,
    config: &'a EvalConfig,
    batcher: WindowBatcher<B>,
    spaces: HashMap<(Representation, String), Option<ProbeSpace>>,
}

impl<'a, B: Backend> Evaluation<'a, B> {
    pub fn new(
        model: &'a RnnLm<B>,
        prep: &'a Prep,
        structures: &'a Structures,
        config: &'a EvalConfig,
        device: &B::Device,
    ) -> Self {
        Self {
            model,
            prep,
            structures,
            config,
            batcher: WindowBatcher::new(device.clone()),
            spaces: HashMap::new(),
        }
    }

    /// Perplexity and every enabled representation metric.
    pub fn evaluate(&mut self, performance: Performance) -> Performance {
        let mut performance = self.update_pp_performance(performance);
        if self.config.ba {
            performance = self.update_ba_performance(performance);
        }
        if self.config.cs {
            performance = self.update_cs_performance(performance);
        }
        if self.config.dp {
            performance = self.update_dp_performance(performance);
        }
        if self.config.si {
            performance = self.update_si_performance(performance);
        }
        if self.config.sd {
            performance = self.update_sd_performance(performance);
        }
        performance
    }

    pub fn update_pp_performance(&mut self, mut performance: Performance) -> Performance {
        let max_windows = self.config.max_pp_windows;
        if let Some(pp) = self.perplexity(&self.prep.train_eval_batches(max_windows)) {
            performance.append(TRAIN_PP, pp);
        }
        if let Some(pp) = self.perplexity(&self.prep.test_batches(max_windows)) {
            performance.append(TEST_PP, pp);
        }
        performance
    }

    pub fn update_ba_performance(&mut self, performance: Performance) -> Performance {
        self.update_metric(performance, "ba", metrics::balanced_accuracy)
    }

    pub fn update_cs_performance(&mut self, performance: Performance) -> Performance {
        self.update_metric(performance, "cs", metrics::cluster_score)
    }

    pub fn update_dp_performance(&mut self, performance: Performance) -> Performance {
        self.update_metric(performance, "dp", metrics::distance_difference)
    }

    pub fn update_si_performance(&mut self, performance: Performance) -> Performance {
        self.update_metric(performance, "si", metrics::silhouette)
    }

    pub fn update_sd_performance(&mut self, performance: Performance) -> Performance {
        self.update_metric(performance, "sd", metrics::separation)
    }

    fn update_metric(
        &mut self,
        mut performance: Performance,
        metric: &str,
        score: fn(&ProbeSpace) -> f32,
    ) -> Performance {
        let config = self.config;
        let structures = self.structures;
        for &representation in &config.representations {
            for structure in structures.keys() {
                if let Some(space) = self.space(representation, structure) {
                    let name = format!("{metric}_{}_{structure}", representation.tag());
                    performance.append(&name, score(space));
                }
            }
        }
        performance
    }

    /// Probe vectors of one structure, `None` when it has fewer than two categories.
    fn space(&mut self, representation: Representation, structure: &str) -> Option<&ProbeSpace> {
        let key = (representation, structure.to_string());
        if !self.spaces.contains_key(&key) {
            let space = self.build_space(representation, structure);
            self.spaces.insert(key.clone(), space);
        }
        self.spaces.get(&key).and_then(Option::as_ref)
    }

    fn build_space(&self, representation: Representation, structure: &str) -> Option<ProbeSpace> {
        let probe2cat = self.structures.get(structure)?;
        let categories: BTreeMap<&str, usize> = probe2cat
            .values()
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .enumerate()
            .map(|(idx, cat)| (cat, idx))
            .collect();
        if categories.len() < 2 {
            debug!(structure, categories = categories.len(), "skipping structure");
            return None;
        }

        let (ids, labels): (Vec<usize>, Vec<usize>) = probe2cat
            .iter()
            .filter_map(|(probe, cat)| Some((self.prep.vocab().id(probe)?, categories[cat.as_str()])))
            .unzip();

        let vectors = representations::probe_vectors(
            self.model,
            self.prep,
            &self.batcher,
            &ids,
            representation,
            self.config.max_contexts_per_probe,
        );
        Some(ProbeSpace::new(vectors, labels))
    }

    /// Exponentiated mean cross-entropy per window, `None` without windows.
    fn perplexity(&self, batches: &[Windows]) -> Option<f32> {
        let mut total = 0.0f64;
        let mut num_windows = 0usize;
        for windows in batches {
            let batch = self.batcher.batch(windows);
            let output: ClassificationOutput<B> = InferenceStep::step(self.model, batch);
            total += output.loss.into_scalar().to_f64() * windows.num_windows() as f64;
            num_windows += windows.num_windows();
        }

        if num_windows == 0 {
            return None;
        }
        Some((total / num_windows as f64).exp() as f32)
    }
}
