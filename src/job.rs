use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use burn::{
    optim::{AdaGradConfig, Optimizer, SgdConfig},
    tensor::backend::{AutodiffBackend, Backend},
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::corpus::{whitespace_tokens, Corpus, ProbeLabels};
use crate::errors::{Result, RnnLmError};
use crate::evaluation::{Structures, TimeSeries};
use crate::model::{RnnLm, RnnLmConfig};
use crate::params::{EvalConfig, ExperimentConfig, OptimizerKind, Params, StartStrategy};
use crate::prep::{Prep, PrepConfig, Windows};
use crate::schedule::EvalSchedule;
use crate::start::StartEditor;
use crate::tokenizer::{check_probes_preserved, train_tokenizer, Tokenize};
use crate::trainer::{grad_clipping, Trainer};

/// Everything a run needs before the first optimizer step
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub params: Params,
    pub eval: EvalConfig,
    pub prep: Prep,
    /// Synthetic windows presented before the corpus
    pub prep_start: Option<Prep>,
    pub structures: Structures,
    pub schedule: EvalSchedule,
}

/// Resolve a request and train on the chosen backend.
pub fn run<B: AutodiffBackend>(
    request: &Map<String, Value>,
    experiment: &ExperimentConfig,
    corpus: &impl Corpus,
    labels: &impl ProbeLabels,
    device: &B::Device,
) -> Result<Vec<TimeSeries>> {
    let params = Params::from_request(request)?;
    prepare(&params, experiment, corpus, labels)?.train::<B>(device)
}

/// Load, tokenize, validate and partition the corpus, and filter the probe structures.
pub fn prepare(
    params: &Params,
    experiment: &ExperimentConfig,
    corpus: &impl Corpus,
    labels: &impl ProbeLabels,
) -> Result<PreparedRun> {
    info!(?params, "preparing run");
    let eval = &experiment.eval;

    let mut transcripts = corpus.load_transcripts(params.corpus)?;
    if let Some(num_sentences) = params.num_sentences {
        transcripts.truncate(num_sentences);
    }
    if params.shuffle_sentences {
        transcripts.shuffle(&mut StdRng::seed_from_u64(params.seed));
    }

    // raw words are only counted and looked up, order is irrelevant
    let tokens_original: Vec<String> = match params.num_sentences {
        None => corpus.load_tokens(params.corpus)?,
        Some(_) => whitespace_tokens(&transcripts),
    };
    info!("Loaded {} words.", tokens_original.len());

    // Probes must survive tokenization as whole words
    let types_in_sentences: HashSet<&str> = tokens_original.iter().map(String::as_str).collect();
    let mut probes_in_data = BTreeSet::new();
    let mut num_total = 0;
    let mut loaded = BTreeMap::new();
    for structure in &eval.structures {
        let probe2cat = labels.load_probe2cat(structure, params.corpus)?;
        num_total += probe2cat.len();
        let sorted: BTreeMap<String, String> = probe2cat.into_iter().collect();
        for probe in sorted.keys() {
            if types_in_sentences.contains(probe.as_str()) {
                probes_in_data.insert(probe.clone());
            } else {
                warn!(probe = %probe, "probe not in original data. Excluded.");
            }
        }
        info!(
            structure = %structure,
            "{} of {} total probes occur in original data",
            probes_in_data.len(),
            num_total
        );
        loaded.insert(structure.clone(), sorted);
    }
    let special_tokens: Vec<String> = probes_in_data.iter().cloned().collect();

    let tokenizer = train_tokenizer(&transcripts, params.num_types, &special_tokens)?;
    info!("Tokenizing {} transcripts..", transcripts.len());
    let mut tokens: Vec<String> = Vec::with_capacity(tokens_original.len());
    for transcript in &transcripts {
        tokens.extend(tokenizer.tokenize(transcript)?);
    }
    let num_types = tokens.iter().collect::<HashSet<_>>().len();
    info!("{num_types} types in tokenized text");
    info!(
        "Added {} tokens during tokenization",
        tokens.len() as i64 - tokens_original.len() as i64
    );
    check_probes_preserved(&special_tokens, &tokens_original, &tokens)?;

    let prep = PrepConfig::new(params.batch_size, params.context_size)
        .with_num_parts(params.num_parts)
        .with_num_iterations(params.num_iterations)
        .with_reverse(params.reverse)
        .with_sliding(params.sliding)
        .with_shuffle_within_part(params.shuffle_within_part)
        .with_min_num_test_tokens(eval.min_num_test_tokens)
        .with_seed(params.seed)
        .init(&tokens, None)?;

    let prep_start = match params.start {
        StartStrategy::None => {
            info!("Not adding start.");
            None
        }
        strategy => {
            info!("Adding {strategy} start");
            let mut editor = StartEditor::new(&tokens, &special_tokens, params.num_parts, params.seed);
            let tokens_start = editor.make_start_tokens(strategy, &experiment.start);
            let prep_start = PrepConfig::new(params.batch_size, experiment.start.context_size)
                .with_num_iterations(params.num_iterations)
                .with_seed(params.seed)
                .init(&tokens_start, Some(prep.vocab().clone()))?;
            if prep_start.vocab() != prep.vocab() {
                return Err(RnnLmError::VocabularyMismatch);
            }
            info!("First {} batches are reserved for start sentences", prep_start.num_mbs());
            Some(prep_start)
        }
    };

    let structures = filter_structures(loaded, &probes_in_data, prep.tokens_train(), prep.tokens_test())?;
    let schedule = EvalSchedule::from_policy(
        &eval.high_resolution,
        eval.num_steps_to_eval,
        prep_start.as_ref().map(Prep::num_mbs),
    );
    debug!(high_resolution = ?schedule.high_resolution(), "evaluation schedule");

    Ok(PreparedRun {
        params: params.clone(),
        eval: eval.clone(),
        prep,
        prep_start,
        structures,
        schedule,
    })
}

/// Keep probes that occur in the training partition.
///
/// A probe found in neither partition is collected, and all of them are reported in one error.
fn filter_structures(
    loaded: BTreeMap<String, BTreeMap<String, String>>,
    probes_in_data: &BTreeSet<String>,
    tokens_train: &[String],
    tokens_test: &[String],
) -> Result<Structures> {
    let mut counts_train: HashMap<&str, usize> = HashMap::new();
    for token in tokens_train {
        *counts_train.entry(token.as_str()).or_insert(0) += 1;
    }
    let in_test: HashSet<&str> = tokens_test.iter().map(String::as_str).collect();

    let mut missing = BTreeSet::new();
    let mut structures = Structures::new();
    for (structure, probe2cat) in loaded {
        let mut kept = BTreeMap::new();
        for (probe, cat) in probe2cat {
            if !probes_in_data.contains(&probe) {
                continue;
            }
            if counts_train.contains_key(probe.as_str()) {
                kept.insert(probe, cat);
            } else if in_test.contains(probe.as_str()) {
                debug!(probe = %probe, structure = %structure, "probe only in test data. Excluded.");
            } else {
                error!(probe = %probe, "probe not in train or test data after tokenization");
                missing.insert(probe);
            }
        }
        structures.insert(structure, kept);
    }

    if !missing.is_empty() {
        return Err(RnnLmError::ProbesMissing(missing.into_iter().collect()));
    }
    Ok(structures)
}

impl PreparedRun {
    /// Minibatches of the start prefix and the corpus together
    pub fn num_mbs(&self) -> usize {
        self.prep_start.as_ref().map_or(0, Prep::num_mbs) + self.prep.num_mbs()
    }

    /// Start windows strictly before corpus windows
    pub fn batches(&self) -> impl Iterator<Item = Windows> + '_ {
        self.prep_start
            .iter()
            .flat_map(Prep::generate_batches)
            .chain(self.prep.generate_batches())
    }

    pub fn model_config(&self) -> RnnLmConfig {
        RnnLmConfig::new(self.prep.num_types())
            .with_hidden_size(self.params.hidden_size)
            .with_num_layers(self.params.num_layers)
            .with_flavor(self.params.flavor)
    }

    /// Build model and optimizer, then train until the batches run out.
    pub fn train<B: AutodiffBackend>(&self, device: &B::Device) -> Result<Vec<TimeSeries>> {
        <B as Backend>::seed(device, self.params.seed);
        let model = self.model_config().init::<B>(device);
        info!(
            vocab_size = model.vocab_size(),
            hidden_size = model.hidden_size(),
            num_layers = model.num_layers(),
            flavor = %self.params.flavor,
            optimizer = %self.params.optimizer,
            num_mbs = self.num_mbs(),
            "model ready"
        );

        match self.params.optimizer {
            OptimizerKind::Adagrad => {
                let optimizer = AdaGradConfig::new()
                    .with_grad_clipping(Some(grad_clipping()))
                    .init::<B, RnnLm<B>>();
                self.train_with(model, optimizer, device)
            }
            OptimizerKind::Sgd => {
                let optimizer = SgdConfig::new()
                    .with_gradient_clipping(Some(grad_clipping()))
                    .init::<B, RnnLm<B>>();
                self.train_with(model, optimizer, device)
            }
        }
    }

    fn train_with<B: AutodiffBackend, O: Optimizer<RnnLm<B>, B>>(
        &self,
        model: RnnLm<B>,
        optimizer: O,
        device: &B::Device,
    ) -> Result<Vec<TimeSeries>> {
        let mut trainer = Trainer::new(
            model,
            optimizer,
            self.params.lr,
            &self.prep,
            &self.structures,
            &self.eval,
            self.schedule.clone(),
            device,
        );
        trainer.run(self.batches(), self.num_mbs())
    }
}
