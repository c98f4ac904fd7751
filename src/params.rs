use std::{collections::BTreeSet, fmt, str::FromStr};

use burn::{config::Config, constant};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{self, RnnLmError};

/// Keys added by the job scheduler that carry no hyper-parameter meaning
pub const HOUSEKEEPING_KEYS: [&str; 3] = ["job_name", "param_name", "save_path"];

/// Location of the project holding probe-label files; read by the caller, not a hyper-parameter
pub const PROJECT_PATH_KEY: &str = "project_path";

/// Keys every run request must carry
pub const PARAM_NAMES: [&str; 16] = [
    "shuffle_sentences",
    "corpus",
    "num_types",
    "num_parts",
    "context_size",
    "num_sentences",
    "start",
    "flavor",
    "hidden_size",
    "num_layers",
    "sliding",
    "reverse",
    "num_iterations",
    "batch_size",
    "lr",
    "optimizer",
];

/// Keys a request may carry; absent ones take their default
pub const OPTIONAL_PARAM_NAMES: [&str; 2] = ["shuffle_within_part", "seed"];

/// `num_types` value that selects plain whitespace tokenization
pub const WHITESPACE_NUM_TYPES: usize = 0;

/// Corpora the corpus collaborator can load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorpusId {
    #[serde(rename = "aochildes")]
    AoChildes,
    #[serde(rename = "aonewsela")]
    AoNewsela,
}

impl CorpusId {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorpusId::AoChildes => "aochildes",
            CorpusId::AoNewsela => "aonewsela",
        }
    }
}

impl fmt::Display for CorpusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorpusId {
    type Err = RnnLmError;

    fn from_str(s: &str) -> errors::Result<Self> {
        match s {
            "aochildes" => Ok(CorpusId::AoChildes),
            "aonewsela" => Ok(CorpusId::AoNewsela),
            other => Err(RnnLmError::UnsupportedCorpus(other.to_string())),
        }
    }
}

/// Recurrent cell flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    /// Simple recurrent (Elman) cell with tanh non-linearity
    Srn,
    /// Long short-term memory cell
    Lstm,
}

impl Flavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::Srn => "srn",
            Flavor::Lstm => "lstm",
        }
    }

    /// Number of stacked pre-activations one time step needs
    pub fn num_gates(&self) -> usize {
        match self {
            Flavor::Srn => 1,
            Flavor::Lstm => 4,
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

constant!(Flavor);

impl FromStr for Flavor {
    type Err = RnnLmError;

    fn from_str(s: &str) -> errors::Result<Self> {
        match s {
            "srn" => Ok(Flavor::Srn),
            "lstm" => Ok(Flavor::Lstm),
            other => Err(RnnLmError::UnknownFlavor(other.to_string())),
        }
    }
}

/// Stochastic optimizer used for every gradient step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adagrad,
    Sgd,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Adagrad => "adagrad",
            OptimizerKind::Sgd => "sgd",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerKind {
    type Err = RnnLmError;

    fn from_str(s: &str) -> errors::Result<Self> {
        match s {
            "adagrad" => Ok(OptimizerKind::Adagrad),
            "sgd" => Ok(OptimizerKind::Sgd),
            other => Err(RnnLmError::UnknownOptimizer(other.to_string())),
        }
    }
}

/// Strategy for the synthetic token stream presented before the corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartStrategy {
    None,
    Entropic,
    Fragmented,
    Singleton,
}

impl StartStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartStrategy::None => "none",
            StartStrategy::Entropic => "entropic",
            StartStrategy::Fragmented => "fragmented",
            StartStrategy::Singleton => "singleton",
        }
    }
}

impl fmt::Display for StartStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StartStrategy {
    type Err = RnnLmError;

    fn from_str(s: &str) -> errors::Result<Self> {
        match s {
            "none" => Ok(StartStrategy::None),
            "entropic" => Ok(StartStrategy::Entropic),
            "fragmented" => Ok(StartStrategy::Fragmented),
            "singleton" => Ok(StartStrategy::Singleton),
            other => Err(RnnLmError::UnknownStart(other.to_string())),
        }
    }
}

/// Which model-internal vectors stand in for a probe during evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Representation {
    /// Rows of the input embedding, no context involved
    #[serde(rename = "n")]
    NoContext,
    /// Rows of the output projection
    #[serde(rename = "o")]
    Output,
    /// Final hidden state averaged over training contexts that end in the probe
    #[serde(rename = "c")]
    Contextual,
}

impl Representation {
    /// Short tag used in metric names
    pub fn tag(&self) -> &'static str {
        match self {
            Representation::NoContext => "n",
            Representation::Output => "o",
            Representation::Contextual => "c",
        }
    }
}

/// Policy deciding which early steps get evaluated in addition to the fixed cadence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum HighResolution {
    /// Evenly spaced checkpoints across the start prefix, `fallback` when no prefix is configured
    StartPrefix {
        num_checkpoints: usize,
        fallback: Vec<usize>,
    },
    /// Explicit steps regardless of the start prefix
    Fixed { steps: Vec<usize> },
}

impl Default for HighResolution {
    fn default() -> Self {
        HighResolution::StartPrefix {
            num_checkpoints: 10,
            fallback: vec![0],
        }
    }
}

/// Hyper-parameters of a single run
///
/// `Params::new()` holds the defaults every request is compared against.
#[derive(Config, Debug)]
pub struct Params {
    /// Shuffle transcripts before tokenization, destroying age order
    #[config(default = false)]
    pub shuffle_sentences: bool,

    #[config(default = "CorpusId::AoChildes")]
    pub corpus: CorpusId,

    /// Target BPE vocabulary size, `WHITESPACE_NUM_TYPES` for whitespace tokenization
    #[config(default = 8000)]
    pub num_types: usize,

    /// Number of ordered parts the training tokens are split into
    #[config(default = 8)]
    pub num_parts: usize,

    /// Number of backprop-through-time steps
    #[config(default = 7)]
    pub context_size: usize,

    /// Cap on the number of transcripts, all when unset
    pub num_sentences: Option<usize>,

    #[config(default = "StartStrategy::None")]
    pub start: StartStrategy,

    #[config(default = "Flavor::Srn")]
    pub flavor: Flavor,

    #[config(default = 512)]
    pub hidden_size: usize,

    #[config(default = 1)]
    pub num_layers: usize,

    #[config(default = false)]
    pub sliding: bool,

    #[config(default = false)]
    pub reverse: bool,

    /// Iterations over the first and the last presented part; parts in between are interpolated
    #[config(default = "(12, 12)")]
    pub num_iterations: (usize, usize),

    #[config(default = 64)]
    pub batch_size: usize,

    #[config(default = 0.01)]
    pub lr: f64,

    #[config(default = "OptimizerKind::Adagrad")]
    pub optimizer: OptimizerKind,

    #[config(default = false)]
    pub shuffle_within_part: bool,

    /// Seed for every random choice of the run
    #[config(default = 42)]
    pub seed: u64,
}

impl Params {
    /// Resolve a run request against the closed parameter schema.
    pub fn from_request(request: &Map<String, Value>) -> errors::Result<Self> {
        let provided: BTreeSet<&str> = request
            .keys()
            .map(String::as_str)
            .filter(|key| !HOUSEKEEPING_KEYS.contains(key) && *key != PROJECT_PATH_KEY)
            .collect();

        let unknown: Vec<String> = provided
            .iter()
            .filter(|key| !in_schema(key))
            .map(|key| key.to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(RnnLmError::UnknownParameters(unknown));
        }

        let missing: Vec<String> = PARAM_NAMES
            .iter()
            .filter(|key| !provided.contains(*key))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(RnnLmError::MissingParameters(missing));
        }

        // identifiers first, so a typo is reported against its own key
        identifier::<CorpusId>(request, "corpus")?;
        identifier::<Flavor>(request, "flavor")?;
        identifier::<OptimizerKind>(request, "optimizer")?;
        identifier::<StartStrategy>(request, "start")?;

        let mut fields: Map<String, Value> = request
            .iter()
            .filter(|(key, _)| in_schema(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let defaults = Params::default_request()?;
        for key in OPTIONAL_PARAM_NAMES {
            if fields.contains_key(key) {
                continue;
            }
            if let Some(value) = defaults.get(key) {
                fields.insert(key.to_string(), value.clone());
            }
        }
        let params: Params = serde_json::from_value(Value::Object(fields))
            .map_err(|e| RnnLmError::InvalidParameter(e.to_string()))?;
        params.validate()?;

        Ok(params)
    }

    /// The default request, one entry per schema key.
    pub fn default_request() -> errors::Result<Map<String, Value>> {
        match serde_json::to_value(Params::new())? {
            Value::Object(map) => Ok(map),
            other => Err(RnnLmError::Generic(format!(
                "default parameters serialized to {other} instead of an object"
            ))),
        }
    }

    /// Overrides for a quick smoke run.
    pub fn debug_overrides() -> Map<String, Value> {
        let mut overrides = Map::new();
        overrides.insert("context_size".into(), Value::from(2));
        overrides.insert("num_iterations".into(), Value::from(vec![1, 1]));
        overrides.insert("num_sentences".into(), Value::from(100_000));
        overrides
    }

    fn validate(&self) -> errors::Result<()> {
        let checks = [
            (self.num_parts > 0, "num_parts must be positive"),
            (self.context_size > 0, "context_size must be positive"),
            (self.batch_size > 0, "batch_size must be positive"),
            (self.hidden_size > 0, "hidden_size must be positive"),
            (self.num_layers > 0, "num_layers must be positive"),
            (
                self.num_iterations.0 > 0 && self.num_iterations.1 > 0,
                "num_iterations must be positive",
            ),
            (self.lr.is_finite() && self.lr > 0.0, "lr must be a positive number"),
            (self.num_sentences != Some(0), "num_sentences must be positive when set"),
        ];

        let problems: Vec<&str> = checks
            .iter()
            .filter(|(ok, _)| !ok)
            .map(|(_, problem)| *problem)
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(RnnLmError::InvalidParameter(problems.join("; ")))
        }
    }
}

fn in_schema(key: &str) -> bool {
    PARAM_NAMES.contains(&key) || OPTIONAL_PARAM_NAMES.contains(&key)
}

fn identifier<T: FromStr<Err = RnnLmError>>(request: &Map<String, Value>, key: &str) -> errors::Result<T> {
    match request.get(key) {
        Some(Value::String(value)) => value.parse(),
        Some(other) => Err(RnnLmError::InvalidParameter(format!(
            "{key} must be a string, got {other}"
        ))),
        None => Err(RnnLmError::MissingParameters(vec![key.to_string()])),
    }
}

/// Evaluation settings shared by every run of a project
#[derive(Config, Debug)]
pub struct EvalConfig {
    /// Evaluate every this many steps
    #[config(default = 10000)]
    pub num_steps_to_eval: usize,

    /// Smallest acceptable held-out partition
    #[config(default = 10000)]
    pub min_num_test_tokens: usize,

    /// Category structures probes are scored against
    #[config(default = "vec![String::from(\"sem-4096\")]")]
    pub structures: Vec<String>,

    #[config(default = "vec![Representation::NoContext]")]
    pub representations: Vec<Representation>,

    /// Balanced accuracy
    #[config(default = true)]
    pub ba: bool,

    /// Between- minus within-category distance
    #[config(default = true)]
    pub dp: bool,

    /// Nearest-neighbour category agreement
    #[config(default = false)]
    pub cs: bool,

    /// Silhouette
    #[config(default = true)]
    pub si: bool,

    /// Centroid separation
    #[config(default = true)]
    pub sd: bool,

    /// Cap on windows scored for each perplexity
    #[config(default = 4096)]
    pub max_pp_windows: usize,

    /// Cap on contexts averaged into a contextual representation
    #[config(default = 64)]
    pub max_contexts_per_probe: usize,

    #[config(default = "HighResolution::default()")]
    pub high_resolution: HighResolution,
}

/// Settings of the synthetic start stream
#[derive(Config, Debug)]
pub struct StartConfig {
    #[config(default = 1)]
    pub num_left_words: usize,

    #[config(default = 1)]
    pub num_right_words: usize,

    /// Fragments emitted per probe by the entropic and fragmented strategies
    #[config(default = 8)]
    pub num_fragments_per_probe: usize,

    /// Context size of windows cut from the start stream
    #[config(default = 2)]
    pub context_size: usize,
}

/// Project-level settings that are not part of a run request
#[derive(Config, Debug)]
pub struct ExperimentConfig {
    #[config(default = "EvalConfig::new()")]
    pub eval: EvalConfig,

    #[config(default = "StartConfig::new()")]
    pub start: StartConfig,
}
