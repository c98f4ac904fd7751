use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use childes_rnnlm::{
    corpus::{StructureFiles, TextCorpus},
    errors::{Result, ResultExt, RnnLmError},
    params::PROJECT_PATH_KEY,
    run, BackendDevice, Config, ExperimentConfig, Params, TrainBackend, BACKEND_NAME,
};
use clap::Parser;
use serde_json::{Map, Value};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train a recurrent language model on a child-directed corpus")]
struct Args {
    /// JSON object with one entry per run parameter; defaults are used when absent
    #[arg(long)]
    request: Option<PathBuf>,

    /// Directory holding one `{corpus}.txt` file per corpus
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Project root holding `data/structures/`; a `project_path` request entry wins
    #[arg(long, default_value = ".")]
    project_path: PathBuf,

    /// Evaluation and start settings saved with `ExperimentConfig::save`
    #[arg(long)]
    experiment: Option<PathBuf>,

    /// Directory the series and the resolved configuration are written to
    #[arg(short, long, default_value = "runs")]
    output: PathBuf,

    /// Shrink the run for a quick smoke test
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match train(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("run failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn train(args: &Args) -> Result<()> {
    let mut request = load_request(args.request.as_deref())?;
    if args.debug {
        request.extend(Params::debug_overrides());
    }

    let project_path = request
        .get(PROJECT_PATH_KEY)
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .unwrap_or_else(|| args.project_path.clone());

    let experiment = match &args.experiment {
        Some(path) => ExperimentConfig::load(path).map_err(|e| RnnLmError::ConfigLoad {
            path: path.clone(),
            reason: e.to_string(),
        })?,
        None => ExperimentConfig::new(),
    };

    fs::create_dir_all(&args.output)?;
    experiment
        .save(args.output.join("experiment.json"))
        .with_context(|| "failed to save experiment config")?;
    serde_json::to_writer_pretty(
        BufWriter::new(File::create(args.output.join("request.json"))?),
        &request,
    )?;

    info!(backend = BACKEND_NAME, project_path = %project_path.display(), "starting run");
    let corpus = TextCorpus::new(args.data_dir.clone());
    let labels = StructureFiles::new(project_path);
    let device = BackendDevice::default();
    let series = run::<TrainBackend>(&request, &experiment, &corpus, &labels, &device)?;

    let path = args.output.join("series.json");
    serde_json::to_writer_pretty(BufWriter::new(File::create(&path)?), &series)?;
    info!(num_series = series.len(), path = %path.display(), "saved performance");
    Ok(())
}

fn load_request(path: Option<&Path>) -> Result<Map<String, Value>> {
    let Some(path) = path else {
        return Params::default_request();
    };
    let text = fs::read_to_string(path)?;
    match serde_json::from_str(&text)? {
        Value::Object(map) => Ok(map),
        _ => Err(RnnLmError::ConfigLoad {
            path: path.to_path_buf(),
            reason: "request must be a JSON object".to_string(),
        }),
    }
}
