use std::time::Instant;

use burn::{
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    optim::Optimizer,
    tensor::{backend::AutodiffBackend, cast::ToElement},
    train::{ClassificationOutput, TrainOutput, TrainStep},
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::batcher::WindowBatcher;
use crate::errors::Result;
use crate::evaluation::{Evaluation, Performance, Structures, TimeSeries};
use crate::model::RnnLm;
use crate::params::EvalConfig;
use crate::prep::{Prep, Windows};
use crate::schedule::EvalSchedule;

/// Global gradient norm every update is clipped to
pub const GRAD_CLIP_NORM: f32 = 1.0;

pub fn grad_clipping() -> GradientClippingConfig {
    GradientClippingConfig::Norm(GRAD_CLIP_NORM)
}

/// Lifecycle of a run once model and optimizer exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Data prepared, model and optimizer constructed
    Ready,
    /// Consuming minibatches
    Running,
    /// Scoring the model; no updates happen
    Evaluating,
    /// Batch stream exhausted
    Done,
}

/// Training loop interleaving optimizer steps with checkpoint evaluation
pub struct Trainer<'a, B: AutodiffBackend, O: Optimizer<RnnLm<B>, B>> {
    model: RnnLm<B>,
    optimizer: O,
    learning_rate: f64,
    prep: &'a Prep,
    structures: &'a Structures,
    eval_config: &'a EvalConfig,
    schedule: EvalSchedule,
    batcher: WindowBatcher<B>,
    phase: Phase,
    performance: Performance,
    eval_steps: Vec<usize>,
}

impl<'a, B: AutodiffBackend, O: Optimizer<RnnLm<B>, B>> Trainer<'a, B, O> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: RnnLm<B>,
        optimizer: O,
        learning_rate: f64,
        prep: &'a Prep,
        structures: &'a Structures,
        eval_config: &'a EvalConfig,
        schedule: EvalSchedule,
        device: &B::Device,
    ) -> Self {
        Self {
            model,
            optimizer,
            learning_rate,
            prep,
            structures,
            eval_config,
            schedule,
            batcher: WindowBatcher::new(device.clone()),
            phase: Phase::Ready,
            performance: Performance::new(),
            eval_steps: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn model(&self) -> &RnnLm<B> {
        &self.model
    }

    pub fn eval_steps(&self) -> &[usize] {
        &self.eval_steps
    }

    /// Consume every minibatch, evaluating at scheduled steps.
    ///
    /// Step 0 performs no update, so the first checkpoint scores the untrained model.
    pub fn run(&mut self, batches: impl Iterator<Item = Windows>, num_mbs: usize) -> Result<Vec<TimeSeries>> {
        self.phase = Phase::Running;
        let start = Instant::now();

        let progress_bar = ProgressBar::new(num_mbs as u64);
        progress_bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) - {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );

        for (step, windows) in batches.enumerate() {
            if step != 0 {
                let loss = self.train_step(&windows);
                progress_bar.set_message(format!("loss {loss:.4}"));
            }
            progress_bar.inc(1);

            if self.schedule.should_evaluate(step) {
                progress_bar.suspend(|| self.evaluate(step, num_mbs, start));
            }
        }

        progress_bar.finish_with_message(format!("{} checkpoints", self.eval_steps.len()));
        self.phase = Phase::Done;

        std::mem::take(&mut self.performance).into_series(&self.eval_steps)
    }

    /// Forward, cross-entropy, backward, clipped optimizer update. Returns the loss.
    pub fn train_step(&mut self, windows: &Windows) -> f32 {
        let batch = self.batcher.batch(windows);
        let output: TrainOutput<ClassificationOutput<B>> = TrainStep::step(&self.model, batch);
        let loss = output.item.loss.into_scalar().to_f32();

        self.model = self
            .optimizer
            .step(self.learning_rate, self.model.clone(), output.grads);
        loss
    }

    fn evaluate(&mut self, step: usize, num_mbs: usize, start: Instant) {
        self.phase = Phase::Evaluating;
        self.eval_steps.push(step);

        let model = self.model.valid();
        let device = self.batcher.device.clone();
        let mut evaluation = Evaluation::new(&model, self.prep, self.structures, self.eval_config, &device);
        self.performance = evaluation.evaluate(std::mem::take(&mut self.performance));

        for (name, value) in self.performance.latest() {
            info!("{name:<12}={value:.2}");
        }
        let minutes_elapsed = start.elapsed().as_secs() / 60;
        info!("completed step={step:>12}/{num_mbs:>12}");
        info!("minutes elapsed={minutes_elapsed}");

        self.phase = Phase::Running;
    }
}

#[cfg(all(test, feature = "ndarray"))]
mod tests {
    use super::*;
    use crate::evaluation::{TEST_PP, TRAIN_PP};
    use crate::model::RnnLmConfig;
    use crate::prep::PrepConfig;
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::{AdaGradConfig, SgdConfig};
    use std::collections::BTreeMap;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn tokens(n: usize) -> Vec<String> {
        (0..n).map(|i| ["a", "b", "c", "d"][i % 4].to_string()).collect()
    }

    #[test]
    fn test_checkpoints_follow_schedule() {
        let device = Default::default();
        let prep = PrepConfig::new(1, 1)
            .with_min_num_test_tokens(4)
            .init(&tokens(28), None)
            .unwrap();
        assert_eq!(prep.num_mbs(), 12);

        let model = RnnLmConfig::new(prep.num_types())
            .with_hidden_size(4)
            .init::<TestBackend>(&device);
        let optimizer = SgdConfig::new()
            .with_gradient_clipping(Some(grad_clipping()))
            .init::<TestBackend, RnnLm<TestBackend>>();
        let structures = BTreeMap::new();
        let eval_config = EvalConfig::new();
        let schedule = EvalSchedule::new(5, [0, 1, 2]);

        let mut trainer = Trainer::new(
            model, optimizer, 0.1, &prep, &structures, &eval_config, schedule, &device,
        );
        assert_eq!(trainer.phase(), Phase::Ready);

        let series = trainer.run(prep.generate_batches(), prep.num_mbs()).unwrap();
        assert_eq!(trainer.phase(), Phase::Done);
        assert_eq!(trainer.eval_steps(), &[0, 1, 2, 5, 10]);

        let names: Vec<&str> = series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![TEST_PP, TRAIN_PP]);
        assert!(series.iter().all(|s| s.steps == vec![0, 1, 2, 5, 10] && s.values.len() == 5));
    }

    #[test]
    fn test_repeated_step_lowers_loss() {
        let device = Default::default();
        let prep = PrepConfig::new(4, 2).init(&tokens(48), None).unwrap();
        let model = RnnLmConfig::new(prep.num_types())
            .with_hidden_size(8)
            .init::<TestBackend>(&device);
        let optimizer = AdaGradConfig::new()
            .with_grad_clipping(Some(grad_clipping()))
            .init::<TestBackend, RnnLm<TestBackend>>();
        let structures = BTreeMap::new();
        let eval_config = EvalConfig::new();

        let mut trainer = Trainer::new(
            model,
            optimizer,
            0.1,
            &prep,
            &structures,
            &eval_config,
            EvalSchedule::new(0, []),
            &device,
        );
        let windows = prep.generate_batches().next().unwrap();
        let first = trainer.train_step(&windows);
        let mut last = first;
        for _ in 0..30 {
            last = trainer.train_step(&windows);
        }
        assert!(last < first, "loss went from {first} to {last}");
    }
}
