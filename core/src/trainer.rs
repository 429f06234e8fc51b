//! The epoch loop.
//!
//! `Initializing -> (Train -> Eval) x num_epochs -> Finished`. There is no
//! early stopping and no checkpointing: a run either completes every epoch or
//! fails with the first fatal error. Only metrics-sink failures are tolerated.

use std::{io::Write, time::Instant};

use rand::rngs::StdRng;

use crate::{
    config::Configuration,
    data::{Batch, Split},
    error::{TrainError, TrainResult},
    metrics::{self, batch_accuracy, EpochMetrics, RunSummary, RunningMetrics},
    rng::seeded_rng,
    schedule::StepSchedule,
    sink::MetricsSink,
};

/// Offsets the shuffle stream from the other seeded streams of a run.
const SHUFFLE_STREAM: u64 = 0x5eed_5eed;

/// Result of one optimizer step.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchOutput {
    pub loss: f64,
    pub predictions: Vec<usize>,
}

/// A trainable classifier together with its loss and optimizer.
pub trait Learner {
    /// Forward pass, loss, fresh gradients, backward pass and exactly one
    /// optimizer step at learning rate `lr`.
    fn train_batch(&mut self, batch: &Batch<'_>, lr: f64) -> TrainResult<BatchOutput>;

    /// Arg-max class per example, computed without gradient tracking.
    fn predict(&self, batch: &Batch<'_>) -> TrainResult<Vec<usize>>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Initializing,
    Train { epoch: usize },
    Eval { epoch: usize },
    Finished,
}

#[derive(Clone, Debug)]
pub struct TrainerConfig {
    pub lr: f64,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub seed: u64,
}

impl From<&Configuration> for TrainerConfig {
    fn from(config: &Configuration) -> Self {
        Self {
            lr: config.lr,
            batch_size: config.batch_size,
            num_epochs: config.num_epochs,
            seed: config.seed,
        }
    }
}

pub struct Trainer {
    config: TrainerConfig,
    schedule: StepSchedule,
    shuffle_rng: StdRng,
    phase: Phase,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> TrainResult<Self> {
        if config.batch_size == 0 {
            return Err(TrainError::usage("batch size must be at least 1"));
        }

        Ok(Self {
            schedule: StepSchedule::for_run(config.lr, config.num_epochs),
            shuffle_rng: seeded_rng(config.seed ^ SHUFFLE_STREAM),
            phase: Phase::Initializing,
            config,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run every epoch. `train` is reshuffled in place after each training
    /// phase; `test` keeps its order. Human-readable progress goes to `out`,
    /// and the summary is handed to `sink` once the last epoch is done.
    pub fn run<L, S, W>(
        &mut self,
        learner: &mut L,
        train: &mut Split,
        test: &Split,
        sink: &mut S,
        out: &mut W,
    ) -> TrainResult<RunSummary>
    where
        L: Learner + ?Sized,
        S: MetricsSink + ?Sized,
        W: Write + ?Sized,
    {
        let batch_size = self.config.batch_size;
        let train_batches = train.num_batches(batch_size);
        let test_batches = test.num_batches(batch_size);
        if train_batches == 0 {
            tracing::warn!(
                examples = train.len(),
                batch_size,
                "training split is smaller than one batch; no parameter updates will happen"
            );
        }
        if test_batches == 0 {
            tracing::warn!(
                examples = test.len(),
                batch_size,
                "test split is smaller than one batch; test accuracy is reported as zero"
            );
        }

        let start = Instant::now();
        let mut summary = RunSummary::default();

        for epoch in 1..=self.config.num_epochs {
            let lr = self.schedule.step();

            self.enter(Phase::Train { epoch });
            let mut running = RunningMetrics::new();
            for batch in train.batches(batch_size) {
                let output = learner.train_batch(&batch, lr)?;
                if !output.loss.is_finite() {
                    return Err(TrainError::numerical(format!(
                        "loss became {} in epoch {epoch}",
                        output.loss
                    )));
                }
                let labels = batch.targets.class_labels();
                let accuracy = batch_accuracy(&output.predictions, &labels, batch_size)?;
                running.record(output.loss, accuracy);
                summary.optimizer_steps += 1;
            }

            let loss = running.average_loss();
            let train_accuracy = running.average_accuracy();

            emit(
                out,
                &[
                    format!("### Epoch {epoch} ###"),
                    format!("Average loss for epoch: {loss:.4}"),
                    format!("Average train error:    {:.4}", 1.0 - train_accuracy),
                ],
            );
            record(sink, metrics::LOSS, loss, epoch);
            record(sink, metrics::TRAINING_ERROR, 1.0 - train_accuracy, epoch);

            train.shuffle(&mut self.shuffle_rng);

            self.enter(Phase::Eval { epoch });
            let test_accuracy = evaluate(&*learner, test, batch_size)?;

            emit(
                out,
                &[
                    format!("Test error:             {:.4}", 1.0 - test_accuracy),
                    format!("Runtime so far:         {} sec", start.elapsed().as_secs()),
                    String::new(),
                ],
            );
            record(sink, metrics::TEST_ERROR, 1.0 - test_accuracy, epoch);

            summary.epochs.push(EpochMetrics {
                epoch,
                lr,
                loss,
                train_accuracy,
                test_accuracy,
            });
        }

        self.enter(Phase::Finished);
        if let Err(err) = sink.log_summary(&summary) {
            tracing::warn!(error = %err, "dropping run summary");
        }
        Ok(summary)
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(?phase, "entering phase");
        self.phase = phase;
    }
}

/// Average batch accuracy over the full batches of `split`.
pub fn evaluate<L>(learner: &L, split: &Split, batch_size: usize) -> TrainResult<f64>
where
    L: Learner + ?Sized,
{
    let mut running = RunningMetrics::new();
    for batch in split.batches(batch_size) {
        let predictions = learner.predict(&batch)?;
        let labels = batch.targets.class_labels();
        running.record_accuracy(batch_accuracy(&predictions, &labels, batch_size)?);
    }
    Ok(running.average_accuracy())
}

fn emit<W: Write + ?Sized>(out: &mut W, lines: &[String]) {
    let written = lines
        .iter()
        .try_for_each(|line| writeln!(out, "{line}"))
        .and_then(|_| out.flush());
    if let Err(err) = written {
        tracing::warn!(error = %err, "failed to write progress log");
    }
}

fn record<S: MetricsSink + ?Sized>(sink: &mut S, name: &str, value: f64, step: usize) {
    if let Err(err) = sink.log_metric(name, value, step) {
        tracing::warn!(error = %err, metric = name, step, "dropping metric");
    }
}
