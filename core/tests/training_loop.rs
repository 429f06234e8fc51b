use std::cell::Cell;

use mpstrain_core::{
    metrics, Batch, BatchOutput, Configuration, Learner, MemorySink, MetricsSink, ParamMap,
    RunSummary, Split, Targets, TrainError, TrainResult, Trainer, TrainerConfig, INPUT_DIM,
    NUM_CLASSES,
};

/// Scores every example with the same fixed vector and counts calls.
struct FixedScores {
    scores: [f32; NUM_CLASSES],
    optimizer_steps: usize,
    predictions: Cell<usize>,
}

impl FixedScores {
    fn new(favourite: usize) -> Self {
        let mut scores = [0.0; NUM_CLASSES];
        scores[favourite] = 2.0;
        Self {
            scores,
            optimizer_steps: 0,
            predictions: Cell::new(0),
        }
    }

    fn cross_entropy(&self, label: usize) -> f64 {
        let max = self.scores.iter().cloned().fold(f32::MIN, f32::max) as f64;
        let log_sum: f64 = self
            .scores
            .iter()
            .map(|&score| (score as f64 - max).exp())
            .sum::<f64>()
            .ln()
            + max;
        log_sum - self.scores[label] as f64
    }

    fn predicted(&self) -> usize {
        mpstrain_core::argmax(&self.scores)
    }
}

impl Learner for FixedScores {
    fn train_batch(&mut self, batch: &Batch<'_>, _lr: f64) -> TrainResult<BatchOutput> {
        self.optimizer_steps += 1;
        let labels = match batch.targets {
            Targets::Classes(labels) => labels.to_vec(),
            Targets::OneHot(_) => panic!("cross entropy run received one-hot targets"),
        };
        let loss = labels
            .iter()
            .map(|&label| self.cross_entropy(label))
            .sum::<f64>()
            / labels.len() as f64;

        Ok(BatchOutput {
            loss,
            predictions: vec![self.predicted(); batch.len()],
        })
    }

    fn predict(&self, batch: &Batch<'_>) -> TrainResult<Vec<usize>> {
        self.predictions.set(self.predictions.get() + 1);
        Ok(vec![self.predicted(); batch.len()])
    }
}

/// 100 examples, labels cycling through the ten classes.
fn stub_split(len: usize) -> Split {
    let labels: Vec<usize> = (0..len).map(|index| index % NUM_CLASSES).collect();
    let inputs = labels
        .iter()
        .flat_map(|&label| std::iter::repeat(label as f32 / 10.0).take(INPUT_DIM))
        .collect();
    Split::new(inputs, INPUT_DIM, labels).unwrap()
}

#[test]
fn single_batch_single_epoch_run() {
    let config = Configuration::try_parse_from([
        "mnist-mps",
        "--num_train",
        "100",
        "--batch_size",
        "100",
        "--num_epochs",
        "1",
        "--mse_loss",
        "0",
    ])
    .unwrap();

    let mut learner = FixedScores::new(3);
    let mut train = stub_split(100).encode_labels(config.loss);
    let test = stub_split(100).encode_labels(config.loss);
    let mut sink = MemorySink::new();
    let mut trainer = Trainer::new(TrainerConfig::from(&config)).unwrap();

    let summary = trainer
        .run(&mut learner, &mut train, &test, &mut sink, &mut Vec::new())
        .unwrap();

    assert_eq!(learner.optimizer_steps, 1);
    assert_eq!(learner.predictions.get(), 1);

    // Only class 3 is predicted and it covers a tenth of the labels.
    let epoch = summary.last().unwrap();
    assert!((epoch.train_accuracy - 0.1).abs() < 1e-12);
    assert!((epoch.test_accuracy - 0.1).abs() < 1e-12);

    let expected_loss = (0..100)
        .map(|index| learner.cross_entropy(index % NUM_CLASSES))
        .sum::<f64>()
        / 100.0;
    assert!((epoch.loss - expected_loss).abs() < 1e-9);

    let logged: Vec<_> = sink.metrics().collect();
    assert_eq!(logged.len(), 3);
    assert_eq!(logged[0].0, metrics::LOSS);
    assert_eq!(logged[1].0, metrics::TRAINING_ERROR);
    assert_eq!(logged[2].0, metrics::TEST_ERROR);
    assert!(logged.iter().all(|(_, _, step)| *step == 1));
    assert!((logged[1].1 - 0.9).abs() < 1e-12);
}

/// Predicts the class encoded in each row's first pixel.
struct PixelOracle;

impl Learner for PixelOracle {
    fn train_batch(&mut self, batch: &Batch<'_>, _lr: f64) -> TrainResult<BatchOutput> {
        assert!(matches!(batch.targets, Targets::OneHot(_)));
        Ok(BatchOutput {
            loss: 0.0,
            predictions: self.predict(batch)?,
        })
    }

    fn predict(&self, batch: &Batch<'_>) -> TrainResult<Vec<usize>> {
        Ok(batch
            .inputs
            .chunks_exact(batch.dim)
            .map(|row| (row[0] * 10.0).round() as usize)
            .collect())
    }
}

#[test]
fn mse_batch_with_matching_argmax_has_zero_error() {
    let config = Configuration::try_parse_from([
        "mnist-mps",
        "--mse_loss",
        "1",
        "--num_epochs",
        "1",
        "--batch_size",
        "50",
    ])
    .unwrap();

    let mut train = stub_split(50).encode_labels(config.loss);
    let test = stub_split(50).encode_labels(config.loss);
    let mut trainer = Trainer::new(TrainerConfig::from(&config)).unwrap();

    let summary = trainer
        .run(
            &mut PixelOracle,
            &mut train,
            &test,
            &mut MemorySink::new(),
            &mut Vec::new(),
        )
        .unwrap();

    let epoch = summary.last().unwrap();
    assert_eq!(epoch.train_accuracy, 1.0);
    assert_eq!(epoch.train_error(), 0.0);
    assert_eq!(epoch.test_error(), 0.0);
}

#[test]
fn accuracy_and_error_stay_in_unit_interval() {
    let config =
        Configuration::try_parse_from(["mnist-mps", "--num_epochs", "4", "--batch_size", "7"])
            .unwrap();
    let mut train = stub_split(50).encode_labels(config.loss);
    let test = stub_split(30).encode_labels(config.loss);
    let mut trainer = Trainer::new(TrainerConfig::from(&config)).unwrap();

    let summary = trainer
        .run(
            &mut FixedScores::new(0),
            &mut train,
            &test,
            &mut MemorySink::new(),
            &mut Vec::new(),
        )
        .unwrap();

    assert_eq!(summary.epochs.len(), 4);
    for epoch in &summary.epochs {
        for value in [
            epoch.train_accuracy,
            epoch.test_accuracy,
            epoch.train_error(),
            epoch.test_error(),
        ] {
            assert!((0.0..=1.0).contains(&value), "{value}");
        }
    }
}

/// Rejects every call, like a session whose storage has gone away.
#[derive(Default)]
struct UnreachableSink {
    attempts: usize,
}

impl UnreachableSink {
    fn refuse(&mut self) -> TrainResult<()> {
        self.attempts += 1;
        Err(TrainError::logging("session unreachable"))
    }
}

impl MetricsSink for UnreachableSink {
    fn set_name(&mut self, _: &str) -> TrainResult<()> {
        self.refuse()
    }

    fn log_parameters(&mut self, _: &ParamMap) -> TrainResult<()> {
        self.refuse()
    }

    fn log_metric(&mut self, _: &str, _: f64, _: usize) -> TrainResult<()> {
        self.refuse()
    }

    fn log_summary(&mut self, _: &RunSummary) -> TrainResult<()> {
        self.refuse()
    }
}

#[test]
fn failing_metrics_sink_does_not_stop_training() {
    let config = Configuration::try_parse_from([
        "mnist-mps",
        "--num_epochs",
        "3",
        "--batch_size",
        "10",
    ])
    .unwrap();

    let mut learner = FixedScores::new(1);
    let mut train = stub_split(40).encode_labels(config.loss);
    let test = stub_split(20).encode_labels(config.loss);
    let mut sink = UnreachableSink::default();
    let mut out = Vec::new();
    let mut trainer = Trainer::new(TrainerConfig::from(&config)).unwrap();

    let summary = trainer
        .run(&mut learner, &mut train, &test, &mut sink, &mut out)
        .unwrap();

    assert_eq!(summary.epochs.len(), 3);
    assert_eq!(summary.optimizer_steps, 12);
    assert_eq!(learner.optimizer_steps, 12);
    // Three metrics per epoch plus the summary, each attempted once.
    assert_eq!(sink.attempts, 3 * 3 + 1);

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("### Epoch 3 ###"));
}

/// Returns one prediction too few for every batch.
struct ShortPredictions;

impl Learner for ShortPredictions {
    fn train_batch(&mut self, batch: &Batch<'_>, _lr: f64) -> TrainResult<BatchOutput> {
        Ok(BatchOutput {
            loss: 1.0,
            predictions: vec![0; batch.len() - 1],
        })
    }

    fn predict(&self, batch: &Batch<'_>) -> TrainResult<Vec<usize>> {
        Ok(vec![0; batch.len() - 1])
    }
}

#[test]
fn prediction_count_mismatch_is_fatal() {
    let config =
        Configuration::try_parse_from(["mnist-mps", "--num_epochs", "1", "--batch_size", "10"])
            .unwrap();
    let mut train = stub_split(20).encode_labels(config.loss);
    let test = stub_split(20).encode_labels(config.loss);
    let mut trainer = Trainer::new(TrainerConfig::from(&config)).unwrap();

    let err = trainer
        .run(
            &mut ShortPredictions,
            &mut train,
            &test,
            &mut MemorySink::new(),
            &mut Vec::new(),
        )
        .unwrap_err();
    assert!(matches!(err, TrainError::Numerical(_)));
}
