use serde::{Deserialize, Serialize};

use crate::error::{TrainError, TrainResult};

/// Metric names as they appear in the experiment session.
pub const LOSS: &str = "loss";
pub const TRAINING_ERROR: &str = "training error";
pub const TEST_ERROR: &str = "test error";

/// Epoch-level summary reported to the log and the metrics sink.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub lr: f64,
    pub loss: f64,
    pub train_accuracy: f64,
    pub test_accuracy: f64,
}

impl EpochMetrics {
    pub fn train_error(&self) -> f64 {
        1.0 - self.train_accuracy
    }

    pub fn test_error(&self) -> f64 {
        1.0 - self.test_accuracy
    }
}

/// Everything a finished run reports, written once to the metrics session.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub epochs: Vec<EpochMetrics>,
    pub optimizer_steps: usize,
}

impl RunSummary {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

/// Per-epoch accumulators, averaged over batches at the end of a phase.
#[derive(Clone, Debug, Default)]
pub struct RunningMetrics {
    loss: f64,
    accuracy: f64,
    batches: usize,
}

impl RunningMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, loss: f64, accuracy: f64) {
        self.loss += loss;
        self.accuracy += accuracy;
        self.batches += 1;
    }

    pub fn record_accuracy(&mut self, accuracy: f64) {
        self.record(0.0, accuracy);
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Zero when no batch ran.
    pub fn average_loss(&self) -> f64 {
        if self.batches == 0 {
            return 0.0;
        }
        self.loss / self.batches as f64
    }

    /// Zero when no batch ran.
    pub fn average_accuracy(&self) -> f64 {
        if self.batches == 0 {
            return 0.0;
        }
        self.accuracy / self.batches as f64
    }
}

/// Fraction of `predictions` equal to `labels`, over `batch_size` examples.
/// A learner that returns the wrong number of predictions is an error.
pub fn batch_accuracy(
    predictions: &[usize],
    labels: &[usize],
    batch_size: usize,
) -> TrainResult<f64> {
    if predictions.len() != labels.len() {
        return Err(TrainError::numerical(format!(
            "expected {} predictions, got {}",
            labels.len(),
            predictions.len()
        )));
    }
    if batch_size == 0 {
        return Ok(0.0);
    }
    let correct = predictions
        .iter()
        .zip(labels)
        .filter(|(prediction, label)| prediction == label)
        .count();
    Ok(correct as f64 / batch_size as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_over_recorded_batches() {
        let mut running = RunningMetrics::new();
        running.record(2.0, 0.5);
        running.record(1.0, 1.0);
        assert_eq!(running.batches(), 2);
        assert_eq!(running.average_loss(), 1.5);
        assert_eq!(running.average_accuracy(), 0.75);
    }

    #[test]
    fn empty_phase_does_not_divide_by_zero() {
        let running = RunningMetrics::new();
        assert_eq!(running.average_loss(), 0.0);
        assert_eq!(running.average_accuracy(), 0.0);
    }

    #[test]
    fn accuracy_counts_matches() {
        assert_eq!(batch_accuracy(&[1, 2, 3, 4], &[1, 2, 0, 0], 4).unwrap(), 0.5);
        assert_eq!(batch_accuracy(&[7, 7], &[7, 7], 2).unwrap(), 1.0);
        assert_eq!(batch_accuracy(&[], &[], 0).unwrap(), 0.0);
    }

    #[test]
    fn short_prediction_lists_are_rejected() {
        let err = batch_accuracy(&[1, 2], &[1, 2, 3], 3).unwrap_err();
        assert!(matches!(err, TrainError::Numerical(_)));
    }

    #[test]
    fn errors_complement_accuracy() {
        let metrics = EpochMetrics {
            epoch: 1,
            lr: 1e-4,
            loss: 0.3,
            train_accuracy: 0.75,
            test_accuracy: 1.0,
        };
        assert_eq!(metrics.train_error(), 0.25);
        assert_eq!(metrics.test_error(), 0.0);
    }
}
