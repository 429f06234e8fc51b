pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod rng;
pub mod schedule;
pub mod sink;
pub mod trainer;

pub use config::{
    CliArgs, Configuration, DatasetVariant, LossKind, ParamMap, ParamValue, INPUT_DIM, NUM_CLASSES,
};
pub use data::{argmax, one_hot, Batch, Labels, Split, SplitKind, Targets};
pub use error::{TrainError, TrainResult};
pub use metrics::{EpochMetrics, RunSummary, RunningMetrics};
pub use rng::{permutation, seeded_rng};
pub use schedule::StepSchedule;
pub use sink::{MemorySink, MetricsSink, RunDirectorySink, SinkEvent};
pub use trainer::{BatchOutput, Learner, Phase, Trainer, TrainerConfig};
