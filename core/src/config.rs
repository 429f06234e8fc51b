use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use crate::error::{TrainError, TrainResult};

pub const INPUT_DIM: usize = 28 * 28;
pub const NUM_CLASSES: usize = 10;

/// Command-line flags. Spellings match the historical sweep scripts, so every
/// long name keeps its underscores.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "mnist-mps",
    about = "Train a matrix product state classifier on MNIST or Fashion-MNIST"
)]
pub struct CliArgs {
    /// Learning rate
    #[arg(long, default_value_t = 1e-4, value_name = "LR")]
    pub lr: f64,

    /// Size of noise in initialization
    #[arg(long = "init_std", default_value_t = 1e-9, value_name = "STD")]
    pub init_std: f64,

    /// L2 regularization
    #[arg(long = "l2_reg", default_value_t = 0.0, value_name = "WD")]
    pub l2_reg: f64,

    /// How many images to train on
    #[arg(long = "num_train", default_value_t = 1000, value_name = "NT")]
    pub num_train: usize,

    /// Minibatch size for training and evaluation
    #[arg(long = "batch_size", default_value_t = 100, value_name = "BS")]
    pub batch_size: usize,

    /// Bond dimension of the MPS
    #[arg(long = "bond_dim", default_value_t = 20, value_name = "BD")]
    pub bond_dim: usize,

    /// Number of epochs to train for
    #[arg(long = "num_epochs", default_value_t = 10, value_name = "NE")]
    pub num_epochs: usize,

    /// How many images to test on
    #[arg(long = "num_test", default_value_t = 1000, value_name = "NTE")]
    pub num_test: usize,

    /// Periodic (1) or open (0) boundary conditions
    #[arg(long = "periodic_bc", default_value_t = 0, value_name = "BC", value_parser = flag_parser())]
    pub periodic_bc: u8,

    /// Whether bond dimensions change dynamically
    #[arg(long = "adaptive_mode", default_value_t = 0, value_name = "DM", value_parser = flag_parser())]
    pub adaptive_mode: u8,

    /// How many training inputs between merge state changes
    #[arg(long = "merge_threshold", default_value_t = 2000, value_name = "TH")]
    pub merge_threshold: usize,

    /// SVD truncation cutoff
    #[arg(long, default_value_t = 1e-10, value_name = "CO")]
    pub cutoff: f64,

    /// Use a GPU if one is available
    #[arg(long = "use_gpu", default_value_t = 0, value_name = "GPU", value_parser = flag_parser())]
    pub use_gpu: u8,

    /// Lay the MPS along a random pixel path
    #[arg(long = "random_path", default_value_t = 0, value_name = "PATH", value_parser = flag_parser())]
    pub random_path: u8,

    /// Use Fashion-MNIST in place of MNIST
    #[arg(long = "fashion_mnist", default_value_t = 0, value_name = "FM", value_parser = flag_parser())]
    pub fashion_mnist: u8,

    /// Use MSE loss instead of cross entropy
    #[arg(long = "mse_loss", default_value_t = 0, value_name = "LOSS", value_parser = flag_parser())]
    pub mse_loss: u8,

    /// Shorthand name of the parameter configuration; its first character is dropped
    #[arg(long, default_value = "", value_name = "CONFIG")]
    pub config: String,

    /// Seed for initialization noise, the random path and shuffling
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Dataset cache root (defaults to burn's dataset cache)
    #[arg(long = "data_dir")]
    pub data_dir: Option<PathBuf>,

    /// Root directory for local metrics sessions
    #[arg(long = "runs_dir", default_value = "runs")]
    pub runs_dir: PathBuf,

    /// Metrics project identifier
    #[arg(long, default_value = "torch_mps")]
    pub project: String,
}

fn flag_parser() -> clap::builder::RangedI64ValueParser<u8> {
    clap::value_parser!(u8).range(0..=1)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum LossKind {
    CrossEntropy,
    MeanSquaredError,
}

impl LossKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::CrossEntropy => "cross entropy",
            Self::MeanSquaredError => "MSE",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum DatasetVariant {
    Mnist,
    FashionMnist,
}

impl DatasetVariant {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Mnist => "MNIST",
            Self::FashionMnist => "FashionMNIST",
        }
    }

    /// Cache subdirectory for this variant.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Mnist => "mnist",
            Self::FashionMnist => "fashion_mnist",
        }
    }
}

/// Immutable hyperparameters of one run.
#[derive(Clone, Debug)]
pub struct Configuration {
    pub lr: f64,
    pub init_std: f64,
    pub l2_reg: f64,
    pub num_train: usize,
    pub batch_size: usize,
    pub bond_dim: usize,
    pub num_epochs: usize,
    pub num_test: usize,
    pub periodic_bc: bool,
    pub adaptive_mode: bool,
    pub merge_threshold: usize,
    pub cutoff: f64,
    pub use_gpu: bool,
    pub random_path: bool,
    pub dataset: DatasetVariant,
    pub loss: LossKind,
    pub run_name: Option<String>,
    pub seed: u64,
    pub data_dir: Option<PathBuf>,
    pub runs_dir: PathBuf,
    pub project: String,
}

impl Configuration {
    /// Parse a full token list (program name first).
    pub fn try_parse_from<I, T>(tokens: I) -> TrainResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let args = CliArgs::try_parse_from(tokens)
            .map_err(|err| TrainError::usage(err.render().to_string()))?;
        Self::from_args(args)
    }

    pub fn from_args(args: CliArgs) -> TrainResult<Self> {
        if args.batch_size == 0 {
            return Err(TrainError::usage("--batch_size must be at least 1"));
        }
        if args.bond_dim == 0 {
            return Err(TrainError::usage("--bond_dim must be at least 1"));
        }
        if !args.lr.is_finite() || args.lr < 0.0 {
            return Err(TrainError::usage(format!(
                "--lr must be a non-negative number, got {}",
                args.lr
            )));
        }
        if !args.init_std.is_finite() || args.init_std < 0.0 {
            return Err(TrainError::usage(format!(
                "--init_std must be a non-negative number, got {}",
                args.init_std
            )));
        }
        if !args.l2_reg.is_finite() || args.l2_reg < 0.0 {
            return Err(TrainError::usage(format!(
                "--l2_reg must be a non-negative number, got {}",
                args.l2_reg
            )));
        }

        let run_name = args
            .config
            .chars()
            .skip(1)
            .collect::<String>();

        Ok(Self {
            lr: args.lr,
            init_std: args.init_std,
            l2_reg: args.l2_reg,
            num_train: args.num_train,
            batch_size: args.batch_size,
            bond_dim: args.bond_dim,
            num_epochs: args.num_epochs,
            num_test: args.num_test,
            periodic_bc: args.periodic_bc == 1,
            adaptive_mode: args.adaptive_mode == 1,
            merge_threshold: args.merge_threshold,
            cutoff: args.cutoff,
            use_gpu: args.use_gpu == 1,
            random_path: args.random_path == 1,
            dataset: if args.fashion_mnist == 1 {
                DatasetVariant::FashionMnist
            } else {
                DatasetVariant::Mnist
            },
            loss: if args.mse_loss == 1 {
                LossKind::MeanSquaredError
            } else {
                LossKind::CrossEntropy
            },
            run_name: (!run_name.is_empty()).then_some(run_name),
            seed: args.seed,
            data_dir: args.data_dir,
            runs_dir: args.runs_dir,
            project: args.project,
        })
    }

    /// Epochs between learning-rate decays.
    pub fn decay_step(&self) -> usize {
        self.num_epochs / 3
    }

    /// Flat parameter map logged once per session.
    pub fn to_params(&self, path: Option<&[usize]>) -> ParamMap {
        let mut params = ParamMap::default();
        params.push("bond_dim", ParamValue::Int(self.bond_dim as i64));
        params.push("adaptive_mode", ParamValue::Bool(self.adaptive_mode));
        params.push("periodic_bc", ParamValue::Bool(self.periodic_bc));
        params.push("init_std", ParamValue::Float(self.init_std));
        params.push("num_train", ParamValue::Int(self.num_train as i64));
        params.push("num_test", ParamValue::Int(self.num_test as i64));
        params.push("batch_size", ParamValue::Int(self.batch_size as i64));
        params.push("num_epochs", ParamValue::Int(self.num_epochs as i64));
        params.push("lr", ParamValue::Float(self.lr));
        params.push("l2_reg", ParamValue::Float(self.l2_reg));
        params.push("merge_threshold", ParamValue::Int(self.merge_threshold as i64));
        params.push("cutoff", ParamValue::Float(self.cutoff));
        params.push(
            "fashion",
            ParamValue::Bool(self.dataset == DatasetVariant::FashionMnist),
        );
        params.push(
            "mse_loss",
            ParamValue::Bool(self.loss == LossKind::MeanSquaredError),
        );
        params.push("path", ParamValue::Path(path.map(<[usize]>::to_vec)));
        params
    }

    /// Human-readable parameter dump printed before training starts.
    pub fn summary_lines(&self, device: &str, path: Option<&[usize]>) -> Vec<String> {
        let mut lines = vec!["THIS TRIAL'S ALL PARAMETERS".to_string()];
        lines.push(format!("bond_dim = {}", self.bond_dim));
        lines.push(format!("adaptive_mode = {}", self.adaptive_mode));
        lines.push(format!("periodic_bc = {}", self.periodic_bc));
        lines.push(format!("init_std = {:e}", self.init_std));
        lines.push(format!("num_train = {}", self.num_train));
        lines.push(format!("num_test = {}", self.num_test));
        lines.push(format!("batch_size = {}", self.batch_size));
        lines.push(format!("num_epochs = {}", self.num_epochs));
        lines.push(format!("learning_rate = {:e}", self.lr));
        lines.push(format!("l2_reg = {}", self.l2_reg));
        lines.push(format!("merge_threshold = {}", self.merge_threshold));
        lines.push(format!("cutoff = {:e}", self.cutoff));
        lines.push(format!("Using device: {device}"));
        lines.push("Learning rate scheduler in use".to_string());
        lines.push(format!("Training on {}", self.dataset.label()));
        lines.push(format!("Training with {} loss", self.loss.label()));
        lines.push(String::new());
        match path {
            Some(path) => lines.push(format!("path = {path:?}")),
            None => lines.push("path = None".to_string()),
        }
        lines
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Path(Option<Vec<usize>>),
}

/// Ordered name/value pairs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamMap {
    entries: Vec<(String, ParamValue)>,
}

impl ParamMap {
    pub fn push(&mut self, name: impl Into<String>, value: ParamValue) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.entries {
            map.insert(
                key.clone(),
                serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(map)
    }
}
