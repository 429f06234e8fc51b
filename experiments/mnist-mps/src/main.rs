mod dataset;
mod learner;
mod model;

use std::{
    io::{self, Write as _},
    process,
};

use anyhow::Result;
use burn::optim::{decay::WeightDecayConfig, AdamConfig};
use burn_autodiff::Autodiff;
use burn_candle::{Candle, CandleDevice};
use clap::Parser;
use mpstrain_core::{
    permutation, seeded_rng, CliArgs, Configuration, MemorySink, MetricsSink, RunDirectorySink,
    Split, SplitKind, Trainer, TrainerConfig, INPUT_DIM, NUM_CLASSES,
};
use tracing_subscriber::EnvFilter;

use crate::{
    dataset::DatasetSource,
    learner::{MpsLearner, Objective},
    model::MpsConfig,
};

type TrainingBackend = Autodiff<Candle<f32, i64>>;

const ADAM_EPSILON: f32 = 1e-8;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let config = match Configuration::from_args(CliArgs::parse()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            process::exit(2);
        }
    };

    run(&config)
}

fn run(config: &Configuration) -> Result<()> {
    let (device, device_label) = select_device(config.use_gpu);
    let mut rng = seeded_rng(config.seed);
    let path = config
        .random_path
        .then(|| permutation(INPUT_DIM, &mut rng));

    let mut stdout = io::stdout().lock();
    for line in config.summary_lines(device_label, path.as_deref()) {
        writeln!(stdout, "{line}")?;
    }
    writeln!(stdout)?;
    stdout.flush()?;

    if config.adaptive_mode {
        tracing::warn!(
            merge_threshold = config.merge_threshold,
            cutoff = config.cutoff,
            "adaptive bond dimensions are not supported; training with a fixed bond dimension"
        );
    }

    let mut sink = open_session(config);
    if let Err(err) = sink.log_parameters(&config.to_params(path.as_deref())) {
        tracing::warn!(error = %err, "failed to log parameters");
    }
    if let Some(name) = &config.run_name {
        if let Err(err) = sink.set_name(name) {
            tracing::warn!(error = %err, "failed to name the session");
        }
    }

    let model = MpsConfig {
        input_dim: INPUT_DIM,
        output_dim: NUM_CLASSES,
        bond_dim: config.bond_dim,
        periodic_bc: config.periodic_bc,
        init_std: config.init_std,
        path,
    }
    .init::<TrainingBackend, _>(&device, &mut rng)?;

    let mut learner = MpsLearner::new(
        model,
        optimizer_config(config.l2_reg).init(),
        Objective::new(config.loss, &device),
        device.clone(),
    );

    let (mut train, test) = load_splits(config)?;

    let mut trainer = Trainer::new(TrainerConfig::from(config))?;
    let summary = trainer.run(&mut learner, &mut train, &test, sink.as_mut(), &mut stdout)?;
    if let Some(last) = summary.last() {
        tracing::info!(
            epochs = summary.epochs.len(),
            optimizer_steps = summary.optimizer_steps,
            test_error = last.test_error(),
            "training finished"
        );
    }

    Ok(())
}

/// Adam with PyTorch's epsilon, plus L2 weight decay when requested.
fn optimizer_config(l2_reg: f64) -> AdamConfig {
    let adam = AdamConfig::new().with_epsilon(ADAM_EPSILON);
    if l2_reg > 0.0 {
        adam.with_weight_decay(Some(WeightDecayConfig::new(l2_reg as f32)))
    } else {
        adam
    }
}

fn select_device(use_gpu: bool) -> (CandleDevice, &'static str) {
    #[cfg(feature = "cuda")]
    if use_gpu {
        return (CandleDevice::cuda(0), "cuda:0");
    }

    if use_gpu {
        tracing::warn!("GPU requested but this build has no CUDA support; using the CPU");
    }
    (CandleDevice::Cpu, "cpu")
}

/// Falls back to an in-memory session when the run directory is unusable.
fn open_session(config: &Configuration) -> Box<dyn MetricsSink> {
    match RunDirectorySink::create(
        &config.runs_dir,
        &config.project,
        config.run_name.as_deref(),
    ) {
        Ok(sink) => {
            tracing::info!(dir = %sink.dir().display(), "logging metrics");
            Box::new(sink)
        }
        Err(err) => {
            tracing::warn!(error = %err, "metrics session unavailable; metrics stay in memory");
            Box::new(MemorySink::new())
        }
    }
}

fn load_splits(config: &Configuration) -> Result<(Split, Split)> {
    let source = DatasetSource::for_variant(config.dataset, config.data_dir.as_deref());

    let mut train = source.load(config.dataset, SplitKind::Train)?;
    let mut test = source.load(config.dataset, SplitKind::Test)?;
    train.truncate(config.num_train);
    test.truncate(config.num_test);

    if train.len() < config.num_train || test.len() < config.num_test {
        tracing::warn!(
            train = train.len(),
            test = test.len(),
            "dataset has fewer examples than requested"
        );
    }

    Ok((train.encode_labels(config.loss), test.encode_labels(config.loss)))
}
