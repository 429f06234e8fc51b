//! Experiment-tracking sessions.
//!
//! A session receives its parameter map once, then `(name, value, step)`
//! triples every epoch and finally the run summary. Failures surface as
//! [`TrainError::Logging`]; the training loop downgrades them to warnings.

use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    config::ParamMap,
    error::{TrainError, TrainResult},
    metrics::RunSummary,
};

pub trait MetricsSink {
    fn set_name(&mut self, name: &str) -> TrainResult<()>;

    fn log_parameters(&mut self, params: &ParamMap) -> TrainResult<()>;

    fn log_metric(&mut self, name: &str, value: f64, step: usize) -> TrainResult<()>;

    /// Called once after the last epoch.
    fn log_summary(&mut self, summary: &RunSummary) -> TrainResult<()>;
}

impl<S: MetricsSink + ?Sized> MetricsSink for Box<S> {
    fn set_name(&mut self, name: &str) -> TrainResult<()> {
        (**self).set_name(name)
    }

    fn log_parameters(&mut self, params: &ParamMap) -> TrainResult<()> {
        (**self).log_parameters(params)
    }

    fn log_metric(&mut self, name: &str, value: f64, step: usize) -> TrainResult<()> {
        (**self).log_metric(name, value, step)
    }

    fn log_summary(&mut self, summary: &RunSummary) -> TrainResult<()> {
        (**self).log_summary(summary)
    }
}

#[derive(Serialize)]
struct SessionInfo<'a> {
    project: &'a str,
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct MetricRecord<'a> {
    name: &'a str,
    value: f64,
    step: usize,
}

/// Local session stored under `<root>/<project>/<run>/`.
#[derive(Debug)]
pub struct RunDirectorySink {
    dir: PathBuf,
    project: String,
}

impl RunDirectorySink {
    pub const SESSION_FILE: &'static str = "session.json";
    pub const PARAMS_FILE: &'static str = "params.json";
    pub const METRICS_FILE: &'static str = "metrics.jsonl";
    pub const SUMMARY_FILE: &'static str = "summary.json";

    /// Opens a fresh session directory. A run that reuses a name gets the
    /// first free `<run>-<n>` directory, so earlier sessions are never touched.
    pub fn create(root: &Path, project: &str, run: Option<&str>) -> TrainResult<Self> {
        let parent = root.join(project);
        fs::create_dir_all(&parent).map_err(|err| {
            TrainError::logging(format!("failed to create {}: {err}", parent.display()))
        })?;

        let run = run.unwrap_or("unnamed");
        let dir = claim_run_dir(&parent, run)?;
        let sink = Self {
            dir,
            project: project.to_string(),
        };
        sink.write_session(None)?;
        sink.write_file(Self::METRICS_FILE, "")?;

        tracing::debug!(dir = %sink.dir.display(), "opened metrics session");
        Ok(sink)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_session(&self, name: Option<&str>) -> TrainResult<()> {
        let info = SessionInfo {
            project: &self.project,
            name,
        };
        let serialized = serde_json::to_string_pretty(&info)
            .map_err(|err| TrainError::logging(err.to_string()))?;
        self.write_file(Self::SESSION_FILE, &serialized)
    }

    fn write_file(&self, file: &str, contents: &str) -> TrainResult<()> {
        let path = self.dir.join(file);
        fs::write(&path, contents)
            .map_err(|err| TrainError::logging(format!("failed to write {}: {err}", path.display())))
    }
}

fn claim_run_dir(parent: &Path, run: &str) -> TrainResult<PathBuf> {
    let mut suffix = 1usize;
    let mut dir = parent.join(run);
    loop {
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                suffix += 1;
                dir = parent.join(format!("{run}-{suffix}"));
            }
            Err(err) => {
                return Err(TrainError::logging(format!(
                    "failed to create {}: {err}",
                    dir.display()
                )))
            }
        }
    }
}

impl MetricsSink for RunDirectorySink {
    fn set_name(&mut self, name: &str) -> TrainResult<()> {
        self.write_session(Some(name))
    }

    fn log_parameters(&mut self, params: &ParamMap) -> TrainResult<()> {
        let serialized = serde_json::to_string_pretty(&params.to_json())
            .map_err(|err| TrainError::logging(err.to_string()))?;
        self.write_file(Self::PARAMS_FILE, &serialized)
    }

    fn log_metric(&mut self, name: &str, value: f64, step: usize) -> TrainResult<()> {
        let path = self.dir.join(Self::METRICS_FILE);
        let line = serde_json::to_string(&MetricRecord { name, value, step })
            .map_err(|err| TrainError::logging(err.to_string()))?;

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|err| TrainError::logging(format!("failed to open {}: {err}", path.display())))?;
        writeln!(file, "{line}")
            .map_err(|err| TrainError::logging(format!("failed to append to {}: {err}", path.display())))
    }

    fn log_summary(&mut self, summary: &RunSummary) -> TrainResult<()> {
        let serialized = serde_json::to_string_pretty(summary)
            .map_err(|err| TrainError::logging(err.to_string()))?;
        self.write_file(Self::SUMMARY_FILE, &serialized)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    Name(String),
    Parameters(ParamMap),
    Metric { name: String, value: f64, step: usize },
    Summary(RunSummary),
}

/// Keeps every call in order.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    events: Vec<SinkEvent>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[SinkEvent] {
        &self.events
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        self.events.iter().rev().find_map(|event| match event {
            SinkEvent::Summary(summary) => Some(summary),
            _ => None,
        })
    }

    pub fn metrics(&self) -> impl Iterator<Item = (&str, f64, usize)> {
        self.events.iter().filter_map(|event| match event {
            SinkEvent::Metric { name, value, step } => Some((name.as_str(), *value, *step)),
            _ => None,
        })
    }
}

impl MetricsSink for MemorySink {
    fn set_name(&mut self, name: &str) -> TrainResult<()> {
        self.events.push(SinkEvent::Name(name.to_string()));
        Ok(())
    }

    fn log_parameters(&mut self, params: &ParamMap) -> TrainResult<()> {
        self.events.push(SinkEvent::Parameters(params.clone()));
        Ok(())
    }

    fn log_metric(&mut self, name: &str, value: f64, step: usize) -> TrainResult<()> {
        self.events.push(SinkEvent::Metric {
            name: name.to_string(),
            value,
            step,
        });
        Ok(())
    }

    fn log_summary(&mut self, summary: &RunSummary) -> TrainResult<()> {
        self.events.push(SinkEvent::Summary(summary.clone()));
        Ok(())
    }
}
