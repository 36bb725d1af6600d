//! Error types for configuration, dispatch and pipeline failures.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Invalid input detected before any stage runs.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("version {0} equals the old version; please check your configuration")]
    IdenticalRevisions(String),

    #[error("revision identifiers must not be empty")]
    EmptyRevision,

    #[error("the version difference should be at least 1, but was {0}")]
    NonPositiveVersionDiff(i64),

    #[error("if nightly build is set, do not set a version difference (was {0})")]
    NightlyWithVersionDiff(i64),

    #[error("aggregation may only be used with source instrumentation")]
    AggregationWithoutSourceInstrumentation,

    #[error("if only the workload is measured, repetitions should be 1, but are {0}")]
    OnlyMeasureWorkloadRepetitions(u32),

    #[error("includes must have the form package.Class#method or package.Class#*; problems: {0}")]
    InvalidIncludes(String),

    #[error("invalid test case {0:?}, expected Class#method")]
    InvalidTestCase(String),

    #[error("root cause strategy {0} is not implemented")]
    UnsupportedStrategy(String),

    #[error("{name} must be positive")]
    NonPositive { name: &'static str },

    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure to run a unit of work in its workspace.
#[derive(Debug, Error)]
pub enum RemoteExecutionError {
    #[error("work unit {unit} did not finish within {timeout:?}")]
    Timeout { unit: String, timeout: Duration },

    #[error("lost connection to workspace: {0}")]
    Connection(#[from] io::Error),

    #[error("workspace reported an error: {0}")]
    Remote(String),

    #[error("failed to (de)serialize work unit: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("workspace answered {actual} to a {expected} request")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("failed to copy artifacts from {from}: {message}")]
    Artifacts { from: PathBuf, message: String },
}

/// Terminal error of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    RemoteExecution(#[from] RemoteExecutionError),

    #[error("stage {stage} failed: {reason}")]
    StageFailure { stage: &'static str, reason: String },

    #[error("failed to read results: {0}")]
    Results(#[from] anyhow::Error),
}
