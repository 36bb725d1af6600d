//! # Performance Regression Pipeline
//!
//! `perfci` detects performance changes between two revisions of a project and
//! localizes their root cause. A run selects the tests affected by the diff,
//! measures them on both revisions and searches the call tree of every changed
//! test for the methods responsible.
//!
//! ## Features
//!
//! - Explicit state machine with structured progress events
//! - Local or remote workspaces behind one dispatch interface
//! - Histogram merging across runs with configuration-change detection
//! - Best-effort reading of test selection logs
//! - Idempotent root-cause scheduling with an optional worker pool
//!
//! ## Example
//!
//! ```no_run
//! use perfci::config::PipelineConfig;
//! use perfci::dispatch::LocalDispatcher;
//! use perfci::folders::ResultsFolders;
//! use perfci::pipeline::{LogSink, PipelineOrchestrator};
//! use perfci::types::VersionPair;
//! use perfci::worker::Worker;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::default();
//! let settings = config.validate()?;
//! let folders = ResultsFolders::new(Path::new("/var/perfci"), "app");
//! let worker = Worker::with_commands("/srv/app".into(), folders.clone(), &config.stages);
//! let dispatcher = Arc::new(LocalDispatcher::new(Arc::new(worker), settings.stage_timeout));
//!
//! let pair = VersionPair::new("2f1c3e7", "9a0b4d2")?;
//! let outcome = PipelineOrchestrator::new(settings, pair, folders, dispatcher, Arc::new(LogSink))
//!     .run_pipeline()
//!     .await;
//! println!("{:?}", outcome.status);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod folders;
pub mod pipeline;
pub mod rca;
pub mod stages;
pub mod types;
pub mod utils;
pub mod worker;

// Re-export main types for convenience
pub use config::{CauseSearchStrategy, MeasurementConfig, PipelineConfig};
pub use error::{ConfigurationError, PipelineError, RemoteExecutionError};
pub use pipeline::{OutcomeStatus, PipelineOrchestrator, PipelineOutcome};
pub use types::{Change, Changes, TestCase, VersionPair};
