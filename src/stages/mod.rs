//! # Stage interfaces
//!
//! The pipeline drives three external stages. Test selection and measurement write
//! their artifacts into the workspace's result tree; cause searchers return a tree that
//! the scheduler persists.

pub mod command;

use anyhow::Result;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{CauseSearchStrategy, MeasurementConfig};
use crate::folders::ResultsFolders;
use crate::rca::tree::CauseNode;
use crate::rca::{CompleteSearcher, LevelWiseSearcher, NodeMeasurer};
use crate::types::{Change, TestCase, VersionPair};

pub use command::{CommandMeasurement, CommandNodeMeasurer, CommandTestSelection};

/// Where a stage works: the project checkout and the result tree of one revision pair.
#[derive(Clone, Debug)]
pub struct Workspace {
    pub project_dir: PathBuf,
    pub folders: ResultsFolders,
    pub pair: VersionPair,
}

/// Settings of one root-cause search.
#[derive(Clone, Debug)]
pub struct CauseSearchConfig {
    pub pair: VersionPair,
    pub measurement: MeasurementConfig,
    pub strategy: CauseSearchStrategy,
}

/// Regression test selection: the tests possibly affected by the diff.
pub trait TestSelectionStage: Send + Sync {
    fn run(&self, config: &MeasurementConfig, workspace: &Workspace) -> Result<BTreeSet<TestCase>>;
}

/// Measures the selected tests on both revisions.
///
/// Returns `false` when the measurement did not produce usable results.
pub trait MeasurementStage: Send + Sync {
    fn run(
        &self,
        config: &MeasurementConfig,
        tests: &BTreeSet<TestCase>,
        workspace: &Workspace,
    ) -> Result<bool>;
}

/// Localizes the cause of one change in the call tree of its test.
pub trait CauseSearcher: Send + Sync {
    fn search(&self, test: &TestCase, change: &Change, config: &CauseSearchConfig) -> Result<CauseNode>;
}

/// The two cause-search variants; one of them is chosen per scheduling run.
#[derive(Clone)]
pub struct CauseSearchers {
    pub complete: Arc<dyn CauseSearcher>,
    pub level_wise: Arc<dyn CauseSearcher>,
}

impl CauseSearchers {
    /// Use the built-in search strategies on top of one node measurer
    pub fn from_node_measurer(measurer: Arc<dyn NodeMeasurer>) -> Self {
        Self {
            complete: Arc::new(CompleteSearcher::new(measurer.clone())),
            level_wise: Arc::new(LevelWiseSearcher::new(measurer)),
        }
    }

    pub fn searcher(&self, strategy: CauseSearchStrategy) -> Arc<dyn CauseSearcher> {
        match strategy {
            CauseSearchStrategy::Complete => self.complete.clone(),
            CauseSearchStrategy::LevelWise => self.level_wise.clone(),
        }
    }
}

/// The collaborators a worker executes stages with.
#[derive(Clone)]
pub struct Stages {
    pub test_selection: Arc<dyn TestSelectionStage>,
    pub measurement: Arc<dyn MeasurementStage>,
    pub searchers: CauseSearchers,
}
