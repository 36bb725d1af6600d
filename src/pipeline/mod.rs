//! # Pipeline orchestration
//!
//! [`PipelineOrchestrator`] drives one revision pair through
//! `SELECT_TESTS → MEASURE → ROOT_CAUSE → DONE`. Every stage is dispatched to a
//! workspace and its artifacts are collected before the next stage starts. Any
//! error ends the run in `FAILED`; stages are never retried here.

pub mod progress;

pub use progress::{CollectingSink, JsonLinesSink, LogSink, PipelineState, ProgressEvent, ProgressSink};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::analysis::{read_changes, read_statistics, HistogramReader, RtsLogReader, LOG_NOT_LOADED};
use crate::config::RunSettings;
use crate::dispatch::{self, Dispatcher, WorkRequest};
use crate::error::PipelineError;
use crate::folders::ResultsFolders;
use crate::rca::ScheduleReport;
use crate::types::{Changes, TestCase, VersionPair};
use crate::utils::SampleSummary;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Success,
    /// Finished, but some cause searches failed
    PartialSuccess,
    NoTestsSelected,
    Failed,
}

impl OutcomeStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            OutcomeStatus::Success | OutcomeStatus::NoTestsSelected => 0,
            OutcomeStatus::PartialSuccess => 2,
            OutcomeStatus::Failed => 1,
        }
    }
}

/// Structured result of [`PipelineOrchestrator::run_pipeline`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub status: OutcomeStatus,
    pub final_state: PipelineState,
    pub pair: VersionPair,
    pub selected_tests: usize,
    pub measured_tests: usize,
    pub changes: usize,
    pub configuration_updated: bool,
    pub summaries: BTreeMap<String, SampleSummary>,
    pub report: Option<ScheduleReport>,
    pub error: Option<String>,
}

impl PipelineOutcome {
    fn new(pair: VersionPair) -> Self {
        Self {
            status: OutcomeStatus::Success,
            final_state: PipelineState::SelectTests,
            pair,
            selected_tests: 0,
            measured_tests: 0,
            changes: 0,
            configuration_updated: false,
            summaries: BTreeMap::new(),
            report: None,
            error: None,
        }
    }
}

pub struct PipelineOrchestrator {
    settings: RunSettings,
    pair: VersionPair,
    folders: ResultsFolders,
    dispatcher: Arc<dyn Dispatcher>,
    sink: Arc<dyn ProgressSink>,
}

impl PipelineOrchestrator {
    /// `folders` is the local result tree artifacts are collected into
    pub fn new(
        settings: RunSettings,
        pair: VersionPair,
        folders: ResultsFolders,
        dispatcher: Arc<dyn Dispatcher>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            settings,
            pair,
            folders,
            dispatcher,
            sink,
        }
    }

    pub async fn run_pipeline(self) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::new(self.pair.clone());
        info!("Starting pipeline for {}", self.pair);

        if let Err(e) = self.drive(&mut outcome).await {
            error!("Pipeline failed in {:?}: {}", outcome.final_state, e);
            self.emit(
                outcome.final_state,
                PipelineState::Failed,
                json!({ "pair": self.pair.to_string() }),
                json!({ "error": e.to_string() }),
            );
            outcome.status = OutcomeStatus::Failed;
            outcome.final_state = PipelineState::Failed;
            outcome.error = Some(e.to_string());
        }

        info!("Pipeline for {} finished: {:?}", self.pair, outcome.status);
        outcome
    }

    async fn drive(&self, outcome: &mut PipelineOutcome) -> Result<(), PipelineError> {
        outcome.final_state = PipelineState::SelectTests;
        let tests = self.select_tests().await?;
        outcome.selected_tests = tests.len();
        if tests.is_empty() {
            info!("No tests selected, nothing to measure");
            outcome.status = OutcomeStatus::NoTestsSelected;
            outcome.final_state = PipelineState::Done;
            return Ok(());
        }

        outcome.final_state = PipelineState::Measure;
        let (summaries, configuration_updated, changes) = self.measure(&tests).await?;
        outcome.measured_tests = summaries.len();
        outcome.summaries = summaries;
        outcome.configuration_updated = configuration_updated;
        outcome.changes = changes.len();

        if self.settings.execute_rca && !changes.is_empty() {
            outcome.final_state = PipelineState::RootCause;
            let report = self.root_cause(&changes).await?;
            if report.has_failures() {
                outcome.status = OutcomeStatus::PartialSuccess;
            }
            outcome.report = Some(report);
        }

        outcome.final_state = PipelineState::Done;
        Ok(())
    }

    async fn select_tests(&self) -> Result<BTreeSet<TestCase>, PipelineError> {
        let dispatcher = self.dispatcher.as_ref();
        let tests = dispatch::select_tests(dispatcher, &self.pair, &self.settings.measurement).await?;
        let copied = dispatcher.collect_artifacts(&self.pair, &self.folders).await?;

        let logs = RtsLogReader::new(self.folders.clone(), self.pair.clone());
        let process_success = logs.process_success();
        let mut logged_runs = BTreeMap::new();
        if logs.is_logs_existing() {
            for (version, marker) in logs.find_process_success_runs() {
                info!("Test selection marker of {}: {}", version, marker.display());
            }
            for version in [self.pair.current(), self.pair.old()] {
                logged_runs.insert(version.to_string(), logs.rts_vm_runs(version).len());
            }
        } else {
            warn!("No test selection logs for {}", self.pair);
        }

        let next = if tests.is_empty() {
            PipelineState::Done
        } else {
            PipelineState::Measure
        };
        self.emit(
            PipelineState::SelectTests,
            next,
            json!({ "pair": self.pair.to_string() }),
            json!({
                "tests": tests.iter().map(TestCase::qualified_name).collect::<Vec<_>>(),
                "collectedFiles": copied,
                "processSuccess": process_success,
                "rtsLogLoaded": logs.rts_log() != LOG_NOT_LOADED,
                "loggedRuns": logged_runs,
            }),
        );
        Ok(tests)
    }

    async fn measure(
        &self,
        tests: &BTreeSet<TestCase>,
    ) -> Result<(BTreeMap<String, SampleSummary>, bool, Changes), PipelineError> {
        let dispatcher = self.dispatcher.as_ref();
        let success = dispatch::measure(dispatcher, &self.pair, &self.settings.measurement, tests).await?;
        if !success {
            return Err(PipelineError::StageFailure {
                stage: "measure",
                reason: "measurement stage reported no usable result".to_string(),
            });
        }
        let copied = dispatcher.collect_artifacts(&self.pair, &self.folders).await?;

        let mut reader = HistogramReader::new(
            self.settings.measurement.clone(),
            self.folders.clone(),
            self.pair.clone(),
        );
        let measurements = reader.read_measurements()?;
        reader.persist(&measurements)?;
        if reader.measurement_configuration_updated() {
            for test in reader.updated_configurations().keys() {
                warn!("Measurement configuration of {} changed, old samples discarded", test);
            }
        }

        let changes = read_changes(&self.folders, &self.pair)?.version(&self.pair);
        let statistics = read_statistics(&self.folders, &self.pair)?;
        let summaries: BTreeMap<String, SampleSummary> = measurements
            .iter()
            .map(|(test, values)| (test.qualified_name().to_string(), values.summary()))
            .collect();

        let next = if self.settings.execute_rca && !changes.is_empty() {
            PipelineState::RootCause
        } else {
            PipelineState::Done
        };
        self.emit(
            PipelineState::Measure,
            next,
            json!({ "tests": tests.len() }),
            json!({
                "collectedFiles": copied,
                "histograms": summaries,
                "configurationUpdated": reader.measurement_configuration_updated(),
                "changes": changes.len(),
                "statistics": statistics
                    .statistics
                    .get(&self.pair.key())
                    .map(BTreeMap::len)
                    .unwrap_or(0),
            }),
        );
        Ok((summaries, reader.measurement_configuration_updated(), changes))
    }

    async fn root_cause(&self, changes: &Changes) -> Result<ScheduleReport, PipelineError> {
        let dispatcher = self.dispatcher.as_ref();
        let request = WorkRequest::SearchCauses {
            pair: self.pair.clone(),
            config: self.settings.measurement.clone(),
            changes: changes.clone(),
            strategy: self.settings.strategy,
            includes: self.settings.includes.clone(),
            workers: self.settings.rca_workers,
        };
        let report = dispatch::search_causes(dispatcher, request).await?;
        let copied = dispatcher.collect_artifacts(&self.pair, &self.folders).await?;

        for failure in &report.failures {
            warn!("Root cause analysis of {} failed: {}", failure.test, failure.message);
        }
        self.emit(
            PipelineState::RootCause,
            PipelineState::Done,
            json!({
                "changes": changes.len(),
                "strategy": self.settings.strategy,
            }),
            json!({
                "collectedFiles": copied,
                "report": report,
            }),
        );
        Ok(report)
    }

    fn emit(&self, stage: PipelineState, next: PipelineState, inputs: Value, outcome: Value) {
        self.sink
            .record(&ProgressEvent::new(stage, next, inputs, outcome));
    }
}
