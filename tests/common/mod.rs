#![allow(dead_code)]

use anyhow::{bail, Result};
use perfci::config::MeasurementConfig;
use perfci::rca::CauseNode;
use perfci::stages::{
    CauseSearchConfig, CauseSearcher, CauseSearchers, MeasurementStage, Stages, TestSelectionStage,
    Workspace,
};
use perfci::analysis::HistogramRun;
use perfci::types::{Change, ChangeDirection, ProjectChanges, TestCase};
use perfci::utils::write_json_atomic;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn test_case(name: &str) -> TestCase {
    name.parse().unwrap()
}

pub fn slower(method: &str) -> Change {
    Change {
        method: method.to_string(),
        direction: ChangeDirection::Slower,
        change_percent: 25.0,
        t_value: 4.2,
        old_time: 100.0,
    }
}

/// Returns a fixed selection and leaves process-success markers for both revisions.
pub struct FixedSelection {
    pub tests: BTreeSet<TestCase>,
}

impl TestSelectionStage for FixedSelection {
    fn run(&self, _config: &MeasurementConfig, workspace: &Workspace) -> Result<BTreeSet<TestCase>> {
        let pair = &workspace.pair;
        for version in [pair.current(), pair.old()] {
            std::fs::create_dir_all(workspace.folders.rts_version_dir(pair, version))?;
            std::fs::write(workspace.folders.process_success_file(pair, version), "BUILD SUCCESS")?;
        }
        std::fs::write(workspace.folders.rts_log_file(pair), "selected tests")?;
        Ok(self.tests.clone())
    }
}

/// Writes one histogram run per test and the given changes.
pub struct FakeMeasurement {
    pub changed: Vec<TestCase>,
    pub success: bool,
    pub delay: Option<Duration>,
    pub runs: AtomicUsize,
}

impl FakeMeasurement {
    pub fn new(changed: Vec<TestCase>) -> Self {
        Self {
            changed,
            success: true,
            delay: None,
            runs: AtomicUsize::new(0),
        }
    }

    /// Takes `delay` before writing its results
    pub fn slow(changed: Vec<TestCase>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(changed)
        }
    }

    pub fn failing() -> Self {
        Self {
            changed: Vec::new(),
            success: false,
            delay: None,
            runs: AtomicUsize::new(0),
        }
    }
}

impl MeasurementStage for FakeMeasurement {
    fn run(
        &self,
        config: &MeasurementConfig,
        tests: &BTreeSet<TestCase>,
        workspace: &Workspace,
    ) -> Result<bool> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if !self.success {
            return Ok(false);
        }
        let pair = &workspace.pair;
        for test in tests {
            let file = workspace
                .folders
                .histogram_runs_dir(pair, test)
                .join(format!("run-{}.json", run));
            let samples = HistogramRun {
                config: config.clone(),
                before: vec![100.0, 101.0, 99.0],
                current: vec![125.0, 126.0, 124.0],
            };
            write_json_atomic(&file, &samples)?;
        }

        let mut changes = ProjectChanges::default();
        for test in &self.changed {
            changes.add_change(pair, test.class(), slower(test.method()));
        }
        write_json_atomic(&workspace.folders.changes_file(pair), &changes)?;
        Ok(true)
    }
}

/// Records every searched test and fails for the configured ones.
#[derive(Default)]
pub struct RecordingSearcher {
    pub searched: Mutex<Vec<TestCase>>,
    pub failing: BTreeSet<TestCase>,
}

impl RecordingSearcher {
    pub fn failing_for(tests: &[&str]) -> Self {
        Self {
            searched: Mutex::new(Vec::new()),
            failing: tests.iter().map(|t| test_case(t)).collect(),
        }
    }

    pub fn searched(&self) -> Vec<TestCase> {
        let mut searched = self.searched.lock().unwrap().clone();
        searched.sort();
        searched
    }
}

impl CauseSearcher for RecordingSearcher {
    fn search(&self, test: &TestCase, _change: &Change, _config: &CauseSearchConfig) -> Result<CauseNode> {
        self.searched.lock().unwrap().push(test.clone());
        if self.failing.contains(test) {
            bail!("call tree of {} could not be measured", test);
        }
        Ok(CauseNode {
            call_path: test.qualified_name().to_string(),
            call: test.qualified_name().to_string(),
            measured: true,
            changed: true,
            children: Vec::new(),
        })
    }
}

/// Searchers for both strategies that must never be used.
pub struct UnusedSearcher;

impl CauseSearcher for UnusedSearcher {
    fn search(&self, test: &TestCase, _change: &Change, _config: &CauseSearchConfig) -> Result<CauseNode> {
        panic!("unexpected search of {}", test);
    }
}

/// Level-wise searches go to `searcher`, complete searches panic.
pub fn level_wise_only(searcher: Arc<RecordingSearcher>) -> CauseSearchers {
    CauseSearchers {
        complete: Arc::new(UnusedSearcher),
        level_wise: searcher,
    }
}

pub fn stages(
    selection: FixedSelection,
    measurement: Arc<FakeMeasurement>,
    searcher: Arc<RecordingSearcher>,
) -> Stages {
    Stages {
        test_selection: Arc::new(selection),
        measurement,
        searchers: level_wise_only(searcher),
    }
}
