use anyhow::Result;
use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::spawn_blocking;

use super::tree::CauseSearchResult;
use crate::config::{CauseSearchStrategy, IncludeFilter, MeasurementConfig};
use crate::folders::ResultsFolders;
use crate::stages::{CauseSearchConfig, CauseSearcher, CauseSearchers};
use crate::types::{Change, Changes, TestCase, VersionPair};
use crate::utils::write_json_atomic;

/// One change whose analysis raised an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFailure {
    pub test: TestCase,
    pub message: String,
}

/// Outcome of one scheduling run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleReport {
    pub analyzed: usize,
    /// Changes whose cause tree already existed
    pub skipped: usize,
    /// Changes rejected by the include filter
    pub excluded: usize,
    pub failures: Vec<AnalysisFailure>,
}

impl ScheduleReport {
    pub fn attempted(&self) -> usize {
        self.analyzed + self.skipped + self.failures.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Runs a cause search for every change of a version pair that has no cause tree yet.
///
/// The existence of `rca-tree/<current>/<ShortClass>/<method>.json` is the only marker
/// of a finished analysis, so rerunning the scheduler after an interruption only
/// analyzes what is missing. Up to `workers` searches run at the same time.
pub struct ChangeCauseScheduler {
    folders: ResultsFolders,
    pair: VersionPair,
    includes: IncludeFilter,
    measurement: MeasurementConfig,
    searchers: CauseSearchers,
    workers: usize,
}

impl ChangeCauseScheduler {
    pub fn new(
        folders: ResultsFolders,
        pair: VersionPair,
        includes: IncludeFilter,
        measurement: MeasurementConfig,
        searchers: CauseSearchers,
    ) -> Self {
        Self {
            folders,
            pair,
            includes,
            measurement,
            searchers,
            workers: 1,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub async fn schedule(&self, changes: &Changes, strategy: CauseSearchStrategy) -> ScheduleReport {
        let searcher = self.searchers.searcher(strategy);
        let config = Arc::new(CauseSearchConfig {
            pair: self.pair.clone(),
            measurement: self.measurement.clone(),
            strategy,
        });

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let analyzed = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let mut report = ScheduleReport::default();
        let mut scheduled = HashSet::new();
        let mut handles = Vec::new();

        for (test, change) in changes.iter_changes() {
            if !self.includes.includes(&test) {
                info!("Skipping {} since it is not included", test);
                report.excluded += 1;
                continue;
            }

            let expected = self.folders.cause_tree_file(&self.pair, &test);
            if expected.exists() || !scheduled.insert(expected.clone()) {
                info!("Skipping {} since {} exists", test, expected.display());
                report.skipped += 1;
                continue;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    lock_failures(&failures).push(AnalysisFailure {
                        test,
                        message: format!("failed to acquire worker slot: {}", e),
                    });
                    continue;
                }
            };

            let searcher = searcher.clone();
            let config = config.clone();
            let change = change.clone();
            let analyzed = analyzed.clone();
            let failures = failures.clone();
            let test_for_join = test.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let item_test = test.clone();
                let result =
                    spawn_blocking(move || analyze_change(searcher.as_ref(), &item_test, &change, &config, &expected))
                        .await;
                match result {
                    Ok(Ok(())) => {
                        analyzed.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(Err(e)) => {
                        error!("Root cause analysis of {} failed: {:#}", test, e);
                        lock_failures(&failures).push(AnalysisFailure {
                            test,
                            message: format!("{:#}", e),
                        });
                    }
                    Err(e) => {
                        error!("Root cause analysis of {} aborted: {}", test, e);
                        lock_failures(&failures).push(AnalysisFailure {
                            test,
                            message: e.to_string(),
                        });
                    }
                }
            });
            handles.push((test_for_join, handle));
        }

        for (test, handle) in handles {
            if let Err(e) = handle.await {
                warn!("Task join error for {}: {}", test, e);
                lock_failures(&failures).push(AnalysisFailure {
                    test,
                    message: e.to_string(),
                });
            }
        }

        report.analyzed = analyzed.load(Ordering::SeqCst);
        report.failures = std::mem::take(&mut *lock_failures(&failures));
        report.failures.sort_by(|a, b| a.test.cmp(&b.test));
        info!(
            "Root cause analysis finished: {} analyzed, {} skipped, {} excluded, {} failed",
            report.analyzed,
            report.skipped,
            report.excluded,
            report.failures.len()
        );
        report
    }
}

fn lock_failures(failures: &Mutex<Vec<AnalysisFailure>>) -> std::sync::MutexGuard<'_, Vec<AnalysisFailure>> {
    // a panicking search is already reported through its join error
    failures.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn analyze_change(
    searcher: &dyn CauseSearcher,
    test: &TestCase,
    change: &Change,
    config: &CauseSearchConfig,
    expected: &std::path::Path,
) -> Result<()> {
    info!("Analyzing {} with {} strategy", test, config.strategy);
    let tree = searcher.search(test, change, config)?;
    let result = CauseSearchResult {
        pair: config.pair.clone(),
        test: test.clone(),
        change: change.clone(),
        strategy: config.strategy,
        finished_at: Utc::now(),
        causes: tree.causes(),
        tree,
    };
    write_json_atomic(expected, &result)
}
