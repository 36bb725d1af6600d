//! Reading and merging per-test duration samples of a revision pair.
//!
//! The measurement stage drops one file per run into `histogram/<Class#method>/`.
//! [`HistogramReader`] folds those runs into the accumulated histogram stored at
//! `histogram/<Class#method>.json`, as long as the stored samples were measured with
//! a compatible configuration.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::MeasurementConfig;
use crate::folders::ResultsFolders;
use crate::types::{TestCase, VersionPair};
use crate::utils::{summarize, write_json_atomic, SampleSummary};

/// Samples of one measurement run of one test, as written by the measurement stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistogramRun {
    pub config: MeasurementConfig,
    pub before: Vec<f64>,
    pub current: Vec<f64>,
}

/// Accumulated "before" and "current" samples of one test.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistogramValues {
    /// Configuration all samples were measured with
    pub config: MeasurementConfig,
    /// Durations on the old revision, in arrival order
    pub before: Vec<f64>,
    /// Durations on the current revision, in arrival order
    pub current: Vec<f64>,
    /// Ids of the runs already folded into the samples
    #[serde(default)]
    pub runs: BTreeSet<String>,
}

impl HistogramValues {
    fn empty(config: MeasurementConfig) -> Self {
        Self {
            config,
            before: Vec::new(),
            current: Vec::new(),
            runs: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.current.is_empty()
    }

    pub fn values_before_readable(&self) -> String {
        join_samples(&self.before)
    }

    pub fn values_current_readable(&self) -> String {
        join_samples(&self.current)
    }

    pub fn summary(&self) -> SampleSummary {
        summarize(&self.before, &self.current)
    }
}

fn join_samples(samples: &[f64]) -> String {
    samples
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Builds the up-to-date histogram view of one revision pair.
pub struct HistogramReader {
    config: MeasurementConfig,
    folders: ResultsFolders,
    pair: VersionPair,
    updated_configurations: BTreeMap<TestCase, MeasurementConfig>,
}

impl HistogramReader {
    pub fn new(config: MeasurementConfig, folders: ResultsFolders, pair: VersionPair) -> Self {
        Self {
            config,
            folders,
            pair,
            updated_configurations: BTreeMap::new(),
        }
    }

    /// Merge stored histograms with fresh runs.
    ///
    /// Tests without any samples get no entry: absent means "not measured yet", which is
    /// different from "measured without difference".
    pub fn read_measurements(&mut self) -> Result<BTreeMap<TestCase, HistogramValues>> {
        self.updated_configurations.clear();
        let mut measurements = BTreeMap::new();

        for test in self.find_tests()? {
            match self.read_test(&test) {
                Ok(Some(values)) => {
                    debug!(
                        "{}: before [{}], current [{}]",
                        test,
                        values.values_before_readable(),
                        values.values_current_readable()
                    );
                    measurements.insert(test, values);
                }
                Ok(None) => debug!("No samples for {}", test),
                Err(e) => warn!("Skipping histogram of {}: {:#}", test, e),
            }
        }

        info!(
            "Read histograms of {} tests for {}, {} with updated configuration",
            measurements.len(),
            self.pair,
            self.updated_configurations.len()
        );
        Ok(measurements)
    }

    /// Whether a stored histogram was measured with an incompatible configuration
    pub fn measurement_configuration_updated(&self) -> bool {
        !self.updated_configurations.is_empty()
    }

    /// The stale stored configurations, by test
    pub fn updated_configurations(&self) -> &BTreeMap<TestCase, MeasurementConfig> {
        &self.updated_configurations
    }

    /// Store merged histograms so the next run extends them; returns the files written.
    pub fn persist(&self, measurements: &BTreeMap<TestCase, HistogramValues>) -> Result<usize> {
        for (test, values) in measurements {
            write_json_atomic(&self.folders.histogram_file(&self.pair, test), values)?;
        }
        Ok(measurements.len())
    }

    fn find_tests(&self) -> Result<BTreeSet<TestCase>> {
        let dir = self.folders.histogram_dir(&self.pair);
        let mut tests = BTreeSet::new();
        if !dir.is_dir() {
            debug!("No histogram folder {}", dir.display());
            return Ok(tests);
        }

        for entry in fs::read_dir(&dir).with_context(|| format!("failed to list {}", dir.display()))? {
            let path = entry?.path();
            let name = if path.is_dir() {
                path.file_name().and_then(|n| n.to_str())
            } else if path.extension().is_some_and(|ext| ext == "json") {
                path.file_stem().and_then(|n| n.to_str())
            } else {
                None
            };
            match name.map(str::parse::<TestCase>) {
                Some(Ok(test)) => {
                    tests.insert(test);
                }
                Some(Err(e)) => debug!("Ignoring {}: {}", path.display(), e),
                None => {}
            }
        }
        Ok(tests)
    }

    fn read_test(&mut self, test: &TestCase) -> Result<Option<HistogramValues>> {
        let stored_file = self.folders.histogram_file(&self.pair, test);
        let mut values = match read_non_empty::<HistogramValues>(&stored_file)? {
            Some(stored) if stored.config.is_compatible_with(&self.config) => HistogramValues {
                config: self.config.clone(),
                ..stored
            },
            Some(stored) => {
                info!(
                    "Configuration of {} changed (iterations {} -> {}, repetitions {} -> {}), discarding stored samples",
                    test,
                    stored.config.iterations,
                    self.config.iterations,
                    stored.config.repetitions,
                    self.config.repetitions
                );
                let mut fresh = HistogramValues::empty(self.config.clone());
                fresh.runs = stored.runs;
                self.updated_configurations.insert(test.clone(), stored.config);
                fresh
            }
            None => HistogramValues::empty(self.config.clone()),
        };

        for (run_id, path) in self.run_files(test)? {
            if values.runs.contains(&run_id) {
                continue;
            }
            let run = match read_non_empty::<HistogramRun>(&path) {
                Ok(Some(run)) => run,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Ignoring run {} of {}: {:#}", run_id, test, e);
                    continue;
                }
            };
            if !run.config.is_compatible_with(&self.config) {
                warn!(
                    "Run {} of {} was measured with a different configuration, ignoring it",
                    run_id, test
                );
                continue;
            }
            values.before.extend(run.before);
            values.current.extend(run.current);
            values.runs.insert(run_id);
        }

        Ok((!values.is_empty()).then_some(values))
    }

    /// Run files of one test, ordered by run id
    fn run_files(&self, test: &TestCase) -> Result<Vec<(String, PathBuf)>> {
        let dir = self.folders.histogram_runs_dir(&self.pair, test);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
                    runs.push((id.to_string(), path.clone()));
                }
            }
        }
        runs.sort();
        Ok(runs)
    }
}

fn read_non_empty<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value = serde_json::from_slice(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}
