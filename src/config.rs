//! # Configuration
//!
//! [`PipelineConfig`] is what a user writes (JSON file and CLI flags). Validating it
//! yields [`RunSettings`], the immutable snapshot one pipeline run works with.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::types::TestCase;

/// How the measurement stage schedules the VMs of both revisions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeasurementStrategy {
    #[default]
    Sequential,
    Parallel,
}

/// Instrumentation used while measuring call trees.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentationConfig {
    pub use_source_instrumentation: bool,
    pub use_selective_instrumentation: bool,
    pub use_aggregation: bool,
}

/// The tunables that decide whether two measurements are statistically comparable.
///
/// A copy of this struct is stored next to every histogram so later runs can tell
/// whether they may extend the stored samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeasurementConfig {
    pub vms: u32,
    pub iterations: u32,
    pub warmup: u32,
    pub repetitions: u32,
    pub significance_level: f64,
    pub use_gc: bool,
    pub early_stop: bool,
    pub measurement_strategy: MeasurementStrategy,
    pub instrumentation: InstrumentationConfig,
    pub only_measure_workload: bool,
    pub execute_before_class_in_measurement: bool,
    pub redirect_to_null: bool,
    pub show_start: bool,
    pub redirect_subprocess_output_to_file: bool,
    pub timeout_ms: u64,
    pub test_goal: Option<String>,
    pub pl: Option<String>,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            vms: 30,
            iterations: 10,
            warmup: 10,
            repetitions: 1000,
            significance_level: 0.01,
            use_gc: false,
            early_stop: false,
            measurement_strategy: MeasurementStrategy::Sequential,
            instrumentation: InstrumentationConfig::default(),
            only_measure_workload: false,
            execute_before_class_in_measurement: false,
            redirect_to_null: true,
            show_start: false,
            redirect_subprocess_output_to_file: true,
            timeout_ms: 5 * 60 * 1000,
            test_goal: None,
            pl: None,
        }
    }
}

impl MeasurementConfig {
    /// Samples of two configs may be pooled only if the distribution shape is the same:
    /// iterations, repetitions and GC forcing must match.
    pub fn is_compatible_with(&self, other: &MeasurementConfig) -> bool {
        self.iterations == other.iterations
            && self.repetitions == other.repetitions
            && self.use_gc == other.use_gc
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Root-cause search strategy.
///
/// Only implemented strategies exist as variants; any other name fails when the
/// configuration is loaded.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CauseSearchStrategy {
    /// Measure every node of both call trees at once
    Complete,
    /// Measure the tree level by level, descending only below changed nodes
    #[default]
    LevelWise,
}

impl FromStr for CauseSearchStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "COMPLETE" => Ok(CauseSearchStrategy::Complete),
            "LEVELWISE" | "LEVEL_WISE" => Ok(CauseSearchStrategy::LevelWise),
            _ => Err(ConfigurationError::UnsupportedStrategy(s.to_string())),
        }
    }
}

impl TryFrom<String> for CauseSearchStrategy {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CauseSearchStrategy> for String {
    fn from(strategy: CauseSearchStrategy) -> Self {
        strategy.to_string()
    }
}

impl fmt::Display for CauseSearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CauseSearchStrategy::Complete => f.write_str("COMPLETE"),
            CauseSearchStrategy::LevelWise => f.write_str("LEVELWISE"),
        }
    }
}

/// Wildcard patterns of the form `package.Class#method`; `*` matches anything.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IncludeFilter {
    source: String,
    patterns: Vec<Regex>,
}

impl TryFrom<String> for IncludeFilter {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        IncludeFilter::parse(&value)
    }
}

impl From<IncludeFilter> for String {
    fn from(filter: IncludeFilter) -> Self {
        filter.source
    }
}

impl IncludeFilter {
    /// Parse a `;`-separated include list. Spaces are ignored and every entry must
    /// name a method with `#`.
    pub fn parse(includes: &str) -> Result<Self, ConfigurationError> {
        let cleaned: String = includes.chars().filter(|c| !c.is_whitespace()).collect();
        let mut patterns = Vec::new();
        let mut problems = Vec::new();
        for include in cleaned.split(';').filter(|s| !s.is_empty()) {
            if !include.contains('#') {
                problems.push(format!("{} does not contain #", include));
                continue;
            }
            let expression = include
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            match Regex::new(&format!("^{}$", expression)) {
                Ok(regex) => patterns.push(regex),
                Err(e) => problems.push(format!("{}: {}", include, e)),
            }
        }
        if !problems.is_empty() {
            return Err(ConfigurationError::InvalidIncludes(problems.join("; ")));
        }
        Ok(Self {
            source: includes.to_string(),
            patterns,
        })
    }

    /// An empty filter includes every test.
    pub fn includes(&self, test: &TestCase) -> bool {
        self.patterns.is_empty()
            || self
                .patterns
                .iter()
                .any(|p| p.is_match(test.qualified_name()))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// External programs backing the stages when the pipeline runs from the command line.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageCommands {
    /// Writes the selected tests as a JSON list to `$PERFCI_OUTPUT`
    pub test_selection: Vec<String>,
    /// Writes histogram runs, `changes.json` and `statistics.json`; exit code 0 means success
    pub measurement: Vec<String>,
    /// Prints the call tree of `$PERFCI_TEST` as JSON
    pub call_tree: Vec<String>,
    /// Reads call paths from stdin and prints the changed ones as a JSON list
    pub node_measurement: Vec<String>,
}

/// User-facing configuration, loaded from JSON and overridden by CLI flags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub vms: u32,
    pub iterations: u32,
    pub warmup: u32,
    pub repetitions: u32,
    /// Minutes per VM before a measurement is aborted
    pub timeout_minutes: u64,
    pub significance_level: f64,
    pub use_gc: bool,
    pub redirect_to_null: bool,
    pub show_start: bool,
    pub nightly_build: bool,
    pub version_diff: i64,
    pub includes: String,
    pub execute_rca: bool,
    pub rca_strategy: CauseSearchStrategy,
    pub execute_parallel: bool,
    /// Number of cause searches run at the same time; 1 keeps them sequential, 0 picks
    /// a count from the available CPUs
    pub rca_workers: usize,
    pub execute_before_class_in_measurement: bool,
    pub only_measure_workload: bool,
    pub use_source_instrumentation: bool,
    pub use_aggregation: bool,
    pub redirect_subprocess_output_to_file: bool,
    pub test_goal: String,
    pub pl: String,
    /// Upper bound for a whole dispatched stage
    pub stage_timeout_minutes: u64,
    pub stages: StageCommands,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vms: 30,
            iterations: 10,
            warmup: 10,
            repetitions: 1000,
            timeout_minutes: 5,
            significance_level: 0.01,
            use_gc: false,
            redirect_to_null: true,
            show_start: false,
            nightly_build: true,
            version_diff: 1,
            includes: String::new(),
            execute_rca: true,
            rca_strategy: CauseSearchStrategy::LevelWise,
            execute_parallel: false,
            rca_workers: 1,
            execute_before_class_in_measurement: false,
            only_measure_workload: false,
            use_source_instrumentation: true,
            use_aggregation: true,
            redirect_subprocess_output_to_file: true,
            test_goal: "test".to_string(),
            pl: String::new(),
            stage_timeout_minutes: 24 * 60,
            stages: StageCommands::default(),
        }
    }
}

/// Validated snapshot of everything one pipeline run needs.
#[derive(Clone, Debug)]
pub struct RunSettings {
    pub measurement: MeasurementConfig,
    pub includes: IncludeFilter,
    pub execute_rca: bool,
    pub strategy: CauseSearchStrategy,
    pub rca_workers: usize,
    pub stage_timeout: Duration,
}

/// Use 75% of the CPUs, a cause search spawns measurement processes of its own
fn optimal_worker_count() -> usize {
    (num_cpus::get() * 3 / 4).max(1)
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigurationError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Symbolic revisions to compare. `None` for the old revision means "last nightly".
    pub fn revision_spec(&self) -> (String, Option<String>) {
        let old = if self.nightly_build {
            None
        } else {
            Some(format!("HEAD~{}", self.version_diff))
        };
        ("HEAD".to_string(), old)
    }

    /// Check every constraint and build the run snapshot.
    pub fn validate(&self) -> Result<RunSettings, ConfigurationError> {
        if self.version_diff <= 0 {
            return Err(ConfigurationError::NonPositiveVersionDiff(self.version_diff));
        }
        if self.nightly_build && self.version_diff != 1 {
            return Err(ConfigurationError::NightlyWithVersionDiff(self.version_diff));
        }
        if self.use_aggregation && !self.use_source_instrumentation {
            return Err(ConfigurationError::AggregationWithoutSourceInstrumentation);
        }
        if self.only_measure_workload && self.repetitions != 1 {
            return Err(ConfigurationError::OnlyMeasureWorkloadRepetitions(
                self.repetitions,
            ));
        }
        for (name, value) in [
            ("vms", self.vms),
            ("iterations", self.iterations),
            ("repetitions", self.repetitions),
        ] {
            if value == 0 {
                return Err(ConfigurationError::NonPositive { name });
            }
        }

        let includes = IncludeFilter::parse(&self.includes)?;
        Ok(RunSettings {
            measurement: self.measurement_config(),
            includes,
            execute_rca: self.execute_rca,
            strategy: self.rca_strategy,
            rca_workers: if self.rca_workers == 0 {
                optimal_worker_count()
            } else {
                self.rca_workers
            },
            stage_timeout: Duration::from_secs(self.stage_timeout_minutes * 60),
        })
    }

    fn measurement_config(&self) -> MeasurementConfig {
        let significance_level = if self.significance_level == 0.0 {
            0.01
        } else {
            self.significance_level
        };
        let instrumentation = InstrumentationConfig {
            use_source_instrumentation: self.use_source_instrumentation,
            use_selective_instrumentation: self.use_source_instrumentation,
            use_aggregation: self.use_source_instrumentation && self.use_aggregation,
        };
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        MeasurementConfig {
            vms: self.vms,
            iterations: self.iterations,
            warmup: self.warmup,
            repetitions: self.repetitions,
            significance_level,
            use_gc: self.use_gc,
            early_stop: false,
            measurement_strategy: if self.execute_parallel {
                MeasurementStrategy::Parallel
            } else {
                MeasurementStrategy::Sequential
            },
            instrumentation,
            only_measure_workload: self.only_measure_workload,
            execute_before_class_in_measurement: self.execute_before_class_in_measurement,
            redirect_to_null: self.redirect_to_null,
            show_start: self.show_start,
            redirect_subprocess_output_to_file: self.redirect_subprocess_output_to_file,
            timeout_ms: self.timeout_minutes * 60 * 1000,
            test_goal: non_empty(&self.test_goal),
            pl: non_empty(&self.pl),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let settings = PipelineConfig::default().validate().unwrap();
        assert_eq!(settings.strategy, CauseSearchStrategy::LevelWise);
        assert_eq!(settings.measurement.timeout(), Duration::from_secs(300));
        assert!(settings.includes.is_empty());
        assert_eq!(settings.rca_workers, 1);
    }

    #[test]
    fn zero_workers_uses_available_cpus() {
        let config = PipelineConfig {
            rca_workers: 0,
            ..Default::default()
        };
        assert!(config.validate().unwrap().rca_workers >= 1);
    }

    #[test]
    fn rejects_aggregation_without_source_instrumentation() {
        let config = PipelineConfig {
            use_source_instrumentation: false,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::AggregationWithoutSourceInstrumentation)
        ));
    }

    #[test]
    fn rejects_workload_only_with_repetitions() {
        let config = PipelineConfig {
            only_measure_workload: true,
            repetitions: 5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::OnlyMeasureWorkloadRepetitions(5))
        ));
    }

    #[test]
    fn rejects_bad_version_distance() {
        let config = PipelineConfig {
            nightly_build: false,
            version_diff: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let nightly = PipelineConfig {
            version_diff: 3,
            ..Default::default()
        };
        assert!(matches!(
            nightly.validate(),
            Err(ConfigurationError::NightlyWithVersionDiff(3))
        ));
    }

    #[test]
    fn revision_spec_follows_nightly_flag() {
        let config = PipelineConfig {
            nightly_build: false,
            version_diff: 2,
            ..Default::default()
        };
        assert_eq!(
            config.revision_spec(),
            ("HEAD".to_string(), Some("HEAD~2".to_string()))
        );
        assert_eq!(PipelineConfig::default().revision_spec().1, None);
    }

    #[test]
    fn include_patterns() {
        let filter = IncludeFilter::parse("de.test.CalleeTest#*; de.other.Test#run").unwrap();
        assert!(filter.includes(&TestCase::new("de.test.CalleeTest", "onlyCallMethod1")));
        assert!(filter.includes(&TestCase::new("de.other.Test", "run")));
        assert!(!filter.includes(&TestCase::new("de.other.Test", "runAll")));
        assert!(!filter.includes(&TestCase::new("deXtest.CalleeTest", "m")));

        let err = IncludeFilter::parse("de.test.CalleeTest").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidIncludes(_)));
    }

    #[test]
    fn unimplemented_strategies_fail_on_load() {
        assert!("UNTIL_SOURCE_CHANGE".parse::<CauseSearchStrategy>().is_err());
        assert_eq!(
            "complete".parse::<CauseSearchStrategy>().unwrap(),
            CauseSearchStrategy::Complete
        );

        let json = r#"{"rcaStrategy":"CONSTANT_LEVELS"}"#;
        assert!(serde_json::from_str::<PipelineConfig>(json).is_err());
    }

    #[test]
    fn compatibility_ignores_warmup_and_vms() {
        let a = MeasurementConfig::default();
        let b = MeasurementConfig {
            warmup: 0,
            vms: 2,
            ..Default::default()
        };
        let c = MeasurementConfig {
            iterations: 3,
            ..Default::default()
        };
        assert!(a.is_compatible_with(&b));
        assert!(!a.is_compatible_with(&c));
    }
}
