//! # Common Types
//!
//! This module contains the value types shared by every stage of the pipeline:
//! test identities, revision pairs, and the change sets handed from the
//! measurement stage to the root-cause stage.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::ConfigurationError;

/// A single test method, identified by its fully-qualified class and method name.
///
/// Equality, hashing and ordering all work on the qualified `Class#method` string,
/// so two test cases are the same key exactly when their names match byte for byte.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TestCase {
    qualified: String,
    split: usize,
}

impl PartialEq for TestCase {
    fn eq(&self, other: &Self) -> bool {
        self.qualified == other.qualified
    }
}

impl Eq for TestCase {}

impl Hash for TestCase {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.qualified.hash(state);
    }
}

impl Ord for TestCase {
    fn cmp(&self, other: &Self) -> Ordering {
        self.qualified.cmp(&other.qualified)
    }
}

impl PartialOrd for TestCase {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TestCase {
    /// Build a test case from its class and method parts.
    pub fn new(class: &str, method: &str) -> Self {
        Self {
            qualified: format!("{}#{}", class, method),
            split: class.len(),
        }
    }

    /// The fully-qualified class name, e.g. `de.test.CalleeTest`
    pub fn class(&self) -> &str {
        &self.qualified[..self.split]
    }

    /// The method name, e.g. `onlyCallMethod1`
    pub fn method(&self) -> &str {
        &self.qualified[self.split + 1..]
    }

    /// The class name without its package, e.g. `CalleeTest`
    pub fn short_class(&self) -> &str {
        let class = self.class();
        class.rsplit('.').next().unwrap_or(class)
    }

    /// The `Class#method` form used as map key and file name
    pub fn qualified_name(&self) -> &str {
        &self.qualified
    }
}

impl FromStr for TestCase {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('#') {
            Some((class, method)) if !class.is_empty() && !method.is_empty() => {
                Ok(TestCase::new(class, method))
            }
            _ => Err(ConfigurationError::InvalidTestCase(s.to_string())),
        }
    }
}

impl TryFrom<String> for TestCase {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TestCase> for String {
    fn from(test: TestCase) -> Self {
        test.qualified
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified)
    }
}

/// The two revisions being compared: the current one and its baseline.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VersionPairRepr")]
pub struct VersionPair {
    current: String,
    old: String,
}

#[derive(Deserialize)]
struct VersionPairRepr {
    current: String,
    old: String,
}

impl TryFrom<VersionPairRepr> for VersionPair {
    type Error = ConfigurationError;

    fn try_from(repr: VersionPairRepr) -> Result<Self, Self::Error> {
        VersionPair::new(repr.current, repr.old)
    }
}

impl VersionPair {
    /// Create a pair; comparing a revision with itself is rejected.
    pub fn new(
        current: impl Into<String>,
        old: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let current = current.into();
        let old = old.into();
        if current.is_empty() || old.is_empty() {
            return Err(ConfigurationError::EmptyRevision);
        }
        if current == old {
            return Err(ConfigurationError::IdenticalRevisions(current));
        }
        Ok(Self { current, old })
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn old(&self) -> &str {
        &self.old
    }

    /// Key under which this pair is stored in [`ProjectChanges`] and on disk
    pub fn key(&self) -> String {
        format!("{}_{}", self.current, self.old)
    }
}

impl fmt::Display for VersionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.old, self.current)
    }
}

/// Whether the current revision got slower or faster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeDirection {
    Slower,
    Faster,
}

/// A statistically significant performance difference of one test method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Method name inside the owning test class
    pub method: String,
    /// Direction of the effect
    pub direction: ChangeDirection,
    /// Relative difference of the means in percent
    pub change_percent: f64,
    /// Test statistic reported by the significance oracle
    pub t_value: f64,
    /// Mean duration on the old revision
    #[serde(default)]
    pub old_time: f64,
}

/// All changes detected for one revision pair, grouped by test class.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changes {
    pub testcase_changes: BTreeMap<String, Vec<Change>>,
}

impl Changes {
    pub fn add_change(&mut self, class: &str, change: Change) {
        self.testcase_changes
            .entry(class.to_string())
            .or_default()
            .push(change);
    }

    /// Flatten into (test case, change) pairs in class order
    pub fn iter_changes(&self) -> impl Iterator<Item = (TestCase, &Change)> {
        self.testcase_changes.iter().flat_map(|(class, changes)| {
            changes
                .iter()
                .map(move |change| (TestCase::new(class, &change.method), change))
        })
    }

    pub fn len(&self) -> usize {
        self.testcase_changes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Change sets keyed by [`VersionPair::key`]; the content of `changes.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectChanges {
    pub version_changes: BTreeMap<String, Changes>,
}

impl ProjectChanges {
    /// Changes of one pair, empty when the pair was never measured
    pub fn version(&self, pair: &VersionPair) -> Changes {
        self.version_changes
            .get(&pair.key())
            .cloned()
            .unwrap_or_default()
    }

    pub fn add_change(&mut self, pair: &VersionPair, class: &str, change: Change) {
        self.version_changes
            .entry(pair.key())
            .or_default()
            .add_change(class, change);
    }
}

/// Aggregate per-test statistics of one measurement, as written to `statistics.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestcaseStatistic {
    pub mean_old: f64,
    pub mean_current: f64,
    pub deviation_old: f64,
    pub deviation_current: f64,
    pub vms: usize,
    pub t_value: f64,
    pub is_change: bool,
}

/// Statistics keyed by pair key and then by test case.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatistics {
    pub statistics: BTreeMap<String, BTreeMap<String, TestcaseStatistic>>,
}
