//! Result tree layout.
//!
//! Every artifact of a pipeline run has exactly one path, derived from the result
//! root, the revision pair and the test case. Nothing here touches the filesystem.

use std::path::{Path, PathBuf};

use crate::types::{TestCase, VersionPair};

pub const CHANGES_FILE: &str = "changes.json";
pub const STATISTICS_FILE: &str = "statistics.json";
pub const HISTOGRAM_DIR: &str = "histogram";
pub const RTS_LOG_DIR: &str = "rts-log";
pub const RCA_TREE_DIR: &str = "rca-tree";
pub const NIGHTLY_FILE: &str = "nightly.json";

const RTS_LOG_FILE: &str = "rts.log";
const PROCESS_SUCCESS_FILE: &str = "process-success.log";
const CLEAN_LOG_FILE: &str = "clean.log";
const METHOD_LOG_FILE: &str = "method.log";

/// Canonical locations inside `<local-root>/<project>_peass`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultsFolders {
    root: PathBuf,
}

impl ResultsFolders {
    pub fn new(local_root: &Path, project: &str) -> Self {
        Self {
            root: local_root.join(format!("{}_peass", project)),
        }
    }

    /// Use an existing result root directly
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn nightly_file(&self) -> PathBuf {
        self.root.join(NIGHTLY_FILE)
    }

    pub fn version_dir(&self, pair: &VersionPair) -> PathBuf {
        self.root.join(pair.key())
    }

    pub fn changes_file(&self, pair: &VersionPair) -> PathBuf {
        self.version_dir(pair).join(CHANGES_FILE)
    }

    pub fn statistics_file(&self, pair: &VersionPair) -> PathBuf {
        self.version_dir(pair).join(STATISTICS_FILE)
    }

    pub fn histogram_dir(&self, pair: &VersionPair) -> PathBuf {
        self.version_dir(pair).join(HISTOGRAM_DIR)
    }

    /// Accumulated samples of all runs of one test
    pub fn histogram_file(&self, pair: &VersionPair, test: &TestCase) -> PathBuf {
        self.histogram_dir(pair)
            .join(format!("{}.json", test.qualified_name()))
    }

    /// Fresh runs of one test, one file per measurement run
    pub fn histogram_runs_dir(&self, pair: &VersionPair, test: &TestCase) -> PathBuf {
        self.histogram_dir(pair).join(test.qualified_name())
    }

    pub fn rts_log_dir(&self, pair: &VersionPair) -> PathBuf {
        self.version_dir(pair).join(RTS_LOG_DIR)
    }

    pub fn rts_log_file(&self, pair: &VersionPair) -> PathBuf {
        self.rts_log_dir(pair).join(RTS_LOG_FILE)
    }

    pub fn rts_version_dir(&self, pair: &VersionPair, version: &str) -> PathBuf {
        self.rts_log_dir(pair).join(version)
    }

    pub fn process_success_file(&self, pair: &VersionPair, version: &str) -> PathBuf {
        self.rts_version_dir(pair, version).join(PROCESS_SUCCESS_FILE)
    }

    pub fn rts_clean_log(&self, pair: &VersionPair, version: &str, test: &TestCase) -> PathBuf {
        self.rts_version_dir(pair, version)
            .join(test.qualified_name())
            .join(CLEAN_LOG_FILE)
    }

    pub fn rts_method_log(&self, pair: &VersionPair, version: &str, test: &TestCase) -> PathBuf {
        self.rts_version_dir(pair, version)
            .join(test.qualified_name())
            .join(METHOD_LOG_FILE)
    }

    pub fn rca_tree_dir(&self, pair: &VersionPair) -> PathBuf {
        self.version_dir(pair).join(RCA_TREE_DIR)
    }

    /// `rca-tree/<current>/<ShortClass>/<method>.json`; its existence marks the change
    /// as analyzed.
    ///
    /// Classes with the same short name in different packages share a folder.
    pub fn cause_tree_file(&self, pair: &VersionPair, test: &TestCase) -> PathBuf {
        self.rca_tree_dir(pair)
            .join(pair.current())
            .join(test.short_class())
            .join(format!("{}.json", test.method()))
    }
}
