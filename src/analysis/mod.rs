pub mod git;
pub mod histogram;
pub mod rts_logs;

#[cfg(test)]
mod tests;

pub use git::{project_name, record_nightly, resolve_revision, resolve_versions};
pub use histogram::{HistogramReader, HistogramRun, HistogramValues};
pub use rts_logs::{ProcessSuccess, RtsLogData, RtsLogReader, LOG_NOT_LOADED};

use anyhow::Result;

use crate::folders::ResultsFolders;
use crate::types::{ProjectChanges, ProjectStatistics, VersionPair};
use crate::utils::read_json_or_default;

/// Changes written by the measurement stage; empty when the stage found none
pub fn read_changes(folders: &ResultsFolders, pair: &VersionPair) -> Result<ProjectChanges> {
    read_json_or_default(&folders.changes_file(pair))
}

pub fn read_statistics(folders: &ResultsFolders, pair: &VersionPair) -> Result<ProjectStatistics> {
    read_json_or_default(&folders.statistics_file(pair))
}
