//! Regression test selection logs of a revision pair.
//!
//! Logs are diagnostic data only. Nothing in here fails: missing folders give empty
//! maps and unreadable files give [`LOG_NOT_LOADED`].

use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::folders::ResultsFolders;
use crate::types::{TestCase, VersionPair};

/// Placeholder for log files that could not be read.
pub const LOG_NOT_LOADED: &str = "Log could not be loaded";

/// Logs of one test on one revision: the run without selection and the run of the
/// selected method.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RtsLogData {
    pub version: String,
    pub test: TestCase,
    pub clean_file: PathBuf,
    pub method_file: PathBuf,
    pub clean_log: String,
    pub method_log: String,
}

/// Outcome of the process-success runs, which check that the project builds and its
/// tests run on a revision at all.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ProcessSuccess {
    /// No marker was written
    NotRun,
    /// Both revisions produced a marker
    Succeeded,
    /// Only this revision produced a marker; success of the pair is undefined
    OneSided(String),
}

pub struct RtsLogReader {
    folders: ResultsFolders,
    pair: VersionPair,
}

impl RtsLogReader {
    pub fn new(folders: ResultsFolders, pair: VersionPair) -> Self {
        Self { folders, pair }
    }

    pub fn is_logs_existing(&self) -> bool {
        self.folders.rts_log_dir(&self.pair).is_dir()
    }

    /// The overall selection log
    pub fn rts_log(&self) -> String {
        read_log(&self.folders.rts_log_file(&self.pair))
    }

    /// Marker file of every revision whose process-success run finished.
    pub fn find_process_success_runs(&self) -> BTreeMap<String, PathBuf> {
        let mut runs = BTreeMap::new();
        for version in [self.pair.current(), self.pair.old()] {
            let marker = self.folders.process_success_file(&self.pair, version);
            if marker.is_file() {
                runs.insert(version.to_string(), marker);
            }
        }
        debug!("Process success runs: {:?}", runs.keys());
        runs
    }

    pub fn process_success(&self) -> ProcessSuccess {
        let runs = self.find_process_success_runs();
        match runs.len() {
            0 => ProcessSuccess::NotRun,
            2 => ProcessSuccess::Succeeded,
            _ => ProcessSuccess::OneSided(runs.into_keys().next().unwrap_or_default()),
        }
    }

    /// Log pairs of every test that was run on `version`.
    pub fn rts_vm_runs(&self, version: &str) -> BTreeMap<TestCase, RtsLogData> {
        let mut runs = BTreeMap::new();
        let dir = self.folders.rts_version_dir(&self.pair, version);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("No RTS logs for {} in {}: {}", version, dir.display(), e);
                return runs;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(test) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<TestCase>().ok())
            else {
                continue;
            };
            let clean_file = self.folders.rts_clean_log(&self.pair, version, &test);
            let method_file = self.folders.rts_method_log(&self.pair, version, &test);
            runs.insert(
                test.clone(),
                RtsLogData {
                    version: version.to_string(),
                    test,
                    clean_log: read_log(&clean_file),
                    method_log: read_log(&method_file),
                    clean_file,
                    method_file,
                },
            );
        }
        info!("RTS runs for {}: {}", version, runs.len());
        runs
    }
}

fn read_log(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!("Could not read {}: {}", path.display(), e);
            LOG_NOT_LOADED.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const VERSION: &str = "a23e385264c31def8dcda86c3cf64faa698c62d8";
    const VERSION_OLD: &str = "33ce17c04b5218c25c40137d4d09f40fbb3e4f0f";

    fn setup() -> (TempDir, RtsLogReader, ResultsFolders, VersionPair) {
        let temp_dir = TempDir::new().unwrap();
        let folders = ResultsFolders::new(temp_dir.path(), "demo-vis2");
        let pair = VersionPair::new(VERSION, VERSION_OLD).unwrap();
        let reader = RtsLogReader::new(folders.clone(), pair.clone());
        (temp_dir, reader, folders, pair)
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_reading() {
        let (_temp_dir, reader, folders, pair) = setup();
        write(&folders.rts_log_file(&pair), "This is a rts log test");
        write(&folders.process_success_file(&pair, VERSION), "BUILD SUCCESS");
        for method in ["onlyCallMethod1", "onlyCallMethod2"] {
            let test = TestCase::new("de.test.CalleeTest", method);
            for version in [VERSION, VERSION_OLD] {
                write(&folders.rts_clean_log(&pair, version, &test), "clean");
                write(&folders.rts_method_log(&pair, version, &test), "method");
            }
        }

        assert!(reader.is_logs_existing());
        assert_eq!(reader.rts_log(), "This is a rts log test");

        let success_runs = reader.find_process_success_runs();
        assert_eq!(success_runs.len(), 1);
        assert!(success_runs[VERSION].exists());
        assert_eq!(reader.process_success(), ProcessSuccess::OneSided(VERSION.to_string()));

        let runs = reader.rts_vm_runs(VERSION);
        assert_eq!(runs.len(), 2);
        let data = &runs[&TestCase::new("de.test.CalleeTest", "onlyCallMethod1")];
        assert!(data.method_file.exists());
        assert_eq!(data.method_log, "method");

        let predecessor = reader.rts_vm_runs(VERSION_OLD);
        assert_eq!(predecessor.len(), 2);
        assert_eq!(
            predecessor[&TestCase::new("de.test.CalleeTest", "onlyCallMethod1")].version,
            VERSION_OLD
        );
    }

    #[test]
    fn test_missing_method_log_uses_placeholder() {
        let (_temp_dir, reader, folders, pair) = setup();
        let test = TestCase::new("de.test.CalleeTest", "onlyCallMethod1");
        write(&folders.rts_clean_log(&pair, VERSION, &test), "clean");

        let runs = reader.rts_vm_runs(VERSION);
        assert_eq!(runs[&test].clean_log, "clean");
        assert_eq!(runs[&test].method_log, LOG_NOT_LOADED);
    }

    #[test]
    fn test_only_overview_exists() {
        let (_temp_dir, reader, folders, pair) = setup();
        write(&folders.rts_log_file(&pair), "overview");

        assert!(reader.is_logs_existing());
        assert!(reader.rts_vm_runs(VERSION).is_empty());
        assert_eq!(reader.process_success(), ProcessSuccess::NotRun);
    }

    #[test]
    fn test_no_logs_at_all() {
        let (_temp_dir, reader, _folders, _pair) = setup();
        assert!(!reader.is_logs_existing());
        assert!(reader.find_process_success_runs().is_empty());
        assert!(reader.rts_vm_runs(VERSION).is_empty());
        assert_eq!(reader.rts_log(), LOG_NOT_LOADED);
    }
}
