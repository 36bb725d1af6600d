//! # Work dispatch
//!
//! Stages never run inside the orchestrator. Each unit of work is sent to a workspace
//! as a [`WorkRequest`], and the orchestrator waits for the matching [`WorkResponse`].
//! Afterwards it copies the workspace's artifacts into the local result tree.
//! [`LocalDispatcher`] runs the work in-process. [`RemoteDispatcher`] talks to a
//! `perfci worker` over any command channel, for example `ssh host perfci worker`.

pub mod artifacts;
pub mod local;
pub mod remote;

pub use local::LocalDispatcher;
pub use remote::{CommandChannel, RemoteDispatcher};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::{CauseSearchStrategy, IncludeFilter, MeasurementConfig};
use crate::error::RemoteExecutionError;
use crate::folders::ResultsFolders;
use crate::rca::ScheduleReport;
use crate::types::{Changes, TestCase, VersionPair};

/// One unit of work for a workspace.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkRequest {
    /// Resolve symbolic revisions; `old == None` means the last nightly revision
    ResolveVersions { current: String, old: Option<String> },
    SelectTests {
        pair: VersionPair,
        config: MeasurementConfig,
    },
    Measure {
        pair: VersionPair,
        config: MeasurementConfig,
        tests: BTreeSet<TestCase>,
    },
    SearchCauses {
        pair: VersionPair,
        config: MeasurementConfig,
        changes: Changes,
        strategy: CauseSearchStrategy,
        includes: IncludeFilter,
        workers: usize,
    },
    /// Send back the files of the pair's result folder, only those modified since
    /// `since` when given
    FetchArtifacts {
        pair: VersionPair,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since: Option<DateTime<Utc>>,
    },
}

impl WorkRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkRequest::ResolveVersions { .. } => "resolveVersions",
            WorkRequest::SelectTests { .. } => "selectTests",
            WorkRequest::Measure { .. } => "measure",
            WorkRequest::SearchCauses { .. } => "searchCauses",
            WorkRequest::FetchArtifacts { .. } => "fetchArtifacts",
        }
    }
}

/// A file of the result folder, relative to the pair's folder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactFile {
    pub relative_path: String,
    #[serde(with = "base64_contents")]
    pub contents: Vec<u8>,
}

mod base64_contents {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(contents: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(contents))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkResponse {
    Versions { pair: VersionPair },
    TestsSelected { tests: BTreeSet<TestCase> },
    Measured { success: bool },
    CausesSearched { report: ScheduleReport },
    /// `snapshot` is the worker's clock when it started reading the files
    Artifacts {
        files: Vec<ArtifactFile>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<DateTime<Utc>>,
    },
    /// The work unit raised an error inside the workspace
    Error { message: String },
}

impl WorkResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkResponse::Versions { .. } => "versions",
            WorkResponse::TestsSelected { .. } => "testsSelected",
            WorkResponse::Measured { .. } => "measured",
            WorkResponse::CausesSearched { .. } => "causesSearched",
            WorkResponse::Artifacts { .. } => "artifacts",
            WorkResponse::Error { .. } => "error",
        }
    }

    /// Turn a remote-side error into a [`RemoteExecutionError::Remote`]
    pub fn into_result(self) -> Result<Self, RemoteExecutionError> {
        match self {
            WorkResponse::Error { message } => Err(RemoteExecutionError::Remote(message)),
            other => Ok(other),
        }
    }
}

/// Executes work units in a workspace and brings their artifacts home.
///
/// `dispatch` resolves only after the work unit has finished in the workspace, so
/// `collect_artifacts` never sees the output of a running stage.
pub trait Dispatcher: Send + Sync {
    fn dispatch<'a>(
        &'a self,
        request: WorkRequest,
    ) -> BoxFuture<'a, Result<WorkResponse, RemoteExecutionError>>;

    /// Copy the pair's result folder into `local`; returns the number of files copied.
    /// Files already present locally are overwritten, so calling it again is safe.
    fn collect_artifacts<'a>(
        &'a self,
        pair: &'a VersionPair,
        local: &'a ResultsFolders,
    ) -> BoxFuture<'a, Result<usize, RemoteExecutionError>>;
}

fn unexpected(expected: &'static str, actual: &WorkResponse) -> RemoteExecutionError {
    RemoteExecutionError::UnexpectedResponse {
        expected,
        actual: actual.kind(),
    }
}

pub async fn resolve_versions(
    dispatcher: &dyn Dispatcher,
    current: &str,
    old: Option<&str>,
) -> Result<VersionPair, RemoteExecutionError> {
    let request = WorkRequest::ResolveVersions {
        current: current.to_string(),
        old: old.map(str::to_string),
    };
    let kind = request.kind();
    match dispatcher.dispatch(request).await?.into_result()? {
        WorkResponse::Versions { pair } => Ok(pair),
        other => Err(unexpected(kind, &other)),
    }
}

pub async fn select_tests(
    dispatcher: &dyn Dispatcher,
    pair: &VersionPair,
    config: &MeasurementConfig,
) -> Result<BTreeSet<TestCase>, RemoteExecutionError> {
    let request = WorkRequest::SelectTests {
        pair: pair.clone(),
        config: config.clone(),
    };
    let kind = request.kind();
    match dispatcher.dispatch(request).await?.into_result()? {
        WorkResponse::TestsSelected { tests } => Ok(tests),
        other => Err(unexpected(kind, &other)),
    }
}

pub async fn measure(
    dispatcher: &dyn Dispatcher,
    pair: &VersionPair,
    config: &MeasurementConfig,
    tests: &BTreeSet<TestCase>,
) -> Result<bool, RemoteExecutionError> {
    let request = WorkRequest::Measure {
        pair: pair.clone(),
        config: config.clone(),
        tests: tests.clone(),
    };
    let kind = request.kind();
    match dispatcher.dispatch(request).await?.into_result()? {
        WorkResponse::Measured { success } => Ok(success),
        other => Err(unexpected(kind, &other)),
    }
}

pub async fn search_causes(
    dispatcher: &dyn Dispatcher,
    request: WorkRequest,
) -> Result<ScheduleReport, RemoteExecutionError> {
    let kind = request.kind();
    match dispatcher.dispatch(request).await?.into_result()? {
        WorkResponse::CausesSearched { report } => Ok(report),
        other => Err(unexpected(kind, &other)),
    }
}
