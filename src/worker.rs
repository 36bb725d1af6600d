//! Executes work units inside a workspace.
//!
//! The same [`Worker`] backs the in-process dispatcher and the `perfci worker`
//! subcommand that remote dispatchers talk to.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::spawn_blocking;

use crate::analysis::{record_nightly, resolve_versions};
use crate::config::StageCommands;
use crate::dispatch::artifacts::read_artifacts;
use crate::dispatch::{WorkRequest, WorkResponse};
use crate::folders::ResultsFolders;
use crate::rca::ChangeCauseScheduler;
use crate::stages::{
    CauseSearchers, CommandMeasurement, CommandNodeMeasurer, CommandTestSelection, Stages,
    Workspace,
};
use crate::types::VersionPair;

pub struct Worker {
    project_dir: PathBuf,
    folders: ResultsFolders,
    stages: Stages,
}

impl Worker {
    pub fn new(project_dir: PathBuf, folders: ResultsFolders, stages: Stages) -> Self {
        Self {
            project_dir,
            folders,
            stages,
        }
    }

    /// Worker whose stages are the configured external programs
    pub fn with_commands(project_dir: PathBuf, folders: ResultsFolders, commands: &StageCommands) -> Self {
        let measurer = Arc::new(CommandNodeMeasurer::new(
            commands.call_tree.clone(),
            commands.node_measurement.clone(),
            project_dir.clone(),
            folders.clone(),
        ));
        let stages = Stages {
            test_selection: Arc::new(CommandTestSelection::new(commands.test_selection.clone())),
            measurement: Arc::new(CommandMeasurement::new(commands.measurement.clone())),
            searchers: CauseSearchers::from_node_measurer(measurer),
        };
        Self::new(project_dir, folders, stages)
    }

    pub fn folders(&self) -> &ResultsFolders {
        &self.folders
    }

    fn workspace(&self, pair: VersionPair) -> Workspace {
        Workspace {
            project_dir: self.project_dir.clone(),
            folders: self.folders.clone(),
            pair,
        }
    }

    /// Execute one request; failures are answered with [`WorkResponse::Error`]
    pub async fn handle(&self, request: WorkRequest) -> WorkResponse {
        let kind = request.kind();
        match self.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                error!("Work unit {} failed: {:#}", kind, e);
                WorkResponse::Error {
                    message: format!("{:#}", e),
                }
            }
        }
    }

    async fn execute(&self, request: WorkRequest) -> Result<WorkResponse> {
        match request {
            WorkRequest::ResolveVersions { current, old } => {
                let pair =
                    resolve_versions(self.project_dir.clone(), &current, old.as_deref(), &self.folders)
                        .await?;
                Ok(WorkResponse::Versions { pair })
            }
            WorkRequest::SelectTests { pair, config } => {
                let stage = self.stages.test_selection.clone();
                let workspace = self.workspace(pair);
                let tests = spawn_blocking(move || stage.run(&config, &workspace))
                    .await
                    .map_err(|e| anyhow!("test selection aborted: {}", e))??;
                Ok(WorkResponse::TestsSelected { tests })
            }
            WorkRequest::Measure { pair, config, tests } => {
                let stage = self.stages.measurement.clone();
                let workspace = self.workspace(pair.clone());
                let success = spawn_blocking(move || stage.run(&config, &tests, &workspace))
                    .await
                    .map_err(|e| anyhow!("measurement aborted: {}", e))??;
                if success {
                    record_nightly(&self.folders, &pair)?;
                }
                Ok(WorkResponse::Measured { success })
            }
            WorkRequest::SearchCauses {
                pair,
                config,
                changes,
                strategy,
                includes,
                workers,
            } => {
                let scheduler = ChangeCauseScheduler::new(
                    self.folders.clone(),
                    pair,
                    includes,
                    config,
                    self.stages.searchers.clone(),
                )
                .with_workers(workers);
                let report = scheduler.schedule(&changes, strategy).await;
                Ok(WorkResponse::CausesSearched { report })
            }
            WorkRequest::FetchArtifacts { pair, since } => {
                let root = self.folders.version_dir(&pair);
                let snapshot = Utc::now();
                let since = since.map(SystemTime::from);
                let files = spawn_blocking(move || read_artifacts(&root, since))
                    .await
                    .map_err(|e| anyhow!("reading artifacts aborted: {}", e))??;
                info!("Sending {} artifact files", files.len());
                Ok(WorkResponse::Artifacts {
                    files,
                    snapshot: Some(snapshot),
                })
            }
        }
    }

    /// Answer a single request read from stdin on stdout
    pub async fn serve_stdio(&self) -> Result<()> {
        let mut input = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut input)
            .await
            .context("failed to read work request")?;
        let request: WorkRequest =
            serde_json::from_slice(&input).context("failed to parse work request")?;
        info!("Received work unit {}", request.kind());

        let response = self.handle(request).await;
        let output = serde_json::to_vec(&response)?;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(&output).await?;
        stdout.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeasurementConfig;
    use tempfile::TempDir;

    fn worker(dir: &TempDir) -> Worker {
        Worker::with_commands(
            dir.path().to_path_buf(),
            ResultsFolders::new(dir.path(), "demo"),
            &StageCommands::default(),
        )
    }

    #[test]
    fn unconfigured_stage_answers_with_error() {
        let dir = TempDir::new().unwrap();
        let request = WorkRequest::SelectTests {
            pair: VersionPair::new("v2", "v1").unwrap(),
            config: MeasurementConfig::default(),
        };

        let response = tokio_test::block_on(worker(&dir).handle(request));

        match response {
            WorkResponse::Error { message } => assert!(message.contains("no command configured")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn fetches_written_artifacts() {
        let dir = TempDir::new().unwrap();
        let worker = worker(&dir);
        let pair = VersionPair::new("v2", "v1").unwrap();
        std::fs::create_dir_all(worker.folders().version_dir(&pair)).unwrap();
        std::fs::write(worker.folders().changes_file(&pair), "{}").unwrap();

        let response = tokio_test::block_on(worker.handle(WorkRequest::FetchArtifacts {
            pair: pair.clone(),
            since: None,
        }));

        let snapshot = match response {
            WorkResponse::Artifacts { files, snapshot } => {
                assert_eq!(files.len(), 1);
                assert_eq!(files[0].relative_path, "changes.json");
                snapshot.unwrap()
            }
            other => panic!("unexpected {:?}", other),
        };

        let later = snapshot + chrono::Duration::hours(1);
        let response = tokio_test::block_on(worker.handle(WorkRequest::FetchArtifacts {
            pair,
            since: Some(later),
        }));
        match response {
            WorkResponse::Artifacts { files, .. } => assert!(files.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
