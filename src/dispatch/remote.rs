use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use log::{debug, info};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::task::spawn_blocking;
use tokio::time::timeout;

use super::{artifacts, Dispatcher, WorkRequest, WorkResponse};
use crate::error::RemoteExecutionError;
use crate::folders::ResultsFolders;
use crate::types::VersionPair;

/// A command that starts `perfci worker` in the remote workspace, e.g.
/// `ssh build-host perfci worker --project /srv/checkout`.
///
/// Each work unit starts the command once, writes the request to its stdin and reads
/// the response from its stdout.
#[derive(Clone, Debug)]
pub struct CommandChannel {
    argv: Vec<String>,
}

impl CommandChannel {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    pub async fn exchange(&self, request: &WorkRequest) -> Result<WorkResponse, RemoteExecutionError> {
        let (program, args) = self.argv.split_first().ok_or_else(|| {
            RemoteExecutionError::Remote("no worker command configured".to_string())
        })?;
        let payload = serde_json::to_vec(request)?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
        }
        let output = child.wait_with_output().await?;

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            debug!("[worker] {}", line);
        }
        if !output.status.success() {
            return Err(RemoteExecutionError::Remote(format!(
                "worker exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// Sends work units to a worker reachable through a [`CommandChannel`].
///
/// After a successful collection only files the worker changed since its last snapshot
/// are requested for the same pair.
pub struct RemoteDispatcher {
    channel: CommandChannel,
    timeout: Duration,
    snapshots: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RemoteDispatcher {
    pub fn new(channel: CommandChannel, timeout: Duration) -> Self {
        Self {
            channel,
            timeout,
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    fn last_snapshot(&self, pair: &VersionPair) -> Option<DateTime<Utc>> {
        self.snapshots
            .lock()
            .ok()
            .and_then(|snapshots| snapshots.get(&pair.key()).copied())
    }

    fn remember_snapshot(&self, pair: &VersionPair, snapshot: DateTime<Utc>) {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.insert(pair.key(), snapshot);
        }
    }
}

impl Dispatcher for RemoteDispatcher {
    fn dispatch<'a>(
        &'a self,
        request: WorkRequest,
    ) -> BoxFuture<'a, Result<WorkResponse, RemoteExecutionError>> {
        Box::pin(async move {
            let unit = request.kind().to_string();
            debug!("Dispatching {} to {:?}", unit, self.channel);
            // dropping the exchange kills the worker process
            timeout(self.timeout, self.channel.exchange(&request))
                .await
                .map_err(|_| RemoteExecutionError::Timeout {
                    unit,
                    timeout: self.timeout,
                })?
        })
    }

    fn collect_artifacts<'a>(
        &'a self,
        pair: &'a VersionPair,
        local: &'a ResultsFolders,
    ) -> BoxFuture<'a, Result<usize, RemoteExecutionError>> {
        Box::pin(async move {
            let request = WorkRequest::FetchArtifacts {
                pair: pair.clone(),
                since: self.last_snapshot(pair),
            };
            let (files, snapshot) = match self.dispatch(request).await?.into_result()? {
                WorkResponse::Artifacts { files, snapshot } => (files, snapshot),
                other => {
                    return Err(RemoteExecutionError::UnexpectedResponse {
                        expected: "fetchArtifacts",
                        actual: other.kind(),
                    })
                }
            };

            let to = local.version_dir(pair);
            let target = to.clone();
            let written = spawn_blocking(move || artifacts::write_artifacts(&to, &files))
                .await
                .map_err(|e| RemoteExecutionError::Artifacts {
                    from: target.clone(),
                    message: e.to_string(),
                })??;
            info!("Received {} files into {}", written, target.display());
            // only advance once the files are safely written
            if let Some(snapshot) = snapshot {
                self.remember_snapshot(pair, snapshot);
            }
            Ok(written)
        })
    }
}
