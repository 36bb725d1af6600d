use futures::future::BoxFuture;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::spawn_blocking;
use tokio::time::timeout;

use super::{artifacts, Dispatcher, WorkRequest, WorkResponse};
use crate::error::RemoteExecutionError;
use crate::folders::ResultsFolders;
use crate::types::VersionPair;
use crate::worker::Worker;

/// Runs work units in-process against a worker on the local filesystem.
pub struct LocalDispatcher {
    worker: Arc<Worker>,
    timeout: Duration,
}

impl LocalDispatcher {
    pub fn new(worker: Arc<Worker>, timeout: Duration) -> Self {
        Self { worker, timeout }
    }
}

impl Dispatcher for LocalDispatcher {
    fn dispatch<'a>(
        &'a self,
        request: WorkRequest,
    ) -> BoxFuture<'a, Result<WorkResponse, RemoteExecutionError>> {
        Box::pin(async move {
            let unit = request.kind().to_string();
            debug!("Dispatching {} locally", unit);
            // blocking stage code keeps running after a timeout, its artifacts are not collected
            timeout(self.timeout, self.worker.handle(request))
                .await
                .map_err(|_| RemoteExecutionError::Timeout {
                    unit,
                    timeout: self.timeout,
                })
        })
    }

    fn collect_artifacts<'a>(
        &'a self,
        pair: &'a VersionPair,
        local: &'a ResultsFolders,
    ) -> BoxFuture<'a, Result<usize, RemoteExecutionError>> {
        Box::pin(async move {
            let from = self.worker.folders().version_dir(pair);
            let to = local.version_dir(pair);
            let source = from.clone();
            let copied = spawn_blocking(move || artifacts::copy_tree(&from, &to))
                .await
                .map_err(|e| RemoteExecutionError::Artifacts {
                    from: source.clone(),
                    message: e.to_string(),
                })??;
            info!("Copied {} files from {}", copied, source.display());
            Ok(copied)
        })
    }
}
