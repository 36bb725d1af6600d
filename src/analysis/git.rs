use anyhow::Context;
use chrono::{DateTime, Utc};
use git2::{Error, Repository};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::task::spawn_blocking;

use crate::folders::ResultsFolders;
use crate::types::VersionPair;
use crate::utils::{read_json_or_default, write_json_atomic};

/// Last revision a nightly run measured, stored in `nightly.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NightlyRecord {
    pub last_version: Option<String>,
    pub measured_at: Option<DateTime<Utc>>,
}

/// Resolve a revision expression such as `HEAD~2` to a commit id
pub async fn resolve_revision(repo_path: PathBuf, spec: String) -> Result<String, Error> {
    // git2 is blocking, keep it off the runtime threads
    spawn_blocking(move || {
        let repo = Repository::open(&repo_path)?;
        let object = repo.revparse_single(&spec)?;
        let commit = object.peel_to_commit()?;
        Ok(commit.id().to_string())
    })
    .await
    .map_err(|e| Error::from_str(&e.to_string()))?
}

/// Resolve the symbolic revisions of a run to commit ids.
///
/// Without an explicit old revision the last nightly revision is used, or the parent of
/// the current revision when no nightly run has been recorded.
pub async fn resolve_versions(
    repo_path: PathBuf,
    current: &str,
    old: Option<&str>,
    folders: &ResultsFolders,
) -> anyhow::Result<VersionPair> {
    let current_id = resolve_revision(repo_path.clone(), current.to_string())
        .await
        .with_context(|| format!("failed to resolve {}", current))?;

    let old_id = match old {
        Some(old) => resolve_revision(repo_path, old.to_string())
            .await
            .with_context(|| format!("failed to resolve {}", old))?,
        None => {
            let record: NightlyRecord = read_json_or_default(&folders.nightly_file())?;
            match record.last_version {
                Some(last) => last,
                None => {
                    let parent = format!("{}~1", current);
                    resolve_revision(repo_path, parent.clone())
                        .await
                        .with_context(|| format!("failed to resolve {}", parent))?
                }
            }
        }
    };

    info!("Read version: {} {}", current_id, old_id);
    Ok(VersionPair::new(current_id, old_id)?)
}

/// Remember the current revision as baseline of the next nightly run
pub fn record_nightly(folders: &ResultsFolders, pair: &VersionPair) -> anyhow::Result<()> {
    let record = NightlyRecord {
        last_version: Some(pair.current().to_string()),
        measured_at: Some(Utc::now()),
    };
    write_json_atomic(&folders.nightly_file(), &record)
}

/// Directory name of the checkout, used as project name in the result tree
pub fn project_name(repo_path: &std::path::Path) -> String {
    repo_path
        .canonicalize()
        .ok()
        .as_deref()
        .unwrap_or(repo_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("project")
        .to_string()
}
