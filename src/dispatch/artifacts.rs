//! Moving result files between a workspace and the local result tree.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

use super::ArtifactFile;
use crate::error::RemoteExecutionError;
use crate::utils::write_atomic;

/// Files being written by [`write_atomic`] are never transferred
fn is_in_flight(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(".tmp"))
        .unwrap_or(false)
}

fn artifact_error(from: &Path, message: impl ToString) -> RemoteExecutionError {
    RemoteExecutionError::Artifacts {
        from: from.to_path_buf(),
        message: message.to_string(),
    }
}

fn result_files(root: &Path) -> Result<Vec<(PathBuf, PathBuf)>, RemoteExecutionError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| artifact_error(root, e))?;
        if !entry.file_type().is_file() || is_in_flight(entry.path()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| artifact_error(root, e))?
            .to_path_buf();
        files.push((entry.path().to_path_buf(), relative));
    }
    Ok(files)
}

/// Recursively copy `from` into `to`, replacing existing files.
///
/// A missing source folder copies nothing. Copying a folder onto itself is a no-op.
pub fn copy_tree(from: &Path, to: &Path) -> Result<usize, RemoteExecutionError> {
    if !from.exists() {
        return Ok(0);
    }
    if let (Ok(a), Ok(b)) = (from.canonicalize(), to.canonicalize()) {
        if a == b {
            return Ok(0);
        }
    }

    let mut copied = 0;
    for (source, relative) in result_files(from)? {
        let target = to.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| artifact_error(from, e))?;
        }
        fs::copy(&source, &target).map_err(|e| artifact_error(&source, e))?;
        copied += 1;
    }
    Ok(copied)
}

/// Files modified this close before the previous snapshot are sent again, so coarse
/// file system timestamps never hide a change.
const MODIFICATION_SLACK: Duration = Duration::from_secs(2);

fn modified_since(path: &Path, since: SystemTime) -> Result<bool, RemoteExecutionError> {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| artifact_error(path, e))?;
    let threshold = since.checked_sub(MODIFICATION_SLACK).unwrap_or(since);
    Ok(modified >= threshold)
}

/// Read the result files below `root` for transfer, only those modified since `since`
/// when given.
pub fn read_artifacts(
    root: &Path,
    since: Option<SystemTime>,
) -> Result<Vec<ArtifactFile>, RemoteExecutionError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for (source, relative) in result_files(root)? {
        match since {
            Some(since) if !modified_since(&source, since)? => continue,
            _ => files.push((source, relative)),
        }
    }
    files
        .into_iter()
        .map(|(source, relative)| {
            let contents = fs::read(&source).map_err(|e| artifact_error(&source, e))?;
            let relative_path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            Ok(ArtifactFile {
                relative_path,
                contents,
            })
        })
        .collect()
}

/// Write transferred files below `root`. Paths leaving `root` are rejected.
pub fn write_artifacts(root: &Path, files: &[ArtifactFile]) -> Result<usize, RemoteExecutionError> {
    for file in files {
        let relative = Path::new(&file.relative_path);
        let escapes = relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(artifact_error(
                relative,
                "artifact path must be relative and stay inside the result folder",
            ));
        }
    }
    for file in files {
        let target = root.join(&file.relative_path);
        write_atomic(&target, &file.contents).map_err(|e| artifact_error(&target, e))?;
    }
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn copy_overwrites_and_counts() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        write(&remote.path().join("histogram/A#m.json"), "new");
        write(&remote.path().join("rts-log/rts.log"), "log");
        write(&remote.path().join("histogram/.tmpAbc"), "partial");
        write(&local.path().join("histogram/A#m.json"), "old");

        assert_eq!(copy_tree(remote.path(), local.path()).unwrap(), 2);
        assert_eq!(
            fs::read_to_string(local.path().join("histogram/A#m.json")).unwrap(),
            "new"
        );
        assert!(!local.path().join("histogram/.tmpAbc").exists());

        // Second call after a partial failure is harmless
        assert_eq!(copy_tree(remote.path(), local.path()).unwrap(), 2);
    }

    #[test]
    fn copy_onto_itself_and_from_nowhere() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("changes.json"), "{}");
        assert_eq!(copy_tree(dir.path(), dir.path()).unwrap(), 0);
        assert_eq!(copy_tree(&dir.path().join("missing"), dir.path()).unwrap(), 0);
    }

    #[test]
    fn transfer_round_trip_rejects_escaping_paths() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        write(&remote.path().join("rca-tree/v2/Test/m.json"), "{}");

        let files = read_artifacts(remote.path(), None).unwrap();
        assert_eq!(files[0].relative_path, "rca-tree/v2/Test/m.json");
        assert_eq!(write_artifacts(local.path(), &files).unwrap(), 1);
        assert!(local.path().join("rca-tree/v2/Test/m.json").exists());

        let evil = vec![ArtifactFile {
            relative_path: "../outside.json".to_string(),
            contents: Vec::new(),
        }];
        assert!(write_artifacts(local.path(), &evil).is_err());
    }

    #[test]
    fn read_skips_files_older_than_snapshot() {
        let remote = TempDir::new().unwrap();
        write(&remote.path().join("changes.json"), "{}");

        let earlier = SystemTime::now() - Duration::from_secs(3600);
        let later = SystemTime::now() + Duration::from_secs(3600);
        assert_eq!(read_artifacts(remote.path(), Some(earlier)).unwrap().len(), 1);
        assert!(read_artifacts(remote.path(), Some(later)).unwrap().is_empty());
    }
}
