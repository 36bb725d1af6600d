use super::*;
use crate::folders::ResultsFolders;
use git2::{Repository, Signature};
use std::path::Path;
use tempfile::TempDir;

fn setup_test_repo(commits: usize) -> (TempDir, Vec<String>) {
    let temp_dir = TempDir::new().unwrap();
    let repo = Repository::init(temp_dir.path()).unwrap();
    let signature = Signature::now("Test User", "test@example.com").unwrap();
    let mut ids = Vec::new();

    for i in 0..commits {
        let file_name = format!("file_{}.txt", i);
        std::fs::write(temp_dir.path().join(&file_name), format!("Content {}\n", i)).unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new(&file_name)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();

        let parent = repo.head().ok().map(|h| h.peel_to_commit().unwrap());
        let parents: Vec<_> = parent.iter().collect();
        let id = repo
            .commit(
                Some("HEAD"),
                &signature,
                &signature,
                &format!("Add {}", file_name),
                &tree,
                &parents,
            )
            .unwrap();
        ids.push(id.to_string());
    }

    (temp_dir, ids)
}

#[tokio::test]
async fn test_resolve_explicit_distance() {
    let (temp_dir, ids) = setup_test_repo(3);
    let results = TempDir::new().unwrap();
    let folders = ResultsFolders::new(results.path(), "demo");

    let pair = resolve_versions(temp_dir.path().to_path_buf(), "HEAD", Some("HEAD~2"), &folders)
        .await
        .unwrap();

    assert_eq!(pair.current(), ids[2]);
    assert_eq!(pair.old(), ids[0]);
}

#[tokio::test]
async fn test_nightly_falls_back_to_parent_then_uses_record() {
    let (temp_dir, ids) = setup_test_repo(3);
    let results = TempDir::new().unwrap();
    let folders = ResultsFolders::new(results.path(), "demo");

    let pair = resolve_versions(temp_dir.path().to_path_buf(), "HEAD", None, &folders)
        .await
        .unwrap();
    assert_eq!(pair.old(), ids[1]);

    let earlier = crate::types::VersionPair::new(ids[0].clone(), "unused").unwrap();
    record_nightly(&folders, &earlier).unwrap();
    let pair = resolve_versions(temp_dir.path().to_path_buf(), "HEAD", None, &folders)
        .await
        .unwrap();
    assert_eq!(pair.old(), ids[0]);
}

#[tokio::test]
async fn test_identical_revisions_are_rejected() {
    let (temp_dir, _ids) = setup_test_repo(2);
    let results = TempDir::new().unwrap();
    let folders = ResultsFolders::new(results.path(), "demo");

    let result = resolve_versions(temp_dir.path().to_path_buf(), "HEAD", Some("HEAD"), &folders).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_unknown_revision() {
    let (temp_dir, _ids) = setup_test_repo(1);
    let result = resolve_revision(temp_dir.path().to_path_buf(), "HEAD~5".to_string()).await;
    assert!(result.is_err());
}
