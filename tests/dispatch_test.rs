use perfci::dispatch::{self, CommandChannel, Dispatcher, RemoteDispatcher, WorkRequest};
use perfci::error::RemoteExecutionError;
use perfci::folders::ResultsFolders;
use perfci::types::VersionPair;
use std::time::Duration;
use tempfile::TempDir;

fn channel(script: &str) -> CommandChannel {
    CommandChannel::new(vec!["sh".to_string(), "-c".to_string(), script.to_string()])
}

#[tokio::test]
async fn test_remote_response_is_parsed() {
    let dispatcher = RemoteDispatcher::new(
        channel(r#"cat > /dev/null; printf '{"type":"versions","pair":{"current":"b2","old":"a1"}}'"#),
        Duration::from_secs(30),
    );

    let pair = dispatch::resolve_versions(&dispatcher, "HEAD", None).await.unwrap();

    assert_eq!(pair, VersionPair::new("b2", "a1").unwrap());
}

#[tokio::test]
async fn test_remote_error_and_wrong_answer() {
    let failing = RemoteDispatcher::new(
        channel(r#"cat > /dev/null; printf '{"type":"error","message":"no such revision"}'"#),
        Duration::from_secs(30),
    );
    match dispatch::resolve_versions(&failing, "HEAD", None).await {
        Err(RemoteExecutionError::Remote(message)) => assert_eq!(message, "no such revision"),
        other => panic!("unexpected {:?}", other),
    }

    let confused = RemoteDispatcher::new(
        channel(r#"cat > /dev/null; printf '{"type":"measured","success":true}'"#),
        Duration::from_secs(30),
    );
    assert!(matches!(
        dispatch::resolve_versions(&confused, "HEAD", None).await,
        Err(RemoteExecutionError::UnexpectedResponse { .. })
    ));
}

#[tokio::test]
async fn test_crashed_worker_is_a_remote_error() {
    let dispatcher = RemoteDispatcher::new(channel("cat > /dev/null; echo broken >&2; exit 7"), Duration::from_secs(30));
    let request = WorkRequest::FetchArtifacts {
        pair: VersionPair::new("b2", "a1").unwrap(),
        since: None,
    };

    let result = dispatcher.dispatch(request).await;

    match result {
        Err(RemoteExecutionError::Remote(message)) => assert!(message.contains("broken")),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_dispatch_times_out() {
    let dispatcher = RemoteDispatcher::new(channel("sleep 10"), Duration::from_millis(200));
    let request = WorkRequest::FetchArtifacts {
        pair: VersionPair::new("b2", "a1").unwrap(),
        since: None,
    };

    let result = dispatcher.dispatch(request).await;

    assert!(matches!(result, Err(RemoteExecutionError::Timeout { .. })));
}

#[tokio::test]
async fn test_remote_collect_is_idempotent() {
    let local = TempDir::new().unwrap();
    let folders = ResultsFolders::new(local.path(), "demo");
    let pair = VersionPair::new("b2", "a1").unwrap();
    // "{}" and "ok" in base64, without a snapshot every collection is a full one
    let dispatcher = RemoteDispatcher::new(
        channel(
            r#"cat > /dev/null; printf '{"type":"artifacts","files":[{"relativePath":"changes.json","contents":"e30="},{"relativePath":"rts-log/rts.log","contents":"b2s="}]}'"#,
        ),
        Duration::from_secs(30),
    );

    assert_eq!(dispatcher.collect_artifacts(&pair, &folders).await.unwrap(), 2);
    assert_eq!(dispatcher.collect_artifacts(&pair, &folders).await.unwrap(), 2);
    assert_eq!(std::fs::read_to_string(folders.changes_file(&pair)).unwrap(), "{}");
    assert_eq!(std::fs::read_to_string(folders.rts_log_file(&pair)).unwrap(), "ok");
}

#[tokio::test]
async fn test_remote_collect_only_requests_newer_files() {
    let local = TempDir::new().unwrap();
    let folders = ResultsFolders::new(local.path(), "demo");
    let pair = VersionPair::new("b2", "a1").unwrap();
    // answers with the file only when the request carries no "since"
    let dispatcher = RemoteDispatcher::new(
        channel(
            r#"request=$(cat); case "$request" in
                *'"since"'*) printf '{"type":"artifacts","files":[],"snapshot":"2026-01-01T10:00:00Z"}' ;;
                *) printf '{"type":"artifacts","files":[{"relativePath":"changes.json","contents":"e30="}],"snapshot":"2026-01-01T09:00:00Z"}' ;;
            esac"#,
        ),
        Duration::from_secs(30),
    );

    assert_eq!(dispatcher.collect_artifacts(&pair, &folders).await.unwrap(), 1);
    assert_eq!(dispatcher.collect_artifacts(&pair, &folders).await.unwrap(), 0);
    assert_eq!(std::fs::read_to_string(folders.changes_file(&pair)).unwrap(), "{}");
}
