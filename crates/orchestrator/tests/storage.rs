//! Integration tests for the remote-storage CLI proxy.

mod common;

use std::sync::Arc;

use fleetcrypt_events::{EventBus, FleetEvent};
use fleetcrypt_orchestrator::storage::{RemoteStorage, DEFAULT_REMOTE_FOLDER};

use common::{drain, texts, write_script};

/// A storage CLI that records its argv into `argv.txt` next to itself.
fn recording_cli(dir: &std::path::Path) -> std::path::PathBuf {
    let argv = dir.join("argv.txt");
    write_script(
        dir,
        "storage.sh",
        &format!("echo \"$@\" > '{}'\necho \"ok $1\"", argv.display()),
    )
}

fn storage(cli: std::path::PathBuf) -> (RemoteStorage, Arc<EventBus>) {
    let bus = Arc::new(EventBus::default());
    (RemoteStorage::new(cli, Arc::clone(&bus)), bus)
}

#[tokio::test]
async fn configure_defaults_the_remote_folder() {
    let dir = tempfile::tempdir().unwrap();
    let (storage, bus) = storage(recording_cli(dir.path()));
    let mut rx = bus.subscribe();

    let result = storage.configure("tok-123", None).await;

    assert!(result.success);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.message, "Dropbox configuration saved successfully");
    let argv = std::fs::read_to_string(dir.path().join("argv.txt")).unwrap();
    assert_eq!(argv.trim_end(), format!("dropbox-config tok-123 {DEFAULT_REMOTE_FOLDER}"));

    // Configure output is logged, not published.
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn upload_forwards_output_and_passes_optional_remote() {
    let dir = tempfile::tempdir().unwrap();
    let (storage, bus) = storage(recording_cli(dir.path()));
    let mut rx = bus.subscribe();
    let local = dir.path().join("a.txt.encrypted");

    let result = storage.upload(&local, Some("/backup/a")).await;
    assert!(result.success);
    assert_eq!(result.message, "File uploaded successfully to Dropbox");
    let argv = std::fs::read_to_string(dir.path().join("argv.txt")).unwrap();
    assert_eq!(
        argv.trim_end(),
        format!("dropbox-upload {} /backup/a", local.display())
    );

    let events = drain(&mut rx);
    assert_eq!(texts(&events, "job_output"), vec!["ok dropbox-upload"]);
    assert!(events.iter().all(|e| e.job_id() == Some(result.transfer_id)));

    storage.upload(&local, None).await;
    let argv = std::fs::read_to_string(dir.path().join("argv.txt")).unwrap();
    assert_eq!(argv.trim_end(), format!("dropbox-upload {}", local.display()));
}

#[tokio::test]
async fn download_passes_remote_then_local() {
    let dir = tempfile::tempdir().unwrap();
    let (storage, _bus) = storage(recording_cli(dir.path()));
    let local = dir.path().join("got.bin");

    let result = storage.download("/encryption_files/got.bin", &local).await;
    assert!(result.success);
    assert_eq!(result.message, "File downloaded successfully from Dropbox");
    let argv = std::fs::read_to_string(dir.path().join("argv.txt")).unwrap();
    assert_eq!(
        argv.trim_end(),
        format!("dropbox-download /encryption_files/got.bin {}", local.display())
    );
}

#[tokio::test]
async fn failure_message_is_collected_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let cli = write_script(
        dir.path(),
        "storage.sh",
        "echo 'quota exceeded' >&2\necho 'try later' >&2\nexit 4",
    );
    let (storage, bus) = storage(cli);
    let mut rx = bus.subscribe();

    let result = storage.upload(&dir.path().join("big.bin"), None).await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(4));
    assert_eq!(result.message, "quota exceeded\ntry later");

    let events = drain(&mut rx);
    assert_eq!(texts(&events, "job_error"), vec!["quota exceeded", "try later"]);
    assert!(matches!(events[0], FleetEvent::JobError { job_id, .. } if job_id == result.transfer_id));
}

#[tokio::test]
async fn silent_failure_uses_fixed_message() {
    let dir = tempfile::tempdir().unwrap();
    let cli = write_script(dir.path(), "storage.sh", "exit 1");
    let (storage, _bus) = storage(cli);

    let result = storage.download("/x", &dir.path().join("x")).await;
    assert!(!result.success);
    assert_eq!(result.message, "Failed to download file from Dropbox");
}

#[tokio::test]
async fn missing_cli_is_reported_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let (storage, _bus) = storage(dir.path().join("no-such-cli"));

    let result = storage.configure("tok", Some("/custom")).await;
    assert!(!result.success);
    assert_eq!(result.exit_code, None);
    assert!(!result.message.is_empty());
}
