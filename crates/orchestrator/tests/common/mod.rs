#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fleetcrypt_events::FleetEvent;
use tokio::sync::broadcast;

/// How long a test waits for an expected event before failing.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Write an executable `/bin/sh` script named `name` into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod script");
    path
}

/// A worker that announces its address and then idles until signalled.
pub fn sleeper_worker(dir: &Path) -> PathBuf {
    write_script(dir, "worker.sh", "echo \"worker listening on $1\"\nexec sleep 30")
}

/// Receive events until one matches `pred`, failing after [`EVENT_TIMEOUT`].
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<FleetEvent>, mut pred: F) -> FleetEvent
where
    F: FnMut(&FleetEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Drain every event already buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<FleetEvent>) -> Vec<FleetEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Text of every job event of the given kind, in order.
pub fn texts(events: &[FleetEvent], kind: &str) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.kind() == kind)
        .filter_map(|e| match e {
            FleetEvent::JobOutput { text, .. }
            | FleetEvent::JobWarning { text, .. }
            | FleetEvent::JobError { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect()
}
