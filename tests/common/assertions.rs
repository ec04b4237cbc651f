//! Custom test assertions for integration tests

use relay_dl::{Event, JobId, JobStatus, Relay};
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

/// Wait for an event matching `predicate` on an existing subscription
///
/// Subscribe before triggering the work so early events are not missed.
pub async fn wait_for_event<F>(
    events: &mut Receiver<Event>,
    timeout: Duration,
    predicate: F,
) -> Option<Event>
where
    F: Fn(&Event) -> bool,
{
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    })
    .await;

    result.ok().flatten()
}

/// Wait until `id` reaches a terminal status and return it
pub async fn wait_for_finished(
    events: &mut Receiver<Event>,
    id: &JobId,
    timeout: Duration,
) -> Option<JobStatus> {
    match wait_for_event(events, timeout, |e| {
        matches!(e, Event::JobFinished { id: event_id, .. } if event_id == id)
    })
    .await
    {
        Some(Event::JobFinished { status, .. }) => Some(status),
        _ => None,
    }
}

/// Assert the stored status of a job
pub async fn assert_job_status(relay: &Relay, id: &JobId, expected: JobStatus) {
    let job = relay
        .manager()
        .get_job(id)
        .await
        .unwrap_or_else(|e| panic!("Job {id} not readable: {e}"));
    assert_eq!(
        job.status, expected,
        "Job {id} status mismatch (error: {:?})",
        job.error
    );
}

/// Assert that files exist in a directory
pub fn assert_files_exist(dir: &Path, expected_files: &[&str]) {
    for filename in expected_files {
        let path = dir.join(filename);
        assert!(path.exists(), "Expected file not found: {}", path.display());
    }
}
