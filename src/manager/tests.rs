use super::*;
use crate::test_helpers::create_test_manager;
use crate::types::{FileStatus, FileUpdate, JobStatus};
use chrono::{TimeDelta, Utc};
use std::collections::BTreeSet;
use std::time::Duration;

async fn job_with_downloaded_files(manager: &JobManager, names: &[&str]) -> JobId {
    let id = manager.create_job("https://example.com/x").await.unwrap();
    manager
        .set_job_status(&id, JobStatus::Downloading, None)
        .await
        .unwrap();
    for name in names {
        manager
            .register_file(&id, name, &format!("https://example.com/x/{name}"))
            .await
            .unwrap();
        manager
            .set_file_status(
                &id,
                name,
                FileUpdate::status(FileStatus::Downloaded).with_file_size(100),
            )
            .await
            .unwrap();
    }
    id
}

#[tokio::test]
async fn test_end_to_end_partial_completion() {
    let (manager, _dir) = create_test_manager().await;

    let id = manager.create_job("https://example.com/x").await.unwrap();
    manager
        .register_file(&id, "a.jpg", "https://example.com/x/a")
        .await
        .unwrap();
    manager
        .register_file(&id, "b.jpg", "https://example.com/x/b")
        .await
        .unwrap();
    for name in ["a.jpg", "b.jpg"] {
        manager
            .set_file_status(&id, name, FileUpdate::status(FileStatus::Downloaded))
            .await
            .unwrap();
    }

    let claimed = manager.claim_downloaded_files(&id).await.unwrap();
    assert_eq!(claimed, vec!["a.jpg", "b.jpg"]);
    let job = manager.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Uploading);
    assert!(job.files.values().all(|f| f.status == FileStatus::Uploading));

    manager
        .set_file_status(&id, "a.jpg", FileUpdate::status(FileStatus::Uploaded))
        .await
        .unwrap();
    manager
        .set_file_status(
            &id,
            "b.jpg",
            FileUpdate::status(FileStatus::Failed).with_error("boom"),
        )
        .await
        .unwrap();

    let status = manager.finalize_job(&id).await.unwrap();
    assert_eq!(status, JobStatus::PartiallyCompleted);

    let job = manager.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::PartiallyCompleted);
    assert_eq!(job.error, None);
    assert!(job.end_time.is_some());
    assert_eq!(job.files["b.jpg"].error.as_deref(), Some("boom"));
    assert_eq!(job.files["a.jpg"].error, None);
    assert!(job.files["a.jpg"].upload_time.is_some());
}

#[tokio::test]
async fn test_concurrent_claims_are_disjoint() {
    let (manager, _dir) = create_test_manager().await;
    let names: Vec<String> = (1..=12).map(|i| format!("post_{i}of12.jpg")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let id = job_with_downloaded_files(&manager, &refs).await;

    let claims = futures::future::join_all((0..8).map(|_| {
        let manager = manager.clone();
        let id = id.clone();
        tokio::spawn(async move { manager.claim_downloaded_files(&id).await.unwrap() })
    }))
    .await;

    let mut seen = BTreeSet::new();
    let mut total = 0;
    for claim in claims {
        let claim = claim.unwrap();
        total += claim.len();
        seen.extend(claim);
    }

    assert_eq!(total, 12, "a file was handed out twice");
    assert_eq!(seen, names.into_iter().collect::<BTreeSet<_>>());
}

#[tokio::test]
async fn test_claim_with_nothing_downloaded_is_empty() {
    let (manager, _dir) = create_test_manager().await;
    let id = manager.create_job("https://example.com/x").await.unwrap();
    manager
        .register_file(&id, "a.jpg", "https://example.com/x/a")
        .await
        .unwrap();

    assert!(manager.claim_downloaded_files(&id).await.unwrap().is_empty());
    assert_eq!(manager.get_job(&id).await.unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn test_finalize_is_idempotent() {
    let (manager, _dir) = create_test_manager().await;
    let id = job_with_downloaded_files(&manager, &["a.jpg"]).await;
    manager.claim_downloaded_files(&id).await.unwrap();
    manager
        .set_file_status(&id, "a.jpg", FileUpdate::status(FileStatus::Uploaded))
        .await
        .unwrap();

    assert_eq!(manager.finalize_job(&id).await.unwrap(), JobStatus::Completed);
    let first = manager.get_job(&id).await.unwrap();

    assert_eq!(manager.finalize_job(&id).await.unwrap(), JobStatus::Completed);
    let second = manager.get_job(&id).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_finalize_all_failed_and_empty_jobs() {
    let (manager, _dir) = create_test_manager().await;

    let id = job_with_downloaded_files(&manager, &["a.jpg", "b.jpg"]).await;
    manager.claim_downloaded_files(&id).await.unwrap();
    for name in ["a.jpg", "b.jpg"] {
        manager
            .set_file_status(&id, name, FileUpdate::status(FileStatus::Failed).with_error("413"))
            .await
            .unwrap();
    }
    assert_eq!(manager.finalize_job(&id).await.unwrap(), JobStatus::Failed);
    assert_eq!(
        manager.get_job(&id).await.unwrap().error.as_deref(),
        Some("all 2 files failed")
    );

    let empty = manager.create_job("https://example.com/empty").await.unwrap();
    assert_eq!(manager.finalize_job(&empty).await.unwrap(), JobStatus::Failed);
    assert_eq!(
        manager.get_job(&empty).await.unwrap().error.as_deref(),
        Some("job produced no files")
    );
}

#[tokio::test]
async fn test_finalize_with_files_in_flight_is_incomplete() {
    let (manager, _dir) = create_test_manager().await;
    let id = job_with_downloaded_files(&manager, &["a.jpg", "b.jpg"]).await;
    manager.claim_downloaded_files(&id).await.unwrap();
    manager
        .set_file_status(&id, "a.jpg", FileUpdate::status(FileStatus::Uploaded))
        .await
        .unwrap();

    match manager.finalize_job(&id).await.unwrap_err() {
        Error::Job(JobError::Incomplete { in_flight, .. }) => assert_eq!(in_flight, 1),
        other => panic!("expected incomplete, got {other:?}"),
    }
    assert_eq!(manager.get_job(&id).await.unwrap().status, JobStatus::Uploading);
}

#[tokio::test]
async fn test_unknown_job_and_file() {
    let (manager, _dir) = create_test_manager().await;
    let missing: JobId = "job_20260119_000000_000000".parse().unwrap();

    let err = manager
        .register_file(&missing, "a.jpg", "https://example.com/a")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Job(JobError::UnknownJob { .. })));

    let err = manager
        .set_job_status(&missing, JobStatus::Downloading, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Job(JobError::UnknownJob { .. })));

    let id = manager.create_job("https://example.com/x").await.unwrap();
    let err = manager
        .set_file_status(&id, "ghost.jpg", FileUpdate::status(FileStatus::Downloaded))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "unknown_file");
}

#[tokio::test]
async fn test_rejects_invalid_transitions_and_duplicates() {
    let (manager, _dir) = create_test_manager().await;
    let id = job_with_downloaded_files(&manager, &["a.jpg"]).await;

    let err = manager
        .set_file_status(&id, "a.jpg", FileUpdate::status(FileStatus::Uploaded))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Job(JobError::InvalidFileTransition { .. })));

    let err = manager
        .set_job_status(&id, JobStatus::Pending, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Job(JobError::InvalidJobTransition { .. })));

    let err = manager
        .set_job_status(&id, JobStatus::Completed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Job(JobError::Incomplete { .. })));

    let err = manager
        .register_file(&id, "a.jpg", "https://example.com/x/a")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Job(JobError::DuplicateFile { .. })));

    let err = manager
        .register_file(&id, "../escape.jpg", "https://example.com/x/e")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "invalid_filename");
}

#[tokio::test]
async fn test_create_job_rejects_bad_urls() {
    let (manager, _dir) = create_test_manager().await;

    for bad in ["not a url", "/relative/path", "ftp://example.com/file"] {
        let err = manager.create_job(bad).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_url", "{bad} should be rejected");
    }
    assert!(manager.list_jobs().await.unwrap().jobs.is_empty());
}

#[tokio::test]
async fn test_failing_a_job_fails_open_files_and_ignores_late_writes() {
    let (manager, _dir) = create_test_manager().await;
    let id = job_with_downloaded_files(&manager, &["a.jpg", "b.jpg"]).await;
    manager.claim_downloaded_files(&id).await.unwrap();
    manager
        .set_file_status(&id, "a.jpg", FileUpdate::status(FileStatus::Uploaded))
        .await
        .unwrap();

    manager
        .fail_job(&id, "Job stuck - no progress for 300 seconds")
        .await
        .unwrap();

    let job = manager.get_job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.files["a.jpg"].status, FileStatus::Uploaded);
    assert_eq!(job.files["b.jpg"].status, FileStatus::Failed);
    assert_eq!(
        job.files["b.jpg"].error.as_deref(),
        Some("Job stuck - no progress for 300 seconds")
    );

    // the abandoned transfer finishes after the job was failed
    manager
        .set_file_status(&id, "b.jpg", FileUpdate::status(FileStatus::Uploaded))
        .await
        .unwrap();
    manager
        .set_job_status(&id, JobStatus::Uploading, None)
        .await
        .unwrap();
    assert_eq!(manager.get_job(&id).await.unwrap(), job);
}

#[tokio::test]
async fn test_heartbeat_fed_by_file_updates_and_dropped_on_finish() {
    let (manager, _dir) = create_test_manager().await;
    let id = job_with_downloaded_files(&manager, &["a.jpg", "b.jpg"]).await;

    let beat = manager.heartbeat().get(&id).await.unwrap();
    assert_eq!(beat.total_files, 2);
    assert_eq!(beat.files_processed, 0);
    assert_eq!(beat.bytes_processed, 200);

    manager.claim_downloaded_files(&id).await.unwrap();
    manager
        .set_file_status(&id, "a.jpg", FileUpdate::status(FileStatus::Uploaded))
        .await
        .unwrap();
    let beat = manager.heartbeat().get(&id).await.unwrap();
    assert_eq!(beat.files_processed, 1);
    assert_eq!(beat.operation, "uploaded a.jpg");

    manager
        .set_file_status(&id, "b.jpg", FileUpdate::status(FileStatus::Uploaded))
        .await
        .unwrap();
    manager.finalize_job(&id).await.unwrap();
    assert!(manager.heartbeat().get(&id).await.is_none());
}

#[tokio::test]
async fn test_job_locks_released_when_jobs_finish() {
    let (manager, _dir) = create_test_manager().await;
    let done = job_with_downloaded_files(&manager, &["a.jpg"]).await;
    let failed = job_with_downloaded_files(&manager, &["b.jpg"]).await;
    let open = job_with_downloaded_files(&manager, &["c.jpg"]).await;
    assert_eq!(manager.locks.lock().await.len(), 3);

    manager.claim_downloaded_files(&done).await.unwrap();
    manager
        .set_file_status(&done, "a.jpg", FileUpdate::status(FileStatus::Uploaded))
        .await
        .unwrap();
    manager.finalize_job(&done).await.unwrap();
    manager.fail_job(&failed, "gone").await.unwrap();

    let locks = manager.locks.lock().await;
    assert!(!locks.contains_key(&done));
    assert!(!locks.contains_key(&failed));
    assert!(locks.contains_key(&open));
}

#[tokio::test]
async fn test_events_follow_the_lifecycle() {
    let (manager, _dir) = create_test_manager().await;
    let mut events = manager.subscribe();

    let id = job_with_downloaded_files(&manager, &["a.jpg"]).await;
    manager.claim_downloaded_files(&id).await.unwrap();
    manager
        .set_file_status(&id, "a.jpg", FileUpdate::status(FileStatus::Uploaded))
        .await
        .unwrap();
    manager.finalize_job(&id).await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }

    assert!(matches!(received.first(), Some(Event::JobCreated { .. })));
    assert_eq!(
        received.last(),
        Some(&Event::JobFinished {
            id: id.clone(),
            status: JobStatus::Completed,
            uploaded: 1,
            failed: 0,
        })
    );
    assert!(received.contains(&Event::FileStatusChanged {
        id: id.clone(),
        filename: "a.jpg".into(),
        status: FileStatus::Uploading,
    }));
}

#[tokio::test]
async fn test_set_expected_files() {
    let (manager, _dir) = create_test_manager().await;
    let id = manager.create_job("https://example.com/x").await.unwrap();

    manager.set_expected_files(&id, 4).await.unwrap();
    assert_eq!(manager.get_job(&id).await.unwrap().expected_file_count, 4);
}

#[tokio::test]
async fn test_list_jobs_reports_corrupt_records() {
    let (manager, dir) = create_test_manager().await;
    let good = manager.create_job("https://example.com/good").await.unwrap();
    let bad = manager.create_job("https://example.com/bad").await.unwrap();
    let mut events = manager.subscribe();

    std::fs::write(
        dir.path().join("jobs").join(bad.as_str()).join("job_state.json"),
        b"{ truncated",
    )
    .unwrap();
    manager.store.evict(&bad).await;

    let scan = manager.list_jobs().await.unwrap();
    assert_eq!(scan.jobs.len(), 1);
    assert_eq!(scan.jobs[0].job_id, good);
    assert_eq!(scan.corrupt.len(), 1);
    assert_eq!(scan.corrupt[0].0, bad);
    assert!(matches!(events.try_recv(), Ok(Event::CorruptJob { .. })));

    assert!(manager.get_job(&bad).await.unwrap_err().is_corruption());
}

#[tokio::test]
async fn test_cleanup_removes_only_old_finished_jobs() {
    let (manager, dir) = create_test_manager().await;

    let finished = manager.create_job("https://example.com/done").await.unwrap();
    manager.finalize_job(&finished).await.unwrap();
    let running = job_with_downloaded_files(&manager, &["a.jpg"]).await;
    std::fs::create_dir(dir.path().join("jobs").join("half_created")).unwrap();

    let age = Duration::from_secs(24 * 3600);

    let report = manager.cleanup_finished(age, Utc::now()).await.unwrap();
    assert!(report.removed.is_empty(), "finished too recently");

    let later = Utc::now() + TimeDelta::hours(25);
    let report = manager.cleanup_finished(age, later).await.unwrap();
    assert_eq!(report.removed, vec![finished.clone()]);
    assert_eq!(report.orphaned.len(), 1);

    assert!(matches!(
        manager.get_job(&finished).await.unwrap_err(),
        Error::Job(JobError::UnknownJob { .. })
    ));
    assert!(manager.get_job(&running).await.is_ok());
    assert!(dir.path().join("jobs").join("half_created").is_dir());
}
