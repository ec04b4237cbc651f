use super::*;
use crate::config::StoreConfig;
use chrono::{DateTime, TimeZone, Utc};


async fn open_store(root: &Path) -> JobStore {
    JobStore::open(&StoreConfig {
        jobs_dir: root.to_path_buf(),
        keep_backup: true,
    })
    .await
    .unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 19, 10, 0, 0).unwrap()
}

fn job_id(suffix: &str) -> JobId {
    format!("job_20260119_100000_{suffix}").parse().unwrap()
}
