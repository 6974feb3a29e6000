// Job manager: lifecycle, stickiness of terminal states, cleanup

use std::time::Duration;
use tempfile::tempdir;

use super::common::{create_test_state, seed_source_db};
use crate::models::job::{JobKind, JobState};
use crate::models::metadata::{GenerateOptions, OptionalSections};
use crate::services::job_manager::JobRequest;
use crate::utils::ApiError;

fn request(table: &str) -> JobRequest {
    JobRequest {
        owner: "default".to_string(),
        database: "testdb".to_string(),
        schema: "main".to_string(),
        table: table.to_string(),
        options: GenerateOptions {
            sample_size: 10,
            num_samples: 1,
            max_partitions: 10,
            sections: OptionalSections::none(),
        },
    }
}

async fn wait_terminal(
    state: &crate::AppState,
    job_id: &str,
) -> crate::models::job::Job {
    for _ in 0..200 {
        let job = state.job_manager.status(job_id).unwrap();
        if job.state.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {} never reached a terminal state", job_id);
}

#[tokio::test]
async fn successful_job_stores_its_document() {
    let dir = tempdir().unwrap();
    let source = seed_source_db(dir.path()).await;
    let state = create_test_state(&source, dir.path()).await;

    let job_id = state.job_manager.submit(JobKind::Metadata, request("t"));
    let job = wait_terminal(&state, &job_id).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.progress, 1.0);
    assert!(job.error.is_none());
    let result = job.result.expect("result document");
    assert_eq!(result.table_name, "t");

    // document was written through the storage adapter before completion
    assert!(state.store.exists("testdb", "main", "t").await);
}

#[tokio::test]
async fn failed_job_records_its_error() {
    let dir = tempdir().unwrap();
    let source = seed_source_db(dir.path()).await;
    let state = create_test_state(&source, dir.path()).await;

    let job_id = state.job_manager.submit(JobKind::Metadata, request("no_such_table"));
    let job = wait_terminal(&state, &job_id).await;

    assert_eq!(job.state, JobState::Failed);
    assert!(job.error.is_some());
    assert!(job.result.is_none());
}

#[tokio::test]
async fn terminal_jobs_never_regress() {
    let dir = tempdir().unwrap();
    let source = seed_source_db(dir.path()).await;
    let state = create_test_state(&source, dir.path()).await;

    let job_id = state.job_manager.submit(JobKind::Metadata, request("t"));
    let done = wait_terminal(&state, &job_id).await;
    assert_eq!(done.state, JobState::Completed);

    // cancelling a finished job is an idempotent no-op
    let after_cancel = state.job_manager.cancel(&job_id).unwrap();
    assert_eq!(after_cancel.state, JobState::Completed);
    assert!(after_cancel.error.is_none());
}

#[tokio::test]
async fn unknown_jobs_are_not_found() {
    let dir = tempdir().unwrap();
    let source = seed_source_db(dir.path()).await;
    let state = create_test_state(&source, dir.path()).await;

    let err = state.job_manager.status("nope").unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
    let err = state.job_manager.cancel("nope").unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn cleanup_keeps_recent_and_running_jobs() {
    let dir = tempdir().unwrap();
    let source = seed_source_db(dir.path()).await;
    let state = create_test_state(&source, dir.path()).await;

    let job_id = state.job_manager.submit(JobKind::Metadata, request("t"));
    wait_terminal(&state, &job_id).await;

    // fresh terminal jobs survive the default 24h horizon
    assert_eq!(state.job_manager.cleanup(), 0);
    assert_eq!(state.job_manager.job_count(), 1);
    assert!(state.job_manager.status(&job_id).is_ok());
}

#[tokio::test]
async fn jobs_are_listed_newest_first() {
    let dir = tempdir().unwrap();
    let source = seed_source_db(dir.path()).await;
    let state = create_test_state(&source, dir.path()).await;

    let first = state.job_manager.submit(JobKind::Metadata, request("t"));
    wait_terminal(&state, &first).await;
    let second = state.job_manager.submit(JobKind::Metadata, request("empty_t"));
    wait_terminal(&state, &second).await;

    let listed = state.job_manager.list();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second);
}
