//! Custom waits and assertions for integration tests

use std::time::Duration;

use media_dl::{Event, Job, JobId, JobState, MediaDownloader};

/// Outcome observed on the event stream for one job
#[derive(Debug, PartialEq)]
pub enum WaitResult {
    Completed,
    Failed(String),
    Cancelled,
    Skipped,
    Timeout,
    ChannelClosed,
}

/// Wait for a job's terminal event
///
/// Subscribe before the job can finish, then pass the receiver in.
pub async fn wait_for_outcome(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    id: JobId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Completed { id: event_id, .. }) if event_id == id => {
                    return WaitResult::Completed;
                }
                Ok(Event::Failed {
                    id: event_id,
                    reason,
                    ..
                }) if event_id == id => return WaitResult::Failed(reason),
                Ok(Event::Cancelled { id: event_id }) if event_id == id => {
                    return WaitResult::Cancelled;
                }
                Ok(Event::Skipped { id: event_id }) if event_id == id => {
                    return WaitResult::Skipped;
                }
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// Poll until every job is terminal, returning their final snapshots
pub async fn wait_all_terminal(downloader: &MediaDownloader, ids: &[JobId]) -> Vec<Job> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            jobs.push(downloader.get_job(*id).await.expect("job exists"));
        }
        if jobs.iter().all(Job::is_terminal) {
            return jobs;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for jobs: {:?}",
            jobs.iter().map(|job| (job.id, job.state)).collect::<Vec<_>>()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Assert a job's current state
pub async fn assert_state(downloader: &MediaDownloader, id: JobId, expected: JobState) {
    let job = downloader.get_job(id).await.expect("job exists");
    assert_eq!(job.state, expected, "job {id} state");
}
