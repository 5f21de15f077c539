use std::time::Duration;

use crate::archive::ArchiveEntry;
use crate::db::HistoryQuery;
use crate::downloader::test_helpers::{
    MockEngine, Step, create_test_downloader, create_test_downloader_with, request,
    wait_for_state, wait_for_terminal,
};
use crate::types::{Event, JobId, JobState};

#[tokio::test]
async fn test_worker_pool_respects_max_concurrency() {
    let engine = MockEngine::with_default(vec![Step::Sleep(Duration::from_millis(60)), Step::Succeed]);
    let (downloader, engine, _temp_dir) = create_test_downloader_with(engine, |config| {
        config.queue.max_concurrent_jobs = 2;
    })
    .await;

    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(downloader.enqueue(request(&format!("test:c{n}"))).await.unwrap().id);
    }
    downloader.start().await.unwrap();

    let mut peak_downloading = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let stats = downloader.queue_stats().await;
        peak_downloading = peak_downloading.max(stats.downloading);
        if stats.completed == 5 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "jobs did not finish");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(peak_downloading <= 2, "never more than two jobs downloading");
    assert_eq!(engine.max_running(), 2, "both slots were used");
    assert_eq!(engine.invocations().len(), 5, "each job ran exactly once");
    for id in ids {
        assert_eq!(downloader.get_job(id).await.unwrap().attempt, 1);
    }

    downloader.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_jobs_are_started_in_fifo_order() {
    let (downloader, engine, _temp_dir) =
        create_test_downloader_with(MockEngine::new(), |config| {
            config.queue.max_concurrent_jobs = 1;
        })
        .await;

    let mut ids = Vec::new();
    for n in 0..4 {
        ids.push(downloader.enqueue(request(&format!("test:f{n}"))).await.unwrap().id);
    }
    downloader.start().await.unwrap();
    wait_for_terminal(&downloader, &ids).await;

    let started: Vec<JobId> = engine.invocations().iter().map(|job| job.id).collect();
    assert_eq!(started, ids);

    downloader.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_successful_job_is_archived_and_recorded() {
    let (downloader, engine, _temp_dir) = create_test_downloader().await;
    let mut events = downloader.subscribe();
    downloader.start().await.unwrap();

    let job = downloader.enqueue(request("test:ok")).await.unwrap();
    let done = wait_for_state(&downloader, job.id, JobState::Completed).await;

    assert_eq!(done.percent, 100.0);
    assert_eq!(done.result.as_ref().unwrap().title.as_deref(), Some("test:ok"));
    assert!(
        downloader
            .archive()
            .contains(&ArchiveEntry::new("test", "ok").unwrap())
            .await
    );

    let history = downloader.history(&HistoryQuery::default()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].final_state, JobState::Completed);
    assert_eq!(history[0].attempts, 1);

    let mut saw_started = false;
    let mut saw_completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::Started { id, attempt } if id == job.id => {
                assert_eq!(attempt, 1);
                saw_started = true;
            }
            Event::Completed { id, .. } if id == job.id => {
                assert!(saw_started, "Started precedes Completed");
                saw_completed = true;
            }
            _ => {}
        }
    }
    assert!(saw_completed);

    // the same item again is skipped
    let again = downloader.enqueue(request("test:ok")).await.unwrap();
    assert_eq!(again.state, JobState::Skipped);
    assert_eq!(engine.invocation_count("test:ok"), 1);

    downloader.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_archived_between_enqueue_and_claim_is_skipped() {
    let (downloader, engine, _temp_dir) = create_test_downloader().await;

    let job = downloader.enqueue(request("test:race")).await.unwrap();
    downloader
        .archive()
        .add(ArchiveEntry::new("test", "race").unwrap())
        .await
        .unwrap();
    downloader.start().await.unwrap();

    let skipped = wait_for_state(&downloader, job.id, JobState::Skipped).await;
    assert_eq!(skipped.attempt, 0);
    assert!(engine.invocations().is_empty());

    downloader.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disabled_archive_records_nothing() {
    let (downloader, _engine, _temp_dir) =
        create_test_downloader_with(MockEngine::new(), |config| config.archive.enabled = false)
            .await;
    downloader.start().await.unwrap();

    let job = downloader.enqueue(request("test:noarch")).await.unwrap();
    wait_for_state(&downloader, job.id, JobState::Completed).await;

    assert!(downloader.archive().is_empty().await);

    downloader.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let (downloader, _engine, _temp_dir) = create_test_downloader().await;
    downloader.start().await.unwrap();
    downloader.start().await.unwrap();

    // two worker slots plus the scheduler task
    assert_eq!(downloader.queue_state.tasks.lock().await.len(), 3);

    downloader.shutdown().await.unwrap();
}
