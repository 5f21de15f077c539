use std::time::{Duration, Instant};

use crate::downloader::progress::ProgressThrottle;
use crate::downloader::test_helpers::{MockEngine, Step, create_test_downloader_with, request, wait_for_state};
use crate::types::{Event, JobState};

// --- ProgressThrottle ---

#[test]
fn test_throttle_lets_first_event_through() {
    let mut throttle = ProgressThrottle::new(Duration::from_millis(500));
    assert!(throttle.ready(Instant::now()));
}

#[test]
fn test_throttle_drops_events_within_interval() {
    let mut throttle = ProgressThrottle::new(Duration::from_millis(500));
    let start = Instant::now();

    assert!(throttle.ready(start));
    assert!(!throttle.ready(start + Duration::from_millis(100)));
    assert!(!throttle.ready(start + Duration::from_millis(499)));
    assert!(throttle.ready(start + Duration::from_millis(500)));
    assert!(!throttle.ready(start + Duration::from_millis(600)));
}

#[test]
fn test_zero_interval_forwards_everything() {
    let mut throttle = ProgressThrottle::new(Duration::ZERO);
    let now = Instant::now();
    assert!(throttle.ready(now));
    assert!(throttle.ready(now));
}

// --- end to end ---

#[tokio::test]
async fn test_progress_burst_is_throttled() {
    let mut script: Vec<Step> = (1..=50).map(|n| Step::Progress(n as f32 * 2.0)).collect();
    script.push(Step::Succeed);
    let engine = MockEngine::with_default(script);
    let (downloader, _engine, _temp_dir) = create_test_downloader_with(engine, |config| {
        config.progress.throttle_interval = Duration::from_secs(10);
    })
    .await;
    let mut events = downloader.subscribe();
    downloader.start().await.unwrap();

    let job = downloader.enqueue(request("test:burst")).await.unwrap();
    wait_for_state(&downloader, job.id, JobState::Completed).await;

    let mut progress = Vec::new();
    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::Progress(update) if update.job_id == job.id => progress.push(update),
            Event::Completed { id, .. } if id == job.id => completed = true,
            _ => {}
        }
    }

    assert_eq!(progress.len(), 1, "one update per interval");
    assert_eq!(progress[0].percent, 2.0);
    assert_eq!(progress[0].rate_bps, Some(1024));
    assert!(completed, "terminal event is never throttled");

    downloader.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_progress_updates_job_percent() {
    let engine = MockEngine::with_default(vec![
        Step::Progress(40.0),
        Step::Sleep(Duration::from_secs(30)),
        Step::Succeed,
    ]);
    let (downloader, _engine, _temp_dir) = create_test_downloader_with(engine, |_| {}).await;
    downloader.start().await.unwrap();

    let job = downloader.enqueue(request("test:pct")).await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let current = downloader.get_job(job.id).await.unwrap();
        if current.percent == 40.0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "percent never updated");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    downloader.shutdown().await.unwrap();
}
