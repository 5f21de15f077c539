//! Shared test helpers: a scripted engine and MediaDownloader instances with short timings.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tempfile::{TempDir, tempdir};
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveStore;
use crate::config::Config;
use crate::db::Database;
use crate::downloader::MediaDownloader;
use crate::engine::{DownloadEngine, EngineEvent, EngineFailure, EngineJob, ResultMetadata};
use crate::types::{Job, JobId, JobRequest, JobState};

/// One scripted engine action
#[derive(Clone, Debug)]
pub(crate) enum Step {
    /// Report progress
    Progress(f32),
    /// Wait; a cancel during the wait is acknowledged with a failure event
    Sleep(Duration),
    /// Wait without watching the cancellation token
    Busy(Duration),
    /// Report success (title = source_ref)
    Succeed,
    /// Trip the job's token, then report success in the same poll
    CancelThenSucceed,
    /// Report failure
    Fail(EngineFailure),
    /// Panic inside the stream
    Panic,
    /// Never yield again and ignore cancellation
    Hang,
    /// End the stream without a terminal event
    EndWithoutResult,
}

/// Engine test double: plays a script per attempt and records every invocation
pub(crate) struct MockEngine {
    /// Per source_ref: one script per attempt; the last one repeats
    scripts: Mutex<HashMap<String, VecDeque<Vec<Step>>>>,
    default_script: Vec<Step>,
    invocations: Mutex<Vec<EngineJob>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl MockEngine {
    /// Engine whose jobs succeed after a short delay
    pub(crate) fn new() -> Self {
        Self::with_default(vec![Step::Sleep(Duration::from_millis(20)), Step::Succeed])
    }

    pub(crate) fn with_default(default_script: Vec<Step>) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_script,
            invocations: Mutex::new(Vec::new()),
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Script every attempt of `source_ref` the same way
    pub(crate) fn script(&self, source_ref: &str, steps: Vec<Step>) {
        self.script_attempts(source_ref, vec![steps]);
    }

    /// Script successive attempts of `source_ref`
    pub(crate) fn script_attempts(&self, source_ref: &str, attempts: Vec<Vec<Step>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(source_ref.to_string(), attempts.into());
    }

    pub(crate) fn invocations(&self) -> Vec<EngineJob> {
        self.invocations.lock().unwrap().clone()
    }

    pub(crate) fn invocation_count(&self, source_ref: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|job| job.source_ref == source_ref)
            .count()
    }

    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn next_script(&self, source_ref: &str) -> Vec<Step> {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(source_ref) {
            Some(attempts) if attempts.len() > 1 => attempts.pop_front().unwrap(),
            Some(attempts) => attempts.front().cloned().unwrap_or_default(),
            None => self.default_script.clone(),
        }
    }
}

/// Decrements the running counter when the stream is dropped
struct RunGuard(Arc<AtomicUsize>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Playback {
    steps: VecDeque<Step>,
    cancel: CancellationToken,
    title: String,
    _guard: RunGuard,
}

impl DownloadEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn execute(&self, job: EngineJob, cancel: CancellationToken) -> BoxStream<'static, EngineEvent> {
        let steps: VecDeque<Step> = self.next_script(&job.source_ref).into();
        let title = job.source_ref.clone();
        self.invocations.lock().unwrap().push(job);

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        let playback = Playback {
            steps,
            cancel,
            title,
            _guard: RunGuard(Arc::clone(&self.running)),
        };

        stream::unfold(playback, |mut playback| async move {
            loop {
                let Some(step) = playback.steps.pop_front() else {
                    return None;
                };
                match step {
                    Step::Progress(percent) => {
                        let event = EngineEvent::Progress {
                            percent,
                            rate_bps: Some(1024),
                            eta: Some(Duration::from_secs(1)),
                        };
                        return Some((event, playback));
                    }
                    Step::Sleep(duration) => {
                        let cancelled = tokio::select! {
                            _ = playback.cancel.cancelled() => true,
                            _ = tokio::time::sleep(duration) => false,
                        };
                        if cancelled {
                            playback.steps.clear();
                            let event = EngineEvent::Failure(EngineFailure::new("cancelled by user"));
                            return Some((event, playback));
                        }
                    }
                    Step::Busy(duration) => tokio::time::sleep(duration).await,
                    Step::CancelThenSucceed => {
                        playback.cancel.cancel();
                        playback.steps.push_front(Step::Succeed);
                    }
                    Step::Succeed => {
                        playback.steps.clear();
                        let event = EngineEvent::Success(ResultMetadata {
                            title: Some(playback.title.clone()),
                            bytes: Some(1024),
                            ..Default::default()
                        });
                        return Some((event, playback));
                    }
                    Step::Fail(failure) => {
                        playback.steps.clear();
                        return Some((EngineEvent::Failure(failure), playback));
                    }
                    Step::Panic => panic!("scripted engine panic"),
                    Step::Hang => std::future::pending::<()>().await,
                    Step::EndWithoutResult => return None,
                }
            }
        })
        .boxed()
    }
}

/// Short timings so tests finish quickly
pub(crate) fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("history.db");
    config.archive.path = dir.join("archive.txt");
    config.queue.max_concurrent_jobs = 2;
    config.queue.idle_poll_interval = Duration::from_millis(10);
    config.queue.cancel_ack_timeout = Duration::from_millis(200);
    config.queue.shutdown_grace_period = Duration::from_millis(500);
    config.retry.base_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.scheduler.tick_interval = Duration::from_millis(10);
    config.progress.throttle_interval = Duration::from_millis(20);
    config.tools.search_path = false;
    config
}

/// Helper to create a test MediaDownloader with a scripted engine and an in-memory history.
/// Returns the downloader, the engine and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader() -> (MediaDownloader, Arc<MockEngine>, TempDir) {
    create_test_downloader_with(MockEngine::new(), |_| {}).await
}

pub(crate) async fn create_test_downloader_with(
    engine: MockEngine,
    configure: impl FnOnce(&mut Config),
) -> (MediaDownloader, Arc<MockEngine>, TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    configure(&mut config);

    let engine = Arc::new(engine);
    let archive = ArchiveStore::open(&config.archive.path).await.unwrap();
    let history = Database::in_memory().await.unwrap();

    let downloader = MediaDownloader::with_stores(
        config,
        Arc::clone(&engine) as Arc<dyn DownloadEngine>,
        Arc::new(archive),
        Arc::new(history),
    )
    .unwrap();

    (downloader, engine, temp_dir)
}

pub(crate) fn request(source_ref: &str) -> JobRequest {
    JobRequest::new(source_ref, serde_json::json!({ "format": "best" }))
}

/// Poll until the job reaches `state`, panicking after two seconds
pub(crate) async fn wait_for_state(downloader: &MediaDownloader, id: JobId, state: JobState) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let job = downloader.get_job(id).await.unwrap();
        if job.state == state {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} stuck in {} waiting for {state}",
            job.state
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until every listed job is terminal
pub(crate) async fn wait_for_terminal(downloader: &MediaDownloader, ids: &[JobId]) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let mut all_done = true;
        for id in ids {
            if !downloader.get_job(*id).await.unwrap().is_terminal() {
                all_done = false;
            }
        }
        if all_done {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "jobs did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
