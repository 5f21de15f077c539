//! Scripted download engine for integration tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use media_dl::{DownloadEngine, EngineEvent, EngineFailure, EngineJob, ResultMetadata};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// What one attempt of a source does
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Report two progress steps, then succeed after `delay`
    Succeed { delay: Duration },
    /// Fail with the given raw message
    Fail(String),
    /// Wait until cancelled, then acknowledge
    WaitForCancel,
}

/// Engine that maps source refs to behaviors and counts concurrent attempts
pub struct ScriptedEngine {
    behaviors: Mutex<HashMap<String, Behavior>>,
    default: Behavior,
    started: Mutex<Vec<(String, u32)>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn succeeding(delay: Duration) -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            default: Behavior::Succeed { delay },
            started: Mutex::new(Vec::new()),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, source_ref: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(source_ref.to_string(), behavior);
    }

    /// `(source_ref, attempt)` of every invocation, in order
    pub fn started(&self) -> Vec<(String, u32)> {
        self.started.lock().unwrap().clone()
    }

    pub fn calls_for(&self, source_ref: &str) -> usize {
        self.started()
            .iter()
            .filter(|(source, _)| source == source_ref)
            .count()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct Running(Arc<AtomicUsize>);

impl Drop for Running {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DownloadEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn execute(&self, job: EngineJob, cancel: CancellationToken) -> BoxStream<'static, EngineEvent> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&job.source_ref)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        self.started
            .lock()
            .unwrap()
            .push((job.source_ref.clone(), job.attempt));

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = Running(Arc::clone(&self.running));
        let title = job.source_ref;

        spawn_stream(move |tx| async move {
            let _guard = guard;
            match behavior {
                Behavior::Succeed { delay } => {
                    tx.send(EngineEvent::Progress { percent: 10.0, rate_bps: Some(2048), eta: Some(delay) }).ok();
                    let cancelled = tokio::select! {
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if cancelled {
                        tx.send(EngineEvent::Failure(EngineFailure::new("interrupted"))).ok();
                        return;
                    }
                    tx.send(EngineEvent::Progress { percent: 100.0, rate_bps: Some(2048), eta: None }).ok();
                    tx.send(EngineEvent::Success(ResultMetadata {
                        title: Some(title),
                        ..Default::default()
                    }))
                    .ok();
                }
                Behavior::Fail(message) => {
                    tx.send(EngineEvent::Failure(EngineFailure::new(message))).ok();
                }
                Behavior::WaitForCancel => {
                    cancel.cancelled().await;
                    tx.send(EngineEvent::Failure(EngineFailure::new("interrupted"))).ok();
                }
            }
        })
    }
}

/// Run `producer` on its own task and stream whatever it sends; dropping the
/// stream aborts the task
fn spawn_stream<F, Fut>(producer: F) -> BoxStream<'static, EngineEvent>
where
    F: FnOnce(UnboundedSender<EngineEvent>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
    let task = tokio::spawn(producer(sender));

    futures::stream::unfold(
        (receiver, AbortOnDrop(task.abort_handle())),
        |(mut receiver, abort)| async move {
            let Some(event) = receiver.recv().await else {
                return None;
            };
            Some((event, (receiver, abort)))
        },
    )
    .boxed()
}

struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
