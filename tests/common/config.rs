//! Test configuration and downloader construction

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use media_dl::{ArchiveStore, Config, Database, DownloadEngine, MediaDownloader};
use tempfile::TempDir;

/// Config with short timings, rooted in `dir`
pub fn fast_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("history.db");
    config.archive.path = dir.join("archive.txt");
    config.queue.max_concurrent_jobs = 2;
    config.queue.idle_poll_interval = Duration::from_millis(10);
    config.queue.cancel_ack_timeout = Duration::from_millis(200);
    config.queue.shutdown_grace_period = Duration::from_millis(500);
    config.retry.base_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(40);
    config.scheduler.tick_interval = Duration::from_millis(10);
    config.progress.throttle_interval = Duration::from_millis(20);
    config.tools.search_path = false;
    config
}

/// Route `tracing` output through the test harness; set `RUST_LOG` to see it
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A started downloader backed by an on-disk database and archive.
/// The returned tempdir must be kept alive.
pub async fn start_downloader(
    engine: Arc<dyn DownloadEngine>,
    configure: impl FnOnce(&mut Config),
) -> (MediaDownloader, TempDir) {
    init_tracing();
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let mut config = fast_config(temp_dir.path());
    configure(&mut config);

    let downloader = MediaDownloader::new(config, engine)
        .await
        .expect("downloader");
    downloader.start().await.expect("start");
    (downloader, temp_dir)
}

/// A downloader sharing `archive` with other instances, with in-memory history
pub async fn downloader_with_archive(
    engine: Arc<dyn DownloadEngine>,
    archive: Arc<ArchiveStore>,
    dir: &Path,
) -> MediaDownloader {
    let history = Database::in_memory().await.expect("in-memory database");
    MediaDownloader::with_stores(fast_config(dir), engine, archive, Arc::new(history))
        .expect("downloader")
}
