use crate::storage::{artifact_key, ArtifactStore};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Files the watcher considers artifacts. Everything else in the output
/// folder (logs, samples, optimizer state) is ignored.
pub const ARTIFACT_SUFFIX: &str = ".safetensors";

/// Total attempts per artifact before the watcher stops retrying it.
pub const MAX_UPLOAD_ATTEMPTS: u32 = 3;

/// Record of which artifacts have been uploaded, keyed by filename.
///
/// Filenames that failed [`MAX_UPLOAD_ATTEMPTS`] times are excluded from
/// further sweeps so one bad file cannot stall the rest.
#[derive(Debug, Default)]
pub struct UploadedSet {
    uploaded: BTreeMap<String, String>,
    attempts: BTreeMap<String, u32>,
}

impl UploadedSet {
    /// True when `filename` needs no further upload attempts, either
    /// because it succeeded or because its attempt budget is spent.
    #[must_use]
    pub fn is_settled(&self, filename: &str) -> bool {
        self.uploaded.contains_key(filename)
            || self.attempts.get(filename).copied().unwrap_or(0) >= MAX_UPLOAD_ATTEMPTS
    }

    pub fn mark_uploaded(&mut self, filename: &str, url: String) {
        self.uploaded.insert(filename.to_string(), url);
    }

    /// Records a failed attempt and returns the running total.
    pub fn record_failure(&mut self, filename: &str) -> u32 {
        let count = self.attempts.entry(filename.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    #[must_use]
    pub fn url_for(&self, filename: &str) -> Option<&str> {
        self.uploaded.get(filename).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.uploaded.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uploaded.is_empty()
    }
}

/// Uploads every new artifact in `folder` exactly once, returning how many
/// uploads succeeded this pass.
///
/// The folder is listed flat; the trainer writes checkpoints directly into
/// it. A missing folder is normal before the first checkpoint and counts
/// as an empty one.
pub async fn sweep_once(
    store: &dyn ArtifactStore,
    job_id: &str,
    folder: &Path,
    uploaded: &mut UploadedSet,
) -> usize {
    let Ok(entries) = std::fs::read_dir(folder) else {
        return 0;
    };

    let mut count = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(ARTIFACT_SUFFIX) || uploaded.is_settled(name) {
            continue;
        }

        let key = artifact_key(job_id, name);
        match store.upload(&path, &key).await {
            Ok(url) => {
                info!(job_id = %job_id, artifact = %name, url = %url, "artifact uploaded");
                uploaded.mark_uploaded(name, url);
                count += 1;
            }
            Err(e) => {
                let attempts = uploaded.record_failure(name);
                if attempts >= MAX_UPLOAD_ATTEMPTS {
                    warn!(
                        job_id = %job_id,
                        artifact = %name,
                        attempts,
                        error = %e,
                        "artifact upload failed, giving up"
                    );
                } else {
                    warn!(
                        job_id = %job_id,
                        artifact = %name,
                        attempts,
                        error = %e,
                        "artifact upload failed, will retry"
                    );
                }
            }
        }
    }
    count
}

/// Watcher tuning.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(5) }
    }
}

/// Polls a trainer output folder and uploads checkpoints as they appear,
/// so intermediate results survive even if the run dies later.
pub struct ArtifactWatcher {
    store: Arc<dyn ArtifactStore>,
    job_id: String,
    folder: PathBuf,
    config: WatcherConfig,
}

impl ArtifactWatcher {
    pub fn new(store: Arc<dyn ArtifactStore>, job_id: impl Into<String>, folder: PathBuf) -> Self {
        Self { store, job_id: job_id.into(), folder, config: WatcherConfig::default() }
    }

    #[must_use]
    pub fn with_config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawns the polling task. The task owns the [`UploadedSet`] for its
    /// whole life and hands it back through [`WatcherHandle::stop`].
    pub fn start(self) -> WatcherHandle {
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        let task = tokio::spawn(async move {
            let mut uploaded = UploadedSet::default();
            info!(job_id = %self.job_id, folder = %self.folder.display(), "artifact watcher started");
            loop {
                tokio::select! {
                    () = child.cancelled() => break,
                    () = time::sleep(self.config.poll_interval) => {
                        sweep_once(self.store.as_ref(), &self.job_id, &self.folder, &mut uploaded)
                            .await;
                    }
                }
            }
            info!(job_id = %self.job_id, uploaded = uploaded.len(), "artifact watcher stopped");
            uploaded
        });

        WatcherHandle { cancel, task }
    }
}

/// Running watcher. Dropping it without calling [`stop`](Self::stop) leaks
/// the task for the rest of the process; callers should always stop it.
pub struct WatcherHandle {
    cancel: CancellationToken,
    task: JoinHandle<UploadedSet>,
}

impl WatcherHandle {
    /// Cancels the polling loop and waits for it to finish, returning the
    /// set of uploads it performed.
    pub async fn stop(self) -> UploadedSet {
        self.cancel.cancel();
        match self.task.await {
            Ok(set) => set,
            Err(e) => {
                error!(error = %e, "artifact watcher task panicked");
                UploadedSet::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use tempfile::TempDir;

    fn write_artifact(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"weights").unwrap();
    }

    #[tokio::test]
    async fn test_sweep_uploads_each_artifact_once() {
        let temp = TempDir::new().unwrap();
        write_artifact(temp.path(), "step_100.safetensors");
        write_artifact(temp.path(), "step_200.safetensors");
        std::fs::write(temp.path().join("train.log"), b"noise").unwrap();

        let store = InMemoryStore::new();
        let mut uploaded = UploadedSet::default();

        let first = sweep_once(&store, "job-1", temp.path(), &mut uploaded).await;
        assert_eq!(first, 2);
        assert_eq!(uploaded.len(), 2);
        assert!(uploaded.url_for("step_100.safetensors").is_some());

        // Nothing new on the second pass.
        let second = sweep_once(&store, "job-1", temp.path(), &mut uploaded).await;
        assert_eq!(second, 0);

        let keys = store.uploads().await;
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"models/job-1/step_100.safetensors".to_string()));
        assert!(keys.contains(&"models/job-1/step_200.safetensors".to_string()));
    }

    #[tokio::test]
    async fn test_sweep_retries_failed_upload_on_next_pass() {
        let temp = TempDir::new().unwrap();
        write_artifact(temp.path(), "step_100.safetensors");

        let store = InMemoryStore::new();
        store.fail_key_times("models/job-1/step_100.safetensors", 1).await;
        let mut uploaded = UploadedSet::default();

        assert_eq!(sweep_once(&store, "job-1", temp.path(), &mut uploaded).await, 0);
        assert!(!uploaded.is_settled("step_100.safetensors"));

        assert_eq!(sweep_once(&store, "job-1", temp.path(), &mut uploaded).await, 1);
        assert!(uploaded.url_for("step_100.safetensors").is_some());
    }

    #[tokio::test]
    async fn test_sweep_gives_up_after_attempt_budget() {
        let temp = TempDir::new().unwrap();
        write_artifact(temp.path(), "step_100.safetensors");

        let store = InMemoryStore::new();
        store.fail_key("models/job-1/step_100.safetensors").await;
        let mut uploaded = UploadedSet::default();

        for _ in 0..4 {
            sweep_once(&store, "job-1", temp.path(), &mut uploaded).await;
        }

        // Three attempts, then the artifact is excluded from later passes.
        assert!(store.uploads().await.is_empty());
        assert!(uploaded.is_settled("step_100.safetensors"));
        assert!(uploaded.url_for("step_100.safetensors").is_none());
    }

    #[tokio::test]
    async fn test_sweep_tolerates_missing_folder() {
        let temp = TempDir::new().unwrap();
        let store = InMemoryStore::new();
        let mut uploaded = UploadedSet::default();

        let count = sweep_once(&store, "job-1", &temp.path().join("absent"), &mut uploaded).await;
        assert_eq!(count, 0);
        assert!(uploaded.is_empty());
    }

    #[tokio::test]
    async fn test_watcher_uploads_in_background() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::new());

        let watcher =
            ArtifactWatcher::new(store.clone(), "job-1", temp.path().to_path_buf())
                .with_config(WatcherConfig { poll_interval: Duration::from_millis(10) });
        let handle = watcher.start();

        write_artifact(temp.path(), "step_100.safetensors");
        time::sleep(Duration::from_millis(100)).await;

        let uploaded = handle.stop().await;
        assert_eq!(uploaded.len(), 1);
        assert!(uploaded.url_for("step_100.safetensors").is_some());
        assert_eq!(store.upload_count("models/job-1/step_100.safetensors").await, 1);
    }

    #[tokio::test]
    async fn test_stopped_watcher_returns_empty_set_when_idle() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::new());

        let watcher = ArtifactWatcher::new(store, "job-1", temp.path().to_path_buf())
            .with_config(WatcherConfig { poll_interval: Duration::from_millis(10) });
        let handle = watcher.start();
        time::sleep(Duration::from_millis(30)).await;

        let uploaded = handle.stop().await;
        assert!(uploaded.is_empty());
    }
}
