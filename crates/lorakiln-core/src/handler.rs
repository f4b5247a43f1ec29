use crate::config;
use crate::error::HandlerResult;
use crate::fetch::ArchiveFetcher;
use crate::job::{JobRequest, JobResult, RawJobRequest, StandardResponse};
use crate::layout::WorkspaceLayout;
use crate::notify::WebhookNotifier;
use crate::settings::Settings;
use crate::storage::ArtifactStore;
use crate::trainer::TrainingSupervisor;
use crate::watcher::{sweep_once, ArtifactWatcher, UploadedSet, WatcherConfig};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Filename of the final model inside the artifact folder.
pub const MODEL_FILENAME: &str = "lora.safetensors";

const SUCCESS_MESSAGE: &str = "Training run completed successfully";

/// Pipeline phase, used as a structured logging field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validating,
    MaterializingConfig,
    FetchingDataset,
    FetchingControl,
    Training,
    FinalSweep,
    Notifying,
    CleaningUp,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validating => "VALIDATING",
            Self::MaterializingConfig => "MATERIALIZING_CONFIG",
            Self::FetchingDataset => "FETCHING_DATASET",
            Self::FetchingControl => "FETCHING_CONTROL",
            Self::Training => "TRAINING",
            Self::FinalSweep => "FINAL_SWEEP",
            Self::Notifying => "NOTIFYING",
            Self::CleaningUp => "CLEANING_UP",
        };
        f.write_str(name)
    }
}

/// Drives one training job end to end: validate, materialize config, fetch
/// archives, run the trainer under the artifact watcher, sweep, notify,
/// clean up.
pub struct JobCoordinator {
    layout: WorkspaceLayout,
    store: Arc<dyn ArtifactStore>,
    fetcher: ArchiveFetcher,
    supervisor: TrainingSupervisor,
    notifier: WebhookNotifier,
    watcher_config: WatcherConfig,
}

impl JobCoordinator {
    #[must_use]
    pub fn new(settings: &Settings, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            layout: WorkspaceLayout::new(settings.workspace_root.clone()),
            store,
            fetcher: ArchiveFetcher::new(),
            supervisor: TrainingSupervisor::new(settings),
            notifier: WebhookNotifier::new(),
            watcher_config: WatcherConfig::default(),
        }
    }

    /// Assembles a coordinator from explicit parts. Used by tests to swap
    /// in stores, short poll intervals, and stand-in trainer commands.
    #[must_use]
    pub fn with_parts(
        layout: WorkspaceLayout,
        store: Arc<dyn ArtifactStore>,
        fetcher: ArchiveFetcher,
        supervisor: TrainingSupervisor,
        notifier: WebhookNotifier,
        watcher_config: WatcherConfig,
    ) -> Self {
        Self { layout, store, fetcher, supervisor, notifier, watcher_config }
    }

    /// Handles one job request and always produces a response.
    ///
    /// Validation failures short-circuit before the workspace is touched
    /// and are neither notified nor followed by cleanup. For accepted jobs
    /// the webhook (when configured) and cleanup run whether the pipeline
    /// succeeded or failed.
    pub async fn handle(&self, raw: RawJobRequest) -> StandardResponse {
        let request = match raw.validate() {
            Ok(request) => request,
            Err(e) => {
                warn!(phase = %Phase::Validating, error = %e, "rejecting job request");
                return StandardResponse::single(JobResult::failure(e.to_string()));
            }
        };

        info!(job_id = %request.job_id, "handling training job");
        let result = match self.execute(&request).await {
            Ok(result) => result,
            Err(e) => {
                error!(job_id = %request.job_id, error = %e, "training job failed");
                JobResult::failure(e.to_string())
            }
        };

        if let Some(url) = request.webhook_url.as_deref() {
            info!(job_id = %request.job_id, phase = %Phase::Notifying, "notifying webhook");
            match serde_json::to_value(&result) {
                Ok(payload) => {
                    self.notifier.notify_completed(url, &request.job_id, payload).await;
                }
                Err(e) => {
                    warn!(job_id = %request.job_id, error = %e, "failed to serialize webhook payload");
                }
            }
        }

        info!(job_id = %request.job_id, phase = %Phase::CleaningUp, "cleaning workspace");
        if let Err(e) = self.layout.cleanup() {
            warn!(job_id = %request.job_id, error = %e, "workspace cleanup failed");
        }

        StandardResponse::single(result)
    }

    async fn execute(&self, request: &JobRequest) -> HandlerResult<JobResult> {
        info!(job_id = %request.job_id, phase = %Phase::MaterializingConfig, "materializing config");
        let config_path = config::materialize(
            &self.layout,
            &request.config,
            request.config_overrides.as_ref(),
        )?;

        info!(job_id = %request.job_id, phase = %Phase::FetchingDataset, "fetching dataset");
        self.fetcher
            .fetch_and_extract(
                &request.dataset_url,
                &self.layout.dataset_archive_path(),
                &self.layout.dataset_dir(),
            )
            .await?;

        if let Some(control_url) = request.control_url.as_deref() {
            info!(job_id = %request.job_id, phase = %Phase::FetchingControl, "fetching control images");
            self.fetcher
                .fetch_and_extract(
                    control_url,
                    &self.layout.control_archive_path(),
                    &self.layout.control_dir(),
                )
                .await?;
        }

        info!(job_id = %request.job_id, phase = %Phase::Training, "starting watched training");
        let watcher = ArtifactWatcher::new(
            self.store.clone(),
            request.job_id.clone(),
            self.layout.artifact_dir(),
        )
        .with_config(self.watcher_config.clone());
        let handle = watcher.start();

        let training = self.supervisor.run(&config_path).await;

        // Stop and drain the watcher before inspecting the training outcome
        // so mid-run uploads stay accounted for even when the trainer died.
        let mut uploaded = handle.stop().await;
        training?;

        info!(job_id = %request.job_id, phase = %Phase::FinalSweep, "sweeping artifact folder");
        sweep_once(
            self.store.as_ref(),
            &request.job_id,
            &self.layout.artifact_dir(),
            &mut uploaded,
        )
        .await;

        Ok(self.shape_result(&uploaded))
    }

    /// Builds the success result. The message gains a qualifying suffix
    /// when the final model never made it to storage, distinguishing a
    /// trainer that produced no model from an upload that failed.
    fn shape_result(&self, uploaded: &UploadedSet) -> JobResult {
        let model_url = uploaded.url_for(MODEL_FILENAME).map(str::to_string);
        let mut message = SUCCESS_MESSAGE.to_string();
        if model_url.is_none() {
            if self.layout.artifact_dir().join(MODEL_FILENAME).is_file() {
                message.push_str(" (Failed to upload model file)");
            } else {
                message.push_str(" (Model file not found)");
            }
        }

        let mut result = JobResult::success(message);
        result.model_url = model_url;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::watcher::MAX_UPLOAD_ATTEMPTS;
    use tempfile::TempDir;

    fn coordinator_with_layout(temp: &TempDir) -> (JobCoordinator, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = JobCoordinator::with_parts(
            WorkspaceLayout::new(temp.path().to_path_buf()),
            store.clone(),
            ArchiveFetcher::new(),
            TrainingSupervisor::with_commands(
                vec!["true".to_string()],
                vec!["true".to_string()],
                Some("tok".to_string()),
            ),
            WebhookNotifier::new(),
            WatcherConfig::default(),
        );
        (coordinator, store)
    }

    #[test]
    fn test_phase_display_names() {
        assert_eq!(Phase::MaterializingConfig.to_string(), "MATERIALIZING_CONFIG");
        assert_eq!(Phase::FinalSweep.to_string(), "FINAL_SWEEP");
        assert_eq!(Phase::CleaningUp.to_string(), "CLEANING_UP");
    }

    #[test]
    fn test_shape_result_with_uploaded_model() {
        let temp = TempDir::new().unwrap();
        let (coordinator, _) = coordinator_with_layout(&temp);

        let mut uploaded = UploadedSet::default();
        uploaded.mark_uploaded(MODEL_FILENAME, "https://cdn.test/models/j/lora.safetensors".to_string());

        let result = coordinator.shape_result(&uploaded);
        assert!(result.ok);
        assert_eq!(result.message.as_deref(), Some(SUCCESS_MESSAGE));
        assert_eq!(result.model_url.as_deref(), Some("https://cdn.test/models/j/lora.safetensors"));
    }

    #[test]
    fn test_shape_result_when_model_never_written() {
        let temp = TempDir::new().unwrap();
        let (coordinator, _) = coordinator_with_layout(&temp);

        let result = coordinator.shape_result(&UploadedSet::default());
        assert!(result.ok);
        assert_eq!(
            result.message.as_deref(),
            Some("Training run completed successfully (Model file not found)")
        );
        assert!(result.model_url.is_none());
    }

    #[test]
    fn test_shape_result_when_model_upload_failed() {
        let temp = TempDir::new().unwrap();
        let (coordinator, _) = coordinator_with_layout(&temp);

        let artifact_dir = temp.path().join("output").join("lora");
        std::fs::create_dir_all(&artifact_dir).unwrap();
        std::fs::write(artifact_dir.join(MODEL_FILENAME), b"weights").unwrap();

        let mut uploaded = UploadedSet::default();
        for _ in 0..MAX_UPLOAD_ATTEMPTS {
            uploaded.record_failure(MODEL_FILENAME);
        }

        let result = coordinator.shape_result(&uploaded);
        assert!(result.ok);
        assert_eq!(
            result.message.as_deref(),
            Some("Training run completed successfully (Failed to upload model file)")
        );
        assert!(result.model_url.is_none());
    }

    #[tokio::test]
    async fn test_handle_rejects_invalid_request_without_touching_workspace() {
        let temp = TempDir::new().unwrap();
        let workspace = temp.path().join("ws");
        let store = Arc::new(InMemoryStore::new());
        let coordinator = JobCoordinator::with_parts(
            WorkspaceLayout::new(workspace.clone()),
            store.clone(),
            ArchiveFetcher::new(),
            TrainingSupervisor::with_commands(
                vec!["true".to_string()],
                vec!["true".to_string()],
                Some("tok".to_string()),
            ),
            WebhookNotifier::new(),
            WatcherConfig::default(),
        );

        let response = coordinator.handle(RawJobRequest::default()).await;
        let result = &response.results[0];
        assert!(!result.ok);
        assert!(result.error.as_deref().unwrap().contains("job_id is required"));
        // No workspace directory was created for the rejected request.
        assert!(!workspace.exists());
        assert!(store.uploads().await.is_empty());
    }
}
