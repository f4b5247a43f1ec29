//! LoraKiln Core
//!
//! Serverless LoRA training job handling:
//! - Validating inbound job requests (`RawJobRequest` -> `JobRequest`)
//! - Materializing base64 YAML configs with key-path overrides
//! - Fetching and extracting dataset/control archives
//! - Supervising the trainer process while a watcher uploads checkpoints
//! - Webhook notification and workspace cleanup

pub mod config;
pub mod error;
pub mod fetch;
pub mod handler;
pub mod job;
pub mod layout;
pub mod notify;
pub mod settings;
pub mod storage;
pub mod trainer;
pub mod watcher;

pub use error::{HandlerError, HandlerResult};
pub use fetch::{ArchiveFetcher, DOWNLOAD_TIMEOUT};
pub use handler::{JobCoordinator, Phase, MODEL_FILENAME};
pub use job::{JobRequest, JobResult, RawJobRequest, StandardResponse};
pub use layout::{WorkspaceLayout, DEFAULT_WORKSPACE_ROOT};
pub use notify::{WebhookNotifier, NOTIFICATION_COMPLETED};
pub use settings::{Settings, StorageSettings};
pub use storage::{artifact_key, ArtifactStore, InMemoryStore, S3Store, OUTPUT_PREFIX};
pub use trainer::TrainingSupervisor;
pub use watcher::{
    sweep_once, ArtifactWatcher, UploadedSet, WatcherConfig, WatcherHandle, ARTIFACT_SUFFIX,
    MAX_UPLOAD_ATTEMPTS,
};
