use crate::error::{HandlerError, HandlerResult};
use crate::settings::StorageSettings;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3;
use object_store::{ObjectStore, PutPayload};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

/// Key prefix under which all job artifacts are stored.
pub const OUTPUT_PREFIX: &str = "models";

/// Builds the per-job object key for an artifact filename.
#[must_use]
pub fn artifact_key(job_id: &str, filename: &str) -> String {
    format!("{}/{}/{}", OUTPUT_PREFIX, job_id, filename)
}

/// Destination for trained model artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Uploads a local file under `key` and returns its public URL.
    async fn upload(&self, local_path: &Path, key: &str) -> HandlerResult<String>;
}

/// S3-compatible artifact store (Cloudflare R2 in production).
#[derive(Debug)]
pub struct S3Store {
    store: AmazonS3,
    public_url: String,
}

impl S3Store {
    pub fn new(settings: &StorageSettings) -> HandlerResult<Self> {
        let store = object_store::aws::AmazonS3Builder::new()
            .with_endpoint(&settings.endpoint)
            .with_access_key_id(&settings.access_key)
            .with_secret_access_key(&settings.secret_key)
            .with_bucket_name(&settings.bucket)
            .with_region("auto")
            .build()
            .map_err(|e| HandlerError::Config(format!("failed to build storage client: {}", e)))?;

        Ok(Self { store, public_url: settings.public_url.trim_end_matches('/').to_string() })
    }
}

#[async_trait]
impl ArtifactStore for S3Store {
    async fn upload(&self, local_path: &Path, key: &str) -> HandlerResult<String> {
        let data = tokio::fs::read(local_path).await?;
        let location = object_store::path::Path::parse(key)
            .map_err(|e| HandlerError::Upload(format!("invalid object key {}: {}", key, e)))?;
        self.store
            .put(&location, PutPayload::from(Bytes::from(data)))
            .await
            .map_err(|e| HandlerError::Upload(format!("failed to upload {}: {}", key, e)))?;
        debug!(key = %key, "artifact uploaded");
        Ok(format!("{}/{}", self.public_url, key))
    }
}

/// In-memory artifact store for tests.
///
/// Records every successful upload key in order and can be told to fail
/// uploads for specific keys, either permanently or for the first N
/// attempts.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    uploads: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, usize>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every upload of `key` fail.
    pub async fn fail_key(&self, key: &str) {
        self.failures.lock().await.insert(key.to_string(), usize::MAX);
    }

    /// Makes the first `times` uploads of `key` fail, then succeed.
    pub async fn fail_key_times(&self, key: &str, times: usize) {
        self.failures.lock().await.insert(key.to_string(), times);
    }

    /// Successful upload keys, in upload order.
    pub async fn uploads(&self) -> Vec<String> {
        self.uploads.lock().await.clone()
    }

    /// Number of successful uploads recorded for `key`.
    pub async fn upload_count(&self, key: &str) -> usize {
        self.uploads.lock().await.iter().filter(|k| k.as_str() == key).count()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    async fn upload(&self, local_path: &Path, key: &str) -> HandlerResult<String> {
        // Read the file so a missing local path fails here the same way it
        // would against a real store.
        tokio::fs::read(local_path).await?;

        let mut failures = self.failures.lock().await;
        if let Some(remaining) = failures.get_mut(key) {
            if *remaining > 0 {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                return Err(HandlerError::Upload(format!("injected failure for {}", key)));
            }
        }
        drop(failures);

        self.uploads.lock().await.push(key.to_string());
        Ok(format!("memory://{}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_artifact_key_shape() {
        assert_eq!(artifact_key("job-1", "lora.safetensors"), "models/job-1/lora.safetensors");
    }

    #[tokio::test]
    async fn test_in_memory_store_records_uploads() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.safetensors");
        std::fs::write(&file, b"weights").unwrap();

        let store = InMemoryStore::new();
        let url = store.upload(&file, "models/job-1/a.safetensors").await.unwrap();

        assert_eq!(url, "memory://models/job-1/a.safetensors");
        assert_eq!(store.uploads().await, vec!["models/job-1/a.safetensors".to_string()]);
    }

    #[tokio::test]
    async fn test_in_memory_store_injects_bounded_failures() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.safetensors");
        std::fs::write(&file, b"weights").unwrap();

        let store = InMemoryStore::new();
        store.fail_key_times("k", 2).await;

        assert!(store.upload(&file, "k").await.is_err());
        assert!(store.upload(&file, "k").await.is_err());
        assert!(store.upload(&file, "k").await.is_ok());
        assert_eq!(store.upload_count("k").await, 1);
    }

    #[tokio::test]
    async fn test_in_memory_store_fails_on_missing_file() {
        let store = InMemoryStore::new();
        let missing = Path::new("/definitely/not/here.safetensors");
        assert!(store.upload(missing, "k").await.is_err());
    }
}
