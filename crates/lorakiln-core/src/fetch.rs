use crate::error::{HandlerError, HandlerResult};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Download timeout. Datasets can be large; this bounds the whole transfer
/// rather than individual reads.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(4096);

/// Downloads zip archives and extracts them into workspace directories.
#[derive(Debug, Clone)]
pub struct ArchiveFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl ArchiveFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self { client: reqwest::Client::new(), timeout: DOWNLOAD_TIMEOUT }
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { client: reqwest::Client::new(), timeout }
    }

    /// Downloads `url` into `archive_path`, extracts the archive into
    /// `dest_dir` (created if absent), and removes the archive file.
    ///
    /// Non-2xx responses fail with [`HandlerError::Download`]. The body is
    /// streamed to disk so large datasets never sit fully in memory.
    pub async fn fetch_and_extract(
        &self,
        url: &str,
        archive_path: &Path,
        dest_dir: &Path,
    ) -> HandlerResult<()> {
        info!(url = %url, dest = %dest_dir.display(), "downloading archive");

        let response = self.client.get(url).timeout(self.timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HandlerError::Download { status: status.as_u16(), url: url.to_string() });
        }

        if let Some(parent) = archive_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(archive_path).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        info!(url = %url, bytes = written, "archive downloaded");

        std::fs::create_dir_all(dest_dir)?;
        let archive_file = std::fs::File::open(archive_path)?;
        let mut archive = zip::ZipArchive::new(archive_file)?;
        archive.extract(dest_dir)?;
        info!(dest = %dest_dir.display(), entries = archive.len(), "archive extracted");

        // The archive is transient; extraction already succeeded, so a
        // failed removal is not worth failing the job over.
        if let Err(e) = std::fs::remove_file(archive_path) {
            warn!(path = %archive_path.display(), error = %e, "failed to remove archive");
        }

        Ok(())
    }
}

impl Default for ArchiveFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn build_zip() -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("img1.png", options).unwrap();
            writer.write_all(b"fake image").unwrap();
            writer.start_file("labels/caption.txt", options).unwrap();
            writer.write_all(b"a caption").unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[tokio::test]
    async fn test_fetch_and_extract_unpacks_archive() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/data.zip")
            .with_status(200)
            .with_body(build_zip())
            .create_async()
            .await;

        let temp = TempDir::new().unwrap();
        let archive_path = temp.path().join("dataset.zip");
        let dest = temp.path().join("dataset");

        let fetcher = ArchiveFetcher::new();
        fetcher
            .fetch_and_extract(&format!("{}/data.zip", server.url()), &archive_path, &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(dest.join("img1.png")).unwrap(), b"fake image");
        assert_eq!(std::fs::read(dest.join("labels/caption.txt")).unwrap(), b"a caption");
        // The transient archive file is gone.
        assert!(!archive_path.exists());
    }

    #[tokio::test]
    async fn test_fetch_fails_with_status_on_404() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("GET", "/data.zip").with_status(404).create_async().await;

        let temp = TempDir::new().unwrap();
        let fetcher = ArchiveFetcher::new();
        let err = fetcher
            .fetch_and_extract(
                &format!("{}/data.zip", server.url()),
                &temp.path().join("dataset.zip"),
                &temp.path().join("dataset"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Download { status: 404, .. }));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_fetch_fails_on_corrupt_archive() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/data.zip")
            .with_status(200)
            .with_body(b"this is not a zip file")
            .create_async()
            .await;

        let temp = TempDir::new().unwrap();
        let fetcher = ArchiveFetcher::new();
        let err = fetcher
            .fetch_and_extract(
                &format!("{}/data.zip", server.url()),
                &temp.path().join("dataset.zip"),
                &temp.path().join("dataset"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Archive(_)));
    }
}
