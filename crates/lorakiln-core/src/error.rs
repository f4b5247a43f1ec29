use thiserror::Error;

pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid job request: {0}")]
    Validation(String),

    #[error("failed to decode config: {0}")]
    Decode(String),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("failed to download archive from {url}: status code {status}")]
    Download { status: u16, url: String },

    #[error("failed to extract archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("training process exited with code {exit_code}: {output}")]
    Training { exit_code: i32, output: String },

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
