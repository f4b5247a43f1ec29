use crate::error::{HandlerError, HandlerResult};
use crate::layout::DEFAULT_WORKSPACE_ROOT;
use std::env;
use std::path::PathBuf;

/// Object-storage credentials and addressing.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// Base URL prefixed onto object keys to form public artifact URLs.
    pub public_url: String,
}

/// Worker configuration, resolved once at startup.
///
/// Storage credentials are required so that a misconfigured worker fails
/// fast instead of surfacing as silent per-upload failures mid-job.
#[derive(Debug, Clone)]
pub struct Settings {
    pub storage: StorageSettings,
    /// Hugging Face token handed to the authentication step. Optional at
    /// startup; its absence fails the job at training time.
    pub hf_token: Option<String>,
    pub workspace_root: PathBuf,
    /// Authentication command; the token is appended as the last argument.
    pub auth_command: Vec<String>,
    /// Trainer command; the config path is appended as the last argument.
    pub trainer_command: Vec<String>,
}

impl Settings {
    /// Loads settings from the environment.
    ///
    /// Required: `R2_ENDPOINT`, `R2_ACCESS_KEY`, `R2_SECRET_ACCESS_KEY`,
    /// `R2_BUCKET_NAME`, `R2_PUBLIC_URL`. Optional: `HF_TOKEN`,
    /// `LORAKILN_WORKSPACE`, `LORAKILN_AUTH_CMD`, `LORAKILN_TRAINER_CMD`.
    #[allow(clippy::disallowed_methods)] // env::var is the configuration surface here
    pub fn from_env() -> HandlerResult<Self> {
        let storage = StorageSettings {
            endpoint: required_var("R2_ENDPOINT")?,
            access_key: required_var("R2_ACCESS_KEY")?,
            secret_key: required_var("R2_SECRET_ACCESS_KEY")?,
            bucket: required_var("R2_BUCKET_NAME")?,
            public_url: required_var("R2_PUBLIC_URL")?,
        };

        let workspace_root = env::var("LORAKILN_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_WORKSPACE_ROOT));

        let auth_command = match env::var("LORAKILN_AUTH_CMD") {
            Ok(raw) => parse_command("LORAKILN_AUTH_CMD", &raw)?,
            Err(_) => {
                vec!["huggingface-cli".to_string(), "login".to_string(), "--token".to_string()]
            }
        };
        let trainer_command = match env::var("LORAKILN_TRAINER_CMD") {
            Ok(raw) => parse_command("LORAKILN_TRAINER_CMD", &raw)?,
            Err(_) => vec![
                "python".to_string(),
                workspace_root.join("run.py").to_string_lossy().into_owned(),
            ],
        };

        Ok(Self {
            storage,
            hf_token: env::var("HF_TOKEN").ok().filter(|token| !token.is_empty()),
            workspace_root,
            auth_command,
            trainer_command,
        })
    }
}

#[allow(clippy::disallowed_methods)]
fn required_var(name: &str) -> HandlerResult<String> {
    env::var(name).map_err(|_| HandlerError::Config(format!("{} environment variable not set", name)))
}

fn parse_command(name: &str, raw: &str) -> HandlerResult<Vec<String>> {
    let parts: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if parts.is_empty() {
        return Err(HandlerError::Config(format!("{} must not be empty", name)));
    }
    Ok(parts)
}
