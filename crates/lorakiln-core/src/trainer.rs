use crate::error::{HandlerError, HandlerResult};
use crate::settings::Settings;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::info;

/// Longest slice of process output carried into an error message.
const MAX_OUTPUT_TAIL: usize = 4096;

/// Runs the Hugging Face login step and then the training process itself,
/// turning non-zero exits into [`HandlerError::Training`].
#[derive(Debug, Clone)]
pub struct TrainingSupervisor {
    auth_command: Vec<String>,
    trainer_command: Vec<String>,
    hf_token: Option<String>,
}

impl TrainingSupervisor {
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            auth_command: settings.auth_command.clone(),
            trainer_command: settings.trainer_command.clone(),
            hf_token: settings.hf_token.clone(),
        }
    }

    #[must_use]
    pub fn with_commands(
        auth_command: Vec<String>,
        trainer_command: Vec<String>,
        hf_token: Option<String>,
    ) -> Self {
        Self { auth_command, trainer_command, hf_token }
    }

    /// Authenticates and launches the trainer against `config_path`,
    /// waiting for it to exit.
    pub async fn run(&self, config_path: &Path) -> HandlerResult<()> {
        let token = self.hf_token.as_ref().ok_or_else(|| {
            HandlerError::Credential("HF_TOKEN environment variable is not set".to_string())
        })?;

        info!("authenticating with hugging face hub");
        run_step(&self.auth_command, token.as_ref(), "auth").await?;

        info!(config = %config_path.display(), "starting training run");
        run_step(&self.trainer_command, config_path.as_os_str(), "trainer").await?;
        info!("training process completed");
        Ok(())
    }
}

/// Runs `command` with `extra` appended as its final argument.
async fn run_step(
    command: &[String],
    extra: &std::ffi::OsStr,
    step: &str,
) -> HandlerResult<()> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| HandlerError::Config(format!("{step} command is empty")))?;

    let output = Command::new(program).args(args).arg(extra).output().await?;
    if !output.status.success() {
        return Err(HandlerError::Training {
            exit_code: output.status.code().unwrap_or(-1),
            output: output_tail(&output),
        });
    }
    Ok(())
}

fn output_tail(output: &Output) -> String {
    let text = if output.stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout)
    } else {
        String::from_utf8_lossy(&output.stderr)
    };
    tail(text.trim(), MAX_OUTPUT_TAIL)
}

fn tail(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
