use crate::error::{HandlerError, HandlerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inbound job request as it appears on the wire, before validation.
///
/// Every field is optional at this level so that one validation pass can
/// report all problems at once instead of failing on the first missing key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJobRequest {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub dataset_url: Option<String>,
    #[serde(default)]
    pub control_url: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub config_overrides: Option<BTreeMap<String, serde_yaml::Value>>,
}

impl RawJobRequest {
    /// Parses a raw invocation body, accepting either a bare request object
    /// or the serverless `{"input": {...}}` envelope.
    pub fn from_invocation(value: serde_json::Value) -> HandlerResult<Self> {
        let body = match value {
            serde_json::Value::Object(mut map) if map.contains_key("input") => {
                map.remove("input").unwrap_or(serde_json::Value::Null)
            }
            other => other,
        };
        Ok(serde_json::from_value(body)?)
    }

    /// Validates this request into an immutable [`JobRequest`].
    ///
    /// All missing/malformed fields are collected into a single
    /// [`HandlerError::Validation`] message. Empty strings in optional URL
    /// fields are treated as absent.
    pub fn validate(self) -> HandlerResult<JobRequest> {
        let mut problems = Vec::new();

        let job_id = match non_empty(self.job_id) {
            Some(id) => id,
            None => {
                problems.push("job_id is required".to_string());
                String::new()
            }
        };
        let config = match non_empty(self.config) {
            Some(config) => config,
            None => {
                problems.push("config is required".to_string());
                String::new()
            }
        };
        let dataset_url = match non_empty(self.dataset_url) {
            Some(url) => {
                check_url("dataset_url", &url, &mut problems);
                url
            }
            None => {
                problems.push("dataset_url is required".to_string());
                String::new()
            }
        };

        let control_url = non_empty(self.control_url);
        if let Some(ref url) = control_url {
            check_url("control_url", url, &mut problems);
        }
        let webhook_url = non_empty(self.webhook_url);
        if let Some(ref url) = webhook_url {
            check_url("webhook_url", url, &mut problems);
        }

        if !problems.is_empty() {
            return Err(HandlerError::Validation(problems.join("; ")));
        }

        Ok(JobRequest {
            job_id,
            config,
            dataset_url,
            control_url,
            webhook_url,
            config_overrides: self.config_overrides,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn check_url(field: &str, url: &str, problems: &mut Vec<String>) {
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        _ => problems.push(format!("{field} is not a valid URL")),
    }
}

/// A validated job request. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: String,
    /// Base64-encoded YAML configuration blob.
    pub config: String,
    pub dataset_url: String,
    pub control_url: Option<String>,
    pub webhook_url: Option<String>,
    /// Dotted/indexed key-path overrides applied to the decoded config.
    pub config_overrides: Option<BTreeMap<String, serde_yaml::Value>>,
}

/// Outcome of a single job.
///
/// Superset of the result shapes observed across callers: `message` and
/// `model_url` on success, `error` on failure, `images` carried for callers
/// that expect it. Exactly one of the success shape or `error` is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
            model_url: None,
            images: None,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self { ok: false, message: None, model_url: None, images: None, error: Some(error.into()) }
    }
}

/// Response envelope returned to the invoker. Always a single-element
/// `results` list here; the list shape is kept for batch compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardResponse {
    pub results: Vec<JobResult>,
}

impl StandardResponse {
    #[must_use]
    pub fn single(result: JobResult) -> Self {
        Self { results: vec![result] }
    }
}
