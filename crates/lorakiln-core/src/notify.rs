use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Notification type sent when a job finishes, success or failure.
pub const NOTIFICATION_COMPLETED: &str = "COMPLETED";

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound webhook client.
///
/// Webhook delivery is best-effort: failures are logged and reported
/// through the returned bool, never escalated to the job result.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct WebhookEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    job_id: &'a str,
    payload: serde_json::Value,
}

impl WebhookNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self { client: reqwest::Client::new(), timeout: WEBHOOK_TIMEOUT }
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { client: reqwest::Client::new(), timeout }
    }

    /// Sends a completion notification. Returns whether delivery succeeded.
    pub async fn notify_completed(
        &self,
        webhook_url: &str,
        job_id: &str,
        payload: serde_json::Value,
    ) -> bool {
        let body = WebhookEnvelope { kind: NOTIFICATION_COMPLETED, job_id, payload };
        info!(job_id = %job_id, url = %webhook_url, "sending completion webhook");

        let response = match self
            .client
            .post(webhook_url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to send webhook notification");
                return false;
            }
        };

        let status = response.status();
        if status.is_success() {
            info!(job_id = %job_id, status = %status, "webhook notification delivered");
            true
        } else {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            warn!(
                job_id = %job_id,
                status = %status,
                body = %error_text,
                "webhook endpoint rejected notification"
            );
            false
        }
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}
