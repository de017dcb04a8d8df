use crate::error::PublishError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// One message handed to the sink. `id` is unique within a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishEntry {
    pub id: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEntry {
    pub id: String,
    /// The sink blames the entry itself; resending it cannot succeed.
    #[serde(default)]
    pub caller_fault: bool,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PublishBatchOutcome {
    #[serde(default)]
    pub failed: Vec<FailedEntry>,
}

/// Downstream fan-out with a hard per-call entry ceiling.
#[async_trait]
pub trait PublishSink: Send + Sync {
    async fn publish_batch(&self, entries: &[PublishEntry]) -> Result<PublishBatchOutcome, PublishError>;
}

#[derive(Serialize)]
struct PublishBatchRequest<'a> {
    entries: &'a [PublishEntry],
}

/// HTTP fan-out sink: POSTs `{"entries": [...]}` and reads back `{"failed": [...]}`.
pub struct WebhookSink {
    http: reqwest::Client,
    endpoint: String,
}

impl WebhookSink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, PublishError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Sink {
                code: "client_build".to_string(),
                message: e.to_string(),
                caller_fault: false,
            })?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl PublishSink for WebhookSink {
    async fn publish_batch(&self, entries: &[PublishEntry]) -> Result<PublishBatchOutcome, PublishError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&PublishBatchRequest { entries })
            .send()
            .await
            .map_err(|e| PublishError::Sink {
                code: "transport".to_string(),
                message: e.to_string(),
                caller_fault: false,
            })?;

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            // A cut-off acknowledgement says nothing about which entries landed
            Err(e) if status.is_success() => {
                return Err(PublishError::Sink {
                    code: "body_read".to_string(),
                    message: e.to_string(),
                    caller_fault: false,
                })
            }
            Err(_) => String::new(),
        };

        if !status.is_success() {
            return Err(PublishError::Sink {
                code: status.as_u16().to_string(),
                message: body,
                caller_fault: status.is_client_error(),
            });
        }

        if body.trim().is_empty() {
            return Ok(PublishBatchOutcome::default());
        }

        let outcome: PublishBatchOutcome =
            serde_json::from_str(&body).map_err(|e| PublishError::Sink {
                code: "decode".to_string(),
                message: e.to_string(),
                caller_fault: false,
            })?;
        debug!(
            sent = entries.len(),
            failed = outcome.failed.len(),
            "Publish batch acknowledged"
        );
        Ok(outcome)
    }
}

/// Stand-in used when no publish endpoint is configured: logs and accepts everything.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl PublishSink for LogSink {
    async fn publish_batch(&self, entries: &[PublishEntry]) -> Result<PublishBatchOutcome, PublishError> {
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        info!(
            count = entries.len(),
            entry_ids = %ids.join(","),
            "📭 Publishing disabled, would publish matched GMRs"
        );
        Ok(PublishBatchOutcome::default())
    }
}
