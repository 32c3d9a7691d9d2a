//! Client for the external transcript storage service.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on one call to the transcript service.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One transcript row as stored by the transcript service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TranscriptRecord {
    pub user: String,
    pub message: String,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl TranscriptRecord {
    /// A record stamped with the current time.
    pub fn now(user: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("Transcript service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Transcript service returned {0}: {1}")]
    Status(StatusCode, String),
}

/// Audit log of what participants said.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptLog: Send + Sync {
    async fn save(&self, record: TranscriptRecord) -> Result<(), TranscriptError>;

    /// All records, newest first.
    async fn list(&self) -> Result<Vec<TranscriptRecord>, TranscriptError>;
}

/// `TranscriptLog` backed by the transcript service's HTTP API.
pub struct HttpTranscriptLog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTranscriptLog {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TranscriptError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}/", self.base_url, endpoint)
    }
}

#[async_trait]
impl TranscriptLog for HttpTranscriptLog {
    async fn save(&self, record: TranscriptRecord) -> Result<(), TranscriptError> {
        let response = self
            .client
            .post(self.url("save_transcript"))
            .json(&record)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptError::Status(status, body));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TranscriptRecord>, TranscriptError> {
        let response = self.client.get(self.url("get_transcripts")).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptError::Status(status, body));
        }
        let mut records: Vec<TranscriptRecord> = response.json().await?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }
}
