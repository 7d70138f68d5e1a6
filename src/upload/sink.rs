use crate::error::DeliveryError;

/// Server boundary for chunk delivery.
///
/// Implementations classify every failure as transient or permanent;
/// the scheduler retries transient failures and escalates permanent
/// ones straight to the ledger.
#[async_trait::async_trait]
pub trait UploadSink: Send + Sync {
    /// Deliver one chunk. Returning `Ok` means the server acknowledged
    /// the bytes — never report success the sink did not confirm.
    async fn put_chunk(
        &self,
        session_id: &str,
        sequence: u64,
        payload: &[u8],
    ) -> Result<(), DeliveryError>;

    /// Sink name for logging
    fn name(&self) -> &str;
}

/// HTTP upload sink: `PUT {base}/sessions/{id}/chunks/{seq}` with the
/// raw chunk bytes as the body.
pub struct HttpUploadSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUploadSink {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| DeliveryError::Permanent(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl UploadSink for HttpUploadSink {
    async fn put_chunk(
        &self,
        session_id: &str,
        sequence: u64,
        payload: &[u8],
    ) -> Result<(), DeliveryError> {
        let url = format!(
            "{}/sessions/{}/chunks/{}",
            self.base_url, session_id, sequence
        );

        let response = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        // 408/429 and 5xx are worth retrying; other 4xx mean the server
        // will never accept this request as-is.
        if status.is_server_error()
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            Err(DeliveryError::Transient(format!("server returned {}", status)))
        } else {
            Err(DeliveryError::Permanent(format!("server rejected upload: {}", status)))
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
