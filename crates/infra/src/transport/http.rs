use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument};

use crate::config::SubmissionConfig;

use super::{SubmissionTransport, TransportError, TransportResponse};

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Posts billing documents to the settlement gateway over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSubmissionTransport {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpSubmissionTransport {
    /// `timeout` bounds each request at the HTTP client level.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))?;

        Self::with_client(client, endpoint)
    }

    /// Gateway URL and per-request timeout taken from `config`.
    pub fn from_config(config: &SubmissionConfig) -> Result<Self, TransportError> {
        Self::new(&config.gateway_url, config.transmit_deadline)
    }

    /// Post to `endpoint` through an already configured client.
    pub fn with_client(client: reqwest::Client, endpoint: &str) -> Result<Self, TransportError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme '{}'",
                endpoint.scheme()
            )));
        }

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SubmissionTransport for HttpSubmissionTransport {
    #[instrument(skip(self, payload), fields(payload_len = payload.len()), err)]
    async fn send(
        &self,
        payload: &str,
        correlation_id: &str,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "text/plain")
            .header(CORRELATION_ID_HEADER, correlation_id)
            .body(payload.to_owned())
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status_code = response.status().as_u16();
        debug!(status_code, "gateway responded");
        Ok(TransportResponse { status_code })
    }
}
