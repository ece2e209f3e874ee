//! Settlement gateway transport seam.

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;

pub mod http;

pub use http::HttpSubmissionTransport;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid gateway endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("gateway request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportResponse {
    pub status_code: u16,
}

/// Sends a serialized billing document to the settlement gateway.
///
/// Implementations report what the gateway answered; deciding whether that
/// answer counts as success is the caller's job (see [`AcceptedStatuses`]).
#[async_trait]
pub trait SubmissionTransport: Send + Sync {
    async fn send(
        &self,
        payload: &str,
        correlation_id: &str,
    ) -> Result<TransportResponse, TransportError>;
}

/// Gateway status codes that count as a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedStatuses(BTreeSet<u16>);

impl AcceptedStatuses {
    pub fn new(codes: impl IntoIterator<Item = u16>) -> Self {
        Self(codes.into_iter().collect())
    }

    pub fn accepts(&self, status_code: u16) -> bool {
        self.0.contains(&status_code)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

impl Default for AcceptedStatuses {
    fn default() -> Self {
        Self::new([200])
    }
}

impl core::str::FromStr for AcceptedStatuses {
    type Err = String;

    /// Parse a comma-separated list such as `"200, 202"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut codes = BTreeSet::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let code: u16 = part
                .parse()
                .map_err(|_| format!("'{part}' is not an HTTP status code"))?;
            if !(100..=599).contains(&code) {
                return Err(format!("{code} is outside the HTTP status range"));
            }
            codes.insert(code);
        }
        if codes.is_empty() {
            return Err("at least one accepted status code is required".to_string());
        }
        Ok(Self(codes))
    }
}
