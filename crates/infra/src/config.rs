//! Submission pipeline configuration, read from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `MOVEBILL_SEND_PRODUCTION_INVOICE` | `false` |
//! | `MOVEBILL_GATEWAY_URL` | `http://localhost:9443/submit` |
//! | `MOVEBILL_GATEWAY_TIMEOUT_SECS` | `30` |
//! | `MOVEBILL_GATEWAY_ACCEPTED_STATUSES` | `200` |
//! | `MOVEBILL_EXCLUSIVE_SUBMISSION` | `false` |
//! | `DATABASE_URL` | unset |

use std::time::Duration;

use anyhow::{Context, anyhow};

use crate::transport::AcceptedStatuses;

pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:9443/submit";
pub const DEFAULT_TRANSMIT_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionConfig {
    /// Passed to the encoder as the production usage indicator.
    pub send_production_invoice: bool,
    pub gateway_url: String,
    /// Upper bound on one transmission to the gateway.
    pub transmit_deadline: Duration,
    pub accepted_statuses: AcceptedStatuses,
    /// Refuse to submit an invoice that is already in flight or no longer
    /// `IN_PROCESS` in storage.
    pub exclusive_submission: bool,
    pub database_url: Option<String>,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            send_production_invoice: false,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            transmit_deadline: DEFAULT_TRANSMIT_DEADLINE,
            accepted_statuses: AcceptedStatuses::default(),
            exclusive_submission: false,
            database_url: None,
        }
    }
}

impl SubmissionConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source; unset or blank keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let send_production_invoice = match get("MOVEBILL_SEND_PRODUCTION_INVOICE") {
            Some(v) => parse_bool(&v).context("MOVEBILL_SEND_PRODUCTION_INVOICE")?,
            None => defaults.send_production_invoice,
        };

        let gateway_url = get("MOVEBILL_GATEWAY_URL").unwrap_or(defaults.gateway_url);

        let transmit_deadline = match get("MOVEBILL_GATEWAY_TIMEOUT_SECS") {
            Some(v) => {
                let secs: u64 = v
                    .trim()
                    .parse()
                    .with_context(|| format!("MOVEBILL_GATEWAY_TIMEOUT_SECS: '{v}'"))?;
                if secs == 0 {
                    return Err(anyhow!("MOVEBILL_GATEWAY_TIMEOUT_SECS must be positive"));
                }
                Duration::from_secs(secs)
            }
            None => defaults.transmit_deadline,
        };

        let accepted_statuses = match get("MOVEBILL_GATEWAY_ACCEPTED_STATUSES") {
            Some(v) => v
                .parse::<AcceptedStatuses>()
                .map_err(|e| anyhow!(e))
                .context("MOVEBILL_GATEWAY_ACCEPTED_STATUSES")?,
            None => defaults.accepted_statuses,
        };

        let exclusive_submission = match get("MOVEBILL_EXCLUSIVE_SUBMISSION") {
            Some(v) => parse_bool(&v).context("MOVEBILL_EXCLUSIVE_SUBMISSION")?,
            None => defaults.exclusive_submission,
        };

        Ok(Self {
            send_production_invoice,
            gateway_url,
            transmit_deadline,
            accepted_statuses,
            exclusive_submission,
            database_url: get("DATABASE_URL"),
        })
    }
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(anyhow!("expected a boolean, got '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = SubmissionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SubmissionConfig::default());
        assert!(!config.exclusive_submission);
        assert!(config.accepted_statuses.accepts(200));
    }

    #[test]
    fn reads_every_setting() {
        let config = SubmissionConfig::from_lookup(lookup(&[
            ("MOVEBILL_SEND_PRODUCTION_INVOICE", "true"),
            ("MOVEBILL_GATEWAY_URL", "https://gateway.example/submit"),
            ("MOVEBILL_GATEWAY_TIMEOUT_SECS", "5"),
            ("MOVEBILL_GATEWAY_ACCEPTED_STATUSES", "200,202"),
            ("MOVEBILL_EXCLUSIVE_SUBMISSION", "1"),
            ("DATABASE_URL", "postgres://localhost/movebill"),
        ]))
        .unwrap();

        assert!(config.send_production_invoice);
        assert_eq!(config.gateway_url, "https://gateway.example/submit");
        assert_eq!(config.transmit_deadline, Duration::from_secs(5));
        assert!(config.accepted_statuses.accepts(202));
        assert!(config.exclusive_submission);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/movebill")
        );
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let err = SubmissionConfig::from_lookup(lookup(&[(
            "MOVEBILL_GATEWAY_TIMEOUT_SECS",
            "soon",
        )]))
        .unwrap_err();
        assert!(format!("{err:#}").contains("MOVEBILL_GATEWAY_TIMEOUT_SECS"));

        let err = SubmissionConfig::from_lookup(lookup(&[(
            "MOVEBILL_SEND_PRODUCTION_INVOICE",
            "maybe",
        )]))
        .unwrap_err();
        assert!(format!("{err:#}").contains("MOVEBILL_SEND_PRODUCTION_INVOICE"));
    }

    #[test]
    fn zero_deadline_is_rejected() {
        assert!(
            SubmissionConfig::from_lookup(lookup(&[("MOVEBILL_GATEWAY_TIMEOUT_SECS", "0")]))
                .is_err()
        );
    }
}
