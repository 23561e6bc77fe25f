//! Upstream network API: challenge polling, registration, and submission.
//! Wraps outbound HTTP in a small client struct behind a trait so the
//! coordinator can be driven against an in-memory fake in tests.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::model::Challenge;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "code", rename_all = "lowercase")]
pub enum ChallengeResponse {
    Before,
    Active {
        #[serde(flatten)]
        challenge: Challenge,
    },
    After,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted { crypto_receipt: Option<serde_json::Value> },
    Rejected { message: String },
    TransportFailure { message: String },
}

#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn get_challenge(&self) -> Result<ChallengeResponse>;
    async fn get_terms(&self) -> Result<String>;
    async fn register(&self, address: &str, signature: &str, public_key_hex: &str) -> Result<()>;
    async fn submit_solution(
        &self,
        address: &str,
        challenge_id: &str,
        nonce: &str,
    ) -> Result<SubmissionOutcome>;
}

pub struct HttpNetworkClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpNetworkClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl NetworkClient for HttpNetworkClient {
    async fn get_challenge(&self) -> Result<ChallengeResponse> {
        let url = format!("{}/challenge", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("challenge poll transport failure")?;
        resp.json::<ChallengeResponse>()
            .await
            .context("malformed challenge response")
    }

    async fn get_terms(&self) -> Result<String> {
        let url = format!("{}/TandC", self.base_url);
        let resp = self.http.get(&url).send().await.context("terms fetch failed")?;
        #[derive(Deserialize)]
        struct Terms {
            message: String,
        }
        let terms: Terms = resp.json().await.context("malformed terms response")?;
        Ok(terms.message)
    }

    async fn register(&self, address: &str, signature: &str, public_key_hex: &str) -> Result<()> {
        let url = format!(
            "{}/register/{}/{}/{}",
            self.base_url, address, signature, public_key_hex
        );
        let resp = self.http.post(&url).send().await.context("registration transport failure")?;
        if resp.status().is_success() {
            Ok(())
        } else {
            anyhow::bail!("registration rejected: {}", resp.status())
        }
    }

    async fn submit_solution(
        &self,
        address: &str,
        challenge_id: &str,
        nonce: &str,
    ) -> Result<SubmissionOutcome> {
        let url = format!(
            "{}/solution/{}/{}/{}",
            self.base_url, address, challenge_id, nonce
        );
        let result = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(30))
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                return Ok(SubmissionOutcome::TransportFailure {
                    message: e.to_string(),
                })
            }
        };

        let status = resp.status();
        if status.is_success() {
            let crypto_receipt = resp.json::<serde_json::Value>().await.ok();
            Ok(SubmissionOutcome::Accepted { crypto_receipt })
        } else if status.is_client_error() {
            let message = resp.text().await.unwrap_or_default();
            Ok(SubmissionOutcome::Rejected { message })
        } else {
            let message = format!("server error: {}", status);
            Ok(SubmissionOutcome::TransportFailure { message })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_outcome_variants_are_distinguishable() {
        let accepted = SubmissionOutcome::Accepted { crypto_receipt: None };
        let rejected = SubmissionOutcome::Rejected { message: "bad nonce".into() };
        assert_ne!(accepted, rejected);
    }
}
