//! Resolves the calling API credential at startup.
//!
//! The key either comes straight from the environment or is fetched once from
//! a trusted secret broker. Either way it is wrapped in a [`SecretString`]
//! immediately and never logged.

use crate::config::CredentialSource;
use anyhow::{Context, Result, bail};
use callboard_core::calling_api::ApiCredential;
use secrecy::SecretString;
use serde::Deserialize;
use tracing::info;

#[derive(Deserialize)]
struct BrokerResponse {
    #[serde(default)]
    api_key: Option<String>,
}

pub async fn resolve(source: &CredentialSource) -> Result<ApiCredential> {
    match source {
        CredentialSource::Env(key) => Ok(key.clone()),
        CredentialSource::Broker(url) => fetch_from_broker(url).await,
    }
}

async fn fetch_from_broker(url: &str) -> Result<ApiCredential> {
    info!(broker = %url, "Fetching calling API key from secret broker...");
    let response = reqwest::get(url)
        .await
        .context("Secret broker is unreachable")?;
    let status = response.status();
    if !status.is_success() {
        bail!("Secret broker responded with {}", status);
    }
    let body: BrokerResponse = response
        .json()
        .await
        .context("Secret broker returned a malformed payload")?;
    match body.api_key {
        Some(key) if !key.trim().is_empty() => Ok(SecretString::from(key)),
        _ => bail!("Secret broker payload has no `api_key`"),
    }
}
