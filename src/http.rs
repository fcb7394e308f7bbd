//! Shared plumbing for the JSON-over-HTTP providers.
//!
//! Every provider request goes through [`post_json`], which performs one
//! request and classifies the outcome: HTTP 429 becomes
//! [`ProviderError::RateLimited`], everything else that is not a 2xx
//! becomes [`ProviderError::Failed`]. Retrying is left to the caller.

use anyhow::{bail, Result};
use reqwest::StatusCode;
use std::time::Duration;

use travel_guide_core::retry::ProviderError;

pub(crate) fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Read an API key from the environment, failing with a readable message.
pub(crate) fn api_key(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => bail!("{} environment variable not set", var),
    }
}

pub(crate) async fn post_json(
    request: reqwest::RequestBuilder,
    label: &str,
) -> Result<serde_json::Value, ProviderError> {
    let response = request
        .header("Content-Type", "application/json")
        .send()
        .await
        .map_err(|e| ProviderError::Failed(format!("{} request failed: {}", label, e)))?;

    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| ProviderError::Failed(format!("{} returned invalid JSON: {}", label, e)));
    }

    let body_text = response.text().await.unwrap_or_default();
    Err(classify_status(status, label, &body_text))
}

pub(crate) fn classify_status(status: StatusCode, label: &str, body: &str) -> ProviderError {
    let message = format!("{} API error {}: {}", label, status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited(message)
    } else {
        ProviderError::Failed(message)
    }
}

/// Convert a JSON array of numbers into a vector.
pub(crate) fn json_to_vec(value: &serde_json::Value, label: &str) -> Result<Vec<f32>, ProviderError> {
    value
        .as_array()
        .ok_or_else(|| ProviderError::Failed(format!("Invalid {} response: embedding is not an array", label)))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ProviderError::Failed(format!("Invalid {} response: non-numeric value", label)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_429_is_rate_limited() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, "Cohere", "trial key limit");
        assert!(err.is_rate_limited());
        assert!(err.to_string().contains("trial key limit"));
    }

    #[test]
    fn test_other_statuses_fail() {
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "OpenAI", "").is_rate_limited());
        assert!(!classify_status(StatusCode::BAD_GATEWAY, "OpenAI", "").is_rate_limited());
    }

    #[test]
    fn test_json_to_vec() {
        let v = serde_json::json!([0.5, -1, 2.25]);
        assert_eq!(json_to_vec(&v, "x").unwrap(), vec![0.5, -1.0, 2.25]);
        assert!(json_to_vec(&serde_json::json!(["a"]), "x").is_err());
        assert!(json_to_vec(&serde_json::json!({}), "x").is_err());
    }
}
