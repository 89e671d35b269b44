//! HTTP client for a remote purchase ledger service
//!
//! Looks up paid users with `GET {server_url}/ledger/paid-users`, passing the
//! filter and a comma-separated id list as query parameters.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;

use crate::analytics::funnel::{LedgerFilter, PurchaseLedger};
use crate::config::LedgerConfig;
use crate::error::{Error, Result};

/// Response from GET /ledger/paid-users
#[derive(Debug, Deserialize)]
pub struct PaidUsersResponse {
    /// Users with at least one matching purchase
    pub paid_user_ids: Vec<String>,
}

/// HTTP client for the purchase ledger API
pub struct LedgerClient {
    config: LedgerConfig,
    http_client: reqwest::Client,
    base_url: String,
}

impl LedgerClient {
    /// Create a new ledger client from configuration
    ///
    /// Returns an error if the configuration is invalid or has no server URL.
    pub fn new(config: LedgerConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .server_url
            .clone()
            .ok_or_else(|| Error::Config("ledger.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            base_url,
        })
    }

    /// URL of one paid-users lookup.
    fn paid_users_url(&self, user_ids: &[String], filter: &LedgerFilter) -> String {
        let ids = user_ids
            .iter()
            .map(|id| urlencoding::encode(id).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}/ledger/paid-users?status={}&min_amount={}&user_ids={}",
            self.base_url,
            urlencoding::encode(&filter.status),
            filter.min_amount,
            ids
        )
    }
}

/// Keep only ids that were asked about.
fn requested_only(user_ids: &[String], response: PaidUsersResponse) -> HashSet<String> {
    let requested: HashSet<&str> = user_ids.iter().map(String::as_str).collect();
    response
        .paid_user_ids
        .into_iter()
        .filter(|id| requested.contains(id.as_str()))
        .collect()
}

#[async_trait]
impl PurchaseLedger for LedgerClient {
    fn name(&self) -> &'static str {
        "http"
    }

    fn max_batch_size(&self) -> usize {
        self.config.batch_size
    }

    async fn paid_users(&self, user_ids: &[String], filter: &LedgerFilter) -> Result<HashSet<String>> {
        if user_ids.is_empty() {
            return Ok(HashSet::new());
        }
        if user_ids.len() > self.config.batch_size {
            return Err(Error::Ledger(format!(
                "batch of {} user ids exceeds limit of {}",
                user_ids.len(),
                self.config.batch_size
            )));
        }

        let url = self.paid_users_url(user_ids, filter);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Ledger(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            let result: PaidUsersResponse = response
                .json()
                .await
                .map_err(|e| Error::Ledger(format!("failed to parse response: {}", e)))?;
            Ok(requested_only(user_ids, result))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Ledger(format!("API error ({}): {}", status, error_text)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerBackend;

    fn http_config() -> LedgerConfig {
        LedgerConfig {
            backend: LedgerBackend::Http,
            server_url: Some("https://ledger.example.com/".to_string()),
            api_key: Some("lk_live_test".to_string()),
            batch_size: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_client_requires_valid_config() {
        let config = LedgerConfig::default();
        assert!(LedgerClient::new(config).is_err());
    }

    #[test]
    fn test_client_with_valid_config() {
        let client = LedgerClient::new(http_config()).unwrap();
        assert_eq!(client.base_url, "https://ledger.example.com");
        assert_eq!(client.max_batch_size(), 3);
    }

    #[test]
    fn test_rejects_unprintable_api_key() {
        let config = LedgerConfig {
            api_key: Some("bad\nkey".to_string()),
            ..http_config()
        };
        assert!(matches!(LedgerClient::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_paid_users_url_encodes_ids() {
        let client = LedgerClient::new(http_config()).unwrap();
        let ids = vec!["u 1".to_string(), "u&2".to_string()];
        let url = client.paid_users_url(&ids, &LedgerFilter::default());
        assert_eq!(
            url,
            "https://ledger.example.com/ledger/paid-users?status=paid&min_amount=0&user_ids=u%201,u%262"
        );
    }

    #[test]
    fn test_response_limited_to_requested_ids() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let response: PaidUsersResponse =
            serde_json::from_str(r#"{"paid_user_ids": ["a", "zzz"]}"#).unwrap();
        assert_eq!(requested_only(&ids, response), HashSet::from(["a".to_string()]));
    }

    #[tokio::test]
    async fn test_oversized_batch_is_rejected_before_request() {
        let client = LedgerClient::new(http_config()).unwrap();
        let ids: Vec<String> = (0..4).map(|i| i.to_string()).collect();
        let result = client.paid_users(&ids, &LedgerFilter::default()).await;
        assert!(matches!(result, Err(Error::Ledger(_))));
    }
}
