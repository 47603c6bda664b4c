//! Premium gap feed client.

use crate::config::FeedConfig;
use crate::exchange::traits::SignalSource;
use crate::exchange::types::PremiumSnapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

/// Polls the external service publishing BUSD/USDT premium snapshots.
#[derive(Debug, Clone)]
pub struct PremiumFeedClient {
    http: Client,
    url: String,
}

impl PremiumFeedClient {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl SignalSource for PremiumFeedClient {
    #[instrument(skip(self), name = "premium_feed")]
    async fn snapshots(&self) -> Result<Vec<PremiumSnapshot>> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .context("Failed to fetch premium feed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Premium feed returned {}", status);
        }

        let snapshots: Vec<PremiumSnapshot> = response
            .json()
            .await
            .context("Failed to parse premium feed response")?;

        debug!("Fetched {} premium snapshots", snapshots.len());
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_snapshots() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "symbol": "BTC",
                    "direction": true,
                    "markPriceGap": 0.01,
                    "fundingRateGap": 0.0002,
                    "index": [
                        {"symbol": "BTCBUSD", "markPrice": "30000"},
                        {"symbol": "BTCUSDT", "markPrice": "30003"}
                    ]
                },
                {"symbol": "ETH", "direction": false}
            ])))
            .mount(&server)
            .await;

        let feed = PremiumFeedClient::new(&FeedConfig {
            url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap();

        let snapshots = feed.snapshots().await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].funding_rate_gap, dec!(0.0002));
        assert!(!snapshots[0].price_direction());
        assert!(snapshots[1].mark_price_gap.is_zero());
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let feed = PremiumFeedClient::new(&FeedConfig {
            url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap();

        assert!(feed.snapshots().await.is_err());
    }
}
