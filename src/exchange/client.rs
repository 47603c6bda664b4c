//! Binance futures REST client.

use crate::config::{BinanceConfig, Credentials};
use crate::exchange::traits::FuturesGateway;
use crate::exchange::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

/// Binance USDⓈ-M futures client bound to one set of credentials.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    recv_window_ms: u64,
}

impl BinanceClient {
    /// Create a new Binance client from configuration.
    pub fn new(config: &BinanceConfig, credentials: &Credentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: credentials.api_key.clone(),
            secret_key: credentials.api_secret.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            recv_window_ms: config.recv_window_ms,
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    /// Encode params, append `timestamp` and `signature`.
    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let mut query: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!("timestamp={}", Self::timestamp()));

        let signature = self.sign(&query);
        format!("{}&signature={}", query, signature)
    }

    async fn send_signed(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Response> {
        let url = format!("{}{}?{}", self.base_url, path, self.signed_query(params));

        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", path))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {} on {}: {}", status, path, body);
        }

        Ok(response)
    }
}

#[async_trait]
impl FuturesGateway for BinanceClient {
    #[instrument(skip(self))]
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.send_signed(
            Method::POST,
            "/fapi/v1/leverage",
            &[("symbol", symbol.to_string()), ("leverage", leverage.to_string())],
        )
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn position_risk(&self, symbol: &str) -> Result<Vec<PositionRisk>> {
        self.send_signed(
            Method::GET,
            "/fapi/v2/positionRisk",
            &[
                ("symbol", symbol.to_string()),
                ("recvWindow", self.recv_window_ms.to_string()),
            ],
        )
        .await?
        .json()
        .await
        .context("Failed to parse position risk response")
    }

    #[instrument(skip(self))]
    async fn depth(&self, symbol: &str, limit: u32) -> Result<OrderBookDepth> {
        self.send_signed(
            Method::GET,
            "/fapi/v1/depth",
            &[("symbol", symbol.to_string()), ("limit", limit.to_string())],
        )
        .await?
        .json()
        .await
        .context("Failed to parse depth response")
    }

    #[instrument(skip(self, orders), fields(legs = orders.len()))]
    async fn place_batch_orders(&self, orders: &[BatchOrder]) -> Result<Vec<BatchOrderResult>> {
        let batch = serde_json::to_string(orders).context("Failed to encode batch orders")?;
        debug!(%batch, "Placing batch orders");

        self.send_signed(Method::POST, "/fapi/v1/batchOrders", &[("batchOrders", batch)])
            .await?
            .json()
            .await
            .context("Failed to parse batch order response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn client_for(server: &MockServer) -> BinanceClient {
        let config = BinanceConfig {
            base_url: server.uri(),
            ..BinanceConfig::default()
        };
        BinanceClient::new(&config, &Credentials::new("api-key", "secret")).unwrap()
    }

    #[test]
    fn test_signature_matches_reference_vector() {
        // Reference pair from the Binance API documentation.
        let client = BinanceClient::new(
            &BinanceConfig::default(),
            &Credentials::new(
                "key",
                "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j",
            ),
        )
        .unwrap();

        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            client.sign(query),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[tokio::test]
    async fn test_depth_request_is_signed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/depth"))
            .and(query_param("symbol", "BTCUSDT"))
            .and(query_param("limit", "5"))
            .and(header("X-MBX-APIKEY", "api-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "lastUpdateId": 7,
                "bids": [["30000.0", "1.5"], ["29999.0", "3.0"]],
                "asks": [["30001.0", "2.0"], ["30002.0", "4.0"]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let depth = client_for(&server).depth("BTCUSDT", 5).await.unwrap();
        assert_eq!(depth.deepest_bid(), Some((dec!(29999.0), dec!(3.0))));

        let requests: Vec<Request> = server.received_requests().await.unwrap();
        let query = requests[0].url.query().unwrap_or_default().to_string();
        assert!(query.contains("timestamp="));
        assert!(query.contains("&signature="));
    }

    #[tokio::test]
    async fn test_batch_orders_are_sent_as_json_param() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/batchOrders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"orderId": 1, "symbol": "BTCBUSD", "status": "NEW"},
                {"orderId": 2, "symbol": "BTCUSDT", "status": "NEW"}
            ])))
            .mount(&server)
            .await;

        let orders = vec![
            BatchOrder::market("BTCBUSD".to_string(), OrderSide::Buy, dec!(0.001), false),
            BatchOrder::market("BTCUSDT".to_string(), OrderSide::Sell, dec!(0.001), false),
        ];
        let results = client_for(&server).place_batch_orders(&orders).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_rejected()));

        let requests = server.received_requests().await.unwrap();
        let batch = requests[0]
            .url
            .query_pairs()
            .find(|(k, _)| k == "batchOrders")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert!(batch.contains(r#""symbol":"BTCBUSD""#));
        assert!(batch.contains(r#""quantity":"0.001""#));
    }

    #[tokio::test]
    async fn test_error_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/positionRisk"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string(r#"{"code":-2015,"msg":"Invalid API-key"}"#),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).position_risk("BTCUSDT").await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}
