//! Type definitions for Binance futures and premium feed payloads.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Quote currency of one hedge leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteVariant {
    Busd,
    Usdt,
}

impl QuoteVariant {
    pub const ALL: [QuoteVariant; 2] = [QuoteVariant::Busd, QuoteVariant::Usdt];

    pub fn suffix(&self) -> &'static str {
        match self {
            QuoteVariant::Busd => "BUSD",
            QuoteVariant::Usdt => "USDT",
        }
    }

    /// Contract symbol for a base asset, e.g. `BTC` -> `BTCUSDT`.
    pub fn contract(&self, base: &str) -> String {
        format!("{}{}", base, self.suffix())
    }

    /// Variant a contract symbol is quoted in.
    pub fn of_contract(symbol: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|variant| symbol.ends_with(variant.suffix()))
    }
}

impl fmt::Display for QuoteVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for QuoteVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUSD" => Ok(QuoteVariant::Busd),
            "USDT" => Ok(QuoteVariant::Usdt),
            other => Err(format!("unknown quote variant: {}", other)),
        }
    }
}

// ==================== Market Data ====================

/// Order book depth (`GET /fapi/v1/depth`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderBookDepth {
    #[serde(default)]
    pub bids: Vec<(Decimal, Decimal)>,
    #[serde(default)]
    pub asks: Vec<(Decimal, Decimal)>,
}

impl OrderBookDepth {
    /// Deepest bid level returned, as (price, size).
    pub fn deepest_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.last().copied()
    }

    /// Deepest ask level returned, as (price, size).
    pub fn deepest_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.last().copied()
    }
}

// ==================== Account ====================

/// Position entry (`GET /fapi/v2/positionRisk`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub position_amt: Decimal,
    #[serde(default)]
    pub position_side: Option<String>,
}

// ==================== Orders ====================

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Order type. Only market orders are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
}

/// One entry of a `batchOrders` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOrder {
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(with = "rust_decimal::serde::str")]
    pub quantity: Decimal,
    #[serde(
        skip_serializing_if = "std::ops::Not::not",
        serialize_with = "serialize_flag"
    )]
    pub reduce_only: bool,
}

impl BatchOrder {
    pub fn market(symbol: String, side: OrderSide, quantity: Decimal, reduce_only: bool) -> Self {
        Self {
            order_type: OrderType::Market,
            symbol,
            side,
            quantity,
            reduce_only,
        }
    }
}

/// Binance expects boolean order flags as the strings `"true"`/`"false"`.
fn serialize_flag<S: Serializer>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *flag { "true" } else { "false" })
}

/// Per-order result of a batch: either an accepted order or an error object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BatchOrderResult {
    #[serde(rename_all = "camelCase")]
    Accepted {
        order_id: i64,
        symbol: String,
        status: String,
    },
    Rejected {
        code: i64,
        msg: String,
    },
}

impl BatchOrderResult {
    pub fn is_rejected(&self) -> bool {
        matches!(self, BatchOrderResult::Rejected { .. })
    }
}

// ==================== Premium Feed ====================

/// Per-contract entry of a premium snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumIndexEntry {
    pub symbol: String,
    #[serde(default)]
    pub mark_price: Decimal,
    /// Next funding settlement, unix milliseconds
    #[serde(default)]
    pub next_funding_time: Option<i64>,
}

/// Per-symbol snapshot from the premium feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumSnapshot {
    /// Base asset, e.g. `BTC`
    pub symbol: String,
    /// Recommended direction: `true` = BUSD leg long
    pub direction: bool,
    #[serde(default)]
    pub mark_price_gap: Decimal,
    #[serde(default)]
    pub funding_rate_gap: Decimal,
    #[serde(default)]
    pub index: Vec<PremiumIndexEntry>,
}

impl PremiumSnapshot {
    pub fn new(
        symbol: impl Into<String>,
        direction: bool,
        mark_price_gap: Decimal,
        funding_rate_gap: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            mark_price_gap,
            funding_rate_gap,
            index: Vec::new(),
        }
    }

    /// Replace the index with mark prices for both contracts.
    pub fn with_mark_prices(mut self, busd: Decimal, usdt: Decimal) -> Self {
        let next_funding_time = self.index.iter().find_map(|e| e.next_funding_time);
        self.index = vec![
            PremiumIndexEntry {
                symbol: QuoteVariant::Busd.contract(&self.symbol),
                mark_price: busd,
                next_funding_time,
            },
            PremiumIndexEntry {
                symbol: QuoteVariant::Usdt.contract(&self.symbol),
                mark_price: usdt,
                next_funding_time,
            },
        ];
        self
    }

    pub fn with_next_funding_time(mut self, at: DateTime<Utc>) -> Self {
        if self.index.is_empty() {
            self = self.with_mark_prices(Decimal::ZERO, Decimal::ZERO);
        }
        for entry in &mut self.index {
            entry.next_funding_time = Some(at.timestamp_millis());
        }
        self
    }

    pub fn mark_price(&self, variant: QuoteVariant) -> Option<Decimal> {
        self.index
            .iter()
            .find(|entry| QuoteVariant::of_contract(&entry.symbol) == Some(variant))
            .map(|entry| entry.mark_price)
    }

    /// `true` when the BUSD contract marks above the USDT contract.
    pub fn price_direction(&self) -> bool {
        let busd = self.mark_price(QuoteVariant::Busd).unwrap_or_default();
        let usdt = self.mark_price(QuoteVariant::Usdt).unwrap_or_default();
        busd > usdt
    }

    /// Earliest next funding settlement reported for either contract.
    pub fn next_funding_time(&self) -> Option<DateTime<Utc>> {
        self.index
            .iter()
            .filter_map(|entry| entry.next_funding_time)
            .min()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}
