use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a log timestamp. RFC 3339 values are normalized to UTC; a bare date
/// maps to midnight.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(&s[..s.len().min(10)], "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn deserialize_opt_naive_datetime<'de, D>(d: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(d)?;
    Ok(opt.and_then(|s| parse_timestamp(&s)))
}

/// Keeps the id's text as written. JSON integers print exactly; a JSON
/// float is only reached for ids wider than 64 bits and prints in its
/// shortest round-trip form, so distinct values stay distinct.
struct OrderIdVisitor;

impl<'de> Visitor<'de> for OrderIdVisitor {
    type Value = Option<OrderId>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an order id string or number")
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        d.deserialize_any(self)
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<Self::Value, E> {
        Ok(OrderId::parse(s))
    }

    fn visit_u64<E: de::Error>(self, n: u64) -> Result<Self::Value, E> {
        Ok(Some(OrderId(n.to_string())))
    }

    fn visit_i64<E: de::Error>(self, n: i64) -> Result<Self::Value, E> {
        Ok(Some(OrderId(n.to_string())))
    }

    fn visit_f64<E: de::Error>(self, n: f64) -> Result<Self::Value, E> {
        Ok(n.is_finite().then(|| OrderId(n.to_string())))
    }
}

fn deserialize_opt_order_id<'de, D>(d: D) -> Result<Option<OrderId>, D::Error>
where
    D: Deserializer<'de>,
{
    d.deserialize_option(OrderIdVisitor)
}

/// Order identifier as recorded in the log.
///
/// Ids that parse as integers order numerically and sort before free-form ids;
/// anything else orders lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    /// An id from a text cell; blank cells are no id.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        (!s.is_empty()).then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for OrderId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<i64>(), other.0.parse::<i64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for OrderId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for OrderId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// One row of the execution log, before validation. Every field may be blank.
///
/// Field names follow the log's column headers; snake_case aliases are
/// accepted for JSON input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTrade {
    #[serde(rename = "Order ID", alias = "order_id", default, deserialize_with = "deserialize_opt_order_id")]
    pub order_id: Option<OrderId>,
    #[serde(rename = "Trader", alias = "trader", default)]
    pub trader: Option<String>,
    #[serde(rename = "Exchange", alias = "exchange", default)]
    pub exchange: Option<String>,
    #[serde(rename = "Symbol", alias = "symbol", default)]
    pub symbol: Option<String>,
    #[serde(rename = "Order Type", alias = "order_type", default)]
    pub order_type: Option<String>,
    #[serde(rename = "Order Size", alias = "order_size", default)]
    pub order_size: Option<f64>,
    #[serde(rename = "Fill Size", alias = "fill_size", default)]
    pub fill_size: Option<f64>,
    #[serde(rename = "Price", alias = "price", default)]
    pub price: Option<f64>,
    #[serde(rename = "Timestamp", alias = "timestamp", default, deserialize_with = "deserialize_opt_naive_datetime")]
    pub timestamp: Option<NaiveDateTime>,
    /// First numeric column whose cell held text that is not a number.
    #[serde(skip)]
    pub unparsed: Option<&'static str>,
}

/// A validated trade joined with reference data and its derived features.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedTrade {
    /// Position of the record in the raw input.
    pub row: usize,
    pub order_id: OrderId,
    pub trader: String,
    /// Exchange as written in the log.
    pub logged_exchange: String,
    /// Canonical exchange for the symbol; equals `logged_exchange` when no
    /// venue table was supplied.
    pub exchange: String,
    pub symbol: String,
    pub order_type: String,
    pub order_size: f64,
    pub fill_size: f64,
    pub price: f64,
    pub timestamp: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_price: Option<f64>,
    pub slippage: f64,
    pub position: f64,
    pub order_sequence_rank: usize,
    pub exchange_match: bool,
}

impl EnrichedTrade {
    /// The (Trader, Symbol) partition this trade belongs to.
    pub fn partition(&self) -> (&str, &str) {
        (&self.trader, &self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2024-03-01 09:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T09:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T09:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T11:30:00+02:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-03-01"),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_timestamp("not a time"), None);
        assert_eq!(parse_timestamp("  "), None);
    }

    #[test]
    fn test_order_id_ordering() {
        let mut ids: Vec<OrderId> = ["10", "9", "abc", "100", "ab"]
            .into_iter()
            .map(OrderId::from)
            .collect();
        ids.sort();
        let sorted: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(sorted, vec!["9", "10", "100", "ab", "abc"]);
    }

    #[test]
    fn test_raw_trade_from_json() {
        let json = r#"{
            "order_id": 1001,
            "trader": "A",
            "exchange": "NYSE",
            "symbol": "X",
            "order_type": "LIMIT",
            "order_size": 100.0,
            "fill_size": 50.0,
            "price": 10.5,
            "timestamp": "2024-03-01 09:30:00"
        }"#;
        let trade: RawTrade = serde_json::from_str(json).unwrap();
        assert_eq!(trade.order_id, Some(OrderId::from("1001")));
        assert_eq!(trade.trader.as_deref(), Some("A"));
        assert_eq!(trade.fill_size, Some(50.0));
        assert!(trade.timestamp.is_some());
    }

    #[test]
    fn test_order_id_keeps_literal_text() {
        let json = r#"[
            {"order_id": 12345678901234567890},
            {"order_id": 12345678901234567891},
            {"order_id": -42},
            {"order_id": "00123"},
            {"order_id": "  "},
            {"order_id": null}
        ]"#;
        let trades: Vec<RawTrade> = serde_json::from_str(json).unwrap();
        let ids: Vec<Option<&str>> = trades
            .iter()
            .map(|t| t.order_id.as_ref().map(OrderId::as_str))
            .collect();
        assert_eq!(
            ids,
            vec![
                Some("12345678901234567890"),
                Some("12345678901234567891"),
                Some("-42"),
                Some("00123"),
                None,
                None,
            ]
        );
    }

    #[test]
    fn test_wide_json_id_is_not_saturated() {
        // wider than u64: arrives as a float
        let trades: Vec<RawTrade> =
            serde_json::from_str(r#"[{"order_id": 123456789012345678901}, {"order_id": 9.5e20}]"#).unwrap();
        let a = trades[0].order_id.as_ref().unwrap();
        let b = trades[1].order_id.as_ref().unwrap();
        assert_ne!(a, b);
        assert_ne!(a.as_str(), i64::MAX.to_string());
    }

    #[test]
    fn test_raw_trade_missing_fields_default_to_none() {
        let json = r#"{"Order ID": "X-1", "Trader": "A", "Timestamp": "garbage"}"#;
        let trade: RawTrade = serde_json::from_str(json).unwrap();
        assert_eq!(trade.order_id, Some(OrderId::from("X-1")));
        assert!(trade.symbol.is_none());
        assert!(trade.order_size.is_none());
        assert!(trade.timestamp.is_none());
    }
}
