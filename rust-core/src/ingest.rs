//! Readers for the trade log and reference tables.
//!
//! CSV uses the log's column headers (`Order ID`, `Order Size`, ...). Trade
//! cells are read as text, so ids keep their exact spelling and a
//! non-numeric size becomes a data-quality exclusion instead of a lost row.
//! JSON input is one document holding the trades and optional reference
//! tables, each either an object or a list of `[symbol, value]` pairs.
//! Reference rows stay ordered so duplicate symbols can be reported.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::marker::PhantomData;
use std::path::Path;

use serde::de::{DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{parse_timestamp, OrderId, RawTrade};
use crate::reference::ReferenceData;

/// Errors that can occur while reading input.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Row counts from one read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IngestStats {
    pub rows_read: usize,
    pub rows_rejected: usize,
}

/// Per-file row counts from a CSV load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IngestSummary {
    pub trades: IngestStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venues: Option<IngestStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prices: Option<IngestStats>,
}

/// CSV row of the trade log, every cell as written.
#[derive(Debug, Deserialize)]
struct TradeRow {
    #[serde(rename = "Order ID", alias = "order_id", default)]
    order_id: Option<String>,
    #[serde(rename = "Trader", alias = "trader", default)]
    trader: Option<String>,
    #[serde(rename = "Exchange", alias = "exchange", default)]
    exchange: Option<String>,
    #[serde(rename = "Symbol", alias = "symbol", default)]
    symbol: Option<String>,
    #[serde(rename = "Order Type", alias = "order_type", default)]
    order_type: Option<String>,
    #[serde(rename = "Order Size", alias = "order_size", default)]
    order_size: Option<String>,
    #[serde(rename = "Fill Size", alias = "fill_size", default)]
    fill_size: Option<String>,
    #[serde(rename = "Price", alias = "price", default)]
    price: Option<String>,
    #[serde(rename = "Timestamp", alias = "timestamp", default)]
    timestamp: Option<String>,
}

impl TradeRow {
    fn into_raw(self) -> RawTrade {
        let mut unparsed = None;
        let mut number = |cell: Option<String>, field: &'static str| -> Option<f64> {
            let text = cell?;
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            match text.parse::<f64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    unparsed.get_or_insert(field);
                    None
                }
            }
        };
        let order_size = number(self.order_size, "order_size");
        let fill_size = number(self.fill_size, "fill_size");
        let price = number(self.price, "price");

        RawTrade {
            order_id: self.order_id.as_deref().and_then(OrderId::parse),
            trader: self.trader,
            exchange: self.exchange,
            symbol: self.symbol,
            order_type: self.order_type,
            order_size,
            fill_size,
            price,
            timestamp: self.timestamp.as_deref().and_then(parse_timestamp),
            unparsed,
        }
    }
}

/// CSV row for the venue reference table.
#[derive(Debug, Deserialize)]
struct VenueRow {
    #[serde(rename = "Symbol", alias = "symbol")]
    symbol: String,
    #[serde(rename = "Exchange", alias = "exchange")]
    exchange: String,
}

/// CSV row for the price reference table.
#[derive(Debug, Deserialize)]
struct PriceRow {
    #[serde(rename = "Symbol", alias = "symbol")]
    symbol: String,
    #[serde(rename = "Average Price", alias = "average_price")]
    average_price: f64,
}

fn open(path: &Path) -> Result<File, IngestError> {
    File::open(path).map_err(|source| IngestError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Deserialize every row, skipping malformed ones. I/O failures abort.
fn read_rows<T: DeserializeOwned, R: Read>(reader: R, what: &str) -> Result<(Vec<T>, IngestStats), IngestError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let mut rows = Vec::new();
    let mut stats = IngestStats::default();

    for result in rdr.deserialize::<T>() {
        stats.rows_read += 1;
        match result {
            Ok(row) => rows.push(row),
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                warn!("Skipping malformed {} row: {}", what, e);
                stats.rows_rejected += 1;
            }
        }
    }
    Ok((rows, stats))
}

pub fn read_trades<R: Read>(reader: R) -> Result<(Vec<RawTrade>, IngestStats), IngestError> {
    let (rows, stats) = read_rows::<TradeRow, _>(reader, "trade")?;
    Ok((rows.into_iter().map(TradeRow::into_raw).collect(), stats))
}

pub fn read_venues<R: Read>(reader: R) -> Result<(Vec<(String, String)>, IngestStats), IngestError> {
    let (rows, stats) = read_rows::<VenueRow, _>(reader, "venue")?;
    Ok((rows.into_iter().map(|r| (r.symbol, r.exchange)).collect(), stats))
}

pub fn read_prices<R: Read>(reader: R) -> Result<(Vec<(String, f64)>, IngestStats), IngestError> {
    let (rows, stats) = read_rows::<PriceRow, _>(reader, "price")?;
    Ok((rows.into_iter().map(|r| (r.symbol, r.average_price)).collect(), stats))
}

/// Load the trade log and optional reference tables from CSV files.
pub fn load_csv(
    trades: &Path,
    venues: Option<&Path>,
    prices: Option<&Path>,
) -> Result<(Vec<RawTrade>, ReferenceData, IngestSummary), IngestError> {
    let (raw, stats) = read_trades(open(trades)?)?;
    info!(
        "Loaded {} trades from {:?} ({} rejected)",
        raw.len(),
        trades,
        stats.rows_rejected
    );
    let mut summary = IngestSummary {
        trades: stats,
        ..Default::default()
    };

    let mut refs = ReferenceData::new();
    if let Some(path) = venues {
        let (rows, stats) = read_venues(open(path)?)?;
        info!("Loaded {} venue rows from {:?} ({} rejected)", rows.len(), path, stats.rows_rejected);
        refs = refs.with_venues(rows);
        summary.venues = Some(stats);
    }
    if let Some(path) = prices {
        let (rows, stats) = read_prices(open(path)?)?;
        info!("Loaded {} price rows from {:?} ({} rejected)", rows.len(), path, stats.rows_rejected);
        refs = refs.with_prices(rows);
        summary.prices = Some(stats);
    }
    Ok((raw, refs, summary))
}

/// Ordered `(symbol, value)` rows from either a JSON object or a list of pairs.
/// Duplicate object keys are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRows<V>(pub Vec<(String, V)>);

impl<'de, V: Deserialize<'de>> Deserialize<'de> for ReferenceRows<V> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct RowsVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for RowsVisitor<V> {
            type Value = ReferenceRows<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object or a list of [symbol, value] pairs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut rows = Vec::new();
                while let Some(entry) = map.next_entry::<String, V>()? {
                    rows.push(entry);
                }
                Ok(ReferenceRows(rows))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut rows = Vec::new();
                while let Some(pair) = seq.next_element::<(String, V)>()? {
                    rows.push(pair);
                }
                Ok(ReferenceRows(rows))
            }
        }

        d.deserialize_any(RowsVisitor(PhantomData))
    }
}

/// JSON input document.
#[derive(Debug, Deserialize)]
pub struct AnalysisInput {
    pub trades: Vec<RawTrade>,
    #[serde(default)]
    pub venues: Option<ReferenceRows<String>>,
    #[serde(default)]
    pub prices: Option<ReferenceRows<f64>>,
}

impl AnalysisInput {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, IngestError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn into_parts(self) -> (Vec<RawTrade>, ReferenceData) {
        let mut refs = ReferenceData::new();
        if let Some(ReferenceRows(rows)) = self.venues {
            refs = refs.with_venues(rows);
        }
        if let Some(ReferenceRows(rows)) = self.prices {
            refs = refs.with_prices(rows);
        }
        (self.trades, refs)
    }
}
