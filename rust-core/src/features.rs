//! Validation and feature derivation: raw log rows -> enriched trades.
//!
//! Rows that cannot be analyzed are excluded and counted, never fatal.
//! Running position and order sequence rank are computed per
//! (trader, symbol) partition over the surviving rows, in input order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::{EnrichedTrade, OrderId, RawTrade};
use crate::reference::ReferenceData;

/// Why a raw row was left out of the enriched table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "reason", content = "field", rename_all = "snake_case")]
pub enum ExclusionReason {
    MissingField(&'static str),
    /// Slippage divides by order size.
    ZeroOrderSize,
    InvalidValue(&'static str),
    UnknownVenue,
    UnknownPrice,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::MissingField(field) => write!(f, "missing_field:{}", field),
            ExclusionReason::ZeroOrderSize => write!(f, "zero_order_size"),
            ExclusionReason::InvalidValue(field) => write!(f, "invalid_value:{}", field),
            ExclusionReason::UnknownVenue => write!(f, "unknown_venue"),
            ExclusionReason::UnknownPrice => write!(f, "unknown_price"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusion {
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

/// Data-quality exclusions, counted per reason.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExclusionReport {
    pub total: usize,
    pub by_reason: BTreeMap<String, usize>,
    pub rows: Vec<Exclusion>,
}

impl ExclusionReport {
    fn record(&mut self, row: usize, order_id: Option<OrderId>, reason: ExclusionReason) {
        self.total += 1;
        *self.by_reason.entry(reason.to_string()).or_insert(0) += 1;
        self.rows.push(Exclusion {
            row,
            order_id,
            reason,
        });
    }

    pub fn count(&self, reason: ExclusionReason) -> usize {
        self.by_reason.get(&reason.to_string()).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Output of the feature deriver.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub trades: Vec<EnrichedTrade>,
    pub exclusions: ExclusionReport,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, ExclusionReason> {
    value.ok_or(ExclusionReason::MissingField(field))
}

/// Validate one raw row and join it with the reference tables. Position and
/// rank are filled in later, once all partitions are known.
fn enrich_row(row: usize, raw: &RawTrade, refs: &ReferenceData) -> Result<EnrichedTrade, ExclusionReason> {
    if let Some(field) = raw.unparsed {
        return Err(ExclusionReason::InvalidValue(field));
    }
    let order_id = required(raw.order_id.clone(), "order_id")?;
    let trader = required(present(&raw.trader), "trader")?;
    let logged_exchange = required(present(&raw.exchange), "exchange")?;
    let symbol = required(present(&raw.symbol), "symbol")?;
    let order_type = required(present(&raw.order_type), "order_type")?;
    let order_size = required(raw.order_size, "order_size")?;
    let fill_size = required(raw.fill_size, "fill_size")?;
    let price = required(raw.price, "price")?;
    let timestamp = required(raw.timestamp, "timestamp")?;

    if order_size == 0.0 {
        return Err(ExclusionReason::ZeroOrderSize);
    }
    if !order_size.is_finite() || order_size < 0.0 {
        return Err(ExclusionReason::InvalidValue("order_size"));
    }
    if !fill_size.is_finite() || fill_size < 0.0 {
        return Err(ExclusionReason::InvalidValue("fill_size"));
    }
    if !price.is_finite() || price <= 0.0 {
        return Err(ExclusionReason::InvalidValue("price"));
    }

    let exchange = match &refs.venues {
        Some(venues) => venues
            .get(symbol)
            .cloned()
            .ok_or(ExclusionReason::UnknownVenue)?,
        None => logged_exchange.to_string(),
    };
    let average_price = match &refs.prices {
        Some(prices) => {
            let avg = *prices.get(symbol).ok_or(ExclusionReason::UnknownPrice)?;
            if !avg.is_finite() || avg <= 0.0 {
                return Err(ExclusionReason::InvalidValue("average_price"));
            }
            Some(avg)
        }
        None => None,
    };

    Ok(EnrichedTrade {
        row,
        order_id,
        trader: trader.to_string(),
        exchange_match: logged_exchange == exchange,
        logged_exchange: logged_exchange.to_string(),
        exchange,
        symbol: symbol.to_string(),
        order_type: order_type.to_string(),
        order_size,
        fill_size,
        price,
        timestamp,
        average_price,
        slippage: (price - fill_size / order_size).abs(),
        position: 0.0,
        order_sequence_rank: 0,
    })
}

/// Derive the enriched table from the raw log.
pub fn derive_features(raw: &[RawTrade], refs: &ReferenceData) -> FeatureSet {
    let mut exclusions = ExclusionReport::default();
    let mut trades: Vec<EnrichedTrade> = Vec::with_capacity(raw.len());

    for (row, record) in raw.iter().enumerate() {
        match enrich_row(row, record, refs) {
            Ok(trade) => trades.push(trade),
            Err(reason) => {
                debug!("Excluding row {} (order {:?}): {}", row, record.order_id, reason);
                exclusions.record(row, record.order_id.clone(), reason);
            }
        }
    }

    let ranks = sequence_ranks(&trades);
    let mut running: HashMap<(String, String), f64> = HashMap::new();
    for (trade, rank) in trades.iter_mut().zip(ranks) {
        let position = running
            .entry((trade.trader.clone(), trade.symbol.clone()))
            .or_insert(0.0);
        *position += trade.fill_size;
        trade.position = *position;
        trade.order_sequence_rank = rank;
    }

    if exclusions.is_empty() {
        info!("Enriched {} trades", trades.len());
    } else {
        warn!(
            "Enriched {} trades, excluded {}: {:?}",
            trades.len(),
            exclusions.total,
            exclusions.by_reason
        );
    }

    FeatureSet { trades, exclusions }
}

/// 1-based ordinal rank of each trade's order id within its partition.
/// Equal ids keep input order.
fn sequence_ranks(trades: &[EnrichedTrade]) -> Vec<usize> {
    let mut partitions: HashMap<(&str, &str), Vec<usize>> = HashMap::new();
    for (i, trade) in trades.iter().enumerate() {
        partitions.entry(trade.partition()).or_default().push(i);
    }

    let mut ranks = vec![0; trades.len()];
    for members in partitions.values_mut() {
        // stable: ties stay in input order
        members.sort_by(|&a, &b| trades[a].order_id.cmp(&trades[b].order_id));
        for (rank, &i) in members.iter().enumerate() {
            ranks[i] = rank + 1;
        }
    }
    ranks
}
