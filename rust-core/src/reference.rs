//! Reference tables joined onto the trade log: symbol -> canonical venue and
//! symbol -> benchmark average price.

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

/// A reference table keyed by symbol. Duplicate keys resolve last-write-wins.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable<V> {
    entries: HashMap<String, V>,
}

pub type VenueTable = ReferenceTable<String>;
pub type PriceTable = ReferenceTable<f64>;

/// Raised when a reference table is ambiguous. Not fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceWarning {
    DuplicateKey {
        table: String,
        symbol: String,
        occurrences: usize,
    },
    /// A row whose value cannot be used; the row is dropped.
    InvalidValue {
        table: String,
        symbol: String,
        value: String,
    },
}

impl<V> ReferenceTable<V> {
    /// Build a table from ordered `(symbol, value)` rows, reporting any symbol
    /// that appears more than once.
    pub fn from_rows<I>(name: &'static str, rows: I) -> (Self, Vec<ReferenceWarning>)
    where
        I: IntoIterator<Item = (String, V)>,
    {
        let mut entries = HashMap::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for (symbol, value) in rows {
            let symbol = symbol.trim().to_string();
            let count = seen.entry(symbol.clone()).or_insert(0);
            if *count == 0 {
                order.push(symbol.clone());
            }
            *count += 1;
            entries.insert(symbol, value);
        }

        let warnings: Vec<ReferenceWarning> = order
            .into_iter()
            .filter_map(|symbol| {
                let occurrences = seen[&symbol];
                (occurrences > 1).then(|| {
                    warn!(
                        "Duplicate symbol {} in {} table ({} rows), keeping the last",
                        symbol, name, occurrences
                    );
                    ReferenceWarning::DuplicateKey {
                        table: name.to_string(),
                        symbol,
                        occurrences,
                    }
                })
            })
            .collect();

        (Self { entries }, warnings)
    }

    pub fn get(&self, symbol: &str) -> Option<&V> {
        self.entries.get(symbol)
    }

}

/// Reference data supplied to the feature deriver. Either table may be
/// absent, which disables the checks that depend on it.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub venues: Option<VenueTable>,
    pub prices: Option<PriceTable>,
    pub warnings: Vec<ReferenceWarning>,
}

impl ReferenceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_venues<I>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let (table, warnings) = VenueTable::from_rows("venue", rows);
        self.venues = Some(table);
        self.warnings.extend(warnings);
        self
    }

    /// Prices must be finite and positive; other rows are dropped with a
    /// warning, so their symbols join as unknown.
    pub fn with_prices<I>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let mut valid = Vec::new();
        for (symbol, price) in rows {
            if price.is_finite() && price > 0.0 {
                valid.push((symbol, price));
                continue;
            }
            let symbol = symbol.trim().to_string();
            warn!("Dropping price row for {}: {} is not a positive number", symbol, price);
            self.warnings.push(ReferenceWarning::InvalidValue {
                table: "price".to_string(),
                symbol,
                value: price.to_string(),
            });
        }
        let (table, warnings) = PriceTable::from_rows("price", valid);
        self.prices = Some(table);
        self.warnings.extend(warnings);
        self
    }

    pub fn has_venues(&self) -> bool {
        self.venues.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_lookup() {
        let refs = ReferenceData::new()
            .with_venues(rows(&[("X", "NYSE"), ("Y", "NASDAQ")]))
            .with_prices(vec![("X".to_string(), 10.0)]);
        let venues = refs.venues.as_ref().unwrap();
        assert_eq!(venues.get("X").map(String::as_str), Some("NYSE"));
        assert_eq!(venues.get("Z"), None);
        assert_eq!(refs.prices.as_ref().unwrap().get("X"), Some(&10.0));
        assert!(refs.warnings.is_empty());
    }

    #[test]
    fn test_duplicate_key_last_write_wins() {
        let (table, warnings) =
            VenueTable::from_rows("venue", rows(&[("X", "NYSE"), ("Y", "LSE"), ("X", "ARCA")]));
        assert_eq!(table.get("X").map(String::as_str), Some("ARCA"));
        assert_eq!(table.get("Y").map(String::as_str), Some("LSE"));
        assert_eq!(
            warnings,
            vec![ReferenceWarning::DuplicateKey {
                table: "venue".to_string(),
                symbol: "X".to_string(),
                occurrences: 2,
            }]
        );
    }

    #[test]
    fn test_invalid_prices_dropped() {
        let refs = ReferenceData::new().with_prices(vec![
            ("X".to_string(), f64::NAN),
            ("Y".to_string(), 10.0),
            ("Z".to_string(), -1.0),
            ("W".to_string(), f64::INFINITY),
            ("V".to_string(), 0.0),
        ]);
        let prices = refs.prices.as_ref().unwrap();
        assert_eq!(prices.get("Y"), Some(&10.0));
        for symbol in ["X", "Z", "W", "V"] {
            assert_eq!(prices.get(symbol), None, "{}", symbol);
        }
        assert_eq!(refs.warnings.len(), 4);
        assert_eq!(
            refs.warnings[0],
            ReferenceWarning::InvalidValue {
                table: "price".to_string(),
                symbol: "X".to_string(),
                value: "NaN".to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_price_does_not_shadow_earlier_row() {
        let refs = ReferenceData::new().with_prices(vec![
            ("X".to_string(), 9.5),
            ("X".to_string(), f64::NAN),
        ]);
        assert_eq!(refs.prices.as_ref().unwrap().get("X"), Some(&9.5));
        assert_eq!(refs.warnings.len(), 1);
    }

    #[test]
    fn test_absent_tables() {
        let refs = ReferenceData::new();
        assert!(!refs.has_venues());
        assert!(refs.prices.is_none());
    }
}
