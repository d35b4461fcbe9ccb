//! Session-boundary positions: opening and closing position per trader per day.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::models::EnrichedTrade;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPosition {
    pub trader: String,
    pub day: NaiveDate,
    /// Position of the trader's first trade that day, in input order.
    pub opening: f64,
    /// Position of the trader's last trade that day, in input order.
    pub closing: f64,
    pub trades: usize,
}

/// First and last timestamp seen in the session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

pub fn daily_positions(trades: &[EnrichedTrade]) -> Vec<DailyPosition> {
    let mut days: BTreeMap<(&str, NaiveDate), DailyPosition> = BTreeMap::new();
    for trade in trades {
        let day = trade.timestamp.date();
        days.entry((trade.trader.as_str(), day))
            .and_modify(|p| {
                p.closing = trade.position;
                p.trades += 1;
            })
            .or_insert_with(|| DailyPosition {
                trader: trade.trader.clone(),
                day,
                opening: trade.position,
                closing: trade.position,
                trades: 1,
            });
    }
    days.into_values().collect()
}

pub fn session_window(trades: &[EnrichedTrade]) -> Option<SessionWindow> {
    let start = trades.iter().map(|t| t.timestamp).min()?;
    let end = trades.iter().map(|t| t.timestamp).max()?;
    Some(SessionWindow { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderId;

    fn trade(trader: &str, day: u32, hour: u32, position: f64) -> EnrichedTrade {
        EnrichedTrade {
            row: 0,
            order_id: OrderId::from("1"),
            trader: trader.to_string(),
            logged_exchange: "NYSE".to_string(),
            exchange: "NYSE".to_string(),
            symbol: "X".to_string(),
            order_type: "LIMIT".to_string(),
            order_size: 100.0,
            fill_size: 10.0,
            price: 10.0,
            timestamp: NaiveDate::from_ymd_opt(2024, 3, day)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            average_price: None,
            slippage: 9.9,
            position,
            order_sequence_rank: 1,
            exchange_match: true,
        }
    }

    #[test]
    fn test_opening_and_closing_follow_input_order() {
        // input order, not timestamp order, decides first/last
        let trades = vec![
            trade("A", 1, 15, 10.0),
            trade("B", 1, 9, 5.0),
            trade("A", 1, 9, 30.0),
            trade("A", 2, 10, 35.0),
            trade("A", 1, 12, 40.0),
        ];
        let positions = daily_positions(&trades);
        assert_eq!(positions.len(), 3);

        let a1 = &positions[0];
        assert_eq!((a1.trader.as_str(), a1.day.to_string().as_str()), ("A", "2024-03-01"));
        assert_eq!((a1.opening, a1.closing, a1.trades), (10.0, 40.0, 3));

        let a2 = &positions[1];
        assert_eq!((a2.opening, a2.closing, a2.trades), (35.0, 35.0, 1));

        let b1 = &positions[2];
        assert_eq!(b1.trader, "B");
        assert_eq!((b1.opening, b1.closing), (5.0, 5.0));
    }

    #[test]
    fn test_session_window() {
        assert!(session_window(&[]).is_none());
        let trades = vec![trade("A", 2, 9, 0.0), trade("A", 1, 15, 0.0), trade("B", 2, 16, 0.0)];
        let window = session_window(&trades).unwrap();
        assert_eq!(window.start, trades[1].timestamp);
        assert_eq!(window.end, trades[2].timestamp);
    }
}
