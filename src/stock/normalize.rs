//! Provider tables to OHLCV bars

use crate::dataset::{parse_datetime, DataFrame};
use crate::types::PriceBar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Date,
    Open,
    High,
    Low,
    Close,
    Volume,
}

/// Case-insensitive header mapping, first match per field wins
fn classify(header: &str) -> Option<Field> {
    let h = header.trim().to_lowercase();
    if h.contains("date") || h == "datetime" || h == "timestamp" {
        Some(Field::Date)
    } else if h.contains("open") {
        Some(Field::Open)
    } else if h.contains("high") {
        Some(Field::High)
    } else if h.contains("low") {
        Some(Field::Low)
    } else if h.contains("close") {
        Some(Field::Close)
    } else if h.contains("volume") {
        Some(Field::Volume)
    } else {
        None
    }
}

/// Map a raw provider table onto [`PriceBar`]s sorted by date. Rows with
/// no parseable date or close are dropped.
pub fn normalize_columns(frame: &DataFrame) -> Vec<PriceBar> {
    let mut slots: [Option<usize>; 6] = [None; 6];
    for (idx, col) in frame.columns().iter().enumerate() {
        if let Some(field) = classify(&col.name) {
            let slot = &mut slots[field as usize];
            if slot.is_none() {
                *slot = Some(idx);
            }
        }
    }
    let (Some(date_idx), Some(close_idx)) = (slots[Field::Date as usize], slots[Field::Close as usize]) else {
        return Vec::new();
    };

    let columns = frame.columns();
    let numeric = |field: Field| slots[field as usize].map(|i| columns[i].numeric());
    let open = numeric(Field::Open);
    let high = numeric(Field::High);
    let low = numeric(Field::Low);
    let volume = numeric(Field::Volume);
    let close = columns[close_idx].numeric();
    let dates = &columns[date_idx].values;

    let pick = |col: &Option<Vec<Option<f64>>>, row: usize| col.as_ref().and_then(|c| c[row]);

    let mut bars: Vec<PriceBar> = (0..frame.n_rows())
        .filter_map(|row| {
            let date = dates[row].as_deref().and_then(parse_datetime)?;
            let close = close[row]?;
            Some(PriceBar {
                date,
                open: pick(&open, row),
                high: pick(&high, row),
                low: pick(&low, row),
                close,
                volume: pick(&volume, row),
            })
        })
        .collect();
    bars.sort_by_key(|b| b.date);
    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(headers: &[&str], rows: &[&[&str]]) -> DataFrame {
        DataFrame::from_rows(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| if c.is_empty() { None } else { Some(c.to_string()) }).collect())
                .collect(),
        )
    }

    #[test]
    fn test_alpha_vantage_layout_sorted_ascending() {
        let f = frame(
            &["timestamp", "open", "high", "low", "close", "volume"],
            &[
                &["2024-01-03", "11", "12", "10", "11.5", "900"],
                &["2024-01-02", "10", "11", "9", "10.5", "1000"],
            ],
        );
        let bars = normalize_columns(&f);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 10.5);
        assert_eq!(bars[1].volume, Some(900.0));
    }

    #[test]
    fn test_drops_rows_without_date_or_close() {
        let f = frame(
            &["Date", "Close"],
            &[&["2024-01-02", "1"], &["not a date", "2"], &["2024-01-04", ""]],
        );
        let bars = normalize_columns(&f);
        assert_eq!(bars.len(), 1);
        assert!(bars[0].open.is_none());
    }

    #[test]
    fn test_first_matching_column_wins() {
        let f = frame(&["Date", "Close", "Adj Close"], &[&["2024-01-02", "1", "0.9"]]);
        assert_eq!(normalize_columns(&f)[0].close, 1.0);
    }

    #[test]
    fn test_missing_close_column_gives_nothing() {
        let f = frame(&["Date", "Price"], &[&["2024-01-02", "1"]]);
        assert!(normalize_columns(&f).is_empty());
    }
}
