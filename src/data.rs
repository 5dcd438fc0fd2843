//! Data loading and management
//!
//! Handles loading OHLCV bars from CSV files and assembling them into the
//! ordered, immutable [`BarSeries`] the engine replays.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{BacktestError, CoreResult};
use crate::types::Bar;

// =============================================================================
// Bar Series
// =============================================================================

/// Strictly time-ordered bars for one instrument and one timeframe
///
/// Gaps between bars are allowed; duplicate or decreasing timestamps are not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(bars: Vec<Bar>) -> CoreResult<Self> {
        for (index, bar) in bars.iter().enumerate() {
            bar.validate()
                .map_err(|source| BacktestError::InvalidBar { index, source })?;
        }
        for pair in bars.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(BacktestError::UnorderedBars {
                    previous: pair[0].timestamp,
                    current: pair[1].timestamp,
                });
            }
        }
        Ok(BarSeries { bars })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bar> {
        self.bars.iter()
    }

    /// Sub-series restricted to an inclusive date range
    pub fn filter_by_date(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> BarSeries {
        BarSeries {
            bars: filter_bars_by_date(self.bars.clone(), start, end),
        }
    }
}

impl<'a> IntoIterator for &'a BarSeries {
    type Item = &'a Bar;
    type IntoIter = std::slice::Iter<'a, Bar>;

    fn into_iter(self) -> Self::IntoIter {
        self.bars.iter()
    }
}

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Parse a bar timestamp: RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD` or epoch millis
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = raw.parse::<DateTime<Utc>>() {
        return Some(dt);
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(ndt.and_utc());
    }
    if let Ok(nd) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return nd.and_hms_opt(0, 0, 0).map(|ndt| ndt.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

fn parse_field(record: &csv::StringRecord, index: usize, name: &str) -> Result<f64> {
    record
        .get(index)
        .with_context(|| format!("Missing {} column", name))?
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {}", name))
}

/// Load OHLCV bars from a CSV file with validation
///
/// Rows that parse but fail bar validation are skipped with a warning.
/// Rows that cannot be parsed at all are errors.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut bars = Vec::new();
    let mut invalid_count = 0;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let ts_str = record.get(0).context("Missing timestamp column")?;
        let timestamp = parse_timestamp(ts_str)
            .with_context(|| format!("Failed to parse timestamp: {}", ts_str))?;

        let open = parse_field(&record, 1, "open")?;
        let high = parse_field(&record, 2, "high")?;
        let low = parse_field(&record, 3, "low")?;
        let close = parse_field(&record, 4, "close")?;
        let volume = parse_field(&record, 5, "volume")?;

        match Bar::new(timestamp, open, high, low, close, volume) {
            Ok(bar) => bars.push(bar),
            Err(e) => {
                invalid_count += 1;
                warn!(
                    "Skipping invalid bar at row {} in {:?}: {}",
                    row_idx + 2, // +2 for 1-indexed and header row
                    path.file_name().unwrap_or_default(),
                    e
                );
            }
        }
    }

    if invalid_count > 0 {
        warn!(
            "Skipped {} invalid bars out of {} in {:?}",
            invalid_count,
            invalid_count + bars.len(),
            path.file_name().unwrap_or_default()
        );
    }

    Ok(bars)
}

/// Filter bars by an inclusive date range
pub fn filter_bars_by_date(
    bars: Vec<Bar>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<Bar> {
    bars.into_iter()
        .filter(|b| {
            let after_start = start.is_none_or(|s| b.timestamp >= s);
            let before_end = end.is_none_or(|e| b.timestamp <= e);
            after_start && before_end
        })
        .collect()
}

/// Parse a date string (YYYY-MM-DD or YYYY-MM-DD HH:MM:SS) to DateTime<Utc>
pub fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = date_str.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(date_str, "%Y-%m-%d %H:%M:%S") {
        return Ok(ndt.and_utc());
    }

    // Start of day
    if let Some(ndt) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .ok()
        .and_then(|nd| nd.and_hms_opt(0, 0, 0))
    {
        return Ok(ndt.and_utc());
    }

    anyhow::bail!(
        "Failed to parse date: {}. Use YYYY-MM-DD or YYYY-MM-DD HH:MM:SS format",
        date_str
    )
}

/// Parse an inclusive end date; a bare `YYYY-MM-DD` covers the whole day
pub fn parse_end_date(date_str: &str) -> Result<DateTime<Utc>> {
    if let Some(ndt) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .ok()
        .and_then(|nd| nd.and_hms_opt(23, 59, 59))
    {
        return Ok(ndt.and_utc());
    }
    parse_date(date_str)
}

/// CSV location for a symbol: `{data_dir}/{SYMBOL}_{timeframe}.csv`
pub fn data_file_path(data_dir: impl AsRef<Path>, symbol: &str, timeframe: &str) -> PathBuf {
    let symbol: String = symbol
        .chars()
        .filter(|c| *c != '/')
        .collect::<String>()
        .to_uppercase();
    data_dir
        .as_ref()
        .join(format!("{}_{}.csv", symbol, timeframe))
}

/// Load, filter and order-check the bars for one symbol
pub fn load_series(
    data_dir: impl AsRef<Path>,
    symbol: &str,
    timeframe: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<BarSeries> {
    let path = data_file_path(data_dir, symbol, timeframe);
    if !path.exists() {
        anyhow::bail!("Data file not found: {}", path.display());
    }

    let bars = load_csv(&path).with_context(|| format!("Failed to load data for {}", symbol))?;
    let original_len = bars.len();
    let bars = filter_bars_by_date(bars, start, end);

    if start.is_some() || end.is_some() {
        info!(
            "Loaded {} bars for {} (filtered from {} total)",
            bars.len(),
            symbol,
            original_len
        );
    } else {
        info!("Loaded {} bars for {}", bars.len(), symbol);
    }

    BarSeries::new(bars).with_context(|| format!("Invalid bar sequence in {}", path.display()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn bar_at(day: u32, close: f64) -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, day, 8, 0, 0).unwrap(),
            close,
            close + 1.0,
            close - 1.0,
            close,
            100.0,
        )
        .unwrap()
    }

    #[test]
    fn test_bar_series_rejects_duplicates() {
        let bars = vec![bar_at(1, 10.0), bar_at(1, 11.0)];
        assert!(matches!(
            BarSeries::new(bars),
            Err(BacktestError::UnorderedBars { .. })
        ));
    }

    #[test]
    fn test_bar_series_rejects_invalid_bar() {
        let mut bad = bar_at(2, 10.0);
        bad.high = 1.0;
        let err = BarSeries::new(vec![bar_at(1, 10.0), bad]).unwrap_err();
        assert!(matches!(err, BacktestError::InvalidBar { index: 1, .. }));
    }

    #[test]
    fn test_bar_series_allows_gaps() {
        let series = BarSeries::new(vec![bar_at(1, 10.0), bar_at(5, 11.0)]).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.last().unwrap().close, 11.0);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-02T00:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 00:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02"), Some(expected));
        assert_eq!(parse_timestamp("1704153600000"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_filter_end_date_includes_whole_day() {
        let bars = vec![bar_at(1, 10.0), bar_at(2, 11.0), bar_at(3, 12.0)];
        let start = parse_date("2024-01-02").unwrap();
        let end = parse_end_date("2024-01-02").unwrap();
        let filtered = filter_bars_by_date(bars, Some(start), Some(end));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].close, 11.0);
    }

    #[test]
    fn test_data_file_path() {
        let path = data_file_path("data", "btc/usdt", "1d");
        assert_eq!(path, Path::new("data").join("BTCUSDT_1d.csv"));
    }

    #[test]
    fn test_load_csv_skips_invalid_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,open,high,low,close,volume").unwrap();
        writeln!(file, "2024-01-01 08:00:00,10,11,9,10.5,100").unwrap();
        writeln!(file, "2024-01-02 08:00:00,10,9,11,10.5,100").unwrap();
        writeln!(file, "2024-01-03T08:00:00Z,11,12,10,11.5,50").unwrap();
        file.flush().unwrap();

        let bars = load_csv(file.path()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].close, 11.5);
    }

    #[test]
    fn test_load_csv_rejects_unparsable_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,open,high,low,close,volume").unwrap();
        writeln!(file, "2024-01-01 08:00:00,ten,11,9,10.5,100").unwrap();
        file.flush().unwrap();

        assert!(load_csv(file.path()).is_err());
    }
}
