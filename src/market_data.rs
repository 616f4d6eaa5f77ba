use crate::models::{Bar, BarSeries};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::{info, warn};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const REQUIRED_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DataQualityReport {
    pub rows_read: usize,
    pub invalid_rows: usize,
    pub out_of_order: usize,
    pub duplicates: usize,
    pub first_invalid_row: Option<usize>,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct OhlcvRecord {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(anyhow!("Unrecognized timestamp '{}'", raw))
}

/// Parses optional inclusive window bounds. A date-only end covers that whole day.
pub fn parse_date_window(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
    let start = start.map(parse_timestamp).transpose()?;
    let end = match end {
        Some(raw) => Some(match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
            Ok(date) => {
                let naive = date
                    .and_hms_opt(23, 59, 59)
                    .ok_or_else(|| anyhow!("Invalid end date '{}'", raw))?;
                Utc.from_utc_datetime(&naive)
            }
            Err(_) => parse_timestamp(raw)?,
        }),
        None => None,
    };
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(anyhow!("Window start {} is after end {}", start, end));
        }
    }
    Ok((start, end))
}

fn record_to_bar(record: OhlcvRecord) -> std::result::Result<Bar, String> {
    let date = parse_timestamp(&record.timestamp).map_err(|err| err.to_string())?;
    if !record.volume.is_finite() || record.volume < 0.0 {
        return Err(format!("invalid volume {}", record.volume));
    }
    let bar = Bar {
        date,
        open: record.open,
        high: record.high,
        low: record.low,
        close: record.close,
        volume: record.volume.round() as u64,
    };
    bar.validate()?;
    Ok(bar)
}

/// Reads `timestamp,open,high,low,close,volume` rows (header names are
/// case-insensitive). Bad rows are skipped and counted; the result is sorted
/// and keeps the last row for a repeated timestamp.
pub fn read_bars<R: Read>(reader: R, ticker: &str) -> Result<(BarSeries, DataQualityReport)> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let headers: csv::StringRecord = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|header| header.to_ascii_lowercase())
        .collect();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|header| header == *column))
        .collect();
    if !missing.is_empty() {
        return Err(anyhow!(
            "CSV is missing required columns: {}",
            missing.join(", ")
        ));
    }

    let mut report = DataQualityReport::default();
    let mut bars: Vec<Bar> = Vec::new();

    for (row, result) in reader.records().enumerate() {
        report.rows_read += 1;
        let parsed = result
            .map_err(|err| err.to_string())
            .and_then(|record| {
                record
                    .deserialize::<OhlcvRecord>(Some(&headers))
                    .map_err(|err| err.to_string())
            })
            .and_then(record_to_bar);

        match parsed {
            Ok(bar) => {
                if let Some(last) = bars.last() {
                    if bar.date < last.date {
                        report.out_of_order += 1;
                    }
                }
                bars.push(bar);
            }
            Err(reason) => {
                // Header is line 1, first data row is line 2.
                warn!("Skipping CSV line {} for {}: {}", row + 2, ticker, reason);
                report.invalid_rows += 1;
                report.first_invalid_row.get_or_insert(row + 2);
            }
        }
    }

    if report.out_of_order > 0 {
        bars.sort_by_key(|bar| bar.date);
    }

    let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match deduped.last_mut() {
            Some(last) if last.date == bar.date => {
                report.duplicates += 1;
                *last = bar;
            }
            _ => deduped.push(bar),
        }
    }

    if deduped.is_empty() {
        return Err(anyhow!("No valid bars found for {}", ticker));
    }

    report.first_timestamp = deduped.first().map(|bar| bar.date);
    report.last_timestamp = deduped.last().map(|bar| bar.date);

    let series = BarSeries::new(ticker, deduped)
        .with_context(|| format!("Loaded bars for {} failed validation", ticker))?;
    Ok((series, report))
}

pub fn load_csv(path: &Path, ticker: &str) -> Result<(BarSeries, DataQualityReport)> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open OHLCV CSV {}", path.display()))?;
    let (series, report) = read_bars(file, ticker)
        .with_context(|| format!("Failed to load bars from {}", path.display()))?;
    info!(
        "Loaded {} bars for {} from {} ({} invalid, {} duplicate, {} out of order)",
        series.len(),
        ticker,
        path.display(),
        report.invalid_rows,
        report.duplicates,
        report.out_of_order
    );
    Ok((series, report))
}
