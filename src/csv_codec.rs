//! Delimited-text codec
//!
//! Decodes Xetra source objects into `RawRecord`s using the configured column
//! names, and encodes report tables as CSV.

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{NaiveDate, NaiveTime};
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::config::{XetraSourceConfig, XetraTargetConfig};
use crate::error::EtlError;
use crate::records::{RawRecord, SummaryTable};
use crate::store::ObjectStore;

/// Date format used for the date column of CSV reports
pub const REPORT_DATE_FORMAT: &str = "%Y-%m-%d";

const TIME_FORMATS: [&str; 2] = ["%H:%M", "%H:%M:%S"];

/// Cell values read as missing, in addition to the empty string
const NA_VALUES: [&str; 18] = [
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Column positions of the projected source columns
struct SourceColumns {
    isin: usize,
    date: usize,
    time: usize,
    start_price: usize,
    max_price: usize,
    min_price: usize,
    end_price: usize,
    traded_volume: usize,
}

impl SourceColumns {
    fn locate(headers: &StringRecord, key: &str, src: &XetraSourceConfig) -> Result<Self> {
        let mut positions = [0usize; 8];
        for (slot, column) in positions.iter_mut().zip(src.columns()) {
            *slot = headers
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| EtlError::MissingColumn {
                    key: key.to_string(),
                    column: column.to_string(),
                })?;
        }

        let [isin, date, time, start_price, max_price, min_price, end_price, traded_volume] = positions;
        Ok(Self {
            isin,
            date,
            time,
            start_price,
            max_price,
            min_price,
            end_price,
            traded_volume,
        })
    }
}

/// Cell at `idx`, None for absent, empty or NA cells
fn cell(record: &StringRecord, idx: usize) -> Option<&str> {
    record.get(idx).filter(|v| !v.is_empty() && !NA_VALUES.contains(v))
}

/// Parse a cell, counting unparsable values as null
fn parse_cell<T: FromStr>(record: &StringRecord, idx: usize, invalid: &mut usize) -> Option<T> {
    let value = cell(record, idx)?;
    match value.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            debug!("Unparsable value '{}' in column {}", value, idx);
            *invalid += 1;
            None
        }
    }
}

/// Parse a numeric cell; infinities count as unparsable
fn parse_number(record: &StringRecord, idx: usize, invalid: &mut usize) -> Option<f64> {
    let value = parse_cell::<f64>(record, idx, invalid)?;
    if value.is_finite() {
        Some(value)
    } else {
        debug!("Non-finite value {} in column {}", value, idx);
        *invalid += 1;
        None
    }
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(value, format).ok())
}

/// Decode a Xetra CSV object into raw records
///
/// The header row must contain every configured source column; other
/// columns are ignored. Empty, NA and unparsable cells become nulls.
pub fn decode_raw_records(data: &[u8], key: &str, src: &XetraSourceConfig) -> Result<Vec<RawRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(data);

    let headers = reader.headers()
        .context(format!("Failed to read CSV header of {}", key))?
        .clone();
    let cols = SourceColumns::locate(&headers, key, src)?;

    let mut records = Vec::new();
    let mut invalid = 0usize;

    for result in reader.records() {
        let row = result.context(format!("Failed to read CSV row of {}", key))?;

        let date = match cell(&row, cols.date) {
            Some(v) => match NaiveDate::parse_from_str(v, &src.src_date_format) {
                Ok(d) => Some(d),
                Err(_) => {
                    invalid += 1;
                    None
                }
            },
            None => None,
        };

        let time = match cell(&row, cols.time) {
            Some(v) => {
                let parsed = parse_time(v);
                if parsed.is_none() {
                    invalid += 1;
                }
                parsed
            }
            None => None,
        };

        records.push(RawRecord {
            isin: cell(&row, cols.isin).map(|s| s.to_string()),
            date,
            time,
            start_price: parse_number(&row, cols.start_price, &mut invalid),
            max_price: parse_number(&row, cols.max_price, &mut invalid),
            min_price: parse_number(&row, cols.min_price, &mut invalid),
            end_price: parse_number(&row, cols.end_price, &mut invalid),
            traded_volume: parse_number(&row, cols.traded_volume, &mut invalid),
        });
    }

    if invalid > 0 {
        warn!("{} unparsable cells in {} treated as null", invalid, key);
    }

    debug!("Decoded {} rows from {}", records.len(), key);
    Ok(records)
}

/// Read a source object from the store and decode it
pub async fn read_csv_records(
    store: &dyn ObjectStore,
    key: &str,
    src: &XetraSourceConfig,
) -> Result<Vec<RawRecord>> {
    let data = store.get_object(key).await
        .context(format!("Failed to read source object: {}", key))?;

    decode_raw_records(&data, key, src)
}

/// Encode a report table as CSV with the configured target column names
pub fn encode_summary_csv(table: &SummaryTable, trg: &XetraTargetConfig) -> Result<Bytes> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    writer.write_record(trg.columns())
        .context("Failed to write CSV header")?;

    for row in table {
        writer.write_record([
            row.isin.clone(),
            row.date.format(REPORT_DATE_FORMAT).to_string(),
            row.opening_price.to_string(),
            row.closing_price.to_string(),
            row.min_price.to_string(),
            row.max_price.to_string(),
            row.daily_traded_volume.to_string(),
            row.change_prev_closing_pct.map(|v| v.to_string()).unwrap_or_default(),
        ])
        .context("Failed to write CSV row")?;
    }

    let data = writer.into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV writer: {}", e))?;

    Ok(Bytes::from(data))
}
