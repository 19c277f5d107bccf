//! Meta file processing
//!
//! The meta file is a CSV ledger in the target bucket with one row per source
//! date already extracted (`source_date,datetime_of_processing`). It decides
//! which dates a run has to extract and is appended to after every successful
//! load.

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{Local, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::constants::{
    far_future_date, META_DATE_FORMAT, META_PROCESS_COL, META_PROCESS_DATE_FORMAT,
    META_SOURCE_DATE_COL,
};
use crate::error::EtlError;
use crate::store::ObjectStore;

/// One meta file row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaEntry {
    pub source_date: NaiveDate,
    /// Kept verbatim so rewriting the file never alters existing rows
    pub datetime_of_processing: String,
}

/// Dates a run has to extract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionPlan {
    /// First date of `dates`: the day before `report_start`, fetched only to
    /// seed the previous closing price
    pub lookback_date: NaiveDate,
    /// First date that must appear in the report
    pub report_start: NaiveDate,
    /// Dates to extract in ascending order
    pub dates: Vec<NaiveDate>,
}

impl ExtractionPlan {
    /// Plan for a run with nothing to do
    pub fn nothing_to_extract() -> Self {
        Self {
            lookback_date: far_future_date(),
            report_start: far_future_date(),
            dates: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Dates that end up in the report and therefore in the meta file
    pub fn extract_date_list(&self) -> Vec<NaiveDate> {
        self.dates
            .iter()
            .copied()
            .filter(|d| *d >= self.report_start)
            .collect()
    }
}

fn day_before(date: NaiveDate) -> NaiveDate {
    date.pred_opt().unwrap_or(date)
}

/// Every calendar date from `start` to `end`, both inclusive
pub fn calendar_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Compute the extraction plan from the set of already processed dates
///
/// The calendar runs from the day before `arg_date` through `today`. Without a
/// meta file everything is extracted. Otherwise extraction restarts one day
/// before the earliest date that is missing from the meta file.
pub fn plan_extraction(
    arg_date: NaiveDate,
    today: NaiveDate,
    processed: Option<&BTreeSet<NaiveDate>>,
) -> ExtractionPlan {
    let start = day_before(arg_date);
    let dates = calendar_range(start, today);

    let Some(processed) = processed else {
        return ExtractionPlan {
            lookback_date: start,
            report_start: arg_date,
            dates,
        };
    };

    // The first calendar day is only a lookback day, never a missing one
    let first_missing = dates
        .iter()
        .skip(1)
        .find(|d| !processed.contains(d))
        .copied();

    match first_missing {
        Some(first_missing) => {
            let lookback_date = day_before(first_missing);
            ExtractionPlan {
                lookback_date,
                report_start: first_missing,
                dates: dates.into_iter().filter(|d| *d >= lookback_date).collect(),
            }
        }
        None => ExtractionPlan::nothing_to_extract(),
    }
}

/// Parse the meta file CSV
///
/// A missing `source_date` column or an unparsable date is fatal.
pub fn parse_meta_file(data: &[u8]) -> Result<Vec<MetaEntry>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(data);

    let headers = reader.headers()
        .map_err(|e| EtlError::MalformedLedger { line: 1, reason: e.to_string() })?
        .clone();

    let date_idx = headers
        .iter()
        .position(|h| h == META_SOURCE_DATE_COL)
        .ok_or_else(|| EtlError::MalformedLedger {
            line: 1,
            reason: format!("missing column '{}'", META_SOURCE_DATE_COL),
        })?;
    let process_idx = headers.iter().position(|h| h == META_PROCESS_COL);

    let mut entries = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        // Header is line 1
        let line = idx + 2;
        let row = result.map_err(|e| EtlError::MalformedLedger { line, reason: e.to_string() })?;

        let raw_date = row.get(date_idx).unwrap_or_default();
        let source_date = NaiveDate::parse_from_str(raw_date, META_DATE_FORMAT).map_err(|e| {
            EtlError::MalformedLedger {
                line,
                reason: format!("invalid {} '{}': {}", META_SOURCE_DATE_COL, raw_date, e),
            }
        })?;

        let datetime_of_processing = process_idx
            .and_then(|i| row.get(i))
            .unwrap_or_default()
            .to_string();

        entries.push(MetaEntry { source_date, datetime_of_processing });
    }

    Ok(entries)
}

/// Encode meta file rows as CSV
pub fn encode_meta_file(entries: &[MetaEntry]) -> Result<Bytes> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    writer.write_record([META_SOURCE_DATE_COL, META_PROCESS_COL])
        .context("Failed to write meta file header")?;

    for entry in entries {
        writer.write_record([
            entry.source_date.format(META_DATE_FORMAT).to_string(),
            entry.datetime_of_processing.clone(),
        ])
        .context("Failed to write meta file row")?;
    }

    let data = writer.into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush meta file writer: {}", e))?;

    Ok(Bytes::from(data))
}

/// Read the meta file; `None` when it does not exist yet
pub async fn read_meta_file(store: &dyn ObjectStore, meta_key: &str) -> Result<Option<Vec<MetaEntry>>> {
    match store.get_object(meta_key).await {
        Ok(data) => {
            let entries = parse_meta_file(&data)
                .context(format!("Failed to parse meta file: {}", meta_key))?;
            debug!("Meta file {} holds {} entries", meta_key, entries.len());
            Ok(Some(entries))
        }
        Err(e) if EtlError::is_not_found(&e) => {
            info!("Meta file {} not found, extracting every date", meta_key);
            Ok(None)
        }
        Err(e) => Err(e.context(format!("Failed to read meta file: {}", meta_key))),
    }
}

/// Compute the extraction plan as of `today`
pub async fn return_date_list_as_of(
    store: &dyn ObjectStore,
    arg_date: NaiveDate,
    meta_key: &str,
    today: NaiveDate,
) -> Result<ExtractionPlan> {
    let processed: Option<BTreeSet<NaiveDate>> = read_meta_file(store, meta_key)
        .await?
        .map(|entries| entries.into_iter().map(|e| e.source_date).collect());

    let plan = plan_extraction(arg_date, today, processed.as_ref());

    if plan.is_empty() {
        info!("No dates missing since {}", arg_date);
    } else {
        info!(
            "Extracting {} dates from {} (report starts {})",
            plan.dates.len(),
            plan.lookback_date,
            plan.report_start
        );
    }

    Ok(plan)
}

/// Compute the extraction plan as of the local calendar date
pub async fn return_date_list(
    store: &dyn ObjectStore,
    arg_date: NaiveDate,
    meta_key: &str,
) -> Result<ExtractionPlan> {
    return_date_list_as_of(store, arg_date, meta_key, Local::now().date_naive()).await
}

/// Append `extract_date_list` to the meta file, keeping every existing row
pub async fn update_meta_file(
    store: &dyn ObjectStore,
    meta_key: &str,
    extract_date_list: &[NaiveDate],
    processed_at: NaiveDateTime,
) -> Result<()> {
    if extract_date_list.is_empty() {
        debug!("No dates to add to meta file {}", meta_key);
        return Ok(());
    }

    let mut entries = read_meta_file(store, meta_key).await?.unwrap_or_default();

    let processed_at = processed_at.format(META_PROCESS_DATE_FORMAT).to_string();
    entries.extend(extract_date_list.iter().map(|d| MetaEntry {
        source_date: *d,
        datetime_of_processing: processed_at.clone(),
    }));

    let data = encode_meta_file(&entries)?;
    store.put_object(meta_key, data).await
        .context(format!("Failed to write meta file: {}", meta_key))?;

    info!("Added {} dates to meta file {}", extract_date_list.len(), meta_key);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 4, day).unwrap()
    }

    fn processed_at() -> NaiveDateTime {
        d(20).and_hms_opt(8, 30, 0).unwrap()
    }

    #[test]
    fn test_calendar_range() {
        assert_eq!(calendar_range(d(1), d(3)), vec![d(1), d(2), d(3)]);
        assert_eq!(calendar_range(d(3), d(3)), vec![d(3)]);
        assert!(calendar_range(d(4), d(3)).is_empty());
    }

    #[test]
    fn test_plan_without_meta_file_extracts_everything() {
        let plan = plan_extraction(d(2), d(5), None);

        assert_eq!(plan.dates, vec![d(1), d(2), d(3), d(4), d(5)]);
        assert_eq!(plan.lookback_date, d(1));
        assert_eq!(plan.report_start, d(2));
        assert_eq!(plan.extract_date_list(), vec![d(2), d(3), d(4), d(5)]);
    }

    #[test]
    fn test_plan_fills_gaps_from_day_before_first_gap() {
        // Calendar D1..D5, meta file holds D2 and D4: missing D3 and D5
        let processed: BTreeSet<NaiveDate> = [d(2), d(4)].into_iter().collect();
        let plan = plan_extraction(d(2), d(5), Some(&processed));

        assert_eq!(plan.lookback_date, d(2));
        assert_eq!(plan.report_start, d(3));
        assert_eq!(plan.dates, vec![d(2), d(3), d(4), d(5)]);
        assert_eq!(plan.extract_date_list(), vec![d(3), d(4), d(5)]);
    }

    #[test]
    fn test_plan_ignores_lookback_day_in_calendar() {
        // D1 is the lookback day of the calendar and never counts as missing
        let processed: BTreeSet<NaiveDate> = [d(2), d(3)].into_iter().collect();
        let plan = plan_extraction(d(2), d(3), Some(&processed));

        assert!(plan.is_empty());
        assert_eq!(plan.report_start, far_future_date());
    }

    #[test]
    fn test_plan_nothing_missing() {
        let processed: BTreeSet<NaiveDate> = (2..=5).map(d).collect();
        let plan = plan_extraction(d(2), d(5), Some(&processed));

        assert_eq!(plan, ExtractionPlan::nothing_to_extract());
        assert!(plan.extract_date_list().is_empty());
    }

    #[test]
    fn test_plan_reference_date_in_future() {
        let plan = plan_extraction(d(10), d(5), None);
        assert!(plan.is_empty());
        assert_eq!(plan.report_start, d(10));
    }

    #[test]
    fn test_parse_meta_file() {
        let csv = "source_date,datetime_of_processing\n2021-04-01,2021-04-02 08:00:00\n2021-04-02,2021-04-02\n";
        let entries = parse_meta_file(csv.as_bytes()).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source_date, d(1));
        assert_eq!(entries[0].datetime_of_processing, "2021-04-02 08:00:00");
        assert_eq!(entries[1].datetime_of_processing, "2021-04-02");
    }

    #[test]
    fn test_parse_meta_file_malformed_row_is_fatal() {
        let csv = "source_date,datetime_of_processing\n2021-04-01,x\nnot-a-date,y\n";
        let err = parse_meta_file(csv.as_bytes()).unwrap_err();

        match err.downcast_ref::<EtlError>() {
            Some(EtlError::MalformedLedger { line, .. }) => assert_eq!(*line, 3),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_meta_file_missing_column() {
        let csv = "date,processed\n2021-04-01,x\n";
        let err = parse_meta_file(csv.as_bytes()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EtlError>(),
            Some(EtlError::MalformedLedger { line: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_return_date_list_without_meta_file() {
        let store = MemoryStore::new();
        let plan = return_date_list_as_of(&store, d(2), "meta_file.csv", d(4)).await.unwrap();

        assert_eq!(plan.dates, vec![d(1), d(2), d(3), d(4)]);
        assert_eq!(plan.report_start, d(2));
    }

    #[tokio::test]
    async fn test_return_date_list_with_meta_file() {
        let store = MemoryStore::new();
        store.insert(
            "meta_file.csv",
            "source_date,datetime_of_processing\n2021-04-02,2021-04-02 08:00:00\n2021-04-04,2021-04-04 08:00:00\n",
        );

        let plan = return_date_list_as_of(&store, d(2), "meta_file.csv", d(5)).await.unwrap();
        assert_eq!(plan.lookback_date, d(2));
        assert_eq!(plan.dates, vec![d(2), d(3), d(4), d(5)]);
    }

    #[tokio::test]
    async fn test_return_date_list_malformed_meta_file_is_fatal() {
        let store = MemoryStore::new();
        store.insert("meta_file.csv", "source_date,datetime_of_processing\n04/02/2021,x\n");

        let err = return_date_list_as_of(&store, d(2), "meta_file.csv", d(5)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EtlError>(),
            Some(EtlError::MalformedLedger { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_meta_file_creates_file() {
        let store = MemoryStore::new();
        update_meta_file(&store, "meta_file.csv", &[d(1), d(2)], processed_at()).await.unwrap();

        let text = String::from_utf8(store.get("meta_file.csv").unwrap().to_vec()).unwrap();
        assert_eq!(
            text,
            "source_date,datetime_of_processing\n2021-04-01,2021-04-20 08:30:00\n2021-04-02,2021-04-20 08:30:00\n"
        );
    }

    #[tokio::test]
    async fn test_update_meta_file_appends() {
        let store = MemoryStore::new();
        store.insert("meta_file.csv", "source_date,datetime_of_processing\n2021-03-31,2021-04-01\n");

        update_meta_file(&store, "meta_file.csv", &[d(1)], processed_at()).await.unwrap();

        let entries = parse_meta_file(&store.get("meta_file.csv").unwrap()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source_date, NaiveDate::from_ymd_opt(2021, 3, 31).unwrap());
        assert_eq!(entries[0].datetime_of_processing, "2021-04-01");
        assert_eq!(entries[1].source_date, d(1));
    }

    #[tokio::test]
    async fn test_update_meta_file_with_no_dates_writes_nothing() {
        let store = MemoryStore::new();
        update_meta_file(&store, "meta_file.csv", &[], processed_at()).await.unwrap();
        assert!(store.keys().is_empty());
    }
}
