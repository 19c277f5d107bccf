//! Xetra ETL component
//!
//! Reads the daily Xetra trading files for the planned dates from the source
//! bucket, aggregates them into one report row per ISIN and day, writes the
//! report to the target bucket and records the processed dates in the meta
//! file.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{format_date, format_datetime, XetraSourceConfig, XetraTargetConfig};
use crate::constants::FileType;
use crate::csv_codec::{encode_summary_csv, read_csv_records};
use crate::meta_process::{self, ExtractionPlan};
use crate::parquet_writer::ParquetWriter;
use crate::records::{DailySummary, RawRecord, SummaryTable, Tick};
use crate::store::ObjectStore;

/// Round to two decimal places, half away from zero
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Percent change from `previous` to `current`
///
/// None when the previous close is zero or the result is not finite.
pub fn change_pct(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    let change = (current - previous) / previous * 100.0;
    change.is_finite().then_some(change)
}

/// Aggregate one (ISIN, date) group of ticks
///
/// Opening and closing prices are both taken from the `StartPrice` column of
/// the earliest and the latest tick. Ties in time keep input order.
fn aggregate_group(isin: String, date: NaiveDate, mut ticks: Vec<Tick>) -> Option<DailySummary> {
    ticks.sort_by_key(|t| t.time);

    let first = ticks.first()?;
    let last = ticks.last()?;

    let min_price = ticks.iter().map(|t| t.min_price).fold(f64::INFINITY, f64::min);
    let max_price = ticks.iter().map(|t| t.max_price).fold(f64::NEG_INFINITY, f64::max);
    let daily_traded_volume: f64 = ticks.iter().map(|t| t.traded_volume).sum();

    Some(DailySummary {
        isin,
        date,
        opening_price: first.start_price,
        closing_price: last.start_price,
        min_price,
        max_price,
        daily_traded_volume,
        change_prev_closing_pct: None,
    })
}

/// Build the daily report from raw ticks
///
/// 1. Drop records with a null in any projected column.
/// 2. Group by (ISIN, date); opening/closing price from the first/last tick by
///    time, min of MinPrice, max of MaxPrice, sum of TradedVolume.
/// 3. Per ISIN in date order, compute the change against the previous day's
///    closing price (null for the first day of an ISIN).
/// 4. Round every measure to two decimals.
/// 5. Keep rows dated on or after `arg_date`; earlier rows only seed the
///    previous closing price.
pub fn aggregate(records: Vec<RawRecord>, arg_date: NaiveDate) -> SummaryTable {
    let total = records.len();

    let mut groups: BTreeMap<(String, NaiveDate), Vec<Tick>> = BTreeMap::new();
    let mut kept = 0usize;
    for tick in records.iter().filter_map(RawRecord::complete) {
        kept += 1;
        groups.entry((tick.isin.clone(), tick.date)).or_default().push(tick);
    }

    if kept < total {
        info!("Dropped {} of {} records with missing values", total - kept, total);
    }

    // BTreeMap order is (ISIN, date), so each ISIN's days are contiguous and sorted
    let mut daily: SummaryTable = groups
        .into_iter()
        .filter_map(|((isin, date), ticks)| aggregate_group(isin, date, ticks))
        .collect();

    let mut previous: Option<(String, f64)> = None;
    for row in daily.iter_mut() {
        row.change_prev_closing_pct = match &previous {
            Some((isin, prev_close)) if *isin == row.isin => change_pct(row.closing_price, *prev_close),
            _ => None,
        };
        previous = Some((row.isin.clone(), row.closing_price));
    }

    let aggregated = daily.len();
    let report: SummaryTable = daily
        .into_iter()
        .filter(|row| row.date >= arg_date)
        .map(|row| DailySummary {
            opening_price: round2(row.opening_price),
            closing_price: round2(row.closing_price),
            min_price: round2(row.min_price),
            max_price: round2(row.max_price),
            daily_traded_volume: round2(row.daily_traded_volume),
            change_prev_closing_pct: row.change_prev_closing_pct.map(round2),
            ..row
        })
        .collect();

    debug!(
        "Aggregated {} records into {} daily rows, {} on or after {}",
        kept,
        aggregated,
        report.len(),
        arg_date
    );
    report
}

/// Reads the Xetra data, transforms it and writes the report to the target
pub struct XetraETL {
    s3_bucket_src: Arc<dyn ObjectStore>,
    s3_bucket_trg: Arc<dyn ObjectStore>,
    meta_key: String,
    src_args: XetraSourceConfig,
    trg_args: XetraTargetConfig,
}

impl XetraETL {
    /// # Arguments
    /// * `s3_bucket_src` - connection to the source bucket
    /// * `s3_bucket_trg` - connection to the target bucket (reports and meta file)
    /// * `meta_key` - key of the meta file in the target bucket
    pub fn new(
        s3_bucket_src: Arc<dyn ObjectStore>,
        s3_bucket_trg: Arc<dyn ObjectStore>,
        meta_key: String,
        src_args: XetraSourceConfig,
        trg_args: XetraTargetConfig,
    ) -> Self {
        Self {
            s3_bucket_src,
            s3_bucket_trg,
            meta_key,
            src_args,
            trg_args,
        }
    }

    /// Read and concatenate every source object of the given dates
    ///
    /// Objects are found by key prefix (the date in `src_date_format`). Dates
    /// without objects contribute nothing.
    pub async fn extract(&self, dates: &[NaiveDate]) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        let mut files = 0usize;

        for date in dates {
            let prefix = format_date(*date, &self.src_args.src_date_format)?;
            let keys = self.s3_bucket_src.list_keys(&prefix).await
                .context(format!("Failed to list source objects for {}", prefix))?;

            if keys.is_empty() {
                debug!("No source objects for {}", prefix);
            }

            for key in keys {
                let rows = read_csv_records(self.s3_bucket_src.as_ref(), &key, &self.src_args).await?;
                records.extend(rows);
                files += 1;
            }
        }

        info!("Extracted {} records from {} objects over {} dates", records.len(), files, dates.len());
        Ok(records)
    }

    /// Aggregate the extracted records into the daily report
    pub fn transform_report1(&self, records: Vec<RawRecord>, arg_date: NaiveDate) -> SummaryTable {
        if records.is_empty() {
            info!("No records extracted, skipping transformation");
            return Vec::new();
        }

        let report = aggregate(records, arg_date);
        info!("Applied transformations: {} report rows", report.len());
        report
    }

    /// Target key: prefix, run timestamp and file extension
    pub fn report_key(&self, now: NaiveDateTime) -> Result<String> {
        Ok(format!(
            "{}{}{}",
            self.trg_args.trg_key,
            format_datetime(now, &self.trg_args.trg_key_date_format)?,
            self.trg_args.trg_format.extension()
        ))
    }

    /// Write the report, then record `extract_date_list` in the meta file
    ///
    /// The meta file is only touched after the report has been written.
    pub async fn load(
        &self,
        table: &SummaryTable,
        extract_date_list: &[NaiveDate],
        now: NaiveDateTime,
    ) -> Result<String> {
        let key = self.report_key(now)?;

        let data = match self.trg_args.trg_format {
            FileType::Parquet => ParquetWriter::new(&self.trg_args).encode(table)?,
            FileType::Csv => encode_summary_csv(table, &self.trg_args)?,
        };

        self.s3_bucket_trg.put_object(&key, data).await
            .context(format!("Failed to write report: {}", key))?;
        info!("Xetra target data successfully written to {}", key);

        meta_process::update_meta_file(self.s3_bucket_trg.as_ref(), &self.meta_key, extract_date_list, now)
            .await?;

        Ok(key)
    }

    /// Extract, transform and load one report for the given plan
    ///
    /// Returns the key of the written report, or None when nothing was written.
    pub async fn etl_report1(&self, plan: &ExtractionPlan, now: NaiveDateTime) -> Result<Option<String>> {
        if plan.is_empty() {
            info!("No dates to extract, skipping report");
            return Ok(None);
        }

        let records = self.extract(&plan.dates).await?;
        let table = self.transform_report1(records, plan.report_start);

        if table.is_empty() {
            warn!("No report rows on or after {}, nothing written", plan.report_start);
            return Ok(None);
        }

        let key = self.load(&table, &plan.extract_date_list(), now).await?;
        Ok(Some(key))
    }

    /// Plan from the meta file and run the report as of `now`
    pub async fn run_at(&self, arg_date: NaiveDate, now: NaiveDateTime) -> Result<Option<String>> {
        let plan = meta_process::return_date_list_as_of(
            self.s3_bucket_trg.as_ref(),
            arg_date,
            &self.meta_key,
            now.date(),
        )
        .await?;

        self.etl_report1(&plan, now).await
    }

    /// Plan from the meta file and run the report as of the local time
    pub async fn run(&self, arg_date: NaiveDate) -> Result<Option<String>> {
        self.run_at(arg_date, Local::now().naive_local()).await
    }
}
