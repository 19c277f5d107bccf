//! Row types flowing through the ETL
//!
//! `RawRecord` is one trade tick as read from a source file, with every field
//! nullable. `DailySummary` is one report row per (ISIN, date).

use chrono::{NaiveDate, NaiveTime};

/// One trade tick from a Xetra source file
///
/// Fields are `None` when the cell was empty or unparsable; such rows are
/// dropped before aggregation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub isin: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub start_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_price: Option<f64>,
    pub end_price: Option<f64>,
    pub traded_volume: Option<f64>,
}

/// A `RawRecord` with every column present
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub isin: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub start_price: f64,
    pub max_price: f64,
    pub min_price: f64,
    pub end_price: f64,
    pub traded_volume: f64,
}

impl RawRecord {
    /// Returns the complete tick, or None if any column is null
    ///
    /// NaN and infinite measures count as null.
    pub fn complete(&self) -> Option<Tick> {
        let finite = |value: Option<f64>| value.filter(|v| v.is_finite());

        Some(Tick {
            isin: self.isin.clone().filter(|s| !s.is_empty())?,
            date: self.date?,
            time: self.time?,
            start_price: finite(self.start_price)?,
            max_price: finite(self.max_price)?,
            min_price: finite(self.min_price)?,
            end_price: finite(self.end_price)?,
            traded_volume: finite(self.traded_volume)?,
        })
    }
}

/// One report row per (ISIN, date)
#[derive(Debug, Clone, PartialEq)]
pub struct DailySummary {
    pub isin: String,
    pub date: NaiveDate,
    pub opening_price: f64,
    pub closing_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub daily_traded_volume: f64,
    /// None when there is no previous trading day for the ISIN
    pub change_prev_closing_pct: Option<f64>,
}

/// Report rows ordered by (ISIN, date)
pub type SummaryTable = Vec<DailySummary>;
