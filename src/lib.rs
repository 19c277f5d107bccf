//! Xetra ETL Library
//!
//! This library reads the daily Xetra trading files from an S3 bucket,
//! aggregates them into one report row per ISIN and trading day (opening,
//! closing, minimum and maximum price, traded volume and change to the
//! previous closing price) and writes the report to a target bucket.
//!
//! A meta file in the target bucket records which source dates have been
//! processed, so each run only extracts the dates that are still missing.

pub mod config;
pub mod constants;
pub mod csv_codec;
pub mod error;
pub mod meta_process;
pub mod parquet_writer;
pub mod records;
pub mod s3_helper;
pub mod store;
pub mod transformer;

// Re-export commonly used types
pub use config::{Config, S3Config, XetraSourceConfig, XetraTargetConfig};
pub use constants::FileType;
pub use error::EtlError;
pub use meta_process::{ExtractionPlan, MetaEntry};
pub use parquet_writer::ParquetWriter;
pub use records::{DailySummary, RawRecord, SummaryTable};
pub use s3_helper::{S3Helper, S3Provider};
pub use store::ObjectStore;
pub use transformer::XetraETL;
