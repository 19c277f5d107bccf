//! Configuration module for the Xetra ETL job
//!
//! This module defines the YAML configuration: S3 connection settings for the
//! source and target buckets, source/target column mappings, the meta file key
//! and logging.

use anyhow::{Context, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::fs;
use std::path::Path;

use crate::constants::{FileType, SRC_DATE_FORMAT};
use crate::error::EtlError;

/// S3 connection settings shared by the source and target buckets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Settings {
    /// Name of the environment variable holding the access key ID
    pub access_key: String,
    /// Name of the environment variable holding the secret access key
    pub secret_key: String,
    /// Provider type: "aws", "b2" (Backblaze B2), "r2" (Cloudflare R2), or "generic"
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Region (optional, will use provider defaults if not specified)
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint of the source bucket (e.g. "https://s3.eu-central-1.amazonaws.com")
    #[serde(default)]
    pub src_endpoint_url: Option<String>,
    /// Bucket holding the raw daily trading files
    pub src_bucket: String,
    /// Endpoint of the target bucket
    #[serde(default)]
    pub trg_endpoint_url: Option<String>,
    /// Bucket receiving the reports and the meta file
    pub trg_bucket: String,
    /// Force path-style addressing (true for most S3-compatible services)
    #[serde(default)]
    pub force_path_style: Option<bool>,
}

fn default_provider() -> String {
    "aws".to_string()
}

/// Connection settings for a single bucket
///
/// Credentials are referenced by environment variable name and resolved when
/// the client is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub provider: String,
    pub bucket: String,
    pub access_key_env: String,
    pub secret_key_env: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint URL for S3-compatible services
    /// Examples:
    /// - Backblaze B2: "https://s3.us-west-002.backblazeb2.com"
    /// - Cloudflare R2: "https://<account-id>.r2.cloudflarestorage.com"
    /// - MinIO: "http://localhost:9000"
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub force_path_style: Option<bool>,
}

impl S3Settings {
    /// Settings for the source bucket
    pub fn source(&self) -> S3Config {
        self.bucket_config(&self.src_bucket, self.src_endpoint_url.clone())
    }

    /// Settings for the target bucket
    pub fn target(&self) -> S3Config {
        self.bucket_config(&self.trg_bucket, self.trg_endpoint_url.clone())
    }

    fn bucket_config(&self, bucket: &str, endpoint: Option<String>) -> S3Config {
        S3Config {
            provider: self.provider.clone(),
            bucket: bucket.to_string(),
            access_key_env: self.access_key.clone(),
            secret_key_env: self.secret_key.clone(),
            region: self.region.clone(),
            endpoint,
            force_path_style: self.force_path_style,
        }
    }
}

/// Source file settings: reporting start date and column names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XetraSourceConfig {
    /// First date that must appear in the report (e.g. "2021-04-01")
    pub src_first_extract_date: String,
    /// Date format of object prefixes and of `src_first_extract_date`
    #[serde(default = "default_src_date_format")]
    pub src_date_format: String,
    pub src_col_isin: String,
    pub src_col_date: String,
    pub src_col_time: String,
    pub src_col_start_price: String,
    pub src_col_min_price: String,
    pub src_col_max_price: String,
    pub src_col_end_price: String,
    pub src_col_traded_vol: String,
}

fn default_src_date_format() -> String {
    SRC_DATE_FORMAT.to_string()
}

impl XetraSourceConfig {
    /// Parse `src_first_extract_date` with `src_date_format`
    pub fn first_extract_date(&self) -> Result<NaiveDate> {
        parse_date(&self.src_first_extract_date, &self.src_date_format)
    }

    /// Source columns in the order the transformer projects them
    pub fn columns(&self) -> [&str; 8] {
        [
            self.src_col_isin.as_str(),
            self.src_col_date.as_str(),
            self.src_col_time.as_str(),
            self.src_col_start_price.as_str(),
            self.src_col_max_price.as_str(),
            self.src_col_min_price.as_str(),
            self.src_col_end_price.as_str(),
            self.src_col_traded_vol.as_str(),
        ]
    }
}

/// Target report settings: key layout, file type and output column names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XetraTargetConfig {
    /// Key prefix of the report objects (e.g. "report1/xetra_daily_report1_")
    pub trg_key: String,
    /// Timestamp format appended to `trg_key` (e.g. "%Y%m%d_%H%M%S")
    pub trg_key_date_format: String,
    #[serde(default)]
    pub trg_format: FileType,
    pub trg_col_isin: String,
    pub trg_col_date: String,
    pub trg_col_op_price: String,
    pub trg_col_clos_price: String,
    pub trg_col_min_price: String,
    pub trg_col_max_price: String,
    pub trg_col_dail_trad_vol: String,
    pub trg_col_ch_prev_clos: String,
}

impl XetraTargetConfig {
    /// Output columns in report order
    pub fn columns(&self) -> [&str; 8] {
        [
            self.trg_col_isin.as_str(),
            self.trg_col_date.as_str(),
            self.trg_col_op_price.as_str(),
            self.trg_col_clos_price.as_str(),
            self.trg_col_min_price.as_str(),
            self.trg_col_max_price.as_str(),
            self.trg_col_dail_trad_vol.as_str(),
            self.trg_col_ch_prev_clos.as_str(),
        ]
    }
}

/// Meta file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Key of the meta file in the target bucket
    pub meta_key: String,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub s3: S3Settings,
    pub source: XetraSourceConfig,
    pub target: XetraTargetConfig,
    pub meta: MetaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)
            .context("Failed to parse config YAML")?;

        // Fail early on bad dates and formats rather than mid-run
        config.source.first_extract_date()?;
        check_format(&config.target.trg_key_date_format)
            .context("Invalid trg_key_date_format")?;

        Ok(config)
    }
}

/// Parse a date string, mapping failures to `EtlError::InvalidDate`
pub fn parse_date(value: &str, format: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, format).map_err(|_| {
        anyhow::Error::from(EtlError::InvalidDate {
            value: value.to_string(),
            format: format.to_string(),
        })
    })
}

/// Reject strftime strings chrono cannot render
pub fn check_format(format: &str) -> Result<()> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        anyhow::bail!("Invalid format string: {}", format);
    }
    Ok(())
}

/// Format a date without panicking on an invalid format string
pub fn format_date(date: NaiveDate, format: &str) -> Result<String> {
    let mut out = String::new();
    write!(out, "{}", date.format(format))
        .map_err(|_| anyhow::anyhow!("Invalid date format: {}", format))?;
    Ok(out)
}

/// Format a timestamp without panicking on an invalid format string
pub fn format_datetime(datetime: NaiveDateTime, format: &str) -> Result<String> {
    let mut out = String::new();
    write!(out, "{}", datetime.format(format))
        .map_err(|_| anyhow::anyhow!("Invalid timestamp format: {}", format))?;
    Ok(out)
}
