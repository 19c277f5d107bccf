//! Fixed formats, column names and file types shared across the ETL

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// File types supported when writing tables to a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Csv,
    #[default]
    Parquet,
}

impl FileType {
    /// Key suffix including the leading dot (e.g. ".parquet")
    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Csv => ".csv",
            FileType::Parquet => ".parquet",
        }
    }
}

/// Date format of the `source_date` column in the meta file
pub const META_DATE_FORMAT: &str = "%Y-%m-%d";
/// Timestamp format of the `datetime_of_processing` column in the meta file
pub const META_PROCESS_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const META_SOURCE_DATE_COL: &str = "source_date";
pub const META_PROCESS_COL: &str = "datetime_of_processing";

/// Default date format of source object prefixes and the reporting date
pub const SRC_DATE_FORMAT: &str = "%Y-%m-%d";

/// Reporting date returned when the meta file already covers every date.
/// Callers treat it as "nothing to extract".
pub fn far_future_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2200, 1, 1).unwrap_or(NaiveDate::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_from_yaml() {
        let parquet: FileType = serde_yaml::from_str("parquet").unwrap();
        let csv: FileType = serde_yaml::from_str("csv").unwrap();

        assert_eq!(parquet, FileType::Parquet);
        assert_eq!(csv, FileType::Csv);
        assert!(serde_yaml::from_str::<FileType>("xlsx").is_err());
    }

    #[test]
    fn test_far_future_date() {
        assert_eq!(far_future_date(), NaiveDate::from_ymd_opt(2200, 1, 1).unwrap());
    }

    #[test]
    fn test_extension() {
        assert_eq!(FileType::Parquet.extension(), ".parquet");
        assert_eq!(FileType::Csv.extension(), ".csv");
    }
}
