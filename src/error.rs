//! Error kinds the ETL branches on or reports distinctly.
//!
//! Everything else travels as `anyhow::Error` with context attached at the
//! I/O boundary. Callers that need to react to one of these kinds use
//! `anyhow::Error::downcast_ref::<EtlError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EtlError {
    /// The requested object does not exist in the bucket
    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    /// A source object lacks one of the configured columns
    #[error("Column '{column}' missing in {key}")]
    MissingColumn { key: String, column: String },

    /// A ledger row could not be parsed
    #[error("Malformed meta file row {line}: {reason}")]
    MalformedLedger { line: usize, reason: String },

    /// A configured or CLI-supplied date did not match its format
    #[error("Invalid date '{value}' for format '{format}'")]
    InvalidDate { value: String, format: String },
}

impl EtlError {
    /// Returns true if `err` is (or wraps) an `ObjectNotFound`
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<EtlError>(),
            Some(EtlError::ObjectNotFound { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_not_found_survives_context() {
        let err: anyhow::Error = EtlError::ObjectNotFound { key: "meta.csv".to_string() }.into();
        let wrapped = Err::<(), _>(err).context("Failed to read meta file").unwrap_err();

        assert!(EtlError::is_not_found(&wrapped));
    }

    #[test]
    fn test_other_kinds_are_not_not_found() {
        let err: anyhow::Error = EtlError::MissingColumn {
            key: "2021-04-01/a.csv".to_string(),
            column: "ISIN".to_string(),
        }
        .into();

        assert!(!EtlError::is_not_found(&err));
        assert!(!EtlError::is_not_found(&anyhow::anyhow!("network down")));
        assert_eq!(err.to_string(), "Column 'ISIN' missing in 2021-04-01/a.csv");
    }
}
