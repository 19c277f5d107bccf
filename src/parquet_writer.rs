//! Parquet encoding of report tables
//!
//! Builds an Arrow schema from the configured target column names, converts
//! summary rows into a RecordBatch and serialises it into an in-memory Parquet
//! file ready to be uploaded.

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Date32Builder, Float64Builder, RecordBatch, StringBuilder};
use arrow::datatypes::{DataType, Date32Type, Field, Schema};
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::XetraTargetConfig;
use crate::records::SummaryTable;

/// Writes report tables as Parquet
pub struct ParquetWriter {
    schema: Arc<Schema>,
}

impl ParquetWriter {
    pub fn new(trg: &XetraTargetConfig) -> Self {
        Self { schema: Self::summary_schema(trg) }
    }

    /// Report schema: ISIN and date, five non-null measures and the nullable
    /// change to the previous closing price
    pub fn summary_schema(trg: &XetraTargetConfig) -> Arc<Schema> {
        let fields = vec![
            Field::new(&trg.trg_col_isin, DataType::Utf8, false),
            Field::new(&trg.trg_col_date, DataType::Date32, false),
            Field::new(&trg.trg_col_op_price, DataType::Float64, false),
            Field::new(&trg.trg_col_clos_price, DataType::Float64, false),
            Field::new(&trg.trg_col_min_price, DataType::Float64, false),
            Field::new(&trg.trg_col_max_price, DataType::Float64, false),
            Field::new(&trg.trg_col_dail_trad_vol, DataType::Float64, false),
            Field::new(&trg.trg_col_ch_prev_clos, DataType::Float64, true),
        ];

        Arc::new(Schema::new(fields))
    }

    /// Convert report rows to a RecordBatch
    pub fn table_to_batch(&self, table: &SummaryTable) -> Result<RecordBatch> {
        let mut isin = StringBuilder::new();
        let mut date = Date32Builder::new();
        let mut opening = Float64Builder::new();
        let mut closing = Float64Builder::new();
        let mut min_price = Float64Builder::new();
        let mut max_price = Float64Builder::new();
        let mut volume = Float64Builder::new();
        let mut change = Float64Builder::new();

        for row in table {
            isin.append_value(&row.isin);
            date.append_value(Date32Type::from_naive_date(row.date));
            opening.append_value(row.opening_price);
            closing.append_value(row.closing_price);
            min_price.append_value(row.min_price);
            max_price.append_value(row.max_price);
            volume.append_value(row.daily_traded_volume);
            change.append_option(row.change_prev_closing_pct);
        }

        let arrays: Vec<ArrayRef> = vec![
            Arc::new(isin.finish()),
            Arc::new(date.finish()),
            Arc::new(opening.finish()),
            Arc::new(closing.finish()),
            Arc::new(min_price.finish()),
            Arc::new(max_price.finish()),
            Arc::new(volume.finish()),
            Arc::new(change.finish()),
        ];

        RecordBatch::try_new(self.schema.clone(), arrays)
            .context("Failed to create record batch")
    }

    /// Serialise a RecordBatch into Parquet bytes
    pub fn write_batch_to_bytes(&self, batch: &RecordBatch) -> Result<Bytes> {
        let mut buffer: Vec<u8> = Vec::new();

        let props = WriterProperties::builder().build();
        let mut writer = ArrowWriter::try_new(&mut buffer, self.schema.clone(), Some(props))
            .context("Failed to create ArrowWriter")?;

        writer.write(batch).context("Failed to write batch to parquet")?;
        writer.close().context("Failed to close writer")?;

        debug!("Encoded {} records into {} parquet bytes", batch.num_rows(), buffer.len());
        Ok(Bytes::from(buffer))
    }

    /// Encode a whole report table
    pub fn encode(&self, table: &SummaryTable) -> Result<Bytes> {
        let batch = self.table_to_batch(table)?;
        let data = self.write_batch_to_bytes(&batch)?;
        info!("Encoded report with {} rows as parquet", batch.num_rows());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::records::DailySummary;
    use arrow::array::{Array, Date32Array, Float64Array, StringArray};
    use chrono::NaiveDate;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn sample_table() -> SummaryTable {
        vec![
            DailySummary {
                isin: "DE0005772206".to_string(),
                date: NaiveDate::from_ymd_opt(2021, 4, 1).unwrap(),
                opening_price: 100.0,
                closing_price: 100.0,
                min_price: 99.5,
                max_price: 101.0,
                daily_traded_volume: 1500.0,
                change_prev_closing_pct: None,
            },
            DailySummary {
                isin: "DE0005772206".to_string(),
                date: NaiveDate::from_ymd_opt(2021, 4, 6).unwrap(),
                opening_price: 101.0,
                closing_price: 105.0,
                min_price: 100.5,
                max_price: 106.0,
                daily_traded_volume: 2000.0,
                change_prev_closing_pct: Some(5.0),
            },
        ]
    }

    #[test]
    fn test_schema_uses_target_column_names() {
        let config = sample_config();
        let schema = ParquetWriter::summary_schema(&config.target);

        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, config.target.columns().to_vec());
        assert!(schema.field(7).is_nullable());
        assert!(!schema.field(3).is_nullable());
    }

    #[test]
    fn test_encode_reads_back() {
        let config = sample_config();
        let writer = ParquetWriter::new(&config.target);

        let data = writer.encode(&sample_table()).unwrap();

        let reader = ParquetRecordBatchReaderBuilder::try_new(data)
            .unwrap()
            .build()
            .unwrap();
        let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().fields().len(), 8);

        let isin = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        let date = batch.column(1).as_any().downcast_ref::<Date32Array>().unwrap();
        let closing = batch.column(3).as_any().downcast_ref::<Float64Array>().unwrap();
        let change = batch.column(7).as_any().downcast_ref::<Float64Array>().unwrap();

        assert_eq!(isin.value(0), "DE0005772206");
        assert_eq!(date.value_as_date(1), NaiveDate::from_ymd_opt(2021, 4, 6));
        assert_eq!(closing.value(1), 105.0);
        assert!(change.is_null(0));
        assert_eq!(change.value(1), 5.0);
    }

    #[test]
    fn test_encode_empty_table() {
        let config = sample_config();
        let writer = ParquetWriter::new(&config.target);

        let batch = writer.table_to_batch(&Vec::new()).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert!(writer.write_batch_to_bytes(&batch).is_ok());
    }
}
