/// Arrow schema definitions for ingested ownership filings.
pub mod filings {
    use std::sync::Arc;

    use arrow::array::{
        Array, ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
        TimestampNanosecondArray, UInt32Array,
    };
    use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
    use arrow::record_batch::RecordBatch;
    use chrono::NaiveDate;

    use crate::{CoreError, TransactionRecord};

    /// Default table name for transaction rows.
    pub const TRANSACTIONS_TABLE: &str = "insider_transactions";

    /// Column holding the dashed accession number; the bulk dedup scan reads only this.
    pub const ACCESSION_COLUMN: &str = "accession_number";

    /// Offset form, so formatting and casting work without a timezone database.
    pub const CREATED_AT_TZ: &str = "+00:00";

    /// Schema for one row per extracted insider transaction.
    pub fn insider_transactions_schema() -> Schema {
        Schema::new(vec![
            Field::new("record_key", DataType::Utf8, false),
            Field::new("entity_id", DataType::Utf8, false),
            Field::new("filing_id", DataType::Utf8, false),
            Field::new(ACCESSION_COLUMN, DataType::Utf8, false),
            Field::new("form_type", DataType::Utf8, false),
            Field::new("filing_date", DataType::Date32, true),
            Field::new("position", DataType::UInt32, false),
            Field::new("issuer_symbol", DataType::Utf8, true),
            Field::new("insider_name", DataType::Utf8, false),
            Field::new("insider_id", DataType::Utf8, true),
            Field::new("insider_title", DataType::Utf8, true),
            Field::new("relation", DataType::Utf8, false),
            Field::new("transaction_type", DataType::Utf8, false),
            Field::new("transaction_code", DataType::Utf8, false),
            Field::new("security_title", DataType::Utf8, true),
            Field::new("ownership_nature", DataType::Utf8, false),
            Field::new("shares", DataType::Int64, false),
            Field::new("price_per_share", DataType::Float64, false),
            Field::new("total_value", DataType::Float64, false),
            Field::new("transaction_date", DataType::Date32, false),
            Field::new("is_alert", DataType::Boolean, false),
            Field::new(
                "created_at",
                DataType::Timestamp(TimeUnit::Nanosecond, Some(CREATED_AT_TZ.into())),
                false,
            ),
        ])
    }

    pub fn insider_transactions_schema_ref() -> SchemaRef {
        Arc::new(insider_transactions_schema())
    }

    fn days_since_epoch(date: NaiveDate) -> i32 {
        // NaiveDate::default() is 1970-01-01.
        (date - NaiveDate::default()).num_days() as i32
    }

    fn utf8<'a>(values: impl Iterator<Item = &'a str>) -> ArrayRef {
        Arc::new(StringArray::from_iter_values(values))
    }

    fn utf8_opt<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
        Arc::new(values.collect::<StringArray>())
    }

    /// Convert records into a single RecordBatch with [`insider_transactions_schema`].
    ///
    /// `total_value` and `is_alert` are derived here from shares and price.
    pub fn records_to_batch(records: &[TransactionRecord]) -> Result<RecordBatch, CoreError> {
        let txs = || records.iter().map(|r| &r.transaction);

        let created_at: Vec<i64> = records
            .iter()
            .map(|r| r.created_at.timestamp_nanos_opt().unwrap_or_default())
            .collect();

        let type_labels: Vec<String> = txs().map(|t| t.transaction_type.label()).collect();
        let record_keys: Vec<String> = records.iter().map(|r| r.record_key()).collect();

        let columns: Vec<ArrayRef> = vec![
            utf8(record_keys.iter().map(String::as_str)),
            utf8(records.iter().map(|r| r.entity_id.padded())),
            utf8(records.iter().map(|r| r.filing_id.as_str())),
            utf8(records.iter().map(|r| r.accession.as_str())),
            utf8(records.iter().map(|r| r.form_type.as_str())),
            Arc::new(Date32Array::from(
                records
                    .iter()
                    .map(|r| r.filing_date.map(days_since_epoch))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(UInt32Array::from(
                records.iter().map(|r| r.position).collect::<Vec<_>>(),
            )),
            utf8_opt(records.iter().map(|r| r.issuer_symbol.as_deref())),
            utf8(txs().map(|t| t.insider_name.as_str())),
            utf8_opt(txs().map(|t| t.insider_id.as_deref())),
            utf8_opt(txs().map(|t| t.insider_title.as_deref())),
            utf8(txs().map(|t| t.relation.as_str())),
            utf8(type_labels.iter().map(String::as_str)),
            utf8(txs().map(|t| t.transaction_code.as_str())),
            utf8_opt(txs().map(|t| t.security_title.as_deref())),
            utf8(txs().map(|t| t.ownership_nature.as_str())),
            Arc::new(Int64Array::from(txs().map(|t| t.shares).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(
                txs().map(|t| t.price_per_share).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                txs().map(|t| t.total_value()).collect::<Vec<_>>(),
            )),
            Arc::new(Date32Array::from(
                txs()
                    .map(|t| days_since_epoch(t.transaction_date))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(BooleanArray::from(
                records.iter().map(|r| r.is_alert()).collect::<Vec<_>>(),
            )),
            Arc::new(
                TimestampNanosecondArray::from(created_at).with_timezone(CREATED_AT_TZ),
            ),
        ];

        Ok(RecordBatch::try_new(
            insider_transactions_schema_ref(),
            columns,
        )?)
    }

    /// Read a Utf8 column as owned strings, skipping nulls.
    pub fn string_column(batch: &RecordBatch, name: &str) -> Vec<String> {
        let Some(col) = batch.column_by_name(name) else {
            return Vec::new();
        };
        let Some(arr) = col.as_any().downcast_ref::<StringArray>() else {
            return Vec::new();
        };
        (0..arr.len())
            .filter(|&i| !arr.is_null(i))
            .map(|i| arr.value(i).to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::filings;
    use crate::{
        AccessionNumber, EntityId, FilingIdentity, InsiderTransaction, OwnershipNature,
        TransactionRecord, TransactionTable, TransactionType,
    };
    use arrow::array::{Array, BooleanArray, Date32Array, Float64Array};
    use arrow::util::display::{ArrayFormatter, FormatOptions};
    use chrono::{NaiveDate, Utc};

    fn record(shares: i64, price: f64) -> Vec<TransactionRecord> {
        let filing = FilingIdentity {
            entity_id: EntityId::parse("1318605").unwrap(),
            accession: AccessionNumber::parse("0000899243-25-012345").unwrap(),
            form_type: "4".into(),
            filing_date: None,
            primary_document: None,
        };
        let tx = InsiderTransaction {
            insider_name: "Doe Jane".into(),
            insider_id: None,
            insider_title: None,
            relation: "Director".into(),
            transaction_type: TransactionType::Unmapped("Z".into()),
            transaction_code: "Z".into(),
            table: TransactionTable::Derivative,
            shares,
            price_per_share: price,
            transaction_date: NaiveDate::from_ymd_opt(1970, 1, 11).unwrap(),
            security_title: None,
            ownership_nature: OwnershipNature::Indirect,
        };
        TransactionRecord::for_filing(&filing, None, vec![tx], Utc::now())
    }

    #[test]
    fn schema_has_expected_fields() {
        let schema = filings::insider_transactions_schema();
        assert_eq!(schema.fields().len(), 22);
        assert!(schema.field_with_name("record_key").is_ok());
        assert!(schema.field_with_name(filings::ACCESSION_COLUMN).is_ok());
        assert!(schema.field_with_name("total_value").is_ok());
    }

    #[test]
    fn batch_derives_value_and_alert() {
        let batch = filings::records_to_batch(&record(200_000, 7.5)).unwrap();
        assert_eq!(batch.num_rows(), 1);

        let total = batch
            .column_by_name("total_value")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(total.value(0), 1_500_000.0);

        let alert = batch
            .column_by_name("is_alert")
            .unwrap()
            .as_any()
            .downcast_ref::<BooleanArray>()
            .unwrap();
        assert!(alert.value(0));
    }

    #[test]
    fn nullable_columns_accept_missing_values() {
        let batch = filings::records_to_batch(&record(10, 0.0)).unwrap();
        let filing_date = batch
            .column_by_name("filing_date")
            .unwrap()
            .as_any()
            .downcast_ref::<Date32Array>()
            .unwrap();
        assert!(filing_date.is_null(0));

        let tx_date = batch
            .column_by_name("transaction_date")
            .unwrap()
            .as_any()
            .downcast_ref::<Date32Array>()
            .unwrap();
        assert_eq!(tx_date.value(0), 10);

        assert_eq!(
            filings::string_column(&batch, "transaction_type"),
            vec!["Other(Z)".to_string()]
        );
    }

    #[test]
    fn created_at_formats_without_tz_database() {
        let batch = filings::records_to_batch(&record(10, 1.0)).unwrap();
        let created = batch.column_by_name("created_at").unwrap();
        let formatter =
            ArrayFormatter::try_new(created.as_ref(), &FormatOptions::default()).unwrap();
        let rendered = formatter.value(0).to_string();
        assert!(rendered.ends_with("+00:00"), "{rendered}");
    }

    #[test]
    fn empty_records_give_empty_batch() {
        let batch = filings::records_to_batch(&[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 22);
    }
}
