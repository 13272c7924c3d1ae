//! CSV encoding of ledgers.
//!
//! Writing always uses the schema's column order. Reading is driven by the
//! header row, so a ledger whose columns were reordered by hand still loads,
//! and is tolerant: a row that is unparseable or lacks any required field is
//! dropped and counted instead of failing the whole read. A header missing a
//! required column is an error, since rewriting that ledger would lose every
//! row in it.

use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use tracing::warn;

use crate::error::CodecError;
use crate::interpreter::{KeyScheme, UNKNOWN_PARTITION};
use crate::metadata::{DatePartition, Metadata};

pub const FILE_NAME_COLUMN: &str = "FileName";
pub const UPLOAD_TIMESTAMP_COLUMN: &str = "UploadTimestamp";
pub const CLIENT_ID_COLUMN: &str = "ClientID";
pub const YEAR_COLUMN: &str = "Year";
pub const MONTH_COLUMN: &str = "Month";
pub const DAY_COLUMN: &str = "Day";

const FLAT_COLUMNS: &[&str] = &[FILE_NAME_COLUMN, UPLOAD_TIMESTAMP_COLUMN, CLIENT_ID_COLUMN];
const DATE_PARTITIONED_COLUMNS: &[&str] = &[
    FILE_NAME_COLUMN,
    UPLOAD_TIMESTAMP_COLUMN,
    CLIENT_ID_COLUMN,
    YEAR_COLUMN,
    MONTH_COLUMN,
    DAY_COLUMN,
];

// Rough size of one encoded row, used to presize the output buffer
const ESTIMATED_ROW_SIZE: usize = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerSchema {
    Flat,
    DatePartitioned,
}

impl From<KeyScheme> for LedgerSchema {
    fn from(scheme: KeyScheme) -> Self {
        match scheme {
            KeyScheme::Simple => LedgerSchema::Flat,
            KeyScheme::DatePartitioned => LedgerSchema::DatePartitioned,
        }
    }
}

impl LedgerSchema {
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            LedgerSchema::Flat => FLAT_COLUMNS,
            LedgerSchema::DatePartitioned => DATE_PARTITIONED_COLUMNS,
        }
    }
}

#[derive(Debug, Default)]
pub struct DecodedRows {
    pub rows: Vec<Metadata>,
    pub dropped: usize,
}

pub fn decode(body: &str, schema: LedgerSchema) -> Result<DecodedRows, CodecError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => {
            warn!("ledger header row is unreadable, treating ledger as empty: {e}");
            return Ok(DecodedRows::default());
        }
    };
    if headers.iter().all(|header| header.trim().is_empty()) {
        return Ok(DecodedRows::default());
    }

    let position = |column: &str| {
        headers
            .iter()
            .position(|header| header.trim_start_matches('\u{feff}').trim() == column)
    };
    let missing: Vec<String> = schema
        .columns()
        .iter()
        .filter(|column| position(**column).is_none())
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(CodecError::MissingColumns(missing));
    }
    let positions: Vec<usize> = schema
        .columns()
        .iter()
        .filter_map(|column| position(*column))
        .collect();

    let mut decoded = DecodedRows::default();
    for record in reader.records() {
        let row = record
            .ok()
            .and_then(|record| row_from_record(&record, &positions, schema));
        match row {
            Some(row) => decoded.rows.push(row),
            None => decoded.dropped += 1,
        }
    }

    Ok(decoded)
}

fn row_from_record(
    record: &StringRecord,
    positions: &[usize],
    schema: LedgerSchema,
) -> Option<Metadata> {
    let field = |index: usize| {
        record
            .get(positions[index])
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let partition = match schema {
        LedgerSchema::Flat => None,
        LedgerSchema::DatePartitioned => Some(DatePartition {
            year: field(3)?,
            month: field(4)?,
            day: field(5)?,
        }),
    };

    Some(Metadata {
        file_name: field(0)?,
        upload_timestamp: field(1)?,
        client_id: field(2)?,
        partition,
    })
}

pub fn encode(rows: &[Metadata], schema: LedgerSchema) -> Result<String, CodecError> {
    let buffer = Vec::with_capacity((rows.len() + 1) * ESTIMATED_ROW_SIZE);
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(buffer);

    writer.write_record(schema.columns())?;
    for row in rows {
        let mut fields = vec![
            row.file_name.as_str(),
            row.upload_timestamp.as_str(),
            row.client_id.as_str(),
        ];
        if schema == LedgerSchema::DatePartitioned {
            match &row.partition {
                Some(partition) => fields.extend([
                    partition.year.as_str(),
                    partition.month.as_str(),
                    partition.day.as_str(),
                ]),
                None => fields.extend([UNKNOWN_PARTITION; 3]),
            }
        }
        writer.write_record(&fields)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| CodecError::Flush(e.to_string()))?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(file_name: &str, client_id: &str) -> Metadata {
        Metadata {
            file_name: file_name.to_string(),
            client_id: client_id.to_string(),
            upload_timestamp: "2024-05-01T12:00:00.000Z".to_string(),
            partition: None,
        }
    }

    fn dated(file_name: &str) -> Metadata {
        Metadata {
            partition: Some(DatePartition {
                year: "2024".to_string(),
                month: "05".to_string(),
                day: "01".to_string(),
            }),
            ..flat(file_name, "clientA")
        }
    }

    #[test]
    fn test_encode_writes_header_then_rows() {
        let encoded = encode(&[flat("a.mp3", "c1")], LedgerSchema::Flat).unwrap();
        assert_eq!(
            encoded,
            "FileName,UploadTimestamp,ClientID\na.mp3,2024-05-01T12:00:00.000Z,c1\n"
        );
    }

    #[test]
    fn test_encode_empty_ledger_is_header_only() {
        let encoded = encode(&[], LedgerSchema::DatePartitioned).unwrap();
        assert_eq!(encoded, "FileName,UploadTimestamp,ClientID,Year,Month,Day\n");
    }

    #[test]
    fn test_round_trip_preserves_order_and_values() {
        let rows = vec![
            flat("b.mp3", "c2"),
            flat("a, the remix.mp3", "c1"),
            flat("quote\"d.mp3", "c3"),
            flat("line\nbreak.mp3", "c1"),
        ];

        let encoded = encode(&rows, LedgerSchema::Flat).unwrap();
        let decoded = decode(&encoded, LedgerSchema::Flat).unwrap();

        assert_eq!(decoded.rows, rows);
        assert_eq!(decoded.dropped, 0);
    }

    #[test]
    fn test_round_trip_date_partitioned() {
        let rows = vec![dated("track1.mp3"), dated("track2.mp3")];
        let encoded = encode(&rows, LedgerSchema::DatePartitioned).unwrap();

        assert!(encoded.starts_with("FileName,UploadTimestamp,ClientID,Year,Month,Day\n"));
        assert_eq!(decode(&encoded, LedgerSchema::DatePartitioned).unwrap().rows, rows);
    }

    #[test]
    fn test_embedded_comma_is_quoted() {
        let encoded = encode(&[flat("a,b.mp3", "c1")], LedgerSchema::Flat).unwrap();
        assert!(encoded.contains("\"a,b.mp3\""));
    }

    #[test]
    fn test_row_missing_field_is_dropped() {
        let body = "FileName,UploadTimestamp,ClientID\n\
                    good.mp3,2024-05-01T12:00:00.000Z,c1\n\
                    bad.mp3,2024-05-01T12:00:00.000Z\n\
                    empty.mp3,,c1\n";

        let decoded = decode(body, LedgerSchema::Flat).unwrap();
        assert_eq!(decoded.rows, vec![flat("good.mp3", "c1")]);
        assert_eq!(decoded.dropped, 2);
    }

    #[test]
    fn test_decode_follows_header_order() {
        let body = "ClientID,FileName,UploadTimestamp\nc1,a.mp3,2024-05-01T12:00:00.000Z\n";
        assert_eq!(decode(body, LedgerSchema::Flat).unwrap().rows, vec![flat("a.mp3", "c1")]);
    }

    #[test]
    fn test_decode_ignores_extra_columns() {
        let body = "FileName,UploadTimestamp,ClientID,Notes\na.mp3,2024-05-01T12:00:00.000Z,c1,hello\n";
        assert_eq!(decode(body, LedgerSchema::Flat).unwrap().rows, vec![flat("a.mp3", "c1")]);
    }

    #[test]
    fn test_decode_missing_required_header_is_an_error() {
        let body = "FileName,ClientID\na.mp3,c1\nb.mp3,c2\n";
        match decode(body, LedgerSchema::Flat) {
            Err(CodecError::MissingColumns(missing)) => {
                assert_eq!(missing, vec!["UploadTimestamp".to_string()])
            }
            other => panic!("expected missing columns, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_flat_ledger_with_date_schema_is_an_error() {
        let body = "FileName,UploadTimestamp,ClientID\na.mp3,2024-05-01T12:00:00.000Z,c1\n";
        match decode(body, LedgerSchema::DatePartitioned) {
            Err(CodecError::MissingColumns(missing)) => {
                assert_eq!(missing, vec!["Year", "Month", "Day"])
            }
            other => panic!("expected missing columns, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_empty_body() {
        let decoded = decode("", LedgerSchema::Flat).unwrap();
        assert!(decoded.rows.is_empty());
        assert_eq!(decoded.dropped, 0);
    }

    #[test]
    fn test_decode_tolerates_crlf_and_bom() {
        let body = "\u{feff}FileName,UploadTimestamp,ClientID\r\na.mp3,2024-05-01T12:00:00.000Z,c1\r\n";
        assert_eq!(decode(body, LedgerSchema::Flat).unwrap().rows, vec![flat("a.mp3", "c1")]);
    }
}
