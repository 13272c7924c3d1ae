use std::collections::HashSet;

use crate::error::CodecError;
use crate::metadata::{DedupKey, Metadata};

pub mod codec;
pub mod locator;
pub mod merger;

pub use codec::LedgerSchema;
pub use locator::LedgerLocator;
pub use merger::{LedgerMerger, LocationOutcome, RecordMerge, WriteMode};

/// In-memory view of one ledger object. Rows keep their load order and new
/// rows only ever go on the end.
#[derive(Debug, Clone)]
pub struct Ledger {
    schema: LedgerSchema,
    rows: Vec<Metadata>,
    seen: HashSet<DedupKey>,
    dropped_rows: usize,
}

impl Ledger {
    pub fn empty(schema: LedgerSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            seen: HashSet::new(),
            dropped_rows: 0,
        }
    }

    pub fn decode(body: &str, schema: LedgerSchema) -> Result<Self, CodecError> {
        let decoded = codec::decode(body, schema)?;
        let seen = decoded.rows.iter().map(Metadata::dedup_key).collect();
        Ok(Self {
            schema,
            rows: decoded.rows,
            seen,
            dropped_rows: decoded.dropped,
        })
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        codec::encode(&self.rows, self.schema)
    }

    pub fn contains(&self, record: &Metadata) -> bool {
        self.seen.contains(&record.dedup_key())
    }

    /// Appends unless a row with the same dedup key is already present.
    /// Returns whether the row was added.
    pub fn append(&mut self, record: Metadata) -> bool {
        if !self.seen.insert(record.dedup_key()) {
            return false;
        }
        self.rows.push(record);
        true
    }

    pub fn rows(&self) -> &[Metadata] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows discarded while decoding because they were unreadable or incomplete
    pub fn dropped_rows(&self) -> usize {
        self.dropped_rows
    }

    pub fn schema(&self) -> LedgerSchema {
        self.schema
    }
}
