//! Read-merge-write of ledgers held in object storage.
//!
//! Storage has no transactional update, so two invocations merging into the
//! same ledger can both read the same prior state. In `Conditional` mode every
//! write carries the version it was derived from (`If-Match` on the ETag, or
//! `If-None-Match: *` for a new ledger). A rejected write means someone else got
//! there first: we re-read, re-merge and try again, bounded by
//! `max_write_attempts`. `Overwrite` mode skips the preconditions for backends
//! that do not support them and accepts that a concurrent update can be lost.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common_s3::{S3Client, S3Error, WritePrecondition};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, MergeError};
use crate::metadata::Metadata;
use crate::metrics_consts::{
    DROPPED_ROWS_COUNTER, DUPLICATE_ROWS_COUNTER, LEDGERS_CREATED_COUNTER, LEDGER_WRITES_COUNTER,
    MERGE_DURATION_HISTOGRAM, MERGE_FAILURES_COUNTER, ROWS_APPENDED_COUNTER,
    WRITE_CONFLICTS_COUNTER,
};

use super::{Ledger, LedgerLocator, LedgerSchema};

pub const LEDGER_CONTENT_TYPE: &str = "text/csv";

// Linear backoff between conflicting write attempts
const CONFLICT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Conditional,
    Overwrite,
}

impl FromStr for WriteMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conditional" => Ok(WriteMode::Conditional),
            "overwrite" => Ok(WriteMode::Overwrite),
            other => Err(ConfigError::UnknownWriteMode(other.to_string())),
        }
    }
}

/// What happened to one record inside its ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMerge {
    Appended,
    Duplicate,
}

/// Result of folding every record bound for one ledger location.
/// `ids` are the caller's identifiers for the records, in delivery order,
/// and line up with the `Ok` vector.
#[derive(Debug, Clone)]
pub struct LocationOutcome {
    pub location: String,
    pub ids: Vec<usize>,
    pub result: Result<Vec<RecordMerge>, MergeError>,
}

struct LocationBatch {
    location: String,
    ids: Vec<usize>,
    records: Vec<Metadata>,
}

struct LoadedLedger {
    ledger: Ledger,
    existed: bool,
    etag: Option<String>,
}

pub struct LedgerMerger {
    client: Arc<dyn S3Client>,
    bucket: String,
    schema: LedgerSchema,
    locator: LedgerLocator,
    write_mode: WriteMode,
    max_write_attempts: u32,
    max_concurrent_locations: usize,
}

impl LedgerMerger {
    pub fn new(
        client: Arc<dyn S3Client>,
        bucket: impl Into<String>,
        schema: LedgerSchema,
        locator: LedgerLocator,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            schema,
            locator,
            write_mode: WriteMode::Conditional,
            max_write_attempts: 5,
            max_concurrent_locations: 8,
        }
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    pub fn with_max_write_attempts(mut self, attempts: u32) -> Self {
        self.max_write_attempts = attempts.max(1);
        self
    }

    pub fn with_max_concurrent_locations(mut self, locations: usize) -> Self {
        self.max_concurrent_locations = locations.max(1);
        self
    }

    pub fn locator(&self) -> &LedgerLocator {
        &self.locator
    }

    /// Merge a batch of records. Records for the same ledger are folded into
    /// one read-merge-write; distinct ledgers are merged concurrently. Any
    /// location still in flight at `deadline` is abandoned and reported as
    /// `DeadlineExceeded`. Outcomes come back ordered by their first record.
    pub async fn merge(
        &self,
        records: Vec<(usize, Metadata)>,
        deadline: tokio::time::Instant,
    ) -> Vec<LocationOutcome> {
        let batches = self.group_by_location(records);

        let mut outcomes: Vec<LocationOutcome> = stream::iter(batches)
            .map(|batch| async move {
                let expired = || MergeError::DeadlineExceeded {
                    location: batch.location.clone(),
                };
                // don't start a round trip we already know we can't finish
                let result = if tokio::time::Instant::now() >= deadline {
                    Err(expired())
                } else {
                    tokio::time::timeout_at(
                        deadline,
                        self.merge_location(&batch.location, &batch.records),
                    )
                    .await
                    .unwrap_or_else(|_| Err(expired()))
                };

                if let Err(e) = &result {
                    error!(location = %batch.location, records = batch.ids.len(), "ledger merge failed: {e}");
                    metrics::counter!(MERGE_FAILURES_COUNTER, "kind" => e.kind()).increment(1);
                }

                LocationOutcome {
                    location: batch.location,
                    ids: batch.ids,
                    result,
                }
            })
            .buffer_unordered(self.max_concurrent_locations)
            .collect()
            .await;

        outcomes.sort_by_key(|outcome| outcome.ids.first().copied());
        outcomes
    }

    fn group_by_location(&self, records: Vec<(usize, Metadata)>) -> Vec<LocationBatch> {
        let mut batches: Vec<LocationBatch> = Vec::new();
        let mut by_location: HashMap<String, usize> = HashMap::new();

        for (id, record) in records {
            let location = self.locator.locate(&record);
            let index = *by_location.entry(location.clone()).or_insert_with(|| {
                batches.push(LocationBatch {
                    location,
                    ids: Vec::new(),
                    records: Vec::new(),
                });
                batches.len() - 1
            });
            batches[index].ids.push(id);
            batches[index].records.push(record);
        }

        batches
    }

    /// One read-merge-write cycle for a single ledger, repeated while the
    /// conditional write keeps losing to concurrent writers.
    pub async fn merge_location(
        &self,
        location: &str,
        records: &[Metadata],
    ) -> Result<Vec<RecordMerge>, MergeError> {
        let started = Instant::now();

        for attempt in 1..=self.max_write_attempts {
            let LoadedLedger {
                mut ledger,
                existed,
                etag,
            } = self.load(location).await?;

            let merged: Vec<RecordMerge> = records
                .iter()
                .map(|record| match ledger.append(record.clone()) {
                    true => RecordMerge::Appended,
                    false => RecordMerge::Duplicate,
                })
                .collect();
            let appended = merged
                .iter()
                .filter(|m| **m == RecordMerge::Appended)
                .count();
            let duplicates = merged.len() - appended;

            if appended == 0 && existed {
                debug!(location, duplicates, "all records already present, skipping write");
                metrics::counter!(DUPLICATE_ROWS_COUNTER).increment(duplicates as u64);
                return Ok(merged);
            }

            let body = ledger.encode().map_err(|e| MergeError::Encode {
                location: location.to_string(),
                reason: e.to_string(),
            })?;

            let precondition = self.precondition(location, existed, etag);
            match self
                .client
                .put_object(
                    &self.bucket,
                    location,
                    body.into_bytes(),
                    LEDGER_CONTENT_TYPE,
                    precondition,
                )
                .await
            {
                Ok(()) => {
                    info!(
                        location,
                        appended,
                        duplicates,
                        rows = ledger.len(),
                        attempt,
                        "ledger updated"
                    );
                    if !existed {
                        metrics::counter!(LEDGERS_CREATED_COUNTER).increment(1);
                    }
                    metrics::counter!(LEDGER_WRITES_COUNTER).increment(1);
                    metrics::counter!(ROWS_APPENDED_COUNTER).increment(appended as u64);
                    metrics::counter!(DUPLICATE_ROWS_COUNTER).increment(duplicates as u64);
                    metrics::histogram!(MERGE_DURATION_HISTOGRAM)
                        .record(started.elapsed().as_secs_f64());
                    return Ok(merged);
                }
                Err(S3Error::PreconditionFailed(_)) => {
                    warn!(
                        location,
                        attempt,
                        max_attempts = self.max_write_attempts,
                        "ledger changed since it was read, merging again"
                    );
                    metrics::counter!(WRITE_CONFLICTS_COUNTER).increment(1);
                    if attempt < self.max_write_attempts {
                        tokio::time::sleep(CONFLICT_BACKOFF * attempt).await;
                    }
                }
                Err(source) => {
                    return Err(MergeError::Storage {
                        location: location.to_string(),
                        source,
                    })
                }
            }
        }

        Err(MergeError::ConflictRetriesExhausted {
            location: location.to_string(),
            attempts: self.max_write_attempts,
        })
    }

    async fn load(&self, location: &str) -> Result<LoadedLedger, MergeError> {
        match self.client.get_object(&self.bucket, location).await {
            Ok(object) => {
                let ledger = Ledger::decode(&object.body, self.schema).map_err(|e| {
                    MergeError::IncompatibleLedger {
                        location: location.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                if ledger.dropped_rows() > 0 {
                    warn!(
                        location,
                        dropped = ledger.dropped_rows(),
                        kept = ledger.len(),
                        "dropped unreadable ledger rows"
                    );
                    metrics::counter!(DROPPED_ROWS_COUNTER).increment(ledger.dropped_rows() as u64);
                }
                Ok(LoadedLedger {
                    ledger,
                    existed: true,
                    etag: object.etag,
                })
            }
            Err(S3Error::NotFound(_)) => {
                info!(location, "ledger does not exist yet, creating it");
                Ok(LoadedLedger {
                    ledger: Ledger::empty(self.schema),
                    existed: false,
                    etag: None,
                })
            }
            Err(source) => Err(MergeError::Storage {
                location: location.to_string(),
                source,
            }),
        }
    }

    fn precondition(&self, location: &str, existed: bool, etag: Option<String>) -> WritePrecondition {
        match (self.write_mode, existed, etag) {
            (WriteMode::Overwrite, _, _) => WritePrecondition::None,
            (WriteMode::Conditional, false, _) => WritePrecondition::IfAbsent,
            (WriteMode::Conditional, true, Some(etag)) => WritePrecondition::IfMatch(etag),
            (WriteMode::Conditional, true, None) => {
                warn!(location, "storage returned no version tag, writing unconditionally");
                WritePrecondition::None
            }
        }
    }
}
