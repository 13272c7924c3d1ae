use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common_s3::S3Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::LedgerSettings;
use crate::event::Notification;
use crate::interpreter::{Interpretation, KeyInterpreter};
use crate::ledger::{LedgerMerger, RecordMerge};
use crate::metrics_consts::{BATCH_DURATION_HISTOGRAM, BATCH_ENTRIES_COUNTER, BATCH_SIZE_HISTOGRAM};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Outside the monitored prefix, or not an object creation
    NotApplicable,
    /// Inside the prefix but no record could be derived from the key
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryOutcome {
    Processed {
        ledger_key: String,
        duplicate: bool,
    },
    Skipped {
        reason: SkipReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Nothing was written for this entry; the batch should be redelivered
    Failed { error: String },
}

impl EntryOutcome {
    fn label(&self) -> &'static str {
        match self {
            EntryOutcome::Processed { .. } => "processed",
            EntryOutcome::Skipped { .. } => "skipped",
            EntryOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    pub bucket: String,
    pub key: String,
    #[serde(flatten)]
    pub outcome: EntryOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub entries: Vec<EntryReport>,
}

impl BatchReport {
    fn count(&self, label: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.outcome.label() == label)
            .count()
    }

    pub fn processed(&self) -> usize {
        self.count("processed")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

/// Runs one notification batch through the interpreter and the merger.
/// Holds no ledger state between batches.
pub struct BatchProcessor {
    interpreter: KeyInterpreter,
    merger: LedgerMerger,
    invocation_timeout: Duration,
}

impl BatchProcessor {
    pub fn new(settings: LedgerSettings, client: Arc<dyn S3Client>) -> Self {
        let merger = LedgerMerger::new(client, settings.bucket, settings.schema, settings.locator)
            .with_write_mode(settings.write_mode)
            .with_max_write_attempts(settings.max_write_attempts)
            .with_max_concurrent_locations(settings.max_concurrent_locations);

        Self {
            interpreter: settings.interpreter,
            merger,
            invocation_timeout: settings.invocation_timeout,
        }
    }

    pub async fn process(&self, batch: Vec<Notification>) -> BatchReport {
        self.process_at(batch, Utc::now()).await
    }

    /// Every record of the batch is stamped with `now`, so a notification
    /// delivered twice within one batch is only recorded once.
    pub async fn process_at(&self, batch: Vec<Notification>, now: DateTime<Utc>) -> BatchReport {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.invocation_timeout;
        metrics::histogram!(BATCH_SIZE_HISTOGRAM).record(batch.len() as f64);

        let mut outcomes: Vec<Option<EntryOutcome>> = vec![None; batch.len()];
        let mut records = Vec::with_capacity(batch.len());

        for (index, notification) in batch.iter().enumerate() {
            if !notification.is_object_created() {
                debug!(key = %notification.key, event = ?notification.event_name, "not an object creation, skipping");
                outcomes[index] = Some(EntryOutcome::Skipped {
                    reason: SkipReason::NotApplicable,
                    detail: notification.event_name.clone(),
                });
                continue;
            }

            match self.interpreter.interpret(&notification.key, now) {
                Interpretation::Parsed(metadata) => records.push((index, metadata)),
                Interpretation::Skip => {
                    debug!(key = %notification.key, "outside inbound prefix, skipping");
                    outcomes[index] = Some(EntryOutcome::Skipped {
                        reason: SkipReason::NotApplicable,
                        detail: None,
                    });
                }
                Interpretation::Malformed(reason) => {
                    warn!(key = %notification.key, "skipping key: {reason}");
                    outcomes[index] = Some(EntryOutcome::Skipped {
                        reason: SkipReason::Malformed,
                        detail: Some(reason),
                    });
                }
            }
        }

        for location in self.merger.merge(records, deadline).await {
            match location.result {
                Ok(merges) => {
                    for (id, merge) in location.ids.into_iter().zip(merges) {
                        info!(key = %batch[id].key, ledger = %location.location, ?merge, "metadata updated for file");
                        outcomes[id] = Some(EntryOutcome::Processed {
                            ledger_key: location.location.clone(),
                            duplicate: merge == RecordMerge::Duplicate,
                        });
                    }
                }
                Err(e) => {
                    for id in location.ids {
                        outcomes[id] = Some(EntryOutcome::Failed {
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        let entries: Vec<EntryReport> = batch
            .into_iter()
            .zip(outcomes)
            .map(|(notification, outcome)| {
                let outcome = outcome.unwrap_or_else(|| EntryOutcome::Failed {
                    error: "entry was not processed".to_string(),
                });
                metrics::counter!(BATCH_ENTRIES_COUNTER, "outcome" => outcome.label()).increment(1);
                EntryReport {
                    bucket: notification.bucket,
                    key: notification.key,
                    outcome,
                }
            })
            .collect();

        metrics::histogram!(BATCH_DURATION_HISTOGRAM).record(started.elapsed().as_secs_f64());
        BatchReport { entries }
    }
}
