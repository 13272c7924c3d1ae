// ==== Batch metrics ====
/// Counter for notification entries, labelled by outcome (processed/skipped/failed)
pub const BATCH_ENTRIES_COUNTER: &str = "ledger_batch_entries_total";

/// Histogram for the number of entries per notification batch
pub const BATCH_SIZE_HISTOGRAM: &str = "ledger_batch_size_entries";

/// Histogram for end-to-end batch processing time
pub const BATCH_DURATION_HISTOGRAM: &str = "ledger_batch_duration_seconds";

// ==== Merge metrics ====
/// Counter for rows appended to ledgers
pub const ROWS_APPENDED_COUNTER: &str = "ledger_rows_appended_total";

/// Counter for records already present in their ledger
pub const DUPLICATE_ROWS_COUNTER: &str = "ledger_duplicate_rows_total";

/// Counter for ledger rows dropped while decoding
pub const DROPPED_ROWS_COUNTER: &str = "ledger_dropped_rows_total";

/// Counter for ledgers created on first merge
pub const LEDGERS_CREATED_COUNTER: &str = "ledger_created_total";

/// Counter for ledger writes that were accepted
pub const LEDGER_WRITES_COUNTER: &str = "ledger_writes_total";

/// Counter for conditional writes rejected because the ledger changed since it was read
pub const WRITE_CONFLICTS_COUNTER: &str = "ledger_write_conflicts_total";

/// Counter for locations that could not be merged, labelled by error kind
pub const MERGE_FAILURES_COUNTER: &str = "ledger_merge_failures_total";

/// Histogram for a single location's read-merge-write duration
pub const MERGE_DURATION_HISTOGRAM: &str = "ledger_merge_duration_seconds";

// ==== HTTP metrics ====
/// Counter for HTTP requests, labelled by method, route and status
pub const HTTP_REQUESTS_COUNTER: &str = "http_requests_total";

/// Histogram for HTTP request latency
pub const HTTP_REQUEST_DURATION_HISTOGRAM: &str = "http_requests_duration_seconds";
