use common_s3::S3Error;
use thiserror::Error;

/// Failure to merge into one ledger location. Never aborts the batch: the
/// entries targeting the location are reported as failed and left for the
/// invoking infrastructure to retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("storage error at {location}: {source}")]
    Storage {
        location: String,
        #[source]
        source: S3Error,
    },
    #[error("ledger {location} cannot be read with the configured schema: {reason}")]
    IncompatibleLedger { location: String, reason: String },
    #[error("failed to encode ledger {location}: {reason}")]
    Encode { location: String, reason: String },
    #[error("ledger {location} kept changing underneath us after {attempts} write attempts")]
    ConflictRetriesExhausted { location: String, attempts: u32 },
    #[error("invocation deadline exceeded before ledger {location} was written")]
    DeadlineExceeded { location: String },
}

impl MergeError {
    pub fn location(&self) -> &str {
        match self {
            MergeError::Storage { location, .. }
            | MergeError::IncompatibleLedger { location, .. }
            | MergeError::Encode { location, .. }
            | MergeError::ConflictRetriesExhausted { location, .. }
            | MergeError::DeadlineExceeded { location } => location,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            MergeError::Storage { .. } => "storage",
            MergeError::IncompatibleLedger { .. } => "incompatible",
            MergeError::Encode { .. } => "encode",
            MergeError::ConflictRetriesExhausted { .. } => "conflict",
            MergeError::DeadlineExceeded { .. } => "deadline",
        }
    }
}

/// Invalid or missing settings. Fatal at startup, before any record is processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must not be empty")]
    Empty { name: &'static str },
    #[error("unknown key scheme '{0}', expected 'simple' or 'date_partitioned'")]
    UnknownKeyScheme(String),
    #[error("unknown write mode '{0}', expected 'conditional' or 'overwrite'")]
    UnknownWriteMode(String),
    #[error("unknown placeholder '{{{0}}}' in ledger location template")]
    UnknownPlaceholder(String),
    #[error("unterminated placeholder in ledger location template '{0}'")]
    UnterminatedPlaceholder(String),
    #[error("placeholder '{{{0}}}' requires the date_partitioned key scheme")]
    PlaceholderNeedsDatePartition(String),
    #[error("ledger location '{location}' can fall under inbound prefix '{prefix}', ledger writes would be ingested as uploads")]
    LedgerInsideInboundPrefix { location: String, prefix: String },
    #[error("{name} must be at least 1")]
    NotPositive { name: &'static str },
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("ledger header is missing required columns {0:?}")]
    MissingColumns(Vec<String>),
    #[error("failed to flush ledger buffer: {0}")]
    Flush(String),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}
