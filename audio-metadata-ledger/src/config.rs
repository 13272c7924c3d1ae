use std::time::Duration;

use envconfig::Envconfig;

use crate::error::ConfigError;
use crate::interpreter::{KeyInterpreter, KeyScheme};
use crate::ledger::{LedgerLocator, LedgerSchema, WriteMode};

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    // Bucket holding the ledgers. Required, there is no sensible default
    #[envconfig(from = "BUCKET_NAME")]
    pub bucket_name: String,

    // Only keys under this prefix are interpreted
    #[envconfig(from = "INBOUND_PREFIX", default = "audiofiles/")]
    pub inbound_prefix: String,

    #[envconfig(from = "KEY_SCHEME", default = "simple")]
    pub key_scheme: String, // simple, date_partitioned

    // Fixed key, or a template such as metadata/{client_id}/{year}/{month}/{day}.csv
    #[envconfig(from = "LEDGER_LOCATION", default = "metadata/metadata.csv")]
    pub ledger_location: String,

    #[envconfig(from = "UNKNOWN_CLIENT_ID", default = "UnknownClient")]
    pub unknown_client_id: String,

    #[envconfig(from = "WRITE_MODE", default = "conditional")]
    pub write_mode: String, // conditional, overwrite

    #[envconfig(from = "LEDGER_MAX_WRITE_ATTEMPTS", default = "5")]
    pub ledger_max_write_attempts: u32,

    #[envconfig(from = "MAX_CONCURRENT_LOCATIONS", default = "8")]
    pub max_concurrent_locations: usize,

    // Kept below the host's own timeout so we can still report what finished
    #[envconfig(from = "INVOCATION_TIMEOUT_MS", default = "25000")]
    pub invocation_timeout_ms: u64,

    #[envconfig(from = "AWS_REGION", default = "us-east-1")]
    pub aws_region: String,

    // Custom endpoint for MinIO/local dev
    #[envconfig(from = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[envconfig(from = "S3_FORCE_PATH_STYLE", default = "false")]
    pub s3_force_path_style: bool,

    #[envconfig(from = "LOG_JSON", default = "false")]
    pub log_json: bool,
}

/// Validated, typed view of the ledger-related settings
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub bucket: String,
    pub interpreter: KeyInterpreter,
    pub schema: LedgerSchema,
    pub locator: LedgerLocator,
    pub write_mode: WriteMode,
    pub max_write_attempts: u32,
    pub max_concurrent_locations: usize,
    pub invocation_timeout: Duration,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ledger_settings(&self) -> Result<LedgerSettings, ConfigError> {
        let bucket = self.bucket_name.trim();
        if bucket.is_empty() {
            return Err(ConfigError::Empty {
                name: "BUCKET_NAME",
            });
        }
        if self.unknown_client_id.trim().is_empty() {
            return Err(ConfigError::Empty {
                name: "UNKNOWN_CLIENT_ID",
            });
        }
        if self.ledger_max_write_attempts == 0 {
            return Err(ConfigError::NotPositive {
                name: "LEDGER_MAX_WRITE_ATTEMPTS",
            });
        }
        if self.max_concurrent_locations == 0 {
            return Err(ConfigError::NotPositive {
                name: "MAX_CONCURRENT_LOCATIONS",
            });
        }
        if self.invocation_timeout_ms == 0 {
            return Err(ConfigError::NotPositive {
                name: "INVOCATION_TIMEOUT_MS",
            });
        }

        let scheme: KeyScheme = self.key_scheme.parse()?;
        let locator = LedgerLocator::parse(&self.ledger_location, scheme)?;
        let write_mode: WriteMode = self.write_mode.parse()?;

        let interpreter = KeyInterpreter::new(&self.inbound_prefix, scheme, &self.unknown_client_id);
        let prefix = interpreter.inbound_prefix();
        if prefix.is_empty() {
            return Err(ConfigError::Empty {
                name: "INBOUND_PREFIX",
            });
        }
        // every ledger key starts with the literal prefix, so overlap either way
        // means some ledger write can land under the inbound prefix
        let literal = locator.literal_prefix();
        if literal.starts_with(prefix) || prefix.starts_with(literal) {
            return Err(ConfigError::LedgerInsideInboundPrefix {
                location: locator.template().to_string(),
                prefix: prefix.to_string(),
            });
        }

        Ok(LedgerSettings {
            bucket: bucket.to_string(),
            interpreter,
            schema: LedgerSchema::from(scheme),
            locator,
            write_mode,
            max_write_attempts: self.ledger_max_write_attempts,
            max_concurrent_locations: self.max_concurrent_locations,
            invocation_timeout: Duration::from_millis(self.invocation_timeout_ms),
        })
    }
}
