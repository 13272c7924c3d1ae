//! Narrow S3 client abstraction used by the ledger service
//!
//! The service only needs whole-object reads and writes, plus enough version
//! information (the ETag) to make writes conditional. Everything provider
//! specific stays behind the `S3Client` trait so the merge logic only ever
//! sees the typed `S3Error` variants.
//!
//! Trait-based design with a manual mock that is always available for testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as AwsS3SdkClient;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum S3Error {
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Write precondition failed for: {0}")]
    PreconditionFailed(String),
    #[error("S3 operation failed: {0}")]
    OperationFailed(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<std::string::FromUtf8Error> for S3Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        S3Error::ParseError(err.to_string())
    }
}

/// An object body together with the version tag it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Object {
    pub body: String,
    pub etag: Option<String>,
}

/// Condition attached to a put. `IfAbsent` maps to `If-None-Match: *`,
/// `IfMatch` to `If-Match: <etag>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    None,
    IfAbsent,
    IfMatch(String),
}

/// S3 client trait that both real and mock implementations use
#[async_trait]
pub trait S3Client: Send + Sync {
    /// Get an object as a UTF-8 string along with its ETag
    async fn get_object(&self, bucket: &str, key: &str) -> Result<S3Object, S3Error>;

    /// Replace the object at `key` with `body`. Fails with
    /// `S3Error::PreconditionFailed` when the precondition does not hold.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        precondition: WritePrecondition,
    ) -> Result<(), S3Error>;
}

/// Real S3 client implementation
pub struct S3Impl {
    client: AwsS3SdkClient,
}

impl S3Impl {
    pub fn new(client: AwsS3SdkClient) -> Self {
        Self { client }
    }
}

// 412 is the documented answer to a failed If-Match/If-None-Match; S3 answers 409
// ConditionalRequestConflict when a competing conditional write is in flight.
fn is_precondition_failure(code: Option<&str>, status: Option<u16>) -> bool {
    matches!(
        code,
        Some("PreconditionFailed") | Some("ConditionalRequestConflict")
    ) || matches!(status, Some(412) | Some(409))
}

#[async_trait]
impl S3Client for S3Impl {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<S3Object, S3Error> {
        let get_object_output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let error_message = format!("Failed to get object from S3: {e}");
                if let GetObjectError::NoSuchKey(_) = e.into_service_error() {
                    S3Error::NotFound(key.to_string())
                } else {
                    S3Error::OperationFailed(error_message)
                }
            })?;

        let etag = get_object_output.e_tag().map(str::to_string);
        let body_bytes =
            get_object_output.body.collect().await.map_err(|e| {
                S3Error::OperationFailed(format!("Failed to read S3 object body: {e}"))
            })?;

        let body = String::from_utf8(body_bytes.to_vec())
            .map_err(|e| S3Error::ParseError(format!("S3 object body is not valid UTF-8: {e}")))?;
        Ok(S3Object { body, etag })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        precondition: WritePrecondition,
    ) -> Result<(), S3Error> {
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body));

        request = match &precondition {
            WritePrecondition::None => request,
            WritePrecondition::IfAbsent => request.if_none_match("*"),
            WritePrecondition::IfMatch(etag) => request.if_match(etag),
        };

        request.send().await.map_err(|e| {
            let status = e.raw_response().map(|r| r.status().as_u16());
            if is_precondition_failure(e.code(), status) {
                debug!(bucket, key, ?precondition, "conditional put rejected");
                S3Error::PreconditionFailed(key.to_string())
            } else {
                S3Error::OperationFailed(format!("Failed to put object to S3: {e}"))
            }
        })?;

        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: String,
    content_type: String,
    etag: String,
}

#[derive(Default)]
struct MockState {
    objects: HashMap<String, StoredObject>,
    get_failures: HashMap<String, S3Error>,
    put_failures: HashMap<String, S3Error>,
    // body written by a simulated competing writer right after the next read
    races: HashMap<String, String>,
    // applied before every get and put, outside the lock
    latency: Option<Duration>,
    next_etag: u64,
    put_calls: usize,
}

impl MockState {
    fn store(&mut self, cache_key: String, body: String, content_type: &str) {
        self.next_etag += 1;
        let etag = format!("\"mock-etag-{}\"", self.next_etag);
        self.objects.insert(
            cache_key,
            StoredObject {
                body,
                content_type: content_type.to_string(),
                etag,
            },
        );
    }
}

/// In-memory S3 client for testing - always available, no conditional compilation needed.
///
/// Unlike a canned-response mock it keeps state, so a put followed by a get
/// sees the new body, and ETags change on every write. Clones share state.
#[derive(Clone, Default)]
pub struct MockS3Client {
    state: Arc<Mutex<MockState>>,
}

impl MockS3Client {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache_key(bucket: &str, key: &str) -> String {
        format!("{bucket}:{key}")
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Delay every call by `latency`. A put cancelled while waiting leaves
    /// the stored object untouched.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = Some(latency);
        self
    }

    /// Seed an object
    pub fn with_object(self, bucket: &str, key: &str, body: &str) -> Self {
        self.lock()
            .store(Self::cache_key(bucket, key), body.to_string(), "text/plain");
        self
    }

    /// Make every get_object() for this key fail with `error`
    pub fn get_object_ret(self, bucket: &str, key: &str, error: S3Error) -> Self {
        self.lock()
            .get_failures
            .insert(Self::cache_key(bucket, key), error);
        self
    }

    /// Make every put_object() for this key fail with `error`
    pub fn put_object_ret(self, bucket: &str, key: &str, error: S3Error) -> Self {
        self.lock()
            .put_failures
            .insert(Self::cache_key(bucket, key), error);
        self
    }

    /// Simulate another writer replacing (or creating) the object right
    /// after the next read of it, whether or not that read found anything.
    /// Fires once.
    pub fn race_after_get(self, bucket: &str, key: &str, competing_body: &str) -> Self {
        self.lock()
            .races
            .insert(Self::cache_key(bucket, key), competing_body.to_string());
        self
    }

    /// Current body of an object, if any
    pub fn object(&self, bucket: &str, key: &str) -> Option<String> {
        self.lock()
            .objects
            .get(&Self::cache_key(bucket, key))
            .map(|o| o.body.clone())
    }

    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.lock()
            .objects
            .get(&Self::cache_key(bucket, key))
            .map(|o| o.content_type.clone())
    }

    /// Number of put_object() calls that were accepted
    pub fn put_calls(&self) -> usize {
        self.lock().put_calls
    }
}

#[async_trait]
impl S3Client for MockS3Client {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<S3Object, S3Error> {
        self.simulate_latency().await;
        let cache_key = Self::cache_key(bucket, key);
        let mut state = self.lock();
        if let Some(error) = state.get_failures.get(&cache_key) {
            return Err(error.clone());
        }

        let result = match state.objects.get(&cache_key) {
            Some(object) => Ok(S3Object {
                body: object.body.clone(),
                etag: Some(object.etag.clone()),
            }),
            None => Err(S3Error::NotFound(key.to_string())),
        };

        if let Some(competing_body) = state.races.remove(&cache_key) {
            state.store(cache_key, competing_body, "text/csv");
        }

        result
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        precondition: WritePrecondition,
    ) -> Result<(), S3Error> {
        self.simulate_latency().await;
        let cache_key = Self::cache_key(bucket, key);
        let mut state = self.lock();
        if let Some(error) = state.put_failures.get(&cache_key) {
            return Err(error.clone());
        }

        let current_etag = state.objects.get(&cache_key).map(|o| o.etag.as_str());
        let allowed = match &precondition {
            WritePrecondition::None => true,
            WritePrecondition::IfAbsent => current_etag.is_none(),
            WritePrecondition::IfMatch(expected) => current_etag == Some(expected.as_str()),
        };
        if !allowed {
            return Err(S3Error::PreconditionFailed(key.to_string()));
        }

        let body = String::from_utf8(body)?;
        state.store(cache_key, body, content_type);
        state.put_calls += 1;
        Ok(())
    }
}
