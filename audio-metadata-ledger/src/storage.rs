use std::sync::Arc;

use aws_config::{retry::RetryConfig, BehaviorVersion, Region};
use aws_sdk_s3::Client;
use common_s3::{S3Client, S3Impl};
use tracing::info;

use crate::config::Config;

/// Builds the S3 client from the default credential chain, pointed at a custom
/// endpoint when one is configured.
pub async fn create_s3_client(config: &Config) -> Arc<dyn S3Client> {
    let shared = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.aws_region.clone()))
        .load()
        .await;

    let mut builder = aws_sdk_s3::config::Builder::from(&shared)
        .retry_config(RetryConfig::standard())
        .force_path_style(config.s3_force_path_style);

    if let Some(endpoint) = config.s3_endpoint.as_deref() {
        info!(endpoint, "using custom S3 endpoint");
        builder = builder.endpoint_url(endpoint);
    }

    Arc::new(S3Impl::new(Client::from_conf(builder.build())))
}
