use std::sync::Arc;

use anyhow::Result;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, SdkConfig};
use aws_credential_types::Credentials;
use aws_sdk_s3::{config::Region, Client as S3Client};
use tracing::info;

use crate::{
    config::AppConfig,
    storage::{MemoryStorage, ObjectStorage, S3Storage},
};

/// S3 when a bucket is configured, process memory otherwise.
pub async fn build_storage(config: &AppConfig) -> Result<Arc<dyn ObjectStorage>> {
    let Some(bucket) = config.s3_bucket.clone() else {
        info!("S3_BUCKET not set; uploads are kept in memory");
        return Ok(Arc::new(MemoryStorage::new()));
    };

    let sdk_config = load_sdk_config(config).await;
    // MinIO and other S3-compatible endpoints only route path-style requests.
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(config.aws_endpoint_url.is_some())
        .build();
    info!(
        bucket = %bucket,
        endpoint = config.aws_endpoint_url.as_deref().unwrap_or("aws"),
        "using S3 object storage"
    );
    Ok(Arc::new(S3Storage::new(S3Client::from_conf(s3_config), bucket)))
}

async fn load_sdk_config(config: &AppConfig) -> SdkConfig {
    let region = RegionProviderChain::first_try(Region::new(config.aws_region.clone()))
        .or_default_provider();
    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = config.aws_endpoint_url.as_deref() {
        loader = loader.endpoint_url(endpoint);
    }
    if let (Some(key_id), Some(secret)) = (
        config.aws_access_key_id.as_ref(),
        config.aws_secret_access_key.as_ref(),
    ) {
        let credentials = Credentials::new(key_id, secret, None, None, "environment");
        loader = loader.credentials_provider(credentials);
    }
    loader.load().await
}
