//! S3-compatible remote storage (AWS and MinIO)

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use splunk_common::{Error, Result};

use crate::registry::{ClientFactory, ClientParams};
use crate::remote::{RemoteObject, RemoteStorageClient};

/// Region used when neither the volume nor the endpoint names one
pub const DEFAULT_REGION: &str = "us-east-1";

/// Builds S3 clients from static credentials
#[derive(Clone, Debug)]
pub struct S3ClientFactory {
    force_path_style: bool,
}

impl S3ClientFactory {
    /// Factory for AWS S3 (virtual-hosted addressing)
    pub fn aws() -> Self {
        Self {
            force_path_style: false,
        }
    }

    /// Factory for MinIO (path-style addressing)
    pub fn minio() -> Self {
        Self {
            force_path_style: true,
        }
    }
}

/// Region encoded in an AWS endpoint, e.g. `s3-eu-west-2.amazonaws.com`
pub fn region_from_endpoint(endpoint: &str) -> Option<String> {
    let host = endpoint
        .split("://")
        .last()?
        .split(['/', ':'])
        .next()?;
    if !host.ends_with(".amazonaws.com") {
        return None;
    }
    let mut labels = host.split('.');
    let first = labels.next()?;
    let region = match first.strip_prefix("s3-") {
        Some(region) => region,
        None if first == "s3" => labels.next().filter(|l| *l != "amazonaws")?,
        None => return None,
    };
    (!region.is_empty() && region != "external-1").then(|| region.to_string())
}

impl ClientFactory for S3ClientFactory {
    fn build(&self, params: &ClientParams) -> Option<Arc<dyn RemoteStorageClient>> {
        if params.access_key.is_empty() || params.secret_key.is_empty() {
            return None;
        }

        let region = if params.region.is_empty() {
            region_from_endpoint(&params.endpoint).unwrap_or_else(|| DEFAULT_REGION.to_string())
        } else {
            params.region.clone()
        };

        let credentials = Credentials::new(
            params.access_key.clone(),
            params.secret_key.clone(),
            None,
            None,
            "static",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(self.force_path_style);
        if !params.endpoint.is_empty() {
            builder = builder.endpoint_url(params.endpoint.clone());
        }

        Some(Arc::new(S3StorageClient {
            client: Client::from_conf(builder.build()),
            provider: params.provider.clone(),
        }))
    }
}

/// [`RemoteStorageClient`] over the AWS SDK
pub struct S3StorageClient {
    client: Client,
    provider: String,
}

fn to_chrono(ts: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    ts.and_then(|t| Utc.timestamp_opt(t.secs(), t.subsec_nanos()).single())
        .unwrap_or_default()
}

#[async_trait]
impl RemoteStorageClient for S3StorageClient {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| Error::remote(&self.provider, DisplayErrorContext(&e).to_string()))?;

            objects.extend(response.contents().iter().map(|obj| RemoteObject {
                key: obj.key().unwrap_or_default().to_string(),
                etag: obj.e_tag().unwrap_or_default().to_string(),
                last_modified: to_chrono(obj.last_modified()),
                size: obj.size().unwrap_or_default(),
                storage_class: obj
                    .storage_class()
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_default(),
            }));

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(
            provider = %self.provider,
            bucket,
            prefix,
            count = objects.len(),
            "listed remote objects"
        );
        Ok(objects)
    }
}
