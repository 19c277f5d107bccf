//! S3 Helper Module
//!
//! This module provides the S3-backed ObjectStore used for both the Xetra
//! source bucket and the report target bucket.
//! Supports multiple providers including:
//! - AWS S3
//! - Backblaze B2
//! - Cloudflare R2
//! - Any other S3-compatible service
//!
//! Credentials are never stored in the configuration: the config names two
//! environment variables that hold the access key and the secret key.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use std::env;
use tracing::{debug, info, warn};

use crate::config::S3Config;
use crate::error::EtlError;
use crate::store::ObjectStore;

/// S3-compatible storage client bound to one bucket
pub struct S3Helper {
    client: S3Client,
    config: S3Config,
}

/// S3 provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3Provider {
    /// Amazon Web Services S3
    AwsS3,
    /// Backblaze B2
    BackblazeB2,
    /// Cloudflare R2
    CloudflareR2,
    /// Generic S3-compatible service
    Generic,
}

impl S3Provider {
    /// Parse provider from string
    pub fn from_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "aws" | "s3" | "aws-s3" => S3Provider::AwsS3,
            "b2" | "backblaze" | "backblaze-b2" => S3Provider::BackblazeB2,
            "r2" | "cloudflare" | "cloudflare-r2" => S3Provider::CloudflareR2,
            _ => S3Provider::Generic,
        }
    }

    /// Region used when the configuration does not set one
    pub fn default_region(&self) -> &'static str {
        match self {
            S3Provider::AwsS3 => "us-east-1",
            S3Provider::BackblazeB2 => "us-west-002",
            S3Provider::CloudflareR2 => "auto",
            S3Provider::Generic => "us-east-1",
        }
    }
}

/// Read a credential from the environment variable named in the config
fn credential_from_env(var_name: &str) -> Result<String> {
    env::var(var_name).context(format!("Environment variable {} is not set", var_name))
}

impl S3Helper {
    /// Create a new S3Helper instance
    ///
    /// # Arguments
    /// * `config` - Bucket configuration; credentials are read from the
    ///   environment variables it names
    pub async fn new(config: S3Config) -> Result<Self> {
        let client = Self::create_client(&config).await
            .context("Failed to create S3 client")?;

        Ok(Self { client, config })
    }

    /// Create S3 client with custom configuration
    async fn create_client(config: &S3Config) -> Result<S3Client> {
        let provider = S3Provider::from_name(&config.provider);

        let credentials = Credentials::new(
            credential_from_env(&config.access_key_env)?,
            credential_from_env(&config.secret_key_env)?,
            None,  // session token
            None,  // expiration
            "environment"
        );

        let region = config.region.clone()
            .unwrap_or_else(|| provider.default_region().to_string());

        let region_provider = RegionProviderChain::first_try(Region::new(region));

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .credentials_provider(credentials)
            .load()
            .await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);

        if let Some(endpoint) = &config.endpoint {
            // AWS S3 uses virtual-hosted-style, everything else path-style
            let default_path_style = provider != S3Provider::AwsS3;
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(config.force_path_style.unwrap_or(default_path_style));
        } else {
            match provider {
                S3Provider::AwsS3 => {
                    s3_config_builder = s3_config_builder
                        .force_path_style(config.force_path_style.unwrap_or(false));
                }
                S3Provider::BackblazeB2 => {
                    bail!("Backblaze B2 requires an endpoint URL (e.g., https://s3.us-west-002.backblazeb2.com)");
                }
                S3Provider::CloudflareR2 => {
                    bail!("Cloudflare R2 requires an endpoint URL (e.g., https://<account-id>.r2.cloudflarestorage.com)");
                }
                S3Provider::Generic => {
                    warn!("Generic S3 provider without endpoint - will use AWS S3");
                }
            }
        }

        Ok(S3Client::from_conf(s3_config_builder.build()))
    }

    /// Upload raw bytes to S3
    ///
    /// # Returns
    /// The uploaded object's ETag
    pub async fn upload_bytes(&self, data: Bytes, key: &str) -> Result<String> {
        debug!("Uploading {} bytes to s3://{}/{}", data.len(), self.config.bucket, key);

        let response = self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .context(format!("Failed to upload bytes to S3: {}", key))?;

        let etag = response.e_tag()
            .unwrap_or("unknown")
            .to_string();

        info!("Uploaded s3://{}/{} (ETag: {})", self.config.bucket, key, etag);
        Ok(etag)
    }

    /// Download object as bytes
    ///
    /// A missing key is reported as `EtlError::ObjectNotFound` so callers can
    /// tell it apart from transport or permission failures.
    pub async fn download_bytes(&self, key: &str) -> Result<Bytes> {
        info!("Reading s3://{}/{}", self.config.bucket, key);

        let response = match self.client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    return Err(EtlError::ObjectNotFound { key: key.to_string() }.into());
                }
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to download object from S3: {}", key)));
            }
        };

        let data = response.body.collect().await
            .context("Failed to read response body")?
            .into_bytes();

        debug!("Downloaded {} ({} bytes)", key, data.len());
        Ok(data)
    }

    /// List all objects in the bucket with pagination
    ///
    /// # Arguments
    /// * `prefix` - Prefix to filter objects (e.g., "2021-04-01")
    pub async fn list_all_objects(&self, prefix: &str) -> Result<Vec<String>> {
        debug!("Listing all objects in s3://{} with prefix: {}", self.config.bucket, prefix);

        let mut all_keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(prefix);

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await
                .context(format!("Failed to list objects with prefix: {}", prefix))?;

            all_keys.extend(
                response.contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(|k| k.to_string())),
            );

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        info!("Found {} objects with prefix: {}", all_keys.len(), prefix);
        Ok(all_keys)
    }

    /// Get bucket name
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    /// Get provider type
    pub fn provider(&self) -> S3Provider {
        S3Provider::from_name(&self.config.provider)
    }
}

#[async_trait]
impl ObjectStore for S3Helper {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.list_all_objects(prefix).await
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        self.download_bytes(key).await
    }

    async fn put_object(&self, key: &str, body: Bytes) -> Result<()> {
        self.upload_bytes(body, key).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_name() {
        assert_eq!(S3Provider::from_name("aws"), S3Provider::AwsS3);
        assert_eq!(S3Provider::from_name("s3"), S3Provider::AwsS3);
        assert_eq!(S3Provider::from_name("AWS-S3"), S3Provider::AwsS3);

        assert_eq!(S3Provider::from_name("b2"), S3Provider::BackblazeB2);
        assert_eq!(S3Provider::from_name("Backblaze-B2"), S3Provider::BackblazeB2);

        assert_eq!(S3Provider::from_name("r2"), S3Provider::CloudflareR2);
        assert_eq!(S3Provider::from_name("cloudflare"), S3Provider::CloudflareR2);

        assert_eq!(S3Provider::from_name("minio"), S3Provider::Generic);
    }

    #[test]
    fn test_default_region() {
        assert_eq!(S3Provider::AwsS3.default_region(), "us-east-1");
        assert_eq!(S3Provider::CloudflareR2.default_region(), "auto");
    }

    #[test]
    fn test_missing_credential_variable() {
        let err = credential_from_env("XETRA_ETL_TEST_UNSET_VARIABLE").unwrap_err();
        assert!(err.to_string().contains("XETRA_ETL_TEST_UNSET_VARIABLE"));
    }

    #[tokio::test]
    async fn test_new_requires_credentials() {
        let config = S3Config {
            provider: "generic".to_string(),
            bucket: "test-bucket".to_string(),
            access_key_env: "XETRA_ETL_TEST_UNSET_ACCESS".to_string(),
            secret_key_env: "XETRA_ETL_TEST_UNSET_SECRET".to_string(),
            region: None,
            endpoint: Some("http://localhost:9000".to_string()),
            force_path_style: None,
        };

        assert!(S3Helper::new(config).await.is_err());
    }
}
