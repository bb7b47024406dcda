//! AWS SDK implementation of `S3Backend`.
//!
//! Works against AWS S3 and S3-compatible endpoints (MinIO, Ceph RGW,
//! Wasabi, R2...). Credentials are always static: they come from the
//! connection profile, never from the ambient AWS environment.

use crate::{
    models::{bucket::BucketInfo, connection::ConnectionConfig, multipart::CompletedPartInfo},
    services::{
        StorageError, StorageResult,
        backend::{
            BackendFactory, BatchDeleteFailure, ListPage, ListPageRequest, ObjectBody,
            ObjectHead, RawObject, S3Backend,
        },
    },
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client, Config,
    config::{Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{
        BucketLocationConstraint, CompletedMultipartUpload, CompletedPart,
        CreateBucketConfiguration, Delete, ObjectIdentifier,
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::{sync::Arc, time::Duration};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Characters escaped in the key part of `x-amz-copy-source`.
const COPY_SOURCE_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Region in which buckets are created without a location constraint.
const DEFAULT_REGION: &str = "us-east-1";

const CREDENTIALS_PROVIDER_NAME: &str = "bucket-explorer";

pub struct AwsS3Backend {
    client: Client,
    region: String,
}

impl AwsS3Backend {
    /// Build a client for one connection snapshot.
    pub fn new(config: &ConnectionConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            CREDENTIALS_PROVIDER_NAME,
        );

        let mut builder = Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.force_path_style)
            .behavior_version(BehaviorVersion::latest());
        if !config.endpoint.trim().is_empty() {
            builder = builder.endpoint_url(config.endpoint.trim());
        }

        Self {
            client: Client::from_conf(builder.build()),
            region: config.region.clone(),
        }
    }
}

/// Normalize an SDK failure into `StorageError::Backend`.
///
/// The status comes from the raw HTTP response when there was one; the S3
/// error code and message come from the parsed error metadata.
fn normalize<E>(err: SdkError<E>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    StorageError::Backend {
        status,
        code,
        message,
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, utf8_percent_encode(key, COPY_SOURCE_ENCODE))
}

#[async_trait]
impl S3Backend for AwsS3Backend {
    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        let resp = self.client.list_buckets().send().await.map_err(normalize)?;
        Ok(resp
            .buckets()
            .iter()
            .filter_map(|b| {
                Some(BucketInfo {
                    name: b.name()?.to_string(),
                    creation_date: b.creation_date().and_then(to_chrono),
                })
            })
            .collect())
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if !self.region.is_empty() && self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request.send().await.map_err(normalize)?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(normalize)?;
        Ok(())
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        request: &ListPageRequest,
    ) -> StorageResult<ListPage> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix(request.prefix.clone())
            .set_delimiter(request.delimiter.clone())
            .set_continuation_token(request.continuation_token.clone())
            .set_max_keys(request.max_keys)
            .send()
            .await
            .map_err(normalize)?;

        let objects = resp
            .contents()
            .iter()
            .filter_map(|o| {
                Some(RawObject {
                    key: o.key()?.to_string(),
                    size: o.size().unwrap_or(0),
                    last_modified: o.last_modified().and_then(to_chrono),
                    etag: o.e_tag().map(str::to_string),
                })
            })
            .collect();
        let common_prefixes = resp
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();
        let next_continuation_token = if resp.is_truncated().unwrap_or(false) {
            resp.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            common_prefixes,
            next_continuation_token,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectHead> {
        let resp = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(normalize)?;
        Ok(ObjectHead {
            size: resp.content_length().unwrap_or(0),
            content_type: resp.content_type().map(str::to_string),
            last_modified: resp.last_modified().and_then(to_chrono),
            etag: resp.e_tag().map(str::to_string),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(normalize)?;

        let head = ObjectHead {
            size: resp.content_length().unwrap_or(0),
            content_type: resp.content_type().map(str::to_string),
            last_modified: resp.last_modified().and_then(to_chrono),
            etag: resp.e_tag().map(str::to_string),
        };
        let stream = ReaderStream::new(resp.body.into_async_read()).boxed();
        Ok(ObjectBody { head, stream })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<Option<String>> {
        let resp = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(normalize)?;
        Ok(resp.e_tag().map(str::to_string))
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> StorageResult<()> {
        self.client
            .copy_object()
            .bucket(dest_bucket)
            .key(dest_key)
            .copy_source(copy_source(source_bucket, source_key))
            .send()
            .await
            .map_err(normalize)?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(normalize)?;
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StorageResult<Vec<BatchDeleteFailure>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let identifiers = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::backend(e.to_string()))?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::backend(e.to_string()))?;

        let resp = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(normalize)?;

        Ok(resp
            .errors()
            .iter()
            .map(|e| BatchDeleteFailure {
                key: e.key().unwrap_or_default().to_string(),
                code: e.code().map(str::to_string),
                message: e.message().unwrap_or("delete refused").to_string(),
            })
            .collect())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<Option<String>> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(normalize)?;
        Ok(resp.upload_id().map(str::to_string))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<Option<String>> {
        let size = body.len();
        let resp = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(normalize)?;
        debug!(key, part_number, size, "uploaded part");
        Ok(resp.e_tag().map(str::to_string))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartInfo],
    ) -> StorageResult<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|p| {
                        CompletedPart::builder()
                            .part_number(p.part_number)
                            .e_tag(&p.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(normalize)?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(normalize)?;
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::invalid(format!("invalid presign expiry: {}", e)))?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(normalize)?;
        Ok(request.uri().to_string())
    }
}

/// Builds an `AwsS3Backend` per resolved connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct AwsBackendFactory;

impl BackendFactory for AwsBackendFactory {
    fn connect(&self, config: &ConnectionConfig) -> StorageResult<Arc<dyn S3Backend>> {
        if config.access_key.is_empty() || config.secret_key.is_empty() {
            return Err(StorageError::invalid(
                "connection is missing its access key or secret key",
            ));
        }
        Ok(Arc::new(AwsS3Backend::new(config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_source_escapes_key_but_not_separators() {
        assert_eq!(copy_source("demo", "a/b c.txt"), "demo/a/b%20c.txt");
        assert_eq!(copy_source("demo", "x-y_z.~1"), "demo/x-y_z.~1");
        assert_eq!(copy_source("demo", "é+?"), "demo/%C3%A9%2B%3F");
    }

    #[test]
    fn factory_requires_credentials() {
        let config = ConnectionConfig {
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            access_key: String::new(),
            secret_key: "secret".into(),
            force_path_style: true,
        };
        assert!(matches!(
            AwsBackendFactory.connect(&config),
            Err(StorageError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn factory_builds_client_for_custom_endpoint() {
        let config = ConnectionConfig {
            endpoint: "http://localhost:9000".into(),
            region: "eu-west-1".into(),
            access_key: "minioadmin".into(),
            secret_key: "minioadmin".into(),
            force_path_style: true,
        };
        assert!(AwsBackendFactory.connect(&config).is_ok());
    }
}
