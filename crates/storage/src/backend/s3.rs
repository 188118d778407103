//! S3-compatible cache backend.
//!
//! One object per cache key in a single bucket. Works against AWS S3 and
//! S3-compatible services such as MinIO, Backblaze B2 and Tigris.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via configuration (`key_id` and
//! `key_secret`); the AWS credential chain is not consulted.

use crate::backend::{BoxSyncRead, Cacher};
use crate::error::{Error, ErrorKind, Result};
use crate::key::validate as validate_key;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::DisplayErrorContext,
    operation::{get_object::GetObjectError, head_object::HeadObjectError},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use exn::{OptionExt, ResultExt};
use std::io::Read;
use tokio_util::io::SyncIoBridge;

/// Size of every multipart upload part except the last. Bodies smaller than
/// this are sent with a single `PutObject`.
const PART_SIZE: usize = 8 * 1024 * 1024;
const CONTENT_TYPE: &str = "application/octet-stream";

/// Transport security for the S3 endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tls {
    /// Plain HTTP.
    Disabled,
    /// HTTPS with certificate verification.
    #[default]
    Verified,
    /// HTTPS without certificate verification (self-signed MinIO and
    /// friends).
    Insecure,
}

/// S3-compatible cache backend.
///
/// # Examples
///
/// ```no_run
/// use modcache_storage::backend::{S3Backend, Tls};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "minio",
///     "modules",
///     "us-east-1",
///     "minio.internal:9000",
///     Tls::Verified,
///     "access_key_id",
///     "secret_access_key",
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
}

impl S3Backend {
    /// Create a new S3 cache backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging)
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region or provider-specific region
    /// * `endpoint` - `host:port`, or a full URL; a bare host gets its scheme
    ///   from `tls`
    /// * `tls` - Transport security
    /// * `key_id` - Access key ID
    /// * `key_secret` - Secret access key
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        region: impl Into<String>,
        endpoint: &str,
        tls: Tls,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let bucket = bucket.into();
        if bucket.is_empty() {
            exn::bail!(ErrorKind::Configuration("bucket name is empty".to_string()));
        }
        let credentials = Credentials::new(key_id, key_secret, None, None, "modcache-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region.into()))
            // Configure retry policy with exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Use path-style addressing for better compatibility with
            // S3-compatible services (MinIO, Backblaze, etc.)
            .force_path_style(true)
            .endpoint_url(endpoint_url(endpoint, tls));
        if tls == Tls::Insecure {
            config_builder = config_builder.http_client(insecure::http_client());
        }
        Ok(Self::from_client(name, Client::from_conf(config_builder.build()), bucket))
    }

    pub(crate) fn from_client(name: impl Into<String>, client: Client, bucket: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            bucket: bucket.into(),
        }
    }

    async fn put_single(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(CONTENT_TYPE)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| sdk_error("PutObject", key, e))?;
        Ok(())
    }

    async fn put_multipart(&self, key: &str, reader: BoxSyncRead, first: Vec<u8>) -> Result<()> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| sdk_error("CreateMultipartUpload", key, e))?;
        let upload_id = upload
            .upload_id()
            .ok_or_raise(|| ErrorKind::Backend(format!("CreateMultipartUpload {key}: no upload ID")))?
            .to_string();

        let result = match self.upload_parts(key, &upload_id, reader, first).await {
            Ok(parts) => self
                .client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
                .send()
                .await
                .map(|_| ())
                .map_err(|e| sdk_error("CompleteMultipartUpload", key, e)),
            Err(err) => Err(err),
        };
        if result.is_err() {
            let abort = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await;
            if let Err(err) = abort {
                tracing::warn!(key = %key, error = %DisplayErrorContext(&err), "failed to abort multipart upload");
            }
        }
        result
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        mut reader: BoxSyncRead,
        first: Vec<u8>,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut chunk = first;
        let mut part_number = 1;
        while !chunk.is_empty() {
            tracing::trace!(key = %key, part_number, size = chunk.len(), "uploading part");
            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| sdk_error("UploadPart", key, e))?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            (reader, chunk) = read_chunk(reader).await?;
            part_number += 1;
        }
        Ok(parts)
    }
}

#[async_trait]
impl Cacher for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let key = validate_key(key)?;
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(HeadObjectError::is_not_found) => Ok(false),
            Err(err) => Err(sdk_error("HeadObject", key, err)),
        }
    }

    async fn get(&self, key: &str) -> Result<BoxSyncRead> {
        let key = validate_key(key)?;
        let output = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(GetObjectError::is_no_such_key) => {
                exn::bail!(ErrorKind::NotFound(key.to_string()))
            },
            Err(err) => return Err(sdk_error("GetObject", key, err)),
        };
        // The bridge blocks on the runtime it was created in; readers must be
        // consumed inside spawn_blocking.
        Ok(Box::new(SyncIoBridge::new(Box::pin(output.body.into_async_read()))))
    }

    async fn put(&self, key: &str, reader: BoxSyncRead) -> Result<()> {
        let key = validate_key(key)?;
        let (reader, first) = read_chunk(reader).await?;
        if first.len() < PART_SIZE {
            self.put_single(key, first).await?;
        } else {
            self.put_multipart(key, reader, first).await?;
        }
        tracing::debug!(bucket = %self.bucket, key = %key, "stored cache entry");
        Ok(())
    }
}

/// Reads up to [`PART_SIZE`] bytes off the blocking reader. An empty chunk
/// means the reader is exhausted.
async fn read_chunk(mut reader: BoxSyncRead) -> Result<(BoxSyncRead, Vec<u8>)> {
    tokio::task::spawn_blocking(move || {
        let mut chunk = Vec::with_capacity(PART_SIZE);
        reader.by_ref().take(PART_SIZE as u64).read_to_end(&mut chunk)?;
        Ok::<_, std::io::Error>((reader, chunk))
    })
    .await
    .or_raise(|| ErrorKind::Backend("S3 read task failed".to_string()))?
    .map_err(|e| exn::Exn::from(ErrorKind::Io(e)))
}

fn sdk_error(operation: &str, key: &str, err: impl std::error::Error) -> Error {
    exn::Exn::from(ErrorKind::Network(format!("{operation} {key}: {}", DisplayErrorContext(&err))))
}

/// Prefixes a bare `host:port` with the scheme selected by `tls`.
fn endpoint_url(endpoint: &str, tls: Tls) -> String {
    if endpoint.contains("://") {
        return endpoint.to_string();
    }
    match tls {
        Tls::Disabled => format!("http://{endpoint}"),
        Tls::Verified | Tls::Insecure => format!("https://{endpoint}"),
    }
}

mod insecure {
    //! HTTPS client that accepts any server certificate.

    use aws_sdk_s3::config::SharedHttpClient;
    use aws_smithy_runtime::client::http::hyper_014::HyperClientBuilder;
    use rustls::client::{ServerCertVerified, ServerCertVerifier};
    use rustls::{Certificate, ClientConfig, ServerName};
    use std::sync::Arc;
    use std::time::SystemTime;

    struct AcceptAnyCertificate;

    impl ServerCertVerifier for AcceptAnyCertificate {
        fn verify_server_cert(
            &self,
            _end_entity: &Certificate,
            _intermediates: &[Certificate],
            _server_name: &ServerName,
            _scts: &mut dyn Iterator<Item = &[u8]>,
            _ocsp_response: &[u8],
            _now: SystemTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }
    }

    pub(super) fn http_client() -> SharedHttpClient {
        tracing::warn!("TLS certificate verification is disabled for S3");
        let tls_config = ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .build();
        HyperClientBuilder::new().build(connector)
    }
}
