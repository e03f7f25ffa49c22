use async_trait::async_trait;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// Content-addressed blob store for avatars, post media and chat files.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<(), MediaStoreError>;
    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), MediaStoreError>;
    async fn delete(&self, hash: &str) -> Result<(), MediaStoreError>;
}

fn sniff_mime(bytes: &[u8]) -> String {
    infer::get(bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".into())
}

// ---------------- filesystem backend ----------------

pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new() -> Self {
        let root = std::env::var("MEDIA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/media"));
        Self { root }
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        // Two-level fan-out keeps directories small.
        self.root.join(&hash[0..2]).join(hash)
    }
}

impl Default for FsMediaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn save(&self, hash: &str, _mime: &str, bytes: &[u8]) -> Result<(), MediaStoreError> {
        let path = self.path_for(hash);
        if path.exists() {
            return Err(MediaStoreError::Duplicate);
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| MediaStoreError::Other(e.to_string()))?;
        }
        std::fs::write(&path, bytes).map_err(|e| MediaStoreError::Other(e.to_string()))
    }

    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), MediaStoreError> {
        let path = self.path_for(hash);
        let bytes = std::fs::read(&path).map_err(|_| MediaStoreError::NotFound)?;
        let mime = sniff_mime(&bytes);
        Ok((bytes, mime))
    }

    async fn delete(&self, hash: &str) -> Result<(), MediaStoreError> {
        // Best-effort: a missing file is fine.
        let _ = std::fs::remove_file(self.path_for(hash));
        Ok(())
    }
}

// ---------------- S3 / MinIO backend ----------------

pub struct S3MediaStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    prefix: String,
}

impl S3MediaStore {
    pub async fn new() -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "mingle-media".into());
        let endpoint = std::env::var("S3_ENDPOINT")
            .map_err(|_| anyhow::anyhow!("S3_ENDPOINT must be set (MinIO / S3 endpoint)"))?;
        let region = std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let access = std::env::var("S3_ACCESS_KEY").unwrap_or_default();
        let secret = std::env::var("S3_SECRET_KEY").unwrap_or_default();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region));
        loader = loader.endpoint_url(endpoint);
        if !access.is_empty() && !secret.is_empty() {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // Path-style addressing: required for MinIO endpoints without
        // wildcard DNS.
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("initialized S3/MinIO media client");

        // Ensure the bucket exists; MinIO containers can lag behind startup.
        if let Err(e) = client.head_bucket().bucket(&bucket).send().await {
            warn!("head_bucket failed for '{bucket}' (will attempt create): {e:?}");
            let mut attempt = 0u32;
            let max_attempts = 8;
            loop {
                attempt += 1;
                match client.create_bucket().bucket(&bucket).send().await {
                    Ok(_) => {
                        info!("created bucket '{bucket}' (attempt {attempt})");
                        break;
                    }
                    Err(e2) => {
                        if attempt >= max_attempts {
                            error!("create_bucket failed for '{bucket}' after {attempt} attempts: {e2:?}");
                            return Err(anyhow::anyhow!("failed to ensure bucket '{bucket}': {e2}"));
                        }
                        let backoff_ms = 200 * attempt.pow(2);
                        warn!("create_bucket attempt {attempt} failed for '{bucket}': {e2:?} (retrying in {backoff_ms}ms)");
                        tokio::time::sleep(std::time::Duration::from_millis(backoff_ms as u64)).await;
                    }
                }
            }
        }

        Ok(Self {
            bucket,
            client,
            prefix: "media".into(),
        })
    }

    fn key_for(&self, hash: &str) -> String {
        format!("{}/{}/{}", self.prefix, &hash[0..2], hash)
    }
}

#[async_trait]
impl MediaStore for S3MediaStore {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<(), MediaStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        let key = self.key_for(hash);
        if self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .is_ok()
        {
            return Err(MediaStoreError::Duplicate);
        }
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(mime);
        if let Err(e) = put.send().await {
            error!(
                "put_object failed hash={hash} key={key} bucket={}: {e:?}",
                self.bucket
            );
            return Err(MediaStoreError::Other(e.to_string()));
        }
        Ok(())
    }

    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), MediaStoreError> {
        let key = self.key_for(hash);
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|_| MediaStoreError::NotFound)?;
        let data = obj
            .body
            .collect()
            .await
            .map_err(|e| MediaStoreError::Other(e.to_string()))?;
        let bytes = Vec::from(data.into_bytes().as_ref());
        let mime = sniff_mime(&bytes);
        Ok((bytes, mime))
    }

    async fn delete(&self, hash: &str) -> Result<(), MediaStoreError> {
        let key = self.key_for(hash);
        let _ = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await;
        Ok(())
    }
}

/// S3 when an endpoint is configured, the local filesystem otherwise.
pub async fn build_media_store() -> Arc<dyn MediaStore> {
    if std::env::var("S3_ENDPOINT").is_ok() {
        match S3MediaStore::new().await {
            Ok(store) => return Arc::new(store),
            Err(e) => panic!("failed to initialize S3 media store: {e}"),
        }
    }
    info!("using filesystem media store");
    Arc::new(FsMediaStore::new())
}
