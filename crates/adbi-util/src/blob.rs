//! `BlobIo`: the uniform blob-store interface every role (client, dispatcher, worker)
//! reads and writes a job prefix through (§4.1). Two backends share the trait: a local
//! filesystem implementation used for development/tests and an S3-compatible one for
//! production, selected once at construction from the job prefix's URI scheme, in the
//! spirit of `spr_adbi.common.adbi_io.ADBILocalIO`/`ADBIS3IO`.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::fs::Fs;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("transport error talking to blob store: {0}")]
    Transport(String),
    #[error("local file {0} does not exist")]
    MissingLocalFile(PathBuf),
    #[error("{0} is not a recognized job prefix URI (expected s3://... or a filesystem path)")]
    UnrecognizedScheme(String),
}

/// Operations every blob backend supports (§4.1). Callers code against this trait
/// object, never against `LocalBlobIo`/`S3BlobIo` directly.
#[async_trait]
pub trait BlobIo: Send + Sync {
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), BlobError>;
    async fn write_file(&self, path: &str, local_path: &Path) -> Result<(), BlobError>;
    /// Absent is not an error: a reader asking for an object that was never written
    /// gets `Ok(None)`, not `Err`.
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, BlobError>;
    /// Idempotent: deleting an already-absent path is not an error.
    async fn delete(&self, path: &str) -> Result<(), BlobError>;
    /// Paths relative to the job prefix root, forward-slash separated, optionally
    /// filtered to a sub-prefix.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, BlobError>;
}

/// Convenience extension so every `BlobIo` gets `list_inputs`/`list_outputs` for free.
#[async_trait]
pub trait BlobIoExt: BlobIo {
    async fn list_inputs(&self) -> Result<Vec<String>, BlobError> {
        self.list(Some(adbi_base::layout::INPUT_PREFIX)).await
    }

    async fn list_outputs(&self) -> Result<Vec<String>, BlobError> {
        self.list(Some(adbi_base::layout::OUTPUT_PREFIX)).await
    }
}

impl<T: BlobIo + ?Sized> BlobIoExt for T {}

/// Builds the right backend for a job prefix URI: `s3://bucket/key/prefix` selects
/// [`S3BlobIo`], anything else is treated as a filesystem path and selects
/// [`LocalBlobIo`] (§9 "polymorphism over storage").
pub async fn open(prefix_uri: &str) -> Result<Arc<dyn BlobIo>, BlobError> {
    if let Some(rest) = prefix_uri.strip_prefix("s3://") {
        let (bucket, key_prefix) = rest
            .split_once('/')
            .map(|(b, k)| (b.to_owned(), k.to_owned()))
            .unwrap_or((rest.to_owned(), String::new()));
        Ok(Arc::new(S3BlobIo::connect(bucket, key_prefix).await?))
    } else if prefix_uri.is_empty() {
        Err(BlobError::UnrecognizedScheme(prefix_uri.to_owned()))
    } else {
        Ok(Arc::new(LocalBlobIo::new(PathBuf::from(prefix_uri))))
    }
}

/// Filesystem-backed [`BlobIo`], mirroring `ADBILocalIO`: every path is joined under
/// `root` and parent directories are created on write.
pub struct LocalBlobIo {
    root: PathBuf,
    fs: Fs,
}

impl LocalBlobIo {
    pub fn new(root: PathBuf) -> Self {
        Self { root, fs: Fs::new() }
    }

    fn join(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl BlobIo for LocalBlobIo {
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), BlobError> {
        self.fs
            .write(self.join(path), data)
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))
    }

    async fn write_file(&self, path: &str, local_path: &Path) -> Result<(), BlobError> {
        if !local_path.exists() {
            return Err(BlobError::MissingLocalFile(local_path.to_owned()));
        }
        self.fs
            .copy(local_path, self.join(path))
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, BlobError> {
        self.fs
            .read(self.join(path))
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        self.fs
            .remove_file(self.join(path))
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, BlobError> {
        let root = self.root.clone();
        let sub = prefix.map(str::to_owned);
        tokio::task::spawn_blocking(move || {
            let walk_root = match &sub {
                Some(p) => root.join(p),
                None => root.clone(),
            };
            if !walk_root.exists() {
                return Vec::new();
            }
            walkdir::WalkDir::new(&walk_root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| {
                    e.path()
                        .strip_prefix(&root)
                        .ok()
                        .map(|rel| rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
                })
                .collect()
        })
        .await
        .map_err(|e| BlobError::Transport(e.to_string()))
    }
}

/// S3-compatible [`BlobIo`], mirroring `ADBIS3IO`. Honors `S3_ENDPOINT_URL` so tests can
/// point it at a local S3-compatible server (§6).
pub struct S3BlobIo {
    client: aws_sdk_s3::Client,
    bucket: String,
    key_prefix: String,
}

impl S3BlobIo {
    pub async fn connect(bucket: String, key_prefix: String) -> Result<Self, BlobError> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        let mut path_style = false;
        if let Ok(endpoint) = std::env::var("S3_ENDPOINT_URL") {
            // A local S3-compatible server (the mock/test server §6 describes, or
            // minio/localstack) is addressed path-style; only AWS's own endpoint
            // needs virtual-hosted-style bucket addressing.
            loader = loader.endpoint_url(endpoint);
            path_style = true;
        }
        let sdk_config = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if path_style {
            s3_config = s3_config.force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(s3_config.build());
        Ok(Self {
            client,
            bucket,
            key_prefix,
        })
    }

    pub fn from_client(client: aws_sdk_s3::Client, bucket: String, key_prefix: String) -> Self {
        Self {
            client,
            bucket,
            key_prefix,
        }
    }

    fn key(&self, path: &str) -> String {
        if self.key_prefix.is_empty() {
            path.to_owned()
        } else {
            format!("{}/{path}", self.key_prefix)
        }
    }
}

#[async_trait]
impl BlobIo for S3BlobIo {
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), BlobError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn write_file(&self, path: &str, local_path: &Path) -> Result<(), BlobError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|_| BlobError::MissingLocalFile(local_path.to_owned()))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .body(body)
            .send()
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, BlobError> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
        {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| BlobError::Transport(e.to_string()))?
                    .to_vec();
                Ok(Some(bytes))
            }
            Err(e) => {
                // The S3 backend must turn "not found" into an absent value rather
                // than propagating it, same as `ADBIS3IO._read`'s 404 check.
                if is_not_found(&e) {
                    Ok(None)
                } else {
                    Err(BlobError::Transport(e.to_string()))
                }
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, BlobError> {
        let full_prefix = match prefix {
            Some(p) => self.key(p),
            None => self.key_prefix.clone(),
        };
        let mut paths = Vec::new();
        let mut continuation_token = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }
            let output = request
                .send()
                .await
                .map_err(|e| BlobError::Transport(e.to_string()))?;
            for object in output.contents() {
                if let Some(key) = object.key() {
                    let relative = if self.key_prefix.is_empty() {
                        key.to_owned()
                    } else {
                        key.strip_prefix(&self.key_prefix)
                            .unwrap_or(key)
                            .trim_start_matches('/')
                            .to_owned()
                    };
                    paths.push(relative);
                }
            }
            continuation_token = output.next_continuation_token().map(str::to_owned);
            if continuation_token.is_none() {
                break;
            }
        }
        Ok(paths)
    }
}

fn is_not_found(error: &aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::get_object::GetObjectError>) -> bool {
    use aws_sdk_s3::operation::get_object::GetObjectError;
    matches!(
        error.as_service_error(),
        Some(GetObjectError::NoSuchKey(_))
    ) || matches!(error.raw_response().map(|r| r.status().as_u16()), Some(404))
}
