//! `Client`: composes a job prefix, uploads inputs, enqueues the envelope, and hands
//! back a [`Job`] handle (§4.3).

use adbi_base::{process_id, Envelope};
use adbi_util::blob::{self, BlobError};
use adbi_util::queue::{self, QueueError, QueueIo};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::job::Job;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Request parameters for [`Client::request`]. All fields are optional except
/// `func_id` (§4.3): a job with no args, no stdin, and no inputs is legal.
#[derive(Default)]
pub struct Request<'a> {
    pub args: Option<Vec<String>>,
    pub stdin: Option<Vec<u8>>,
    pub input_info: HashMap<String, Vec<u8>>,
    pub input_file_info: HashMap<String, &'a Path>,
}

pub struct Client {
    base_dir: String,
    queue: Arc<dyn QueueIo>,
    logger: slog::Logger,
}

impl Client {
    pub fn new(base_dir: impl Into<String>, queue: Arc<dyn QueueIo>, logger: slog::Logger) -> Self {
        Self {
            base_dir: base_dir.into().trim_end_matches('/').to_owned(),
            queue,
            logger,
        }
    }

    /// Builds a `Client` from `ADBI_BASE_DIR`/`ADBI_SQS_NAME`, selecting the local or
    /// SQS-compatible queue backend from `ADBI_BASE_DIR`'s scheme the same way
    /// `adbi_util::blob::open` selects the blob backend (§9).
    pub async fn from_env(logger: slog::Logger) -> anyhow::Result<Self> {
        let config = ClientConfig::from_env()?;
        let queue = queue::open(&config.base_dir, &config.queue_name).await?;
        Ok(Self::new(config.base_dir, queue, logger))
    }

    /// Materialises inputs under a freshly computed job prefix, enqueues the envelope,
    /// and returns a [`Job`] bound to that prefix (§4.3 steps 1-4).
    pub async fn request(
        &self,
        func_id: &str,
        request: Request<'_>,
    ) -> Result<Job, ClientError> {
        let process_id = process_id::new_process_id(func_id);
        let prefix_uri = process_id::join_prefix(&self.base_dir, &process_id);
        let blob = blob::open(&prefix_uri).await?;

        if let Some(args) = &request.args {
            let bytes = serde_json::to_vec(args).expect("Vec<String> serialization is infallible");
            blob.write(adbi_base::layout::PATH_ARGS, &bytes).await?;
        }
        if let Some(stdin) = &request.stdin {
            blob.write(adbi_base::layout::PATH_STDIN, stdin).await?;
        }
        for (name, bytes) in &request.input_info {
            blob.write(&adbi_base::layout::input_path(name), bytes).await?;
        }
        for (name, local_path) in &request.input_file_info {
            blob.write_file(&adbi_base::layout::input_path(name), local_path)
                .await?;
        }

        let envelope = Envelope::new(func_id, prefix_uri.clone());
        self.queue
            .send(&envelope.to_json_bytes(), &process_id, &process_id)
            .await?;

        slog::info!(
            self.logger,
            "enqueued job";
            "func_id" => func_id,
            "process_id" => &process_id,
            "prefix_uri" => &prefix_uri,
        );

        Ok(Job::new(blob, prefix_uri, process_id, self.logger.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adbi_util::queue::LocalQueueIo;

    fn test_client(base_dir: &std::path::Path) -> Client {
        let queue: Arc<dyn QueueIo> = Arc::new(LocalQueueIo::new(base_dir.join(".queue/test-queue")));
        Client::new(
            base_dir.to_str().unwrap(),
            queue,
            slog::Logger::root(slog::Discard, slog::o!()),
        )
    }

    #[tokio::test]
    async fn request_materialises_args_and_enqueues_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let client = test_client(dir.path());
        let job = client
            .request(
                "test.echo",
                Request {
                    args: Some(vec!["hello".to_owned(), "2024-01-01".to_owned()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let args_path = Path::new(job.prefix_uri()).join("args");
        let bytes = tokio::fs::read(&args_path).await.unwrap();
        assert_eq!(bytes, br#"["hello","2024-01-01"]"#);
    }

    #[tokio::test]
    async fn request_materialises_input_info_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let client = test_client(dir.path());
        let mut input_info = HashMap::new();
        input_info.insert("a.txt".to_owned(), b"data-A".to_vec());
        let job = client
            .request(
                "test.echo",
                Request {
                    input_info,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let path = Path::new(job.prefix_uri()).join("input/a.txt");
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"data-A");
    }

    #[tokio::test]
    async fn request_enqueues_envelope_with_matching_group_and_dedup_id() {
        let dir = tempfile::tempdir().unwrap();
        let client = test_client(dir.path());
        let job = client.request("test.echo", Request::default()).await.unwrap();

        let queue = LocalQueueIo::new(dir.path().join(".queue/test-queue"));
        let handles = queue.receive().await.unwrap();
        assert_eq!(handles.len(), 1);
        let envelope: Envelope = Envelope::parse(handles[0].body()).unwrap();
        assert_eq!(envelope.func_id(), "test.echo");
        assert_eq!(envelope.prefix_uri(), job.prefix_uri());
        assert!(job.process_id().contains("test.echo"));
    }
}
