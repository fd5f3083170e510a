//! The in-container Worker SDK (§4.7): reads args/stdin/inputs from the job prefix,
//! writes progress and outputs, and guarantees a terminal status is written once the
//! worker's scope exits.
//!
//! Rust `Drop` can't run async code, so the "on scope exit, write a terminal status"
//! guarantee from §4.7 is implemented as [`run_scoped`], an entry point the worker
//! binary's `main` calls instead of a Drop impl (see DESIGN.md).

use adbi_base::layout;
use adbi_util::blob::{self, BlobError, BlobIo, BlobIoExt as _};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::io::IsTerminal as _;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("failed to read process stdin")]
    Stdin(#[from] std::io::Error),
}

/// The in-container counterpart to [`crate::client`]'s `Client`: reads what the
/// client wrote under the job prefix and writes progress/outputs/status back to it.
pub struct Worker {
    blob: Arc<dyn BlobIo>,
    prefix_uri: String,
    extra_args: Vec<String>,
    logger: slog::Logger,
    finished: AtomicBool,
}

impl Worker {
    /// `argv[0]` is the job prefix URI; `argv[1..]` are extra args (§4.7).
    pub async fn new(argv: &[String], logger: slog::Logger) -> Result<Self, WorkerError> {
        let prefix_uri = argv.first().cloned().unwrap_or_default();
        let blob = blob::open(&prefix_uri).await?;
        Ok(Self {
            blob,
            prefix_uri,
            extra_args: argv.get(1..).map(<[String]>::to_vec).unwrap_or_default(),
            logger,
            finished: AtomicBool::new(false),
        })
    }

    pub fn prefix_uri(&self) -> &str {
        &self.prefix_uri
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Extra argv if non-empty, else the parsed `args` file; an absent `args` file
    /// with no extra argv yields an empty list.
    pub async fn args(&self) -> Result<Vec<String>, WorkerError> {
        if !self.extra_args.is_empty() {
            return Ok(self.extra_args.clone());
        }
        let bytes = self.blob.read(layout::PATH_ARGS).await?;
        Ok(bytes
            .and_then(|b| serde_json::from_slice(&b).ok())
            .unwrap_or_default())
    }

    /// Reads process stdin if it isn't a tty (the container runtime piped input in);
    /// otherwise falls back to the `stdin` file at the job prefix (§4.7, §10.6). Per
    /// §9's open question, behavior under a runtime-attached pseudo-tty is undefined.
    pub async fn stdin(&self) -> Result<Vec<u8>, WorkerError> {
        if !std::io::stdin().is_terminal() {
            let buf = tokio::task::spawn_blocking(|| {
                use std::io::Read as _;
                let mut buf = Vec::new();
                std::io::stdin().lock().read_to_end(&mut buf)?;
                Ok::<_, std::io::Error>(buf)
            })
            .await
            .expect("stdin read task panicked")?;
            return Ok(buf);
        }
        Ok(self.blob.read(layout::PATH_STDIN).await?.unwrap_or_default())
    }

    pub async fn read(&self, relpath: &str) -> Result<Option<Vec<u8>>, WorkerError> {
        Ok(self.blob.read(relpath).await?)
    }

    pub async fn write(&self, relpath: &str, data: &[u8]) -> Result<(), WorkerError> {
        Ok(self.blob.write(relpath, data).await?)
    }

    pub async fn write_file(&self, relpath: &str, local_path: &Path) -> Result<(), WorkerError> {
        Ok(self.blob.write_file(relpath, local_path).await?)
    }

    pub async fn get_input_filenames(&self) -> Result<Vec<String>, WorkerError> {
        Ok(self.blob.list_inputs().await?)
    }

    /// Writes `progress` (overwritten) and appends an entry to `progress_log` with the
    /// current epoch time (§3, §4.7).
    pub async fn set_progress(&self, message: &str) -> Result<(), WorkerError> {
        self.blob.write(layout::PATH_PROGRESS, message.as_bytes()).await?;

        let existing = self.blob.read(layout::PATH_PROGRESS_LOG).await?;
        let mut entries = existing
            .map(|b| adbi_base::progress::from_json_bytes(&b))
            .unwrap_or_default();
        entries.push(adbi_base::ProgressLogEntry::new(Utc::now().timestamp(), message));
        self.blob
            .write(layout::PATH_PROGRESS_LOG, &adbi_base::progress::to_json_bytes(&entries))
            .await?;

        slog::info!(self.logger, "progress update"; "prefix_uri" => &self.prefix_uri, "message" => message);
        Ok(())
    }

    /// Writes every output, then `status=SUCCESS`: outputs must land before the
    /// terminal status is observable as final.
    pub async fn success(
        &self,
        outputs: Option<HashMap<String, Vec<u8>>>,
        output_files: Option<HashMap<String, &Path>>,
    ) -> Result<(), WorkerError> {
        self.write_outputs(outputs, output_files).await?;
        self.blob
            .write(layout::PATH_STATUS, adbi_base::StatusToken::Success.as_bytes())
            .await?;
        self.finished.store(true, Ordering::SeqCst);
        slog::info!(self.logger, "worker succeeded"; "prefix_uri" => &self.prefix_uri);
        Ok(())
    }

    /// Writes every output plus `output/__error__.txt = message`, then
    /// `status=ERROR`.
    pub async fn error(
        &self,
        message: &str,
        outputs: Option<HashMap<String, Vec<u8>>>,
        output_files: Option<HashMap<String, &Path>>,
    ) -> Result<(), WorkerError> {
        self.write_outputs(outputs, output_files).await?;
        self.blob.write(layout::ERROR_OUTPUT_PATH, message.as_bytes()).await?;
        self.blob
            .write(layout::PATH_STATUS, adbi_base::StatusToken::Error.as_bytes())
            .await?;
        self.finished.store(true, Ordering::SeqCst);
        slog::warn!(self.logger, "worker errored"; "prefix_uri" => &self.prefix_uri, "message" => message);
        Ok(())
    }

    async fn write_outputs(
        &self,
        outputs: Option<HashMap<String, Vec<u8>>>,
        output_files: Option<HashMap<String, &Path>>,
    ) -> Result<(), WorkerError> {
        for (name, bytes) in outputs.unwrap_or_default() {
            self.blob.write(&layout::output_path(&name), &bytes).await?;
        }
        for (name, local_path) in output_files.unwrap_or_default() {
            self.blob
                .write_file(&layout::output_path(&name), local_path)
                .await?;
        }
        Ok(())
    }
}

/// Runs `f` with a fresh [`Worker`], then applies the scope-exit guarantee from §4.7:
/// if `f` returns `Ok` and no terminal call was made, write `SUCCESS`; if `f` returns
/// `Err`, write `ERROR` with the formatted failure unless a terminal call already won
/// the race.
pub async fn run_scoped<F, Fut>(argv: &[String], logger: slog::Logger, f: F) -> anyhow::Result<()>
where
    F: FnOnce(Arc<Worker>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let worker = Arc::new(Worker::new(argv, logger).await?);
    let result = f(worker.clone()).await;
    match &result {
        Ok(()) => {
            if !worker.finished() {
                worker.success(None, None).await?;
            }
        }
        Err(e) => {
            if !worker.finished() {
                worker.error(&format!("{e:?}"), None, None).await?;
            }
        }
    }
    result
}
