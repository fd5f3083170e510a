//! `Job`: a handle bound to a job prefix, for polling status/progress/output and for
//! subscribing to `change_status`/`change_progress` events (§4.3, §9).

use adbi_base::layout::{self, OUTPUT_PREFIX};
use adbi_base::{ProgressLogEntry, StatusToken};
use adbi_util::blob::{BlobError, BlobIo, BlobIoExt as _};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("job did not reach a terminal status within the timeout")]
    Timeout,
}

/// An event delivered to handlers registered with [`Job::on`]. Carries no reference
/// back to the `Job` itself — per §9, the back-reference would only live for the
/// handler invocation anyway, so there's no cycle to break in the first place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    ChangeStatus {
        old: Option<StatusToken>,
        new: StatusToken,
    },
    ChangeProgress {
        old: Option<String>,
        new: String,
    },
}

pub const EVENT_CHANGE_STATUS: &str = "change_status";
pub const EVENT_CHANGE_PROGRESS: &str = "change_progress";

pub type EventHandler = Box<dyn Fn(&JobEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Success,
    Error,
    /// Returned on timeout when the caller asked not to raise (§4.3).
    Unknown,
}

/// Every file under `output/`, read eagerly so callers don't need to keep the blob
/// backend around just to inspect a finished job's result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    files: HashMap<String, Vec<u8>>,
}

impl Output {
    pub fn get_filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }
}

pub struct Job {
    blob: Arc<dyn BlobIo>,
    prefix_uri: String,
    process_id: String,
    logger: slog::Logger,
    handlers: Mutex<HashMap<&'static str, Vec<EventHandler>>>,
    last_status: Mutex<Option<StatusToken>>,
    last_progress: Mutex<Option<String>>,
}

impl Job {
    pub(crate) fn new(
        blob: Arc<dyn BlobIo>,
        prefix_uri: String,
        process_id: String,
        logger: slog::Logger,
    ) -> Self {
        Self {
            blob,
            prefix_uri,
            process_id,
            logger,
            handlers: Mutex::new(HashMap::new()),
            last_status: Mutex::new(None),
            last_progress: Mutex::new(None),
        }
    }

    pub fn prefix_uri(&self) -> &str {
        &self.prefix_uri
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Registers a handler for `event_name` (one of [`EVENT_CHANGE_STATUS`] or
    /// [`EVENT_CHANGE_PROGRESS`]). Handlers for the same event run in registration
    /// order.
    pub fn on(&self, event_name: &'static str, handler: EventHandler) {
        self.handlers
            .lock()
            .unwrap()
            .entry(event_name)
            .or_default()
            .push(handler);
    }

    pub async fn get_status(&self) -> Result<Option<StatusToken>, JobError> {
        let bytes = self.blob.read(layout::PATH_STATUS).await?;
        Ok(bytes.and_then(|b| StatusToken::parse(&b)))
    }

    pub async fn get_progress(&self) -> Result<Option<String>, JobError> {
        let bytes = self.blob.read(layout::PATH_PROGRESS).await?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// Tolerates malformed JSON by returning an empty log.
    pub async fn get_progress_log(&self) -> Result<Vec<ProgressLogEntry>, JobError> {
        let bytes = self.blob.read(layout::PATH_PROGRESS_LOG).await?;
        Ok(bytes
            .map(|b| adbi_base::progress::from_json_bytes(&b))
            .unwrap_or_default())
    }

    pub async fn finished(&self) -> Result<bool, JobError> {
        Ok(self.get_status().await?.is_some_and(StatusToken::is_terminal))
    }

    pub async fn is_success(&self) -> Result<bool, JobError> {
        Ok(self.get_status().await? == Some(StatusToken::Success))
    }

    pub async fn is_error(&self) -> Result<bool, JobError> {
        Ok(self.get_status().await? == Some(StatusToken::Error))
    }

    pub async fn get_output(&self) -> Result<Output, JobError> {
        let paths = self.blob.list(Some(OUTPUT_PREFIX)).await?;
        let mut files = HashMap::with_capacity(paths.len());
        for path in paths {
            if let Some(bytes) = self.blob.read(&path).await? {
                files.insert(path, bytes);
            }
        }
        Ok(Output { files })
    }

    /// Polls `status`/`progress` every `poll_interval` until a terminal status is
    /// observed or `timeout` elapses, emitting `change_status`/`change_progress`
    /// events synchronously as values change (§4.3).
    pub async fn wait(
        &self,
        timeout: Duration,
        poll_interval: Duration,
        raise_on_timeout: bool,
    ) -> Result<WaitOutcome, JobError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.get_status().await?;
            self.note_status(status);
            if let Some(status) = status {
                if status.is_terminal() {
                    return Ok(if status == StatusToken::Success {
                        WaitOutcome::Success
                    } else {
                        WaitOutcome::Error
                    });
                }
            }
            let progress = self.get_progress().await?;
            self.note_progress(progress);

            if tokio::time::Instant::now() >= deadline {
                return if raise_on_timeout {
                    Err(JobError::Timeout)
                } else {
                    Ok(WaitOutcome::Unknown)
                };
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    fn note_status(&self, new: Option<StatusToken>) {
        let Some(new) = new else { return };
        let mut last = self.last_status.lock().unwrap();
        if *last == Some(new) {
            return;
        }
        let old = *last;
        *last = Some(new);
        drop(last);
        self.emit(EVENT_CHANGE_STATUS, JobEvent::ChangeStatus { old, new });
    }

    fn note_progress(&self, new: Option<String>) {
        let Some(new) = new else { return };
        let mut last = self.last_progress.lock().unwrap();
        if last.as_deref() == Some(new.as_str()) {
            return;
        }
        let old = last.replace(new.clone());
        drop(last);
        self.emit(
            EVENT_CHANGE_PROGRESS,
            JobEvent::ChangeProgress { old, new },
        );
    }

    /// Invokes every handler registered for `event_name` synchronously, catching a
    /// panicking handler so one bad callback can't abort the polling loop (§7 "Event
    /// handler exception ... catch, log warning, do not propagate").
    fn emit(&self, event_name: &'static str, event: JobEvent) {
        let handlers = self.handlers.lock().unwrap();
        let Some(handlers) = handlers.get(event_name) else {
            return;
        };
        for handler in handlers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                slog::warn!(
                    self.logger,
                    "event handler panicked";
                    "process_id" => &self.process_id,
                    "event" => event_name,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adbi_util::blob::LocalBlobIo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_job(dir: &std::path::Path) -> Job {
        let blob: Arc<dyn BlobIo> = Arc::new(LocalBlobIo::new(dir.to_owned()));
        Job::new(
            blob,
            "file:///tmp/job".to_owned(),
            "pid".to_owned(),
            slog::Logger::root(slog::Discard, slog::o!()),
        )
    }

    #[tokio::test]
    async fn wait_returns_success_once_status_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let job = test_job(dir.path());
        tokio::fs::write(dir.path().join("status"), b"SUCCESS")
            .await
            .unwrap();
        let outcome = job
            .wait(Duration::from_secs(1), Duration::from_millis(1), true)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Success);
    }

    #[tokio::test]
    async fn wait_returns_error_on_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let job = test_job(dir.path());
        tokio::fs::write(dir.path().join("status"), b"ERROR")
            .await
            .unwrap();
        let outcome = job
            .wait(Duration::from_secs(1), Duration::from_millis(1), true)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Error);
    }

    #[tokio::test]
    async fn wait_times_out_without_terminal_status() {
        let dir = tempfile::tempdir().unwrap();
        let job = test_job(dir.path());
        let err = job
            .wait(Duration::from_millis(5), Duration::from_millis(1), true)
            .await
            .unwrap_err();
        assert_matches::assert_matches!(err, JobError::Timeout);
    }

    #[tokio::test]
    async fn wait_returns_unknown_on_timeout_when_not_raising() {
        let dir = tempfile::tempdir().unwrap();
        let job = test_job(dir.path());
        let outcome = job
            .wait(Duration::from_millis(5), Duration::from_millis(1), false)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Unknown);
    }

    #[tokio::test]
    async fn change_progress_handler_observes_each_distinct_value_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let job = test_job(dir.path());
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        job.on(
            EVENT_CHANGE_PROGRESS,
            Box::new(move |event| {
                if let JobEvent::ChangeProgress { new, .. } = event {
                    seen_clone.lock().unwrap().push(new.clone());
                }
            }),
        );

        tokio::fs::write(dir.path().join("progress"), b"25%")
            .await
            .unwrap();
        job.get_progress().await.unwrap();
        job.note_progress(job.get_progress().await.unwrap());
        tokio::fs::write(dir.path().join("progress"), b"50%")
            .await
            .unwrap();
        job.note_progress(job.get_progress().await.unwrap());

        assert_eq!(*seen.lock().unwrap(), vec!["25%".to_string(), "50%".to_string()]);
    }

    #[tokio::test]
    async fn panicking_handler_is_caught_and_does_not_stop_other_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let job = test_job(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        job.on(EVENT_CHANGE_STATUS, Box::new(|_| panic!("boom")));
        let calls_clone = calls.clone();
        job.on(
            EVENT_CHANGE_STATUS,
            Box::new(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        job.note_status(Some(StatusToken::Running));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_output_reads_every_file_under_output_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let job = test_job(dir.path());
        tokio::fs::create_dir_all(dir.path().join("output"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("output/args"), b"[\"hello\"]")
            .await
            .unwrap();
        let output = job.get_output().await.unwrap();
        assert_eq!(output.get_filenames(), vec!["output/args".to_string()]);
        assert_eq!(output.get("output/args"), Some(b"[\"hello\"]".as_slice()));
    }
}
