//! The dispatcher: receive loop, resolve, bounded worker pool, container lifecycle,
//! cleanup, retry, and status reporting (§4.5, §5, §7, §8). This is the hardest
//! component (§2) and the one with the most direct counterpart in
//! `spr_adbi/dispatcher/{adbi_dispatcher,worker_manager}.py`.

pub mod config;

use adbi_base::layout;
use adbi_base::{Envelope, RuntimeConfig, StatusToken, WorkerInfo};
use adbi_container::ContainerManager;
use adbi_resolver::WorkerResolver;
use adbi_util::blob::{BlobIo, BlobIoExt as _};
use adbi_util::queue::{self, QueueHandle, QueueIo};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub use config::DispatcherConfig;

/// How long a resolver miss waits before the dispatcher tries receiving again,
/// matching `sleep(5)` in `spr_adbi/dispatcher/adbi_dispatcher.py`'s `watch` loop.
const RESOLVER_MISS_BACKOFF: Duration = Duration::from_secs(5);
/// How long an empty receive waits before polling again.
const EMPTY_RECEIVE_BACKOFF: Duration = Duration::from_millis(200);

pub struct Dispatcher {
    queue: Arc<dyn QueueIo>,
    resolver: Arc<dyn WorkerResolver>,
    container: Arc<dyn ContainerManager>,
    pool: Arc<Semaphore>,
    max_retry: u32,
    logger: slog::Logger,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn QueueIo>,
        resolver: Arc<dyn WorkerResolver>,
        container: Arc<dyn ContainerManager>,
        max_worker: u32,
        max_retry: u32,
        logger: slog::Logger,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            resolver,
            container,
            pool: Arc::new(Semaphore::new(max_worker as usize)),
            max_retry,
            logger,
        })
    }

    pub async fn from_config(
        config: &DispatcherConfig,
        resolver: Arc<dyn WorkerResolver>,
        container: Arc<dyn ContainerManager>,
        logger: slog::Logger,
    ) -> anyhow::Result<Arc<Self>> {
        let queue = queue::open(&config.base_dir, &config.queue_name).await?;
        Ok(Self::new(queue, resolver, container, config.max_worker, 1, logger))
    }

    /// Runs the receive loop until `shutdown` resolves. The receive path is itself
    /// dispatched onto the pool before being awaited, so pool capacity gates the
    /// receive rate: a message this process can't yet afford to handle is returned
    /// to the queue immediately (`change_visibility(0)`) rather than held.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) -> anyhow::Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let permit = tokio::select! {
                permit = self.pool.clone().acquire_owned() => permit.expect("pool semaphore is never closed"),
                _ = shutdown.changed() => continue,
            };

            let handles = self.queue.receive().await?;
            if handles.is_empty() {
                drop(permit);
                tokio::time::sleep(EMPTY_RECEIVE_BACKOFF).await;
                continue;
            }

            let mut handles = handles.into_iter();
            let first = handles.next().expect("checked non-empty above");
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.handle_message(first).await;
                drop(permit);
            });

            for handle in handles {
                match self.pool.clone().try_acquire_owned() {
                    Ok(permit) => {
                        let dispatcher = self.clone();
                        tokio::spawn(async move {
                            dispatcher.handle_message(handle).await;
                            drop(permit);
                        });
                    }
                    Err(_) => {
                        if let Err(e) = handle.change_visibility(0).await {
                            slog::warn!(self.logger, "failed to return overflow message to queue"; "error" => %e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&self, handle: Box<dyn QueueHandle>) {
        let envelope = match Envelope::parse(handle.body()) {
            Ok(envelope) => envelope,
            Err(e) => {
                slog::warn!(self.logger, "dropping malformed envelope"; "error" => %e);
                if let Err(e) = handle.delete().await {
                    slog::warn!(self.logger, "failed to delete malformed envelope"; "error" => %e);
                }
                return;
            }
        };

        let Some(worker_info) = self.resolver.resolve(envelope.func_id()).await else {
            slog::info!(self.logger, "resolver miss, returning to queue"; "func_id" => envelope.func_id());
            if let Err(e) = handle.change_visibility(0).await {
                slog::warn!(self.logger, "failed to return unresolved message to queue"; "error" => %e);
            }
            tokio::time::sleep(RESOLVER_MISS_BACKOFF).await;
            return;
        };

        if let Err(e) = self.run_job(&envelope, &worker_info, handle.as_ref()).await {
            slog::error!(
                self.logger,
                "job failed";
                "func_id" => envelope.func_id(),
                "prefix_uri" => envelope.prefix_uri(),
                "error" => format!("{e:#}"),
            );
        }
    }

    /// Runs one job end to end: `WILL_DEQUEUE` -> delete queue message -> `DEQUEUED` ->
    /// login/pull -> attempt loop.
    async fn run_job(
        &self,
        envelope: &Envelope,
        worker_info: &WorkerInfo,
        handle: &dyn QueueHandle,
    ) -> anyhow::Result<()> {
        let blob = adbi_util::blob::open(envelope.prefix_uri()).await?;

        blob.write(layout::PATH_STATUS, StatusToken::WillDequeue.as_bytes())
            .await?;
        handle.delete().await?;
        blob.write(layout::PATH_STATUS, StatusToken::Dequeued.as_bytes())
            .await?;
        slog::info!(self.logger, "dequeued job"; "func_id" => envelope.func_id(), "prefix_uri" => envelope.prefix_uri());

        if let Err(e) = self.container.login_registry(&worker_info.image_id).await {
            return self.fail_whole_job(&blob, "registry login failed", e).await;
        }
        if let Err(e) = self.container.pull(&worker_info.image_id).await {
            return self.fail_whole_job(&blob, "image pull failed", e).await;
        }

        let argv = worker_info.command_line(envelope.prefix_uri());
        let runtime_config = worker_info.runtime_config.as_ref();

        for attempt in 1..=self.max_retry.max(1) {
            if attempt > 1 {
                slog::info!(self.logger, "retrying worker"; "attempt" => attempt);
            }
            self.cleanup_workspace(&blob).await?;

            blob.write(layout::PATH_STATUS, StatusToken::Running.as_bytes())
                .await?;
            let success = self
                .run_attempt(&blob, attempt, &worker_info.image_id, &argv, runtime_config)
                .await?;

            if success {
                slog::info!(self.logger, "job succeeded"; "prefix_uri" => envelope.prefix_uri());
                return Ok(());
            }
            blob.write(layout::PATH_STATUS, StatusToken::Error.as_bytes())
                .await?;
        }

        slog::warn!(self.logger, "job exhausted retries"; "prefix_uri" => envelope.prefix_uri(), "max_retry" => self.max_retry);
        Ok(())
    }

    async fn fail_whole_job(
        &self,
        blob: &Arc<dyn BlobIo>,
        context: &str,
        error: adbi_container::ContainerError,
    ) -> anyhow::Result<()> {
        slog::error!(self.logger, "{}", context; "error" => %error);
        blob.write(layout::PATH_STATUS, StatusToken::Error.as_bytes())
            .await?;
        blob.write(layout::ERROR_OUTPUT_PATH, format!("{context}: {error}").as_bytes())
            .await?;
        Err(anyhow::anyhow!("{context}: {error}"))
    }

    /// Runs one container attempt and records its audit trail under `run-<attempt>/`
    /// (§3, §8 scenario 5). The copied `status` reflects whatever the worker itself
    /// wrote inside the container by the time `run` returns, matching
    /// `WorkerManager.start_worker`'s `io_client.write(f"{log_dir}/status", ...)`.
    async fn run_attempt(
        &self,
        blob: &Arc<dyn BlobIo>,
        attempt: u32,
        image_id: &str,
        argv: &[String],
        runtime_config: Option<&RuntimeConfig>,
    ) -> anyhow::Result<bool> {
        let start = Utc::now();
        blob.write(&layout::run_path(attempt, "start_time"), start.to_rfc3339().as_bytes())
            .await?;

        let outcome = self.container.run(image_id, argv, runtime_config).await;
        let end = Utc::now();

        if !outcome.stderr.is_empty() {
            slog::warn!(self.logger, "container stderr"; "attempt" => attempt, "stderr" => String::from_utf8_lossy(&outcome.stderr).into_owned());
        }

        blob.write(&layout::run_path(attempt, "stdout"), &outcome.stdout).await?;
        blob.write(&layout::run_path(attempt, "stderr"), &outcome.stderr).await?;
        blob.write(&layout::run_path(attempt, "end_time"), end.to_rfc3339().as_bytes())
            .await?;

        let current_status = blob.read(layout::PATH_STATUS).await?.unwrap_or_default();
        blob.write(&layout::run_path(attempt, "status"), &current_status).await?;

        Ok(outcome.ok)
    }

    /// Deletes `progress` and everything under `output/`; leaves `args`, `stdin`, and
    /// `input/` untouched.
    async fn cleanup_workspace(&self, blob: &Arc<dyn BlobIo>) -> anyhow::Result<()> {
        blob.delete(layout::PATH_PROGRESS).await?;
        for path in blob.list_outputs().await? {
            blob.delete(&path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adbi_container::RunOutcome;
    use adbi_resolver::{ConstantResolver, NoneResolver};
    use adbi_util::blob::LocalBlobIo;
    use adbi_util::queue::LocalQueueIo;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    /// A `ContainerManager` whose `run` outcome is scripted per call, for exercising
    /// retry behavior without a real container runtime.
    struct ScriptedContainer {
        outcomes: Mutex<Vec<RunOutcome>>,
        calls: AtomicU32,
    }

    impl ScriptedContainer {
        fn new(outcomes: Vec<RunOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ContainerManager for ScriptedContainer {
        async fn login_registry(&self, _image_id: &str) -> Result<(), adbi_container::ContainerError> {
            Ok(())
        }

        async fn pull(&self, _image_id: &str) -> Result<(), adbi_container::ContainerError> {
            Ok(())
        }

        async fn run(&self, _image_id: &str, _argv: &[String], _runtime_config: Option<&RuntimeConfig>) -> RunOutcome {
            let index = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let mut outcomes = self.outcomes.lock().unwrap();
            if index < outcomes.len() {
                outcomes[index].clone()
            } else {
                outcomes.last().cloned().unwrap_or(RunOutcome {
                    ok: false,
                    stdout: Vec::new(),
                    stderr: b"no more scripted outcomes".to_vec(),
                })
            }
        }
    }

    async fn enqueue(queue: &LocalQueueIo, dir: &std::path::Path, func_id: &str) -> String {
        let prefix_uri = dir.join("job").to_str().unwrap().to_owned();
        let envelope = Envelope::new(func_id, prefix_uri.clone());
        queue.send(&envelope.to_json_bytes(), "pid", "pid").await.unwrap();
        prefix_uri
    }

    #[tokio::test]
    async fn malformed_envelope_is_deleted_and_dispatcher_continues() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join(".queue/test");
        let queue = LocalQueueIo::new(queue_dir.clone());
        queue.send(b"\"not-a-list\"", "g", "d").await.unwrap();

        let dispatcher = Dispatcher::new(
            Arc::new(LocalQueueIo::new(queue_dir.clone())),
            Arc::new(NoneResolver),
            Arc::new(ScriptedContainer::new(vec![])),
            4,
            1,
            logger(),
        );

        let handles = dispatcher.queue.receive().await.unwrap();
        assert_eq!(handles.len(), 1);
        dispatcher.handle_message(handles.into_iter().next().unwrap()).await;

        let remaining = LocalQueueIo::new(queue_dir).receive().await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn resolver_miss_returns_message_to_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join(".queue/test");
        let queue = LocalQueueIo::new(queue_dir.clone());
        enqueue(&queue, dir.path(), "no.such").await;

        let dispatcher = Dispatcher::new(
            Arc::new(LocalQueueIo::new(queue_dir.clone())),
            Arc::new(NoneResolver),
            Arc::new(ScriptedContainer::new(vec![])),
            4,
            1,
            logger(),
        );
        let handles = dispatcher.queue.receive().await.unwrap();
        assert_eq!(handles.len(), 1);
        dispatcher.handle_message(handles.into_iter().next().unwrap()).await;

        let remaining = LocalQueueIo::new(queue_dir).receive().await.unwrap();
        assert_eq!(remaining.len(), 1, "message must still be on the queue");
    }

    #[tokio::test]
    async fn successful_job_writes_dequeued_then_running_then_deletes_message() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join(".queue/test");
        let queue = LocalQueueIo::new(queue_dir.clone());
        let prefix_uri = enqueue(&queue, dir.path(), "test.echo").await;
        tokio::fs::create_dir_all(&prefix_uri).await.unwrap();

        let worker_info = WorkerInfo::new("echo:latest", vec!["true".into()]);
        let dispatcher = Dispatcher::new(
            Arc::new(LocalQueueIo::new(queue_dir.clone())),
            Arc::new(ConstantResolver::new(worker_info)),
            Arc::new(ScriptedContainer::new(vec![RunOutcome {
                ok: true,
                stdout: b"hi".to_vec(),
                stderr: Vec::new(),
            }])),
            4,
            1,
            logger(),
        );
        let handles = dispatcher.queue.receive().await.unwrap();
        dispatcher.handle_message(handles.into_iter().next().unwrap()).await;

        let blob = LocalBlobIo::new(std::path::PathBuf::from(&prefix_uri));
        let status = blob.read("status").await.unwrap().unwrap();
        assert_eq!(status, StatusToken::Running.as_bytes());
        let run1_stdout = blob.read("run-1/stdout").await.unwrap().unwrap();
        assert_eq!(run1_stdout, b"hi");

        let remaining = LocalQueueIo::new(queue_dir).receive().await.unwrap();
        assert!(remaining.is_empty(), "message must be deleted once dequeued");
    }

    #[tokio::test]
    async fn retries_after_a_failed_attempt_and_succeeds_on_the_second() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join(".queue/test");
        let queue = LocalQueueIo::new(queue_dir.clone());
        let prefix_uri = enqueue(&queue, dir.path(), "test.echo").await;
        tokio::fs::create_dir_all(&prefix_uri).await.unwrap();
        tokio::fs::write(std::path::Path::new(&prefix_uri).join("status"), b"")
            .await
            .unwrap();

        let worker_info = WorkerInfo::new("echo:latest", vec!["true".into()]);
        let dispatcher = Dispatcher::new(
            Arc::new(LocalQueueIo::new(queue_dir.clone())),
            Arc::new(ConstantResolver::new(worker_info)),
            Arc::new(ScriptedContainer::new(vec![
                RunOutcome {
                    ok: false,
                    stdout: Vec::new(),
                    stderr: b"boom".to_vec(),
                },
                RunOutcome {
                    ok: true,
                    stdout: b"done".to_vec(),
                    stderr: Vec::new(),
                },
            ])),
            4,
            2,
            logger(),
        );
        let handles = dispatcher.queue.receive().await.unwrap();
        dispatcher.handle_message(handles.into_iter().next().unwrap()).await;

        let blob = LocalBlobIo::new(std::path::PathBuf::from(&prefix_uri));
        assert_eq!(
            blob.read("run-1/status").await.unwrap().unwrap(),
            StatusToken::Error.as_bytes()
        );
        assert_eq!(blob.read("status").await.unwrap().unwrap(), StatusToken::Running.as_bytes());
    }

    #[tokio::test]
    async fn cleanup_workspace_clears_progress_and_output_but_keeps_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let blob: Arc<dyn BlobIo> = Arc::new(LocalBlobIo::new(dir.path().to_owned()));
        blob.write("progress", b"50%").await.unwrap();
        blob.write("output/a.txt", b"data").await.unwrap();
        blob.write("args", br#"["x"]"#).await.unwrap();
        blob.write("input/a.txt", b"in").await.unwrap();

        let dispatcher = Dispatcher::new(
            Arc::new(LocalQueueIo::new(dir.path().join(".queue/test"))),
            Arc::new(NoneResolver),
            Arc::new(ScriptedContainer::new(vec![])),
            4,
            1,
            logger(),
        );
        dispatcher.cleanup_workspace(&blob).await.unwrap();

        assert_eq!(blob.read("progress").await.unwrap(), None);
        assert_eq!(blob.read("output/a.txt").await.unwrap(), None);
        assert_eq!(blob.read("args").await.unwrap(), Some(br#"["x"]"#.to_vec()));
        assert_eq!(blob.read("input/a.txt").await.unwrap(), Some(b"in".to_vec()));
    }
}
