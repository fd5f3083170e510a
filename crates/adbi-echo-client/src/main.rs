//! Example job-submission CLI: enqueues `test.echo` with a timestamped argument and
//! prints the resulting output, mirroring `examples/echo_client/run.py` (§6).

use adbi_client::{Client, Request, WaitOutcome};
use adbi_util::config::LogLevel;
use anyhow::Context as _;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    let log_level: LogLevel = std::env::var("ADBI_LOG_LEVEL")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();

    adbi_util::log::run_with_logger(log_level, |logger| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start the tokio runtime")?
            .block_on(run(logger))
    })
}

async fn run(logger: slog::Logger) -> anyhow::Result<()> {
    let client = Client::from_env(logger).await?;
    let job = client
        .request(
            "test.echo",
            Request {
                args: Some(vec!["hello".to_owned(), chrono::Utc::now().to_rfc3339()]),
                ..Default::default()
            },
        )
        .await?;

    match job
        .wait(Duration::from_secs(3600), Duration::from_secs(3), true)
        .await?
    {
        WaitOutcome::Success => {
            println!("finish success");
            let output = job.get_output().await?;
            let filenames = output.get_filenames();
            println!("{filenames:?}");
            for filename in filenames {
                println!("{filename}");
                if let Some(bytes) = output.get(&filename) {
                    println!("{}", String::from_utf8_lossy(bytes));
                }
                println!();
            }
        }
        WaitOutcome::Error => println!("finish error"),
        WaitOutcome::Unknown => println!("finish unknown (timed out)"),
    }
    Ok(())
}
