//! Example in-container worker: echoes args, stdin, and every input file back as
//! output, mirroring `examples/echo_worker/src/worker/echo/run.py` (§6).

use adbi_util::config::LogLevel;
use adbi_worker::Worker;
use anyhow::Context as _;
use std::collections::HashMap;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let log_level: LogLevel = std::env::var("ADBI_LOG_LEVEL")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    let argv: Vec<String> = std::env::args().skip(1).collect();

    adbi_util::log::run_with_logger(log_level, |logger| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start the tokio runtime")?
            .block_on(adbi_worker::run_scoped(&argv, logger, echo))
    })
}

async fn echo(worker: Arc<Worker>) -> anyhow::Result<()> {
    let mut outputs: HashMap<String, Vec<u8>> = HashMap::new();
    outputs.insert(
        "args".to_owned(),
        serde_json::to_vec(&worker.args().await?).context("failed to serialize args")?,
    );
    outputs.insert("stdin".to_owned(), worker.stdin().await?);

    for input_name in worker.get_input_filenames().await? {
        let Some(data) = worker.read(&input_name).await? else {
            continue;
        };
        let output_name = input_name.strip_prefix("input/").unwrap_or(&input_name);
        outputs.insert(output_name.to_owned(), data);
    }

    worker.success(Some(outputs), None).await?;
    Ok(())
}
