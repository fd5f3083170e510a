//! Structured logging setup shared by the dispatcher, client, and worker SDK, in the
//! shape of `maelstrom_util::log::run_with_logger`: build a term-decorated async drain
//! at the configured level, hand the caller a [`slog::Logger`], and tear the async
//! worker thread down cleanly when the caller's closure returns.

use crate::config::LogLevel;
use slog::Drain;

/// Runs `f` with a [`slog::Logger`] built at `level`, logging to stderr through
/// `slog-term`'s compact format over `slog-async`'s non-blocking drain. The drain's
/// background thread is joined before this function returns, so no log lines are lost
/// to a process exit racing the async drain.
pub fn run_with_logger<T>(level: LogLevel, f: impl FnOnce(slog::Logger) -> T) -> T {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, level.into()).fuse();
    let (drain, guard) = slog_async::Async::new(drain).build_with_guard();
    let logger = slog::Logger::root(drain.fuse(), slog::o!());
    let result = f(logger);
    drop(guard);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_closure_and_returns_its_value() {
        let value = run_with_logger(LogLevel::Debug, |logger| {
            slog::info!(logger, "test message"; "key" => "value");
            42
        });
        assert_eq!(value, 42);
    }
}
