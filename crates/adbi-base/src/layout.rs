//! Canonical file names under a job prefix (§3).

/// `args` — UTF-8 JSON array of strings (optional).
pub const PATH_ARGS: &str = "args";
/// `stdin` — raw bytes (optional).
pub const PATH_STDIN: &str = "stdin";
/// `progress` — latest single-line progress message (overwritten).
pub const PATH_PROGRESS: &str = "progress";
/// `progress_log` — UTF-8 JSON array of `{time, message}`.
pub const PATH_PROGRESS_LOG: &str = "progress_log";
/// `status` — one of the [`crate::status::StatusToken`] tokens.
pub const PATH_STATUS: &str = "status";

/// `input/` — prefix under which client-supplied input files live.
pub const INPUT_PREFIX: &str = "input/";
/// `output/` — prefix under which worker-produced outputs live.
pub const OUTPUT_PREFIX: &str = "output/";
/// `output/__error__.txt` — written by `error()` in addition to any caller-supplied outputs.
pub const ERROR_OUTPUT_PATH: &str = "output/__error__.txt";

pub fn input_path(relpath: &str) -> String {
    format!("{INPUT_PREFIX}{}", strip_leading_slash(relpath))
}

pub fn output_path(relpath: &str) -> String {
    format!("{OUTPUT_PREFIX}{}", strip_leading_slash(relpath))
}

/// `run-<k>/` — the per-attempt audit trail directory the dispatcher writes.
pub fn run_dir(attempt: u32) -> String {
    format!("run-{attempt}")
}

pub fn run_path(attempt: u32, file: &str) -> String {
    format!("{}/{file}", run_dir(attempt))
}

fn strip_leading_slash(relpath: &str) -> &str {
    relpath.strip_prefix('/').unwrap_or(relpath)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_and_output_paths_strip_leading_slash() {
        assert_eq!(input_path("a.txt"), "input/a.txt");
        assert_eq!(input_path("/a.txt"), "input/a.txt");
        assert_eq!(output_path("nested/b.txt"), "output/nested/b.txt");
    }

    #[test]
    fn run_paths() {
        assert_eq!(run_dir(1), "run-1");
        assert_eq!(run_path(2, "stdout"), "run-2/stdout");
    }
}
