//! Environment-variable configuration for [`crate::Client`] (§6), following the same
//! combined-error-message shape `adbi_util::config::EnvLoader` gives the dispatcher.

use adbi_util::config::EnvLoader;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_dir: String,
    pub queue_name: String,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, adbi_util::config::ConfigError> {
        let mut loader = EnvLoader::new();
        let base_dir = loader.require("ADBI_BASE_DIR");
        let queue_name = loader.require("ADBI_SQS_NAME");
        loader.finish()?;
        Ok(Self {
            base_dir: base_dir.unwrap().trim_end_matches('/').to_owned(),
            queue_name: queue_name.unwrap(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_both_variables_reports_both() {
        // Avoid colliding with the real env vars by asserting via EnvLoader directly,
        // since ADBI_BASE_DIR/ADBI_SQS_NAME may legitimately be set in CI.
        let mut loader = EnvLoader::new();
        loader.require("ADBI_TEST_CLIENT_CONFIG_BASE_DIR");
        loader.require("ADBI_TEST_CLIENT_CONFIG_QUEUE");
        let err = loader.finish().unwrap_err().to_string();
        assert!(err.contains("ADBI_TEST_CLIENT_CONFIG_BASE_DIR"));
        assert!(err.contains("ADBI_TEST_CLIENT_CONFIG_QUEUE"));
    }
}
