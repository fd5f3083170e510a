//! Environment-variable configuration for the dispatcher (§6).

use adbi_util::config::{ConfigError, EnvLoader};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Selects the queue backend the same way [`adbi_client::ClientConfig`] does;
    /// unset means local/test mode rooted at the current directory.
    pub base_dir: String,
    pub queue_name: String,
    pub max_worker: u32,
    pub ecr_account_ids: Vec<String>,
}

impl DispatcherConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut loader = EnvLoader::new();
        let queue_name = loader.require("ADBI_SQS_NAME");
        let max_worker: u32 = loader.optional_parsed("ADBI_MAX_WORKER", 4);
        if max_worker < 1 {
            loader.reject("ADBI_MAX_WORKER must be at least 1");
        }
        loader.finish()?;

        let base_dir = std::env::var("ADBI_BASE_DIR").unwrap_or_default();
        let ecr_account_ids = std::env::var("ADBI_ECR_ACCOUNT_IDS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            base_dir: base_dir.trim_end_matches('/').to_owned(),
            queue_name: queue_name.unwrap(),
            max_worker,
            ecr_account_ids,
        })
    }
}
