//! `WorkerInfo`: what a [`crate::envelope::Envelope`]'s `func_id` resolves to.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Keys the container runtime is expected to recognize (§6). Anything else in
/// `runtime_config` is forwarded to the runtime as-is.
pub const RUNTIME_CONFIG_ENVIRONMENT_KEY: &str = "environment";

/// A passthrough bag of launch options for the container runtime. Only a handful of
/// keys are interpreted here; everything else rides along uninterpreted.
pub type RuntimeConfig = HashMap<String, serde_json::Value>;

/// Returns the `environment` entry of a [`RuntimeConfig`], if present and well-formed.
pub fn runtime_config_environment(config: &RuntimeConfig) -> Option<HashMap<String, String>> {
    let value = config.get(RUNTIME_CONFIG_ENVIRONMENT_KEY)?;
    let map = value.as_object()?;
    let mut env = HashMap::with_capacity(map.len());
    for (k, v) in map {
        env.insert(k.clone(), v.as_str()?.to_owned());
    }
    Some(env)
}

/// The image and entry-point a resolver hands the dispatcher for a given `func_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub image_id: String,
    pub entry_point: Vec<String>,
    #[serde(default)]
    pub runtime_config: Option<RuntimeConfig>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl WorkerInfo {
    pub fn new(image_id: impl Into<String>, entry_point: Vec<String>) -> Self {
        Self {
            image_id: image_id.into(),
            entry_point,
            runtime_config: None,
            tags: Vec::new(),
        }
    }

    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = Some(config);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// The argv the container runtime should launch: the entry point, plus the job
    /// prefix URI as the final argument.
    pub fn command_line(&self, prefix_uri: &str) -> Vec<String> {
        let mut argv = self.entry_point.clone();
        argv.push(prefix_uri.to_owned());
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn command_line_appends_prefix_uri() {
        let info = WorkerInfo::new("123.dkr.ecr.us-east-1.amazonaws.com/echo:latest", vec!["python".into(), "-m".into(), "echo_worker".into()]);
        assert_eq!(
            info.command_line("s3://bucket/2024-01-01T00:00:00Z-test.echo-abcd"),
            vec!["python", "-m", "echo_worker", "s3://bucket/2024-01-01T00:00:00Z-test.echo-abcd"]
        );
    }

    #[test]
    fn extracts_environment_from_runtime_config() {
        let config: RuntimeConfig = serde_json::from_value(serde_json::json!({
            "environment": {"FOO": "bar"},
            "memory_limit": 536870912i64,
        }))
        .unwrap();
        assert_eq!(
            runtime_config_environment(&config),
            Some(hashmap! { "FOO".to_string() => "bar".to_string() })
        );
    }

    #[test]
    fn missing_environment_key_is_none() {
        let config: RuntimeConfig = hashmap! {};
        assert_eq!(runtime_config_environment(&config), None);
    }
}
