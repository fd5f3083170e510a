//! `WorkerResolver`: the pure mapping from a `func_id` to the [`WorkerInfo`] the
//! dispatcher needs to launch a container for it (§4.4).
//!
//! Returning [`None`] means "not my work": the dispatcher must return the message to
//! the queue rather than treat it as a resolution failure.

use adbi_base::WorkerInfo;
use async_trait::async_trait;

#[async_trait]
pub trait WorkerResolver: Send + Sync {
    async fn resolve(&self, func_id: &str) -> Option<WorkerInfo>;
}

/// The reference resolver: every `func_id` maps to the same fixed [`WorkerInfo`],
/// matching the `<image_id> <entry_point...>` dispatcher CLI surface (§6).
pub struct ConstantResolver {
    worker_info: WorkerInfo,
}

impl ConstantResolver {
    pub fn new(worker_info: WorkerInfo) -> Self {
        Self { worker_info }
    }
}

#[async_trait]
impl WorkerResolver for ConstantResolver {
    async fn resolve(&self, _func_id: &str) -> Option<WorkerInfo> {
        Some(self.worker_info.clone())
    }
}

/// A resolver that never resolves, for exercising the dispatcher's resolver-miss path
/// (§8 "Unknown func_id").
pub struct NoneResolver;

#[async_trait]
impl WorkerResolver for NoneResolver {
    async fn resolve(&self, _func_id: &str) -> Option<WorkerInfo> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn constant_resolver_ignores_func_id() {
        let info = WorkerInfo::new("echo:latest", vec!["echo-worker".into()]);
        let resolver = ConstantResolver::new(info.clone());
        assert_eq!(resolver.resolve("test.echo").await, Some(info.clone()));
        assert_eq!(resolver.resolve("anything.else").await, Some(info));
    }

    #[tokio::test]
    async fn none_resolver_always_misses() {
        let resolver = NoneResolver;
        assert_eq!(resolver.resolve("no.such").await, None);
    }
}
