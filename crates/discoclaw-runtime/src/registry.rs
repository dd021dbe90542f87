//! Runtime registry — name -> adapter, each wrapped by a shared concurrency limiter.
//!
//! Read-only after startup except for model-tier overrides.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use discoclaw_core::config::RuntimeId;
use tracing::instrument;

use crate::adapter::{EventStream, RuntimeAdapter};
use crate::event::InvokeParams;
use crate::limiter::ConcurrencyLimiter;

struct Entry {
    adapter: Arc<dyn RuntimeAdapter>,
    limiter: ConcurrencyLimiter,
}

pub struct RuntimeRegistry {
    entries: HashMap<RuntimeId, Entry>,
    /// Model-tier overrides: `(runtime, tier)` -> concrete model id.
    tier_overrides: RwLock<HashMap<(RuntimeId, String), String>>,
    primary: RuntimeId,
}

pub struct RuntimeRegistryBuilder {
    entries: HashMap<RuntimeId, Entry>,
}

impl Default for RuntimeRegistryBuilder {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl RuntimeRegistryBuilder {
    pub fn register(
        mut self,
        adapter: Arc<dyn RuntimeAdapter>,
        max_concurrent_invocations: usize,
    ) -> Self {
        let id = adapter.id();
        self.entries.insert(
            id,
            Entry {
                adapter,
                limiter: ConcurrencyLimiter::new(max_concurrent_invocations),
            },
        );
        self
    }

    pub fn build(self, primary: RuntimeId) -> RuntimeRegistry {
        RuntimeRegistry {
            entries: self.entries,
            tier_overrides: RwLock::new(HashMap::new()),
            primary,
        }
    }
}

impl RuntimeRegistry {
    pub fn builder() -> RuntimeRegistryBuilder {
        RuntimeRegistryBuilder::default()
    }

    pub fn primary(&self) -> RuntimeId {
        self.primary
    }

    pub fn get(&self, id: RuntimeId) -> Option<Arc<dyn RuntimeAdapter>> {
        self.entries.get(&id).map(|e| Arc::clone(&e.adapter))
    }

    /// Override a model tier for a given runtime (e.g. after an operator reconfigures
    /// which concrete model "capable" resolves to).
    pub fn set_tier_override(&self, runtime: RuntimeId, tier: &str, model: String) {
        self.tier_overrides
            .write()
            .expect("tier override lock poisoned")
            .insert((runtime, tier.to_string()), model);
    }

    fn resolve_model(&self, runtime: RuntimeId, model: &str) -> String {
        if let Some(m) = self
            .tier_overrides
            .read()
            .expect("tier override lock poisoned")
            .get(&(runtime, model.to_string()))
        {
            return m.clone();
        }
        self.entries
            .get(&runtime)
            .map(|e| e.adapter.resolve_model(model))
            .unwrap_or_else(|| model.to_string())
    }

    /// Run one invocation against `runtime`, waiting on its concurrency limiter first.
    #[instrument(skip(self, params), fields(runtime = %runtime, session_key = %params.session_key))]
    pub async fn invoke(
        &self,
        runtime: RuntimeId,
        mut params: InvokeParams,
    ) -> Result<EventStream, crate::error::RuntimeError> {
        let entry = self
            .entries
            .get(&runtime)
            .ok_or_else(|| crate::error::RuntimeError::new(format!("unknown runtime: {runtime}")))?;

        params.model = self.resolve_model(runtime, &params.model);

        let _permit = entry.limiter.acquire().await;
        Ok(entry.adapter.invoke(params).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Capability;
    use crate::event::EngineEvent;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct EchoAdapter;

    #[async_trait]
    impl RuntimeAdapter for EchoAdapter {
        fn id(&self) -> RuntimeId {
            RuntimeId::Claude
        }
        fn capabilities(&self) -> HashSet<Capability> {
            HashSet::new()
        }
        fn resolve_model(&self, model: &str) -> String {
            match model {
                "fast" => "echo-fast".to_string(),
                "capable" => "echo-capable".to_string(),
                other => other.to_string(),
            }
        }
        async fn invoke(&self, _params: InvokeParams) -> EventStream {
            Box::pin(tokio_stream::once(EngineEvent::Done))
        }
    }

    #[tokio::test]
    async fn resolves_tier_then_invokes() {
        let registry = RuntimeRegistry::builder()
            .register(Arc::new(EchoAdapter), 0)
            .build(RuntimeId::Claude);

        let params = InvokeParams::new("hi", "capable", "test:capable:scope");
        let stream = registry.invoke(RuntimeId::Claude, params).await.unwrap();
        use futures_util::StreamExt;
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn tier_override_takes_priority() {
        let registry = RuntimeRegistry::builder()
            .register(Arc::new(EchoAdapter), 0)
            .build(RuntimeId::Claude);
        registry.set_tier_override(RuntimeId::Claude, "capable", "overridden".into());
        assert_eq!(
            registry.resolve_model(RuntimeId::Claude, "capable"),
            "overridden"
        );
    }

    #[tokio::test]
    async fn unknown_runtime_errors() {
        let registry = RuntimeRegistry::builder().build(RuntimeId::Claude);
        let params = InvokeParams::new("hi", "capable", "k");
        assert!(registry.invoke(RuntimeId::Openai, params).await.is_err());
    }
}
