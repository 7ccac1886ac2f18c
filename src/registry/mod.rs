//! Connection registry
//!
//! Owns one live executor per connection id. Cached executors are checkd with
//! `echo 1` on every lookup; a failed check (or a changed descriptor) evicts
//! the old executor and builds a fresh one. There is no background heartbeat.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{ConnectionDescriptor, Target};
use crate::error::Result;
use crate::executor::{
    BackendExecutor, ContainerApiExecutor, ContainerExecutor, DistroExecutor, ExecutorOptions, LocalExecutor,
    PodExecutor, RemoteShellExecutor,
};

/// Command used to check that a cached session still answers.
pub const LIVENESS_CHECK: &str = "echo 1";

/// Builds executors from descriptors.
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    async fn create(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn BackendExecutor>>;
}

/// Factory that builds the executor variant matching the descriptor's kind.
#[derive(Debug, Clone, Default)]
pub struct DefaultExecutorFactory {
    options: ExecutorOptions,
}

impl DefaultExecutorFactory {
    pub fn new(options: ExecutorOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ExecutorFactory for DefaultExecutorFactory {
    async fn create(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn BackendExecutor>> {
        let options = self.options.clone();
        let executor: Arc<dyn BackendExecutor> = match &descriptor.target {
            Target::Local => Arc::new(LocalExecutor::new(options)),
            Target::RemoteShell(t) => Arc::new(RemoteShellExecutor::connect(t.clone(), options).await?),
            Target::Container(t) => Arc::new(ContainerExecutor::connect(t.clone(), options).await?),
            Target::ContainerApi(t) => Arc::new(ContainerApiExecutor::new(t.clone(), options)?),
            Target::Pod(t) => Arc::new(PodExecutor::new(t.clone(), options)),
            Target::Distro(t) => Arc::new(DistroExecutor::new(t.clone(), options)),
        };
        Ok(executor)
    }
}

struct Entry {
    descriptor: ConnectionDescriptor,
    executor: Arc<dyn BackendExecutor>,
}

/// Executor cache keyed by connection id.
pub struct ConnectionRegistry {
    factory: Arc<dyn ExecutorFactory>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ConnectionRegistry {
    pub fn new(factory: Arc<dyn ExecutorFactory>) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registry using `DefaultExecutorFactory` with the given options.
    pub fn with_options(options: ExecutorOptions) -> Self {
        Self::new(Arc::new(DefaultExecutorFactory::new(options)))
    }

    /// Return a live executor for `descriptor`, reusing the cached one when it
    /// still answers the liveness check.
    pub async fn get_executor(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn BackendExecutor>> {
        let cached = {
            let entries = self.entries.lock().await;
            entries
                .get(&descriptor.id)
                .map(|e| (e.descriptor == *descriptor, e.executor.clone()))
        };

        if let Some((same_descriptor, executor)) = cached {
            if same_descriptor && Self::is_alive(&executor).await {
                log::debug!("reusing connection {}", descriptor.id);
                return Ok(executor);
            }
            if same_descriptor {
                log::warn!("connection {} failed liveness check, reconnecting", descriptor.id);
            } else {
                log::info!("connection {} descriptor changed, reconnecting", descriptor.id);
            }
            self.evict(&descriptor.id, &executor).await;
        }

        log::info!("opening {} connection {}", descriptor.kind(), descriptor.id);
        let executor = self.factory.create(descriptor).await?;
        self.entries.lock().await.insert(
            descriptor.id.clone(),
            Entry {
                descriptor: descriptor.clone(),
                executor: executor.clone(),
            },
        );
        Ok(executor)
    }

    async fn is_alive(executor: &Arc<dyn BackendExecutor>) -> bool {
        match executor.execute(LIVENESS_CHECK).await {
            Ok(log) => log.is_success(),
            Err(e) => {
                log::debug!("liveness check raised: {}", e);
                false
            }
        }
    }

    /// Remove `stale` from the cache (unless already replaced) and release it.
    async fn evict(&self, id: &str, stale: &Arc<dyn BackendExecutor>) {
        {
            let mut entries = self.entries.lock().await;
            if entries.get(id).is_some_and(|e| Arc::ptr_eq(&e.executor, stale)) {
                entries.remove(id);
            }
        }
        stale.disconnect().await;
    }

    /// Disconnect and forget one connection. Returns whether it was cached.
    pub async fn disconnect(&self, id: &str) -> bool {
        let removed = self.entries.lock().await.remove(id);
        match removed {
            Some(entry) => {
                log::info!("disconnecting {}", id);
                entry.executor.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Disconnect and forget every cached connection.
    pub async fn disconnect_all(&self) {
        let drained: Vec<(String, Entry)> = self.entries.lock().await.drain().collect();
        for (id, entry) in drained {
            log::info!("disconnecting {}", id);
            entry.executor.disconnect().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    /// Cached connection ids, sorted.
    pub async fn connection_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::with_options(ExecutorOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConnectionKind, ExecutionLog};
    use crate::error::PilotError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Executor whose liveness can be toggled from the test.
    struct ToggleExecutor {
        alive: Arc<AtomicBool>,
        disconnects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BackendExecutor for ToggleExecutor {
        fn kind(&self) -> ConnectionKind {
            ConnectionKind::Local
        }

        async fn execute(&self, command: &str) -> Result<ExecutionLog> {
            if self.alive.load(Ordering::SeqCst) {
                Ok(ExecutionLog::completed(command, "1\n", 0))
            } else {
                Ok(ExecutionLog::failed(command, "Connection lost", 255))
            }
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        alive: Arc<AtomicBool>,
        disconnects: Arc<AtomicUsize>,
        fail: AtomicBool,
    }

    impl CountingFactory {
        fn new() -> Arc<Self> {
            let factory = Self::default();
            factory.alive.store(true, Ordering::SeqCst);
            Arc::new(factory)
        }
    }

    #[async_trait]
    impl ExecutorFactory for CountingFactory {
        async fn create(&self, _descriptor: &ConnectionDescriptor) -> Result<Arc<dyn BackendExecutor>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PilotError::Connection("authentication failed".to_string()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            self.alive.store(true, Ordering::SeqCst);
            Ok(Arc::new(ToggleExecutor {
                alive: self.alive.clone(),
                disconnects: self.disconnects.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn test_live_executor_is_reused() {
        let factory = CountingFactory::new();
        let registry = ConnectionRegistry::new(factory.clone());
        let desc = ConnectionDescriptor::local("box");

        let a = registry.get_executor(&desc).await.unwrap();
        let b = registry.get_executor(&desc).await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_dead_executor_is_replaced_once() {
        let factory = CountingFactory::new();
        let registry = ConnectionRegistry::new(factory.clone());
        let desc = ConnectionDescriptor::local("box");

        let first = registry.get_executor(&desc).await.unwrap();
        factory.alive.store(false, Ordering::SeqCst);
        let second = registry.get_executor(&desc).await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(factory.disconnects.load(Ordering::SeqCst), 1);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_changed_descriptor_reconnects() {
        let factory = CountingFactory::new();
        let registry = ConnectionRegistry::new(factory.clone());

        registry.get_executor(&ConnectionDescriptor::local("box")).await.unwrap();
        let changed = ConnectionDescriptor::new(
            "box",
            Target::Pod(crate::domain::PodTarget {
                pod: "api".to_string(),
                namespace: "default".to_string(),
                container: None,
                context: None,
                kubeconfig: None,
            }),
        );
        registry.get_executor(&changed).await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_factory_failure_propagates_and_caches_nothing() {
        let factory = CountingFactory::new();
        factory.fail.store(true, Ordering::SeqCst);
        let registry = ConnectionRegistry::new(factory.clone());

        let result = registry.get_executor(&ConnectionDescriptor::local("box")).await;
        assert!(matches!(result, Err(PilotError::Connection(_))));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_disconnect_and_disconnect_all() {
        let factory = CountingFactory::new();
        let registry = ConnectionRegistry::new(factory.clone());
        registry.get_executor(&ConnectionDescriptor::local("a")).await.unwrap();
        registry.get_executor(&ConnectionDescriptor::local("b")).await.unwrap();
        registry.get_executor(&ConnectionDescriptor::local("c")).await.unwrap();
        assert_eq!(registry.connection_ids().await, vec!["a", "b", "c"]);

        assert!(registry.disconnect("b").await);
        assert!(!registry.disconnect("b").await);
        assert!(!registry.contains("b").await);

        registry.disconnect_all().await;
        assert!(registry.is_empty().await);
        assert_eq!(factory.disconnects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_default_factory_builds_local() {
        let factory = DefaultExecutorFactory::default();
        let exec = factory.create(&ConnectionDescriptor::local("host")).await.unwrap();
        assert_eq!(exec.kind(), ConnectionKind::Local);
        let log = exec.execute(LIVENESS_CHECK).await.unwrap();
        assert!(log.is_success());
    }
}
