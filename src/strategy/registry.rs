//! Running strategy instances, each with its own cancellation token.

use super::engine::StopReason;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Instance {
    owner: String,
    symbol: String,
    token: CancellationToken,
    handle: JoinHandle<StopReason>,
}

/// Public view of a registered instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub id: String,
    pub owner: String,
    pub symbol: String,
    pub finished: bool,
}

/// Instance id -> task handle and cancellation token.
///
/// Every instance token is a child of the registry's root token, so
/// [`InstanceRegistry::shutdown`] stops all of them at once.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: Mutex<HashMap<String, Instance>>,
    root: CancellationToken,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose instances also stop when `root` is cancelled.
    pub fn with_root(root: CancellationToken) -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            root,
        }
    }

    /// Fresh instance token, cancelled along with the root.
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Spawn an instance. `make` receives the instance's cancellation token.
    ///
    /// Replaces (and cancels) a previous instance registered under the same id.
    pub async fn spawn<F, Fut>(
        &self,
        id: impl Into<String>,
        owner: impl Into<String>,
        symbol: impl Into<String>,
        make: F,
    ) where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = StopReason> + Send + 'static,
    {
        let token = self.child_token();
        let future = make(token.clone());
        self.insert(id, owner, symbol, token, future).await;
    }

    /// Spawn `future` under a token obtained from [`Self::child_token`].
    pub async fn insert<Fut>(
        &self,
        id: impl Into<String>,
        owner: impl Into<String>,
        symbol: impl Into<String>,
        token: CancellationToken,
        future: Fut,
    ) where
        Fut: Future<Output = StopReason> + Send + 'static,
    {
        let id = id.into();
        let handle = tokio::spawn(future);

        let instance = Instance {
            owner: owner.into(),
            symbol: symbol.into(),
            token,
            handle,
        };
        info!(%id, owner = %instance.owner, symbol = %instance.symbol, "Instance spawned");

        if let Some(previous) = self.instances.lock().await.insert(id.clone(), instance) {
            warn!(%id, "Replacing instance with the same id");
            previous.token.cancel();
        }
    }

    /// Cancel one instance. Returns false when the id is unknown.
    pub async fn cancel(&self, id: &str) -> bool {
        match self.instances.lock().await.remove(id) {
            Some(instance) => {
                instance.token.cancel();
                info!(%id, "Instance cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every instance of `owner`, returning their ids.
    pub async fn cancel_owner(&self, owner: &str) -> Vec<String> {
        let mut instances = self.instances.lock().await;
        let ids: Vec<String> = instances
            .iter()
            .filter(|(_, instance)| instance.owner == owner)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            if let Some(instance) = instances.remove(id) {
                instance.token.cancel();
            }
        }

        info!(%owner, count = ids.len(), "Owner instances cancelled");
        ids
    }

    /// Ids of `owner`'s instances, sorted.
    pub async fn list(&self, owner: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .instances
            .lock()
            .await
            .iter()
            .filter(|(_, instance)| instance.owner == owner)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn info(&self, id: &str) -> Option<InstanceInfo> {
        self.instances
            .lock()
            .await
            .get(id)
            .map(|instance| InstanceInfo {
                id: id.to_string(),
                owner: instance.owner.clone(),
                symbol: instance.symbol.clone(),
                finished: instance.handle.is_finished(),
            })
    }

    pub async fn len(&self) -> usize {
        self.instances.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.lock().await.is_empty()
    }

    /// Drop instances whose task has ended, returning their ids.
    pub async fn reap(&self) -> Vec<String> {
        let mut instances = self.instances.lock().await;
        let finished: Vec<String> = instances
            .iter()
            .filter(|(_, instance)| instance.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for id in &finished {
            instances.remove(id);
            debug!(%id, "Reaped finished instance");
        }
        finished
    }

    /// Wait for every registered instance to end on its own.
    pub async fn wait_all(&self) -> Vec<(String, StopReason)> {
        let drained: Vec<(String, Instance)> = self.instances.lock().await.drain().collect();

        let mut results = Vec::with_capacity(drained.len());
        for (id, instance) in drained {
            match instance.handle.await {
                Ok(reason) => results.push((id, reason)),
                Err(e) => warn!(%id, "Instance task failed: {}", e),
            }
        }
        results
    }

    /// Cancel everything and wait (bounded) for the tasks to finish.
    pub async fn shutdown(&self) {
        self.root.cancel();

        let drained: Vec<(String, Instance)> = self.instances.lock().await.drain().collect();
        info!(count = drained.len(), "Shutting down instances");

        for (id, instance) in drained {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, instance.handle).await {
                Ok(Ok(reason)) => debug!(%id, ?reason, "Instance stopped"),
                Ok(Err(e)) => warn!(%id, "Instance task failed: {}", e),
                Err(_) => warn!(%id, "Instance did not stop in time"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    async fn until_cancelled(token: CancellationToken) -> StopReason {
        token.cancelled().await;
        StopReason::Cancelled
    }

    #[tokio::test]
    async fn test_cancel_targets_only_one_instance() {
        let registry = InstanceRegistry::new();
        let stopped_a = Arc::new(AtomicBool::new(false));
        let stopped_b = Arc::new(AtomicBool::new(false));

        for (id, flag) in [("a", stopped_a.clone()), ("b", stopped_b.clone())] {
            registry
                .spawn(id, "alice", "BTC", move |token| async move {
                    token.cancelled().await;
                    flag.store(true, Ordering::SeqCst);
                    StopReason::Cancelled
                })
                .await;
        }

        assert!(registry.cancel("a").await);
        assert!(!registry.cancel("a").await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(stopped_a.load(Ordering::SeqCst));
        assert!(!stopped_b.load(Ordering::SeqCst));
        assert_eq!(registry.list("alice").await, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_owner_and_listing() {
        let registry = InstanceRegistry::new();
        registry.spawn("a2", "alice", "BTC", until_cancelled).await;
        registry.spawn("a1", "alice", "ETH", until_cancelled).await;
        registry.spawn("b1", "bob", "BTC", until_cancelled).await;

        assert_eq!(registry.list("alice").await, vec!["a1", "a2"]);
        assert_eq!(registry.info("b1").await.unwrap().owner, "bob");

        let mut cancelled = registry.cancel_owner("alice").await;
        cancelled.sort();
        assert_eq!(cancelled, vec!["a1", "a2"]);
        assert!(registry.list("alice").await.is_empty());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_reap_removes_finished() {
        let registry = InstanceRegistry::new();
        registry
            .spawn("done", "alice", "BTC", |_| async { StopReason::Completed })
            .await;
        registry.spawn("live", "alice", "BTC", until_cancelled).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(registry.info("done").await.unwrap().finished);
        assert_eq!(registry.reap().await, vec!["done".to_string()]);
        assert_eq!(registry.list("alice").await, vec!["live".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_all() {
        let root = CancellationToken::new();
        let registry = InstanceRegistry::with_root(root.clone());
        registry.spawn("a", "alice", "BTC", until_cancelled).await;
        registry.spawn("b", "bob", "ETH", until_cancelled).await;

        registry.shutdown().await;
        assert!(root.is_cancelled());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_insert_with_child_token() {
        let root = CancellationToken::new();
        let registry = InstanceRegistry::with_root(root.clone());
        let token = registry.child_token();

        registry
            .insert("a", "alice", "BTC", token.clone(), until_cancelled(token.clone()))
            .await;
        assert_eq!(registry.info("a").await.unwrap().symbol, "BTC");

        root.cancel();
        assert!(token.is_cancelled());
        let results = registry.wait_all().await;
        assert_eq!(results, vec![("a".to_string(), StopReason::Cancelled)]);
    }

    #[tokio::test]
    async fn test_wait_all_collects_reasons() {
        let registry = InstanceRegistry::new();
        registry
            .spawn("a", "cli", "BTC", |_| async { StopReason::Completed })
            .await;

        let results = registry.wait_all().await;
        assert_eq!(results, vec![("a".to_string(), StopReason::Completed)]);
    }
}
