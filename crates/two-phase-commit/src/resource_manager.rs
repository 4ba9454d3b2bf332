//! Resource manager trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::TransactionId;
use serde_json::Value;

use crate::error::ResourceManagerError;

/// A participant capable of preparing, committing and aborting its share of
/// a global transaction.
///
/// `commit` and `abort` must be idempotent: the coordinator re-sends
/// `commit` when resolving in-doubt transactions.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// The ID participants use to refer to this manager.
    fn id(&self) -> &str;

    /// Votes on the transaction. `Ok(false)` is a vote to abort.
    async fn prepare(&self, tx: TransactionId, data: &Value) -> Result<bool, ResourceManagerError>;

    /// Makes prepared work durable. `Ok(false)` means nothing was prepared.
    async fn commit(&self, tx: TransactionId) -> Result<bool, ResourceManagerError>;

    /// Discards prepared work.
    async fn abort(&self, tx: TransactionId) -> Result<bool, ResourceManagerError>;
}

/// A call received by an [`InMemoryResourceManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceCall {
    Prepare(TransactionId),
    Commit(TransactionId),
    Abort(TransactionId),
}

#[derive(Debug, Default)]
struct InMemoryResourceState {
    prepared: HashMap<TransactionId, Value>,
    committed: HashSet<TransactionId>,
    aborted: HashSet<TransactionId>,
    calls: Vec<ResourceCall>,
    vote_no: bool,
    fail_on_prepare: bool,
    fail_on_commit: bool,
    fail_on_abort: bool,
    latency: Option<Duration>,
}

/// In-memory resource manager for testing.
#[derive(Debug, Clone)]
pub struct InMemoryResourceManager {
    id: String,
    state: Arc<RwLock<InMemoryResourceState>>,
}

impl InMemoryResourceManager {
    /// Creates a resource manager with the given ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Arc::default(),
        }
    }

    /// Makes `prepare` vote no.
    pub fn set_vote_no(&self, vote_no: bool) {
        self.state.write().unwrap().vote_no = vote_no;
    }

    /// Configures the manager to fail on prepare calls.
    pub fn set_fail_on_prepare(&self, fail: bool) {
        self.state.write().unwrap().fail_on_prepare = fail;
    }

    /// Configures the manager to fail on commit calls.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.state.write().unwrap().fail_on_commit = fail;
    }

    /// Configures the manager to fail on abort calls.
    pub fn set_fail_on_abort(&self, fail: bool) {
        self.state.write().unwrap().fail_on_abort = fail;
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.write().unwrap().latency = latency;
    }

    /// Returns every call received, in order.
    pub fn calls(&self) -> Vec<ResourceCall> {
        self.state.read().unwrap().calls.clone()
    }

    /// Returns true if the transaction is prepared but not yet decided.
    pub fn is_prepared(&self, tx: TransactionId) -> bool {
        self.state.read().unwrap().prepared.contains_key(&tx)
    }

    pub fn is_committed(&self, tx: TransactionId) -> bool {
        self.state.read().unwrap().committed.contains(&tx)
    }

    pub fn is_aborted(&self, tx: TransactionId) -> bool {
        self.state.read().unwrap().aborted.contains(&tx)
    }

    /// Returns the number of transactions committed here.
    pub fn committed_count(&self) -> usize {
        self.state.read().unwrap().committed.len()
    }

    fn record(&self, call: ResourceCall) -> Option<Duration> {
        let mut state = self.state.write().unwrap();
        state.calls.push(call);
        state.latency
    }

    async fn delay(latency: Option<Duration>) {
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ResourceManager for InMemoryResourceManager {
    fn id(&self) -> &str {
        &self.id
    }

    async fn prepare(&self, tx: TransactionId, data: &Value) -> Result<bool, ResourceManagerError> {
        Self::delay(self.record(ResourceCall::Prepare(tx))).await;

        let mut state = self.state.write().unwrap();
        if state.fail_on_prepare {
            return Err(ResourceManagerError::Unavailable(format!(
                "{} cannot prepare",
                self.id
            )));
        }
        if state.vote_no {
            return Ok(false);
        }
        state.prepared.insert(tx, data.clone());
        tracing::debug!(resource_manager = %self.id, %tx, "prepared");
        Ok(true)
    }

    async fn commit(&self, tx: TransactionId) -> Result<bool, ResourceManagerError> {
        Self::delay(self.record(ResourceCall::Commit(tx))).await;

        let mut state = self.state.write().unwrap();
        if state.fail_on_commit {
            return Err(ResourceManagerError::Unavailable(format!(
                "{} cannot commit",
                self.id
            )));
        }
        if state.committed.contains(&tx) {
            return Ok(true);
        }
        if state.prepared.remove(&tx).is_none() {
            return Ok(false);
        }
        state.committed.insert(tx);
        tracing::debug!(resource_manager = %self.id, %tx, "committed");
        Ok(true)
    }

    async fn abort(&self, tx: TransactionId) -> Result<bool, ResourceManagerError> {
        Self::delay(self.record(ResourceCall::Abort(tx))).await;

        let mut state = self.state.write().unwrap();
        if state.fail_on_abort {
            return Err(ResourceManagerError::Unavailable(format!(
                "{} cannot abort",
                self.id
            )));
        }
        // Committed work cannot be undone.
        if state.committed.contains(&tx) {
            return Ok(false);
        }
        state.prepared.remove(&tx);
        state.aborted.insert(tx);
        tracing::debug!(resource_manager = %self.id, %tx, "aborted");
        Ok(true)
    }
}
