//! Coordinator decision log.
//!
//! The coordinator writes `Begin` before the prepare round, the `Decision`
//! before any commit or abort is sent, and `Completed` once every
//! participant acknowledged the decision. A commit decision with no
//! `Completed` record marks a transaction in doubt.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::TransactionId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

/// The coordinator's binding decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Commit,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LogEntry {
    Begin { participants: Vec<String> },
    Decision { decision: Decision },
    Completed,
}

/// One appended log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub transaction_id: TransactionId,
    pub entry: LogEntry,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only record of coordinator decisions.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Appends an entry for a transaction.
    async fn append(&self, transaction_id: TransactionId, entry: LogEntry) -> Result<()>;

    /// Returns the entries for a transaction, oldest first.
    async fn entries(&self, transaction_id: TransactionId) -> Result<Vec<LogRecord>>;

    /// Returns transactions with a commit decision but no completion record.
    async fn in_doubt(&self) -> Result<Vec<TransactionId>>;
}

/// In-memory transaction log for testing and single-process use.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransactionLog {
    records: Arc<RwLock<Vec<LogRecord>>>,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records appended.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TransactionLog for InMemoryTransactionLog {
    async fn append(&self, transaction_id: TransactionId, entry: LogEntry) -> Result<()> {
        self.records.write().await.push(LogRecord {
            transaction_id,
            entry,
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    async fn entries(&self, transaction_id: TransactionId) -> Result<Vec<LogRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn in_doubt(&self) -> Result<Vec<TransactionId>> {
        let records = self.records.read().await;
        let completed: HashSet<_> = records
            .iter()
            .filter(|r| r.entry == LogEntry::Completed)
            .map(|r| r.transaction_id)
            .collect();

        Ok(records
            .iter()
            .filter(|r| {
                r.entry
                    == LogEntry::Decision {
                        decision: Decision::Commit,
                    }
                    && !completed.contains(&r.transaction_id)
            })
            .map(|r| r.transaction_id)
            .collect())
    }
}
