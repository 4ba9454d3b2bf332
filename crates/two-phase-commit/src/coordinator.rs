//! Two-phase commit coordinator.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use common::TransactionId;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{Result, TwoPhaseError};
use crate::log::{Decision, InMemoryTransactionLog, LogEntry, TransactionLog};
use crate::resource_manager::ResourceManager;
use crate::transaction::{
    GlobalTransaction, ParticipantStatus, Phase, TransactionStatus, TwoPhaseOutcome,
};

/// Transaction counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransactionStats {
    pub total: usize,
    /// Transactions still in `Preparing` or `Prepared`.
    pub active: usize,
    pub committed: usize,
    pub aborted: usize,
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Prepare,
    Commit,
    Abort,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Prepare => "prepare",
            Operation::Commit => "commit",
            Operation::Abort => "abort",
        }
    }

    fn failure(self, participant: &str, reason: impl Into<String>) -> TwoPhaseError {
        let participant = participant.to_string();
        let reason = reason.into();
        match self {
            Operation::Prepare => TwoPhaseError::PrepareFailed {
                participant,
                reason,
            },
            Operation::Commit => TwoPhaseError::CommitFailed {
                participant,
                reason,
            },
            Operation::Abort => TwoPhaseError::AbortFailed {
                participant,
                reason,
            },
        }
    }
}

type CallResult = (String, std::result::Result<(), TwoPhaseError>);

/// Stand-in deadline for timeouts too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Drives prepare and commit across registered resource managers.
///
/// Calls within one round go out concurrently and are all collected before
/// the round's outcome is decided. Separate transactions are independent
/// and may run concurrently on clones of the same coordinator.
#[derive(Clone)]
pub struct TwoPhaseCoordinator {
    config: CoordinatorConfig,
    resource_managers: Arc<RwLock<HashMap<String, Arc<dyn ResourceManager>>>>,
    transactions: Arc<RwLock<HashMap<TransactionId, GlobalTransaction>>>,
    log: Arc<dyn TransactionLog>,
}

impl TwoPhaseCoordinator {
    /// Creates a coordinator with an in-memory decision log.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_log(config, Arc::new(InMemoryTransactionLog::new()))
    }

    /// Creates a coordinator that records decisions in `log`.
    pub fn with_log(config: CoordinatorConfig, log: Arc<dyn TransactionLog>) -> Self {
        Self {
            config,
            resource_managers: Arc::new(RwLock::new(HashMap::new())),
            transactions: Arc::new(RwLock::new(HashMap::new())),
            log,
        }
    }

    pub fn coordinator_id(&self) -> &str {
        &self.config.coordinator_id
    }

    /// Registers a resource manager under its ID, replacing any previous one.
    pub async fn register_resource_manager(&self, manager: Arc<dyn ResourceManager>) {
        let id = manager.id().to_string();
        let previous = self
            .resource_managers
            .write()
            .await
            .insert(id.clone(), manager);

        if previous.is_some() {
            warn!(resource_manager = %id, "resource manager replaced");
        } else {
            info!(resource_manager = %id, "resource manager registered");
        }
    }

    /// Returns the registered resource manager IDs, sorted.
    pub async fn resource_manager_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.resource_managers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Runs the full protocol for one transaction.
    ///
    /// Only caller mistakes and a failure to record `Begin` are returned as
    /// errors. A participant that votes no, fails, times out or has no
    /// registered resource manager produces an unsuccessful outcome; the
    /// details are on the transaction returned by
    /// [`get_transaction_status`](Self::get_transaction_status).
    ///
    /// Once participants have been called the protocol always runs to an
    /// outcome. A commit decision that cannot be logged is treated as an
    /// abort.
    #[tracing::instrument(
        skip(self, participant_ids, data),
        fields(transaction_id = tracing::field::Empty)
    )]
    pub async fn execute_two_phase_commit<I, S>(
        &self,
        participant_ids: I,
        data: Value,
    ) -> Result<TwoPhaseOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = participant_ids.into_iter().map(Into::into).collect();
        validate_participants(&ids)?;

        let started = std::time::Instant::now();
        let tx = self.begin_transaction(&ids).await?;
        tracing::Span::current().record("transaction_id", tracing::field::display(tx));

        let outcome = if self.prepare_phase(tx, &ids, &data).await? {
            self.commit_phase(tx, &ids).await?
        } else {
            self.abort_prepared(tx).await?
        };

        metrics::histogram!("two_phase_commit_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Returns a snapshot of a transaction.
    pub async fn get_transaction_status(&self, tx: TransactionId) -> Option<GlobalTransaction> {
        self.transactions.read().await.get(&tx).cloned()
    }

    /// Returns transactions whose commit decision was not acknowledged by
    /// every participant.
    pub async fn in_doubt_transactions(&self) -> Result<Vec<TransactionId>> {
        self.log.in_doubt().await
    }

    /// Re-sends `commit` to every participant of an in-doubt transaction
    /// that has not committed yet.
    ///
    /// Returns the first participant error if any straggler still fails;
    /// the transaction stays in doubt and can be resolved again.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_in_doubt(&self, tx: TransactionId) -> Result<TwoPhaseOutcome> {
        let snapshot = self
            .get_transaction_status(tx)
            .await
            .ok_or(TwoPhaseError::TransactionNotFound(tx))?;
        if !self.log.in_doubt().await?.contains(&tx) {
            return Err(TwoPhaseError::NotInDoubt(tx));
        }

        let stragglers: Vec<String> = snapshot
            .participants
            .iter()
            .filter(|p| p.status != ParticipantStatus::Committed)
            .map(|p| p.id.clone())
            .collect();
        info!(stragglers = stragglers.len(), "resolving in-doubt transaction");

        let results = self
            .fan_out(tx, stragglers, Operation::Commit, &Value::Null, self.round_deadline())
            .await;
        self.update(tx, |t| {
            apply_results(t, &results, ParticipantStatus::Committed);
            if t.all(ParticipantStatus::Committed) {
                t.finish(TransactionStatus::Committed);
            }
        })
        .await?;

        if let Some((_, Err(e))) = results.into_iter().find(|(_, r)| r.is_err()) {
            warn!(error = %e, "transaction still in doubt");
            return Err(e);
        }

        self.record(tx, LogEntry::Completed).await;
        metrics::counter!("two_phase_commit_total", "outcome" => "resolved").increment(1);
        info!("in-doubt transaction committed");
        Ok(TwoPhaseOutcome {
            success: true,
            transaction_id: tx,
            phase: Phase::Commit,
        })
    }

    /// Returns transaction counts by status.
    pub async fn stats(&self) -> TransactionStats {
        let transactions = self.transactions.read().await;
        let mut stats = TransactionStats {
            total: transactions.len(),
            ..TransactionStats::default()
        };
        for tx in transactions.values() {
            match tx.status {
                TransactionStatus::Preparing | TransactionStatus::Prepared => stats.active += 1,
                TransactionStatus::Committed => stats.committed += 1,
                TransactionStatus::Aborted => stats.aborted += 1,
            }
        }
        stats
    }

    async fn begin_transaction(&self, ids: &[String]) -> Result<TransactionId> {
        let transaction = GlobalTransaction::new(
            self.config.coordinator_id.clone(),
            ids.iter().cloned(),
            self.config.timeout,
        );
        let tx = transaction.id;

        self.log
            .append(
                tx,
                LogEntry::Begin {
                    participants: ids.to_vec(),
                },
            )
            .await?;
        self.transactions.write().await.insert(tx, transaction);

        info!(transaction_id = %tx, participants = ?ids, "transaction started");
        Ok(tx)
    }

    /// Returns true if every participant prepared.
    async fn prepare_phase(&self, tx: TransactionId, ids: &[String], data: &Value) -> Result<bool> {
        let deadline = self.round_deadline();
        let votes = self
            .fan_out(tx, ids.to_vec(), Operation::Prepare, data, deadline)
            .await;

        for (participant, vote) in &votes {
            if let Err(e) = vote {
                warn!(%participant, error = %e, "participant failed to prepare");
            }
        }

        let transaction = self
            .update(tx, |t| {
                apply_results(t, &votes, ParticipantStatus::Prepared);
                for participant in &mut t.participants {
                    if participant.status == ParticipantStatus::Prepared {
                        participant.prepare_data = Some(data.clone());
                    }
                }
                if t.all(ParticipantStatus::Prepared) {
                    t.status = TransactionStatus::Prepared;
                }
            })
            .await?;

        Ok(transaction.status == TransactionStatus::Prepared)
    }

    async fn commit_phase(&self, tx: TransactionId, ids: &[String]) -> Result<TwoPhaseOutcome> {
        let recorded = self
            .record(
                tx,
                LogEntry::Decision {
                    decision: Decision::Commit,
                },
            )
            .await;
        if !recorded {
            warn!("commit decision not recorded, aborting");
            return self.abort_prepared(tx).await;
        }

        let results = self
            .fan_out(tx, ids.to_vec(), Operation::Commit, &Value::Null, self.round_deadline())
            .await;
        let transaction = self
            .update(tx, |t| {
                apply_results(t, &results, ParticipantStatus::Committed);
                if t.all(ParticipantStatus::Committed) {
                    t.finish(TransactionStatus::Committed);
                } else {
                    t.finish(TransactionStatus::Aborted);
                }
            })
            .await?;

        let success = transaction.status == TransactionStatus::Committed;
        if success {
            self.record(tx, LogEntry::Completed).await;
            metrics::counter!("two_phase_commit_total", "outcome" => "committed").increment(1);
            info!("transaction committed");
        } else {
            for (participant, result) in &results {
                if let Err(e) = result {
                    error!(%participant, error = %e, "participant failed to commit");
                }
            }
            metrics::counter!("two_phase_commit_total", "outcome" => "in_doubt").increment(1);
            error!(
                committed = ?transaction.ids_with_status(ParticipantStatus::Committed),
                "commit incomplete, transaction in doubt"
            );
        }

        Ok(TwoPhaseOutcome {
            success,
            transaction_id: tx,
            phase: Phase::Commit,
        })
    }

    /// Aborts the participants that prepared after a failed prepare round.
    async fn abort_prepared(&self, tx: TransactionId) -> Result<TwoPhaseOutcome> {
        // Presumed abort: a missing abort record still means abort.
        self.record(
            tx,
            LogEntry::Decision {
                decision: Decision::Abort,
            },
        )
        .await;

        let prepared = self
            .transactions
            .read()
            .await
            .get(&tx)
            .map(|t| t.ids_with_status(ParticipantStatus::Prepared))
            .ok_or(TwoPhaseError::TransactionNotFound(tx))?;

        let results = self
            .fan_out(tx, prepared, Operation::Abort, &Value::Null, self.round_deadline())
            .await;
        for (participant, result) in &results {
            if let Err(e) = result {
                error!(%participant, error = %e, "participant failed to abort");
            }
        }

        self.update(tx, |t| {
            apply_results(t, &results, ParticipantStatus::Aborted);
            t.finish(TransactionStatus::Aborted);
        })
        .await?;
        self.record(tx, LogEntry::Completed).await;

        metrics::counter!("two_phase_commit_total", "outcome" => "aborted").increment(1);
        warn!("transaction aborted in prepare phase");
        Ok(TwoPhaseOutcome {
            success: false,
            transaction_id: tx,
            phase: Phase::Prepare,
        })
    }

    fn round_deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.config.timeout)
            .unwrap_or_else(|| now + FAR_FUTURE)
    }

    /// Appends to the decision log. A failed append is logged, not returned.
    async fn record(&self, tx: TransactionId, entry: LogEntry) -> bool {
        match self.log.append(tx, entry).await {
            Ok(()) => true,
            Err(e) => {
                error!(transaction_id = %tx, error = %e, "transaction log append failed");
                false
            }
        }
    }

    /// Calls `op` on every target concurrently and waits for all of them.
    async fn fan_out(
        &self,
        tx: TransactionId,
        targets: Vec<String>,
        op: Operation,
        data: &Value,
        deadline: Instant,
    ) -> Vec<CallResult> {
        let calls: Vec<_> = {
            let managers = self.resource_managers.read().await;
            targets
                .into_iter()
                .map(|id| {
                    let manager = managers.get(&id).cloned();
                    (id, manager)
                })
                .collect()
        };

        join_all(calls.into_iter().map(|(id, manager)| async move {
            let result = invoke(manager, &id, tx, op, data, deadline).await;
            (id, result)
        }))
        .await
    }

    async fn update<F>(&self, tx: TransactionId, f: F) -> Result<GlobalTransaction>
    where
        F: FnOnce(&mut GlobalTransaction),
    {
        let mut transactions = self.transactions.write().await;
        let transaction = transactions
            .get_mut(&tx)
            .ok_or(TwoPhaseError::TransactionNotFound(tx))?;
        f(transaction);
        Ok(transaction.clone())
    }
}

fn validate_participants(ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Err(TwoPhaseError::NoParticipants);
    }
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(TwoPhaseError::DuplicateParticipant(id.clone()));
        }
    }
    Ok(())
}

/// Sets each called participant to `on_success`, or `Failed` with the error.
fn apply_results(
    transaction: &mut GlobalTransaction,
    results: &[CallResult],
    on_success: ParticipantStatus,
) {
    for (id, result) in results {
        let Some(participant) = transaction.participants.iter_mut().find(|p| &p.id == id) else {
            continue;
        };
        match result {
            Ok(()) => {
                participant.status = on_success;
                participant.error = None;
            }
            Err(e) => {
                participant.status = ParticipantStatus::Failed;
                participant.error = Some(e.to_string());
            }
        }
    }
}

async fn invoke(
    manager: Option<Arc<dyn ResourceManager>>,
    participant: &str,
    tx: TransactionId,
    op: Operation,
    data: &Value,
    deadline: Instant,
) -> std::result::Result<(), TwoPhaseError> {
    let Some(manager) = manager else {
        return Err(TwoPhaseError::ResourceManagerNotFound(
            participant.to_string(),
        ));
    };

    let call = async {
        match op {
            Operation::Prepare => manager.prepare(tx, data).await,
            Operation::Commit => manager.commit(tx).await,
            Operation::Abort => manager.abort(tx).await,
        }
    };

    match tokio::time::timeout_at(deadline, call).await {
        Err(_) => Err(TwoPhaseError::Timeout {
            participant: participant.to_string(),
            operation: op.as_str(),
        }),
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => Err(op.failure(participant, "declined")),
        Ok(Err(e)) => Err(op.failure(participant, e.to_string())),
    }
}
