//! Optimistic read-modify-write transactions
//!
//! A transaction watches a set of keys, runs a body against a
//! [`KvTransaction`], and commits. If a watched key changed in between the
//! commit fails with [`Error::Conflict`] and the body runs again from
//! scratch, under exponential backoff, until it commits or the policy's
//! elapsed-time budget runs out. Any other error is returned on first
//! occurrence.

use crate::{
    config::TransactionConfig,
    error::Error,
    metrics::Metrics,
    storage::{KvStore, KvTransaction},
};
use backoff::ExponentialBackoff;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Error type a transaction body may return
///
/// Store failures convert into it, and conflicts are recognised so the
/// runner can retry them.
pub trait TransactionError: From<Error> + fmt::Display {
    /// Whether the failure is a watched-key conflict
    fn is_conflict(&self) -> bool;
}

impl TransactionError for Error {
    fn is_conflict(&self) -> bool {
        self.is_retryable()
    }
}

/// Run `body` inside a watched transaction, retrying on conflict
pub fn run_transaction<T, E, F>(
    store: &dyn KvStore,
    watched: &[String],
    policy: ExponentialBackoff,
    body: F,
) -> std::result::Result<T, E>
where
    E: TransactionError,
    F: FnMut(&mut dyn KvTransaction) -> std::result::Result<T, E>,
{
    execute(store, watched, policy, None, body)
}

fn execute<T, E, F>(
    store: &dyn KvStore,
    watched: &[String],
    policy: ExponentialBackoff,
    metrics: Option<&Metrics>,
    mut body: F,
) -> std::result::Result<T, E>
where
    E: TransactionError,
    F: FnMut(&mut dyn KvTransaction) -> std::result::Result<T, E>,
{
    let mut attempt = 0u32;
    let operation = || -> std::result::Result<T, backoff::Error<E>> {
        attempt += 1;
        if let Some(metrics) = metrics {
            metrics.record_attempt();
        }
        let mut txn = store.watch(watched).map_err(|e| classify(E::from(e)))?;
        let value = body(&mut *txn).map_err(classify)?;
        txn.commit().map_err(|e| classify(E::from(e)))?;
        debug!(attempt, keys = watched.len(), "Transaction committed");
        Ok(value)
    };
    let notify = |err: E, wait: Duration| {
        if let Some(metrics) = metrics {
            metrics.record_conflict();
        }
        warn!(error = %err, ?wait, "Transaction conflict, retrying");
    };

    backoff::retry_notify(policy, operation, notify).map_err(|err| match err {
        backoff::Error::Permanent(err) => err,
        backoff::Error::Transient { err, .. } => {
            if let Some(metrics) = metrics {
                metrics.record_conflict();
            }
            warn!(error = %err, "Transaction retry budget exhausted");
            err
        }
    })
}

fn classify<E: TransactionError>(err: E) -> backoff::Error<E> {
    if err.is_conflict() {
        backoff::Error::transient(err)
    } else {
        backoff::Error::permanent(err)
    }
}

/// Store, retry policy and metrics bundled for repeated use
pub struct TransactionRunner<S: KvStore> {
    store: Arc<S>,
    config: TransactionConfig,
    metrics: Option<Metrics>,
}

impl<S: KvStore> TransactionRunner<S> {
    /// Create runner
    pub fn new(store: Arc<S>, config: TransactionConfig) -> Self {
        Self {
            store,
            config,
            metrics: None,
        }
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Attached metrics
    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_ref()
    }

    /// Run `body` watching `watched`
    pub fn run<T, E, F>(&self, watched: &[String], body: F) -> std::result::Result<T, E>
    where
        E: TransactionError,
        F: FnMut(&mut dyn KvTransaction) -> std::result::Result<T, E>,
    {
        let started = Instant::now();
        let result = execute(
            self.store.as_ref(),
            watched,
            self.config.backoff(),
            self.metrics.as_ref(),
            body,
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_outcome(result.is_ok(), started.elapsed().as_secs_f64());
        }
        result
    }
}
