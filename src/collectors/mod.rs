use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, timeout_at};

#[macro_use]
mod register_macro;

pub mod config;
pub mod instance;
pub mod probe;
pub mod registry;
pub mod scrape;
pub mod sink;

pub use config::CollectorConfig;
pub use instance::{Instance, InstanceError};
pub use registry::{CollectorRegistry, RegistryError};
pub use scrape::{Lifecycle, ScrapeOrchestrator, ScrapeOutcome};
pub use sink::{MetricSink, Sample, SampleValue};

/// Prefix of every exported metric.
pub const NAMESPACE: &str = "pg";

/// Per-scrape data handed to every collector.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrapeContext {
    deadline: Option<Instant>,
}

impl ScrapeContext {
    #[must_use]
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    #[must_use]
    pub const fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Runs one query future under the scrape deadline. The future is dropped
    /// when the deadline passes, which aborts the in-flight query.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Timeout`] when the deadline passes first, or
    /// the future's own error.
    pub async fn bounded<T, E>(
        &self,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, CollectorError>
    where
        CollectorError: From<E>,
    {
        match self.deadline {
            Some(deadline) => {
                let budget = self.remaining().unwrap_or_default();
                timeout_at(deadline, fut)
                    .await
                    .map_err(|_| CollectorError::Timeout(budget))?
                    .map_err(CollectorError::from)
            }
            None => fut.await.map_err(CollectorError::from),
        }
    }
}

/// Serialisable classification of a [`CollectorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoData,
    Query,
    Timeout,
    Other,
}

#[derive(Debug, Error)]
pub enum CollectorError {
    /// Nothing to report, for example an optional extension is not installed.
    #[error("no data: {0}")]
    NoData(String),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CollectorError {
    pub fn no_data(reason: impl Into<String>) -> Self {
        Self::NoData(reason.into())
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoData(_) => ErrorKind::NoData,
            Self::Query(_) => ErrorKind::Query,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    #[must_use]
    pub const fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData(_))
    }
}

impl From<InstanceError> for CollectorError {
    fn from(e: InstanceError) -> Self {
        Self::Other(e.into())
    }
}

/// A named source of metrics. Implementations must be callable repeatedly
/// and concurrently against different instances; they only read the
/// instance's connection and version.
pub trait Collector: Send + Sync {
    fn update<'a>(
        &'a self,
        ctx: &'a ScrapeContext,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<(), CollectorError>>;
}

// Built-in collectors, registered in this order.
register_collectors! {
    database => DatabaseCollector: true,
    locks => LocksCollector: true,
    postmaster => PostmasterCollector: true,
    replication => ReplicationCollector: true,
    stat_statements => StatStatementsCollector: false,
    stat_progress_vacuum => StatProgressVacuumCollector: false,
    namespace => NamespaceCollector: true,
}
