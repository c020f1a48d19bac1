//! Sync run records.
//!
//! A run is created when a sync is triggered and finished when it ends. The
//! persisted `running` record doubles as the single-flight guard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simbridge_catalog::{CanonicalId, Generation, RejectedRecord};
use simbridge_core::SyncRunId;

/// What a run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    /// Fetch, normalize, publish, then reconcile.
    CatalogSync,
    /// Reconcile offers against the current snapshot only.
    Reconcile,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::CatalogSync => "catalog_sync",
            SyncKind::Reconcile => "reconcile",
        }
    }
}

/// Run status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Completed,
    Failed { error: String },
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed { .. } => "failed",
        }
    }
}

/// Counters collected during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub fetched: usize,
    pub normalized: usize,
    pub duplicates: usize,
    pub rejected: Vec<RejectedRecord>,
    pub needs_review: Vec<CanonicalId>,
    pub upserted: usize,
    pub retired: usize,
    pub offers_checked: usize,
    pub offers_repaired: usize,
    pub offers_unresolved: usize,
    pub offers_failed: usize,
}

/// One execution of the catalog sync job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: SyncRunId,
    pub kind: SyncKind,
    #[serde(flatten)]
    pub status: SyncStatus,
    /// Snapshot generation published (or reconciled against).
    pub generation: Option<Generation>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: SyncStats,
}

impl SyncRun {
    pub fn start(kind: SyncKind) -> Self {
        Self {
            id: SyncRunId::new(),
            kind,
            status: SyncStatus::Running,
            generation: None,
            started_at: Utc::now(),
            finished_at: None,
            stats: SyncStats::default(),
        }
    }

    pub fn mark_completed(&mut self) {
        self.status = SyncStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = SyncStatus::Failed { error: error.into() };
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_lifecycle() {
        let mut run = SyncRun::start(SyncKind::CatalogSync);
        assert!(!run.status.is_terminal());
        assert!(run.duration_ms().is_none());

        run.mark_failed("provider unavailable");
        assert!(run.status.is_terminal());
        assert_eq!(run.status.as_str(), "failed");
        assert!(run.duration_ms().is_some());
    }

    #[test]
    fn serializes_status_inline() {
        let mut run = SyncRun::start(SyncKind::Reconcile);
        run.mark_completed();
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["kind"], "reconcile");
    }
}
