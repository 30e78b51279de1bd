//! In-memory classification store.
//!
//! Keeps the latest classification per `(kind, id)` and a log of every
//! update call, which tests use to assert exactly-once persistence.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use sitelens_core::{Stats, SubjectKind};

use crate::traits::ClassificationStore;

/// One persisted classification.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredClassification {
    pub kind: SubjectKind,
    pub subject_id: u64,
    pub category: String,
    pub theme: String,
    pub stats: Option<Stats>,
}

/// `DashMap`-backed store with an optional injected failure.
#[derive(Debug, Default)]
pub struct MemoryStore {
    latest: DashMap<(SubjectKind, u64), StoredClassification>,
    log: Mutex<Vec<StoredClassification>>,
    fail: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `update` fail.
    pub fn fail_updates(&self, fail: bool) {
        self.fail.store(fail, Ordering::Release);
    }

    #[must_use]
    pub fn get(&self, kind: SubjectKind, subject_id: u64) -> Option<StoredClassification> {
        self.latest.get(&(kind, subject_id)).map(|r| r.value().clone())
    }

    /// Every successful update in call order.
    #[must_use]
    pub fn updates(&self) -> Vec<StoredClassification> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl ClassificationStore for MemoryStore {
    async fn update(
        &self,
        kind: SubjectKind,
        subject_id: u64,
        category: &str,
        theme: &str,
        stats: Option<&Stats>,
    ) -> anyhow::Result<()> {
        if self.fail.load(Ordering::Acquire) {
            anyhow::bail!("{kind} {subject_id}: store unavailable");
        }

        let record = StoredClassification {
            kind,
            subject_id,
            category: category.to_string(),
            theme: theme.to_string(),
            stats: stats.cloned(),
        };
        self.latest.insert((kind, subject_id), record.clone());
        self.log.lock().push(record);
        Ok(())
    }
}
