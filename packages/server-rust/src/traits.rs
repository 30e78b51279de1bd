use async_trait::async_trait;
use sitelens_core::{Stats, SubjectKind};

/// Persistence seam for classification results.
/// Implementations: `PostgreSQL` (feature `postgres`), memory (tests, dev mode).
#[async_trait]
pub trait ClassificationStore: Send + Sync {
    /// Write category, theme and stats for one website or page row.
    ///
    /// Pages have no stats column; implementations may ignore `stats` for
    /// [`SubjectKind::Page`].
    async fn update(
        &self,
        kind: SubjectKind,
        subject_id: u64,
        category: &str,
        theme: &str,
        stats: Option<&Stats>,
    ) -> anyhow::Result<()>;
}
