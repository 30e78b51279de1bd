//! `PostgreSQL` classification store.
//!
//! Writes into the existing `websites` and `pages` tables. Table creation
//! belongs to the CRUD layer, not here.

use anyhow::Context;
use async_trait::async_trait;
use sitelens_core::{Stats, SubjectKind};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;

use crate::traits::ClassificationStore;

/// Pooled `PostgreSQL` store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects a pool of at most `max_connections` to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to postgres")?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClassificationStore for PgStore {
    async fn update(
        &self,
        kind: SubjectKind,
        subject_id: u64,
        category: &str,
        theme: &str,
        stats: Option<&Stats>,
    ) -> anyhow::Result<()> {
        let id = i64::try_from(subject_id).context("subject id out of range")?;

        let result = match kind {
            SubjectKind::Website => {
                sqlx::query(
                    "update websites set category = $1, theme = $2, stats = $3, \
                     updated_at = current_timestamp where id = $4",
                )
                .bind(category)
                .bind(theme)
                .bind(stats.map(Json))
                .bind(id)
                .execute(&self.pool)
                .await
            }
            SubjectKind::Page => {
                sqlx::query(
                    "update pages set category = $1, theme = $2, \
                     updated_at = current_timestamp where id = $3",
                )
                .bind(category)
                .bind(theme)
                .bind(id)
                .execute(&self.pool)
                .await
            }
        }
        .with_context(|| format!("failed to update {kind} {subject_id}"))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("{kind} {subject_id} does not exist");
        }
        Ok(())
    }
}
