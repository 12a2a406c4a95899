use anyhow::Context;
use sqlx::SqlitePool;
use std::path::Path;

use crate::core::model::{ResolvedItem, RunSummary};

/// Append-only record of confirmed runs, kept in a SQLite file next to the
/// downloads. Never read during a run; failures to write are reported as
/// events by the caller, never fatal.
#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create_dir_all {}", parent.display()))?;
        }

        let abs = if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            std::env::current_dir()
                .context("current_dir")?
                .join(db_path)
        };

        let mut p = abs.to_string_lossy().to_string();
        if cfg!(windows) {
            p = p.replace('\\', "/");
        }

        // mode=rwc so a missing file is created
        let url = if p.starts_with('/') {
            format!("sqlite://{}?mode=rwc", p)
        } else {
            format!("sqlite:///{}?mode=rwc", p)
        };

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .with_context(|| format!("connect sqlite url={} (file={})", url, abs.display()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              started_at INTEGER NOT NULL,
              completed INTEGER NOT NULL,
              total INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run_items (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              run_id INTEGER NOT NULL,
              url TEXT NOT NULL,
              season INTEGER NULL,
              episode INTEGER NULL,
              title TEXT NOT NULL,
              FOREIGN KEY(run_id) REFERENCES runs(id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_run_items_run
            ON run_items(run_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn now_epoch() -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    pub async fn record_run(
        &self,
        worklist: &[ResolvedItem],
        summary: &RunSummary,
    ) -> anyhow::Result<()> {
        let run = sqlx::query(
            r#"
            INSERT INTO runs(started_at, completed, total)
            VALUES(?, ?, ?);
            "#,
        )
        .bind(Self::now_epoch())
        .bind(summary.completed as i64)
        .bind(summary.resolved as i64)
        .execute(&self.pool)
        .await
        .context("insert run")?;

        let run_id = run.last_insert_rowid();
        for item in worklist {
            sqlx::query(
                r#"
                INSERT INTO run_items(run_id, url, season, episode, title)
                VALUES(?, ?, ?, ?, ?);
                "#,
            )
            .bind(run_id)
            .bind(&item.entry.url)
            .bind(item.entry.season.map(|s| s as i64))
            .bind(item.entry.episode.map(|e| e as i64))
            .bind(&item.entry.title)
            .execute(&self.pool)
            .await
            .context("insert run item")?;
        }

        Ok(())
    }

    #[cfg(test)]
    async fn counts(&self) -> anyhow::Result<(i64, i64)> {
        use sqlx::Row;
        let runs = sqlx::query(r#"SELECT COUNT(1) AS cnt FROM runs"#)
            .fetch_one(&self.pool)
            .await?;
        let items = sqlx::query(r#"SELECT COUNT(1) AS cnt FROM run_items"#)
            .fetch_one(&self.pool)
            .await?;
        Ok((runs.get::<i64, _>("cnt"), items.get::<i64, _>("cnt")))
    }
}
