use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::{Path, PathBuf};
use tracing::instrument;

pub mod job;

pub use job::{Job, JobQuery, JobStats, JobStatus, JobUpdate, Page};

use crate::{ScribeError, ScribeResult};

const COLUMNS: &str = "id, video_id, url, title, engine, status, transcript_path, audio_path, \
    video_path, subtitle_path, summary, language, duration_seconds, error_message, retry_count, \
    notes, created_at, updated_at, completed_at";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS transcription_jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        video_id TEXT NOT NULL,
        url TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        engine TEXT NOT NULL,
        status TEXT NOT NULL,
        transcript_path TEXT,
        audio_path TEXT,
        video_path TEXT,
        subtitle_path TEXT,
        summary TEXT,
        language TEXT,
        duration_seconds REAL,
        error_message TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        notes TEXT NOT NULL DEFAULT '[]',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        completed_at INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_url_engine ON transcription_jobs (url, engine)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON transcription_jobs (status)",
];

/// Durable record of every transcription job, backed by SQLite
#[derive(Clone)]
pub struct JobLedger {
    pool: SqlitePool,
    stale_after: Duration,
}

/// Input for [`JobLedger::create`]
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub url: &'a str,
    pub video_id: &'a str,
    pub title: &'a str,
    pub engine: &'a str,
    /// Skip the duplicate check
    pub force: bool,
}

impl JobLedger {
    /// Open (and create if needed) the ledger database at `path`
    pub async fn open(path: &Path, stale_after: Duration) -> ScribeResult<Self> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let ledger = Self { pool, stale_after };
        ledger.migrate().await?;
        tracing::debug!(path = %path.display(), "Job ledger opened");
        Ok(ledger)
    }

    /// Private in-memory ledger, used by tests and dry runs
    pub async fn in_memory() -> ScribeResult<Self> {
        // a single connection that never expires keeps the in-memory database alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let ledger = Self {
            pool,
            stale_after: Duration::hours(3),
        };
        ledger.migrate().await?;
        Ok(ledger)
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    async fn migrate(&self) -> ScribeResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Create a job in `pending`.
    ///
    /// Fails with `DuplicateActiveJob` when a blocking job exists for the same URL and
    /// engine, unless `force` is set. The check and the insert are one statement.
    #[instrument(skip(self, new), fields(url = new.url, engine = new.engine))]
    pub async fn create(&self, new: NewJob<'_>) -> ScribeResult<i64> {
        let now = now_micros();

        let result = if new.force {
            sqlx::query(
                r#"
                INSERT INTO transcription_jobs (video_id, url, title, engine, status, created_at, updated_at)
                VALUES (?, ?, ?, ?, 'pending', ?, ?)
                "#,
            )
            .bind(new.video_id)
            .bind(new.url)
            .bind(new.title)
            .bind(new.engine)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                r#"
                INSERT INTO transcription_jobs (video_id, url, title, engine, status, created_at, updated_at)
                SELECT ?, ?, ?, ?, 'pending', ?, ?
                WHERE NOT EXISTS (
                    SELECT 1 FROM transcription_jobs
                    WHERE url = ? AND engine = ?
                      AND (status = 'completed'
                           OR (status IN ({}) AND updated_at >= ?))
                )
                "#,
                in_flight_statuses()
            ))
            .bind(new.video_id)
            .bind(new.url)
            .bind(new.title)
            .bind(new.engine)
            .bind(now)
            .bind(now)
            .bind(new.url)
            .bind(new.engine)
            .bind(self.stale_cutoff())
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            let blocker = self
                .find_duplicate(new.url, Some(new.engine))
                .await?
                .ok_or_else(|| {
                    ScribeError::Ledger(sqlx::Error::Protocol(
                        "job insert skipped without a blocking job".to_string(),
                    ))
                })?;
            return Err(ScribeError::DuplicateActiveJob {
                job_id: blocker.id,
                url: blocker.url,
                engine: blocker.engine,
                status: blocker.status,
            });
        }

        let id = result.last_insert_rowid();
        tracing::info!(job_id = id, "Job created");
        Ok(id)
    }

    /// Most recent unexpired blocking job for `url` (and `engine`, when given)
    pub async fn find_duplicate(&self, url: &str, engine: Option<&str>) -> ScribeResult<Option<Job>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM transcription_jobs WHERE url = ",
            COLUMNS
        ));
        query.push_bind(url.to_string());
        if let Some(engine) = engine {
            query.push(" AND engine = ").push_bind(engine.to_string());
        }
        query
            .push(format!(
                " AND (status = 'completed' OR (status IN ({}) AND updated_at >= ",
                in_flight_statuses()
            ))
            .push_bind(self.stale_cutoff())
            .push(")) ORDER BY updated_at DESC LIMIT 1");

        let row = query.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn get(&self, id: i64) -> ScribeResult<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transcription_jobs WHERE id = ?",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn require(&self, id: i64) -> ScribeResult<Job> {
        self.get(id).await?.ok_or(ScribeError::JobNotFound(id))
    }

    pub async fn status(&self, id: i64) -> ScribeResult<JobStatus> {
        Ok(self.require(id).await?.status)
    }

    /// Move a job along the state graph, applying `update` in the same statement.
    ///
    /// Illegal edges fail with `InvalidTransition`. The update is a compare-and-set on
    /// the current status, so a concurrent writer also surfaces as `InvalidTransition`.
    #[instrument(skip(self, update), fields(job_id = id, to = %next))]
    pub async fn transition(&self, id: i64, next: JobStatus, update: JobUpdate) -> ScribeResult<Job> {
        let current = self.require(id).await?;
        if !current.status.can_transition_to(next) {
            return Err(ScribeError::InvalidTransition {
                job_id: id,
                from: current.status,
                to: next,
            });
        }

        let now = now_micros();
        let completed_at = (next == JobStatus::Completed).then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE transcription_jobs
            SET status = ?,
                engine = COALESCE(?, engine),
                transcript_path = COALESCE(?, transcript_path),
                audio_path = COALESCE(?, audio_path),
                video_path = COALESCE(?, video_path),
                subtitle_path = COALESCE(?, subtitle_path),
                summary = COALESCE(?, summary),
                language = COALESCE(?, language),
                duration_seconds = COALESCE(?, duration_seconds),
                error_message = COALESCE(?, error_message),
                completed_at = COALESCE(?, completed_at),
                updated_at = MAX(?, updated_at + 1)
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(next.as_str())
        .bind(update.engine)
        .bind(path_text(update.transcript_path))
        .bind(path_text(update.audio_path))
        .bind(path_text(update.video_path))
        .bind(path_text(update.subtitle_path))
        .bind(update.summary)
        .bind(update.language)
        .bind(update.duration_seconds)
        .bind(update.error_message)
        .bind(completed_at)
        .bind(now)
        .bind(id)
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let actual = self.status(id).await?;
            return Err(ScribeError::InvalidTransition {
                job_id: id,
                from: actual,
                to: next,
            });
        }

        tracing::debug!(from = %current.status, "Job transitioned");
        self.require(id).await
    }

    /// Append a diagnostic note to the job
    pub async fn annotate(&self, id: i64, note: &str) -> ScribeResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transcription_jobs
            SET notes = json_insert(notes, '$[#]', ?), updated_at = MAX(?, updated_at + 1)
            WHERE id = ?
            "#,
        )
        .bind(note)
        .bind(now_micros())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ScribeError::JobNotFound(id));
        }
        Ok(())
    }

    pub async fn record_retries(&self, id: i64, retries: u32) -> ScribeResult<()> {
        if retries == 0 {
            return Ok(());
        }
        sqlx::query("UPDATE transcription_jobs SET retry_count = retry_count + ? WHERE id = ?")
            .bind(retries as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fill in descriptive fields resolved after the job was created
    pub async fn set_metadata(
        &self,
        id: i64,
        title: Option<&str>,
        video_id: Option<&str>,
        duration_seconds: Option<f64>,
    ) -> ScribeResult<()> {
        sqlx::query(
            r#"
            UPDATE transcription_jobs
            SET title = COALESCE(?, title),
                video_id = COALESCE(?, video_id),
                duration_seconds = COALESCE(?, duration_seconds),
                updated_at = MAX(?, updated_at + 1)
            WHERE id = ?
            "#,
        )
        .bind(title)
        .bind(video_id)
        .bind(duration_seconds)
        .bind(now_micros())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fail in-flight jobs that have not moved for longer than the stale window.
    ///
    /// Returns the ids that were marked failed.
    pub async fn recover_interrupted(&self) -> ScribeResult<Vec<i64>> {
        let rows = sqlx::query(&format!(
            "SELECT id FROM transcription_jobs WHERE status IN ({}) AND updated_at < ?",
            in_flight_statuses()
        ))
        .bind(self.stale_cutoff())
        .fetch_all(&self.pool)
        .await?;

        let mut recovered = Vec::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            match self
                .transition(id, JobStatus::Failed, JobUpdate::failure("interrupted before completion"))
                .await
            {
                Ok(_) => recovered.push(id),
                // another process finished it in the meantime
                Err(ScribeError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if !recovered.is_empty() {
            tracing::warn!(count = recovered.len(), "Marked interrupted jobs as failed");
        }
        Ok(recovered)
    }

    /// Filtered, paginated listing, newest first
    pub async fn search(&self, query: &JobQuery) -> ScribeResult<Page<Job>> {
        let page = query.page.max(1);
        let per_page = query.per_page.clamp(1, 500);

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM transcription_jobs WHERE 1 = 1");
        push_filters(&mut count, query);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM transcription_jobs WHERE 1 = 1",
            COLUMNS
        ));
        push_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(per_page as i64)
            .push(" OFFSET ")
            .push_bind(((page - 1) as i64) * per_page as i64);

        let rows = select.build().fetch_all(&self.pool).await?;
        let items = rows.iter().map(job_from_row).collect::<ScribeResult<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total.max(0) as u64,
            page,
            per_page,
        })
    }

    /// Counts by status and by engine
    pub async fn stats(&self) -> ScribeResult<JobStats> {
        let by_status: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM transcription_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let by_engine: Vec<(String, i64)> =
            sqlx::query_as("SELECT engine, COUNT(*) FROM transcription_jobs GROUP BY engine")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = JobStats::default();
        for (status, count) in by_status {
            stats.total += count as u64;
            stats.by_status.insert(status, count as u64);
        }
        for (engine, count) in by_engine {
            stats.by_engine.insert(engine, count as u64);
        }
        Ok(stats)
    }

    /// Delete terminal jobs last touched before `older_than` ago
    pub async fn prune(&self, older_than: Duration) -> ScribeResult<u64> {
        let cutoff = (Utc::now() - older_than).timestamp_micros();
        let result = sqlx::query(
            r#"
            DELETE FROM transcription_jobs
            WHERE status IN ('completed', 'failed', 'cancelled') AND updated_at < ?
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    fn stale_cutoff(&self) -> i64 {
        (Utc::now() - self.stale_after).timestamp_micros()
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &JobQuery) {
    if let Some(text) = query.text.as_deref().filter(|t| !t.trim().is_empty()) {
        let pattern = format!("%{}%", text.trim());
        builder
            .push(" AND (title LIKE ")
            .push_bind(pattern.clone())
            .push(" OR url LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(engine) = &query.engine {
        builder.push(" AND engine = ").push_bind(engine.clone());
    }
}

fn job_from_row(row: &SqliteRow) -> ScribeResult<Job> {
    let status: String = row.try_get("status")?;
    let status = status.parse::<JobStatus>().map_err(decode_error)?;

    let notes: String = row.try_get("notes")?;
    let notes: Vec<String> =
        serde_json::from_str(&notes).map_err(|e| decode_error(e.to_string()))?;

    let retry_count: i64 = row.try_get("retry_count")?;

    Ok(Job {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        video_id: row.try_get("video_id")?,
        title: row.try_get("title")?,
        engine: row.try_get("engine")?,
        status,
        transcript_path: row.try_get::<Option<String>, _>("transcript_path")?.map(PathBuf::from),
        audio_path: row.try_get::<Option<String>, _>("audio_path")?.map(PathBuf::from),
        video_path: row.try_get::<Option<String>, _>("video_path")?.map(PathBuf::from),
        subtitle_path: row.try_get::<Option<String>, _>("subtitle_path")?.map(PathBuf::from),
        summary: row.try_get("summary")?,
        language: row.try_get("language")?,
        duration_seconds: row.try_get("duration_seconds")?,
        error_message: row.try_get("error_message")?,
        retry_count: retry_count.max(0) as u32,
        notes,
        created_at: from_micros(row.try_get("created_at")?)?,
        updated_at: from_micros(row.try_get("updated_at")?)?,
        completed_at: row
            .try_get::<Option<i64>, _>("completed_at")?
            .map(from_micros)
            .transpose()?,
    })
}

/// Quoted SQL list of the statuses that can still change
fn in_flight_statuses() -> String {
    JobStatus::ALL
        .iter()
        .filter(|status| status.is_in_flight())
        .map(|status| format!("'{}'", status.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

fn from_micros(micros: i64) -> ScribeResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| decode_error(format!("timestamp out of range: {}", micros)))
}

fn path_text(path: Option<PathBuf>) -> Option<String> {
    path.map(|p| p.to_string_lossy().into_owned())
}

fn decode_error(message: String) -> ScribeError {
    ScribeError::Ledger(sqlx::Error::Decode(message.into()))
}
