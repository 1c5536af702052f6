use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Alias, Expr, PostgresQueryBuilder, Query};
use sea_query_binder::SqlxBinder;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Error as SqlxError, Postgres, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::db::store::{ConferenceStore, ConferenceTx};
use crate::error::{ConferenceError, Result};
use crate::models::{Code, CodeState, Conference, NOT_RUNNING, RUNNING};

// Global database instance
static DB: OnceCell<Arc<DbConference>> = OnceCell::const_new();

/// Initialize the global database connection
///
/// # Arguments
/// * `database_url` - PostgreSQL connection string
pub async fn init_db(database_url: &str) -> std::result::Result<Arc<DbConference>, Box<dyn std::error::Error>> {
    let db = Arc::new(DbConference::new(database_url).await?);
    DB.set(db.clone())
        .map_err(|_| "Database already initialized")?;
    Ok(db)
}

/// Get the global database instance
pub fn get_db() -> Option<Arc<DbConference>> {
    DB.get().cloned()
}

/// Database connection pool
pub struct DbConference {
    pool: PgPool,
}

impl DbConference {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    pub async fn new(database_url: &str) -> std::result::Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    fn log_pool_stats(&self, action: &str) {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        info!(
            "{}. Pool connections: {} idle, {} in use",
            action,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );
    }

    /// Look up the tutoring session a conference belongs to
    ///
    /// # Arguments
    /// * `conference_id` - The conference UUID carried in the websocket path
    ///
    /// # Returns
    /// * `Result<Option<i32>, SqlxError>` - The session ID, if the conference is known
    pub async fn find_session_by_conference(
        &self,
        conference_id: Uuid,
    ) -> std::result::Result<Option<i32>, SqlxError> {
        self.log_pool_stats(&format!("Resolving session for conference {}", conference_id));

        let row = sqlx::query("SELECT id FROM sessions WHERE conference_id = $1")
            .bind(conference_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("id")?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ConferenceStore for DbConference {
    async fn begin(&self) -> Result<Box<dyn ConferenceTx>> {
        self.log_pool_stats("Opening conference transaction");

        let tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(
                    "Failed to acquire connection from pool: {}. Pool state: {} idle, {} total",
                    e,
                    self.pool.num_idle(),
                    self.pool.size()
                );
                return Err(e.into());
            }
        };

        Ok(Box::new(PgConferenceTx { tx }))
    }
}

/// A conference transaction on a pooled Postgres connection
pub struct PgConferenceTx {
    tx: Transaction<'static, Postgres>,
}

const SELECT_CONFERENCE_SQL: &str = r#"
    SELECT session_id, code_state, latest_code, updated_at
    FROM session_conference
    WHERE session_id = $1
    FOR UPDATE
"#;

const INSERT_CONFERENCE_SQL: &str = r#"
    INSERT INTO session_conference(session_id, code_state, latest_code, updated_at)
    VALUES ($1, $2, NULL, NOW())
    ON CONFLICT (session_id) DO NOTHING
    RETURNING session_id, code_state, latest_code, updated_at
"#;

fn conference_from_row(row: &PgRow) -> std::result::Result<Conference, SqlxError> {
    let code_state: String = row.try_get("code_state")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(Conference {
        session_id: row.try_get("session_id")?,
        code_state: CodeState::from_db(&code_state),
        latest_code: row.try_get("latest_code")?,
        updated_at,
    })
}

impl PgConferenceTx {
    async fn select_conference(&mut self, session_id: i32) -> std::result::Result<Option<Conference>, SqlxError> {
        let row = sqlx::query(SELECT_CONFERENCE_SQL)
            .bind(session_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(conference_from_row).transpose()
    }
}

#[async_trait]
impl ConferenceTx for PgConferenceTx {
    async fn get_or_create_conference(&mut self, session_id: i32) -> Result<Conference> {
        if let Some(conference) = self.select_conference(session_id).await? {
            return Ok(conference);
        }

        let inserted = sqlx::query(INSERT_CONFERENCE_SQL)
            .bind(session_id)
            .bind(NOT_RUNNING)
            .fetch_optional(&mut *self.tx)
            .await?;

        match inserted {
            Some(row) => {
                info!("Created conference for session {}", session_id);
                Ok(conference_from_row(&row)?)
            }
            // Lost the insert race to a concurrent submission; its row is committed now
            None => self
                .select_conference(session_id)
                .await?
                .ok_or_else(|| ConferenceError::internal(format!("conference for session {} vanished", session_id))),
        }
    }

    async fn create_code(&mut self, session_id: i32, raw_code: &str) -> Result<Code> {
        let code = sqlx::query_as::<_, Code>(
            "INSERT INTO conference_code(code) VALUES ($1) RETURNING id, code, result",
        )
        .bind(raw_code)
        .fetch_one(&mut *self.tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE session_conference
            SET latest_code = $1,
                code_state = $2,
                updated_at = NOW()
            WHERE session_id = $3
            "#,
        )
        .bind(code.id)
        .bind(RUNNING)
        .bind(session_id)
        .execute(&mut *self.tx)
        .await?;

        debug!("Inserted code {} for session {}", code.id, session_id);
        Ok(code)
    }

    async fn update_code(&mut self, session_id: i32, code_id: i32, result: &str) -> Result<Code> {
        let existing = sqlx::query_as::<_, Code>(
            "SELECT id, code, result FROM conference_code WHERE id = $1 FOR UPDATE",
        )
        .bind(code_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        match existing {
            None => return Err(ConferenceError::CodeNotFound(code_id)),
            Some(code) if code.result.is_some() => {
                return Err(ConferenceError::ResultAlreadyRecorded(code_id))
            }
            Some(_) => {}
        }

        let (sql, values) = Query::update()
            .table(Alias::new("conference_code"))
            .value(Alias::new("result"), result)
            .and_where(Expr::col(Alias::new("id")).eq(code_id))
            .and_where(Expr::col(Alias::new("result")).is_null())
            .returning(Query::returning().columns([
                Alias::new("id"),
                Alias::new("code"),
                Alias::new("result"),
            ]))
            .build_sqlx(PostgresQueryBuilder);

        let code = sqlx::query_as_with::<_, Code, _>(&sql, values)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(ConferenceError::ResultAlreadyRecorded(code_id))?;

        // Only the session's latest run holds the run state
        sqlx::query(
            r#"
            UPDATE session_conference
            SET code_state = $1,
                updated_at = NOW()
            WHERE session_id = $2
                AND latest_code = $3
            "#,
        )
        .bind(NOT_RUNNING)
        .bind(session_id)
        .bind(code_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(code)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let PgConferenceTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let PgConferenceTx { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
