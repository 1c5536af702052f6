use moka::sync::Cache;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::dbconference;

/// The tutoring session behind a conference
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionCtx {
    pub session_id: i32,
}

static SESSION_CTX_CACHE: OnceLock<Cache<Uuid, SessionCtx>> = OnceLock::new();

fn build_cache() -> Cache<Uuid, SessionCtx> {
    Cache::builder()
        .max_capacity(100_000)
        .time_to_idle(Duration::from_secs(5 * 60))
        .build()
}

pub fn init_session_ctx_cache() {
    SESSION_CTX_CACHE.get_or_init(build_cache);
    info!("Session cache initialized");
}

fn get_session_ctx_cache() -> &'static Cache<Uuid, SessionCtx> {
    SESSION_CTX_CACHE.get_or_init(build_cache)
}

/// Number of conferences with a cached session
pub fn session_ctx_count() -> u64 {
    get_session_ctx_cache().entry_count()
}

async fn fetch_session_ctx_from_db(conference_id: Uuid) -> Result<Option<SessionCtx>, String> {
    let db = dbconference::get_db().ok_or_else(|| "Database not initialized".to_string())?;

    let session_id = db
        .find_session_by_conference(conference_id)
        .await
        .map_err(|e| {
            error!("Failed to resolve session for conference {}: {}", conference_id, e);
            format!("Failed to resolve session: {}", e)
        })?;

    Ok(session_id.map(|session_id| SessionCtx { session_id }))
}

/// Resolve the session of a conference, caching hits. Unknown conferences are not cached.
pub async fn get_or_fetch_session_ctx(conference_id: Uuid) -> Result<Option<SessionCtx>, String> {
    let cache = get_session_ctx_cache();

    if let Some(ctx) = cache.get(&conference_id) {
        return Ok(Some(ctx));
    }

    info!("Session context cache miss for conference {}. Loading from database.", conference_id);
    let fetched = fetch_session_ctx_from_db(conference_id).await?;

    if let Some(ctx) = fetched {
        cache.insert(conference_id, ctx);
    }
    Ok(fetched)
}
