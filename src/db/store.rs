use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Code, Conference};

/// Relational store holding conferences and their code records
#[async_trait]
pub trait ConferenceStore: Send + Sync {
    /// Open a transaction. Dropping it without commit rolls it back.
    async fn begin(&self) -> Result<Box<dyn ConferenceTx>>;
}

/// Conference operations scoped to one transaction
#[async_trait]
pub trait ConferenceTx: Send {
    /// Fetch the conference for a session, inserting it as `not_running` on a miss
    async fn get_or_create_conference(&mut self, session_id: i32) -> Result<Conference>;

    /// Insert a code record and make it the session's latest, running code
    async fn create_code(&mut self, session_id: i32, raw_code: &str) -> Result<Code>;

    /// Record the result of a code run and release the session's run state
    async fn update_code(&mut self, session_id: i32, code_id: i32, result: &str) -> Result<Code>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
