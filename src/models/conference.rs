use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

pub const RUNNING: &str = "running";
pub const NOT_RUNNING: &str = "not_running";

/// Run state of the code attached to a conference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeState {
    Running,
    NotRunning,
}

impl CodeState {
    /// Unknown values are treated as running so they fall under the cool-down.
    pub fn from_db(value: &str) -> Self {
        match value {
            NOT_RUNNING => CodeState::NotRunning,
            _ => CodeState::Running,
        }
    }
}

/// Live-collaboration state for one tutoring session
#[derive(Debug, Clone, Serialize)]
pub struct Conference {
    pub session_id: i32,
    pub code_state: CodeState,
    #[serde(skip)]
    pub latest_code: Option<i32>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

impl Conference {
    /// True while a submitted run may still be executing.
    ///
    /// A conference left `running` is released once `cool_down` has elapsed since its
    /// last update, even if no result ever came back.
    pub fn is_run_in_progress(&self, now: DateTime<Utc>, cool_down: Duration) -> bool {
        if self.code_state == CodeState::NotRunning {
            return false;
        }
        match (now - self.updated_at).to_std() {
            Ok(elapsed) => elapsed < cool_down,
            // updated_at in the future (clock skew between app and database)
            Err(_) => true,
        }
    }
}

/// Code submitted during a conference
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Code {
    #[serde(skip)]
    pub id: i32,
    #[serde(skip)]
    pub code: String,
    pub result: Option<String>,
}

/// Request body for submitting code
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct SubmitCodeRequest {
    pub code: String,
    pub language: String,
}

/// Response returned once code is recorded and dispatched
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct SubmitCodeResponse {
    pub id: i32,
}

/// Request body posted by execution workers
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct CodeResultRequest {
    pub result: String,
}

/// Response returned after storing a result
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct CodeResultResponse {
    pub success: bool,
}
