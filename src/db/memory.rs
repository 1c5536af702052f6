use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::db::store::{ConferenceStore, ConferenceTx};
use crate::error::{ConferenceError, Result};
use crate::models::{Code, CodeState, Conference};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    conferences: HashMap<i32, Conference>,
    codes: BTreeMap<i32, Code>,
    next_code_id: i32,
}

/// Conference store kept in process memory. Transactions work on a copy of the state
/// that replaces the shared state on commit.
#[derive(Clone, Default)]
pub struct MemoryConferenceStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conference(&self, session_id: i32) -> Option<Conference> {
        self.state.lock().unwrap().conferences.get(&session_id).cloned()
    }

    pub fn code(&self, code_id: i32) -> Option<Code> {
        self.state.lock().unwrap().codes.get(&code_id).cloned()
    }

    pub fn code_count(&self) -> usize {
        self.state.lock().unwrap().codes.len()
    }

    /// Push a conference's last update into the past
    pub fn backdate(&self, session_id: i32, secs: i64) {
        if let Some(conference) = self.state.lock().unwrap().conferences.get_mut(&session_id) {
            conference.updated_at = conference.updated_at - ChronoDuration::seconds(secs);
        }
    }
}

#[async_trait]
impl ConferenceStore for MemoryConferenceStore {
    async fn begin(&self) -> Result<Box<dyn ConferenceTx>> {
        let working = self.state.lock().unwrap().clone();
        Ok(Box::new(MemoryConferenceTx {
            shared: self.state.clone(),
            working,
        }))
    }
}

struct MemoryConferenceTx {
    shared: Arc<Mutex<MemoryState>>,
    working: MemoryState,
}

#[async_trait]
impl ConferenceTx for MemoryConferenceTx {
    async fn get_or_create_conference(&mut self, session_id: i32) -> Result<Conference> {
        let conference = self
            .working
            .conferences
            .entry(session_id)
            .or_insert_with(|| Conference {
                session_id,
                code_state: CodeState::NotRunning,
                latest_code: None,
                updated_at: Utc::now(),
            });
        Ok(conference.clone())
    }

    async fn create_code(&mut self, session_id: i32, raw_code: &str) -> Result<Code> {
        self.working.next_code_id += 1;
        let code = Code {
            id: self.working.next_code_id,
            code: raw_code.to_string(),
            result: None,
        };
        self.working.codes.insert(code.id, code.clone());

        if let Some(conference) = self.working.conferences.get_mut(&session_id) {
            conference.latest_code = Some(code.id);
            conference.code_state = CodeState::Running;
            conference.updated_at = Utc::now();
        }
        Ok(code)
    }

    async fn update_code(&mut self, session_id: i32, code_id: i32, result: &str) -> Result<Code> {
        let code = self
            .working
            .codes
            .get_mut(&code_id)
            .ok_or(ConferenceError::CodeNotFound(code_id))?;
        if code.result.is_some() {
            return Err(ConferenceError::ResultAlreadyRecorded(code_id));
        }
        code.result = Some(result.to_string());
        let code = code.clone();

        if let Some(conference) = self.working.conferences.get_mut(&session_id) {
            if conference.latest_code == Some(code_id) {
                conference.code_state = CodeState::NotRunning;
                conference.updated_at = Utc::now();
            }
        }
        Ok(code)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryConferenceTx { shared, working } = *self;
        *shared.lock().unwrap() = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_changes_are_discarded() {
        let store = MemoryConferenceStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.get_or_create_conference(7).await.unwrap();
        tx.create_code(7, "print(1)").await.unwrap();
        drop(tx);

        assert!(store.conference(7).is_none());
        assert_eq!(store.code_count(), 0);
    }

    #[tokio::test]
    async fn test_result_releases_latest_run_only() {
        let store = MemoryConferenceStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.get_or_create_conference(7).await.unwrap();
        let first = tx.create_code(7, "a").await.unwrap();
        let second = tx.create_code(7, "b").await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.update_code(7, first.id, "out-a").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.conference(7).unwrap().code_state, CodeState::Running);

        let mut tx = store.begin().await.unwrap();
        tx.update_code(7, second.id, "out-b").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.conference(7).unwrap().code_state, CodeState::NotRunning);
    }
}
