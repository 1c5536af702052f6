use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, error};

use crate::error::{ConferenceError, Result};

/// Collection holding one document per submitted code run
pub const CODE_COLLECTION: &str = "conferenceCode";

/// Marker written to `stdin` so workers know the document awaits a run
pub const STDIN_RUN: &str = "run";

/// Document key for a code record, `{session_id}-{code_id}`
pub fn code_document_id(session_id: i32, code_id: i32) -> String {
    format!("{}-{}", session_id, code_id)
}

/// Document store that clients observe for code runs and their output
#[async_trait]
pub trait DocumentMirror: Send + Sync {
    /// Create or overwrite the run document for a new code record
    async fn create_code(&self, session_id: i32, code_id: i32) -> Result<()>;

    /// Write the run output into an existing run document
    async fn update_code(&self, session_id: i32, code_id: i32, result: &str) -> Result<()>;
}

/// Mirror backed by the Firestore REST API
#[derive(Debug)]
pub struct FirestoreMirror {
    client: Client,
    documents_url: String,
    access_token: Option<String>,
}

impl FirestoreMirror {
    pub fn new(base_url: &str, project_id: &str, access_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ConferenceError::Mirror(format!("Failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            documents_url: format!(
                "{}/projects/{}/databases/(default)/documents/{}",
                base_url.trim_end_matches('/'),
                project_id,
                CODE_COLLECTION
            ),
            access_token,
        })
    }

    fn document_url(&self, session_id: i32, code_id: i32) -> String {
        format!("{}/{}", self.documents_url, code_document_id(session_id, code_id))
    }

    async fn patch(&self, url: &str, query: &[(&str, &str)], body: Value) -> Result<()> {
        let mut request = self.client.patch(url).query(query).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConferenceError::Mirror(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ConferenceError::Mirror(format!("Document {} not found", url))),
            status => {
                let text = response.text().await.unwrap_or_default();
                error!("Firestore request to {} failed with {}: {}", url, status, text);
                Err(ConferenceError::Mirror(format!("Firestore returned {}", status)))
            }
        }
    }
}

fn new_code_fields(session_id: i32, code_id: i32, timestamp: DateTime<Utc>) -> Value {
    json!({
        "fields": {
            "sessionId": { "integerValue": session_id.to_string() },
            "codeId": { "integerValue": code_id.to_string() },
            "timestamp": { "timestampValue": timestamp.to_rfc3339() },
            "stdin": { "stringValue": STDIN_RUN },
        }
    })
}

#[async_trait]
impl DocumentMirror for FirestoreMirror {
    async fn create_code(&self, session_id: i32, code_id: i32) -> Result<()> {
        let url = self.document_url(session_id, code_id);
        // PATCH without an update mask replaces the whole document
        self.patch(&url, &[], new_code_fields(session_id, code_id, Utc::now()))
            .await?;
        debug!("Mirrored code {} for session {}", code_id, session_id);
        Ok(())
    }

    async fn update_code(&self, session_id: i32, code_id: i32, result: &str) -> Result<()> {
        let url = self.document_url(session_id, code_id);
        let body = json!({ "fields": { "stdout": { "stringValue": result } } });
        self.patch(
            &url,
            &[
                ("updateMask.fieldPaths", "stdout"),
                ("currentDocument.exists", "true"),
            ],
            body,
        )
        .await?;
        debug!("Mirrored result of code {} for session {}", code_id, session_id);
        Ok(())
    }
}

/// A run document as held by [`MemoryMirror`]
#[derive(Debug, Clone, PartialEq)]
pub struct MirroredCode {
    pub session_id: i32,
    pub code_id: i32,
    pub timestamp: DateTime<Utc>,
    pub stdin: String,
    pub stdout: Option<String>,
}

/// Mirror kept in process memory, used when no Firestore project is configured
#[derive(Debug, Default)]
pub struct MemoryMirror {
    documents: Mutex<HashMap<String, MirroredCode>>,
    #[cfg(test)]
    unavailable: std::sync::atomic::AtomicBool,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn document(&self, session_id: i32, code_id: i32) -> Option<MirroredCode> {
        self.documents
            .lock()
            .ok()?
            .get(&code_document_id(session_id, code_id))
            .cloned()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.documents.lock().map(|d| d.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ConferenceError::Mirror("document store unavailable".to_string()));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_available(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl DocumentMirror for MemoryMirror {
    async fn create_code(&self, session_id: i32, code_id: i32) -> Result<()> {
        self.check_available()?;
        let mut documents = self
            .documents
            .lock()
            .map_err(|_| ConferenceError::Mirror("mirror lock poisoned".to_string()))?;
        documents.insert(
            code_document_id(session_id, code_id),
            MirroredCode {
                session_id,
                code_id,
                timestamp: Utc::now(),
                stdin: STDIN_RUN.to_string(),
                stdout: None,
            },
        );
        Ok(())
    }

    async fn update_code(&self, session_id: i32, code_id: i32, result: &str) -> Result<()> {
        self.check_available()?;
        let mut documents = self
            .documents
            .lock()
            .map_err(|_| ConferenceError::Mirror("mirror lock poisoned".to_string()))?;
        let key = code_document_id(session_id, code_id);
        let document = documents
            .get_mut(&key)
            .ok_or_else(|| ConferenceError::Mirror(format!("Document {} not found", key)))?;
        document.stdout = Some(result.to_string());
        Ok(())
    }
}
