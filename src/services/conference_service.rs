use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::clients::DocumentMirror;
use crate::db::{ConferenceStore, ConferenceTx};
use crate::error::{ConferenceError, Result};
use crate::models::Code;
use crate::services::conference_publisher::ConferencePublisher;

/// How long a `running` conference blocks new submissions without a result
pub const RUN_COOL_DOWN: Duration = Duration::from_secs(60);

/// Records submitted code, mirrors it to the document store and dispatches it to workers
pub struct ConferenceService {
    store: Arc<dyn ConferenceStore>,
    mirror: Arc<dyn DocumentMirror>,
    publisher: ConferencePublisher,
}

async fn rollback(tx: Box<dyn ConferenceTx>) {
    if let Err(e) = tx.rollback().await {
        warn!("Failed to roll back conference transaction: {}", e);
    }
}

impl ConferenceService {
    pub fn new(
        store: Arc<dyn ConferenceStore>,
        mirror: Arc<dyn DocumentMirror>,
        publisher: ConferencePublisher,
    ) -> Self {
        Self {
            store,
            mirror,
            publisher,
        }
    }

    #[cfg(test)]
    pub fn publisher(&self) -> &ConferencePublisher {
        &self.publisher
    }

    /// Record a code run for a session and hand it to the execution workers.
    ///
    /// The code record is committed before it is mirrored and published. If either of
    /// those fails the record stays and [`ConferenceError::Dispatch`] carries its ID.
    pub async fn submit_code(&self, session_id: i32, raw_code: &str, language: &str) -> Result<i32> {
        // Unknown languages are rejected before anything is written
        self.publisher.topic_for(language)?;

        let mut tx = self.store.begin().await?;
        let code = match record_code(&mut *tx, session_id, raw_code).await {
            Ok(code) => code,
            Err(e) => {
                rollback(tx).await;
                return Err(e);
            }
        };
        tx.commit().await?;
        info!("Recorded code {} for session {}", code.id, session_id);

        let failures = self.dispatch(session_id, &code, language).await;
        if !failures.is_empty() {
            let reason = failures.join("; ");
            error!("Code {} for session {} was recorded but not dispatched: {}", code.id, session_id, reason);
            return Err(ConferenceError::Dispatch {
                code_id: code.id,
                reason,
            });
        }

        Ok(code.id)
    }

    /// Mirror and publish independently. Returns one entry per failed side effect.
    async fn dispatch(&self, session_id: i32, code: &Code, language: &str) -> Vec<String> {
        let (mirrored, published) = tokio::join!(
            self.mirror.create_code(session_id, code.id),
            self.publisher
                .publish_code(session_id, code.id, &code.code, language),
        );

        let mut failures = Vec::new();
        if let Err(e) = mirrored {
            failures.push(format!("mirror: {e}"));
        }
        if let Err(e) = published {
            failures.push(format!("publish: {e}"));
        }
        failures
    }

    /// Store the output of a code run.
    ///
    /// The document store is written first. A failed relational write rolls back but
    /// leaves the mirrored result in place.
    pub async fn set_code_result(&self, session_id: i32, code_id: i32, result: &str) -> Result<()> {
        let mut tx = self.store.begin().await?;

        if let Err(e) = self.mirror.update_code(session_id, code_id, result).await {
            rollback(tx).await;
            return Err(e);
        }

        match tx.update_code(session_id, code_id, result).await {
            Ok(_) => tx.commit().await?,
            Err(e) => {
                warn!("Result of code {} mirrored but not stored: {}", code_id, e);
                rollback(tx).await;
                return Err(e);
            }
        }

        info!("Stored result of code {} for session {}", code_id, session_id);
        Ok(())
    }
}

async fn record_code(tx: &mut dyn ConferenceTx, session_id: i32, raw_code: &str) -> Result<Code> {
    let conference = tx.get_or_create_conference(session_id).await?;
    if conference.is_run_in_progress(Utc::now(), RUN_COOL_DOWN) {
        return Err(ConferenceError::RunInProgress(session_id));
    }
    tx.create_code(session_id, raw_code).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MemoryMirror, MemoryPublisher, Publisher};
    use crate::db::memory::MemoryConferenceStore;
    use crate::models::CodeState;
    use crate::services::conference_publisher::{TopicBindings, GO_LANG, JAVASCRIPT, PYTHON};
    use tokio::sync::{mpsc, oneshot};

    struct Fixture {
        store: MemoryConferenceStore,
        mirror: Arc<MemoryMirror>,
        bus: Arc<MemoryPublisher>,
        service: ConferenceService,
    }

    fn bindings() -> TopicBindings {
        TopicBindings::new([
            (JAVASCRIPT, "javascript-topic"),
            (PYTHON, "python-topic"),
            (GO_LANG, "go-topic"),
        ])
    }

    async fn fixture() -> Fixture {
        let fixture = fixture_without_topics();
        fixture.service.publisher().create_topics().await.unwrap();
        fixture
    }

    fn fixture_without_topics() -> Fixture {
        let store = MemoryConferenceStore::new();
        let mirror = Arc::new(MemoryMirror::new());
        let bus = Arc::new(MemoryPublisher::new());
        let service = ConferenceService::new(
            Arc::new(store.clone()),
            mirror.clone(),
            ConferencePublisher::new(bus.clone(), bindings()),
        );
        Fixture {
            store,
            mirror,
            bus,
            service,
        }
    }

    async fn listen(bus: &MemoryPublisher, topic: &str) -> (oneshot::Sender<()>, mpsc::Receiver<Vec<u8>>) {
        let (abort_tx, abort_rx) = oneshot::channel();
        let rx = bus.subscribe(topic, abort_rx).await.unwrap();
        (abort_tx, rx)
    }

    #[tokio::test]
    async fn test_first_submission_creates_conference_and_code() {
        let f = fixture().await;
        let (_abort, mut python) = listen(&f.bus, "python-topic").await;

        let code_id = f.service.submit_code(42, "print(1)", "python").await.unwrap();

        let conference = f.store.conference(42).unwrap();
        assert_eq!(conference.code_state, CodeState::Running);
        assert_eq!(conference.latest_code, Some(code_id));
        assert_eq!(f.store.code_count(), 1);

        let code = f.store.code(code_id).unwrap();
        assert_eq!(code.code, "print(1)");
        assert_eq!(code.result, None);

        let doc = f.mirror.document(42, code_id).unwrap();
        assert_eq!(doc.stdin, "run");
        assert_eq!(doc.stdout, None);

        let payload: serde_json::Value =
            serde_json::from_slice(&python.recv().await.unwrap()).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({ "id": code_id, "sessionId": 42, "code": "print(1)" })
        );
    }

    #[tokio::test]
    async fn test_resubmission_within_cool_down_is_rejected() {
        let f = fixture().await;
        f.service.submit_code(42, "print(1)", "python").await.unwrap();

        let err = f.service.submit_code(42, "print(2)", "python").await.unwrap_err();
        assert!(matches!(err, ConferenceError::RunInProgress(42)));
        assert_eq!(f.store.code_count(), 1);
    }

    #[tokio::test]
    async fn test_submission_allowed_after_cool_down() {
        let f = fixture().await;
        let first = f.service.submit_code(42, "print(1)", "python").await.unwrap();
        f.store.backdate(42, 61);

        let second = f.service.submit_code(42, "print(2)", "python").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(f.store.code_count(), 2);
        assert_eq!(f.store.conference(42).unwrap().latest_code, Some(second));
    }

    #[tokio::test]
    async fn test_sessions_do_not_block_each_other() {
        let f = fixture().await;
        f.service.submit_code(1, "a", "javascript").await.unwrap();
        f.service.submit_code(2, "b", "golang").await.unwrap();
        assert_eq!(f.store.code_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_language_writes_nothing() {
        let f = fixture().await;
        let err = f.service.submit_code(42, "print(1)", "cobol").await.unwrap_err();

        assert!(matches!(err, ConferenceError::UnsupportedLanguage(_)));
        assert!(f.store.conference(42).is_none());
        assert_eq!(f.store.code_count(), 0);
        assert_eq!(f.mirror.len(), 0);
    }

    #[tokio::test]
    async fn test_result_updates_both_stores_and_releases_run() {
        let f = fixture().await;
        let code_id = f.service.submit_code(42, "print(1)", "python").await.unwrap();

        f.service.set_code_result(42, code_id, "1").await.unwrap();

        assert_eq!(f.store.code(code_id).unwrap().result.as_deref(), Some("1"));
        assert_eq!(f.mirror.document(42, code_id).unwrap().stdout.as_deref(), Some("1"));
        assert_eq!(f.store.conference(42).unwrap().code_state, CodeState::NotRunning);

        // The next run no longer waits for the cool-down
        f.service.submit_code(42, "print(2)", "python").await.unwrap();
    }

    #[tokio::test]
    async fn test_result_recorded_once() {
        let f = fixture().await;
        let code_id = f.service.submit_code(42, "print(1)", "python").await.unwrap();
        f.service.set_code_result(42, code_id, "1").await.unwrap();

        let err = f.service.set_code_result(42, code_id, "2").await.unwrap_err();
        assert!(matches!(err, ConferenceError::ResultAlreadyRecorded(id) if id == code_id));
        assert_eq!(f.store.code(code_id).unwrap().result.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_mirror_failure_keeps_committed_code() {
        let f = fixture().await;
        f.mirror.set_unavailable(true);

        let err = f.service.submit_code(42, "print(1)", "python").await.unwrap_err();
        let code_id = match err {
            ConferenceError::Dispatch { code_id, .. } => code_id,
            other => panic!("unexpected error: {other}"),
        };
        assert!(f.store.code(code_id).is_some());
        assert_eq!(f.store.conference(42).unwrap().code_state, CodeState::Running);
    }

    #[tokio::test]
    async fn test_mirror_failure_still_publishes() {
        let f = fixture().await;
        let (_abort, mut python) = listen(&f.bus, "python-topic").await;
        f.mirror.set_unavailable(true);

        let err = f.service.submit_code(42, "print(1)", "python").await.unwrap_err();
        let (code_id, reason) = match err {
            ConferenceError::Dispatch { code_id, reason } => (code_id, reason),
            other => panic!("unexpected error: {other}"),
        };
        assert!(reason.starts_with("mirror:"));
        assert!(!reason.contains("publish:"));

        let payload = tokio::time::timeout(Duration::from_secs(1), python.recv())
            .await
            .unwrap()
            .unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(payload["id"], code_id);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_committed_code() {
        let f = fixture_without_topics();

        let err = f.service.submit_code(42, "print(1)", "python").await.unwrap_err();
        let code_id = match err {
            ConferenceError::Dispatch { code_id, reason } => {
                assert!(reason.starts_with("publish:"));
                code_id
            }
            other => panic!("unexpected error: {other}"),
        };
        assert_eq!(f.store.code_count(), 1);
        // The mirror write is still attempted
        assert!(f.mirror.document(42, code_id).is_some());
    }

    #[tokio::test]
    async fn test_both_dispatch_failures_are_reported() {
        let f = fixture_without_topics();
        f.mirror.set_unavailable(true);

        let err = f.service.submit_code(42, "print(1)", "python").await.unwrap_err();
        match err {
            ConferenceError::Dispatch { reason, .. } => {
                assert!(reason.contains("mirror:"));
                assert!(reason.contains("publish:"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_mirror_failure_leaves_result_unset() {
        let f = fixture().await;
        let code_id = f.service.submit_code(42, "print(1)", "python").await.unwrap();
        f.mirror.set_unavailable(true);

        let err = f.service.set_code_result(42, code_id, "1").await.unwrap_err();
        assert!(matches!(err, ConferenceError::Mirror(_)));
        assert_eq!(f.store.code(code_id).unwrap().result, None);
    }
}
