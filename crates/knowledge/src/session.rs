//! Sessions, their documents and chat history.
//!
//! A session owns its documents, passages and chat turns. Removing a session
//! (explicitly or at expiry) deletes its passages from the vector index
//! first, then the session record, documents and turns in one store
//! operation.

use crate::index::VectorIndex;
use crate::types::{ChatRole, ChatTurn, Document, Session, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use synapse_core::{AppError, AppResult};
use tokio::sync::{Mutex, RwLock};

/// Persistence for session records, documents and chat turns.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put_session(&self, session: &Session) -> AppResult<()>;

    async fn get_session(&self, id: SessionId) -> AppResult<Option<Session>>;

    async fn list_sessions(&self) -> AppResult<Vec<Session>>;

    /// Remove the session with its documents and turns. Returns false when
    /// the session was unknown.
    async fn remove_session(&self, id: SessionId) -> AppResult<bool>;

    /// Record a document and bump the owning session's document count.
    /// Returns the updated session, or `None` when it does not exist.
    async fn add_document(&self, document: &Document) -> AppResult<Option<Session>>;

    async fn documents(&self, id: SessionId) -> AppResult<Vec<Document>>;

    async fn append_turn(&self, turn: &ChatTurn) -> AppResult<()>;

    /// All turns of a session, oldest first.
    async fn turns(&self, id: SessionId) -> AppResult<Vec<ChatTurn>>;
}

/// Everything a store holds. Small enough to keep whole in memory.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    sessions: Vec<Session>,
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    turns: Vec<ChatTurn>,
}

impl StoreState {
    fn put_session(&mut self, session: &Session) {
        match self.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session.clone(),
            None => self.sessions.push(session.clone()),
        }
    }

    fn get_session(&self, id: SessionId) -> Option<Session> {
        self.sessions.iter().find(|s| s.id == id).cloned()
    }

    fn remove_session(&mut self, id: SessionId) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        self.documents.retain(|d| d.session_id != id);
        self.turns.retain(|t| t.session_id != id);
        self.sessions.len() != before
    }

    fn add_document(&mut self, document: &Document) -> Option<Session> {
        let session = self.sessions.iter_mut().find(|s| s.id == document.session_id)?;
        session.document_count += 1;
        let updated = session.clone();
        self.documents.push(document.clone());
        Some(updated)
    }

    fn append_turn(&mut self, turn: &ChatTurn) -> AppResult<()> {
        if !self.sessions.iter().any(|s| s.id == turn.session_id) {
            return Err(AppError::SessionNotFound(turn.session_id.to_string()));
        }
        self.turns.push(turn.clone());
        Ok(())
    }

    fn documents(&self, id: SessionId) -> Vec<Document> {
        self.documents
            .iter()
            .filter(|d| d.session_id == id)
            .cloned()
            .collect()
    }

    fn turns(&self, id: SessionId) -> Vec<ChatTurn> {
        self.turns
            .iter()
            .filter(|t| t.session_id == id)
            .cloned()
            .collect()
    }
}

/// Session store that lives and dies with the process.
#[derive(Default)]
pub struct MemorySessionStore {
    state: RwLock<StoreState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put_session(&self, session: &Session) -> AppResult<()> {
        self.state.write().await.put_session(session);
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> AppResult<Option<Session>> {
        Ok(self.state.read().await.get_session(id))
    }

    async fn list_sessions(&self) -> AppResult<Vec<Session>> {
        Ok(self.state.read().await.sessions.clone())
    }

    async fn remove_session(&self, id: SessionId) -> AppResult<bool> {
        Ok(self.state.write().await.remove_session(id))
    }

    async fn add_document(&self, document: &Document) -> AppResult<Option<Session>> {
        Ok(self.state.write().await.add_document(document))
    }

    async fn documents(&self, id: SessionId) -> AppResult<Vec<Document>> {
        Ok(self.state.read().await.documents(id))
    }

    async fn append_turn(&self, turn: &ChatTurn) -> AppResult<()> {
        self.state.write().await.append_turn(turn)
    }

    async fn turns(&self, id: SessionId) -> AppResult<Vec<ChatTurn>> {
        Ok(self.state.read().await.turns(id))
    }
}

/// Session store persisted as one JSON file.
///
/// Every mutation rewrites the file through a temporary sibling and a
/// rename, so a crash never leaves a half-written file behind.
pub struct JsonSessionStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonSessionStore {
    /// Load the store at `path`; a missing file is an empty store.
    pub async fn open(path: &Path) -> AppResult<Self> {
        let state = match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                AppError::Serialization(format!("Corrupt session store {:?}: {}", path, e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    async fn persist(&self, state: &StoreState) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(state)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonSessionStore {
    // Mutations edit a copy, persist it, and only then replace the live
    // state, so a failed write leaves memory and disk in agreement.
    async fn put_session(&self, session: &Session) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.put_session(session);
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> AppResult<Option<Session>> {
        Ok(self.state.lock().await.get_session(id))
    }

    async fn list_sessions(&self) -> AppResult<Vec<Session>> {
        Ok(self.state.lock().await.sessions.clone())
    }

    async fn remove_session(&self, id: SessionId) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        if !next.remove_session(id) {
            return Ok(false);
        }
        self.persist(&next).await?;
        *state = next;
        Ok(true)
    }

    async fn add_document(&self, document: &Document) -> AppResult<Option<Session>> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let Some(updated) = next.add_document(document) else {
            return Ok(None);
        };
        self.persist(&next).await?;
        *state = next;
        Ok(Some(updated))
    }

    async fn documents(&self, id: SessionId) -> AppResult<Vec<Document>> {
        Ok(self.state.lock().await.documents(id))
    }

    async fn append_turn(&self, turn: &ChatTurn) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.append_turn(turn)?;
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn turns(&self, id: SessionId) -> AppResult<Vec<ChatTurn>> {
        Ok(self.state.lock().await.turns(id))
    }
}

/// Session lifecycle over a store and the vector index.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    index: Arc<dyn VectorIndex>,
    default_ttl: Duration,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        index: Arc<dyn VectorIndex>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            store,
            index,
            default_ttl,
        }
    }

    /// Start a session that expires after `ttl` (or the default TTL).
    pub async fn create(&self, ttl: Option<Duration>) -> AppResult<Session> {
        let now = Utc::now();
        let session = Session {
            id: SessionId::new(),
            created_at: now,
            expires_at: now + ttl.unwrap_or(self.default_ttl),
            document_count: 0,
        };
        self.store.put_session(&session).await?;
        tracing::info!(session = %session.id, expires_at = %session.expires_at, "Created session");
        Ok(session)
    }

    /// Fetch a live session.
    ///
    /// An expired session is deleted on the spot and reported as
    /// `SessionExpired`.
    pub async fn get(&self, id: SessionId) -> AppResult<Session> {
        let session = self
            .store
            .get_session(id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;

        if session.is_expired(Utc::now()) {
            tracing::info!(session = %id, "Session expired; deleting");
            self.delete(id).await?;
            return Err(AppError::SessionExpired(id.to_string()));
        }
        Ok(session)
    }

    pub async fn list(&self) -> AppResult<Vec<Session>> {
        let mut sessions = self.store.list_sessions().await?;
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    pub async fn documents(&self, id: SessionId) -> AppResult<Vec<Document>> {
        self.store.documents(id).await
    }

    /// Attach an ingested document to its session.
    pub async fn record_document(&self, document: &Document) -> AppResult<Session> {
        self.store
            .add_document(document)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(document.session_id.to_string()))
    }

    pub async fn append_turn(
        &self,
        id: SessionId,
        role: ChatRole,
        content: impl Into<String>,
    ) -> AppResult<()> {
        let turn = ChatTurn {
            session_id: id,
            role,
            content: content.into(),
            created_at: Utc::now(),
        };
        self.store.append_turn(&turn).await
    }

    /// The last `limit` turns, oldest first.
    pub async fn recent_turns(&self, id: SessionId, limit: usize) -> AppResult<Vec<ChatTurn>> {
        let turns = self.store.turns(id).await?;
        let skip = turns.len().saturating_sub(limit);
        Ok(turns.into_iter().skip(skip).collect())
    }

    /// Delete a session with everything it owns. Returns the number of
    /// passages removed from the index.
    pub async fn delete(&self, id: SessionId) -> AppResult<usize> {
        let passages = self.index.delete_session(id).await?;
        let existed = self.store.remove_session(id).await?;

        if !existed && passages == 0 {
            return Err(AppError::SessionNotFound(id.to_string()));
        }
        tracing::info!(session = %id, passages, "Deleted session");
        Ok(passages)
    }

    /// Delete every session expired at `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<Vec<SessionId>> {
        let expired: Vec<SessionId> = self
            .store
            .list_sessions()
            .await?
            .into_iter()
            .filter(|s| s.is_expired(now))
            .map(|s| s.id)
            .collect();

        for id in &expired {
            self.delete(*id).await?;
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Purged expired sessions");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::content_hash;
    use crate::index::MemoryVectorIndex;
    use crate::types::{DocumentFormat, DocumentId, Passage, PassageId, Position};
    use tempfile::TempDir;

    fn manager(store: Arc<dyn SessionStore>) -> (SessionManager, Arc<MemoryVectorIndex>) {
        let index = Arc::new(MemoryVectorIndex::new(2, 1000));
        let manager = SessionManager::new(store, index.clone(), Duration::hours(24));
        (manager, index)
    }

    fn document(session: SessionId, name: &str) -> Document {
        Document {
            id: DocumentId::new(),
            session_id: session,
            filename: name.to_string(),
            format: DocumentFormat::Text,
            ingested_at: Utc::now(),
        }
    }

    async fn index_one(index: &MemoryVectorIndex, session: SessionId) {
        let passage = Passage {
            id: PassageId::new(),
            session_id: session,
            document_id: DocumentId::new(),
            document_name: "a.txt".to_string(),
            text: "text".to_string(),
            position: Position {
                page: 1,
                byte_start: 0,
                byte_end: 4,
            },
            ordinal: 0,
            ingested_at: Utc::now(),
            content_hash: content_hash("text"),
        };
        index.insert(session, &passage, &[1.0, 0.0]).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (manager, _) = manager(Arc::new(MemorySessionStore::new()));
        let session = manager.create(None).await.unwrap();

        let fetched = manager.get(session.id).await.unwrap();
        assert_eq!(fetched, session);
        assert_eq!(session.expires_at - session.created_at, Duration::hours(24));

        let missing = manager.get(SessionId::new()).await.unwrap_err();
        assert!(matches!(missing, AppError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_expired_session_is_deleted_on_access() {
        let (manager, index) = manager(Arc::new(MemorySessionStore::new()));
        let session = manager.create(Some(Duration::seconds(-1))).await.unwrap();
        index_one(&index, session.id).await;

        let err = manager.get(session.id).await.unwrap_err();
        assert!(matches!(err, AppError::SessionExpired(_)));
        assert_eq!(index.count(session.id).await.unwrap(), 0);
        assert!(matches!(
            manager.get(session.id).await.unwrap_err(),
            AppError::SessionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (manager, index) = manager(Arc::new(MemorySessionStore::new()));
        let keep = manager.create(None).await.unwrap();
        let gone = manager.create(None).await.unwrap();

        for session in [keep.id, gone.id] {
            index_one(&index, session).await;
            manager.record_document(&document(session, "a.txt")).await.unwrap();
            manager.append_turn(session, ChatRole::User, "hi").await.unwrap();
        }

        assert_eq!(manager.delete(gone.id).await.unwrap(), 1);
        assert!(manager.documents(gone.id).await.unwrap().is_empty());
        assert!(manager.recent_turns(gone.id, 10).await.unwrap().is_empty());
        assert_eq!(index.count(gone.id).await.unwrap(), 0);

        assert_eq!(manager.documents(keep.id).await.unwrap().len(), 1);
        assert_eq!(index.count(keep.id).await.unwrap(), 1);
        assert!(manager.delete(gone.id).await.is_err());
    }

    #[tokio::test]
    async fn test_record_document_counts() {
        let (manager, _) = manager(Arc::new(MemorySessionStore::new()));
        let session = manager.create(None).await.unwrap();

        manager.record_document(&document(session.id, "a.txt")).await.unwrap();
        let updated = manager.record_document(&document(session.id, "b.txt")).await.unwrap();
        assert_eq!(updated.document_count, 2);

        let orphan = manager.record_document(&document(SessionId::new(), "c.txt")).await;
        assert!(orphan.is_err());
        let orphan_turn = manager.append_turn(SessionId::new(), ChatRole::User, "hi").await;
        assert!(matches!(orphan_turn, Err(AppError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_recent_turns_are_chronological() {
        let (manager, _) = manager(Arc::new(MemorySessionStore::new()));
        let session = manager.create(None).await.unwrap();
        for i in 0..6 {
            let role = if i % 2 == 0 { ChatRole::User } else { ChatRole::Assistant };
            manager.append_turn(session.id, role, format!("turn {}", i)).await.unwrap();
        }

        let recent = manager.recent_turns(session.id, 3).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["turn 3", "turn 4", "turn 5"]);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (manager, _) = manager(Arc::new(MemorySessionStore::new()));
        let live = manager.create(None).await.unwrap();
        let old = manager.create(Some(Duration::minutes(5))).await.unwrap();

        let purged = manager
            .purge_expired(Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(purged, vec![old.id]);

        let remaining: Vec<SessionId> = manager.list().await.unwrap().iter().map(|s| s.id).collect();
        assert_eq!(remaining, vec![live.id]);
    }

    #[tokio::test]
    async fn test_json_store_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".synapse").join("sessions.json");

        let session_id = {
            let store = Arc::new(JsonSessionStore::open(&path).await.unwrap());
            let (manager, _) = manager(store);
            let session = manager.create(None).await.unwrap();
            manager.record_document(&document(session.id, "a.txt")).await.unwrap();
            manager.append_turn(session.id, ChatRole::User, "hello").await.unwrap();
            session.id
        };

        let store = Arc::new(JsonSessionStore::open(&path).await.unwrap());
        let (manager, _) = manager(store);
        let session = manager.get(session_id).await.unwrap();
        assert_eq!(session.document_count, 1);
        assert_eq!(manager.recent_turns(session_id, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_store_keeps_state_when_write_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sessions.json");
        let store = Arc::new(JsonSessionStore::open(&path).await.unwrap());
        let (manager, _) = manager(store.clone());
        let session = manager.create(None).await.unwrap();
        manager.append_turn(session.id, ChatRole::User, "hello").await.unwrap();

        // A directory in place of the file makes the final rename fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), b"x").unwrap();

        let other = Session {
            id: SessionId::new(),
            ..session.clone()
        };
        assert!(store.put_session(&other).await.is_err());
        assert!(store.add_document(&document(session.id, "b.txt")).await.is_err());
        assert!(manager.append_turn(session.id, ChatRole::User, "again").await.is_err());
        assert!(store.remove_session(session.id).await.is_err());

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions, vec![session.clone()]);
        assert!(store.documents(session.id).await.unwrap().is_empty());
        let turns = store.turns(session.id).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "hello");
    }
}
