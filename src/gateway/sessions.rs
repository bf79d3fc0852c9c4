//! Session store - conversation history per session id
//!
//! Sessions are loaded lazily on first access and, when a directory is
//! configured, persisted as one JSON file per session.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agent::Message;
use crate::error::Error;
use crate::Result;

use super::protocol::DEFAULT_SESSION_ID;

/// On-disk shape of a session file
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    id: String,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Map from sanitized session id to its message history.
pub struct SessionStore {
    dir: Option<PathBuf>,
    sessions: Mutex<HashMap<String, Vec<Message>>>,
}

impl SessionStore {
    /// Store persisting under `dir` (created on first write).
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// History of a session, empty for a new one.
    ///
    /// A file that cannot be read is not cached, so a later `append` fails
    /// instead of overwriting it.
    pub async fn get(&self, session_id: &str) -> Vec<Message> {
        let id = sanitize_id(session_id);
        match self.ensure_loaded(&id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Serving session {} without history: {}", id, e);
                Vec::new()
            }
        }
    }

    /// Append one user/assistant exchange and rewrite the session file.
    pub async fn append(&self, session_id: &str, user_text: &str, assistant_text: &str) -> Result<()> {
        let id = sanitize_id(session_id);
        self.ensure_loaded(&id).await?;

        let snapshot = {
            let mut sessions = self.lock();
            let messages = sessions.entry(id.clone()).or_default();
            messages.push(Message::user(user_text));
            messages.push(Message::assistant(assistant_text));
            messages.clone()
        };

        debug!("Session {} now has {} messages", id, snapshot.len());
        self.persist(&id, snapshot).await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Message>>> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(format!("{}.json", id)))
    }

    async fn ensure_loaded(&self, id: &str) -> Result<Vec<Message>> {
        let cached = self.lock().get(id).cloned();
        if let Some(messages) = cached {
            return Ok(messages);
        }

        let loaded = self.load(id).await?;
        Ok(self.lock().entry(id.to_string()).or_insert(loaded).clone())
    }

    /// Read a session file. Missing means new; a file that does not parse is
    /// moved to `<id>.json.corrupt` so the next write cannot destroy it.
    async fn load(&self, id: &str) -> Result<Vec<Message>> {
        let Some(path) = self.path_for(id) else {
            return Ok(Vec::new());
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Session(format!("failed to read {:?}: {}", path, e))),
        };

        match serde_json::from_slice::<SessionRecord>(&bytes) {
            Ok(record) => {
                debug!("Loaded session {} ({} messages)", id, record.messages.len());
                Ok(record.messages)
            }
            Err(parse_err) => {
                let aside = path.with_extension("json.corrupt");
                tokio::fs::rename(&path, &aside).await.map_err(|e| {
                    Error::Session(format!(
                        "{:?} does not parse ({}) and could not be moved aside: {}",
                        path, parse_err, e
                    ))
                })?;
                warn!(
                    "Session {} did not parse ({}), moved to {:?}; starting empty",
                    id, parse_err, aside
                );
                Ok(Vec::new())
            }
        }
    }

    async fn persist(&self, id: &str, messages: Vec<Message>) -> Result<()> {
        let Some(path) = self.path_for(id) else {
            return Ok(());
        };

        let record = SessionRecord {
            id: id.to_string(),
            messages,
            updated_at: Some(Utc::now()),
        };
        let content = serde_json::to_string_pretty(&record)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persist_error(id, &path, e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| persist_error(id, &path, e))
    }
}

fn persist_error(id: &str, path: &Path, err: io::Error) -> Error {
    warn!("Failed to persist session {}: {}", id, err);
    Error::Session(format!("failed to write {:?}: {}", path, err))
}

/// Restrict a session id to `[A-Za-z0-9_-]`; anything else becomes `_`.
pub fn sanitize_id(session_id: &str) -> String {
    if session_id.is_empty() {
        return DEFAULT_SESSION_ID.to_string();
    }
    session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Role;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("work-1_a"), "work-1_a");
        assert_eq!(sanitize_id("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_id("a b.c"), "a_b_c");
        assert_eq!(sanitize_id(""), "main");
    }

    #[tokio::test]
    async fn test_append_adds_exactly_one_exchange() {
        let store = SessionStore::in_memory();
        assert!(store.get("main").await.is_empty());

        store.append("main", "hi", "hello").await.unwrap();
        store.append("main", "again", "sure").await.unwrap();

        let history = store.get("main").await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], Message::user("hi"));
        assert_eq!(history[1], Message::assistant("hello"));
        assert_eq!(history[3].role, Role::Assistant);
        assert!(store.get("other").await.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_survive_a_new_store() {
        let tmp = TempDir::new().unwrap();
        {
            let store = SessionStore::open(tmp.path().join("sessions"));
            store.append("work", "remember 42", "noted").await.unwrap();
        }

        let path = tmp.path().join("sessions").join("work.json");
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["id"], "work");
        assert!(raw["updated_at"].is_string());

        let reopened = SessionStore::open(tmp.path().join("sessions"));
        let history = reopened.get("work").await;
        assert_eq!(history, vec![Message::user("remember 42"), Message::assistant("noted")]);

        reopened.append("work", "and?", "still 42").await.unwrap();
        assert_eq!(reopened.get("work").await.len(), 4);
    }

    #[tokio::test]
    async fn test_unsafe_ids_share_the_sanitized_file() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::open(tmp.path());
        store.append("a/b", "x", "y").await.unwrap();

        assert!(tmp.path().join("a_b.json").exists());
        assert_eq!(store.get("a_b").await.len(), 2);
    }

    #[tokio::test]
    async fn test_record_without_timestamp_keeps_its_history() {
        let tmp = TempDir::new().unwrap();
        let legacy = serde_json::json!({
            "id": "work",
            "messages": [Message::user("remember 42"), Message::assistant("noted")],
        });
        std::fs::write(tmp.path().join("work.json"), legacy.to_string()).unwrap();

        let store = SessionStore::open(tmp.path());
        assert_eq!(store.get("work").await.len(), 2);
        store.append("work", "next", "ok").await.unwrap();

        let reopened = SessionStore::open(tmp.path());
        let history = reopened.get("work").await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], Message::user("remember 42"));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_moved_aside_not_overwritten() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("broken.json"), "{ nope").unwrap();

        let store = SessionStore::open(tmp.path());
        assert!(store.get("broken").await.is_empty());

        let aside = tmp.path().join("broken.json.corrupt");
        assert_eq!(std::fs::read_to_string(&aside).unwrap(), "{ nope");

        store.append("broken", "fresh", "start").await.unwrap();
        assert_eq!(std::fs::read_to_string(&aside).unwrap(), "{ nope");

        let reopened = SessionStore::open(tmp.path());
        assert_eq!(reopened.get("broken").await.len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_file_blocks_append() {
        let tmp = TempDir::new().unwrap();
        // A directory where the session file should be cannot be read as one.
        std::fs::create_dir(tmp.path().join("stuck.json")).unwrap();

        let store = SessionStore::open(tmp.path());
        assert!(store.get("stuck").await.is_empty());

        let err = store.append("stuck", "hi", "hello").await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert!(tmp.path().join("stuck.json").is_dir());
    }
}
