//! Continuity across client-side navigations
//!
//! A navigation destroys and recreates the chat widget. The continuity manager
//! keeps the few flags needed to put it back: whether the chat panel was open,
//! whether voice was live, and a one-shot autostart seed consumed on the next
//! mount. Storage is scoped to the browser context and never leaves it.

use crate::broadcast::ConversationBus;
use crate::{ConciergeError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const KEY_CHAT_OPEN: &str = "chatOpen";
pub const KEY_AUTOSTART_VOICE: &str = "autostartVoice";
pub const KEY_VOICE_ACTIVE: &str = "voiceActive";
pub const KEY_CONVERSATION_ID: &str = "conversationId";

/// Key/value storage scoped to the browser context
pub trait ContinuityStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store (one tab)
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ContinuityStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Store persisted as a JSON object on disk
///
/// Every write rewrites the file, so a new process sees the last state.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or create on first write) the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };
        debug!("Opened continuity store at {:?} ({} keys)", path, entries.len());
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl ContinuityStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Typed access to the persisted continuity flags
#[derive(Clone)]
pub struct ContinuityManager {
    store: Arc<dyn ContinuityStore>,
    bus: ConversationBus,
}

impl ContinuityManager {
    pub fn new(store: Arc<dyn ContinuityStore>) -> Self {
        Self {
            store,
            bus: ConversationBus::new(),
        }
    }

    /// Manager over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// The underlying store (shared with the snapshot log)
    pub fn store(&self) -> Arc<dyn ContinuityStore> {
        Arc::clone(&self.store)
    }

    /// Live snapshot and intent hubs shared by every clone of this manager
    pub fn bus(&self) -> &ConversationBus {
        &self.bus
    }

    fn read_flag(&self, key: &str) -> bool {
        self.store.get(key).as_deref() == Some("1")
    }

    pub fn set_chat_open(&self, open: bool) -> Result<()> {
        debug!("Persisting {}={}", KEY_CHAT_OPEN, flag(open));
        self.store.set(KEY_CHAT_OPEN, flag(open))
    }

    pub fn chat_open(&self) -> bool {
        self.read_flag(KEY_CHAT_OPEN)
    }

    pub fn set_voice_active(&self, active: bool) -> Result<()> {
        debug!("Persisting {}={}", KEY_VOICE_ACTIVE, flag(active));
        self.store.set(KEY_VOICE_ACTIVE, flag(active))
    }

    pub fn voice_active(&self) -> bool {
        self.read_flag(KEY_VOICE_ACTIVE)
    }

    /// Seed a voice autostart for the next mount
    pub fn arm_autostart(&self) -> Result<()> {
        info!("Arming voice autostart for next mount");
        self.store.set(KEY_AUTOSTART_VOICE, "1")
    }

    /// Read the autostart seed and clear it
    ///
    /// The flag is cleared before returning, so a refresh or back-navigation
    /// without a fresh seed does not autostart again.
    pub fn consume_autostart(&self) -> bool {
        let armed = self.read_flag(KEY_AUTOSTART_VOICE);
        if let Err(e) = self.store.set(KEY_AUTOSTART_VOICE, "0") {
            warn!("Failed to clear autostart flag: {}", e);
        }
        if armed {
            info!("Consumed voice autostart seed");
        }
        armed
    }

    /// Conversation id for this browser context, created on first use
    pub fn conversation_id(&self) -> String {
        if let Some(id) = self.store.get(KEY_CONVERSATION_ID).filter(|id| !id.is_empty()) {
            return id;
        }
        let id = Uuid::new_v4().to_string();
        if let Err(e) = self.store.set(KEY_CONVERSATION_ID, &id) {
            warn!("Failed to persist conversation id: {}", e);
        }
        id
    }

    /// Replace the conversation id (e.g. when the user starts a new chat)
    pub fn set_conversation_id(&self, id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(ConciergeError::Storage("conversation id must not be empty".into()));
        }
        self.store.set(KEY_CONVERSATION_ID, id)
    }

    /// Run `task` after `delay` unless the returned handle is cancelled or dropped
    pub fn schedule_resume<F>(&self, delay: Duration, task: F) -> ResumeHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!("Scheduling voice resume in {}ms", delay.as_millis());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        ResumeHandle {
            handle: Some(handle),
        }
    }
}

/// Pending debounced resume
///
/// Dropping the handle cancels the resume if it has not fired yet.
#[derive(Debug)]
pub struct ResumeHandle {
    handle: Option<JoinHandle<()>>,
}

impl ResumeHandle {
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for ResumeHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
