//! Session state for one voice interaction
//!
//! The session is owned by the orchestrator and shared with the UI through
//! `SharedSession`. All transitions go through the methods on `Session`, which
//! reject illegal moves instead of leaving the state half-updated.

use crate::error::ErrorKind;
use crate::selector::ProviderKind;
use crate::vad::VadMode;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Session lifecycle state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No capture, no connection
    #[default]
    Idle,
    /// `start()` in flight
    Initializing,
    /// Capture and connection live
    Listening,
    /// Connection live, capture gated
    Muted,
    /// Tearing down capture and connection
    Stopping,
    /// Start or runtime failure, retryable
    Error,
}

impl SessionStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionStatus::Idle)
    }

    /// Check if the provider connection is live
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Listening | SessionStatus::Muted)
    }

    /// Check if a `start()` call should be ignored
    pub fn is_starting_or_live(&self) -> bool {
        matches!(
            self,
            SessionStatus::Initializing | SessionStatus::Listening | SessionStatus::Muted
        )
    }

    /// Check if `start()` may begin from this state
    pub fn can_start(&self) -> bool {
        matches!(self, SessionStatus::Idle | SessionStatus::Error)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "Idle"),
            SessionStatus::Initializing => write!(f, "Initializing"),
            SessionStatus::Listening => write!(f, "Listening"),
            SessionStatus::Muted => write!(f, "Muted"),
            SessionStatus::Stopping => write!(f, "Stopping"),
            SessionStatus::Error => write!(f, "Error"),
        }
    }
}

/// A transcript line produced by the active provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl TranscriptEvent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn at(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            timestamp: at.timestamp_millis(),
        }
    }
}

/// The single logical voice interaction of a mount
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub status: SessionStatus,
    pub active_provider: Option<ProviderKind>,
    pub vad_mode: Option<VadMode>,
    pub last_error: Option<ErrorKind>,
    /// Number of transcript events accepted since the last start
    pub transcript_count: u64,
    /// Latest transcript text
    pub last_transcript: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self) -> bool {
        self.status == SessionStatus::Listening
    }

    pub fn is_muted(&self) -> bool {
        self.status == SessionStatus::Muted
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            active_provider: self.active_provider,
            vad_mode: self.vad_mode,
            is_listening: self.is_listening(),
            is_muted: self.is_muted(),
            last_error: self.last_error,
            transcript_count: self.transcript_count,
            last_transcript: self.last_transcript.clone(),
        }
    }

    // === State transitions ===

    /// Idle/Error -> Initializing
    ///
    /// Clears any previous error. Returns false if a start is already in
    /// flight, the session is live, or it is stopping.
    pub fn begin_start(&mut self, provider: ProviderKind, vad_mode: VadMode) -> bool {
        if !self.status.can_start() {
            return false;
        }
        self.status = SessionStatus::Initializing;
        self.active_provider = Some(provider);
        self.vad_mode = Some(vad_mode);
        self.last_error = None;
        self.transcript_count = 0;
        self.last_transcript = None;
        true
    }

    /// Initializing -> Listening
    pub fn mark_listening(&mut self) -> bool {
        if self.status != SessionStatus::Initializing {
            return false;
        }
        self.status = SessionStatus::Listening;
        true
    }

    /// Listening <-> Muted; returns the new muted state, or None if not live
    pub fn toggle_mute(&mut self) -> Option<bool> {
        match self.status {
            SessionStatus::Listening => {
                self.status = SessionStatus::Muted;
                Some(true)
            }
            SessionStatus::Muted => {
                self.status = SessionStatus::Listening;
                Some(false)
            }
            _ => None,
        }
    }

    /// Initializing/Listening/Muted -> Error
    pub fn fail(&mut self, kind: ErrorKind) -> bool {
        if !self.status.is_starting_or_live() {
            return false;
        }
        self.status = SessionStatus::Error;
        self.last_error = Some(kind);
        true
    }

    /// Any non-idle state -> Stopping
    pub fn begin_stop(&mut self) -> bool {
        if self.status.is_idle() || self.status == SessionStatus::Stopping {
            return false;
        }
        self.status = SessionStatus::Stopping;
        true
    }

    /// Stopping (or anything) -> Idle
    pub fn finish_stop(&mut self) {
        self.status = SessionStatus::Idle;
        self.active_provider = None;
        self.vad_mode = None;
        self.last_error = None;
    }

    /// Accept a transcript while live
    pub fn record_transcript(&mut self, text: &str) -> bool {
        if !self.status.is_live() {
            return false;
        }
        self.transcript_count += 1;
        self.last_transcript = Some(text.to_string());
        true
    }
}

/// Immutable snapshot of session state for the UI
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub active_provider: Option<ProviderKind>,
    pub vad_mode: Option<VadMode>,
    pub is_listening: bool,
    pub is_muted: bool,
    pub last_error: Option<ErrorKind>,
    pub transcript_count: u64,
    pub last_transcript: Option<String>,
}

/// Thread-safe shared session
#[derive(Clone, Default)]
pub struct SharedSession {
    inner: Arc<RwLock<Session>>,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, Session> {
        self.inner.read()
    }

    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, Session> {
        self.inner.write()
    }

    /// Get a snapshot of current state (no lock held after return)
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().snapshot()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.read().status
    }

    pub fn is_listening(&self) -> bool {
        self.inner.read().is_listening()
    }

    pub fn is_muted(&self) -> bool {
        self.inner.read().is_muted()
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.inner.read().last_error
    }
}
