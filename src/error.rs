//! Error types for the voice concierge
//!
//! Mirrors the session error taxonomy: environment problems detected at mount
//! disable voice for the whole mount, provider failures are retryable, and
//! dispatch failures stay scoped to a single function-call turn.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Voice concierge errors
#[derive(Error, Debug, Clone)]
pub enum ConciergeError {
    /// No microphone capability in this environment
    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// The user (or platform policy) refused microphone access
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Connection, handshake or timeout failure while starting a provider
    #[error("Provider init failed: {0}")]
    ProviderInitFailed(String),

    /// Mid-session provider failure
    #[error("Provider runtime error: {0}")]
    ProviderRuntimeError(String),

    /// The property-search collaborator failed a function call
    #[error("Function call dispatch failed: {0}")]
    DispatchFailed(String),

    /// Voice was switched off by launch parameters or configuration
    #[error("Voice is disabled for this mount")]
    VoiceDisabled,

    /// Provider selection has not been resolved yet
    #[error("Provider selection is still pending")]
    SelectionPending,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Continuity storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Channel communication error
    #[error("Channel error: {0}")]
    Channel(String),
}

/// Discriminant of [`ConciergeError`], stored on the session as `last_error`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedEnvironment,
    PermissionDenied,
    ProviderInitFailed,
    ProviderRuntimeError,
    DispatchFailed,
    VoiceDisabled,
    SelectionPending,
    Config,
    Storage,
    Channel,
}

impl From<std::io::Error> for ConciergeError {
    fn from(e: std::io::Error) -> Self {
        ConciergeError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ConciergeError {
    fn from(e: serde_json::Error) -> Self {
        ConciergeError::Storage(e.to_string())
    }
}

impl ConciergeError {
    /// Get the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConciergeError::UnsupportedEnvironment(_) => ErrorKind::UnsupportedEnvironment,
            ConciergeError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            ConciergeError::ProviderInitFailed(_) => ErrorKind::ProviderInitFailed,
            ConciergeError::ProviderRuntimeError(_) => ErrorKind::ProviderRuntimeError,
            ConciergeError::DispatchFailed(_) => ErrorKind::DispatchFailed,
            ConciergeError::VoiceDisabled => ErrorKind::VoiceDisabled,
            ConciergeError::SelectionPending => ErrorKind::SelectionPending,
            ConciergeError::Config(_) => ErrorKind::Config,
            ConciergeError::Storage(_) => ErrorKind::Storage,
            ConciergeError::Channel(_) => ErrorKind::Channel,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can be retried by calling `start()` again. The
    /// environment errors persist until the page is reloaded.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Detected once at mount, voice stays off for the mount
            ConciergeError::UnsupportedEnvironment(_) => false,
            ConciergeError::PermissionDenied(_) => false,
            ConciergeError::VoiceDisabled => false,
            // Retryable by the user
            ConciergeError::ProviderInitFailed(_) => true,
            ConciergeError::ProviderRuntimeError(_) => true,
            // Scoped to a single tool-call turn
            ConciergeError::DispatchFailed(_) => true,
            // Resolves itself once the widget finishes mounting
            ConciergeError::SelectionPending => true,
            ConciergeError::Config(_) => false,
            ConciergeError::Storage(_) => true,
            ConciergeError::Channel(_) => false,
        }
    }

    /// Whether the UI should show this as a persistent notice rather than a
    /// transient toast
    pub fn is_persistent_notice(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UnsupportedEnvironment | ErrorKind::PermissionDenied | ErrorKind::VoiceDisabled
        )
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            ConciergeError::UnsupportedEnvironment(_) => {
                "Voice input is not available in this browser.".to_string()
            }
            ConciergeError::PermissionDenied(_) => {
                "Microphone access was denied. Enable it and reload to use voice.".to_string()
            }
            ConciergeError::ProviderInitFailed(_) => {
                "Could not connect to the voice assistant. Please try again.".to_string()
            }
            ConciergeError::ProviderRuntimeError(_) => {
                "The voice connection was interrupted. Please try again.".to_string()
            }
            ConciergeError::DispatchFailed(_) => {
                "Property search failed. Please try again.".to_string()
            }
            ConciergeError::VoiceDisabled => "Voice is turned off.".to_string(),
            ConciergeError::SelectionPending => {
                "The voice assistant is still loading.".to_string()
            }
            ConciergeError::Config(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            ConciergeError::Storage(_) => "Could not save chat state.".to_string(),
            ConciergeError::Channel(_) => {
                "Internal communication error. Please reload the page.".to_string()
            }
        }
    }
}

/// Result type alias for voice concierge operations
pub type Result<T> = std::result::Result<T, ConciergeError>;
