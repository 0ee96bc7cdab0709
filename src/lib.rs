//! Voice Concierge - voice session orchestration for a property search chat widget
//!
//! This crate manages one voice session per widget mount: it selects one of
//! two realtime speech providers, decides between server-side and client-side
//! voice activity detection, routes model function calls to property search,
//! and keeps voice alive across client-side navigations.

pub mod audio;
pub mod broadcast;
pub mod config;
pub mod continuity;
pub mod dispatcher;
pub mod error;
pub mod intent;
pub mod orchestrator;
pub mod provider;
pub mod selector;
pub mod session;
pub mod vad;

// Re-export error types
pub use error::{ConciergeError, ErrorKind, Result};

// Re-export configuration
pub use config::{ConciergeConfig, LaunchConfig, LaunchParams};

// Re-export session and orchestration types
pub use orchestrator::{
    OrchestratorConfig, SessionEvent, SessionHandle, SessionOrchestrator, VoiceGate,
};
pub use session::{SessionSnapshot, SessionStatus, SharedSession, TranscriptEvent};

// Re-export collaborator seams
pub use broadcast::{ConversationBus, PropertySnapshot, SnapshotChannel};
pub use continuity::{ContinuityManager, ContinuityStore, JsonFileStore, MemoryStore};
pub use dispatcher::{FunctionCallDispatcher, FunctionCallRequest, FunctionCallResult, PropertySearch};
pub use intent::{NavigationIntent, Navigator, Route};
pub use provider::{CapabilityProvider, ProviderRegistry, RealtimeBackend};
pub use selector::ProviderKind;
pub use vad::{RealtimeMode, VadMode, VadSettings};
