//! Capability providers
//!
//! A capability provider wraps one remote realtime speech service behind a
//! uniform start / stop / mute interface, and streams transcripts, errors and
//! function-call results back to the orchestrator.
//!
//! Two variants exist, OpenAI-style and Gemini-style. They share one
//! connection driver and differ only in how turns are expressed to the
//! backend. Only the selected one is ever constructed, through
//! [`ProviderRegistry::arm`].

mod link;
mod gemini;
mod openai;
pub mod registry;

pub use registry::{ArmedProvider, BackendFactory, ProviderRegistry};

use crate::dispatcher::FunctionCallResult;
use crate::selector::ProviderKind;
use crate::session::TranscriptEvent;
use crate::vad::VadSettings;
use crate::{ConciergeError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Capture sample rate expected by both providers
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Mono f32 samples at [`CAPTURE_SAMPLE_RATE`]
pub type AudioFrame = Vec<f32>;

/// Microphone capture owned by the armed provider
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    /// Check capability without opening capture
    ///
    /// Called once at mount. Returns `UnsupportedEnvironment` or
    /// `PermissionDenied` when voice can never work for this mount.
    fn check_access(&self) -> Result<()>;

    /// Open capture; frames arrive on the returned receiver
    async fn acquire(&self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Close capture
    fn release(&self) -> Result<()>;
}

/// Playback handle for assistant audio
pub trait AudioOutput: Send + Sync {
    /// Queue assistant audio for playback
    fn play(&self, samples: &[f32]) -> Result<()>;

    /// Resume playback paused by the platform (autoplay policy, tab hidden)
    fn resume(&self) -> Result<()>;

    /// Stop playback and release the device
    fn release(&self) -> Result<()>;
}

/// Who detects the end of a user turn
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnDetection {
    /// The remote service detects turns
    Server,
    /// The client reports turn boundaries via [`BackendControl`]
    Manual,
}

/// Session parameters passed to the backend at connect time
#[derive(Clone, Debug, PartialEq)]
pub struct BackendSessionConfig {
    pub turn_detection: TurnDetection,
    pub tools_enabled: bool,
    pub sample_rate: u32,
}

/// Turn controls sent by the client when it owns turn detection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendControl {
    /// Commit buffered input audio as a user turn
    CommitInput,
    /// Ask the model to respond to the committed turn
    RequestResponse,
    /// Mark the start of user activity
    ActivityStart,
    /// Mark the end of user activity
    ActivityEnd,
}

/// Output returned to the backend for a function call
#[derive(Clone, Debug, PartialEq)]
pub enum FunctionOutput {
    Success(Value),
    Failure(String),
}

/// Messages produced by a connected backend
#[derive(Clone, Debug, PartialEq)]
pub enum BackendMessage {
    /// Transcript text (user or assistant)
    Transcript(String),
    /// Assistant audio
    Audio(Vec<f32>),
    /// Model-issued function call
    FunctionCall {
        call_id: String,
        name: String,
        arguments: Value,
    },
    /// Service-side failure
    Error(String),
    /// The service closed the connection
    Closed,
}

/// One remote realtime speech service
#[async_trait]
pub trait RealtimeBackend: Send + Sync {
    /// Open the connection; messages arrive on the returned receiver
    async fn connect(
        &self,
        config: &BackendSessionConfig,
    ) -> Result<mpsc::UnboundedReceiver<BackendMessage>>;

    /// Stream captured audio
    fn send_audio(&self, samples: &[f32]) -> Result<()>;

    /// Send a turn control
    fn send_control(&self, control: BackendControl) -> Result<()>;

    /// Return the output of a function call to the model
    async fn submit_function_output(&self, call_id: &str, output: FunctionOutput) -> Result<()>;

    /// Close the connection
    async fn disconnect(&self) -> Result<()>;
}

/// Events forwarded from the armed provider to the orchestrator
#[derive(Clone, Debug)]
pub enum ProviderEvent {
    Transcript(TranscriptEvent),
    FunctionResult {
        name: String,
        result: FunctionCallResult,
    },
    Error(ConciergeError),
}

/// Settings fixed when a provider is armed
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub vad: VadSettings,
    pub function_calling: bool,
    pub connect_timeout: Duration,
    pub sample_rate: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            vad: VadSettings::default(),
            function_calling: true,
            connect_timeout: Duration::from_secs(15),
            sample_rate: CAPTURE_SAMPLE_RATE,
        }
    }
}

/// Uniform interface over one realtime speech provider
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Acquire capture and connect
    async fn start(&self) -> Result<()>;

    /// Release capture, playback and the connection
    ///
    /// Every release is attempted even if an earlier one fails; the first
    /// failure is returned.
    async fn stop(&self) -> Result<()>;

    /// Flip the local capture gate; returns the new muted state
    fn toggle_mute(&self) -> bool;

    fn is_muted(&self) -> bool;

    /// Whether the connection is up; false again once it drops
    fn is_connected(&self) -> bool;

    /// Manual turn boundary (client VAD mode only)
    fn push_to_talk(&self, pressed: bool) -> Result<()>;

    fn audio_output(&self) -> Option<Arc<dyn AudioOutput>>;
}
