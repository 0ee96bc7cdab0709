//! Live connection shared by both provider variants
//!
//! Owns the microphone, the playback handle and the backend connection while a
//! provider is started. Two tasks run per connection: the pump moves audio
//! out and backend messages in, and the call worker answers function calls
//! one at a time so a slow search never stalls capture.

use super::{
    AudioFrame, AudioOutput, BackendControl, BackendMessage, BackendSessionConfig,
    FunctionOutput, MicrophoneSource, ProviderEvent, ProviderSettings, RealtimeBackend,
};
use crate::dispatcher::{FunctionCallDispatcher, FunctionCallRequest};
use crate::selector::ProviderKind;
use crate::session::TranscriptEvent;
use crate::vad::{ClientVad, VadTransition};
use crate::{ConciergeError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How a provider variant expresses turns to its backend
pub(crate) trait TurnDialect: Send + Sync + 'static {
    fn session_config(&self, settings: &ProviderSettings) -> BackendSessionConfig;

    /// Controls sent when the user starts speaking (client VAD / push-to-talk)
    fn speech_started(&self) -> &'static [BackendControl];

    /// Controls sent when the user stops speaking (client VAD / push-to-talk)
    fn speech_ended(&self) -> &'static [BackendControl];
}

pub(crate) struct LiveLink {
    kind: ProviderKind,
    dialect: Arc<dyn TurnDialect>,
    settings: ProviderSettings,
    backend: Arc<dyn RealtimeBackend>,
    microphone: Arc<dyn MicrophoneSource>,
    output: Arc<dyn AudioOutput>,
    dispatcher: FunctionCallDispatcher,
    events: mpsc::UnboundedSender<ProviderEvent>,
    muted: Arc<AtomicBool>,
    push_to_talk: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

pub(crate) struct LinkParts {
    pub settings: ProviderSettings,
    pub backend: Arc<dyn RealtimeBackend>,
    pub microphone: Arc<dyn MicrophoneSource>,
    pub output: Arc<dyn AudioOutput>,
    pub dispatcher: FunctionCallDispatcher,
    pub events: mpsc::UnboundedSender<ProviderEvent>,
}

impl LiveLink {
    pub fn new(kind: ProviderKind, dialect: Arc<dyn TurnDialect>, parts: LinkParts) -> Self {
        Self {
            kind,
            dialect,
            settings: parts.settings,
            backend: parts.backend,
            microphone: parts.microphone,
            output: parts.output,
            dispatcher: parts.dispatcher,
            events: parts.events,
            muted: Arc::new(AtomicBool::new(false)),
            push_to_talk: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub async fn start(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            debug!("{} provider already connected", self.kind);
            return Ok(());
        }

        let frames = self.microphone.acquire().await.map_err(|e| match e {
            ConciergeError::PermissionDenied(_) | ConciergeError::UnsupportedEnvironment(_) => e,
            other => ConciergeError::ProviderInitFailed(format!("microphone: {}", other)),
        })?;

        let config = self.dialect.session_config(&self.settings);
        let connect = tokio::time::timeout(self.settings.connect_timeout, self.backend.connect(&config));
        let messages = match connect.await {
            Ok(Ok(messages)) => messages,
            Ok(Err(e)) => {
                self.release_microphone();
                return Err(match e {
                    ConciergeError::ProviderInitFailed(_) => e,
                    other => ConciergeError::ProviderInitFailed(other.to_string()),
                });
            }
            Err(_) => {
                self.release_microphone();
                return Err(ConciergeError::ProviderInitFailed(format!(
                    "{} connection timed out after {}ms",
                    self.kind,
                    self.settings.connect_timeout.as_millis()
                )));
            }
        };

        let client_vad = if self.settings.vad.use_client_vad {
            match ClientVad::new(self.settings.sample_rate, &self.settings.vad) {
                Ok(vad) => Some(vad),
                Err(e) => {
                    warn!("Client VAD unavailable, push-to-talk only: {}", e);
                    None
                }
            }
        } else {
            None
        };

        self.muted.store(false, Ordering::SeqCst);
        self.push_to_talk.store(false, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);

        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let worker = CallWorker {
            kind: self.kind,
            function_calling: self.settings.function_calling,
            backend: Arc::clone(&self.backend),
            dispatcher: self.dispatcher.clone(),
            events: self.events.clone(),
        };
        let pump = Pump {
            kind: self.kind,
            dialect: Arc::clone(&self.dialect),
            backend: Arc::clone(&self.backend),
            output: Arc::clone(&self.output),
            events: self.events.clone(),
            calls: call_tx,
            muted: Arc::clone(&self.muted),
            push_to_talk: Arc::clone(&self.push_to_talk),
            connected: Arc::clone(&self.connected),
            client_vad,
        };

        {
            let mut tasks = self.tasks.lock();
            for stale in tasks.drain(..) {
                stale.abort();
            }
            tasks.push(tokio::spawn(worker.run(call_rx)));
            tasks.push(tokio::spawn(pump.run(frames, messages)));
        }

        info!("{} provider connected ({:?} turn detection)", self.kind, config.turn_detection);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.abort_tasks();
        self.connected.store(false, Ordering::SeqCst);
        self.push_to_talk.store(false, Ordering::SeqCst);

        let mut first_error: Option<ConciergeError> = None;

        if let Err(e) = self.microphone.release() {
            warn!("{} provider: failed to release microphone: {}", self.kind, e);
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.output.release() {
            warn!("{} provider: failed to release audio output: {}", self.kind, e);
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.backend.disconnect().await {
            warn!("{} provider: failed to disconnect: {}", self.kind, e);
            first_error.get_or_insert(e);
        }

        info!("{} provider stopped", self.kind);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn toggle_mute(&self) -> bool {
        // fetch_xor returns the previous value
        let muted = !self.muted.fetch_xor(true, Ordering::SeqCst);
        debug!("{} provider capture {}", self.kind, if muted { "muted" } else { "unmuted" });
        muted
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn push_to_talk(&self, pressed: bool) -> Result<()> {
        if !self.settings.vad.use_client_vad {
            debug!("Push-to-talk ignored: server VAD mode");
            return Ok(());
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ConciergeError::ProviderRuntimeError(
                "push-to-talk while disconnected".to_string(),
            ));
        }

        let was_pressed = self.push_to_talk.swap(pressed, Ordering::SeqCst);
        if was_pressed == pressed {
            return Ok(());
        }

        let controls = if pressed {
            self.dialect.speech_started()
        } else {
            self.dialect.speech_ended()
        };
        for control in controls {
            self.backend.send_control(*control)?;
        }
        Ok(())
    }

    pub fn audio_output(&self) -> Arc<dyn AudioOutput> {
        Arc::clone(&self.output)
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    fn release_microphone(&self) {
        if let Err(e) = self.microphone.release() {
            warn!("{} provider: failed to release microphone: {}", self.kind, e);
        }
    }
}

/// Model-issued call waiting for the worker
struct PendingCall {
    call_id: String,
    name: String,
    arguments: serde_json::Value,
}

/// Task state for one connection
struct Pump {
    kind: ProviderKind,
    dialect: Arc<dyn TurnDialect>,
    backend: Arc<dyn RealtimeBackend>,
    output: Arc<dyn AudioOutput>,
    events: mpsc::UnboundedSender<ProviderEvent>,
    calls: mpsc::UnboundedSender<PendingCall>,
    muted: Arc<AtomicBool>,
    push_to_talk: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    client_vad: Option<ClientVad>,
}

impl Pump {
    async fn run(
        mut self,
        mut frames: mpsc::Receiver<AudioFrame>,
        mut messages: mpsc::UnboundedReceiver<BackendMessage>,
    ) {
        debug!("{} provider pump starting", self.kind);

        let failure = loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = self.forward_frame(&frame) {
                            break Some(e);
                        }
                    }
                    None => break Some("microphone capture ended".to_string()),
                },
                message = messages.recv() => match message {
                    Some(BackendMessage::Transcript(text)) => {
                        if !text.trim().is_empty() {
                            self.emit(ProviderEvent::Transcript(TranscriptEvent::new(text)));
                        }
                    }
                    Some(BackendMessage::Audio(samples)) => {
                        if let Err(e) = self.output.play(&samples) {
                            debug!("{} provider: playback failed: {}", self.kind, e);
                        }
                    }
                    Some(BackendMessage::FunctionCall { call_id, name, arguments }) => {
                        let call = PendingCall { call_id, name, arguments };
                        if self.calls.send(call).is_err() {
                            break Some("function call worker stopped".to_string());
                        }
                    }
                    Some(BackendMessage::Error(msg)) => break Some(msg),
                    Some(BackendMessage::Closed) | None => {
                        break Some("connection closed by provider".to_string())
                    }
                },
            }
        };

        self.connected.store(false, Ordering::SeqCst);
        if let Some(msg) = failure {
            error!("{} provider runtime error: {}", self.kind, msg);
            self.emit(ProviderEvent::Error(ConciergeError::ProviderRuntimeError(msg)));
        }
        debug!("{} provider pump exiting", self.kind);
    }

    /// Send one captured frame; returns an error message on fatal failure
    fn forward_frame(&mut self, frame: &[f32]) -> std::result::Result<(), String> {
        if self.muted.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.backend
            .send_audio(frame)
            .map_err(|e| format!("failed to stream audio: {}", e))?;

        let transition = match self.client_vad.as_mut() {
            Some(vad) => vad.process(frame),
            None => None,
        };
        // Push-to-talk overrides the detector while held
        if let Some(transition) = transition {
            if !self.push_to_talk.load(Ordering::SeqCst) {
                let controls = match transition {
                    VadTransition::SpeechStarted => self.dialect.speech_started(),
                    VadTransition::SpeechEnded => self.dialect.speech_ended(),
                };
                for control in controls {
                    self.backend
                        .send_control(*control)
                        .map_err(|e| format!("failed to send {:?}: {}", control, e))?;
                }
            }
        }
        Ok(())
    }

    fn emit(&self, event: ProviderEvent) {
        if self.events.send(event).is_err() {
            debug!("{} provider: orchestrator no longer listening", self.kind);
        }
    }
}

/// Runs function calls one at a time, off the pump
struct CallWorker {
    kind: ProviderKind,
    function_calling: bool,
    backend: Arc<dyn RealtimeBackend>,
    dispatcher: FunctionCallDispatcher,
    events: mpsc::UnboundedSender<ProviderEvent>,
}

impl CallWorker {
    async fn run(self, mut calls: mpsc::UnboundedReceiver<PendingCall>) {
        while let Some(call) = calls.recv().await {
            self.handle(call).await;
        }
        debug!("{} provider call worker exiting", self.kind);
    }

    async fn handle(&self, call: PendingCall) {
        let PendingCall { call_id, name, arguments } = call;

        let output = if !self.function_calling {
            warn!("{} provider: function call '{}' while function calling is disabled", self.kind, name);
            FunctionOutput::Failure("function calling is disabled".to_string())
        } else {
            let outcome = match FunctionCallRequest::from_provider(&name, &arguments) {
                Ok(request) => self.dispatcher.dispatch(request).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(result) => {
                    let data = result.data.clone();
                    self.emit(ProviderEvent::FunctionResult {
                        name: name.clone(),
                        result,
                    });
                    FunctionOutput::Success(data)
                }
                Err(e) => {
                    let message = e.to_string();
                    self.emit(ProviderEvent::Error(e));
                    FunctionOutput::Failure(message)
                }
            }
        };

        if let Err(e) = self.backend.submit_function_output(&call_id, output).await {
            warn!("{} provider: failed to return output for '{}': {}", self.kind, name, e);
        }
    }

    fn emit(&self, event: ProviderEvent) {
        if self.events.send(event).is_err() {
            debug!("{} provider: orchestrator no longer listening", self.kind);
        }
    }
}
