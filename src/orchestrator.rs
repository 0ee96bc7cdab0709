//! Session Orchestrator
//!
//! Owns the session state machine for one chat-widget mount and coordinates:
//! - the voice gate (environment check and launch switch, checked once)
//! - provider selection and arming of the single selected provider
//! - start / stop / mute / push-to-talk
//! - provider events (transcripts, function results, runtime errors)
//! - continuity flags and the debounced autostart after navigation
//! - the transcript intent router and the property snapshot channel
//!
//! Transitions are serialized by checking the session state before acting,
//! never by queueing: a second `start()` while a start is in flight returns
//! immediately. UI notifications are delivered through [`SessionHandle`].

use crate::broadcast::{PropertySnapshot, SnapshotChannel, SnapshotSubscription};
use crate::config::{ConciergeConfig, LaunchConfig, LaunchParams};
use crate::continuity::{ContinuityManager, ResumeHandle};
use crate::dispatcher::FunctionCallResult;
use crate::error::ErrorKind;
use crate::intent::{NavigationIntent, Navigator, Route, TranscriptIntentRouter};
use crate::provider::{
    ArmedProvider, CapabilityProvider, MicrophoneSource, ProviderEvent, ProviderRegistry,
    ProviderSettings, CAPTURE_SAMPLE_RATE,
};
use crate::selector::{ProviderKind, ProviderSelector};
use crate::session::{SessionSnapshot, SessionStatus, SharedSession, TranscriptEvent};
use crate::{ConciergeError, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Resolved launch parameters for this mount
    pub launch: LaunchConfig,
    /// Delay before an autostart attempt after mount
    pub autostart_debounce: Duration,
    /// Provider connection timeout
    pub connect_timeout: Duration,
    /// Snapshots retained per conversation
    pub snapshot_log_capacity: usize,
    /// UI event channel buffer size
    pub channel_buffer_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_config(&LaunchParams::default(), &ConciergeConfig::default())
    }
}

impl OrchestratorConfig {
    /// Resolve launch overrides against file configuration
    pub fn from_config(params: &LaunchParams, config: &ConciergeConfig) -> Self {
        Self {
            launch: LaunchConfig::resolve(params, config),
            autostart_debounce: config.autostart_debounce(),
            connect_timeout: config.connect_timeout(),
            snapshot_log_capacity: config.snapshot_log_capacity,
            channel_buffer_size: 100,
        }
    }

    pub fn with_autostart_debounce(mut self, delay: Duration) -> Self {
        self.autostart_debounce = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }

    fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            vad: self.launch.vad.clone(),
            function_calling: self.launch.function_calling,
            connect_timeout: self.connect_timeout,
            sample_rate: CAPTURE_SAMPLE_RATE,
        }
    }
}

/// Whether voice may be used during this mount
#[derive(Clone, Debug, Default)]
pub enum VoiceGate {
    /// Not checked yet
    #[default]
    Unchecked,
    Permitted,
    /// Disabled until the next mount
    Disabled(ConciergeError),
}

impl VoiceGate {
    pub fn is_permitted(&self) -> bool {
        matches!(self, VoiceGate::Permitted)
    }
}

/// Notifications for the UI
#[derive(Clone, Debug)]
pub enum SessionEvent {
    StateChanged(SessionStatus),
    Transcript(TranscriptEvent),
    FunctionResult {
        name: String,
        result: FunctionCallResult,
    },
    /// Error report; persistent notices stay visible for the whole mount
    Notice {
        kind: ErrorKind,
        message: String,
        persistent: bool,
    },
    Navigated(Route),
}

/// UI-side handle: event stream and state queries
pub struct SessionHandle {
    event_rx: Receiver<SessionEvent>,
    session: SharedSession,
}

impl SessionHandle {
    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<SessionEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an event, waiting at most `timeout`
    pub fn recv_event_timeout(&self, timeout: Duration) -> Result<SessionEvent> {
        self.event_rx
            .recv_timeout(timeout)
            .map_err(|e| ConciergeError::Channel(format!("Failed to receive event: {}", e)))
    }

    /// Drain all pending events
    pub fn drain_events(&self) -> Vec<SessionEvent> {
        self.event_rx.try_iter().collect()
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn is_listening(&self) -> bool {
        self.session.is_listening()
    }

    pub fn is_muted(&self) -> bool {
        self.session.is_muted()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }
}

struct Inner {
    config: OrchestratorConfig,
    session: SharedSession,
    selector: RwLock<ProviderSelector>,
    gate: RwLock<VoiceGate>,
    microphone: Arc<dyn MicrophoneSource>,
    registry: Mutex<Option<ProviderRegistry>>,
    provider: RwLock<Option<Arc<ArmedProvider>>>,
    arm_error: RwLock<Option<ConciergeError>>,
    /// Held while the provider is being started or torn down
    transition: AsyncMutex<()>,
    cancel_start: Notify,
    continuity: ContinuityManager,
    router: Option<TranscriptIntentRouter>,
    snapshots: SnapshotChannel,
    event_tx: Sender<SessionEvent>,
    provider_tx: mpsc::UnboundedSender<ProviderEvent>,
    provider_rx: Mutex<Option<mpsc::UnboundedReceiver<ProviderEvent>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    resume: Mutex<Option<ResumeHandle>>,
    autostart_checked: AtomicBool,
    chat_open: AtomicBool,
    unmounted: AtomicBool,
}

/// Session orchestrator for one widget mount
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    /// Create the orchestrator and its UI handle
    ///
    /// Nothing is checked, armed or spawned until [`mount`](Self::mount) and
    /// [`resolve_provider`](Self::resolve_provider) are called.
    pub fn new(
        config: OrchestratorConfig,
        registry: ProviderRegistry,
        continuity: ContinuityManager,
        navigator: Option<Arc<dyn Navigator>>,
    ) -> (Self, SessionHandle) {
        let session = SharedSession::new();
        let (event_tx, event_rx) = bounded(config.channel_buffer_size.max(1));
        let (provider_tx, provider_rx) = mpsc::unbounded_channel();

        let router = navigator.map(|nav| TranscriptIntentRouter::new(continuity.clone(), nav));
        let snapshots = SnapshotChannel::new(
            continuity.bus().snapshots(),
            continuity.store(),
            config.snapshot_log_capacity,
        );

        let inner = Inner {
            microphone: registry.microphone(),
            config,
            session: session.clone(),
            selector: RwLock::new(ProviderSelector::new()),
            gate: RwLock::new(VoiceGate::Unchecked),
            registry: Mutex::new(Some(registry)),
            provider: RwLock::new(None),
            arm_error: RwLock::new(None),
            transition: AsyncMutex::new(()),
            cancel_start: Notify::new(),
            chat_open: AtomicBool::new(continuity.chat_open()),
            continuity,
            router,
            snapshots,
            event_tx,
            provider_tx,
            provider_rx: Mutex::new(Some(provider_rx)),
            event_loop: Mutex::new(None),
            resume: Mutex::new(None),
            autostart_checked: AtomicBool::new(false),
            unmounted: AtomicBool::new(false),
        };

        let handle = SessionHandle { event_rx, session };
        (Self { inner: Arc::new(inner) }, handle)
    }

    // === Mount lifecycle ===

    /// Check the voice gate and start consuming provider events
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount(&self) -> VoiceGate {
        let gate = self.check_gate();

        if let Some(rx) = self.inner.provider_rx.lock().take() {
            let weak = Arc::downgrade(&self.inner);
            *self.inner.event_loop.lock() = Some(tokio::spawn(run_event_loop(weak, rx)));
            debug!("Provider event loop started");
        }
        gate
    }

    /// Resolve provider selection and arm the selected provider
    ///
    /// The selection is committed only once the provider is armed; after that
    /// later calls return the same kind. Until then both providers are
    /// disabled and `start()` fails. An arming error is returned again on
    /// every call and by `start()`.
    pub fn resolve_provider(&self) -> Result<ProviderKind> {
        if let Some(kind) = self.inner.selector.read().selected() {
            return Ok(kind);
        }
        let kind = self.inner.config.launch.provider;

        let mut registry = self.inner.registry.lock();
        // A concurrent call may have armed while this one waited
        if let Some(kind) = self.inner.selector.read().selected() {
            return Ok(kind);
        }
        let Some(factories) = registry.as_mut() else {
            return Err(ConciergeError::Config("provider registry already consumed".to_string()));
        };

        match factories.arm(
            kind,
            self.inner.config.provider_settings(),
            self.inner.provider_tx.clone(),
        ) {
            Ok(armed) => {
                // The other factory is dropped unbuilt
                registry.take();
                *self.inner.provider.write() = Some(Arc::new(armed));
                self.inner.arm_error.write().take();
                let kind = self.inner.selector.write().resolve(kind);
                info!("Provider selection resolved: {}", kind);
                Ok(kind)
            }
            Err(e) => {
                error!("Failed to arm {} provider: {}", kind, e);
                *self.inner.arm_error.write() = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Consume the autostart seed and schedule a debounced start
    ///
    /// Reads the seed at most once per mount. The start is scheduled only if
    /// the session is idle, selection is resolved and voice is permitted;
    /// the same conditions are checked again when the timer fires.
    pub fn resume_if_requested(&self) -> bool {
        if self.inner.autostart_checked.swap(true, Ordering::SeqCst) {
            return false;
        }
        if !self.inner.continuity.consume_autostart() {
            return false;
        }
        if !self.can_autostart() {
            info!("Autostart seed ignored: session not ready for voice");
            return false;
        }

        let weak = Arc::downgrade(&self.inner);
        let task = async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let orchestrator = SessionOrchestrator { inner };
            if !orchestrator.can_autostart() {
                debug!("Autostart skipped: conditions changed during debounce");
                return;
            }
            info!("Resuming voice after navigation");
            if let Err(e) = orchestrator.start().await {
                warn!("Autostart failed: {}", e);
            }
        };
        let handle = self
            .inner
            .continuity
            .schedule_resume(self.inner.config.autostart_debounce, task);
        *self.inner.resume.lock() = Some(handle);
        true
    }

    /// Tear down for unmount: cancel timers, stop the session, stop the event loop
    pub async fn unmount(&self) {
        self.inner.unmounted.store(true, Ordering::SeqCst);
        if let Some(mut resume) = self.inner.resume.lock().take() {
            resume.cancel();
        }
        self.stop().await;
        if let Some(event_loop) = self.inner.event_loop.lock().take() {
            event_loop.abort();
        }
        info!("Session orchestrator unmounted");
    }

    // === Session control ===

    /// Start voice
    ///
    /// A call while a start is in flight, or while live, returns `Ok(())`
    /// without touching the provider.
    pub async fn start(&self) -> Result<()> {
        if self.inner.unmounted.load(Ordering::SeqCst) {
            return Err(ConciergeError::Channel("orchestrator is unmounted".to_string()));
        }

        let gate = self.gate();
        if let VoiceGate::Disabled(e) = gate {
            warn!("Start rejected: {}", e);
            return Err(e);
        }

        let Some(provider) = self.armed_provider() else {
            let arm_error = self.inner.arm_error.read().clone();
            return Err(arm_error.unwrap_or(ConciergeError::SelectionPending));
        };
        let vad_mode = self.inner.config.launch.vad.vad_mode();

        let began = self.inner.session.write().begin_start(provider.kind(), vad_mode);
        if !began {
            debug!("Start ignored: session is {}", self.inner.session.status());
            return Ok(());
        }
        self.emit(SessionEvent::StateChanged(SessionStatus::Initializing));
        info!("Starting {} voice session ({} VAD)", provider.kind(), vad_mode);

        let _transition = self.inner.transition.lock().await;
        let cancelled = self.inner.cancel_start.notified();
        tokio::pin!(cancelled);
        if self.inner.session.status() != SessionStatus::Initializing {
            debug!("Start abandoned before connecting: session is {}", self.inner.session.status());
            return Ok(());
        }

        let outcome = tokio::select! {
            result = provider.start() => Some(result),
            _ = &mut cancelled => None,
        };

        match outcome {
            None => {
                info!("Start cancelled by stop, releasing provider");
                if let Err(e) = provider.stop().await {
                    debug!("Provider release after cancelled start: {}", e);
                }
                Ok(())
            }
            Some(Ok(())) => {
                let listening = self.inner.session.write().mark_listening();
                if listening {
                    self.emit(SessionEvent::StateChanged(SessionStatus::Listening));
                    self.persist_voice_active(true);
                    info!("Voice session listening");
                } else {
                    debug!("Session left Initializing during connect, releasing provider");
                    if let Err(e) = provider.stop().await {
                        warn!("Provider release after cancelled start failed: {}", e);
                    }
                }
                Ok(())
            }
            Some(Err(e)) => {
                error!("Voice session failed to start: {}", e);
                if let Err(release) = provider.stop().await {
                    debug!("Provider release after failed start: {}", release);
                }
                if matches!(
                    e,
                    ConciergeError::PermissionDenied(_) | ConciergeError::UnsupportedEnvironment(_)
                ) {
                    *self.inner.gate.write() = VoiceGate::Disabled(e.clone());
                }
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Stop voice; always ends in `Idle`
    ///
    /// An in-flight start is cancelled and its provider released before the
    /// session returns to `Idle`, so a following `start()` never overlaps the
    /// old connection. Provider teardown is best-effort and failures are only
    /// logged.
    pub async fn stop(&self) {
        let began = self.inner.session.write().begin_stop();
        if !began {
            if self.inner.session.status() == SessionStatus::Stopping {
                // Another stop owns the teardown; wait for it
                let _transition = self.inner.transition.lock().await;
            } else {
                debug!("Stop ignored: session is {}", self.inner.session.status());
            }
            return;
        }
        self.emit(SessionEvent::StateChanged(SessionStatus::Stopping));

        self.inner.cancel_start.notify_waiters();
        let _transition = self.inner.transition.lock().await;

        if let Some(provider) = self.armed_provider() {
            if let Err(e) = provider.stop().await {
                warn!("Provider teardown incomplete: {}", e);
            }
        }

        self.inner.session.write().finish_stop();
        self.emit(SessionEvent::StateChanged(SessionStatus::Idle));
        self.persist_voice_active(false);
        info!("Voice session stopped");
    }

    /// Flip the capture gate; returns the new muted state if live
    pub fn toggle_mute(&self) -> Option<bool> {
        let muted = self.inner.session.write().toggle_mute()?;
        if let Some(provider) = self.armed_provider() {
            if provider.is_muted() != muted {
                provider.toggle_mute();
            }
        }
        let status = if muted {
            SessionStatus::Muted
        } else {
            SessionStatus::Listening
        };
        self.emit(SessionEvent::StateChanged(status));
        Some(muted)
    }

    /// Manual turn boundary in client VAD mode
    pub fn push_to_talk(&self, pressed: bool) -> Result<()> {
        if !self.inner.session.status().is_live() {
            debug!("Push-to-talk ignored: session is not live");
            return Ok(());
        }
        match self.armed_provider() {
            Some(provider) => provider.push_to_talk(pressed),
            None => Err(ConciergeError::SelectionPending),
        }
    }

    // === Chat panel ===

    pub fn open_chat(&self) {
        self.inner.chat_open.store(true, Ordering::SeqCst);
        if let Err(e) = self.inner.continuity.set_chat_open(true) {
            warn!("Failed to persist chat open: {}", e);
        }
    }

    /// Close the chat panel; an active session is stopped
    pub async fn close_chat(&self) {
        self.inner.chat_open.store(false, Ordering::SeqCst);
        if let Err(e) = self.inner.continuity.set_chat_open(false) {
            warn!("Failed to persist chat closed: {}", e);
        }
        self.stop().await;
    }

    pub fn is_chat_open(&self) -> bool {
        self.inner.chat_open.load(Ordering::SeqCst)
    }

    /// Feed the typed-message buffer to the intent router
    pub fn on_typed_message(&self, text: &str) -> Option<Route> {
        let router = self.inner.router.as_ref()?;
        match router.on_typed_message(text) {
            Ok(Some(route)) => {
                self.emit(SessionEvent::Navigated(route));
                Some(route)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Typed navigation failed: {}", e);
                None
            }
        }
    }

    /// Page visibility changed; resume playback when it becomes visible
    pub fn handle_visibility_change(&self, visible: bool) {
        if !visible {
            return;
        }
        let output = self.armed_provider().and_then(|p| p.audio_output());
        if let Some(output) = output {
            if let Err(e) = output.resume() {
                debug!("Playback resume failed: {}", e);
            }
        }
    }

    // === Property snapshots ===

    /// Describe the page's current subject to the conversation
    pub fn publish_snapshot(&self, snapshot: PropertySnapshot) -> Result<usize> {
        let conversation_id = self.inner.continuity.conversation_id();
        self.inner.snapshots.publish(&conversation_id, snapshot)
    }

    pub fn subscribe_snapshots(&self) -> SnapshotSubscription {
        let conversation_id = self.inner.continuity.conversation_id();
        self.inner.snapshots.subscribe(&conversation_id)
    }

    /// Snapshots logged for this conversation before or after mount
    pub fn recent_snapshots(&self) -> Vec<PropertySnapshot> {
        let conversation_id = self.inner.continuity.conversation_id();
        self.inner.snapshots.recent(&conversation_id)
    }

    /// Navigation intents raised by any mount on this conversation
    pub fn subscribe_intents(&self) -> broadcast::Receiver<NavigationIntent> {
        let conversation_id = self.inner.continuity.conversation_id();
        self.inner.continuity.bus().intents().subscribe(&conversation_id)
    }

    // === Queries ===

    pub fn status(&self) -> SessionStatus {
        self.inner.session.status()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.session.is_listening()
    }

    pub fn is_muted(&self) -> bool {
        self.inner.session.is_muted()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.session.snapshot()
    }

    pub fn session(&self) -> &SharedSession {
        &self.inner.session
    }

    /// Current voice gate, probing it first if mount has not run
    pub fn gate(&self) -> VoiceGate {
        let gate = self.inner.gate.read().clone();
        match gate {
            VoiceGate::Unchecked => self.check_gate(),
            other => other,
        }
    }

    pub fn selected_provider(&self) -> Option<ProviderKind> {
        self.inner.selector.read().selected()
    }

    /// Kind of the armed provider, if any
    pub fn armed_kind(&self) -> Option<ProviderKind> {
        self.armed_provider().map(|p| p.kind())
    }

    pub fn launch(&self) -> &LaunchConfig {
        &self.inner.config.launch
    }

    pub fn continuity(&self) -> &ContinuityManager {
        &self.inner.continuity
    }

    // === Internals ===

    fn armed_provider(&self) -> Option<Arc<ArmedProvider>> {
        self.inner.provider.read().clone()
    }

    fn check_gate(&self) -> VoiceGate {
        if let VoiceGate::Disabled(e) = &*self.inner.gate.read() {
            return VoiceGate::Disabled(e.clone());
        }

        let gate = if !self.inner.config.launch.voice_enabled {
            VoiceGate::Disabled(ConciergeError::VoiceDisabled)
        } else {
            match self.inner.microphone.check_access() {
                Ok(()) => VoiceGate::Permitted,
                Err(e) => VoiceGate::Disabled(e),
            }
        };

        match &gate {
            VoiceGate::Disabled(e) => {
                warn!("Voice disabled for this mount: {}", e);
                self.emit(SessionEvent::Notice {
                    kind: e.kind(),
                    message: e.user_message(),
                    persistent: true,
                });
            }
            _ => debug!("Voice permitted"),
        }
        *self.inner.gate.write() = gate.clone();
        gate
    }

    fn can_autostart(&self) -> bool {
        !self.inner.unmounted.load(Ordering::SeqCst)
            && self.inner.session.status().is_idle()
            && self.inner.selector.read().is_resolved()
            && self.inner.gate.read().is_permitted()
    }

    fn fail(&self, e: &ConciergeError) {
        let failed = self.inner.session.write().fail(e.kind());
        if failed {
            self.emit(SessionEvent::StateChanged(SessionStatus::Error));
        }
        self.emit(SessionEvent::Notice {
            kind: e.kind(),
            message: e.user_message(),
            persistent: e.is_persistent_notice(),
        });
        self.persist_voice_active(false);
    }

    fn persist_voice_active(&self, active: bool) {
        if let Err(e) = self.inner.continuity.set_voice_active(active) {
            warn!("Failed to persist voice state: {}", e);
        }
    }

    fn emit(&self, event: SessionEvent) {
        match self.inner.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!("UI event channel full, dropping {:?}", event),
            Err(TrySendError::Disconnected(_)) => debug!("UI handle dropped"),
        }
    }

    async fn handle_provider_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::Transcript(transcript) => {
                let accepted = self.inner.session.write().record_transcript(&transcript.text);
                if !accepted {
                    debug!("Transcript dropped: session is {}", self.inner.session.status());
                    return;
                }
                self.emit(SessionEvent::Transcript(transcript.clone()));

                if let Some(router) = self.inner.router.as_ref() {
                    match router.on_transcript(&transcript) {
                        Ok(Some(route)) => self.emit(SessionEvent::Navigated(route)),
                        Ok(None) => {}
                        Err(e) => warn!("Voice navigation failed: {}", e),
                    }
                }
            }
            ProviderEvent::FunctionResult { name, result } => {
                debug!("Function '{}' completed", name);
                self.emit(SessionEvent::FunctionResult { name, result });
            }
            ProviderEvent::Error(e @ ConciergeError::DispatchFailed(_)) => {
                // Scoped to one function-call turn
                warn!("{}", e);
                self.emit(SessionEvent::Notice {
                    kind: e.kind(),
                    message: e.user_message(),
                    persistent: false,
                });
            }
            ProviderEvent::Error(e) => {
                let _transition = self.inner.transition.lock().await;
                let Some(provider) = self.armed_provider() else {
                    return;
                };
                // A connection that is up again belongs to a later start
                if !self.inner.session.status().is_live() || provider.is_connected() {
                    debug!("Ignoring provider error from an ended connection: {}", e);
                    return;
                }
                error!("Voice session failed: {}", e);
                if let Err(release) = provider.stop().await {
                    debug!("Provider release after runtime error: {}", release);
                }
                self.fail(&e);
            }
        }
    }
}

async fn run_event_loop(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<ProviderEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        SessionOrchestrator { inner }.handle_provider_event(event).await;
    }
    debug!("Provider event loop exiting");
}
