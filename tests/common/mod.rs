//! Test doubles for the provider seams
//!
//! Each mock records what the orchestrator did to it so tests can assert on
//! connection counts, releases and turn controls.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use voice_concierge::dispatcher::{FunctionCallRequest, FunctionCallResult, PropertySearch};
use voice_concierge::intent::{Navigator, Route};
use voice_concierge::provider::{
    AudioFrame, AudioOutput, BackendControl, BackendMessage, BackendSessionConfig,
    FunctionOutput, MicrophoneSource, RealtimeBackend,
};
use voice_concierge::{
    ConciergeConfig, ConciergeError, ContinuityManager, FunctionCallDispatcher, LaunchParams,
    OrchestratorConfig, ProviderKind, ProviderRegistry, Result, SessionEvent, SessionHandle,
    SessionOrchestrator,
};

// === Backend ===

#[derive(Default)]
pub struct MockBackend {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub connect_delay: Mutex<Option<Duration>>,
    pub configs: Mutex<Vec<BackendSessionConfig>>,
    pub controls: Mutex<Vec<BackendControl>>,
    pub audio_frames: AtomicUsize,
    pub outputs: Mutex<Vec<(String, FunctionOutput)>>,
    sender: Mutex<Option<mpsc::UnboundedSender<BackendMessage>>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_connect_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.connect_delay.lock() = Some(delay);
        self
    }

    /// Inject a message as if the remote service sent it
    pub fn emit(&self, message: BackendMessage) {
        if let Some(tx) = self.sender.lock().as_ref() {
            let _ = tx.send(message);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeBackend for MockBackend {
    async fn connect(
        &self,
        config: &BackendSessionConfig,
    ) -> Result<mpsc::UnboundedReceiver<BackendMessage>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.configs.lock().push(config.clone());

        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ConciergeError::ProviderInitFailed("handshake rejected".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock() = Some(tx);
        Ok(rx)
    }

    fn send_audio(&self, _samples: &[f32]) -> Result<()> {
        self.audio_frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn send_control(&self, control: BackendControl) -> Result<()> {
        self.controls.lock().push(control);
        Ok(())
    }

    async fn submit_function_output(&self, call_id: &str, output: FunctionOutput) -> Result<()> {
        self.outputs.lock().push((call_id.to_string(), output));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().take();
        Ok(())
    }
}

// === Microphone ===

#[derive(Default)]
pub struct MockMicrophone {
    pub access_error: Mutex<Option<ConciergeError>>,
    pub acquire_error: Mutex<Option<ConciergeError>>,
    pub fail_release: AtomicBool,
    pub acquires: AtomicUsize,
    pub releases: AtomicUsize,
    sender: Mutex<Option<mpsc::Sender<AudioFrame>>>,
}

impl MockMicrophone {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_open(&self) -> bool {
        self.sender.lock().is_some()
    }

    pub fn push_frame(&self, frame: AudioFrame) {
        if let Some(tx) = self.sender.lock().as_ref() {
            let _ = tx.try_send(frame);
        }
    }
}

#[async_trait]
impl MicrophoneSource for MockMicrophone {
    fn check_access(&self) -> Result<()> {
        match self.access_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn acquire(&self) -> Result<mpsc::Receiver<AudioFrame>> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        let acquire_error = self.acquire_error.lock().clone();
        if let Some(e) = acquire_error {
            return Err(e);
        }
        let (tx, rx) = mpsc::channel(16);
        *self.sender.lock() = Some(tx);
        Ok(rx)
    }

    fn release(&self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().take();
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(ConciergeError::ProviderRuntimeError("track stop failed".into()));
        }
        Ok(())
    }
}

// === Output ===

#[derive(Default)]
pub struct MockOutput {
    pub played: AtomicUsize,
    pub resumes: AtomicUsize,
    pub releases: AtomicUsize,
    pub fail_resume: AtomicBool,
    pub fail_release: AtomicBool,
}

impl AudioOutput for MockOutput {
    fn play(&self, samples: &[f32]) -> Result<()> {
        self.played.fetch_add(samples.len(), Ordering::SeqCst);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        if self.fail_resume.load(Ordering::SeqCst) {
            return Err(ConciergeError::ProviderRuntimeError("autoplay blocked".into()));
        }
        Ok(())
    }

    fn release(&self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(ConciergeError::ProviderRuntimeError("audio element busy".into()));
        }
        Ok(())
    }
}

// === Property search ===

#[derive(Default)]
pub struct MockSearch {
    pub calls: Mutex<Vec<FunctionCallRequest>>,
    pub fail: AtomicBool,
    pub delay: Mutex<Option<Duration>>,
    pub finished: AtomicUsize,
}

impl MockSearch {
    pub fn finished_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PropertySearch for MockSearch {
    async fn handle_function_call(&self, request: FunctionCallRequest) -> Result<FunctionCallResult> {
        self.calls.lock().push(request.clone());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConciergeError::Storage("search index offline".into()));
        }
        Ok(FunctionCallResult::new(json!({
            "results": [{ "id": "p1", "title": "Loft", "city": request.args.get("city").cloned().unwrap_or(Value::Null) }]
        })))
    }
}

// === Navigator ===

#[derive(Default)]
pub struct RecordingNavigator {
    pub routes: Mutex<Vec<Route>>,
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: Route) -> Result<()> {
        self.routes.lock().push(route);
        Ok(())
    }
}

// === Harness ===

/// One widget mount wired to mocks
pub struct Mount {
    pub orchestrator: SessionOrchestrator,
    pub handle: SessionHandle,
    pub openai: Arc<MockBackend>,
    pub gemini: Arc<MockBackend>,
    pub openai_built: Arc<AtomicUsize>,
    pub gemini_built: Arc<AtomicUsize>,
    pub microphone: Arc<MockMicrophone>,
    pub output: Arc<MockOutput>,
    pub search: Arc<MockSearch>,
    pub navigator: Arc<RecordingNavigator>,
    pub continuity: ContinuityManager,
}

pub struct MountBuilder {
    query: String,
    config: ConciergeConfig,
    continuity: ContinuityManager,
    openai: Arc<MockBackend>,
    gemini: Arc<MockBackend>,
    microphone: Arc<MockMicrophone>,
    gemini_factory: bool,
}

impl MountBuilder {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            config: ConciergeConfig::default()
                .with_autostart_debounce_ms(20)
                .with_connect_timeout_ms(500),
            continuity: ContinuityManager::in_memory(),
            openai: MockBackend::new(),
            gemini: MockBackend::new(),
            microphone: MockMicrophone::new(),
            gemini_factory: true,
        }
    }

    pub fn config(mut self, config: ConciergeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn continuity(mut self, continuity: ContinuityManager) -> Self {
        self.continuity = continuity;
        self
    }

    pub fn openai(mut self, backend: Arc<MockBackend>) -> Self {
        self.openai = backend;
        self
    }

    pub fn microphone(mut self, microphone: Arc<MockMicrophone>) -> Self {
        self.microphone = microphone;
        self
    }

    /// Register only the OpenAI factory
    pub fn without_gemini(mut self) -> Self {
        self.gemini_factory = false;
        self
    }

    pub fn build(self) -> Mount {
        let output = Arc::new(MockOutput::default());
        let search = Arc::new(MockSearch::default());
        let navigator = Arc::new(RecordingNavigator::default());
        let openai_built = Arc::new(AtomicUsize::new(0));
        let gemini_built = Arc::new(AtomicUsize::new(0));

        let registry = {
            let openai = Arc::clone(&self.openai);
            let gemini = Arc::clone(&self.gemini);
            let openai_count = Arc::clone(&openai_built);
            let gemini_count = Arc::clone(&gemini_built);
            let registry = ProviderRegistry::new(
                self.microphone.clone(),
                output.clone(),
                FunctionCallDispatcher::new(search.clone()),
            )
            .with_openai(move || {
                openai_count.fetch_add(1, Ordering::SeqCst);
                openai as Arc<dyn RealtimeBackend>
            });
            if self.gemini_factory {
                registry.with_gemini(move || {
                    gemini_count.fetch_add(1, Ordering::SeqCst);
                    gemini as Arc<dyn RealtimeBackend>
                })
            } else {
                registry
            }
        };

        let params = LaunchParams::parse(&self.query);
        let config = OrchestratorConfig::from_config(&params, &self.config);
        let (orchestrator, handle) = SessionOrchestrator::new(
            config,
            registry,
            self.continuity.clone(),
            Some(navigator.clone() as Arc<dyn Navigator>),
        );

        Mount {
            orchestrator,
            handle,
            openai: self.openai,
            gemini: self.gemini,
            openai_built,
            gemini_built,
            microphone: self.microphone,
            output,
            search,
            navigator,
            continuity: self.continuity,
        }
    }
}

impl Mount {
    /// Mount, resolve the provider and return the armed backend
    pub fn ready(&self) -> Arc<MockBackend> {
        self.orchestrator.mount();
        let kind = self
            .orchestrator
            .resolve_provider()
            .expect("provider should arm");
        match kind {
            ProviderKind::OpenAi => Arc::clone(&self.openai),
            ProviderKind::Gemini => Arc::clone(&self.gemini),
        }
    }

    pub fn armed_count(&self) -> usize {
        self.openai_built.load(Ordering::SeqCst) + self.gemini_built.load(Ordering::SeqCst)
    }

    /// Poll UI events until one matches or two seconds pass
    pub async fn wait_for<F>(&self, mut matches: F) -> Option<SessionEvent>
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while tokio::time::Instant::now() < deadline {
            while let Some(event) = self.handle.try_recv_event() {
                if matches(&event) {
                    return Some(event);
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        None
    }

    /// Poll until `condition` holds or two seconds pass
    pub async fn eventually<F>(&self, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        condition()
    }
}
