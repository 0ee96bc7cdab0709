//! Voice activity detection mode and the client-side detector
//!
//! Mode A leaves turn detection to the remote provider. Mode B runs a local
//! Silero detector over captured frames and reports turn boundaries itself,
//! with push-to-talk as a manual fallback.

use crate::config::{ConciergeConfig, LaunchParams};
use crate::{ConciergeError, Result};
use serde::Serialize;
use tracing::{debug, info};
use voice_activity_detector::VoiceActivityDetector as SileroDetector;

/// Realtime mode selected at launch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeMode {
    /// Server-driven voice activation
    #[default]
    A,
    /// Client-driven voice activation with push-to-talk fallback
    B,
}

impl RealtimeMode {
    /// Parse `a` / `b` (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "a" => Some(RealtimeMode::A),
            "b" => Some(RealtimeMode::B),
            _ => None,
        }
    }
}

/// Where voice activity is detected
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VadMode {
    Server,
    Client,
}

impl std::fmt::Display for VadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VadMode::Server => write!(f, "server"),
            VadMode::Client => write!(f, "client"),
        }
    }
}

/// Immutable VAD settings for one session
///
/// Changing VAD requires stopping the session and building a new one.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VadSettings {
    pub realtime_mode: RealtimeMode,
    pub use_client_vad: bool,
    pub threshold: f32,
    pub hangover_frames: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self::resolve(&LaunchParams::default(), &ConciergeConfig::default())
    }
}

impl VadSettings {
    /// Resolve VAD settings from launch parameters
    ///
    /// Mode B always uses client VAD, whatever the separate override says.
    pub fn resolve(params: &LaunchParams, config: &ConciergeConfig) -> Self {
        let realtime_mode = params
            .realtime_mode
            .as_deref()
            .and_then(RealtimeMode::parse)
            .or_else(|| RealtimeMode::parse(&config.realtime_mode))
            .unwrap_or_default();

        let override_flag = params.client_vad.unwrap_or(config.client_vad);
        let use_client_vad = realtime_mode == RealtimeMode::B || override_flag;

        Self {
            realtime_mode,
            use_client_vad,
            threshold: config.client_vad_threshold,
            hangover_frames: config.client_vad_hangover_frames,
        }
    }

    pub fn is_mode_a(&self) -> bool {
        self.realtime_mode == RealtimeMode::A
    }

    pub fn vad_mode(&self) -> VadMode {
        if self.use_client_vad {
            VadMode::Client
        } else {
            VadMode::Server
        }
    }
}

/// Turn boundary reported by the client detector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VadTransition {
    SpeechStarted,
    SpeechEnded,
}

/// Client-side voice activity detector
///
/// Frames of any length are buffered into fixed chunks for the Silero model.
/// Speech end is only reported after `hangover_frames` consecutive silent
/// chunks so short pauses do not split a turn.
pub struct ClientVad {
    detector: SileroDetector,
    sample_rate: u32,
    threshold: f32,
    tracker: SpeechTracker,
    pending: Vec<f32>,
}

impl ClientVad {
    /// Create a new detector
    ///
    /// # Arguments
    /// * `sample_rate` - Sample rate of the audio (8000 or 16000)
    /// * `settings` - Threshold and hangover configuration
    pub fn new(sample_rate: u32, settings: &VadSettings) -> Result<Self> {
        if ![8000, 16000].contains(&sample_rate) {
            return Err(ConciergeError::Config(format!(
                "Invalid sample rate: {}. Must be 8000 or 16000",
                sample_rate
            )));
        }

        let detector = SileroDetector::builder()
            .sample_rate(sample_rate as i32)
            .chunk_size(chunk_size_for(sample_rate))
            .build()
            .map_err(|e| ConciergeError::Config(format!("Failed to create VAD: {:?}", e)))?;

        info!(
            "Initialized client VAD with sample rate: {}, threshold: {}",
            sample_rate, settings.threshold
        );

        Ok(Self {
            detector,
            sample_rate,
            threshold: settings.threshold.clamp(0.0, 1.0),
            tracker: SpeechTracker::new(settings.hangover_frames),
            pending: Vec::with_capacity(chunk_size_for(sample_rate) * 2),
        })
    }

    /// Feed captured samples, returning the last turn boundary crossed
    pub fn process(&mut self, samples: &[f32]) -> Option<VadTransition> {
        self.pending.extend_from_slice(samples);

        let chunk = self.chunk_size();
        let mut transition = None;
        while self.pending.len() >= chunk {
            let frame: Vec<f32> = self.pending.drain(..chunk).collect();
            let probability = self.detector.predict(frame);
            if let Some(t) = self.tracker.observe(probability >= self.threshold) {
                debug!("Client VAD transition: {:?}", t);
                transition = Some(t);
            }
        }
        transition
    }

    /// Whether the detector currently considers the user to be speaking
    pub fn is_speaking(&self) -> bool {
        self.tracker.speaking
    }

    /// Reset detector state between turns
    pub fn reset(&mut self) {
        self.detector.reset();
        self.tracker = SpeechTracker::new(self.tracker.hangover_frames);
        self.pending.clear();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Chunk size the model is fed with (32ms)
    pub fn chunk_size(&self) -> usize {
        chunk_size_for(self.sample_rate)
    }
}

fn chunk_size_for(sample_rate: u32) -> usize {
    match sample_rate {
        8000 => 256,
        _ => 512,
    }
}

/// Speech/silence hysteresis over per-chunk decisions
#[derive(Clone, Debug)]
struct SpeechTracker {
    speaking: bool,
    silent_frames: u32,
    hangover_frames: u32,
}

impl SpeechTracker {
    fn new(hangover_frames: u32) -> Self {
        Self {
            speaking: false,
            silent_frames: 0,
            hangover_frames: hangover_frames.max(1),
        }
    }

    fn observe(&mut self, is_speech: bool) -> Option<VadTransition> {
        if is_speech {
            self.silent_frames = 0;
            if !self.speaking {
                self.speaking = true;
                return Some(VadTransition::SpeechStarted);
            }
            return None;
        }

        if self.speaking {
            self.silent_frames += 1;
            if self.silent_frames >= self.hangover_frames {
                self.speaking = false;
                self.silent_frames = 0;
                return Some(VadTransition::SpeechEnded);
            }
        }
        None
    }
}
