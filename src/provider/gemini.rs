//! Gemini-style live provider ("Provider B")
//!
//! With client VAD, automatic activity detection is switched off on the
//! service and the provider brackets each user turn with explicit activity
//! start/end markers.

use super::link::TurnDialect;
use super::{BackendControl, BackendSessionConfig, ProviderSettings, TurnDetection};

pub(crate) struct GeminiDialect;

impl TurnDialect for GeminiDialect {
    fn session_config(&self, settings: &ProviderSettings) -> BackendSessionConfig {
        BackendSessionConfig {
            turn_detection: if settings.vad.use_client_vad {
                TurnDetection::Manual
            } else {
                TurnDetection::Server
            },
            tools_enabled: settings.function_calling,
            sample_rate: settings.sample_rate,
        }
    }

    fn speech_started(&self) -> &'static [BackendControl] {
        &[BackendControl::ActivityStart]
    }

    fn speech_ended(&self) -> &'static [BackendControl] {
        &[BackendControl::ActivityEnd]
    }
}
