//! OpenAI-style realtime provider ("Provider A")
//!
//! With server VAD the service detects turns itself. With client VAD the
//! provider commits the input buffer and asks for a response when the user
//! stops speaking.

use super::link::TurnDialect;
use super::{BackendControl, BackendSessionConfig, ProviderSettings, TurnDetection};

pub(crate) struct OpenAiDialect;

impl TurnDialect for OpenAiDialect {
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
        &[]
    }

    fn speech_ended(&self) -> &'static [BackendControl] {
        &[BackendControl::CommitInput, BackendControl::RequestResponse]
    }
}
