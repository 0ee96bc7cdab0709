//! Provider selection
//!
//! The selector starts out pending and resolves exactly once, on the first
//! client-side evaluation. While pending, both providers are disabled.

use serde::Serialize;
use tracing::{debug, info, warn};

/// Identity of a realtime speech provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-style realtime provider ("Provider A")
    OpenAi,
    /// Gemini-style live provider ("Provider B")
    Gemini,
}

impl ProviderKind {
    /// Normalize a raw identifier to one of the two providers
    ///
    /// Anything that is not recognisably the Gemini provider maps to OpenAI.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" | "gemini-live" | "b" => ProviderKind::Gemini,
            _ => ProviderKind::OpenAi,
        }
    }

    /// Resolve an optional override against a configured default
    pub fn resolve(override_value: Option<&str>, default: &str) -> Self {
        match override_value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(value) => Self::normalize(value),
            None => Self::normalize(default),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Selection state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProviderSelection {
    /// Not evaluated yet (e.g. during server rendering)
    #[default]
    Pending,
    /// Resolved for the lifetime of the mount
    Resolved(ProviderKind),
}

/// Resolves which provider is authoritative for a mount
#[derive(Clone, Debug, Default)]
pub struct ProviderSelector {
    selection: ProviderSelection,
}

impl ProviderSelector {
    /// Create a pending selector
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the selection
    ///
    /// Only the first call has an effect; provider identity is not
    /// hot-swappable within a mount.
    pub fn resolve(&mut self, kind: ProviderKind) -> ProviderKind {
        match self.selection {
            ProviderSelection::Resolved(existing) => {
                if existing != kind {
                    warn!(
                        "Ignoring provider re-selection to {} (already resolved to {})",
                        kind, existing
                    );
                } else {
                    debug!("Provider selection already resolved to {}", existing);
                }
                existing
            }
            ProviderSelection::Pending => {
                info!("Provider selection resolved to {}", kind);
                self.selection = ProviderSelection::Resolved(kind);
                kind
            }
        }
    }

    pub fn selection(&self) -> ProviderSelection {
        self.selection
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.selection, ProviderSelection::Resolved(_))
    }

    /// The resolved provider, if any
    pub fn selected(&self) -> Option<ProviderKind> {
        match self.selection {
            ProviderSelection::Resolved(kind) => Some(kind),
            ProviderSelection::Pending => None,
        }
    }

    /// Whether `kind` may be started
    ///
    /// False for both providers until the selection resolves.
    pub fn is_enabled(&self, kind: ProviderKind) -> bool {
        self.selected() == Some(kind)
    }
}
