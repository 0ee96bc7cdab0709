//! Transcript Intent Router
//!
//! Scans live transcripts and the typed-message buffer for navigation phrases.
//! On a match the continuity flags are written first, then the host navigates,
//! so the remounted widget can pick the voice session back up.

use crate::broadcast::ConversationHub;
use crate::continuity::ContinuityManager;
use crate::session::TranscriptEvent;
use crate::Result;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Navigation destinations reachable by voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Properties,
    Home,
    Contact,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Properties => "/properties",
            Route::Home => "/",
            Route::Contact => "/contact",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Trigger phrases, already normalized (lowercase, unaccented)
const TRIGGERS: &[(&str, Route)] = &[
    // English
    ("go to properties", Route::Properties),
    ("go to the properties", Route::Properties),
    ("show me properties", Route::Properties),
    ("show me the properties", Route::Properties),
    ("open properties", Route::Properties),
    ("go to listings", Route::Properties),
    ("go home", Route::Home),
    ("go to home", Route::Home),
    ("go to the home page", Route::Home),
    ("go to contact", Route::Contact),
    ("contact an agent", Route::Contact),
    // Spanish
    ("ir a propiedades", Route::Properties),
    ("ir a las propiedades", Route::Properties),
    ("ver propiedades", Route::Properties),
    ("muestrame propiedades", Route::Properties),
    ("muestrame las propiedades", Route::Properties),
    ("ir al inicio", Route::Home),
    ("ir a contacto", Route::Contact),
    // Portuguese
    ("ir para imoveis", Route::Properties),
    ("ir para os imoveis", Route::Properties),
    ("ver imoveis", Route::Properties),
    ("mostrar imoveis", Route::Properties),
    ("ir para o inicio", Route::Home),
    ("ir para contato", Route::Contact),
    // French
    ("aller aux proprietes", Route::Properties),
    ("voir les proprietes", Route::Properties),
    ("voir les biens", Route::Properties),
    ("aller a l accueil", Route::Home),
];

/// Fold accented Latin letters to their base letter
fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

/// Lowercase, strip accents and punctuation, collapse whitespace
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(fold_char)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find the first trigger phrase contained in `text` on word boundaries
pub fn detect_route(text: &str) -> Option<(Route, &'static str)> {
    let padded = format!(" {} ", normalize(text));
    TRIGGERS
        .iter()
        .find(|(phrase, _)| padded.contains(&format!(" {} ", phrase)))
        .map(|(phrase, route)| (*route, *phrase))
}

/// Where the matched text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    Transcript,
    TypedMessage,
}

/// Broadcast to other contexts sharing the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationIntent {
    pub route: Route,
    pub source: IntentSource,
    pub phrase: String,
    pub chat_open: bool,
    pub resume_voice: bool,
    pub ts: i64,
}

/// Performs the client-side route change
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route) -> Result<()>;
}

pub struct TranscriptIntentRouter {
    continuity: ContinuityManager,
    navigator: Arc<dyn Navigator>,
    intents: Arc<ConversationHub<NavigationIntent>>,
    last_text: Mutex<Option<String>>,
}

impl TranscriptIntentRouter {
    pub fn new(continuity: ContinuityManager, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            intents: continuity.bus().intents(),
            continuity,
            navigator,
            last_text: Mutex::new(None),
        }
    }

    pub fn intent_hub(&self) -> Arc<ConversationHub<NavigationIntent>> {
        Arc::clone(&self.intents)
    }

    pub fn on_transcript(&self, event: &TranscriptEvent) -> Result<Option<Route>> {
        self.route(&event.text, IntentSource::Transcript)
    }

    pub fn on_typed_message(&self, text: &str) -> Result<Option<Route>> {
        self.route(text, IntentSource::TypedMessage)
    }

    fn route(&self, text: &str, source: IntentSource) -> Result<Option<Route>> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Ok(None);
        }
        {
            let mut last = self.last_text.lock();
            if last.as_deref() == Some(normalized.as_str()) {
                return Ok(None);
            }
            *last = Some(normalized);
        }

        let Some((route, phrase)) = detect_route(text) else {
            return Ok(None);
        };

        let chat_open = self.continuity.chat_open();
        let resume_voice = chat_open && self.continuity.voice_active();
        info!(
            "Navigation intent '{}' -> {} (chat_open={}, resume_voice={})",
            phrase, route, chat_open, resume_voice
        );

        self.continuity.set_chat_open(chat_open)?;
        if resume_voice {
            self.continuity.arm_autostart()?;
        }

        let intent = NavigationIntent {
            route,
            source,
            phrase: phrase.to_string(),
            chat_open,
            resume_voice,
            ts: Utc::now().timestamp_millis(),
        };
        let conversation_id = self.continuity.conversation_id();
        let delivered = self.intents.publish(&conversation_id, intent);
        debug!("Navigation intent delivered to {} listener(s)", delivered);

        if let Err(e) = self.navigator.navigate(route) {
            warn!("Navigation to {} failed: {}", route, e);
            return Err(e);
        }
        Ok(Some(route))
    }
}
