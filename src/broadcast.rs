//! Per-conversation pub/sub and the bounded snapshot log
//!
//! Live delivery is best-effort: a message published while nobody listens is
//! simply not delivered. Property snapshots are additionally appended to a
//! bounded log in the continuity store, so a widget that mounts later can still
//! read what the page last described.
//!
//! Hubs live in a [`ConversationBus`] carried by the continuity manager, so
//! every mount built on the same manager shares them.

use crate::continuity::ContinuityStore;
use crate::intent::NavigationIntent;
use crate::Result;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Queue depth of each live channel
const CHANNEL_CAPACITY: usize = 64;

/// What the user is currently looking at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySnapshot {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bathrooms: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
    /// Milliseconds since the Unix epoch
    pub ts: i64,
}

impl PropertySnapshot {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        price: f64,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            price,
            address: address.into(),
            bedrooms: None,
            bathrooms: None,
            area: None,
            images: None,
            property_type: None,
            features: None,
            ts: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_rooms(mut self, bedrooms: u32, bathrooms: f32) -> Self {
        self.bedrooms = Some(bedrooms);
        self.bathrooms = Some(bathrooms);
        self
    }

    pub fn with_area(mut self, area: f64) -> Self {
        self.area = Some(area);
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_type(mut self, property_type: impl Into<String>) -> Self {
        self.property_type = Some(property_type.into());
        self
    }

    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.features = Some(features);
        self
    }

    pub fn with_ts(mut self, ts: i64) -> Self {
        self.ts = ts;
        self
    }
}

/// Typed pub/sub with one logical channel per conversation id
pub struct ConversationHub<T: Clone + Send + 'static> {
    channels: RwLock<HashMap<String, broadcast::Sender<T>>>,
}

impl<T: Clone + Send + 'static> Default for ConversationHub<T> {
    fn default() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone + Send + 'static> ConversationHub<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver to current subscribers; returns how many received it
    pub fn publish(&self, conversation_id: &str, message: T) -> usize {
        let sender = self.channels.read().get(conversation_id).cloned();
        match sender {
            Some(sender) => match sender.send(message) {
                Ok(count) => count,
                Err(_) => {
                    // Every receiver is gone
                    self.channels.write().remove(conversation_id);
                    0
                }
            },
            None => 0,
        }
    }

    pub fn subscribe(&self, conversation_id: &str) -> broadcast::Receiver<T> {
        self.channels
            .write()
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        self.channels
            .read()
            .get(conversation_id)
            .map_or(0, |sender| sender.receiver_count())
    }
}

/// The hubs shared by every mount of one continuity manager
#[derive(Clone, Default)]
pub struct ConversationBus {
    snapshots: Arc<ConversationHub<PropertySnapshot>>,
    intents: Arc<ConversationHub<NavigationIntent>>,
}

impl ConversationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Arc<ConversationHub<PropertySnapshot>> {
        self.snapshots.clone()
    }

    pub fn intents(&self) -> Arc<ConversationHub<NavigationIntent>> {
        self.intents.clone()
    }
}

/// Live receiver for one conversation's snapshots
pub struct SnapshotSubscription {
    receiver: broadcast::Receiver<PropertySnapshot>,
}

impl SnapshotSubscription {
    /// Next snapshot, skipping over any the receiver fell behind on
    pub async fn recv(&mut self) -> Option<PropertySnapshot> {
        loop {
            match self.receiver.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Snapshot subscriber lagged, skipped {}", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<PropertySnapshot> {
        loop {
            match self.receiver.try_recv() {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Snapshot broadcast plus its durable fallback log
pub struct SnapshotChannel {
    hub: Arc<ConversationHub<PropertySnapshot>>,
    store: Arc<dyn ContinuityStore>,
    capacity: usize,
}

impl SnapshotChannel {
    pub fn new(
        hub: Arc<ConversationHub<PropertySnapshot>>,
        store: Arc<dyn ContinuityStore>,
        capacity: usize,
    ) -> Self {
        Self {
            hub,
            store,
            capacity: capacity.max(1),
        }
    }

    pub fn log_key(conversation_id: &str) -> String {
        format!("propertySnapshots:{}", conversation_id)
    }

    /// Broadcast live and append to the conversation log
    ///
    /// Returns the number of live receivers. The log append happens even when
    /// nobody is listening.
    pub fn publish(&self, conversation_id: &str, snapshot: PropertySnapshot) -> Result<usize> {
        let delivered = self.hub.publish(conversation_id, snapshot.clone());

        let mut log: VecDeque<PropertySnapshot> = self.recent(conversation_id).into();
        while log.len() >= self.capacity {
            log.pop_front();
        }
        log.push_back(snapshot);
        self.store
            .set(&Self::log_key(conversation_id), &serde_json::to_string(&log)?)?;

        debug!(
            "Snapshot published to '{}' ({} live, {} logged)",
            conversation_id,
            delivered,
            log.len()
        );
        Ok(delivered)
    }

    pub fn subscribe(&self, conversation_id: &str) -> SnapshotSubscription {
        SnapshotSubscription {
            receiver: self.hub.subscribe(conversation_id),
        }
    }

    /// Logged snapshots for a conversation, oldest first
    pub fn recent(&self, conversation_id: &str) -> Vec<PropertySnapshot> {
        let Some(raw) = self.store.get(&Self::log_key(conversation_id)) else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(log) => log,
            Err(e) => {
                warn!("Discarding unreadable snapshot log for '{}': {}", conversation_id, e);
                Vec::new()
            }
        }
    }

    /// Newest logged snapshot by timestamp
    pub fn latest(&self, conversation_id: &str) -> Option<PropertySnapshot> {
        self.recent(conversation_id).into_iter().max_by_key(|s| s.ts)
    }

    pub fn clear(&self, conversation_id: &str) -> Result<()> {
        self.store.remove(&Self::log_key(conversation_id))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
