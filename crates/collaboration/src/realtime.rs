/// Realtime event channel between connected clients
/// Fire-and-forget events, delivered to every other member of the room.
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{CollaborationError, Result};

/// Event names understood by clients and the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketEvent {
    JoinRequest,
    JoinAccepted,
    UserJoined,
    UserDisconnected,
    CodeFreezeUpdate,
    VersionCreated,
    VersionSwitched,
    VersionDeleted,
    TestGenerated,
    TestRun,
    TestResult,
    AuthStatus,
}

impl SocketEvent {
    pub const ALL: [SocketEvent; 12] = [
        Self::JoinRequest,
        Self::JoinAccepted,
        Self::UserJoined,
        Self::UserDisconnected,
        Self::CodeFreezeUpdate,
        Self::VersionCreated,
        Self::VersionSwitched,
        Self::VersionDeleted,
        Self::TestGenerated,
        Self::TestRun,
        Self::TestResult,
        Self::AuthStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JoinRequest => "join-request",
            Self::JoinAccepted => "join-accepted",
            Self::UserJoined => "user-joined",
            Self::UserDisconnected => "user-disconnected",
            Self::CodeFreezeUpdate => "code-freeze-update",
            Self::VersionCreated => "version-created",
            Self::VersionSwitched => "version-switched",
            Self::VersionDeleted => "version-deleted",
            Self::TestGenerated => "test-generated",
            Self::TestRun => "test-run",
            Self::TestResult => "test-result",
            Self::AuthStatus => "auth-status",
        }
    }
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SocketEvent {
    type Err = CollaborationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| CollaborationError::InvalidOp(format!("unknown event: {}", s)))
    }
}

/// Wire frame: `{"event": "<name>", "payload": <json>}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RealtimeMessage {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Payload of `join-request`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub room_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

pub type EventHandler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

pub trait RealtimeChannel: Send + Sync {
    fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionId;

    /// Remove every handler registered for `event`.
    fn unsubscribe(&self, event: &str);

    fn unsubscribe_handler(&self, id: SubscriptionId);

    /// Send to every other connected client. No acknowledgment.
    fn emit(&self, event: &str, payload: serde_json::Value) -> Result<()>;
}

/// Handlers of one connection, keyed by event name
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Vec<(SubscriptionId, EventHandler)>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    pub fn remove_event(&self, event: &str) {
        self.handlers.write().remove(event);
    }

    pub fn remove_handler(&self, id: SubscriptionId) {
        let mut handlers = self.handlers.write();
        for list in handlers.values_mut() {
            list.retain(|(sid, _)| *sid != id);
        }
        handlers.retain(|_, list| !list.is_empty());
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map(Vec::len).unwrap_or(0)
    }

    /// Invoke the handlers for `event`; returns how many ran.
    pub fn dispatch(&self, event: &str, payload: &serde_json::Value) -> usize {
        // Clone out of the lock so a handler may (un)subscribe or emit.
        let handlers: Vec<EventHandler> = match self.handlers.read().get(event) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };

        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }
}

/// In-process hub; every channel connected to it is one client of the room.
#[derive(Clone, Default)]
pub struct LocalHub {
    members: Arc<RwLock<HashMap<Uuid, HandlerRegistry>>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> LocalChannel {
        let id = Uuid::new_v4();
        let registry = HandlerRegistry::new();
        self.members.write().insert(id, registry.clone());
        debug!("local channel {} connected", id);

        LocalChannel {
            id,
            registry,
            members: Arc::clone(&self.members),
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.read().len()
    }
}

pub struct LocalChannel {
    id: Uuid,
    registry: HandlerRegistry,
    members: Arc<RwLock<HashMap<Uuid, HandlerRegistry>>>,
}

impl LocalChannel {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl RealtimeChannel for LocalChannel {
    fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        self.registry.add(event, handler)
    }

    fn unsubscribe(&self, event: &str) {
        self.registry.remove_event(event);
    }

    fn unsubscribe_handler(&self, id: SubscriptionId) {
        self.registry.remove_handler(id);
    }

    fn emit(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        let others: Vec<HandlerRegistry> = {
            let members = self.members.read();
            if !members.contains_key(&self.id) {
                warn!("emit on disconnected local channel {}", self.id);
                return Err(CollaborationError::ChannelClosed(self.id.to_string()));
            }
            members
                .iter()
                .filter(|(id, _)| **id != self.id)
                .map(|(_, registry)| registry.clone())
                .collect()
        };

        for registry in others {
            registry.dispatch(event, &payload);
        }
        Ok(())
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.members.write().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<serde_json::Value>>>, EventHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: EventHandler =
            Arc::new(move |payload: &serde_json::Value| sink.lock().push(payload.clone()));
        (seen, handler)
    }

    #[test]
    fn test_event_names_round_trip() {
        for event in SocketEvent::ALL {
            assert_eq!(event.as_str().parse::<SocketEvent>().unwrap(), event);
        }
        assert_eq!(SocketEvent::CodeFreezeUpdate.to_string(), "code-freeze-update");
        assert!("no-such-event".parse::<SocketEvent>().is_err());
    }

    #[test]
    fn test_emit_reaches_others_only() {
        let hub = LocalHub::new();
        let alice = hub.connect();
        let bob = hub.connect();

        let (alice_seen, alice_handler) = recorder();
        let (bob_seen, bob_handler) = recorder();
        alice.subscribe("code-freeze-update", alice_handler);
        bob.subscribe("code-freeze-update", bob_handler);

        alice
            .emit("code-freeze-update", json!({ "status": "active" }))
            .unwrap();

        assert!(alice_seen.lock().is_empty());
        assert_eq!(bob_seen.lock().as_slice(), &[json!({ "status": "active" })]);
    }

    #[test]
    fn test_unsubscribe_removes_all_handlers_for_event() {
        let hub = LocalHub::new();
        let alice = hub.connect();
        let bob = hub.connect();

        let (seen, handler) = recorder();
        bob.subscribe("version-created", Arc::clone(&handler));
        bob.subscribe("version-created", handler);
        assert_eq!(bob.registry.handler_count("version-created"), 2);

        bob.unsubscribe("version-created");
        alice.emit("version-created", json!({})).unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_unsubscribe_single_handler() {
        let hub = LocalHub::new();
        let alice = hub.connect();
        let bob = hub.connect();

        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();
        let first_id = bob.subscribe("test-result", first);
        bob.subscribe("test-result", second);

        bob.unsubscribe_handler(first_id);
        alice.emit("test-result", json!(1)).unwrap();

        assert!(first_seen.lock().is_empty());
        assert_eq!(second_seen.lock().len(), 1);
    }

    #[test]
    fn test_dropped_channel_leaves_hub() {
        let hub = LocalHub::new();
        let alice = hub.connect();
        {
            let _bob = hub.connect();
            assert_eq!(hub.member_count(), 2);
        }
        assert_eq!(hub.member_count(), 1);
        assert!(alice.emit("user-joined", json!({})).is_ok());
    }

    #[test]
    fn test_message_wire_shape() {
        let msg = RealtimeMessage::new(
            SocketEvent::JoinRequest.as_str(),
            serde_json::to_value(JoinRequest {
                room_id: "room-1".to_string(),
                username: "alice".to_string(),
            })
            .unwrap(),
        );

        let text = msg.to_text().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "join-request");
        assert_eq!(value["payload"]["roomId"], "room-1");
        assert_eq!(RealtimeMessage::from_text(&text).unwrap(), msg);
    }
}
