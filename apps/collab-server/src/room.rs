use collaboration::{RealtimeMessage, SocketEvent};
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info};
use uuid::Uuid;

pub type Tx = mpsc::UnboundedSender<Message>;

/// One connected client
struct Member {
    username: String,
    tx: Tx,
}

/// Clients that joined the same room id
struct Room {
    members: HashMap<Uuid, Member>,
}

impl Room {
    fn new() -> Self {
        Self {
            members: HashMap::new(),
        }
    }

    fn usernames(&self) -> Vec<String> {
        let mut names: Vec<_> = self.members.values().map(|m| m.username.clone()).collect();
        names.sort();
        names
    }

    /// Send to every member except `exclude`; returns how many were reached.
    fn broadcast(&self, msg: &RealtimeMessage, exclude: Option<Uuid>) -> usize {
        let text = match msg.to_text() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                return 0;
            }
        };

        let mut sent = 0;
        for (id, member) in &self.members {
            if Some(*id) == exclude {
                continue;
            }

            match member.tx.send(Message::Text(text.clone())) {
                Ok(()) => sent += 1,
                Err(e) => error!("Failed to send to {}: {}", member.username, e),
            }
        }
        sent
    }
}

/// All rooms of the relay, created on first join and dropped when empty
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to `room_id`. The joiner gets `join-accepted` with
    /// the member list; everyone else gets `user-joined`.
    pub async fn join(&self, room_id: &str, conn: Uuid, username: &str, tx: Tx) {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!("Creating room {}", room_id);
            Room::new()
        });

        room.members.insert(
            conn,
            Member {
                username: username.to_string(),
                tx: tx.clone(),
            },
        );

        let accepted = RealtimeMessage::new(
            SocketEvent::JoinAccepted.as_str(),
            json!({
                "roomId": room_id,
                "username": username,
                "users": room.usernames(),
            }),
        );
        match accepted.to_text() {
            Ok(text) => {
                let _ = tx.send(Message::Text(text));
            }
            Err(e) => error!("Failed to serialize join-accepted: {}", e),
        }

        let joined = RealtimeMessage::new(
            SocketEvent::UserJoined.as_str(),
            json!({ "username": username }),
        );
        room.broadcast(&joined, Some(conn));
        info!("{} joined room {} ({} members)", username, room_id, room.members.len());
    }

    /// Forward a client's frame to the rest of its room.
    pub async fn relay(&self, room_id: &str, from: Uuid, msg: &RealtimeMessage) -> usize {
        let rooms = self.rooms.read().await;
        match rooms.get(room_id) {
            Some(room) => room.broadcast(msg, Some(from)),
            None => 0,
        }
    }

    /// Remove a connection; the others get `user-disconnected`.
    pub async fn leave(&self, room_id: &str, conn: Uuid) -> Option<String> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id)?;
        let member = room.members.remove(&conn)?;

        let left = RealtimeMessage::new(
            SocketEvent::UserDisconnected.as_str(),
            json!({ "username": member.username }),
        );
        room.broadcast(&left, None);
        info!("{} left room {}", member.username, room_id);

        if room.members.is_empty() {
            info!("Room {} is empty, removing", room_id);
            rooms.remove(room_id);
        }
        Some(member.username)
    }

    #[cfg(test)]
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    #[cfg(test)]
    pub async fn members(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(Room::usernames)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn member() -> (Tx, mpsc::UnboundedReceiver<Message>) {
        mpsc::unbounded_channel()
    }

    fn frames(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<RealtimeMessage> {
        let mut out = Vec::new();
        while let Ok(Message::Text(text)) = rx.try_recv() {
            out.push(RealtimeMessage::from_text(&text).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_join_announces_to_others() {
        let registry = RoomRegistry::new();
        let (alice_tx, mut alice_rx) = member();
        let (bob_tx, mut bob_rx) = member();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        registry.join("room-1", alice, "alice", alice_tx).await;
        registry.join("room-1", bob, "bob", bob_tx).await;

        let alice_frames = frames(&mut alice_rx);
        assert_eq!(alice_frames[0].event, "join-accepted");
        assert_eq!(alice_frames[1].event, "user-joined");
        assert_eq!(alice_frames[1].payload["username"], "bob");

        let bob_frames = frames(&mut bob_rx);
        assert_eq!(bob_frames.len(), 1);
        assert_eq!(
            bob_frames[0].payload["users"],
            serde_json::json!(["alice", "bob"])
        );
    }

    #[tokio::test]
    async fn test_relay_skips_sender_and_other_rooms() {
        let registry = RoomRegistry::new();
        let (alice_tx, mut alice_rx) = member();
        let (bob_tx, mut bob_rx) = member();
        let (carol_tx, mut carol_rx) = member();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        registry.join("room-1", alice, "alice", alice_tx).await;
        registry.join("room-1", bob, "bob", bob_tx).await;
        registry.join("room-2", carol, "carol", carol_tx).await;
        frames(&mut alice_rx);
        frames(&mut bob_rx);
        frames(&mut carol_rx);

        let update = RealtimeMessage::new(
            "code-freeze-update",
            serde_json::json!({ "status": "active" }),
        );
        assert_eq!(registry.relay("room-1", alice, &update).await, 1);

        assert!(frames(&mut alice_rx).is_empty());
        assert_eq!(frames(&mut bob_rx), vec![update]);
        assert!(frames(&mut carol_rx).is_empty());
    }

    #[tokio::test]
    async fn test_leave_notifies_and_drops_empty_room() {
        let registry = RoomRegistry::new();
        let (alice_tx, _alice_rx) = member();
        let (bob_tx, mut bob_rx) = member();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        registry.join("room-1", alice, "alice", alice_tx).await;
        registry.join("room-1", bob, "bob", bob_tx).await;
        frames(&mut bob_rx);

        assert_eq!(registry.leave("room-1", alice).await.as_deref(), Some("alice"));
        let left = frames(&mut bob_rx);
        assert_eq!(left[0].event, "user-disconnected");
        assert_eq!(left[0].payload["username"], Value::from("alice"));
        assert_eq!(registry.members("room-1").await, vec!["bob".to_string()]);

        registry.leave("room-1", bob).await;
        assert_eq!(registry.room_count().await, 0);
        assert!(registry.leave("room-1", bob).await.is_none());
    }
}
