//! In-process signaling hub
//!
//! Mirrors the meeting namespace of the signaling backend: sockets join
//! `meeting:group:<id>` / `meeting:direct:<id>` rooms, roster changes fan out
//! to the rest of the room, and offers, answers and candidates are relayed to
//! the addressed socket. Used by the `loopback` subcommand and by tests.

use super::{Transport, TransportError, TransportEvent, EVENT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

pub const GROUP_MEETING_PREFIX: &str = "meeting:group:";
pub const DIRECT_MEETING_PREFIX: &str = "meeting:direct:";

/// Identity attached to a hub connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), name: None, avatar: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

struct SocketEntry {
    profile: UserProfile,
    events: broadcast::Sender<TransportEvent>,
    rooms: BTreeSet<String>,
}

struct GroupEntry {
    name: String,
    members: Vec<String>,
}

#[derive(Default)]
struct HubState {
    next_socket: u64,
    sockets: HashMap<String, SocketEntry>,
    /// Room name to member sockets, in join order
    rooms: HashMap<String, Vec<String>>,
    groups: HashMap<String, GroupEntry>,
    conversations: HashMap<String, Vec<String>>,
}

/// Shared signaling hub; clones refer to the same rooms
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection for `profile`
    pub fn connect(&self, profile: UserProfile) -> Arc<LoopbackTransport> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let socket_id = {
            let mut state = self.state.lock();
            state.next_socket += 1;
            let socket_id = format!("sock-{}", state.next_socket);
            state.sockets.insert(
                socket_id.clone(),
                SocketEntry { profile: profile.clone(), events: events.clone(), rooms: BTreeSet::new() },
            );
            socket_id
        };
        info!("Loopback connection {} for user {}", socket_id, profile.user_id);

        Arc::new(LoopbackTransport {
            hub: self.clone(),
            socket_id,
            events,
            closed: AtomicBool::new(false),
        })
    }

    /// Register group membership used for incoming-call notifications
    pub fn register_group(&self, group_id: &str, name: &str, members: &[&str]) {
        self.state.lock().groups.insert(
            group_id.to_string(),
            GroupEntry {
                name: name.to_string(),
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        );
    }

    /// Register the two sides of a direct conversation
    pub fn register_conversation(&self, conversation_id: &str, members: &[&str]) {
        self.state.lock().conversations.insert(
            conversation_id.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
    }

    /// Sockets currently in `room`, in join order
    pub fn room_members(&self, room: &str) -> Vec<String> {
        self.state.lock().rooms.get(room).cloned().unwrap_or_default()
    }

    fn handle(&self, socket_id: &str, event: &str, data: Value) -> Option<Value> {
        let mut state = self.state.lock();
        let profile = match state.sockets.get(socket_id) {
            Some(entry) => entry.profile.clone(),
            None => {
                warn!("Event {} from unknown socket {}", event, socket_id);
                return None;
            }
        };

        match event {
            "meeting:join" => Some(state.join(socket_id, &profile, &data)),
            "meeting:leave" => Some(state.leave(socket_id, &profile, &data)),
            "meeting:offer" => {
                state.relay(socket_id, &profile, &data, "meeting:offer", "offer", true);
                None
            }
            "meeting:answer" => {
                state.relay(socket_id, &profile, &data, "meeting:answer", "answer", false);
                None
            }
            "meeting:ice-candidate" => {
                state.relay(socket_id, &profile, &data, "meeting:ice-candidate", "candidate", true);
                None
            }
            "meeting:toggle-media" => {
                if let Some(room) = room_from_config(&data) {
                    let payload = json!({
                        "userId": profile.user_id,
                        "socketId": socket_id,
                        "mediaType": data.get("mediaType").cloned().unwrap_or(Value::Null),
                        "enabled": data.get("enabled").cloned().unwrap_or(Value::Null),
                        "meetingId": data.get("meetingId").cloned().unwrap_or(Value::Null),
                    });
                    state.to_room(&room, Some(socket_id), "meeting:media-state", &payload);
                }
                None
            }
            other => {
                debug!("Loopback hub ignoring event {}", other);
                None
            }
        }
    }

    fn disconnect(&self, socket_id: &str) {
        let mut state = self.state.lock();
        let entry = match state.sockets.remove(socket_id) {
            Some(entry) => entry,
            None => return,
        };

        for room in &entry.rooms {
            state.remove_from_room(room, socket_id);
            let payload = json!({ "userId": entry.profile.user_id, "socketId": socket_id });
            state.to_room(room, Some(socket_id), "meeting:user-left", &payload);
        }
        info!("Loopback connection {} closed", socket_id);
    }
}

impl HubState {
    fn join(&mut self, socket_id: &str, profile: &UserProfile, data: &Value) -> Value {
        let meeting_id = str_field(data, "meetingId");
        let meeting_type = str_field(data, "type");
        let (meeting_id, meeting_type) = match (meeting_id, meeting_type) {
            (Some(id), Some(kind)) if !id.is_empty() && !kind.is_empty() => (id, kind),
            _ => return rejected("Meeting ID and type are required"),
        };

        let room = match meeting_type {
            "group" => match str_field(data, "groupId") {
                Some(group_id) => format!("{}{}", GROUP_MEETING_PREFIX, group_id),
                None => return rejected("Group ID is required for group meetings"),
            },
            "direct" => match str_field(data, "conversationId") {
                Some(conversation_id) => format!("{}{}", DIRECT_MEETING_PREFIX, conversation_id),
                None => return rejected("Conversation ID is required for direct meetings"),
            },
            _ => return rejected("Invalid meeting type"),
        };

        let members = self.rooms.entry(room.clone()).or_default();
        if !members.iter().any(|s| s == socket_id) {
            members.push(socket_id.to_string());
        }
        if let Some(entry) = self.sockets.get_mut(socket_id) {
            entry.rooms.insert(room.clone());
        }

        let participants: Vec<Value> = self
            .rooms
            .get(&room)
            .map(|sockets| {
                sockets
                    .iter()
                    .filter_map(|s| self.sockets.get(s).map(|entry| (s, entry)))
                    .map(|(s, entry)| {
                        json!({
                            "userId": entry.profile.user_id,
                            "socketId": s,
                            "userName": entry.profile.name,
                            "userAvatar": entry.profile.avatar,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let joined = json!({
            "userId": profile.user_id,
            "meetingId": meeting_id,
            "socketId": socket_id,
            "userName": profile.name,
            "userAvatar": profile.avatar,
        });
        self.to_room(&room, Some(socket_id), "meeting:user-joined", &joined);

        if participants.len() == 1 {
            self.ring(profile, meeting_id, meeting_type, data);
        }

        info!("User {} joined meeting {} ({})", profile.user_id, meeting_id, meeting_type);
        json!({
            "success": true,
            "meetingId": meeting_id,
            "roomName": room,
            "participants": participants,
        })
    }

    fn leave(&mut self, socket_id: &str, profile: &UserProfile, data: &Value) -> Value {
        let room = match room_from_config(data) {
            Some(room) => room,
            None => return rejected("Invalid meeting data"),
        };

        self.remove_from_room(&room, socket_id);
        if let Some(entry) = self.sockets.get_mut(socket_id) {
            entry.rooms.remove(&room);
        }

        let payload = json!({
            "userId": profile.user_id,
            "meetingId": data.get("meetingId").cloned().unwrap_or(Value::Null),
            "socketId": socket_id,
        });
        self.to_room(&room, Some(socket_id), "meeting:user-left", &payload);
        info!("User {} left room {}", profile.user_id, room);
        json!({ "success": true })
    }

    /// Relay an SDP or candidate payload to the addressed socket, or to the
    /// room when untargeted and `room_fallback` is set
    fn relay(
        &mut self,
        socket_id: &str,
        profile: &UserProfile,
        data: &Value,
        event: &str,
        field: &str,
        room_fallback: bool,
    ) {
        let room = match room_from_config(data) {
            Some(room) => room,
            None => return,
        };

        let mut payload = json!({
            "fromUserId": profile.user_id,
            "fromSocketId": socket_id,
            "meetingId": data.get("meetingId").cloned().unwrap_or(Value::Null),
        });
        payload[field] = data.get(field).cloned().unwrap_or(Value::Null);

        match str_field(data, "targetSocketId") {
            Some(target) => self.to_socket(target, event, &payload),
            None if room_fallback => self.to_room(&room, Some(socket_id), event, &payload),
            None => {}
        }
    }

    fn ring(&self, caller: &UserProfile, meeting_id: &str, meeting_type: &str, data: &Value) {
        let caller_name = caller.name.clone().unwrap_or_else(|| "Someone".to_string());
        let (recipients, payload) = match meeting_type {
            "group" => {
                let group_id = str_field(data, "groupId").unwrap_or_default();
                let group = match self.groups.get(group_id) {
                    Some(group) => group,
                    None => return,
                };
                (
                    group.members.clone(),
                    json!({
                        "meetingId": meeting_id,
                        "type": "group",
                        "groupId": group_id,
                        "callerId": caller.user_id,
                        "callerName": caller_name,
                        "groupName": group.name,
                    }),
                )
            }
            _ => {
                let conversation_id = str_field(data, "conversationId").unwrap_or_default();
                let members = match self.conversations.get(conversation_id) {
                    Some(members) => members.clone(),
                    None => return,
                };
                (
                    members,
                    json!({
                        "meetingId": meeting_id,
                        "type": "direct",
                        "conversationId": conversation_id,
                        "callerId": caller.user_id,
                        "callerName": caller_name,
                    }),
                )
            }
        };

        for entry in self.sockets.values() {
            let user = &entry.profile.user_id;
            if user != &caller.user_id && recipients.iter().any(|r| r == user) {
                let _ = entry
                    .events
                    .send(TransportEvent::new("meeting:incoming-call", payload.clone()));
            }
        }
    }

    fn remove_from_room(&mut self, room: &str, socket_id: &str) {
        let now_empty = match self.rooms.get_mut(room) {
            Some(members) => {
                members.retain(|s| s != socket_id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove(room);
        }
    }

    fn to_socket(&self, socket_id: &str, event: &str, payload: &Value) {
        match self.sockets.get(socket_id) {
            Some(entry) => {
                let _ = entry.events.send(TransportEvent::new(event, payload.clone()));
            }
            None => debug!("Dropping {} for unknown socket {}", event, socket_id),
        }
    }

    fn to_room(&self, room: &str, except: Option<&str>, event: &str, payload: &Value) {
        if let Some(members) = self.rooms.get(room) {
            for socket_id in members {
                if Some(socket_id.as_str()) != except {
                    self.to_socket(socket_id, event, payload);
                }
            }
        }
    }
}

fn str_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn room_from_config(data: &Value) -> Option<String> {
    match str_field(data, "type") {
        Some("group") => str_field(data, "groupId").map(|id| format!("{}{}", GROUP_MEETING_PREFIX, id)),
        Some("direct") => {
            str_field(data, "conversationId").map(|id| format!("{}{}", DIRECT_MEETING_PREFIX, id))
        }
        _ => None,
    }
}

fn rejected(error: &str) -> Value {
    json!({ "success": false, "error": error })
}

/// One connection to a `LoopbackHub`
pub struct LoopbackTransport {
    hub: LoopbackHub,
    socket_id: String,
    events: broadcast::Sender<TransportEvent>,
    closed: AtomicBool,
}

impl LoopbackTransport {
    /// Drop out of every room, notifying the remaining members
    pub fn disconnect(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.hub.disconnect(&self.socket_id);
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn socket_id(&self) -> Option<String> {
        Some(self.socket_id.clone())
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.hub.handle(&self.socket_id, event, payload);
        Ok(())
    }

    async fn request(&self, event: &str, payload: Value) -> Result<Value, TransportError> {
        self.ensure_open()?;
        self.hub
            .handle(&self.socket_id, event, payload)
            .ok_or_else(|| TransportError::AckDropped(event.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(meeting: &str, group: &str) -> Value {
        json!({ "meetingId": meeting, "type": "group", "groupId": group })
    }

    #[tokio::test]
    async fn join_validation_errors() {
        let hub = LoopbackHub::new();
        let alice = hub.connect(UserProfile::new("alice"));

        let ack = alice.request("meeting:join", json!({ "type": "group" })).await.unwrap();
        assert_eq!(ack["error"], "Meeting ID and type are required");

        let ack = alice
            .request("meeting:join", json!({ "meetingId": "m1", "type": "group" }))
            .await
            .unwrap();
        assert_eq!(ack["error"], "Group ID is required for group meetings");

        let ack = alice
            .request("meeting:join", json!({ "meetingId": "m1", "type": "direct" }))
            .await
            .unwrap();
        assert_eq!(ack["error"], "Conversation ID is required for direct meetings");

        let ack = alice
            .request("meeting:join", json!({ "meetingId": "m1", "type": "broadcast" }))
            .await
            .unwrap();
        assert_eq!(ack["error"], "Invalid meeting type");
        assert_eq!(ack["success"], false);
    }

    #[tokio::test]
    async fn join_lists_room_and_notifies_others() {
        let hub = LoopbackHub::new();
        let alice = hub.connect(UserProfile::new("alice").with_name("Alice"));
        let bob = hub.connect(UserProfile::new("bob"));
        let mut alice_events = alice.subscribe();

        alice.request("meeting:join", config("m1", "g1")).await.unwrap();
        let ack = bob.request("meeting:join", config("m1", "g1")).await.unwrap();

        assert_eq!(ack["roomName"], "meeting:group:g1");
        let participants = ack["participants"].as_array().unwrap();
        assert_eq!(participants.len(), 2);
        assert_eq!(participants[0]["userName"], "Alice");

        let joined = alice_events.recv().await.unwrap();
        assert_eq!(joined.event, "meeting:user-joined");
        assert_eq!(joined.payload["userId"], "bob");
        assert_eq!(joined.payload["meetingId"], "m1");
    }

    #[tokio::test]
    async fn relays_to_target_socket_only() {
        let hub = LoopbackHub::new();
        let alice = hub.connect(UserProfile::new("alice"));
        let bob = hub.connect(UserProfile::new("bob"));
        let carol = hub.connect(UserProfile::new("carol"));
        for t in [&alice, &bob, &carol] {
            t.request("meeting:join", config("m1", "g1")).await.unwrap();
        }
        let mut bob_events = bob.subscribe();
        let mut carol_events = carol.subscribe();

        let mut payload = config("m1", "g1");
        payload["offer"] = json!({ "type": "offer", "sdp": "v=0" });
        payload["targetSocketId"] = json!(bob.socket_id().unwrap());
        alice.emit("meeting:offer", payload).unwrap();

        let offer = bob_events.recv().await.unwrap();
        assert_eq!(offer.event, "meeting:offer");
        assert_eq!(offer.payload["fromUserId"], "alice");
        assert_eq!(offer.payload["fromSocketId"], json!(alice.socket_id().unwrap()));
        assert!(carol_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_announces_user_left_without_meeting_id() {
        let hub = LoopbackHub::new();
        let alice = hub.connect(UserProfile::new("alice"));
        let bob = hub.connect(UserProfile::new("bob"));
        alice.request("meeting:join", config("m1", "g1")).await.unwrap();
        bob.request("meeting:join", config("m1", "g1")).await.unwrap();
        let mut alice_events = alice.subscribe();

        bob.disconnect();
        let left = alice_events.recv().await.unwrap();
        assert_eq!(left.event, "meeting:user-left");
        assert_eq!(left.payload["userId"], "bob");
        assert!(left.payload.get("meetingId").is_none());
        assert_eq!(hub.room_members("meeting:group:g1").len(), 1);
        assert!(matches!(bob.emit("meeting:leave", json!({})), Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn first_joiner_rings_registered_members() {
        let hub = LoopbackHub::new();
        hub.register_group("g1", "Team", &["alice", "bob"]);
        let alice = hub.connect(UserProfile::new("alice"));
        let bob = hub.connect(UserProfile::new("bob"));
        let mut bob_events = bob.subscribe();

        alice.request("meeting:join", config("m1", "g1")).await.unwrap();
        let ring = bob_events.recv().await.unwrap();
        assert_eq!(ring.event, "meeting:incoming-call");
        assert_eq!(ring.payload["groupName"], "Team");
        assert_eq!(ring.payload["callerName"], "Someone");

        bob.request("meeting:join", config("m1", "g1")).await.unwrap();
        let mut alice_events = alice.subscribe();
        let carol = hub.connect(UserProfile::new("carol"));
        carol.request("meeting:join", config("m1", "g1")).await.unwrap();
        assert_eq!(alice_events.recv().await.unwrap().event, "meeting:user-joined");
    }
}
