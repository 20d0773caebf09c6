//! Roster of remote meeting members

use crate::model::{MediaKind, Participant};
use crate::observers::{ObserverSet, Subscription};
use crate::signaling::message::RosterEntry;
use log::debug;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// userId → Participant; every mutation publishes the full roster
pub struct ParticipantRegistry {
    local_user_id: String,
    participants: Mutex<BTreeMap<String, Participant>>,
    observers: ObserverSet<Vec<Participant>>,
}

impl ParticipantRegistry {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            participants: Mutex::new(BTreeMap::new()),
            observers: ObserverSet::new(),
        }
    }

    /// Merge the join roster; the local user is skipped. Returns who was added.
    pub fn seed(&self, roster: &[RosterEntry]) -> Vec<Participant> {
        let (added, snapshot) = {
            let mut participants = self.participants.lock();
            let mut added = Vec::new();
            for entry in roster.iter().filter(|e| e.user_id != self.local_user_id) {
                let participant = Participant::new(
                    entry.user_id.clone(),
                    entry.socket_id.clone(),
                    entry.user_name.clone(),
                    entry.user_avatar.clone(),
                );
                participants.insert(participant.user_id.clone(), participant.clone());
                added.push(participant);
            }
            (added, participants.values().cloned().collect::<Vec<_>>())
        };
        debug!("Roster seeded with {} participant(s)", added.len());
        self.observers.notify(&snapshot);
        added
    }

    /// Add or replace a participant; the local user is never inserted
    pub fn insert(&self, participant: Participant) -> bool {
        if participant.user_id == self.local_user_id {
            return false;
        }
        let snapshot = {
            let mut participants = self.participants.lock();
            participants.insert(participant.user_id.clone(), participant);
            participants.values().cloned().collect::<Vec<_>>()
        };
        self.observers.notify(&snapshot);
        true
    }

    pub fn remove(&self, user_id: &str) -> Option<Participant> {
        let (removed, snapshot) = {
            let mut participants = self.participants.lock();
            let removed = participants.remove(user_id)?;
            (removed, participants.values().cloned().collect::<Vec<_>>())
        };
        self.observers.notify(&snapshot);
        Some(removed)
    }

    /// Apply a remote media-state change
    pub fn patch_media(&self, user_id: &str, kind: MediaKind, enabled: bool) -> bool {
        let snapshot = {
            let mut participants = self.participants.lock();
            match participants.get_mut(user_id) {
                Some(participant) => participant.set_media(kind, enabled),
                None => return false,
            }
            participants.values().cloned().collect::<Vec<_>>()
        };
        self.observers.notify(&snapshot);
        true
    }

    pub fn clear(&self) {
        let was_empty = {
            let mut participants = self.participants.lock();
            let was_empty = participants.is_empty();
            participants.clear();
            was_empty
        };
        if !was_empty {
            self.observers.notify(&Vec::new());
        }
    }

    pub fn get(&self, user_id: &str) -> Option<Participant> {
        self.participants.lock().get(user_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Participant> {
        self.participants.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.participants.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn on_participant_update(
        &self,
        callback: impl Fn(&Vec<Participant>) + Send + Sync + 'static,
    ) -> Subscription {
        self.observers.subscribe(callback)
    }
}
