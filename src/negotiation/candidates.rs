//! Remote candidates that arrived before their peer's remote description

use crate::model::IceCandidate;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub struct PendingIceCandidates {
    queues: Mutex<HashMap<String, Vec<IceCandidate>>>,
}

impl PendingIceCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append in arrival order; returns the queue length
    pub fn push(&self, user_id: &str, candidate: IceCandidate) -> usize {
        let mut queues = self.queues.lock();
        let queue = queues.entry(user_id.to_string()).or_default();
        queue.push(candidate);
        queue.len()
    }

    /// Remove and return the whole queue, oldest first
    pub fn take(&self, user_id: &str) -> Vec<IceCandidate> {
        self.queues.lock().remove(user_id).unwrap_or_default()
    }

    /// Drop a peer's queue without applying it
    pub fn discard(&self, user_id: &str) -> usize {
        self.queues.lock().remove(user_id).map(|q| q.len()).unwrap_or(0)
    }

    pub fn len(&self, user_id: &str) -> usize {
        self.queues.lock().get(user_id).map(Vec::len).unwrap_or(0)
    }

    pub fn clear(&self) {
        self.queues.lock().clear();
    }
}
