//! Peer connection lifecycle
//!
//! One entry per remote user. Each entry owns a worker task that serializes
//! every operation on that peer's connection; entries are created idempotently
//! and torn down by closing the connection and aborting the worker.

mod worker;

use crate::config::NegotiationConfig;
use crate::media::LocalStream;
use crate::metrics::MeetingMetrics;
use crate::negotiation::{PeerAddress, PeerCommand, PendingIceCandidates};
use crate::observers::{ObserverSet, Subscription};
use crate::rtc::{PeerConnectionFactory, RemoteStream};
use crate::signaling::channel::SignalingChannel;
use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use worker::{PeerSlot, PeerWorker};

/// Remote stream change for one user; `None` once the peer is gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUpdate {
    pub user_id: String,
    pub stream: Option<RemoteStream>,
}

struct PeerEntry {
    address: PeerAddress,
    inbox: mpsc::UnboundedSender<PeerCommand>,
    worker: JoinHandle<()>,
    slot: Arc<Mutex<PeerSlot>>,
}

impl PeerEntry {
    /// Stop the worker and close the connection; returns whether one was open
    async fn shutdown(self, user_id: &str) -> bool {
        self.worker.abort();
        let connection = {
            let mut slot = self.slot.lock();
            slot.closed = true;
            slot.connection.take()
        };

        match connection {
            Some(connection) => {
                if let Err(e) = connection.close().await {
                    warn!("Error closing connection to {}: {}", user_id, e);
                }
                true
            }
            None => false,
        }
    }
}

pub struct PeerConnectionManager {
    factory: Arc<dyn PeerConnectionFactory>,
    signaling: Arc<SignalingChannel>,
    pending: Arc<PendingIceCandidates>,
    metrics: Arc<MeetingMetrics>,
    config: NegotiationConfig,
    local_stream: RwLock<Option<Arc<LocalStream>>>,
    entries: Mutex<HashMap<String, PeerEntry>>,
    remote_streams: Arc<Mutex<HashMap<String, RemoteStream>>>,
    stream_observers: Arc<ObserverSet<StreamUpdate>>,
}

impl PeerConnectionManager {
    pub fn new(
        factory: Arc<dyn PeerConnectionFactory>,
        signaling: Arc<SignalingChannel>,
        pending: Arc<PendingIceCandidates>,
        metrics: Arc<MeetingMetrics>,
        config: NegotiationConfig,
    ) -> Self {
        Self {
            factory,
            signaling,
            pending,
            metrics,
            config,
            local_stream: RwLock::new(None),
            entries: Mutex::new(HashMap::new()),
            remote_streams: Arc::new(Mutex::new(HashMap::new())),
            stream_observers: Arc::new(ObserverSet::new()),
        }
    }

    /// Tracks attached to connections created from now on
    pub fn set_local_stream(&self, stream: Option<Arc<LocalStream>>) {
        *self.local_stream.write() = stream;
    }

    /// Connect to `user_id` and send it an offer; no-op if an entry exists
    pub fn create_as_initiator(&self, user_id: &str, socket_id: &str) -> bool {
        self.create(user_id, socket_id, true)
    }

    /// Connect to `user_id` and wait for its offer; no-op if an entry exists
    pub fn create_as_responder(&self, user_id: &str, socket_id: &str) -> bool {
        self.create(user_id, socket_id, false)
    }

    fn create(&self, user_id: &str, socket_id: &str, initiator: bool) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(user_id) {
            debug!("Connection to {} already exists", user_id);
            return false;
        }

        let (inbox, commands) = mpsc::unbounded_channel();
        if initiator {
            // Queued ahead of anything else for this peer
            let _ = inbox.send(PeerCommand::CreateOffer);
        }

        let slot = Arc::new(Mutex::new(PeerSlot::default()));
        let address = PeerAddress::new(socket_id);
        let worker = PeerWorker {
            user_id: user_id.to_string(),
            address: address.clone(),
            factory: self.factory.clone(),
            signaling: self.signaling.clone(),
            pending: self.pending.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
            local_stream: self.local_stream.read().clone(),
            slot: slot.clone(),
            remote_streams: self.remote_streams.clone(),
            stream_observers: self.stream_observers.clone(),
            inbox: inbox.downgrade(),
        };
        let worker = tokio::spawn(worker.run(commands));

        entries.insert(
            user_id.to_string(),
            PeerEntry { address, inbox, worker, slot },
        );
        info!(
            "Created connection to {} as {}",
            user_id,
            if initiator { "initiator" } else { "responder" }
        );
        true
    }

    /// Hand `command` to the peer's worker, or give it back if there is none
    pub fn dispatch(&self, user_id: &str, command: PeerCommand) -> Result<(), PeerCommand> {
        let entries = self.entries.lock();
        match entries.get(user_id) {
            Some(entry) => entry.inbox.send(command).map_err(|e| e.0),
            None => Err(command),
        }
    }

    /// Close and forget the connection to `user_id`
    pub async fn remove(&self, user_id: &str) -> bool {
        let entry = self.entries.lock().remove(user_id);
        let discarded = self.pending.discard(user_id);
        if discarded > 0 {
            debug!("Discarded {} queued candidate(s) for {}", discarded, user_id);
        }

        let entry = match entry {
            Some(entry) => entry,
            None => return false,
        };
        if entry.shutdown(user_id).await {
            self.metrics.open_connections.dec();
        }
        self.remote_streams.lock().remove(user_id);
        self.stream_observers.notify(&StreamUpdate { user_id: user_id.to_string(), stream: None });
        info!("Removed connection to {}", user_id);
        true
    }

    /// Close every connection; returns how many entries were removed
    pub async fn close_all(&self) -> usize {
        let entries: Vec<(String, PeerEntry)> = self.entries.lock().drain().collect();
        let count = entries.len();
        if count == 0 {
            return 0;
        }

        let user_ids: Vec<String> = entries.iter().map(|(user_id, _)| user_id.clone()).collect();
        let closed = join_all(entries.into_iter().map(|(user_id, entry)| async move {
            entry.shutdown(&user_id).await
        }))
        .await;
        let open = closed.iter().filter(|c| **c).count();
        self.metrics.open_connections.sub(open as i64);

        self.remote_streams.lock().clear();
        for user_id in user_ids {
            self.pending.discard(&user_id);
            self.stream_observers.notify(&StreamUpdate { user_id, stream: None });
        }
        info!("Closed {} peer connection(s)", count);
        count
    }

    pub fn get_remote_stream(&self, user_id: &str) -> Option<RemoteStream> {
        self.remote_streams.lock().get(user_id).cloned()
    }

    /// Socket currently addressed for `user_id`
    pub fn socket_id(&self, user_id: &str) -> Option<String> {
        self.entries.lock().get(user_id).map(|e| e.address.get())
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.lock().contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn on_stream_update(&self, callback: impl Fn(&StreamUpdate) + Send + Sync + 'static) -> Subscription {
        self.stream_observers.subscribe(callback)
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        for (_, entry) in self.entries.get_mut().drain() {
            entry.worker.abort();
        }
    }
}
