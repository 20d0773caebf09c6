//! WebSocket signaling client
//!
//! Connects to a meeting signaling server and exchanges JSON event frames
//! (see `codec`). A writer task drains the outbound queue; a reader task
//! resolves acknowledgements and fans inbound events out to subscribers.

use super::codec::{Frame, FrameCodec, CONNECTED_EVENT};
use super::{Transport, TransportError, TransportEvent, EVENT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;

type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Client side of a signaling WebSocket
pub struct WebSocketTransport {
    url: String,
    outbound: mpsc::UnboundedSender<Message>,
    events: broadcast::Sender<TransportEvent>,
    pending: PendingAcks,
    next_ack: AtomicU64,
    socket_id: Arc<RwLock<Option<String>>>,
    closed: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Connect to `url` (ws:// or wss://)
    pub async fn connect(url: &str) -> Result<Arc<Self>, TransportError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!("Connected to signaling server {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));
        let socket_id = Arc::new(RwLock::new(None));
        let closed = Arc::new(AtomicBool::new(false));

        let writer_closed = closed.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    error!("Signaling write failed: {}", e);
                    break;
                }
            }
            writer_closed.store(true, Ordering::SeqCst);
            let _ = write.close().await;
        });

        let reader_events = events.clone();
        let reader_pending = pending.clone();
        let reader_socket_id = socket_id.clone();
        let reader_closed = closed.clone();
        let reader_outbound = outbound.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match FrameCodec::decode(&text) {
                        Ok(Frame::Ack { id, data }) => {
                            let waiter = reader_pending.lock().remove(&id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(data);
                                }
                                None => debug!("Unexpected ack {}", id),
                            }
                        }
                        Ok(Frame::Event { event, data, .. }) => {
                            if event == CONNECTED_EVENT {
                                if let Some(id) = FrameCodec::socket_id_from_connected(&data) {
                                    info!("Signaling socket id {}", id);
                                    *reader_socket_id.write() = Some(id);
                                }
                            }
                            let _ = reader_events.send(TransportEvent::new(event, data));
                        }
                        Err(e) => warn!("Dropping signaling frame: {}", e),
                    },
                    Ok(Message::Ping(ping)) => {
                        let _ = reader_outbound.send(Message::Pong(ping));
                    }
                    Ok(Message::Binary(data)) => {
                        debug!("Ignoring binary message: {} bytes", data.len());
                    }
                    Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            reader_closed.store(true, Ordering::SeqCst);
            // Dropping the senders fails every outstanding request
            reader_pending.lock().clear();
            info!("Signaling connection closed");
        });

        Ok(Arc::new(Self {
            url: url.to_string(),
            outbound,
            events,
            pending,
            next_ack: AtomicU64::new(1),
            socket_id,
            closed,
            tasks: Mutex::new(vec![writer, reader]),
        }))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the connection and stop both tasks
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.outbound.send(Message::Close(None));
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.pending.lock().clear();
    }

    fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(Message::Text(FrameCodec::encode(frame)))
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn socket_id(&self) -> Option<String> {
        self.socket_id.read().clone()
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        self.send_frame(&Frame::Event { event: event.to_string(), data: payload, ack: None })
    }

    async fn request(&self, event: &str, payload: Value) -> Result<Value, TransportError> {
        let id = self.next_ack.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.send_frame(&Frame::Event {
            event: event.to_string(),
            data: payload,
            ack: Some(id),
        }) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| TransportError::AckDropped(event.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    /// Minimal server: announces a socket id, acks `meeting:join`, echoes one event
    async fn spawn_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let hello = Frame::Event {
                event: CONNECTED_EVENT.to_string(),
                data: json!({ "socketId": "srv-1" }),
                ack: None,
            };
            ws.send(Message::Text(FrameCodec::encode(&hello))).await.unwrap();

            while let Some(Ok(Message::Text(text))) = ws.next().await {
                if let Ok(Frame::Event { event, ack: Some(id), .. }) = FrameCodec::decode(&text) {
                    let reply = Frame::Ack { id, data: json!({ "success": true, "event": event }) };
                    ws.send(Message::Text(FrameCodec::encode(&reply))).await.unwrap();
                    let joined = Frame::Event {
                        event: "meeting:user-joined".to_string(),
                        data: json!({ "meetingId": "m1", "userId": "u2", "socketId": "s2" }),
                        ack: None,
                    };
                    ws.send(Message::Text(FrameCodec::encode(&joined))).await.unwrap();
                }
            }
        });
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn request_resolves_with_ack_and_events_fan_out() {
        let url = spawn_server().await;
        let transport = WebSocketTransport::connect(&url).await.unwrap();
        let mut events = transport.subscribe();

        let ack = transport.request("meeting:join", json!({ "meetingId": "m1" })).await.unwrap();
        assert_eq!(ack["success"], true);
        assert_eq!(ack["event"], "meeting:join");
        assert_eq!(transport.socket_id().as_deref(), Some("srv-1"));

        // The connected announcement may or may not precede it
        let mut event = events.recv().await.unwrap();
        if event.event == CONNECTED_EVENT {
            event = events.recv().await.unwrap();
        }
        assert_eq!(event.event, "meeting:user-joined");
        assert_eq!(event.payload["userId"], "u2");

        transport.close();
        assert!(matches!(transport.emit("meeting:leave", json!({})), Err(TransportError::Closed)));
    }
}
