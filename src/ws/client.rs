use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{ReceivedSignal, SignalKind};
use super::hub::{HubHandle, PeerId, PeerRef, PeerRegistration, RoomKey, SignalingMessage, MAILBOX_CAPACITY};

/// Time allowed to write a message to the peer.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed to read the next frame (data or pong) from the peer.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Send pings to peer with this period. Must be less than PONG_WAIT.
pub const PING_PERIOD: Duration = Duration::from_secs(PONG_WAIT.as_secs() * 9 / 10);

/// Maximum message size allowed from peer.
pub const MAX_MESSAGE_SIZE: usize = 32768;

/// One live conference connection.
///
/// Runs an inbound loop (socket -> hub) and an outbound loop (mailbox -> socket).
/// The only shared state it touches is the hub, through one register and one
/// unregister message.
pub struct WebSocketClient {
    id: PeerId,
    room: RoomKey,
    hub: HubHandle,
}

impl WebSocketClient {
    pub fn new(room: RoomKey, hub: HubHandle) -> Self {
        Self {
            id: Uuid::new_v4(),
            room,
            hub,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn room(&self) -> &RoomKey {
        &self.room
    }

    fn peer_ref(&self) -> PeerRef {
        PeerRef {
            id: self.id,
            room: self.room.clone(),
        }
    }

    /// Serve an upgraded socket until the peer leaves or the connection fails
    pub async fn serve(self, socket: WebSocket) {
        let (sender, receiver) = socket.split();
        self.run(sender, receiver).await;
    }

    pub async fn run<W, R, E>(self, sender: W, receiver: R)
    where
        W: Sink<Message> + Unpin,
        W::Error: Display,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let registered = self
            .hub
            .register(PeerRegistration {
                id: self.id,
                room: self.room.clone(),
                mailbox: mailbox_tx,
            })
            .await;
        if !registered {
            return;
        }
        info!(peer = %self.id, room = %self.room, "Conference peer connected");

        let mut write = Box::pin(write_pump(sender, mailbox_rx, self.id));
        let mut read = Box::pin(self.read_pump(receiver));

        tokio::select! {
            _ = &mut read => {
                self.hub.unregister(self.peer_ref()).await;
                // The hub closed the mailbox; give the writer a chance to send the close frame.
                if timeout(WRITE_WAIT, &mut write).await.is_err() {
                    warn!(peer = %self.id, "Writer did not finish after unregister");
                }
            }
            _ = &mut write => {
                self.hub.unregister(self.peer_ref()).await;
            }
        }
        info!(peer = %self.id, room = %self.room, "Conference peer disconnected");
    }

    async fn read_pump<R, E>(&self, mut receiver: R)
    where
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        loop {
            let frame = match timeout(PONG_WAIT, receiver.next()).await {
                Err(_) => {
                    warn!(peer = %self.id, room = %self.room, "Read deadline exceeded");
                    return;
                }
                Ok(None) => return,
                Ok(Some(Err(e))) => {
                    error!(peer = %self.id, room = %self.room, error = %e, "Failed to read frame");
                    return;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            let text = match frame {
                Message::Text(text) => text,
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(peer = %self.id, error = %e, "Binary frame is not valid UTF-8");
                        return;
                    }
                },
                // Pongs only refresh the read deadline; pings are answered by the socket layer.
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => return,
            };

            if !self.handle_frame(text).await {
                return;
            }
        }
    }

    /// Returns false when the inbound loop must stop
    async fn handle_frame(&self, text: String) -> bool {
        let signal: ReceivedSignal = match serde_json::from_str(&text) {
            Ok(signal) => signal,
            Err(e) => {
                error!(peer = %self.id, room = %self.room, error = %e, "Failed to parse signaling message");
                return false;
            }
        };

        match signal.kind() {
            Some(SignalKind::Subscribe) => {
                if !self.is_own_topic(&signal.topics) {
                    // Tolerated: the peer keeps relaying within its own room.
                    warn!(
                        peer = %self.id,
                        conference_id = %self.room.conference_id,
                        topics = ?signal.topics,
                        "Subscribe topics do not match the conference"
                    );
                }
                true
            }
            Some(SignalKind::Unsubscribe) => false,
            Some(SignalKind::Publish) => {
                self.hub
                    .broadcast(SignalingMessage {
                        raw: text,
                        room: self.room.clone(),
                        from_peer: self.id,
                    })
                    .await
            }
            None => {
                debug!(peer = %self.id, message_type = %signal.message_type, "Ignoring unknown signaling message");
                true
            }
        }
    }

    fn is_own_topic(&self, topics: &[String]) -> bool {
        topics.len() == 1 && topics[0] == self.room.conference_id
    }
}

async fn write_pump<W>(mut sender: W, mut mailbox: mpsc::Receiver<String>, peer: PeerId)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ticker = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = mailbox.recv() => match message {
                Some(text) => {
                    if let Err(e) = send_with_deadline(&mut sender, Message::Text(text)).await {
                        error!(peer = %peer, error = %e, "Failed to write message");
                        return;
                    }
                }
                None => {
                    // The hub closed the mailbox.
                    if let Err(e) = send_with_deadline(&mut sender, Message::Close(None)).await {
                        debug!(peer = %peer, error = %e, "Failed to write close frame");
                    }
                    return;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = send_with_deadline(&mut sender, Message::Ping(Vec::new())).await {
                    error!(peer = %peer, error = %e, "Failed to write ping");
                    return;
                }
            }
        }
    }
}

async fn send_with_deadline<W>(sender: &mut W, message: Message) -> Result<(), String>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match timeout(WRITE_WAIT, sender.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("write deadline exceeded".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::hub::{ConferenceHub, HubStats};
    use futures_util::stream;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};

    type Recorded = Arc<Mutex<Vec<Message>>>;

    fn recording_sink(log: Recorded) -> Pin<Box<dyn Sink<Message, Error = Infallible> + Send>> {
        Box::pin(futures_util::sink::unfold(log, |log, message: Message| async move {
            log.lock().unwrap().push(message);
            Ok::<_, Infallible>(log)
        }))
    }

    fn frames(texts: &[&str]) -> impl Stream<Item = Result<Message, Infallible>> + Unpin {
        stream::iter(
            texts
                .iter()
                .map(|t| Ok(Message::Text(t.to_string())))
                .collect::<Vec<_>>(),
        )
    }

    async fn listener(hub: &HubHandle, room: &RoomKey) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        hub.register(PeerRegistration {
            id: Uuid::new_v4(),
            room: room.clone(),
            mailbox: tx,
        })
        .await;
        rx
    }

    #[tokio::test]
    async fn test_publish_is_relayed_and_peer_unregisters_on_unsubscribe() {
        let hub = ConferenceHub::spawn();
        let room = RoomKey::new("tutor", "room-9");
        let mut other = listener(&hub, &room).await;

        let publish = r#"{"type":"publish","topic":"room-9","data":"X"}"#;
        let log: Recorded = Arc::default();
        let client = WebSocketClient::new(room.clone(), hub.clone());
        client
            .run(
                recording_sink(log.clone()),
                frames(&[
                    r#"{"type":"subscribe","topics":["room-9"]}"#,
                    publish,
                    r#"{"type":"unsubscribe"}"#,
                    r#"{"type":"publish","data":"after"}"#,
                ]),
            )
            .await;

        assert_eq!(other.recv().await.as_deref(), Some(publish));
        assert!(other.try_recv().is_err());
        assert_eq!(hub.stats().await, Some(HubStats { rooms: 1, peers: 1 }));

        // Mailbox closed by the hub -> close frame
        let written = log.lock().unwrap().clone();
        assert_eq!(written.last(), Some(&Message::Close(None)));
    }

    #[tokio::test]
    async fn test_mismatched_subscribe_keeps_connection_open() {
        let hub = ConferenceHub::spawn();
        let room = RoomKey::new("tutor", "room-9");
        let mut other = listener(&hub, &room).await;

        let client = WebSocketClient::new(room.clone(), hub.clone());
        client
            .run(
                recording_sink(Arc::default()),
                frames(&[
                    r#"{"type":"subscribe","topics":["someone-else"]}"#,
                    r#"{"type":"subscribe","topics":[]}"#,
                    r#"{"type":"subscribe","topics":null}"#,
                    r#"{"type":"publish","data":"still here"}"#,
                ]),
            )
            .await;

        assert_eq!(
            other.recv().await.as_deref(),
            Some(r#"{"type":"publish","data":"still here"}"#)
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_terminates_inbound_loop() {
        let hub = ConferenceHub::spawn();
        let room = RoomKey::new("tutor", "room-9");
        let mut other = listener(&hub, &room).await;

        let client = WebSocketClient::new(room.clone(), hub.clone());
        client
            .run(
                recording_sink(Arc::default()),
                frames(&["not json", r#"{"type":"publish","data":"X"}"#]),
            )
            .await;

        hub.stats().await.unwrap();
        assert!(other.try_recv().is_err());
        assert_eq!(hub.stats().await, Some(HubStats { rooms: 1, peers: 1 }));
    }

    #[tokio::test]
    async fn test_unknown_message_type_is_ignored() {
        let hub = ConferenceHub::spawn();
        let room = RoomKey::new("tutor", "room-9");
        let mut other = listener(&hub, &room).await;

        let client = WebSocketClient::new(room.clone(), hub.clone());
        client
            .run(
                recording_sink(Arc::default()),
                frames(&[r#"{"type":"ping"}"#, r#"{"type":"publish","data":"X"}"#]),
            )
            .await;

        assert_eq!(other.recv().await.as_deref(), Some(r#"{"type":"publish","data":"X"}"#));
    }

    #[tokio::test]
    async fn test_relayed_messages_are_written_to_socket() {
        let hub = ConferenceHub::spawn();
        let room = RoomKey::new("tutor", "room-9");
        let log: Recorded = Arc::default();

        let client = WebSocketClient::new(room.clone(), hub.clone());
        let task = tokio::spawn(client.run(
            recording_sink(log.clone()),
            stream::pending::<Result<Message, Infallible>>(),
        ));

        // Wait for the client to join before relaying into its room
        timeout(Duration::from_secs(1), async {
            while hub.stats().await != Some(HubStats { rooms: 1, peers: 1 }) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        hub.broadcast(SignalingMessage {
            raw: "X".to_string(),
            room: room.clone(),
            from_peer: Uuid::new_v4(),
        })
        .await;

        timeout(Duration::from_secs(1), async {
            while !log.lock().unwrap().contains(&Message::Text("X".to_string())) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        task.abort();
    }

    async fn wait_for_peers(hub: &HubHandle, peers: usize) {
        while hub.stats().await.map(|s| s.peers) != Some(peers) {
            tokio::task::yield_now().await;
        }
    }

    fn stalled_sink() -> Pin<Box<dyn Sink<Message, Error = Infallible> + Send>> {
        Box::pin(futures_util::sink::unfold((), |_, _message: Message| {
            futures_util::future::pending::<Result<(), Infallible>>()
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_written_every_ping_period() {
        let hub = ConferenceHub::spawn();
        let room = RoomKey::new("tutor", "room-9");
        let log: Recorded = Arc::default();

        let client = WebSocketClient::new(room, hub.clone());
        let task = tokio::spawn(client.run(
            recording_sink(log.clone()),
            stream::pending::<Result<Message, Infallible>>(),
        ));
        wait_for_peers(&hub, 1).await;

        tokio::time::sleep(PING_PERIOD - Duration::from_secs(1)).await;
        assert!(log.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(log.lock().unwrap().as_slice(), &[Message::Ping(Vec::new())]);
        assert_eq!(hub.stats().await, Some(HubStats { rooms: 1, peers: 1 }));

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_is_dropped_after_pong_wait() {
        let hub = ConferenceHub::spawn();
        let room = RoomKey::new("tutor", "room-9");
        let log: Recorded = Arc::default();

        let started = Instant::now();
        WebSocketClient::new(room, hub.clone())
            .run(
                recording_sink(log.clone()),
                stream::pending::<Result<Message, Infallible>>(),
            )
            .await;

        assert!(started.elapsed() >= PONG_WAIT);
        assert!(started.elapsed() < PONG_WAIT + WRITE_WAIT);
        assert_eq!(hub.stats().await, Some(HubStats::default()));

        let written = log.lock().unwrap().clone();
        assert!(written.contains(&Message::Ping(Vec::new())));
        assert_eq!(written.last(), Some(&Message::Close(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_ends_connection_after_write_wait() {
        let hub = ConferenceHub::spawn();
        let room = RoomKey::new("tutor", "room-9");

        let client = WebSocketClient::new(room.clone(), hub.clone());
        let task = tokio::spawn(client.run(
            stalled_sink(),
            stream::pending::<Result<Message, Infallible>>(),
        ));
        wait_for_peers(&hub, 1).await;

        let started = Instant::now();
        hub.broadcast(SignalingMessage {
            raw: "X".to_string(),
            room: room.clone(),
            from_peer: Uuid::new_v4(),
        })
        .await;

        task.await.unwrap();
        assert!(started.elapsed() >= WRITE_WAIT);
        assert!(started.elapsed() < PONG_WAIT);
        assert_eq!(hub.stats().await, Some(HubStats::default()));
    }

    #[test]
    fn test_ping_period_is_below_pong_wait() {
        assert!(PING_PERIOD < PONG_WAIT);
        assert_eq!(PING_PERIOD, Duration::from_secs(54));
    }
}
