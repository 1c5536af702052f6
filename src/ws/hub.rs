//! Conference hub.
//!
//! One task owns the room registry. Peer actors talk to it only through the
//! channels behind [`HubHandle`]; nothing else ever reads or writes the map.
//! Relay to a peer is a non-blocking `try_send` on its mailbox: a peer whose
//! mailbox is full loses the message instead of stalling every other room.

use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;


/// Outbound mailbox capacity of one peer
pub const MAILBOX_CAPACITY: usize = 256;

/// Capacity of each hub input channel
pub const HUB_CHANNEL_CAPACITY: usize = 1024;

pub type PeerId = Uuid;

/// Identity grouping peers that see each other's signaling traffic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub from: String,
    pub conference_id: String,
}

impl RoomKey {
    pub fn new(from: impl Into<String>, conference_id: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            conference_id: conference_id.into(),
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.conference_id)
    }
}

/// Handed to the hub on register. The hub keeps the only mailbox sender.
#[derive(Debug)]
pub struct PeerRegistration {
    pub id: PeerId,
    pub room: RoomKey,
    pub mailbox: mpsc::Sender<String>,
}

#[derive(Debug, Clone)]
pub struct PeerRef {
    pub id: PeerId,
    pub room: RoomKey,
}

/// Decoded signaling message with its provenance
#[derive(Debug, Clone)]
pub struct SignalingMessage {
    pub raw: String,
    pub room: RoomKey,
    pub from_peer: PeerId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub rooms: usize,
    pub peers: usize,
}

/// Cloneable sending side of the hub
#[derive(Clone)]
pub struct HubHandle {
    register: mpsc::Sender<PeerRegistration>,
    unregister: mpsc::Sender<PeerRef>,
    broadcast: mpsc::Sender<SignalingMessage>,
    stats: mpsc::Sender<oneshot::Sender<HubStats>>,
}

impl HubHandle {
    pub async fn register(&self, peer: PeerRegistration) -> bool {
        if self.register.send(peer).await.is_err() {
            error!("Conference hub is not running, cannot register peer");
            return false;
        }
        true
    }

    pub async fn unregister(&self, peer: PeerRef) {
        if self.unregister.send(peer).await.is_err() {
            error!("Conference hub is not running, cannot unregister peer");
        }
    }

    pub async fn broadcast(&self, message: SignalingMessage) -> bool {
        if self.broadcast.send(message).await.is_err() {
            error!("Conference hub is not running, dropping broadcast");
            return false;
        }
        true
    }

    /// Snapshot of the registry, `None` once the hub has stopped
    pub async fn stats(&self) -> Option<HubStats> {
        let (tx, rx) = oneshot::channel();
        self.stats.send(tx).await.ok()?;
        rx.await.ok()
    }
}

pub struct ConferenceHub {
    rooms: HashMap<RoomKey, HashMap<PeerId, mpsc::Sender<String>>>,
    register_rx: mpsc::Receiver<PeerRegistration>,
    unregister_rx: mpsc::Receiver<PeerRef>,
    broadcast_rx: mpsc::Receiver<SignalingMessage>,
    stats_rx: mpsc::Receiver<oneshot::Sender<HubStats>>,
}

impl ConferenceHub {
    pub fn new() -> (Self, HubHandle) {
        let (register, register_rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);
        let (unregister, unregister_rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);
        let (broadcast, broadcast_rx) = mpsc::channel(HUB_CHANNEL_CAPACITY);
        let (stats, stats_rx) = mpsc::channel(16);

        let hub = Self {
            rooms: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            stats_rx,
        };
        let handle = HubHandle {
            register,
            unregister,
            broadcast,
            stats,
        };
        (hub, handle)
    }

    /// Create the hub and run it on its own task
    pub fn spawn() -> HubHandle {
        let (hub, handle) = Self::new();
        tokio::spawn(hub.run());
        handle
    }

    /// Main loop. Ends once every [`HubHandle`] has been dropped.
    pub async fn run(mut self) {
        info!("Conference hub started");
        loop {
            // Control operations queued before a relay are applied before it.
            tokio::select! {
                biased;
                Some(peer) = self.register_rx.recv() => self.on_register(peer),
                Some(peer) = self.unregister_rx.recv() => self.on_unregister(peer),
                Some(message) = self.broadcast_rx.recv() => self.on_broadcast(message),
                Some(reply) = self.stats_rx.recv() => {
                    let _ = reply.send(self.snapshot());
                }
                else => break,
            }
        }
        info!("Conference hub stopped");
    }

    fn on_register(&mut self, peer: PeerRegistration) {
        let room = self.rooms.entry(peer.room.clone()).or_default();
        if room.contains_key(&peer.id) {
            error!(peer = %peer.id, room = %peer.room, "Peer registered twice, keeping first registration");
            return;
        }
        room.insert(peer.id, peer.mailbox);
        debug!(peer = %peer.id, room = %peer.room, size = room.len(), "Peer registered");
    }

    fn on_unregister(&mut self, peer: PeerRef) {
        let Some(room) = self.rooms.get_mut(&peer.room) else {
            return;
        };
        // Dropping the hub's sender closes the peer's mailbox.
        if room.remove(&peer.id).is_some() {
            debug!(peer = %peer.id, room = %peer.room, "Peer unregistered");
        }
        if room.is_empty() {
            self.rooms.remove(&peer.room);
        }
    }

    fn on_broadcast(&mut self, message: SignalingMessage) {
        let Some(room) = self.rooms.get(&message.room) else {
            return;
        };
        for (peer_id, mailbox) in room.iter() {
            if *peer_id == message.from_peer {
                continue;
            }
            match mailbox.try_send(message.raw.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(peer = %peer_id, room = %message.room, "Mailbox full, dropping message");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(peer = %peer_id, room = %message.room, "Mailbox closed, skipping peer");
                }
            }
        }
    }

    fn snapshot(&self) -> HubStats {
        HubStats {
            rooms: self.rooms.len(),
            peers: self.rooms.values().map(|room| room.len()).sum(),
        }
    }
}
