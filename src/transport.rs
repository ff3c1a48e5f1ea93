//! The broadcast transport (spec §6) and its wire format (spec §3 `Envelope`).
//!
//! The transport primitive itself is an external collaborator per spec §1 —
//! "an unordered, broadcast-to-all, same-origin bus" the crate does not own.
//! [`Transport`] is the seam; [`local::LocalTransport`] is a reference
//! implementation (spec §9: delivery is at-most-once, no ordering, and a
//! detached peer simply misses messages until it re-bootstraps via
//! `SYNC_REQUEST`) so the crate is runnable and testable without a host
//! application providing its own bus.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::playback::state::StatePatch;
use crate::playlist::core::{RepeatMode, Track};

/// An opaque per-instance identifier, chosen at construction and never
/// persisted (spec §3 `PeerIdentity`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity(u128);

impl PeerIdentity {
    pub fn new() -> Self {
        Self(rand::rng().random())
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn from_u128(value: u128) -> Self {
        Self(value)
    }
}

impl Default for PeerIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// The wire message type (spec §3 `Envelope.type`).
///
/// Unknown values deserialize into `Unknown` rather than failing, per spec §6
/// ("unknown `type` values must be ignored").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Play,
    Pause,
    Stop,
    StateUpdate,
    SyncRequest,
    LeadershipClaim,
    LeadershipAck,
    PlaylistAdd,
    PlaylistRemove,
    PlaylistClear,
    PlaylistMove,
    PlaylistJump,
    PlaylistNext,
    PlaylistPrev,
    PlaylistShuffle,
    PlaylistRepeat,
    PlaylistStateUpdate,
    #[serde(other)]
    Unknown,
}

/// The action a leadership claim is buffered for (spec §3
/// `payload.action descriptor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Play,
    Pause,
    Seek,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seek_time: Option<f64>,
}

/// A snapshot of playlist-relevant state, carried by `PLAYLIST_STATE_UPDATE`
/// and the bulk-replace side of a playlist mutation (spec §4.7).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaylistSnapshot {
    pub tracks: Vec<Track>,
    pub current_index: i64,
    pub repeat_mode: RepeatMode,
    pub shuffle_enabled: bool,
    pub queue_map: Vec<usize>,
}

/// The envelope payload (spec §3). Every field is optional; which ones are
/// populated depends on `Envelope.message_type`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payload {
    /// Partial playback state, for `PLAY`/`PAUSE`/`STATE_UPDATE`.
    pub state: Option<StatePatch>,
    pub is_leader: Option<bool>,
    pub is_remote_command: Option<bool>,
    pub action: Option<ActionDescriptor>,
    /// For playlist single-item mutations.
    pub track: Option<Track>,
    pub tracks: Option<Vec<Track>>,
    pub from_index: Option<usize>,
    pub to_index: Option<usize>,
    pub queue_index: Option<usize>,
    pub track_id: Option<String>,
    pub repeat_mode: Option<RepeatMode>,
    pub shuffle_enabled: Option<bool>,
    pub playlist: Option<PlaylistSnapshot>,
}

/// A message on the broadcast bus (spec §3 `Envelope`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_type: MessageType,
    pub payload: Payload,
    pub sent_at_millis: u64,
    pub sender_id: PeerIdentity,
}

impl Envelope {
    pub fn new(message_type: MessageType, payload: Payload, sender_id: PeerIdentity, now_millis: u64) -> Self {
        Self {
            message_type,
            payload,
            sent_at_millis: now_millis,
            sender_id,
        }
    }
}

/// The broadcast transport seam (spec §6).
///
/// `broadcast` stamps nothing itself — callers are expected to set
/// `sender_id`/`sent_at_millis` on the envelope before calling it, per spec
/// §4.4 ("broadcast sends an Envelope stamped with local `senderId` and
/// `sentAtMillis`"). Implementations deliver each message to every other
/// subscriber on the same channel name; messages are not delivered back to
/// their own sender's subscription (spec §6: "messages with `senderId ==
/// localId` are discarded" — `LocalTransport` enforces this at the source so
/// every implementation behaves the same way).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn broadcast(&self, envelope: Envelope) -> Result<()>;

    /// Subscribe to this channel. Each call returns an independent receiver;
    /// messages sent before a given `subscribe()` call are not replayed to it
    /// (spec §9: "a re-implementation must specify delivery semantics" —
    /// here, at-most-once, no ordering, no replay).
    fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<Envelope>;

    fn local_peer_id(&self) -> PeerIdentity;
}

pub mod local {
    //! An in-process reference [`Transport`], keyed by channel name, backed
    //! by one `tokio::sync::broadcast` channel per name so every
    //! `LocalTransport` constructed with the same `channel_name` forms a
    //! group (spec §3: "peers sharing the name form the group").

    use std::collections::HashMap;
    use std::sync::{Arc, OnceLock};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::broadcast;

    use super::{Envelope, PeerIdentity, Transport};
    use crate::error::Result;

    const CHANNEL_CAPACITY: usize = 256;

    fn registry() -> &'static Mutex<HashMap<String, broadcast::Sender<Envelope>>> {
        static REGISTRY: OnceLock<Mutex<HashMap<String, broadcast::Sender<Envelope>>>> = OnceLock::new();
        REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
    }

    fn sender_for(channel_name: &str) -> broadcast::Sender<Envelope> {
        let mut registry = registry().lock();
        registry
            .entry(channel_name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// An in-process broadcast transport scoped by `channel_name`.
    pub struct LocalTransport {
        sender: broadcast::Sender<Envelope>,
        peer_id: PeerIdentity,
    }

    impl LocalTransport {
        pub fn new(channel_name: &str, peer_id: PeerIdentity) -> Self {
            Self {
                sender: sender_for(channel_name),
                peer_id,
            }
        }
    }

    #[async_trait]
    impl Transport for LocalTransport {
        async fn broadcast(&self, envelope: Envelope) -> Result<()> {
            // No subscribers is not an error: a lone peer broadcasting its
            // bootstrap SYNC_REQUEST into an empty channel is normal.
            let _ = self.sender.send(envelope);
            Ok(())
        }

        fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<Envelope> {
            let mut broadcast_rx = self.sender.subscribe();
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            let local_id = self.peer_id;
            tokio::spawn(async move {
                loop {
                    match broadcast_rx.recv().await {
                        Ok(envelope) => {
                            if envelope.sender_id == local_id {
                                // spec §6: discard echoes of our own sends.
                                continue;
                            }
                            if tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                target: "transport::local",
                                skipped,
                                "receiver lagged, dropping oldest queued messages"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            rx
        }

        fn local_peer_id(&self) -> PeerIdentity {
            self.peer_id
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::transport::{MessageType, Payload};

        #[tokio::test]
        async fn peers_on_same_channel_see_each_others_messages() {
            let a_id = PeerIdentity::new();
            let b_id = PeerIdentity::new();
            let a = LocalTransport::new("room", a_id);
            let b = LocalTransport::new("room", b_id);
            let mut b_rx = b.subscribe();

            a.broadcast(Envelope::new(MessageType::SyncRequest, Payload::default(), a_id, 0))
                .await
                .unwrap();

            let received = b_rx.recv().await.unwrap();
            assert_eq!(received.sender_id, a_id);
        }

        #[tokio::test]
        async fn echoes_to_self_are_discarded() {
            let a_id = PeerIdentity::new();
            let a = LocalTransport::new("room-echo", a_id);
            let mut a_rx = a.subscribe();
            let b = LocalTransport::new("room-echo", PeerIdentity::new());
            let mut b_rx = b.subscribe();

            a.broadcast(Envelope::new(MessageType::SyncRequest, Payload::default(), a_id, 0))
                .await
                .unwrap();

            // The sender never observes its own broadcast...
            assert!(
                tokio::time::timeout(std::time::Duration::from_millis(50), a_rx.recv())
                    .await
                    .is_err()
            );
            // ...but other peers on the channel do.
            assert!(b_rx.recv().await.is_some());
        }

        #[tokio::test]
        async fn different_channel_names_do_not_cross_talk() {
            let a = LocalTransport::new("channel-a", PeerIdentity::new());
            let b = LocalTransport::new("channel-b", PeerIdentity::new());
            let mut b_rx = b.subscribe();

            a.broadcast(Envelope::new(
                MessageType::SyncRequest,
                Payload::default(),
                PeerIdentity::new(),
                0,
            ))
            .await
            .unwrap();

            assert!(
                tokio::time::timeout(std::time::Duration::from_millis(50), b_rx.recv())
                    .await
                    .is_err()
            );
        }
    }
}
