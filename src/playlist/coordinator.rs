//! Cross-peer playlist replication (spec §4.7 "PlaylistCoordinator").
//!
//! Mirrors [`crate::sync::PlaybackSync`]'s shape for the playlist side: local
//! mutations are broadcast as single-item envelopes when cheap, or as a full
//! [`PlaylistSnapshot`] when the mutation is structural (clear, shuffle,
//! bulk replace) per spec §4.7's "broadcast a snapshot rather than a delta
//! when the local operation invalidates queue_map wholesale" guidance.

use crate::coordinator::Coordinator;
use crate::playlist::core::{PlaylistCore, RepeatMode, Track};
use crate::transport::{Envelope, MessageType, PeerIdentity, Payload, PlaylistSnapshot, Transport};

use std::sync::Arc;

fn snapshot_of(playlist: &PlaylistCore) -> PlaylistSnapshot {
    PlaylistSnapshot {
        tracks: playlist.tracks().to_vec(),
        current_index: playlist.current_index().map(|i| i as i64).unwrap_or(-1),
        repeat_mode: playlist.repeat(),
        shuffle_enabled: playlist.shuffle(),
        queue_map: playlist.queue_map().to_vec(),
    }
}

/// Replicates [`PlaylistCore`] mutations across peers, gated by
/// `config.replicate` (spec §4.8 playlist option).
pub struct PlaylistCoordinator {
    transport: Arc<dyn Transport>,
}

impl PlaylistCoordinator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn send(&self, message_type: MessageType, payload: Payload, now_millis: u64) {
        let envelope = Envelope::new(message_type, payload, self.transport.local_peer_id(), now_millis);
        if let Err(err) = self.transport.broadcast(envelope).await {
            tracing::warn!(target: "playlist::coordinator", %err, "failed to broadcast playlist mutation");
        }
    }

    /// Broadcast a single-track add (spec §4.7 `broadcastAdd`).
    pub async fn broadcast_add(&self, track: &Track, now_millis: u64) {
        self.send(
            MessageType::PlaylistAdd,
            Payload {
                track: Some(track.clone()),
                ..Default::default()
            },
            now_millis,
        )
        .await;
    }

    pub async fn broadcast_remove(&self, track_id: &str, now_millis: u64) {
        self.send(
            MessageType::PlaylistRemove,
            Payload {
                track_id: Some(track_id.to_string()),
                ..Default::default()
            },
            now_millis,
        )
        .await;
    }

    pub async fn broadcast_clear(&self, now_millis: u64) {
        self.send(MessageType::PlaylistClear, Payload::default(), now_millis).await;
    }

    pub async fn broadcast_move(&self, from: usize, to: usize, now_millis: u64) {
        self.send(
            MessageType::PlaylistMove,
            Payload {
                from_index: Some(from),
                to_index: Some(to),
                ..Default::default()
            },
            now_millis,
        )
        .await;
    }

    pub async fn broadcast_jump(&self, index: usize, now_millis: u64) {
        self.send(
            MessageType::PlaylistJump,
            Payload {
                queue_index: Some(index),
                ..Default::default()
            },
            now_millis,
        )
        .await;
    }

    pub async fn broadcast_next(&self, now_millis: u64) {
        self.send(MessageType::PlaylistNext, Payload::default(), now_millis).await;
    }

    pub async fn broadcast_previous(&self, now_millis: u64) {
        self.send(MessageType::PlaylistPrev, Payload::default(), now_millis).await;
    }

    /// Structural mutations replicate as a full snapshot rather than a delta
    /// (spec §4.7): shuffle toggles invalidate `queue_map` wholesale, and
    /// repeat-mode changes are cheap enough to just fold into the same
    /// message.
    pub async fn broadcast_snapshot(&self, playlist: &PlaylistCore, now_millis: u64) {
        self.send(
            MessageType::PlaylistStateUpdate,
            Payload {
                playlist: Some(snapshot_of(playlist)),
                ..Default::default()
            },
            now_millis,
        )
        .await;
    }

    pub async fn broadcast_repeat(&self, mode: RepeatMode, now_millis: u64) {
        self.send(
            MessageType::PlaylistRepeat,
            Payload {
                repeat_mode: Some(mode),
                ..Default::default()
            },
            now_millis,
        )
        .await;
    }

    pub async fn broadcast_shuffle(&self, playlist: &PlaylistCore, now_millis: u64) {
        // Shuffle invalidates queue_map wholesale, so send the snapshot form
        // rather than a bare boolean.
        self.broadcast_snapshot(playlist, now_millis).await;
    }

    /// Apply an incoming playlist envelope. `coordinator` gates nothing here
    /// directly — callers are expected to have already entered
    /// [`Coordinator::begin_remote_dispatch`] so the corresponding local
    /// mutation does not get rebroadcast (spec §4.8, Open Question #2).
    pub fn apply_remote(&self, envelope: &Envelope, playlist: &mut PlaylistCore, coordinator: &Coordinator) {
        debug_assert!(
            coordinator.is_processing_remote(),
            "apply_remote called outside a RemoteGuard window"
        );
        match envelope.message_type {
            MessageType::PlaylistAdd => {
                if let Some(ref track) = envelope.payload.track {
                    playlist.add(track.clone());
                }
            }
            MessageType::PlaylistRemove => {
                if let Some(ref track_id) = envelope.payload.track_id {
                    if let Some(index) = playlist.tracks().iter().position(|t| &t.id == track_id) {
                        playlist.remove(index);
                    }
                }
            }
            MessageType::PlaylistClear => playlist.clear(),
            MessageType::PlaylistMove => {
                if let (Some(from), Some(to)) = (envelope.payload.from_index, envelope.payload.to_index) {
                    playlist.reorder(from, to);
                }
            }
            MessageType::PlaylistJump => {
                if let Some(index) = envelope.payload.queue_index {
                    playlist.jump_to(index);
                }
            }
            MessageType::PlaylistNext => {
                playlist.next();
            }
            MessageType::PlaylistPrev => {
                playlist.previous();
            }
            MessageType::PlaylistRepeat => {
                if let Some(mode) = envelope.payload.repeat_mode {
                    playlist.set_repeat(mode);
                }
            }
            MessageType::PlaylistStateUpdate => {
                if let Some(ref snapshot) = envelope.payload.playlist {
                    let current_index = usize::try_from(snapshot.current_index).ok();
                    playlist.replace_all(
                        snapshot.tracks.clone(),
                        current_index,
                        snapshot.repeat_mode,
                        snapshot.shuffle_enabled,
                        snapshot.queue_map.clone(),
                    );
                }
            }
            _ => {}
        }
    }

    pub fn local_peer_id(&self) -> PeerIdentity {
        self.transport.local_peer_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::transport::local::LocalTransport;

    fn track(id: &str) -> Track {
        Track {
            id: id.to_string(),
            src: format!("{id}.mp3"),
            title: None,
            artist: None,
        }
    }

    #[tokio::test]
    async fn remote_add_is_applied_to_playlist() {
        let transport = Arc::new(LocalTransport::new("pl-add", PeerIdentity::new()));
        let playlist_coordinator = PlaylistCoordinator::new(transport.clone());
        let leader_coordinator = Coordinator::new(transport, SyncConfig::default());
        let mut playlist = PlaylistCore::new();

        let envelope = Envelope::new(
            MessageType::PlaylistAdd,
            Payload {
                track: Some(track("a")),
                ..Default::default()
            },
            PeerIdentity::new(),
            0,
        );
        let _guard = leader_coordinator.begin_remote_dispatch();
        playlist_coordinator.apply_remote(&envelope, &mut playlist, &leader_coordinator);
        assert_eq!(playlist.tracks().len(), 1);
    }

    #[tokio::test]
    async fn remote_snapshot_replaces_entire_playlist() {
        let transport = Arc::new(LocalTransport::new("pl-snap", PeerIdentity::new()));
        let playlist_coordinator = PlaylistCoordinator::new(transport.clone());
        let leader_coordinator = Coordinator::new(transport, SyncConfig::default());
        let mut playlist = PlaylistCore::new();
        playlist.add(track("stale"));

        let snapshot = PlaylistSnapshot {
            tracks: vec![track("a"), track("b")],
            current_index: 1,
            repeat_mode: RepeatMode::All,
            shuffle_enabled: false,
            queue_map: vec![0, 1],
        };
        let envelope = Envelope::new(
            MessageType::PlaylistStateUpdate,
            Payload {
                playlist: Some(snapshot),
                ..Default::default()
            },
            PeerIdentity::new(),
            0,
        );
        let _guard = leader_coordinator.begin_remote_dispatch();
        playlist_coordinator.apply_remote(&envelope, &mut playlist, &leader_coordinator);
        assert_eq!(playlist.tracks().len(), 2);
        assert_eq!(playlist.current_index(), Some(1));
        assert_eq!(playlist.repeat(), RepeatMode::All);
    }
}
