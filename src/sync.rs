//! Cross-peer playback synchronization (spec §4.5 "PlaybackSync").
//!
//! Grounded on the `SyncManager`/`PlaybackSync` split in the corpus's
//! itk-sync integration: a leader's state is authoritative, a follower
//! reconciles its local [`crate::playback::state::Engine`] against what the
//! leader last broadcast, gated per-field by [`crate::config::SyncConfig`] and
//! a drift threshold rather than applying every incoming position update
//! verbatim.

use crate::config::SyncConfig;
use crate::latency;
use crate::playback::output::{OutputAdapter, TransitionCause};
use crate::playback::state::{Engine, StatePatch};
use crate::transport::{Envelope, MessageType, Payload};

/// Applies an incoming `PLAY`/`PAUSE`/`STATE_UPDATE` envelope to the local
/// engine and output, honoring [`SyncConfig`]'s per-message gates and the
/// drift threshold (spec §4.5).
///
/// Followers only: a leader ignores incoming state envelopes entirely (spec
/// §4.4 "a leader does not apply incoming PLAY/PAUSE/STATE_UPDATE to itself").
/// Callers reach `engine` through whatever lock guard they hold (spec §4.8:
/// `crate::instance::Instance` serializes all of this behind one
/// `parking_lot::RwLock`), so every method here takes `&mut Engine` rather
/// than owning or locking it itself.
///
/// `single_playback` splits every `Play`/`Pause`/seek-driving branch in two
/// (spec §4.5 "Follower-as-shadow" vs "Follower-as-player"): when true, the
/// engine's `is_playing`/`current_src`/`current_time` fields are updated as
/// shadow state only, via `Engine::set_sync_state`, and the `OutputAdapter`
/// is never commanded. When false, the follower actually drives output.
pub struct PlaybackSync {
    config: SyncConfig,
}

impl PlaybackSync {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Apply one envelope as a follower (spec §4.5 `applyRemoteState`).
    ///
    /// `now_millis` is the receiver's local clock, used with
    /// `envelope.sent_at_millis` to estimate one-hop delay (spec §4.3).
    pub async fn apply_remote(&self, envelope: &Envelope, engine: &mut Engine, output: &OutputAdapter, now_millis: u64) {
        let Some(ref patch) = envelope.payload.state else {
            return;
        };
        let delay = latency::delay_seconds(now_millis, envelope.sent_at_millis);

        match envelope.message_type {
            MessageType::Play => {
                if !self.config.sync_play {
                    return;
                }
                self.reconcile_position(patch, engine, delay);
                let src = patch.current_src.clone().flatten();
                if self.config.single_playback {
                    // Follower-as-shadow (spec §4.5): record isPlaying/src as
                    // shadow state only, never activate the OutputAdapter.
                    engine.set_sync_state(StatePatch {
                        is_playing: Some(true),
                        current_src: Some(src),
                        ..Default::default()
                    });
                } else {
                    engine.play(src.clone());
                    output.play(src, TransitionCause::Sync).await;
                }
            }
            MessageType::Pause => {
                if !self.config.sync_pause {
                    return;
                }
                self.reconcile_position(patch, engine, delay);
                if self.config.single_playback {
                    engine.set_sync_state(StatePatch {
                        is_playing: Some(false),
                        ..Default::default()
                    });
                } else {
                    engine.pause();
                    output.pause(TransitionCause::Sync);
                }
            }
            MessageType::StateUpdate => {
                self.apply_state_update(patch, engine, output, delay).await;
            }
            _ => {}
        }
    }

    /// `STATE_UPDATE` carries an arbitrary patch; only `current_time` is
    /// subject to the drift threshold, and only when `sync_seek` allows it
    /// (spec §4.5).
    async fn apply_state_update(&self, patch: &StatePatch, engine: &mut Engine, output: &OutputAdapter, delay: f64) {
        if let Some(remote_time) = patch.current_time {
            if self.config.sync_seek {
                let local_time = engine.state().current_time;
                let is_playing = engine.state().is_playing;
                let drift = latency::diff(local_time, remote_time, is_playing, delay);
                if drift > latency::DRIFT_THRESHOLD_SECONDS && !self.config.single_playback {
                    let adjusted = latency::adjusted_time(remote_time, is_playing, delay, local_time);
                    output.seek(adjusted, TransitionCause::Sync);
                }
            }
        }
        if patch.current_src.is_some() && !self.config.sync_track_change {
            let mut without_src = patch.clone();
            without_src.current_src = None;
            engine.set_sync_state(without_src);
            return;
        }
        engine.set_sync_state(patch.clone());
    }

    /// Pre-apply the position half of a `PLAY`/`PAUSE` envelope before the
    /// play/pause edge itself, so the output lands close to the leader's
    /// position instead of starting from wherever it happened to be (spec
    /// §4.5).
    fn reconcile_position(&self, patch: &StatePatch, engine: &mut Engine, delay: f64) {
        if !self.config.sync_seek {
            return;
        }
        if let Some(remote_time) = patch.current_time {
            let local_time = engine.state().current_time;
            let adjusted = latency::adjusted_time(remote_time, true, delay, local_time);
            if (local_time - adjusted).abs() > latency::DRIFT_THRESHOLD_SECONDS {
                engine.set_sync_state(StatePatch {
                    current_time: Some(adjusted),
                    ..Default::default()
                });
            }
        }
    }

    /// Build the envelope payload for a locally-originated command the
    /// broadcaster should replicate (spec §4.4 `broadcastLocalAction`).
    pub fn payload_for(&self, message_type: &MessageType, engine: &Engine) -> Option<Payload> {
        let allowed = match message_type {
            MessageType::Play => self.config.sync_play,
            MessageType::Pause => self.config.sync_pause,
            MessageType::StateUpdate => self.config.sync_seek || self.config.sync_track_change,
            _ => true,
        };
        if !allowed {
            return None;
        }
        let state = engine.state();
        Some(Payload {
            state: Some(StatePatch {
                is_playing: Some(state.is_playing),
                current_time: Some(state.current_time),
                duration: Some(state.duration),
                current_src: Some(state.current_src.clone()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::output::simulated::SimulatedOutput;
    use crate::playback::output::OutputCapability;
    use crate::transport::PeerIdentity;
    use std::sync::Arc;

    fn envelope(message_type: MessageType, patch: StatePatch) -> Envelope {
        Envelope::new(
            message_type,
            Payload {
                state: Some(patch),
                ..Default::default()
            },
            PeerIdentity::new(),
            0,
        )
    }

    #[tokio::test]
    async fn play_is_ignored_when_sync_play_disabled() {
        let sync = PlaybackSync::new(SyncConfig {
            sync_play: false,
            ..SyncConfig::default()
        });
        let mut engine = Engine::new();
        let shared = Arc::new(parking_lot::RwLock::new(Engine::new()));
        let output = OutputAdapter::new(Arc::new(SimulatedOutput::new()), shared);
        let env = envelope(
            MessageType::Play,
            StatePatch {
                current_src: Some(Some("a.mp3".into())),
                ..Default::default()
            },
        );
        sync.apply_remote(&env, &mut engine, &output, 0).await;
        assert!(!engine.state().is_playing);
    }

    #[tokio::test]
    async fn play_is_applied_when_sync_play_enabled() {
        let sync = PlaybackSync::new(SyncConfig::default());
        let mut engine = Engine::new();
        let shared = Arc::new(parking_lot::RwLock::new(Engine::new()));
        let output = OutputAdapter::new(Arc::new(SimulatedOutput::new()), shared);
        let env = envelope(
            MessageType::Play,
            StatePatch {
                current_src: Some(Some("a.mp3".into())),
                current_time: Some(5.0),
                ..Default::default()
            },
        );
        sync.apply_remote(&env, &mut engine, &output, 0).await;
        assert!(engine.state().is_playing);
    }

    #[tokio::test]
    async fn small_drift_is_absorbed_without_seeking() {
        let sync = PlaybackSync::new(SyncConfig::default());
        let mut engine = Engine::new();
        let shared = Arc::new(parking_lot::RwLock::new(Engine::new()));
        let output_cap = Arc::new(SimulatedOutput::new());
        let output = OutputAdapter::new(output_cap.clone(), shared);
        let env = envelope(
            MessageType::StateUpdate,
            StatePatch {
                current_time: Some(0.1),
                ..Default::default()
            },
        );
        sync.apply_remote(&env, &mut engine, &output, 0).await;
        assert_eq!(output_cap.current_time(), 0.0);
    }

    #[tokio::test]
    async fn large_drift_triggers_seek() {
        let sync = PlaybackSync::new(SyncConfig::default());
        let mut engine = Engine::new();
        let shared = Arc::new(parking_lot::RwLock::new(Engine::new()));
        let output_cap = Arc::new(SimulatedOutput::new());
        let output = OutputAdapter::new(output_cap.clone(), shared);
        let env = envelope(
            MessageType::StateUpdate,
            StatePatch {
                current_time: Some(10.0),
                ..Default::default()
            },
        );
        sync.apply_remote(&env, &mut engine, &output, 0).await;
        assert_eq!(output_cap.current_time(), 10.0);
    }

    #[tokio::test]
    async fn single_playback_play_updates_shadow_state_without_activating_output() {
        let sync = PlaybackSync::new(SyncConfig {
            single_playback: true,
            ..SyncConfig::default()
        });
        let mut engine = Engine::new();
        let shared = Arc::new(parking_lot::RwLock::new(Engine::new()));
        let output_cap = Arc::new(SimulatedOutput::new());
        let output = OutputAdapter::new(output_cap.clone(), shared);
        let env = envelope(
            MessageType::Play,
            StatePatch {
                current_src: Some(Some("a.mp3".into())),
                current_time: Some(5.0),
                ..Default::default()
            },
        );
        sync.apply_remote(&env, &mut engine, &output, 0).await;
        assert!(engine.state().is_playing);
        assert_eq!(engine.state().current_src.as_deref(), Some("a.mp3"));
        assert_eq!(output_cap.src(), None);
    }

    #[tokio::test]
    async fn single_playback_pause_updates_shadow_state_without_activating_output() {
        let sync = PlaybackSync::new(SyncConfig {
            single_playback: true,
            ..SyncConfig::default()
        });
        let mut engine = Engine::new();
        engine.play(Some("a.mp3".into()));
        let shared = Arc::new(parking_lot::RwLock::new(Engine::new()));
        let output_cap = Arc::new(SimulatedOutput::new());
        let output = OutputAdapter::new(output_cap.clone(), shared);
        let env = envelope(MessageType::Pause, StatePatch::default());
        sync.apply_remote(&env, &mut engine, &output, 0).await;
        assert!(!engine.state().is_playing);
        assert_eq!(output_cap.src(), None);
    }

    #[tokio::test]
    async fn single_playback_large_drift_updates_shadow_time_without_seeking_output() {
        let sync = PlaybackSync::new(SyncConfig {
            single_playback: true,
            ..SyncConfig::default()
        });
        let mut engine = Engine::new();
        let shared = Arc::new(parking_lot::RwLock::new(Engine::new()));
        let output_cap = Arc::new(SimulatedOutput::new());
        let output = OutputAdapter::new(output_cap.clone(), shared);
        let env = envelope(
            MessageType::StateUpdate,
            StatePatch {
                current_time: Some(10.0),
                ..Default::default()
            },
        );
        sync.apply_remote(&env, &mut engine, &output, 0).await;
        assert_eq!(engine.state().current_time, 10.0);
        assert_eq!(output_cap.current_time(), 0.0);
    }

    #[test]
    fn payload_for_play_is_none_when_disabled() {
        let sync = PlaybackSync::new(SyncConfig {
            sync_play: false,
            ..SyncConfig::default()
        });
        let engine = Engine::new();
        assert!(sync.payload_for(&MessageType::Play, &engine).is_none());
    }
}
