//! End-to-end seed scenarios (spec §8) driven against `Instance` over
//! `transport::local::LocalTransport`, exercising each peer's playback and
//! playlist state directly rather than through a UI.

use std::sync::Arc;
use std::time::Duration;

use coplay::config::{InstanceConfig, PlaylistConfig, SyncConfig};
use coplay::media_control::NullMediaControlSink;
use coplay::playback::output::simulated::SimulatedOutput;
use coplay::OutputCapability;
use coplay::playlist::core::Track;
use coplay::transport::local::LocalTransport;
use coplay::transport::PeerIdentity;
use coplay::Instance;

fn transport(channel: &str) -> Arc<LocalTransport> {
    Arc::new(LocalTransport::new(channel, PeerIdentity::new()))
}

fn fast_handshake_config(channel: &str) -> InstanceConfig {
    InstanceConfig {
        sync: SyncConfig {
            leadership_handshake_timeout_ms: 15,
            auto_claim_leadership_if_none: true,
            sync_interval_ms: 40,
            ..SyncConfig::default()
        },
        ..InstanceConfig::new(channel)
    }
}

fn track(id: &str) -> Track {
    Track {
        id: id.to_string(),
        src: format!("{id}.mp3"),
        title: None,
        artist: None,
    }
}

/// Records whether `set_playback_state` has ever been called, so tests can
/// tell which peer's OS media-control binding was actually driven.
#[derive(Default)]
struct RecordingMediaControlSink {
    playback_state_calls: std::sync::atomic::AtomicUsize,
}

impl RecordingMediaControlSink {
    fn call_count(&self) -> usize {
        self.playback_state_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl coplay::media_control::MediaControlSink for RecordingMediaControlSink {
    fn set_now_playing(&self, _metadata: &coplay::media_control::NowPlaying) {}

    fn set_playback_state(&self, _state: &coplay::PlaybackState) {
        self.playback_state_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    fn poll_commands(&self) -> Vec<coplay::media_control::MediaControlCommand> {
        Vec::new()
    }
}

/// Scenario 1: bootstrap sync. A plays a track at a known position; B joins
/// afterward and must converge onto A's state within a handshake + heartbeat.
#[tokio::test]
async fn bootstrap_sync_converges_new_peer_to_leader_state() {
    let channel = "bootstrap-sync";
    let a_output = Arc::new(SimulatedOutput::new());
    let a = Instance::new(
        fast_handshake_config(channel),
        transport(channel),
        a_output.clone(),
        Arc::new(NullMediaControlSink),
    );
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(a.is_leader());

    a.play(Some("song.mp3".into())).await;
    a_output.push_time_update(50.0);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let b = Instance::new(
        InstanceConfig::new(channel),
        transport(channel),
        Arc::new(SimulatedOutput::new()),
        Arc::new(NullMediaControlSink),
    );
    // Bootstrap SYNC_REQUEST + leader's reply, within one handshake + heartbeat.
    tokio::time::sleep(Duration::from_millis(80)).await;

    let b_state = b.playback_state();
    assert!(b_state.is_playing);
    assert_eq!(b_state.current_src.as_deref(), Some("song.mp3"));
    assert!((b_state.current_time - 50.0).abs() <= 0.3);
}

/// Scenario 2: leadership transfer. A is leader and playing; a pause issued
/// on follower B (no remote control configured) runs the claim handshake, B
/// wins, and A demotes and silences itself without re-broadcasting a PAUSE
/// that would toggle B back.
#[tokio::test]
async fn leadership_transfers_on_followers_local_action() {
    let channel = "leadership-transfer";
    let a = Instance::new(fast_handshake_config(channel), transport(channel), Arc::new(SimulatedOutput::new()), Arc::new(NullMediaControlSink));
    tokio::time::sleep(Duration::from_millis(60)).await;
    a.play(Some("song.mp3".into())).await;
    assert!(a.is_leader());

    let b = Instance::new(
        InstanceConfig {
            sync: SyncConfig {
                leadership_handshake_timeout_ms: 15,
                ..SyncConfig::default()
            },
            ..InstanceConfig::new(channel)
        },
        transport(channel),
        Arc::new(SimulatedOutput::new()),
        Arc::new(NullMediaControlSink),
    );
    tokio::time::sleep(Duration::from_millis(40)).await;

    b.claim_leadership().await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    b.pause().await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(b.is_leader());
    assert!(!a.is_leader());
    assert!(!a.playback_state().is_playing);
    assert!(!b.playback_state().is_playing);
}

/// Scenario 3: seek replication. With `sync_seek=true, single_playback=false`,
/// A's seek propagates to B within the measured delay + drift tolerance.
#[tokio::test]
async fn seek_replicates_to_follower_within_drift_tolerance() {
    let channel = "seek-replication";
    let config = |c: &str| InstanceConfig {
        sync: SyncConfig {
            single_playback: false,
            ..SyncConfig::default()
        },
        ..InstanceConfig::new(c)
    };
    let a = Instance::new(config(channel), transport(channel), Arc::new(SimulatedOutput::new()), Arc::new(NullMediaControlSink));
    let b = Instance::new(config(channel), transport(channel), Arc::new(SimulatedOutput::new()), Arc::new(NullMediaControlSink));
    tokio::time::sleep(Duration::from_millis(30)).await;

    a.play(Some("song.mp3".into())).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    a.seek(120.0).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!((b.playback_state().current_time - 120.0).abs() <= 0.3);
}

/// Scenario 4: remote command. `single_playback=true, allow_remote_control=true`;
/// A is leader playing track 1, B issues `play("track2")`. A applies it, B
/// stays a follower.
#[tokio::test]
async fn remote_command_is_applied_by_leader_not_follower() {
    let channel = "remote-command";
    let leader_config = InstanceConfig {
        sync: SyncConfig {
            single_playback: true,
            allow_remote_control: true,
            auto_claim_leadership_if_none: true,
            leadership_handshake_timeout_ms: 15,
            ..SyncConfig::default()
        },
        ..InstanceConfig::new(channel)
    };
    let a_media_control = Arc::new(RecordingMediaControlSink::default());
    let a = Instance::new(leader_config, transport(channel), Arc::new(SimulatedOutput::new()), a_media_control.clone());
    tokio::time::sleep(Duration::from_millis(60)).await;
    a.play(Some("track1.mp3".into())).await;
    assert!(a.is_leader());

    let follower_config = InstanceConfig {
        sync: SyncConfig {
            single_playback: true,
            allow_remote_control: true,
            ..SyncConfig::default()
        },
        ..InstanceConfig::new(channel)
    };
    let b_media_control = Arc::new(RecordingMediaControlSink::default());
    let b = Instance::new(follower_config, transport(channel), Arc::new(SimulatedOutput::new()), b_media_control.clone());
    tokio::time::sleep(Duration::from_millis(30)).await;

    b.play(Some("track2.mp3".into())).await;
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert!(!b.is_leader());
    assert_eq!(a.playback_state().current_src.as_deref(), Some("track2.mp3"));
    assert!(a_media_control.call_count() > 0);
    assert_eq!(b_media_control.call_count(), 0);
}

/// Scenario 5: auto-advance. Playlist `[t1,t2,t3]`, auto-advance on,
/// repeat=none; t1 ends and the instance advances to t2 on its own.
#[tokio::test]
async fn auto_advance_plays_next_track_on_ended() {
    let channel = "auto-advance";
    let output = Arc::new(SimulatedOutput::new());
    let config = InstanceConfig {
        sync: SyncConfig {
            auto_claim_leadership_if_none: true,
            leadership_handshake_timeout_ms: 15,
            ..SyncConfig::default()
        },
        playlist: Some(PlaylistConfig {
            auto_advance: true,
            replicate: false,
            ..PlaylistConfig::default()
        }),
    };
    let instance = Instance::new(InstanceConfig { channel_name: channel.into(), ..config }, transport(channel), output.clone(), Arc::new(NullMediaControlSink));
    tokio::time::sleep(Duration::from_millis(60)).await;

    instance.add_track(track("t1")).await;
    instance.add_track(track("t2")).await;
    instance.add_track(track("t3")).await;
    instance.play(Some("t1.mp3".into())).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    output.push_ended();
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert_eq!(instance.playback_state().current_src.as_deref(), Some("t2.mp3"));
}

/// Scenario 6: drift absorption. In `single_playback=false`, a heartbeat
/// 0.2s off must not cause a seek; one 0.5s off must.
#[tokio::test]
async fn small_drift_absorbed_large_drift_seeks() {
    let channel = "drift-absorption";
    let config = |c: &str| InstanceConfig {
        sync: SyncConfig {
            single_playback: false,
            sync_interval_ms: 20,
            ..SyncConfig::default()
        },
        ..InstanceConfig::new(c)
    };
    let a_output = Arc::new(SimulatedOutput::new());
    let a = Instance::new(config(channel), transport(channel), a_output.clone(), Arc::new(NullMediaControlSink));
    let b_output = Arc::new(SimulatedOutput::new());
    let b = Instance::new(config(channel), transport(channel), b_output.clone(), Arc::new(NullMediaControlSink));
    tokio::time::sleep(Duration::from_millis(30)).await;

    a.play(Some("song.mp3".into())).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    b_output.push_time_update(10.0);
    a_output.push_time_update(10.2);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!((b_output.current_time() - 10.0).abs() < 0.05);

    a_output.push_time_update(10.7);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!((b_output.current_time() - 10.7).abs() <= 0.3);
}
