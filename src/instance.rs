//! The composition root for one peer (spec §4.8 "Instance").
//!
//! One `Instance` owns a [`crate::playback::state::Engine`], an
//! [`crate::playback::output::OutputAdapter`], a [`crate::coordinator::Coordinator`],
//! a [`crate::sync::PlaybackSync`], and a [`crate::playlist::core::PlaylistCore`] +
//! [`crate::playlist::coordinator::PlaylistCoordinator`] pair, wired together by a
//! single background task that drains the transport and a small set of
//! timers — the single-threaded-cooperative-scheduler model spec §5
//! describes, realized here as one `tokio::task` per instance rather than one
//! OS thread, since there is no audio callback of this crate's own to keep
//! real-time (that lives behind [`crate::playback::output::OutputCapability`]).

use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::InstanceConfig;
use crate::coordinator::{Coordinator, Role};
use crate::event::{EventBus, Subscription};
use crate::media_control::{MediaControlCommand, MediaControlSink, NowPlaying};
use crate::playback::output::{OutputAdapter, OutputCapability, TransitionCause};
use crate::playback::state::{self, Engine};
use crate::playlist::core::{PlaylistCore, Track};
use crate::playlist::coordinator::PlaylistCoordinator;
use crate::sync::PlaybackSync;
use crate::transport::{ActionDescriptor, ActionKind, Envelope, MessageType, Payload, Transport};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A user-originated playback request (spec §4.8 local action).
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    Play(Option<String>),
    Pause,
    Stop,
    Seek(f64),
}

/// The unified event stream an embedder subscribes to (spec §4.8).
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceEvent {
    Playback(state::Event),
    Playlist(crate::playlist::core::Event),
    LeadershipChanged(Role),
}

struct Shared {
    config: InstanceConfig,
    engine: Arc<RwLock<Engine>>,
    output: OutputAdapter,
    coordinator: Arc<Coordinator>,
    sync: PlaybackSync,
    playlist: Arc<RwLock<PlaylistCore>>,
    playlist_coordinator: PlaylistCoordinator,
    transport: Arc<dyn Transport>,
    media_control: Arc<dyn MediaControlSink>,
    events: EventBus<InstanceEvent>,
    last_seen_role: parking_lot::Mutex<Role>,
    _engine_sub: Subscription<state::Event>,
    _playlist_sub: Subscription<crate::playlist::core::Event>,
}

/// One peer: owns playback state, the output device, leader election, sync,
/// and the playlist (spec §4.8).
pub struct Instance {
    shared: Arc<Shared>,
}

impl Instance {
    /// Construct and start an instance's background task. `output_capability`
    /// and `media_control` are external collaborators (spec §6); pass
    /// [`crate::playback::output::simulated::SimulatedOutput`] and
    /// [`crate::media_control::NullMediaControlSink`] when no real device or
    /// OS integration is wired up yet.
    pub fn new(
        config: InstanceConfig,
        transport: Arc<dyn Transport>,
        output_capability: Arc<dyn OutputCapability>,
        media_control: Arc<dyn MediaControlSink>,
    ) -> Arc<Self> {
        config.log_warnings();
        let engine = Arc::new(RwLock::new(Engine::new()));
        let output = OutputAdapter::new(output_capability, Arc::clone(&engine));
        let coordinator = Coordinator::new(Arc::clone(&transport), config.sync.clone());
        let sync = PlaybackSync::new(config.sync.clone());
        let playlist = Arc::new(RwLock::new(PlaylistCore::new()));
        if let Some(ref playlist_config) = config.playlist {
            playlist.write().set_repeat(playlist_config.default_repeat);
            playlist.write().set_shuffle(playlist_config.default_shuffle);
        }
        let playlist_coordinator = PlaylistCoordinator::new(Arc::clone(&transport));
        let events: EventBus<InstanceEvent> = EventBus::new();

        // Set once the `Arc<Shared>` below exists; the engine subscription
        // needs it (weakly, to avoid a reference cycle through the stored
        // `Subscription`) to drive auto-advance when playback ends.
        let shared_cell: Arc<OnceLock<Weak<Shared>>> = Arc::new(OnceLock::new());

        let engine_sub = {
            let events = events.clone();
            let media_control = Arc::clone(&media_control);
            let engine_for_state = Arc::clone(&engine);
            let shared_cell = Arc::clone(&shared_cell);
            let coordinator_for_sub = Arc::clone(&coordinator);
            engine.read().subscribe(move |event| {
                events.emit(&InstanceEvent::Playback(event.clone()));
                if matches!(event, state::Event::StateChange) && coordinator_for_sub.is_leader() {
                    media_control.set_playback_state(engine_for_state.read().state());
                }
                if matches!(event, state::Event::Ended) {
                    if let Some(shared) = shared_cell.get().and_then(Weak::upgrade) {
                        tokio::spawn(auto_advance_on_ended(shared));
                    }
                }
            })
        };
        let playlist_sub = {
            let events = events.clone();
            let media_control = Arc::clone(&media_control);
            let playlist_for_meta = Arc::clone(&playlist);
            let coordinator_for_sub = Arc::clone(&coordinator);
            playlist.read().subscribe(move |event| {
                events.emit(&InstanceEvent::Playlist(event.clone()));
                if !coordinator_for_sub.is_leader() {
                    return;
                }
                let now_playing = playlist_for_meta
                    .read()
                    .current()
                    .map(|track| NowPlaying {
                        title: track.title.clone(),
                        artist: track.artist.clone(),
                        album: None,
                    })
                    .unwrap_or_default();
                media_control.set_now_playing(&now_playing);
            })
        };

        let shared = Arc::new(Shared {
            config,
            engine,
            output,
            coordinator,
            sync,
            playlist,
            playlist_coordinator,
            transport,
            media_control,
            events,
            last_seen_role: parking_lot::Mutex::new(Role::Follower),
            _engine_sub: engine_sub,
            _playlist_sub: playlist_sub,
        });

        let _ = shared_cell.set(Arc::downgrade(&shared));

        let instance = Arc::new(Self { shared: Arc::clone(&shared) });

        let rx = shared.transport.subscribe();
        tokio::spawn(run_event_loop(Arc::clone(&shared), rx));

        // Bootstrap sync: ask whoever is already out there for current state
        // (spec §4.8 "a newly constructed instance broadcasts SYNC_REQUEST").
        let bootstrap_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let envelope = Envelope::new(MessageType::SyncRequest, Payload::default(), bootstrap_shared.transport.local_peer_id(), now_millis());
            let _ = bootstrap_shared.transport.broadcast(envelope).await;
        });

        instance
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription<InstanceEvent>
    where
        F: Fn(&InstanceEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(listener)
    }

    pub fn is_leader(&self) -> bool {
        self.shared.coordinator.is_leader()
    }

    pub fn playback_state(&self) -> crate::playback::state::PlaybackState {
        self.shared.engine.read().state().clone()
    }

    pub fn local_peer_id(&self) -> crate::transport::PeerIdentity {
        self.shared.transport.local_peer_id()
    }

    /// Request leadership explicitly (spec §4.4). Normally unnecessary —
    /// bootstrap plus `auto_claim_leadership_if_none` handle this — but some
    /// hosts want an explicit "become leader" button.
    pub async fn claim_leadership(&self) {
        let _ = self.shared.coordinator.claim_leadership(now_millis()).await;
        check_role_change(&self.shared);
    }

    /// Dispatch a local user action (spec §4.8's local-action split):
    ///
    /// 1. `single_playback` disabled → apply locally and broadcast
    ///    immediately for every peer to drive its own output.
    /// 2. `single_playback` on, local is leader → apply locally without an
    ///    immediate broadcast; the next heartbeat carries it to followers.
    /// 3. `single_playback` on, follower, `allow_remote_control` on →
    ///    forward as a remote command for the leader to apply.
    /// 4. `single_playback` on, follower, `allow_remote_control` off →
    ///    dropped (spec §7 edge case: nothing to do without a leader to ask).
    pub async fn dispatch(&self, action: UserAction) {
        dispatch_action(&self.shared, action).await;
    }

    pub async fn play(&self, src: Option<String>) {
        self.dispatch(UserAction::Play(src)).await;
    }

    pub async fn pause(&self) {
        self.dispatch(UserAction::Pause).await;
    }

    pub async fn stop(&self) {
        self.dispatch(UserAction::Stop).await;
    }

    pub async fn seek(&self, t: f64) {
        self.dispatch(UserAction::Seek(t)).await;
    }

    /// Add a track to the local playlist and replicate it (spec §4.7), unless
    /// replication is disabled.
    pub async fn add_track(&self, track: Track) {
        let shared = &self.shared;
        shared.playlist.write().add(track.clone());
        if playlist_replicates(shared) {
            shared.playlist_coordinator.broadcast_add(&track, now_millis()).await;
        }
    }

    pub async fn next_track(&self) {
        let shared = &self.shared;
        let advanced_src = { shared.playlist.write().next().map(|t| t.src.clone()) };
        if let Some(src) = advanced_src {
            dispatch_action(shared, UserAction::Play(Some(src))).await;
        }
        if playlist_replicates(shared) {
            shared.playlist_coordinator.broadcast_next(now_millis()).await;
        }
    }

    pub async fn previous_track(&self) {
        let shared = &self.shared;
        let src = { shared.playlist.write().previous().map(|t| t.src.clone()) };
        if let Some(src) = src {
            dispatch_action(shared, UserAction::Play(Some(src))).await;
        }
        if playlist_replicates(shared) {
            shared.playlist_coordinator.broadcast_previous(now_millis()).await;
        }
    }

    pub async fn set_shuffle(&self, enabled: bool) {
        let shared = &self.shared;
        shared.playlist.write().set_shuffle(enabled);
        if playlist_replicates(shared) {
            let playlist = shared.playlist.read();
            shared.playlist_coordinator.broadcast_shuffle(&playlist, now_millis()).await;
        }
    }

    pub async fn toggle_repeat(&self) {
        let shared = &self.shared;
        let mode = {
            let mut playlist = shared.playlist.write();
            playlist.toggle_repeat();
            playlist.repeat()
        };
        if playlist_replicates(shared) {
            shared.playlist_coordinator.broadcast_repeat(mode, now_millis()).await;
        }
    }

    /// Drain OS media-control commands and turn them into local actions
    /// (spec §6). A host with a UI loop calls this periodically.
    pub async fn poll_media_control(&self) {
        let commands = self.shared.media_control.poll_commands();
        for command in commands {
            match command {
                MediaControlCommand::Play => self.play(None).await,
                MediaControlCommand::Pause => self.pause().await,
                MediaControlCommand::Toggle => {
                    if self.shared.engine.read().state().is_playing {
                        self.pause().await;
                    } else {
                        self.play(None).await;
                    }
                }
                MediaControlCommand::Next => self.next_track().await,
                MediaControlCommand::Previous => self.previous_track().await,
            }
        }
    }
}

/// Whether a local playlist mutation should be broadcast: replication is on
/// in config, and we are not currently inside a remote-dispatch window (spec
/// §4.8, Open Question #2 anti-loop).
fn playlist_replicates(shared: &Shared) -> bool {
    shared.config.playlist.as_ref().map(|p| p.replicate).unwrap_or(false) && !shared.coordinator.is_processing_remote()
}

/// The local-action dispatch split (spec §4.8):
///
/// 1. `single_playback` disabled → apply locally and broadcast immediately
///    (every peer drives its own output, so every peer needs to hear it now).
/// 2. `single_playback` on, local is leader → apply locally only; no
///    immediate broadcast, the next heartbeat propagates it (spec §4.8
///    "execute directly; a heartbeat will propagate").
/// 3. `single_playback` on, follower, `allow_remote_control` on → forward as
///    a remote command for the leader to apply.
/// 4. `single_playback` on, follower, `allow_remote_control` off → dropped
///    (spec §7 edge case: nothing to do without a leader to ask).
async fn dispatch_action(shared: &Shared, action: UserAction) {
    if !shared.config.sync.single_playback {
        apply_and_broadcast(shared, action, TransitionCause::User).await;
    } else if shared.coordinator.is_leader() {
        apply_local_action(shared, action, TransitionCause::User).await;
    } else if shared.config.sync.allow_remote_control {
        send_remote_command(shared, action).await;
    } else {
        tracing::debug!(
            target: "instance",
            "dropping local action: not leader, single_playback on, remote control off"
        );
    }
}

/// Auto-advance (spec §4.7): when the engine reports `Ended`, pull the next
/// track from the playlist and play it through the normal dispatch path, same
/// as a user hitting "next". A no-op when auto-advance is off or the playlist
/// has nothing left (`repeat=none` at the end of the queue).
async fn auto_advance_on_ended(shared: Arc<Shared>) {
    let auto_advance = shared.config.playlist.as_ref().map(|p| p.auto_advance).unwrap_or(false);
    if !auto_advance {
        return;
    }
    let next_src = { shared.playlist.write().next().map(|t| t.src.clone()) };
    match next_src {
        Some(src) => {
            dispatch_action(&shared, UserAction::Play(Some(src))).await;
            if playlist_replicates(&shared) {
                shared.playlist_coordinator.broadcast_next(now_millis()).await;
            }
        }
        None => {
            tracing::debug!(target: "instance", "auto-advance: playlist ended with nothing next");
        }
    }
}

/// Emit [`InstanceEvent::LeadershipChanged`] if the role observed since the
/// last check differs. `Coordinator` resolves claims on its own spawned task,
/// so nothing else naturally notices a role flip — this is polled from the
/// event loop's ticks and after anything that might have nudged it.
///
/// On a leader-to-follower transition while `single_playback` is on, silence
/// the local output rather than calling the ordinary `pause` path: an
/// ordinary pause would broadcast a `PAUSE` envelope the new leader would
/// have to filter back out, re-entering the very loop the demotion is
/// supposed to end (spec §4.8 "pauseSilently so the lost-leadership
/// transition does not re-enter the broadcast loop"). The demoted peer also
/// releases its OS media-control bindings (spec §6 "only the current leader
/// binds this integration; upon demotion the bindings must be released to
/// prevent duplicate control from multiple peers") by pushing a cleared
/// now-playing/playback state, since only the leader's subscription closures
/// push updates to it from here on.
fn check_role_change(shared: &Shared) {
    let current = shared.coordinator.role();
    let mut last = shared.last_seen_role.lock();
    if *last == current {
        return;
    }
    let demoted = *last == Role::Leader && current == Role::Follower;
    *last = current;
    drop(last);
    if demoted {
        if shared.config.sync.single_playback && shared.engine.read().state().is_playing {
            shared.output.pause_silently();
        }
        shared.media_control.set_now_playing(&NowPlaying::default());
        shared.media_control.set_playback_state(&state::PlaybackState::default());
    }
    shared.events.emit(&InstanceEvent::LeadershipChanged(current));
}

/// Apply a [`UserAction`] to the engine and output only; returns the
/// [`MessageType`] it corresponds to for a caller that wants to broadcast it.
/// Used both by [`apply_and_broadcast`] and by the leader+`single_playback`
/// dispatch branch, which applies locally but leaves replication to the next
/// heartbeat (spec §4.8).
async fn apply_local_action(shared: &Shared, action: UserAction, cause: TransitionCause) -> MessageType {
    {
        let mut engine = shared.engine.write();
        match &action {
            UserAction::Play(src) => engine.play(src.clone()),
            UserAction::Pause => engine.pause(),
            UserAction::Stop => engine.stop(),
            UserAction::Seek(t) => engine.seek(*t),
        }
    }
    match &action {
        UserAction::Play(src) => shared.output.play(src.clone(), cause).await,
        UserAction::Pause => shared.output.pause(cause),
        UserAction::Stop => shared.output.stop(cause),
        UserAction::Seek(t) => shared.output.seek(*t, cause),
    }
    match action {
        UserAction::Play(_) => MessageType::Play,
        UserAction::Pause => MessageType::Pause,
        UserAction::Stop => MessageType::Stop,
        UserAction::Seek(_) => MessageType::StateUpdate,
    }
}

async fn apply_and_broadcast(shared: &Shared, action: UserAction, cause: TransitionCause) {
    let message_type = apply_local_action(shared, action, cause).await;

    // Anti-loop (spec §4.8, Open Question #2): a remotely-applied action must
    // never be rebroadcast. `begin_remote_dispatch`'s guard is held by every
    // remote-apply call site, so bail here instead of only asserting it.
    if shared.coordinator.is_processing_remote() {
        return;
    }

    let now = now_millis();
    let payload = {
        let engine = shared.engine.read();
        shared.sync.payload_for(&message_type, &engine)
    };
    if let Some(payload) = payload {
        let envelope = Envelope::new(message_type, payload, shared.transport.local_peer_id(), now);
        if let Err(err) = shared.transport.broadcast(envelope).await {
            tracing::warn!(target: "instance", %err, "failed to broadcast local action");
        }
    }
}

async fn send_remote_command(shared: &Shared, action: UserAction) {
    let (kind, src, seek_time) = match action {
        UserAction::Play(src) => (ActionKind::Play, src, None),
        UserAction::Pause => (ActionKind::Pause, None, None),
        UserAction::Stop => (ActionKind::Stop, None, None),
        UserAction::Seek(t) => (ActionKind::Seek, None, Some(t)),
    };
    let message_type = match kind {
        ActionKind::Play => MessageType::Play,
        ActionKind::Pause => MessageType::Pause,
        ActionKind::Stop => MessageType::Stop,
        ActionKind::Seek => MessageType::StateUpdate,
    };
    let payload = Payload {
        is_remote_command: Some(true),
        action: Some(ActionDescriptor {
            action: kind,
            src,
            seek_time,
        }),
        ..Default::default()
    };
    let envelope = Envelope::new(message_type, payload, shared.transport.local_peer_id(), now_millis());
    if let Err(err) = shared.transport.broadcast(envelope).await {
        tracing::warn!(target: "instance", %err, "failed to forward remote command to leader");
    }
}

async fn run_event_loop(shared: Arc<Shared>, mut rx: UnboundedReceiver<Envelope>) {
    let mut heartbeat = tokio::time::interval(Duration::from_millis(shared.config.sync.sync_interval_ms.max(1)));
    let mut liveness = tokio::time::interval(Duration::from_millis(
        (shared.config.sync.leadership_handshake_timeout_ms * 3).max(100),
    ));
    loop {
        tokio::select! {
            envelope = rx.recv() => {
                match envelope {
                    Some(envelope) => handle_incoming(&shared, envelope).await,
                    None => break,
                }
            }
            _ = heartbeat.tick() => maybe_heartbeat(&shared).await,
            _ = liveness.tick() => maybe_reclaim_leadership(&shared).await,
        }
    }
}

async fn handle_incoming(shared: &Arc<Shared>, envelope: Envelope) {
    let now = now_millis();
    shared.coordinator.handle_envelope(&envelope, now).await;
    check_role_change(shared);

    match envelope.message_type {
        MessageType::LeadershipClaim | MessageType::LeadershipAck => {}
        MessageType::SyncRequest => {
            if shared.coordinator.is_leader() {
                reply_to_sync_request(shared, now).await;
            }
        }
        MessageType::Play | MessageType::Pause | MessageType::StateUpdate
            if envelope.payload.is_remote_command == Some(true) =>
        {
            if shared.coordinator.is_leader() {
                if let Some(ref descriptor) = envelope.payload.action {
                    let action = match descriptor.action {
                        ActionKind::Play => UserAction::Play(descriptor.src.clone()),
                        ActionKind::Pause => UserAction::Pause,
                        ActionKind::Stop => UserAction::Stop,
                        ActionKind::Seek => UserAction::Seek(descriptor.seek_time.unwrap_or(0.0)),
                    };
                    apply_and_broadcast(shared, action, TransitionCause::User).await;
                }
            }
        }
        MessageType::Play | MessageType::Pause | MessageType::StateUpdate => {
            if !shared.coordinator.is_leader() {
                let _guard = shared.coordinator.begin_remote_dispatch();
                let mut engine = shared.engine.write();
                shared.sync.apply_remote(&envelope, &mut engine, &shared.output, now).await;
            }
        }
        MessageType::PlaylistAdd
        | MessageType::PlaylistRemove
        | MessageType::PlaylistClear
        | MessageType::PlaylistMove
        | MessageType::PlaylistJump
        | MessageType::PlaylistNext
        | MessageType::PlaylistPrev
        | MessageType::PlaylistRepeat
        | MessageType::PlaylistStateUpdate => {
            let _guard = shared.coordinator.begin_remote_dispatch();
            let mut playlist = shared.playlist.write();
            shared
                .playlist_coordinator
                .apply_remote(&envelope, &mut playlist, &shared.coordinator);
        }
        MessageType::Stop | MessageType::Unknown => {}
    }
}

async fn reply_to_sync_request(shared: &Arc<Shared>, now: u64) {
    let message_type = if shared.engine.read().state().is_playing {
        MessageType::Play
    } else {
        MessageType::Pause
    };
    let payload = {
        let engine = shared.engine.read();
        shared.sync.payload_for(&message_type, &engine)
    };
    if let Some(payload) = payload {
        let envelope = Envelope::new(message_type, payload, shared.transport.local_peer_id(), now);
        let _ = shared.transport.broadcast(envelope).await;
    }
    if playlist_replicates(shared) {
        let playlist = shared.playlist.read();
        shared.playlist_coordinator.broadcast_snapshot(&playlist, now).await;
    }
}

async fn maybe_heartbeat(shared: &Arc<Shared>) {
    if !shared.coordinator.is_leader() {
        return;
    }
    if !shared.engine.read().state().is_playing {
        return;
    }
    let now = now_millis();
    let payload = {
        let engine = shared.engine.read();
        shared.sync.payload_for(&MessageType::StateUpdate, &engine)
    };
    if let Some(payload) = payload {
        let envelope = Envelope::new(MessageType::StateUpdate, payload, shared.transport.local_peer_id(), now);
        let _ = shared.transport.broadcast(envelope).await;
    }
}

async fn maybe_reclaim_leadership(shared: &Arc<Shared>) {
    check_role_change(shared);
    if !shared.coordinator.auto_claim_enabled() {
        return;
    }
    let now = now_millis();
    let timeout_ms = shared.config.sync.leadership_handshake_timeout_ms * 3;
    if shared.coordinator.known_leader().is_none() || shared.coordinator.leader_considered_lost(now, timeout_ms) {
        let _ = shared.coordinator.claim_leadership(now).await;
    }
}
