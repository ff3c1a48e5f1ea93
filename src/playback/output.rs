//! The output adapter (spec §4.2 "Driver"): binds [`super::state::Engine`] to
//! an abstract audio-output capability.
//!
//! Per spec §1 the actual audio device is an external collaborator; this
//! module defines the seam ([`OutputCapability`]) and a deterministic
//! in-memory implementation ([`simulated::SimulatedOutput`]) used by the
//! crate's own tests and suitable for a host that hasn't wired up a real
//! device yet.

use std::time::Duration;

use async_trait::async_trait;

use crate::event::{EventBus, Subscription};
use crate::playback::state::{Engine, PlaybackError, StatePatch};

/// Why an output command was issued (spec §9 REDESIGN FLAGS: replaces the
/// source's ~50ms "silent operation" timer with a token attached to each
/// command, carried back on the matching edge event, so the observer
/// suppresses exactly the echo it caused instead of racing a timer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    /// Directly requested by the local user.
    User,
    /// Applied because a remote peer's state says so (spec §4.5).
    Sync,
    /// Deliberately not to be propagated (spec §4.2 `pauseSilently`).
    Silent,
}

/// How much of the source the output has buffered (mirrors the HTML media
/// element `readyState` ladder spec §4.2 references).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// An activation (`play()`) failure (spec §7).
#[derive(Debug, Clone)]
pub struct ActivationError {
    pub message: String,
    /// True for `TransientActivationError` (spec §7): an activation aborted
    /// by a subsequent source change, recognized by a distinguishable failure
    /// signature and swallowed rather than surfaced.
    pub transient: bool,
}

/// Edge events emitted by an [`OutputCapability`] (spec §4.2, §6).
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    TimeUpdate { current_time: f64, duration: f64 },
    Playing(TransitionCause),
    Pause(TransitionCause),
    Error(String),
    Ended,
    Waiting,
    CanPlay,
    CanPlayThrough,
    Progress { buffered_ahead: f64 },
    LoadStart,
}

/// The abstract audio-output capability (spec §6).
#[async_trait]
pub trait OutputCapability: Send + Sync {
    fn src(&self) -> Option<String>;
    fn set_src(&self, src: Option<String>);
    fn current_time(&self) -> f64;
    fn duration(&self) -> f64;
    fn volume(&self) -> f32;
    fn set_volume(&self, volume: f32);
    fn muted(&self) -> bool;
    fn set_muted(&self, muted: bool);
    fn ready_state(&self) -> ReadyState;

    /// Begin (or resume) playback. Asynchronous: activation may resolve or
    /// fail later (spec §5 "Suspension points").
    async fn activate(&self, cause: TransitionCause) -> Result<(), ActivationError>;
    fn request_pause(&self, cause: TransitionCause);
    fn request_seek(&self, t: f64, cause: TransitionCause);

    fn subscribe(&self, listener: Box<dyn Fn(&OutputEvent) + Send + Sync>) -> Subscription<OutputEvent>;
}

/// A shared, lock-protected [`Engine`], handed to an [`OutputAdapter`] and to
/// whatever else in [`crate::instance::Instance`] needs to mutate playback
/// state.
pub type SharedEngine = std::sync::Arc<parking_lot::RwLock<Engine>>;

/// Binds an [`Engine`] to an [`OutputCapability`] (spec §4.2).
pub struct OutputAdapter {
    capability: std::sync::Arc<dyn OutputCapability>,
    engine: SharedEngine,
    _output_sub: Subscription<OutputEvent>,
}

impl OutputAdapter {
    pub fn new(capability: std::sync::Arc<dyn OutputCapability>, engine: SharedEngine) -> Self {
        let bound_engine = std::sync::Arc::clone(&engine);
        let _output_sub = capability.subscribe(Box::new(move |event| {
            apply_output_event(&bound_engine, event);
        }));
        Self {
            capability,
            engine,
            _output_sub,
        }
    }

    pub fn capability(&self) -> &dyn OutputCapability {
        self.capability.as_ref()
    }

    /// Engine→Output `play(src)` binding (spec §4.2).
    pub async fn play(&self, src: Option<String>, cause: TransitionCause) {
        if let Some(ref new_src) = src {
            if self.capability.src().as_ref() != Some(new_src) {
                self.capability.set_src(Some(new_src.clone()));
            }
        }
        match self.capability.activate(cause).await {
            Ok(()) => {
                self.engine.write().clear_error();
            }
            Err(err) if err.transient => {
                tracing::debug!(
                    target: "output::activation",
                    "tolerating transient activation abort: {}",
                    err.message
                );
            }
            Err(err) => {
                self.engine.write().set_error(PlaybackError {
                    message: err.message,
                    code: "SOURCE_ERROR".to_string(),
                });
                return;
            }
        }

        // One-shot catch-up: align the output to PlaybackState when a
        // follower becomes leader (spec §4.2).
        let target = self.engine.read().state().current_time;
        if target > 0.0 && (self.capability.current_time() - target).abs() > 0.5 {
            self.capability.request_seek(target, cause);
        }
    }

    /// Engine→Output `pause` binding.
    pub fn pause(&self, cause: TransitionCause) {
        self.capability.request_pause(cause);
    }

    /// Engine→Output `stop` binding: pause, and reset position to zero if
    /// metadata is available.
    pub fn stop(&self, cause: TransitionCause) {
        self.capability.request_pause(cause);
        if self.capability.ready_state() >= ReadyState::HaveMetadata {
            self.capability.request_seek(0.0, cause);
        }
    }

    /// Engine→Output `seek(t)` binding: only seeks when `t` is finite, `>=0`,
    /// and the output is ready enough; otherwise drops silently (spec §4.2,
    /// §7 `InvalidArgument`).
    pub fn seek(&self, t: f64, cause: TransitionCause) {
        if t.is_finite() && t >= 0.0 && self.capability.ready_state() >= ReadyState::HaveCurrentData {
            self.capability.request_seek(t, cause);
        } else {
            tracing::debug!(target: "output::seek", t, "dropping seek: not finite/non-negative or not ready");
        }
    }

    /// Silence a local pause so it does not feed back into the broadcast loop
    /// during a leadership transfer (spec §4.2 `pauseSilently`).
    pub fn pause_silently(&self) {
        self.capability.request_pause(TransitionCause::Silent);
        self.engine.write().stop_silently();
    }

    /// Retry a seek with small delays until the output is ready, or give up
    /// after ~10 attempts (spec §4.2 `seekWhenReady`) — used after a source
    /// change when a follower must align to the leader's position.
    pub async fn seek_when_ready(&self, t: f64, cause: TransitionCause) {
        const MAX_ATTEMPTS: u32 = 10;
        const RETRY_DELAY: Duration = Duration::from_millis(50);
        for attempt in 0..MAX_ATTEMPTS {
            if self.capability.ready_state() >= ReadyState::HaveCurrentData {
                self.capability.request_seek(t, cause);
                return;
            }
            tracing::debug!(target: "output::seek", attempt, "output not ready, retrying seek_when_ready");
            tokio::time::sleep(RETRY_DELAY).await;
        }
        tracing::debug!(target: "output::seek", t, "seek_when_ready gave up after {MAX_ATTEMPTS} attempts");
    }
}

/// Output→Engine bindings (spec §4.2).
fn apply_output_event(engine: &SharedEngine, event: &OutputEvent) {
    match event {
        OutputEvent::TimeUpdate { current_time, duration } => {
            engine.write().update_state(StatePatch {
                current_time: Some(*current_time),
                duration: Some(*duration),
                ..Default::default()
            });
        }
        OutputEvent::Playing(_) => {
            let mut engine = engine.write();
            engine.clear_error();
            engine.update_state(StatePatch {
                is_playing: Some(true),
                ..Default::default()
            });
        }
        OutputEvent::Pause(cause) => {
            if !matches!(cause, TransitionCause::Silent) {
                engine.write().pause();
            }
        }
        OutputEvent::Error(message) => {
            engine.write().set_error(PlaybackError {
                message: message.clone(),
                code: "SOURCE_ERROR".to_string(),
            });
        }
        OutputEvent::Ended => engine.write().mark_ended(),
        OutputEvent::Waiting | OutputEvent::LoadStart => engine.write().set_buffering(true),
        OutputEvent::CanPlay | OutputEvent::CanPlayThrough => engine.write().set_buffering(false),
        OutputEvent::Progress { buffered_ahead } => {
            engine.write().set_buffer_progress(*buffered_ahead);
        }
    }
}

pub mod simulated {
    //! A deterministic, manually-driven [`OutputCapability`] for tests and
    //! for hosts that have not wired up a real device yet.

    use std::sync::Mutex;

    use super::*;

    struct State {
        src: Option<String>,
        current_time: f64,
        duration: f64,
        volume: f32,
        muted: bool,
        ready_state: ReadyState,
        next_activation_failure: Option<ActivationError>,
    }

    /// An in-memory audio output that never talks to real hardware. Tests
    /// drive it directly (`set_ready_state`, `push_time_update`,
    /// `fail_next_activation`) and assert on the commands it received.
    pub struct SimulatedOutput {
        state: Mutex<State>,
        events: EventBus<OutputEvent>,
    }

    impl Default for SimulatedOutput {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SimulatedOutput {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(State {
                    src: None,
                    current_time: 0.0,
                    duration: 0.0,
                    volume: 1.0,
                    muted: false,
                    ready_state: ReadyState::HaveEnoughData,
                    next_activation_failure: None,
                }),
                events: EventBus::new(),
            }
        }

        pub fn set_ready_state(&self, ready_state: ReadyState) {
            self.state.lock().unwrap().ready_state = ready_state;
        }

        pub fn set_duration(&self, duration: f64) {
            self.state.lock().unwrap().duration = duration;
        }

        /// Simulate a timeupdate edge event and move the internal clock.
        pub fn push_time_update(&self, current_time: f64) {
            let duration = {
                let mut state = self.state.lock().unwrap();
                state.current_time = current_time;
                state.duration
            };
            self.events.emit(&OutputEvent::TimeUpdate { current_time, duration });
        }

        pub fn push_ended(&self) {
            self.events.emit(&OutputEvent::Ended);
        }

        pub fn push_error(&self, message: impl Into<String>) {
            self.events.emit(&OutputEvent::Error(message.into()));
        }

        /// Make the next `activate()` call fail, e.g. to simulate a source
        /// error or a transient abort from a rapid source change.
        pub fn fail_next_activation(&self, message: impl Into<String>, transient: bool) {
            self.state.lock().unwrap().next_activation_failure = Some(ActivationError {
                message: message.into(),
                transient,
            });
        }
    }

    #[async_trait]
    impl OutputCapability for SimulatedOutput {
        fn src(&self) -> Option<String> {
            self.state.lock().unwrap().src.clone()
        }

        fn set_src(&self, src: Option<String>) {
            self.state.lock().unwrap().src = src;
        }

        fn current_time(&self) -> f64 {
            self.state.lock().unwrap().current_time
        }

        fn duration(&self) -> f64 {
            self.state.lock().unwrap().duration
        }

        fn volume(&self) -> f32 {
            self.state.lock().unwrap().volume
        }

        fn set_volume(&self, volume: f32) {
            self.state.lock().unwrap().volume = volume.clamp(0.0, 1.0);
        }

        fn muted(&self) -> bool {
            self.state.lock().unwrap().muted
        }

        fn set_muted(&self, muted: bool) {
            self.state.lock().unwrap().muted = muted;
        }

        fn ready_state(&self) -> ReadyState {
            self.state.lock().unwrap().ready_state
        }

        async fn activate(&self, cause: TransitionCause) -> Result<(), ActivationError> {
            let failure = self.state.lock().unwrap().next_activation_failure.take();
            if let Some(failure) = failure {
                return Err(failure);
            }
            self.events.emit(&OutputEvent::Playing(cause));
            Ok(())
        }

        fn request_pause(&self, cause: TransitionCause) {
            self.events.emit(&OutputEvent::Pause(cause));
        }

        fn request_seek(&self, t: f64, _cause: TransitionCause) {
            self.state.lock().unwrap().current_time = t;
        }

        fn subscribe(&self, listener: Box<dyn Fn(&OutputEvent) + Send + Sync>) -> Subscription<OutputEvent> {
            self.events.subscribe(move |ev| listener(ev))
        }
    }
}
