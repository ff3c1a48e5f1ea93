//! Authoritative playback state (spec §4.1 "Engine").
//!
//! A pure state mutator with a typed event bus. `PlaybackState` never talks to
//! an output device directly — that is [`super::output::OutputAdapter`]'s job —
//! so every method here is synchronous and side-effect-free beyond mutating
//! `self` and emitting events.

use serde::{Deserialize, Serialize};

use crate::event::{EventBus, Subscription};

/// A non-fatal playback error surfaced on `PlaybackState.error` (spec §3, §7
/// `SourceError`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackError {
    pub message: String,
    pub code: String,
}

/// Events fanned out by [`PlaybackState`] (spec §4.1, §8 invariant #2).
///
/// Every variant other than `StateChange` is followed by exactly one
/// `StateChange` — enforced centrally in [`PlaybackState::emit`], not
/// duplicated at each call site, so this invariant cannot be broken by a
/// forgotten emit.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Play(Option<String>),
    Pause,
    Stop,
    Seek(f64),
    StateChange,
    Buffering(bool),
    BufferProgress(f64),
    Ended,
    Error(PlaybackError),
}

/// A partial update applied to [`PlaybackState`] (spec §3 `Envelope.payload`,
/// §4.1 `updateState`/`setSyncState`).
///
/// Each field is `Option<T>`; `None` leaves the corresponding `PlaybackState`
/// field untouched. `current_src` and `error` are doubly-optional because the
/// patch needs to distinguish "don't touch this field" from "set it to
/// `None`".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatePatch {
    pub is_playing: Option<bool>,
    pub current_time: Option<f64>,
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_src: Option<Option<String>>,
    pub volume: Option<f32>,
    pub muted: Option<bool>,
    pub is_buffering: Option<bool>,
    pub buffered_ahead: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Option<PlaybackError>>,
}

/// The authoritative playback record for one instance (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub current_src: Option<String>,
    pub volume: f32,
    pub muted: bool,
    pub is_buffering: bool,
    pub buffered_ahead: f64,
    pub error: Option<PlaybackError>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            current_src: None,
            volume: 1.0,
            muted: false,
            is_buffering: false,
            buffered_ahead: 0.0,
            error: None,
        }
    }
}

impl PlaybackState {
    /// Clamp `current_time` into `[0, duration]` when `duration` is known
    /// (spec §3 invariant: "`currentTime ≤ duration` when `duration>0`").
    fn clamp_time(&mut self) {
        if self.current_time < 0.0 {
            self.current_time = 0.0;
        }
        if self.duration > 0.0 && self.current_time > self.duration {
            self.current_time = self.duration;
        }
    }

    fn apply_patch(&mut self, patch: &StatePatch) {
        if let Some(v) = patch.is_playing {
            self.is_playing = v;
        }
        if let Some(v) = patch.current_time {
            self.current_time = v;
        }
        if let Some(v) = patch.duration {
            self.duration = v;
        }
        if let Some(v) = patch.current_src.clone() {
            self.current_src = v;
        }
        if let Some(v) = patch.volume {
            self.volume = v.clamp(0.0, 1.0);
        }
        if let Some(v) = patch.muted {
            self.muted = v;
        }
        if let Some(v) = patch.is_buffering {
            self.is_buffering = v;
        }
        if let Some(v) = patch.buffered_ahead {
            self.buffered_ahead = v;
        }
        if let Some(v) = patch.error.clone() {
            self.error = v;
        }
        self.clamp_time();
    }
}

/// The authoritative engine: [`PlaybackState`] plus its event bus.
pub struct Engine {
    state: PlaybackState,
    bus: EventBus<Event>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::default(),
            bus: EventBus::new(),
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription<Event>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    /// Every non-`StateChange` event is immediately followed by one
    /// `StateChange` (spec §4.1, §8 invariant #2). This is the single emit
    /// path; all mutators below route through it.
    fn emit(&self, event: Event) {
        let is_state_change = matches!(event, Event::StateChange);
        self.bus.emit(&event);
        if !is_state_change {
            self.bus.emit(&Event::StateChange);
        }
    }

    /// Start playback, optionally switching source (spec §4.1 `play`).
    pub fn play(&mut self, src: Option<String>) {
        if let Some(ref new_src) = src {
            if self.state.current_src.as_ref() != Some(new_src) {
                self.state.current_src = Some(new_src.clone());
                self.state.current_time = 0.0;
                self.state.duration = 0.0;
            }
        }
        self.state.is_playing = true;
        self.emit(Event::Play(src));
    }

    /// Pause playback (spec §4.1 `pause`).
    pub fn pause(&mut self) {
        self.state.is_playing = false;
        self.emit(Event::Pause);
    }

    /// Stop playback and reset position to zero (spec §4.1 `stop`).
    pub fn stop(&mut self) {
        self.state.is_playing = false;
        self.state.current_time = 0.0;
        self.emit(Event::Stop);
    }

    /// Record a seek (spec §4.1 `seek`).
    pub fn seek(&mut self, t: f64) {
        self.state.current_time = t;
        self.state.clamp_time();
        self.emit(Event::Seek(t));
    }

    /// Arbitrary partial merge, emits only `StateChange` (spec §4.1
    /// `updateState`).
    pub fn update_state(&mut self, patch: StatePatch) {
        self.state.apply_patch(&patch);
        self.emit(Event::StateChange);
    }

    /// Like [`Engine::update_state`] but documents the caller's intent: this
    /// path must never cause the `OutputAdapter` to act, which holds
    /// automatically here because only `StateChange` is emitted — there is no
    /// `Play`/`Pause`/`Seek` event for a driver to react to (spec §4.1
    /// `setSyncState`).
    pub fn set_sync_state(&mut self, patch: StatePatch) {
        self.update_state(patch);
    }

    /// Silently mark playback stopped: `is_playing=false`, `StateChange` only
    /// (spec §4.1 `stopSilently`).
    pub fn stop_silently(&mut self) {
        self.state.is_playing = false;
        self.emit(Event::StateChange);
    }

    /// Edge-triggered buffering flag (spec §4.1).
    pub fn set_buffering(&mut self, buffering: bool) {
        if self.state.is_buffering == buffering {
            return;
        }
        self.state.is_buffering = buffering;
        self.emit(Event::Buffering(buffering));
    }

    /// Buffer-ahead progress; emits `BufferProgress` only, never
    /// `StateChange`, to avoid flooding subscribers (spec §4.1).
    pub fn set_buffer_progress(&mut self, seconds_ahead: f64) {
        self.state.buffered_ahead = seconds_ahead;
        self.bus.emit(&Event::BufferProgress(seconds_ahead));
    }

    /// Mark playback ended (spec §4.2 output→engine `ended` binding):
    /// `is_playing=false` then `Ended`.
    pub fn mark_ended(&mut self) {
        self.state.is_playing = false;
        self.emit(Event::Ended);
    }

    /// Record a source error (spec §7 `SourceError`): `isPlaying` goes false
    /// via the normal path, `error` is populated, `Error` is emitted.
    pub fn set_error(&mut self, error: PlaybackError) {
        self.state.is_playing = false;
        self.state.error = Some(error.clone());
        self.emit(Event::Error(error));
    }

    /// Clear any recorded error (spec §3: "`error=none` after any successful
    /// activation").
    pub fn clear_error(&mut self) {
        if self.state.error.is_some() {
            self.state.error = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn play_sets_is_playing_and_resets_time_on_src_change() {
        let mut engine = Engine::new();
        engine.seek(50.0);
        engine.play(Some("song.mp3".to_string()));
        assert!(engine.state().is_playing);
        assert_eq!(engine.state().current_time, 0.0);
        assert_eq!(engine.state().current_src.as_deref(), Some("song.mp3"));
    }

    #[test]
    fn play_same_src_preserves_position() {
        let mut engine = Engine::new();
        engine.play(Some("song.mp3".to_string()));
        engine.seek(30.0);
        engine.play(Some("song.mp3".to_string()));
        assert_eq!(engine.state().current_time, 30.0);
    }

    #[test]
    fn every_event_is_followed_by_state_change() {
        let mut engine = Engine::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let _sub = engine.subscribe(move |ev| {
            if matches!(ev, Event::StateChange) {
                c.fetch_add(1, Ordering::Relaxed);
            }
        });
        engine.play(None);
        engine.pause();
        engine.stop();
        engine.seek(1.0);
        engine.set_buffering(true);
        engine.mark_ended();
        assert_eq!(counter.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn buffer_progress_does_not_emit_state_change() {
        let mut engine = Engine::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let _sub = engine.subscribe(move |ev| {
            if matches!(ev, Event::StateChange) {
                c.fetch_add(1, Ordering::Relaxed);
            }
        });
        engine.set_buffer_progress(2.0);
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn buffering_is_edge_triggered() {
        let mut engine = Engine::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let _sub = engine.subscribe(move |ev| {
            if matches!(ev, Event::Buffering(_)) {
                seen2.fetch_add(1, Ordering::Relaxed);
            }
        });
        engine.set_buffering(true);
        engine.set_buffering(true);
        engine.set_buffering(false);
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn current_time_clamps_to_duration() {
        let mut engine = Engine::new();
        engine.update_state(StatePatch {
            duration: Some(100.0),
            ..Default::default()
        });
        engine.seek(150.0);
        assert_eq!(engine.state().current_time, 100.0);
    }

    #[test]
    fn set_sync_state_never_emits_play_or_pause() {
        let mut engine = Engine::new();
        let saw_play_or_pause = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&saw_play_or_pause);
        let _sub = engine.subscribe(move |ev| {
            if matches!(ev, Event::Play(_) | Event::Pause) {
                flag.fetch_add(1, Ordering::Relaxed);
            }
        });
        engine.set_sync_state(StatePatch {
            is_playing: Some(true),
            current_time: Some(10.0),
            ..Default::default()
        });
        assert_eq!(saw_play_or_pause.load(Ordering::Relaxed), 0);
        assert!(engine.state().is_playing);
    }

    #[test]
    fn error_clears_on_successful_play() {
        let mut engine = Engine::new();
        engine.set_error(PlaybackError {
            message: "boom".into(),
            code: "SRC_ERR".into(),
        });
        assert!(engine.state().error.is_some());
        engine.clear_error();
        assert!(engine.state().error.is_none());
    }
}
