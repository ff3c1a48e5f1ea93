//! The local playlist (spec §4.6 "PlaylistCore").
//!
//! Navigation by position, repeat modes, add/remove/reorder, with shuffle as
//! a real Fisher-Yates permutation (`queue_map`) rather than a stubbed order.
//! Position is tracked as an absolute track index rather than a
//! queue-relative one so it can be replicated directly in a
//! [`crate::transport::PlaylistSnapshot`].

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::event::{EventBus, Subscription};

/// One entry in the playlist (spec §3 `Track`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub src: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
}

/// Playlist wraparound behavior (spec §3 `RepeatMode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    None,
    All,
    One,
}

/// Events fanned out by [`PlaylistCore`] (spec §4.6).
///
/// As with [`crate::playback::state::Engine`], every variant other than
/// `StateChange` is followed by exactly one `StateChange`, centralized in
/// [`PlaylistCore::emit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TrackAdded(Track),
    TrackRemoved(String),
    Cleared,
    Moved { from: usize, to: usize },
    Jumped(usize),
    RepeatChanged(RepeatMode),
    ShuffleChanged(bool),
    StateChange,
}

/// The local playlist: ordered tracks, current position, repeat and shuffle
/// policy (spec §3, §4.6).
pub struct PlaylistCore {
    tracks: Vec<Track>,
    current_index: Option<usize>,
    repeat: RepeatMode,
    shuffle: bool,
    /// Navigation order: a permutation of `0..tracks.len()`. Identity when
    /// `shuffle` is false (spec §4.6 `queueMap`).
    queue_map: Vec<usize>,
    bus: EventBus<Event>,
}

impl Default for PlaylistCore {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaylistCore {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            current_index: None,
            repeat: RepeatMode::default(),
            shuffle: false,
            queue_map: Vec::new(),
            bus: EventBus::new(),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription<Event>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    fn emit(&self, event: Event) {
        let is_state_change = matches!(event, Event::StateChange);
        self.bus.emit(&event);
        if !is_state_change {
            self.bus.emit(&Event::StateChange);
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current(&self) -> Option<&Track> {
        self.current_index.and_then(|i| self.tracks.get(i))
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn queue_map(&self) -> &[usize] {
        &self.queue_map
    }

    /// Append a track (spec §4.6 `add`). A duplicate `id` is rejected with a
    /// logged warning and no state change.
    pub fn add(&mut self, track: Track) {
        if self.tracks.iter().any(|t| t.id == track.id) {
            tracing::warn!(target: "playlist::core", id = %track.id, "rejecting track with duplicate id");
            return;
        }
        let new_index = self.tracks.len();
        self.tracks.push(track.clone());
        self.queue_map.push(new_index);
        if self.current_index.is_none() {
            self.current_index = Some(new_index);
        }
        self.emit(Event::TrackAdded(track));
    }

    /// Insert immediately after the current position (spec §4.6
    /// `addNext`).
    pub fn add_next(&mut self, track: Track) {
        let insert_at = self.current_index.map(|i| i + 1).unwrap_or(0).min(self.tracks.len());
        self.tracks.insert(insert_at, track.clone());
        for i in self.queue_map.iter_mut() {
            if *i >= insert_at {
                *i += 1;
            }
        }
        let queue_pos = self
            .current_index
            .and_then(|cur| self.queue_map.iter().position(|&i| i == cur))
            .map(|p| p + 1)
            .unwrap_or(self.queue_map.len());
        self.queue_map.insert(queue_pos.min(self.queue_map.len()), insert_at);
        if let Some(cur) = self.current_index {
            if cur >= insert_at {
                self.current_index = Some(cur + 1);
            }
        } else {
            self.current_index = Some(insert_at);
        }
        self.emit(Event::TrackAdded(track));
    }

    /// Remove the track at `index` (spec §4.6 `remove`). Out-of-range indices
    /// are a no-op, logged at debug (spec §7 `InvalidArgument`).
    pub fn remove(&mut self, index: usize) -> Option<Track> {
        if index >= self.tracks.len() {
            tracing::debug!(target: "playlist::core", index, "remove: index out of range");
            return None;
        }
        let removed = self.tracks.remove(index);
        self.queue_map.retain(|&i| i != index);
        for i in self.queue_map.iter_mut() {
            if *i > index {
                *i -= 1;
            }
        }
        self.current_index = match self.current_index {
            Some(cur) if cur == index => None,
            Some(cur) if cur > index => Some(cur - 1),
            other => other,
        };
        self.emit(Event::TrackRemoved(removed.id.clone()));
        Some(removed)
    }

    /// Remove every track and reset position (spec §4.6 `clear`).
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.queue_map.clear();
        self.current_index = None;
        self.emit(Event::Cleared);
    }

    /// Move a track from one absolute index to another (spec §4.6 `move`).
    pub fn reorder(&mut self, from: usize, to: usize) {
        if from >= self.tracks.len() || to >= self.tracks.len() || from == to {
            tracing::debug!(target: "playlist::core", from, to, "reorder: invalid indices");
            return;
        }
        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);
        remap_index(&mut self.current_index, from, to);
        for i in self.queue_map.iter_mut() {
            remap_index_mut(i, from, to);
        }
        self.emit(Event::Moved { from, to });
    }

    /// Jump directly to a track by absolute index (spec §4.6 `jumpTo`).
    pub fn jump_to(&mut self, index: usize) -> Option<&Track> {
        if index >= self.tracks.len() {
            tracing::debug!(target: "playlist::core", index, "jump_to: index out of range");
            return None;
        }
        self.current_index = Some(index);
        self.emit(Event::Jumped(index));
        self.current()
    }

    /// Advance according to `repeat`/`shuffle` (spec §4.6 `next`).
    pub fn next(&mut self) -> Option<&Track> {
        if self.tracks.is_empty() {
            return None;
        }
        let Some(pos) = self.queue_position() else {
            self.current_index = self.queue_map.first().copied();
            return self.current();
        };
        match self.repeat {
            RepeatMode::One => {}
            RepeatMode::All => {
                let next_pos = (pos + 1) % self.queue_map.len();
                self.current_index = Some(self.queue_map[next_pos]);
            }
            RepeatMode::None => {
                if pos + 1 >= self.queue_map.len() {
                    return None;
                }
                self.current_index = Some(self.queue_map[pos + 1]);
            }
        }
        let result = self.current();
        if result.is_some() {
            self.emit(Event::StateChange);
        }
        result
    }

    /// Step backward according to `repeat`/`shuffle` (spec §4.6 `previous`).
    pub fn previous(&mut self) -> Option<&Track> {
        if self.tracks.is_empty() {
            return None;
        }
        let Some(pos) = self.queue_position() else {
            self.current_index = self.queue_map.first().copied();
            return self.current();
        };
        match self.repeat {
            RepeatMode::One => {}
            RepeatMode::All => {
                let prev_pos = if pos == 0 { self.queue_map.len() - 1 } else { pos - 1 };
                self.current_index = Some(self.queue_map[prev_pos]);
            }
            RepeatMode::None => {
                if pos == 0 {
                    return None;
                }
                self.current_index = Some(self.queue_map[pos - 1]);
            }
        }
        let result = self.current();
        if result.is_some() {
            self.emit(Event::StateChange);
        }
        result
    }

    fn queue_position(&self) -> Option<usize> {
        let cur = self.current_index?;
        self.queue_map.iter().position(|&i| i == cur)
    }

    /// Cycle `None -> All -> One -> None` (spec §4.6 `toggleRepeat`).
    pub fn toggle_repeat(&mut self) {
        self.repeat = match self.repeat {
            RepeatMode::None => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::None,
        };
        self.emit(Event::RepeatChanged(self.repeat));
    }

    pub fn set_repeat(&mut self, mode: RepeatMode) {
        self.repeat = mode;
        self.emit(Event::RepeatChanged(mode));
    }

    /// Enable or disable shuffle, rebuilding `queue_map` (spec §4.6
    /// `setShuffle`). Enabling draws a fresh Fisher-Yates permutation;
    /// disabling restores ascending order. Either way the current track stays
    /// current — only future `next`/`previous` calls see the new order.
    pub fn set_shuffle(&mut self, enabled: bool) {
        self.shuffle = enabled;
        self.rebuild_queue_map();
        self.emit(Event::ShuffleChanged(enabled));
    }

    fn rebuild_queue_map(&mut self) {
        self.queue_map = (0..self.tracks.len()).collect();
        if self.shuffle {
            self.queue_map.shuffle(&mut rand::rng());
        }
    }

    /// Replace the entire playlist in one step (spec §4.7 bulk replace, used
    /// by [`crate::playlist::coordinator::PlaylistCoordinator`] when applying
    /// a remote `PLAYLIST_STATE_UPDATE`).
    pub fn replace_all(
        &mut self,
        tracks: Vec<Track>,
        current_index: Option<usize>,
        repeat: RepeatMode,
        shuffle: bool,
        queue_map: Vec<usize>,
    ) {
        self.tracks = tracks;
        self.current_index = current_index.filter(|&i| i < self.tracks.len());
        self.repeat = repeat;
        self.shuffle = shuffle;
        self.queue_map = if queue_map.len() == self.tracks.len() {
            queue_map
        } else {
            (0..self.tracks.len()).collect()
        };
        self.emit(Event::StateChange);
    }
}

fn remap_index(index: &mut Option<usize>, from: usize, to: usize) {
    if let Some(i) = index.as_mut() {
        remap_index_mut(i, from, to);
    }
}

fn remap_index_mut(i: &mut usize, from: usize, to: usize) {
    if *i == from {
        *i = to;
    } else if from < to && *i > from && *i <= to {
        *i -= 1;
    } else if to < from && *i >= to && *i < from {
        *i += 1;
    }
}
