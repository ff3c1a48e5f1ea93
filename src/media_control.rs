//! OS media-control integration (spec §6 "external collaborator").
//!
//! Narrowed to the seam this crate actually needs: pushing now-playing
//! metadata/state out, and turning OS-originated commands (a headset's
//! play/pause button, an MPRIS client) into the same local action path a
//! user click takes. The `souvlaki` feature adapter deliberately skips a
//! Windows HWND bootstrap dance (`windows_sys`-based message pump) since
//! this crate has no window of its own to attach to; see `DESIGN.md` for
//! that simplification.

use crate::playback::state::PlaybackState;

/// Now-playing metadata pushed to the OS (spec §6).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NowPlaying {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

/// A command the OS media-control surface sent back (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaControlCommand {
    Play,
    Pause,
    Toggle,
    Next,
    Previous,
}

/// The OS media-control seam. `crate::instance::Instance` pushes state/
/// metadata out through it and drains commands from it, same shape as
/// [`crate::playback::output::OutputCapability`] but one-directional in each
/// method rather than event-subscribed, since there is at most one media
/// control surface per process and no reason to fan it out through
/// [`crate::event::EventBus`].
pub trait MediaControlSink: Send + Sync {
    fn set_now_playing(&self, metadata: &NowPlaying);
    fn set_playback_state(&self, state: &PlaybackState);
    /// Drain commands the OS surface queued since the last poll. Returns an
    /// empty vec when nothing is pending or the sink has no OS backing.
    fn poll_commands(&self) -> Vec<MediaControlCommand>;
}

/// A sink that does nothing (spec §6 default when no OS integration is
/// wired up, and the only implementation available without the
/// `media-controls-souvlaki` feature).
#[derive(Debug, Default)]
pub struct NullMediaControlSink;

impl MediaControlSink for NullMediaControlSink {
    fn set_now_playing(&self, _metadata: &NowPlaying) {}
    fn set_playback_state(&self, _state: &PlaybackState) {}
    fn poll_commands(&self) -> Vec<MediaControlCommand> {
        Vec::new()
    }
}

#[cfg(feature = "media-controls-souvlaki")]
pub mod souvlaki_sink {
    //! A [`MediaControlSink`] backed by `souvlaki`.
    //!
    //! This does not spawn a dedicated OS thread with its own Win32 message
    //! pump — `souvlaki`'s
    //! `MediaControls::new` is called directly on whatever thread constructs
    //! this sink, and `poll_commands` drains an internal queue filled by
    //! souvlaki's own callback. That is sufficient for Linux (MPRIS) and
    //! macOS; on Windows, `souvlaki` requires an HWND to attach to, which
    //! this crate — having no window of its own — does not provide, so
    //! `new()` returns `None` there. A host embedding this crate in a windowed
    //! application can still use `souvlaki` directly instead of this sink.

    use std::sync::Mutex;

    use std::sync::Arc;

    use souvlaki::{MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, PlatformConfig};

    use super::{MediaControlCommand, MediaControlSink, NowPlaying};
    use crate::playback::state::PlaybackState;

    pub struct SouvlakiSink {
        controls: Mutex<MediaControls>,
        pending: Arc<Mutex<Vec<MediaControlCommand>>>,
    }

    impl SouvlakiSink {
        /// Returns `None` on platforms where `souvlaki` needs a window handle
        /// this crate does not have (spec §6: external collaborators that
        /// cannot be constructed are absent, not fatal).
        pub fn new(display_name: &str) -> Option<Self> {
            #[cfg(target_os = "windows")]
            {
                let _ = display_name;
                None
            }
            #[cfg(not(target_os = "windows"))]
            {
                let config = PlatformConfig {
                    dbus_name: "coplay",
                    display_name,
                    hwnd: None,
                };
                let mut controls = MediaControls::new(config).ok()?;
                let pending: Arc<Mutex<Vec<MediaControlCommand>>> = Arc::new(Mutex::new(Vec::new()));
                let pending_for_callback = Arc::clone(&pending);
                controls
                    .attach(move |event| {
                        if let Some(command) = translate(event) {
                            pending_for_callback.lock().unwrap().push(command);
                        }
                    })
                    .ok()?;
                Some(Self {
                    controls: Mutex::new(controls),
                    pending,
                })
            }
        }
    }

    fn translate(event: MediaControlEvent) -> Option<MediaControlCommand> {
        match event {
            MediaControlEvent::Play => Some(MediaControlCommand::Play),
            MediaControlEvent::Pause => Some(MediaControlCommand::Pause),
            MediaControlEvent::Toggle => Some(MediaControlCommand::Toggle),
            MediaControlEvent::Next => Some(MediaControlCommand::Next),
            MediaControlEvent::Previous => Some(MediaControlCommand::Previous),
            _ => None,
        }
    }

    impl MediaControlSink for SouvlakiSink {
        fn set_now_playing(&self, metadata: &NowPlaying) {
            let mut controls = self.controls.lock().unwrap();
            let _ = controls.set_metadata(MediaMetadata {
                title: metadata.title.as_deref(),
                artist: metadata.artist.as_deref(),
                album: metadata.album.as_deref(),
                ..Default::default()
            });
        }

        fn set_playback_state(&self, state: &PlaybackState) {
            let mut controls = self.controls.lock().unwrap();
            let playback = if state.is_playing {
                MediaPlayback::Playing { progress: None }
            } else {
                MediaPlayback::Paused { progress: None }
            };
            let _ = controls.set_playback(playback);
        }

        fn poll_commands(&self) -> Vec<MediaControlCommand> {
            std::mem::take(&mut self.pending.lock().unwrap())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_never_produces_commands() {
        let sink = NullMediaControlSink;
        sink.set_now_playing(&NowPlaying::default());
        sink.set_playback_state(&PlaybackState::default());
        assert!(sink.poll_commands().is_empty());
    }
}
