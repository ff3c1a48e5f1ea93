//! Instance configuration.
//!
//! Mirrors spec §3's `SyncConfig` and §4.8's configuration table. Constructed
//! in-process and handed to [`crate::instance::Instance::new`]; there is no
//! on-disk form (spec §6: "no environment variables and no persisted state
//! mandated by the core").

use serde::{Deserialize, Serialize};

/// Process-wide synchronization policy for a channel (spec §3 `SyncConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub sync_play: bool,
    pub sync_pause: bool,
    pub sync_seek: bool,
    pub sync_track_change: bool,
    pub single_playback: bool,
    pub allow_remote_control: bool,
    pub auto_claim_leadership_if_none: bool,
    pub sync_interval_ms: u64,
    pub leadership_handshake_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_play: true,
            sync_pause: true,
            sync_seek: true,
            sync_track_change: true,
            single_playback: false,
            allow_remote_control: false,
            auto_claim_leadership_if_none: false,
            sync_interval_ms: 5_000,
            leadership_handshake_timeout_ms: 400,
        }
    }
}

impl SyncConfig {
    /// Non-fatal configuration warnings (spec §7 `ConfigWarning`): mutually
    /// confusing combinations that never refuse construction, only log.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.single_playback && !self.sync_play {
            warnings.push(
                "single_playback=true with sync_play=false: followers will never learn the \
                 leader started playing"
                    .to_string(),
            );
        }
        if self.single_playback && !self.sync_pause {
            warnings.push(
                "single_playback=true with sync_pause=false: followers will never learn the \
                 leader paused"
                    .to_string(),
            );
        }
        if self.allow_remote_control && !self.single_playback {
            warnings
                .push("allow_remote_control has no effect unless single_playback=true".to_string());
        }
        if self.auto_claim_leadership_if_none && !self.allow_remote_control {
            warnings.push(
                "auto_claim_leadership_if_none has no effect unless allow_remote_control=true"
                    .to_string(),
            );
        }
        if self.leadership_handshake_timeout_ms == 0 {
            warnings.push(
                "leadership_handshake_timeout_ms=0 self-promotes with no time for a competing \
                 claim to arrive"
                    .to_string(),
            );
        }
        warnings
    }
}

/// Playlist sub-config (spec §4.8 `playlist` option).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    pub auto_advance: bool,
    pub default_repeat: crate::playlist::core::RepeatMode,
    pub default_shuffle: bool,
    pub replicate: bool,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            auto_advance: true,
            default_repeat: crate::playlist::core::RepeatMode::None,
            default_shuffle: false,
            replicate: true,
        }
    }
}

/// Full instance configuration (spec §4.8 table).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub channel_name: String,
    pub sync: SyncConfig,
    pub playlist: Option<PlaylistConfig>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            channel_name: "default".to_string(),
            sync: SyncConfig::default(),
            playlist: Some(PlaylistConfig::default()),
        }
    }
}

impl InstanceConfig {
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            ..Self::default()
        }
    }

    /// Log every `ConfigWarning` (spec §7) for this configuration.
    pub fn log_warnings(&self) {
        for warning in self.sync.warnings() {
            tracing::warn!(target: "config", "{warning}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_warnings() {
        assert!(SyncConfig::default().warnings().is_empty());
    }

    #[test]
    fn single_playback_without_sync_play_warns() {
        let cfg = SyncConfig {
            single_playback: true,
            sync_play: false,
            ..SyncConfig::default()
        };
        assert!(!cfg.warnings().is_empty());
    }

    #[test]
    fn remote_control_without_single_playback_warns() {
        let cfg = SyncConfig {
            allow_remote_control: true,
            single_playback: false,
            ..SyncConfig::default()
        };
        assert!(cfg.warnings().iter().any(|w| w.contains("allow_remote_control")));
    }

    #[test]
    fn instance_config_roundtrips_through_json() {
        let cfg = InstanceConfig::new("room-1");
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed: InstanceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.channel_name, "room-1");
    }
}
