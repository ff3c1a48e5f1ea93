//! Cross-peer leader election and playback-state replication for multiple
//! same-origin audio instances sharing one broadcast bus.
//!
//! [`instance::Instance`] is the composition root: construct one per peer,
//! give it a [`transport::Transport`] and a [`playback::output::OutputCapability`],
//! and it handles leader election ([`coordinator`]), state replication
//! ([`sync`]), playlist replication ([`playlist`]), and the local/remote
//! action split on its own background task.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod instance;
pub mod latency;
pub mod media_control;
pub mod playback;
pub mod playlist;
pub mod sync;
pub mod transport;

pub use config::{InstanceConfig, PlaylistConfig, SyncConfig};
pub use coordinator::{Coordinator, Role};
pub use error::{Error, Result};
pub use event::{EventBus, Subscription, SubscriptionId};
pub use instance::{Instance, InstanceEvent, UserAction};
pub use playback::output::{OutputAdapter, OutputCapability, TransitionCause};
pub use playback::state::{Engine, PlaybackState};
pub use playlist::core::{PlaylistCore, RepeatMode, Track};
pub use transport::{Envelope, MessageType, PeerIdentity, Transport};
