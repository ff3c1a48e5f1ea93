//! Leader election (spec §4.4 "Coordinator").
//!
//! Grounded on the corpus's `SyncManager::set_leader`/leader-is-authoritative
//! split, generalized to a real claim/ack handshake: spec.md left two Open
//! Questions this module resolves directly —
//!
//! 1. a leadership claim is resolved by last-claim-wins, ties broken by
//!    `(sent_at_millis, sender_id)` compared as a tuple (a later claim always
//!    supersedes an earlier one; same-millisecond claims are broken by the
//!    larger peer id) — see [`Coordinator::consider_claim`].
//! 2. the source's per-call "isProcessingRemote" reentrancy flag becomes one
//!    ambient token per instance, acquired via [`Coordinator::begin_remote_dispatch`]
//!    and released on drop — see [`RemoteGuard`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::transport::{Envelope, MessageType, PeerIdentity, Payload, Transport};

/// Whether this instance currently believes it is the leader of its channel
/// (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Claim {
    sent_at_millis: u64,
    sender_id: PeerIdentity,
}

impl Claim {
    /// `(sent_at_millis, sender_id)` compared as a tuple: the resolution for
    /// spec.md's tie-break Open Question.
    fn priority(&self) -> (u64, u128) {
        (self.sent_at_millis, self.sender_id.as_u128())
    }

    fn supersedes(&self, other: &Claim) -> bool {
        self.priority() > other.priority()
    }
}

struct State {
    role: Role,
    known_leader: Option<PeerIdentity>,
    pending_claim: Option<Claim>,
    last_leader_seen_millis: Option<u64>,
}

/// Leader election for one instance's channel (spec §4.4).
pub struct Coordinator {
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    state: Mutex<State>,
    processing_remote: AtomicBool,
}

impl Coordinator {
    pub fn new(transport: Arc<dyn Transport>, config: SyncConfig) -> Arc<Self> {
        Arc::new(Self {
            transport,
            config,
            state: Mutex::new(State {
                role: Role::Follower,
                known_leader: None,
                pending_claim: None,
                last_leader_seen_millis: None,
            }),
            processing_remote: AtomicBool::new(false),
        })
    }

    pub fn local_peer_id(&self) -> PeerIdentity {
        self.transport.local_peer_id()
    }

    pub fn role(&self) -> Role {
        self.state.lock().role
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.role(), Role::Leader)
    }

    pub fn known_leader(&self) -> Option<PeerIdentity> {
        self.state.lock().known_leader
    }

    /// Begin processing a remotely-originated command. While the returned
    /// guard is alive, [`Coordinator::is_processing_remote`] reports `true` so
    /// [`crate::instance::Instance`] can tell its own locally-observed
    /// `Engine`/`PlaylistCore` events not to re-broadcast what was itself just
    /// applied from the network (spec §4.8, Open Question #2).
    pub fn begin_remote_dispatch(&self) -> RemoteGuard<'_> {
        self.processing_remote.store(true, Ordering::SeqCst);
        RemoteGuard {
            flag: &self.processing_remote,
        }
    }

    pub fn is_processing_remote(&self) -> bool {
        self.processing_remote.load(Ordering::SeqCst)
    }

    /// Broadcast a claim for leadership and schedule its own resolution after
    /// `leadership_handshake_timeout_ms` (spec §4.4 `claimLeadership`).
    pub async fn claim_leadership(self: &Arc<Self>, now_millis: u64) -> Result<()> {
        let claim = Claim {
            sent_at_millis: now_millis,
            sender_id: self.local_peer_id(),
        };
        if !self.consider_claim(claim) {
            // A higher-priority claim is already pending; ours would lose the
            // handshake anyway, so don't bother broadcasting it.
            return Ok(());
        }
        self.transport
            .broadcast(Envelope::new(
                MessageType::LeadershipClaim,
                Payload::default(),
                self.local_peer_id(),
                now_millis,
            ))
            .await?;
        self.schedule_resolution(claim);
        Ok(())
    }

    /// Handle an incoming coordination envelope. No-ops for message types
    /// this module doesn't own (spec §4.5/§4.7 own the rest).
    pub async fn handle_envelope(self: &Arc<Self>, envelope: &Envelope, now_millis: u64) {
        match envelope.message_type {
            MessageType::LeadershipClaim => {
                let claim = Claim {
                    sent_at_millis: envelope.sent_at_millis,
                    sender_id: envelope.sender_id,
                };
                if self.consider_claim(claim) {
                    self.schedule_resolution(claim);
                }
            }
            MessageType::LeadershipAck => {
                let mut state = self.state.lock();
                if envelope.sender_id != self.local_peer_id() {
                    state.role = Role::Follower;
                    state.known_leader = Some(envelope.sender_id);
                    state.last_leader_seen_millis = Some(now_millis);
                }
            }
            MessageType::Play | MessageType::Pause | MessageType::StateUpdate => {
                if self.known_leader() == Some(envelope.sender_id) {
                    self.state.lock().last_leader_seen_millis = Some(now_millis);
                }
            }
            _ => {}
        }
    }

    /// Record a claim if it outranks whatever is currently pending. Returns
    /// `true` when the caller should (re)schedule a resolution for it.
    fn consider_claim(&self, claim: Claim) -> bool {
        let mut state = self.state.lock();
        let should_replace = match state.pending_claim {
            Some(existing) => claim.supersedes(&existing),
            None => true,
        };
        if should_replace {
            state.pending_claim = Some(claim);
        }
        should_replace
    }

    fn schedule_resolution(self: &Arc<Self>, claim: Claim) {
        let this = Arc::clone(self);
        let timeout = Duration::from_millis(this.config.leadership_handshake_timeout_ms);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            this.resolve_claim(claim).await;
        });
    }

    async fn resolve_claim(self: Arc<Self>, claim: Claim) {
        let still_best = {
            let state = self.state.lock();
            state.pending_claim == Some(claim)
        };
        if !still_best {
            // A later (or tie-broken-higher) claim has since superseded this
            // one; whoever owns that claim will resolve it instead.
            return;
        }
        if claim.sender_id == self.local_peer_id() {
            {
                let mut state = self.state.lock();
                state.role = Role::Leader;
                state.known_leader = Some(claim.sender_id);
            }
            tracing::info!(target: "coordinator", peer = %claim.sender_id, "self-promoted to leader");
            let _ = self
                .transport
                .broadcast(Envelope::new(
                    MessageType::LeadershipAck,
                    Payload::default(),
                    self.local_peer_id(),
                    claim.sent_at_millis,
                ))
                .await;
        } else {
            let mut state = self.state.lock();
            state.role = Role::Follower;
            state.known_leader = Some(claim.sender_id);
        }
    }

    /// Has the known leader gone quiet for longer than `timeout_ms`? A
    /// follower with no leader activity recorded yet is not considered lost —
    /// it simply hasn't heard anything yet (spec §4.4).
    pub fn leader_considered_lost(&self, now_millis: u64, timeout_ms: u64) -> bool {
        let state = self.state.lock();
        match (state.known_leader, state.last_leader_seen_millis) {
            (Some(_), Some(last_seen)) => now_millis.saturating_sub(last_seen) > timeout_ms,
            _ => false,
        }
    }

    pub fn auto_claim_enabled(&self) -> bool {
        self.config.auto_claim_leadership_if_none
    }
}

/// Held while a remotely-originated command is being applied locally (spec
/// §4.8, Open Question #2). Releases automatically on drop so every exit path
/// clears it, mirroring [`crate::event::Subscription`]'s guard pattern.
#[must_use = "dropping this immediately ends the remote-dispatch window"]
pub struct RemoteGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RemoteGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
