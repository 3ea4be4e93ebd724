//! Leader gate: the one capability consumed from cluster coordination.
//!
//! The election protocol itself (lease in a coordination store, etc.) is an
//! environment concern. The scheduled loops only ask "may I run now?".

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether this node may run leader-only scheduled work.
///
/// Called at the start of every tick, so implementations must be cheap and
/// must not block.
pub trait LeaderGate: Send + Sync {
    fn is_leader(&self) -> bool;
}

impl<G> LeaderGate for Arc<G>
where
    G: LeaderGate + ?Sized,
{
    fn is_leader(&self) -> bool {
        (**self).is_leader()
    }
}

/// Gate for single-node deployments.
#[derive(Debug, Default, Copy, Clone)]
pub struct AlwaysLeader;

impl LeaderGate for AlwaysLeader {
    fn is_leader(&self) -> bool {
        true
    }
}

/// Gate backed by a flag that an external election mechanism flips.
#[derive(Debug, Default)]
pub struct FlagLeaderGate {
    leader: AtomicBool,
}

impl FlagLeaderGate {
    pub fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }

    pub fn set_leader(&self, leader: bool) {
        let was = self.leader.swap(leader, Ordering::SeqCst);
        if was != leader {
            tracing::info!(leader, "leadership changed");
        }
    }
}

impl LeaderGate for FlagLeaderGate {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}
