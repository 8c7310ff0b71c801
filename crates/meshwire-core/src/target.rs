//! Per-peer-type reconciler state (§4.5 of the design).
//!
//! A `Target` is owned by the [`crate::socket::Socket`] that watches it; it
//! never holds a back-reference to its socket (see the module docs on
//! [`crate::router`] for why) — the socket looks targets up by peer type
//! whenever a coordinator event needs to touch one.

use meshwire_proto::ListenRecord;

use crate::coordinator::RequestId;

/// Reconciler for one peer type a socket connects to.
#[derive(Debug)]
pub struct Target {
    pub peer_type: String,
    pub policy: String,

    /// Sorted, deduplicated — equals the keys of the owning socket's
    /// `live_connections` contributed by this target after the last applied
    /// delta.
    pub current_urls: Vec<String>,

    /// Records accumulated from in-flight GETs since the last `restart_list`.
    pub incoming_records: Vec<ListenRecord>,

    pub list_pending: u32,
    pub get_pending: u32,
    pub list_wanted: u32,

    /// The `RequestId` of this target's current outstanding LIST watch, if
    /// any. `Socket::start_list` forgets the previous id from the router
    /// before storing a new one here — at most one watch is ever registered
    /// per target (§3 invariant 5).
    pub list_request_id: Option<RequestId>,
}

impl Target {
    pub fn new(peer_type: impl Into<String>, policy: impl Into<String>) -> Self {
        Self {
            peer_type: peer_type.into(),
            policy: policy.into(),
            current_urls: Vec::new(),
            incoming_records: Vec::new(),
            list_pending: 0,
            get_pending: 0,
            list_wanted: 0,
            list_request_id: None,
        }
    }

    /// §3 invariant (4): a target may only reconcile while no list/get is
    /// outstanding and no watch fire is still owed a relist.
    pub fn is_quiescent(&self) -> bool {
        self.list_pending == 0 && self.get_pending == 0 && self.list_wanted == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_target_is_quiescent() {
        let t = Target::new("A.out", "all");
        assert!(t.is_quiescent());
        assert!(t.current_urls.is_empty());
    }

    #[test]
    fn test_pending_blocks_quiescence() {
        let mut t = Target::new("A.out", "all");
        t.list_pending = 1;
        assert!(!t.is_quiescent());
        t.list_pending = 0;
        t.get_pending = 1;
        assert!(!t.is_quiescent());
        t.get_pending = 0;
        t.list_wanted = 1;
        assert!(!t.is_quiescent());
    }
}
