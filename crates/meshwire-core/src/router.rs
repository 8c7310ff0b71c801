//! Routes coordinator completions and watch firings back to whichever
//! [`Socket`] or [`Service`] issued the originating request.
//!
//! A `zookeeper`-backed [`Coordinator`] answers from a background thread;
//! only a `RequestId` and owned bytes cross that boundary (see
//! [`crate::coordinator::zk`]). This router lives entirely on the reactor
//! thread and maps a returning `RequestId` back to an `Rc`-owned object
//! graph — the one place in the fabric where that mapping happens, so
//! sockets and targets never need to hold coordinator handles of their own.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::warn;

use crate::coordinator::{CoordPayload, Coordinator, RequestId, RequestTag};
use crate::service::Service;
use crate::socket::Socket;

#[derive(Clone)]
enum Waiter {
    Socket(Rc<RefCell<Socket>>),
    Service(Rc<RefCell<Service>>),
}

pub struct CoordRouter {
    pub coord: Rc<dyn Coordinator>,
    pending: RefCell<HashMap<RequestId, (Waiter, RequestTag)>>,
}

impl CoordRouter {
    pub fn new(coord: Rc<dyn Coordinator>) -> Self {
        Self {
            coord,
            pending: RefCell::new(HashMap::new()),
        }
    }

    pub fn register_socket(&self, id: RequestId, socket: Rc<RefCell<Socket>>, tag: RequestTag) {
        self.pending
            .borrow_mut()
            .insert(id, (Waiter::Socket(socket), tag));
    }

    pub fn register_service(&self, id: RequestId, service: Rc<RefCell<Service>>, tag: RequestTag) {
        self.pending
            .borrow_mut()
            .insert(id, (Waiter::Service(service), tag));
    }

    /// Drops a pending registration outright, with no dispatch. Used when a
    /// watched call is superseded by a fresh one for the same target before
    /// its old watch ever fires (§3 invariant 5: at most one outstanding
    /// watch per target) — the stale id would otherwise never be cleaned up,
    /// since a watched call's entry is never removed by `dispatch_ready`
    /// itself (see below).
    pub fn forget(&self, id: RequestId) {
        self.pending.borrow_mut().remove(&id);
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Drain every event the coordinator has queued and dispatch it to its
    /// waiter.
    ///
    /// An unwatched GET or advertise create yields exactly one event for its
    /// `RequestId`, so its entry is removed right after dispatch. A watched
    /// LIST or manifest GET can yield its own completion *and*, arbitrarily
    /// later, one or more watch firings on the same id (§8 S5's "storm") —
    /// so those entries are left in place for `Socket::start_list` /
    /// `Service`'s re-watch path to explicitly [`CoordRouter::forget`] once
    /// they issue the next watched call for that target.
    pub fn dispatch_ready(&self) {
        for event in self.coord.drain_events() {
            let entry = self.pending.borrow().get(&event.id).cloned();
            let Some((waiter, tag)) = entry else {
                warn!(target: "zsock", request_id = %event.id, "coordinator event for unknown or already-forgotten request");
                continue;
            };

            let watched_call = matches!(
                tag,
                RequestTag::TargetList { .. } | RequestTag::ServiceManifest
            );
            if !watched_call {
                self.pending.borrow_mut().remove(&event.id);
            }

            match waiter {
                Waiter::Socket(socket) => Socket::on_coord_event(&socket, &tag, event.payload, self),
                Waiter::Service(service) => Service::on_coord_event(&service, &tag, event.payload, self),
            }
        }
    }
}
