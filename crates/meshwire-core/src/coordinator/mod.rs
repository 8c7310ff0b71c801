//! Coordinator client abstraction.
//!
//! The reconciler and service never talk to ZooKeeper directly; they go
//! through the [`Coordinator`] trait, dispatching one `list`, `get` or
//! `create_ephemeral_sequential` call at a time and getting back a
//! [`RequestId`] they hand to a [`CoordRouter`] so that the eventual
//! [`CoordEvent`] can be routed back to the right [`crate::socket::Socket`]
//! or [`crate::service::Service`].
//!
//! Real coordinator implementations (see [`zk`]) own a background I/O
//! thread; only [`RequestId`]s and owned bytes cross that thread boundary,
//! never the application's `Rc`-based object graph (see module docs on
//! [`crate::router`]).

pub mod fake;
pub mod zk;

use std::fmt;
use thiserror::Error;

/// Opaque identifier for one outstanding coordinator request.
///
/// Generated by the coordinator implementation at dispatch time and handed
/// back to the caller synchronously; the caller uses it only to register a
/// waiter with a [`crate::router::CoordRouter`], never to inspect its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Failure talking to the coordinator.
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("coordinator session not connected")]
    NotConnected,
    #[error("no such node: {0}")]
    NoNode(String),
    #[error("coordinator call failed: {0}")]
    Other(String),
}

/// What a [`RequestId`] was issued for; carried alongside the eventual
/// [`CoordEvent`] so the router knows which piece of state to update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTag {
    /// Watched GET on `/services/<srvtype>`.
    ServiceManifest,
    /// Watched LIST (get-children) on `/listen/<peerType>`.
    TargetList { peer_type: String },
    /// Unwatched GET on `/listen/<peerType>/<child>`.
    TargetGet { peer_type: String, child: String },
    /// Ephemeral-sequential CREATE under `/listen/<fullname>/`.
    Advertise { bind_url: String },
}

/// The payload half of a [`CoordEvent`]: what actually happened.
#[derive(Debug)]
pub enum CoordPayload {
    Children(Result<Vec<String>, CoordError>),
    Data(Result<Vec<u8>, CoordError>),
    Created(Result<String, CoordError>),
    /// The watch registered alongside the originating call fired: children
    /// changed, node deleted, or a session/connection state transition.
    WatchFired,
}

/// One coordinator completion or watch firing, drained from the adapter's
/// internal channel on the reactor thread.
#[derive(Debug)]
pub struct CoordEvent {
    pub id: RequestId,
    pub payload: CoordPayload,
}

/// Abstraction over a coordinator client (ZooKeeper in production, an
/// in-memory fake in tests).
///
/// Every method either returns `Ok(RequestId)` — the request was handed to
/// the underlying client for dispatch and a [`CoordEvent`] carrying that id
/// will eventually arrive — or `Err` if dispatch itself failed synchronously
/// (session down, etc). Per §7's counter discipline: callers must only
/// increment a pending counter on `Ok`.
pub trait Coordinator {
    /// Watched GET on `path`. Used for service manifests.
    fn get_watch(&self, path: &str) -> Result<RequestId, CoordError>;

    /// Watched LIST (get-children) on `path`. Used by targets.
    fn list_watch(&self, path: &str) -> Result<RequestId, CoordError>;

    /// Unwatched GET on `path`. Used to fetch one listen record.
    fn get(&self, path: &str) -> Result<RequestId, CoordError>;

    /// Create an ephemeral, sequenced child of `parent` with `data`,
    /// creating `parent` itself (persistent) first if necessary.
    fn create_ephemeral_sequential(
        &self,
        parent: &str,
        data: Vec<u8>,
    ) -> Result<RequestId, CoordError>;

    /// Drain every [`CoordEvent`] that has arrived since the last call.
    /// Called by the reactor's self-pipe handler; never blocks.
    fn drain_events(&self) -> Vec<CoordEvent>;

    /// Raw fd the reactor should poll for readability to know when
    /// `drain_events` has something for it (the self-pipe's read end).
    fn wake_fd(&self) -> std::os::unix::io::RawFd;

    /// Seconds until the coordinator's next internal deadline (session
    /// keepalive, etc), if any. The reactor caps this at 60s regardless.
    fn next_deadline_secs(&self) -> Option<f64>;
}
