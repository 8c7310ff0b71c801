//! meshwire-core — the dynamic endpoint-reconciliation engine.
//!
//! A single-threaded reactor drives a coordinator client, any number of
//! messaging sockets, and raw file descriptors under one poll loop; sockets
//! reconcile their connection set against a coordinator-hosted listing as
//! peers come and go, and services load their socket tree from a
//! coordinator-hosted manifest. See each module for its piece of the model.

pub mod coordinator;
pub mod env;
pub mod identity;
pub mod reactor;
pub mod router;
pub mod service;
pub mod socket;
pub mod target;

pub use coordinator::{CoordError, Coordinator, RequestId};
pub use env::{ClientEnv, EnvError, ServiceEnv};
pub use identity::Identity;
pub use reactor::{Reactor, ReactorError};
pub use router::CoordRouter;
pub use service::Service;
pub use socket::{Socket, SocketError};
pub use target::Target;
