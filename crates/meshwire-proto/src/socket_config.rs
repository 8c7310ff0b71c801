//! Centralized ZMQ socket configuration for the meshwire fabric.
//!
//! All socket creation goes through these helpers so that every socket in
//! the fabric carries the same linger/reconnect behavior, however it is
//! eventually bound or connected by the reconciler.

use crate::Kind;

/// Default `ZMQ_LINGER`: drop unsent messages immediately on close rather
/// than blocking teardown on delivery.
pub const DEFAULT_LINGER_MS: i32 = 0;

/// `ZMQ_RECONNECT_IVL`: first reconnect attempt delay.
pub const DEFAULT_RECONNECT_IVL_MS: i32 = 100;

/// `ZMQ_RECONNECT_IVL_MAX`: reconnect backoff ceiling.
pub const DEFAULT_RECONNECT_IVL_MAX_MS: i32 = 5_000;

/// Create a socket of the given kind in `ctx`, with the fabric's standard
/// socket options applied. Does not bind or connect it.
pub fn create_socket(ctx: &zmq::Context, kind: Kind) -> Result<zmq::Socket, zmq::Error> {
    let sock = ctx.socket(kind.zmq_type())?;
    sock.set_linger(DEFAULT_LINGER_MS)?;
    sock.set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)?;
    sock.set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)?;
    if kind == Kind::Sub {
        // Subscribe to everything; per-topic filtering is out of scope.
        sock.set_subscribe(b"")?;
    }
    Ok(sock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_each_kind() {
        let ctx = zmq::Context::new();
        for kind in [Kind::Pub, Kind::Sub, Kind::Push, Kind::Pull] {
            create_socket(&ctx, kind).expect("socket creation should succeed");
        }
    }
}
