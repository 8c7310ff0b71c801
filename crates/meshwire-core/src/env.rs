//! Entry environments (§4.7): the wiring a CLI entry point needs to go from
//! zero to a running reactor — coordinator handle, transport context,
//! reactor, router, and either a bare client socket or a full service.
//!
//! Both environments install cooperative-stop signal handling the same way:
//! `SIGINT`/`SIGQUIT`/`SIGTERM` are registered via `signal-hook`'s self-pipe
//! (`low_level::pipe::register`), and the write end is polled by the
//! reactor as an ordinary raw fd, so signal delivery goes through the same
//! single-logical-task path as every other event (§5).

use std::os::unix::io::{IntoRawFd, RawFd};
use std::rc::Rc;

use meshwire_proto::{Kind, PollMask};
use nix::unistd;
use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use thiserror::Error;
use tracing::info;

use crate::coordinator::zk::ZkCoordinator;
use crate::identity::Identity;
use crate::reactor::Reactor;
use crate::router::CoordRouter;
use crate::service::Service;
use crate::socket::{Socket, SocketError};
use crate::target::Target;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("coordinator connect failed: {0}")]
    Coordinator(#[from] crate::coordinator::CoordError),
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
    #[error("signal handler registration failed: {0}")]
    Signal(String),
}

/// Registers the self-pipe signal handlers and hands the reactor the read
/// end as a raw fd source. Any of `SIGINT`/`SIGQUIT`/`SIGTERM` being raised
/// is enough to call `reactor.stop()`; the handler doesn't care which.
fn install_signal_handlers(reactor: &Reactor) -> Result<(), EnvError> {
    let (reader, writer) = unistd::pipe().map_err(|e| EnvError::Signal(format!("self-pipe: {e}")))?;
    nix::fcntl::fcntl(&reader, nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK))
        .map_err(|e| EnvError::Signal(format!("self-pipe nonblock: {e}")))?;
    let reader_fd: RawFd = reader.into_raw_fd();
    let writer_fd: RawFd = writer.into_raw_fd();

    for sig in [SIGINT, SIGQUIT, SIGTERM] {
        signal_hook::low_level::pipe::register(sig, writer_fd)
            .map_err(|e| EnvError::Signal(format!("register {sig}: {e}")))?;
    }

    reactor.add_fd(reader_fd, PollMask::IN, move |_events| {
        let mut buf = [0u8; 64];
        loop {
            match unistd::read(reader_fd, &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) if n < buf.len() => break,
                Ok(_) => continue,
            }
        }
        info!(target: "zsock", "stop signal received");
    });

    Ok(())
}

/// Everything a `pipe` CLI entry point needs: a reactor driving one
/// configured socket connected to a single peer type with policy `"all"`.
pub struct ClientEnv {
    pub coord: Rc<ZkCoordinator>,
    pub zmq_ctx: zmq::Context,
    pub reactor: Rc<Reactor>,
    pub router: Rc<CoordRouter>,
    pub socket: Rc<std::cell::RefCell<Socket>>,
}

impl ClientEnv {
    pub fn create(
        connect_string: &str,
        session_timeout: std::time::Duration,
        identity: &Identity,
        kind: Kind,
        peer_fullname: &str,
    ) -> Result<Self, EnvError> {
        let coord = Rc::new(ZkCoordinator::connect(connect_string, session_timeout, "zk")?);
        let router = Rc::new(CoordRouter::new(coord.clone()));
        let reactor = Rc::new(Reactor::new(router.clone()));
        install_signal_handlers(&reactor)?;

        let zmq_ctx = zmq::Context::new();
        let mut sock = Socket::new("client", kind, identity.uuid.clone(), identity.cell.clone(), &zmq_ctx)?;
        sock.targets
            .insert(peer_fullname.to_string(), Target::new(peer_fullname, "all"));
        let socket = Rc::new(std::cell::RefCell::new(sock));
        Socket::register_in_reactor(&socket, &reactor, &router);

        Ok(Self {
            coord,
            zmq_ctx,
            reactor,
            router,
            socket,
        })
    }
}

/// Everything a `service` CLI entry point needs: a reactor driving a
/// `Service` whose socket tree materializes once its manifest is fetched.
pub struct ServiceEnv {
    pub coord: Rc<ZkCoordinator>,
    pub zmq_ctx: zmq::Context,
    pub reactor: Rc<Reactor>,
    pub router: Rc<CoordRouter>,
    pub service: Rc<std::cell::RefCell<Service>>,
}

impl ServiceEnv {
    pub fn create(
        connect_string: &str,
        session_timeout: std::time::Duration,
        identity: &Identity,
        srvtype: &str,
    ) -> Result<Self, EnvError> {
        let coord = Rc::new(ZkCoordinator::connect(connect_string, session_timeout, "zk")?);
        let router = Rc::new(CoordRouter::new(coord.clone()));
        let reactor = Rc::new(Reactor::new(router.clone()));
        install_signal_handlers(&reactor)?;

        let zmq_ctx = zmq::Context::new();
        let service = Service::create(
            srvtype,
            identity.uuid.clone(),
            identity.cell.clone(),
            zmq_ctx.clone(),
            reactor.clone(),
        )?;
        Service::register_in_reactor(&service, &router);

        Ok(Self {
            coord,
            zmq_ctx,
            reactor,
            router,
            service,
        })
    }
}
