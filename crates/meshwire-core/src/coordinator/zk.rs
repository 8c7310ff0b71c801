//! ZooKeeper-backed [`Coordinator`].
//!
//! The `zookeeper` crate's data/children calls block the calling thread
//! until the server replies, and its watch callbacks fire from the crate's
//! own internal event thread. Neither fact matches the reactor's
//! single-threaded, non-blocking model, so every dispatch here is handed to
//! a short-lived worker thread; the worker (and the crate's own watcher
//! callback, separately) report back by sending a [`CoordEvent`] down an
//! `mpsc` channel and writing one byte to a self-pipe that the reactor polls
//! as a raw fd (see [`crate::reactor`]). This is the one deliberate
//! adaptation from an "ask the client for an fd" model that the
//! `zookeeper` crate simply doesn't expose.

use std::cell::{Cell, RefCell};
use std::os::unix::io::{IntoRawFd, RawFd};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::unistd;
use tracing::{debug, warn};
use zookeeper::{Acl, CreateMode, WatchedEvent, Watcher, ZkError, ZkResult, ZkState, ZooKeeper};

use super::{CoordError, CoordEvent, CoordPayload, Coordinator, RequestId};

/// Session-level watcher; only logs. Per-path watches are separate closures
/// registered alongside each `*_w` call.
struct SessionWatcher {
    domain: &'static str,
}

impl Watcher for SessionWatcher {
    fn handle(&self, event: WatchedEvent) {
        debug!(target: "zk", domain = self.domain, ?event, "session watcher event");
    }
}

fn map_zk_err(e: ZkError) -> CoordError {
    match e {
        ZkError::NoNode => CoordError::NoNode("<path>".to_string()),
        ZkError::ConnectionLoss | ZkError::SessionExpired => CoordError::NotConnected,
        other => CoordError::Other(other.to_string()),
    }
}

fn wake(fd: RawFd) {
    // Best-effort: if the pipe is full the reactor is already scheduled to
    // wake up and drain it, so a dropped byte costs nothing.
    let _ = unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, &[1u8]);
}

/// Coordinator backed by a live ZooKeeper ensemble.
pub struct ZkCoordinator {
    zk: Arc<ZooKeeper>,
    tx: mpsc::Sender<CoordEvent>,
    rx: RefCell<mpsc::Receiver<CoordEvent>>,
    next_id: Cell<u64>,
    wake_reader: RawFd,
    wake_writer: RawFd,
}

impl ZkCoordinator {
    /// Connect to `connect_string` (e.g. `"127.0.0.1:2181"`) with the given
    /// session timeout. `domain` is the `tracing` target used for session
    /// watcher log lines (conventionally `"zk"`).
    pub fn connect(
        connect_string: &str,
        session_timeout: Duration,
        domain: &'static str,
    ) -> Result<Self, CoordError> {
        let zk = ZooKeeper::connect(connect_string, session_timeout, SessionWatcher { domain })
            .map_err(|e| CoordError::Other(e.to_string()))?;
        let (tx, rx) = mpsc::channel();
        let (wake_reader, wake_writer) =
            unistd::pipe().map_err(|e| CoordError::Other(format!("self-pipe: {e}")))?;
        nix::fcntl::fcntl(
            &wake_reader,
            nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
        )
        .map_err(|e| CoordError::Other(format!("self-pipe nonblock: {e}")))?;
        Ok(Self {
            zk: Arc::new(zk),
            tx,
            rx: RefCell::new(rx),
            next_id: Cell::new(0),
            wake_reader: wake_reader.into_raw_fd(),
            wake_writer: wake_writer.into_raw_fd(),
        })
    }

    fn ensure_connected(&self) -> Result<(), CoordError> {
        match self.zk.get_state() {
            ZkState::Connected | ZkState::ConnectedReadOnly => Ok(()),
            _ => Err(CoordError::NotConnected),
        }
    }

    fn next_request_id(&self) -> RequestId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        RequestId(id)
    }
}

impl Coordinator for ZkCoordinator {
    fn get_watch(&self, path: &str) -> Result<RequestId, CoordError> {
        self.ensure_connected()?;
        let id = self.next_request_id();
        let zk = self.zk.clone();
        let path = path.to_string();
        let tx_call = self.tx.clone();
        let tx_watch = self.tx.clone();
        let wake_fd = self.wake_writer;
        thread::spawn(move || {
            let result: ZkResult<(Vec<u8>, zookeeper::Stat)> = zk.get_data_w(&path, move |_e| {
                let _ = tx_watch.send(CoordEvent {
                    id,
                    payload: CoordPayload::WatchFired,
                });
                wake(wake_fd);
            });
            let payload = match result {
                Ok((data, _stat)) => CoordPayload::Data(Ok(data)),
                Err(e) => CoordPayload::Data(Err(map_zk_err(e))),
            };
            let _ = tx_call.send(CoordEvent { id, payload });
            wake(wake_fd);
        });
        Ok(id)
    }

    fn list_watch(&self, path: &str) -> Result<RequestId, CoordError> {
        self.ensure_connected()?;
        let id = self.next_request_id();
        let zk = self.zk.clone();
        let path = path.to_string();
        let tx_call = self.tx.clone();
        let tx_watch = self.tx.clone();
        let wake_fd = self.wake_writer;
        thread::spawn(move || {
            let result: ZkResult<Vec<String>> = zk.get_children_w(&path, move |_e| {
                let _ = tx_watch.send(CoordEvent {
                    id,
                    payload: CoordPayload::WatchFired,
                });
                wake(wake_fd);
            });
            let payload = match result {
                Ok(children) => CoordPayload::Children(Ok(children)),
                Err(e) => CoordPayload::Children(Err(map_zk_err(e))),
            };
            let _ = tx_call.send(CoordEvent { id, payload });
            wake(wake_fd);
        });
        Ok(id)
    }

    fn get(&self, path: &str) -> Result<RequestId, CoordError> {
        self.ensure_connected()?;
        let id = self.next_request_id();
        let zk = self.zk.clone();
        let path = path.to_string();
        let tx = self.tx.clone();
        let wake_fd = self.wake_writer;
        thread::spawn(move || {
            let result = zk.get_data(&path, false);
            let payload = match result {
                Ok((data, _stat)) => CoordPayload::Data(Ok(data)),
                Err(e) => CoordPayload::Data(Err(map_zk_err(e))),
            };
            let _ = tx.send(CoordEvent { id, payload });
            wake(wake_fd);
        });
        Ok(id)
    }

    fn create_ephemeral_sequential(
        &self,
        parent: &str,
        data: Vec<u8>,
    ) -> Result<RequestId, CoordError> {
        self.ensure_connected()?;
        let id = self.next_request_id();
        let zk = self.zk.clone();
        let parent = parent.trim_end_matches('/').to_string();
        let tx = self.tx.clone();
        let wake_fd = self.wake_writer;
        thread::spawn(move || {
            // The listen container is persistent and shared by every
            // advertiser; NodeExists on a racing first-create is expected.
            match zk.create(&parent, vec![], Acl::open_unsafe().clone(), CreateMode::Persistent) {
                Ok(_) | Err(ZkError::NodeExists) => {}
                Err(e) => warn!(target: "zsock", path = %parent, error = %e, "failed to create listen container"),
            }
            let child_prefix = format!("{parent}/");
            let result = zk.create(
                &child_prefix,
                data,
                Acl::open_unsafe().clone(),
                CreateMode::EphemeralSequential,
            );
            let payload = match result {
                Ok(full_path) => CoordPayload::Created(Ok(full_path)),
                Err(e) => CoordPayload::Created(Err(map_zk_err(e))),
            };
            let _ = tx.send(CoordEvent { id, payload });
            wake(wake_fd);
        });
        Ok(id)
    }

    fn drain_events(&self) -> Vec<CoordEvent> {
        let rx = self.rx.borrow_mut();
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        // Drain the self-pipe too; its only job is to make the fd readable.
        let mut buf = [0u8; 64];
        loop {
            match unistd::read(self.wake_reader, &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) if n < buf.len() => break,
                Ok(_) => continue,
            }
        }
        events
    }

    fn wake_fd(&self) -> RawFd {
        self.wake_reader
    }

    fn next_deadline_secs(&self) -> Option<f64> {
        // zookeeper-rs pings the session from its own internal thread, so
        // the reactor doesn't need to drive session keepalive itself; the
        // 60s idle cap in Reactor::run is the only bound that applies here.
        None
    }
}
