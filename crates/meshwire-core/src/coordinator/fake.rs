//! In-memory [`Coordinator`] double for tests.
//!
//! Dispatch is recorded but nothing completes on its own: tests drive the
//! reconciler state machine by calling [`FakeCoordinator::complete_children`],
//! [`FakeCoordinator::complete_data`], [`FakeCoordinator::complete_created`]
//! and [`FakeCoordinator::fire_watch`] in whatever order (or storm) they
//! want to exercise, then call [`Coordinator::drain_events`] the same way
//! the reactor would.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::os::unix::io::{BorrowedFd, IntoRawFd, RawFd};

use nix::unistd;

use super::{CoordError, CoordEvent, CoordPayload, Coordinator, RequestId};

/// One call a test can assert was (or wasn't) issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchedCall {
    GetWatch(String),
    ListWatch(String),
    Get(String),
    Create(String),
}

pub struct FakeCoordinator {
    next_id: Cell<u64>,
    events: RefCell<VecDeque<CoordEvent>>,
    dispatched: RefCell<Vec<DispatchedCall>>,
    connected: Cell<bool>,
    wake_reader: RawFd,
    wake_writer: RawFd,
}

impl FakeCoordinator {
    pub fn new() -> Self {
        let (wake_reader, wake_writer) = unistd::pipe().expect("self-pipe for fake coordinator");
        nix::fcntl::fcntl(
            &wake_reader,
            nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
        )
        .expect("set self-pipe nonblocking");
        Self {
            next_id: Cell::new(0),
            events: RefCell::new(VecDeque::new()),
            dispatched: RefCell::new(Vec::new()),
            connected: Cell::new(true),
            wake_reader: wake_reader.into_raw_fd(),
            wake_writer: wake_writer.into_raw_fd(),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.set(connected);
    }

    pub fn dispatched(&self) -> Vec<DispatchedCall> {
        self.dispatched.borrow().clone()
    }

    pub fn complete_children(&self, id: RequestId, result: Result<Vec<String>, CoordError>) {
        self.push(CoordEvent {
            id,
            payload: CoordPayload::Children(result),
        });
    }

    pub fn complete_data(&self, id: RequestId, result: Result<Vec<u8>, CoordError>) {
        self.push(CoordEvent {
            id,
            payload: CoordPayload::Data(result),
        });
    }

    pub fn complete_created(&self, id: RequestId, result: Result<String, CoordError>) {
        self.push(CoordEvent {
            id,
            payload: CoordPayload::Created(result),
        });
    }

    pub fn fire_watch(&self, id: RequestId) {
        self.push(CoordEvent {
            id,
            payload: CoordPayload::WatchFired,
        });
    }

    fn push(&self, event: CoordEvent) {
        self.events.borrow_mut().push_back(event);
        let _ = unistd::write(unsafe { BorrowedFd::borrow_raw(self.wake_writer) }, &[1u8]);
    }

    fn next_request_id(&self) -> RequestId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        RequestId(id)
    }
}

impl Default for FakeCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator for FakeCoordinator {
    fn get_watch(&self, path: &str) -> Result<RequestId, CoordError> {
        if !self.connected.get() {
            return Err(CoordError::NotConnected);
        }
        self.dispatched
            .borrow_mut()
            .push(DispatchedCall::GetWatch(path.to_string()));
        Ok(self.next_request_id())
    }

    fn list_watch(&self, path: &str) -> Result<RequestId, CoordError> {
        if !self.connected.get() {
            return Err(CoordError::NotConnected);
        }
        self.dispatched
            .borrow_mut()
            .push(DispatchedCall::ListWatch(path.to_string()));
        Ok(self.next_request_id())
    }

    fn get(&self, path: &str) -> Result<RequestId, CoordError> {
        if !self.connected.get() {
            return Err(CoordError::NotConnected);
        }
        self.dispatched
            .borrow_mut()
            .push(DispatchedCall::Get(path.to_string()));
        Ok(self.next_request_id())
    }

    fn create_ephemeral_sequential(
        &self,
        parent: &str,
        _data: Vec<u8>,
    ) -> Result<RequestId, CoordError> {
        if !self.connected.get() {
            return Err(CoordError::NotConnected);
        }
        self.dispatched
            .borrow_mut()
            .push(DispatchedCall::Create(parent.to_string()));
        Ok(self.next_request_id())
    }

    fn drain_events(&self) -> Vec<CoordEvent> {
        let mut out = Vec::new();
        {
            let mut events = self.events.borrow_mut();
            while let Some(e) = events.pop_front() {
                out.push(e);
            }
        }
        let mut buf = [0u8; 64];
        loop {
            match unistd::read(self.wake_reader, &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) if n < buf.len() => break,
                Ok(_) => continue,
            }
        }
        out
    }

    fn wake_fd(&self) -> RawFd {
        self.wake_reader
    }

    fn next_deadline_secs(&self) -> Option<f64> {
        None
    }
}
