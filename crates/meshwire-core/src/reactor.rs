//! Single-threaded I/O reactor (§4.1): one `zmq::poll` call multiplexing the
//! coordinator's wake fd, any other raw fds, and every registered messaging
//! socket.

use std::cell::{Cell, RefCell};
use std::os::unix::io::RawFd;
use std::rc::Rc;

use meshwire_proto::PollMask;
use thiserror::Error;
use tracing::warn;

use crate::router::CoordRouter;
use crate::socket::Socket;

/// A 60-second ceiling on idle poll latency, regardless of what the
/// coordinator reports as its next internal deadline (§5 "Cancellation and
/// timeouts") — this is what bounds how long a cooperative `SIGTERM` stop
/// can take to notice.
const MAX_POLL_SECS: f64 = 60.0;

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("poll failed: {0}")]
    Poll(#[from] zmq::Error),
}

struct FdItem {
    fd: RawFd,
    desired: PollMask,
    on_ready: RefCell<Box<dyn FnMut(PollMask)>>,
}

/// Owns the poll set and drives it to convergence.
///
/// Raw fds are polled ahead of messaging sockets in the item list (§9
/// "Dynamic interest without mutable globals" / §4.8): the coordinator's
/// wake fd is registered first, by [`Reactor::new`], so a coordinator event
/// is always dispatched before the messaging sockets it may have just
/// unblocked are polled in the same cycle.
pub struct Reactor {
    fd_items: RefCell<Vec<FdItem>>,
    zmq_items: RefCell<Vec<Rc<RefCell<Socket>>>>,
    router: Rc<CoordRouter>,
    running: Cell<bool>,
}

impl Reactor {
    pub fn new(router: Rc<CoordRouter>) -> Self {
        let reactor = Self {
            fd_items: RefCell::new(Vec::new()),
            zmq_items: RefCell::new(Vec::new()),
            router: router.clone(),
            running: Cell::new(true),
        };
        let wake_fd = router.coord.wake_fd();
        reactor.add_fd(wake_fd, PollMask::IN, move |_events| {
            router.dispatch_ready();
        });
        reactor
    }

    pub fn add_zmq(&self, socket: Rc<RefCell<Socket>>) {
        self.zmq_items.borrow_mut().push(socket);
    }

    pub fn add_fd(&self, fd: RawFd, desired: PollMask, on_ready: impl FnMut(PollMask) + 'static) {
        self.fd_items.borrow_mut().push(FdItem {
            fd,
            desired,
            on_ready: RefCell::new(Box::new(on_ready)),
        });
    }

    /// Cooperative stop: the current `run_once` finishes, then `run`'s loop
    /// exits at the next iteration boundary.
    pub fn stop(&self) {
        self.running.set(false);
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    pub fn run(&self) -> Result<(), ReactorError> {
        while self.running.get() {
            self.run_once()?;
        }
        Ok(())
    }

    fn poll_timeout_ms(&self) -> i64 {
        let deadline = self.router.coord.next_deadline_secs().unwrap_or(MAX_POLL_SECS);
        let capped = deadline.min(MAX_POLL_SECS).max(0.0);
        (capped * 1000.0) as i64
    }

    pub fn run_once(&self) -> Result<(), ReactorError> {
        let fd_count = self.fd_items.borrow().len();
        let zmq_count = self.zmq_items.borrow().len();

        let mut items: Vec<zmq::PollItem> = Vec::with_capacity(fd_count + zmq_count);
        {
            let fd_items = self.fd_items.borrow();
            for item in fd_items.iter() {
                items.push(zmq::PollItem::from_fd(item.fd, item.desired.to_zmq()));
            }
        }
        {
            let zmq_items = self.zmq_items.borrow();
            for sock in zmq_items.iter() {
                let desired = sock.borrow().desired_events.get();
                items.push(sock.borrow().zmq.as_poll_item(desired.to_zmq()));
            }
        }

        let timeout_ms = self.poll_timeout_ms();
        match zmq::poll(&mut items, timeout_ms) {
            Ok(_) => {}
            Err(zmq::Error::EINTR) => return Ok(()),
            Err(e) => return Err(ReactorError::Poll(e)),
        }

        for (idx, item) in items.iter().enumerate().take(fd_count) {
            let revents = PollMask::from_zmq(item.get_revents());
            if !revents.is_empty() {
                let fd_items = self.fd_items.borrow();
                fd_items[idx].on_ready.borrow_mut()(revents);
            }
        }
        for (idx, item) in items.iter().enumerate().skip(fd_count) {
            let revents = PollMask::from_zmq(item.get_revents());
            if revents.is_empty() {
                continue;
            }
            let sock = self.zmq_items.borrow()[idx - fd_count].clone();
            sock.borrow_mut().dispatch_ready(revents);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::fake::FakeCoordinator;

    #[test]
    fn test_new_reactor_registers_coordinator_wake_fd() {
        let fake = Rc::new(FakeCoordinator::new());
        let router = Rc::new(CoordRouter::new(fake));
        let reactor = Reactor::new(router);
        assert_eq!(reactor.fd_items.borrow().len(), 1);
    }

    #[test]
    fn test_run_once_dispatches_coordinator_wake() {
        let fake = Rc::new(FakeCoordinator::new());
        let router = Rc::new(CoordRouter::new(fake.clone()));
        let reactor = Reactor::new(router.clone());

        let id = fake.list_watch("/listen/A.out").unwrap();
        fake.complete_children(id, Ok(vec![]));

        // no waiter registered for this id; run_once should just drain it
        // without blocking or erroring.
        reactor.run_once().unwrap();
    }

    #[test]
    fn test_stop_halts_run_loop() {
        let fake = Rc::new(FakeCoordinator::new());
        let router = Rc::new(CoordRouter::new(fake));
        let reactor = Rc::new(Reactor::new(router));
        reactor.stop();
        assert!(!reactor.is_running());
        reactor.run().unwrap();
    }
}
