//! `pipe <kind> <peer-fullname>` — reads lines from stdin non-blocking,
//! strips trailing ASCII whitespace, and sends one message per line to the
//! discovered peer (§4.10, §8 S6). EOF or a stdin read error triggers
//! cooperative stop.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use meshwire_config::InfraConfig;
use meshwire_core::ClientEnv;
use meshwire_proto::{resolve_kind, PollMask};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd;

/// Send one stdin line per message to a discovered peer.
#[derive(Parser)]
#[command(name = "pipe", version, about)]
struct Cli {
    /// Socket kind this end presents as: pub, sub, push, or pull.
    kind: String,

    /// Fully-qualified peer name to connect to, e.g. "echo.in".
    peer_fullname: String,

    /// Path to a meshwire.toml config file (overrides ./meshwire.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Lines staged for sending because the socket wasn't output-ready when
/// they arrived; flushed as output readiness permits.
type PendingLines = Rc<RefCell<VecDeque<String>>>;

use meshwire_cli::strip_trailing_ascii_whitespace;

fn flush_pending(sock: &mut meshwire_core::Socket, pending: &PendingLines) {
    while sock.ready() {
        let next = pending.borrow_mut().pop_front();
        match next {
            Some(line) => {
                if let Err(e) = sock.zmq.send(line.as_bytes(), 0) {
                    tracing::warn!(target: "zsock", error = %e, "send failed, dropping line");
                }
            }
            None => break,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let infra = InfraConfig::load_from(cli.config.as_deref());
    meshwire_cli::init_tracing(&infra);

    let kind = resolve_kind(&format!("zmq:{}", cli.kind)).with_context(|| format!("unknown socket kind {:?}", cli.kind))?;
    let identity = meshwire_cli::resolve_identity(&infra);

    let env = ClientEnv::create(
        &infra.coordinator.connect,
        meshwire_cli::session_timeout(&infra),
        &identity,
        kind,
        &cli.peer_fullname,
    )
    .context("failed to build client environment")?;

    let pending: PendingLines = Rc::new(RefCell::new(VecDeque::new()));
    {
        let pending = pending.clone();
        env.socket.borrow_mut().on_ready_out = Some(Box::new(move |sock| flush_pending(sock, &pending)));
    }

    let stdin_fd: RawFd = 0;
    fcntl(unsafe { std::os::fd::BorrowedFd::borrow_raw(stdin_fd) }, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))
        .context("failed to set stdin non-blocking")?;

    let socket = env.socket.clone();
    let reactor = env.reactor.clone();
    let leftover = Rc::new(RefCell::new(Vec::<u8>::new()));
    {
        let pending = pending.clone();
        let leftover = leftover.clone();
        env.reactor.add_fd(stdin_fd, PollMask::IN, move |_events| {
            let mut buf = [0u8; 4096];
            let mut eof = false;
            loop {
                match unistd::read(stdin_fd, &mut buf) {
                    Ok(0) => {
                        eof = true;
                        break;
                    }
                    Ok(n) => {
                        leftover.borrow_mut().extend_from_slice(&buf[..n]);
                        if n < buf.len() {
                            break;
                        }
                    }
                    Err(nix::errno::Errno::EAGAIN) => break,
                    Err(_) => {
                        eof = true;
                        break;
                    }
                }
            }

            let mut buffer = leftover.borrow_mut();
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line_bytes);
                let trimmed = strip_trailing_ascii_whitespace(&line);
                if !trimmed.is_empty() {
                    pending.borrow_mut().push_back(trimmed.to_string());
                }
            }
            drop(buffer);

            flush_pending(&mut socket.borrow_mut(), &pending);

            if eof {
                let remaining = leftover.borrow();
                if !remaining.is_empty() {
                    let line = String::from_utf8_lossy(&remaining);
                    let trimmed = strip_trailing_ascii_whitespace(&line);
                    if !trimmed.is_empty() {
                        pending.borrow_mut().push_back(trimmed.to_string());
                    }
                }
                drop(remaining);
                flush_pending(&mut socket.borrow_mut(), &pending);
                reactor.stop();
            }
        });
    }

    env.reactor.run().context("reactor exited with an error")?;
    Ok(())
}
