//! The Event Loop
//!
//! A single thread multiplexes the listener and every client connection
//! with level-triggered readiness polling. Each iteration:
//!
//! 1. builds the poll set from the listener plus every connection's intent
//!    bits (want-read, want-write)
//! 2. sleeps in `poll()` until readiness or the nearest deadline, whichever
//!    comes first
//! 3. accepts, reads, executes, and writes whatever became ready
//! 4. runs the timer pass: idle connections, stalled connections, and
//!    expired keys
//!
//! The poll timeout is `min(idle head, io head, ttl heap head) - now`, so
//! the loop wakes exactly when the next deadline fires and not before.
//! Command execution is synchronous; the readiness wait is the only place
//! the loop ever blocks.
//!
//! Connections are looked up by file descriptor in a flat table that grows
//! to twice the highest fd seen and is never compacted; the waste is
//! bounded by the peak fd.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsFd, AsRawFd, RawFd};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use super::conn::Conn;
use super::list::{self, DListNode};
use crate::clock;
use crate::storage::{Store, MAX_EXPIRE_WORKS};

/// Sentinel slots in the timer link arena.
const IDLE_LIST: usize = 0;
const IO_LIST: usize = 1;

/// A connection with no traffic at all is dropped after this long.
const IDLE_TIMEOUT_MS: u64 = 5_000;

/// A connection stalled mid-exchange (unsent response bytes pending) is
/// dropped after this long.
const IO_TIMEOUT_MS: u64 = 1_000;

/// Stack slice for one nonblocking read.
const READ_CHUNK: usize = 64 * 1024;

fn timer_slot(fd: RawFd) -> usize {
    fd as usize + 2
}

fn conn_mut(conns: &mut [Option<Conn>], fd: RawFd) -> Option<&mut Conn> {
    conns.get_mut(fd as usize).and_then(|slot| slot.as_mut())
}

/// The server: listener, connection table, timer lists, and the store.
/// Everything is owned by the loop thread; nothing is shared or locked.
pub struct Server {
    listener: TcpListener,
    /// Indexed by fd. Grows on demand, never compacted.
    conns: Vec<Option<Conn>>,
    /// Link arena for the idle/io lists: sentinels at 0 and 1, the
    /// connection on `fd` at `fd + 2`.
    timers: Vec<DListNode>,
    store: Store,
}

impl Server {
    /// Binds a reusable, nonblocking listener with a full backlog.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(nix::libc::SOMAXCONN)?;
        socket.set_nonblocking(true)?;
        let listener: TcpListener = socket.into();

        let mut timers = vec![DListNode::unlinked(); 2];
        list::init(&mut timers, IDLE_LIST);
        list::init(&mut timers, IO_LIST);

        Ok(Self {
            listener,
            conns: Vec::new(),
            timers,
            store: Store::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the loop until a fatal poll error. Connection-level failures
    /// never propagate past the loop; they close the one connection.
    pub fn run(&mut self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "listening");
        loop {
            self.tick()?;
        }
    }

    /// One iteration: poll, dispatch readiness, run timers.
    fn tick(&mut self) -> io::Result<()> {
        let mut poll_fds = Vec::with_capacity(self.conns.len() + 1);
        let mut order = Vec::with_capacity(self.conns.len());
        poll_fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
        for conn in self.conns.iter().flatten() {
            let mut events = PollFlags::empty();
            if conn.want_read {
                events |= PollFlags::POLLIN;
            }
            if conn.want_write {
                events |= PollFlags::POLLOUT;
            }
            order.push(conn.sock.as_raw_fd());
            poll_fds.push(PollFd::new(conn.sock.as_fd(), events));
        }

        let timeout = match self.next_timer_ms(clock::now_ms()) {
            None => PollTimeout::NONE,
            Some(ms) => {
                PollTimeout::try_from(ms.min(i32::MAX as u64) as i32).unwrap_or(PollTimeout::MAX)
            }
        };
        match poll(&mut poll_fds, timeout) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => return Ok(()),
            Err(e) => return Err(io::Error::from(e)),
        }

        let accept_ready = poll_fds[0]
            .revents()
            .unwrap_or(PollFlags::empty())
            .contains(PollFlags::POLLIN);
        let ready: Vec<(RawFd, PollFlags)> = poll_fds[1..]
            .iter()
            .zip(&order)
            .filter_map(|(pfd, &fd)| pfd.revents().map(|revents| (fd, revents)))
            .filter(|(_, revents)| !revents.is_empty())
            .collect();
        drop(poll_fds);

        if accept_ready {
            self.handle_accept();
        }
        for (fd, revents) in ready {
            if revents.contains(PollFlags::POLLIN) {
                self.handle_read(fd);
            }
            if revents.contains(PollFlags::POLLOUT) {
                self.handle_write(fd);
            }
            let failed = revents.contains(PollFlags::POLLERR);
            if failed || conn_mut(&mut self.conns, fd).is_some_and(|c| c.want_close) {
                self.destroy(fd);
            }
        }
        self.process_timers();
        Ok(())
    }

    /// Milliseconds until the nearest deadline; `None` means wait forever.
    fn next_timer_ms(&self, now_ms: u64) -> Option<u64> {
        let mut next: Option<u64> = None;
        let mut consider = |deadline: u64| {
            next = Some(next.map_or(deadline, |cur| cur.min(deadline)));
        };
        if let Some(slot) = list::front(&self.timers, IDLE_LIST) {
            if let Some(conn) = &self.conns[slot - 2] {
                consider(conn.last_active_ms + IDLE_TIMEOUT_MS);
            }
        }
        if let Some(slot) = list::front(&self.timers, IO_LIST) {
            if let Some(conn) = &self.conns[slot - 2] {
                consider(conn.last_active_ms + IO_TIMEOUT_MS);
            }
        }
        if let Some(deadline) = self.store.next_expiry() {
            consider(deadline);
        }
        next.map(|deadline| deadline.saturating_sub(now_ms))
    }

    fn handle_accept(&mut self) {
        let (sock, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!(error = %e, "accept failed");
                return;
            }
        };
        if let Err(e) = sock.set_nonblocking(true) {
            warn!(error = %e, "could not set nonblocking, dropping connection");
            return;
        }
        let fd = sock.as_raw_fd();
        info!(peer = %peer, fd, "new client");

        let idx = fd as usize;
        if self.conns.len() <= idx {
            // grow to twice the fd; slots for lower fds stay reusable
            self.conns.resize_with((idx + 1).max(idx * 2), || None);
            self.timers
                .resize(self.conns.len() + 2, DListNode::unlinked());
        }
        self.conns[idx] = Some(Conn::new(sock, clock::now_ms()));
        list::insert_before(&mut self.timers, IDLE_LIST, timer_slot(fd));
    }

    fn handle_read(&mut self, fd: RawFd) {
        let now_ms = clock::now_ms();
        let Some(conn) = conn_mut(&mut self.conns, fd) else {
            return;
        };
        conn.last_active_ms = now_ms;

        let mut buf = [0u8; READ_CHUNK];
        let n = loop {
            match conn.sock.read(&mut buf) {
                Ok(0) => {
                    // EOF; destroyed at the end of this iteration
                    conn.want_close = true;
                    return;
                }
                Ok(n) => break n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    debug!(fd, error = %e, "read failed");
                    conn.want_close = true;
                    return;
                }
            }
        };
        conn.incoming.append(&buf[..n]);

        // a request is in flight, so the stricter io deadline applies
        list::detach(&mut self.timers, timer_slot(fd));
        list::insert_before(&mut self.timers, IO_LIST, timer_slot(fd));

        conn.drain_requests(&mut self.store, now_ms);

        if !conn.outgoing.is_empty() {
            conn.want_read = false;
            conn.want_write = true;
            // the socket is usually writable right now; skipping the extra
            // poll round trip answers most requests within one iteration
            self.handle_write(fd);
        }
    }

    fn handle_write(&mut self, fd: RawFd) {
        let now_ms = clock::now_ms();
        let Some(conn) = conn_mut(&mut self.conns, fd) else {
            return;
        };
        conn.last_active_ms = now_ms;

        let n = loop {
            match conn.sock.write(conn.outgoing.data()) {
                Ok(n) => break n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => {
                    debug!(fd, error = %e, "write failed");
                    conn.want_close = true;
                    return;
                }
            }
        };
        conn.outgoing.consume(n);

        if conn.outgoing.is_empty() {
            conn.want_write = false;
            conn.want_read = true;
            list::detach(&mut self.timers, timer_slot(fd));
            list::insert_before(&mut self.timers, IDLE_LIST, timer_slot(fd));
        }
    }

    /// Closes the socket, clears the table slot, and leaves both lists.
    fn destroy(&mut self, fd: RawFd) {
        if let Some(slot) = self.conns.get_mut(fd as usize) {
            if let Some(conn) = slot.take() {
                list::detach(&mut self.timers, timer_slot(fd));
                debug!(fd, "connection closed");
                drop(conn);
            }
        }
    }

    /// Enforces the idle and io deadlines, then retires expired keys.
    fn process_timers(&mut self) {
        let now_ms = clock::now_ms();

        while let Some(slot) = list::front(&self.timers, IDLE_LIST) {
            let fd = (slot - 2) as RawFd;
            let Some(conn) = conn_mut(&mut self.conns, fd) else {
                break;
            };
            if conn.last_active_ms + IDLE_TIMEOUT_MS >= now_ms {
                break;
            }
            info!(fd, "idle timeout");
            self.destroy(fd);
        }
        while let Some(slot) = list::front(&self.timers, IO_LIST) {
            let fd = (slot - 2) as RawFd;
            let Some(conn) = conn_mut(&mut self.conns, fd) else {
                break;
            };
            if conn.last_active_ms + IO_TIMEOUT_MS >= now_ms {
                break;
            }
            info!(fd, "io timeout");
            self.destroy(fd);
        }

        self.store.sweep_expired(now_ms, MAX_EXPIRE_WORKS);
    }
}
