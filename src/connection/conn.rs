//! Per-Connection State
//!
//! One `Conn` per accepted socket: the nonblocking stream, the intent bits
//! the event loop turns into poll flags, both byte buffers, and the
//! last-activity timestamp that drives the idle and io deadlines.
//!
//! ## Lifecycle
//!
//! ```text
//! accept ──► want_read, idle list
//!    │
//!    ▼ readable
//! read ──► incoming buffer ──► drain complete frames ──► outgoing buffer
//!    │                                                        │
//!    │                    outgoing non-empty: want_write ◄────┘
//!    ▼ flushed completely
//! want_read again, back on the idle list
//!
//! EOF / I/O error / protocol error / deadline ──► destroyed
//! ```
//!
//! The outgoing buffer is unbounded on purpose: a peer that stops reading
//! makes the buffer grow, and the one-second io deadline is what cuts the
//! connection loose rather than a byte cap.

use std::net::TcpStream;

use tracing::warn;

use crate::buffer::ByteBuf;
use crate::commands;
use crate::protocol::parser::{self, HEADER_SIZE};
use crate::storage::Store;

/// Initial capacity of each per-connection buffer.
const BUF_INIT: usize = 16 * 1024;

/// State for one client connection.
pub struct Conn {
    pub sock: TcpStream,
    /// Intent bits consumed by the event loop when building the poll set.
    pub want_read: bool,
    pub want_write: bool,
    pub want_close: bool,
    pub incoming: ByteBuf,
    pub outgoing: ByteBuf,
    /// Monotonic ms of the last read or write on this socket.
    pub last_active_ms: u64,
}

impl Conn {
    pub fn new(sock: TcpStream, now_ms: u64) -> Self {
        Self {
            sock,
            want_read: true,
            want_write: false,
            want_close: false,
            incoming: ByteBuf::with_capacity(BUF_INIT),
            outgoing: ByteBuf::with_capacity(BUF_INIT),
            last_active_ms: now_ms,
        }
    }

    /// Executes every complete pipelined request sitting in the incoming
    /// buffer, in arrival order. Responses accumulate in the outgoing
    /// buffer in the same order.
    pub fn drain_requests(&mut self, store: &mut Store, now_ms: u64) {
        while self.try_one_request(store, now_ms) {}
    }

    /// Peels one frame off the incoming buffer if complete. Returns false
    /// when more bytes are needed or the connection must close.
    fn try_one_request(&mut self, store: &mut Store, now_ms: u64) -> bool {
        let len = match parser::frame_len(self.incoming.data()) {
            Ok(Some(len)) => len,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "protocol error, closing connection");
                self.want_close = true;
                return false;
            }
        };
        let body = &self.incoming.data()[HEADER_SIZE..HEADER_SIZE + len];
        let cmd = match parser::parse_request(body) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!(error = %e, "bad request, closing connection");
                self.want_close = true;
                return false;
            }
        };
        commands::handle_request(store, now_ms, &cmd, &mut self.outgoing);
        self.incoming.consume(HEADER_SIZE + len);
        true
    }
}
