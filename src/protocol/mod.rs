//! Binary Wire Protocol
//!
//! Both directions use length-prefixed frames with little-endian integers.
//! A request frame carries a counted list of byte strings (the command and
//! its arguments); a response frame carries one tagged value tree.
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  frame_len      │  complete frame buffered?
//! │  parse_request  │  body -> Vec<Bytes>
//! └────────┬────────┘
//!          │
//!          ▼
//!    command layer
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  ReplyWriter    │  streams tagged values into the outgoing buffer
//! └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `parser`: incremental request frame splitting and body parsing
//! - `types`: response tags, error codes, streaming serializer, and the
//!   parsed [`Reply`] tree used by clients and tests

pub mod parser;
pub mod types;

pub use parser::{encode_request, frame_len, parse_request, FrameError, HEADER_SIZE, MAX_MSG};
pub use types::{ErrorCode, Reply, ReplyError, ReplyWriter};
