//! Command Processing Layer
//!
//! Sits between the wire protocol and the store:
//!
//! ```text
//! parsed request (Vec<Bytes>)
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ handle_request  │  frame header placeholder, dispatch, back-patch
//! │   dispatch      │  match on (command name, arity)
//! │   do_*          │  execute against the Store, stream the reply
//! └────────┬────────┘
//!          │
//!          ▼
//!  response frame in the connection's outgoing buffer
//! ```

pub mod handler;

pub use handler::handle_request;
