//! Network infrastructure for the teacher application.
//!
//! # Sub-modules
//!
//! - **`listener`** – The TCP control listener: accepts student connections,
//!   runs the join handshake against the session manager, then drives one
//!   read loop and one writer task per connection.  Also home to the
//!   [`listener::ConnectionHub`], the fan-out used for broadcasts, directed
//!   sends, and forced disconnects.
//!
//! - **`send_queue`** – The bounded per-connection outbound queue.  Seals the
//!   rule that a slow student may cost frames but never control messages,
//!   and never blocks the sender.
//!
//! - **`metadata`** – A minimal HTTP/1.1 endpoint serving the current
//!   session's join metadata as JSON, for helper tooling on the LAN.

pub mod listener;
pub mod metadata;
pub mod send_queue;
