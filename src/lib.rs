//! A single-process chatroom server: many TCP clients, one logical room,
//! unique display names, broadcast chat and a few commands.
//!
//! ## Wire protocol
//!
//! All integers are 4 bytes, little-endian. Strings are length-prefixed
//! UTF-8 without a trailing NUL.
//!
//! Client to server:
//! ```ascii
//! handshake (once):
//!   0: display name length L (u32 LE), 1 <= L <= 63
//!   4: L bytes of display name
//! steady packets (repeating):
//!   0: total payload length M (u32 LE)
//!   4: packet id (u32 LE) - 0 = chat text, 1 = command text
//!   8: text length (u32 LE)
//!  12: text bytes
//! ```
//!
//! Server to client - note that there is *no* outer total-length frame, the
//! client reads `(id, string)` directly:
//! ```ascii
//!   0: packet id (u32 LE), always 0
//!   4: message length (u32 LE)
//!   8: message bytes, UTF-8 with embedded ANSI SGR coloring
//! ```
//!
//! ## Architecture
//!
//! * [`codec`] encodes and decodes the wire primitives.
//! * [`session`] is the per-connection state machine: name handshake first,
//!   then steady packet dispatch. It is pull-based - the transport asks it
//!   what to read next - so it is independent of the I/O model.
//! * [`connection`] owns one client socket, the fill offset into the
//!   session's read window, and the outbound backpressure queue.
//! * [`reactor`] is the single-threaded event loop owning all connections,
//!   the listen socket and the set of taken names. One readiness multiplex
//!   per iteration, everything else runs to completion without blocking.
//! * [`service`] is the narrow capability a session uses to talk back to
//!   the server (register a name, broadcast, reply to itself, log).
//! * [`server_socket`] creates the listen socket and sets up signal
//!   handling, with fixed process exit codes for each failure.

pub mod codec;
pub mod connection;
pub mod reactor;
pub mod server_socket;
pub mod service;
pub mod session;
pub mod sgr;

#[cfg(test)]
pub mod test_util;
