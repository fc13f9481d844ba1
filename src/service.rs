//! The capability surface the server exposes to a client session.

use std::collections::BTreeSet;

#[cfg(test)] use mockall::automock;

/// Everything a session is allowed to do to the rest of the server. The
/// reactor hands an implementation to the session per call, so the session
/// never holds a reference back into the server's data structures.
#[cfg_attr(test, automock)]
pub trait ClientService {
    /// The peer's address, formatted as `ip:port`.
    fn peer_addr(&self) -> String;

    /// Claim a display name for this session so it appears in the online
    /// users list. Returns `false` if the name is already taken.
    fn try_register_name(&mut self, name: &str) -> bool;

    /// Snapshot of all display names currently registered.
    fn online_users(&self) -> BTreeSet<String>;

    /// Send a message to every registered session whose name is not in
    /// `muted`. Sessions that have not completed the name handshake never
    /// receive broadcasts.
    fn broadcast(&mut self, message: &str, muted: &BTreeSet<String>);

    /// Send a message to this session only.
    fn send_self(&mut self, message: &str);

    /// Write a diagnostic line to the server console.
    fn log(&self, line: &str);
}
