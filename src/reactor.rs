//! The single-threaded event loop at the heart of the server.
//!
//! One task owns the listen socket, every [`Connection`], every session and
//! the set of taken display names. Each loop iteration suspends exactly
//! once, on a readiness multiplex over the listener and all client sockets,
//! then services every ready socket at most once: accept at most one new
//! connection, one read attempt per readable connection, queue draining per
//! writable connection, and finally a teardown sweep for connections that
//! reached the end of their life.
//!
//! Because a single task owns all state, sessions get access to the rest of
//! the server through a short-lived [`ClientService`] value constructed per
//! callback - there are no locks, no shared-state atomics and no reference
//! cycles.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::task::Poll;

use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::codec;
use crate::connection::{Connection, DrainOutcome, FillOutcome};
use crate::service::ClientService;
use crate::session::{ChatSession, SessionConfig};
use crate::sgr::{reset, sgr, SgrCode};

/// Stable handle for a connection, unique for the lifetime of the process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ConnId(u64);

impl Display for ConnId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

enum Event {
    Incoming(TcpStream, SocketAddr),
    AcceptFailed(io::Error),
    Readable(ConnId),
    Writable(ConnId),
}

pub struct Reactor {
    listener: TcpListener,
    config: SessionConfig,

    /// Exclusive owner of every live connection.
    connections: FxHashMap<ConnId, Connection>,

    /// The multiplex order, mirroring `connections`. Each connection stores
    /// its own index so removal can swap-with-last in O(1).
    poll_order: Vec<ConnId>,

    /// Display names currently taken, equal to the names of all connections
    /// that completed the handshake.
    names: BTreeSet<String>,

    next_id: u64,
}

impl Reactor {
    pub fn new(listener: TcpListener, config: SessionConfig) -> Reactor {
        Reactor {
            listener,
            config,
            connections: FxHashMap::default(),
            poll_order: Vec::new(),
            names: BTreeSet::new(),
            next_id: 0,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        let addr = self.local_addr()?;
        info!("{}", ready_message(&addr));

        loop {
            let events = self.next_events().await;

            let mut doomed = Vec::new();
            for event in events {
                match event {
                    Event::Incoming(stream, peer) => self.install(stream, peer),
                    Event::AcceptFailed(e) => warn!("accepting a connection failed: {}", e),
                    Event::Readable(id) => {
                        if !self.service_readable(id) {
                            doomed.push(id);
                        }
                    }
                    Event::Writable(id) => self.service_writable(id),
                }
            }

            for id in doomed {
                self.teardown(id);
            }
        }
    }

    /// The loop's single suspension point: wait until the listener or at
    /// least one connection is ready, and report everything that is.
    async fn next_events(&self) -> Vec<Event> {
        poll_fn(|cx| {
            let mut events = Vec::new();

            match self.listener.poll_accept(cx) {
                Poll::Ready(Ok((stream, peer))) => events.push(Event::Incoming(stream, peer)),
                Poll::Ready(Err(e)) => events.push(Event::AcceptFailed(e)),
                Poll::Pending => {}
            }

            for &id in &self.poll_order {
                let Some(conn) = self.connections.get(&id) else {
                    continue;
                };
                if conn.poll_read_ready(cx) {
                    events.push(Event::Readable(id));
                }
                if conn.wants_write() && conn.poll_write_ready(cx) {
                    events.push(Event::Writable(id));
                }
            }

            if events.is_empty() {
                Poll::Pending
            } else {
                Poll::Ready(events)
            }
        })
        .await
    }

    fn install(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = ConnId(self.next_id);
        self.next_id += 1;

        let session = ChatSession::new(self.config);
        let conn = Connection::new(stream, peer, session, self.poll_order.len());
        self.connections.insert(id, conn);
        self.poll_order.push(id);

        debug!("accepted connection {} from {}", id, peer);
    }

    /// One read attempt for a readable connection. Returns `false` if the
    /// connection must be torn down.
    fn service_readable(&mut self, id: ConnId) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return true;
        };

        match conn.try_fill_window() {
            FillOutcome::Closed => false,
            FillOutcome::Idle => true,
            FillOutcome::Filled => {
                conn.reset_read_off();
                let mut session = conn.take_session();
                let self_peer = conn.peer().to_owned();

                let keep = {
                    let mut ctx = ServiceCtx {
                        connections: &mut self.connections,
                        fan_out: &self.poll_order,
                        names: &mut self.names,
                        self_id: id,
                        self_peer,
                    };
                    session.on_window_filled(&mut ctx);
                    session.wanted() > 0
                };

                if let Some(conn) = self.connections.get_mut(&id) {
                    conn.put_session(session);
                }
                keep
            }
        }
    }

    fn service_writable(&mut self, id: ConnId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            match conn.drain() {
                DrainOutcome::Drained | DrainOutcome::Busy => {}
                DrainOutcome::Failed => {
                    // keep the connection: buffered inbound data may still
                    // drive application logic, the next failing read ends it
                    debug!("write to connection {} failed, deferring teardown", id);
                }
            }
        }
    }

    fn teardown(&mut self, id: ConnId) {
        let Some(mut conn) = self.connections.remove(&id) else {
            return;
        };

        let index = conn.poll_index();
        self.poll_order.swap_remove(index);
        if index < self.poll_order.len() {
            let moved = self.poll_order[index];
            if let Some(moved_conn) = self.connections.get_mut(&moved) {
                moved_conn.set_poll_index(index);
            }
        }

        let mut session = conn.take_session();
        let mut ctx = ServiceCtx {
            connections: &mut self.connections,
            fan_out: &self.poll_order,
            names: &mut self.names,
            self_id: id,
            self_peer: conn.peer().to_owned(),
        };
        session.on_disconnect(&mut ctx);

        if !conn.display_name().is_empty() {
            self.names.remove(conn.display_name());
        }

        debug!("connection {} ({}) closed", id, conn.peer());
        // the socket and any queued outbound chunks are dropped with `conn`
    }
}

/// The capability handed to a session for the duration of one callback. It
/// closes over the reactor's data structures plus the handle of the
/// connection being serviced, so a session can reach the rest of the server
/// without owning any reference into it.
struct ServiceCtx<'a> {
    connections: &'a mut FxHashMap<ConnId, Connection>,
    fan_out: &'a [ConnId],
    names: &'a mut BTreeSet<String>,
    self_id: ConnId,
    self_peer: String,
}

impl ClientService for ServiceCtx<'_> {
    fn peer_addr(&self) -> String {
        self.self_peer.clone()
    }

    fn try_register_name(&mut self, name: &str) -> bool {
        if self.names.contains(name) {
            return false;
        }
        self.names.insert(name.to_owned());
        if let Some(conn) = self.connections.get_mut(&self.self_id) {
            conn.set_display_name(name);
        }
        true
    }

    fn online_users(&self) -> BTreeSet<String> {
        self.names.clone()
    }

    fn broadcast(&mut self, message: &str, muted: &BTreeSet<String>) {
        let packet = codec::server_text_packet(message);
        for &id in self.fan_out {
            let Some(conn) = self.connections.get_mut(&id) else {
                continue;
            };
            if conn.display_name().is_empty() || muted.contains(conn.display_name()) {
                continue;
            }
            conn.enqueue(packet.clone());
        }
    }

    fn send_self(&mut self, message: &str) {
        let packet = codec::server_text_packet(message);
        if let Some(conn) = self.connections.get_mut(&self.self_id) {
            conn.enqueue(packet);
        }
    }

    fn log(&self, line: &str) {
        info!("{}", line);
    }
}

fn ready_message(addr: &SocketAddr) -> String {
    format!(
        "{c}Chat room server is ready at {b}{addr}{r}{c}.{r}",
        c = sgr(&[SgrCode::FgCyan]),
        b = sgr(&[SgrCode::Bright]),
        r = reset(),
    )
}
