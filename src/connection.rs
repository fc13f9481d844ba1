//! Per-connection runtime state: the socket, the fill offset into the
//! session's current read window, and the outbound queue that absorbs
//! backpressure when the kernel send buffer is full.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::task::Context;

use bytes::Bytes;
use tokio::net::TcpStream;
use tracing::trace;

use crate::session::ChatSession;

/// Result of one non-blocking read attempt into the session's window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillOutcome {
    /// Nothing to do right now (would block, or a partial read advanced the
    /// fill offset without completing the window).
    Idle,
    /// The window is completely filled; the session must be notified.
    Filled,
    /// End of stream, a non-retryable read error, or a session that no
    /// longer wants any bytes. The connection should be torn down.
    Closed,
}

/// Result of draining the outbound queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue is empty; write interest has been cleared.
    Drained,
    /// The kernel send buffer is full again; write interest stays set.
    Busy,
    /// A non-retryable write error. Write interest is cleared, but the
    /// connection stays alive so already-buffered inbound data can still be
    /// processed; the next failing read finalizes teardown.
    Failed,
}

pub struct Connection {
    stream: TcpStream,
    peer: String,

    /// Installed while the connection is registered; taken out only for the
    /// duration of a session callback.
    session: Option<ChatSession>,

    /// Fill offset into the session's current read window.
    read_off: usize,

    /// Registered display name, empty until the handshake completes.
    display_name: String,

    /// Outbound chunks not yet (fully) written, plus the write offset into
    /// the head chunk. The offset is zero whenever the queue is empty and
    /// always less than the head chunk's length between loop iterations.
    out_queue: VecDeque<Bytes>,
    write_off: usize,
    wants_write: bool,

    /// Position of this connection in the reactor's multiplex order.
    poll_index: usize,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        session: ChatSession,
        poll_index: usize,
    ) -> Connection {
        Connection {
            stream,
            peer: peer.to_string(),
            session: Some(session),
            read_off: 0,
            display_name: String::new(),
            out_queue: VecDeque::new(),
            write_off: 0,
            wants_write: false,
            poll_index,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, name: &str) {
        self.display_name = name.to_owned();
    }

    pub fn wants_write(&self) -> bool {
        self.wants_write
    }

    pub fn poll_index(&self) -> usize {
        self.poll_index
    }

    pub fn set_poll_index(&mut self, index: usize) {
        self.poll_index = index;
    }

    pub fn take_session(&mut self) -> ChatSession {
        self.session
            .take()
            .expect("this is a bug: session must be installed between session callbacks")
    }

    pub fn put_session(&mut self, session: ChatSession) {
        self.session = Some(session);
    }

    pub fn reset_read_off(&mut self) {
        self.read_off = 0;
    }

    pub fn poll_read_ready(&self, cx: &mut Context<'_>) -> bool {
        // an error counts as readable so the read path surfaces it
        self.stream.poll_read_ready(cx).is_ready()
    }

    pub fn poll_write_ready(&self, cx: &mut Context<'_>) -> bool {
        self.stream.poll_write_ready(cx).is_ready()
    }

    /// One non-blocking read attempt into the session's current window,
    /// starting at the fill offset. At most one `try_read` per loop
    /// iteration so a chatty peer cannot starve the others.
    pub fn try_fill_window(&mut self) -> FillOutcome {
        let session = self
            .session
            .as_mut()
            .expect("this is a bug: session must be installed between session callbacks");

        let want = session.wanted();
        if want == 0 {
            return FillOutcome::Closed;
        }

        let window = session.window_mut();
        match self.stream.try_read(&mut window[self.read_off..]) {
            Ok(0) => FillOutcome::Closed,
            Ok(n) => {
                self.read_off += n;
                if self.read_off == want {
                    FillOutcome::Filled
                } else {
                    FillOutcome::Idle
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => FillOutcome::Idle,
            Err(e) => {
                trace!("read error on connection to {}: {}", self.peer, e);
                FillOutcome::Closed
            }
        }
    }

    /// Queue a chunk for sending. When the queue is empty this writes as
    /// much as the kernel accepts directly; whatever remains is queued and
    /// write interest is enabled. Never blocks and never reports an error -
    /// a failing socket is discovered by `drain` or by the read path.
    pub fn enqueue(&mut self, chunk: Bytes) {
        if !self.out_queue.is_empty() {
            // preserve FIFO order across broadcasts
            self.out_queue.push_back(chunk);
            return;
        }

        let mut sent = 0;
        while sent < chunk.len() {
            match self.stream.try_write(&chunk[sent..]) {
                Ok(0) => break,
                Ok(n) => sent += n,
                Err(_) => break,
            }
        }

        if sent < chunk.len() {
            self.write_off = sent;
            self.out_queue.push_back(chunk);
            self.wants_write = true;
        }
    }

    /// Write queued chunks until the queue is empty or the kernel pushes
    /// back.
    pub fn drain(&mut self) -> DrainOutcome {
        while let Some(head) = self.out_queue.front() {
            match self.stream.try_write(&head[self.write_off..]) {
                Ok(n) if n > 0 => {
                    self.write_off += n;
                    if self.write_off == head.len() {
                        self.out_queue.pop_front();
                        self.write_off = 0;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return DrainOutcome::Busy,
                Ok(_) | Err(_) => {
                    trace!("write error on connection to {}, deferring teardown", self.peer);
                    self.wants_write = false;
                    return DrainOutcome::Failed;
                }
            }
        }

        self.wants_write = false;
        DrainOutcome::Drained
    }

    #[cfg(test)]
    pub fn queued_chunks(&self) -> usize {
        self.out_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ChatSession, SessionConfig};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();

        let conn = Connection::new(
            server_side,
            peer,
            ChatSession::new(SessionConfig::default()),
            0,
        );
        (conn, client)
    }

    async fn read_available(client: &TcpStream, into: &mut Vec<u8>) {
        let mut tmp = [0u8; 16384];
        loop {
            match client.try_read(&mut tmp) {
                Ok(0) => return,
                Ok(n) => into.extend_from_slice(&tmp[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => panic!("client read failed: {}", e),
            }
        }
    }

    #[tokio::test]
    async fn test_partial_reads_fill_the_window_incrementally() {
        let (mut conn, mut client) = connected_pair().await;

        // one byte of the 4-byte name length: the window must stay open
        client.write_all(&[5]).await.unwrap();
        client.flush().await.unwrap();

        let mut outcome = FillOutcome::Idle;
        for _ in 0..100 {
            outcome = conn.try_fill_window();
            if outcome != FillOutcome::Idle {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(outcome, FillOutcome::Idle);

        client.write_all(&[0, 0, 0]).await.unwrap();
        client.flush().await.unwrap();

        for _ in 0..100 {
            outcome = conn.try_fill_window();
            if outcome == FillOutcome::Filled {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(outcome, FillOutcome::Filled);
    }

    #[tokio::test]
    async fn test_peer_close_is_reported_as_closed() {
        let (mut conn, client) = connected_pair().await;
        drop(client);

        let mut outcome = FillOutcome::Idle;
        for _ in 0..100 {
            outcome = conn.try_fill_window();
            if outcome != FillOutcome::Idle {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(outcome, FillOutcome::Closed);
    }

    #[tokio::test]
    async fn test_terminated_session_closes_without_reading() {
        let (mut conn, _client) = connected_pair().await;

        let mut session = conn.take_session();
        let mut svc = crate::service::MockClientService::new();
        session.on_disconnect(&mut svc);
        conn.put_session(session);

        assert_eq!(conn.try_fill_window(), FillOutcome::Closed);
    }

    #[tokio::test]
    async fn test_enqueue_writes_through_when_queue_is_empty() {
        let (mut conn, client) = connected_pair().await;

        conn.enqueue(Bytes::from_static(b"hello"));
        assert!(!conn.wants_write());
        assert_eq!(conn.queued_chunks(), 0);

        let mut received = Vec::new();
        for _ in 0..100 {
            read_available(&client, &mut received).await;
            if received.len() == 5 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(&received, b"hello");
    }

    #[tokio::test]
    async fn test_backpressure_preserves_fifo_order() {
        let (mut conn, client) = connected_pair().await;

        // fill the kernel send buffer until residual bytes start queueing
        let filler = Bytes::from(vec![b'x'; 64 * 1024]);
        let mut fillers = 0;
        while !conn.wants_write() {
            conn.enqueue(filler.clone());
            fillers += 1;
            assert!(fillers < 4096, "kernel buffer never filled up");
        }

        conn.enqueue(Bytes::from_static(b"AAAA"));
        conn.enqueue(Bytes::from_static(b"BBBB"));
        assert!(conn.wants_write());

        // drain while the peer is reading; everything must arrive in order
        let expected_len = fillers * filler.len() + 8;
        let mut received = Vec::new();
        loop {
            let outcome = conn.drain();
            assert_ne!(outcome, DrainOutcome::Failed);
            read_available(&client, &mut received).await;
            if outcome == DrainOutcome::Drained && received.len() == expected_len {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!conn.wants_write());
        assert_eq!(&received[expected_len - 8..], b"AAAABBBB");
        assert!(received[..expected_len - 8].iter().all(|&b| b == b'x'));
    }

    #[tokio::test]
    async fn test_drain_on_closed_peer_fails_but_clears_interest() {
        let (mut conn, client) = connected_pair().await;

        let filler = Bytes::from(vec![b'x'; 64 * 1024]);
        let mut fillers = 0;
        while !conn.wants_write() {
            conn.enqueue(filler.clone());
            fillers += 1;
            assert!(fillers < 4096, "kernel buffer never filled up");
        }

        drop(client);

        // the queue still holds data; draining must eventually report the
        // broken pipe without panicking and clear write interest
        let mut outcome = conn.drain();
        for _ in 0..1000 {
            if outcome == DrainOutcome::Failed {
                break;
            }
            tokio::task::yield_now().await;
            outcome = conn.drain();
        }
        assert_eq!(outcome, DrainOutcome::Failed);
        assert!(!conn.wants_write());
    }
}
