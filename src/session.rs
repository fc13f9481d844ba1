//! The per-connection state machine driving the chat protocol.
//!
//! The session is pull-based: the transport asks [`ChatSession::wanted`] /
//! [`ChatSession::window_mut`] for the next contiguous chunk of bytes it
//! should read, fills the window (possibly across several reads), and calls
//! [`ChatSession::on_window_filled`] once it is complete. This keeps the
//! state machine completely independent of how bytes arrive - the same code
//! runs unchanged against a blocking transport or a readiness-driven event
//! loop.
//!
//! A session starts in the name handshake (a length-prefixed display name),
//! then settles into the steady packet phase. A wanted window size of zero
//! tells the transport that the session is done and the connection should be
//! torn down.

use std::collections::BTreeSet;

use anyhow::bail;
use tracing::debug;

use crate::codec;
use crate::service::ClientService;
use crate::sgr::{reset, sgr, SgrCode};

/// Exclusive upper bound for the display name length prefix.
pub const MAX_NAME_LEN: u32 = 64;

const PACKET_ID_CHAT: u32 = 0;
const PACKET_ID_COMMAND: u32 = 1;

/// Commands available in the steady phase, with their help-listing
/// descriptions, sorted by command name.
const COMMANDS: &[(&str, &str)] = &[
    ("help", "show available commands."),
    ("online", "list online users in this chatroom."),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    AwaitingNameLength,
    AwaitingNameBytes,
    AwaitingPacketLength,
    AwaitingPacketBytes,
    Terminated,
}

#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Upper bound for the length prefix of a steady-phase packet. A peer
    /// announcing a bigger packet is terminated, bounding per-connection
    /// memory.
    pub max_packet_len: u32,
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            max_packet_len: 1024 * 1024,
        }
    }
}

pub struct ChatSession {
    config: SessionConfig,
    state: SessionState,

    /// The current read window. Its length is exactly the number of bytes
    /// the session wants next; the transport tracks its own fill offset.
    buf: Vec<u8>,

    /// Set once the name handshake completed successfully. The leave
    /// announcement on disconnect is only sent for joined sessions.
    joined: bool,
    name: String,
}

impl ChatSession {
    pub fn new(config: SessionConfig) -> ChatSession {
        ChatSession {
            config,
            state: SessionState::AwaitingNameLength,
            buf: vec![0; codec::INT_LEN],
            joined: false,
            name: String::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of bytes the session wants to see next. Zero means the session
    /// is terminating and no further reads should be attempted.
    pub fn wanted(&self) -> usize {
        match self.state {
            SessionState::Terminated => 0,
            _ => self.buf.len(),
        }
    }

    /// The window the transport fills. Always exactly `wanted()` bytes long.
    pub fn window_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Advance the state machine after the transport has completely filled
    /// the current window.
    pub fn on_window_filled(&mut self, svc: &mut dyn ClientService) {
        match self.state {
            SessionState::AwaitingNameLength => self.on_name_length(),
            SessionState::AwaitingNameBytes => self.on_name_bytes(svc),
            SessionState::AwaitingPacketLength => self.on_packet_length(),
            SessionState::AwaitingPacketBytes => self.on_packet_bytes(svc),
            SessionState::Terminated => {}
        }
    }

    /// Broadcast the leave announcement if this session had joined. Called
    /// by the transport as part of connection teardown.
    pub fn on_disconnect(&mut self, svc: &mut dyn ClientService) {
        self.state = SessionState::Terminated;
        self.buf = Vec::new();

        if self.joined {
            self.joined = false;
            let message = format!(
                "{y}User {m}{name}{p} ({addr}){r}{y} has left the chat.",
                y = fmt_yellow(),
                m = fmt_magenta(),
                p = fmt_plain_magenta(),
                r = reset(),
                name = self.name,
                addr = svc.peer_addr(),
            );
            svc.log(&message);
            svc.broadcast(&message, &BTreeSet::from([self.name.clone()]));
        }
    }

    fn on_name_length(&mut self) {
        let Some(len) = self.window_int() else {
            self.terminate();
            return;
        };

        if len == 0 || len >= MAX_NAME_LEN {
            debug!("rejecting display name of announced length {}", len);
            self.terminate();
            return;
        }

        self.buf = vec![0; len as usize];
        self.state = SessionState::AwaitingNameBytes;
    }

    fn on_name_bytes(&mut self, svc: &mut dyn ClientService) {
        let raw = std::mem::take(&mut self.buf);
        let name = match String::from_utf8(raw) {
            Ok(name) => name,
            Err(_) => {
                debug!("display name is not valid UTF-8");
                self.terminate();
                return;
            }
        };

        if !svc.try_register_name(&name) {
            svc.send_self(&format!(
                "{r}Sorry but {m}{name}{r} is already online, why not choose another name?",
                r = fmt_red(),
                m = fmt_magenta(),
            ));
            self.terminate();
            return;
        }

        self.joined = true;
        self.name = name;

        svc.send_self(&format!(
            "{y}Welcome to the chat room, {m}{name}{y}.",
            y = fmt_yellow(),
            m = fmt_magenta(),
            name = self.name,
        ));

        let announcement = format!(
            "{y}New user {m}{name}{p} ({addr}){r}{y} has joined the chat room.",
            y = fmt_yellow(),
            m = fmt_magenta(),
            p = fmt_plain_magenta(),
            r = reset(),
            name = self.name,
            addr = svc.peer_addr(),
        );
        svc.log(&announcement);
        svc.broadcast(&announcement, &BTreeSet::from([self.name.clone()]));

        self.buf = vec![0; codec::INT_LEN];
        self.state = SessionState::AwaitingPacketLength;
    }

    fn on_packet_length(&mut self) {
        let Some(len) = self.window_int() else {
            self.terminate();
            return;
        };

        if len == 0 || len > self.config.max_packet_len {
            debug!("rejecting packet of announced length {}", len);
            self.terminate();
            return;
        }

        self.buf = vec![0; len as usize];
        self.state = SessionState::AwaitingPacketBytes;
    }

    fn on_packet_bytes(&mut self, svc: &mut dyn ClientService) {
        match self.dispatch_packet(svc) {
            Ok(()) => {
                self.buf = vec![0; codec::INT_LEN];
                self.state = SessionState::AwaitingPacketLength;
            }
            Err(e) => {
                debug!("dropping connection after malformed packet: {}", e);
                self.terminate();
            }
        }
    }

    fn dispatch_packet(&self, svc: &mut dyn ClientService) -> anyhow::Result<()> {
        let mut payload: &[u8] = &self.buf;
        let packet_id = codec::try_get_int(&mut payload)?;

        match packet_id {
            PACKET_ID_CHAT => {
                let chat = codec::try_get_string(&mut payload)?;
                let message = format!(
                    "[{m}{name}{r}] {chat}",
                    m = fmt_magenta(),
                    r = reset(),
                    name = self.name,
                );
                svc.broadcast(&message, &BTreeSet::new());
            }
            PACKET_ID_COMMAND => {
                let command = codec::try_get_string(&mut payload)?;
                self.run_command(&command, svc);
            }
            _ => bail!("unknown packet id {}", packet_id),
        }
        Ok(())
    }

    /// Execute a command. Splitting is on literal ASCII space with empty
    /// tokens dropped; no tokens at all is a no-op. An unknown command is
    /// answered with a hint, it does not terminate the session.
    fn run_command(&self, command: &str, svc: &mut dyn ClientService) {
        let args = command
            .split(' ')
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>();

        let Some(&cmd) = args.first() else {
            return;
        };

        match cmd {
            "online" => svc.send_self(&online_message(&svc.online_users())),
            "help" => svc.send_self(&help_message()),
            _ => svc.send_self(&format!(
                "{r}Unknown command {b}/{cmd}{r}. Issue {b}/help{r} for the list of commands.",
                r = fmt_red(),
                b = fmt_bright_red(),
            )),
        }
    }

    fn terminate(&mut self) {
        self.state = SessionState::Terminated;
        self.buf = Vec::new();
    }

    fn window_int(&self) -> Option<u32> {
        let mut window: &[u8] = &self.buf;
        codec::try_get_int(&mut window).ok()
    }
}

fn online_message(users: &BTreeSet<String>) -> String {
    let mut message = format!(
        "{y}There {verb} {n} user{plural} online: ",
        y = fmt_yellow(),
        verb = if users.len() > 1 { "are" } else { "is" },
        n = users.len(),
        plural = if users.len() > 1 { "s" } else { "" },
    );

    for (i, user) in users.iter().enumerate() {
        if i > 0 {
            message.push_str(&fmt_yellow());
            message.push_str(", ");
        }
        message.push_str(&fmt_magenta());
        message.push_str(user);
    }

    message.push_str(&fmt_yellow());
    message.push('.');
    message
}

fn help_message() -> String {
    let mut message = format!("{}List of available commands: ", fmt_yellow());
    for (cmd, description) in COMMANDS {
        message.push('\n');
        message.push_str(&fmt_yellow());
        message.push('/');
        message.push_str(cmd);
        message.push_str(&reset());
        message.push_str(": ");
        message.push_str(description);
    }
    message
}

fn fmt_red() -> String {
    reset() + &sgr(&[SgrCode::FgRed])
}

fn fmt_bright_red() -> String {
    reset() + &sgr(&[SgrCode::Bright, SgrCode::FgRed])
}

fn fmt_yellow() -> String {
    reset() + &sgr(&[SgrCode::FgYellow, SgrCode::Bright])
}

fn fmt_magenta() -> String {
    reset() + &sgr(&[SgrCode::Bright, SgrCode::FgMagenta])
}

fn fmt_plain_magenta() -> String {
    reset() + &sgr(&[SgrCode::FgMagenta])
}
