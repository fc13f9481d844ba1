//! Creation of the listen socket and process-level signal setup, with the
//! exit codes the server has always used.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::process;

use tokio::net::{TcpListener, TcpSocket};

pub const EXIT_NO_PORT: i32 = 1;
pub const EXIT_PORT_NOT_INT: i32 = 2;
pub const EXIT_BACKLOG_NOT_INT: i32 = 3;
pub const EXIT_SOCKET_CREATE: i32 = 4;
pub const EXIT_BIND: i32 = 5;
pub const EXIT_LISTEN: i32 = 6;
pub const EXIT_SIGNAL_HANDLER: i32 = 7;

/// Create a bound, listening socket on `0.0.0.0:<port>` with SO_REUSEADDR
/// set before bind, or exit the process with the matching code.
pub fn create_listener(port: u16, backlog: u32) -> TcpListener {
    //TODO optionally listen on IPv6 as well
    let socket = match TcpSocket::new_v4() {
        Ok(socket) => socket,
        Err(e) => exit_with("The server socket cannot be created!", e, EXIT_SOCKET_CREATE),
    };
    if let Err(e) = socket.set_reuseaddr(true) {
        exit_with("The server socket cannot be created!", e, EXIT_SOCKET_CREATE);
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    if let Err(e) = socket.bind(addr) {
        exit_with("The server socket cannot bind to port!", e, EXIT_BIND);
    }

    match socket.listen(backlog) {
        Ok(listener) => listener,
        Err(e) => exit_with("The server socket cannot listen on the port!", e, EXIT_LISTEN),
    }
}

/// Ignore SIGPIPE process-wide so a write to a half-closed peer returns an
/// error instead of killing the server.
pub fn ignore_sigpipe() {
    // SAFETY: installing SIG_IGN for SIGPIPE is async-signal-safe and done
    // once before any connection exists
    let previous = unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
    if previous == libc::SIG_ERR {
        exit_with(
            "Cannot register the signal handler.",
            io::Error::last_os_error(),
            EXIT_SIGNAL_HANDLER,
        );
    }
}

fn exit_with(message: &str, error: io::Error, code: i32) -> ! {
    eprintln!("{}", message);
    eprintln!("{}", error);
    process::exit(code)
}
