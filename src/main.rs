use std::process;

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::Parser;
use tracing::Level;

use chatroom::reactor::Reactor;
use chatroom::server_socket;
use chatroom::session::SessionConfig;

#[derive(Parser)]
#[command(name = "chatroom", about = "A simple chatroom server.")]
struct Args {
    /// Port the server listens on.
    port: u16,

    /// Backlog handed to listen(2).
    #[arg(default_value_t = 10)]
    listen_backlog: u32,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[arg(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    server_socket::ignore_sigpipe();
    let listener = server_socket::create_listener(args.port, args.listen_backlog);

    let mut reactor = Reactor::new(listener, SessionConfig::default());
    reactor.run().await
}

/// Parse the command line, keeping the exit codes the server has always
/// used for argument errors.
fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::MissingRequiredArgument => server_socket::EXIT_NO_PORT,
                ErrorKind::ValueValidation | ErrorKind::InvalidValue => {
                    match failed_argument(&err) {
                        Some(arg) if arg.contains("LISTEN_BACKLOG") => {
                            server_socket::EXIT_BACKLOG_NOT_INT
                        }
                        _ => server_socket::EXIT_PORT_NOT_INT,
                    }
                }
                _ => err.exit(),
            };
            let _ = err.print();
            process::exit(code);
        }
    }
}

fn failed_argument(err: &clap::Error) -> Option<String> {
    err.context().find_map(|(kind, value)| match (kind, value) {
        (ContextKind::InvalidArg, ContextValue::String(arg)) => Some(arg.clone()),
        _ => None,
    })
}
