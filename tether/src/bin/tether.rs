//! Line-oriented TCP/UDP client.
//!
//! Sends each stdin line to the peer and prints whatever comes back. Errors
//! and peer silence are reported on stderr.
//!
//! # Usage
//!
//! ```sh
//! tether tcp 127.0.0.1 7000
//! tether udp 9000 192.168.1.20 --idle-timeout 30 --heartbeat 5
//! ```
//!
//! Built only with the `cli` feature (`cargo run --features cli -- ...`).
//! Add `--features tracing` and set `RUST_LOG=tether=debug` to see
//! connection internals.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};

use tether::tcp::{TcpConfig, TcpError};
use tether::udp::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_IDLE_TIMEOUT, DEFAULT_POOL_MULTIPLIER,
    DEFAULT_RECEIVE_BUFFER, UdpConfig, UdpError,
};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Send stdin lines over TCP or UDP and print replies", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to a TCP server
    Tcp {
        /// Server host name or address
        host: String,
        /// Server port
        port: u16,
        /// Connect timeout in seconds
        #[arg(long, value_name = "SECS", default_value_t = 10)]
        connect_timeout: u64,
    },

    /// Exchange datagrams with a UDP peer
    Udp {
        /// Local port to bind
        bind_port: u16,
        /// Peer host name or address
        peer: String,
        /// Peer port (defaults to the bind port)
        #[arg(long, value_name = "PORT")]
        peer_port: Option<u16>,
        /// Seconds of silence before the peer is reported offline
        #[arg(long, value_name = "SECS", default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
        idle_timeout: u64,
        /// Seconds of silence before a heartbeat probe is sent
        #[arg(long, value_name = "SECS", default_value_t = DEFAULT_HEARTBEAT_INTERVAL.as_secs())]
        heartbeat: u64,
        /// Receive buffer size in bytes
        #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_RECEIVE_BUFFER)]
        buffer: usize,
        /// Send workers per CPU
        #[arg(long, value_name = "N", default_value_t = DEFAULT_POOL_MULTIPLIER)]
        pool: usize,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Tcp(#[from] TcpError),
    #[error(transparent)]
    Udp(#[from] UdpError),
    #[error("reading stdin: {0}")]
    Stdin(#[source] io::Error),
}

fn main() {
    tether::init_tracing();
    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        eprintln!("tether: {e}");
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<(), CliError> {
    match command {
        Command::Tcp {
            host,
            port,
            connect_timeout,
        } => run_tcp(host, port, Duration::from_secs(connect_timeout)),
        Command::Udp {
            bind_port,
            peer,
            peer_port,
            idle_timeout,
            heartbeat,
            buffer,
            pool,
        } => {
            let mut config = UdpConfig::new(bind_port, peer)
                .idle_timeout(Duration::from_secs(idle_timeout))
                .heartbeat_interval(Duration::from_secs(heartbeat))
                .receive_buffer(buffer)
                .pool_multiplier(pool);
            if let Some(port) = peer_port {
                config = config.peer_port(port);
            }
            run_udp(config)
        }
    }
}

fn run_tcp(host: String, port: u16, connect_timeout: Duration) -> Result<(), CliError> {
    let lost = Arc::new(AtomicBool::new(false));
    let lost_flag = Arc::clone(&lost);

    let conn = TcpConfig::new(host, port)
        .connect_timeout(connect_timeout)
        .on_message(|bytes| {
            let mut out = io::stdout().lock();
            let _ = out.write_all(bytes);
            let _ = out.flush();
        })
        .on_error(move || {
            eprintln!("tether: connection lost");
            lost_flag.store(true, Ordering::Release);
        })
        .connect()?;
    eprintln!("tether: connecting to {}", conn.target());

    for line in io::stdin().lock().lines() {
        let mut line = line.map_err(CliError::Stdin)?;
        if lost.load(Ordering::Acquire) {
            break;
        }
        line.push('\n');
        conn.send(line);
    }
    Ok(())
}

fn run_udp(config: UdpConfig) -> Result<(), CliError> {
    let conn = config
        .on_message(|text| println!("{text}"))
        .on_peer_silent(|| eprintln!("tether: peer silent"))
        .open()?;
    eprintln!(
        "tether: bound {} talking to {}",
        conn.local_addr(),
        conn.peer()
    );

    for line in io::stdin().lock().lines() {
        let line = line.map_err(CliError::Stdin)?;
        if !conn.is_running() {
            break;
        }
        conn.send(line);
    }
    Ok(())
}
