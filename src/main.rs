//! serial-line - open a serial port, print what it receives, and send what is typed.
//!
//! Each line read from stdin is sent to the port, as hexadecimal by default or as text with
//! `--text`. The port is closed at the end of input or on ctrl-c.

use anyhow::{Context, Result};
use clap::Parser;
use futures::{FutureExt, select};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use serial_line::{ReceivedChunk, SerialSession, StateListener, DEFAULT_BAUD_RATE};

use std::sync::Arc;
use std::time::Duration;

/// serial-line - a console for a serial port
#[derive(Parser, Debug)]
#[command(name = "serial-line")]
#[command(about = "Print data received on a serial port and send lines typed on stdin")]
struct Args {
    /// Path of the serial device, e.g. /dev/ttyUSB0
    port: String,

    /// Baud rate
    #[arg(short, long, default_value_t = DEFAULT_BAUD_RATE)]
    baud_rate: u32,

    /// Show received data and interpret typed lines as text instead of hexadecimal
    #[arg(short, long)]
    text: bool,

    /// Hexadecimal payload to send periodically
    #[arg(long, value_name = "HEX")]
    periodic: Option<String>,

    /// Delay after each periodic send, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 500)]
    interval: u64,
}

/// Logs the session's state changes.
struct LogStateChanges;

impl StateListener for LogStateChanges {
    fn on_open(&self, success: bool, reason: &str) {
        if success {
            info!("Port opened");
        } else {
            error!("Port could not be opened: {}", reason);
        }
    }

    fn on_close(&self) {
        info!("Port closed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("serial_line=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let text = args.text;

    let mut session = SerialSession::builder(args.port.as_str())
        .baud_rate(args.baud_rate)
        .send_delay(Duration::from_millis(args.interval))
        .data_listener(Arc::new(move |chunk: &ReceivedChunk| print_chunk(chunk, text)))
        .state_listener(Arc::new(LogStateChanges))
        .build()?;

    session.open().with_context(|| format!("Failed to open {}", args.port))?;

    if let Some(payload) = &args.periodic {
        session.set_payload_hex(payload);
        session.start_periodic_send();
    }

    let result = run(&mut session, text).await;
    session.close();
    result
}

/// Sends lines from stdin until the end of input or ctrl-c.
async fn run(session: &mut SerialSession, text: bool) -> Result<()> {
    let mut lines = BufReader::new(io::stdin()).lines();

    loop {
        select! {
            line = lines.next_line().fuse() => {
                let line = match line.context("Failed to read stdin")? {
                    Some(l) => l,
                    None => return Ok(()),
                };

                let sent = if text {
                    session.send_text(&line)
                } else {
                    session.send_hex(&line)
                };
                // Keep going; the failure was already logged by the session
                if let Err(e) = sent {
                    warn!("Not sent: {}", e);
                }

                if !session.is_receiving() {
                    warn!("No longer receiving from {}", session.port());
                }
            },
            res = signal::ctrl_c().fuse() => {
                if let Err(e) = res {
                    error!("Failed to wait for ctrl-c signal: {}", e);
                }
                return Ok(());
            },
        }
    }
}

/// Prints a received chunk to stdout.
fn print_chunk(chunk: &ReceivedChunk, text: bool) {
    if text {
        print!("{}", chunk.text());
    } else {
        println!("{}", chunk.to_hex());
    }
}
