//! Write one message into the shared channel.
//!
//! Arguments mirror the historical harness: the payload is hexadecimal
//! and its decoded length is the message size (the advertised `size`
//! argument was never read by the original either). Prints the failing
//! stage on stdout and exits non-zero on any failure.

use clap::Parser;
use lcshm::{Message, ShmChannel};
use lcshm_tools::{build_envelope, init_logging, parse_flag, parse_hex_payload};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Publication tick stamp; must be non-zero.
    tick: u32,
    /// Sending connection name.
    name: String,
    /// Sending connection host.
    host: String,
    /// Protocol version, 1-4.
    version: u32,
    /// Sandboxed flag; anything not starting with '0' counts as set.
    sandboxed: String,
    /// HTTPS flag; same convention as sandboxed.
    https: String,
    /// Sender security sandbox (-1, 0, 1, 2, 3 or 5).
    sandbox: i32,
    /// Sender SWF version.
    swfv: u32,
    /// Sender filepath; used only under the local-with-file sandbox.
    filepath: String,
    /// Payload AMF version, 0 or 3.
    amfv: u32,
    /// Method name for the receiver to invoke.
    method: String,
    /// Payload as hexadecimal; an odd trailing nibble is dropped.
    data: String,
    /// Scope the channel to the invoking user instead of the whole host.
    #[arg(long)]
    per_user: bool,
}

fn run(cli: Cli) -> i32 {
    if cli.tick == 0 {
        println!("ERROR: tick: {}", cli.tick);
        return 1;
    }

    let envelope = match build_envelope(
        cli.version,
        parse_flag(&cli.sandboxed),
        parse_flag(&cli.https),
        cli.sandbox,
        cli.swfv,
        &cli.filepath,
        cli.amfv,
    ) {
        Ok(envelope) => envelope,
        Err(e) => {
            println!("ERROR: {e:#}");
            return 1;
        }
    };

    let data = match parse_hex_payload(&cli.data) {
        Ok(data) => data,
        Err(e) => {
            println!("ERROR: data: {e:#}");
            return 1;
        }
    };

    let message = Message {
        tick: cli.tick,
        name: cli.name,
        host: cli.host,
        envelope,
        method: cli.method,
        data,
    };

    let mut channel = match ShmChannel::open(cli.per_user) {
        Ok(channel) => channel,
        Err(e) => {
            println!("FAILED: open: {e}");
            return 1;
        }
    };

    let mut region = match channel.lock() {
        Ok(region) => region,
        Err(e) => {
            println!("FAILED: lock: {e}");
            return 1;
        }
    };

    let mut status = 0;
    match region.write_message(&message) {
        Ok(()) => {
            tracing::debug!(tick = message.tick, payload = message.data.len(), "message published");
        }
        Err(e) => {
            println!("FAILED: write_message: {e}");
            status = 1;
        }
    }
    if let Err(e) = region.unlock() {
        println!("FAILED: unlock: {e}");
        status = 1;
    }
    status
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    std::process::exit(run(cli));
}
