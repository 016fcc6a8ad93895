//! Print the current message tick of the shared channel.
//!
//! Output is `tick: <n>` on stdout; 0 means the slot is empty. Prints the
//! failing stage on stdout and exits non-zero on any failure.

use clap::Parser;
use lcshm::ShmChannel;
use lcshm_tools::init_logging;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Scope the channel to the invoking user instead of the whole host.
    #[arg(long)]
    per_user: bool,
}

fn run(cli: Cli) -> i32 {
    let mut channel = match ShmChannel::open(cli.per_user) {
        Ok(channel) => channel,
        Err(e) => {
            println!("FAILED: open: {e}");
            return 1;
        }
    };

    let region = match channel.lock() {
        Ok(region) => region,
        Err(e) => {
            println!("FAILED: lock: {e}");
            return 1;
        }
    };

    println!("tick: {}", region.message_tick());

    if let Err(e) = region.unlock() {
        println!("FAILED: unlock: {e}");
        return 1;
    }
    0
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    std::process::exit(run(cli));
}
