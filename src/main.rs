mod metric;
mod poller;
mod settings;
mod sink;
mod status;
#[cfg(test)]
mod test_log;
mod ups;
mod variables;

use std::{io, path::PathBuf, process::exit, thread, time};

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::poller::Upsd;
use crate::settings::Settings;
use crate::sink::LineProtocolSink;
use crate::ups::NutConnector;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Settings file, missing is fine.
    #[clap(short, long, default_value = "upsd.toml")]
    config: PathBuf,

    /// Poll once and exit, non-zero if the poll failed.
    #[clap(long)]
    once: bool,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[clap(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let settings = match Settings::load(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to read upsd config: {}", e);
            exit(2);
        }
    };

    let poll_delay = time::Duration::from_secs(settings.poll_delay);
    let upsd = Upsd::new(settings, NutConnector);
    let mut sink = LineProtocolSink::new(io::stdout());

    info!("UPS collector running.");

    loop {
        match upsd.gather(&mut sink) {
            Ok(count) => debug!("Polled {} UPS.", count),
            Err(e) => {
                error!("Poll failed: {}", e);
                if args.once {
                    exit(1);
                }
            }
        }

        if args.once {
            break;
        }
        thread::sleep(poll_delay);
    }
}
