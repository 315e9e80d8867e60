//! Discovers a fleet of scan heads, connects, runs a short scan, and prints
//! profile counts as they arrive. One head per `--serial`/`--id` pair.

use std::time::Duration;

use clap::Parser;
use scanhead::profile::DataFormat;
use scanhead::session::ScanSystem;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Serial number of a head to register. Repeat per head.
    #[arg(long, required = true)]
    serial: Vec<u32>,

    /// Scan-head id to assign to each `--serial`, in the same order.
    #[arg(long, required = true)]
    id: Vec<u32>,

    /// Discovery timeout in seconds.
    #[arg(long, default_value_t = 5.0)]
    connect_timeout_s: f64,

    /// Requested scan rate in Hz.
    #[arg(long, default_value_t = 500.0)]
    rate_hz: f64,

    /// How long to scan before stopping, in seconds.
    #[arg(long, default_value_t = 5.0)]
    scan_duration_s: f64,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if args.serial.len() != args.id.len() {
        error!("--serial and --id must be given the same number of times");
        std::process::exit(2);
    }

    let system = match ScanSystem::new() {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create scan system");
            std::process::exit(1);
        }
    };

    for (serial, id) in args.serial.iter().zip(&args.id) {
        if let Err(e) = system.create_head(*serial, *id) {
            error!(serial, id, error = %e, "failed to register head");
            std::process::exit(1);
        }
    }

    info!(timeout_s = args.connect_timeout_s, "connecting");
    if let Err(e) = system.connect(Duration::from_secs_f64(args.connect_timeout_s)) {
        error!(error = %e, "connect failed");
        std::process::exit(1);
    }
    info!(max_rate_hz = system.max_scan_rate_hz(), "connected");

    if let Err(e) = system.start_scanning(args.rate_hz, DataFormat::XyFullLmFull) {
        error!(error = %e, "start_scanning failed");
        std::process::exit(1);
    }

    let deadline = std::time::Instant::now() + Duration::from_secs_f64(args.scan_duration_s);
    while std::time::Instant::now() < deadline {
        for id in &args.id {
            let available = system.wait_until_profiles(*id, 1, Duration::from_millis(200)).unwrap_or(0);
            if available > 0 {
                let profiles = system.take_profiles(*id, available).unwrap_or_default();
                info!(id, count = profiles.len(), "profiles received");
            }
        }
    }

    if let Err(e) = system.stop_scanning() {
        error!(error = %e, "stop_scanning failed");
    }
    if let Err(e) = system.disconnect() {
        error!(error = %e, "disconnect failed");
    }
}
