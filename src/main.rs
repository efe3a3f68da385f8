use std::error::Error;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt;

use battery_discharge::config::{AppConfig, DEFAULT_CONFIG_FILE};
use battery_discharge::devices::{Connector, DeviceIdentity, Discovery, SerialConnector, select_device};
use battery_discharge::experiment::{self, DischargeController, release_device};
use battery_discharge::{BatteryChemistry, DischargeSummary, Sample};

/// How often the terminal drains the sample stream.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "battery-discharge", about = "CC/CV battery discharge with an ET5406A+ electronic load")]
struct Args {
    /// JSON configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Serial port of the load; skips discovery
    #[arg(long)]
    port: Option<String>,

    /// Battery preset: ni-mh, li-ion or pb-lead
    #[arg(long)]
    preset: Option<BatteryChemistry>,

    /// List the supported loads found and exit
    #[arg(long)]
    list: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let mut config = AppConfig::load(&args.config)?;
    if let Some(preset) = args.preset {
        config.preset = Some(preset);
        config.parameters = None;
    }

    // Keep the guard alive so buffered log lines get flushed on exit
    let _guard = setup_logging(&config.log_dir);
    info!("Starting application");

    let discovery = Discovery::new(SerialConnector);
    let port = args.port.clone().or_else(|| config.port.clone());
    let identity = match port {
        Some(port) => discovery.identify(&port),
        None => {
            let devices = discovery.discover_all()?;
            if args.list {
                for device in &devices {
                    println!("{}  ({})", device, device.port);
                }
                return Ok(());
            }
            select_device(&devices, config.serial_number.as_deref())
        }
    };

    let Some(identity) = identity else {
        error!("No DC electronic load");
        eprintln!("No DC electronic load");
        return Err("no supported electronic load found".into());
    };
    if args.list {
        println!("{}  ({})", identity, identity.port);
        return Ok(());
    }

    let result = discharge(&config, &identity);
    let result = release_after(&SerialConnector, &identity, result);
    info!("Application shutting down");
    result
}

/// Runs one discharge on `identity` and reports it on the terminal.
fn discharge(config: &AppConfig, identity: &DeviceIdentity) -> Result<(), Box<dyn Error>> {
    let params = config.discharge_parameters()?;
    println!("{}", identity);
    println!(
        "CC {:.3} A until {:.3} V, then CV until {:.3} A. Press Enter to stop.",
        params.cc_current, params.cc_end_voltage, params.cv_stop_current
    );

    let handle = experiment::spawn(DischargeController::new(), identity.clone(), params)?;

    let stop = handle.stop_token();
    std::thread::spawn(move || {
        if wait_for_enter(std::io::stdin().lock()) {
            stop.request_stop();
        }
    });

    let mut summary = DischargeSummary::default();
    while !handle.is_finished() {
        while let Some(sample) = handle.try_next_sample() {
            report(&mut summary, &sample);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    for sample in handle.drain_samples() {
        report(&mut summary, &sample);
    }

    match handle.join() {
        Ok(outcome) => {
            info!("Discharge ended: {:?}", outcome);
            println!(
                "Done ({:?}). Absorbed charge: {:.1} mAh (CC {:.1} mAh, CV {:.1} mAh) in {}",
                outcome.reason,
                summary.total_mah(),
                summary.charge_cc_ah * 1000.0,
                summary.charge_cv_ah * 1000.0,
                format_elapsed(summary.elapsed_s)
            );
            Ok(())
        }
        Err(e) => {
            error!("Discharge failed: {}", e);
            eprintln!("Discharge failed: {}", e);
            Err(Box::new(e))
        }
    }
}

/// Blocks until a line is entered. End of input or a read error never counts as a stop request.
fn wait_for_enter<R: BufRead>(mut input: R) -> bool {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(n) if n > 0 => true,
        Ok(_) => {
            warn!("Standard input is closed; the run continues until its current threshold");
            false
        }
        Err(e) => {
            warn!("Cannot read standard input ({}); the run continues until its current threshold", e);
            false
        }
    }
}

/// Switches the load off and hands the panel back, whatever `result` holds.
fn release_after<C: Connector, T>(
    connector: &C,
    identity: &DeviceIdentity,
    result: Result<T, Box<dyn Error>>,
) -> Result<T, Box<dyn Error>> {
    if let Err(e) = release_device(connector, identity) {
        warn!("Could not release {}: {}", identity, e);
    }
    result
}

fn report(summary: &mut DischargeSummary, sample: &Sample) {
    summary.add(sample);
    println!(
        "{}  {}  V: {:.3}  I: {:.3}  Q: {:.1} mAh",
        format_elapsed(sample.elapsed()),
        sample.mode,
        sample.voltage,
        sample.current,
        summary.total_mah()
    );
}

/// Formats seconds as `H:MM:SS`.
fn format_elapsed(seconds: f64) -> String {
    let delta = chrono::TimeDelta::seconds(seconds.round() as i64);
    format!(
        "{}:{:02}:{:02}",
        delta.num_hours(),
        delta.num_minutes() % 60,
        delta.num_seconds() % 60
    )
}

fn setup_logging(log_dir: &Path) -> WorkerGuard {
    // Set up file-based logging with rotation
    let file_appender = rolling::daily(log_dir, "battery-discharge.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    fmt()
        .with_writer(non_blocking)
        .with_ansi(false) // Disable ANSI colors in log files
        .with_level(true)
        .init();

    guard
}
