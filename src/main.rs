// tmc-diag: inspect and set up TMC2209 drivers on a shared UART
//
// Usage: tmc-diag --port /dev/ttyUSB0 probe
//        tmc-diag settings --address 1

use clap::{Parser, Subcommand};
use serde_json::json;
use std::time::Duration;
use tmc2209_bus::config::{self, BusConfig};
use tmc2209_bus::motor::{SerialAddress, SerialTransport, Tmc2209};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// TMC2209 UART diagnostic tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port wired to PDN_UART
    #[arg(short, long, default_value = config::DEFAULT_PORT)]
    port: String,

    #[arg(short, long, default_value_t = config::DEFAULT_BAUDRATE)]
    baudrate: u32,

    /// Reply timeout in microseconds
    #[arg(long, default_value_t = config::REPLY_TIMEOUT.as_micros() as u64)]
    reply_timeout_us: u64,

    /// Echo timeout in microseconds
    #[arg(long, default_value_t = config::ECHO_TIMEOUT.as_micros() as u64)]
    echo_timeout_us: u64,

    /// The adapter does not loop our own bytes back
    #[arg(long)]
    no_echo: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look for drivers on every serial address
    Probe,
    /// Print the configuration snapshot as JSON
    Settings {
        #[arg(short, long, default_value_t = 0)]
        address: u8,
    },
    /// Print DRV_STATUS and GSTAT as JSON
    Status {
        #[arg(short, long, default_value_t = 0)]
        address: u8,
    },
    /// Put the driver in UART mode with default registers, then print its settings
    Setup {
        #[arg(short, long, default_value_t = 0)]
        address: u8,
    },
}

fn serial_address(address: u8) -> Result<SerialAddress, Box<dyn std::error::Error>> {
    SerialAddress::try_from(address)
        .map_err(|address| format!("serial address must be 0..=3, got {}", address).into())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let bus_config = BusConfig {
        baudrate: args.baudrate,
        echo_timeout: Duration::from_micros(args.echo_timeout_us),
        reply_timeout: Duration::from_micros(args.reply_timeout_us),
        expect_echo: !args.no_echo,
        ..BusConfig::default()
    };

    info!("Opening driver bus on {} at {} baud", args.port, args.baudrate);
    let mut bus = SerialTransport::open(&args.port, bus_config.baudrate)?;

    match args.command {
        Command::Probe => {
            for address in SerialAddress::ALL {
                let mut driver = Tmc2209::new(&mut bus, address, bus_config);
                let communicating = driver.is_communicating();
                let version = if communicating {
                    driver.get_version().ok()
                } else {
                    None
                };
                let serial_mode = communicating && driver.is_setup_and_communicating();
                let report = json!({
                    "address": driver.serial_address() as u8,
                    "communicating": communicating,
                    "version": version,
                    "serial_mode": serial_mode,
                });
                println!("{}", report);
            }
        }
        Command::Settings { address } => {
            let mut driver = Tmc2209::new(&mut bus, serial_address(address)?, bus_config);
            println!("{}", serde_json::to_string_pretty(&driver.get_settings())?);
        }
        Command::Status { address } => {
            let mut driver = Tmc2209::new(&mut bus, serial_address(address)?, bus_config);
            let report = json!({
                "status": driver.get_status()?,
                "global_status": driver.get_global_status()?,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Setup { address } => {
            let mut driver = Tmc2209::new(&mut bus, serial_address(address)?, bus_config);
            driver.setup()?;
            println!("{}", serde_json::to_string_pretty(&driver.get_settings())?);
        }
    }

    Ok(())
}
