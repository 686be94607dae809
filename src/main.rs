use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use log::info;

use nox_logger::config::RunConfig;
use nox_logger::inlet::{FixedInlet, InletReader, InletSource, PinInletReader, SysfsGpio};
use nox_logger::logging::init_logging;
use nox_logger::sink::CsvLogs;
use nox_logger::{NoxAnalyzer, Opcode, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "nox-logger", about = "Log NOx analyzer readings to daily CSV files")]
struct Args {
    /// YAML configuration file (created with defaults if missing)
    #[arg(short, long, default_value = "nox_logger.yaml")]
    config: PathBuf,
    /// Serial port, overrides the configuration (e.g. /dev/ttyUSB0)
    #[arg(short, long)]
    port: Option<String>,
    /// Directory for the CSV logs, overrides the configuration
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Sample until interrupted with Ctrl-C (default)
    Run,
    /// Send a single command and print the raw reply
    Probe {
        /// Opcode to send, e.g. RD3, RS, RP0
        opcode: String,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let mut config = RunConfig::from_file(&args.config)?;
    config.apply_args(args.port, args.data_dir);
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {:?}", args.config))?;

    match args.command.unwrap_or(Cmd::Run) {
        Cmd::Run => sample(&config),
        Cmd::Probe { opcode } => probe(&config, &opcode),
    }
}

fn open_analyzer(config: &RunConfig) -> Result<NoxAnalyzer> {
    let analyzer = NoxAnalyzer::connect_serial(
        &config.serial,
        config.instrument.id,
        config.instrument.verify_bcc,
    )
    .with_context(|| format!("Failed to open serial port at {}", config.serial.port))?;
    println!("Using port {}", config.serial.port);
    Ok(analyzer)
}

fn open_inlet(config: &RunConfig) -> Result<Box<dyn InletReader>> {
    let reader: Box<dyn InletReader> = match config.inlet.source {
        InletSource::Gpio => {
            let pins = config.inlet.pin_array()?;
            let mut gpio =
                SysfsGpio::open(&pins).context("Failed to set up inlet selector lines")?;
            if let Some(pump) = config.inlet.pump_pin {
                gpio.hold_low(pump).with_context(|| {
                    format!("Failed to switch off the purge pump on line {pump}")
                })?;
            }
            Box::new(PinInletReader::new(gpio, pins))
        }
        InletSource::Fixed => Box::new(FixedInlet(config.inlet.fixed_inlet())),
    };
    Ok(reader)
}

fn sample(config: &RunConfig) -> Result<()> {
    let analyzer = open_analyzer(config)?;
    let inlet = open_inlet(config)?;
    let now = Local::now();
    let logs = CsvLogs::open(config.output.clone(), now.date_naive()).with_context(|| {
        format!("Failed to open log files in {:?}", config.output.data_dir)
    })?;

    let running = Arc::new(AtomicBool::new(true));
    let running_for_signal = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_for_signal.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl-C handler")?;

    let mut context = nox_logger::run::start(config, analyzer, inlet, Box::new(logs), now)?;
    let summary = context.run(&SystemClock, &running);
    drop(context);

    println!();
    println!("{summary}");
    println!("Serial port closed.");
    Ok(())
}

fn probe(config: &RunConfig, opcode: &str) -> Result<()> {
    let opcode: Opcode = opcode.parse()?;
    let mut analyzer = open_analyzer(config)?;
    let report = analyzer.probe(opcode)?;

    println!("Sent:     {}", report.frame.to_hex());
    println!("Received: {}", report.response.to_hex());
    println!("Class:    {:?}", report.response.classify());
    match report.decoded {
        Ok(value) => println!("Value:    {value}"),
        Err(failure) => println!("Failure:  {failure}"),
    }
    info!("probe of {opcode} done");
    Ok(())
}
