//! `metrology` - bench instrument automation from the command line.
//!
//! ```bash
//! metrology list
//! metrology query GPIB0::22::INSTR "*IDN?"
//! metrology run GPIB0::16::INSTR --device keithley_2015 dcv range=10
//! metrology sweep --source GPIB0::19::INSTR --source-device agilent_n5181a \
//!     --grid config/grids/example.toml \
//!     --meter GPIB0::13::INSTR --meter-device hp_4418b \
//!     --correction config/corrections/example.toml
//! metrology --simulate harmonics GPIB0::20::INSTR --device rs_fsp --fundamental 1000 --power 0
//! ```
//!
//! Results go to stdout as JSON; logs go to stderr (`RUST_LOG` filters them).

mod settings;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrology_core::{
    list_resources, ConnectOptions, Instrument, InstrumentCategory, ReplyFormat,
    SimulatedTransport,
};
use metrology_driver_generic::{
    find_profile, load_profiles, parse_key_value, ParamMap, ParamValue, ProfiledInstrument,
};
use metrology_procedures::{
    measure_corrected, measure_harmonics, run_sweep, CorrectionTable, SweepGrid, SweepMeter,
    SweepOptions, MAX_HARMONICS,
};
use serde::Serialize;
use settings::Settings;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "metrology")]
#[command(about = "SCPI automation for metrology bench instruments", long_about = None)]
struct Cli {
    /// Settings file (defaults to config/metrology.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Talk to simulated instruments instead of real ones
    #[arg(long, global = true)]
    simulate: bool,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List instruments the VISA library can see
    List,

    /// List device profiles
    Profiles,

    /// Query *IDN?
    Identify {
        /// VISA resource string, e.g. GPIB0::22::INSTR
        resource: String,
    },

    /// Write a raw command
    Send {
        /// VISA resource string
        resource: String,
        /// Command text
        command: String,
    },

    /// Write a raw query and decode the reply
    Query {
        /// VISA resource string
        resource: String,
        /// Query text
        command: String,
        /// float, scientific, integer, bool or text
        #[arg(long, default_value = "text")]
        format: ReplyFormat,
    },

    /// Run a named profile command
    Run {
        /// VISA resource string
        resource: String,
        /// Profile name or file stem
        #[arg(long)]
        device: String,
        /// Command name from the profile
        command: String,
        /// Parameters as key=value
        #[arg(value_parser = parse_key_value)]
        args: Vec<(String, ParamValue)>,
        /// Print the rendered commands without connecting
        #[arg(long)]
        dry_run: bool,
    },

    /// Step a source over a level/frequency grid
    Sweep {
        /// Source resource
        #[arg(long)]
        source: String,
        /// Source profile
        #[arg(long)]
        source_device: String,
        /// Grid file with `powers` and `frequencies`
        #[arg(long)]
        grid: PathBuf,
        /// Meter resource
        #[arg(long, requires = "meter_device")]
        meter: Option<String>,
        /// Meter profile
        #[arg(long, requires = "meter")]
        meter_device: Option<String>,
        /// Correction table for a power meter
        #[arg(long, requires = "meter")]
        correction: Option<PathBuf>,
        /// Settle time per point (overrides settings)
        #[arg(long)]
        settle_ms: Option<u64>,
    },

    /// Look up a calibration factor, optionally measuring with it
    Correct {
        /// Correction table file
        #[arg(long)]
        table: PathBuf,
        /// Frequency in Hz
        #[arg(long)]
        frequency: f64,
        /// Power meter resource
        #[arg(long, requires = "meter_device")]
        meter: Option<String>,
        /// Power meter profile
        #[arg(long, requires = "meter")]
        meter_device: Option<String>,
    },

    /// Measure harmonic distortion with a spectrum analyzer
    Harmonics {
        /// Analyzer resource
        resource: String,
        /// Analyzer profile
        #[arg(long)]
        device: String,
        /// Fundamental frequency in Hz
        #[arg(long)]
        fundamental: f64,
        /// Expected carrier power in dBm
        #[arg(long)]
        power: f64,
        /// Number of harmonics after the fundamental
        #[arg(
            long,
            default_value = "5",
            value_parser = clap::value_parser!(u32).range(1..=MAX_HARMONICS as i64)
        )]
        count: u32,
    },
}

/// Opens instruments, real or simulated, with the loaded settings.
struct Bench {
    settings: Settings,
    simulate: bool,
}

impl Bench {
    fn simulated(&self, resource: &str) -> SimulatedTransport {
        let sim = SimulatedTransport::new(resource);
        sim.respond_to("*IDN?", "SIMULATED,METROLOGY,0,0")
            .set_default_reply(Some("0"));
        sim
    }

    async fn raw(&self, resource: &str) -> Result<Instrument> {
        if self.simulate {
            return Ok(Instrument::new(resource, Box::new(self.simulated(resource))));
        }
        let options = ConnectOptions::default().with_timeout(self.settings.timeout());
        Instrument::open(resource, &options).await
    }

    async fn device(&self, resource: &str, device: &str) -> Result<ProfiledInstrument> {
        self.device_with(resource, device, self.simulate).await
    }

    async fn device_with(
        &self,
        resource: &str,
        device: &str,
        simulate: bool,
    ) -> Result<ProfiledInstrument> {
        let profile = find_profile(&self.settings.profile_dir, device)
            .with_context(|| format!("No profile '{}'", device))?;
        if simulate {
            let sim = self.simulated(resource);
            ProfiledInstrument::with_transport(profile, Box::new(sim)).await
        } else {
            ProfiledInstrument::open(resource, profile).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    init_tracing(cli.log_json || settings.log_json);

    let bench = Bench {
        settings,
        simulate: cli.simulate,
    };

    match cli.command {
        Commands::List => {
            let resources = list_resources().await?;
            print_json(&resources)
        }
        Commands::Profiles => profiles(&bench),
        Commands::Identify { resource } => {
            let instrument = bench.raw(&resource).await?;
            print_json(&instrument.identify().await?)
        }
        Commands::Send { resource, command } => {
            let instrument = bench.raw(&resource).await?;
            instrument.command(&command).await
        }
        Commands::Query {
            resource,
            command,
            format,
        } => {
            let instrument = bench.raw(&resource).await?;
            print_json(&instrument.query_reading(&command, format).await?)
        }
        Commands::Run {
            resource,
            device,
            command,
            args,
            dry_run,
        } => {
            let args: ParamMap = args.into_iter().collect();
            if dry_run {
                let driver = bench.device_with(&resource, &device, true).await?;
                print_json(&driver.format_command(&command, &args)?)
            } else {
                let driver = bench.device(&resource, &device).await?;
                print_json(&driver.run(&command, &args).await?)
            }
        }
        Commands::Sweep {
            source,
            source_device,
            grid,
            meter,
            meter_device,
            correction,
            settle_ms,
        } => {
            let grid = SweepGrid::load(&grid)?;
            let options = SweepOptions {
                settle: settle_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| bench.settings.settle()),
            };
            let table = correction.as_deref().map(CorrectionTable::load).transpose()?;
            let generator = bench.device(&source, &source_device).await?;
            let meter = match (meter, meter_device) {
                (Some(resource), Some(device)) => Some(bench.device(&resource, &device).await?),
                _ => None,
            };

            let sweep_meter = match (&meter, &table) {
                (None, _) => SweepMeter::None,
                (Some(meter), Some(table)) => SweepMeter::CorrectedPower(meter, table),
                (Some(meter), None)
                    if meter.profile().device.category == InstrumentCategory::PowerMeter =>
                {
                    SweepMeter::Power(meter)
                }
                (Some(meter), None) => SweepMeter::Reading(meter),
            };
            let points = run_sweep(&generator, &grid, &options, sweep_meter).await?;
            print_json(&points)
        }
        Commands::Correct {
            table,
            frequency,
            meter,
            meter_device,
        } => {
            let table = CorrectionTable::load(&table)?;
            let factor_pct = table.factor_at(frequency)?;
            let power_dbm = match (meter, meter_device) {
                (Some(resource), Some(device)) => {
                    let meter = bench.device(&resource, &device).await?;
                    Some(measure_corrected(&meter, &table, frequency).await?)
                }
                _ => None,
            };
            print_json(&CorrectionResult {
                frequency_hz: frequency,
                factor_pct,
                power_dbm,
            })
        }
        Commands::Harmonics {
            resource,
            device,
            fundamental,
            power,
            count,
        } => {
            let analyzer = bench.device(&resource, &device).await?;
            let report = measure_harmonics(&analyzer, fundamental, power, count).await?;
            print_json(&report)
        }
    }
}

#[derive(Serialize)]
struct CorrectionResult {
    frequency_hz: f64,
    factor_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    power_dbm: Option<f64>,
}

#[derive(Serialize)]
struct ProfileSummary {
    name: String,
    category: InstrumentCategory,
    commands: Vec<String>,
    capabilities: Vec<String>,
}

fn profiles(bench: &Bench) -> Result<()> {
    let summaries: Vec<ProfileSummary> = load_profiles(&bench.settings.profile_dir)?
        .into_iter()
        .map(|p| ProfileSummary {
            name: p.device.name,
            category: p.device.category,
            commands: p.commands.into_keys().collect(),
            capabilities: p.capabilities.into_keys().collect(),
        })
        .collect();
    print_json(&summaries)
}
