//! alsavoctl - command-line control for Alsavo Pro pool heat pumps.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};

use alsavoctl as app;

use app::alsavo::{AlsavoPro, OperatingMode, PowerMode};
use app::config::{AppConfig, ConfigLoadResult};

/// Command-line control for Alsavo Pro pool heat pumps.
#[derive(Parser)]
#[command(name = "alsavoctl")]
struct Cli {
    /// Path to config.toml (defaults to the executable's directory)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Query the pump and print the current snapshot
    Status,
    /// Set the target temperature for the active operating mode
    SetTemp {
        /// Degrees Celsius, one decimal of precision
        celsius: f64,
    },
    /// Switch operating mode (also powers the pump on)
    Mode { mode: ModeArg },
    /// Select the power level
    PowerMode { level: PowerModeArg },
    /// Power the pump off
    PowerOff,
    /// Write a raw config register
    Set { index: u16, value: u16 },
}

#[derive(ValueEnum, Clone, Copy)]
enum ModeArg {
    Cool,
    Heat,
    Auto,
}

impl From<ModeArg> for OperatingMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Cool => OperatingMode::Cool,
            ModeArg::Heat => OperatingMode::Heat,
            ModeArg::Auto => OperatingMode::Auto,
        }
    }
}

#[derive(ValueEnum, Clone, Copy)]
enum PowerModeArg {
    Silent,
    Smart,
    Powerful,
}

impl From<PowerModeArg> for PowerMode {
    fn from(arg: PowerModeArg) -> Self {
        match arg {
            PowerModeArg::Silent => PowerMode::Silent,
            PowerModeArg::Smart => PowerMode::Smart,
            PowerModeArg::Powerful => PowerMode::Powerful,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);
    let config = match AppConfig::try_load(&config_path) {
        ConfigLoadResult::Loaded(config) => config,
        ConfigLoadResult::Missing => bail!(
            "no config at {}; create it with a [device] section (host, serial, password)",
            config_path.display()
        ),
        ConfigLoadResult::Invalid(e) => bail!("config {} is invalid: {e}", config_path.display()),
    };

    let mut pump = AlsavoPro::new(
        config.device.host.clone(),
        config.device.port,
        config.device.serial,
        config.device.password.clone(),
    )
    .with_timeout(Duration::from_secs(config.protocol.timeout_secs))
    .with_transport_tries(config.protocol.transport_tries)
    .with_max_attempts(config.protocol.max_attempts);

    match cli.command {
        Command::Status => {
            pump.update().await?;
            print_status(&pump);
        }
        Command::SetTemp { celsius } => {
            // the target register depends on the current mode
            pump.update().await?;
            pump.set_target_temperature(celsius).await?;
            println!("target set to {celsius:.1} C; run `status` to confirm");
        }
        Command::Mode { mode } => {
            pump.update().await?;
            pump.set_mode(mode.into()).await?;
            println!("operating mode set; run `status` to confirm");
        }
        Command::PowerMode { level } => {
            pump.set_power_mode(level.into()).await?;
            println!("power mode set; run `status` to confirm");
        }
        Command::PowerOff => {
            pump.update().await?;
            pump.set_power_off().await?;
            println!("power off sent; run `status` to confirm");
        }
        Command::Set { index, value } => {
            pump.set_config(index, value).await?;
            println!("config[{index}] = {value} sent; run `status` to confirm");
        }
    }

    Ok(())
}

fn print_status(pump: &AlsavoPro) {
    println!("online:         {}", pump.is_online());
    match pump.operating_mode() {
        Some(mode) => println!("mode:           {mode}"),
        None => println!("mode:           unknown"),
    }
    println!("power on:       {}", pump.is_power_on());
    match pump.power_mode() {
        Some(level) => println!("power mode:     {level}"),
        None => println!("power mode:     unknown"),
    }
    println!("target:         {:.1} C", pump.target_temperature());
    println!("water in:       {:.1} C", pump.water_in_temperature());
    println!("water out:      {:.1} C", pump.water_out_temperature());
    println!("ambient:        {:.1} C", pump.ambient_temperature());
    println!("exhaust:        {:.1} C", pump.exhaust_temperature());
    println!("fan speed:      {} rpm", pump.fan_speed());
    println!("compressor:     {} A, {} Hz", pump.compressor_current(), pump.compressor_frequency());
    let errors = pump.errors();
    if errors.is_empty() {
        println!("errors:         none");
    } else {
        println!("errors:\n{errors}");
    }
}
