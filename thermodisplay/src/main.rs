/*!
# Thermodisplay Application

Shows a temperature on a 4-digit TM1637 7-segment module wired to two GPIO
lines. The temperature comes either from a local measurement program that is
run once per interval, or from an MQTT topic.

## Display

- `23.4` - current value (tenths of a degree, sign in the first position)
- `Err` - the last measurement could not be parsed
- `---` - nothing received yet
- `StL` - no good value within the watchdog window
- `OFL` - value does not fit

## Usage

### Local measurement program
```bash
thermodisplay local -i 60 --program ./r4dcb08 -- -f
```

### MQTT topic
```bash
thermodisplay mqtt --host broker.lan --topic home/outside/temp --watchdog 300
```

### Without hardware
```bash
thermodisplay --simulate local --program ./fake-sensor
```
*/

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shared::{Classifier, ControlLoop, ReconnectPolicy, RemoteSource, SegmentDisplay, TemperatureSource};

mod command;
mod config;
mod gpio;
mod mqtt;

use command::CommandSource;
use config::AppConfig;
use mqtt::MqttTransport;

#[derive(Parser)]
#[command(name = "thermodisplay")]
#[command(about = "Temperature display on a TM1637 7-segment module")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (default: thermodisplay.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use an emulated display instead of GPIO hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// GPIO line wired to DIO
    #[arg(long, global = true)]
    dio: Option<u32>,

    /// GPIO line wired to CLK
    #[arg(long, global = true)]
    clk: Option<u32>,

    /// GPIO character device
    #[arg(long, global = true)]
    chip: Option<String>,

    /// Display brightness
    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(0..=7))]
    brightness: Option<u8>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the output of a local measurement program
    Local {
        /// Measurement interval in seconds
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,

        /// Measurement program
        #[arg(long)]
        program: Option<String>,

        /// Arguments for the measurement program (after `--`)
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Show values published on an MQTT topic
    Mqtt {
        /// Render interval in seconds
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,

        /// Broker host
        #[arg(long)]
        host: Option<String>,

        /// Broker port
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
        port: Option<u16>,

        /// Topic carrying the temperature
        #[arg(short, long)]
        topic: Option<String>,

        /// Seconds without a value before showing stale (0 = never)
        #[arg(short, long)]
        watchdog: Option<u64>,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = config::DEFAULT_CONFIG_FILE)]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));

    // Logging goes to stderr, stdout is for the banner
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    match cli.command {
        Commands::Config { ref output } => generate_config_file(output),

        Commands::Local { interval, ref program, ref args } => {
            let mut config = load_config(&cli)?;
            if let Some(interval) = interval {
                config.interval_secs = interval;
            }
            if let Some(program) = program {
                config.local.program = program.clone();
            }
            if !args.is_empty() {
                config.local.args = args.clone();
            }
            config.validate()?;

            println!("🌡️ Temperature display (local program)");
            println!("📟 Program: {} {}", config.local.program, config.local.args.join(" "));
            println!("⏱️ Measurement interval: {} seconds", config.interval_secs);

            let source = CommandSource::new(&config.local);
            run_display(&config, cli.simulate, source, Duration::ZERO)
        }

        Commands::Mqtt { interval, ref host, port, ref topic, watchdog } => {
            let mut config = load_config(&cli)?;
            if let Some(interval) = interval {
                config.interval_secs = interval;
            }
            if let Some(host) = host {
                config.mqtt.host = host.clone();
            }
            if let Some(port) = port {
                config.mqtt.port = port;
            }
            if let Some(topic) = topic {
                config.mqtt.topic = topic.clone();
            }
            if let Some(watchdog) = watchdog {
                config.mqtt.watchdog_secs = watchdog;
            }
            config.validate()?;

            println!("🌡️ Temperature display (MQTT)");
            println!("📡 Broker: {}:{}", config.mqtt.host, config.mqtt.port);
            println!("📨 Topic: {}", config.mqtt.topic);
            println!("⏱️ Display interval: {} seconds", config.interval_secs);
            if config.mqtt.watchdog_secs > 0 {
                println!("🐕 Watchdog: {} seconds", config.mqtt.watchdog_secs);
            }

            let transport = MqttTransport::new(&config.mqtt)?;
            let policy = ReconnectPolicy::new(&config.mqtt.backoff);
            let source = RemoteSource::new(transport, config.mqtt.topic.clone(), policy);
            let watchdog = Duration::from_secs(config.mqtt.watchdog_secs);
            run_display(&config, cli.simulate, source, watchdog)
        }
    }
}

/// Configuration file plus the global display overrides
fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::resolve(cli.config.as_deref())?;

    if let Some(dio) = cli.dio {
        config.display.dio_pin = dio;
    }
    if let Some(clk) = cli.clk {
        config.display.clk_pin = clk;
    }
    if let Some(chip) = &cli.chip {
        config.display.chip = chip.clone();
    }
    if let Some(brightness) = cli.brightness {
        config.display.driver.brightness = brightness;
    }

    Ok(config)
}

/// Initialize the display and run the control loop until Ctrl+C
fn run_display<S: TemperatureSource>(
    config: &AppConfig,
    simulate: bool,
    source: S,
    watchdog: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("\n🛑 Received Ctrl+C, shutting down gracefully...");
        flag.store(false, Ordering::SeqCst);
    })?;

    let mut display = gpio::open_display(&config.display, simulate)?;
    if let Err(e) = display.init() {
        error!("Error initializing display: {}", e);
        display.cleanup();
        return Err(format!("Display initialization failed: {}", e).into());
    }

    println!("Press Ctrl+C to exit\n");

    let mut control = ControlLoop::new(
        display,
        source,
        Classifier::new(watchdog),
        Duration::from_secs(config.interval_secs),
        Duration::from_millis(config.wait_step_ms),
    );
    control.run(&running);

    info!("Exiting program...");
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::new();
    config.save_to_file(output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   thermodisplay --config {} local", output_path.display());

    Ok(())
}
