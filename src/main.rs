use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use lego_hub_controller::driver::DEFAULT_SETTLE_DELAY;
use lego_hub_controller::transport::BtleplugTransport;
use lego_hub_controller::*;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, trace, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    options: Options,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug)]
struct Options {
    /// Only connect to hubs whose name contains this string
    #[arg(short, long, global = true)]
    name: Option<String>,

    /// Hub to address: ordinal (0 = first connected), id or name
    #[arg(long, global = true)]
    hub: Option<HubRef>,

    /// Motor scheduler period in milliseconds
    #[arg(long, global = true, default_value_t = 120)]
    tick_ms: u64,

    /// Use the power ranges of older hub firmware
    #[arg(long, global = true)]
    legacy_curve: bool,

    /// Stop scanning after this many hubs
    #[arg(long, global = true)]
    max_hubs: Option<usize>,
}

impl Options {
    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            name_filter: self.name.clone(),
            tick_interval: Duration::from_millis(self.tick_ms),
            power_curve: if self.legacy_curve {
                PowerCurve::Legacy
            } else {
                PowerCurve::Current
            },
            max_hubs: self.max_hubs,
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print hub events until Ctrl-C
    Monitor,
    /// Run a motor for a while
    Motor {
        /// Speed from -100 to 100
        #[arg(short, long, allow_hyphen_values = true)]
        speed: i32,
        /// Port of the motor, first motor if omitted
        #[arg(short, long)]
        port: Option<u8>,
        /// How long to run before stopping
        #[arg(long, default_value_t = 2)]
        seconds: u64,
    },
    /// Set the hub LED color
    Led {
        #[arg(short, long)]
        red: u8,
        #[arg(short, long)]
        green: u8,
        #[arg(short, long)]
        blue: u8,
    },
    /// Rename the hub
    Rename {
        #[arg(long = "to")]
        new_name: String,
    },
    /// Play a tone (WeDo 2.0 only)
    Tone {
        /// Frequency in Hz
        #[arg(short, long, default_value_t = 440)]
        frequency: u16,
        /// Duration in milliseconds
        #[arg(short, long, default_value_t = 500)]
        duration: u16,
    },
    /// List attached devices
    Ports,
    /// Show signal strength
    Rssi,
    /// Cycle through LED colors and spin the first motor
    Demo {
        /// Duration of each demo step in seconds
        #[arg(short, long, default_value_t = 2)]
        duration: u64,
    },
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("lego_hub_controller=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments: {:?}", cli.options);

    let transport = match BtleplugTransport::new().await {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to initialize Bluetooth: {}", e);
            return Err(e.into());
        }
    };
    let (handle, task) = HubDriver::new(transport, cli.options.driver_config()).spawn();
    let mut events = handle.subscribe();

    info!("Waiting for a hub, press Ctrl-C to abort");
    let id = tokio::select! {
        id = handle.connect() => id?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted while scanning");
            return Ok(());
        }
    };
    info!("Connected to {}", id);

    let hub = cli.options.hub;
    let result = match cli.command.unwrap_or(Commands::Monitor) {
        Commands::Monitor => monitor(&mut events).await,
        Commands::Motor {
            speed,
            port,
            seconds,
        } => run_motor(&handle, speed, port, hub, seconds).await,
        Commands::Led { red, green, blue } => handle
            .set_led_color(red, green, blue, hub)
            .await
            .map(report)
            .map_err(Into::into),
        Commands::Rename { new_name } => {
            let sent = handle.set_device_name(&new_name, hub).await.map(report);
            // A freshly connected Boost hub only takes the name once it has settled
            tokio::time::sleep(DEFAULT_SETTLE_DELAY * 2).await;
            sent.map_err(Into::into)
        }
        Commands::Tone {
            frequency,
            duration,
        } => {
            let sent = handle.set_sound(frequency, duration, hub).await.map(report);
            tokio::time::sleep(Duration::from_millis(duration as u64)).await;
            sent.map_err(Into::into)
        }
        Commands::Ports => list_ports(&handle, hub).await,
        Commands::Rssi => match handle.signal_strength(hub).await? {
            Some(rssi) => {
                println!("{rssi} dBm");
                Ok(())
            }
            None => Err(eyre!("signal strength unavailable")),
        },
        Commands::Demo { duration } => run_demo(&handle, hub, duration).await,
    };

    handle.disconnect().await?;
    drop(handle);
    if let Err(e) = task.await {
        error!("Driver task failed: {}", e);
    }
    result
}

fn report(hub: Option<HubId>) {
    match hub {
        Some(hub) => debug!("Command sent to {}", hub),
        None => warn!("No matching hub, command ignored"),
    }
}

#[instrument(skip(events))]
async fn monitor(events: &mut tokio::sync::broadcast::Receiver<HubEvent>) -> Result<()> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => println!("{event}"),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} events", skipped),
                Err(RecvError::Closed) => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping monitor");
                return Ok(());
            }
        }
    }
}

#[instrument(skip(handle))]
async fn run_motor(
    handle: &HubHandle,
    speed: i32,
    port: Option<u8>,
    hub: Option<HubRef>,
    seconds: u64,
) -> Result<()> {
    // Attach reports arrive shortly after connecting
    sleep_ms(500).await;
    report(handle.set_motor(speed, port, hub.clone()).await?);
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => warn!("Interrupted"),
    }
    handle.set_motor(0, port, hub).await?;
    // Let the scheduler push the stop
    sleep_ms(300).await;
    Ok(())
}

#[instrument(skip(handle))]
async fn list_ports(handle: &HubHandle, hub: Option<HubRef>) -> Result<()> {
    sleep_ms(500).await;
    let ports = handle
        .port_list(hub)
        .await?
        .ok_or_else(|| eyre!("no matching hub"))?;
    if ports.is_empty() {
        println!("no devices attached");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

async fn sleep_ms(ms: u64) {
    trace!("Sleeping for {}ms", ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[instrument(skip(handle))]
async fn run_demo(handle: &HubHandle, hub: Option<HubRef>, duration: u64) -> Result<()> {
    info!("Running hub demo with {}s steps", duration);
    let step = duration * 1000;

    for (red, green, blue) in [(255, 0, 0), (0, 255, 0), (0, 0, 255)] {
        info!("Setting LED to ({}, {}, {})", red, green, blue);
        handle.set_led_color(red, green, blue, hub.clone()).await?;
        sleep_ms(step).await;
    }

    for speed in [50, 100, -50, 0] {
        info!("Motor speed {}", speed);
        report(handle.set_motor(speed, None, hub.clone()).await?);
        sleep_ms(step).await;
    }

    info!("Playing tone");
    handle.set_sound(880, 300, hub.clone()).await?;
    sleep_ms(300).await;

    handle.set_led_color(255, 255, 255, hub).await?;
    info!("Demo completed!");
    Ok(())
}
