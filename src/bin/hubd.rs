use lego_hub_controller::transport::BtleplugTransport;
use lego_hub_controller::*;
use std::env;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Parses a comma separated argument list
fn numbers<N: std::str::FromStr>(args: Option<&str>) -> Option<Vec<N>> {
    args?
        .split(',')
        .map(|s| s.trim().parse().ok())
        .collect()
}

fn respond(result: Result<Option<HubId>>) {
    match result {
        Ok(Some(_)) => println!("OK"),
        Ok(None) => println!("ERR No matching hub"),
        Err(e) => println!("ERR {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // An optional name filter selects the hub.
    let usage = "Usage: hubd [name filter]";
    let args: Vec<_> = env::args().collect();
    if args.len() > 1 && (args[1] == "-h" || args[1] == "--help") {
        eprintln!("{usage}");
        std::process::exit(0);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("lego_hub_controller=warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = DriverConfig {
        name_filter: args.get(1).cloned(),
        ..Default::default()
    };
    let transport = BtleplugTransport::new().await?;
    let (handle, task) = HubDriver::new(transport, config).spawn();
    handle.connect().await?;

    // Inform about successful connection
    println!("OK");

    // Mainloop: wait for user input, line by line
    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await.map_err(|e| Error::Other(e.into()))? {
        let mut cmd = line.trim().splitn(2, ':');
        match cmd.next() {
            Some("motor") => match numbers::<i32>(cmd.next()).as_deref() {
                Some([speed]) => respond(handle.set_motor(*speed, None, None).await),
                Some([speed, port]) => match u8::try_from(*port) {
                    Ok(port) => respond(handle.set_motor(*speed, Some(port), None).await),
                    Err(_) => println!("ERR Invalid port {port}"),
                },
                _ => println!("ERR Invalid motor command. Use motor:<speed>[,<port>]"),
            },
            Some("led") => match numbers::<u8>(cmd.next()).as_deref() {
                Some([red, green, blue]) => {
                    respond(handle.set_led_color(*red, *green, *blue, None).await)
                }
                _ => println!("ERR Invalid color format. Use R,G,B (e.g., 255,0,0 for red)"),
            },
            Some("rename") => match cmd.next().map(str::trim).filter(|n| !n.is_empty()) {
                Some(name) => respond(handle.set_device_name(name, None).await),
                None => println!("ERR No name given"),
            },
            Some("tone") => match numbers::<u16>(cmd.next()).as_deref() {
                Some([frequency, duration]) => {
                    respond(handle.set_sound(*frequency, *duration, None).await)
                }
                _ => println!("ERR Invalid tone. Use tone:<hz>,<ms>"),
            },
            Some("ports") => match handle.port_list(None).await? {
                Some(ports) => {
                    for port in ports {
                        println!("{port}");
                    }
                    println!("OK");
                }
                None => println!("ERR No matching hub"),
            },
            Some("rssi") => match handle.signal_strength(None).await {
                Ok(Some(rssi)) => println!("OK {rssi}"),
                Ok(None) => println!("ERR Signal strength unavailable"),
                Err(e) => println!("ERR {e}"),
            },
            Some("quit") => break,
            Some("") | None => println!("ERR No command given"),
            Some(other) => println!("ERR Unknown command: {other}"),
        }
    }

    handle.disconnect().await?;
    drop(handle);
    task.await.map_err(|e| Error::Other(e.into()))?;
    println!("OK");
    Ok(())
}
