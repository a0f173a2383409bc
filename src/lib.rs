/*!
 # LEGO Smart Hub Bluetooth Controller Library

 A Rust library for driving LEGO smart hubs over Bluetooth LE.
 Supports the WeDo 2.0 hub and the Boost / Powered Up hub family, which speak
 two unrelated wire formats.

 ## Features

 * Hub discovery and classification from advertisement data
 * Port attach/detach tracking per hub
 * Tilt, distance and vision sensor readings
 * Motor power with a deduplicating output scheduler
 * LED color, hub rename and tones (WeDo 2.0)
 * Button and battery telemetry

 ## Example

 ```rust,no_run
 use lego_hub_controller::*;
 use lego_hub_controller::transport::BtleplugTransport;

 #[tokio::main]
 async fn main() -> Result<()> {
     tracing_subscriber::fmt::init();

     let transport = BtleplugTransport::new().await?;
     let (handle, _task) = HubDriver::new(transport, DriverConfig::default()).spawn();
     let mut events = handle.subscribe();

     let hub = handle.connect().await?;
     println!("connected to {hub}");

     handle.set_led_color(0, 255, 0, None).await?;
     handle.set_motor(60, None, None).await?;

     while let Ok(event) = events.recv().await {
         println!("{event}");
     }
     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the hub controller library
#[derive(Error, Debug)]
pub enum Error {
    /// No Bluetooth adapters found
    #[error("No Bluetooth adapters found")]
    NoBluetoothAdapters,

    /// The adapter left the powered-on state while scanning
    #[error("Error with Bluetooth adapter ({0}), please retry")]
    AdapterUnavailable(String),

    /// A write was attempted before any characteristic was discovered
    #[error("Not connected: no characteristics discovered for this hub yet")]
    NotReady,

    /// Failed to find required BLE characteristic
    #[error("Could not find required BLE characteristic: {0}")]
    CharacteristicNotFound(String),

    /// BLE communication error
    #[error("BLE communication error: {0}")]
    BleError(String),

    /// The transport has never reported this peripheral
    #[error("Unknown hub: {0}")]
    UnknownHub(String),

    /// The driver event loop has shut down
    #[error("Hub driver is no longer running")]
    DriverStopped,

    /// Error from btleplug
    #[error(transparent)]
    BtlePlugError(#[from] btleplug::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod classify;
pub mod driver;
pub mod events;
pub mod motor;
pub mod port;
pub mod protocol;
pub mod session;
pub mod transport;

pub use classify::{classify, HubType};
pub use driver::{DriverConfig, HubDriver, HubHandle};
pub use events::HubEvent;
pub use motor::PowerCurve;
pub use port::{DeviceKind, PortId, PortInfo};
pub use session::HubRef;
pub use transport::{HubAdvertisement, HubId, Transport, TransportEvent};
