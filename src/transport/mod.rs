/*!
 # Bluetooth transport seam

 The driver never talks to a radio directly. Everything it needs from the
 Bluetooth stack (discovery, connection, characteristic discovery,
 notifications and writes) goes through the [`Transport`] trait, so the
 protocol core can run against btleplug or against the in-memory
 [`SimulatedTransport`].
*/

use async_trait::async_trait;
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::Result;

mod btle;
mod simulated;

pub use self::btle::BtleplugTransport;
pub use self::simulated::{boost_profile, wedo2_profile, SimulatedTransport, WriteRecord};

/// Transport-assigned identifier of a peripheral
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HubId(String);

impl HubId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HubId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Advertisement data reported while scanning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubAdvertisement {
    /// Peripheral identifier
    pub id: HubId,
    /// Advertised local name, if any
    pub local_name: Option<String>,
    /// Advertised service ids as lowercase hex without dashes, in advertised order
    pub service_ids: Vec<String>,
    /// Signal strength at discovery time
    pub rssi: Option<i16>,
}

/// A discovered GATT characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
}

/// Everything the transport pushes towards the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peripheral was seen while scanning
    Discovered(HubAdvertisement),
    /// Raw bytes pushed by a subscribed characteristic
    Notification {
        hub: HubId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// Link to a peripheral is gone, voluntarily or not
    Disconnected(HubId),
    /// Adapter power state changed
    AdapterState { powered_on: bool, description: String },
}

/// Capabilities the driver consumes from a Bluetooth stack
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Subscribe to discovery, notification and link events
    fn event_stream(&self) -> broadcast::Receiver<TransportEvent>;

    async fn start_scan(&self) -> Result<()>;

    async fn stop_scan(&self) -> Result<()>;

    async fn connect(&self, hub: &HubId) -> Result<()>;

    /// Discover every characteristic of every service of a connected hub
    async fn discover_characteristics(&self, hub: &HubId) -> Result<Vec<CharacteristicInfo>>;

    /// Enable notifications; values arrive as [`TransportEvent::Notification`]
    async fn subscribe(&self, hub: &HubId, characteristic: &CharacteristicInfo) -> Result<()>;

    async fn write(&self, hub: &HubId, characteristic: &CharacteristicInfo, data: &[u8])
        -> Result<()>;

    async fn disconnect(&self, hub: &HubId) -> Result<()>;

    /// Current signal strength in dBm
    async fn rssi(&self, hub: &HubId) -> Result<Option<i16>>;
}

/// Normalizes a UUID into the dash-less lowercase form used for matching
pub fn uuid_key(uuid: &Uuid) -> String {
    uuid.simple().to_string()
}

/// Finds a characteristic by a short hex segment of its UUID, falling back to
/// the UUID of its service.
pub fn find_characteristic<'a>(
    characteristics: &'a [CharacteristicInfo],
    short_id: &str,
) -> Option<&'a CharacteristicInfo> {
    let needle = short_id.to_lowercase();
    characteristics
        .iter()
        .find(|c| uuid_key(&c.uuid).contains(&needle))
        .or_else(|| {
            characteristics
                .iter()
                .find(|c| uuid_key(&c.service_uuid).contains(&needle))
        })
}
