use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{find_characteristic, CharacteristicInfo, HubAdvertisement, HubId, Transport, TransportEvent};
use crate::{Error, Result};

const WEDO2_HUB_SERVICE: u128 = 0x0000_1523_1212_efde_1523_785f_eabc_d123;
const WEDO2_IO_SERVICE: u128 = 0x0000_4f0e_1212_efde_1523_785f_eabc_d123;
const BATTERY_SERVICE: u128 = 0x0000_180f_0000_1000_8000_0080_5f9b_34fb;
const BATTERY_LEVEL: u128 = 0x0000_2a19_0000_1000_8000_0080_5f9b_34fb;
const BOOST_HUB_SERVICE: u128 = 0x0000_1623_1212_efde_1623_785f_eabc_d123;
const BOOST_HUB_CHARACTERISTIC: u128 = 0x0000_1624_1212_efde_1623_785f_eabc_d123;

/// WeDo 2.0 base UUID with a 16 bit short id spliced in
fn wedo2_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | (WEDO2_HUB_SERVICE & !(0xffff_u128 << 96)))
}

fn characteristic(short: u16, service: u128) -> CharacteristicInfo {
    CharacteristicInfo {
        uuid: wedo2_uuid(short),
        service_uuid: Uuid::from_u128(service),
    }
}

/// GATT layout of a WeDo 2.0 hub
pub fn wedo2_profile() -> Vec<CharacteristicInfo> {
    let mut chars: Vec<CharacteristicInfo> = [0x1524, 0x1526, 0x1527, 0x1528, 0x1529, 0x152a]
        .into_iter()
        .map(|short| characteristic(short, WEDO2_HUB_SERVICE))
        .collect();
    chars.extend(
        [0x1560, 0x1561, 0x1563, 0x1565]
            .into_iter()
            .map(|short| characteristic(short, WEDO2_IO_SERVICE)),
    );
    chars.push(CharacteristicInfo {
        uuid: Uuid::from_u128(BATTERY_LEVEL),
        service_uuid: Uuid::from_u128(BATTERY_SERVICE),
    });
    chars
}

/// GATT layout of a Boost / Powered Up hub
pub fn boost_profile() -> Vec<CharacteristicInfo> {
    vec![CharacteristicInfo {
        uuid: Uuid::from_u128(BOOST_HUB_CHARACTERISTIC),
        service_uuid: Uuid::from_u128(BOOST_HUB_SERVICE),
    }]
}

/// A write the driver issued through the simulated transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub hub: HubId,
    pub characteristic: Uuid,
    pub data: Vec<u8>,
    pub at: Instant,
}

struct SimulatedHub {
    advertisement: HubAdvertisement,
    characteristics: Vec<CharacteristicInfo>,
    connected: bool,
    subscribed: Vec<Uuid>,
}

#[derive(Default)]
struct State {
    hubs: HashMap<HubId, SimulatedHub>,
    writes: Vec<WriteRecord>,
    scanning: bool,
    fail_writes: bool,
}

/// In-memory [`Transport`] that records writes and lets callers inject
/// advertisements, notifications and link loss.
#[derive(Clone)]
pub struct SimulatedTransport {
    state: Arc<Mutex<State>>,
    events: broadcast::Sender<TransportEvent>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            events,
        }
    }

    /// Registers a hub; it is advertised whenever a scan starts
    pub fn add_hub(&self, advertisement: HubAdvertisement, characteristics: Vec<CharacteristicInfo>) {
        let id = advertisement.id.clone();
        self.state.lock().hubs.insert(
            id,
            SimulatedHub {
                advertisement,
                characteristics,
                connected: false,
                subscribed: Vec::new(),
            },
        );
    }

    /// Re-sends the advertisement of a registered hub
    pub fn advertise(&self, hub: &HubId) {
        let advertisement = self
            .state
            .lock()
            .hubs
            .get(hub)
            .map(|h| h.advertisement.clone());
        if let Some(advertisement) = advertisement {
            let _ = self.events.send(TransportEvent::Discovered(advertisement));
        }
    }

    /// Pushes a notification on the characteristic matching `short_id`
    pub fn notify(&self, hub: &HubId, short_id: &str, value: &[u8]) {
        let uuid = self
            .state
            .lock()
            .hubs
            .get(hub)
            .and_then(|h| find_characteristic(&h.characteristics, short_id).map(|c| c.uuid));
        if let Some(characteristic) = uuid {
            trace!("Simulated notification on {}: {:02x?}", characteristic, value);
            let _ = self.events.send(TransportEvent::Notification {
                hub: hub.clone(),
                characteristic,
                value: value.to_vec(),
            });
        }
    }

    /// Simulates link loss
    pub fn drop_link(&self, hub: &HubId) {
        if let Some(h) = self.state.lock().hubs.get_mut(hub) {
            h.connected = false;
        }
        let _ = self.events.send(TransportEvent::Disconnected(hub.clone()));
    }

    pub fn set_powered(&self, powered_on: bool) {
        let _ = self.events.send(TransportEvent::AdapterState {
            powered_on,
            description: if powered_on { "PoweredOn" } else { "PoweredOff" }.to_owned(),
        });
    }

    /// Makes every subsequent write fail
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    pub fn is_connected(&self, hub: &HubId) -> bool {
        self.state
            .lock()
            .hubs
            .get(hub)
            .map(|h| h.connected)
            .unwrap_or(false)
    }

    pub fn subscribed(&self, hub: &HubId) -> Vec<Uuid> {
        self.state
            .lock()
            .hubs
            .get(hub)
            .map(|h| h.subscribed.clone())
            .unwrap_or_default()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    /// Drains the recorded writes
    pub fn take_writes(&self) -> Vec<WriteRecord> {
        std::mem::take(&mut self.state.lock().writes)
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn event_stream(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn start_scan(&self) -> Result<()> {
        let advertisements: Vec<HubAdvertisement> = {
            let mut state = self.state.lock();
            state.scanning = true;
            state
                .hubs
                .values()
                .filter(|h| !h.connected)
                .map(|h| h.advertisement.clone())
                .collect()
        };
        debug!("Simulated scan found {} hubs", advertisements.len());
        for advertisement in advertisements {
            let _ = self.events.send(TransportEvent::Discovered(advertisement));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.state.lock().scanning = false;
        Ok(())
    }

    async fn connect(&self, hub: &HubId) -> Result<()> {
        let mut state = self.state.lock();
        let h = state
            .hubs
            .get_mut(hub)
            .ok_or_else(|| Error::UnknownHub(hub.to_string()))?;
        h.connected = true;
        Ok(())
    }

    async fn discover_characteristics(&self, hub: &HubId) -> Result<Vec<CharacteristicInfo>> {
        self.state
            .lock()
            .hubs
            .get(hub)
            .map(|h| h.characteristics.clone())
            .ok_or_else(|| Error::UnknownHub(hub.to_string()))
    }

    async fn subscribe(&self, hub: &HubId, characteristic: &CharacteristicInfo) -> Result<()> {
        let mut state = self.state.lock();
        let h = state
            .hubs
            .get_mut(hub)
            .ok_or_else(|| Error::UnknownHub(hub.to_string()))?;
        h.subscribed.push(characteristic.uuid);
        Ok(())
    }

    async fn write(
        &self,
        hub: &HubId,
        characteristic: &CharacteristicInfo,
        data: &[u8],
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(Error::BleError("simulated write failure".to_owned()));
        }
        state.writes.push(WriteRecord {
            hub: hub.clone(),
            characteristic: characteristic.uuid,
            data: data.to_vec(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn disconnect(&self, hub: &HubId) -> Result<()> {
        if let Some(h) = self.state.lock().hubs.get_mut(hub) {
            h.connected = false;
            h.subscribed.clear();
        }
        let _ = self.events.send(TransportEvent::Disconnected(hub.clone()));
        Ok(())
    }

    async fn rssi(&self, hub: &HubId) -> Result<Option<i16>> {
        self.state
            .lock()
            .hubs
            .get(hub)
            .map(|h| h.advertisement.rssi)
            .ok_or_else(|| Error::UnknownHub(hub.to_string()))
    }
}
