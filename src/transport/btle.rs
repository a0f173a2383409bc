use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use super::{uuid_key, CharacteristicInfo, HubAdvertisement, HubId, Transport, TransportEvent};
use crate::{Error, Result};

/// Gets the default Bluetooth adapter
#[instrument(skip(manager))]
async fn get_central(manager: &Manager) -> Result<Adapter> {
    debug!("Getting default Bluetooth adapter");
    let adapters = manager.adapters().await?;
    let Some(adapter) = adapters.into_iter().next() else {
        error!("No Bluetooth adapters found");
        return Err(Error::NoBluetoothAdapters);
    };
    debug!("Using Bluetooth adapter");
    Ok(adapter)
}

/// Maps an adapter state to the event the driver sees.
///
/// Only a definite power-off fails pending connects. `Unknown` is what some
/// platforms report while the adapter is still starting up, so it is skipped.
fn adapter_event(state: CentralState) -> Option<TransportEvent> {
    let powered_on = match state {
        CentralState::PoweredOn => true,
        CentralState::PoweredOff => false,
        CentralState::Unknown => {
            debug!("Adapter state not known yet");
            return None;
        }
    };
    Some(TransportEvent::AdapterState {
        powered_on,
        description: format!("{state:?}"),
    })
}

/// Notification pump tasks, one per connected hub
#[derive(Clone, Default)]
struct Forwarders(Arc<parking_lot::Mutex<HashMap<HubId, JoinHandle<()>>>>);

impl Forwarders {
    fn is_running(&self, hub: &HubId) -> bool {
        self.0.lock().get(hub).is_some_and(|task| !task.is_finished())
    }

    /// Registers the pump of a hub, aborting one left over from an earlier link
    fn insert(&self, hub: HubId, task: JoinHandle<()>) {
        if let Some(previous) = self.0.lock().insert(hub, task) {
            previous.abort();
        }
    }

    fn stop(&self, hub: &HubId) {
        if let Some(task) = self.0.lock().remove(hub) {
            trace!("Stopping notification pump of {}", hub);
            task.abort();
        }
    }
}

/// [`Transport`] backed by the platform Bluetooth stack through btleplug
pub struct BtleplugTransport {
    adapter: Adapter,
    /// Every peripheral reported by the adapter, by id
    peripherals: Arc<Mutex<HashMap<HubId, Peripheral>>>,
    forwarders: Forwarders,
    events: broadcast::Sender<TransportEvent>,
}

impl BtleplugTransport {
    /// Opens the first Bluetooth adapter and starts listening to its events
    #[instrument]
    pub async fn new() -> Result<Self> {
        info!("Initializing BLE transport");
        let manager = Manager::new().await?;
        let adapter = get_central(&manager).await?;
        let (events, _) = broadcast::channel(256);

        let transport = Self {
            adapter,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            forwarders: Forwarders::default(),
            events,
        };
        transport.forward_adapter_events().await?;
        Ok(transport)
    }

    async fn forward_adapter_events(&self) -> Result<()> {
        let mut stream = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();
        let forwarders = self.forwarders.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        let peripheral = match adapter.peripheral(&id).await {
                            Ok(p) => p,
                            Err(e) => {
                                trace!("Peripheral {:?} vanished before lookup: {}", id, e);
                                continue;
                            }
                        };
                        let Ok(Some(props)) = peripheral.properties().await else {
                            continue;
                        };
                        let hub = HubId::new(id.to_string());
                        let advertisement = HubAdvertisement {
                            id: hub.clone(),
                            local_name: props.local_name,
                            service_ids: props.services.iter().map(uuid_key).collect(),
                            rssi: props.rssi,
                        };
                        trace!("Advertisement: {:?}", advertisement);
                        peripherals.lock().await.insert(hub, peripheral);
                        let _ = events.send(TransportEvent::Discovered(advertisement));
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        debug!("Peripheral {:?} disconnected", id);
                        let hub = HubId::new(id.to_string());
                        forwarders.stop(&hub);
                        let _ = events.send(TransportEvent::Disconnected(hub));
                    }
                    CentralEvent::StateUpdate(state) => {
                        debug!("Adapter state changed to {:?}", state);
                        if let Some(event) = adapter_event(state) {
                            let _ = events.send(event);
                        }
                    }
                    _ => {}
                }
            }
            info!("Exiting btleplug adapter event loop");
        });
        Ok(())
    }

    async fn peripheral(&self, hub: &HubId) -> Result<Peripheral> {
        self.peripherals
            .lock()
            .await
            .get(hub)
            .cloned()
            .ok_or_else(|| Error::UnknownHub(hub.to_string()))
    }

    fn characteristic(peripheral: &Peripheral, info: &CharacteristicInfo) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == info.uuid && c.service_uuid == info.service_uuid)
            .ok_or_else(|| Error::CharacteristicNotFound(info.uuid.to_string()))
    }

    /// Pumps the peripheral notification stream into the shared event channel
    async fn forward_notifications(&self, hub: &HubId, peripheral: &Peripheral) -> Result<()> {
        if self.forwarders.is_running(hub) {
            return Ok(());
        }
        let mut notifications = peripheral.notifications().await?;
        let events = self.events.clone();
        let task = tokio::spawn({
            let hub = hub.clone();
            async move {
                while let Some(notification) = notifications.next().await {
                    let _ = events.send(TransportEvent::Notification {
                        hub: hub.clone(),
                        characteristic: notification.uuid,
                        value: notification.value,
                    });
                }
                debug!("Notification stream for {} ended", hub);
            }
        });
        self.forwarders.insert(hub.clone(), task);
        Ok(())
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    fn event_stream(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    #[instrument(skip(self))]
    async fn start_scan(&self) -> Result<()> {
        info!("Scanning for hubs...");
        if let Ok(state) = self.adapter.adapter_state().await {
            if let Some(event @ TransportEvent::AdapterState { powered_on: false, .. }) =
                adapter_event(state.clone())
            {
                warn!("Adapter is not powered on: {:?}", state);
                let _ = self.events.send(event);
            }
        }
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn connect(&self, hub: &HubId) -> Result<()> {
        let peripheral = self.peripheral(hub).await?;
        if !peripheral.is_connected().await? {
            info!("Connecting to {}...", hub);
            peripheral
                .connect()
                .await
                .map_err(|e| Error::BleError(e.to_string()))?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn discover_characteristics(&self, hub: &HubId) -> Result<Vec<CharacteristicInfo>> {
        let peripheral = self.peripheral(hub).await?;
        debug!("Discovering services...");
        peripheral.discover_services().await?;
        Ok(peripheral
            .characteristics()
            .into_iter()
            .map(|c| CharacteristicInfo {
                uuid: c.uuid,
                service_uuid: c.service_uuid,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, hub: &HubId, characteristic: &CharacteristicInfo) -> Result<()> {
        let peripheral = self.peripheral(hub).await?;
        let target = Self::characteristic(&peripheral, characteristic)?;
        if !target
            .properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
        {
            debug!("Characteristic {} does not notify, skipping", target.uuid);
            return Ok(());
        }
        self.forward_notifications(hub, &peripheral).await?;
        peripheral
            .subscribe(&target)
            .await
            .map_err(|e| Error::BleError(e.to_string()))
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    async fn write(
        &self,
        hub: &HubId,
        characteristic: &CharacteristicInfo,
        data: &[u8],
    ) -> Result<()> {
        let peripheral = self.peripheral(hub).await?;
        let target = Self::characteristic(&peripheral, characteristic)?;

        // Hubs are written without response whenever the characteristic allows it
        let write_type = if target
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };

        trace!("Writing {:02x?} to {}", data, target.uuid);
        peripheral
            .write(&target, data, write_type)
            .await
            .map_err(|e| {
                error!("Write to {} failed: {}", target.uuid, e);
                Error::BleError(e.to_string())
            })
    }

    #[instrument(skip(self))]
    async fn disconnect(&self, hub: &HubId) -> Result<()> {
        self.forwarders.stop(hub);
        let peripheral = self.peripheral(hub).await?;
        peripheral
            .disconnect()
            .await
            .map_err(|e| Error::BleError(e.to_string()))
    }

    async fn rssi(&self, hub: &HubId) -> Result<Option<i16>> {
        let peripheral = self.peripheral(hub).await?;
        Ok(peripheral.properties().await?.and_then(|p| p.rssi))
    }
}
