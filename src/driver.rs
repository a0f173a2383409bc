/*!
 # Driver façade

 [`HubDriver`] owns the transport, the session registry and the motor
 scheduler. All of its work (transport events, commands and scheduler ticks)
 runs sequentially on one task, see [`HubDriver::spawn`]. Callers talk to that
 task through a cloneable [`HubHandle`].

 Commands that name a hub which does not resolve are no-ops: they return
 `Ok(None)` and log a warning.
*/

use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::classify::{classify, HubType};
use crate::events::HubEvent;
use crate::motor::{MotorScheduler, PowerCurve, DEFAULT_STAGGER, DEFAULT_TICK};
use crate::port::PortInfo;
use crate::protocol::Reaction;
use crate::session::{Deferred, HubRef, Session, SessionRegistry};
use crate::transport::{HubAdvertisement, HubId, Transport, TransportEvent};
use crate::{Error, Result};

/// Delay Boost hubs need between connect-time activation writes and before renames
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Driver configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Only connect to hubs whose name contains this string (or whose id equals it)
    pub name_filter: Option<String>,
    /// Motor scheduler period
    pub tick_interval: Duration,
    /// Delay between motor writes to one hub within a tick
    pub motor_stagger: Duration,
    /// Boost post-connect delay
    pub boost_settle_delay: Duration,
    pub power_curve: PowerCurve,
    /// Depth of the event broadcast channel
    pub event_capacity: usize,
    /// Stop scanning once this many hubs are connected
    pub max_hubs: Option<usize>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name_filter: None,
            tick_interval: DEFAULT_TICK,
            motor_stagger: DEFAULT_STAGGER,
            boost_settle_delay: DEFAULT_SETTLE_DELAY,
            power_curve: PowerCurve::default(),
            event_capacity: 256,
            max_hubs: None,
        }
    }
}

fn emit(events: &broadcast::Sender<HubEvent>, event: HubEvent) {
    trace!("Event: {}", event);
    // Having no subscribers is fine
    let _ = events.send(event);
}

/// Requests carried from a [`HubHandle`] to the driver task
enum Command {
    Connect(oneshot::Sender<Result<HubId>>),
    SetMotor {
        speed: i32,
        port: Option<u8>,
        hub: Option<HubRef>,
        reply: oneshot::Sender<Option<HubId>>,
    },
    SetLedColor {
        red: u8,
        green: u8,
        blue: u8,
        hub: Option<HubRef>,
        reply: oneshot::Sender<Result<Option<HubId>>>,
    },
    SetDeviceName {
        name: String,
        hub: Option<HubRef>,
        reply: oneshot::Sender<Result<Option<HubId>>>,
    },
    SetSound {
        frequency: u16,
        duration_ms: u16,
        hub: Option<HubRef>,
        reply: oneshot::Sender<Result<Option<HubId>>>,
    },
    PortList {
        hub: Option<HubRef>,
        reply: oneshot::Sender<Option<Vec<PortInfo>>>,
    },
    SignalStrength {
        hub: Option<HubRef>,
        reply: oneshot::Sender<Result<Option<i16>>>,
    },
    Disconnect(oneshot::Sender<()>),
}

/// Protocol driver for any number of hubs behind one transport
pub struct HubDriver<T: Transport> {
    transport: T,
    config: DriverConfig,
    scheduler: MotorScheduler,
    sessions: SessionRegistry,
    events: broadcast::Sender<HubEvent>,
    transport_events: Option<broadcast::Receiver<TransportEvent>>,
    pending_connects: Vec<oneshot::Sender<Result<HubId>>>,
    scanning: bool,
}

impl<T: Transport> HubDriver<T> {
    pub fn new(transport: T, config: DriverConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let transport_events = Some(transport.event_stream());
        Self {
            scheduler: MotorScheduler::new(config.tick_interval, config.motor_stagger),
            transport,
            config,
            sessions: SessionRegistry::new(),
            events,
            transport_events,
            pending_connects: Vec::new(),
            scanning: false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    #[instrument(skip(self))]
    pub async fn start_scan(&mut self) -> Result<()> {
        self.transport.start_scan().await?;
        self.scanning = true;
        info!("Scanning for hubs");
        Ok(())
    }

    async fn stop_scan(&mut self) {
        if !self.scanning {
            return;
        }
        self.scanning = false;
        match self.transport.stop_scan().await {
            Ok(()) => debug!("Scan stopped"),
            Err(e) => warn!("Failed to stop scan: {}", e),
        }
    }

    fn at_capacity(&self) -> bool {
        self.config
            .max_hubs
            .is_some_and(|max| self.sessions.len() >= max)
    }

    /// Reacts to one event coming from the transport
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Discovered(advertisement) => self.on_discovered(advertisement).await,
            TransportEvent::Notification {
                hub,
                characteristic,
                value,
            } => {
                let Some(session) = self.sessions.get_mut(&hub) else {
                    trace!("Notification from unregistered hub {}", hub);
                    return;
                };
                for reaction in session.decode(&characteristic, &value) {
                    match reaction {
                        Reaction::Send(outbound) => {
                            if let Err(e) = session.send(&self.transport, &outbound).await {
                                error!("[{}] write to {} failed: {}", hub, outbound.channel, e);
                            }
                        }
                        Reaction::Emit(notice) => {
                            emit(&self.events, HubEvent::from_notice(notice, hub.clone()))
                        }
                    }
                }
            }
            TransportEvent::Disconnected(hub) => self.teardown(&hub),
            TransportEvent::AdapterState {
                powered_on,
                description,
            } => {
                if powered_on {
                    debug!("Adapter state: {}", description);
                    return;
                }
                if !self.scanning {
                    debug!("Adapter state {} while idle", description);
                    return;
                }
                error!("Adapter is {}, scanning halted", description);
                self.stop_scan().await;
                for reply in self.pending_connects.drain(..) {
                    let _ = reply.send(Err(Error::AdapterUnavailable(description.clone())));
                }
            }
        }
    }

    async fn on_discovered(&mut self, advertisement: HubAdvertisement) {
        if !self.scanning || self.sessions.contains(&advertisement.id) || self.at_capacity() {
            return;
        }
        let Some(hub_type) = classify(&advertisement, self.config.name_filter.as_deref()) else {
            trace!("Ignoring peripheral {}", advertisement.id);
            return;
        };
        let id = advertisement.id.clone();
        if let Err(e) = self.connect_hub(advertisement, hub_type).await {
            error!("Connecting to {} failed: {}", id, e);
            if let Err(e) = self.transport.disconnect(&id).await {
                debug!("Disconnect after failed connect: {}", e);
            }
        }
    }

    #[instrument(skip(self, advertisement), fields(hub = %advertisement.id))]
    async fn connect_hub(&mut self, advertisement: HubAdvertisement, hub_type: HubType) -> Result<()> {
        let id = advertisement.id;
        let name = advertisement.local_name.unwrap_or_default();
        info!("Connecting to {} {:?}", hub_type, name);

        self.transport.connect(&id).await?;
        let characteristics = self.transport.discover_characteristics(&id).await?;
        debug!("Discovered {} characteristics", characteristics.len());

        let mut session = Session::new(id.clone(), hub_type, name);
        let missing = session.negotiate(characteristics);
        if !missing.is_empty() {
            warn!("Missing channels: {:?}", missing);
        }

        for channel in session.codec().notification_channels() {
            match session.characteristic(*channel) {
                Some(characteristic) => self.transport.subscribe(&id, characteristic).await?,
                None => debug!("Cannot subscribe to {}", channel),
            }
        }

        for outbound in session.plan_setup(self.config.boost_settle_delay) {
            if let Err(e) = session.send(&self.transport, &outbound).await {
                warn!("Setup write to {} failed: {}", outbound.channel, e);
            }
        }

        if !self.sessions.insert(session) {
            return Ok(());
        }
        info!("Connected ({} hub(s))", self.sessions.len());
        emit(&self.events, HubEvent::Connected(id.clone()));

        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(Ok(id.clone()));
        }
        if self.at_capacity() {
            self.stop_scan().await;
        }
        Ok(())
    }

    /// Drops a session; the disconnect event is emitted after teardown
    fn teardown(&mut self, hub: &HubId) {
        let Some(mut session) = self.sessions.remove(hub) else {
            trace!("Disconnect from unregistered hub {}", hub);
            return;
        };
        session.ports_mut().clear();
        info!(
            "[{}] disconnected ({} notification(s) dropped)",
            hub,
            session.dropped_notifications()
        );
        emit(&self.events, HubEvent::Disconnected(hub.clone()));
    }

    fn unresolved(hub: Option<&HubRef>) {
        match hub {
            Some(hub) => warn!("No hub matches {}", hub),
            None => warn!("No hub connected"),
        }
    }

    /// Records a motor speed in -100..=100; the scheduler writes it on its next tick
    pub fn set_motor(&mut self, speed: i32, port: Option<u8>, hub: Option<&HubRef>) -> Option<HubId> {
        if !(-100..=100).contains(&speed) {
            warn!("Speed {} out of range, clamping", speed);
        }
        let Some(session) = self.sessions.resolve_mut(hub) else {
            Self::unresolved(hub);
            return None;
        };
        match session.set_motor_speed(speed, port, self.config.power_curve) {
            Some(target) => debug!("[{}] motor on port {} speed {}", session.id(), target, speed),
            None => warn!("[{}] no motor on port {:?}", session.id(), port),
        }
        Some(session.id().clone())
    }

    #[instrument(skip(self))]
    pub async fn set_led_color(
        &mut self,
        red: u8,
        green: u8,
        blue: u8,
        hub: Option<&HubRef>,
    ) -> Result<Option<HubId>> {
        let Some(session) = self.sessions.resolve(hub) else {
            Self::unresolved(hub);
            return Ok(None);
        };
        match session.codec().led_color(red, green, blue) {
            Some(outbound) => session.send(&self.transport, &outbound).await?,
            None => debug!("[{}] {} has no LED codec", session.id(), session.hub_type()),
        }
        Ok(Some(session.id().clone()))
    }

    /// Renames a hub.
    ///
    /// A hub still inside its post-connect delay gets the rename queued; it
    /// is written once the delay has passed and a failure there is only
    /// logged. The session keeps the name as the hub stores it.
    #[instrument(skip(self))]
    pub async fn set_device_name(&mut self, name: &str, hub: Option<&HubRef>) -> Result<Option<HubId>> {
        let Some(session) = self.sessions.resolve_mut(hub) else {
            Self::unresolved(hub);
            return Ok(None);
        };
        let Some(outbound) = session.codec().rename(name) else {
            debug!("[{}] {} cannot be renamed", session.id(), session.hub_type());
            return Ok(Some(session.id().clone()));
        };
        let stored = session.codec().stored_name(name).to_owned();
        match session.rename_not_before().filter(|due| *due > Instant::now()) {
            Some(due) => {
                debug!("[{}] rename queued until the hub has settled", session.id());
                session.defer(Deferred {
                    due,
                    outbound,
                    rename_to: Some(stored),
                });
            }
            None => {
                session.send(&self.transport, &outbound).await?;
                session.set_name(stored);
            }
        }
        Ok(Some(session.id().clone()))
    }

    /// Writes every deferred frame that has come due
    pub async fn flush_deferred(&mut self) -> usize {
        let now = Instant::now();
        let mut writes = 0;
        for session in self.sessions.iter_mut() {
            for deferred in session.take_due(now) {
                match session.send(&self.transport, &deferred.outbound).await {
                    Ok(()) => {
                        writes += 1;
                        if let Some(name) = deferred.rename_to {
                            session.set_name(name);
                        }
                    }
                    Err(e) => warn!(
                        "[{}] deferred write to {} failed: {}",
                        session.id(),
                        deferred.outbound.channel,
                        e
                    ),
                }
            }
        }
        writes
    }

    /// Due time of the earliest deferred write across all hubs
    pub fn next_deferred(&self) -> Option<Instant> {
        self.sessions.iter().filter_map(Session::next_due).min()
    }

    /// Plays a tone on hubs with a speaker; a no-op elsewhere
    #[instrument(skip(self))]
    pub async fn set_sound(
        &mut self,
        frequency: u16,
        duration_ms: u16,
        hub: Option<&HubRef>,
    ) -> Result<Option<HubId>> {
        let Some(session) = self.sessions.resolve(hub) else {
            Self::unresolved(hub);
            return Ok(None);
        };
        match session.codec().tone(frequency, duration_ms) {
            Some(outbound) => session.send(&self.transport, &outbound).await?,
            None => debug!("[{}] {} has no speaker", session.id(), session.hub_type()),
        }
        Ok(Some(session.id().clone()))
    }

    pub fn port_list(&self, hub: Option<&HubRef>) -> Option<Vec<PortInfo>> {
        match self.sessions.resolve(hub) {
            Some(session) => Some(session.port_list()),
            None => {
                Self::unresolved(hub);
                None
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn signal_strength(&self, hub: Option<&HubRef>) -> Result<Option<i16>> {
        let Some(session) = self.sessions.resolve(hub) else {
            Self::unresolved(hub);
            return Ok(None);
        };
        self.transport.rssi(session.id()).await
    }

    /// Disconnects every hub and stops scanning
    #[instrument(skip(self))]
    pub async fn disconnect_all(&mut self) {
        self.stop_scan().await;
        for id in self.sessions.ids() {
            if let Err(e) = self.transport.disconnect(&id).await {
                warn!("[{}] disconnect failed: {}", id, e);
            }
            self.teardown(&id);
        }
    }

    /// Runs one scheduler tick over every session
    pub async fn tick(&mut self) -> usize {
        let mut writes = 0;
        for session in self.sessions.iter_mut() {
            writes += self.scheduler.tick(session, &self.transport).await;
        }
        writes
    }

    async fn request_connect(&mut self, reply: oneshot::Sender<Result<HubId>>) {
        if let Some(session) = self.sessions.resolve(None) {
            let _ = reply.send(Ok(session.id().clone()));
            return;
        }
        if !self.scanning {
            if let Err(e) = self.start_scan().await {
                let _ = reply.send(Err(e));
                return;
            }
        }
        self.pending_connects.push(reply);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => self.request_connect(reply).await,
            Command::SetMotor {
                speed,
                port,
                hub,
                reply,
            } => {
                let _ = reply.send(self.set_motor(speed, port, hub.as_ref()));
            }
            Command::SetLedColor {
                red,
                green,
                blue,
                hub,
                reply,
            } => {
                let _ = reply.send(self.set_led_color(red, green, blue, hub.as_ref()).await);
            }
            Command::SetDeviceName { name, hub, reply } => {
                let _ = reply.send(self.set_device_name(&name, hub.as_ref()).await);
            }
            Command::SetSound {
                frequency,
                duration_ms,
                hub,
                reply,
            } => {
                let _ = reply.send(self.set_sound(frequency, duration_ms, hub.as_ref()).await);
            }
            Command::PortList { hub, reply } => {
                let _ = reply.send(self.port_list(hub.as_ref()));
            }
            Command::SignalStrength { hub, reply } => {
                let _ = reply.send(self.signal_strength(hub.as_ref()).await);
            }
            Command::Disconnect(reply) => {
                self.disconnect_all().await;
                let _ = reply.send(());
            }
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut transport_events = self
            .transport_events
            .take()
            .unwrap_or_else(|| self.transport.event_stream());
        let mut ticker = time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let next_due = self.next_deferred();
            tokio::select! {
                event = transport_events.recv() => match event {
                    Ok(event) => self.handle_transport_event(event).await,
                    Err(RecvError::Lagged(skipped)) => warn!("Missed {} transport events", skipped),
                    Err(RecvError::Closed) => {
                        error!("Transport event stream closed");
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All handles dropped");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                    self.flush_deferred().await;
                }
            }
        }
        self.disconnect_all().await;
    }

    /// Moves the driver onto its own task
    pub fn spawn(self) -> (HubHandle, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(32);
        let handle = HubHandle {
            commands,
            events: self.events.clone(),
        };
        (handle, tokio::spawn(self.run(receiver)))
    }
}

/// Cloneable front end of a running [`HubDriver`]
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<HubEvent>,
}

impl HubHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    async fn request<R>(&self, command: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::DriverStopped)?;
        response.await.map_err(|_| Error::DriverStopped)
    }

    /// Starts scanning and resolves with the first connected hub
    pub async fn connect(&self) -> Result<HubId> {
        self.request(Command::Connect).await?
    }

    pub async fn set_motor(&self, speed: i32, port: Option<u8>, hub: Option<HubRef>) -> Result<Option<HubId>> {
        self.request(|reply| Command::SetMotor {
            speed,
            port,
            hub,
            reply,
        })
        .await
    }

    pub async fn set_led_color(
        &self,
        red: u8,
        green: u8,
        blue: u8,
        hub: Option<HubRef>,
    ) -> Result<Option<HubId>> {
        self.request(|reply| Command::SetLedColor {
            red,
            green,
            blue,
            hub,
            reply,
        })
        .await?
    }

    pub async fn set_device_name(&self, name: &str, hub: Option<HubRef>) -> Result<Option<HubId>> {
        let name = name.to_owned();
        self.request(|reply| Command::SetDeviceName { name, hub, reply })
            .await?
    }

    pub async fn set_sound(
        &self,
        frequency: u16,
        duration_ms: u16,
        hub: Option<HubRef>,
    ) -> Result<Option<HubId>> {
        self.request(|reply| Command::SetSound {
            frequency,
            duration_ms,
            hub,
            reply,
        })
        .await?
    }

    pub async fn port_list(&self, hub: Option<HubRef>) -> Result<Option<Vec<PortInfo>>> {
        self.request(|reply| Command::PortList { hub, reply }).await
    }

    pub async fn signal_strength(&self, hub: Option<HubRef>) -> Result<Option<i16>> {
        self.request(|reply| Command::SignalStrength { hub, reply })
            .await?
    }

    /// Disconnects all hubs; the driver keeps running
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Command::Disconnect).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::DeviceKind;
    use crate::transport::{boost_profile, wedo2_profile, SimulatedTransport};

    fn wedo2_hub(id: &str, name: &str) -> HubAdvertisement {
        HubAdvertisement {
            id: HubId::new(id),
            local_name: Some(name.to_owned()),
            service_ids: vec!["00001523-1212-efde-1523-785feabcd123".to_owned()],
            rssi: Some(-60),
        }
    }

    fn boost_hub(id: &str) -> HubAdvertisement {
        HubAdvertisement {
            id: HubId::new(id),
            local_name: Some("LEGO Move Hub".to_owned()),
            service_ids: vec!["00001623-1212-efde-1623-785feabcd123".to_owned()],
            rssi: Some(-70),
        }
    }

    async fn boost_driver(hub: &HubAdvertisement) -> HubDriver<SimulatedTransport> {
        let transport = SimulatedTransport::new();
        transport.add_hub(hub.clone(), boost_profile());
        let mut driver = HubDriver::new(transport, DriverConfig::default());
        driver.start_scan().await.unwrap();
        driver
            .handle_transport_event(TransportEvent::Discovered(hub.clone()))
            .await;
        driver
    }

    async fn driver_with(hubs: &[HubAdvertisement]) -> HubDriver<SimulatedTransport> {
        let transport = SimulatedTransport::new();
        for hub in hubs {
            transport.add_hub(hub.clone(), wedo2_profile());
        }
        let mut driver = HubDriver::new(transport, DriverConfig::default());
        driver.start_scan().await.unwrap();
        for hub in hubs {
            driver
                .handle_transport_event(TransportEvent::Discovered(hub.clone()))
                .await;
        }
        driver
    }

    #[tokio::test]
    async fn discovery_connects_and_sets_up() {
        let hub = wedo2_hub("w1", "LPF2 Smart Hub 2 I/O");
        let driver = driver_with(&[hub.clone()]).await;
        assert_eq!(driver.sessions().len(), 1);
        assert!(driver.transport().is_connected(&hub.id));
        assert_eq!(driver.transport().subscribed(&hub.id).len(), 8);

        let writes = driver.transport().writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].data, vec![0x01, 0x02, 0x06, 0x17, 0x01, 0x01, 0, 0, 0, 0x02, 0x01]);
    }

    #[tokio::test]
    async fn name_filter_skips_other_hubs() {
        let transport = SimulatedTransport::new();
        let mut driver = HubDriver::new(
            transport,
            DriverConfig {
                name_filter: Some("Rover".to_owned()),
                ..Default::default()
            },
        );
        driver.start_scan().await.unwrap();
        driver
            .handle_transport_event(TransportEvent::Discovered(wedo2_hub("w1", "Crane")))
            .await;
        assert!(driver.sessions().is_empty());
    }

    #[tokio::test]
    async fn unresolved_commands_are_noops() {
        let mut driver = driver_with(&[]).await;
        assert_eq!(driver.set_motor(50, None, None), None);
        assert_eq!(driver.set_led_color(1, 2, 3, None).await.unwrap(), None);
        assert_eq!(driver.set_sound(440, 100, Some(&"nobody".into())).await.unwrap(), None);
        assert_eq!(driver.port_list(Some(&HubRef::Ordinal(3))), None);
        assert_eq!(driver.signal_strength(None).await.unwrap(), None);
        assert!(driver.transport().writes().is_empty());
    }

    #[tokio::test]
    async fn commands_target_resolved_hub() {
        let mut driver =
            driver_with(&[wedo2_hub("w1", "Left"), wedo2_hub("w2", "Right")]).await;
        driver.transport().take_writes();

        let hub = driver.set_led_color(9, 8, 7, Some(&"Right".into())).await.unwrap();
        assert_eq!(hub, Some(HubId::new("w2")));
        let writes = driver.transport().take_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].hub, HubId::new("w2"));
        assert_eq!(writes[0].data, vec![0x06, 0x04, 0x03, 9, 8, 7]);

        assert_eq!(driver.signal_strength(Some(&HubRef::Ordinal(1))).await.unwrap(), Some(-60));
    }

    #[tokio::test]
    async fn rename_updates_session_name() {
        let mut driver = driver_with(&[wedo2_hub("w1", "Left")]).await;
        driver.set_device_name("Rover", None).await.unwrap();
        assert_eq!(driver.sessions().resolve(Some(&"Rover".into())).unwrap().id().as_str(), "w1");
    }

    #[tokio::test]
    async fn port_list_reflects_attachments() {
        let hub = wedo2_hub("w1", "Left");
        let mut driver = driver_with(&[hub.clone()]).await;
        let characteristic = driver
            .sessions()
            .get(&hub.id)
            .and_then(|s| s.characteristic(crate::protocol::Channel::PortType))
            .map(|c| c.uuid)
            .unwrap();
        driver
            .handle_transport_event(TransportEvent::Notification {
                hub: hub.id.clone(),
                characteristic,
                value: vec![2, 1, 0, 35],
            })
            .await;
        let ports = driver.port_list(None).unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].id.get(), 2);
        assert_eq!(ports[0].device, DeviceKind::DistanceSensor);
    }

    #[tokio::test]
    async fn tick_without_motors_writes_nothing() {
        let mut driver = driver_with(&[wedo2_hub("w1", "Left")]).await;
        driver.transport().take_writes();
        assert_eq!(driver.tick().await, 0);
    }

    #[tokio::test]
    async fn unknown_hub_gets_inert_codec() {
        let transport = SimulatedTransport::new();
        let advertisement = HubAdvertisement {
            id: HubId::new("x"),
            local_name: Some("My Robot".to_owned()),
            ..Default::default()
        };
        transport.add_hub(advertisement.clone(), boost_profile());
        let mut driver = HubDriver::new(
            transport,
            DriverConfig {
                name_filter: Some("Robot".to_owned()),
                ..Default::default()
            },
        );
        driver.start_scan().await.unwrap();
        driver
            .handle_transport_event(TransportEvent::Discovered(advertisement))
            .await;
        assert_eq!(driver.sessions().len(), 1);
        assert_eq!(driver.set_led_color(1, 2, 3, None).await.unwrap(), Some(HubId::new("x")));
        assert!(driver.transport().writes().is_empty());
    }

    #[tokio::test]
    async fn max_hubs_stops_scanning() {
        let transport = SimulatedTransport::new();
        let first = wedo2_hub("w1", "Left");
        let second = wedo2_hub("w2", "Right");
        transport.add_hub(first.clone(), wedo2_profile());
        transport.add_hub(second.clone(), wedo2_profile());
        let mut driver = HubDriver::new(
            transport,
            DriverConfig {
                max_hubs: Some(1),
                ..Default::default()
            },
        );
        driver.start_scan().await.unwrap();
        driver.handle_transport_event(TransportEvent::Discovered(first)).await;
        driver.handle_transport_event(TransportEvent::Discovered(second)).await;
        assert_eq!(driver.sessions().len(), 1);
        assert!(!driver.is_scanning());
        assert!(!driver.transport().is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn boost_connect_defers_second_activation() {
        let hub = boost_hub("b1");
        let mut driver = boost_driver(&hub).await;
        assert_eq!(driver.sessions().len(), 1);
        assert_eq!(driver.transport().take_writes().len(), 1);

        let due = driver.next_deferred().expect("activation pending");
        assert_eq!(driver.flush_deferred().await, 0);
        time::sleep_until(due).await;
        assert_eq!(driver.flush_deferred().await, 1);
        assert_eq!(driver.transport().take_writes()[0].data, vec![0x05, 0x00, 0x01, 0x06, 0x02]);
        assert_eq!(driver.next_deferred(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn boost_rename_is_queued_and_stores_truncated_name() {
        let hub = boost_hub("b1");
        let mut driver = boost_driver(&hub).await;
        driver.transport().take_writes();

        let target = driver.set_device_name("Robot Arm Left Side", None).await.unwrap();
        assert_eq!(target, Some(hub.id.clone()));
        assert!(driver.transport().writes().is_empty());
        assert_eq!(driver.sessions().resolve(None).unwrap().name(), "LEGO Move Hub");

        time::sleep(DEFAULT_SETTLE_DELAY * 2).await;
        assert_eq!(driver.flush_deferred().await, 2);
        let rename = driver.transport().take_writes().pop().unwrap();
        assert_eq!(&rename.data[5..], b"Robot Arm Left");

        let sessions = driver.sessions();
        assert_eq!(sessions.resolve(Some(&"Robot Arm Left".into())).unwrap().id(), &hub.id);
        assert!(sessions.resolve(Some(&"Robot Arm Left Side".into())).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn settled_boost_rename_is_written_at_once() {
        let hub = boost_hub("b1");
        let mut driver = boost_driver(&hub).await;
        time::sleep(DEFAULT_SETTLE_DELAY * 2).await;
        driver.flush_deferred().await;
        driver.transport().take_writes();

        driver.set_device_name("Rover", None).await.unwrap();
        assert_eq!(driver.transport().take_writes().len(), 1);
        assert_eq!(driver.sessions().resolve(None).unwrap().name(), "Rover");
        assert_eq!(driver.next_deferred(), None);
    }
}
