/*!
 # Hub sessions

 One [`Session`] per connected hub, holding its port table, the negotiated
 characteristics and the motor power bookkeeping. The [`SessionRegistry`]
 keeps sessions in connection order and resolves caller references.
*/

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::classify::HubType;
use crate::motor::{speed_to_power, PowerCurve};
use crate::port::{DeviceKind, PortId, PortInfo, PortTable};
use crate::protocol::{Channel, Codec, Outbound, Reaction, SetupStep, Unhandled};
use crate::transport::{find_characteristic, CharacteristicInfo, HubId, Transport};
use crate::{Error, Result};

/// A write held back until the hub firmware is ready for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferred {
    /// Earliest time the write may go out
    pub due: Instant,
    pub outbound: Outbound,
    /// Name the session takes once this write went out
    pub rename_to: Option<String>,
}

/// State of one connected hub
#[derive(Debug)]
pub struct Session {
    id: HubId,
    name: String,
    codec: Codec,
    ports: PortTable,
    characteristics: Vec<CharacteristicInfo>,
    channels: HashMap<Channel, CharacteristicInfo>,
    rename_not_before: Option<Instant>,
    /// Ordered by due time
    deferred: Vec<Deferred>,
    dropped_notifications: u64,
}

impl Session {
    pub fn new(id: HubId, hub_type: HubType, name: impl Into<String>) -> Self {
        let codec = Codec::for_hub(hub_type);
        Self {
            id,
            name: name.into(),
            codec,
            ports: PortTable::new(codec.neutral_power()),
            characteristics: Vec::new(),
            channels: HashMap::new(),
            rename_not_before: None,
            deferred: Vec::new(),
            dropped_notifications: 0,
        }
    }

    /// Transport-assigned hub id
    pub fn id(&self) -> &HubId {
        &self.id
    }

    pub fn hub_type(&self) -> HubType {
        self.codec.hub_type()
    }

    /// Advertised name, or the last name written to the hub
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Codec chosen from the hub type at connect time
    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn ports(&self) -> &PortTable {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut PortTable {
        &mut self.ports
    }

    /// Snapshot of every known port, in port order
    pub fn port_list(&self) -> Vec<PortInfo> {
        self.ports.list()
    }

    /// Notifications dropped because they could not be interpreted
    pub fn dropped_notifications(&self) -> u64 {
        self.dropped_notifications
    }

    /// Binds the codec channels to discovered characteristics.
    ///
    /// Returns the channels that could not be found.
    pub fn negotiate(&mut self, characteristics: Vec<CharacteristicInfo>) -> Vec<Channel> {
        let mut missing = Vec::new();
        self.channels.clear();
        for channel in self.codec.channels() {
            match find_characteristic(&characteristics, channel.short_id()) {
                Some(c) => {
                    trace!("Channel {} -> {}", channel, c.uuid);
                    self.channels.insert(*channel, *c);
                }
                None => missing.push(*channel),
            }
        }
        self.characteristics = characteristics;
        missing
    }

    /// Characteristic bound to a channel by [`Session::negotiate`]
    pub fn characteristic(&self, channel: Channel) -> Option<&CharacteristicInfo> {
        self.channels.get(&channel)
    }

    fn channel_for(&self, uuid: &Uuid) -> Option<Channel> {
        self.channels
            .iter()
            .find(|(_, c)| c.uuid == *uuid)
            .map(|(channel, _)| *channel)
    }

    /// Lays out the connect-time setup.
    ///
    /// Writes before the first settle are returned to be sent right away;
    /// the rest are deferred by `settle` per settle step. Renames are held
    /// back until one more `settle` after the last setup write.
    pub fn plan_setup(&mut self, settle: Duration) -> Vec<Outbound> {
        let now = Instant::now();
        let mut due = now;
        let mut immediate = Vec::new();
        for step in self.codec.setup() {
            match step {
                SetupStep::Settle => due += settle,
                SetupStep::Write(outbound) if due == now => immediate.push(outbound),
                SetupStep::Write(outbound) => self.defer(Deferred {
                    due,
                    outbound,
                    rename_to: None,
                }),
            }
        }
        if self.codec.rename_needs_settle() {
            self.rename_not_before = Some(due + settle);
        }
        immediate
    }

    /// Earliest time a rename may be written, if the hub needs to settle first
    pub fn rename_not_before(&self) -> Option<Instant> {
        self.rename_not_before
    }

    /// Queues a write behind others due at the same time or earlier
    pub fn defer(&mut self, deferred: Deferred) {
        let index = self.deferred.partition_point(|d| d.due <= deferred.due);
        self.deferred.insert(index, deferred);
    }

    /// Due time of the next deferred write
    pub fn next_due(&self) -> Option<Instant> {
        self.deferred.first().map(|d| d.due)
    }

    /// Removes and returns the deferred writes due at `now`
    pub fn take_due(&mut self, now: Instant) -> Vec<Deferred> {
        let count = self.deferred.partition_point(|d| d.due <= now);
        self.deferred.drain(..count).collect()
    }

    /// Writes an outbound message to its channel
    pub async fn send<T: Transport + ?Sized>(&self, transport: &T, outbound: &Outbound) -> Result<()> {
        if self.characteristics.is_empty() {
            return Err(Error::NotReady);
        }
        let characteristic = self
            .channels
            .get(&outbound.channel)
            .ok_or_else(|| Error::CharacteristicNotFound(outbound.channel.short_id().to_owned()))?;
        trace!("[{}] {} <- {:02x?}", self.id, outbound.channel, outbound.payload);
        transport.write(&self.id, characteristic, &outbound.payload).await
    }

    /// Decodes a notification; undecodable ones are counted and dropped
    pub fn decode(&mut self, characteristic: &Uuid, data: &[u8]) -> Vec<Reaction> {
        let result = match self.channel_for(characteristic) {
            Some(channel) => self.codec.decode(channel, data, &mut self.ports),
            None => Err(Unhandled::UnknownCharacteristic),
        };
        match result {
            Ok(reactions) => reactions,
            Err(reason) => {
                self.dropped_notifications += 1;
                debug!(
                    "[{}] dropped notification {:02x?}: {}",
                    self.id, data, reason
                );
                Vec::new()
            }
        }
    }

    /// Records the desired power for a motor port.
    ///
    /// Without a port the first motor is used. Returns the port that was set.
    pub fn set_motor_speed(&mut self, speed: i32, port: Option<u8>, curve: PowerCurve) -> Option<PortId> {
        let target = match port {
            Some(raw) => PortId::for_hub(self.hub_type(), raw)
                .filter(|id| self.ports.get(*id).is_some_and(|p| p.device == DeviceKind::Motor)),
            None => self.ports.first_motor(),
        }?;
        let power = speed_to_power(speed, curve, self.codec.neutral_power());
        if let Some(state) = self.ports.get_mut(target) {
            state.desired_power = power;
        }
        Some(target)
    }
}

/// Caller-supplied way of naming a hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubRef {
    /// Position in connection order, starting at 0
    Ordinal(usize),
    /// Hub id, or failing that the hub name
    Name(String),
}

impl fmt::Display for HubRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubRef::Ordinal(n) => write!(f, "#{n}"),
            HubRef::Name(name) => f.write_str(name),
        }
    }
}

/// Digits parse as an ordinal, anything else as a name
impl FromStr for HubRef {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.parse::<usize>() {
            Ok(n) => HubRef::Ordinal(n),
            Err(_) => HubRef::Name(s.to_owned()),
        })
    }
}

impl From<usize> for HubRef {
    fn from(value: usize) -> Self {
        HubRef::Ordinal(value)
    }
}

impl From<&str> for HubRef {
    fn from(value: &str) -> Self {
        HubRef::Name(value.to_owned())
    }
}

impl From<String> for HubRef {
    fn from(value: String) -> Self {
        HubRef::Name(value)
    }
}

impl From<&HubId> for HubRef {
    fn from(value: &HubId) -> Self {
        HubRef::Name(value.to_string())
    }
}

/// Sessions in connection order
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session unless one with the same id exists
    pub fn insert(&mut self, session: Session) -> bool {
        if self.contains(session.id()) {
            warn!("Session for {} already registered", session.id());
            return false;
        }
        self.sessions.push(session);
        true
    }

    pub fn remove(&mut self, id: &HubId) -> Option<Session> {
        let index = self.sessions.iter().position(|s| s.id() == id)?;
        Some(self.sessions.remove(index))
    }

    pub fn contains(&self, id: &HubId) -> bool {
        self.sessions.iter().any(|s| s.id() == id)
    }

    pub fn get(&self, id: &HubId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id() == id)
    }

    pub fn get_mut(&mut self, id: &HubId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id() == id)
    }

    fn position(&self, reference: Option<&HubRef>) -> Option<usize> {
        match reference {
            None => (!self.sessions.is_empty()).then_some(0),
            Some(HubRef::Ordinal(n)) => (*n < self.sessions.len()).then_some(*n),
            Some(HubRef::Name(name)) => self
                .sessions
                .iter()
                .position(|s| s.id().as_str() == name)
                .or_else(|| self.sessions.iter().position(|s| s.name() == name)),
        }
    }

    /// Resolves a reference; `None` picks the first hub
    pub fn resolve(&self, reference: Option<&HubRef>) -> Option<&Session> {
        self.position(reference).map(|i| &self.sessions[i])
    }

    pub fn resolve_mut(&mut self, reference: Option<&HubRef>) -> Option<&mut Session> {
        self.position(reference).map(|i| &mut self.sessions[i])
    }

    pub fn ids(&self) -> Vec<HubId> {
        self.sessions.iter().map(|s| s.id().clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
