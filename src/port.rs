/*!
 # Port state

 Per-hub table of what is plugged into each port. Only decoded attach and
 detach reports change the device kind of a port.
*/

use std::collections::BTreeMap;
use std::fmt;

use crate::classify::HubType;

/// Ports a Boost hub reports but that are never exposed (virtual and internal ports)
pub const BOOST_RESERVED_PORTS: [u8; 4] = [6, 57, 59, 60];
/// Built-in RGB light of Boost hubs
pub const BOOST_LED_PORT: PortId = PortId(0x32);
/// Built-in RGB light of WeDo 2.0 hubs
pub const WEDO2_LED_PORT: PortId = PortId(0x06);

/// Port identifier, validated against the port range of the hub type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(u8);

impl PortId {
    /// Validates a raw port number for the given hub type
    pub fn for_hub(hub_type: HubType, raw: u8) -> Option<Self> {
        match hub_type {
            HubType::WeDo2 if raw == 1 || raw == 2 => Some(Self(raw)),
            HubType::Boost if !BOOST_RESERVED_PORTS.contains(&raw) => Some(Self(raw)),
            _ => None,
        }
    }

    /// Port number as it appears on the wire
    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<PortId> for u8 {
    fn from(port: PortId) -> Self {
        port.0
    }
}

/// What is attached to a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceKind {
    #[default]
    None,
    TiltSensor,
    DistanceSensor,
    VisionSensor,
    Motor,
    LedLight,
    Button,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::None => "none",
            DeviceKind::TiltSensor => "tiltSensor",
            DeviceKind::DistanceSensor => "distanceSensor",
            DeviceKind::VisionSensor => "visionSensor",
            DeviceKind::Motor => "motor",
            DeviceKind::LedLight => "led",
            DeviceKind::Button => "button",
        };
        f.write_str(name)
    }
}

/// RGB triple reported by a vision sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Absolute position of a tacho motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rotation {
    /// Position within the current revolution, 0..=359
    pub angle: u16,
    /// Whole revolutions; negative when turned backwards past zero
    pub revolutions: i32,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Self {
        Self {
            angle: degrees.rem_euclid(360) as u16,
            revolutions: degrees.div_euclid(360),
        }
    }
}

/// Last decoded sensor value of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorReading {
    Tilt { x: i16, y: i16 },
    Distance(u16),
    Vision(Color),
}

/// State of one port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    /// Whether the hub reported something plugged in
    pub connected: bool,
    pub device: DeviceKind,
    /// Power the scheduler should drive the motor with
    pub desired_power: u8,
    /// Power most recently written to the hub
    pub last_sent_power: u8,
    /// Accumulated position of a Boost motor
    pub rotation: Option<Rotation>,
    pub last_reading: Option<SensorReading>,
}

impl Port {
    fn new(neutral: u8) -> Self {
        Self {
            connected: false,
            device: DeviceKind::None,
            desired_power: neutral,
            last_sent_power: neutral,
            rotation: None,
            last_reading: None,
        }
    }
}

/// Snapshot of a port handed out to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortInfo {
    pub id: PortId,
    /// WeDo 2.0 keeps empty ports listed as not connected
    pub connected: bool,
    pub device: DeviceKind,
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "port {}: {} ({})",
            self.id,
            self.device,
            if self.connected { "connected" } else { "empty" }
        )
    }
}

/// Port table of one hub
#[derive(Debug, Clone)]
pub struct PortTable {
    ports: BTreeMap<PortId, Port>,
    neutral: u8,
}

impl PortTable {
    /// Creates an empty table whose motors idle at `neutral`
    pub fn new(neutral: u8) -> Self {
        Self {
            ports: BTreeMap::new(),
            neutral,
        }
    }

    pub fn neutral(&self) -> u8 {
        self.neutral
    }

    /// Port state, if the hub ever reported this port
    pub fn get(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub fn get_mut(&mut self, id: PortId) -> Option<&mut Port> {
        self.ports.get_mut(&id)
    }

    /// Returns the port, creating an empty entry on first use
    pub fn entry(&mut self, id: PortId) -> &mut Port {
        let neutral = self.neutral;
        self.ports.entry(id).or_insert_with(|| Port::new(neutral))
    }

    /// Records a newly attached device, dropping state left by the previous one
    pub fn attach(&mut self, id: PortId, device: DeviceKind) {
        let neutral = self.neutral;
        let port = self.entry(id);
        port.connected = true;
        port.device = device;
        port.desired_power = neutral;
        port.last_sent_power = neutral;
        port.rotation = None;
        port.last_reading = None;
    }

    /// Marks a port empty. Returns the device that was attached, if any.
    ///
    /// With `evict` the entry is removed from the table altogether.
    pub fn detach(&mut self, id: PortId, evict: bool) -> Option<DeviceKind> {
        let neutral = self.neutral;
        let port = self.ports.get_mut(&id)?;
        port.connected = false;
        let previous = port.device;
        if previous != DeviceKind::None {
            port.device = DeviceKind::None;
            port.desired_power = neutral;
            port.last_sent_power = neutral;
            port.rotation = None;
            port.last_reading = None;
        }
        if evict {
            self.ports.remove(&id);
        }
        (previous != DeviceKind::None).then_some(previous)
    }

    /// First port (lowest id) with a motor attached
    pub fn first_motor(&self) -> Option<PortId> {
        self.ports
            .iter()
            .find(|(_, p)| p.device == DeviceKind::Motor)
            .map(|(id, _)| *id)
    }

    /// Motor ports whose desired power differs from what was last written.
    ///
    /// The returned powers are marked as sent.
    pub fn take_motor_changes(&mut self) -> Vec<(PortId, u8)> {
        self.ports
            .iter_mut()
            .filter(|(_, p)| p.device == DeviceKind::Motor && p.desired_power != p.last_sent_power)
            .map(|(id, p)| {
                p.last_sent_power = p.desired_power;
                (*id, p.desired_power)
            })
            .collect()
    }

    /// Snapshot of every port in id order
    pub fn list(&self) -> Vec<PortInfo> {
        self.ports
            .iter()
            .map(|(id, p)| PortInfo {
                id: *id,
                connected: p.connected,
                device: p.device,
            })
            .collect()
    }

    /// Number of ports the table knows about, empty ones included
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn clear(&mut self) {
        self.ports.clear();
    }
}
