/*!
 # Hub events

 Everything the driver reports to subscribers: connects, disconnects, port
 attach/detach and sensor readings. [`HubEvent::from_notice`] tags a decoded
 notification with the hub it came from.
*/

use std::fmt;

use crate::port::{Color, DeviceKind, PortId, Rotation};
use crate::protocol::Notice;
use crate::transport::HubId;

/// Domain events published by the driver, each tagged with its hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Connected(HubId),
    /// Sent after the session has been torn down
    Disconnected(HubId),
    Port {
        port: PortId,
        attached: bool,
        device: DeviceKind,
        hub: HubId,
    },
    TiltSensor {
        x: i16,
        y: i16,
        port: PortId,
        hub: HubId,
    },
    DistanceSensor {
        value: u16,
        port: PortId,
        hub: HubId,
    },
    VisionSensor {
        color: Color,
        port: PortId,
        hub: HubId,
    },
    Motor {
        rotation: Rotation,
        port: PortId,
        hub: HubId,
    },
    Button {
        value: u8,
        hub: HubId,
    },
    Battery {
        value: u8,
        hub: HubId,
    },
}

impl HubEvent {
    pub fn from_notice(notice: Notice, hub: HubId) -> Self {
        match notice {
            Notice::Port {
                port,
                attached,
                device,
            } => HubEvent::Port {
                port,
                attached,
                device,
                hub,
            },
            Notice::Tilt { x, y, port } => HubEvent::TiltSensor { x, y, port, hub },
            Notice::Distance { value, port } => HubEvent::DistanceSensor { value, port, hub },
            Notice::Vision { color, port } => HubEvent::VisionSensor { color, port, hub },
            Notice::Motor { rotation, port } => HubEvent::Motor {
                rotation,
                port,
                hub,
            },
            Notice::Button(value) => HubEvent::Button { value, hub },
            Notice::Battery(value) => HubEvent::Battery { value, hub },
        }
    }

    pub fn hub(&self) -> &HubId {
        match self {
            HubEvent::Connected(hub) | HubEvent::Disconnected(hub) => hub,
            HubEvent::Port { hub, .. }
            | HubEvent::TiltSensor { hub, .. }
            | HubEvent::DistanceSensor { hub, .. }
            | HubEvent::VisionSensor { hub, .. }
            | HubEvent::Motor { hub, .. }
            | HubEvent::Button { hub, .. }
            | HubEvent::Battery { hub, .. } => hub,
        }
    }
}

impl fmt::Display for HubEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubEvent::Connected(hub) => write!(f, "[{hub}] connected"),
            HubEvent::Disconnected(hub) => write!(f, "[{hub}] disconnected"),
            HubEvent::Port {
                port,
                attached,
                device,
                hub,
            } => write!(
                f,
                "[{hub}] port {port} {} {device}",
                if *attached { "attached" } else { "detached" }
            ),
            HubEvent::TiltSensor { x, y, port, hub } => {
                write!(f, "[{hub}] tilt on port {port}: x={x} y={y}")
            }
            HubEvent::DistanceSensor { value, port, hub } => {
                write!(f, "[{hub}] distance on port {port}: {value}")
            }
            HubEvent::VisionSensor { color, port, hub } => write!(
                f,
                "[{hub}] color on port {port}: rgb({}, {}, {})",
                color.r, color.g, color.b
            ),
            HubEvent::Motor {
                rotation,
                port,
                hub,
            } => write!(
                f,
                "[{hub}] motor on port {port}: {} deg, {} turns",
                rotation.angle, rotation.revolutions
            ),
            HubEvent::Button { value, hub } => write!(f, "[{hub}] button {value}"),
            HubEvent::Battery { value, hub } => write!(f, "[{hub}] battery {value}%"),
        }
    }
}
