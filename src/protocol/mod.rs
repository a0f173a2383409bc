/*!
 # Wire protocols

 WeDo 2.0 and Boost hubs speak unrelated formats. A [`Codec`] is picked once
 per session from the hub type and turns raw notifications into
 [`Reaction`]s and commands into [`Outbound`] writes.
*/

use std::fmt;
use thiserror::Error;

use crate::classify::HubType;
use crate::port::{Color, DeviceKind, PortId, PortTable, Rotation};

pub mod boost;
pub mod wedo2;

/// Logical data path on a hub, identified by a short UUID segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// WeDo 2.0 device name (read/write)
    Name,
    Button,
    PortType,
    LowVoltageAlert,
    HighCurrentAlert,
    LowSignalAlert,
    SensorValue,
    ValueFormat,
    /// WeDo 2.0 input command (port setup)
    InputCommand,
    /// WeDo 2.0 output command (motors, LED, tone)
    OutputCommand,
    Battery,
    /// Boost hub characteristic carrying every message
    Hub,
}

impl Channel {
    pub fn short_id(self) -> &'static str {
        match self {
            Channel::Name => "1524",
            Channel::Button => "1526",
            Channel::PortType => "1527",
            Channel::LowVoltageAlert => "1528",
            Channel::HighCurrentAlert => "1529",
            Channel::LowSignalAlert => "152a",
            Channel::SensorValue => "1560",
            Channel::ValueFormat => "1561",
            Channel::InputCommand => "1563",
            Channel::OutputCommand => "1565",
            Channel::Battery => "180f",
            Channel::Hub => "1624",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.short_id())
    }
}

/// A write to one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub channel: Channel,
    pub payload: Vec<u8>,
}

impl Outbound {
    pub fn new(channel: Channel, payload: Vec<u8>) -> Self {
        Self { channel, payload }
    }
}

/// Hub-independent domain event produced by a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Port {
        port: PortId,
        attached: bool,
        device: DeviceKind,
    },
    Tilt {
        x: i16,
        y: i16,
        port: PortId,
    },
    Distance {
        value: u16,
        port: PortId,
    },
    Vision {
        color: Color,
        port: PortId,
    },
    Motor {
        rotation: Rotation,
        port: PortId,
    },
    Button(u8),
    Battery(u8),
}

/// What the session has to do after a notification, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    Send(Outbound),
    Emit(Notice),
}

/// One step of the connect-time setup sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupStep {
    Write(Outbound),
    /// Wait for the hub firmware to settle before the next step
    Settle,
}

/// Why a notification was dropped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Unhandled {
    #[error("notification on unexpected channel {0}")]
    UnexpectedChannel(Channel),
    #[error("notification from unknown characteristic")]
    UnknownCharacteristic,
    #[error("unknown port {0}")]
    UnknownPort(u8),
    #[error("unknown message type {0:#04x}")]
    UnknownMessage(u8),
    #[error("message too short ({0} bytes)")]
    Truncated(usize),
    #[error("hub type is unknown, no codec attached")]
    NoCodec,
}

/// Interprets a raw tilt axis byte; values above 100 are negative
pub fn unwrap_tilt(raw: u8) -> i16 {
    if raw > 100 {
        -(255 - raw as i16)
    } else {
        raw as i16
    }
}

/// Encoder/decoder selected once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    WeDo2,
    Boost,
    /// Hub type could not be established; decodes nothing, encodes nothing
    Inert,
}

impl Codec {
    /// Codec for a classified hub; unknown hubs get [`Codec::Inert`]
    pub fn for_hub(hub_type: HubType) -> Self {
        match hub_type {
            HubType::WeDo2 => Codec::WeDo2,
            HubType::Boost => Codec::Boost,
            HubType::Unknown => Codec::Inert,
        }
    }

    pub fn hub_type(self) -> HubType {
        match self {
            Codec::WeDo2 => HubType::WeDo2,
            Codec::Boost => HubType::Boost,
            Codec::Inert => HubType::Unknown,
        }
    }

    /// Channels this codec reads and writes
    pub fn channels(self) -> &'static [Channel] {
        match self {
            Codec::WeDo2 => &wedo2::CHANNELS,
            Codec::Boost => &[Channel::Hub],
            Codec::Inert => &[],
        }
    }

    /// Channels to subscribe to after connecting
    pub fn notification_channels(self) -> &'static [Channel] {
        match self {
            Codec::WeDo2 => &wedo2::NOTIFICATION_CHANNELS,
            Codec::Boost => &[Channel::Hub],
            Codec::Inert => &[],
        }
    }

    /// Motor power that means "stop"
    pub fn neutral_power(self) -> u8 {
        match self {
            Codec::WeDo2 => wedo2::NEUTRAL_POWER,
            Codec::Boost | Codec::Inert => boost::NEUTRAL_POWER,
        }
    }

    /// Whether detached ports are removed from the table
    pub fn evicts_detached(self) -> bool {
        matches!(self, Codec::Boost)
    }

    /// Whether renames must wait for the post-connect settle delay
    pub fn rename_needs_settle(self) -> bool {
        matches!(self, Codec::Boost)
    }

    /// Writes and settle delays to run right after connecting
    pub fn setup(self) -> Vec<SetupStep> {
        match self {
            Codec::WeDo2 => wedo2::setup(),
            Codec::Boost => boost::setup(),
            Codec::Inert => Vec::new(),
        }
    }

    /// Decodes one notification, updating `ports` as attach reports arrive
    pub fn decode(
        self,
        channel: Channel,
        data: &[u8],
        ports: &mut PortTable,
    ) -> Result<Vec<Reaction>, Unhandled> {
        match self {
            Codec::WeDo2 => wedo2::decode(channel, data, ports),
            Codec::Boost if channel == Channel::Hub => boost::decode(data, ports),
            Codec::Boost => Err(Unhandled::UnexpectedChannel(channel)),
            Codec::Inert => Err(Unhandled::NoCodec),
        }
    }

    /// Frame setting the raw power byte of one motor port
    pub fn motor_power(self, port: PortId, power: u8) -> Option<Outbound> {
        match self {
            Codec::WeDo2 => Some(wedo2::motor_power(port, power)),
            Codec::Boost => Some(boost::motor_power(port, power)),
            Codec::Inert => None,
        }
    }

    pub fn led_color(self, red: u8, green: u8, blue: u8) -> Option<Outbound> {
        match self {
            Codec::WeDo2 => Some(wedo2::led_color(red, green, blue)),
            Codec::Boost => Some(boost::led_color(red, green, blue)),
            Codec::Inert => None,
        }
    }

    /// Only WeDo 2.0 hubs have a speaker
    pub fn tone(self, frequency: u16, duration_ms: u16) -> Option<Outbound> {
        match self {
            Codec::WeDo2 => Some(wedo2::tone(frequency, duration_ms)),
            Codec::Boost | Codec::Inert => None,
        }
    }

    pub fn rename(self, name: &str) -> Option<Outbound> {
        match self {
            Codec::WeDo2 => Some(wedo2::rename(name)),
            Codec::Boost => Some(boost::rename(name)),
            Codec::Inert => None,
        }
    }

    /// Name the hub ends up with after [`Codec::rename`]
    pub fn stored_name(self, name: &str) -> &str {
        match self {
            Codec::Boost => boost::truncate_name(name),
            Codec::WeDo2 | Codec::Inert => name,
        }
    }
}
