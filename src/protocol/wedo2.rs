//! WeDo 2.0 hub protocol: one characteristic per channel, unframed payloads.

use tracing::{debug, trace};

use super::{unwrap_tilt, Channel, Notice, Outbound, Reaction, SetupStep, Unhandled};
use crate::classify::HubType;
use crate::port::{DeviceKind, PortId, PortTable, SensorReading, WEDO2_LED_PORT};

/// Motor power meaning "stop" on WeDo 2.0 hubs
pub const NEUTRAL_POWER: u8 = 127;

pub const CHANNELS: [Channel; 11] = [
    Channel::Name,
    Channel::Button,
    Channel::PortType,
    Channel::LowVoltageAlert,
    Channel::HighCurrentAlert,
    Channel::LowSignalAlert,
    Channel::SensorValue,
    Channel::ValueFormat,
    Channel::InputCommand,
    Channel::OutputCommand,
    Channel::Battery,
];

pub const NOTIFICATION_CHANNELS: [Channel; 8] = [
    Channel::Battery,
    Channel::Button,
    Channel::PortType,
    Channel::LowVoltageAlert,
    Channel::HighCurrentAlert,
    Channel::LowSignalAlert,
    Channel::SensorValue,
    Channel::ValueFormat,
];

const TYPE_MOTOR: u8 = 1;
const TYPE_TILT: u8 = 34;
const TYPE_DISTANCE: u8 = 35;
const TYPE_DISTANCE_ALT: u8 = 37;
const TYPE_RGB_LIGHT: u8 = 0x17;

/// Device kind and (mode, format) of the input setup for a device type code
fn device_for(type_code: u8) -> Option<(DeviceKind, u8, u8)> {
    match type_code {
        TYPE_TILT => Some((DeviceKind::TiltSensor, 0x00, 0x01)),
        TYPE_DISTANCE | TYPE_DISTANCE_ALT => Some((DeviceKind::DistanceSensor, 0x02, 0x00)),
        TYPE_MOTOR => Some((DeviceKind::Motor, 0x02, 0x00)),
        _ => None,
    }
}

/// Connect-time setup: put the built-in light into RGB mode
pub fn setup() -> Vec<SetupStep> {
    vec![SetupStep::Write(input_format(
        WEDO2_LED_PORT.get(),
        TYPE_RGB_LIGHT,
        0x01,
        0x02,
    ))]
}

pub fn decode(channel: Channel, data: &[u8], ports: &mut PortTable) -> Result<Vec<Reaction>, Unhandled> {
    match channel {
        Channel::PortType => decode_port_type(data, ports),
        Channel::SensorValue => decode_sensor_value(data, ports),
        Channel::Battery => {
            let value = *data.last().ok_or(Unhandled::Truncated(0))?;
            Ok(vec![Reaction::Emit(Notice::Battery(value))])
        }
        Channel::Button => {
            let value = *data.last().ok_or(Unhandled::Truncated(0))?;
            Ok(vec![Reaction::Emit(Notice::Button(value))])
        }
        Channel::LowVoltageAlert
        | Channel::HighCurrentAlert
        | Channel::LowSignalAlert
        | Channel::ValueFormat => {
            debug!("{} reported {:02x?}", channel, data);
            Ok(Vec::new())
        }
        other => Err(Unhandled::UnexpectedChannel(other)),
    }
}

fn decode_port_type(data: &[u8], ports: &mut PortTable) -> Result<Vec<Reaction>, Unhandled> {
    if data.len() < 2 {
        return Err(Unhandled::Truncated(data.len()));
    }
    let port = PortId::for_hub(HubType::WeDo2, data[0]).ok_or(Unhandled::UnknownPort(data[0]))?;

    if data[1] == 0 {
        return Ok(match ports.detach(port, false) {
            Some(previous) => vec![Reaction::Emit(Notice::Port {
                port,
                attached: false,
                device: previous,
            })],
            None => Vec::new(),
        });
    }

    if data.len() < 4 {
        return Err(Unhandled::Truncated(data.len()));
    }
    let type_code = data[3];
    let Some((device, mode, format)) = device_for(type_code) else {
        // Unknown devices still count as plugged in, but keep their old kind
        debug!("Port {} reports unknown device type {}", port, type_code);
        ports.entry(port).connected = true;
        return Ok(Vec::new());
    };

    trace!("Port {} attached {}", port, device);
    ports.attach(port, device);
    Ok(vec![
        Reaction::Send(input_format(port.get(), type_code, mode, format)),
        Reaction::Emit(Notice::Port {
            port,
            attached: true,
            device,
        }),
    ])
}

fn decode_sensor_value(data: &[u8], ports: &mut PortTable) -> Result<Vec<Reaction>, Unhandled> {
    if data.len() < 4 {
        return Err(Unhandled::Truncated(data.len()));
    }
    let port = PortId::for_hub(HubType::WeDo2, data[1]).ok_or(Unhandled::UnknownPort(data[1]))?;
    let Some(state) = ports.get_mut(port) else {
        return Err(Unhandled::UnknownPort(data[1]));
    };

    let notice = match state.device {
        DeviceKind::TiltSensor => {
            let (x, y) = (unwrap_tilt(data[2]), unwrap_tilt(data[3]));
            state.last_reading = Some(SensorReading::Tilt { x, y });
            Notice::Tilt { x, y, port }
        }
        DeviceKind::DistanceSensor => {
            let mut value = data[2] as u16;
            if data[3] == 1 {
                value += 255;
            }
            state.last_reading = Some(SensorReading::Distance(value));
            Notice::Distance { value, port }
        }
        other => {
            trace!("Ignoring value for {} on port {}", other, port);
            return Ok(Vec::new());
        }
    };
    Ok(vec![Reaction::Emit(notice)])
}

/// Input format setup for a port
pub fn input_format(port: u8, type_code: u8, mode: u8, format: u8) -> Outbound {
    Outbound::new(
        Channel::InputCommand,
        vec![
            0x01, 0x02, port, type_code, mode, 0x01, 0x00, 0x00, 0x00, format, 0x01,
        ],
    )
}

pub fn motor_power(port: PortId, power: u8) -> Outbound {
    Outbound::new(Channel::OutputCommand, vec![port.get(), 0x01, 0x02, power])
}

pub fn led_color(red: u8, green: u8, blue: u8) -> Outbound {
    Outbound::new(
        Channel::OutputCommand,
        vec![WEDO2_LED_PORT.get(), 0x04, 0x03, red, green, blue],
    )
}

pub fn tone(frequency: u16, duration_ms: u16) -> Outbound {
    let [f0, f1] = frequency.to_le_bytes();
    let [d0, d1] = duration_ms.to_le_bytes();
    Outbound::new(Channel::OutputCommand, vec![0x05, 0x02, 0x04, f0, f1, d0, d1])
}

pub fn rename(name: &str) -> Outbound {
    Outbound::new(Channel::Name, name.as_bytes().to_vec())
}
