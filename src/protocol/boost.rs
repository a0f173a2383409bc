//! Boost / Powered Up hub protocol: length-prefixed messages multiplexed on
//! one characteristic.

use tracing::{debug, trace, warn};

use super::{unwrap_tilt, Channel, Notice, Outbound, Reaction, SetupStep, Unhandled};
use crate::classify::HubType;
use crate::port::{
    Color, DeviceKind, PortId, PortTable, Rotation, SensorReading, BOOST_LED_PORT,
    BOOST_RESERVED_PORTS,
};

/// Motor power meaning "stop" on Boost hubs
pub const NEUTRAL_POWER: u8 = 0;
/// Longest advertising name the hub accepts, in bytes
pub const MAX_NAME_LEN: usize = 14;

const MSG_HUB_PROPERTY: u8 = 0x01;
const MSG_ATTACHED_IO: u8 = 0x04;
const MSG_PORT_INPUT_FORMAT_SETUP: u8 = 0x41;
const MSG_PORT_VALUE: u8 = 0x45;
const MSG_PORT_OUTPUT_COMMAND: u8 = 0x81;

const PROPERTY_NAME: u8 = 0x01;
const PROPERTY_BUTTON: u8 = 0x02;
const PROPERTY_BATTERY: u8 = 0x06;
const PROPERTY_SET: u8 = 0x01;
const PROPERTY_ENABLE_UPDATES: u8 = 0x02;
const PROPERTY_UPDATE: u8 = 0x06;

/// Execute immediately, request feedback
const STARTUP_AND_COMPLETION: u8 = 0x11;
const SUB_START_SPEED: u8 = 0x07;
const SUB_WRITE_DIRECT_MODE: u8 = 0x51;

/// Device kind and input mode for an attached-IO device code
fn device_for(code: u8) -> Option<(DeviceKind, u8)> {
    match code {
        0x22 | 0x28 => Some((DeviceKind::TiltSensor, 0x00)),
        0x23 => Some((DeviceKind::DistanceSensor, 0x00)),
        // RGB I mode
        0x25 => Some((DeviceKind::VisionSensor, 0x06)),
        0x01 => Some((DeviceKind::Motor, 0x00)),
        // Absolute position in degrees
        0x26 | 0x27 => Some((DeviceKind::Motor, 0x02)),
        0x17 => Some((DeviceKind::LedLight, 0x01)),
        0x05 => Some((DeviceKind::Button, 0x00)),
        _ => None,
    }
}

/// Wraps a message body with the common header
fn frame(message_type: u8, body: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(body.len() + 3);
    message.push((body.len() + 3) as u8);
    message.push(0x00);
    message.push(message_type);
    message.extend_from_slice(body);
    message
}

/// Connect-time setup: enable button updates, settle, enable battery updates
pub fn setup() -> Vec<SetupStep> {
    vec![
        SetupStep::Write(enable_updates(PROPERTY_BUTTON)),
        SetupStep::Settle,
        SetupStep::Write(enable_updates(PROPERTY_BATTERY)),
    ]
}

pub fn decode(data: &[u8], ports: &mut PortTable) -> Result<Vec<Reaction>, Unhandled> {
    if data.len() < 3 {
        return Err(Unhandled::Truncated(data.len()));
    }
    match data[2] {
        MSG_ATTACHED_IO => decode_attached_io(data, ports),
        MSG_PORT_VALUE => decode_port_value(data, ports),
        MSG_HUB_PROPERTY => decode_hub_property(data),
        other => Err(Unhandled::UnknownMessage(other)),
    }
}

fn decode_attached_io(data: &[u8], ports: &mut PortTable) -> Result<Vec<Reaction>, Unhandled> {
    if data.len() < 5 {
        return Err(Unhandled::Truncated(data.len()));
    }
    let raw_port = data[3];
    if BOOST_RESERVED_PORTS.contains(&raw_port) {
        trace!("Ignoring internal port {}", raw_port);
        return Ok(Vec::new());
    }
    let port = PortId::for_hub(HubType::Boost, raw_port).ok_or(Unhandled::UnknownPort(raw_port))?;

    if data[4] == 0 {
        return Ok(match ports.detach(port, true) {
            Some(previous) => vec![Reaction::Emit(Notice::Port {
                port,
                attached: false,
                device: previous,
            })],
            None => Vec::new(),
        });
    }

    if data.len() < 6 {
        return Err(Unhandled::Truncated(data.len()));
    }
    let Some((device, mode)) = device_for(data[5]) else {
        debug!("Port {} reports unknown device code {:#04x}", port, data[5]);
        return Ok(Vec::new());
    };

    trace!("Port {} attached {} (mode {})", port, device, mode);
    ports.attach(port, device);
    Ok(vec![
        Reaction::Send(port_mode(port.get(), mode, 1)),
        Reaction::Emit(Notice::Port {
            port,
            attached: true,
            device,
        }),
    ])
}

fn require(data: &[u8], len: usize) -> Result<(), Unhandled> {
    if data.len() < len {
        Err(Unhandled::Truncated(data.len()))
    } else {
        Ok(())
    }
}

fn decode_port_value(data: &[u8], ports: &mut PortTable) -> Result<Vec<Reaction>, Unhandled> {
    require(data, 4)?;
    let raw_port = data[3];
    let port = PortId::for_hub(HubType::Boost, raw_port).ok_or(Unhandled::UnknownPort(raw_port))?;
    let state = ports.get_mut(port).ok_or(Unhandled::UnknownPort(raw_port))?;

    let notice = match state.device {
        DeviceKind::TiltSensor => {
            require(data, 6)?;
            let (x, y) = (unwrap_tilt(data[4]), unwrap_tilt(data[5]));
            state.last_reading = Some(SensorReading::Tilt { x, y });
            Notice::Tilt { x, y, port }
        }
        DeviceKind::DistanceSensor => {
            require(data, 7)?;
            let value = data[6] as u16;
            state.last_reading = Some(SensorReading::Distance(value));
            Notice::Distance { value, port }
        }
        DeviceKind::VisionSensor => {
            require(data, 9)?;
            let color = Color {
                r: data[4],
                g: data[6],
                b: data[8],
            };
            state.last_reading = Some(SensorReading::Vision(color));
            Notice::Vision { color, port }
        }
        DeviceKind::Motor => {
            require(data, 8)?;
            let degrees = i32::from_le_bytes([data[4], data[5], data[6], data[7]]);
            let rotation = Rotation::from_degrees(degrees);
            state.rotation = Some(rotation);
            Notice::Motor { rotation, port }
        }
        other => {
            trace!("Ignoring value for {} on port {}", other, port);
            return Ok(Vec::new());
        }
    };
    Ok(vec![Reaction::Emit(notice)])
}

fn decode_hub_property(data: &[u8]) -> Result<Vec<Reaction>, Unhandled> {
    require(data, 6)?;
    let value = data[data.len() - 1];
    match (data[3], data[4]) {
        (PROPERTY_BUTTON, PROPERTY_UPDATE) => Ok(vec![Reaction::Emit(Notice::Button(value))]),
        (PROPERTY_BATTERY, PROPERTY_UPDATE) => Ok(vec![Reaction::Emit(Notice::Battery(value))]),
        _ => Err(Unhandled::UnknownMessage(MSG_HUB_PROPERTY)),
    }
}

/// Port input format setup: mode, delta interval, notifications on
pub fn port_mode(port: u8, mode: u8, delta: u32) -> Outbound {
    let mut body = vec![port, mode];
    body.extend_from_slice(&delta.to_le_bytes());
    body.push(0x01);
    Outbound::new(Channel::Hub, frame(MSG_PORT_INPUT_FORMAT_SETUP, &body))
}

fn enable_updates(property: u8) -> Outbound {
    Outbound::new(
        Channel::Hub,
        frame(MSG_HUB_PROPERTY, &[property, PROPERTY_ENABLE_UPDATES]),
    )
}

pub fn motor_power(port: PortId, power: u8) -> Outbound {
    Outbound::new(
        Channel::Hub,
        frame(
            MSG_PORT_OUTPUT_COMMAND,
            &[port.get(), STARTUP_AND_COMPLETION, SUB_START_SPEED, power],
        ),
    )
}

pub fn led_color(red: u8, green: u8, blue: u8) -> Outbound {
    Outbound::new(
        Channel::Hub,
        frame(
            MSG_PORT_OUTPUT_COMMAND,
            &[
                BOOST_LED_PORT.get(),
                STARTUP_AND_COMPLETION,
                SUB_WRITE_DIRECT_MODE,
                0x01,
                red,
                green,
                blue,
            ],
        ),
    )
}

/// Longest prefix of `name` the firmware stores, cut at a char boundary
pub fn truncate_name(name: &str) -> &str {
    let mut end = name.len().min(MAX_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Sets the advertising name, truncated to what the firmware stores
pub fn rename(name: &str) -> Outbound {
    let stored = truncate_name(name);
    if stored.len() < name.len() {
        warn!("Hub name {:?} truncated to {:?}", name, stored);
    }
    let mut body = vec![PROPERTY_NAME, PROPERTY_SET];
    body.extend_from_slice(stored.as_bytes());
    Outbound::new(Channel::Hub, frame(MSG_HUB_PROPERTY, &body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(raw: u8) -> PortId {
        PortId::for_hub(HubType::Boost, raw).expect("valid port")
    }

    fn table() -> PortTable {
        PortTable::new(NEUTRAL_POWER)
    }

    #[test]
    fn tacho_motor_attach() {
        let mut ports = table();
        let reactions = decode(&[0x0f, 0x00, 0x04, 0x01, 0x01, 0x27, 0x00], &mut ports).unwrap();
        assert_eq!(
            reactions,
            vec![
                Reaction::Send(Outbound::new(
                    Channel::Hub,
                    vec![0x0a, 0x00, 0x41, 0x01, 0x02, 0x01, 0x00, 0x00, 0x00, 0x01]
                )),
                Reaction::Emit(Notice::Port {
                    port: port(1),
                    attached: true,
                    device: DeviceKind::Motor
                }),
            ]
        );
    }

    #[test]
    fn reserved_ports_are_never_materialized() {
        let mut ports = table();
        for raw in BOOST_RESERVED_PORTS {
            let reactions = decode(&[0x0f, 0x00, 0x04, raw, 0x01, 0x27], &mut ports).unwrap();
            assert!(reactions.is_empty());
        }
        assert!(ports.is_empty());
    }

    #[test]
    fn detach_evicts() {
        let mut ports = table();
        decode(&[0x0f, 0x00, 0x04, 0x02, 0x01, 0x25], &mut ports).unwrap();
        let reactions = decode(&[0x05, 0x00, 0x04, 0x02, 0x00], &mut ports).unwrap();
        assert_eq!(
            reactions,
            vec![Reaction::Emit(Notice::Port {
                port: port(2),
                attached: false,
                device: DeviceKind::VisionSensor
            })]
        );
        assert!(ports.get(port(2)).is_none());
        assert!(decode(&[0x05, 0x00, 0x04, 0x02, 0x00], &mut ports).unwrap().is_empty());
    }

    #[test]
    fn absolute_angle() {
        let mut ports = table();
        decode(&[0x0f, 0x00, 0x04, 0x00, 0x01, 0x26], &mut ports).unwrap();

        let reactions = decode(&[0x08, 0x00, 0x45, 0x00, 0x0a, 0x00, 0x00, 0x00], &mut ports).unwrap();
        assert_eq!(
            reactions,
            vec![Reaction::Emit(Notice::Motor {
                rotation: Rotation { angle: 10, revolutions: 0 },
                port: port(0)
            })]
        );

        let bytes = 370i32.to_le_bytes();
        let reactions = decode(
            &[0x08, 0x00, 0x45, 0x00, bytes[0], bytes[1], bytes[2], bytes[3]],
            &mut ports,
        )
        .unwrap();
        assert_eq!(
            reactions,
            vec![Reaction::Emit(Notice::Motor {
                rotation: Rotation { angle: 10, revolutions: 1 },
                port: port(0)
            })]
        );
        assert_eq!(
            ports.get(port(0)).unwrap().rotation,
            Some(Rotation { angle: 10, revolutions: 1 })
        );
    }

    #[test]
    fn sensor_values() {
        let mut ports = table();
        decode(&[0x0f, 0x00, 0x04, 0x3a, 0x01, 0x28], &mut ports).unwrap();
        decode(&[0x0f, 0x00, 0x04, 0x01, 0x01, 0x25], &mut ports).unwrap();
        decode(&[0x0f, 0x00, 0x04, 0x02, 0x01, 0x23], &mut ports).unwrap();

        assert_eq!(
            decode(&[0x06, 0x00, 0x45, 0x3a, 0xfa, 0x05], &mut ports).unwrap(),
            vec![Reaction::Emit(Notice::Tilt { x: -5, y: 5, port: port(0x3a) })]
        );
        assert_eq!(
            decode(&[0x0a, 0x00, 0x45, 0x01, 10, 0, 20, 0, 30, 0], &mut ports).unwrap(),
            vec![Reaction::Emit(Notice::Vision {
                color: Color { r: 10, g: 20, b: 30 },
                port: port(1)
            })]
        );
        assert_eq!(
            decode(&[0x07, 0x00, 0x45, 0x02, 0x00, 0x00, 42], &mut ports).unwrap(),
            vec![Reaction::Emit(Notice::Distance { value: 42, port: port(2) })]
        );
    }

    #[test]
    fn short_and_unknown_messages_are_rejected() {
        let mut ports = table();
        decode(&[0x0f, 0x00, 0x04, 0x01, 0x01, 0x25], &mut ports).unwrap();
        assert_eq!(decode(&[0x05, 0x00], &mut ports), Err(Unhandled::Truncated(2)));
        assert_eq!(
            decode(&[0x06, 0x00, 0x45, 0x01, 10, 0], &mut ports),
            Err(Unhandled::Truncated(6))
        );
        assert_eq!(
            decode(&[0x05, 0x00, 0x82, 0x01, 0x0a], &mut ports),
            Err(Unhandled::UnknownMessage(0x82))
        );
        assert_eq!(
            decode(&[0x05, 0x00, 0x45, 0x03, 0x00], &mut ports),
            Err(Unhandled::UnknownPort(3))
        );
    }

    #[test]
    fn button_and_battery_properties() {
        let mut ports = table();
        assert_eq!(
            decode(&[0x06, 0x00, 0x01, 0x02, 0x06, 0x01], &mut ports).unwrap(),
            vec![Reaction::Emit(Notice::Button(1))]
        );
        assert_eq!(
            decode(&[0x06, 0x00, 0x01, 0x06, 0x06, 0x5f], &mut ports).unwrap(),
            vec![Reaction::Emit(Notice::Battery(0x5f))]
        );
    }

    #[test]
    fn encodes_commands() {
        assert_eq!(
            motor_power(port(1), 200).payload,
            vec![0x07, 0x00, 0x81, 0x01, 0x11, 0x07, 200]
        );
        assert_eq!(
            led_color(255, 0, 10).payload,
            vec![0x0a, 0x00, 0x81, 0x32, 0x11, 0x51, 0x01, 255, 0, 10]
        );
        assert_eq!(
            rename("Bot").payload,
            vec![0x08, 0x00, 0x01, 0x01, 0x01, b'B', b'o', b't']
        );
        assert_eq!(
            setup(),
            vec![
                SetupStep::Write(Outbound::new(Channel::Hub, vec![0x05, 0x00, 0x01, 0x02, 0x02])),
                SetupStep::Settle,
                SetupStep::Write(Outbound::new(Channel::Hub, vec![0x05, 0x00, 0x01, 0x06, 0x02])),
            ]
        );
    }

    #[test]
    fn long_names_are_truncated() {
        let payload = rename("A very long robot name").payload;
        assert_eq!(payload.len(), 5 + MAX_NAME_LEN);
        assert_eq!(payload[0] as usize, payload.len());
    }

    #[test]
    fn truncation_keeps_whole_characters() {
        // 1 + 7 * 2 bytes: the 14 byte cut falls inside the last 'Ä'
        let name = "aÄÄÄÄÄÄÄ";
        assert_eq!(name.len(), 15);
        assert_eq!(truncate_name(name), "aÄÄÄÄÄÄ");

        let payload = rename(name).payload;
        assert_eq!(payload.len(), 5 + 13);
        assert_eq!(payload[0], 18);
        assert_eq!(std::str::from_utf8(&payload[5..]), Ok("aÄÄÄÄÄÄ"));
    }

    #[test]
    fn short_names_are_kept() {
        assert_eq!(truncate_name("Rover"), "Rover");
        assert_eq!(truncate_name("Fourteen bytes"), "Fourteen bytes");
    }
}
