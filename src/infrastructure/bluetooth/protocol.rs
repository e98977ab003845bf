//! Smart Lamp Protocol
//!
//! This module contains the protocol definitions for communicating with
//! the lamp over its command characteristic: UUIDs, frame layout, command
//! encoders and notification parsing.

use crate::error::ProtocolError;
use std::fmt;
use uuid::Uuid;

/// Lamp BLE Service UUID
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x44092840_0567_11e6_b862_0002a5d5c51b);

/// Command Characteristic UUID - frames are written here, acknowledgements are notified here
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x44092842_0567_11e6_b862_0002a5d5c51b);

/// First byte of every frame
pub const FRAME_PREFIX: u8 = 0xA0;

/// Reserved scene: lamp off
pub const SCENE_OFF: u8 = 0x00;
/// Reserved scene: restore the last scene (turns the lamp on)
pub const SCENE_LAST: u8 = 0xFF;

/// Downlight color temperature range in Kelvin
pub const KELVIN_WARM: u16 = 2700;
pub const KELVIN_COLD: u16 = 4000;

const FLAG_UPLIGHT: u8 = 0x01;
const FLAG_DOWNLIGHT: u8 = 0x02;
/// Transition duration, 0 = infinite
const DURATION_INFINITE: u16 = 0x0000;

/// Command opcodes understood by the lamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Ask for the name of a scene; the reply carries the next scene id
    QuerySceneName = 0x01,
    /// Uplight color or downlight temperature
    SetColor = 0x02,
    SetBrightness = 0x03,
    SelectScene = 0x05,
}

impl Opcode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Protocol version byte sent with this opcode
    pub fn protocol_version(self) -> u8 {
        if self.as_byte() <= 4 {
            1
        } else {
            2
        }
    }

    /// Opcodes whose acknowledgement implies a change of the light output
    pub fn is_light_change(self) -> bool {
        matches!(self, Self::SetColor | Self::SetBrightness | Self::SelectScene)
    }
}

/// One binary command for the command characteristic
///
/// ```text
/// [0]   : 0xA0
/// [1]   : protocol version (1 for opcodes <= 4, else 2)
/// [2]   : opcode
/// [3..] : payload, fixed layout per opcode
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    opcode: Opcode,
    bytes: Vec<u8>,
}

impl CommandFrame {
    fn new(opcode: Opcode, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(3 + payload.len());
        bytes.extend_from_slice(&[FRAME_PREFIX, opcode.protocol_version(), opcode.as_byte()]);
        bytes.extend_from_slice(payload);
        Self { opcode, bytes }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[3..]
    }

    /// Scene id carried by scene-select and scene-query frames
    pub fn scene_id(&self) -> Option<u8> {
        match self.opcode {
            Opcode::SelectScene | Opcode::QuerySceneName => self.payload().first().copied(),
            _ => None,
        }
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X?}", self.bytes)
    }
}

/// Brightness in percent (opcode 3)
pub fn encode_brightness(percent: u8) -> Result<CommandFrame, ProtocolError> {
    if percent > 100 {
        return Err(ProtocolError::OutOfRange {
            field: "brightness",
            value: f64::from(percent),
            min: 0.0,
            max: 100.0,
        });
    }
    Ok(CommandFrame::new(Opcode::SetBrightness, &[percent]))
}

/// Brightness from a 0.0-1.0 dim level
pub fn encode_dim(dim: f64) -> Result<CommandFrame, ProtocolError> {
    let dim = unit("dim", dim)?;
    encode_brightness(percent(dim))
}

/// Uplight color (opcode 2, flag 0x01)
///
/// ```text
/// [3]    : flag 0x01
/// [4-5]  : duration (u16 big-endian, 0 = infinite)
/// [6]    : saturation (0-255)
/// [7-8]  : hue (u16 big-endian, 0-65535)
/// [9]    : brightness (0-100)
/// ```
pub fn encode_color(hue: f64, saturation: f64, brightness: f64) -> Result<CommandFrame, ProtocolError> {
    let hue = unit("hue", hue)?;
    let saturation = unit("saturation", saturation)?;
    let brightness = unit("brightness", brightness)?;

    let mut payload = Vec::with_capacity(7);
    payload.push(FLAG_UPLIGHT);
    payload.extend_from_slice(&DURATION_INFINITE.to_be_bytes());
    payload.push(scale(saturation, 255.0) as u8);
    payload.extend_from_slice(&(scale(hue, 65535.0) as u16).to_be_bytes());
    payload.push(percent(brightness));

    Ok(CommandFrame::new(Opcode::SetColor, &payload))
}

/// Downlight color temperature (opcode 2, flag 0x02)
///
/// ```text
/// [3]    : flag 0x02
/// [4-5]  : duration (u16 big-endian, 0 = infinite)
/// [6-7]  : kelvin (u16 big-endian, 2700-4000)
/// [8]    : brightness (0-100)
/// ```
pub fn encode_temperature(temperature: f64, brightness: f64) -> Result<CommandFrame, ProtocolError> {
    let temperature = unit("temperature", temperature)?;
    let brightness = unit("brightness", brightness)?;

    let mut payload = Vec::with_capacity(6);
    payload.push(FLAG_DOWNLIGHT);
    payload.extend_from_slice(&DURATION_INFINITE.to_be_bytes());
    payload.extend_from_slice(&kelvin(temperature).to_be_bytes());
    payload.push(percent(brightness));

    Ok(CommandFrame::new(Opcode::SetColor, &payload))
}

/// Select a lamp-stored scene (opcode 5)
pub fn encode_scene(id: u8) -> CommandFrame {
    CommandFrame::new(Opcode::SelectScene, &[id])
}

/// Ask for the name of scene `id` (opcode 1)
pub fn encode_scene_query(id: u8) -> CommandFrame {
    CommandFrame::new(Opcode::QuerySceneName, &[id])
}

/// Color temperature in Kelvin for a 0.0 (cold) - 1.0 (warm) temperature
pub fn kelvin(temperature: f64) -> u16 {
    let span = f64::from(KELVIN_COLD - KELVIN_WARM);
    ((1.0 - temperature) * span + f64::from(KELVIN_WARM))
        .round()
        .clamp(f64::from(KELVIN_WARM), f64::from(KELVIN_COLD)) as u16
}

/// Brightness percent for a 0.0-1.0 level
pub fn percent(level: f64) -> u8 {
    scale(level, 100.0) as u8
}

// f64::round rounds half away from zero
fn scale(value: f64, max: f64) -> f64 {
    (value * max).round().clamp(0.0, max)
}

fn unit(field: &'static str, value: f64) -> Result<f64, ProtocolError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ProtocolError::OutOfRange {
            field,
            value,
            min: 0.0,
            max: 1.0,
        })
    }
}

/// Decoded acknowledgement notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// Reply to a scene-name query
    SceneName { next_scene: u8, name: String },
    /// Reply to a light change (color, brightness, scene select)
    LightChanged,
}

/// Parse a notification received after writing a frame with `opcode`
///
/// # Notification Structure
///
/// ```text
/// [0]   : status (0 = ok, anything else is not our acknowledgement)
///
/// Scene-name reply:
/// [1]   : unused
/// [2]   : next scene id (0xFF = no more scenes)
/// [3..] : name of the queried scene (UTF-8, padded)
/// ```
pub fn parse_notification(opcode: Opcode, data: &[u8]) -> Result<Ack, ProtocolError> {
    let status = *data.first().ok_or(ProtocolError::Truncated { len: 0 })?;
    if status != 0x00 {
        return Err(ProtocolError::NotificationMismatch { status });
    }

    match opcode {
        Opcode::QuerySceneName => {
            if data.len() < 3 {
                return Err(ProtocolError::Truncated { len: data.len() });
            }
            let name = String::from_utf8_lossy(&data[3..])
                .trim_matches(|c: char| c.is_whitespace() || c == '\0')
                .to_string();
            Ok(Ack::SceneName {
                next_scene: data[2],
                name,
            })
        }
        Opcode::SetColor | Opcode::SetBrightness | Opcode::SelectScene => Ok(Ack::LightChanged),
    }
}

/// Render a UUID the way the transport compares them: lowercase hex, no hyphens
pub fn normalize_uuid(uuid: &Uuid) -> String {
    uuid.simple().to_string()
}

/// Parse a UUID string, with or without hyphens, in any case
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid, uuid::Error> {
    Uuid::parse_str(uuid_str.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuids() {
        assert_eq!(normalize_uuid(&SERVICE_UUID), "44092840056711e6b8620002a5d5c51b");
        assert_eq!(
            normalize_uuid(&COMMAND_CHAR_UUID),
            "44092842056711e6b8620002a5d5c51b"
        );
        assert_eq!(
            parse_uuid("44092840-0567-11E6-B862-0002A5D5C51B").unwrap(),
            SERVICE_UUID
        );
        assert_eq!(parse_uuid("44092842056711e6b8620002a5d5c51b").unwrap(), COMMAND_CHAR_UUID);
    }

    #[test]
    fn test_frame_header_and_version() {
        assert_eq!(encode_scene_query(0x07).as_bytes(), &[0xA0, 0x01, 0x01, 0x07]);
        assert_eq!(encode_brightness(42).unwrap().as_bytes(), &[0xA0, 0x01, 0x03, 42]);
        assert_eq!(encode_scene(0xFF).as_bytes(), &[0xA0, 0x02, 0x05, 0xFF]);
        assert_eq!(encode_scene(0x00).scene_id(), Some(0x00));
        assert_eq!(encode_brightness(10).unwrap().scene_id(), None);
    }

    #[test]
    fn test_dim_maps_to_rounded_percent() {
        for step in 0..=1000 {
            let dim = f64::from(step) / 1000.0;
            let frame = encode_dim(dim).unwrap();
            let expected = (dim * 100.0).round() as u8;
            assert_eq!(frame.payload(), &[expected], "dim {dim}");
            assert!(frame.payload()[0] <= 100);
        }
        // half away from zero
        assert_eq!(encode_dim(0.625).unwrap().payload(), &[63]);
        assert_eq!(encode_dim(0.6).unwrap().payload(), &[60]);
    }

    #[test]
    fn test_color_layout() {
        let frame = encode_color(0.5, 1.0, 0.6).unwrap();
        assert_eq!(
            frame.as_bytes(),
            &[0xA0, 0x01, 0x02, 0x01, 0x00, 0x00, 0xFF, 0x80, 0x00, 60]
        );

        for step in 0..=64 {
            let value = f64::from(step) / 64.0;
            let frame = encode_color(value, value, 1.0).unwrap();
            let payload = frame.payload();
            assert_eq!(payload[3], (value * 255.0).round() as u8);
            assert_eq!(
                u16::from_be_bytes([payload[4], payload[5]]),
                (value * 65535.0).round() as u16
            );
        }
    }

    #[test]
    fn test_temperature_is_monotonic_decreasing() {
        let cold = encode_temperature(0.0, 1.0).unwrap();
        assert_eq!(cold.as_bytes(), &[0xA0, 0x01, 0x02, 0x02, 0x00, 0x00, 0x0F, 0xA0, 100]);
        assert_eq!(kelvin(0.0), 4000);
        assert_eq!(kelvin(1.0), 2700);
        assert_eq!(kelvin(0.5), 3350);

        let mut previous = u16::MAX;
        for step in 0..=100 {
            let k = kelvin(f64::from(step) / 100.0);
            assert!(k <= previous);
            previous = k;
        }
    }

    #[test]
    fn test_out_of_range_inputs_are_rejected() {
        assert!(encode_brightness(101).is_err());
        assert!(encode_dim(1.01).is_err());
        assert!(encode_dim(-0.1).is_err());
        assert!(encode_color(f64::NAN, 0.5, 0.5).is_err());
        assert!(matches!(
            encode_temperature(0.5, 2.0),
            Err(ProtocolError::OutOfRange { field: "brightness", .. })
        ));
    }

    #[test]
    fn test_parse_scene_notification() {
        let mut data = vec![0x00, 0x00, 0x03];
        data.extend_from_slice(b"Reading  \0\0");
        assert_eq!(
            parse_notification(Opcode::QuerySceneName, &data).unwrap(),
            Ack::SceneName {
                next_scene: 0x03,
                name: "Reading".to_string()
            }
        );
        assert_eq!(
            parse_notification(Opcode::QuerySceneName, &[0x00, 0x00]),
            Err(ProtocolError::Truncated { len: 2 })
        );
    }

    #[test]
    fn test_parse_rejects_non_zero_status() {
        assert_eq!(
            parse_notification(Opcode::SetBrightness, &[0x02]),
            Err(ProtocolError::NotificationMismatch { status: 0x02 })
        );
        assert_eq!(
            parse_notification(Opcode::SelectScene, &[0x00]).unwrap(),
            Ack::LightChanged
        );
        assert!(parse_notification(Opcode::SetColor, &[]).is_err());
    }
}
