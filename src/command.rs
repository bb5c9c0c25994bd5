//! Command channel
//!
//! Host commands are small JSON documents, `{"cmd": "<name>", ...}`. They are
//! decoded into [`Command`] right at the boundary so everything downstream
//! matches on a closed set of variants. Replies are serialized here too.

use crate::BoardError;
use crate::config::MAX_LEDS;
use crate::transport::TransportId;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use serde::de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Highlight index used when the host omits `led`
pub const NO_HIGHLIGHT: i32 = -1;

/// Brightness used when the host omits `value`
pub const DEFAULT_BRIGHTNESS: u8 = 255;

/// Normalized screen position of one LED
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedMapPoint {
    pub x: u8,
    pub y: u8,
}

impl LedMapPoint {
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }
}

/// Everything the host can ask the board to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Info,
    CalibrateStart,
    CalibrateEnd,
    /// LED to blink during calibration; out-of-range means none
    Highlight(i32),
    /// At most `led_count` points, in LED order
    SaveMap(Vec<LedMapPoint>),
    TestPattern,
    SetBrightness(u8),
    Clear,
}

impl Command {
    /// Wire name, echoed back in acknowledgements
    pub fn name(&self) -> &'static str {
        match self {
            Command::Info => "info",
            Command::CalibrateStart => "calibrate_start",
            Command::CalibrateEnd => "calibrate_end",
            Command::Highlight(_) => "highlight",
            Command::SaveMap(_) => "save_map",
            Command::TestPattern => "test_pattern",
            Command::SetBrightness(_) => "brightness",
            Command::Clear => "clear",
        }
    }
}

/// Why a command document was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Not JSON, not an object, or a field of the wrong type
    Malformed,
    /// No `cmd` field
    MissingCommand,
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ParseError::Malformed => f.write_str("malformed command document"),
            ParseError::MissingCommand => f.write_str("command document has no `cmd` field"),
        }
    }
}

impl From<ParseError> for BoardError {
    fn from(_: ParseError) -> Self {
        BoardError::ProtocolError
    }
}

/// Fields are kept loose here and checked only by the command that uses them
#[derive(Deserialize)]
struct RawCommand {
    cmd: Option<String>,
    led: Option<Value>,
    value: Option<Value>,
    mapping: Option<Mapping>,
}

/// The `mapping` field as the host sent it
enum Mapping {
    /// At most `MAX_LEDS` points, entries past that are skipped unread
    Points(Vec<LedMapPoint>),
    NotAnArray,
}

impl<'de> Deserialize<'de> for Mapping {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(MappingVisitor)
    }
}

struct MappingVisitor;

impl<'de> Visitor<'de> for MappingVisitor {
    type Value = Mapping;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a list of LED positions")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Mapping, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut points = Vec::new();
        while points.len() < MAX_LEDS {
            match seq.next_element::<Value>()? {
                Some(entry) => points.push(map_point(&entry)),
                None => return Ok(Mapping::Points(points)),
            }
        }
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(Mapping::Points(points))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Mapping, A::Error>
    where
        A: MapAccess<'de>,
    {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(Mapping::NotAnArray)
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Mapping, E> {
        Ok(Mapping::NotAnArray)
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<Mapping, E> {
        Ok(Mapping::NotAnArray)
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<Mapping, E> {
        Ok(Mapping::NotAnArray)
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Mapping, E> {
        Ok(Mapping::NotAnArray)
    }

    fn visit_str<E: de::Error>(self, _: &str) -> Result<Mapping, E> {
        Ok(Mapping::NotAnArray)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Mapping, E> {
        Ok(Mapping::NotAnArray)
    }
}

/// Missing or unusable coordinates become 0
fn map_point(entry: &Value) -> LedMapPoint {
    let coordinate = |key: &str| {
        entry
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(0)
    };
    LedMapPoint::new(coordinate("x"), coordinate("y"))
}

/// `led` must be a number; one that is no valid index selects nothing
fn highlight_index(led: Option<Value>) -> Result<i32, ParseError> {
    match led {
        None => Ok(NO_HIGHLIGHT),
        Some(Value::Number(n)) => Ok(n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(NO_HIGHLIGHT)),
        Some(_) => Err(ParseError::Malformed),
    }
}

/// `value` must be a number; it is clamped to 0..=255
fn brightness_value(value: Option<Value>) -> Result<u8, ParseError> {
    match value {
        None => Ok(DEFAULT_BRIGHTNESS),
        Some(Value::Number(n)) => Ok(n
            .as_f64()
            .map_or(DEFAULT_BRIGHTNESS, |v| v.clamp(0.0, 255.0) as u8)),
        Some(_) => Err(ParseError::Malformed),
    }
}

/// Decode one command document.
///
/// Returns `Ok(None)` for well-formed documents naming a command this board
/// does not know. Mapping entries past `led_count` are dropped. Fields a
/// command does not use are never looked at.
pub fn parse_command(text: &[u8], led_count: usize) -> Result<Option<Command>, ParseError> {
    let raw: RawCommand = serde_json::from_slice(text).map_err(|_| ParseError::Malformed)?;
    let name = raw.cmd.ok_or(ParseError::MissingCommand)?;

    let command = match name.as_str() {
        "info" => Command::Info,
        "calibrate_start" => Command::CalibrateStart,
        "calibrate_end" => Command::CalibrateEnd,
        "highlight" => Command::Highlight(highlight_index(raw.led)?),
        "save_map" => match raw.mapping {
            None => Command::SaveMap(Vec::new()),
            Some(Mapping::Points(mut points)) => {
                points.truncate(led_count);
                Command::SaveMap(points)
            }
            Some(Mapping::NotAnArray) => return Err(ParseError::Malformed),
        },
        "test_pattern" => Command::TestPattern,
        "brightness" => Command::SetBrightness(brightness_value(raw.value)?),
        "clear" => Command::Clear,
        _ => return Ok(None),
    };
    Ok(Some(command))
}

/// Device status reported for `info`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoReply {
    pub led_count: usize,
    pub brightness: u8,
    pub calibrating: bool,
    pub output_active: bool,
    pub active_source: Option<TransportId>,
    pub dropped_frames: u32,
    pub version: &'static str,
}

/// Messages the board sends to the host
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Reply {
    Ack {
        cmd: &'static str,
    },
    Info(InfoReply),
    /// Sent once per transport at boot; hosts treat it like `info`
    Ready {
        #[serde(rename = "ledCount")]
        led_count: usize,
        version: &'static str,
    },
}

impl Reply {
    /// Serialize the reply as one JSON document
    pub fn encode(&self) -> Result<Vec<u8>, BoardError> {
        serde_json::to_vec(self).map_err(|_| BoardError::ProtocolError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command() {
        let cases: [(&[u8], Command); 7] = [
            (br#"{"cmd":"info"}"#, Command::Info),
            (br#"{"cmd":"calibrate_start"}"#, Command::CalibrateStart),
            (br#"{"cmd":"calibrate_end"}"#, Command::CalibrateEnd),
            (br#"{"cmd":"highlight","led":7}"#, Command::Highlight(7)),
            (br#"{"cmd":"test_pattern"}"#, Command::TestPattern),
            (br#"{"cmd":"brightness","value":128}"#, Command::SetBrightness(128)),
            (br#"{"cmd":"clear"}"#, Command::Clear),
        ];
        for (text, expected) in cases {
            assert_eq!(parse_command(text, 60), Ok(Some(expected)));
        }
    }

    #[test]
    fn missing_fields_use_defaults() {
        assert_eq!(
            parse_command(br#"{"cmd":"highlight"}"#, 60),
            Ok(Some(Command::Highlight(NO_HIGHLIGHT)))
        );
        assert_eq!(
            parse_command(br#"{"cmd":"brightness"}"#, 60),
            Ok(Some(Command::SetBrightness(255)))
        );
        assert_eq!(
            parse_command(br#"{"cmd":"save_map"}"#, 60),
            Ok(Some(Command::SaveMap(Vec::new())))
        );
    }

    #[test]
    fn unknown_command_has_no_effect() {
        assert_eq!(parse_command(br#"{"cmd":"reboot","force":true}"#, 60), Ok(None));
    }

    #[test]
    fn rejects_wrong_field_type() {
        assert_eq!(
            parse_command(br#"{"cmd":"highlight","led":"oops"}"#, 60),
            Err(ParseError::Malformed)
        );
        assert_eq!(
            parse_command(br#"{"cmd":"brightness","value":"max"}"#, 60),
            Err(ParseError::Malformed)
        );
        assert_eq!(
            parse_command(br#"{"cmd":"save_map","mapping":{"x":1}}"#, 60),
            Err(ParseError::Malformed)
        );
    }

    #[test]
    fn out_of_range_numbers_are_bounded() {
        assert_eq!(
            parse_command(br#"{"cmd":"highlight","led":4294967296}"#, 60),
            Ok(Some(Command::Highlight(NO_HIGHLIGHT)))
        );
        assert_eq!(
            parse_command(br#"{"cmd":"highlight","led":2.5}"#, 60),
            Ok(Some(Command::Highlight(NO_HIGHLIGHT)))
        );
        assert_eq!(
            parse_command(br#"{"cmd":"brightness","value":300}"#, 60),
            Ok(Some(Command::SetBrightness(255)))
        );
        assert_eq!(
            parse_command(br#"{"cmd":"brightness","value":-4}"#, 60),
            Ok(Some(Command::SetBrightness(0)))
        );
    }

    #[test]
    fn unused_fields_are_not_checked() {
        assert_eq!(
            parse_command(br#"{"cmd":"clear","value":"x","led":[1],"mapping":7}"#, 60),
            Ok(Some(Command::Clear))
        );
        assert_eq!(
            parse_command(br#"{"cmd":"highlight","led":3,"mapping":"none"}"#, 60),
            Ok(Some(Command::Highlight(3)))
        );
    }

    #[test]
    fn bad_mapping_entries_past_the_strip_are_ignored() {
        let text = br#"{"cmd":"save_map","mapping":[{"x":1,"y":2},{"x":999,"y":"bad"}]}"#;
        assert_eq!(
            parse_command(text, 1),
            Ok(Some(Command::SaveMap(alloc::vec![LedMapPoint::new(1, 2)])))
        );
    }

    #[test]
    fn sloppy_mapping_entries_default_to_origin() {
        let text = br#"{"cmd":"save_map","mapping":[{"x":999,"y":"bad"},7,{"x":-1,"y":40,"z":3}]}"#;
        assert_eq!(
            parse_command(text, 3),
            Ok(Some(Command::SaveMap(alloc::vec![
                LedMapPoint::new(0, 0),
                LedMapPoint::new(0, 0),
                LedMapPoint::new(0, 40),
            ])))
        );
    }

    #[test]
    fn mapping_longer_than_any_strip_is_capped() {
        let mut text = String::from(r#"{"cmd":"save_map","mapping":["#);
        for i in 0..MAX_LEDS + 20 {
            if i > 0 {
                text.push_str(", ");
            }
            text.push_str(r#"{"x": 1, "y": 2}"#);
        }
        text.push_str("]}");

        match parse_command(text.as_bytes(), usize::MAX) {
            Ok(Some(Command::SaveMap(points))) => assert_eq!(points.len(), MAX_LEDS),
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn rejects_broken_documents() {
        assert_eq!(parse_command(b"{\"cmd\":", 60), Err(ParseError::Malformed));
        assert_eq!(parse_command(b"[1,2]", 60), Err(ParseError::Malformed));
        assert_eq!(
            parse_command(br#"{"led":3}"#, 60),
            Err(ParseError::MissingCommand)
        );
    }

    #[test]
    fn mapping_is_truncated_and_defaulted() {
        let text = br#"{"cmd":"save_map","mapping":[{"x":10,"y":20},{"y":5},{"x":1,"y":1}]}"#;
        assert_eq!(
            parse_command(text, 2),
            Ok(Some(Command::SaveMap(alloc::vec![
                LedMapPoint::new(10, 20),
                LedMapPoint::new(0, 5),
            ])))
        );
    }

    #[test]
    fn ack_wire_format() {
        let reply = Reply::Ack { cmd: "clear" }.encode().unwrap();
        assert_eq!(reply, br#"{"type":"ack","cmd":"clear"}"#);
    }

    #[test]
    fn info_wire_format() {
        let reply = Reply::Info(InfoReply {
            led_count: 3,
            brightness: 255,
            calibrating: false,
            output_active: true,
            active_source: Some(TransportId::Serial),
            dropped_frames: 2,
            version: "0.1.0",
        })
        .encode()
        .unwrap();
        assert_eq!(
            core::str::from_utf8(&reply).unwrap(),
            r#"{"type":"info","ledCount":3,"brightness":255,"calibrating":false,"outputActive":true,"activeSource":"serial","droppedFrames":2,"version":"0.1.0"}"#
        );
    }

    #[test]
    fn ready_wire_format() {
        let reply = Reply::Ready {
            led_count: 60,
            version: "0.1.0",
        }
        .encode()
        .unwrap();
        assert_eq!(reply, br#"{"type":"ready","ledCount":60,"version":"0.1.0"}"#);
    }
}
