//! Data points ("DPs"), the typed configuration/command primitives of the
//! actuator, and their payload encoding for the SEND_DPS function.
//!
//! Each point is written as `id | type | len | value`. A command is an
//! ordered list of points and the device applies them in order, so the
//! caller decides the sequence (e.g. arm positions before the click).

use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;

use crate::error::FrameError;

/// Wire type tag of a data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DpType {
    Raw = 0,
    Boolean = 1,
    Int = 2,
    String = 3,
    Enum = 4,
}

/// Data point ids the fingerbot understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DpId {
    ToggleSwitch = 2,
    Mode = 8,
    ArmDownPercent = 9,
    ClickSustainTime = 10,
    InvertSwitch = 11,
    ArmUpPercent = 15,
    TapEnable = 17,
    Click = 101,
    Program = 121,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DpValue {
    Raw(Bytes),
    Boolean(bool),
    Int(u32),
    String(String),
    Enum(u8),
}

impl DpValue {
    pub fn dp_type(&self) -> DpType {
        match self {
            DpValue::Raw(_) => DpType::Raw,
            DpValue::Boolean(_) => DpType::Boolean,
            DpValue::Int(_) => DpType::Int,
            DpValue::String(_) => DpType::String,
            DpValue::Enum(_) => DpType::Enum,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPoint {
    pub id: u8,
    pub value: DpValue,
}

impl DataPoint {
    pub fn new(id: impl Into<u8>, value: DpValue) -> Self {
        Self { id: id.into(), value }
    }

    pub fn boolean(id: impl Into<u8>, value: bool) -> Self {
        Self::new(id, DpValue::Boolean(value))
    }

    pub fn int(id: impl Into<u8>, value: u32) -> Self {
        Self::new(id, DpValue::Int(value))
    }

    pub fn enumeration(id: impl Into<u8>, value: u8) -> Self {
        Self::new(id, DpValue::Enum(value))
    }

    pub fn dp_type(&self) -> DpType {
        self.value.dp_type()
    }

    fn encode_into(&self, out: &mut BytesMut) -> Result<(), FrameError> {
        out.put_u8(self.id);
        out.put_u8(self.dp_type().into());
        match &self.value {
            DpValue::Boolean(v) => {
                out.put_u8(1);
                out.put_u8(*v as u8);
            }
            DpValue::Int(v) => {
                out.put_u8(4);
                out.put_u32(*v);
            }
            DpValue::Enum(v) => {
                out.put_u8(1);
                out.put_u8(*v);
            }
            DpValue::String(s) => put_variable(out, s.as_bytes())?,
            DpValue::Raw(raw) => put_variable(out, raw)?,
        }
        Ok(())
    }
}

fn put_variable(out: &mut BytesMut, value: &[u8]) -> Result<(), FrameError> {
    let len = u8::try_from(value.len()).map_err(|_| FrameError::PayloadTooLong(value.len()))?;
    out.put_u8(len);
    out.put_slice(value);
    Ok(())
}

/// Encode `points` in the given order.
pub fn encode(points: &[DataPoint]) -> Result<Bytes, FrameError> {
    let mut out = BytesMut::new();
    for point in points {
        point.encode_into(&mut out)?;
    }
    Ok(out.freeze())
}

/// Sustain time used by both halves of a press, in milliseconds.
pub const CLICK_SUSTAIN_MS: u32 = 1000;

fn click_command(mode: u8, arm_down: u32, arm_up: u32) -> Vec<DataPoint> {
    vec![
        DataPoint::enumeration(DpId::Mode, mode),
        DataPoint::int(DpId::ArmDownPercent, arm_down),
        DataPoint::int(DpId::ArmUpPercent, arm_up),
        DataPoint::int(DpId::ClickSustainTime, CLICK_SUSTAIN_MS),
        DataPoint::boolean(DpId::Click, true),
    ]
}

/// Push the arm fully down.
pub fn engage_command() -> Vec<DataPoint> {
    click_command(1, 100, 0)
}

/// Bring the arm back up.
pub fn release_command() -> Vec<DataPoint> {
    click_command(0, 0, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_each_type() {
        let points = vec![
            DataPoint::boolean(DpId::Click, true),
            DataPoint::int(DpId::ArmDownPercent, 0x0102_0304),
            DataPoint::new(DpId::Program, DpValue::String("ab".to_string())),
            DataPoint::enumeration(DpId::Mode, 2),
            DataPoint::new(7u8, DpValue::Raw(Bytes::from_static(&[0xDE, 0xAD]))),
        ];
        let encoded = encode(&points).unwrap();

        assert_eq!(
            encoded.as_ref(),
            &[
                101, 1, 1, 1, //
                9, 2, 4, 0x01, 0x02, 0x03, 0x04, //
                121, 3, 2, b'a', b'b', //
                8, 4, 1, 2, //
                7, 0, 2, 0xDE, 0xAD,
            ]
        );
    }

    #[test]
    fn test_engage_command_bytes() {
        let encoded = encode(&engage_command()).unwrap();
        assert_eq!(
            hex::encode(&encoded),
            concat!(
                "08040101",
                "09020400000064",
                "0f020400000000",
                "0a0204000003e8",
                "65010101",
            )
        );
    }

    #[test]
    fn test_release_flips_arm_positions() {
        let engage = engage_command();
        let release = release_command();
        assert_eq!(engage.len(), 5);
        assert_eq!(release.len(), 5);
        assert_eq!(release[0].value, DpValue::Enum(0));
        assert_eq!(release[1].value, DpValue::Int(0));
        assert_eq!(release[2].value, DpValue::Int(100));
        assert_eq!(release.last(), engage.last());
        assert_eq!(release.last().map(|p| p.id), Some(u8::from(DpId::Click)));
    }

    #[test]
    fn test_oversized_string_rejected() {
        let point = DataPoint::new(DpId::Program, DpValue::String("x".repeat(256)));
        assert_eq!(encode(&[point]), Err(FrameError::PayloadTooLong(256)));
    }

    #[test]
    fn test_type_tag_round_trip() {
        assert_eq!(DpType::try_from(4u8).ok(), Some(DpType::Enum));
        assert!(DpType::try_from(9u8).is_err());
        assert_eq!(DpId::try_from(101u8).ok(), Some(DpId::Click));
    }
}
