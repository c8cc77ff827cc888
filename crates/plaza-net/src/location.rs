//! Fixed-size binary location record carried on the unreliable data channel.
//!
//! ```text
//! +--------+-----------+-----------+-----------+------+------+------+------+
//! | player | pos x     | pos y     | pos z     | rot x| rot y| rot z| rot w|
//! | u8     | i32 LE    | i32 LE    | i32 LE    | i16  | i16  | i16  | i16  |
//! +--------+-----------+-----------+-----------+------+------+------+------+
//!   0        1           5           9           13     15     17     19
//! ```
//!
//! Positions are fixed-point with [`POSITION_SCALE`] steps per metre, rotation
//! components with [`ROTATION_SCALE`] steps per unit. Both scales are part of
//! the wire contract. Encoding rounds to nearest and saturates at the integer
//! range; non-finite inputs encode as zero.

use glam::{Quat, Vec3};

use crate::PlayerId;

/// Size of one encoded record in bytes.
pub const LOCATION_RECORD_LEN: usize = 21;

/// Fixed-point steps per metre for positions.
pub const POSITION_SCALE: f64 = 100_000.0;

/// Fixed-point steps per unit for quaternion components.
pub const ROTATION_SCALE: f64 = 10_000.0;

/// Decoded location record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationRecord {
    /// Player the pose belongs to.
    pub player_id: PlayerId,
    /// World-space position.
    pub position: Vec3,
    /// Orientation as received. Not renormalised, so re-encoding reproduces
    /// the same bytes.
    pub rotation: Quat,
}

/// Errors produced by [`decode_location`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    /// Fewer bytes than a full record.
    #[error("location record too short: {len} bytes, need {LOCATION_RECORD_LEN}")]
    TooShort {
        /// Received length.
        len: usize,
    },
    /// More bytes than a record; records are never batched.
    #[error("location record too long: {len} bytes, expected {LOCATION_RECORD_LEN}")]
    TooLong {
        /// Received length.
        len: usize,
    },
}

fn quantize_i32(value: f32, scale: f64) -> i32 {
    if !value.is_finite() {
        return 0;
    }
    (value as f64 * scale)
        .round()
        .clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

fn quantize_i16(value: f32, scale: f64) -> i16 {
    if !value.is_finite() {
        return 0;
    }
    (value as f64 * scale)
        .round()
        .clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Encode one player's pose into a 21-byte record.
pub fn encode_location(
    player_id: PlayerId,
    position: Vec3,
    rotation: Quat,
) -> [u8; LOCATION_RECORD_LEN] {
    let mut buf = [0u8; LOCATION_RECORD_LEN];
    buf[0] = player_id.0;

    for (i, axis) in position.to_array().into_iter().enumerate() {
        let at = 1 + i * 4;
        buf[at..at + 4].copy_from_slice(&quantize_i32(axis, POSITION_SCALE).to_le_bytes());
    }
    for (i, component) in rotation.to_array().into_iter().enumerate() {
        let at = 13 + i * 2;
        buf[at..at + 2].copy_from_slice(&quantize_i16(component, ROTATION_SCALE).to_le_bytes());
    }

    buf
}

/// Decode a record produced by [`encode_location`].
///
/// The buffer must be exactly [`LOCATION_RECORD_LEN`] bytes.
pub fn decode_location(buf: &[u8]) -> Result<LocationRecord, LocationError> {
    let bytes: &[u8; LOCATION_RECORD_LEN] = match buf.len() {
        LOCATION_RECORD_LEN => buf
            .try_into()
            .map_err(|_| LocationError::TooShort { len: buf.len() })?,
        len if len < LOCATION_RECORD_LEN => return Err(LocationError::TooShort { len }),
        len => return Err(LocationError::TooLong { len }),
    };

    let axis = |at: usize| {
        let raw = i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        (raw as f64 / POSITION_SCALE) as f32
    };
    let component = |at: usize| {
        let raw = i16::from_le_bytes([bytes[at], bytes[at + 1]]);
        (raw as f64 / ROTATION_SCALE) as f32
    };

    Ok(LocationRecord {
        player_id: PlayerId(bytes[0]),
        position: Vec3::new(axis(1), axis(5), axis(9)),
        rotation: Quat::from_xyzw(component(13), component(15), component(17), component(19)),
    })
}
