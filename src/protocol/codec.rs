//! Characteristic payload encoding and decoding.
//!
//! Every payload is a fixed little-endian layout with IEEE-754 single
//! precision floats:
//!
//! | Payload | Layout | Size |
//! |---|---|---|
//! | Primary | u16 year, u8 × 6 time fields, f32 distance, f32 azimuth, f32 inclination | 20 |
//! | Metadata | u32 reference index, f32 dip, f32 roll, f32 temperature, u16 samples, u8 type | 19 |
//! | Errors | (u8 code, f32 data1, f32 data2) × 2 | 18 |
//! | Last time (write) | u16 year, u8 × 6 time fields, zero padding | 20 |
//! | Device control (write) | ASCII command, at most 20 bytes | ≤ 20 |
//!
//! Decoders check the buffer length before reading any field. Bytes past the
//! declared layout are ignored.

use bytes::{Buf, BufMut};

use crate::data::{
    DeviceTimestamp, ErrorPair, ErrorsReading, Fragment, FragmentKind, MetadataReading,
    PrimaryReading,
};
use crate::error::{Error, Result};

/// Size of the encoded device timestamp.
pub const TIMESTAMP_LEN: usize = 8;
/// Size of the primary measurement payload.
pub const PRIMARY_LEN: usize = TIMESTAMP_LEN + 3 * 4;
/// Size of the metadata payload.
pub const METADATA_LEN: usize = 4 + 3 * 4 + 2 + 1;
/// Size of one error slot.
pub const ERROR_PAIR_LEN: usize = 1 + 2 * 4;
/// Size of the errors payload.
pub const ERRORS_LEN: usize = 2 * ERROR_PAIR_LEN;
/// Fixed width of the last-time write.
pub const TIME_WRITE_LEN: usize = 20;
/// Maximum length of a device control command.
pub const MAX_COMMAND_LEN: usize = 20;

fn ensure_len(data: &[u8], expected: usize, payload: &'static str) -> Result<()> {
    if data.len() < expected {
        return Err(Error::TruncatedPayload {
            payload,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn read_timestamp(buf: &mut impl Buf) -> DeviceTimestamp {
    DeviceTimestamp {
        year: buf.get_u16_le(),
        month: buf.get_u8(),
        day: buf.get_u8(),
        hour: buf.get_u8(),
        minute: buf.get_u8(),
        second: buf.get_u8(),
        centisecond: buf.get_u8(),
    }
}

fn read_error_pair(buf: &mut impl Buf) -> ErrorPair {
    ErrorPair {
        code: buf.get_u8(),
        data1: buf.get_f32_le(),
        data2: buf.get_f32_le(),
    }
}

/// Decode a primary measurement indication.
///
/// # Errors
///
/// Returns [`Error::TruncatedPayload`] if `data` is shorter than
/// [`PRIMARY_LEN`].
pub fn decode_primary(data: &[u8]) -> Result<PrimaryReading> {
    ensure_len(data, PRIMARY_LEN, "primary")?;

    let mut buf = data;
    Ok(PrimaryReading {
        timestamp: read_timestamp(&mut buf),
        distance_meters: buf.get_f32_le(),
        azimuth_degrees: buf.get_f32_le(),
        inclination_degrees: buf.get_f32_le(),
    })
}

/// Decode a metadata indication.
///
/// # Errors
///
/// Returns [`Error::TruncatedPayload`] if `data` is shorter than
/// [`METADATA_LEN`].
pub fn decode_metadata(data: &[u8]) -> Result<MetadataReading> {
    ensure_len(data, METADATA_LEN, "metadata")?;

    let mut buf = data;
    Ok(MetadataReading {
        reference_index: buf.get_u32_le(),
        dip_degrees: buf.get_f32_le(),
        roll_degrees: buf.get_f32_le(),
        temperature_celsius: buf.get_f32_le(),
        samples_averaged: buf.get_u16_le(),
        measurement_type: buf.get_u8(),
    })
}

/// Decode an errors indication.
///
/// # Errors
///
/// Returns [`Error::TruncatedPayload`] if `data` is shorter than
/// [`ERRORS_LEN`].
pub fn decode_errors(data: &[u8]) -> Result<ErrorsReading> {
    ensure_len(data, ERRORS_LEN, "errors")?;

    let mut buf = data;
    Ok(ErrorsReading {
        first: read_error_pair(&mut buf),
        second: read_error_pair(&mut buf),
    })
}

/// Decode the payload of the given fragment kind.
pub fn decode_fragment(kind: FragmentKind, data: &[u8]) -> Result<Fragment> {
    match kind {
        FragmentKind::Primary => decode_primary(data).map(Fragment::Primary),
        FragmentKind::Metadata => decode_metadata(data).map(Fragment::Metadata),
        FragmentKind::Errors => decode_errors(data).map(Fragment::Errors),
    }
}

/// Encode a last-time write.
///
/// The characteristic requires exactly [`TIME_WRITE_LEN`] bytes; everything
/// after the timestamp is zero.
pub fn encode_time_write(timestamp: &DeviceTimestamp) -> [u8; TIME_WRITE_LEN] {
    let mut out = [0u8; TIME_WRITE_LEN];
    let mut buf = &mut out[..];

    buf.put_u16_le(timestamp.year);
    buf.put_u8(timestamp.month);
    buf.put_u8(timestamp.day);
    buf.put_u8(timestamp.hour);
    buf.put_u8(timestamp.minute);
    buf.put_u8(timestamp.second);
    buf.put_u8(timestamp.centisecond);

    out
}

/// Encode a device control command.
///
/// The command is truncated to [`MAX_COMMAND_LEN`] bytes and never padded.
/// The device expects lowercase ASCII; callers that need that guarantee must
/// check it themselves.
pub fn encode_command(command: &[u8]) -> Vec<u8> {
    command[..command.len().min(MAX_COMMAND_LEN)].to_vec()
}
