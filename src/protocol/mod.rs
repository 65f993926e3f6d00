//! Protocol module for decoding and encoding characteristic payloads.
//!
//! This module contains the fixed-layout codec for:
//! - Measurement indications (primary, metadata, errors)
//! - Device time writes
//! - Device control commands

pub mod codec;

pub use codec::{
    decode_errors, decode_fragment, decode_metadata, decode_primary, encode_command,
    encode_time_write, ERRORS_LEN, MAX_COMMAND_LEN, METADATA_LEN, PRIMARY_LEN, TIME_WRITE_LEN,
};
