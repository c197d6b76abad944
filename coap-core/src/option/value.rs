// Copyright 2019 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use crate::util::{encode_u32, try_decode_u32};
use alloc::string::String;
use alloc::vec::Vec;

/// The wire-level kind an option's value takes, per
/// [RFC7252 §3.2](https://tools.ietf.org/html/rfc7252#section-3.2).
#[derive(Debug, Copy, Eq, PartialEq, Hash, Clone)]
pub enum OptionValueType {
    /// Zero-length value; presence of the option is the signal (e.g. `If-None-Match`).
    Empty,

    /// Opaque byte sequence (e.g. `ETag`).
    Opaque,

    /// UTF-8 string (e.g. `Uri-Path`).
    String,

    /// Unsigned integer, encoded big-endian with leading zero bytes elided.
    Uint,
}

/// An owned CoAP option value, decoded to its logical type.
///
/// Unlike the wire representation, this does not borrow from the message buffer: the
/// message model keeps a `Vec<(OptionNumber, OptionValue)>` per [`crate::message::Message`]
/// rather than splicing option TLVs in-place into a shared byte buffer.
#[derive(Debug, Eq, PartialEq, Hash, Clone)]
pub enum OptionValue {
    /// No value. Used for flag-like options.
    Empty,

    /// Opaque bytes.
    Opaque(Vec<u8>),

    /// A UTF-8 string.
    Str(String),

    /// An unsigned integer up to 32 bits, per the option's length bound.
    Uint(u32),
}

impl OptionValue {
    /// Returns the number of bytes this value would take on the wire.
    pub fn byte_len(&self) -> usize {
        match self {
            OptionValue::Empty => 0,
            OptionValue::Opaque(bytes) => bytes.len(),
            OptionValue::Str(s) => s.len(),
            OptionValue::Uint(v) => {
                let mut buf = [0u8; 4];
                encode_u32(*v, &mut buf).len()
            }
        }
    }

    /// Serializes this value's bytes into `dst`, returning the number of bytes written.
    pub fn encode_into(&self, dst: &mut Vec<u8>) {
        match self {
            OptionValue::Empty => {}
            OptionValue::Opaque(bytes) => dst.extend_from_slice(bytes),
            OptionValue::Str(s) => dst.extend_from_slice(s.as_bytes()),
            OptionValue::Uint(v) => {
                let mut buf = [0u8; 4];
                let encoded = encode_u32(*v, &mut buf);
                dst.extend_from_slice(encoded);
            }
        }
    }

    /// Decodes a raw option value from wire bytes, according to the given value type.
    ///
    /// `String` values that are not valid UTF-8 are kept as `Opaque` rather than rejected
    /// outright, mirroring how most CoAP stacks handle unexpectedly-encoded peers.
    pub fn decode(value_type: OptionValueType, bytes: &[u8]) -> OptionValue {
        match value_type {
            OptionValueType::Empty => OptionValue::Empty,
            OptionValueType::Opaque => OptionValue::Opaque(bytes.to_vec()),
            OptionValueType::String => match core::str::from_utf8(bytes) {
                Ok(s) => OptionValue::Str(s.into()),
                Err(_) => OptionValue::Opaque(bytes.to_vec()),
            },
            OptionValueType::Uint => {
                OptionValue::Uint(try_decode_u32(bytes).unwrap_or(0))
            }
        }
    }

    /// Returns this value's bytes as a byte slice, if it is `Opaque`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            OptionValue::Opaque(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// Returns this value's string content, if it is `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns this value as an integer, if it is `Uint`.
    pub fn as_uint(&self) -> Option<u32> {
        match self {
            OptionValue::Uint(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        OptionValue::Str(s.into())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        OptionValue::Str(s)
    }
}

impl From<u32> for OptionValue {
    fn from(v: u32) -> Self {
        OptionValue::Uint(v)
    }
}

impl From<&[u8]> for OptionValue {
    fn from(b: &[u8]) -> Self {
        OptionValue::Opaque(b.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_round_trip() {
        for v in [0u32, 1, 255, 256, 65535, 65536, 0xffff_ffff] {
            let value = OptionValue::Uint(v);
            let mut buf = Vec::new();
            value.encode_into(&mut buf);
            assert_eq!(buf.len(), value.byte_len());
            let decoded = OptionValue::decode(OptionValueType::Uint, &buf);
            assert_eq!(decoded.as_uint(), Some(v));
        }
    }

    #[test]
    fn string_round_trip() {
        let value = OptionValue::from("temperature");
        let mut buf = Vec::new();
        value.encode_into(&mut buf);
        let decoded = OptionValue::decode(OptionValueType::String, &buf);
        assert_eq!(decoded.as_str(), Some("temperature"));
    }

    #[test]
    fn non_utf8_string_falls_back_to_opaque() {
        let bytes = [0xffu8, 0xfe, 0xfd];
        let decoded = OptionValue::decode(OptionValueType::String, &bytes);
        assert_eq!(decoded.as_bytes(), Some(&bytes[..]));
    }
}
