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

use super::codec::{decode_option_header, encode_option_header};
use super::{MsgCode, MsgId, MsgToken, MsgType};
use crate::error::{DecodeError, EncodeError, InvariantViolation};
use crate::option::{OptionNumber, OptionValue, MAX_OPTION_VALUE_SIZE};
use crate::Error;
use alloc::vec::Vec;

const VERSION: u8 = 1;

/// A decoded or to-be-encoded CoAP message: header fields, token, a delta-sorted option
/// list, and payload.
///
/// Options are kept in a flat `Vec<(OptionNumber, OptionValue)>`, sorted by option
/// number as CoAP's delta encoding requires; [`Message::encode`] relies on this
/// ordering and does not re-sort. Use [`Message::add_option`] (rather than mutating
/// `options` directly) to keep that invariant.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Message {
    msg_type: MsgType,
    code: MsgCode,
    msg_id: MsgId,
    token: MsgToken,
    options: Vec<(OptionNumber, OptionValue)>,
    payload: Vec<u8>,
}

impl Message {
    /// Creates a new, empty message of the given type/code/id/token, with no options or
    /// payload.
    pub fn new(msg_type: MsgType, code: MsgCode, msg_id: MsgId, token: MsgToken) -> Message {
        Message {
            msg_type,
            code,
            msg_id,
            token,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Builds a CON or NON request message.
    ///
    /// Returns [`InvariantViolation::BadMessageTypeForRequest`] unless `msg_type` is
    /// `Con` or `Non`, and [`InvariantViolation::BadCodeForResponse`] unless `code` is a
    /// request method.
    pub fn request(
        msg_type: MsgType,
        code: MsgCode,
        msg_id: MsgId,
        token: MsgToken,
    ) -> Result<Message, InvariantViolation> {
        if !msg_type.is_con() && !msg_type.is_non() {
            return Err(InvariantViolation::BadMessageTypeForRequest);
        }
        if !code.is_method() {
            return Err(InvariantViolation::BadCodeForResponse);
        }
        Ok(Message::new(msg_type, code, msg_id, token))
    }

    /// Builds a response message (piggy-backed ACK, separate CON/NON, success or error).
    ///
    /// Returns [`InvariantViolation::BadCodeForResponse`] unless `code` is a success or
    /// error response code.
    pub fn response(
        msg_type: MsgType,
        code: MsgCode,
        msg_id: MsgId,
        token: MsgToken,
    ) -> Result<Message, InvariantViolation> {
        if !code.is_response() {
            return Err(InvariantViolation::BadCodeForResponse);
        }
        Ok(Message::new(msg_type, code, msg_id, token))
    }

    /// Builds an empty (code 0.00) acknowledgement for the given message id, with no
    /// token, options, or payload, per
    /// [RFC7252 §4.2](https://tools.ietf.org/html/rfc7252#section-4.2).
    pub fn empty_ack(msg_id: MsgId) -> Message {
        Message::new(MsgType::Ack, MsgCode::Empty, msg_id, MsgToken::EMPTY)
    }

    /// Builds an empty reset message for the given message id, per
    /// [RFC7252 §4.2](https://tools.ietf.org/html/rfc7252#section-4.2).
    pub fn empty_rst(msg_id: MsgId) -> Message {
        Message::new(MsgType::Res, MsgCode::Empty, msg_id, MsgToken::EMPTY)
    }

    /// Builds an error response carrying `detail` as a UTF-8 diagnostic payload, per
    /// [RFC7252 §5.5.2](https://tools.ietf.org/html/rfc7252#section-5.5.2).
    ///
    /// Returns [`InvariantViolation::BadCodeForResponse`] unless `code` is an error code.
    pub fn error_response(
        msg_type: MsgType,
        code: MsgCode,
        msg_id: MsgId,
        token: MsgToken,
        detail: &str,
    ) -> Result<Message, InvariantViolation> {
        if !code.is_error() {
            return Err(InvariantViolation::BadCodeForResponse);
        }
        let mut msg = Message::new(msg_type, code, msg_id, token);
        if !detail.is_empty() {
            msg.add_option(OptionNumber::CONTENT_FORMAT, OptionValue::Uint(0));
            msg.payload = detail.as_bytes().to_vec();
        }
        Ok(msg)
    }

    /// This message's type (CON/NON/ACK/RST).
    pub fn msg_type(&self) -> MsgType {
        self.msg_type
    }

    /// This message's code.
    pub fn code(&self) -> MsgCode {
        self.code
    }

    /// This message's 16-bit message id.
    pub fn msg_id(&self) -> MsgId {
        self.msg_id
    }

    /// This message's token, used to correlate a response with its request
    /// independently of the message id.
    pub fn token(&self) -> MsgToken {
        self.token
    }

    /// This message's payload bytes, excluding the `0xFF` marker.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Sets this message's payload, replacing any existing payload.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }

    /// Overwrites this message's 16-bit message id.
    pub fn set_msg_id(&mut self, msg_id: MsgId) {
        self.msg_id = msg_id;
    }

    /// Overwrites this message's token.
    pub fn set_token(&mut self, token: MsgToken) {
        self.token = token;
    }

    /// Returns true if this is an empty message (code 0.00): no token, options, or
    /// payload.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Appends an option to this message's option list, keeping the list sorted by
    /// option number as CoAP's delta encoding requires.
    pub fn add_option(&mut self, number: OptionNumber, value: OptionValue) {
        let pos = self
            .options
            .iter()
            .position(|(n, _)| *n > number)
            .unwrap_or(self.options.len());
        self.options.insert(pos, (number, value));
    }

    /// Returns an iterator over all values for the given option number, in the order
    /// they appear in the message.
    pub fn options_with_number(
        &self,
        number: OptionNumber,
    ) -> impl Iterator<Item = &OptionValue> {
        self.options
            .iter()
            .filter(move |(n, _)| *n == number)
            .map(|(_, v)| v)
    }

    /// Returns the first value for the given option number, if present.
    pub fn option_value(&self, number: OptionNumber) -> Option<&OptionValue> {
        self.options_with_number(number).next()
    }

    /// Returns an iterator over every `(OptionNumber, OptionValue)` pair in this
    /// message, in wire order.
    pub fn options(&self) -> impl Iterator<Item = &(OptionNumber, OptionValue)> {
        self.options.iter()
    }

    /// Validates this message's construction invariants: an empty (code 0.00) message
    /// must carry no token, options, or payload.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        if self.is_empty()
            && (!self.token.is_empty() || !self.options.is_empty() || !self.payload.is_empty())
        {
            return Err(InvariantViolation::NonEmptyEmptyMessage);
        }
        Ok(())
    }

    /// Encodes this message to its RFC7252 wire representation.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        self.validate()?;

        let tkl = self.token.len();
        if tkl > 8 {
            return Err(Error::Encode(EncodeError::TokenTooLong));
        }

        let mut out = Vec::with_capacity(4 + tkl + self.payload.len() + 16);

        let first_byte = (VERSION << 6) | ((self.msg_type as u8) << 4) | (tkl as u8);
        out.push(first_byte);
        out.push(self.code.into());
        out.push((self.msg_id >> 8) as u8);
        out.push(self.msg_id as u8);
        out.extend_from_slice(self.token.as_bytes());

        let mut prev_number = OptionNumber::default();
        for (number, value) in &self.options {
            let (min, max) = number.length_bounds();
            let len = value.byte_len();
            if len < min || len > max || len > MAX_OPTION_VALUE_SIZE {
                return Err(Error::Encode(EncodeError::OptionTooLong));
            }

            let delta = *number - prev_number;
            encode_option_header(delta, len, &mut out);
            value.encode_into(&mut out);
            prev_number = *number;
        }

        if !self.payload.is_empty() {
            out.push(0xff);
            out.extend_from_slice(&self.payload);
        }

        Ok(out)
    }

    /// Decodes a message from its RFC7252 wire representation.
    pub fn decode(src: &[u8]) -> Result<Message, Error> {
        match Self::decode_inner(src) {
            Ok(msg) => Ok(msg),
            Err(e) => {
                log::debug!("Message::decode failed: {:?} ({} bytes)", e, src.len());
                Err(e)
            }
        }
    }

    fn decode_inner(src: &[u8]) -> Result<Message, Error> {
        if src.len() < 4 {
            return Err(Error::Decode(DecodeError::InvalidHeader));
        }

        let first_byte = src[0];
        let version = first_byte >> 6;
        if version != VERSION {
            return Err(Error::Decode(DecodeError::InvalidHeader));
        }

        let msg_type = MsgType::try_from((first_byte >> 4) & 0x3)
            .ok_or(Error::Decode(DecodeError::InvalidHeader))?;
        let tkl = (first_byte & 0x0f) as usize;
        if tkl > 8 {
            return Err(Error::Decode(DecodeError::InvalidHeader));
        }

        let code = MsgCode::try_from(src[1]).ok_or(Error::Decode(DecodeError::InvalidHeader))?;
        let msg_id = ((src[2] as u16) << 8) | src[3] as u16;

        let mut pos = 4usize;
        if src.len() < pos + tkl {
            return Err(Error::Decode(DecodeError::InvalidHeader));
        }
        let token = MsgToken::new(&src[pos..pos + tkl]);
        pos += tkl;

        let mut options = Vec::new();
        let mut prev_number = OptionNumber::default();
        let mut saw_payload_marker = false;

        while pos < src.len() {
            if src[pos] == 0xff {
                pos += 1;
                saw_payload_marker = true;
                break;
            }

            let (delta, length, header_len) = decode_option_header(&src[pos..])
                .map_err(Error::Decode)?;
            pos += header_len;

            if src.len() < pos + length {
                return Err(Error::Decode(DecodeError::MalformedPayloadMarker));
            }

            let number = prev_number + delta;
            let (min, max) = number.length_bounds();
            if length < min || length > max {
                return Err(Error::Decode(DecodeError::BadOptionLength));
            }
            if !number.is_repeatable() && options.iter().any(|(n, _)| *n == number) {
                return Err(Error::Decode(DecodeError::BadOptionLength));
            }
            if number.is_critical() && number.static_name().is_none() {
                return Err(Error::Decode(DecodeError::UnknownCriticalOption));
            }

            let value = OptionValue::decode(number.option_value_type(), &src[pos..pos + length]);
            options.push((number, value));

            pos += length;
            prev_number = number;
        }

        if saw_payload_marker && pos == src.len() {
            return Err(Error::Decode(DecodeError::MalformedPayloadMarker));
        }
        let payload = src[pos..].to_vec();

        let msg = Message {
            msg_type,
            code,
            msg_id,
            token,
            options,
            payload,
        };
        msg.validate().map_err(Error::Invariant)?;
        Ok(msg)
    }
}

impl Default for Message {
    fn default() -> Self {
        Message::new(MsgType::Con, MsgCode::Empty, 0, MsgToken::EMPTY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ack_round_trips() {
        let msg = Message::empty_ack(0x1234);
        let bytes = msg.encode().unwrap();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.is_empty());
    }

    #[test]
    fn request_with_options_round_trips() {
        let mut msg =
            Message::request(MsgType::Con, MsgCode::MethodGet, 7, MsgToken::from(42u32)).unwrap();
        msg.add_option(OptionNumber::URI_PATH, OptionValue::from("sensors"));
        msg.add_option(OptionNumber::URI_PATH, OptionValue::from("temperature"));
        msg.add_option(OptionNumber::ACCEPT, OptionValue::Uint(0));

        let bytes = msg.encode().unwrap();
        let decoded = Message::decode(&bytes).unwrap();

        assert_eq!(decoded.code(), MsgCode::MethodGet);
        assert_eq!(decoded.token(), MsgToken::from(42u32));
        let path_segments: Vec<&str> = decoded
            .options_with_number(OptionNumber::URI_PATH)
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(path_segments, vec!["sensors", "temperature"]);
    }

    #[test]
    fn response_with_payload_round_trips() {
        let mut msg = Message::response(
            MsgType::Ack,
            MsgCode::SuccessContent,
            99,
            MsgToken::from(1u32),
        )
        .unwrap();
        msg.add_option(OptionNumber::CONTENT_FORMAT, OptionValue::Uint(0));
        msg.set_payload(b"21.5 C".to_vec());

        let bytes = msg.encode().unwrap();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.payload(), b"21.5 C");
    }

    #[test]
    fn unknown_critical_option_is_rejected() {
        let mut msg =
            Message::request(MsgType::Con, MsgCode::MethodGet, 1, MsgToken::EMPTY).unwrap();
        // Option 21 is unassigned and critical (odd).
        msg.add_option(OptionNumber(21), OptionValue::Opaque(Vec::new()));
        let bytes = msg.encode().unwrap();
        assert_eq!(
            Message::decode(&bytes),
            Err(Error::Decode(DecodeError::UnknownCriticalOption))
        );
    }

    #[test]
    fn empty_message_rejects_token() {
        let msg = Message::new(MsgType::Ack, MsgCode::Empty, 1, MsgToken::from(1u32));
        assert_eq!(
            msg.validate(),
            Err(InvariantViolation::NonEmptyEmptyMessage)
        );
    }

    #[test]
    fn non_response_code_rejected_for_response_constructor() {
        assert_eq!(
            Message::response(MsgType::Ack, MsgCode::MethodGet, 1, MsgToken::EMPTY),
            Err(InvariantViolation::BadCodeForResponse)
        );
    }

    #[test]
    fn oversize_option_value_is_encode_error() {
        let mut msg =
            Message::request(MsgType::Con, MsgCode::MethodGet, 1, MsgToken::EMPTY).unwrap();
        msg.add_option(OptionNumber::URI_PORT, OptionValue::Opaque(vec![0u8; 64]));
        assert_eq!(msg.encode(), Err(Error::Encode(EncodeError::OptionTooLong)));
    }

    proptest::proptest! {
        #[test]
        fn encode_decode_round_trip_for_arbitrary_paths(
            segments in proptest::collection::vec("[a-z]{1,8}", 0..6),
            payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..32),
            msg_id: u16,
        ) {
            let mut msg =
                Message::request(MsgType::Con, MsgCode::MethodGet, msg_id, MsgToken::EMPTY).unwrap();
            for segment in &segments {
                msg.add_option(OptionNumber::URI_PATH, OptionValue::from(segment.as_str()));
            }
            if !payload.is_empty() {
                msg.set_payload(payload.clone());
            }

            let bytes = msg.encode().unwrap();
            let decoded = Message::decode(&bytes).unwrap();

            let decoded_segments: Vec<&str> = decoded
                .options_with_number(OptionNumber::URI_PATH)
                .filter_map(OptionValue::as_str)
                .collect();
            proptest::prop_assert_eq!(decoded_segments, segments);
            proptest::prop_assert_eq!(decoded.payload(), payload.as_slice());
            proptest::prop_assert_eq!(decoded.msg_id(), msg_id);
        }
    }
}
