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

use std::fmt::{Debug, Display, Formatter};

/// Reasons a decode of an inbound frame can fail.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub enum DecodeError {
    /// The fixed 4-byte header is malformed (bad version, TKL > 8, or frame too short).
    InvalidHeader,
    /// A critical option number that this implementation does not recognize was present.
    UnknownCriticalOption,
    /// An option's encoded length violates that option's min/max bound, or a
    /// non-repeatable option appeared more than once.
    BadOptionLength,
    /// The `0xFF` payload marker was present with no payload following it, or
    /// the option stream ended mid-TLV.
    MalformedPayloadMarker,
}

/// Reasons building an outbound frame can fail.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub enum EncodeError {
    /// An option's value exceeds [`crate::option::MAX_OPTION_VALUE_SIZE`] or the option's
    /// own max length bound.
    OptionTooLong,
    /// The token is longer than 8 bytes.
    TokenTooLong,
}

/// Reasons a [`crate::message::Message`] constructor can reject its arguments.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub enum InvariantViolation {
    /// An empty message (code 0.00) was given a token, option, or payload.
    NonEmptyEmptyMessage,
    /// A request constructor was given a message type other than CON/NON.
    BadMessageTypeForRequest,
    /// A response/error constructor was given a non-response message code.
    BadCodeForResponse,
    /// A target/proxy URI did not use the `coap` scheme, or carried a fragment.
    UnsupportedUri,
    /// A path or query segment exceeds its option's length bound.
    OptionValueTooLong,
}

/// Errors produced by the CoAP core: codec, message model, and (via
/// `coap-endpoint`) the reliability/exchange/observe layers built on top of it.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub enum Error {
    /// Failed to parse an inbound frame. See [`DecodeError`].
    Decode(DecodeError),

    /// Failed to build an outbound frame. See [`EncodeError`].
    Encode(EncodeError),

    /// A message constructor's preconditions were violated. See [`InvariantViolation`].
    Invariant(InvariantViolation),

    /// The reliability engine exhausted `MAX_RETRANSMIT` retries without an ACK/response.
    Timeout,

    /// An RST was received for this exchange.
    Rejected,

    /// `EXCHANGE_LIFETIME` elapsed with no final response ever arriving.
    ExchangeExpired,

    /// An observation ended. The `bool` is `true` if the *local* side (this endpoint)
    /// initiated the cancellation (deregister, or dropping the stream), `false` if the
    /// *remote* side did (RST, or a 4.04 notification).
    ObservationCancelled {
        /// Whether this endpoint, rather than the remote peer, ended the observation.
        local: bool,
    },

    /// An I/O error occurred on the underlying socket.
    IOError,

    /// This operation was cancelled (its token handle was dropped).
    Cancelled,

    /// Unable to resolve the given host.
    HostLookupFailure,

    /// The given URI scheme is not supported by this endpoint.
    UnsupportedUriScheme,

    /// One or more supplied arguments are not valid for the given operation.
    InvalidArgument,
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        Error::Encode(e)
    }
}

impl From<InvariantViolation> for Error {
    fn from(e: InvariantViolation) -> Self {
        Error::Invariant(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(_: std::io::Error) -> Self {
        Error::IOError
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        <Self as Debug>::fmt(self, f)
    }
}

impl std::error::Error for Error {}
