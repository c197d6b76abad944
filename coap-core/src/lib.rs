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

//! Message codec, option registry, and message model for the Constrained Application
//! Protocol ([RFC7252]) plus the Observe extension ([RFC7641]).
//!
//! This crate covers the wire format only: encoding and decoding of CoAP messages, the
//! option registry with its per-option metadata (critical/elective, repeatable, length
//! bounds), and the [`Message`] value type with its construction invariants. It does not
//! talk to a socket or drive retransmission — that lives in `coap-endpoint`, built on top
//! of this crate.
//!
//! [RFC7252]: https://tools.ietf.org/html/rfc7252
//! [RFC7641]: https://tools.ietf.org/html/rfc7641
//!
//! ## Design
//!
//! Unlike a zero-copy, in-place-splicing option buffer, [`Message`] stores its options as
//! a flat, delta-sorted `Vec<(OptionNumber, OptionValue)>`. This is simpler to reason about
//! and to test, at the cost of an allocation per decoded message; the `alloc`-only `no_std`
//! configuration keeps that cost explicit rather than pretending to run allocation-free.
//!
//! ## Future Work
//!
//! This library's scope is deliberately the CoAP core: message codec, option registry,
//! and message model. It does not implement block-wise transfer (RFC7959) reassembly,
//! proxying, or CoAP-over-TCP signaling; only enough option-registry metadata is present
//! for those extensions to round-trip through the codec without being misclassified as
//! unrecognized critical options.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]

extern crate alloc;

pub mod message;
pub mod option;
pub mod uri;

pub mod consts;
#[doc(hidden)]
pub use consts::*;

mod content_format;
pub use content_format::ContentFormat;

mod etag;
pub use etag::ETag;

mod error;
pub use error::*;

mod util;

#[doc(hidden)]
pub mod prelude {
    pub use super::message::{Message, MsgCode, MsgCodeClass, MsgId, MsgToken, MsgType};
    pub use super::option::{OptionNumber, OptionValue, OptionValueType};
    pub use super::uri::TargetUri;
    pub use super::ContentFormat;
    pub use super::Error;
    pub use super::ETag;
}
