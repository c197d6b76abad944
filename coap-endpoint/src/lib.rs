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

//! A [Tokio][]-based asynchronous CoAP endpoint built on [`coap_core`]: the confirmable
//! retransmission state machine, the request/token exchange table, and the server- and
//! client-side Observe relation manager, all tied together behind one bound UDP socket.
//!
//! # Example
//!
//! ```no_run
//! use coap_endpoint::{Endpoint, EndpointConfig};
//! use coap_core::message::{Message, MsgCode, MsgType};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let endpoint = Endpoint::bind("[::]:5683", EndpointConfig::default())
//!         .await
//!         .expect("UDP bind failed");
//!
//!     endpoint.register_service("hello", |_req, _remote| async move {
//!         Message::response(MsgType::Con, MsgCode::SuccessContent, 0, Default::default())
//!             .map_err(coap_core::Error::Invariant)
//!     });
//!
//!     tokio::spawn(endpoint.clone().run());
//!
//!     let remote = "127.0.0.1:5683".parse().unwrap();
//!     let request = Message::request(MsgType::Con, MsgCode::MethodGet, 0, Default::default())
//!         .expect("GET is a valid request code");
//!     let response = endpoint.send_request(remote, request).await;
//!     assert!(response.is_ok() || response.is_err());
//! }
//! ```
//!
//! [Tokio]: https://tokio.rs/

mod config;
mod dispatcher;
mod endpoint;
mod exchange;
mod observe;
mod reliability;
mod socket;

pub use config::EndpointConfig;
pub use endpoint::{Endpoint, RequestHandler};
pub use exchange::TokenHandle;
pub use observe::ObservationStream;
pub use socket::{CoapSocket, MAX_PACKET_LENGTH};
