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

//! Inbound message routing: the single point every received datagram passes through.
//!
//! Dispatch is driven entirely by `(msg_type, code)`:
//!
//! | type | code | action |
//! |---|---|---|
//! | CON | request | dup check → request handler; arm separate-response timer |
//! | CON | response | dup check → exchange; emit empty ACK |
//! | CON | empty | CoAP ping → reply RST |
//! | NON | request | → request handler |
//! | NON | response | → exchange |
//! | ACK | empty | resolve reliability record; exchange stays registered (separate response expected) |
//! | ACK | response | resolve reliability record; → exchange (piggy-backed) |
//! | RST | (always empty) | resolve reliability record as rejected |

use crate::endpoint::Endpoint;
use crate::reliability::InboundStatus;
use coap_core::message::{Message, MsgId, MsgType};
use coap_core::prelude::MsgCode;
use coap_core::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Reads just enough of a possibly-malformed frame to know whether it deserves an RST,
/// without trusting anything [`Message::decode`] rejected.
fn peek_header(bytes: &[u8]) -> Option<(MsgType, MsgId)> {
    if bytes.len() < 4 {
        return None;
    }
    let msg_type = MsgType::try_from((bytes[0] >> 4) & 0x3)?;
    let msg_id = ((bytes[2] as u16) << 8) | bytes[3] as u16;
    Some((msg_type, msg_id))
}

impl Endpoint {
    pub(crate) async fn dispatch_inbound(self: Arc<Self>, bytes: Vec<u8>, remote: SocketAddr) {
        let message = match Message::decode(&bytes) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("dropping malformed datagram from {}: {:?}", remote, e);
                if let Some((msg_type, msg_id)) = peek_header(&bytes) {
                    if msg_type.is_con() {
                        self.send_reset(remote, msg_id).await;
                    }
                }
                return;
            }
        };

        let msg_type = message.msg_type();
        let code = message.code();
        let msg_id = message.msg_id();
        let token = message.token();

        if code.is_method() {
            self.dispatch_request(message, remote).await;
            return;
        }

        if !code.is_empty() {
            // A response: piggy-backed (ACK carrying a response code) or a separate
            // CON/NON carrying the final answer for an earlier empty ACK.
            if msg_type.is_con() {
                match self.reliability.check_inbound(
                    remote,
                    msg_id,
                    Instant::now(),
                    self.config.exchange_lifetime,
                ) {
                    InboundStatus::DuplicateInFlight | InboundStatus::DuplicateCached(_) => {
                        self.send_empty_ack(remote, msg_id).await;
                        return;
                    }
                    InboundStatus::Fresh => {}
                }
            }
            if msg_type.is_ack() {
                self.reliability.note_ack(remote, msg_id);
            }
            let delivered = self.exchanges.deliver(remote, token, message);
            if msg_type.is_con() {
                if delivered {
                    self.send_empty_ack(remote, msg_id).await;
                } else {
                    self.send_reset(remote, msg_id).await;
                }
            }
            return;
        }

        // An empty message: ACK, RST, or a CoAP ping (empty CON).
        match msg_type {
            MsgType::Ack => {
                self.reliability.note_ack(remote, msg_id);
            }
            MsgType::Res => {
                self.reliability.note_rst(remote, msg_id);
                self.exchanges.fail_by_msg_id(remote, msg_id, Error::Rejected);
            }
            MsgType::Con => {
                self.send_reset(remote, msg_id).await;
            }
            MsgType::Non => {
                log::debug!("ignoring empty NON from {}", remote);
            }
        }
    }

    pub(crate) async fn send_empty_ack(&self, remote: SocketAddr, msg_id: MsgId) {
        let msg = Message::empty_ack(msg_id);
        if let Ok(bytes) = msg.encode() {
            if let Err(e) = self.socket.send_to(&bytes, remote).await {
                log::warn!("send_to {} failed: {:?}", remote, e);
            }
        }
    }

    pub(crate) async fn send_reset(&self, remote: SocketAddr, msg_id: MsgId) {
        let msg = Message::empty_rst(msg_id);
        if let Ok(bytes) = msg.encode() {
            if let Err(e) = self.socket.send_to(&bytes, remote).await {
                log::warn!("send_to {} failed: {:?}", remote, e);
            }
        }
    }

    pub(crate) fn not_found_response(msg_id: MsgId, token: coap_core::message::MsgToken) -> Message {
        Message::error_response(MsgType::Ack, MsgCode::ClientErrorNotFound, msg_id, token, "not found")
            .expect("ClientErrorNotFound is a valid error code")
    }
}
