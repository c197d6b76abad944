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

//! The local CoAP endpoint: owns a bound UDP socket and ties the reliability engine,
//! exchange table, and observe registry together behind one public surface.

use crate::config::EndpointConfig;
use crate::exchange::{ExchangeTable, TokenHandle};
use crate::observe::{ObservationStream, ObserverRegistry};
use crate::reliability::{jittered_retransmit_delay, AckOutcome, ReliabilityEngine};
use crate::socket::CoapSocket;
use coap_core::message::{Message, MsgCode, MsgId, MsgToken, MsgType};
use coap_core::option::{OptionNumber, OptionValue};
use coap_core::uri::TargetUri;
use coap_core::{ContentFormat, Error};
use futures::future::BoxFuture;
use rand::RngCore;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::ToSocketAddrs;

/// A handler for inbound requests on one registered path.
///
/// Implemented for any `Fn(Message, SocketAddr) -> impl Future<Output = Result<Message,
/// Error>> + Send` closure, so most services never need to name this trait directly.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: Message, remote: SocketAddr) -> BoxFuture<'static, Result<Message, Error>>;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(Message, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Message, Error>> + Send + 'static,
{
    fn handle(&self, request: Message, remote: SocketAddr) -> BoxFuture<'static, Result<Message, Error>> {
        Box::pin(self(request, remote))
    }
}

/// A local CoAP endpoint: one bound UDP socket plus the reliability, exchange, and
/// observe state needed to act as both a client and a server on it.
///
/// Constructed via [`Endpoint::bind`]. The returned `Arc<Endpoint>` must be driven by a
/// task calling [`Endpoint::run`] (or repeatedly [`Endpoint::receive_one`]) for any
/// inbound traffic — requests, responses, or notifications — to be processed; nothing
/// here spawns that task implicitly.
pub struct Endpoint {
    pub(crate) socket: CoapSocket,
    pub(crate) config: EndpointConfig,
    pub(crate) reliability: ReliabilityEngine,
    pub(crate) exchanges: Arc<ExchangeTable>,
    pub(crate) observers: ObserverRegistry,
    services: Mutex<HashMap<String, Arc<dyn RequestHandler>>>,
    next_msg_id: AtomicU16,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("socket", &self.socket)
            .field("config", &self.config)
            .field("services", &self.services.lock().expect("lock poisoned").keys().collect::<Vec<_>>())
            .field("shutting_down", &self.shutting_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Binds a new endpoint to `addr` with the given transmission parameters.
    ///
    /// Also spawns a background task that periodically expires stale inbound
    /// duplicate-detection records and unanswered exchanges past `exchange_lifetime`;
    /// the task holds only a weak reference and exits once the endpoint is dropped.
    pub async fn bind<A: ToSocketAddrs>(addr: A, config: EndpointConfig) -> io::Result<Arc<Endpoint>> {
        let endpoint = Arc::new(Endpoint {
            socket: CoapSocket::bind(addr).await?,
            config,
            reliability: ReliabilityEngine::new(),
            exchanges: Arc::new(ExchangeTable::new()),
            observers: ObserverRegistry::new(),
            services: Mutex::new(HashMap::new()),
            next_msg_id: AtomicU16::new(1),
            shutting_down: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&endpoint);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(30)).await;
                let Some(endpoint) = weak.upgrade() else { break };
                let now = std::time::Instant::now();
                endpoint.reliability.sweep_expired(now);
                endpoint.exchanges.expire_stale(now, endpoint.config.exchange_lifetime);
            }
        });

        Ok(endpoint)
    }

    /// The local address this endpoint is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn next_msg_id(&self) -> MsgId {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    fn fresh_token() -> MsgToken {
        let mut buf = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut buf);
        MsgToken::from(&buf[..])
    }

    fn normalize_path(path: &str) -> String {
        path.trim_start_matches('/').to_string()
    }

    /// Registers `handler` to serve requests whose `Uri-Path` equals `path` (given
    /// without a leading `/`, e.g. `"sensors/temp"`).
    pub fn register_service(&self, path: &str, handler: impl RequestHandler) {
        self.services
            .lock()
            .expect("lock poisoned")
            .insert(Self::normalize_path(path), Arc::new(handler));
    }

    /// Deregisters the service at `path`, if any.
    pub fn unregister_service(&self, path: &str) {
        self.services.lock().expect("lock poisoned").remove(&Self::normalize_path(path));
    }

    /// Sends `request` to `remote`, assigning it a fresh message id and (if empty) a
    /// fresh token, and returns a handle resolving to the final response.
    ///
    /// Dropping the returned handle before it resolves cancels the exchange.
    pub fn send_request(self: &Arc<Self>, remote: SocketAddr, mut request: Message) -> TokenHandle {
        let token = if request.token().is_empty() {
            Self::fresh_token()
        } else {
            request.token()
        };
        request.set_token(token);
        let msg_id = self.next_msg_id();
        request.set_msg_id(msg_id);

        let receiver = self.exchanges.register_single(remote, token);
        let handle = TokenHandle::new(remote, token, receiver, self.exchange_table_handle());

        let is_con = request.msg_type().is_con();
        let endpoint = self.clone();
        tokio::spawn(async move {
            let bytes = match request.encode() {
                Ok(b) => b,
                Err(e) => {
                    endpoint.exchanges.fail(remote, token, e);
                    return;
                }
            };
            if is_con {
                match endpoint.drive_confirmable_send(remote, msg_id, bytes).await {
                    Ok(AckOutcome::Rejected) => {
                        endpoint.exchanges.fail(remote, token, Error::Rejected);
                    }
                    Ok(AckOutcome::Acked) => {
                        // The final response (piggy-backed or separate) resolves the
                        // exchange directly from the dispatcher; nothing more to do here.
                    }
                    Err(e) => {
                        endpoint.exchanges.fail(remote, token, e);
                    }
                }
            } else {
                endpoint.exchanges.register_non(remote, msg_id, token);
                if let Err(_e) = endpoint.socket.send_to(&bytes, remote).await {
                    endpoint.exchanges.fail(remote, token, Error::IOError);
                }
            }
        });

        handle
    }

    /// Sends an observe request (a GET with `Observe: 0`) to `remote` and returns a
    /// stream of update notifications.
    pub fn observe(self: &Arc<Self>, remote: SocketAddr, mut request: Message) -> ObservationStream {
        request.add_option(OptionNumber::OBSERVE, OptionValue::Uint(0));
        let token = if request.token().is_empty() {
            Self::fresh_token()
        } else {
            request.token()
        };
        request.set_token(token);
        let msg_id = self.next_msg_id();
        request.set_msg_id(msg_id);

        let receiver = self.exchanges.register_stream(request_remote(remote), token);
        let is_con = request.msg_type().is_con();
        let endpoint = self.clone();
        tokio::spawn(async move {
            let bytes = match request.encode() {
                Ok(b) => b,
                Err(e) => {
                    endpoint.exchanges.fail(remote, token, e);
                    return;
                }
            };
            if is_con {
                if let Ok(AckOutcome::Rejected) =
                    endpoint.drive_confirmable_send(remote, msg_id, bytes).await
                {
                    endpoint.exchanges.fail(remote, token, Error::Rejected);
                }
            } else {
                endpoint.exchanges.register_non(remote, msg_id, token);
                if let Err(_e) = endpoint.socket.send_to(&bytes, remote).await {
                    endpoint.exchanges.fail(remote, token, Error::IOError);
                }
            }
        });

        ObservationStream::new(receiver)
    }

    /// The number of clients currently observing `resource`.
    pub fn observer_count(&self, resource: &str) -> usize {
        self.observers.count(&Self::normalize_path(resource))
    }

    /// Notifies every current observer of `resource` with a fresh representation.
    ///
    /// Each observer is notified independently (as a confirmable message) and in
    /// parallel; a slow or unreachable observer does not delay the others.
    pub async fn notify_observers(self: &Arc<Self>, resource: &str, content_format: ContentFormat, payload: Vec<u8>) {
        let path_key = Self::normalize_path(resource);
        for (remote, token) in self.observers.observers_of(&path_key) {
            let endpoint = self.clone();
            let path_key = path_key.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                endpoint.notify_one(&path_key, remote, token, content_format, payload).await;
            });
        }
    }

    async fn notify_one(
        self: Arc<Self>,
        resource: &str,
        remote: SocketAddr,
        token: MsgToken,
        content_format: ContentFormat,
        payload: Vec<u8>,
    ) {
        let Some(seq) = self.observers.next_seq_for(resource, remote, token) else {
            return;
        };
        let msg_id = self.next_msg_id();
        let mut notification = match Message::response(MsgType::Con, MsgCode::SuccessContent, msg_id, token) {
            Ok(m) => m,
            Err(_) => return,
        };
        notification.add_option(OptionNumber::OBSERVE, OptionValue::from(seq));
        notification.add_option(OptionNumber::CONTENT_FORMAT, OptionValue::from(content_format.0 as u32));
        notification.set_payload(payload);

        let bytes = match notification.encode() {
            Ok(b) => b,
            Err(_) => return,
        };

        match self.drive_confirmable_send(remote, msg_id, bytes).await {
            Ok(AckOutcome::Acked) => self.observers.note_ack(resource, remote, token),
            Ok(AckOutcome::Rejected) => {
                self.observers.deregister(resource, remote, token);
            }
            Err(Error::Timeout) => {
                self.observers
                    .note_timeout_and_maybe_drop(resource, remote, token, self.config.max_retransmit);
            }
            Err(_) => {}
        }
    }

    /// Notifies every observer of `resource` that it has been deleted (`4.04`) and
    /// drops the relations.
    pub async fn notify_resource_deleted(self: &Arc<Self>, resource: &str) {
        let path_key = Self::normalize_path(resource);
        let observers = self.observers.remove_all(&path_key);
        for (remote, token) in observers {
            let msg_id = self.next_msg_id();
            if let Ok(msg) = Message::response(MsgType::Non, MsgCode::ClientErrorNotFound, msg_id, token) {
                if let Ok(bytes) = msg.encode() {
                    let _ = self.socket.send_to(&bytes, remote).await;
                }
            }
        }
    }

    /// Runs the sends-then-waits retransmission loop for one outbound confirmable
    /// message, returning how it was finally resolved (or [`Error::Timeout`] if
    /// `max_retransmit` retries were exhausted with no ACK/RST).
    pub(crate) async fn drive_confirmable_send(
        &self,
        remote: SocketAddr,
        msg_id: MsgId,
        bytes: Vec<u8>,
    ) -> Result<AckOutcome, Error> {
        let (outcome_cell, notify) = self.reliability.begin_outbound(remote, msg_id);
        self.socket.send_to(&bytes, remote).await?;

        let mut resolved = None;
        for attempt in 1..=self.config.max_retransmit {
            let delay = {
                let mut rng = rand::thread_rng();
                jittered_retransmit_delay(&self.config, attempt, &mut rng)
            };
            tokio::select! {
                _ = notify.notified() => {
                    resolved = *outcome_cell.lock().expect("lock poisoned");
                    break;
                }
                _ = tokio::time::sleep(delay) => {
                    self.socket.send_to(&bytes, remote).await?;
                }
            }
        }
        if resolved.is_none() {
            resolved = *outcome_cell.lock().expect("lock poisoned");
        }
        self.reliability.end_outbound(remote, msg_id);
        resolved.ok_or(Error::Timeout)
    }

    pub(crate) async fn dispatch_request(self: Arc<Self>, request: Message, remote: SocketAddr) {
        let msg_type = request.msg_type();
        let msg_id = request.msg_id();
        let token = request.token();

        match self.reliability.check_inbound(
            remote,
            msg_id,
            std::time::Instant::now(),
            self.config.exchange_lifetime,
        ) {
            crate::reliability::InboundStatus::DuplicateInFlight => {
                if let Some(bytes) = self.reliability.await_inbound_reply(remote, msg_id).await {
                    let _ = self.socket.send_to(&bytes, remote).await;
                }
                return;
            }
            crate::reliability::InboundStatus::DuplicateCached(bytes) => {
                let _ = self.socket.send_to(&bytes, remote).await;
                return;
            }
            crate::reliability::InboundStatus::Fresh => {}
        }

        let target = TargetUri::from_message(&request);
        let path_key = target.path.join("/");
        let observe_request = request
            .option_value(OptionNumber::OBSERVE)
            .and_then(OptionValue::as_uint);

        let handler = self.services.lock().expect("lock poisoned").get(&path_key).cloned();

        let Some(handler) = handler else {
            let response = Self::not_found_response(msg_id, token);
            let bytes = response.encode().expect("valid error response always encodes");
            self.reliability.cache_inbound_reply(remote, msg_id, bytes.clone());
            let _ = self.socket.send_to(&bytes, remote).await;
            return;
        };

        let fut = handler.handle(request.clone(), remote);
        tokio::pin!(fut);

        let mut separate_ack_sent = false;
        let result = if msg_type.is_con() {
            match tokio::time::timeout(self.config.separate_response_threshold, &mut fut).await {
                Ok(r) => r,
                Err(_) => {
                    self.send_empty_ack(remote, msg_id).await;
                    separate_ack_sent = true;
                    fut.await
                }
            }
        } else {
            fut.await
        };

        let mut response = match result {
            Ok(r) => r,
            Err(e) => self.error_response(e, token),
        };

        if let Some(seq) = observe_request {
            if seq == 0 {
                let assigned = self.observers.register(&path_key, remote, token);
                response.add_option(OptionNumber::OBSERVE, OptionValue::from(assigned));
            } else {
                self.observers.deregister(&path_key, remote, token);
            }
        }

        let response_type = if separate_ack_sent {
            if msg_type.is_con() {
                MsgType::Con
            } else {
                MsgType::Non
            }
        } else if msg_type.is_con() {
            MsgType::Ack
        } else {
            MsgType::Non
        };
        let response_msg_id = if response_type == MsgType::Ack { msg_id } else { self.next_msg_id() };

        let mut final_response = Message::new(response_type, response.code(), response_msg_id, token);
        for (number, value) in response.options() {
            final_response.add_option(*number, value.clone());
        }
        final_response.set_payload(response.payload().to_vec());

        let bytes = match final_response.encode() {
            Ok(b) => b,
            Err(e) => {
                log::warn!("failed to encode response to {}: {:?}", remote, e);
                return;
            }
        };

        if !separate_ack_sent {
            self.reliability.cache_inbound_reply(remote, msg_id, bytes.clone());
        }

        if response_type == MsgType::Con {
            let endpoint = self.clone();
            tokio::spawn(async move {
                let _ = endpoint.drive_confirmable_send(remote, response_msg_id, bytes).await;
            });
        } else if let Err(e) = self.socket.send_to(&bytes, remote).await {
            log::warn!("send_to {} failed: {:?}", remote, e);
        }
    }

    fn error_response(&self, err: Error, token: MsgToken) -> Message {
        let code = match err {
            Error::InvalidArgument => MsgCode::ClientErrorBadRequest,
            _ => MsgCode::ServerErrorInternalServerError,
        };
        Message::error_response(MsgType::Ack, code, 0, token, &alloc::format!("{:?}", err))
            .unwrap_or_else(|_| Message::new(MsgType::Ack, code, 0, token))
    }

    /// Receives and dispatches a single inbound datagram. Returns once that one
    /// datagram (not necessarily its reply) has been fully handled.
    pub async fn receive_one(self: &Arc<Self>) -> io::Result<()> {
        let mut buf = vec![0u8; self.config.max_packet_length];
        let (len, remote) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        let endpoint = self.clone();
        tokio::spawn(async move {
            endpoint.dispatch_inbound(buf, remote).await;
        });
        Ok(())
    }

    /// Runs [`Endpoint::receive_one`] in a loop until [`Endpoint::shutdown`] is called.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        while !self.shutting_down.load(Ordering::Acquire) {
            self.receive_one().await?;
        }
        Ok(())
    }

    /// Marks this endpoint as shutting down: [`Endpoint::run`] exits its loop, and
    /// every pending exchange fails with [`Error::Cancelled`].
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.exchanges.fail_all(Error::Cancelled);
    }

    fn exchange_table_handle(self: &Arc<Self>) -> Arc<ExchangeTable> {
        self.exchanges.clone()
    }
}

fn request_remote(remote: SocketAddr) -> SocketAddr {
    remote
}

extern crate alloc;
