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

//! The exchange/token table.
//!
//! Correlates an outstanding request with its eventual response by `(remote, token)`,
//! independent of the message ID the reliability layer uses for retransmission. A
//! [`TokenHandle`] is a future over one exchange's outcome; dropping it before it
//! resolves cancels the exchange.

use coap_core::message::{Message, MsgId, MsgToken};
use coap_core::Error;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

enum Sink {
    /// An ordinary request/response exchange: exactly one delivery, then removed.
    Single(Option<oneshot::Sender<Result<Message, Error>>>),
    /// An observe relation: zero or more notification deliveries.
    Stream(mpsc::UnboundedSender<Result<Message, Error>>),
}

struct Entry {
    sink: Sink,
    created_at: Instant,
}

struct NonMsgIdEntry {
    token: MsgToken,
    created_at: Instant,
}

/// `(remote, token)` ↔ pending request, at most one active exchange per key, removed on
/// final response/RST/timeout/cancel.
///
/// Also keeps a side `(remote, msg_id)` → `token` map for exchanges opened over a NON
/// request: those never touch the reliability engine's CON tracking, but a reply RST is
/// still addressed by message id alone (RFC7252 §4.2), so this is the only way to route
/// it back to the exchange it cancels.
#[derive(Default)]
pub(crate) struct ExchangeTable {
    entries: Mutex<HashMap<(SocketAddr, MsgToken), Entry>>,
    non_msg_ids: Mutex<HashMap<(SocketAddr, MsgId), NonMsgIdEntry>>,
}

impl ExchangeTable {
    pub(crate) fn new() -> Self {
        ExchangeTable {
            entries: Mutex::new(HashMap::new()),
            non_msg_ids: Mutex::new(HashMap::new()),
        }
    }

    /// Records that `msg_id` is the message id a NON exchange for `(remote, token)` was
    /// sent under, so a later RST addressed only by `(remote, msg_id)` can find it.
    pub(crate) fn register_non(&self, remote: SocketAddr, msg_id: MsgId, token: MsgToken) {
        self.non_msg_ids.lock().expect("lock poisoned").insert(
            (remote, msg_id),
            NonMsgIdEntry {
                token,
                created_at: Instant::now(),
            },
        );
    }

    /// Fails the exchange registered for `(remote, msg_id)` via [`Self::register_non`],
    /// if any. Returns `true` if a matching NON exchange was found.
    pub(crate) fn fail_by_msg_id(&self, remote: SocketAddr, msg_id: MsgId, err: Error) -> bool {
        let token = self
            .non_msg_ids
            .lock()
            .expect("lock poisoned")
            .remove(&(remote, msg_id))
            .map(|entry| entry.token);
        match token {
            Some(token) => self.fail(remote, token, err),
            None => false,
        }
    }

    fn insert(&self, remote: SocketAddr, token: MsgToken, sink: Sink) {
        self.entries.lock().expect("lock poisoned").insert(
            (remote, token),
            Entry {
                sink,
                created_at: Instant::now(),
            },
        );
    }

    pub(crate) fn register_single(
        &self,
        remote: SocketAddr,
        token: MsgToken,
    ) -> oneshot::Receiver<Result<Message, Error>> {
        let (tx, rx) = oneshot::channel();
        self.insert(remote, token, Sink::Single(Some(tx)));
        rx
    }

    pub(crate) fn register_stream(
        &self,
        remote: SocketAddr,
        token: MsgToken,
    ) -> mpsc::UnboundedReceiver<Result<Message, Error>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.insert(remote, token, Sink::Stream(tx));
        rx
    }

    /// Delivers `message` to the exchange at `(remote, token)`, if any. Returns `true`
    /// if a matching exchange was found (whether or not its receiver was still alive).
    ///
    /// `Single` exchanges are removed on delivery. `Stream` exchanges (observations)
    /// stay registered for subsequent notifications.
    pub(crate) fn deliver(&self, remote: SocketAddr, token: MsgToken, message: Message) -> bool {
        let mut table = self.entries.lock().expect("lock poisoned");
        match table.get_mut(&(remote, token)) {
            Some(entry) => {
                match &mut entry.sink {
                    Sink::Single(slot) => {
                        if let Some(tx) = slot.take() {
                            let _ = tx.send(Ok(message));
                        }
                        table.remove(&(remote, token));
                    }
                    Sink::Stream(tx) => {
                        let _ = tx.send(Ok(message));
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Fails the exchange at `(remote, token)` with `err` and removes it, regardless of
    /// whether it was a single exchange or an observation stream.
    pub(crate) fn fail(&self, remote: SocketAddr, token: MsgToken, err: Error) -> bool {
        let mut table = self.entries.lock().expect("lock poisoned");
        match table.remove(&(remote, token)) {
            Some(entry) => {
                match entry.sink {
                    Sink::Single(Some(tx)) => {
                        let _ = tx.send(Err(err));
                    }
                    Sink::Single(None) | Sink::Stream(_) => {
                        if let Sink::Stream(tx) = entry.sink {
                            let _ = tx.send(Err(err));
                        }
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Removes the exchange without notifying anyone (the application cancelled it).
    pub(crate) fn cancel(&self, remote: SocketAddr, token: MsgToken) {
        self.entries.lock().expect("lock poisoned").remove(&(remote, token));
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, remote: SocketAddr, token: MsgToken) -> bool {
        self.entries.lock().expect("lock poisoned").contains_key(&(remote, token))
    }

    /// Fails every exchange older than `exchange_lifetime` with [`Error::ExchangeExpired`].
    pub(crate) fn expire_stale(&self, now: Instant, exchange_lifetime: Duration) {
        let stale: Vec<(SocketAddr, MsgToken)> = {
            let table = self.entries.lock().expect("lock poisoned");
            table
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.created_at) > exchange_lifetime)
                .map(|(key, _)| *key)
                .collect()
        };
        for (remote, token) in stale {
            self.fail(remote, token, Error::ExchangeExpired);
        }

        self.non_msg_ids
            .lock()
            .expect("lock poisoned")
            .retain(|_, entry| now.duration_since(entry.created_at) <= exchange_lifetime);
    }

    /// Fails every exchange with `remote`, used by [`crate::Endpoint::shutdown`].
    pub(crate) fn fail_all(&self, err: Error) {
        let keys: Vec<(SocketAddr, MsgToken)> = {
            let table = self.entries.lock().expect("lock poisoned");
            table.keys().copied().collect()
        };
        for (remote, token) in keys {
            self.fail(remote, token, err);
        }
    }
}

/// A handle to an in-flight request, returned by [`crate::Endpoint::send_request`].
///
/// Resolves to the final response (piggy-backed or separate). Dropping the handle
/// before it resolves cancels the exchange: [`ExchangeTable::cancel`] removes the
/// pending entry, so any reply that later arrives no longer matches anything and is
/// answered with RST by the dispatcher.
pub struct TokenHandle {
    remote: SocketAddr,
    token: MsgToken,
    receiver: oneshot::Receiver<Result<Message, Error>>,
    table: Arc<ExchangeTable>,
    resolved: bool,
}

impl TokenHandle {
    pub(crate) fn new(
        remote: SocketAddr,
        token: MsgToken,
        receiver: oneshot::Receiver<Result<Message, Error>>,
        table: Arc<ExchangeTable>,
    ) -> Self {
        TokenHandle {
            remote,
            token,
            receiver,
            table,
            resolved: false,
        }
    }

    /// The token this handle's exchange was registered under.
    pub fn token(&self) -> MsgToken {
        self.token
    }
}

impl Future for TokenHandle {
    type Output = Result<Message, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => {
                self.resolved = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                self.resolved = true;
                Poll::Ready(Err(Error::Cancelled))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TokenHandle {
    fn drop(&mut self) {
        if !self.resolved {
            self.table.cancel(self.remote, self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coap_core::message::{MsgCode, MsgType};

    #[test]
    fn single_delivery_removes_entry() {
        let table = ExchangeTable::new();
        let remote: SocketAddr = "127.0.0.1:5683".parse().unwrap();
        let token = MsgToken::from(1u32);
        let _rx = table.register_single(remote, token);
        assert!(table.contains(remote, token));

        let msg = Message::response(MsgType::Ack, MsgCode::SuccessContent, 1, token).unwrap();
        assert!(table.deliver(remote, token, msg));
        assert!(!table.contains(remote, token));
    }

    #[test]
    fn stream_delivery_keeps_entry() {
        let table = ExchangeTable::new();
        let remote: SocketAddr = "127.0.0.1:5683".parse().unwrap();
        let token = MsgToken::from(2u32);
        let _rx = table.register_stream(remote, token);

        let msg = Message::response(MsgType::Non, MsgCode::SuccessContent, 1, token).unwrap();
        assert!(table.deliver(remote, token, msg.clone()));
        assert!(table.contains(remote, token));
        assert!(table.deliver(remote, token, msg));
        assert!(table.contains(remote, token));
    }

    #[test]
    fn cancel_removes_without_notifying() {
        let table = ExchangeTable::new();
        let remote: SocketAddr = "127.0.0.1:5683".parse().unwrap();
        let token = MsgToken::from(3u32);
        let _rx = table.register_single(remote, token);
        table.cancel(remote, token);
        assert!(!table.contains(remote, token));
    }
}
