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

//! The observe relation manager, implementing [RFC7641].
//!
//! Keyed by `(resource, remote, token)` so that a resource holds only its string
//! identifier rather than a back-reference to its observers, avoiding a reference
//! cycle between resource state and the registry that tracks interest in it.
//!
//! [RFC7641]: https://tools.ietf.org/html/rfc7641

use coap_core::message::MsgToken;
use coap_core::Error;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// 2^24, the modulus Observe sequence numbers wrap around at, per
/// [RFC7641 §3.4](https://tools.ietf.org/html/rfc7641#section-3.4).
pub const SEQ_MODULUS: u32 = 1 << 24;

/// The freshness window: a notification older than this relative to the last one is
/// never considered fresher, regardless of its sequence number.
const FRESHNESS_WINDOW: std::time::Duration = std::time::Duration::from_secs(128);

/// `now_millis() mod 2^24`, the seed for a newly-registered observer's sequence number.
pub(crate) fn seed_seq_now() -> u32 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    (millis % SEQ_MODULUS as u64) as u32
}

/// The RFC7641 §3.4 freshness comparison: is `new` fresher than `old`?
///
/// `(V1>V2 and V1-V2<2^23) or (V1<V2 and V2-V1>2^23)`, with `V1 = new`, `V2 = old`
/// (24-bit modular arithmetic): an ordinary increment is fresher as long as it isn't
/// such a large jump that it more plausibly wrapped all the way around, and a smaller
/// value is fresher only if the gap is big enough to mean it just wrapped.
pub fn is_fresher(new: u32, old: u32) -> bool {
    const HALF: u32 = 1 << 23;
    if new > old {
        new - old < HALF
    } else if new < old {
        old - new > HALF
    } else {
        false
    }
}

struct Observer {
    remote: SocketAddr,
    token: MsgToken,
    last_seq: u32,
    last_notified_at: Instant,
    consecutive_timeouts: u32,
}

/// Server-side registry: one ordered observer set per resource.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    resources: Mutex<HashMap<String, Vec<Observer>>>,
}

impl ObserverRegistry {
    pub(crate) fn new() -> Self {
        ObserverRegistry {
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `(remote, token)` as an observer of `resource`, seeding its sequence
    /// number from the current time. Re-registering an existing observer re-seeds it.
    pub(crate) fn register(&self, resource: &str, remote: SocketAddr, token: MsgToken) -> u32 {
        let seq = seed_seq_now();
        let mut resources = self.resources.lock().expect("lock poisoned");
        let observers = resources.entry(resource.to_string()).or_default();
        observers.retain(|o| !(o.remote == remote && o.token == token));
        observers.push(Observer {
            remote,
            token,
            last_seq: seq,
            last_notified_at: Instant::now(),
            consecutive_timeouts: 0,
        });
        seq
    }

    /// Removes `(remote, token)` from `resource`'s observer set. Returns `true` if it
    /// was present.
    pub(crate) fn deregister(&self, resource: &str, remote: SocketAddr, token: MsgToken) -> bool {
        let mut resources = self.resources.lock().expect("lock poisoned");
        match resources.get_mut(resource) {
            Some(observers) => {
                let before = observers.len();
                observers.retain(|o| !(o.remote == remote && o.token == token));
                before != observers.len()
            }
            None => false,
        }
    }

    /// Returns a snapshot of the current observers of `resource`.
    pub(crate) fn observers_of(&self, resource: &str) -> Vec<(SocketAddr, MsgToken)> {
        self.resources
            .lock()
            .expect("lock poisoned")
            .get(resource)
            .map(|observers| observers.iter().map(|o| (o.remote, o.token)).collect())
            .unwrap_or_default()
    }

    /// Computes and commits the next, strictly-fresher sequence number for one
    /// observer: increment by one, unless more than the freshness window has elapsed
    /// since the last notification, in which case reseed from the current time.
    pub(crate) fn next_seq_for(
        &self,
        resource: &str,
        remote: SocketAddr,
        token: MsgToken,
    ) -> Option<u32> {
        let mut resources = self.resources.lock().expect("lock poisoned");
        let observer = resources
            .get_mut(resource)?
            .iter_mut()
            .find(|o| o.remote == remote && o.token == token)?;

        let now = Instant::now();
        let next = if now.duration_since(observer.last_notified_at) > FRESHNESS_WINDOW {
            seed_seq_now()
        } else {
            (observer.last_seq + 1) % SEQ_MODULUS
        };
        observer.last_seq = next;
        observer.last_notified_at = now;
        Some(next)
    }

    /// Records that a confirmable notification to this observer was acknowledged,
    /// resetting its consecutive-timeout counter.
    pub(crate) fn note_ack(&self, resource: &str, remote: SocketAddr, token: MsgToken) {
        if let Some(observers) = self.resources.lock().expect("lock poisoned").get_mut(resource) {
            if let Some(o) = observers.iter_mut().find(|o| o.remote == remote && o.token == token) {
                o.consecutive_timeouts = 0;
            }
        }
    }

    /// Records that a confirmable notification to this observer timed out. Returns
    /// `true` if this pushed the observer over `max_retransmit + 1` consecutive
    /// timeouts, in which case it has already been removed.
    pub(crate) fn note_timeout_and_maybe_drop(
        &self,
        resource: &str,
        remote: SocketAddr,
        token: MsgToken,
        max_retransmit: u32,
    ) -> bool {
        let mut resources = self.resources.lock().expect("lock poisoned");
        let observers = match resources.get_mut(resource) {
            Some(observers) => observers,
            None => return false,
        };
        let Some(o) = observers.iter_mut().find(|o| o.remote == remote && o.token == token) else {
            return false;
        };
        o.consecutive_timeouts += 1;
        let drop = o.consecutive_timeouts > max_retransmit;
        if drop {
            observers.retain(|o| !(o.remote == remote && o.token == token));
        }
        drop
    }

    /// Removes every observer of `resource` (e.g. on resource deletion), returning the
    /// removed set so the caller can notify them with a `4.04` before dropping.
    pub(crate) fn remove_all(&self, resource: &str) -> Vec<(SocketAddr, MsgToken)> {
        self.resources
            .lock()
            .expect("lock poisoned")
            .remove(resource)
            .map(|observers| observers.into_iter().map(|o| (o.remote, o.token)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, resource: &str) -> usize {
        self.resources
            .lock()
            .expect("lock poisoned")
            .get(resource)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// Client-side: a finite, non-restartable sequence of notifications for one
/// observation.
///
/// Stale or reordered notifications (per the RFC7641 freshness rule) are discarded
/// rather than yielded. The stream ends when the underlying exchange is cancelled, the
/// observation is deregistered, or the peer sends an RST — in every case the final item
/// is `Some(Err(_))`, and the stream then yields `None` forever after.
pub struct ObservationStream {
    receiver: mpsc::UnboundedReceiver<Result<coap_core::message::Message, Error>>,
    last_seq: Option<u32>,
    done: bool,
}

impl ObservationStream {
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<Result<coap_core::message::Message, Error>>,
    ) -> Self {
        ObservationStream {
            receiver,
            last_seq: None,
            done: false,
        }
    }
}

impl futures::Stream for ObservationStream {
    type Item = Result<coap_core::message::Message, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        loop {
            return match self.receiver.poll_recv(cx) {
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    Poll::Ready(Some(Err(e)))
                }
                Poll::Ready(Some(Ok(message))) => {
                    let seq = message
                        .option_value(coap_core::option::OptionNumber::OBSERVE)
                        .and_then(coap_core::option::OptionValue::as_uint);
                    match (seq, self.last_seq) {
                        (Some(seq), Some(last)) if !is_fresher(seq, last) => continue,
                        (Some(seq), _) => self.last_seq = Some(seq),
                        (None, _) => {}
                    }
                    Poll::Ready(Some(Ok(message)))
                }
                Poll::Ready(None) => {
                    self.done = true;
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_rule_handles_wraparound() {
        assert!(is_fresher(5, 4));
        assert!(!is_fresher(4, 5));
        // Wraparound: a small new value is fresher than a value just below the modulus.
        assert!(is_fresher(2, SEQ_MODULUS - 2));
        assert!(!is_fresher(SEQ_MODULUS - 2, 2));
        assert!(!is_fresher(5, 5));
    }

    #[test]
    fn register_then_sequence_increments() {
        let registry = ObserverRegistry::new();
        let remote: SocketAddr = "127.0.0.1:5683".parse().unwrap();
        let token = MsgToken::from(1u32);
        let seq0 = registry.register("sensors/temp", remote, token);
        let seq1 = registry.next_seq_for("sensors/temp", remote, token).unwrap();
        assert!(is_fresher(seq1, seq0));
        assert_eq!(registry.count("sensors/temp"), 1);
    }

    #[test]
    fn deregister_removes_observer() {
        let registry = ObserverRegistry::new();
        let remote: SocketAddr = "127.0.0.1:5683".parse().unwrap();
        let token = MsgToken::from(1u32);
        registry.register("sensors/temp", remote, token);
        assert!(registry.deregister("sensors/temp", remote, token));
        assert_eq!(registry.count("sensors/temp"), 0);
    }

    #[test]
    fn drops_observer_after_max_retransmit_plus_one_timeouts() {
        let registry = ObserverRegistry::new();
        let remote: SocketAddr = "127.0.0.1:5683".parse().unwrap();
        let token = MsgToken::from(1u32);
        registry.register("sensors/temp", remote, token);

        for _ in 0..4 {
            assert!(!registry.note_timeout_and_maybe_drop("sensors/temp", remote, token, 4));
        }
        assert!(registry.note_timeout_and_maybe_drop("sensors/temp", remote, token, 4));
        assert_eq!(registry.count("sensors/temp"), 0);
    }
}
