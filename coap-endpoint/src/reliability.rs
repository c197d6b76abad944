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

//! The CON retransmission state machine and inbound duplicate filter.
//!
//! Tracks outbound confirmable messages awaiting ACK/RST (so a retransmit loop can be
//! woken the moment one resolves) and inbound confirmable messages already seen (so a
//! retransmission from the peer is answered from cache instead of re-invoking the
//! request handler).

use crate::config::EndpointConfig;
use coap_core::message::MsgId;
use rand::RngCore;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Outcome of an outbound CON exchange, as observed by the dispatcher and delivered to
/// the retransmit loop.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum AckOutcome {
    Acked,
    Rejected,
}

struct OutboundRecord {
    outcome: Arc<Mutex<Option<AckOutcome>>>,
    notify: Arc<Notify>,
}

/// State kept for one inbound CON so that repeated copies (the peer's own
/// retransmissions) are suppressed rather than re-invoked.
struct InboundRecord {
    expires_at: Instant,
    /// `None` while the application handler is still producing a reply; `Some(bytes)`
    /// once an ACK or response has been sent and cached for duplicate resends.
    cached_reply: Option<Vec<u8>>,
    /// Woken (via `notify_waiters`) once `cached_reply` is filled in, so a duplicate that
    /// arrived while the handler was still running can wait for the same reply instead
    /// of being dropped.
    notify: Arc<Notify>,
}

/// What the dispatcher should do with a newly-arrived inbound CON, from
/// [`ReliabilityEngine::check_inbound`].
pub(crate) enum InboundStatus {
    /// First time this `(remote, msg_id)` has been seen; forward to the request handler.
    Fresh,
    /// A duplicate while the handler is still running; wait for the in-flight reply via
    /// [`ReliabilityEngine::await_inbound_reply`] and resend it once ready.
    DuplicateInFlight,
    /// A duplicate after a reply was already produced; resend these cached bytes.
    DuplicateCached(Vec<u8>),
}

/// Owns the outbound retransmission records and the inbound CON dedup table. Locked
/// before the exchange table and the observer registry on any update that touches more
/// than one of the three.
#[derive(Default)]
pub(crate) struct ReliabilityEngine {
    outbound: Mutex<HashMap<(SocketAddr, MsgId), OutboundRecord>>,
    inbound: Mutex<HashMap<(SocketAddr, MsgId), InboundRecord>>,
}

impl ReliabilityEngine {
    pub(crate) fn new() -> Self {
        ReliabilityEngine {
            outbound: Mutex::new(HashMap::new()),
            inbound: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new outbound CON awaiting ACK/RST, returning the shared outcome cell
    /// and notifier the retransmit loop should wait on between retries.
    pub(crate) fn begin_outbound(
        &self,
        remote: SocketAddr,
        msg_id: MsgId,
    ) -> (Arc<Mutex<Option<AckOutcome>>>, Arc<Notify>) {
        let outcome = Arc::new(Mutex::new(None));
        let notify = Arc::new(Notify::new());
        self.outbound.lock().expect("lock poisoned").insert(
            (remote, msg_id),
            OutboundRecord {
                outcome: outcome.clone(),
                notify: notify.clone(),
            },
        );
        (outcome, notify)
    }

    /// Removes the outbound record once the retransmit loop has finished (ACKed,
    /// rejected, or timed out), so repeated `note_ack`/`note_rst` on a stale message id
    /// become no-ops.
    pub(crate) fn end_outbound(&self, remote: SocketAddr, msg_id: MsgId) {
        self.outbound.lock().expect("lock poisoned").remove(&(remote, msg_id));
    }

    /// Records that an ACK (empty or piggy-backed) arrived for `(remote, msg_id)`,
    /// cancelling further retransmissions. Returns `true` if a pending record matched.
    pub(crate) fn note_ack(&self, remote: SocketAddr, msg_id: MsgId) -> bool {
        self.resolve(remote, msg_id, AckOutcome::Acked)
    }

    /// Records that an RST arrived for `(remote, msg_id)`, cancelling further
    /// retransmissions. Returns `true` if a pending record matched.
    pub(crate) fn note_rst(&self, remote: SocketAddr, msg_id: MsgId) -> bool {
        self.resolve(remote, msg_id, AckOutcome::Rejected)
    }

    fn resolve(&self, remote: SocketAddr, msg_id: MsgId, outcome: AckOutcome) -> bool {
        let table = self.outbound.lock().expect("lock poisoned");
        if let Some(record) = table.get(&(remote, msg_id)) {
            *record.outcome.lock().expect("lock poisoned") = Some(outcome);
            record.notify.notify_waiters();
            true
        } else {
            false
        }
    }

    /// Checks (and updates) the inbound CON dedup table for a freshly-decoded request.
    pub(crate) fn check_inbound(
        &self,
        remote: SocketAddr,
        msg_id: MsgId,
        now: Instant,
        exchange_lifetime: Duration,
    ) -> InboundStatus {
        let mut table = self.inbound.lock().expect("lock poisoned");
        match table.get(&(remote, msg_id)) {
            Some(InboundRecord { cached_reply: Some(bytes), .. }) => {
                InboundStatus::DuplicateCached(bytes.clone())
            }
            Some(InboundRecord { cached_reply: None, .. }) => InboundStatus::DuplicateInFlight,
            None => {
                table.insert(
                    (remote, msg_id),
                    InboundRecord {
                        expires_at: now + exchange_lifetime,
                        cached_reply: None,
                        notify: Arc::new(Notify::new()),
                    },
                );
                InboundStatus::Fresh
            }
        }
    }

    /// Caches the ACK/response bytes sent for an inbound CON, so a later duplicate of
    /// the same request can be answered without re-invoking the handler, and wakes any
    /// duplicate already waiting in [`ReliabilityEngine::await_inbound_reply`].
    pub(crate) fn cache_inbound_reply(&self, remote: SocketAddr, msg_id: MsgId, bytes: Vec<u8>) {
        if let Some(record) = self.inbound.lock().expect("lock poisoned").get_mut(&(remote, msg_id)) {
            record.cached_reply = Some(bytes);
            record.notify.notify_waiters();
        }
    }

    /// Waits for the reply to a `(remote, msg_id)` whose handler is still running (an
    /// [`InboundStatus::DuplicateInFlight`]), returning the bytes once cached, or `None`
    /// if the record is swept (by [`ReliabilityEngine::sweep_expired`]) before a reply
    /// is ever produced.
    pub(crate) async fn await_inbound_reply(&self, remote: SocketAddr, msg_id: MsgId) -> Option<Vec<u8>> {
        loop {
            let notify = match self.inbound.lock().expect("lock poisoned").get(&(remote, msg_id)) {
                Some(InboundRecord { cached_reply: Some(bytes), .. }) => return Some(bytes.clone()),
                Some(record) => record.notify.clone(),
                None => return None,
            };
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // Re-check after enabling: the reply may have been cached between the lookup
            // above and the waiter being registered.
            match self.inbound.lock().expect("lock poisoned").get(&(remote, msg_id)) {
                Some(InboundRecord { cached_reply: Some(bytes), .. }) => return Some(bytes.clone()),
                Some(_) => {}
                None => return None,
            }
            notified.await;
        }
    }

    /// Drops expired inbound dedup records and (defensively) any outbound record whose
    /// retransmit loop died without cleaning up after itself.
    pub(crate) fn sweep_expired(&self, now: Instant) {
        self.inbound
            .lock()
            .expect("lock poisoned")
            .retain(|_, record| record.expires_at > now);
    }
}

/// The jittered delay before the `attempt`'th retransmission (1-based; the original
/// send is attempt 0 and is sent immediately with no delay).
pub(crate) fn jittered_retransmit_delay(
    config: &EndpointConfig,
    attempt: u32,
    rng: &mut dyn RngCore,
) -> Duration {
    let base = config.base_retransmit_delay(attempt);

    const JDIV: u64 = 512;
    let rmod = ((JDIV as f32) * (config.ack_random_factor - 1.0)) as u64;
    let jmul = JDIV + if rmod == 0 { 0 } else { rng.next_u64() % rmod };

    Duration::from_millis((base.as_millis() as u64) * jmul / JDIV)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn jittered_delay_is_within_ack_random_factor_bounds() {
        let config = EndpointConfig::default();
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 1..=4 {
            let base = config.base_retransmit_delay(attempt);
            for _ in 0..100 {
                let delay = jittered_retransmit_delay(&config, attempt, &mut rng);
                assert!(delay >= base, "{:?} < {:?}", delay, base);
                let max = Duration::from_millis(
                    (base.as_millis() as f32 * config.ack_random_factor) as u64,
                );
                assert!(delay <= max, "{:?} > {:?}", delay, max);
            }
        }
    }

    #[test]
    fn ack_resolves_pending_outbound_record() {
        let engine = ReliabilityEngine::new();
        let remote: SocketAddr = "127.0.0.1:5683".parse().unwrap();
        let (outcome, _notify) = engine.begin_outbound(remote, 7);
        assert!(engine.note_ack(remote, 7));
        assert_eq!(*outcome.lock().unwrap(), Some(AckOutcome::Acked));
        // Unknown message id: no match.
        assert!(!engine.note_ack(remote, 8));
    }

    #[test]
    fn duplicate_inbound_con_before_reply_is_in_flight() {
        let engine = ReliabilityEngine::new();
        let remote: SocketAddr = "127.0.0.1:5683".parse().unwrap();
        let now = Instant::now();
        let lifetime = Duration::from_secs(247);

        assert!(matches!(
            engine.check_inbound(remote, 1, now, lifetime),
            InboundStatus::Fresh
        ));
        assert!(matches!(
            engine.check_inbound(remote, 1, now, lifetime),
            InboundStatus::DuplicateInFlight
        ));

        engine.cache_inbound_reply(remote, 1, vec![1, 2, 3]);
        match engine.check_inbound(remote, 1, now, lifetime) {
            InboundStatus::DuplicateCached(bytes) => assert_eq!(bytes, vec![1, 2, 3]),
            _ => panic!("expected cached duplicate"),
        }
    }

    #[test]
    fn sweep_expired_removes_old_inbound_records() {
        let engine = ReliabilityEngine::new();
        let remote: SocketAddr = "127.0.0.1:5683".parse().unwrap();
        let now = Instant::now();
        engine.check_inbound(remote, 1, now, Duration::from_millis(1));
        engine.sweep_expired(now + Duration::from_secs(1));
        assert!(matches!(
            engine.check_inbound(remote, 1, now, Duration::from_secs(247)),
            InboundStatus::Fresh
        ));
    }
}
