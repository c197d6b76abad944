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

//! Transmission parameters, as an explicit runtime record threaded through endpoint
//! construction rather than fixed at the type level.

use std::time::Duration;

/// Runtime transmission parameters for a [`crate::Endpoint`], per
/// [RFC7252 §4.8](https://tools.ietf.org/html/rfc7252#section-4.8).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EndpointConfig {
    /// `ACK_TIMEOUT`: base delay before the first retransmission of a CON.
    pub ack_timeout: Duration,

    /// `ACK_RANDOM_FACTOR`: upper bound of the jitter multiplier applied to
    /// each retransmission delay.
    pub ack_random_factor: f32,

    /// `MAX_RETRANSMIT`: number of retransmissions attempted after the
    /// original send before giving up.
    pub max_retransmit: u32,

    /// How long a CON request may go unanswered before the reliability
    /// engine emits an empty ACK and switches to the separate-response flow.
    pub separate_response_threshold: Duration,

    /// `EXCHANGE_LIFETIME`: how long inbound CON duplicate-detection records
    /// (and unanswered outbound exchanges) are retained.
    pub exchange_lifetime: Duration,

    /// Maximum size, in bytes, of a single inbound or outbound datagram.
    pub max_packet_length: usize,
}

impl EndpointConfig {
    /// The non-jittered base delay before the `attempt`'th retransmission (`attempt` is
    /// 1-based; the original send is attempt 0 and has no delay).
    pub(crate) fn base_retransmit_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.min(self.max_retransmit).saturating_sub(1);
        self.ack_timeout * (1u32 << attempt)
    }
}

impl Default for EndpointConfig {
    /// The RFC7252 §4.8 default transmission parameters.
    fn default() -> Self {
        EndpointConfig {
            ack_timeout: Duration::from_secs(2),
            ack_random_factor: 1.5,
            max_retransmit: 4,
            separate_response_threshold: Duration::from_millis(1800),
            exchange_lifetime: Duration::from_secs(247),
            max_packet_length: crate::socket::MAX_PACKET_LENGTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_retransmit_delay_doubles_per_attempt() {
        let config = EndpointConfig::default();
        assert_eq!(config.base_retransmit_delay(1), Duration::from_secs(2));
        assert_eq!(config.base_retransmit_delay(2), Duration::from_secs(4));
        assert_eq!(config.base_retransmit_delay(3), Duration::from_secs(8));
        assert_eq!(config.base_retransmit_delay(4), Duration::from_secs(16));
        // Clamped at MAX_RETRANSMIT.
        assert_eq!(config.base_retransmit_delay(5), Duration::from_secs(16));
    }
}
