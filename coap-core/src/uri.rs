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

//! URI decomposition for CoAP target and location URIs.
//!
//! This is a small, hand-written replacement for a general-purpose RFC3986 URI crate: it
//! only understands the narrow `coap`/`coaps` decomposition that [`Message`]'s `Uri-*` and
//! `Location-*` options need, not arbitrary URI resolution or literal-URI macros.
//!
//! [`Message`]: crate::message::Message

use crate::consts::{DEFAULT_PORT_COAP_DTLS, DEFAULT_PORT_COAP_UDP, URI_SCHEME_COAP, URI_SCHEME_COAPS};
use crate::error::InvariantViolation;
use crate::message::Message;
use crate::option::{OptionNumber, OptionValue};
use alloc::string::String;
use alloc::vec::Vec;

/// The decomposed `coap`/`coaps` URI components carried by a request's `Uri-Host`,
/// `Uri-Port`, `Uri-Path`, and `Uri-Query` options, per
/// [RFC7252 §6.4](https://tools.ietf.org/html/rfc7252#section-6.4).
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct TargetUri {
    /// `true` for `coaps`, `false` for `coap`.
    pub secure: bool,

    /// The `Uri-Host` value, if present.
    pub host: Option<String>,

    /// The `Uri-Port` value, if present; otherwise the scheme's default port.
    pub port: u16,

    /// The decoded `Uri-Path` segments, in order.
    pub path: Vec<String>,

    /// The decoded `Uri-Query` key=value (or bare key) segments, in order.
    pub query: Vec<String>,
}

impl TargetUri {
    /// Extracts the target URI components from a request message's options.
    pub fn from_message(msg: &Message) -> TargetUri {
        let host = msg
            .option_value(OptionNumber::URI_HOST)
            .and_then(OptionValue::as_str)
            .map(String::from);

        let secure = false; // Scheme is transport-level, not option-level; caller overrides.

        let port = msg
            .option_value(OptionNumber::URI_PORT)
            .and_then(OptionValue::as_uint)
            .map(|p| p as u16)
            .unwrap_or(if secure {
                DEFAULT_PORT_COAP_DTLS
            } else {
                DEFAULT_PORT_COAP_UDP
            });

        let path = msg
            .options_with_number(OptionNumber::URI_PATH)
            .filter_map(OptionValue::as_str)
            .map(String::from)
            .collect();

        let query = msg
            .options_with_number(OptionNumber::URI_QUERY)
            .filter_map(OptionValue::as_str)
            .map(String::from)
            .collect();

        TargetUri {
            secure,
            host,
            port,
            path,
            query,
        }
    }

    /// Returns the scheme string (`coap` or `coaps`) for this target.
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            URI_SCHEME_COAPS
        } else {
            URI_SCHEME_COAP
        }
    }

    /// Renders the `/`-joined path, e.g. `["sensors", "temperature"]` becomes
    /// `"/sensors/temperature"`.
    pub fn path_str(&self) -> String {
        let mut s = String::new();
        for segment in &self.path {
            s.push('/');
            s.push_str(segment);
        }
        s
    }

    /// Looks up the first query parameter matching `key` in a `key=value` encoded
    /// `Uri-Query` segment, per common CoAP server convention (RFC7252 does not mandate
    /// the `=` form, but it is the de facto standard).
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.iter().find_map(|segment| {
            let mut parts = segment.splitn(2, '=');
            let k = parts.next()?;
            if k == key {
                Some(parts.next().unwrap_or(""))
            } else {
                None
            }
        })
    }
}

/// Builds the `Location-Path`/`Location-Query` options for a `2.01 Created` response
/// from a newly-created resource's relative location, per
/// [RFC7252 §5.10.7](https://tools.ietf.org/html/rfc7252#section-5.10.7).
///
/// `location` is a `/`-separated relative path, optionally followed by a `?`-delimited
/// query string, e.g. `"sensors/3"` or `"sensors/3?unit=celsius"`.
///
/// On any segment violating `Location-Path`/`Location-Query`'s length bound, the whole
/// operation fails and no partial option list is returned.
pub fn location_options_from(
    location: &str,
) -> Result<Vec<(OptionNumber, OptionValue)>, InvariantViolation> {
    let (path, query) = match location.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (location, None),
    };

    let (_, max_path) = OptionNumber::LOCATION_PATH.length_bounds();
    let (_, max_query) = OptionNumber::LOCATION_QUERY.length_bounds();

    let mut options = Vec::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment.len() > max_path {
            return Err(InvariantViolation::OptionValueTooLong);
        }
        options.push((OptionNumber::LOCATION_PATH, OptionValue::from(segment)));
    }
    if let Some(query) = query {
        for segment in query.split('&').filter(|s| !s.is_empty()) {
            if segment.len() > max_query {
                return Err(InvariantViolation::OptionValueTooLong);
            }
            options.push((OptionNumber::LOCATION_QUERY, OptionValue::from(segment)));
        }
    }
    Ok(options)
}

/// Builds the `Uri-Host`/`Uri-Port`/`Uri-Path`/`Uri-Query` (or, for a proxied request,
/// `Proxy-Uri`) options for an outgoing request targeting `uri`.
///
/// `uri` must be an absolute `coap://` URI with no fragment. `destination_host` is the
/// literal address (IP or hostname) of the socket the request is actually being sent to;
/// `Uri-Host` is only emitted when `uri`'s host differs from it, per
/// [RFC7252 §6.4](https://tools.ietf.org/html/rfc7252#section-6.4). `Uri-Port` is only
/// emitted when the URI's port is not the scheme's default (5683).
///
/// When `use_proxy` is `true`, the whole decomposition is skipped and `uri` is carried
/// verbatim in a single `Proxy-Uri` option.
///
/// On any violation (wrong scheme, fragment present) the whole operation fails and no
/// partial option list is returned.
pub fn target_uri_options(
    uri: &str,
    destination_host: Option<&str>,
    use_proxy: bool,
) -> Result<Vec<(OptionNumber, OptionValue)>, InvariantViolation> {
    if uri.contains('#') {
        return Err(InvariantViolation::UnsupportedUri);
    }

    if use_proxy {
        return Ok(alloc::vec![(
            OptionNumber::PROXY_URI,
            OptionValue::from(uri)
        )]);
    }

    let rest = uri
        .strip_prefix(URI_SCHEME_COAP)
        .and_then(|r| r.strip_prefix("://"))
        .ok_or(InvariantViolation::UnsupportedUri)?;

    let (authority, path_and_query) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    if authority.is_empty() {
        return Err(InvariantViolation::UnsupportedUri);
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (h, p.parse::<u16>().map_err(|_| InvariantViolation::UnsupportedUri)?),
        None => (authority, DEFAULT_PORT_COAP_UDP),
    };

    let (path, query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_and_query, None),
    };

    let mut options = Vec::new();

    let host_is_destination = destination_host.map(|d| d == host).unwrap_or(false);
    if !host_is_destination {
        options.push((OptionNumber::URI_HOST, OptionValue::from(host)));
    }
    if port != DEFAULT_PORT_COAP_UDP {
        options.push((OptionNumber::URI_PORT, OptionValue::from(port as u32)));
    }
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        options.push((OptionNumber::URI_PATH, OptionValue::from(segment)));
    }
    if let Some(query) = query {
        for segment in query.split('&').filter(|s| !s.is_empty()) {
            options.push((OptionNumber::URI_QUERY, OptionValue::from(segment)));
        }
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MsgCode, MsgToken, MsgType};

    #[test]
    fn extracts_path_and_query() {
        let mut msg =
            Message::request(MsgType::Con, MsgCode::MethodGet, 1, MsgToken::EMPTY).unwrap();
        msg.add_option(OptionNumber::URI_PATH, OptionValue::from("sensors"));
        msg.add_option(OptionNumber::URI_PATH, OptionValue::from("temperature"));
        msg.add_option(OptionNumber::URI_QUERY, OptionValue::from("unit=celsius"));

        let target = TargetUri::from_message(&msg);
        assert_eq!(target.path_str(), "/sensors/temperature");
        assert_eq!(target.query_param("unit"), Some("celsius"));
        assert_eq!(target.query_param("missing"), None);
    }

    #[test]
    fn target_uri_omits_host_when_it_matches_destination() {
        let options = target_uri_options("coap://coap.me/sensors/temp", Some("coap.me"), false)
            .unwrap();
        assert_eq!(
            options,
            alloc::vec![
                (OptionNumber::URI_PATH, OptionValue::from("sensors")),
                (OptionNumber::URI_PATH, OptionValue::from("temp")),
            ]
        );
    }

    #[test]
    fn target_uri_emits_host_and_nonstandard_port() {
        let options =
            target_uri_options("coap://example.com:9999/a?b=c", Some("203.0.113.1"), false)
                .unwrap();
        assert_eq!(
            options,
            alloc::vec![
                (OptionNumber::URI_HOST, OptionValue::from("example.com")),
                (OptionNumber::URI_PORT, OptionValue::from(9999u32)),
                (OptionNumber::URI_PATH, OptionValue::from("a")),
                (OptionNumber::URI_QUERY, OptionValue::from("b=c")),
            ]
        );
    }

    #[test]
    fn target_uri_rejects_fragment() {
        assert_eq!(
            target_uri_options("coap://example.com/a#frag", None, false),
            Err(InvariantViolation::UnsupportedUri)
        );
    }

    #[test]
    fn target_uri_rejects_wrong_scheme() {
        assert_eq!(
            target_uri_options("http://example.com/a", None, false),
            Err(InvariantViolation::UnsupportedUri)
        );
    }

    #[test]
    fn target_uri_use_proxy_sets_proxy_uri_verbatim() {
        let options = target_uri_options("coap://example.com/a?b=c", None, true).unwrap();
        assert_eq!(
            options,
            alloc::vec![(
                OptionNumber::PROXY_URI,
                OptionValue::from("coap://example.com/a?b=c")
            )]
        );
    }

    #[test]
    fn location_options_split_path_and_query() {
        let options = location_options_from("sensors/3?unit=celsius").unwrap();
        assert_eq!(
            options,
            alloc::vec![
                (OptionNumber::LOCATION_PATH, OptionValue::from("sensors")),
                (OptionNumber::LOCATION_PATH, OptionValue::from("3")),
                (
                    OptionNumber::LOCATION_QUERY,
                    OptionValue::from("unit=celsius")
                ),
            ]
        );
    }

    #[test]
    fn location_options_rejects_oversized_segment() {
        let oversized = "a".repeat(256);
        assert_eq!(
            location_options_from(&oversized),
            Err(InvariantViolation::OptionValueTooLong)
        );
    }
}
