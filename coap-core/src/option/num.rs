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

use super::*;

/// Type representing a CoAP option number.
#[derive(Copy, Eq, PartialEq, Hash, Clone, Ord, PartialOrd)]
pub struct OptionNumber(pub u16);

impl OptionNumber {
    /// IF_MATCH option.
    pub const IF_MATCH: OptionNumber = OptionNumber(1);

    /// URI_HOST option.
    pub const URI_HOST: OptionNumber = OptionNumber(3);

    /// ETAG option.
    pub const ETAG: OptionNumber = OptionNumber(4);

    /// IF_NONE_MATCH option.
    pub const IF_NONE_MATCH: OptionNumber = OptionNumber(5);

    /// OBSERVE option.
    pub const OBSERVE: OptionNumber = OptionNumber(6);

    /// URI_PORT option.
    pub const URI_PORT: OptionNumber = OptionNumber(7);

    /// LOCATION_PATH option.
    pub const LOCATION_PATH: OptionNumber = OptionNumber(8);

    /// OSCORE option. Metadata only — object security processing is not implemented by
    /// this crate.
    pub const OSCORE: OptionNumber = OptionNumber(9);

    /// URI_PATH option.
    pub const URI_PATH: OptionNumber = OptionNumber(11);

    /// CONTENT_FORMAT option.
    pub const CONTENT_FORMAT: OptionNumber = OptionNumber(12);

    /// MAX_AGE option.
    pub const MAX_AGE: OptionNumber = OptionNumber(14);

    /// URI_QUERY option.
    pub const URI_QUERY: OptionNumber = OptionNumber(15);

    /// ACCEPT option.
    pub const ACCEPT: OptionNumber = OptionNumber(17);

    /// LOCATION_QUERY option.
    pub const LOCATION_QUERY: OptionNumber = OptionNumber(20);

    /// BLOCK2 option. Metadata only — block-wise reassembly is not implemented by this crate.
    pub const BLOCK2: OptionNumber = OptionNumber(23);

    /// BLOCK1 option. Metadata only — block-wise reassembly is not implemented by this crate.
    pub const BLOCK1: OptionNumber = OptionNumber(27);

    /// SIZE2 option.
    pub const SIZE2: OptionNumber = OptionNumber(28);

    /// PROXY_URI option.
    pub const PROXY_URI: OptionNumber = OptionNumber(35);

    /// PROXY_SCHEME option.
    pub const PROXY_SCHEME: OptionNumber = OptionNumber(39);

    /// SIZE1 option.
    pub const SIZE1: OptionNumber = OptionNumber(60);

    /// Returns true if this option number is critical, false if it is optional (elective).
    pub fn is_critical(self) -> bool {
        const FLAG_CRITICAL: u16 = 1;
        self.0 & FLAG_CRITICAL == FLAG_CRITICAL
    }

    /// Returns true if this option is "un-safe" to forward through a proxy.
    pub fn is_un_safe(self) -> bool {
        const FLAG_UN_SAFE: u16 = 2;
        self.0 & FLAG_UN_SAFE == FLAG_UN_SAFE
    }

    /// Returns true if this option is a "no-cache-key" option.
    pub fn is_no_cache_key(self) -> bool {
        const FLAG_NO_CACHE_KEY_MASK: u16 = 0x1e;
        const FLAG_NO_CACHE_KEY_MAGIC: u16 = 0x1c;
        self.0 & FLAG_NO_CACHE_KEY_MASK == FLAG_NO_CACHE_KEY_MAGIC
    }

    /// Returns the expected value type for this option number.
    pub fn option_value_type(self) -> OptionValueType {
        match self {
            OptionNumber::IF_MATCH => OptionValueType::Opaque,
            OptionNumber::URI_HOST => OptionValueType::String,
            OptionNumber::ETAG => OptionValueType::Opaque,
            OptionNumber::IF_NONE_MATCH => OptionValueType::Empty,
            OptionNumber::OBSERVE => OptionValueType::Uint,
            OptionNumber::URI_PORT => OptionValueType::Uint,
            OptionNumber::LOCATION_PATH => OptionValueType::String,
            OptionNumber::OSCORE => OptionValueType::Opaque,
            OptionNumber::URI_PATH => OptionValueType::String,
            OptionNumber::CONTENT_FORMAT => OptionValueType::Uint,
            OptionNumber::MAX_AGE => OptionValueType::Uint,
            OptionNumber::URI_QUERY => OptionValueType::String,
            OptionNumber::ACCEPT => OptionValueType::Uint,
            OptionNumber::LOCATION_QUERY => OptionValueType::String,
            OptionNumber::BLOCK2 => OptionValueType::Uint,
            OptionNumber::BLOCK1 => OptionValueType::Uint,
            OptionNumber::SIZE2 => OptionValueType::Uint,
            OptionNumber::PROXY_URI => OptionValueType::String,
            OptionNumber::PROXY_SCHEME => OptionValueType::String,
            OptionNumber::SIZE1 => OptionValueType::Uint,
            OptionNumber(_) => OptionValueType::Opaque,
        }
    }

    /// Returns true if multiple instances of this option are allowed in one message.
    pub fn is_repeatable(self) -> bool {
        match self {
            OptionNumber::IF_MATCH => true,
            OptionNumber::ETAG => true,
            OptionNumber::LOCATION_PATH => true,
            OptionNumber::URI_PATH => true,
            OptionNumber::URI_QUERY => true,
            OptionNumber::LOCATION_QUERY => true,
            OptionNumber(_) => false,
        }
    }

    /// Returns the `(min, max)` length bounds in bytes for this option's value, per
    /// [RFC7252 §5.10](https://tools.ietf.org/html/rfc7252#section-5.10). Unknown option
    /// numbers have no useful bound and are reported as `(0, MAX_OPTION_VALUE_SIZE)`.
    pub fn length_bounds(self) -> (usize, usize) {
        match self {
            OptionNumber::IF_MATCH => (0, 8),
            OptionNumber::URI_HOST => (1, 255),
            OptionNumber::ETAG => (1, 8),
            OptionNumber::IF_NONE_MATCH => (0, 0),
            OptionNumber::OBSERVE => (0, 3),
            OptionNumber::URI_PORT => (0, 2),
            OptionNumber::LOCATION_PATH => (0, 255),
            OptionNumber::OSCORE => (0, 255),
            OptionNumber::URI_PATH => (0, 255),
            OptionNumber::CONTENT_FORMAT => (0, 2),
            OptionNumber::MAX_AGE => (0, 4),
            OptionNumber::URI_QUERY => (0, 255),
            OptionNumber::ACCEPT => (0, 2),
            OptionNumber::LOCATION_QUERY => (0, 255),
            OptionNumber::BLOCK2 => (0, 3),
            OptionNumber::BLOCK1 => (0, 3),
            OptionNumber::SIZE2 => (0, 4),
            OptionNumber::PROXY_URI => (1, 1034),
            OptionNumber::PROXY_SCHEME => (1, 255),
            OptionNumber::SIZE1 => (0, 4),
            OptionNumber(_) => (0, MAX_OPTION_VALUE_SIZE),
        }
    }

    /// Attempts to return a `Some(&'static str)` containing the name of the option.
    ///
    /// If the option number isn't recognized, this method returns `None`.
    pub fn static_name(self) -> Option<&'static str> {
        match self {
            OptionNumber::IF_MATCH => Some("If-Match"),
            OptionNumber::URI_HOST => Some("Uri-Host"),
            OptionNumber::ETAG => Some("ETag"),
            OptionNumber::IF_NONE_MATCH => Some("If-None-Match"),
            OptionNumber::OBSERVE => Some("Observe"),
            OptionNumber::URI_PORT => Some("Uri-Port"),
            OptionNumber::LOCATION_PATH => Some("Location-Path"),
            OptionNumber::OSCORE => Some("OSCORE"),
            OptionNumber::URI_PATH => Some("Uri-Path"),
            OptionNumber::CONTENT_FORMAT => Some("Content-Format"),
            OptionNumber::MAX_AGE => Some("Max-Age"),
            OptionNumber::URI_QUERY => Some("Uri-Query"),
            OptionNumber::ACCEPT => Some("Accept"),
            OptionNumber::LOCATION_QUERY => Some("Location-Query"),
            OptionNumber::BLOCK2 => Some("Block2"),
            OptionNumber::BLOCK1 => Some("Block1"),
            OptionNumber::SIZE2 => Some("Size2"),
            OptionNumber::PROXY_URI => Some("Proxy-Uri"),
            OptionNumber::PROXY_SCHEME => Some("Proxy-Scheme"),
            OptionNumber::SIZE1 => Some("Size1"),
            _ => None,
        }
    }
}

impl core::fmt::Display for OptionNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(name) = self.static_name() {
            f.write_str(name)
        } else {
            if self.is_critical() {
                f.write_str("Crit-")?;
            } else {
                f.write_str("Opt-")?;
            }

            if self.is_un_safe() {
                f.write_str("UnSafe-")?;
            }

            if self.is_no_cache_key() {
                f.write_str("NoCacheKey-")?;
            }

            write!(f, "{}", self.0)
        }
    }
}

impl core::fmt::Debug for OptionNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}({})", self.0, self)
    }
}

impl core::ops::Add<u16> for OptionNumber {
    type Output = Self;
    fn add(self, other: u16) -> Self {
        OptionNumber(self.0 + other)
    }
}

impl core::ops::Sub<OptionNumber> for OptionNumber {
    type Output = u16;
    fn sub(self, other: OptionNumber) -> u16 {
        assert!(self.0 >= other.0);
        self.0 - other.0
    }
}

impl Default for OptionNumber {
    fn default() -> Self {
        OptionNumber(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_elective_bit() {
        assert!(OptionNumber::IF_MATCH.is_critical());
        assert!(!OptionNumber::LOCATION_PATH.is_critical());
        assert!(OptionNumber::URI_PATH.is_critical());
        assert!(!OptionNumber::MAX_AGE.is_critical());
    }

    #[test]
    fn repeatable_options() {
        for n in [
            OptionNumber::IF_MATCH,
            OptionNumber::ETAG,
            OptionNumber::URI_PATH,
            OptionNumber::URI_QUERY,
            OptionNumber::LOCATION_PATH,
            OptionNumber::LOCATION_QUERY,
        ] {
            assert!(n.is_repeatable(), "{:?} should be repeatable", n);
        }

        for n in [
            OptionNumber::URI_HOST,
            OptionNumber::URI_PORT,
            OptionNumber::CONTENT_FORMAT,
            OptionNumber::MAX_AGE,
            OptionNumber::OBSERVE,
            OptionNumber::PROXY_URI,
            OptionNumber::PROXY_SCHEME,
            OptionNumber::BLOCK1,
            OptionNumber::BLOCK2,
            OptionNumber::SIZE1,
            OptionNumber::SIZE2,
            OptionNumber::IF_NONE_MATCH,
        ] {
            assert!(!n.is_repeatable(), "{:?} should not be repeatable", n);
        }
    }
}
