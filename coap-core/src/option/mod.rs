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

//! Types related to interpreting and handling CoAP options.

/// The maximum size of a CoAP option value allowed by this library, per
/// [RFC7252 §5.10](https://tools.ietf.org/html/rfc7252#section-5.10)'s `Proxy-Uri` bound,
/// the largest bound in the registry.
pub const MAX_OPTION_VALUE_SIZE: usize = 1034;

mod num;
pub use num::OptionNumber;

mod value;
pub use value::{OptionValue, OptionValueType};
