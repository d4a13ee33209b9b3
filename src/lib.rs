// Copyright 2023 Gravitational, Inc
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Card-side implementation of the PIV (Personal Identity Verification)
//! smartcard application, per
//! https://nvlpubs.nist.gov/nistpubs/SpecialPublications/NIST.SP.800-73-4.pdf
//!
//! The entry point is [`piv::PivApplication`]: it consumes command APDUs from
//! a host reader (transport framing is the caller's problem) and produces
//! response APDUs, maintaining key material and data objects in an injected
//! [`store::ObjectStore`] and delegating raw cryptography to an injected
//! [`crypto::CryptoBackend`].

#[macro_use]
extern crate log;

pub mod apdu;
pub mod crypto;
pub mod errors;
pub mod pin;
pub mod piv;
pub mod store;
pub mod tlv;

pub use apdu::{Capdu, Response};
pub use piv::PivApplication;
