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

//! Length-checked secrets with persisted retry counters.
//!
//! A `Pin` owns one path in the object store: the secret lives in the object
//! body, the retry counter and retry limit in single-byte attributes. The
//! validation flag is volatile and cleared on application reset.

use crate::errors::{storage_error, PivResult};
use crate::store::ObjectStore;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

const ATTR_RETRIES: u8 = 0x00;
const ATTR_RETRY_LIMIT: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    Ok,
    AuthFail,
    LengthInvalid,
}

#[derive(Debug)]
pub struct Pin {
    path: &'static str,
    min_length: usize,
    max_length: usize,
    is_validated: bool,
}

impl Pin {
    pub const fn new(path: &'static str, min_length: usize, max_length: usize) -> Self {
        Self {
            path,
            min_length,
            max_length,
            is_validated: false,
        }
    }

    /// Writes the initial secret and counters. Called once at install time.
    pub fn create(
        &self,
        store: &mut dyn ObjectStore,
        secret: &[u8],
        retry_limit: u8,
    ) -> PivResult<()> {
        store.write_file(self.path, secret)?;
        store.write_attr(self.path, ATTR_RETRIES, &[retry_limit])?;
        store.write_attr(self.path, ATTR_RETRY_LIMIT, &[retry_limit])
    }

    pub fn retries(&self, store: &dyn ObjectStore) -> PivResult<u8> {
        read_counter(store, self.path, ATTR_RETRIES)
    }

    fn retry_limit(&self, store: &dyn ObjectStore) -> PivResult<u8> {
        read_counter(store, self.path, ATTR_RETRY_LIMIT)
    }

    /// Compares `candidate` against the stored secret.
    ///
    /// Returns the outcome and the retries left afterwards. A blocked PIN
    /// (zero retries) fails without touching the secret or the counter, so
    /// the counter never goes below zero. On success the counter resets to
    /// the retry limit and the PIN becomes validated; on mismatch the counter
    /// decrements and any prior validation is revoked.
    pub fn verify(
        &mut self,
        store: &mut dyn ObjectStore,
        candidate: &[u8],
    ) -> PivResult<(PinOutcome, u8)> {
        let retries = self.retries(store)?;
        if candidate.len() < self.min_length || candidate.len() > self.max_length {
            return Ok((PinOutcome::LengthInvalid, retries));
        }
        if retries == 0 {
            return Ok((PinOutcome::AuthFail, 0));
        }

        let mut secret = store.read_file(self.path)?;
        // The length comparison is not secret (PIV PINs are stored padded to
        // a fixed 8 bytes); the content comparison must not short-circuit.
        let matched = secret.len() == candidate.len() && bool::from(secret.ct_eq(candidate));
        secret.zeroize();

        if matched {
            let limit = self.retry_limit(store)?;
            store.write_attr(self.path, ATTR_RETRIES, &[limit])?;
            self.is_validated = true;
            Ok((PinOutcome::Ok, limit))
        } else {
            let left = retries - 1;
            store.write_attr(self.path, ATTR_RETRIES, &[left])?;
            self.is_validated = false;
            Ok((PinOutcome::AuthFail, left))
        }
    }

    /// Replaces the secret and resets the retry counter to the limit.
    pub fn update(&mut self, store: &mut dyn ObjectStore, secret: &[u8]) -> PivResult<PinOutcome> {
        if secret.len() < self.min_length || secret.len() > self.max_length {
            return Ok(PinOutcome::LengthInvalid);
        }
        store.write_file(self.path, secret)?;
        let limit = self.retry_limit(store)?;
        store.write_attr(self.path, ATTR_RETRIES, &[limit])?;
        Ok(PinOutcome::Ok)
    }

    pub fn is_validated(&self) -> bool {
        self.is_validated
    }

    pub fn clear_validation(&mut self) {
        self.is_validated = false;
    }
}

fn read_counter(store: &dyn ObjectStore, path: &str, tag: u8) -> PivResult<u8> {
    let raw = store.read_attr(path, tag)?;
    raw.first()
        .copied()
        .ok_or_else(|| storage_error(&format!("empty counter attr {:#04X} on {}", tag, path)))
}
