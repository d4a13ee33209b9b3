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

//! Persistent object storage.
//!
//! Objects are byte blobs addressed by path, with per-object attributes keyed
//! by a single byte tag. The backing filesystem on a real card is shared with
//! co-resident applications, so every path this crate touches carries the
//! `piv-` prefix. Writes are atomic at the object level.

use crate::errors::{storage_error, PivResult};
use std::collections::HashMap;

pub trait ObjectStore {
    /// Returns the full body of the object at `path`. Reading an object that
    /// was never created is a storage failure; install-time provisioning
    /// creates every path this application uses.
    fn read_file(&self, path: &str) -> PivResult<Vec<u8>>;

    /// Creates or overwrites the object at `path`.
    fn write_file(&mut self, path: &str, data: &[u8]) -> PivResult<()>;

    fn read_attr(&self, path: &str, tag: u8) -> PivResult<Vec<u8>>;

    fn write_attr(&mut self, path: &str, tag: u8, value: &[u8]) -> PivResult<()>;
}

/// HashMap-backed store, for tests and virtual cards. A hardware build would
/// implement [`ObjectStore`] over the flash filesystem instead.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: HashMap<String, StoredObject>,
}

#[derive(Debug, Default)]
struct StoredObject {
    data: Vec<u8>,
    attrs: HashMap<u8, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn object(&self, path: &str) -> PivResult<&StoredObject> {
        self.objects
            .get(path)
            .ok_or_else(|| storage_error(&format!("no such object: {}", path)))
    }
}

impl ObjectStore for MemoryStore {
    fn read_file(&self, path: &str) -> PivResult<Vec<u8>> {
        Ok(self.object(path)?.data.clone())
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> PivResult<()> {
        let obj = self.objects.entry(path.to_string()).or_default();
        obj.data = data.to_vec();
        Ok(())
    }

    fn read_attr(&self, path: &str, tag: u8) -> PivResult<Vec<u8>> {
        self.object(path)?
            .attrs
            .get(&tag)
            .cloned()
            .ok_or_else(|| storage_error(&format!("no attr {:#04X} on {}", tag, path)))
    }

    fn write_attr(&mut self, path: &str, tag: u8, value: &[u8]) -> PivResult<()> {
        let obj = self.objects.entry(path.to_string()).or_default();
        obj.attrs.insert(tag, value.to_vec());
        Ok(())
    }
}
