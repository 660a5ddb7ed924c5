// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::common::status::ServiceError;
use crate::common::types::{DatasetRef, RegistryKey};
use crate::texflight_logging::debug;

/// In-memory mapping from registry keys to datasets.
///
/// Every operation takes the registry-wide lock for the duration of the map
/// access only. Callers decode and encode Arrow data outside of it.
#[derive(Debug, Default)]
pub struct DatasetRegistry {
    entries: Mutex<HashMap<RegistryKey, DatasetRef>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RegistryKey, DatasetRef>> {
        // Map operations cannot panic halfway through, so a poisoned guard
        // still holds a consistent map.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts or overwrites the entry; last writer wins.
    pub fn put(&self, key: RegistryKey, dataset: DatasetRef) {
        let rows = dataset.num_rows();
        let replaced = self.lock().insert(key.clone(), dataset).is_some();
        debug!(key = %key, rows, replaced, "registry put");
    }

    pub fn get(&self, key: &RegistryKey) -> Result<DatasetRef, ServiceError> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("Flight not found: {key}")))
    }

    /// Removes the entry if present. Deleting an absent key is a no-op.
    pub fn delete(&self, key: &RegistryKey) {
        let removed = self.lock().remove(key).is_some();
        debug!(key = %key, removed, "registry delete");
    }

    /// Removes and returns the entry in one critical section.
    ///
    /// Concurrent callers racing for the same key see exactly one success.
    pub fn take(&self, key: &RegistryKey) -> Result<DatasetRef, ServiceError> {
        self.lock()
            .remove(key)
            .ok_or_else(|| ServiceError::not_found(format!("Flight not found: {key}")))
    }

    /// Puts `dataset` back under `key` unless another writer filled the slot
    /// since it was taken. Returns whether the entry was restored.
    pub fn restore(&self, key: RegistryKey, dataset: DatasetRef) -> bool {
        let mut guard = self.lock();
        if guard.contains_key(&key) {
            return false;
        }
        guard.insert(key, dataset);
        true
    }

    /// Current entries, copied out under the lock. Order is unspecified.
    pub fn list(&self) -> Vec<(RegistryKey, DatasetRef)> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), DatasetRef::clone(v)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
