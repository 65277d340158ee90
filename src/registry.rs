use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::MixerError;
use crate::verifier::ContractRef;

/// Custody metadata for a funded, not yet withdrawn deposit.
#[derive(Clone, Debug, PartialEq)]
pub struct ProofRecord {
    pub amount: Decimal,
    pub contract_address: String,
    pub contract_abi: String,
    pub public_signals: String,
}

impl ProofRecord {
    pub fn contract(&self) -> ContractRef {
        ContractRef {
            address: self.contract_address.clone(),
            abi: self.contract_abi.clone(),
        }
    }
}

/// Derive the registry key for a proof artifact: the proof with every
/// whitespace character removed.
pub fn canonical_key(proof: &str) -> String {
    proof.chars().filter(|c| !c.is_whitespace()).collect()
}

/// In-memory map from proof key to custody record.
///
/// State is volatile: every record is lost when the process exits. Callers
/// that need durability must not rely on this store.
///
/// Records live in a concurrent map so single operations are atomic. Flows
/// that read, act on the chain, and then remove a record must hold the key's
/// lock from [`ProofRegistry::lock`] for the whole sequence.
#[derive(Default)]
pub struct ProofRegistry {
    records: DashMap<String, ProofRecord>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ProofRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert or overwrite. Returns the record that was replaced, if any.
    pub fn put(&self, key: &str, record: ProofRecord) -> Option<ProofRecord> {
        let previous = self.records.insert(key.to_string(), record);
        if previous.is_some() {
            tracing::warn!("Overwrote live custody record for proof key len={}", key.len());
        }
        previous
    }

    /// Insert only if no live record exists for `key`.
    pub fn insert(&self, key: &str, record: ProofRecord) -> Result<(), MixerError> {
        match self.records.entry(key.to_string()) {
            Entry::Occupied(_) => Err(MixerError::ProofAlreadyRegistered {
                key: key.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    pub fn ensure_vacant(&self, key: &str) -> Result<(), MixerError> {
        if self.records.contains_key(key) {
            return Err(MixerError::ProofAlreadyRegistered {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<ProofRecord, MixerError> {
        self.records
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MixerError::NotFound("no custody record for this proof".to_string()))
    }

    /// Remove the record for `key`. Removing an absent key is not an error.
    pub fn remove(&self, key: &str) -> Option<ProofRecord> {
        self.records.remove(key).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub fn lock_entries(&self) -> usize {
        self.locks.len()
    }

    /// Acquire the critical section for `key`.
    ///
    /// Lock entries only live while someone holds or waits on them, so keys
    /// that never had a record leave nothing behind.
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        KeyGuard {
            registry: self,
            key: key.to_string(),
            guard: Some(mutex.lock_owned().await),
        }
    }
}

/// Held critical section for one proof key.
pub struct KeyGuard<'a> {
    registry: &'a ProofRegistry,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // The map's own Arc is the last one once no caller holds or awaits it.
        self.registry
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
