//! In-memory [`BackingStore`]. Thread-safe under a single process via
//! [`dashmap`], mirrored on `mdb/data/store/memory.py`: a plain mapping plus
//! a per-key counter that serves as the CAS token.

use std::sync::Arc;

use dashmap::DashMap;

use super::{BackingStore, CasToken, Error, RawKey, RawValue, Result};

/// `Arc`-shared so that cloning a handle (e.g. to open the same backing
/// store from two zippers, simulating concurrent writers) shares state
/// rather than forking it.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<RawKey, (RawValue, u64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackingStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<RawValue>> {
        Ok(self.entries.get(key).map(|e| e.0.clone()))
    }

    fn gets(&self, key: &[u8]) -> Result<Option<(RawValue, CasToken)>> {
        Ok(self
            .entries
            .get(key)
            .map(|e| (e.0.clone(), CasToken::Counter(e.1))))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries
            .entry(key.to_vec())
            .and_modify(|e| {
                e.0 = value.to_vec();
                e.1 += 1;
            })
            .or_insert_with(|| (value.to_vec(), 0));
        Ok(())
    }

    fn add(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.entries.contains_key(key) {
            return Err(Error::NotStored(key.to_vec()));
        }
        self.entries.insert(key.to_vec(), (value.to_vec(), 0));
        Ok(())
    }

    fn replace(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if !self.entries.contains_key(key) {
            return Err(Error::NotStored(key.to_vec()));
        }
        self.entries.entry(key.to_vec()).and_modify(|e| {
            e.0 = value.to_vec();
            e.1 += 1;
        });
        Ok(())
    }

    fn cas(&self, key: &[u8], value: &[u8], token: &CasToken) -> Result<()> {
        let CasToken::Counter(expected) = token else {
            return Err(Error::NotStored(key.to_vec()));
        };
        let mut entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| Error::NotStored(key.to_vec()))?;
        if entry.1 != *expected {
            return Err(Error::NotStored(key.to_vec()));
        }
        entry.0 = value.to_vec();
        entry.1 += 1;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.entries
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(key.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let store = MemoryStore::new();
        store.set(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn add_fails_if_present() {
        let store = MemoryStore::new();
        store.add(b"a", b"1").unwrap();
        assert!(matches!(store.add(b"a", b"2"), Err(Error::NotStored(_))));
    }

    #[test]
    fn replace_fails_if_absent() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.replace(b"a", b"1"),
            Err(Error::NotStored(_))
        ));
    }

    #[test]
    fn cas_counter_increments_on_every_write() {
        let store = MemoryStore::new();
        store.set(b"a", b"1").unwrap();
        let (_, tok) = store.gets(b"a").unwrap().unwrap();
        assert_eq!(tok, CasToken::Counter(0));
        store.set(b"a", b"2").unwrap();
        let (_, tok2) = store.gets(b"a").unwrap().unwrap();
        assert_eq!(tok2, CasToken::Counter(1));
    }

    #[test]
    fn cas_rejects_stale_token() {
        let store = MemoryStore::new();
        store.set(b"a", b"1").unwrap();
        let (_, stale) = store.gets(b"a").unwrap().unwrap();
        store.set(b"a", b"2").unwrap();
        assert!(matches!(
            store.cas(b"a", b"3", &stale),
            Err(Error::NotStored(_))
        ));
    }

    #[test]
    fn cas_accepts_current_token() {
        let store = MemoryStore::new();
        store.set(b"a", b"1").unwrap();
        let (_, tok) = store.gets(b"a").unwrap().unwrap();
        store.cas(b"a", b"2", &tok).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn delete_fails_if_absent() {
        let store = MemoryStore::new();
        assert!(matches!(store.delete(b"a"), Err(Error::NotFound(_))));
    }
}
