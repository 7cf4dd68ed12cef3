//! L2 — write-once, content-addressed object store built on an
//! [`BackingStore`] + the [`crate::codec`] layer (spec §4.3).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::codec::binary;
use crate::codec::schema::Schema;
use crate::codec::value::Value;
use crate::hash::StaticAddress;

use super::{BackingStore, Error as StoreError};

pub const DEFAULT_CACHE_SIZE: usize = 1000;

pub struct StaticStore<B: BackingStore> {
    backing: B,
    prefix: Vec<u8>,
    cache_size: usize,
    cache: Mutex<HashMap<StaticAddress, Value>>,
}

impl<B: BackingStore> StaticStore<B> {
    pub fn new(backing: B) -> Self {
        Self::with_capacity(backing, DEFAULT_CACHE_SIZE)
    }

    pub fn with_capacity(backing: B, cache_size: usize) -> Self {
        Self {
            backing,
            prefix: Vec::new(),
            cache_size,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Access to the shared backing store, for callers (e.g. [`crate::zipper::Zipper`])
    /// that need to read/write keys outside the content-addressed subspace,
    /// such as the mutable `HEAD` pointer.
    pub fn backing(&self) -> &B {
        &self.backing
    }

    /// Mutable access for lifecycle methods (`open`/`close`/`destroy`)
    /// that callers such as [`crate::zipper::Zipper`] delegate straight
    /// through to the backing store.
    pub fn backing_mut(&mut self) -> &mut B {
        &mut self.backing
    }

    fn full_key(&self, address: &StaticAddress) -> Vec<u8> {
        let mut key = self.prefix.clone();
        key.extend_from_slice(address.to_string().as_bytes());
        key
    }

    /// Serialize `value`, compute its address, and store it — idempotent:
    /// a duplicate `add` is treated as success (spec §4.3).
    pub fn put(&self, schema: &Schema, value: Value) -> crate::Result<StaticAddress> {
        let bytes = binary::encode(schema, &value)?;
        let address = StaticAddress::of(&bytes);
        tracing::trace!(address = %address, len = bytes.len(), "static_store: put");
        match self.backing.add(&self.full_key(&address), &bytes) {
            Ok(()) | Err(StoreError::NotStored(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.insert_cache(address.clone(), value);
        Ok(address)
    }

    pub fn mput(&self, schema: &Schema, values: Vec<Value>) -> crate::Result<Vec<StaticAddress>> {
        values
            .into_iter()
            .map(|v| self.put(schema, v))
            .collect()
    }

    /// Consult the cache, then the backing store; `None` on a miss.
    /// `#[cfg(debug_assertions)]` re-verifies `sha1(bytes) == addr`,
    /// raising `BadObject` on mismatch (spec §4.3).
    pub fn get(&self, schema: &Schema, address: &StaticAddress) -> crate::Result<Option<Value>> {
        if let Some(v) = self
            .cache
            .lock()
            .expect("static store cache lock poisoned")
            .get(address)
        {
            tracing::trace!(address = %address, "static_store: get cache hit");
            return Ok(Some(v.clone()));
        }
        tracing::trace!(address = %address, "static_store: get cache miss");
        let Some(bytes) = self.backing.get(&self.full_key(address))? else {
            return Ok(None);
        };
        #[cfg(debug_assertions)]
        {
            let actual = StaticAddress::of(&bytes);
            if &actual != address {
                return Err(StoreError::BadObject {
                    address: address.to_string(),
                }
                .into());
            }
        }
        let value = binary::decode(schema, &bytes)?;
        self.insert_cache(address.clone(), value.clone());
        Ok(Some(value))
    }

    pub fn mget<'a>(
        &'a self,
        schema: &'a Schema,
        addresses: &'a [StaticAddress],
    ) -> impl Iterator<Item = crate::Result<(StaticAddress, Option<Value>)>> + 'a {
        addresses
            .iter()
            .map(move |addr| self.get(schema, addr).map(|v| (addr.clone(), v)))
    }

    fn insert_cache(&self, address: StaticAddress, value: Value) {
        let mut cache = self.cache.lock().expect("static store cache lock poisoned");
        if cache.len() > self.cache_size {
            cache.clear();
        }
        cache.entry(address).or_insert(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn put_is_idempotent() {
        let store = StaticStore::new(MemoryStore::new());
        let schema = Schema::String;
        let a1 = store.put(&schema, Value::String("x".into())).unwrap();
        let a2 = store.put(&schema, Value::String("x".into())).unwrap();
        assert_eq!(a1, a2);
    }

    #[test]
    fn get_round_trips() {
        let store = StaticStore::new(MemoryStore::new());
        let schema = Schema::String;
        let addr = store.put(&schema, Value::String("x".into())).unwrap();
        let got = store.get(&schema, &addr).unwrap().unwrap();
        assert_eq!(got, Value::String("x".into()));
    }

    #[test]
    fn get_of_missing_is_none() {
        let store = StaticStore::<MemoryStore>::new(MemoryStore::new());
        let schema = Schema::String;
        let addr = StaticAddress::of(b"never-put");
        assert!(store.get(&schema, &addr).unwrap().is_none());
    }

    #[test]
    fn cache_clears_wholesale_above_capacity() {
        let store = StaticStore::with_capacity(MemoryStore::new(), 2);
        let schema = Schema::String;
        store.put(&schema, Value::String("a".into())).unwrap();
        store.put(&schema, Value::String("b".into())).unwrap();
        store.put(&schema, Value::String("c".into())).unwrap();
        assert!(store.cache.lock().unwrap().len() <= 1);
    }
}
