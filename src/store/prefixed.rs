//! Decorator that prepends a fixed byte prefix to every key before
//! delegating, grounded on `mdb/data/store/prefixed.py`. Wrapping another
//! `PrefixedStore` absorbs the two prefixes into one concatenation rather
//! than nesting delegation, matching the Python source.

use crate::codec::binary;
use crate::codec::schema::Schema;
use crate::codec::value::Value;

use super::{BackingStore, CasToken, RawKey, RawValue, Result};

pub struct PrefixedStore<B: BackingStore> {
    prefix: RawKey,
    inner: B,
}

impl<B: BackingStore> PrefixedStore<B> {
    pub fn new(prefix: impl Into<RawKey>, inner: B) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn full_key(&self, key: &[u8]) -> RawKey {
        let mut full = self.prefix.clone();
        full.extend_from_slice(key);
        full
    }

    /// Marshal a value through the binary codec and `set` it under `key`,
    /// per spec §4.1 ("it also carries a Codec: get/set marshal/unmarshal
    /// via the codec's binary form").
    pub fn set_value(&self, key: &[u8], schema: &Schema, value: &Value) -> crate::Result<()> {
        let bytes = binary::encode(schema, value)?;
        self.inner.set(&self.full_key(key), &bytes)?;
        Ok(())
    }

    pub fn get_value(&self, key: &[u8], schema: &Schema) -> crate::Result<Option<Value>> {
        match self.inner.get(&self.full_key(key))? {
            Some(bytes) => Ok(Some(binary::decode(schema, &bytes)?)),
            None => Ok(None),
        }
    }
}

impl<B: BackingStore> PrefixedStore<B> {
    /// Wrapping another prefixed store absorbs the two prefixes into one
    /// concatenation instead of nesting a decorator around a decorator.
    pub fn wrapping(prefix: impl Into<RawKey>, other: PrefixedStore<B>) -> Self {
        let mut combined = prefix.into();
        combined.extend_from_slice(&other.prefix);
        Self {
            prefix: combined,
            inner: other.inner,
        }
    }
}

impl<B: BackingStore> BackingStore for PrefixedStore<B> {
    fn get(&self, key: &[u8]) -> Result<Option<RawValue>> {
        self.inner.get(&self.full_key(key))
    }

    fn gets(&self, key: &[u8]) -> Result<Option<(RawValue, CasToken)>> {
        self.inner.gets(&self.full_key(key))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.set(&self.full_key(key), value)
    }

    fn add(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.add(&self.full_key(key), value)
    }

    fn replace(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.replace(&self.full_key(key), value)
    }

    fn cas(&self, key: &[u8], value: &[u8], token: &CasToken) -> Result<()> {
        self.inner.cas(&self.full_key(key), value, token)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(&self.full_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn prefixes_every_key() {
        let store = PrefixedStore::new(b"refs/main/".to_vec(), MemoryStore::new());
        store.set(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(
            store.inner().get(b"refs/main/a").unwrap(),
            Some(b"1".to_vec())
        );
    }
}
