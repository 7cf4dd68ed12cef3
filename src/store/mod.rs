//! L0 — a uniform byte key/value store with four interchangeable variants:
//! in-memory, on-disk (gzip per key), prefix-delegating, and the
//! content-addressed view built on top in [`static_store`].

pub mod fsdir;
pub mod memory;
pub mod prefixed;
pub mod static_store;

use thiserror::Error;

pub type RawKey = Vec<u8>;
pub type RawValue = Vec<u8>;

/// An opaque token for optimistic compare-and-set. Two `gets` calls with no
/// intervening write return equal tokens; any successful write invalidates
/// every previously returned token for that key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasToken {
    Counter(u64),
    Random(u16),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("key not found: {0:?}")]
    NotFound(RawKey),
    #[error("not stored: {0:?}")]
    NotStored(RawKey),
    #[error("object at {address} does not hash to its own address")]
    BadObject { address: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failed keys from a batch operation, aggregated per the batch-atomicity
/// convention: implementations may apply partially but must report every
/// key that failed.
#[derive(Debug, Error)]
#[error("batch operation failed for {failed:?}")]
pub struct BatchError {
    pub failed: Vec<RawKey>,
}

/// Uniform mutable K→V byte store (spec §4.1).
pub trait BackingStore: Send + Sync {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<RawValue>>;

    fn mget<'a>(
        &'a self,
        keys: &'a [RawKey],
    ) -> Box<dyn Iterator<Item = (RawKey, Option<RawValue>)> + 'a> {
        Box::new(keys.iter().map(move |k| {
            let v = self.get(k).unwrap_or(None);
            (k.clone(), v)
        }))
    }

    /// Returns the current value along with a CAS token good for one write.
    fn gets(&self, key: &[u8]) -> Result<Option<(RawValue, CasToken)>>;

    /// Unconditional write.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn mset(&self, pairs: &[(RawKey, RawValue)]) -> Result<()> {
        for (k, v) in pairs {
            self.set(k, v)?;
        }
        Ok(())
    }

    /// Write iff `key` does not already exist.
    fn add(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Write iff `key` already exists.
    fn replace(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Write iff `token` matches the current token for `key`.
    fn cas(&self, key: &[u8], value: &[u8], token: &CasToken) -> Result<()>;

    /// Delete iff `key` exists.
    fn delete(&self, key: &[u8]) -> Result<()>;

    fn mdelete(&self, keys: &[RawKey]) -> Result<()> {
        let mut failed = Vec::new();
        for k in keys {
            if self.delete(k).is_err() {
                failed.push(k.clone());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(BatchError { failed }.into())
        }
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

impl From<BatchError> for Error {
    fn from(e: BatchError) -> Self {
        Error::NotFound(e.failed.into_iter().next().unwrap_or_default())
    }
}
