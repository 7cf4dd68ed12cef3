//! On-disk [`BackingStore`]: one gzip-compressed file per key, grounded on
//! `mdb/data/store/fsdir.py`. Path is `<root>/<h[0:2]>/<h[2:]>` where
//! `h = sha1_hex(key)`. `add`/`cas` are guarded by a process-local mutex;
//! coordinating across processes is the caller's problem (spec §4.1).

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha1::{Digest, Sha1};

use super::{BackingStore, CasToken, Error, RawValue, Result};

/// `Arc`-shared tokens so that cloning a handle (e.g. to open the same
/// backing store from two zippers, or to prefix it per-branch the way
/// [`crate::repo::Repository::branch`] does) shares CAS state rather than
/// forking it, mirroring [`super::memory::MemoryStore`]'s own doc comment.
#[derive(Clone)]
pub struct FsDirStore {
    root: PathBuf,
    compression: Compression,
    /// Per-key random CAS tokens, process-local (spec: tokens are not
    /// coordinated across processes for the fs-dir variant).
    tokens: Arc<Mutex<HashMap<String, u16>>>,
}

impl FsDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compression: Compression::default(),
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_compression(mut self, level: Compression) -> Self {
        self.compression = level;
        self
    }

    fn path_for(&self, key: &[u8]) -> PathBuf {
        let hex = hex::encode(Sha1::digest(key));
        let (dir, rest) = hex.split_at(2);
        self.root.join(dir).join(rest)
    }

    fn key_id(&self, key: &[u8]) -> String {
        hex::encode(Sha1::digest(key))
    }

    fn read_gz(path: &Path) -> Result<Option<RawValue>> {
        match fs::File::open(path) {
            Ok(file) => {
                let mut decoder = GzDecoder::new(file);
                let mut buf = Vec::new();
                decoder.read_to_end(&mut buf)?;
                Ok(Some(buf))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_gz(&self, path: &Path, value: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(path)?;
        let mut encoder = GzEncoder::new(file, self.compression);
        encoder.write_all(value)?;
        encoder.finish()?;
        Ok(())
    }

    /// Bumps `id`'s token under an already-held lock, so callers that must
    /// check-then-write atomically (`add`/`cas`) can hold one guard across
    /// the whole sequence instead of re-acquiring the mutex.
    fn bump_token_locked(tokens: &mut HashMap<String, u16>, id: &str) -> u16 {
        let delta: u16 = rand::random::<u16>() | 1;
        let next = tokens.entry(id.to_string()).or_insert(0);
        *next = next.wrapping_add(delta);
        *next
    }

    fn bump_token(&self, id: &str) -> u16 {
        let mut tokens = self.tokens.lock().expect("fsdir token lock poisoned");
        Self::bump_token_locked(&mut tokens, id)
    }
}

impl BackingStore for FsDirStore {
    fn get(&self, key: &[u8]) -> Result<Option<RawValue>> {
        Self::read_gz(&self.path_for(key))
    }

    fn gets(&self, key: &[u8]) -> Result<Option<(RawValue, CasToken)>> {
        let id = self.key_id(key);
        match Self::read_gz(&self.path_for(key))? {
            Some(value) => {
                let token = *self
                    .tokens
                    .lock()
                    .expect("fsdir token lock poisoned")
                    .entry(id)
                    .or_insert_with(|| rand::random::<u16>());
                Ok(Some((value, CasToken::Random(token))))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_gz(&self.path_for(key), value)?;
        self.bump_token(&self.key_id(key));
        Ok(())
    }

    fn add(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let id = self.key_id(key);
        // Held across the existence check and the write so two concurrent
        // `add`s on the same key can't both observe "absent".
        let mut tokens = self.tokens.lock().expect("fsdir token lock poisoned");
        if path.exists() {
            return Err(Error::NotStored(key.to_vec()));
        }
        self.write_gz(&path, value)?;
        Self::bump_token_locked(&mut tokens, &id);
        Ok(())
    }

    fn replace(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if !path.exists() {
            return Err(Error::NotStored(key.to_vec()));
        }
        self.write_gz(&path, value)?;
        self.bump_token(&self.key_id(key));
        Ok(())
    }

    fn cas(&self, key: &[u8], value: &[u8], token: &CasToken) -> Result<()> {
        let CasToken::Random(expected) = token else {
            return Err(Error::NotStored(key.to_vec()));
        };
        let id = self.key_id(key);
        // Held across the token check and the write so a racing writer
        // can't slip in between them (spec property 6, CAS safety).
        let mut tokens = self.tokens.lock().expect("fsdir token lock poisoned");
        let current = *tokens.get(&id).unwrap_or(&0);
        if current != *expected {
            return Err(Error::NotStored(key.to_vec()));
        }
        self.write_gz(&self.path_for(key), value)?;
        Self::bump_token_locked(&mut tokens, &id);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        fs::remove_file(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(key.to_vec())
            } else {
                Error::Io(e)
            }
        })
    }

    fn destroy(&mut self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_gzip() {
        let dir = tempdir().unwrap();
        let store = FsDirStore::new(dir.path());
        store.set(b"key", b"hello world").unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(b"hello world".to_vec()));
    }

    #[test]
    fn path_splits_sha1_hex() {
        let dir = tempdir().unwrap();
        let store = FsDirStore::new(dir.path());
        let hex = hex::encode(Sha1::digest(b"key"));
        let expected = dir.path().join(&hex[..2]).join(&hex[2..]);
        store.set(b"key", b"v").unwrap();
        assert!(expected.exists());
    }

    #[test]
    fn add_then_add_fails() {
        let dir = tempdir().unwrap();
        let store = FsDirStore::new(dir.path());
        store.add(b"key", b"v1").unwrap();
        assert!(matches!(store.add(b"key", b"v2"), Err(Error::NotStored(_))));
    }

    #[test]
    fn concurrent_add_on_the_same_key_only_lets_one_writer_through() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempdir().unwrap();
        let store = Arc::new(FsDirStore::new(dir.path()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || store.add(b"key", format!("v{i}").as_bytes()))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[test]
    fn cas_rejects_stale_token() {
        let dir = tempdir().unwrap();
        let store = FsDirStore::new(dir.path());
        store.set(b"key", b"v1").unwrap();
        let (_, stale) = store.gets(b"key").unwrap().unwrap();
        store.set(b"key", b"v2").unwrap();
        assert!(matches!(
            store.cas(b"key", b"v3", &stale),
            Err(Error::NotStored(_))
        ));
    }
}
