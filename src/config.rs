//! Repository configuration surface (spec §6 ADDED). A `RepoConfig` picks
//! the backing store and the static-object cache/branch defaults; it is
//! meant to be loaded from a TOML/JSON/YAML file the way the teacher loads
//! `PackConfig`/`LfsConfig` — deserialize-first, with `Default` filling in
//! sane values for anything a caller omits. [`RepoConfig::open`] turns one
//! of these into a live [`crate::repo::Repository`].

use std::path::PathBuf;
use std::sync::Arc;

use flate2::Compression;
use serde::{Deserialize, Deserializer, Serialize};

use crate::codec::registry::SchemaRegistry;
use crate::repo::Repository;
use crate::store::fsdir::FsDirStore;
use crate::store::memory::MemoryStore;
use crate::store::{BackingStore, CasToken, RawValue, Result as StoreResult};

/// Which [`crate::store::BackingStore`] a repository opens against.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackingKind {
    Memory,
    FsDir(FsDirConfig),
}

impl Default for BackingKind {
    fn default() -> Self {
        BackingKind::Memory
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RepoConfig {
    #[serde(default)]
    pub backing: BackingKind,
    #[serde(default = "default_static_cache_size")]
    pub static_cache_size: usize,
    #[serde(default = "default_branch_name")]
    pub default_branch: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            backing: BackingKind::default(),
            static_cache_size: default_static_cache_size(),
            default_branch: default_branch_name(),
        }
    }
}

fn default_static_cache_size() -> usize {
    1000
}

/// Reads the same default branch name `Repository` itself falls back to
/// (`crate::repo::DEFAULT_BRANCH`), so the two are never allowed to drift.
fn default_branch_name() -> String {
    crate::repo::DEFAULT_BRANCH.to_string()
}

/// On-disk `FsDirStore` configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FsDirConfig {
    pub root: PathBuf,
    #[serde(
        default = "default_gzip_level",
        deserialize_with = "gzip_level_or_name",
        serialize_with = "serialize_gzip_level"
    )]
    pub gzip_level: Compression,
}

impl PartialEq for FsDirConfig {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.gzip_level.level() == other.gzip_level.level()
    }
}
impl Eq for FsDirConfig {}

fn default_gzip_level() -> Compression {
    Compression::default()
}

fn gzip_level_or_name<'de, D>(deserializer: D) -> Result<Compression, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum LevelOrName {
        Level(u32),
        Name(String),
    }

    Ok(match LevelOrName::deserialize(deserializer)? {
        LevelOrName::Level(n) => Compression::new(n),
        LevelOrName::Name(s) => match s.as_str() {
            "fast" => Compression::fast(),
            "best" => Compression::best(),
            "default" => Compression::default(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "unknown gzip level {other:?}, expected a number or fast/default/best"
                )));
            }
        },
    })
}

fn serialize_gzip_level<S>(level: &Compression, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u32(level.level())
}

/// Delegates to whichever concrete [`BackingStore`] a [`BackingKind`]
/// names. `Repository<B>` is generic over one concrete `B`, so
/// [`RepoConfig::open`]/[`RepoConfig::create`] need a single type that can
/// stand in for either backing variant; a `dyn BackingStore` trait object
/// would not do since `Repository` also requires `B: Clone`, and `Clone`
/// is not object-safe.
#[derive(Debug, Clone)]
pub enum AnyBackingStore {
    Memory(MemoryStore),
    FsDir(FsDirStore),
}

impl BackingKind {
    fn instantiate(&self) -> AnyBackingStore {
        match self {
            BackingKind::Memory => AnyBackingStore::Memory(MemoryStore::new()),
            BackingKind::FsDir(cfg) => {
                AnyBackingStore::FsDir(FsDirStore::new(cfg.root.clone()).with_compression(cfg.gzip_level))
            }
        }
    }
}

impl BackingStore for AnyBackingStore {
    fn open(&mut self) -> StoreResult<()> {
        match self {
            AnyBackingStore::Memory(s) => s.open(),
            AnyBackingStore::FsDir(s) => s.open(),
        }
    }

    fn close(&mut self) -> StoreResult<()> {
        match self {
            AnyBackingStore::Memory(s) => s.close(),
            AnyBackingStore::FsDir(s) => s.close(),
        }
    }

    fn destroy(&mut self) -> StoreResult<()> {
        match self {
            AnyBackingStore::Memory(s) => s.destroy(),
            AnyBackingStore::FsDir(s) => s.destroy(),
        }
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<RawValue>> {
        match self {
            AnyBackingStore::Memory(s) => s.get(key),
            AnyBackingStore::FsDir(s) => s.get(key),
        }
    }

    fn gets(&self, key: &[u8]) -> StoreResult<Option<(RawValue, CasToken)>> {
        match self {
            AnyBackingStore::Memory(s) => s.gets(key),
            AnyBackingStore::FsDir(s) => s.gets(key),
        }
    }

    fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        match self {
            AnyBackingStore::Memory(s) => s.set(key, value),
            AnyBackingStore::FsDir(s) => s.set(key, value),
        }
    }

    fn add(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        match self {
            AnyBackingStore::Memory(s) => s.add(key, value),
            AnyBackingStore::FsDir(s) => s.add(key, value),
        }
    }

    fn replace(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        match self {
            AnyBackingStore::Memory(s) => s.replace(key, value),
            AnyBackingStore::FsDir(s) => s.replace(key, value),
        }
    }

    fn cas(&self, key: &[u8], value: &[u8], token: &CasToken) -> StoreResult<()> {
        match self {
            AnyBackingStore::Memory(s) => s.cas(key, value, token),
            AnyBackingStore::FsDir(s) => s.cas(key, value, token),
        }
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        match self {
            AnyBackingStore::Memory(s) => s.delete(key),
            AnyBackingStore::FsDir(s) => s.delete(key),
        }
    }
}

impl RepoConfig {
    fn build(&self) -> AnyBackingStore {
        self.backing.instantiate()
    }

    /// Creates a fresh repository from this config: picks the backing
    /// store named by `self.backing` and threads `self.static_cache_size`
    /// through to the zipper's object cache.
    pub fn create(&self, author: impl Into<String>) -> crate::Result<Repository<AnyBackingStore>> {
        Repository::create_with_cache_size(self.build(), Arc::new(SchemaRegistry::new()), author, self.static_cache_size)
    }

    /// Opens an existing repository previously created from an equivalent
    /// config.
    pub fn open(&self, author: impl Into<String>) -> crate::Result<Repository<AnyBackingStore>> {
        Repository::open_with_cache_size(self.build(), Arc::new(SchemaRegistry::new()), author, self.static_cache_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_repo_config_uses_memory_backing() {
        let cfg = RepoConfig::default();
        assert_eq!(cfg.backing, BackingKind::Memory);
        assert_eq!(cfg.static_cache_size, 1000);
        assert_eq!(cfg.default_branch, "master");
    }

    #[test]
    fn gzip_level_accepts_named_and_numeric_forms() {
        let named: FsDirConfig = serde_json::from_str(r#"{"root": "/tmp/x", "gzip_level": "best"}"#).unwrap();
        assert_eq!(named.gzip_level.level(), Compression::best().level());

        let numeric: FsDirConfig = serde_json::from_str(r#"{"root": "/tmp/x", "gzip_level": 3}"#).unwrap();
        assert_eq!(numeric.gzip_level.level(), 3);
    }

    #[test]
    fn backing_kind_round_trips_through_json() {
        let cfg = RepoConfig {
            backing: BackingKind::FsDir(FsDirConfig { root: PathBuf::from("/var/repo"), gzip_level: Compression::fast() }),
            ..RepoConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RepoConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.backing, cfg.backing);
    }

    #[test]
    fn create_with_memory_backing_builds_a_working_repository() {
        let cfg = RepoConfig::default();
        let mut repo = cfg.create("Agent").unwrap();
        repo.default_branch().unwrap();
        assert!(repo.branches().unwrap().iter().any(|(n, _)| n == "master"));
    }

    #[test]
    fn create_then_open_round_trips_through_fsdir_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RepoConfig {
            backing: BackingKind::FsDir(FsDirConfig { root: dir.path().to_path_buf(), gzip_level: Compression::fast() }),
            ..RepoConfig::default()
        };
        cfg.create("Agent").unwrap();
        let repo = cfg.open("Agent").unwrap();
        assert!(repo.branches().unwrap().is_empty());
    }
}
