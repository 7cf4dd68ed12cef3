//! L4 — `Repository`/`Branch`: multiple named versioned keyspaces sharing
//! one static object space (spec §4.5). Grounded on `mdb/data/repo.py`'s
//! `repository`/`branch` classes, which store branch descriptors as
//! ordinary committed records in the repository's own logical space
//! rather than a side table.

use std::sync::Arc;

use serde_json::json;

use crate::codec::key::{Key, KeyId};
use crate::codec::registry::SchemaRegistry;
use crate::codec::schema::{Schema, TypeName};
use crate::codec::value::{RecordValue, Value};
use crate::store::prefixed::PrefixedStore;
use crate::store::static_store::StaticStore;
use crate::store::BackingStore;
use crate::zipper::{Checkpoint, Commit, DeltaEntry, EndOutcome, Error as ZipperError, Zipper};

/// The Python source lazily creates and opens this branch on first use if
/// absent; `spec.md` does not forbid it (spec §4.5 "ADDED, supplemented"),
/// so it is carried forward.
pub const DEFAULT_BRANCH: &str = "master";

fn branch_type_name() -> TypeName {
    TypeName::new("branch")
}

fn branch_key(name: &str) -> Key {
    Key::make(branch_type_name(), Some(KeyId::String(name.to_string())))
}

fn ensure_branch_schema(registry: &SchemaRegistry) -> crate::Result<TypeName> {
    let name = branch_type_name();
    if !registry.contains(&name) {
        registry.declare(&json!({
            "type": "record",
            "name": "branch",
            "fields": [
                {"name": "name", "type": "string"},
                {"name": "author", "type": "string"},
                {"name": "config", "type": {"type": "map", "values": "string"}}
            ]
        }))?;
    }
    Ok(name)
}

/// `refs/<branch>/`, already-qualified names left untouched (spec §4.5
/// keyspace partitioning), grounded on `mdb/data/repo.py::_qualify`.
fn qualify(name: &str) -> Vec<u8> {
    if name.starts_with("refs/") {
        name.as_bytes().to_vec()
    } else {
        format!("refs/{}/", name.trim_matches('/')).into_bytes()
    }
}

/// A branch's owner and arbitrary string settings (spec §4.5
/// `BranchConfig`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchConfig {
    pub author: String,
    pub config: Vec<(String, String)>,
}

impl BranchConfig {
    fn into_value(self, name: &str) -> Value {
        Value::Record(Arc::new(RecordValue {
            type_name: branch_type_name(),
            fields: vec![
                ("name".to_string(), Value::String(name.to_string())),
                ("author".to_string(), Value::String(self.author)),
                ("config".to_string(), Value::Map(self.config)),
            ],
        }))
    }

    fn from_value(value: &Value) -> crate::Result<(String, Self)> {
        let Value::Record(record) = value else {
            return Err(ZipperError::RepoError("expected a branch record".into()).into());
        };
        let name = match record.get("name") {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(ZipperError::RepoError("branch record missing name".into()).into()),
        };
        let author = match record.get("author") {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };
        let config = match record.get("config") {
            Some(Value::Map(m)) => m.clone(),
            _ => Vec::new(),
        };
        Ok((name, BranchConfig { author, config }))
    }
}

/// Tracks branches over a common static space (spec §4.5). Keyspace
/// partitioning of the underlying `B`: `""` for the repository's own
/// state, `refs/<branch>/` per branch, `objects/` (via the shared
/// `StaticStore`) for the static space.
pub struct Repository<B: BackingStore + Clone> {
    zipper: Zipper<B, B>,
    backing: B,
    registry: Arc<SchemaRegistry>,
}

impl<B: BackingStore + Clone> Repository<B> {
    pub fn exists(backing: &B) -> crate::Result<bool> {
        Zipper::<B, B>::exists(backing)
    }

    pub fn create(
        backing: B,
        registry: Arc<SchemaRegistry>,
        author: impl Into<String>,
    ) -> crate::Result<Self> {
        ensure_branch_schema(&registry)?;
        let zipper = Zipper::create(backing.clone(), registry.clone(), author)?;
        Ok(Self { zipper, backing, registry })
    }

    pub fn open(
        backing: B,
        registry: Arc<SchemaRegistry>,
        author: impl Into<String>,
    ) -> crate::Result<Self> {
        ensure_branch_schema(&registry)?;
        let zipper = Zipper::open(backing.clone(), registry.clone(), author)?;
        Ok(Self { zipper, backing, registry })
    }

    /// Like [`Self::create`], but builds the shared static store's cache
    /// with `cache_size` rather than [`crate::store::static_store::DEFAULT_CACHE_SIZE`]
    /// — used by [`crate::config::RepoConfig::create`] to honor
    /// `RepoConfig::static_cache_size`.
    pub fn create_with_cache_size(
        mut backing: B,
        registry: Arc<SchemaRegistry>,
        author: impl Into<String>,
        cache_size: usize,
    ) -> crate::Result<Self> {
        ensure_branch_schema(&registry)?;
        backing.open()?;
        let mut objects_backing = backing.clone();
        objects_backing.open()?;
        let objects = Arc::new(StaticStore::with_capacity(objects_backing, cache_size).with_prefix(b"objects/".to_vec()));
        let zipper = Zipper::create_with(backing.clone(), objects, registry.clone(), author)?;
        Ok(Self { zipper, backing, registry })
    }

    /// Like [`Self::open`], with a caller-chosen static-object cache size.
    pub fn open_with_cache_size(
        mut backing: B,
        registry: Arc<SchemaRegistry>,
        author: impl Into<String>,
        cache_size: usize,
    ) -> crate::Result<Self> {
        ensure_branch_schema(&registry)?;
        backing.open()?;
        let mut objects_backing = backing.clone();
        objects_backing.open()?;
        let objects = Arc::new(StaticStore::with_capacity(objects_backing, cache_size).with_prefix(b"objects/".to_vec()));
        let zipper = Zipper::open_with(backing.clone(), objects, registry.clone(), author)?;
        Ok(Self { zipper, backing, registry })
    }

    /// Branch descriptors committed in the repository's own logical space
    /// (spec §4.5), found via the `branch` kind rather than a side table.
    pub fn branches(&self) -> crate::Result<Vec<(String, BranchConfig)>> {
        let kind = branch_type_name();
        let mut out = Vec::new();
        for key in self.zipper.find(&kind) {
            if let Some(value) = self.zipper.get(&key)? {
                out.push(BranchConfig::from_value(&value)?);
            }
        }
        Ok(out)
    }

    /// Commits a branch descriptor into the repository's own state (spec
    /// §4.5 `add`), grounded on `mdb/data/repo.py::_add`.
    pub fn add(&mut self, name: &str, config: BranchConfig) -> crate::Result<()> {
        let key = branch_key(name);
        let schema = self.registry.get(&branch_type_name())?;
        let value = config.into_value(name);
        let message = format!("Add branch {name:?}.");
        self.zipper.transactionally(|zs| {
            zs.commit(
                vec![(key.clone(), DeltaEntry::Value(schema.clone(), value.clone()))],
                message.clone(),
                0.0,
            )
        })?;
        Ok(())
    }

    /// Deletes a branch descriptor (spec §4.5 `remove`); does not destroy
    /// the branch's own private state, matching `mdb/data/repo.py::_remove`
    /// which only drops the repository-level record.
    pub fn remove(&mut self, name: &str) -> crate::Result<()> {
        let key = branch_key(name);
        let message = format!("Remove branch {name:?}.");
        self.zipper
            .transactionally(|zs| zs.commit(vec![(key.clone(), DeltaEntry::Deleted)], message.clone(), 0.0))?;
        Ok(())
    }

    /// Opens the named branch, creating it (and registering its
    /// descriptor) on first use if absent — a private keyspace prefixed
    /// `refs/<name>/`, sharing this repository's static store (spec §4.5,
    /// spec property 8 branch isolation).
    pub fn branch(&mut self, name: &str) -> crate::Result<Branch<B>> {
        let mut state = PrefixedStore::new(qualify(name), self.backing.clone());
        state.open()?;
        let objects = self.zipper.objects_handle();
        let author = self.zipper.author().to_string();

        if Zipper::<PrefixedStore<B>, B>::exists(&state)? {
            let zipper = Zipper::open_with(state, objects, self.registry.clone(), author)?;
            Ok(Branch { name: name.to_string(), zipper })
        } else {
            let zipper = Zipper::create_with(state, objects, self.registry.clone(), author.clone())?;
            self.add(name, BranchConfig { author, config: Vec::new() })?;
            Ok(Branch { name: name.to_string(), zipper })
        }
    }

    /// Lazily creates and opens [`DEFAULT_BRANCH`] if it does not exist.
    pub fn default_branch(&mut self) -> crate::Result<Branch<B>> {
        self.branch(DEFAULT_BRANCH)
    }
}

/// A named, private keyspace sharing a repository's static store (spec
/// §4.5). Delegates to an inner [`Zipper`]; see `mdb/data/repo.py`'s
/// `branch` class, which is itself a thin `zipper` subclass.
pub struct Branch<B: BackingStore + Clone> {
    name: String,
    zipper: Zipper<PrefixedStore<B>, B>,
}

impl<B: BackingStore + Clone> Branch<B> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &Key) -> crate::Result<Option<Value>> {
        self.zipper.get(key)
    }

    pub fn find(&self, kind: &TypeName) -> Vec<Key> {
        self.zipper.find(kind)
    }

    pub fn put(&self, schema: &Schema, value: Value) -> crate::Result<(crate::hash::StaticAddress, Value)> {
        self.zipper.put(schema, value)
    }

    pub fn items(&self) -> crate::Result<Vec<(Key, Value)>> {
        self.zipper.items()
    }

    pub fn checkpoints(&self) -> crate::Result<Vec<Checkpoint>> {
        self.zipper.checkpoints()
    }

    pub fn commits(&self) -> crate::Result<Vec<Commit>> {
        self.zipper.commits()
    }

    pub fn transactionally(
        &mut self,
        f: impl FnOnce(&Zipper<PrefixedStore<B>, B>) -> crate::Result<Checkpoint>,
    ) -> crate::Result<EndOutcome> {
        self.zipper.transactionally(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::key::KeyId;
    use crate::codec::schema::Schema;
    use crate::codec::value::Value;
    use crate::store::memory::MemoryStore;
    use crate::zipper::DeltaEntry;

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(SchemaRegistry::new())
    }

    fn key(name: &str) -> Key {
        Key::make("T", Some(KeyId::String(name.to_string())))
    }

    #[test]
    fn create_then_open_round_trips() {
        let backing = MemoryStore::new();
        Repository::create(backing.clone(), registry(), "Agent").unwrap();
        let repo = Repository::open(backing, registry(), "Agent").unwrap();
        assert!(repo.branches().unwrap().is_empty());
    }

    #[test]
    fn branching_registers_a_descriptor() {
        let backing = MemoryStore::new();
        let mut repo = Repository::create(backing, registry(), "Agent").unwrap();
        repo.branch("foo").unwrap();

        let branches = repo.branches().unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].0, "foo");
    }

    #[test]
    fn reopening_an_existing_branch_reuses_its_descriptor() {
        let backing = MemoryStore::new();
        let mut repo = Repository::create(backing, registry(), "Agent").unwrap();
        repo.branch("foo").unwrap();
        repo.branch("foo").unwrap();
        assert_eq!(repo.branches().unwrap().len(), 1);
    }

    #[test]
    fn removing_a_branch_drops_its_descriptor() {
        let backing = MemoryStore::new();
        let mut repo = Repository::create(backing, registry(), "Agent").unwrap();
        repo.branch("foo").unwrap();
        repo.remove("foo").unwrap();
        assert!(repo.branches().unwrap().is_empty());
    }

    #[test]
    fn branches_are_isolated_but_share_static_addresses() {
        let backing = MemoryStore::new();
        let mut repo = Repository::create(backing, registry(), "Agent").unwrap();
        let mut a = repo.branch("a").unwrap();
        let b = repo.branch("b").unwrap();

        let k = key("x");
        a.transactionally(|zs| {
            zs.checkpoint(
                vec![(k.clone(), DeltaEntry::Value(Schema::Int32, Value::Int32(1)))],
                "write on a",
                0.0,
            )
        })
        .unwrap();

        assert_eq!(a.get(&k).unwrap(), Some(Value::Int32(1)));
        assert_eq!(b.get(&k).unwrap(), None);

        let (addr_a, _) = a.put(&Schema::Int32, Value::Int32(42)).unwrap();
        let (addr_b, _) = b.put(&Schema::Int32, Value::Int32(42)).unwrap();
        assert_eq!(addr_a, addr_b);
    }

    #[test]
    fn default_branch_is_lazily_created() {
        let backing = MemoryStore::new();
        let mut repo = Repository::create(backing, registry(), "Agent").unwrap();
        let default_branch = repo.default_branch().unwrap();
        assert_eq!(default_branch.name(), DEFAULT_BRANCH);
        assert!(repo.branches().unwrap().iter().any(|(n, _)| n == DEFAULT_BRANCH));
    }
}
