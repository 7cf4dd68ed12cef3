//! L3 — the versioned logical key/value engine (spec §4.4): a manifest
//! shadowed by a changeset, checkpoints/commits chained into history, and
//! an optimistic single-writer transaction protocol CAS-updating `HEAD`.
//!
//! Grounded throughout on `mdb/data/repo.py`'s `zipper` class and its free
//! `tree_merge`/`make_changeset`/`make_manifest`/`next_checkpoint`/
//! `amend_checkpoint`/`next_commit` procedures — kept as free functions
//! here too, per that file's own rationale ("implemented as procedures
//! instead of methods to emphasize that their behavior is independent of
//! a zipper's implementation").
//!
//! A zipper separates two backing stores: `S` holds the mutable `HEAD`
//! pointer (private to this zipper), `O` holds the write-once static
//! object space (shared, per spec §4.5, across every zipper opened onto
//! the same repository). The Python source's `zipper.__init__` always
//! rebuilds `self._objects` from its own `state` argument rather than
//! accepting a separate one — here the two are kept genuinely distinct so
//! [`crate::repo::Repository`] and [`crate::repo::Branch`] can share one
//! static store while keeping private `HEAD`s (spec property 8).

use std::collections::{HashSet, VecDeque};
use std::io::Read;
use std::sync::Arc;

use thiserror::Error;

use crate::codec::binary::{read_varint, write_varint};
use crate::codec::key::Key;
use crate::codec::registry::SchemaRegistry;
use crate::codec::schema::{Schema, TypeName};
use crate::codec::value::Value;
use crate::hash::{ParseAddressError, StaticAddress};
use crate::store::static_store::StaticStore;
use crate::store::{BackingStore, CasToken, Error as StoreError};

pub const DEFAULT_AUTHOR: &str = "Anonymous <nobody@example.net>";

const HEAD_KEY: &[u8] = b"HEAD";

#[derive(Debug, Error)]
pub enum Error {
    #[error("repository error: {0}")]
    RepoError(String),
    #[error("transaction error: {0}")]
    TransactionError(String),
    #[error("transaction failed: HEAD changed concurrently")]
    TransactionFailed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] crate::codec::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<ParseAddressError> for Error {
    fn from(e: ParseAddressError) -> Self {
        Error::RepoError(e.to_string())
    }
}

/// A handle into the static space: either a committed object or the
/// `Deleted` sentinel a changeset uses to shadow a manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticRef {
    Object(StaticAddress),
    Deleted,
}

impl std::fmt::Display for StaticRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaticRef::Object(a) => write!(f, "{a}"),
            StaticRef::Deleted => write!(f, "{}", crate::hash::DELETED),
        }
    }
}

/// A complete snapshot `Key -> StaticAddress`, kept in sorted key order.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub entries: Vec<(Key, StaticAddress)>,
}

/// A delta against a manifest; entries may shadow a manifest key with
/// `Deleted`. Kept in sorted key order.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub entries: Vec<(Key, StaticRef)>,
}

#[derive(Debug, Clone)]
pub struct Commit {
    pub author: String,
    pub when: f64,
    pub message: String,
    pub changes: StaticAddress,
    pub prev: Vec<StaticAddress>,
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub author: String,
    pub when: f64,
    pub message: String,
    pub changes: StaticAddress,
    pub commits: Vec<StaticAddress>,
    pub prev: Vec<StaticAddress>,
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    write_varint(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

fn read_string(r: &mut impl Read) -> Result<String> {
    let len = read_varint(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| Error::RepoError(e.to_string()))
}

fn write_f64(out: &mut Vec<u8>, v: f64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn read_f64(r: &mut impl Read) -> Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn write_address(out: &mut Vec<u8>, addr: &StaticAddress) {
    out.extend_from_slice(addr.as_bytes());
}

fn read_address(r: &mut impl Read) -> Result<StaticAddress> {
    let mut buf = [0u8; 20];
    r.read_exact(&mut buf)?;
    Ok(StaticAddress::from_bytes(buf))
}

fn write_address_list(out: &mut Vec<u8>, addrs: &[StaticAddress]) {
    write_varint(out, addrs.len() as u64);
    for a in addrs {
        write_address(out, a);
    }
}

fn read_address_list(r: &mut impl Read) -> Result<Vec<StaticAddress>> {
    let n = read_varint(r)? as usize;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(read_address(r)?);
    }
    Ok(out)
}

fn write_key(out: &mut Vec<u8>, key: &Key) {
    write_string(out, key.as_str());
}

fn read_key(r: &mut impl Read) -> Result<Key> {
    let s = read_string(r)?;
    Key::parse(&s).map_err(Into::into)
}

impl Manifest {
    pub fn empty() -> Self {
        Manifest { entries: Vec::new() }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint(&mut out, self.entries.len() as u64);
        for (k, a) in &self.entries {
            write_key(&mut out, k);
            write_address(&mut out, a);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r: &[u8] = bytes;
        let n = read_varint(&mut r)? as usize;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            let k = read_key(&mut r)?;
            let a = read_address(&mut r)?;
            entries.push((k, a));
        }
        Ok(Manifest { entries })
    }
}

impl Changeset {
    pub fn empty() -> Self {
        Changeset { entries: Vec::new() }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint(&mut out, self.entries.len() as u64);
        for (k, r) in &self.entries {
            write_key(&mut out, k);
            match r {
                StaticRef::Deleted => out.push(0),
                StaticRef::Object(a) => {
                    out.push(1);
                    write_address(&mut out, a);
                }
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r: &[u8] = bytes;
        let n = read_varint(&mut r)? as usize;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            let k = read_key(&mut r)?;
            let mut tag = [0u8; 1];
            r.read_exact(&mut tag)?;
            let sref = if tag[0] == 0 {
                StaticRef::Deleted
            } else {
                StaticRef::Object(read_address(&mut r)?)
            };
            entries.push((k, sref));
        }
        Ok(Changeset { entries })
    }
}

impl Commit {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_string(&mut out, &self.author);
        write_f64(&mut out, self.when);
        write_string(&mut out, &self.message);
        write_address(&mut out, &self.changes);
        write_address_list(&mut out, &self.prev);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r: &[u8] = bytes;
        let author = read_string(&mut r)?;
        let when = read_f64(&mut r)?;
        let message = read_string(&mut r)?;
        let changes = read_address(&mut r)?;
        let prev = read_address_list(&mut r)?;
        Ok(Commit { author, when, message, changes, prev })
    }
}

impl Checkpoint {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_string(&mut out, &self.author);
        write_f64(&mut out, self.when);
        write_string(&mut out, &self.message);
        write_address(&mut out, &self.changes);
        write_address_list(&mut out, &self.commits);
        write_address_list(&mut out, &self.prev);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r: &[u8] = bytes;
        let author = read_string(&mut r)?;
        let when = read_f64(&mut r)?;
        let message = read_string(&mut r)?;
        let changes = read_address(&mut r)?;
        let commits = read_address_list(&mut r)?;
        let prev = read_address_list(&mut r)?;
        Ok(Checkpoint { author, when, message, changes, commits, prev })
    }
}

/// Merge two key-ordered sequences; `mine` wins on a tied key (spec
/// property 5). Grounded directly on `mdb/data/repo.py::tree_merge`'s
/// two-pointer walk.
pub fn tree_merge(mine: &Changeset, yours: &Manifest) -> Vec<(Key, StaticRef)> {
    let mut out = Vec::with_capacity(mine.entries.len() + yours.entries.len());
    let mut mi = mine.entries.iter().peekable();
    let mut yi = yours.entries.iter().peekable();
    loop {
        match (mi.peek(), yi.peek()) {
            (None, None) => break,
            (Some(_), None) => {
                let (k, r) = mi.next().unwrap();
                out.push((k.clone(), r.clone()));
            }
            (None, Some(_)) => {
                let (k, a) = yi.next().unwrap();
                out.push((k.clone(), StaticRef::Object(a.clone())));
            }
            (Some((mk, _)), Some((yk, _))) => match mk.cmp(yk) {
                std::cmp::Ordering::Equal => {
                    let (k, r) = mi.next().unwrap();
                    yi.next();
                    out.push((k.clone(), r.clone()));
                }
                std::cmp::Ordering::Less => {
                    let (k, r) = mi.next().unwrap();
                    out.push((k.clone(), r.clone()));
                }
                std::cmp::Ordering::Greater => {
                    let (k, a) = yi.next().unwrap();
                    out.push((k.clone(), StaticRef::Object(a.clone())));
                }
            },
        }
    }
    out
}

fn apply_changeset(manifest: &Manifest, changes: &Changeset) -> Manifest {
    let mut entries: Vec<(Key, StaticAddress)> = tree_merge(changes, manifest)
        .into_iter()
        .filter_map(|(k, r)| match r {
            StaticRef::Object(a) => Some((k, a)),
            StaticRef::Deleted => None,
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Manifest { entries }
}

fn put_object<O: BackingStore>(store: &StaticStore<O>, bytes: &[u8]) -> crate::Result<StaticAddress> {
    let addr = StaticAddress::of(bytes);
    let key = addr.to_string().into_bytes();
    match store.backing().add(&key, bytes) {
        Ok(()) | Err(StoreError::NotStored(_)) => {}
        Err(e) => return Err(e.into()),
    }
    Ok(addr)
}

fn get_object<O: BackingStore>(
    store: &StaticStore<O>,
    addr: &StaticAddress,
) -> crate::Result<Option<Vec<u8>>> {
    let key = addr.to_string().into_bytes();
    Ok(store.backing().get(&key)?)
}

/// A value to be written, already-written, or tombstoned as part of one
/// mutation (spec §4.4 "delta").
#[derive(Debug, Clone)]
pub enum DeltaEntry {
    Value(Schema, Value),
    Ref(StaticAddress),
    Deleted,
}

pub type Delta = Vec<(Key, DeltaEntry)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndOutcome {
    Unchanged,
    Committed(StaticAddress),
}

/// A snapshot of `HEAD` taken by [`Zipper::begin_transaction`], carrying
/// the CAS token good for exactly one write.
pub struct TransactionHandle {
    old_head: Option<StaticAddress>,
    token: Option<CasToken>,
}

/// A manifest-driven versioned keyspace over a shared static space (spec
/// §4.4): `state` is this zipper's private `HEAD` pointer; `objects` is
/// the write-once static store, `Arc`-shared with every other zipper that
/// opens onto the same repository (spec §4.5). The zipper's own internal
/// `Manifest`/`Changeset`/`Commit`/`Checkpoint` objects are written
/// straight to `objects`'s backing, bypassing the schema layer since
/// these four types are the engine's own fixed wire format, not a
/// user-declarable schema.
pub struct Zipper<S: BackingStore, O: BackingStore> {
    state: S,
    objects: Arc<StaticStore<O>>,
    registry: Arc<SchemaRegistry>,
    author: String,
    head: StaticAddress,
    manifest: Manifest,
    changes: Changeset,
}

/// Convenience constructors for the common case of one backing store
/// serving both `HEAD` and the static space (no sharing with other
/// zippers) — used directly by tests and by any single-branch caller.
impl<B: BackingStore + Clone> Zipper<B, B> {
    pub fn create(mut backing: B, registry: Arc<SchemaRegistry>, author: impl Into<String>) -> crate::Result<Self> {
        backing.open()?;
        let mut objects_backing = backing.clone();
        objects_backing.open()?;
        let objects = Arc::new(StaticStore::new(objects_backing).with_prefix(b"objects/".to_vec()));
        Self::create_with(backing, objects, registry, author)
    }

    pub fn open(mut backing: B, registry: Arc<SchemaRegistry>, author: impl Into<String>) -> crate::Result<Self> {
        backing.open()?;
        let mut objects_backing = backing.clone();
        objects_backing.open()?;
        let objects = Arc::new(StaticStore::new(objects_backing).with_prefix(b"objects/".to_vec()));
        Self::open_with(backing, objects, registry, author)
    }
}

impl<S: BackingStore, O: BackingStore> Zipper<S, O> {
    pub fn exists(state: &S) -> crate::Result<bool> {
        Ok(state.get(HEAD_KEY)?.is_some())
    }

    /// Initialize a fresh zipper: an empty manifest, an empty commit, and
    /// an empty-changeset checkpoint pointing at it, with `HEAD` set via
    /// `add` (so a racing `create` on the same state store fails).
    pub fn create_with(
        state: S,
        objects: Arc<StaticStore<O>>,
        registry: Arc<SchemaRegistry>,
        author: impl Into<String>,
    ) -> crate::Result<Self> {
        if state.get(HEAD_KEY)?.is_some() {
            return Err(Error::RepoError("zipper already exists".into()).into());
        }
        let author = author.into();

        let manifest = Manifest::empty();
        let manifest_addr = put_object(&objects, &manifest.encode())?;
        let commit = Commit {
            author: author.clone(),
            when: 0.0,
            message: String::new(),
            changes: manifest_addr,
            prev: Vec::new(),
        };
        let commit_addr = put_object(&objects, &commit.encode())?;
        let changes = Changeset::empty();
        let changes_addr = put_object(&objects, &changes.encode())?;
        let checkpoint = Checkpoint {
            author: author.clone(),
            when: 0.0,
            message: String::new(),
            changes: changes_addr,
            commits: vec![commit_addr],
            prev: Vec::new(),
        };
        let head = put_object(&objects, &checkpoint.encode())?;
        match state.add(HEAD_KEY, head.to_string().as_bytes()) {
            Ok(()) => {}
            Err(StoreError::NotStored(_)) => {
                return Err(Error::RepoError("zipper already exists".into()).into());
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            state,
            objects,
            registry,
            author,
            head,
            manifest,
            changes,
        })
    }

    pub fn open_with(
        state: S,
        objects: Arc<StaticStore<O>>,
        registry: Arc<SchemaRegistry>,
        author: impl Into<String>,
    ) -> crate::Result<Self> {
        let head_bytes = state
            .get(HEAD_KEY)?
            .ok_or_else(|| Error::RepoError("create the zipper first".into()))?;
        let head: StaticAddress = String::from_utf8(head_bytes)
            .map_err(|e| Error::RepoError(e.to_string()))?
            .parse()
            .map_err(|e: ParseAddressError| Error::from(e))?;
        let (manifest, changes) = Self::load_working(&objects, &head)?;
        Ok(Self {
            state,
            objects,
            registry,
            author: author.into(),
            head,
            manifest,
            changes,
        })
    }

    pub fn close(&mut self) -> crate::Result<()> {
        self.state.close()?;
        Ok(())
    }

    /// Re-read `HEAD` and rebuild the working view from it. Not part of
    /// the transaction protocol itself (`begin_transaction` only snapshots
    /// the CAS token, matching `mdb/data/repo.py::begin_transaction`) —
    /// a caller retrying after `TransactionFailed` is expected to call
    /// this before rebuilding its candidate delta, so the retry is built
    /// against the winning writer's state rather than the stale one.
    pub fn refresh(&mut self) -> crate::Result<()> {
        let head_bytes = self
            .state
            .get(HEAD_KEY)?
            .ok_or_else(|| Error::RepoError("zipper does not exist".into()))?;
        let head: StaticAddress = String::from_utf8(head_bytes)
            .map_err(|e| Error::RepoError(e.to_string()))?
            .parse()
            .map_err(|e: ParseAddressError| Error::from(e))?;
        let (manifest, changes) = Self::load_working(&self.objects, &head)?;
        self.head = head;
        self.manifest = manifest;
        self.changes = changes;
        Ok(())
    }

    /// Delete this zipper's `HEAD` pointer and tear down its private
    /// `state` backing. Does not touch the shared `objects` store — that
    /// is jointly owned, and destroying it is a repository-level decision
    /// (spec §4.5: branches don't own the shared static space).
    pub fn destroy(&mut self) -> crate::Result<()> {
        self.state.delete(HEAD_KEY)?;
        self.state.destroy()?;
        Ok(())
    }

    fn load_working(store: &StaticStore<O>, head: &StaticAddress) -> crate::Result<(Manifest, Changeset)> {
        let cp_bytes = get_object(store, head)?
            .ok_or_else(|| Error::RepoError(format!("missing checkpoint object {head}")))?;
        let checkpoint = Checkpoint::decode(&cp_bytes)?;

        let changes = match get_object(store, &checkpoint.changes)? {
            Some(b) => Changeset::decode(&b)?,
            None => Changeset::empty(),
        };

        let manifest = match checkpoint.commits.first() {
            Some(commit_addr) => {
                let cbytes = get_object(store, commit_addr)?
                    .ok_or_else(|| Error::RepoError(format!("missing commit object {commit_addr}")))?;
                let commit = Commit::decode(&cbytes)?;
                match get_object(store, &commit.changes)? {
                    Some(b) => Manifest::decode(&b)?,
                    None => Manifest::empty(),
                }
            }
            None => Manifest::empty(),
        };

        Ok((manifest, changes))
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn head(&self) -> &StaticAddress {
        &self.head
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn changes(&self) -> &Changeset {
        &self.changes
    }

    /// A clone of the `Arc` handle onto the shared static store, for a
    /// caller (e.g. [`crate::repo::Repository`]) opening another zipper
    /// that shares this one's static space.
    pub fn objects_handle(&self) -> Arc<StaticStore<O>> {
        self.objects.clone()
    }

    /// The virtual `Key -> StaticAddress` mapping `changes` shadows over
    /// `manifest`, with `Deleted` entries hidden (spec §4.4 "working").
    pub fn working(&self) -> Vec<(Key, StaticAddress)> {
        tree_merge(&self.changes, &self.manifest)
            .into_iter()
            .filter_map(|(k, r)| match r {
                StaticRef::Object(a) => Some((k, a)),
                StaticRef::Deleted => None,
            })
            .collect()
    }

    fn resolve(&self, key: &Key) -> Option<StaticAddress> {
        if let Ok(idx) = self.changes.entries.binary_search_by(|(k, _)| k.cmp(key)) {
            return match &self.changes.entries[idx].1 {
                StaticRef::Object(a) => Some(a.clone()),
                StaticRef::Deleted => None,
            };
        }
        if let Ok(idx) = self.manifest.entries.binary_search_by(|(k, _)| k.cmp(key)) {
            return Some(self.manifest.entries[idx].1.clone());
        }
        None
    }

    pub fn get(&self, key: &Key) -> crate::Result<Option<Value>> {
        let Some(addr) = self.resolve(key) else {
            return Ok(None);
        };
        let schema = self.registry.get(key.kind())?;
        self.objects.get(&schema, &addr)
    }

    pub fn mget<'a>(
        &'a self,
        keys: &'a [Key],
    ) -> impl Iterator<Item = crate::Result<(Key, Option<Value>)>> + 'a {
        keys.iter().map(move |k| self.get(k).map(|v| (k.clone(), v)))
    }

    /// Keys in the working view whose kind is `kind` or a registered
    /// subtype of it (spec §4.4 `find`).
    pub fn find(&self, kind: &TypeName) -> Vec<Key> {
        self.working()
            .into_iter()
            .map(|(k, _)| k)
            .filter(|k| self.registry.is_subtype(k.kind(), kind))
            .collect()
    }

    pub fn put(&self, schema: &Schema, value: Value) -> crate::Result<(StaticAddress, Value)> {
        let addr = self.objects.put(schema, value.clone())?;
        Ok((addr, value))
    }

    pub fn mput(
        &self,
        schema: &Schema,
        values: Vec<Value>,
    ) -> crate::Result<Vec<(StaticAddress, Value)>> {
        values.into_iter().map(|v| self.put(schema, v)).collect()
    }

    pub fn items(&self) -> crate::Result<Vec<(Key, Value)>> {
        self.iteritems().collect()
    }

    pub fn iteritems(&self) -> impl Iterator<Item = crate::Result<(Key, Value)>> + '_ {
        self.working().into_iter().map(move |(k, addr)| {
            let schema = self.registry.get(k.kind())?;
            let value = self.objects.get(&schema, &addr)?.ok_or_else(|| {
                crate::Error::from(Error::RepoError(format!("dangling reference for key {k}")))
            })?;
            Ok((k, value))
        })
    }

    fn current_checkpoint(&self) -> crate::Result<Checkpoint> {
        let bytes = get_object(&self.objects, &self.head)?
            .ok_or_else(|| Error::RepoError(format!("missing checkpoint object {}", self.head)))?;
        Checkpoint::decode(&bytes).map_err(Into::into)
    }

    /// Materialize a delta on top of the current `changes`, eagerly
    /// dropping any `Deleted` entry whose key is absent from the
    /// underlying `manifest` (spec invariant 4 / §9 Open Question,
    /// ground truth `mdb/data/repo.py::make_changeset`).
    fn merge_delta(&self, delta: Delta) -> crate::Result<Changeset> {
        use std::collections::BTreeMap;

        let mut map: BTreeMap<String, (Key, StaticRef)> = self
            .changes
            .entries
            .iter()
            .map(|(k, r)| (k.as_str().to_string(), (k.clone(), r.clone())))
            .collect();

        for (key, entry) in delta {
            let r = match entry {
                DeltaEntry::Value(schema, value) => StaticRef::Object(self.objects.put(&schema, value)?),
                DeltaEntry::Ref(addr) => StaticRef::Object(addr),
                DeltaEntry::Deleted => StaticRef::Deleted,
            };
            map.insert(key.as_str().to_string(), (key, r));
        }

        let manifest_keys: HashSet<&str> =
            self.manifest.entries.iter().map(|(k, _)| k.as_str()).collect();
        let mut entries: Vec<(Key, StaticRef)> = map
            .into_values()
            .filter(|(k, r)| !(matches!(r, StaticRef::Deleted) && !manifest_keys.contains(k.as_str())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Changeset { entries })
    }

    /// Replace the top checkpoint without leaving history: `prev` stays
    /// the current checkpoint's own `prev` (spec §4.4 `amend`).
    pub fn amend(&self, delta: Delta, message: impl Into<String>, when: f64) -> crate::Result<Checkpoint> {
        let current = self.current_checkpoint()?;
        let new_changes = self.merge_delta(delta)?;
        let changes_addr = put_object(&self.objects, &new_changes.encode())?;
        Ok(Checkpoint {
            author: self.author.clone(),
            when,
            message: message.into(),
            changes: changes_addr,
            commits: current.commits,
            prev: current.prev,
        })
    }

    /// Stack a new checkpoint on top, preserving history (spec §4.4
    /// `checkpoint`).
    pub fn checkpoint(
        &self,
        delta: Delta,
        message: impl Into<String>,
        when: f64,
    ) -> crate::Result<Checkpoint> {
        let current = self.current_checkpoint()?;
        let new_changes = self.merge_delta(delta)?;
        let changes_addr = put_object(&self.objects, &new_changes.encode())?;
        Ok(Checkpoint {
            author: self.author.clone(),
            when,
            message: message.into(),
            changes: changes_addr,
            commits: current.commits,
            prev: vec![self.head.clone()],
        })
    }

    /// Fold `(changes + delta)` into the previous manifest, chain a new
    /// commit onto the prior one(s), and return an empty-changeset
    /// checkpoint pointing at it (spec §4.4 `commit`).
    pub fn commit(
        &self,
        delta: Delta,
        message: impl Into<String>,
        when: f64,
    ) -> crate::Result<Checkpoint> {
        let current = self.current_checkpoint()?;
        let new_changes = self.merge_delta(delta)?;
        let new_manifest = apply_changeset(&self.manifest, &new_changes);
        let manifest_addr = put_object(&self.objects, &new_manifest.encode())?;

        let commit = Commit {
            author: self.author.clone(),
            when,
            message: message.into(),
            changes: manifest_addr,
            prev: current.commits,
        };
        let commit_addr = put_object(&self.objects, &commit.encode())?;
        let empty_changes_addr = put_object(&self.objects, &Changeset::empty().encode())?;

        Ok(Checkpoint {
            author: self.author.clone(),
            when,
            message: String::new(),
            changes: empty_changes_addr,
            commits: vec![commit_addr],
            prev: Vec::new(),
        })
    }

    /// Checkpoints since (and including) the current one, most recent
    /// first (spec §8 property 7).
    pub fn checkpoints(&self) -> crate::Result<Vec<Checkpoint>> {
        self.walk_ancestors(&[self.head.clone()], Checkpoint::decode, |c| c.prev.clone())
    }

    /// The commit history reachable from the current checkpoint.
    pub fn commits(&self) -> crate::Result<Vec<Commit>> {
        let current = self.current_checkpoint()?;
        self.walk_ancestors(&current.commits, Commit::decode, |c| c.prev.clone())
    }

    fn walk_ancestors<T>(
        &self,
        roots: &[StaticAddress],
        decode: fn(&[u8]) -> Result<T>,
        prev_of: impl Fn(&T) -> Vec<StaticAddress>,
    ) -> crate::Result<Vec<T>> {
        let mut queue: VecDeque<StaticAddress> = roots.iter().cloned().collect();
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        while let Some(addr) = queue.pop_front() {
            if !visited.insert(addr.clone()) {
                continue;
            }
            let bytes = get_object(&self.objects, &addr)?
                .ok_or_else(|| Error::RepoError(format!("missing object {addr}")))?;
            let node = decode(&bytes)?;
            queue.extend(prev_of(&node));
            out.push(node);
        }
        Ok(out)
    }

    /// Snapshot `HEAD` for a later [`Zipper::end_transaction`] call
    /// (spec §4.4 step 1).
    pub fn begin_transaction(&self) -> crate::Result<TransactionHandle> {
        tracing::trace!("begin_transaction: snapshotting HEAD");
        match self.state.gets(HEAD_KEY)? {
            Some((bytes, token)) => {
                let s = String::from_utf8(bytes).map_err(|e| Error::RepoError(e.to_string()))?;
                let addr: StaticAddress = s.parse().map_err(|e: ParseAddressError| Error::from(e))?;
                tracing::debug!(head = %addr, "begin_transaction: snapshotted HEAD");
                Ok(TransactionHandle { old_head: Some(addr), token: Some(token) })
            }
            None => {
                tracing::debug!("begin_transaction: no HEAD yet");
                Ok(TransactionHandle { old_head: None, token: None })
            }
        }
    }

    /// Commit a candidate checkpoint built against `handle`'s snapshot
    /// (spec §4.4 step 3): idempotent no-op if nothing changed, CAS
    /// `HEAD` otherwise, raising `TransactionFailed` on a lost race.
    pub fn end_transaction(
        &mut self,
        handle: TransactionHandle,
        checkpoint: Checkpoint,
    ) -> crate::Result<EndOutcome> {
        let new_head = put_object(&self.objects, &checkpoint.encode())?;
        if Some(&new_head) == handle.old_head.as_ref() {
            tracing::debug!(head = %new_head, "end_transaction: unchanged");
            return Ok(EndOutcome::Unchanged);
        }

        let new_head_bytes = new_head.to_string().into_bytes();
        let result = match &handle.token {
            Some(token) => self.state.cas(HEAD_KEY, &new_head_bytes, token),
            None => self.state.add(HEAD_KEY, &new_head_bytes),
        };

        match result {
            Ok(()) => {
                let (manifest, changes) = Self::load_working(&self.objects, &new_head)?;
                self.head = new_head.clone();
                self.manifest = manifest;
                self.changes = changes;
                tracing::debug!(head = %new_head, "end_transaction: committed");
                Ok(EndOutcome::Committed(new_head))
            }
            Err(StoreError::NotStored(_)) => {
                tracing::debug!("end_transaction: lost the HEAD CAS race");
                Err(Error::TransactionFailed.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run [`Zipper::begin_transaction`]/build/[`Zipper::end_transaction`]
    /// once; the caller owns any retry policy (spec §4.4 `transactionally`,
    /// "no automatic retry in the core").
    pub fn transactionally(
        &mut self,
        f: impl FnOnce(&Self) -> crate::Result<Checkpoint>,
    ) -> crate::Result<EndOutcome> {
        let handle = self.begin_transaction()?;
        let checkpoint = f(self)?;
        self.end_transaction(handle, checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(SchemaRegistry::new())
    }

    fn key(name: &str) -> Key {
        Key::make("T", Some(crate::codec::key::KeyId::String(name.to_string())))
    }

    fn value_entry(n: i32) -> DeltaEntry {
        DeltaEntry::Value(Schema::Int32, Value::Int32(n))
    }

    #[test]
    fn create_then_open_round_trips_empty_state() {
        let backing = MemoryStore::new();
        {
            let z = Zipper::create(backing.clone(), registry(), DEFAULT_AUTHOR).unwrap();
            assert!(z.manifest().entries.is_empty());
            assert!(z.changes().entries.is_empty());
        }
        let z = Zipper::open(backing, registry(), DEFAULT_AUTHOR).unwrap();
        assert!(z.working().is_empty());
    }

    #[test]
    fn create_twice_fails() {
        let backing = MemoryStore::new();
        Zipper::create(backing.clone(), registry(), DEFAULT_AUTHOR).unwrap();
        let err = Zipper::create(backing, registry(), DEFAULT_AUTHOR);
        assert!(err.is_err());
    }

    #[test]
    fn checkpoint_then_get_resolves_through_working_view() {
        let backing = MemoryStore::new();
        let mut z = Zipper::create(backing, registry(), DEFAULT_AUTHOR).unwrap();
        let a = key("a");
        let b = key("b");
        let delta = vec![(a.clone(), value_entry(1)), (b.clone(), value_entry(2))];
        z.transactionally(|zs| zs.checkpoint(delta, "first", 0.0)).unwrap();

        assert_eq!(z.get(&a).unwrap(), Some(Value::Int32(1)));
        assert_eq!(z.get(&b).unwrap(), Some(Value::Int32(2)));
    }

    #[test]
    fn deleted_entry_is_hidden_from_working_view() {
        let backing = MemoryStore::new();
        let mut z = Zipper::create(backing, registry(), DEFAULT_AUTHOR).unwrap();
        let a = key("a");
        let b = key("b");
        z.transactionally(|zs| {
            zs.checkpoint(vec![(a.clone(), value_entry(1)), (b.clone(), value_entry(2))], "c1", 0.0)
        })
        .unwrap();
        z.transactionally(|zs| zs.checkpoint(vec![(a.clone(), DeltaEntry::Deleted)], "c2", 0.0))
            .unwrap();

        assert_eq!(z.get(&a).unwrap(), None);
        let mut items = z.items().unwrap();
        items.sort_by(|x, y| x.0.cmp(&y.0));
        assert_eq!(items, vec![(b, Value::Int32(2))]);
    }

    #[test]
    fn amend_replaces_top_checkpoint_without_growing_history() {
        let backing = MemoryStore::new();
        let mut z = Zipper::create(backing, registry(), DEFAULT_AUTHOR).unwrap();
        let x = key("x");
        z.transactionally(|zs| zs.checkpoint(vec![(x.clone(), value_entry(1))], "c1", 0.0))
            .unwrap();
        z.transactionally(|zs| zs.checkpoint(vec![(x.clone(), value_entry(2))], "c2", 0.0))
            .unwrap();
        let before = z.checkpoints().unwrap().len();
        z.transactionally(|zs| zs.amend(vec![(x.clone(), value_entry(3))], "amend", 0.0))
            .unwrap();
        let after = z.checkpoints().unwrap().len();

        assert_eq!(before, after);
        assert_eq!(z.get(&x).unwrap(), Some(Value::Int32(3)));
    }

    #[test]
    fn checkpoint_grows_history_by_one() {
        let backing = MemoryStore::new();
        let mut z = Zipper::create(backing, registry(), DEFAULT_AUTHOR).unwrap();
        let x = key("x");
        z.transactionally(|zs| zs.checkpoint(vec![(x.clone(), value_entry(1))], "c1", 0.0))
            .unwrap();
        let before = z.checkpoints().unwrap().len();
        z.transactionally(|zs| zs.checkpoint(vec![(x.clone(), value_entry(2))], "c2", 0.0))
            .unwrap();
        let after = z.checkpoints().unwrap().len();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn commit_folds_changes_into_a_fresh_manifest_and_empties_changeset() {
        let backing = MemoryStore::new();
        let mut z = Zipper::create(backing, registry(), DEFAULT_AUTHOR).unwrap();
        let x = key("x");
        z.transactionally(|zs| zs.checkpoint(vec![(x.clone(), value_entry(1))], "c1", 0.0))
            .unwrap();
        z.transactionally(|zs| zs.commit(vec![], "commit", 0.0)).unwrap();

        assert!(z.changes().entries.is_empty());
        assert_eq!(z.manifest().entries.len(), 1);
        assert_eq!(z.get(&x).unwrap(), Some(Value::Int32(1)));
    }

    #[test]
    fn concurrent_transaction_with_stale_head_fails_and_retry_sees_winner() {
        let backing = MemoryStore::new();
        let mut z1 = Zipper::create(backing.clone(), registry(), DEFAULT_AUTHOR).unwrap();
        let mut z2 = Zipper::open(backing, registry(), DEFAULT_AUTHOR).unwrap();

        let k = key("k");
        let other = key("other");
        let handle2 = z2.begin_transaction().unwrap();

        z1.transactionally(|zs| {
            zs.checkpoint(
                vec![(k.clone(), value_entry(1)), (other.clone(), value_entry(99))],
                "z1",
                0.0,
            )
        })
        .unwrap();

        let stale_checkpoint = z2.checkpoint(vec![(k.clone(), value_entry(2))], "z2", 0.0).unwrap();
        let result = z2.end_transaction(handle2, stale_checkpoint);
        assert!(matches!(
            result,
            Err(crate::Error::Zipper(Error::TransactionFailed))
        ));

        z2.refresh().unwrap();
        z2.transactionally(|zs| zs.checkpoint(vec![(k.clone(), value_entry(2))], "z2-retry", 0.0))
            .unwrap();
        assert_eq!(z2.get(&k).unwrap(), Some(Value::Int32(2)));
        assert_eq!(z2.get(&other).unwrap(), Some(Value::Int32(99)));
    }

    #[test]
    fn tree_merge_orders_by_key_with_mine_winning_ties() {
        let a = key("a");
        let b = key("b");
        let c = key("c");
        let mine = Changeset {
            entries: vec![(a.clone(), StaticRef::Object(StaticAddress::of(b"1")))],
        };
        let yours = Manifest {
            entries: vec![
                (a.clone(), StaticAddress::of(b"0")),
                (b.clone(), StaticAddress::of(b"2")),
                (c.clone(), StaticAddress::of(b"3")),
            ],
        };
        let merged = tree_merge(&mine, &yours);
        let keys: Vec<&Key> = merged.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![&a, &b, &c]);
        assert_eq!(merged[0].1, StaticRef::Object(StaticAddress::of(b"1")));
    }

    #[test]
    fn manifest_and_changeset_round_trip_through_binary_encoding() {
        let m = Manifest {
            entries: vec![(key("a"), StaticAddress::of(b"x"))],
        };
        let decoded = Manifest::decode(&m.encode()).unwrap();
        assert_eq!(decoded.entries, m.entries);

        let c = Changeset {
            entries: vec![(key("a"), StaticRef::Deleted), (key("b"), StaticRef::Object(StaticAddress::of(b"y")))],
        };
        let decoded = Changeset::decode(&c.encode()).unwrap();
        assert_eq!(decoded.entries, c.entries);
    }

    #[test]
    fn two_zippers_over_one_shared_objects_store_see_the_same_addresses() {
        let objects_backing = MemoryStore::new();
        let objects = Arc::new(StaticStore::new(objects_backing));
        let state_a = MemoryStore::new();
        let state_b = MemoryStore::new();

        let za = Zipper::create_with(state_a, objects.clone(), registry(), DEFAULT_AUTHOR).unwrap();
        let zb = Zipper::create_with(state_b, objects, registry(), DEFAULT_AUTHOR).unwrap();

        let (addr_a, _) = za.put(&Schema::Int32, Value::Int32(7)).unwrap();
        let (addr_b, _) = zb.put(&Schema::Int32, Value::Int32(7)).unwrap();
        assert_eq!(addr_a, addr_b);
    }
}
