//! Dynamic context and tree traversal (spec §4.7 step 4). Grounded on
//! `mdb/query/tree.py`: the `(collection, focus, index)` fluid-cell triple
//! is replaced by an explicit [`Context`] threaded by value through every
//! compiled closure (spec §9 Design Notes), and the axis functions
//! (`ascend`/`descend`/`before`/`after`/`unique`) are ported directly.

use std::collections::HashMap;
use std::rc::Rc;

use crate::codec::key::Key;
use crate::codec::registry::SchemaRegistry;
use crate::codec::value::Value;

use super::Error;

/// A materialized node: the fields every content-tree record exposes
/// uniformly (spec §4.6), read generically off the record's `Value`
/// without depending on `tree::Content`'s concrete Rust types — this keeps
/// the query engine usable over any schema, not just `Item`/`Folder`.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub key: Key,
    pub name: String,
    pub folder: Option<Key>,
    /// Ordered child keys, from the record's `contents` omap field if
    /// present (empty for leaf kinds such as `Page`).
    pub children: Vec<Key>,
    /// Every scalar field the record carries (`title`, `description`, ...),
    /// for the `attribute` axis (`mdb/query/tree.py::_attributes`).
    pub fields: Vec<(String, Value)>,
}

/// An in-memory view over a decoded content tree, built once from a
/// branch's `items()` (spec §4.7 operates over a materialized node set;
/// per-step store round-trips are not required since content trees are
/// small, test- and demo-scale structures). Grounded on `mdb/db/_tree.py`'s
/// uniform `Content` field access.
pub struct Tree {
    nodes: HashMap<Key, TreeNode>,
    registry: Rc<SchemaRegistry>,
}

impl Tree {
    pub fn new(registry: Rc<SchemaRegistry>) -> Self {
        Tree { nodes: HashMap::new(), registry }
    }

    /// Registers one decoded record. Accepts any record carrying `name`
    /// (required) and, optionally, `folder` (a `["null","string"]`-shaped
    /// key union) and `contents` (an omap of name to child key) — exactly
    /// the fields `Item`/`Folder` declare (spec §4.6).
    pub fn insert(&mut self, key: Key, value: &Value) -> crate::Result<()> {
        let Value::Record(record) = value else {
            return Err(crate::codec::Error::TypeError("expected a record".to_string()).into());
        };
        let name = match record.get("name") {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };
        let folder = match record.get("folder") {
            Some(Value::Union(_, inner)) => match inner.as_ref() {
                Value::String(s) => Some(Key::parse(s)?),
                _ => None,
            },
            Some(Value::String(s)) => Some(Key::parse(s)?),
            _ => None,
        };
        let children = match record.get("contents") {
            Some(Value::Omap(entries)) => entries
                .iter()
                .filter_map(|(_, v)| match v {
                    Value::String(s) => Key::parse(s).ok(),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        let fields = record.fields.clone();
        self.nodes.insert(key.clone(), TreeNode { key, name, folder, children, fields });
        Ok(())
    }

    pub fn get(&self, key: &Key) -> Option<&TreeNode> {
        self.nodes.get(key)
    }

    pub fn kind_of(&self, key: &Key) -> &str {
        key.kind().local()
    }

    pub fn is_kind(&self, key: &Key, name: &str) -> bool {
        let sub = key.kind().clone();
        let sup = crate::codec::schema::TypeName::new(name);
        sub == sup || self.registry.is_subtype(&sub, &sup)
    }

    pub fn folder(&self, key: &Key) -> Option<Key> {
        self.nodes.get(key).and_then(|n| n.folder.clone())
    }

    pub fn children(&self, key: &Key) -> Vec<Key> {
        self.nodes.get(key).map(|n| n.children.clone()).unwrap_or_default()
    }

    pub fn name(&self, key: &Key) -> String {
        self.nodes.get(key).map(|n| n.name.clone()).unwrap_or_default()
    }

    /// Preceding siblings, exclusive (`mdb/db/datastore.py::Folder.before`).
    pub fn before(&self, key: &Key) -> Vec<Key> {
        let Some(folder_key) = self.folder(key) else { return Vec::new() };
        self.children(&folder_key).into_iter().take_while(|k| k != key).collect()
    }

    /// Following siblings, exclusive (`mdb/db/datastore.py::Folder.after`).
    pub fn after(&self, key: &Key) -> Vec<Key> {
        let Some(folder_key) = self.folder(key) else { return Vec::new() };
        self.children(&folder_key).into_iter().skip_while(|k| k != key).skip(1).collect()
    }

    /// `mdb/query/tree.py::ascend` — strict ancestors, root last-or-absent.
    pub fn ascend(&self, key: &Key) -> Vec<Key> {
        let mut out = Vec::new();
        let mut probe = self.folder(key);
        while let Some(p) = probe {
            out.push(p.clone());
            probe = self.folder(&p);
        }
        out
    }

    /// `mdb/query/tree.py::descend` — a breadth-first walk of all proper
    /// descendants.
    pub fn descend(&self, key: &Key) -> Vec<Key> {
        let mut out = Vec::new();
        let mut queue: std::collections::VecDeque<Key> = self.children(key).into_iter().collect();
        while let Some(k) = queue.pop_front() {
            out.push(k.clone());
            queue.extend(self.children(&k));
        }
        out
    }

    /// `ops.py::root` — the topmost ancestor of `key` (itself, if it has
    /// none).
    pub fn root_of(&self, key: &Key) -> Key {
        let mut current = key.clone();
        while let Some(p) = self.folder(&current) {
            current = p;
        }
        current
    }

    /// A scalar field by name (`mdb/query/tree.py::__attr`); `None` if the
    /// node has no such field.
    pub fn attribute(&self, key: &Key, name: &str) -> Option<QueryValue> {
        let node = self.nodes.get(key)?;
        if name == "name" {
            return Some(QueryValue::Str(node.name.clone()));
        }
        node.fields.iter().find(|(n, _)| n == name).and_then(|(_, v)| value_to_query(v))
    }
}

fn value_to_query(v: &Value) -> Option<QueryValue> {
    match v {
        Value::String(s) => Some(QueryValue::Str(s.clone())),
        Value::Boolean(b) => Some(QueryValue::Boolean(*b)),
        Value::Int32(n) => Some(QueryValue::Integer(*n as i64)),
        Value::Int64(n) => Some(QueryValue::Integer(*n)),
        Value::Float32(n) => Some(QueryValue::Decimal(*n as f64)),
        Value::Float64(n) => Some(QueryValue::Decimal(*n)),
        _ => None,
    }
}

/// A value flowing through a compiled query (spec §4.7 step 4). Sequences
/// are flattened by [`expand`] between steps; only the final pass
/// deduplicates (spec §4.7 step 4's last sentence).
#[derive(Debug, Clone)]
pub enum QueryValue {
    Node(Key),
    Integer(i64),
    Decimal(f64),
    Str(String),
    Boolean(bool),
    Sequence(Vec<QueryValue>),
}

impl QueryValue {
    /// Truthiness (spec §4.7: "empty-sequence falsiness"): booleans by
    /// value, numbers/strings by non-zero/non-empty, sequences by having a
    /// first item, nodes always true.
    pub fn truthy(&self) -> bool {
        match self {
            QueryValue::Boolean(b) => *b,
            QueryValue::Integer(n) => *n != 0,
            QueryValue::Decimal(n) => *n != 0.0,
            QueryValue::Str(s) => !s.is_empty(),
            QueryValue::Node(_) => true,
            QueryValue::Sequence(items) => items.first().is_some_and(QueryValue::truthy),
        }
    }

    pub fn as_f64(&self) -> crate::Result<f64> {
        match self {
            QueryValue::Integer(n) => Ok(*n as f64),
            QueryValue::Decimal(n) => Ok(*n),
            other => Err(super::Error::NameError(format!("not a number: {other:?}")).into()),
        }
    }

    /// Flattens this value into the items it contributes to a collection
    /// (`mdb/query/tree.py::sequence`): scalars/nodes become one-item
    /// sequences, `Sequence` is spread.
    pub fn flatten(self) -> Vec<QueryValue> {
        match self {
            QueryValue::Sequence(items) => items,
            other => vec![other],
        }
    }

    fn dedup_key(&self) -> DedupKey {
        match self {
            QueryValue::Node(k) => DedupKey::Node(k.clone()),
            QueryValue::Integer(n) => DedupKey::Scalar(format!("i{n}")),
            QueryValue::Decimal(n) => DedupKey::Scalar(format!("d{n}")),
            QueryValue::Str(s) => DedupKey::Scalar(format!("s{s}")),
            QueryValue::Boolean(b) => DedupKey::Scalar(format!("b{b}")),
            QueryValue::Sequence(items) => {
                DedupKey::Scalar(format!("[{}]", items.iter().map(|i| format!("{:?}", i.dedup_key())).collect::<Vec<_>>().join(",")))
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
enum DedupKey {
    Node(Key),
    Scalar(String),
}

impl PartialEq for QueryValue {
    fn eq(&self, other: &Self) -> bool {
        self.dedup_key() == other.dedup_key()
    }
}

/// Drops duplicates by identity, preserving first-occurrence order
/// (`mdb/query/tree.py::unique`/`hashable`).
pub fn unique(items: Vec<QueryValue>) -> Vec<QueryValue> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let k = item.dedup_key();
        if seen.insert(k) {
            out.push(item);
        }
    }
    out
}

/// The dynamic context threaded through every compiled closure (spec §9:
/// "replace source-language 'fluid' cells with explicit context
/// arguments"). `collection`/`focus`/`index` are `mdb/query/tree.py`'s
/// `COLLECTION`/`FOCUS`/`INDEX` cells; `vars` holds `$name` bindings
/// introduced by `for`/`some`/`every`.
#[derive(Clone)]
pub struct Context<'a> {
    pub tree: &'a Tree,
    pub collection: Rc<Vec<QueryValue>>,
    pub focus: QueryValue,
    pub index: usize,
    pub vars: im_vars::Vars,
}

impl<'a> Context<'a> {
    pub fn root(tree: &'a Tree, focus: QueryValue) -> Self {
        Context {
            tree,
            collection: Rc::new(vec![focus.clone()]),
            focus,
            index: 0,
            vars: im_vars::Vars::new(),
        }
    }

    pub fn with_var(&self, name: &str, value: QueryValue) -> Self {
        let mut next = self.clone();
        next.vars = next.vars.with(name, value);
        next
    }

    pub fn lookup(&self, name: &str) -> crate::Result<QueryValue> {
        self.vars.get(name).cloned().ok_or_else(|| Error::NameError(name.to_string()).into())
    }
}

/// A tiny persistent map: cheap to clone per recursive `for`/`some`/`every`
/// binding without threading `&mut` state through closures.
pub mod im_vars {
    use super::QueryValue;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    pub struct Vars(Rc<Vec<(String, QueryValue)>>);

    impl Vars {
        pub fn new() -> Self {
            Vars(Rc::new(Vec::new()))
        }

        pub fn with(&self, name: &str, value: QueryValue) -> Self {
            let mut entries = (*self.0).clone();
            entries.push((name.to_string(), value));
            Vars(Rc::new(entries))
        }

        pub fn get(&self, name: &str) -> Option<&QueryValue> {
            self.0.iter().rev().find(|(n, _)| n == name).map(|(_, v)| v)
        }
    }
}

/// One traversal step's contribution for a single focus: the `expand`
/// mechanism of `mdb/query/tree.py::Path`, folded step-by-step rather than
/// via Python generators.
pub fn expand<F>(tree: &Tree, items: &[QueryValue], mut step: F) -> crate::Result<Vec<QueryValue>>
where
    F: FnMut(&Context) -> crate::Result<Vec<QueryValue>>,
{
    expand_with(tree, items, im_vars::Vars::new(), &mut step)
}

pub fn expand_with<F>(
    tree: &Tree,
    items: &[QueryValue],
    vars: im_vars::Vars,
    step: &mut F,
) -> crate::Result<Vec<QueryValue>>
where
    F: FnMut(&Context) -> crate::Result<Vec<QueryValue>>,
{
    let collection = Rc::new(items.to_vec());
    let mut out = Vec::new();
    for (index, focus) in items.iter().enumerate() {
        let ctx = Context { tree, collection: collection.clone(), focus: focus.clone(), index, vars: vars.clone() };
        out.extend(step(&ctx)?);
    }
    Ok(out)
}
