//! L5 — content tree record types (spec §4.6): typed records with a
//! `folder` edge forming a rooted tree, `/`-separated path resolution.
//! Grounded on `mdb/db/_tree.py`'s `Content` abstract base (required-field
//! validation on construction), `mdb/db/datastore.py`'s concrete
//! `Folder`/`Page` models (`before`/`after`/`child`/`add`/`remove`/`path`/
//! `resolve`), and `mdb/query/tree.py::InnerNode.before`/`after`.

use std::sync::Arc;

use serde_json::json;

use crate::codec::key::{Key, KeyId};
use crate::codec::registry::SchemaRegistry;
use crate::codec::schema::TypeName;
use crate::codec::value::{RecordValue, Value};
use crate::codec::Error as CodecError;

/// The well-known root key every repository's content tree hangs off of
/// (spec §4.6 invariant: "root is stored under the well-known Key
/// `(Site, "root")`").
pub fn root_key() -> Key {
    Key::make(TypeName::new("Site"), Some(KeyId::String("root".to_string())))
}

/// Declares `Item`/`Folder`/`Site`/`Subdomain`/`Page` into `registry`,
/// idempotent on repeated calls (spec §4.6's minimum record set).
/// `Subdomain` is named in the original spec's minimum list without its
/// own fields; per `mdb/db/tree.py`-adjacent usage it extends `Folder`
/// exactly as `Site` does, with nothing further.
pub fn declare_schemas(registry: &SchemaRegistry) -> crate::Result<()> {
    if registry.contains(&TypeName::new("Item")) {
        return Ok(());
    }
    registry.declare(&json!({
        "type": "record",
        "name": "Item",
        "fields": [
            {"name": "name", "type": "string"},
            {"name": "title", "type": "string"},
            {"name": "folder", "type": ["null", "string"]},
            {"name": "description", "type": "string"}
        ]
    }))?;
    registry.declare(&json!({
        "type": "record",
        "name": "Folder",
        "base": "Item",
        "fields": [
            {"name": "contents", "type": {"type": "omap", "values": "string"}}
        ]
    }))?;
    registry.declare(&json!({
        "type": "record",
        "name": "Site",
        "base": "Folder",
        "fields": []
    }))?;
    registry.declare(&json!({
        "type": "record",
        "name": "Subdomain",
        "base": "Folder",
        "fields": []
    }))?;
    registry.declare(&json!({
        "type": "record",
        "name": "Page",
        "base": "Item",
        "fields": []
    }))?;
    Ok(())
}

fn non_empty(field: &str, value: &str) -> crate::Result<()> {
    if value.trim().is_empty() {
        return Err(CodecError::TypeError(format!("{field} is a required field.")).into());
    }
    Ok(())
}

fn folder_to_value(folder: Option<&Key>) -> Value {
    match folder {
        Some(k) => Value::Union(1, Box::new(Value::String(k.as_str().to_string()))),
        None => Value::Union(0, Box::new(Value::Null)),
    }
}

fn folder_from_value(value: Option<&Value>) -> crate::Result<Option<Key>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Union(_, inner)) => match inner.as_ref() {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(Key::parse(s)?)),
            other => Err(CodecError::TypeError(format!("expected a folder key, got {other:?}")).into()),
        },
        Some(Value::String(s)) => Ok(Some(Key::parse(s)?)),
        Some(other) => Err(CodecError::TypeError(format!("expected a folder key, got {other:?}")).into()),
    }
}

fn field_string(record: &RecordValue, name: &str) -> crate::Result<String> {
    match record.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        other => Err(CodecError::TypeError(format!("{name} missing or not a string: {other:?}")).into()),
    }
}

/// A read-only view shared by every content record (spec §4.6). Has no
/// public constructor of its own — `_tree.py`'s `Content` is an abstract
/// base that cannot be instantiated directly; here that's expressed by
/// the trait carrying only accessors, construction left to the concrete
/// record types' own `new`.
pub trait Content {
    fn key(&self) -> &Key;
    fn name(&self) -> &str;
    fn title(&self) -> &str;
    fn folder(&self) -> Option<&Key>;
    fn set_folder(&mut self, folder: Option<Key>);
}

/// `spec.md` §4.6: `name`, `title`, `folder: Key|null`, `description`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    key: Key,
    name: String,
    title: String,
    folder: Option<Key>,
    description: String,
}

impl Item {
    /// Validates `name`/`title` are non-empty (spec "required-field
    /// validation on construction"), grounded on `_tree.py::Content.__init__`'s
    /// `ValueError` on a required field left `Undefined`.
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        folder: Option<Key>,
        description: impl Into<String>,
    ) -> crate::Result<Self> {
        let name = name.into();
        let title = title.into();
        non_empty("name", &name)?;
        non_empty("title", &title)?;
        Ok(Item {
            key: Key::make(TypeName::new("Item"), None),
            name,
            title,
            folder,
            description: description.into(),
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Re-kinds this item's key in place, preserving its id. Used by
    /// `Folder`/`Page`/`Site`/`Subdomain`'s own constructors so a wrapped
    /// `Item`'s key carries the wrapper's actual kind rather than the bare
    /// `"Item"` kind every `Item::new` starts with.
    fn rekey(&mut self, kind: TypeName) {
        let id = self.key.id().clone();
        self.key = Key::make(kind, Some(id));
    }

    fn fields(&self) -> Vec<(String, Value)> {
        vec![
            ("name".to_string(), Value::String(self.name.clone())),
            ("title".to_string(), Value::String(self.title.clone())),
            ("folder".to_string(), folder_to_value(self.folder.as_ref())),
            ("description".to_string(), Value::String(self.description.clone())),
        ]
    }

    pub fn into_value(&self, type_name: TypeName) -> Value {
        Value::Record(Arc::new(RecordValue {
            type_name,
            fields: self.fields(),
        }))
    }

    fn from_record(key: Key, record: &RecordValue) -> crate::Result<Self> {
        Ok(Item {
            key,
            name: field_string(record, "name")?,
            title: field_string(record, "title")?,
            folder: folder_from_value(record.get("folder"))?,
            description: field_string(record, "description")?,
        })
    }

    /// Decodes any record whose fields are a superset of `Item`'s own
    /// (i.e. any subtype), keyed by `key`.
    pub fn from_value(key: Key, value: &Value) -> crate::Result<Self> {
        let Value::Record(record) = value else {
            return Err(CodecError::TypeError(format!("expected a record, got {value:?}")).into());
        };
        Self::from_record(key, record)
    }
}

impl Content for Item {
    fn key(&self) -> &Key {
        &self.key
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn title(&self) -> &str {
        &self.title
    }
    fn folder(&self) -> Option<&Key> {
        self.folder.as_ref()
    }
    fn set_folder(&mut self, folder: Option<Key>) {
        self.folder = folder;
    }
}

/// `spec.md` §4.6: `Item` plus `contents: omap<Key>` keyed by child name,
/// in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    item: Item,
    contents: Vec<(String, Key)>,
}

impl Folder {
    /// Wraps `item`, re-kinding its key to `"Folder"` (spec §4.6: a
    /// `Folder`'s key kind must match its actual type, not the bare
    /// `"Item"` kind `Item::new` assigns by default).
    pub fn new(mut item: Item) -> Self {
        item.rekey(TypeName::new("Folder"));
        Folder { item, contents: Vec::new() }
    }

    /// Re-kinds this folder's key, for `Site`/`Subdomain`'s own
    /// constructors which wrap a plain `Folder`.
    fn rekeyed(mut self, kind: TypeName) -> Self {
        self.item.rekey(kind);
        self
    }

    pub fn contents(&self) -> &[(String, Key)] {
        &self.contents
    }

    pub fn child(&self, name: &str) -> Option<&Key> {
        self.contents.iter().find(|(n, _)| n == name).map(|(_, k)| k)
    }

    /// Siblings preceding `name` in `contents` order (exclusive), grounded
    /// on `datastore.py::Folder.before`.
    pub fn before(&self, name: &str) -> Vec<Key> {
        self.contents
            .iter()
            .take_while(|(n, _)| n != name)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Siblings following `name` in `contents` order (exclusive), grounded
    /// on `datastore.py::Folder.after`.
    pub fn after(&self, name: &str) -> Vec<Key> {
        self.contents
            .iter()
            .skip_while(|(n, _)| n != name)
            .skip(1)
            .map(|(_, k)| k.clone())
            .collect()
    }

    fn fields(&self) -> Vec<(String, Value)> {
        let mut fields = self.item.fields();
        fields.push((
            "contents".to_string(),
            Value::Omap(
                self.contents
                    .iter()
                    .map(|(n, k)| (n.clone(), Value::String(k.as_str().to_string())))
                    .collect(),
            ),
        ));
        fields
    }

    pub fn into_value(&self, type_name: TypeName) -> Value {
        Value::Record(Arc::new(RecordValue {
            type_name,
            fields: self.fields(),
        }))
    }

    pub fn from_value(key: Key, value: &Value) -> crate::Result<Self> {
        let Value::Record(record) = value else {
            return Err(CodecError::TypeError(format!("expected a record, got {value:?}")).into());
        };
        let item = Item::from_record(key, record)?;
        let contents = match record.get("contents") {
            Some(Value::Omap(entries)) => entries
                .iter()
                .map(|(name, v)| match v {
                    Value::String(s) => Ok((name.clone(), Key::parse(s)?)),
                    other => Err(CodecError::TypeError(format!("expected a key string, got {other:?}")).into()),
                })
                .collect::<crate::Result<Vec<_>>>()?,
            other => return Err(CodecError::TypeError(format!("contents missing or not an omap: {other:?}")).into()),
        };
        Ok(Folder { item, contents })
    }
}

impl Content for Folder {
    fn key(&self) -> &Key {
        self.item.key()
    }
    fn name(&self) -> &str {
        self.item.name()
    }
    fn title(&self) -> &str {
        self.item.title()
    }
    fn folder(&self) -> Option<&Key> {
        self.item.folder()
    }
    fn set_folder(&mut self, folder: Option<Key>) {
        self.item.set_folder(folder)
    }
}

/// A root container (spec §4.6: "`Site` extends `Folder` (root container)").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site(pub Folder);

/// A second flavor of root-like container scoped under a parent `Site`
/// (spec §4.6 "ADDED, supplemented"); same field set as `Folder`, nothing
/// further — the original schema file is not present in the retrieved
/// pack, so no additional fields are invented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subdomain(pub Folder);

/// A leaf content record (spec §4.6's minimum record set), grounded on
/// `datastore.py::Page`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page(pub Item);

macro_rules! delegate_content {
    ($ty:ident) => {
        impl Content for $ty {
            fn key(&self) -> &Key {
                self.0.key()
            }
            fn name(&self) -> &str {
                self.0.name()
            }
            fn title(&self) -> &str {
                self.0.title()
            }
            fn folder(&self) -> Option<&Key> {
                self.0.folder()
            }
            fn set_folder(&mut self, folder: Option<Key>) {
                self.0.set_folder(folder)
            }
        }

        impl $ty {
            pub fn into_value(&self) -> Value {
                self.0.into_value(TypeName::new(stringify!($ty)))
            }
        }
    };
}

delegate_content!(Site);
delegate_content!(Subdomain);

impl Content for Page {
    fn key(&self) -> &Key {
        self.0.key()
    }
    fn name(&self) -> &str {
        self.0.name()
    }
    fn title(&self) -> &str {
        self.0.title()
    }
    fn folder(&self) -> Option<&Key> {
        self.0.folder()
    }
    fn set_folder(&mut self, folder: Option<Key>) {
        self.0.set_folder(folder)
    }
}

impl Page {
    /// Wraps `item`, re-kinding its key to `"Page"`.
    pub fn new(mut item: Item) -> Self {
        item.rekey(TypeName::new("Page"));
        Page(item)
    }

    pub fn into_value(&self) -> Value {
        self.0.into_value(TypeName::new("Page"))
    }

    pub fn from_value(key: Key, value: &Value) -> crate::Result<Self> {
        Ok(Page(Item::from_value(key, value)?))
    }
}

impl Site {
    /// Wraps `folder`, re-kinding its key to `"Site"`.
    pub fn new(folder: Folder) -> Self {
        Site(folder.rekeyed(TypeName::new("Site")))
    }

    pub fn from_value(key: Key, value: &Value) -> crate::Result<Self> {
        Ok(Site(Folder::from_value(key, value)?))
    }
}

impl Subdomain {
    /// Wraps `folder`, re-kinding its key to `"Subdomain"`.
    pub fn new(folder: Folder) -> Self {
        Subdomain(folder.rekeyed(TypeName::new("Subdomain")))
    }

    pub fn from_value(key: Key, value: &Value) -> crate::Result<Self> {
        Ok(Subdomain(Folder::from_value(key, value)?))
    }
}

/// Links `child` under `folder` by name, updating both sides of the
/// `folder`/`contents` invariant together (spec §4.6 invariant 2),
/// grounded on `datastore.py::Folder.add`.
pub fn add_child(folder: &mut Folder, child: &mut impl Content) -> crate::Result<()> {
    if folder.child(child.name()).is_some() {
        return Err(CodecError::TypeError(format!("child already exists: {:?}", child.name())).into());
    }
    if child.folder().is_some() {
        return Err(CodecError::TypeError(format!("child already in a folder: {:?}", child.name())).into());
    }
    folder.contents.push((child.name().to_string(), child.key().clone()));
    child.set_folder(Some(folder.key().clone()));
    Ok(())
}

/// Unlinks `child` from `folder`, grounded on `datastore.py::Folder.remove`.
pub fn remove_child(folder: &mut Folder, child: &mut impl Content) -> crate::Result<()> {
    if folder.child(child.name()) == Some(child.key()) {
        folder.contents.retain(|(n, _)| n != child.name());
        child.set_folder(None);
    }
    Ok(())
}

/// Resolves `/a/b/c` left-to-right via repeated `child` lookups from
/// `root`; a leading `/` roots at `root` itself regardless of any other
/// context (spec §4.6 path syntax). `descend` fetches the `Folder` behind
/// a non-final segment's key, so a caller can back it with any storage
/// layer. `Ok(None)` on a missing or non-folder intermediate segment,
/// grounded on `datastore.py::resolve`'s `ValueError` case but surfaced as
/// an option rather than an error, per spec's "yields Undefined (or
/// raises)" choice.
pub fn resolve<F>(root: &Folder, path: &str, mut descend: F) -> crate::Result<Option<Key>>
where
    F: FnMut(&Key) -> crate::Result<Option<Folder>>,
{
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Some(root.key().clone()));
    }

    let segments: Vec<&str> = trimmed.split('/').collect();
    let mut current = root.clone();
    for (i, name) in segments.iter().enumerate() {
        let Some(child_key) = current.child(name).cloned() else {
            return Ok(None);
        };
        if i + 1 == segments.len() {
            return Ok(Some(child_key));
        }
        match descend(&child_key)? {
            Some(folder) => current = folder,
            None => return Ok(None),
        }
    }
    unreachable!("segments is non-empty, so the loop always returns")
}

/// Reconstructs the `/`-joined ancestor name chain for `item`, excluding
/// the root (spec §4.6 `path`), grounded on `datastore.py::path`
/// (`tree.orself(item, tree.ascend)` filtered to items that have a
/// `folder` — i.e. everything but the root — then reversed). `ancestor`
/// fetches `(name, folder)` for a folder key, so a caller can back it with
/// any storage layer.
pub fn path<C, F>(item: &C, mut ancestor: F) -> crate::Result<String>
where
    C: Content,
    F: FnMut(&Key) -> crate::Result<Option<(String, Option<Key>)>>,
{
    let mut names = Vec::new();
    if item.folder().is_some() {
        names.push(item.name().to_string());
    }
    let mut cursor = item.folder().cloned();
    while let Some(folder_key) = cursor {
        let Some((name, next_folder)) = ancestor(&folder_key)? else {
            break;
        };
        if next_folder.is_some() {
            names.push(name);
        }
        cursor = next_folder;
    }
    names.reverse();
    Ok(format!("/{}", names.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        let reg = SchemaRegistry::new();
        declare_schemas(&reg).unwrap();
        reg
    }

    #[test]
    fn schema_subtyping_chains_to_item() {
        let reg = registry();
        assert!(reg.is_subtype(&TypeName::new("Site"), &TypeName::new("Item")));
        assert!(reg.is_subtype(&TypeName::new("Page"), &TypeName::new("Item")));
        assert!(reg.is_subtype(&TypeName::new("Subdomain"), &TypeName::new("Folder")));
        assert!(!reg.is_subtype(&TypeName::new("Item"), &TypeName::new("Folder")));
    }

    #[test]
    fn declare_schemas_is_idempotent() {
        let reg = SchemaRegistry::new();
        declare_schemas(&reg).unwrap();
        declare_schemas(&reg).unwrap();
    }

    #[test]
    fn item_rejects_empty_name_or_title() {
        assert!(Item::new("", "Title", None, "").is_err());
        assert!(Item::new("name", "", None, "").is_err());
        assert!(Item::new("name", "Title", None, "").is_ok());
    }

    #[test]
    fn item_round_trips_through_value() {
        let item = Item::new("about", "About", Some(root_key()), "d").unwrap();
        let value = item.into_value(TypeName::new("Item"));
        let restored = Item::from_value(item.key().clone(), &value).unwrap();
        assert_eq!(restored.name(), "about");
        assert_eq!(restored.title(), "About");
        assert_eq!(restored.folder(), Some(&root_key()));
        assert_eq!(restored.description(), "d");
    }

    #[test]
    fn wrapper_constructors_rekey_to_their_own_kind() {
        let folder = Folder::new(Item::new("news", "News", None, "").unwrap());
        assert_eq!(folder.key().kind(), &TypeName::new("Folder"));

        let page = Page::new(Item::new("about", "About", None, "").unwrap());
        assert_eq!(page.key().kind(), &TypeName::new("Page"));

        let site = Site::new(Folder::new(Item::new("root", "Root", None, "").unwrap()));
        assert_eq!(site.key().kind(), &TypeName::new("Site"));

        let subdomain = Subdomain::new(Folder::new(Item::new("sub", "Sub", None, "").unwrap()));
        assert_eq!(subdomain.key().kind(), &TypeName::new("Subdomain"));
    }

    #[test]
    fn folder_round_trips_with_contents() {
        let mut folder = Folder::new(Item::new("root", "Root", None, "").unwrap());
        let mut child = Item::new("about", "About", None, "").unwrap();
        add_child(&mut folder, &mut child).unwrap();

        let value = folder.into_value(TypeName::new("Folder"));
        let restored = Folder::from_value(folder.key().clone(), &value).unwrap();
        assert_eq!(restored.child("about"), Some(child.key()));
    }

    #[test]
    fn add_child_sets_folder_pointer_and_rejects_duplicates() {
        let mut folder = Folder::new(Item::new("root", "Root", None, "").unwrap());
        let mut a = Item::new("a", "A", None, "").unwrap();
        add_child(&mut folder, &mut a).unwrap();
        assert_eq!(a.folder(), Some(folder.key()));

        let mut dup = Item::new("a", "Dup", None, "").unwrap();
        assert!(add_child(&mut folder, &mut dup).is_err());

        let mut already_in_folder = Item::new("b", "B", Some(folder.key().clone()), "").unwrap();
        let mut other = Folder::new(Item::new("other", "Other", None, "").unwrap());
        assert!(add_child(&mut other, &mut already_in_folder).is_err());
    }

    #[test]
    fn remove_child_clears_folder_pointer() {
        let mut folder = Folder::new(Item::new("root", "Root", None, "").unwrap());
        let mut a = Item::new("a", "A", None, "").unwrap();
        add_child(&mut folder, &mut a).unwrap();
        remove_child(&mut folder, &mut a).unwrap();
        assert_eq!(a.folder(), None);
        assert_eq!(folder.child("a"), None);
    }

    #[test]
    fn before_and_after_reflect_insertion_order() {
        let mut folder = Folder::new(Item::new("root", "Root", None, "").unwrap());
        let mut a = Item::new("a", "A", None, "").unwrap();
        let mut b = Item::new("b", "B", None, "").unwrap();
        let mut c = Item::new("c", "C", None, "").unwrap();
        add_child(&mut folder, &mut a).unwrap();
        add_child(&mut folder, &mut b).unwrap();
        add_child(&mut folder, &mut c).unwrap();

        assert_eq!(folder.before("b"), vec![a.key().clone()]);
        assert_eq!(folder.after("b"), vec![c.key().clone()]);
        assert!(folder.before("a").is_empty());
        assert!(folder.after("c").is_empty());
    }

    #[test]
    fn resolve_walks_nested_folders() {
        let mut root = Folder::new(Item::new("root", "Root", None, "").unwrap());
        let mut news = Folder::new(Item::new("news", "News", None, "").unwrap());
        let mut article = Item::new("article-1", "Article 1", None, "").unwrap();
        add_child(&mut news, &mut article).unwrap();
        add_child(&mut root, &mut news.clone()).unwrap();

        let news_key = news.key().clone();
        let resolved = resolve(&root, "/news/article-1", |k| {
            if *k == news_key {
                Ok(Some(news.clone()))
            } else {
                Ok(None)
            }
        })
        .unwrap();
        assert_eq!(resolved, Some(article.key().clone()));
    }

    #[test]
    fn resolve_of_empty_path_is_root() {
        let root = Folder::new(Item::new("root", "Root", None, "").unwrap());
        let resolved = resolve(&root, "/", |_| Ok(None)).unwrap();
        assert_eq!(resolved, Some(root.key().clone()));
    }

    #[test]
    fn resolve_of_missing_segment_is_none() {
        let root = Folder::new(Item::new("root", "Root", None, "").unwrap());
        let resolved = resolve(&root, "/missing", |_| Ok(None)).unwrap();
        assert_eq!(resolved, None);
    }

    #[test]
    fn path_excludes_root_and_includes_item_itself() {
        let root = Folder::new(Item::new("root", "Root", None, "").unwrap());
        let mut news = Folder::new(Item::new("news", "News", None, "").unwrap());
        news.set_folder(Some(root.key().clone()));

        let mut article = Item::new("article-1", "Article 1", None, "").unwrap();
        article.set_folder(Some(news.key().clone()));

        let root_key = root.key().clone();
        let news_key = news.key().clone();
        let news_name = news.name().to_string();

        let p = path(&article, |k| {
            if *k == news_key {
                Ok(Some((news_name.clone(), Some(root_key.clone()))))
            } else if *k == root_key {
                Ok(Some(("root".to_string(), None)))
            } else {
                Ok(None)
            }
        })
        .unwrap();
        assert_eq!(p, "/news/article-1");
    }
}
