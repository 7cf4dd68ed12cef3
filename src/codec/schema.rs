//! Schema kinds (spec §3, §4.2): the shape a [`crate::codec::value::Value`]
//! must conform to, declared from a JSON description identical in spirit to
//! Avro with three extensions (`base` on records, `omap`, `set`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// A fully-qualified type name, `"<namespace>.<local>"`. Names without a
/// dot are implicitly qualified with the default namespace `M`; the
/// default namespace is elided again in external (`Display`) form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeName {
    namespace: String,
    local: String,
}

pub const DEFAULT_NAMESPACE: &str = "M";

impl TypeName {
    pub fn new(qualified: impl AsRef<str>) -> Self {
        let qualified = qualified.as_ref();
        match qualified.rsplit_once('.') {
            Some((ns, local)) => TypeName {
                namespace: ns.to_string(),
                local: local.to_string(),
            },
            None => TypeName {
                namespace: DEFAULT_NAMESPACE.to_string(),
                local: qualified.to_string(),
            },
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    /// The fully-qualified form, always including the namespace — used as
    /// the binary header's type-tag and as registry keys.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.namespace, self.local)
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace == DEFAULT_NAMESPACE {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{}.{}", self.namespace, self.local)
        }
    }
}

impl From<&str> for TypeName {
    fn from(s: &str) -> Self {
        TypeName::new(s)
    }
}

impl From<String> for TypeName {
    fn from(s: String) -> Self {
        TypeName::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub schema: Box<Schema>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    Null,
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
    Fixed { name: TypeName, size: usize },
    Record {
        name: TypeName,
        base: Option<TypeName>,
        /// Fully resolved field list: base fields first (in inherited
        /// order), excluding any name redeclared by the subclass, then the
        /// subclass's own fields — spec invariant 7.
        fields: Vec<Field>,
    },
    Array(Box<Schema>),
    Map(Box<Schema>),
    Omap(Box<Schema>),
    Set(Box<Schema>),
    Union(Vec<Schema>),
}

impl Schema {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Schema::Null => "null",
            Schema::Boolean => "boolean",
            Schema::Int32 => "int32",
            Schema::Int64 => "int64",
            Schema::Float32 => "float32",
            Schema::Float64 => "float64",
            Schema::String => "string",
            Schema::Bytes => "bytes",
            Schema::Fixed { .. } => "fixed",
            Schema::Record { .. } => "record",
            Schema::Array(_) => "array",
            Schema::Map(_) => "map",
            Schema::Omap(_) => "omap",
            Schema::Set(_) => "set",
            Schema::Union(_) => "union",
        }
    }

    /// The schema's qualified type name, for the types that carry one.
    /// Complex (non-named) types synthesize one the way the Python source
    /// names them (`array<...>`, `map<...>`, etc.) — used only for
    /// diagnostics, not for wire encoding.
    pub fn type_name(&self) -> TypeName {
        match self {
            Schema::Null => TypeName::new("null"),
            Schema::Boolean => TypeName::new("boolean"),
            Schema::Int32 => TypeName::new("int32"),
            Schema::Int64 => TypeName::new("int64"),
            Schema::Float32 => TypeName::new("float32"),
            Schema::Float64 => TypeName::new("float64"),
            Schema::String => TypeName::new("string"),
            Schema::Bytes => TypeName::new("bytes"),
            Schema::Fixed { name, .. } => name.clone(),
            Schema::Record { name, .. } => name.clone(),
            Schema::Array(items) => TypeName::new(format!("array<{}>", items.type_name())),
            Schema::Map(values) => TypeName::new(format!("map<{}>", values.type_name())),
            Schema::Omap(values) => TypeName::new(format!("omap<{}>", values.type_name())),
            Schema::Set(items) => TypeName::new(format!("set<{}>", items.type_name())),
            Schema::Union(branches) => TypeName::new(format!(
                "union<{}>",
                branches
                    .iter()
                    .map(|b| b.type_name().to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            )),
        }
    }

    pub fn as_record_fields(&self) -> Option<&[Field]> {
        match self {
            Schema::Record { fields, .. } => Some(fields),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_namespace_elided_in_display() {
        let t = TypeName::new("Item");
        assert_eq!(t.to_string(), "Item");
        assert_eq!(t.qualified(), "M.Item");
    }

    #[test]
    fn explicit_namespace_kept_in_display() {
        let t = TypeName::new("other.Item");
        assert_eq!(t.to_string(), "other.Item");
    }
}
