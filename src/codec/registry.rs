//! Type registry: maps fully-qualified [`TypeName`]s to their [`Schema`],
//! shared by the codec and the query layer's kind tests. Schemas are
//! declared from a JSON description identical in spirit to Avro, with the
//! `base`/`omap`/`set` extensions named in spec §4.2.

use dashmap::DashMap;
use serde_json::Value as Json;

use super::record::resolve_fields;
use super::schema::{Field, Schema, TypeName};
use super::{Error, Result};

#[derive(Default)]
pub struct SchemaRegistry {
    schemas: DashMap<String, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &TypeName) -> Result<Schema> {
        self.schemas
            .get(&name.qualified())
            .map(|s| s.clone())
            .ok_or_else(|| Error::NameError(name.qualified()))
    }

    pub fn contains(&self, name: &TypeName) -> bool {
        self.schemas.contains_key(&name.qualified())
    }

    /// Declares a single schema from its JSON description and returns its
    /// type name. Records referencing `base` must have already been
    /// declared (`require(path)` callers are expected to declare schema
    /// files in dependency order, per spec §6).
    pub fn declare(&self, json: &Json) -> Result<TypeName> {
        let schema = self.parse(json)?;
        let name = schema.type_name();
        if matches!(schema, Schema::Record { .. }) {
            if self.schemas.contains_key(&name.qualified()) {
                return Err(Error::SchemaError(format!(
                    "duplicate schema declaration: {}",
                    name.qualified()
                )));
            }
            self.schemas.insert(name.qualified(), schema);
        }
        Ok(name)
    }

    /// Is `sub` the same type as, or a descendant (via `base` chains) of,
    /// `sup`? Used by `Zipper::find` (spec §4.4) and by the query
    /// compiler's kind tests (spec §4.7).
    pub fn is_subtype(&self, sub: &TypeName, sup: &TypeName) -> bool {
        if sub == sup {
            return true;
        }
        let mut current = sub.clone();
        loop {
            let Ok(Schema::Record { base, .. }) = self.get(&current) else {
                return false;
            };
            match base {
                Some(b) if &b == sup => return true,
                Some(b) => current = b,
                None => return false,
            }
        }
    }

    fn parse(&self, json: &Json) -> Result<Schema> {
        match json {
            Json::String(s) => self.parse_named(s),
            Json::Array(branches) => {
                let parsed = branches
                    .iter()
                    .map(|b| self.parse(b))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Schema::Union(parsed))
            }
            Json::Object(obj) => self.parse_object(obj),
            other => Err(Error::SchemaError(format!(
                "invalid schema description: {other}"
            ))),
        }
    }

    fn parse_named(&self, name: &str) -> Result<Schema> {
        Ok(match name {
            "null" => Schema::Null,
            "boolean" => Schema::Boolean,
            "int32" => Schema::Int32,
            "int64" => Schema::Int64,
            "float32" => Schema::Float32,
            "float64" => Schema::Float64,
            "string" => Schema::String,
            "bytes" => Schema::Bytes,
            other => self.get(&TypeName::new(other))?,
        })
    }

    fn parse_object(&self, obj: &serde_json::Map<String, Json>) -> Result<Schema> {
        let kind = obj
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::SchemaError("schema object missing \"type\"".into()))?;
        match kind {
            "fixed" => {
                let name = obj
                    .get("name")
                    .and_then(Json::as_str)
                    .ok_or_else(|| Error::SchemaError("fixed schema missing \"name\"".into()))?;
                let size = obj
                    .get("size")
                    .and_then(Json::as_u64)
                    .ok_or_else(|| Error::SchemaError("fixed schema missing \"size\"".into()))?
                    as usize;
                Ok(Schema::Fixed {
                    name: TypeName::new(name),
                    size,
                })
            }
            "array" => Ok(Schema::Array(Box::new(
                self.parse(obj.get("items").ok_or_else(|| {
                    Error::SchemaError("array schema missing \"items\"".into())
                })?)?,
            ))),
            "set" => Ok(Schema::Set(Box::new(self.parse(obj.get("items").ok_or_else(
                || Error::SchemaError("set schema missing \"items\"".into()),
            )?)?))),
            "map" => Ok(Schema::Map(Box::new(self.parse(obj.get("values").ok_or_else(
                || Error::SchemaError("map schema missing \"values\"".into()),
            )?)?))),
            "omap" => Ok(Schema::Omap(Box::new(self.parse(
                obj.get("values")
                    .ok_or_else(|| Error::SchemaError("omap schema missing \"values\"".into()))?,
            )?))),
            "record" => self.parse_record(obj),
            other => Err(Error::SchemaError(format!("unknown schema kind: {other}"))),
        }
    }

    fn parse_record(&self, obj: &serde_json::Map<String, Json>) -> Result<Schema> {
        let name = obj
            .get("name")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::SchemaError("record schema missing \"name\"".into()))?;
        let name = TypeName::new(name);

        let base = match obj.get("base").and_then(Json::as_str) {
            Some(b) => Some(TypeName::new(b)),
            None => None,
        };

        let own_fields = obj
            .get("fields")
            .and_then(Json::as_array)
            .ok_or_else(|| Error::SchemaError("record schema missing \"fields\"".into()))?
            .iter()
            .map(|f| self.parse_field(f))
            .collect::<Result<Vec<_>>>()?;

        let base_fields = match &base {
            Some(b) => {
                let base_schema = self.get(b)?;
                base_schema.as_record_fields().unwrap_or(&[]).to_vec()
            }
            None => Vec::new(),
        };

        Ok(Schema::Record {
            name,
            base,
            fields: resolve_fields(&base_fields, own_fields),
        })
    }

    fn parse_field(&self, json: &Json) -> Result<Field> {
        let obj = json
            .as_object()
            .ok_or_else(|| Error::SchemaError("field must be an object".into()))?;
        let name = obj
            .get("name")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::SchemaError("field missing \"name\"".into()))?
            .to_string();
        let schema = obj
            .get("type")
            .ok_or_else(|| Error::SchemaError("field missing \"type\"".into()))?;
        Ok(Field {
            name,
            schema: Box::new(self.parse(schema)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn declares_primitive_record() {
        let reg = SchemaRegistry::new();
        let name = reg
            .declare(&json!({
                "type": "record",
                "name": "Item",
                "fields": [
                    {"name": "name", "type": "string"},
                    {"name": "title", "type": "string"}
                ]
            }))
            .unwrap();
        assert_eq!(name.to_string(), "Item");
        let schema = reg.get(&name).unwrap();
        assert_eq!(schema.as_record_fields().unwrap().len(), 2);
    }

    #[test]
    fn base_fields_inherited_in_order() {
        let reg = SchemaRegistry::new();
        reg.declare(&json!({
            "type": "record",
            "name": "Item",
            "fields": [
                {"name": "name", "type": "string"},
                {"name": "title", "type": "string"}
            ]
        }))
        .unwrap();
        let folder = reg
            .declare(&json!({
                "type": "record",
                "name": "Folder",
                "base": "Item",
                "fields": [
                    {"name": "contents", "type": {"type": "omap", "values": "string"}}
                ]
            }))
            .unwrap();
        let schema = reg.get(&folder).unwrap();
        let names: Vec<&str> = schema
            .as_record_fields()
            .unwrap()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["name", "title", "contents"]);
    }

    #[test]
    fn is_subtype_walks_base_chain() {
        let reg = SchemaRegistry::new();
        reg.declare(&json!({"type": "record", "name": "Item", "fields": []}))
            .unwrap();
        reg.declare(&json!({"type": "record", "name": "Folder", "base": "Item", "fields": []}))
            .unwrap();
        reg.declare(&json!({"type": "record", "name": "Site", "base": "Folder", "fields": []}))
            .unwrap();
        assert!(reg.is_subtype(&TypeName::new("Site"), &TypeName::new("Item")));
        assert!(!reg.is_subtype(&TypeName::new("Item"), &TypeName::new("Site")));
    }

    #[test]
    fn unknown_base_is_name_error() {
        let reg = SchemaRegistry::new();
        let err = reg.declare(&json!({
            "type": "record",
            "name": "Folder",
            "base": "Missing",
            "fields": []
        }));
        assert!(matches!(err, Err(Error::NameError(_))));
    }
}
