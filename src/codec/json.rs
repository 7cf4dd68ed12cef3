//! JSON encoding (spec §4.2): records as objects, `omap` as an array of
//! 2-element `[k,v]` pairs, `map` as an object (sorted keys), `set` as a
//! sorted array, unions as the raw value of the selected branch.

use serde_json::{Map, Value as Json, json};

use super::schema::Schema;
use super::value::{RecordValue, Value};
use super::{Error, Result};

pub fn encode(schema: &Schema, value: &Value) -> Result<Json> {
    Ok(match (schema, value) {
        (Schema::Null, Value::Null) => Json::Null,
        (Schema::Boolean, Value::Boolean(b)) => json!(b),
        (Schema::Int32, Value::Int32(v)) => json!(v),
        (Schema::Int64, Value::Int64(v)) => json!(v),
        (Schema::Float32, Value::Float32(v)) => json!(v),
        (Schema::Float64, Value::Float64(v)) => json!(v),
        (Schema::String, Value::String(s)) => json!(s),
        (Schema::Bytes, Value::Bytes(b)) | (Schema::Fixed { .. }, Value::Fixed(b)) => {
            json!(hex::encode(b))
        }
        (Schema::Array(items), Value::Array(vs)) => {
            let mut out = Vec::with_capacity(vs.len());
            for v in vs {
                out.push(encode(items, v)?);
            }
            Json::Array(out)
        }
        (Schema::Set(items), Value::Set(vs)) => {
            let mut sorted = vs.clone();
            sorted.sort_by(|a, b| json_key(items, a).cmp(&json_key(items, b)));
            let mut out = Vec::with_capacity(sorted.len());
            for v in &sorted {
                out.push(encode(items, v)?);
            }
            Json::Array(out)
        }
        (Schema::Map(values), Value::Map(entries)) => {
            let mut obj = Map::new();
            let mut sorted = entries.clone();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            for (k, v) in &sorted {
                obj.insert(k.clone(), encode(values, v)?);
            }
            Json::Object(obj)
        }
        (Schema::Omap(values), Value::Omap(entries)) => {
            let mut out = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                out.push(Json::Array(vec![json!(k), encode(values, v)?]));
            }
            Json::Array(out)
        }
        (Schema::Union(branches), Value::Union(idx, inner)) => {
            let branch = branches
                .get(*idx)
                .ok_or_else(|| Error::TypeError(format!("union branch {idx} out of range")))?;
            encode(branch, inner)?
        }
        (Schema::Record { fields, .. }, Value::Record(record)) => {
            let mut obj = Map::new();
            for field in fields {
                let v = record.get(&field.name).ok_or_else(|| {
                    Error::TypeError(format!("record missing field {}", field.name))
                })?;
                obj.insert(field.name.clone(), encode(&field.schema, v)?);
            }
            Json::Object(obj)
        }
        (schema, value) => {
            return Err(Error::TypeError(format!(
                "value {value:?} does not conform to schema kind {}",
                schema.kind_name()
            )));
        }
    })
}

fn json_key(schema: &Schema, value: &Value) -> String {
    encode(schema, value)
        .map(|j| j.to_string())
        .unwrap_or_default()
}

pub fn decode(schema: &Schema, json: &Json) -> Result<Value> {
    Ok(match schema {
        Schema::Null => Value::Null,
        Schema::Boolean => Value::Boolean(
            json.as_bool()
                .ok_or_else(|| Error::TypeError("expected boolean".into()))?,
        ),
        Schema::Int32 => Value::Int32(
            json.as_i64()
                .ok_or_else(|| Error::TypeError("expected int32".into()))? as i32,
        ),
        Schema::Int64 => Value::Int64(
            json.as_i64()
                .ok_or_else(|| Error::TypeError("expected int64".into()))?,
        ),
        Schema::Float32 => Value::Float32(
            json.as_f64()
                .ok_or_else(|| Error::TypeError("expected float32".into()))? as f32,
        ),
        Schema::Float64 => Value::Float64(
            json.as_f64()
                .ok_or_else(|| Error::TypeError("expected float64".into()))?,
        ),
        Schema::String => Value::String(
            json.as_str()
                .ok_or_else(|| Error::TypeError("expected string".into()))?
                .to_string(),
        ),
        Schema::Bytes | Schema::Fixed { .. } => {
            let s = json
                .as_str()
                .ok_or_else(|| Error::TypeError("expected hex string".into()))?;
            let bytes = hex::decode(s).map_err(|e| Error::TypeError(e.to_string()))?;
            if matches!(schema, Schema::Fixed { .. }) {
                Value::Fixed(bytes)
            } else {
                Value::Bytes(bytes)
            }
        }
        Schema::Array(items) => {
            let arr = json
                .as_array()
                .ok_or_else(|| Error::TypeError("expected array".into()))?;
            Value::Array(
                arr.iter()
                    .map(|v| decode(items, v))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        Schema::Set(items) => {
            let arr = json
                .as_array()
                .ok_or_else(|| Error::TypeError("expected array for set".into()))?;
            Value::Set(
                arr.iter()
                    .map(|v| decode(items, v))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        Schema::Map(values) => {
            let obj = json
                .as_object()
                .ok_or_else(|| Error::TypeError("expected object for map".into()))?;
            let mut entries = obj
                .iter()
                .map(|(k, v)| Ok((k.clone(), decode(values, v)?)))
                .collect::<Result<Vec<_>>>()?;
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Map(entries)
        }
        Schema::Omap(values) => {
            let arr = json
                .as_array()
                .ok_or_else(|| Error::TypeError("expected array for omap".into()))?;
            let mut entries = Vec::with_capacity(arr.len());
            for pair in arr {
                let pair = pair
                    .as_array()
                    .ok_or_else(|| Error::TypeError("expected [k, v] pair".into()))?;
                let key = pair
                    .first()
                    .and_then(Json::as_str)
                    .ok_or_else(|| Error::TypeError("omap key must be a string".into()))?
                    .to_string();
                let value = decode(
                    values,
                    pair.get(1)
                        .ok_or_else(|| Error::TypeError("omap pair missing value".into()))?,
                )?;
                entries.push((key, value));
            }
            Value::Omap(entries)
        }
        Schema::Union(branches) => {
            for (idx, branch) in branches.iter().enumerate() {
                if let Ok(v) = decode(branch, json) {
                    return Ok(Value::Union(idx, Box::new(v)));
                }
            }
            return Err(Error::TypeError(
                "no union branch matched the given JSON value".into(),
            ));
        }
        Schema::Record { name, fields, .. } => {
            let obj = json
                .as_object()
                .ok_or_else(|| Error::TypeError("expected object for record".into()))?;
            let mut decoded = Vec::with_capacity(fields.len());
            for field in fields {
                let v = obj.get(&field.name).ok_or_else(|| {
                    Error::TypeError(format!("record missing field {}", field.name))
                })?;
                decoded.push((field.name.clone(), decode(&field.schema, v)?));
            }
            Value::Record(std::sync::Arc::new(RecordValue {
                type_name: name.clone(),
                fields: decoded,
            }))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omap_encodes_as_pair_array() {
        let schema = Schema::Omap(Box::new(Schema::Int32));
        let value = Value::Omap(vec![
            ("b".to_string(), Value::Int32(2)),
            ("a".to_string(), Value::Int32(1)),
        ]);
        let json = encode(&schema, &value).unwrap();
        assert_eq!(json, serde_json::json!([["b", 2], ["a", 1]]));
    }

    #[test]
    fn map_encodes_sorted_object() {
        let schema = Schema::Map(Box::new(Schema::Int32));
        let value = Value::Map(vec![
            ("b".to_string(), Value::Int32(2)),
            ("a".to_string(), Value::Int32(1)),
        ]);
        let json = encode(&schema, &value).unwrap();
        assert_eq!(json, serde_json::json!({"a": 1, "b": 2}));
    }

    #[test]
    fn set_encodes_sorted_array() {
        let schema = Schema::Set(Box::new(Schema::String));
        let value = Value::Set(vec![Value::String("b".into()), Value::String("a".into())]);
        let json = encode(&schema, &value).unwrap();
        assert_eq!(json, serde_json::json!(["a", "b"]));
    }
}
