//! Decoded values (spec §3 "Value"): an instance conforming to a
//! [`crate::codec::schema::Schema`]. Records carry named slots in the
//! schema's declared field order.

use std::sync::Arc;

use super::schema::TypeName;
use super::{Error, Result};

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Fixed(Vec<u8>),
    Record(Arc<RecordValue>),
    Array(Vec<Value>),
    /// Sorted by key for binary/JSON determinism (spec §4.2).
    Map(Vec<(String, Value)>),
    /// Insertion order preserved (spec §4.2: "omap preserves insertion order").
    Omap(Vec<(String, Value)>),
    /// Unique elements; emitted sorted for determinism.
    Set(Vec<Value>),
    Union(usize, Box<Value>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordValue {
    pub type_name: TypeName,
    pub fields: Vec<(String, Value)>,
}

impl RecordValue {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Int32(a), Int32(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (Float32(a), Float32(b)) => a == b,
            (Float64(a), Float64(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Fixed(a), Fixed(b)) => a == b,
            (Record(a), Record(b)) => Arc::ptr_eq(a, b) || a == b,
            (Array(a), Array(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Omap(a), Omap(b)) => a == b,
            (Set(a), Set(b)) => a == b,
            (Union(ai, a), Union(bi, b)) => ai == bi && a == b,
            _ => false,
        }
    }
}

/// Lifts a generic decoded value (string, number, mapping, sequence) into a
/// host-language type. Adaptation is recursive through complex types;
/// failure raises [`Error::TypeError`] (spec §4.2).
pub trait Adapt: Sized {
    fn adapt(value: &Value) -> Result<Self>;
}

impl Adapt for bool {
    fn adapt(value: &Value) -> Result<Self> {
        match value {
            Value::Boolean(b) => Ok(*b),
            other => Err(Error::TypeError(format!("expected boolean, got {other:?}"))),
        }
    }
}

impl Adapt for i32 {
    fn adapt(value: &Value) -> Result<Self> {
        match value {
            Value::Int32(v) => Ok(*v),
            other => Err(Error::TypeError(format!("expected int32, got {other:?}"))),
        }
    }
}

impl Adapt for i64 {
    fn adapt(value: &Value) -> Result<Self> {
        match value {
            Value::Int64(v) => Ok(*v),
            Value::Int32(v) => Ok(*v as i64),
            other => Err(Error::TypeError(format!("expected int64, got {other:?}"))),
        }
    }
}

impl Adapt for f32 {
    fn adapt(value: &Value) -> Result<Self> {
        match value {
            Value::Float32(v) => Ok(*v),
            other => Err(Error::TypeError(format!("expected float32, got {other:?}"))),
        }
    }
}

impl Adapt for f64 {
    fn adapt(value: &Value) -> Result<Self> {
        match value {
            Value::Float64(v) => Ok(*v),
            Value::Float32(v) => Ok(*v as f64),
            other => Err(Error::TypeError(format!("expected float64, got {other:?}"))),
        }
    }
}

impl Adapt for String {
    fn adapt(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(Error::TypeError(format!("expected string, got {other:?}"))),
        }
    }
}

impl Adapt for Vec<u8> {
    fn adapt(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(b) | Value::Fixed(b) => Ok(b.clone()),
            other => Err(Error::TypeError(format!("expected bytes, got {other:?}"))),
        }
    }
}

impl Adapt for uuid::Uuid {
    fn adapt(value: &Value) -> Result<Self> {
        match value {
            Value::Fixed(b) if b.len() == 16 => {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(b);
                Ok(uuid::Uuid::from_bytes(buf))
            }
            Value::String(s) => {
                uuid::Uuid::parse_str(s).map_err(|e| Error::TypeError(e.to_string()))
            }
            other => Err(Error::TypeError(format!("expected uuid, got {other:?}"))),
        }
    }
}

impl<T: Adapt> Adapt for Option<T> {
    fn adapt(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            Value::Union(_, inner) => match inner.as_ref() {
                Value::Null => Ok(None),
                other => Ok(Some(T::adapt(other)?)),
            },
            other => Ok(Some(T::adapt(other)?)),
        }
    }
}
