//! Binary encoding (spec §4.2): `[version:varint][codec:varint][type-tag:utf8][body]`
//! when boxed (written to the static store or any boxed context); body-only
//! encoding is used for subordinate values such as [`crate::codec::key::Key`]
//! that omit the header (spec §4.2: "Omitting the header is permitted only
//! for subordinate encodings").

use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::schema::Schema;
use super::value::{RecordValue, Value};
use super::{Error, Result};

pub const VERSION: u64 = 1;
pub const CODEC_NONE: u64 = 0;

pub fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        } else {
            out.push(byte | 0x80);
        }
    }
}

pub fn read_varint(r: &mut impl Read) -> io::Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = r.read_u8()?;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(result)
}

fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Encode with the boxed header.
pub fn encode(schema: &Schema, value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_varint(&mut out, VERSION);
    write_varint(&mut out, CODEC_NONE);
    let tag = schema.type_name().qualified();
    write_varint(&mut out, tag.len() as u64);
    out.extend_from_slice(tag.as_bytes());
    encode_body(schema, value, &mut out)?;
    Ok(out)
}

pub fn decode(schema: &Schema, bytes: &[u8]) -> Result<Value> {
    let mut reader = bytes;
    let version = read_varint(&mut reader)?;
    if version != VERSION {
        return Err(Error::TypeError(format!("unsupported codec version {version}")));
    }
    let codec = read_varint(&mut reader)?;
    if codec != CODEC_NONE {
        return Err(Error::TypeError(format!("unsupported codec id {codec}")));
    }
    let tag_len = read_varint(&mut reader)? as usize;
    let mut tag_buf = vec![0u8; tag_len];
    reader.read_exact(&mut tag_buf)?;
    decode_body(schema, &mut reader)
}

/// Body-only encoding, no header — used by boxed `encode` for the payload
/// and directly by subordinate encodings (e.g. Keys) that never box.
pub fn encode_body(schema: &Schema, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match (schema, value) {
        (Schema::Null, Value::Null) => {}
        (Schema::Boolean, Value::Boolean(b)) => out.push(if *b { 1 } else { 0 }),
        (Schema::Int32, Value::Int32(v)) => write_varint(out, zigzag_encode(*v as i64)),
        (Schema::Int64, Value::Int64(v)) => write_varint(out, zigzag_encode(*v)),
        (Schema::Float32, Value::Float32(v)) => {
            out.write_f32::<LittleEndian>(*v).expect("vec write cannot fail")
        }
        (Schema::Float64, Value::Float64(v)) => {
            out.write_f64::<LittleEndian>(*v).expect("vec write cannot fail")
        }
        (Schema::String, Value::String(s)) => {
            write_varint(out, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        (Schema::Bytes, Value::Bytes(b)) => {
            write_varint(out, b.len() as u64);
            out.extend_from_slice(b);
        }
        (Schema::Fixed { size, .. }, Value::Fixed(b)) => {
            if b.len() != *size {
                return Err(Error::TypeError(format!(
                    "fixed value has {} bytes, schema requires {size}",
                    b.len()
                )));
            }
            out.extend_from_slice(b);
        }
        (Schema::Array(items), Value::Array(vs)) => {
            if !vs.is_empty() {
                write_varint(out, vs.len() as u64);
                for v in vs {
                    encode_body(items, v, out)?;
                }
            }
            write_varint(out, 0);
        }
        (Schema::Set(items), Value::Set(vs)) => {
            // Sets are emitted as their sorted unique elements (spec §4.2
            // determinism); sort by each element's own encoded bytes so the
            // order doesn't depend on the element's Rust representation.
            let mut encoded: Vec<Vec<u8>> = vs
                .iter()
                .map(|v| {
                    let mut buf = Vec::new();
                    encode_body(items, v, &mut buf)?;
                    Ok(buf)
                })
                .collect::<Result<_>>()?;
            encoded.sort();
            if !encoded.is_empty() {
                write_varint(out, encoded.len() as u64);
                for item in &encoded {
                    out.extend_from_slice(item);
                }
            }
            write_varint(out, 0);
        }
        (Schema::Map(values), Value::Map(entries)) => {
            // Map ordering for binary serialization is by sorted key (spec
            // §4.2 determinism), regardless of the order `entries` was built in.
            let mut sorted = entries.clone();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            encode_pairs(values, &sorted, out)?;
        }
        (Schema::Omap(values), Value::Omap(entries)) => {
            // Omap preserves insertion order.
            encode_pairs(values, entries, out)?;
        }
        (Schema::Union(branches), Value::Union(idx, inner)) => {
            let branch = branches
                .get(*idx)
                .ok_or_else(|| Error::TypeError(format!("union branch {idx} out of range")))?;
            write_varint(out, *idx as u64);
            encode_body(branch, inner, out)?;
        }
        (Schema::Record { fields, .. }, Value::Record(record)) => {
            for field in fields {
                let v = record.get(&field.name).ok_or_else(|| {
                    Error::TypeError(format!("record missing field {}", field.name))
                })?;
                encode_body(&field.schema, v, out)?;
            }
        }
        (schema, value) => {
            return Err(Error::TypeError(format!(
                "value {value:?} does not conform to schema kind {}",
                schema.kind_name()
            )));
        }
    }
    Ok(())
}

pub fn decode_body(schema: &Schema, r: &mut impl Read) -> Result<Value> {
    Ok(match schema {
        Schema::Null => Value::Null,
        Schema::Boolean => Value::Boolean(r.read_u8()? != 0),
        Schema::Int32 => Value::Int32(zigzag_decode(read_varint(r)?) as i32),
        Schema::Int64 => Value::Int64(zigzag_decode(read_varint(r)?)),
        Schema::Float32 => Value::Float32(r.read_f32::<LittleEndian>()?),
        Schema::Float64 => Value::Float64(r.read_f64::<LittleEndian>()?),
        Schema::String => {
            let len = read_varint(r)? as usize;
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf)?;
            Value::String(String::from_utf8(buf).map_err(|e| Error::TypeError(e.to_string()))?)
        }
        Schema::Bytes => {
            let len = read_varint(r)? as usize;
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf)?;
            Value::Bytes(buf)
        }
        Schema::Fixed { size, .. } => {
            let mut buf = vec![0u8; *size];
            r.read_exact(&mut buf)?;
            Value::Fixed(buf)
        }
        Schema::Array(items) => {
            let mut out = Vec::new();
            loop {
                let count = read_varint(r)?;
                if count == 0 {
                    break;
                }
                for _ in 0..count {
                    out.push(decode_body(items, r)?);
                }
            }
            Value::Array(out)
        }
        Schema::Set(items) => {
            let mut out = Vec::new();
            loop {
                let count = read_varint(r)?;
                if count == 0 {
                    break;
                }
                for _ in 0..count {
                    out.push(decode_body(items, r)?);
                }
            }
            Value::Set(out)
        }
        Schema::Map(values) => Value::Map(decode_pairs(values, r)?),
        Schema::Omap(values) => Value::Omap(decode_pairs(values, r)?),
        Schema::Union(branches) => {
            let idx = read_varint(r)? as usize;
            let branch = branches
                .get(idx)
                .ok_or_else(|| Error::TypeError(format!("union branch {idx} out of range")))?;
            Value::Union(idx, Box::new(decode_body(branch, r)?))
        }
        Schema::Record { name, fields, .. } => {
            let mut decoded = Vec::with_capacity(fields.len());
            for field in fields {
                decoded.push((field.name.clone(), decode_body(&field.schema, r)?));
            }
            Value::Record(std::sync::Arc::new(RecordValue {
                type_name: name.clone(),
                fields: decoded,
            }))
        }
    })
}

fn encode_pairs(values: &Schema, entries: &[(String, Value)], out: &mut Vec<u8>) -> Result<()> {
    if !entries.is_empty() {
        write_varint(out, entries.len() as u64);
        for (k, v) in entries {
            write_varint(out, k.len() as u64);
            out.extend_from_slice(k.as_bytes());
            encode_body(values, v, out)?;
        }
    }
    write_varint(out, 0);
    Ok(())
}

fn decode_pairs(values: &Schema, r: &mut impl Read) -> Result<Vec<(String, Value)>> {
    let mut out = Vec::new();
    loop {
        let count = read_varint(r)?;
        if count == 0 {
            break;
        }
        for _ in 0..count {
            let len = read_varint(r)? as usize;
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf)?;
            let key = String::from_utf8(buf).map_err(|e| Error::TypeError(e.to_string()))?;
            let value = decode_body(values, r)?;
            out.push((key, value));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trips() {
        for v in [0u64, 1, 127, 128, 300, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, v);
            let mut reader = &buf[..];
            assert_eq!(read_varint(&mut reader).unwrap(), v);
        }
    }

    #[test]
    fn zigzag_round_trips_signed() {
        for v in [0i64, -1, 1, i32::MIN as i64, i32::MAX as i64] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }

    #[test]
    fn string_round_trips_body_only() {
        let schema = Schema::String;
        let value = Value::String("hello".to_string());
        let mut buf = Vec::new();
        encode_body(&schema, &value, &mut buf).unwrap();
        let mut reader = &buf[..];
        let decoded = decode_body(&schema, &mut reader).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn array_terminates_with_zero_count() {
        let schema = Schema::Array(Box::new(Schema::Int32));
        let value = Value::Array(vec![Value::Int32(1), Value::Int32(2)]);
        let mut buf = Vec::new();
        encode_body(&schema, &value, &mut buf).unwrap();
        let mut reader = &buf[..];
        assert_eq!(decode_body(&schema, &mut reader).unwrap(), value);
    }

    #[test]
    fn map_serializes_in_sorted_key_order_regardless_of_build_order() {
        let schema = Schema::Map(Box::new(Schema::Int32));
        let a = Value::Map(vec![
            ("b".into(), Value::Int32(2)),
            ("a".into(), Value::Int32(1)),
        ]);
        let b = Value::Map(vec![
            ("a".into(), Value::Int32(1)),
            ("b".into(), Value::Int32(2)),
        ]);
        let mut buf_a = Vec::new();
        let mut buf_b = Vec::new();
        encode_body(&schema, &a, &mut buf_a).unwrap();
        encode_body(&schema, &b, &mut buf_b).unwrap();
        assert_eq!(buf_a, buf_b);
    }

    #[test]
    fn omap_preserves_insertion_order() {
        let schema = Schema::Omap(Box::new(Schema::Int32));
        let value = Value::Omap(vec![
            ("b".into(), Value::Int32(2)),
            ("a".into(), Value::Int32(1)),
        ]);
        let mut buf = Vec::new();
        encode_body(&schema, &value, &mut buf).unwrap();
        let mut reader = &buf[..];
        let decoded = decode_body(&schema, &mut reader).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn boxed_encode_is_deterministic() {
        let schema = Schema::String;
        let value = Value::String("f".to_string());
        assert_eq!(
            encode(&schema, &value).unwrap(),
            encode(&schema, &value).unwrap()
        );
    }

    #[derive(Clone, Debug)]
    struct ArbitraryRecord {
        count: i32,
        label: String,
        tags: Vec<i32>,
    }

    impl quickcheck::Arbitrary for ArbitraryRecord {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            ArbitraryRecord {
                count: i32::arbitrary(g),
                label: String::arbitrary(g),
                tags: Vec::<i32>::arbitrary(g),
            }
        }
    }

    fn fixed_schema() -> Schema {
        Schema::Record {
            name: crate::codec::schema::TypeName::new("ArbitraryRecord"),
            base: None,
            fields: vec![
                crate::codec::schema::Field { name: "count".to_string(), schema: Box::new(Schema::Int32) },
                crate::codec::schema::Field { name: "label".to_string(), schema: Box::new(Schema::String) },
                crate::codec::schema::Field {
                    name: "tags".to_string(),
                    schema: Box::new(Schema::Array(Box::new(Schema::Int32))),
                },
            ],
        }
    }

    fn to_value(r: &ArbitraryRecord) -> Value {
        Value::Record(std::sync::Arc::new(crate::codec::value::RecordValue {
            type_name: crate::codec::schema::TypeName::new("ArbitraryRecord"),
            fields: vec![
                ("count".to_string(), Value::Int32(r.count)),
                ("label".to_string(), Value::String(r.label.clone())),
                (
                    "tags".to_string(),
                    Value::Array(r.tags.iter().map(|t| Value::Int32(*t)).collect()),
                ),
            ],
        }))
    }

    #[quickcheck_macros::quickcheck]
    fn arbitrary_records_round_trip_through_the_binary_codec(r: ArbitraryRecord) -> bool {
        let schema = fixed_schema();
        let value = to_value(&r);
        match encode(&schema, &value) {
            Ok(bytes) => decode(&schema, &bytes).map(|d| d == value).unwrap_or(false),
            Err(_) => false,
        }
    }
}
