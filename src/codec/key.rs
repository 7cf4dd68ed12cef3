//! Logical keys (spec §3 "Key"): `(kind: TypeName, id: Uuid | string)`,
//! serialized as a base64url (no padding) binary Avro encoding, globally
//! interned by that string form and compared lexicographically on it.
//! Grounded on `mdb/db/tree.py::Key`.

use std::fmt;
use std::io::Read;
use std::sync::{Arc, OnceLock};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use uuid::Uuid;

use super::binary::{read_varint, write_varint};
use super::schema::TypeName;
use super::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyId {
    Uuid(Uuid),
    String(String),
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Uuid(u) => write!(f, "{u}"),
            KeyId::String(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    kind: TypeName,
    id: KeyId,
    encoded: String,
}

/// An interned logical key. Cloning is cheap (`Arc`); two `Key`s with the
/// same string form are the same allocation (spec property 9).
#[derive(Clone)]
pub struct Key(Arc<Inner>);

fn interned() -> &'static DashMap<String, Key> {
    static INTERNED: OnceLock<DashMap<String, Key>> = OnceLock::new();
    INTERNED.get_or_init(DashMap::new)
}

impl Key {
    pub fn make(kind: impl Into<TypeName>, id: Option<KeyId>) -> Key {
        let kind = kind.into();
        let id = id.unwrap_or_else(|| KeyId::Uuid(Uuid::new_v4()));
        let encoded = encode_string(&kind, &id);
        interned()
            .entry(encoded.clone())
            .or_insert_with(|| {
                Key(Arc::new(Inner {
                    kind,
                    id,
                    encoded,
                }))
            })
            .clone()
    }

    pub fn parse(encoded: &str) -> Result<Key> {
        if let Some(existing) = interned().get(encoded) {
            return Ok(existing.clone());
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| Error::TypeError(format!("invalid key encoding: {e}")))?;
        let mut reader: &[u8] = &bytes;
        let (kind, id) = decode_body(&mut reader)?;
        let key = Key(Arc::new(Inner {
            kind,
            id,
            encoded: encoded.to_string(),
        }));
        Ok(interned().entry(encoded.to_string()).or_insert(key).clone())
    }

    pub fn kind(&self) -> &TypeName {
        &self.0.kind
    }

    pub fn id(&self) -> &KeyId {
        &self.0.id
    }

    pub fn as_str(&self) -> &str {
        &self.0.encoded
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.encoded)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", self.0.encoded)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.0.encoded == other.0.encoded
    }
}
impl Eq for Key {}

impl std::hash::Hash for Key {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.encoded.hash(state);
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.encoded.cmp(&other.0.encoded)
    }
}

fn encode_string(kind: &TypeName, id: &KeyId) -> String {
    let mut buf = Vec::new();
    let qualified = kind.qualified();
    write_varint(&mut buf, qualified.len() as u64);
    buf.extend_from_slice(qualified.as_bytes());
    match id {
        KeyId::Uuid(u) => {
            write_varint(&mut buf, 0);
            buf.extend_from_slice(u.as_bytes());
        }
        KeyId::String(s) => {
            write_varint(&mut buf, 1);
            write_varint(&mut buf, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
    }
    URL_SAFE_NO_PAD.encode(buf)
}

fn decode_body(r: &mut impl Read) -> Result<(TypeName, KeyId)> {
    let kind_len = read_varint(r)? as usize;
    let mut kind_buf = vec![0u8; kind_len];
    r.read_exact(&mut kind_buf)?;
    let kind = TypeName::new(String::from_utf8(kind_buf).map_err(|e| Error::TypeError(e.to_string()))?);

    let branch = read_varint(r)?;
    let id = match branch {
        0 => {
            let mut buf = [0u8; 16];
            r.read_exact(&mut buf)?;
            KeyId::Uuid(Uuid::from_bytes(buf))
        }
        1 => {
            let len = read_varint(r)? as usize;
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf)?;
            KeyId::String(String::from_utf8(buf).map_err(|e| Error::TypeError(e.to_string()))?)
        }
        other => return Err(Error::TypeError(format!("unknown key id branch {other}"))),
    };
    Ok((kind, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_string_form() {
        let k = Key::make("Foo", Some(KeyId::String("bar".to_string())));
        let s = k.to_string();
        let parsed = Key::parse(&s).unwrap();
        assert_eq!(k, parsed);
        assert_eq!(parsed.kind().to_string(), "Foo");
    }

    #[test]
    fn interning_returns_same_allocation() {
        let k1 = Key::make("Foo", Some(KeyId::String("bar".to_string())));
        let k2 = Key::make("Foo", Some(KeyId::String("bar".to_string())));
        assert!(Arc::ptr_eq(&k1.0, &k2.0));
    }

    #[test]
    fn parse_of_same_string_is_interned() {
        let k1 = Key::make("Foo", Some(KeyId::String("bar".to_string())));
        let s = k1.to_string();
        let k2 = Key::parse(&s).unwrap();
        assert!(Arc::ptr_eq(&k1.0, &k2.0));
    }

    #[test]
    fn ordering_is_lexicographic_on_string_form() {
        let a = Key::make("A", Some(KeyId::String("1".to_string())));
        let b = Key::make("A", Some(KeyId::String("2".to_string())));
        assert_eq!(a.to_string() < b.to_string(), a < b);
    }
}
