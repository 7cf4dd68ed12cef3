//! L1 — schema-driven binary/JSON codec (Avro-shaped) and the type
//! registry shared by storage and the query layer.

pub mod binary;
pub mod json;
pub mod key;
pub mod record;
pub mod registry;
pub mod schema;
pub mod value;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("value does not conform to schema: {0}")]
    TypeError(String),
    #[error("invalid or duplicate schema declaration: {0}")]
    SchemaError(String),
    #[error("unknown type or schema name: {0}")]
    NameError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
