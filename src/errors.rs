//! Crate-wide error type, composed from each layer's own taxonomy (spec
//! §7), the way the teacher's `GitError` composes lower-level causes via
//! `#[from]`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] crate::store::Error),
    #[error(transparent)]
    Codec(#[from] crate::codec::Error),
    #[error(transparent)]
    Zipper(#[from] crate::zipper::Error),
    #[error(transparent)]
    Query(#[from] crate::query::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
