use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The underlying storage failed. Never retried.
    #[error("storage error on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The index file exists but its contents can't be interpreted.
    #[error("corrupt index: {reason}")]
    CorruptIndex { reason: String },

    /// An insert would need a slot at or past `IndexOptions::max_slots`.
    /// `index` is `usize::MAX` if the slot number itself overflowed.
    #[error("index too deep: slot {index} is past the limit of {max_slots} slots")]
    IndexTooDeep { index: usize, max_slots: usize },

    #[error("invalid key {0:?}")]
    InvalidKey(String),

    #[error("user {0:?} already exists")]
    UserExists(String),

    #[error("bad options file {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub(crate) fn storage<P: Into<PathBuf>>(path: P) -> impl FnOnce(io::Error) -> Error {
        let path = path.into();
        move |source| Error::Storage { path, source }
    }

    pub(crate) fn corrupt<S: Into<String>>(reason: S) -> Error {
        Error::CorruptIndex {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
