//! Bookmark persistence
//!
//! One file per client name holding the encoded copy of the last envelope
//! delivered to the caller. It is rewritten on every delivery and read once
//! when an archive replay is requested.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use codec::CodecError;
use thiserror::Error;
use types::Envelope;

const BOOKMARK_EXTENSION: &str = "bookmark";

#[derive(Debug, Error)]
pub enum BookmarkError {
    #[error("Bookmark I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Bookmark at {path} is unreadable: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("Bookmark at {path} is empty")]
    Empty { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct BookmarkStore {
    dir: PathBuf,
}

impl BookmarkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<client_name>.bookmark`
    pub fn path_for(&self, client_name: &str) -> PathBuf {
        self.dir
            .join(format!("{client_name}.{BOOKMARK_EXTENSION}"))
    }

    pub fn save(&self, client_name: &str, envelope: &Envelope) -> Result<(), BookmarkError> {
        let path = self.path_for(client_name);
        let bytes = codec::encode(envelope).map_err(|source| BookmarkError::Codec {
            path: path.clone(),
            source,
        })?;
        self.save_encoded(client_name, &bytes)
    }

    /// Write an already encoded envelope, truncating any previous bookmark.
    pub fn save_encoded(&self, client_name: &str, bytes: &[u8]) -> Result<(), BookmarkError> {
        let path = self.path_for(client_name);
        fs::create_dir_all(&self.dir).map_err(|source| BookmarkError::Io {
            path: self.dir.clone(),
            source,
        })?;
        fs::write(&path, bytes).map_err(|source| BookmarkError::Io { path, source })
    }

    pub fn load(&self, client_name: &str) -> Result<Envelope, BookmarkError> {
        let path = self.path_for(client_name);
        let bytes = fs::read(&path).map_err(|source| BookmarkError::Io {
            path: path.clone(),
            source,
        })?;
        if bytes.is_empty() {
            return Err(BookmarkError::Empty { path });
        }
        codec::decode(&bytes).map_err(|source| BookmarkError::Codec { path, source })
    }
}
