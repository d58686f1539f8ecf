//! File digests.
//!
//! The service keys everything on the SHA-256 of the file contents, so a
//! [`Sha256`] is both the lookup key and the correlation id for uploads.

use crate::error::{ErrorKind, Result};
use derive_more::Display;
use sha2::Digest;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::instrument;

/// Read buffer for streaming digests.
const CHUNK_SIZE: usize = 64 * 1024;

/// A validated, lowercase hex SHA-256 digest.
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash)]
pub struct Sha256(String);

impl Sha256 {
    /// Parse a 64 character hex digest (any case).
    pub fn parse(value: impl AsRef<str>) -> Result<Self> {
        let value = value.as_ref().trim();
        if value.len() != 64 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            exn::bail!(ErrorKind::InvalidDigest(value.to_string()));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-facing report page for this digest.
    pub fn permalink(&self, gui_url: &str) -> String {
        format!("{}/gui/file/{}", gui_url.trim_end_matches('/'), self.0)
    }
}
impl AsRef<str> for Sha256 {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Produces the digest of a file on disk.
///
/// Blocking: callers on an async runtime should go through
/// [`spawn_blocking`](tokio::task::spawn_blocking).
pub trait FileHasher: Send + Sync {
    fn hash_file(&self, path: &Path) -> Result<Sha256>;
}

/// Streaming SHA-256 over the file contents.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256Hasher;

impl FileHasher for Sha256Hasher {
    fn hash_file(&self, path: &Path) -> Result<Sha256> {
        sha256_file(path)
    }
}

/// Stream `path` through SHA-256 in fixed-size chunks.
#[instrument(level = "debug", skip(path), fields(path = %path.display()))]
pub fn sha256_file(path: &Path) -> Result<Sha256> {
    // File::open happily opens directories on unix; reads then fail with a
    // far less helpful error.
    if path.is_dir() {
        exn::bail!(ErrorKind::NotAFile(path.to_path_buf()));
    }
    let mut file = File::open(path).map_err(|e| ErrorKind::from_io(e, path))?;
    sha256_reader(&mut file)
}

/// Digest anything readable without buffering it all in memory.
pub fn sha256_reader(reader: &mut impl Read) -> Result<Sha256> {
    let mut hasher = sha2::Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ErrorKind::Io(e).into()),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(Sha256(hex::encode(hasher.finalize())))
}
