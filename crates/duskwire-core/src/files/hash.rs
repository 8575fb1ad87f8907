//! Background file hashing.
//!
//! Hashing a large file is CPU- and disk-bound, so it runs on the blocking
//! pool and posts its result back to the reactor as an event. The caller
//! keeps the file record alive across the task's lifetime; results arriving
//! after the file left the HASHING state are dropped.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Compute the SHA-256 of a file's content on the blocking pool.
pub async fn hash_file(path: PathBuf) -> Result<[u8; 32]> {
    tokio::task::spawn_blocking(move || -> Result<[u8; 32]> {
        let mut file = std::fs::File::open(&path)
            .map_err(|e| Error::Io(format!("open {} for hashing: {}", path.display(), e)))?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)
            .map_err(|e| Error::Io(format!("read {} for hashing: {}", path.display(), e)))?;
        Ok(hasher.finalize().into())
    })
    .await
    .map_err(|_| Error::Io("hash task panicked".into()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[tokio::test]
    async fn hashes_file_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"hi!\n").expect("write");

        let expected: [u8; 32] = Sha256::digest(b"hi!\n").into();
        let got = hash_file(path).await.expect("hash");
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = hash_file(dir.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
