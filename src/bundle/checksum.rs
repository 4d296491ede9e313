//! Bundle checksum calculation.
//!
//! SHA-256 over bundle files, streamed in 8KB chunks so multi-gigabyte image
//! archives never have to fit in memory, plus the `<file>.sha256` sidecars
//! shipped next to each file.

use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// Suffix of sidecar checksum files.
pub const SIDECAR_SUFFIX: &str = "sha256";

/// Calculates the SHA-256 checksum of a file.
///
/// # Arguments
///
/// * `file_path` - Path to file to hash
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash (64 characters)
/// * `Err` - If the file cannot be opened or read
pub async fn sha256_file(file_path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(file_path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of an in-memory buffer, hex-encoded.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Sidecar path for `file`: `images.tar.gz` -> `images.tar.gz.sha256`.
pub fn sidecar_path(file: &Path) -> PathBuf {
    let mut name = file.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(SIDECAR_SUFFIX);
    file.with_file_name(name)
}

/// Sidecar content in `sha256sum` format, so `sha256sum -c` works on the target host.
pub fn sidecar_line(digest: &str, file_name: &str) -> String {
    format!("{digest}  {file_name}\n")
}

/// Digest recorded in a sidecar, if it parses.
pub fn parse_sidecar(content: &str) -> Option<&str> {
    let digest = content.split_whitespace().next()?;
    (digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())).then_some(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashes_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hello.txt");
        std::fs::write(&file, b"hello").unwrap();
        assert_eq!(
            sha256_file(&file).await.unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn sidecar_round_trip() {
        let digest = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        let line = sidecar_line(digest, "images.tar");
        assert_eq!(parse_sidecar(&line), Some(digest));
        assert_eq!(parse_sidecar("garbage"), None);
        assert_eq!(
            sidecar_path(Path::new("/b/images.tar.gz")),
            PathBuf::from("/b/images.tar.gz.sha256")
        );
    }
}
