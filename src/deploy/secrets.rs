//! Scoped secret writing. Credentials reach disk only through [`write_secret_file`].

use crate::fs::write_atomic;
use secrecy::{ExposeSecret, SecretString};
use std::io;
use std::path::Path;

/// Owner read/write only.
pub const SECRET_FILE_MODE: u32 = 0o600;

/// Atomically writes a secret with the requested permission bits.
pub fn write_secret_file(path: &Path, content: &SecretString, mode: u32) -> io::Result<()> {
    write_atomic(path, content.expose_secret().as_bytes(), Some(mode))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::fs::mode_of;

    #[test]
    fn secret_file_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splunk_password");
        let secret = SecretString::from("Sup3r-Secret!".to_string());
        write_secret_file(&path, &secret, SECRET_FILE_MODE).unwrap();
        assert_eq!(mode_of(&path), Some(0o600));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Sup3r-Secret!");
    }
}
