//! Host key loading

use std::path::Path;

use anyhow::{Context, Result};
use russh_keys::key::KeyPair;

/// Load the server's private host key
///
/// Keys are never generated here. Create one with `ssh-keygen -t ed25519`.
pub fn load_host_key(path: &Path) -> Result<KeyPair> {
    tracing::debug!("Loading host key from {:?}", path);
    russh_keys::load_secret_key(path, None)
        .with_context(|| format!("couldn't load host key from {:?}", path))
}

/// Fingerprint of a host key's public half, for logging
pub fn fingerprint(key: &KeyPair) -> Option<String> {
    key.clone_public_key().ok().map(|public| public.fingerprint())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_host_key(&dir.path().join("ssh_host_ed25519_key")).unwrap_err();
        assert!(err.to_string().starts_with("couldn't load host key from"));
    }

    #[test]
    fn test_garbage_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a key\n").unwrap();
        assert!(load_host_key(file.path()).is_err());
    }

    #[test]
    fn test_fingerprint() {
        let key = KeyPair::generate_ed25519().unwrap();
        let fingerprint = fingerprint(&key).unwrap();
        assert!(!fingerprint.is_empty());
    }
}
