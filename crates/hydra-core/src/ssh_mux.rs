//! SSH multiplexer configuration plane (C7).
//!
//! Maintains one directory per user under a configured root, each holding
//! three files the multiplexer discovers by polling: `upstream`,
//! `authorized_keys`, and `id_ed25519`. Writes are atomic (write-temp-then-
//! rename) so the multiplexer never observes a half-written file.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::keys::KeyPair;

/// Errors writing the SSH multiplexer configuration directory.
#[derive(Debug, thiserror::Error)]
pub enum SshMuxError {
    #[error("failed to write '{path}': {reason}")]
    Write { path: String, reason: String },

    #[error("failed to set permissions on '{path}': {reason}")]
    Permissions { path: String, reason: String },

    #[error("failed to remove directory for '{username}': {reason}")]
    Remove { username: String, reason: String },
}

/// Derive the host-side forwarded SSH port for a username deterministically:
/// `22000 + (hash(username) mod 10000)`.
#[must_use]
pub fn derive_forwarded_port(username: &str) -> u32 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in username.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    crate::catalog::SSH_MUX_BASE_PORT + (hash % u64::from(crate::catalog::SSH_MUX_PORT_RANGE)) as u32
}

/// Writes and maintains per-user multiplexer config directories.
pub struct SshMuxWriter {
    root: PathBuf,
}

impl SshMuxWriter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn user_dir(&self, username: &str) -> PathBuf {
        self.root.join(username)
    }

    async fn atomic_write(path: &Path, contents: &str, mode: u32) -> Result<(), SshMuxError> {
        let tmp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| SshMuxError::Write { path: path.display().to_string(), reason: e.to_string() })?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| SshMuxError::Write { path: path.display().to_string(), reason: e.to_string() })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|e| SshMuxError::Permissions { path: path.display().to_string(), reason: e.to_string() })?;
        }
        let _ = mode;

        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| SshMuxError::Write { path: path.display().to_string(), reason: e.to_string() })?;
        Ok(())
    }

    /// Write all three files for a freshly provisioned user.
    ///
    /// # Errors
    ///
    /// Returns [`SshMuxError`] if any write fails.
    pub async fn init_user(&self, username: &str, upstream_host: &str, upstream_port: u32, keys: &KeyPair) -> Result<(), SshMuxError> {
        let dir = self.user_dir(username);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SshMuxError::Write { path: dir.display().to_string(), reason: e.to_string() })?;

        self.write_upstream(username, upstream_host, upstream_port).await?;
        self.write_keys(username, keys).await?;
        Ok(())
    }

    /// Rewrite only the `upstream` file, pointing at a new node/port
    /// following a migration.
    ///
    /// # Errors
    ///
    /// Returns [`SshMuxError`] if the write fails.
    pub async fn write_upstream(&self, username: &str, host: &str, port: u32) -> Result<(), SshMuxError> {
        let dir = self.user_dir(username);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| SshMuxError::Write { path: dir.display().to_string(), reason: e.to_string() })?;
        Self::atomic_write(&dir.join("upstream"), &format!("{host}:{port}\n"), 0o644).await
    }

    /// Rewrite the key files (used on init and on `regenerate_keys`).
    ///
    /// # Errors
    ///
    /// Returns [`SshMuxError`] if encoding or any write fails.
    pub async fn write_keys(&self, username: &str, keys: &KeyPair) -> Result<(), SshMuxError> {
        let dir = self.user_dir(username);
        let authorized_keys = format!("{}\n", keys.authorized_keys_line(&format!("{username}@hydra")));
        Self::atomic_write(&dir.join("authorized_keys"), &authorized_keys, 0o644).await?;

        let private_pem = keys
            .private_key_pem()
            .map_err(|reason| SshMuxError::Write { path: dir.join("id_ed25519").display().to_string(), reason })?;
        Self::atomic_write(&dir.join("id_ed25519"), &private_pem, 0o600).await
    }

    /// Remove a user's entire configuration directory.
    ///
    /// # Errors
    ///
    /// Returns [`SshMuxError`] if removal fails for a reason other than
    /// the directory already being absent.
    pub async fn remove_user(&self, username: &str) -> Result<(), SshMuxError> {
        match fs::remove_dir_all(self.user_dir(username)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SshMuxError::Remove { username: username.to_owned(), reason: e.to_string() }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn derive_forwarded_port_is_deterministic_and_in_range() {
        let a = derive_forwarded_port("alice");
        let b = derive_forwarded_port("alice");
        assert_eq!(a, b);
        assert!(a >= crate::catalog::SSH_MUX_BASE_PORT);
        assert!(a < crate::catalog::SSH_MUX_BASE_PORT + crate::catalog::SSH_MUX_PORT_RANGE);
    }

    #[test]
    fn different_usernames_usually_derive_different_ports() {
        assert_ne!(derive_forwarded_port("alice"), derive_forwarded_port("bob"));
    }

    #[tokio::test]
    async fn init_user_writes_all_three_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = SshMuxWriter::new(dir.path());
        let keys = KeyPair::generate();

        writer.init_user("carol", "hydra-devbox-carol", 22, &keys).await.expect("init");

        let user_dir = dir.path().join("carol");
        assert!(user_dir.join("upstream").exists());
        assert!(user_dir.join("authorized_keys").exists());
        assert!(user_dir.join("id_ed25519").exists());

        let upstream = tokio::fs::read_to_string(user_dir.join("upstream")).await.expect("read upstream");
        assert_eq!(upstream.trim(), "hydra-devbox-carol:22");
    }

    #[tokio::test]
    async fn remove_user_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = SshMuxWriter::new(dir.path());
        writer.remove_user("ghost").await.expect("remove missing is ok");
    }

    #[tokio::test]
    async fn migrate_rewrites_only_upstream() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = SshMuxWriter::new(dir.path());
        let keys = KeyPair::generate();
        writer.init_user("dina", "hydra-devbox-dina", 22, &keys).await.expect("init");

        let port = derive_forwarded_port("dina");
        writer.write_upstream("dina", "gpu_node_a", port).await.expect("migrate");

        let upstream = tokio::fs::read_to_string(dir.path().join("dina").join("upstream")).await.expect("read");
        assert_eq!(upstream.trim(), format!("gpu_node_a:{port}"));
    }
}
