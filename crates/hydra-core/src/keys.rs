//! Ed25519 key material for the SSH multiplexer (§4.2).
//!
//! Each user has one key pair. The public half is injected into the
//! workload environment and copied into the multiplexer's
//! `authorized_keys` file; the private half authenticates the multiplexer
//! into the workload and is never returned to an HTTP caller after
//! creation.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

/// A freshly generated (or regenerated) key pair for one user.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random key pair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// The private key, PEM-encoded (PKCS#8), written with mode 0600.
    ///
    /// # Errors
    ///
    /// Returns an error string if PKCS#8 encoding fails (only possible on
    /// an allocation failure).
    pub fn private_key_pem(&self) -> Result<String, String> {
        self.signing_key
            .to_pkcs8_pem(ed25519_dalek::pkcs8::spki::der::pem::LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| e.to_string())
    }

    /// The public key in OpenSSH `authorized_keys` line format:
    /// `ssh-ed25519 <base64> <comment>`.
    #[must_use]
    pub fn authorized_keys_line(&self, comment: &str) -> String {
        let verifying = self.signing_key.verifying_key();
        let mut wire = Vec::new();
        write_ssh_string(&mut wire, b"ssh-ed25519");
        write_ssh_string(&mut wire, verifying.as_bytes());
        format!("ssh-ed25519 {} {comment}", BASE64.encode(&wire))
    }
}

/// Append a length-prefixed field to an SSH wire-format buffer (RFC 4253 §6.6).
fn write_ssh_string(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
    buf.extend_from_slice(field);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_produce_a_valid_authorized_keys_line() {
        let pair = KeyPair::generate();
        let line = pair.authorized_keys_line("alice@hydra");
        assert!(line.starts_with("ssh-ed25519 "));
        assert!(line.ends_with("alice@hydra"));
    }

    #[test]
    fn private_key_pem_round_trips_through_encoding() {
        let pair = KeyPair::generate();
        let pem = pair.private_key_pem().expect("encode pem");
        assert!(pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn regeneration_produces_a_different_key() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_ne!(a.authorized_keys_line("x"), b.authorized_keys_line("x"));
    }
}
