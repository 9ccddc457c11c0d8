// EN: src/core/crypto.rs

//! Authenticated encryption of the cache document.
//!
//! The key is derived from a stable machine identifier, so a cache file copied
//! to another machine cannot be read there. The store treats that case like
//! any other corruption and starts over with an empty cache.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use std::fs;
use std::process::Command;
use thiserror::Error;

/// Context string for BLAKE3 key derivation. Changing it invalidates every
/// existing cache file.
const KEY_CONTEXT: &str = "dynalias 2024-06-01 cache encryption v1";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

const LINUX_MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Sealed payload is not valid hex: {0}")]
    Encoding(#[from] hex::FromHexError),
    #[error("Sealed payload is too short ({0} bytes)")]
    Truncated(usize),
    #[error("Decryption failed: wrong machine key or tampered data")]
    Decrypt,
    #[error("Encryption failed")]
    Encrypt,
}

/// AES-256-GCM keyed for this machine.
pub struct CacheCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for CacheCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCipher").finish_non_exhaustive()
    }
}

impl CacheCipher {
    pub fn from_machine_id(machine_id: &str) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, machine_id.trim().as_bytes()),
        }
    }

    /// Builds the cipher from the identifier of the machine we are running on.
    pub fn for_this_machine() -> Self {
        Self::from_machine_id(&machine_id())
    }

    /// Encrypts `plaintext` under a fresh random nonce and returns
    /// `hex(nonce || ciphertext || tag)`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::Encrypt)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    /// Reverses [`CacheCipher::seal`], verifying the authentication tag.
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>, CryptoError> {
        let bytes = hex::decode(sealed.trim())?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Truncated(bytes.len()));
        }
        let (nonce, ciphertext) = bytes
            .split_at_checked(NONCE_LEN)
            .ok_or(CryptoError::Truncated(bytes.len()))?;

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::Decrypt)?;
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }
}

/// Returns a stable identifier for this machine.
///
/// Lookup order: the systemd/dbus machine id on Linux, `IOPlatformUUID` on
/// macOS, the `MachineGuid` registry value on Windows. When none is
/// available the home directory and user name are combined instead, which is
/// stable per account but weaker.
pub fn machine_id() -> String {
    let found = if cfg!(target_os = "macos") {
        macos_platform_uuid()
    } else if cfg!(target_os = "windows") {
        windows_machine_guid()
    } else {
        linux_machine_id()
    };

    found.unwrap_or_else(|| {
        log::warn!("No machine identifier found; deriving the cache key from the user profile.");
        let home = dirs::home_dir()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        format!("{home}:{user}")
    })
}

fn linux_machine_id() -> Option<String> {
    LINUX_MACHINE_ID_PATHS.iter().find_map(|path| {
        fs::read_to_string(path)
            .ok()
            .map(|content| content.trim().to_string())
            .filter(|id| !id.is_empty())
    })
}

fn macos_platform_uuid() -> Option<String> {
    let output = Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    // Line shape: "IOPlatformUUID" = "XXXXXXXX-XXXX-..."
    stdout
        .lines()
        .find(|line| line.contains("IOPlatformUUID"))
        .and_then(|line| line.rsplit('"').nth(1))
        .map(str::to_string)
}

fn windows_machine_guid() -> Option<String> {
    let output = Command::new("reg")
        .args([
            "query",
            r"HKLM\SOFTWARE\Microsoft\Cryptography",
            "/v",
            "MachineGuid",
            "/reg:64",
        ])
        .output()
        .ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    // Line shape: "    MachineGuid    REG_SZ    xxxxxxxx-..."
    stdout
        .lines()
        .find(|line| line.contains("MachineGuid"))
        .and_then(|line| line.split_whitespace().last())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_then_open_is_lossless() {
        // --- Setup ---
        let cipher = CacheCipher::from_machine_id("machine-a");
        let payload = br#"{"_history":["ssh prod"],"servers":{"timestamp":1,"data":[]}}"#;

        // --- Execute ---
        let sealed = cipher.seal(payload).unwrap();
        let opened = cipher.open(&sealed).unwrap();

        // --- Assert ---
        assert_eq!(opened, payload.to_vec());
        assert!(!sealed.contains("ssh prod"));
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let cipher = CacheCipher::from_machine_id("machine-a");
        let first = cipher.seal(b"same").unwrap();
        let second = cipher.seal(b"same").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_other_machine_cannot_open() {
        // --- Setup ---
        let sealed = CacheCipher::from_machine_id("machine-a").seal(b"secret").unwrap();

        // --- Execute ---
        let result = CacheCipher::from_machine_id("machine-b").open(&sealed);

        // --- Assert ---
        assert!(matches!(result, Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_tampered_and_truncated_payloads_are_rejected() {
        let cipher = CacheCipher::from_machine_id("machine-a");
        let mut sealed = cipher.seal(b"secret").unwrap();
        let last = sealed.pop().unwrap();
        sealed.push(if last == '0' { '1' } else { '0' });

        assert!(matches!(cipher.open(&sealed), Err(CryptoError::Decrypt)));
        assert!(matches!(cipher.open("abcd"), Err(CryptoError::Truncated(2))));
        assert!(matches!(cipher.open("zz"), Err(CryptoError::Encoding(_))));
    }

    #[test]
    fn test_machine_id_is_stable() {
        assert_eq!(machine_id(), machine_id());
    }
}
