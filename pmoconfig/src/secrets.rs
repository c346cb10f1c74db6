//! Chiffrement des secrets stockés dans la configuration
//!
//! Les mots de passe des caméras peuvent être stockés chiffrés dans
//! `config.yaml` sous la forme `encrypted:BASE64`. La clé AES-256-GCM est
//! dérivée de l'identifiant de la machine (ou de `PMOSOAP_SECRET_KEY`), ce qui
//! rend le fichier non portable d'une machine à l'autre.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};
use std::env;

/// Préfixe des valeurs chiffrées
const SEALED_PREFIX: &str = "encrypted:";

/// Variable d'environnement prioritaire sur l'identifiant machine
const ENV_SECRET_KEY: &str = "PMOSOAP_SECRET_KEY";

const NONCE_LEN: usize = 12;

/// Clé de chiffrement AES-256.
#[derive(Clone)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Dérive une clé à partir d'un matériau quelconque.
    pub fn derive(material: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(material);
        hasher.update(b"pmosoap-secret-v1");
        Self(hasher.finalize().into())
    }

    /// Clé de la machine courante.
    pub fn machine() -> Result<Self> {
        if let Ok(material) = env::var(ENV_SECRET_KEY) {
            return Ok(Self::derive(material.as_bytes()));
        }
        Ok(Self::derive(machine_id()?.as_bytes()))
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

#[cfg(target_os = "linux")]
fn machine_id() -> Result<String> {
    for candidate in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(id) = std::fs::read_to_string(candidate) {
            let id = id.trim();
            if !id.is_empty() {
                return Ok(id.to_string());
            }
        }
    }
    Err(anyhow!("Failed to read machine-id (set {} instead)", ENV_SECRET_KEY))
}

#[cfg(target_os = "macos")]
fn machine_id() -> Result<String> {
    let output = std::process::Command::new("ioreg")
        .args(["-d2", "-c", "IOPlatformExpertDevice"])
        .output()?;
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .find(|line| line.contains("IOPlatformUUID"))
        .and_then(|line| line.split('"').nth(3))
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Failed to extract IOPlatformUUID from ioreg"))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn machine_id() -> Result<String> {
    Err(anyhow!(
        "No machine identifier on this platform (set {})",
        ENV_SECRET_KEY
    ))
}

/// Chiffre `plaintext` avec une clé explicite.
///
/// Le nonce est dérivé du texte clair : un même secret produit toujours la
/// même valeur, ce qui évite de réécrire `config.yaml` inutilement.
/// Format : `encrypted:` + base64(nonce || ciphertext).
pub fn seal_with_key(key: &SecretKey, plaintext: &str) -> Result<String> {
    let cipher =
        Aes256Gcm::new_from_slice(&key.0).map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hasher.update(b"pmosoap-nonce-v1");
    let digest = hasher.finalize();
    let nonce_bytes = &digest[..NONCE_LEN];

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce_bytes), plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(format!("{}{}", SEALED_PREFIX, BASE64.encode(&combined)))
}

/// Déchiffre une valeur produite par [`seal_with_key`].
pub fn reveal_with_key(key: &SecretKey, sealed: &str) -> Result<String> {
    let encoded = sealed
        .strip_prefix(SEALED_PREFIX)
        .ok_or_else(|| anyhow!("Invalid sealed secret (missing prefix)"))?;

    let combined = BASE64
        .decode(encoded)
        .map_err(|e| anyhow!("Invalid base64: {}", e))?;
    if combined.len() <= NONCE_LEN {
        return Err(anyhow!("Invalid sealed secret (too short)"));
    }
    let (nonce, ciphertext) = combined.split_at(NONCE_LEN);

    let cipher =
        Aes256Gcm::new_from_slice(&key.0).map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("Decryption failed (wrong machine or corrupted data): {}", e))?;

    String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
}

/// Chiffre avec la clé de la machine.
pub fn seal(plaintext: &str) -> Result<String> {
    seal_with_key(&SecretKey::machine()?, plaintext)
}

/// Retourne le secret en clair, qu'il soit stocké chiffré ou non.
pub fn reveal(value: &str) -> Result<String> {
    if is_sealed(value) {
        reveal_with_key(&SecretKey::machine()?, value)
    } else {
        Ok(value.to_string())
    }
}

pub fn is_sealed(value: &str) -> bool {
    value.starts_with(SEALED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_reveal() {
        let key = SecretKey::derive(b"test-machine");
        let sealed = seal_with_key(&key, "password123").unwrap();
        assert!(is_sealed(&sealed));
        assert!(!sealed.contains("password123"));
        assert_eq!(reveal_with_key(&key, &sealed).unwrap(), "password123");
    }

    #[test]
    fn test_sealing_is_deterministic() {
        let key = SecretKey::derive(b"test-machine");
        assert_eq!(
            seal_with_key(&key, "admin").unwrap(),
            seal_with_key(&key, "admin").unwrap()
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal_with_key(&SecretKey::derive(b"machine-a"), "secret").unwrap();
        assert!(reveal_with_key(&SecretKey::derive(b"machine-b"), &sealed).is_err());
    }

    #[test]
    fn test_plaintext_passes_through() {
        assert_eq!(reveal("plaintext").unwrap(), "plaintext");
        assert!(!is_sealed(""));
    }
}
