// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cryptographic primitives backing the secret vault (§4.8): `scrypt` for key
//! derivation, AES-256-GCM for ciphertext, PBKDF2-SHA512 for passcode
//! verification, `subtle` for constant-time comparison.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use scrypt::Params as ScryptParams;
use sha2::Sha512;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid scrypt parameters: n={n} r={r} p={p}")]
    InvalidScryptParams { n: u32, r: u32, p: u32 },
    #[error("key derivation failed")]
    Derivation,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
}

pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const PBKDF2_HASH_LEN: usize = 64;

/// The scrypt parameters pinned by configuration (§4.8, §6 defaults
/// N=16384, r=8, p=1).
#[derive(Debug, Clone, Copy)]
pub struct ScryptConfig {
    pub n_log2: u8,
    pub r: u32,
    pub p: u32,
}

impl ScryptConfig {
    pub fn from_n(n: u32, r: u32, p: u32) -> Result<Self, CryptoError> {
        if !n.is_power_of_two() || n < 2 {
            return Err(CryptoError::InvalidScryptParams { n, r, p });
        }
        Ok(Self {
            n_log2: n.trailing_zeros() as u8,
            r,
            p,
        })
    }
}

/// The derived AES-256 key, held zeroized-on-drop so no copy of it outlives
/// the vault's `lock()` call (§4.8: "the derived key never touches disk",
/// §8's memory-scan testable property).
#[derive(ZeroizeOnDrop)]
pub struct DerivedKey(#[zeroize(drop)] [u8; KEY_LEN]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    use rand_core::RngCore;
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derives the vault's AES key from a passcode and salt via scrypt.
pub fn derive_key(passcode: &str, salt: &[u8], config: ScryptConfig) -> Result<DerivedKey, CryptoError> {
    let params = ScryptParams::new(config.n_log2, config.r, config.p, KEY_LEN)
        .map_err(|_| CryptoError::InvalidScryptParams {
            n: 1u32 << config.n_log2,
            r: config.r,
            p: config.p,
        })?;
    let mut out = [0u8; KEY_LEN];
    scrypt::scrypt(passcode.as_bytes(), salt, &params, &mut out).map_err(|_| CryptoError::Derivation)?;
    Ok(DerivedKey(out))
}

/// PBKDF2-HMAC-SHA512 verification hash of the passcode, stored alongside
/// the salt so `unlock` can reject a wrong passcode without first deriving
/// the (expensive) scrypt key (§4.8).
pub fn passcode_verification_hash(passcode: &str, salt: &[u8], iterations: u32) -> [u8; PBKDF2_HASH_LEN] {
    let mut out = [0u8; PBKDF2_HASH_LEN];
    pbkdf2_hmac::<Sha512>(passcode.as_bytes(), salt, iterations, &mut out);
    out
}

/// Constant-time comparison — a mismatch must take the same time as a match
/// so timing cannot narrow down the passcode (§4.8: "fails in constant time
/// on mismatch").
pub fn verify_passcode(candidate: &[u8; PBKDF2_HASH_LEN], stored: &[u8; PBKDF2_HASH_LEN]) -> bool {
    candidate.ct_eq(stored).into()
}

pub struct Ciphertext {
    pub bytes: Vec<u8>,
    pub nonce: Vec<u8>,
}

pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> Result<Ciphertext, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let bytes = cipher.encrypt(&nonce, plaintext).map_err(|_| CryptoError::Encrypt)?;
    Ok(Ciphertext {
        bytes,
        nonce: nonce.to_vec(),
    })
}

pub fn decrypt(key: &DerivedKey, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Nonce::from_slice(nonce);
    cipher.decrypt(nonce, ciphertext).map_err(|_| CryptoError::Decrypt)
}

/// Re-encrypts one ciphertext under a new key, for `change_passcode`'s
/// single-transaction re-encryption pass (§4.8).
pub fn reencrypt(old_key: &DerivedKey, new_key: &DerivedKey, ciphertext: &[u8], nonce: &[u8]) -> Result<Ciphertext, CryptoError> {
    let plaintext = decrypt(old_key, ciphertext, nonce)?;
    let result = encrypt(new_key, &plaintext);
    let mut plaintext = plaintext;
    plaintext.zeroize();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> ScryptConfig {
        // n=16 keeps the test suite fast; production uses the configured
        // default of 16384 (§6).
        ScryptConfig::from_n(16, 1, 1).unwrap()
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let salt = generate_salt();
        let key = derive_key("hunter2", &salt, fast_config()).unwrap();
        let ciphertext = encrypt(&key, b"top secret value").unwrap();
        let plaintext = decrypt(&key, &ciphertext.bytes, &ciphertext.nonce).unwrap();
        assert_eq!(plaintext, b"top secret value");
    }

    #[test]
    fn decrypt_fails_with_wrong_key() {
        let salt = generate_salt();
        let key_a = derive_key("hunter2", &salt, fast_config()).unwrap();
        let key_b = derive_key("other-passcode", &salt, fast_config()).unwrap();
        let ciphertext = encrypt(&key_a, b"top secret value").unwrap();
        assert!(decrypt(&key_b, &ciphertext.bytes, &ciphertext.nonce).is_err());
    }

    #[test]
    fn verification_hash_matches_same_passcode_and_salt() {
        let salt = generate_salt();
        let hash_a = passcode_verification_hash("hunter2", &salt, 1000);
        let hash_b = passcode_verification_hash("hunter2", &salt, 1000);
        assert!(verify_passcode(&hash_a, &hash_b));
    }

    #[test]
    fn verification_hash_rejects_wrong_passcode() {
        let salt = generate_salt();
        let correct = passcode_verification_hash("hunter2", &salt, 1000);
        let wrong = passcode_verification_hash("wrong-passcode", &salt, 1000);
        assert!(!verify_passcode(&correct, &wrong));
    }

    #[test]
    fn reencrypt_preserves_plaintext_under_new_key() {
        let salt_a = generate_salt();
        let salt_b = generate_salt();
        let key_a = derive_key("hunter2", &salt_a, fast_config()).unwrap();
        let key_b = derive_key("hunter3", &salt_b, fast_config()).unwrap();
        let original = encrypt(&key_a, b"rotate me").unwrap();
        let rotated = reencrypt(&key_a, &key_b, &original.bytes, &original.nonce).unwrap();
        let plaintext = decrypt(&key_b, &rotated.bytes, &rotated.nonce).unwrap();
        assert_eq!(plaintext, b"rotate me");
    }
}
