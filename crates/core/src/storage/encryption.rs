use std::fmt;
use std::ops::RangeInclusive;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};

use crate::errors::CoreError;

pub type Salt = [u8; 16];
pub type SnapshotNonce = [u8; 12];

const KEY_LEN: usize = 32;

const MEMORY_KIB: RangeInclusive<u32> = 8..=1_048_576;
const PASSES: RangeInclusive<u32> = 1..=20;
const LANES: RangeInclusive<u32> = 1..=16;

/// Argon2id cost, written into every snapshot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// KiB of memory per derivation.
    pub memory_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl KdfParams {
    /// Headers come from untrusted files: costs must stay within
    /// 8 KiB..=1 GiB of memory, 1..=20 passes and 1..=16 lanes.
    pub fn check_bounds(&self) -> Result<(), CoreError> {
        within("memory_cost", self.memory_cost, MEMORY_KIB)?;
        within("time_cost", self.time_cost, PASSES)?;
        within("parallelism", self.parallelism, LANES)
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: 64 * 1024,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

fn within(field: &str, value: u32, allowed: RangeInclusive<u32>) -> Result<(), CoreError> {
    if allowed.contains(&value) {
        return Ok(());
    }
    Err(CoreError::InvalidFileFormat(format!(
        "Snapshot header {field} = {value} is outside {}..={}",
        allowed.start(),
        allowed.end()
    )))
}

/// AES-256-GCM key for one snapshot, stretched from the owner's password.
#[derive(Clone, PartialEq, Eq)]
pub struct SnapshotKey([u8; KEY_LEN]);

impl SnapshotKey {
    /// Argon2id over `password` and the snapshot's own salt.
    pub fn derive(password: &str, salt: &Salt, params: &KdfParams) -> Result<Self, CoreError> {
        let cost = Params::new(
            params.memory_cost,
            params.time_cost,
            params.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| CoreError::Encryption(format!("Rejected Argon2 cost {params:?}: {e}")))?;

        let mut key = [0u8; KEY_LEN];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, cost)
            .hash_password_into(password.as_bytes(), salt, &mut key)
            .map_err(|e| CoreError::Encryption(format!("Could not stretch password: {e}")))?;
        Ok(Self(key))
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Ciphertext followed by its 16-byte tag.
    pub fn seal(&self, nonce: &SnapshotNonce, plaintext: &[u8]) -> Result<Vec<u8>, CoreError> {
        self.cipher()
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| CoreError::Encryption(format!("Could not seal snapshot: {e}")))
    }

    /// Fails with `Decryption` when the tag does not verify: wrong password
    /// or altered bytes.
    pub fn open(&self, nonce: &SnapshotNonce, sealed: &[u8]) -> Result<Vec<u8>, CoreError> {
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CoreError::Decryption)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SnapshotKey(..)")
    }
}

pub fn random_salt() -> Result<Salt, CoreError> {
    fill_random("salt")
}

pub fn random_nonce() -> Result<SnapshotNonce, CoreError> {
    fill_random("nonce")
}

fn fill_random<const N: usize>(what: &str) -> Result<[u8; N], CoreError> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| CoreError::Encryption(format!("OS randomness unavailable for {what}: {e}")))?;
    Ok(bytes)
}
