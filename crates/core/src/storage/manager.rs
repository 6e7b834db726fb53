use log::debug;

use crate::errors::CoreError;
use crate::models::book::Book;

use super::encryption::{self, KdfParams, SnapshotKey};
use super::format;

/// Save/load a `Book` to/from encrypted bytes or files.
pub struct StorageManager;

impl StorageManager {
    /// Book → bincode → AES-256-GCM(Argon2id(password)) → NWLG bytes
    pub fn save_to_bytes(book: &Book, password: &str) -> Result<Vec<u8>, CoreError> {
        Self::save_with_params(book, password, &KdfParams::default())
    }

    /// Same as [`save_to_bytes`](Self::save_to_bytes) with explicit KDF cost.
    pub fn save_with_params(
        book: &Book,
        password: &str,
        kdf_params: &KdfParams,
    ) -> Result<Vec<u8>, CoreError> {
        kdf_params.check_bounds()?;

        let plaintext = bincode::serialize(book)
            .map_err(|e| CoreError::Serialization(format!("Failed to serialize book: {e}")))?;

        let salt = encryption::random_salt()?;
        let nonce = encryption::random_nonce()?;
        let ciphertext = SnapshotKey::derive(password, &salt, kdf_params)?.seal(&nonce, &plaintext)?;

        debug!(
            "Encrypted book version {} ({} accounts, {} marks)",
            book.version,
            book.accounts.len(),
            book.marks.len()
        );

        Ok(format::write_file(
            format::CURRENT_VERSION,
            kdf_params,
            &salt,
            &nonce,
            &ciphertext,
        ))
    }

    /// NWLG bytes → header → Argon2id(password, salt) → AES-256-GCM → bincode → Book
    pub fn load_from_bytes(data: &[u8], password: &str) -> Result<Book, CoreError> {
        let (header, ciphertext) = format::read_file(data)?;
        let plaintext = SnapshotKey::derive(password, &header.salt, &header.kdf_params)?
            .open(&header.nonce, ciphertext)?;

        bincode::deserialize(&plaintext)
            .map_err(|e| CoreError::Deserialization(format!("Failed to deserialize book: {e}")))
    }

    pub fn save_to_file(book: &Book, path: &str, password: &str) -> Result<(), CoreError> {
        let bytes = Self::save_to_bytes(book, password)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_from_file(path: &str, password: &str) -> Result<Book, CoreError> {
        let bytes = std::fs::read(path)?;
        Self::load_from_bytes(&bytes, password)
    }
}
