use crate::errors::CoreError;
use super::encryption::KdfParams;

/// Magic bytes identifying a net worth ledger snapshot.
pub const MAGIC: &[u8; 4] = b"NWLG";

/// Current snapshot format version.
pub const CURRENT_VERSION: u16 = 1;

/// Header size in bytes:
/// magic(4) + version(2) + kdf_params(12) + salt(16) + nonce(12) + ciphertext_len(8) = 54
pub const HEADER_SIZE: usize = 54;

/// Header of an encrypted ledger snapshot.
#[derive(Debug)]
pub struct FileHeader {
    pub version: u16,
    pub kdf_params: KdfParams,
    pub salt: [u8; 16],
    pub nonce: [u8; 12],
    pub ciphertext_len: u64,
}

/// Write a complete encrypted snapshot to bytes.
///
/// Layout:
/// ```text
/// [NWLG: 4B] [version: 2B LE] [memory_cost: 4B LE] [time_cost: 4B LE]
/// [parallelism: 4B LE] [salt: 16B] [nonce: 12B] [ciphertext_len: 8B LE]
/// [ciphertext: variable]
/// ```
pub fn write_file(
    version: u16,
    kdf_params: &KdfParams,
    salt: &[u8; 16],
    nonce: &[u8; 12],
    ciphertext: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(&kdf_params.memory_cost.to_le_bytes());
    buf.extend_from_slice(&kdf_params.time_cost.to_le_bytes());
    buf.extend_from_slice(&kdf_params.parallelism.to_le_bytes());
    buf.extend_from_slice(salt);
    buf.extend_from_slice(nonce);
    buf.extend_from_slice(&(ciphertext.len() as u64).to_le_bytes());
    // Ciphertext carries the AES-GCM auth tag
    buf.extend_from_slice(ciphertext);
    buf
}

/// Sequential reader over the fixed-size header fields.
struct HeaderCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> HeaderCursor<'a> {
    fn take<const N: usize>(&mut self, field: &str) -> Result<[u8; N], CoreError> {
        let bytes = self
            .data
            .get(self.offset..self.offset + N)
            .and_then(|slice| <[u8; N]>::try_from(slice).ok())
            .ok_or_else(|| CoreError::InvalidFileFormat(format!("Failed to read {field}")))?;
        self.offset += N;
        Ok(bytes)
    }

    fn u16(&mut self, field: &str) -> Result<u16, CoreError> {
        self.take::<2>(field).map(u16::from_le_bytes)
    }

    fn u32(&mut self, field: &str) -> Result<u32, CoreError> {
        self.take::<4>(field).map(u32::from_le_bytes)
    }

    fn u64(&mut self, field: &str) -> Result<u64, CoreError> {
        self.take::<8>(field).map(u64::from_le_bytes)
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }
}

/// Parse the header from raw snapshot bytes.
/// Returns the header and the ciphertext slice.
pub fn read_file(data: &[u8]) -> Result<(FileHeader, &[u8]), CoreError> {
    if data.len() < HEADER_SIZE {
        return Err(CoreError::InvalidFileFormat(
            "File too small to be a ledger snapshot".into(),
        ));
    }

    let mut cursor = HeaderCursor { data, offset: 0 };

    if &cursor.take::<4>("magic bytes")? != MAGIC {
        return Err(CoreError::InvalidFileFormat(
            "Invalid magic bytes — not a ledger snapshot".into(),
        ));
    }

    let version = cursor.u16("version")?;
    if version == 0 || version > CURRENT_VERSION {
        return Err(CoreError::UnsupportedVersion(version));
    }

    let kdf_params = KdfParams {
        memory_cost: cursor.u32("KDF memory_cost")?,
        time_cost: cursor.u32("KDF time_cost")?,
        parallelism: cursor.u32("KDF parallelism")?,
    };
    // Crafted headers must not be able to demand absurd Argon2 work.
    kdf_params.check_bounds()?;

    let salt = cursor.take::<16>("salt")?;
    let nonce = cursor.take::<12>("nonce")?;
    let ciphertext_len = cursor.u64("ciphertext length")?;

    let body = cursor.rest();
    let len = usize::try_from(ciphertext_len).map_err(|_| {
        CoreError::InvalidFileFormat(format!("Ciphertext length {ciphertext_len} too large"))
    })?;
    if body.len() < len {
        return Err(CoreError::InvalidFileFormat(format!(
            "File truncated: expected {} bytes of ciphertext, got {}",
            len,
            body.len()
        )));
    }

    let header = FileHeader {
        version,
        kdf_params,
        salt,
        nonce,
        ciphertext_len,
    };

    Ok((header, &body[..len]))
}
