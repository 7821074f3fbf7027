//! Journal record types and serialization.

use crate::error::{StorageError, StorageResult};

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"STRJ";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + key length (4) + value length (4)
pub(crate) const HEADER_SIZE: usize = 15;

pub(crate) const CRC_SIZE: usize = 4;

const TYPE_PUT: u8 = 1;
const TYPE_DELETE: u8 = 2;

/// A single journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// Store a value under a key.
    Put {
        /// Record key.
        key: String,
        /// Record value.
        value: Vec<u8>,
    },
    /// Remove a key.
    Delete {
        /// Record key.
        key: String,
    },
}

impl JournalRecord {
    /// Returns the record key.
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }

    /// Returns the encoded size of a put record for `key` and `value`.
    pub(crate) fn put_size(key: &str, value: &[u8]) -> u64 {
        (HEADER_SIZE + key.len() + value.len() + CRC_SIZE) as u64
    }

    /// Serializes the record with its envelope and trailing CRC.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or value does not fit a 4-byte length.
    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        let (record_type, key, value): (u8, &str, &[u8]) = match self {
            Self::Put { key, value } => (TYPE_PUT, key.as_str(), value.as_slice()),
            Self::Delete { key } => (TYPE_DELETE, key.as_str(), &[][..]),
        };

        let key_len = u32::try_from(key.len())
            .map_err(|_| StorageError::Corrupted("journal key too large".into()))?;
        let value_len = u32::try_from(value.len())
            .map_err(|_| StorageError::Corrupted("journal value too large".into()))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + key.len() + value.len() + CRC_SIZE);
        data.extend_from_slice(&JOURNAL_MAGIC);
        data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        data.push(record_type);
        data.extend_from_slice(&key_len.to_le_bytes());
        data.extend_from_slice(&value_len.to_le_bytes());
        data.extend_from_slice(key.as_bytes());
        data.extend_from_slice(value);

        // CRC32 over everything before it
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        Ok(data)
    }

    /// Decodes one record from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` ends before the record does (a torn
    /// write), and the record with its encoded length otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] on a bad magic, unknown version,
    /// unknown record type, invalid UTF-8 key or CRC mismatch.
    pub fn decode(buf: &[u8]) -> StorageResult<Option<(Self, usize)>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        if buf[0..4] != JOURNAL_MAGIC {
            return Err(StorageError::Corrupted("bad journal magic".into()));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != JOURNAL_VERSION {
            return Err(StorageError::Corrupted(format!(
                "unsupported journal version {version}"
            )));
        }

        let record_type = buf[6];
        let key_len = u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]) as usize;
        let value_len = u32::from_le_bytes([buf[11], buf[12], buf[13], buf[14]]) as usize;

        let body_end = HEADER_SIZE + key_len + value_len;
        let total = body_end + CRC_SIZE;
        if buf.len() < total {
            return Ok(None);
        }

        let stored_crc = u32::from_le_bytes([
            buf[body_end],
            buf[body_end + 1],
            buf[body_end + 2],
            buf[body_end + 3],
        ]);
        let actual_crc = compute_crc32(&buf[..body_end]);
        if stored_crc != actual_crc {
            return Err(StorageError::Corrupted(format!(
                "checksum mismatch: expected {stored_crc:08x}, got {actual_crc:08x}"
            )));
        }

        let key = std::str::from_utf8(&buf[HEADER_SIZE..HEADER_SIZE + key_len])
            .map_err(|_| StorageError::Corrupted("journal key is not UTF-8".into()))?
            .to_string();

        let record = match record_type {
            TYPE_PUT => Self::Put {
                key,
                value: buf[HEADER_SIZE + key_len..body_end].to_vec(),
            },
            TYPE_DELETE => Self::Delete { key },
            other => {
                return Err(StorageError::Corrupted(format!(
                    "unknown journal record type {other}"
                )))
            }
        };

        Ok(Some((record, total)))
    }
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
