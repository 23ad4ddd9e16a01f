//! Framing codec for values in the file-backed local store.
//!
//! Each key file holds one frame:
//!
//! ```text
//! [magic: 4 bytes "LDGK"][version: 1 byte][length: 4 bytes LE][utf-8 value: N bytes][crc32: 4 bytes LE]
//! ```
//!
//! A torn or bit-flipped file fails the length or CRC check and is reported
//! as corrupted instead of being handed to the JSON decoder.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult};

use crc32fast::Hasher;

/// Current codec version.
const CODEC_VERSION: u8 = 1;

/// Magic bytes to identify ledgerkeep key files.
pub const MAGIC: [u8; 4] = *b"LDGK";

/// Bytes added around every value.
pub const FRAME_OVERHEAD: usize = 4 + 1 + 4 + 4;

/// Sanity ceiling on a single frame (256 MB).
const MAX_VALUE_SIZE: usize = 256 * 1024 * 1024;

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

/// Frames a value.
///
/// # Errors
/// Returns `InvalidData` if the value exceeds the frame ceiling.
pub fn encode(value: &str) -> IoResult<Vec<u8>> {
    let data = value.as_bytes();
    if data.len() > MAX_VALUE_SIZE {
        return Err(invalid(format!(
            "value size {} exceeds maximum {MAX_VALUE_SIZE}",
            data.len()
        )));
    }

    let mut hasher = Hasher::new();
    hasher.update(data);
    let crc = hasher.finalize();

    #[allow(clippy::cast_possible_truncation)]
    let len = data.len() as u32;

    let mut out = Vec::with_capacity(FRAME_OVERHEAD + data.len());
    out.extend_from_slice(&MAGIC);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Reads and verifies one frame.
///
/// # Errors
/// - bad magic or unsupported version
/// - truncated frame
/// - checksum mismatch (data corrupted)
/// - value is not UTF-8
pub fn decode(reader: &mut impl Read) -> IoResult<String> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(invalid(format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}")));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(invalid(format!(
            "unsupported codec version: {} (expected {CODEC_VERSION})",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_VALUE_SIZE {
        return Err(invalid(format!("entry size {len} exceeds maximum {MAX_VALUE_SIZE}")));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed_crc = hasher.finalize();
    if stored_crc != computed_crc {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x} (data corrupted)"
        )));
    }

    String::from_utf8(data).map_err(|e| invalid(format!("value is not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_roundtrip() {
        let encoded = encode("[{\"id\":\"x\"}]").unwrap();
        assert_eq!(encoded.len(), FRAME_OVERHEAD + 12);
        let decoded = decode(&mut Cursor::new(encoded)).unwrap();
        assert_eq!(decoded, "[{\"id\":\"x\"}]");
    }

    #[test]
    fn test_detects_corruption() {
        let mut encoded = encode("test data").unwrap();
        encoded[10] ^= 0xFF;
        let err = decode(&mut Cursor::new(encoded)).unwrap_err();
        assert!(err.to_string().contains("CRC"));
    }

    #[test]
    fn test_detects_truncation() {
        let encoded = encode("some longer value").unwrap();
        let cut = &encoded[..encoded.len() - 3];
        let err = decode(&mut Cursor::new(cut)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_rejects_oversized_entry() {
        let mut bad = MAGIC.to_vec();
        bad.push(CODEC_VERSION);
        bad.extend_from_slice(&(300_000_000u32).to_le_bytes());
        let err = decode(&mut Cursor::new(bad)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_rejects_foreign_file() {
        let err = decode(&mut Cursor::new(b"{\"not\":\"framed\"}".to_vec())).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }
}
