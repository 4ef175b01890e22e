//! Checksummed framing for WAL and snapshot files.
//!
//! Every file starts with a 5-byte header (magic + version). Records follow as
//! frames:
//!
//! ```text
//! [length: 4 bytes LE][payload: N bytes JSON][crc32(payload): 4 bytes LE]
//! ```

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current on-disk format version.
pub const FORMAT_VERSION: u8 = 1;

/// Magic bytes identifying questionnaire data files.
pub const MAGIC: [u8; 4] = *b"SRVY";

/// Header length in bytes.
pub const HEADER_LEN: u64 = 5;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Serialize `value` into a single frame.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        IoError::new(ErrorKind::InvalidData, "frame payload exceeds u32 length")
    })?;

    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&checksum(&payload).to_le_bytes());
    Ok(out)
}

/// Read one frame and deserialize it, verifying the checksum.
///
/// # Errors
/// - `UnexpectedEof` when the frame is cut short (torn write)
/// - `InvalidData` on checksum mismatch, oversized length or bad JSON
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("frame size {len} exceeds maximum {MAX_FRAME_LEN}"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(&payload);
    if stored != computed {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored:08x}, computed={computed:08x}"),
        ));
    }

    serde_json::from_slice(&payload)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

/// Write the file header.
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[FORMAT_VERSION])
}

/// Read and validate the file header.
pub fn read_header(reader: &mut impl Read) -> IoResult<()> {
    let mut header = [0u8; HEADER_LEN as usize];
    reader.read_exact(&mut header)?;
    if header[..4] != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: {:?}", &header[..4]),
        ));
    }
    if header[4] != FORMAT_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!(
                "unsupported format version: {} (expected {FORMAT_VERSION})",
                header[4]
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn detects_corruption() {
        let mut encoded = encode(&"order matters".to_string()).unwrap();
        encoded[6] ^= 0xFF;

        let err = decode::<String>(&mut Cursor::new(encoded)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn torn_frame_is_unexpected_eof() {
        let encoded = encode(&vec![1u64, 2, 3]).unwrap();
        let torn = &encoded[..encoded.len() - 2];

        let err = decode::<Vec<u64>>(&mut Cursor::new(torn)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn rejects_oversized_frame() {
        let bad = 200_000_000u32.to_le_bytes().to_vec();
        let err = decode::<String>(&mut Cursor::new(bad)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn header_validation() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert!(read_header(&mut Cursor::new(buf.clone())).is_ok());

        buf[0] = b'X';
        assert!(read_header(&mut Cursor::new(buf)).is_err());
    }
}
