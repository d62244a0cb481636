//! The header written in front of every blob in a local `data.NNN` file.

use crate::error::{CascError, Result};
use crate::ext::io_ext::BinaryReadExt;
use crate::keys::EncodingKey;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

/// Represents the header for a span of data in a CASC archive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CascSpanHeader {
    /// The encoding key, stored byte-reversed.
    pub(crate) encoding_key: [u8; 16],
    /// Size of the blob including this header.
    pub(crate) size: u32,
    /// Flags associated with the span.
    pub(crate) flags: u16,
    /// Jenkins hash of the span data.
    pub(crate) jenkins_hash: u32,
    /// Checksum for data integrity verification.
    pub(crate) checksum: u32,
}

impl CascSpanHeader {
    pub(crate) const SIZE: u64 = 30;

    pub(crate) fn read<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            encoding_key: reader.read_fixed::<16>()?,
            size: reader.read_u32::<LittleEndian>()?,
            flags: reader.read_u16::<LittleEndian>()?,
            jenkins_hash: reader.read_u32::<LittleEndian>()?,
            checksum: reader.read_u32::<LittleEndian>()?,
        })
    }

    /// The encoding key in its usual byte order.
    pub(crate) fn key(&self) -> EncodingKey {
        let mut key = self.encoding_key;
        key.reverse();
        EncodingKey(key)
    }

    /// Checks the header against the index entry that pointed at it.
    pub(crate) fn validate(&self, ekey: &EncodingKey, index_size: u32) -> Result<()> {
        if self.size != index_size {
            return Err(CascError::ChecksumMismatch(format!(
                "Span header for {ekey} declares {} bytes, index says {index_size}",
                self.size
            )));
        }
        let stored = self.key();
        if stored.0[..9] != ekey.0[..9] {
            return Err(CascError::ChecksumMismatch(format!(
                "Span header key {stored} does not match {ekey}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_reversed_key_and_checks_size() {
        let ekey = EncodingKey([
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
        ]);
        let mut raw = ekey.0;
        raw.reverse();
        let mut bytes = raw.to_vec();
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(&[0; 10]);

        let header = CascSpanHeader::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(header.key(), ekey);
        assert!(header.validate(&ekey, 100).is_ok());
        assert!(header.validate(&ekey, 99).is_err());
    }
}
