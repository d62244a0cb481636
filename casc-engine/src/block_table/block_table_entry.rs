use crate::ext::io_ext::BinaryReadExt;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{self, Read};

/// Represents one frame described by a BLTE block table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTableEntry {
    /// The encoded (compressed/encrypted) size of the frame, mode byte included.
    pub encoded_size: u32,
    /// The decoded (original) content size of the frame.
    pub content_size: u32,
    /// MD5 of the encoded frame.
    pub hash: [u8; 16],
}

impl BlockTableEntry {
    pub const SIZE: u32 = 24;

    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            encoded_size: reader.read_u32::<BigEndian>()?,
            content_size: reader.read_u32::<BigEndian>()?,
            hash: reader.read_fixed::<16>()?,
        })
    }
}
