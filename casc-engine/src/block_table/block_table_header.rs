use crate::block_table::block_table_entry::BlockTableEntry;
use crate::error::{CascError, Result};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;

/// `BLTE` read as a big-endian integer.
pub const BLTE_SIGNATURE: u32 = 0x424C_5445;

/// Block Table Header
/// The header at the start of every BLTE blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTableHeader {
    /// Size of the header including signature and size. 0 means the blob is one frame.
    pub header_size: u32,
    /// The format flags of the table.
    pub table_format: u8,
    /// The frames, empty when `header_size` is 0.
    pub frames: Vec<BlockTableEntry>,
}

impl BlockTableHeader {
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let signature = reader.read_u32::<BigEndian>()?;
        if signature != BLTE_SIGNATURE {
            return Err(CascError::BadMagic {
                what: "BLTE",
                found: signature,
            });
        }

        let header_size = reader.read_u32::<BigEndian>()?;
        if header_size == 0 {
            return Ok(Self {
                header_size,
                table_format: 0,
                frames: Vec::new(),
            });
        }

        let table_format = reader.read_u8()?;
        let frame_count = reader.read_u24::<BigEndian>()?;

        let expected = 12 + frame_count * BlockTableEntry::SIZE;
        if header_size != expected {
            return Err(CascError::InvalidData(format!(
                "BLTE header size {header_size} does not match {frame_count} frames"
            )));
        }

        let frames = (0..frame_count)
            .map(|_| BlockTableEntry::read(reader))
            .collect::<std::io::Result<Vec<_>>>()?;

        Ok(Self {
            header_size,
            table_format,
            frames,
        })
    }

    /// Bytes taken by the signature, size field and table.
    pub fn encoded_length(&self) -> u64 {
        if self.header_size == 0 {
            8
        } else {
            self.header_size as u64
        }
    }

    /// Total decoded size, if the table declares it.
    pub fn content_size(&self) -> Option<u64> {
        if self.frames.is_empty() {
            None
        } else {
            Some(self.frames.iter().map(|f| f.content_size as u64).sum())
        }
    }
}
