//! The encoding table: content key to encoding keys and decoded size.

use crate::error::{CascError, Result};
use crate::ext::io_ext::{BinaryReadExt, RemainingExt, SeekExt};
use crate::keys::{ContentKey, EncodingKey, KEY_LENGTH};
use byteorder::{BigEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::Cursor;
use tracing::{debug, info, warn};

/// `EN` read as a big-endian integer.
const ENCODING_SIGNATURE: u16 = 0x454E;

/// The fixed header of an encoding file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingHeader {
    pub version: u8,
    pub ckey_size: u8,
    pub ekey_size: u8,
    pub ckey_page_size_kb: u16,
    pub ekey_page_size_kb: u16,
    pub ckey_page_count: u32,
    pub ekey_page_count: u32,
    pub espec_size: u32,
}

/// The encodings of one content key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingEntry {
    /// Decoded size of the content.
    pub size: u64,
    /// Encoding keys in table order.
    pub ekeys: Vec<EncodingKey>,
}

#[derive(Debug, Default)]
pub struct EncodingHandler {
    entries: HashMap<ContentKey, EncodingEntry>,
}

impl EncodingHandler {
    /// Parses a decoded encoding file.
    ///
    /// A content key listed twice keeps its first entry. A page whose MD5
    /// does not match the page table is still read.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(data);
        let header = Self::parse_header(&mut reader)?;
        debug!("Encoding header {header:?}");

        reader.skip(header.espec_size)?;

        let mut page_table = Vec::with_capacity(reader.capacity_for(header.ckey_page_count as usize, KEY_LENGTH + 16));
        for _ in 0..header.ckey_page_count {
            let first_key = reader.read_fixed::<KEY_LENGTH>()?;
            let checksum = reader.read_fixed::<16>()?;
            page_table.push((first_key, checksum));
        }

        let page_size = header.ckey_page_size_kb as usize * 1024;
        let pages_start = reader.position() as usize;
        let mut entries = HashMap::new();

        for (index, (_, checksum)) in page_table.iter().enumerate() {
            let start = pages_start + index * page_size;
            let page = data.get(start..start + page_size).ok_or_else(|| {
                CascError::InvalidData(format!("Encoding page {index} is truncated"))
            })?;
            if md5::compute(page).0 != *checksum {
                warn!("Encoding page {index} checksum mismatch");
            }
            Self::parse_page(page, &mut entries)?;
        }

        info!("Loaded {} encoding entries", entries.len());
        Ok(Self { entries })
    }

    fn parse_header(reader: &mut Cursor<&[u8]>) -> Result<EncodingHeader> {
        let signature = reader.read_u16::<BigEndian>()?;
        if signature != ENCODING_SIGNATURE {
            return Err(CascError::BadMagic {
                what: "encoding",
                found: signature as u32,
            });
        }
        let header = EncodingHeader {
            version: reader.read_u8()?,
            ckey_size: reader.read_u8()?,
            ekey_size: reader.read_u8()?,
            ckey_page_size_kb: reader.read_u16::<BigEndian>()?,
            ekey_page_size_kb: reader.read_u16::<BigEndian>()?,
            ckey_page_count: reader.read_u32::<BigEndian>()?,
            ekey_page_count: reader.read_u32::<BigEndian>()?,
            espec_size: {
                let _unknown = reader.read_u8()?;
                reader.read_u32::<BigEndian>()?
            },
        };

        if header.version != 1 {
            return Err(CascError::BadVersion {
                what: "encoding",
                version: header.version as u32,
            });
        }
        if header.ckey_size as usize != KEY_LENGTH || header.ekey_size as usize != KEY_LENGTH {
            return Err(CascError::InvalidData(format!(
                "Unsupported encoding key sizes {}/{}",
                header.ckey_size, header.ekey_size
            )));
        }
        Ok(header)
    }

    fn parse_page(page: &[u8], entries: &mut HashMap<ContentKey, EncodingEntry>) -> Result<()> {
        let mut reader = Cursor::new(page);
        // key count, 40-bit size, content key
        let min_entry = 1 + 5 + KEY_LENGTH;

        while (reader.position() as usize) + min_entry <= page.len() {
            let key_count = reader.read_u8()?;
            if key_count == 0 {
                break;
            }
            let size = reader.read_u40_be()?;
            let ckey = ContentKey(reader.read_fixed::<KEY_LENGTH>()?);
            let ekeys = (0..key_count)
                .map(|_| reader.read_fixed::<KEY_LENGTH>().map(EncodingKey))
                .collect::<std::io::Result<Vec<_>>>()?;

            entries.entry(ckey).or_insert(EncodingEntry { size, ekeys });
        }
        Ok(())
    }

    pub fn get_entry(&self, ckey: &ContentKey) -> Option<&EncodingEntry> {
        self.entries.get(ckey)
    }

    /// Every encoding key of `ckey`, in table order.
    pub fn get_ekeys(&self, ckey: &ContentKey) -> &[EncodingKey] {
        self.entries
            .get(ckey)
            .map(|e| e.ekeys.as_slice())
            .unwrap_or(&[])
    }

    /// The preferred encoding key of `ckey`: the first one listed.
    pub fn try_get_best_ekey(&self, ckey: &ContentKey) -> Option<EncodingKey> {
        self.entries.get(ckey)?.ekeys.first().copied()
    }

    pub fn get_size(&self, ckey: &ContentKey) -> Option<u64> {
        self.entries.get(ckey).map(|e| e.size)
    }

    pub fn contains(&self, ckey: &ContentKey) -> bool {
        self.entries.contains_key(ckey)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContentKey, &EncodingEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
