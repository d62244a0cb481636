//! The download manifest (`DL`): every encoding key of a build with its
//! download priority and tags.

use crate::error::{CascError, Result};
use crate::ext::io_ext::{BinaryReadExt, RemainingExt};
use crate::install_handler::ManifestTag;
use crate::keys::{EncodingKey, KEY_LENGTH};
use byteorder::{BigEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::Cursor;
use tracing::{debug, info};

/// `DL` read as a big-endian integer.
const DOWNLOAD_SIGNATURE: u16 = 0x444C;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadHeader {
    pub version: u8,
    pub ekey_size: u8,
    pub has_checksum: bool,
    pub entry_count: u32,
    pub tag_count: u16,
    pub flag_size: u8,
    pub base_priority: i8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadEntry {
    pub ekey: EncodingKey,
    /// Encoded size of the blob.
    pub size: u64,
    /// Priority relative to the header's base priority; lower downloads first.
    pub priority: i8,
    pub checksum: Option<u32>,
    pub flags: Vec<u8>,
    pub tags: Vec<String>,
}

#[derive(Debug, Default)]
pub struct DownloadHandler {
    entries: Vec<DownloadEntry>,
    by_ekey: HashMap<EncodingKey, usize>,
    tags: Vec<ManifestTag>,
}

impl DownloadHandler {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(data);
        let header = Self::parse_header(&mut reader)?;
        debug!("Download header {header:?}");

        let mut entries = Vec::with_capacity(reader.capacity_for(header.entry_count as usize, KEY_LENGTH + 6));
        for _ in 0..header.entry_count {
            let ekey = EncodingKey(reader.read_fixed::<KEY_LENGTH>()?);
            let size = reader.read_u40_be()?;
            let priority = reader.read_i8()?.wrapping_sub(header.base_priority);
            let checksum = if header.has_checksum {
                Some(reader.read_u32::<BigEndian>()?)
            } else {
                None
            };
            let flags = reader.read_bytes(header.flag_size as usize)?;
            entries.push(DownloadEntry {
                ekey,
                size,
                priority,
                checksum,
                flags,
                tags: Vec::new(),
            });
        }

        let tags = ManifestTag::read_all(&mut reader, header.tag_count, header.entry_count)?;
        for (index, entry) in entries.iter_mut().enumerate() {
            entry.tags = tags
                .iter()
                .filter(|t| t.has_entry(index))
                .map(|t| t.name.clone())
                .collect();
        }

        let mut by_ekey = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            by_ekey.entry(entry.ekey).or_insert(index);
        }

        info!("Loaded {} download entries", entries.len());
        Ok(DownloadHandler {
            entries,
            by_ekey,
            tags,
        })
    }

    fn parse_header(reader: &mut Cursor<&[u8]>) -> Result<DownloadHeader> {
        let signature = reader.read_u16::<BigEndian>()?;
        if signature != DOWNLOAD_SIGNATURE {
            return Err(CascError::BadMagic {
                what: "download manifest",
                found: signature as u32,
            });
        }
        let version = reader.read_u8()?;
        if !(1..=3).contains(&version) {
            return Err(CascError::BadVersion {
                what: "download manifest",
                version: version as u32,
            });
        }
        let ekey_size = reader.read_u8()?;
        if ekey_size as usize != KEY_LENGTH {
            return Err(CascError::InvalidData(format!(
                "Unsupported download key size {ekey_size}"
            )));
        }
        let has_checksum = reader.read_u8()? != 0;
        let entry_count = reader.read_u32::<BigEndian>()?;
        let tag_count = reader.read_u16::<BigEndian>()?;

        let mut flag_size = 0;
        let mut base_priority = 0;
        if version >= 2 {
            flag_size = reader.read_u8()?;
            if version >= 3 {
                base_priority = reader.read_i8()?;
                let _unknown = reader.read_fixed::<3>()?;
            }
        }

        Ok(DownloadHeader {
            version,
            ekey_size,
            has_checksum,
            entry_count,
            tag_count,
            flag_size,
            base_priority,
        })
    }

    pub fn get_entries(&self) -> &[DownloadEntry] {
        &self.entries
    }

    pub fn get_entry(&self, ekey: &EncodingKey) -> Option<&DownloadEntry> {
        self.by_ekey.get(ekey).map(|&i| &self.entries[i])
    }

    pub fn tags(&self) -> &[ManifestTag] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn download_manifest(version: u8, entries: &[([u8; 16], u64, i8)], tags: &[(&str, Vec<usize>)]) -> Vec<u8> {
        let mut data = b"DL".to_vec();
        data.extend_from_slice(&[version, 16, 1]);
        data.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        data.extend_from_slice(&(tags.len() as u16).to_be_bytes());
        if version >= 2 {
            data.push(1);
            if version >= 3 {
                data.push(1u8);
                data.extend_from_slice(&[0, 0, 0]);
            }
        }
        for (ekey, size, priority) in entries {
            data.extend_from_slice(ekey);
            data.extend_from_slice(&size.to_be_bytes()[3..]);
            data.push(*priority as u8);
            data.extend_from_slice(&0xDEADBEEFu32.to_be_bytes());
            if version >= 2 {
                data.push(0x80);
            }
        }
        for (name, members) in tags {
            data.extend_from_slice(name.as_bytes());
            data.push(0);
            data.extend_from_slice(&2u16.to_be_bytes());
            let mut mask = vec![0u8; entries.len().div_ceil(8)];
            for &i in members {
                mask[i / 8] |= 0x80 >> (i % 8);
            }
            data.extend_from_slice(&mask);
        }
        data
    }

    #[test]
    fn reads_v3_entries_and_tags() {
        let data = download_manifest(3, &[([1; 16], 4096, 3), ([2; 16], 10, 1)], &[("Windows", vec![1])]);
        let download = DownloadHandler::parse(&data).unwrap();
        assert_eq!(download.len(), 2);

        let first = download.get_entry(&EncodingKey([1; 16])).unwrap();
        assert_eq!(first.size, 4096);
        assert_eq!(first.priority, 2);
        assert_eq!(first.checksum, Some(0xDEADBEEF));
        assert_eq!(first.flags, vec![0x80]);
        assert!(first.tags.is_empty());
        assert_eq!(download.get_entry(&EncodingKey([2; 16])).unwrap().tags, vec!["Windows"]);
    }

    #[test]
    fn reads_v1_without_flags() {
        let data = download_manifest(1, &[([5; 16], 7, 0)], &[]);
        let download = DownloadHandler::parse(&data).unwrap();
        assert_eq!(download.get_entries()[0].flags, Vec::<u8>::new());
    }

    #[test]
    fn rejects_unknown_version() {
        let data = download_manifest(4, &[], &[]);
        assert!(matches!(
            DownloadHandler::parse(&data),
            Err(CascError::BadVersion { version: 4, .. })
        ));
    }

    #[test]
    fn huge_entry_count_is_an_error() {
        let mut data = b"DL".to_vec();
        data.extend_from_slice(&[1, 16, 0]);
        data.extend_from_slice(&u32::MAX.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());

        assert!(matches!(DownloadHandler::parse(&data), Err(CascError::Io(_))));
    }
}
