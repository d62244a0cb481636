//! Local `.idx` key mapping tables, which map truncated encoding keys to
//! blobs inside `data.NNN` files.

use crate::error::{CascError, Result};
use crate::ext::io_ext::BinaryReadExt;
use crate::keys::{EncodingKey, LOCAL_KEY_LENGTH};
use crate::progress::ProgressReporter;
use byteorder::{LittleEndian, ReadBytesExt};
use glob::glob;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Represents the header of one CASC key mapping table (`.idx` file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascKeyMappingTable {
    /// The version of the key mapping table format.
    pub version: u16,
    /// The bucket index used for hashing.
    pub bucket_index: u8,
    /// An extra byte used for format-specific purposes.
    pub extra_byte: u8,
    /// The length in bytes of the encoded size field.
    pub encoded_size_length: u8,
    /// The length in bytes of the storage offset field.
    pub storage_offset_length: u8,
    /// The length in bytes of the encoding key.
    pub encoding_key_length: u8,
    /// The number of bits used for the file offset.
    pub file_offset_bits: u8,
    /// The maximum size of one data file.
    pub file_size: u64,
    /// The number of entries read from the table.
    pub entry_count: usize,
}

/// Where a blob lives inside the local data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascKeyMappingTableEntry {
    /// The index of the archive containing the blob (`data.NNN`).
    pub archive_index: u32,
    /// The offset of the blob, span header included, within the archive.
    pub offset: u64,
    /// The size of the blob, span header included.
    pub size: u32,
}

impl CascKeyMappingTable {
    /// Parses one `.idx` file, adding its entries to `entries`. Keys already
    /// present are kept.
    pub(crate) fn read<R: Read + Seek>(
        reader: &mut R,
        entries: &mut HashMap<[u8; LOCAL_KEY_LENGTH], CascKeyMappingTableEntry>,
    ) -> Result<Self> {
        let header_hash_size = reader.read_u32::<LittleEndian>()?;
        let _header_hash = reader.read_u32::<LittleEndian>()?;

        let version = reader.read_u16::<LittleEndian>()?;
        let bucket_index = reader.read_u8()?;
        let extra_byte = reader.read_u8()?;
        let encoded_size_length = reader.read_u8()?;
        let storage_offset_length = reader.read_u8()?;
        let encoding_key_length = reader.read_u8()?;
        let file_offset_bits = reader.read_u8()?;
        let file_size = reader.read_u64::<LittleEndian>()?;

        if version != 7 {
            return Err(CascError::BadVersion {
                what: "key mapping table",
                version: version as u32,
            });
        }
        if encoded_size_length != 4
            || storage_offset_length != 5
            || encoding_key_length as usize != LOCAL_KEY_LENGTH
            || file_offset_bits >= 40
        {
            return Err(CascError::InvalidData(
                "Invalid Data Sizes in Key Mapping Table".into(),
            ));
        }

        // Entries start at the next 0x10 boundary after the header block
        let entries_start = (8 + header_hash_size as u64 + 0x0F) & !0x0F;
        reader.seek(SeekFrom::Start(entries_start))?;

        let table_size = reader.read_u32::<LittleEndian>()?;
        let _table_hash = reader.read_u32::<LittleEndian>()?;

        let entry_size =
            (encoded_size_length + storage_offset_length + encoding_key_length) as u32;
        let file_offset_mask = (1u64 << file_offset_bits) - 1;
        let entry_count = (table_size / entry_size) as usize;

        for _ in 0..entry_count {
            let key = reader.read_fixed::<LOCAL_KEY_LENGTH>()?;
            let packed = reader.read_u40_be()?;
            let size = reader.read_u32::<LittleEndian>()?;
            entries.entry(key).or_insert(CascKeyMappingTableEntry {
                archive_index: (packed >> file_offset_bits) as u32,
                offset: packed & file_offset_mask,
                size,
            });
        }

        Ok(CascKeyMappingTable {
            version,
            bucket_index,
            extra_byte,
            encoded_size_length,
            storage_offset_length,
            encoding_key_length,
            file_offset_bits,
            file_size,
            entry_count,
        })
    }
}

/// All key mapping tables of a local storage.
#[derive(Debug, Default)]
pub struct LocalIndexHandler {
    entries: HashMap<[u8; LOCAL_KEY_LENGTH], CascKeyMappingTableEntry>,
    tables: Vec<CascKeyMappingTable>,
}

impl LocalIndexHandler {
    /// Loads the newest `.idx` file of every bucket in `data_dir`.
    pub fn load(data_dir: &Path, progress: Option<&ProgressReporter>) -> Result<Self> {
        let files = Self::select_index_files(data_dir)?;
        let mut handler = LocalIndexHandler::default();

        for (i, path) in files.iter().enumerate() {
            if let Some(progress) = progress {
                progress.report(
                    (i * 100 / files.len().max(1)) as u8,
                    "Loading local indexes",
                )?;
            }
            let data = fs::read(path)?;
            let table = CascKeyMappingTable::read(&mut Cursor::new(data), &mut handler.entries)?;
            debug!("{}: {} entries", path.display(), table.entry_count);
            handler.tables.push(table);
        }

        info!(
            "Loaded {} local index entries from {} files",
            handler.entries.len(),
            handler.tables.len()
        );
        Ok(handler)
    }

    /// For every two-character bucket prefix, the lexicographically last `.idx` file.
    fn select_index_files(data_dir: &Path) -> Result<Vec<PathBuf>> {
        let pattern = data_dir.join("*.idx");
        let pattern = pattern
            .to_str()
            .ok_or_else(|| CascError::InvalidData(format!("Non UTF-8 path {}", data_dir.display())))?;

        let mut latest: BTreeMap<String, (String, PathBuf)> = BTreeMap::new();
        for entry in glob(pattern).map_err(|e| CascError::InvalidData(format!("{e}")))? {
            let path = entry.map_err(|e| CascError::Io(e.into()))?;
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let Some(bucket) = name.get(..2).map(str::to_ascii_lowercase) else {
                continue;
            };
            let newer = latest
                .get(&bucket)
                .map_or(true, |(current, _)| name > *current);
            if newer {
                latest.insert(bucket, (name, path));
            }
        }

        Ok(latest.into_values().map(|(_, path)| path).collect())
    }

    pub fn get(&self, ekey: &EncodingKey) -> Option<&CascKeyMappingTableEntry> {
        self.entries.get(&ekey.prefix9())
    }

    pub fn contains(&self, ekey: &EncodingKey) -> bool {
        self.entries.contains_key(&ekey.prefix9())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tables(&self) -> &[CascKeyMappingTable] {
        &self.tables
    }
}
