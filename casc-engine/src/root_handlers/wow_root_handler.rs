use crate::entry::RootEntry;
use crate::error::{CascError, Result};
use crate::ext::io_ext::{BinaryReadExt, RemainingExt, SeekExt};
use crate::jenkins96::hash_path;
use crate::keys::{ContentKey, KEY_LENGTH};
use crate::locale_flags::{ContentFlags, LocaleFlags};
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::{BufRead, Cursor};
use tracing::{debug, info, warn};

const WOW_ROOT_MAGIC: &[u8; 4] = b"TSFM";

/// Header size of the version 2 root layout.
const EXTENDED_HEADER_SIZE: u32 = 0x18;

/// Hash given to files that the root lists without a name hash.
pub fn synthetic_hash(file_data_id: u32) -> u64 {
    0xFFFF_FFFF_0000_0000 | file_data_id as u64
}

fn is_synthetic(hash: u64) -> bool {
    hash >> 32 == 0xFFFF_FFFF
}

/// Describes the layout of a WoW root blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WowRootHeader {
    /// Pre-8.2 roots have no header and interleave keys and name hashes.
    pub use_old_record_format: bool,
    pub version: u32,
    pub total_file_count: u32,
    pub named_file_count: u32,
    pub allow_non_named_files: bool,
}

impl WowRootHeader {
    fn read(reader: &mut Cursor<&[u8]>) -> Result<Self> {
        let magic = reader.read_fixed::<4>()?;
        if &magic != WOW_ROOT_MAGIC {
            reader.set_position(0);
            return Ok(Self {
                use_old_record_format: true,
                version: 0,
                total_file_count: 0,
                named_file_count: 0,
                allow_non_named_files: false,
            });
        }

        let first = reader.read_u32::<LittleEndian>()?;
        let (version, total_file_count) = if first == EXTENDED_HEADER_SIZE {
            (reader.read_u32::<LittleEndian>()?, reader.read_u32::<LittleEndian>()?)
        } else {
            (0, first)
        };
        let named_file_count = reader.read_u32::<LittleEndian>()?;
        if first == EXTENDED_HEADER_SIZE {
            reader.skip(4)?;
        }

        Ok(Self {
            use_old_record_format: false,
            version,
            total_file_count,
            named_file_count,
            allow_non_named_files: total_file_count != named_file_count,
        })
    }
}

/// Root of World of Warcraft builds: FileDataIds and name hashes mapped to
/// content keys, one block per locale/content flag combination.
#[derive(Debug, Default)]
pub struct WowRootHandler {
    entries: HashMap<u64, Vec<RootEntry>>,
    file_data_ids: HashMap<u32, u64>,
    hashes: HashMap<u64, u32>,
    names: HashMap<u64, String>,
}

impl WowRootHandler {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(data);
        let header = WowRootHeader::read(&mut reader)?;
        debug!("WoW root header {header:?}");

        let mut handler = WowRootHandler::default();
        let mut blocks = 0usize;
        while (reader.position() as usize) < data.len() {
            handler.read_block(&mut reader, &header)?;
            blocks += 1;
        }

        info!(
            "Loaded {} root hashes, {} FileDataIds from {blocks} blocks",
            handler.entries.len(),
            handler.file_data_ids.len()
        );
        Ok(handler)
    }

    fn read_block(&mut self, reader: &mut Cursor<&[u8]>, header: &WowRootHeader) -> Result<()> {
        let num_records = reader.read_u32::<LittleEndian>()? as usize;

        let (content, locale) = if header.version == 2 {
            let locale = reader.read_u32::<LittleEndian>()?;
            let v1 = reader.read_u32::<LittleEndian>()?;
            let v2 = reader.read_u32::<LittleEndian>()?;
            let v3 = reader.read_u8()? as u32;
            (v1 | v2 | (v3 << 17), locale)
        } else {
            let content = reader.read_u32::<LittleEndian>()?;
            (content, reader.read_u32::<LittleEndian>()?)
        };
        let content = ContentFlags::from_bits_retain(content);
        let locale = LocaleFlags::from_bits_retain(locale);

        if num_records == 0 {
            return Ok(());
        }

        let mut file_data_ids = Vec::with_capacity(reader.capacity_for(num_records, 4));
        let mut file_data_id = 0u32;
        for i in 0..num_records {
            let delta = reader.read_i32::<LittleEndian>()?;
            file_data_id = if i == 0 {
                u32::try_from(delta).ok()
            } else {
                delta
                    .checked_add(1)
                    .and_then(|d| file_data_id.checked_add_signed(d))
            }
            .ok_or_else(|| CascError::InvalidData("FileDataId delta overflow".into()))?;
            file_data_ids.push(file_data_id);
        }

        let mut records = Vec::with_capacity(reader.capacity_for(num_records, KEY_LENGTH));
        if header.use_old_record_format {
            for &id in &file_data_ids {
                let ckey = ContentKey(reader.read_fixed::<KEY_LENGTH>()?);
                let hash = reader.read_u64::<LittleEndian>()?;
                records.push((id, ckey, hash));
            }
        } else {
            let ckeys = (0..num_records)
                .map(|_| reader.read_fixed::<KEY_LENGTH>().map(ContentKey))
                .collect::<std::io::Result<Vec<_>>>()?;
            let has_name_hashes =
                !(header.allow_non_named_files && content.contains(ContentFlags::NO_NAME_HASH));
            for (&id, ckey) in file_data_ids.iter().zip(ckeys) {
                records.push((id, ckey, synthetic_hash(id)));
            }
            if has_name_hashes {
                for record in records.iter_mut() {
                    record.2 = reader.read_u64::<LittleEndian>()?;
                }
            }
        }

        for (id, ckey, hash) in records {
            let hash = *self.file_data_ids.entry(id).or_insert(hash);
            self.hashes.entry(hash).or_insert(id);
            self.entries
                .entry(hash)
                .or_default()
                .push(RootEntry::new(ckey, locale, content));
        }
        Ok(())
    }

    /// Entries of `hash` usable for `locale`.
    pub fn get_entries(&self, hash: u64, locale: LocaleFlags) -> Vec<RootEntry> {
        self.get_all_entries(hash)
            .iter()
            .filter(|e| e.locale.matches(locale))
            .copied()
            .collect()
    }

    pub fn get_all_entries(&self, hash: u64) -> &[RootEntry] {
        self.entries.get(&hash).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_hash_by_file_data_id(&self, file_data_id: u32) -> Option<u64> {
        self.file_data_ids.get(&file_data_id).copied()
    }

    pub fn get_file_data_id(&self, hash: u64) -> Option<u32> {
        self.hashes.get(&hash).copied()
    }

    pub fn file_exists_by_file_data_id(&self, file_data_id: u32) -> bool {
        self.file_data_ids.contains_key(&file_data_id)
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.entries.contains_key(&hash)
    }

    pub fn name(&self, hash: u64) -> Option<&str> {
        self.names.get(&hash).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = (&u64, &String)> {
        self.names.iter()
    }

    /// Applies a listfile of `fid;path` lines, naming every known FileDataId.
    ///
    /// Files the root only knew by a synthetic hash are re-keyed under the
    /// hash of their name. Returns how many files received a name.
    pub fn load_listfile<R: BufRead>(&mut self, reader: R) -> Result<usize> {
        let mut named = 0;
        let mut skipped = 0;

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((id, path)) = line
                .split_once(';')
                .and_then(|(id, path)| Some((id.trim().parse::<u32>().ok()?, path.trim())))
            else {
                skipped += 1;
                continue;
            };
            let Some(&hash) = self.file_data_ids.get(&id) else {
                continue;
            };

            let name_hash = hash_path(path);
            if is_synthetic(hash) && name_hash != hash && !self.entries.contains_key(&name_hash) {
                if let Some(entries) = self.entries.remove(&hash) {
                    self.entries.insert(name_hash, entries);
                }
                self.hashes.remove(&hash);
                self.hashes.insert(name_hash, id);
                self.file_data_ids.insert(id, name_hash);
                self.names.insert(name_hash, path.to_string());
            } else {
                self.names.insert(hash, path.to_string());
            }
            named += 1;
        }

        if skipped > 0 {
            warn!("Skipped {skipped} malformed listfile lines");
        }
        info!("Listfile named {named} files");
        Ok(named)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
