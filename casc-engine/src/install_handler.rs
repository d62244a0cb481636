//! The install manifest (`IN`): files laid down by the installer, each with
//! a content key and the tags (platform, architecture, locale) selecting it.

use crate::error::{CascError, Result};
use crate::ext::io_ext::{BinaryReadExt, RemainingExt};
use crate::jenkins96::hash_path;
use crate::keys::{ContentKey, KEY_LENGTH};
use crate::locale_flags::LocaleFlags;
use byteorder::{BigEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tracing::{debug, info};

/// `IN` read as a big-endian integer.
const INSTALL_SIGNATURE: u16 = 0x494E;

/// A tag shared by install and download manifests. Bit `i` of the mask,
/// counted from the most significant bit of the first byte, marks entry `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTag {
    pub name: String,
    pub tag_type: u16,
    mask: Vec<u8>,
}

impl ManifestTag {
    pub(crate) fn read_all<R: Read>(reader: &mut R, count: u16, entry_count: u32) -> Result<Vec<Self>> {
        let mask_size = (entry_count as usize).div_ceil(8);
        (0..count)
            .map(|_| {
                Ok(ManifestTag {
                    name: reader.read_cstring()?,
                    tag_type: reader.read_u16::<BigEndian>()?,
                    mask: reader.read_bytes(mask_size)?,
                })
            })
            .collect()
    }

    pub fn has_entry(&self, index: usize) -> bool {
        self.mask
            .get(index / 8)
            .is_some_and(|byte| byte & (0x80 >> (index % 8)) != 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallEntry {
    pub name: String,
    /// `hash_path(name)`.
    pub hash: u64,
    pub ckey: ContentKey,
    pub size: u32,
    pub tags: Vec<String>,
}

impl InstallEntry {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

#[derive(Debug, Default)]
pub struct InstallHandler {
    tags: Vec<ManifestTag>,
    entries: Vec<InstallEntry>,
    by_hash: HashMap<u64, Vec<usize>>,
}

impl InstallHandler {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(data);

        let signature = reader.read_u16::<BigEndian>()?;
        if signature != INSTALL_SIGNATURE {
            return Err(CascError::BadMagic {
                what: "install manifest",
                found: signature as u32,
            });
        }
        let version = reader.read_u8()?;
        if version != 1 {
            return Err(CascError::BadVersion {
                what: "install manifest",
                version: version as u32,
            });
        }
        let hash_size = reader.read_u8()?;
        if hash_size as usize != KEY_LENGTH {
            return Err(CascError::InvalidData(format!(
                "Unsupported install key size {hash_size}"
            )));
        }
        let tag_count = reader.read_u16::<BigEndian>()?;
        let entry_count = reader.read_u32::<BigEndian>()?;
        debug!("Install manifest: {tag_count} tags, {entry_count} entries");

        let tags = ManifestTag::read_all(&mut reader, tag_count, entry_count)?;

        let mut handler = InstallHandler {
            entries: Vec::with_capacity(reader.capacity_for(entry_count as usize, 1 + KEY_LENGTH + 4)),
            ..Default::default()
        };
        for index in 0..entry_count as usize {
            let name = reader.read_cstring()?;
            let ckey = ContentKey(reader.read_fixed::<KEY_LENGTH>()?);
            let size = reader.read_u32::<BigEndian>()?;
            let entry_tags = tags
                .iter()
                .filter(|t| t.has_entry(index))
                .map(|t| t.name.clone())
                .collect();

            let hash = hash_path(&name);
            handler.by_hash.entry(hash).or_default().push(index);
            handler.entries.push(InstallEntry {
                name,
                hash,
                ckey,
                size,
                tags: entry_tags,
            });
        }
        handler.tags = tags;

        info!("Loaded {} install entries", handler.entries.len());
        Ok(handler)
    }

    pub fn get_entries(&self) -> &[InstallEntry] {
        &self.entries
    }

    pub fn get_entries_by_hash(&self, hash: u64) -> Vec<&InstallEntry> {
        self.by_hash
            .get(&hash)
            .map(|indices| indices.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }

    /// The entry of `hash` tagged with one of `locale`'s names, or the first
    /// entry of `hash` when none is.
    pub fn get_best_entry(&self, hash: u64, locale: LocaleFlags) -> Option<&InstallEntry> {
        let entries = self.get_entries_by_hash(hash);
        let names = locale.tag_names();
        entries
            .iter()
            .find(|e| names.iter().any(|n| e.has_tag(n)))
            .or_else(|| entries.first())
            .copied()
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
