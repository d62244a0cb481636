use crate::entry::RootEntry;
use crate::error::{CascError, Result};
use crate::ext::io_ext::{BinaryReadExt, PeekExt, SeekExt};
use crate::jenkins96::hash_path;
use crate::keys::{ContentKey, EncodingKey, KEY_LENGTH};
use crate::locale_flags::{ContentFlags, LocaleFlags};
use crate::path_table_node_flags::PathTableNodeFlags;
use crate::span_info::VfsRootEntry;
use byteorder::{BigEndian, ReadBytesExt};
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use tracing::{debug, info};

/// `TVFS` read as a big-endian integer.
const TVFS_SIGNATURE: u32 = 0x5456_4653;

/// CFT entries carry the content key after the encoding key.
const TVFS_FLAG_INCLUDE_CKEY: i32 = 0x1;

/// Sub file systems nested deeper than this are not mounted.
const MAX_MOUNT_DEPTH: usize = 8;

/// Represents the header of a TVFS root structure in a CASC archive.
///
/// This header contains metadata about the TVFS tables and their locations.
#[derive(Debug, Clone)]
pub struct TVFSHeader {
    pub signature: u32,
    pub format_version: u8,
    pub header_size: u8,
    pub encoding_key_size: u8,
    pub patch_key_size: u8,
    pub flags: i32,
    pub path_table_offset: i32,
    pub path_table_size: i32,
    pub vfs_table_offset: i32,
    pub vfs_table_size: i32,
    pub cft_table_offset: i32,
    pub cft_table_size: i32,
    pub max_depth: u16,
}

impl TVFSHeader {
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let header = Self {
            signature: reader.read_u32::<BigEndian>()?,
            format_version: reader.read_u8()?,
            header_size: reader.read_u8()?,
            encoding_key_size: reader.read_u8()?,
            patch_key_size: reader.read_u8()?,
            flags: reader.read_i32::<BigEndian>()?,
            path_table_offset: reader.read_i32::<BigEndian>()?,
            path_table_size: reader.read_i32::<BigEndian>()?,
            vfs_table_offset: reader.read_i32::<BigEndian>()?,
            vfs_table_size: reader.read_i32::<BigEndian>()?,
            cft_table_offset: reader.read_i32::<BigEndian>()?,
            cft_table_size: reader.read_i32::<BigEndian>()?,
            max_depth: reader.read_u16::<BigEndian>()?,
        };

        if header.signature != TVFS_SIGNATURE {
            return Err(CascError::BadMagic {
                what: "TVFS root",
                found: header.signature,
            });
        }
        if header.format_version != 1 {
            return Err(CascError::BadVersion {
                what: "TVFS root",
                version: header.format_version as u32,
            });
        }
        if header.encoding_key_size as usize > KEY_LENGTH {
            return Err(CascError::InvalidData(format!(
                "TVFS encoding key size {} too large",
                header.encoding_key_size
            )));
        }
        Ok(header)
    }

    fn table(&self, data: &[u8], offset: i32, size: i32, what: &str) -> Result<Vec<u8>> {
        let start = usize::try_from(offset).ok();
        let end = start.zip(usize::try_from(size).ok()).map(|(s, n)| s + n);
        start
            .zip(end)
            .and_then(|(s, e)| data.get(s..e))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| CascError::InvalidData(format!("TVFS {what} table out of bounds")))
    }
}

/// Represents a node in the TVFS path table.
///
/// Each node may represent a directory or file path component.
#[derive(Debug, Default, Clone)]
pub struct PathTableNode {
    pub name: String,
    pub flags: PathTableNodeFlags,
    pub value: Option<i32>,
}

/// A file of a TVFS root and the chunks it is made of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TvfsFile {
    pub name: String,
    pub spans: Vec<VfsRootEntry>,
}

impl TvfsFile {
    /// Sum of the content lengths of every chunk.
    pub fn content_length(&self) -> u64 {
        self.spans.iter().map(|s| s.content_length).sum()
    }
}

/// Parses one TVFS blob into named files.
struct TvfsParser {
    path_table_reader: Cursor<Vec<u8>>,
    vfs_table_reader: Cursor<Vec<u8>>,
    cft_table_reader: Cursor<Vec<u8>>,
    header: TVFSHeader,
    files: Vec<TvfsFile>,
}

impl TvfsParser {
    fn parse(data: &[u8]) -> Result<(TVFSHeader, Vec<TvfsFile>)> {
        let header = TVFSHeader::read(&mut Cursor::new(data))?;
        debug!("TVFS header {header:?}");

        let mut parser = TvfsParser {
            path_table_reader: Cursor::new(header.table(
                data,
                header.path_table_offset,
                header.path_table_size,
                "path",
            )?),
            vfs_table_reader: Cursor::new(header.table(
                data,
                header.vfs_table_offset,
                header.vfs_table_size,
                "VFS",
            )?),
            cft_table_reader: Cursor::new(header.table(
                data,
                header.cft_table_offset,
                header.cft_table_size,
                "CFT",
            )?),
            header,
            files: Vec::new(),
        };

        let end = parser.path_table_reader.get_ref().len() as u64;
        parser.parse_folder(end, String::with_capacity(255))?;
        Ok((parser.header, parser.files))
    }

    fn parse_path_node(&mut self) -> Result<PathTableNode> {
        let mut entry = PathTableNode::default();

        let start = self.path_table_reader.position();
        let mut buf = self.path_table_reader.peek_byte()?;

        if buf == 0 {
            entry.flags |= PathTableNodeFlags::PATH_SEPARATOR_PRE;
            self.path_table_reader.skip(1)?;
            buf = self.path_table_reader.peek_byte()?;
        }

        if buf < 0x7F && buf != 0xFF {
            self.path_table_reader.skip(1)?;
            let name = self.path_table_reader.read_bytes(buf as usize)?;
            entry.name = String::from_utf8_lossy(&name).into_owned();
            buf = self.path_table_reader.peek_byte()?;
        }

        if buf == 0 {
            entry.flags |= PathTableNodeFlags::PATH_SEPARATOR_POST;
            self.path_table_reader.skip(1)?;
            buf = self.path_table_reader.peek_byte()?;
        }

        if buf == 0xFF {
            self.path_table_reader.skip(1)?;
            entry.value = Some(self.path_table_reader.read_i32::<BigEndian>()?);
            entry.flags |= PathTableNodeFlags::IS_NODE_VALUE;
        } else if self.path_table_reader.position() == start {
            return Err(CascError::InvalidData(format!(
                "Invalid TVFS path table byte {buf:#04x} at {start}"
            )));
        } else {
            entry.flags |= PathTableNodeFlags::PATH_SEPARATOR_POST;
        }

        Ok(entry)
    }

    fn add_file(&mut self, name: String, vfs_info_pos: u64) -> Result<()> {
        self.vfs_table_reader.set_position(vfs_info_pos);

        let span_count = self.vfs_table_reader.read_u8()?;
        let mut spans = Vec::with_capacity(span_count as usize);
        for _ in 0..span_count {
            let ref_file_offset = self.vfs_table_reader.read_u32::<BigEndian>()?;
            let size_of_span = self.vfs_table_reader.read_u32::<BigEndian>()?;
            let cft_offset = Self::read_variable_size_int(
                &mut self.vfs_table_reader,
                self.header.cft_table_size as usize,
            )?;

            self.cft_table_reader.set_position(cft_offset as u64);
            let key_size = self.header.encoding_key_size as usize;
            let mut ekey = [0u8; KEY_LENGTH];
            self.cft_table_reader.read_exact(&mut ekey[..key_size])?;

            let mut span = VfsRootEntry::new(
                EncodingKey(ekey),
                ref_file_offset as u64,
                size_of_span as u64,
            );
            if self.header.flags & TVFS_FLAG_INCLUDE_CKEY != 0 {
                let ckey = self.cft_table_reader.read_fixed::<KEY_LENGTH>()?;
                span = span.with_content_key(ContentKey(ckey));
            }
            spans.push(span);
        }

        self.files.push(TvfsFile { name, spans });
        Ok(())
    }

    /// Offsets into the CFT table are as wide as needed to address it.
    fn read_variable_size_int<R: Read>(reader: &mut R, data_size: usize) -> Result<u32> {
        let width = if data_size > 0xFFFFFF {
            4
        } else if data_size > 0xFFFF {
            3
        } else if data_size > 0xFF {
            2
        } else {
            1
        };
        Ok(reader.read_uint_be(width)? as u32)
    }

    fn parse_folder(&mut self, end: u64, mut builder: String) -> Result<()> {
        let current_size = builder.len();

        while self.path_table_reader.position() < end {
            let entry = self.parse_path_node()?;

            if entry.flags.contains(PathTableNodeFlags::PATH_SEPARATOR_PRE) {
                builder.push('\\');
            }
            builder.push_str(&entry.name);
            if entry.flags.contains(PathTableNodeFlags::PATH_SEPARATOR_POST) {
                builder.push('\\');
            }

            if let Some(value) = entry.value {
                if (value as u32 & 0x8000_0000) != 0 {
                    let folder_size = (value as u32 & 0x7FFF_FFFF) as u64;
                    let folder_start = self.path_table_reader.position();
                    let folder_end = (folder_start + folder_size)
                        .checked_sub(4)
                        .ok_or_else(|| CascError::InvalidData("TVFS folder too small".into()))?;
                    self.parse_folder(folder_end, builder.clone())?;
                } else {
                    self.add_file(builder.trim_start_matches('\\').to_string(), value as u64)?;
                }
                builder.truncate(current_size);
            }
        }
        Ok(())
    }
}

/// Root of titles using a TVFS virtual file system.
///
/// Files are keyed by the hash of their full path. Sub file systems listed
/// in the build config as `vfs-<n>` are mounted under the path of the file
/// that references them.
#[derive(Debug)]
pub struct TvfsRootHandler {
    header: TVFSHeader,
    files: HashMap<u64, TvfsFile>,
}

impl TvfsRootHandler {
    /// Parses a TVFS blob without mounting sub file systems.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::load(data, &[], &mut |ekey: &EncodingKey| {
            Err(CascError::FileNotFound(format!("Encoding key {ekey}")))
        })
    }

    /// Parses a TVFS blob and mounts every file whose only chunk is one of
    /// `mounts`, reading the sub file system through `read`.
    pub fn load<F>(data: &[u8], mounts: &[EncodingKey], read: &mut F) -> Result<Self>
    where
        F: FnMut(&EncodingKey) -> Result<Vec<u8>>,
    {
        let (header, files) = TvfsParser::parse(data)?;
        let mut handler = TvfsRootHandler {
            header,
            files: HashMap::with_capacity(files.len()),
        };

        let mounts: HashSet<EncodingKey> = mounts.iter().copied().collect();
        let mut visited = HashSet::new();
        handler.insert_files(files, &mounts, &mut visited, read, 0)?;

        info!("Loaded {} TVFS files", handler.files.len());
        Ok(handler)
    }

    fn insert_files<F>(
        &mut self,
        files: Vec<TvfsFile>,
        mounts: &HashSet<EncodingKey>,
        visited: &mut HashSet<EncodingKey>,
        read: &mut F,
        depth: usize,
    ) -> Result<()>
    where
        F: FnMut(&EncodingKey) -> Result<Vec<u8>>,
    {
        for file in files {
            let mount = match file.spans.as_slice() {
                [span] if depth < MAX_MOUNT_DEPTH && mounts.contains(&span.ekey) => Some(span.ekey),
                _ => None,
            };

            match mount {
                Some(ekey) if visited.insert(ekey) => {
                    debug!("Mounting {ekey} at {}", file.name);
                    let (_, sub_files) = TvfsParser::parse(&read(&ekey)?)?;
                    let prefixed = sub_files
                        .into_iter()
                        .map(|sub| TvfsFile {
                            name: format!("{}\\{}", file.name, sub.name),
                            spans: sub.spans,
                        })
                        .collect();
                    self.insert_files(prefixed, mounts, visited, read, depth + 1)?;
                }
                _ => {
                    self.files.entry(hash_path(&file.name)).or_insert(file);
                }
            }
        }
        Ok(())
    }

    pub fn header(&self) -> &TVFSHeader {
        &self.header
    }

    /// The chunks of the file with path hash `hash`, in order.
    pub fn get_vfs_entries(&self, hash: u64) -> Option<&[VfsRootEntry]> {
        self.files.get(&hash).map(|f| f.spans.as_slice())
    }

    pub fn get_file(&self, hash: u64) -> Option<&TvfsFile> {
        self.files.get(&hash)
    }

    /// A root entry for single-chunk files whose content key is known.
    pub fn get_entries(&self, hash: u64) -> Vec<RootEntry> {
        match self.files.get(&hash).map(|f| f.spans.as_slice()) {
            Some([VfsRootEntry {
                ckey: Some(ckey), ..
            }]) => vec![RootEntry::new(*ckey, LocaleFlags::ALL, ContentFlags::empty())],
            _ => Vec::new(),
        }
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.files.contains_key(&hash)
    }

    pub fn files(&self) -> impl Iterator<Item = (&u64, &TvfsFile)> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
