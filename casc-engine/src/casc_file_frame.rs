use crate::block_table::block_table_entry::BlockTableEntry;

/// Represents a frame within a CASC file, describing a segment of file data.
#[derive(Debug, Clone)]
pub(crate) struct CascFileFrame {
    /// The virtual start offset of the frame within its span.
    pub(crate) virtual_start_offset: u64,
    /// The virtual end offset of the frame within its span.
    pub(crate) virtual_end_offset: u64,
    /// The offset of the encoded frame within the span source.
    pub(crate) archive_offset: u64,
    /// The block table entry, or `None` for a blob without a table.
    pub(crate) entry: Option<BlockTableEntry>,
    /// Position of the frame in its blob.
    pub(crate) index: usize,
    /// The encoded (compressed/encrypted) size of the frame.
    pub(crate) encoded_size: u32,
}
