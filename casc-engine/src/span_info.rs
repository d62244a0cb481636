use crate::keys::{ContentKey, EncodingKey};

/// One chunk of a file stored in a virtual file system root.
///
/// A file is the concatenation of its chunks in order; each chunk is the
/// byte range `content_offset..content_offset + content_length` of the
/// decoded blob named by `ekey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsRootEntry {
    pub ekey: EncodingKey,
    pub ckey: Option<ContentKey>,
    pub content_offset: u64,
    pub content_length: u64,
}

impl VfsRootEntry {
    pub fn new(ekey: EncodingKey, content_offset: u64, content_length: u64) -> Self {
        Self {
            ekey,
            ckey: None,
            content_offset,
            content_length,
        }
    }

    pub fn with_content_key(mut self, ckey: ContentKey) -> Self {
        self.ckey = Some(ckey);
        self
    }
}
