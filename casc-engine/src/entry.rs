use crate::keys::ContentKey;
use crate::locale_flags::{ContentFlags, LocaleFlags};

/// One content key a root maps a name hash or FileDataId to.
///
/// A hash may own several entries that differ by locale or content flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootEntry {
    pub ckey: ContentKey,
    pub locale: LocaleFlags,
    pub content: ContentFlags,
}

impl RootEntry {
    pub fn new(ckey: ContentKey, locale: LocaleFlags, content: ContentFlags) -> Self {
        Self {
            ckey,
            locale,
            content,
        }
    }
}
