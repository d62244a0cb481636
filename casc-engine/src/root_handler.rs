use crate::entry::RootEntry;
use crate::error::{CascError, Result};
use crate::game_type::GameType;
use crate::locale_flags::LocaleFlags;
use crate::root_handlers::dummy_root_handler::DummyRootHandler;
use crate::root_handlers::text_root_handler::TextRootHandler;
use crate::root_handlers::tvfs_root_handler::TvfsRootHandler;
use crate::root_handlers::wow_root_handler::WowRootHandler;
use crate::span_info::VfsRootEntry;
use std::io::BufRead;

/// Root layouts this crate can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootFormat {
    Tvfs,
    Legacy,
    TitleSpecial,
    Dummy,
}

impl RootFormat {
    /// Picks the root layout of a build. A `vfs-root` key wins over the title.
    pub fn select(game: GameType, is_vfs_root: bool, product: &str) -> Result<Self> {
        if is_vfs_root {
            return Ok(RootFormat::Tvfs);
        }
        match game {
            GameType::WoW => Ok(RootFormat::Legacy),
            GameType::S1 | GameType::WC3 => Ok(RootFormat::TitleSpecial),
            game if game.has_placeholder_root() => Ok(RootFormat::Dummy),
            _ => Err(CascError::UnknownRootFormat {
                product: product.to_string(),
            }),
        }
    }
}

/// The root of a build, resolving name hashes and FileDataIds to content.
#[derive(Debug)]
pub enum RootHandler {
    Legacy(WowRootHandler),
    Tvfs(TvfsRootHandler),
    TitleSpecial(TextRootHandler),
    Dummy(DummyRootHandler),
}

impl RootHandler {
    pub fn format(&self) -> RootFormat {
        match self {
            RootHandler::Legacy(_) => RootFormat::Legacy,
            RootHandler::Tvfs(_) => RootFormat::Tvfs,
            RootHandler::TitleSpecial(_) => RootFormat::TitleSpecial,
            RootHandler::Dummy(_) => RootFormat::Dummy,
        }
    }

    /// Entries of `hash` usable for `locale`.
    pub fn get_entries(&self, hash: u64, locale: LocaleFlags) -> Vec<RootEntry> {
        match self {
            RootHandler::Legacy(root) => root.get_entries(hash, locale),
            RootHandler::Tvfs(root) => root.get_entries(hash),
            RootHandler::TitleSpecial(root) => root.get_entries(hash, locale),
            RootHandler::Dummy(_) => Vec::new(),
        }
    }

    /// Every entry of `hash`, whatever its locale.
    pub fn get_all_entries(&self, hash: u64) -> Vec<RootEntry> {
        match self {
            RootHandler::Legacy(root) => root.get_all_entries(hash).to_vec(),
            RootHandler::Tvfs(root) => root.get_entries(hash),
            RootHandler::TitleSpecial(root) => root.get_all_entries(hash).to_vec(),
            RootHandler::Dummy(_) => Vec::new(),
        }
    }

    /// The ordered chunks of a file in a virtual file system root.
    pub fn get_vfs_entries(&self, hash: u64) -> Option<&[VfsRootEntry]> {
        match self {
            RootHandler::Tvfs(root) => root.get_vfs_entries(hash),
            _ => None,
        }
    }

    pub fn get_hash_by_file_data_id(&self, file_data_id: u32) -> Option<u64> {
        match self {
            RootHandler::Legacy(root) => root.get_hash_by_file_data_id(file_data_id),
            _ => None,
        }
    }

    /// Only roots indexed by FileDataId can answer `true`.
    pub fn file_exists_by_file_data_id(&self, file_data_id: u32) -> bool {
        match self {
            RootHandler::Legacy(root) => root.file_exists_by_file_data_id(file_data_id),
            _ => false,
        }
    }

    pub fn contains(&self, hash: u64) -> bool {
        match self {
            RootHandler::Legacy(root) => root.contains(hash),
            RootHandler::Tvfs(root) => root.contains(hash),
            RootHandler::TitleSpecial(root) => root.contains(hash),
            RootHandler::Dummy(_) => false,
        }
    }

    /// Every file name the root knows.
    pub fn names(&self) -> Vec<&str> {
        match self {
            RootHandler::Legacy(root) => root.names().map(|(_, n)| n.as_str()).collect(),
            RootHandler::Tvfs(root) => root.files().map(|(_, f)| f.name.as_str()).collect(),
            RootHandler::TitleSpecial(root) => root.names().map(|(_, n)| n.as_str()).collect(),
            RootHandler::Dummy(_) => Vec::new(),
        }
    }

    /// Names FileDataIds from a `fid;path` listfile. Roots that carry their
    /// own names ignore it and return 0.
    pub fn load_listfile<R: BufRead>(&mut self, reader: R) -> Result<usize> {
        match self {
            RootHandler::Legacy(root) => root.load_listfile(reader),
            _ => Ok(0),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RootHandler::Legacy(root) => root.len(),
            RootHandler::Tvfs(root) => root.len(),
            RootHandler::TitleSpecial(root) => root.len(),
            RootHandler::Dummy(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vfs_root_wins_over_title() {
        assert_eq!(
            RootFormat::select(GameType::WoW, true, "wow").unwrap(),
            RootFormat::Tvfs
        );
        assert_eq!(
            RootFormat::select(GameType::WoW, false, "wow").unwrap(),
            RootFormat::Legacy
        );
        assert_eq!(
            RootFormat::select(GameType::WC3, false, "w3").unwrap(),
            RootFormat::TitleSpecial
        );
        assert_eq!(
            RootFormat::select(GameType::D3, false, "d3").unwrap(),
            RootFormat::Dummy
        );
    }

    #[test]
    fn unknown_title_is_fatal() {
        assert!(matches!(
            RootFormat::select(GameType::Unknown, false, "foo"),
            Err(CascError::UnknownRootFormat { product }) if product == "foo"
        ));
    }

    #[test]
    fn dummy_root_is_empty() {
        let root = RootHandler::Dummy(DummyRootHandler::new(GameType::Hearthstone));
        assert!(root.get_entries(1, LocaleFlags::ALL).is_empty());
        assert!(root.get_vfs_entries(1).is_none());
        assert!(!root.file_exists_by_file_data_id(1));
        assert!(root.is_empty());
    }
}
