use crate::entry::RootEntry;
use crate::error::{CascError, Result};
use crate::jenkins96::hash_path;
use crate::keys::ContentKey;
use crate::locale_flags::{ContentFlags, LocaleFlags};
use std::collections::HashMap;
use tracing::info;

/// Root of StarCraft and Warcraft III classic builds: a text file of
/// `path|ckey[|locale]` lines.
#[derive(Debug, Default)]
pub struct TextRootHandler {
    entries: HashMap<u64, Vec<RootEntry>>,
    names: HashMap<u64, String>,
}

impl TextRootHandler {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(data);
        let mut handler = TextRootHandler::default();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut cells = line.split('|');
            let (Some(path), Some(ckey)) = (cells.next(), cells.next()) else {
                return Err(CascError::Parse {
                    origin: "text root".to_string(),
                    line: index + 1,
                    reason: "expected path|ckey".to_string(),
                });
            };
            let ckey = ContentKey::from_hex(ckey.trim()).map_err(|e| CascError::Parse {
                origin: "text root".to_string(),
                line: index + 1,
                reason: e.to_string(),
            })?;
            let locale = cells
                .next()
                .map(|tags| {
                    tags.split([' ', ':', ','])
                        .filter_map(LocaleFlags::from_tag)
                        .fold(LocaleFlags::empty(), |all, l| all | l)
                })
                .filter(|l| !l.is_empty())
                .unwrap_or(LocaleFlags::ALL);

            let hash = hash_path(path);
            handler.names.entry(hash).or_insert_with(|| path.to_string());
            handler
                .entries
                .entry(hash)
                .or_default()
                .push(RootEntry::new(ckey, locale, ContentFlags::empty()));
        }

        info!("Loaded {} text root entries", handler.entries.len());
        Ok(handler)
    }

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

    pub fn contains(&self, hash: u64) -> bool {
        self.entries.contains_key(&hash)
    }

    pub fn names(&self) -> impl Iterator<Item = (&u64, &String)> {
        self.names.iter()
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

    #[test]
    fn parses_paths_and_locales() {
        let text = "\
# comment
War3.mpq:Units/Human.slk|0123456789abcdef0123456789abcdef
enUS/Sound/Intro.wav|fedcba9876543210fedcba9876543210|enUS
deDE/Sound/Intro.wav|00000000000000000000000000000001|deDE
";
        let root = TextRootHandler::parse(text.as_bytes()).unwrap();
        assert_eq!(root.len(), 3);

        let hash = hash_path("war3.mpq:units\\human.slk");
        assert_eq!(
            root.get_entries(hash, LocaleFlags::KO_KR)[0].ckey,
            ContentKey::from_hex("0123456789abcdef0123456789abcdef").unwrap()
        );
        let intro = hash_path("deDE/Sound/Intro.wav");
        assert_eq!(root.get_entries(intro, LocaleFlags::DE_DE).len(), 1);
        assert!(root.get_entries(intro, LocaleFlags::EN_US).is_empty());
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(matches!(
            TextRootHandler::parse(b"a.txt|nothex"),
            Err(CascError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            TextRootHandler::parse(b"\njust-a-path"),
            Err(CascError::Parse { line: 2, .. })
        ));
    }
}
