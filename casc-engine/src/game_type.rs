use crate::casc_config::CascConfig;
use std::fmt;
use std::path::Path;

/// The title a storage belongs to, which drives root format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameType {
    Unknown,
    HotS,
    WoW,
    D3,
    S2,
    Agent,
    Hearthstone,
    Overwatch,
    Bna,
    Client,
    S1,
    WC3,
    D4,
    CoD,
}

impl GameType {
    /// Detects the title from a product UID such as `wow_classic` or `hero`.
    pub fn from_uid(uid: &str) -> Self {
        let uid = uid.to_ascii_lowercase();
        const PREFIXES: &[(&str, GameType)] = &[
            ("hero", GameType::HotS),
            ("hs", GameType::Hearthstone),
            ("w3", GameType::WC3),
            ("s1", GameType::S1),
            ("s2", GameType::S2),
            ("wow", GameType::WoW),
            ("d3", GameType::D3),
            ("agent", GameType::Agent),
            ("pro", GameType::Overwatch),
            ("bna", GameType::Bna),
            ("clnt", GameType::Client),
            ("d4", GameType::D4),
            ("fenris", GameType::D4),
            ("viper", GameType::CoD),
            ("odin", GameType::CoD),
        ];
        PREFIXES
            .iter()
            .find(|(prefix, _)| uid.starts_with(prefix))
            .map(|(_, game)| *game)
            .unwrap_or(GameType::Unknown)
    }

    /// Detects the title of a local installation from its folder layout, then
    /// from the build config's `build-uid` or `build-product`.
    pub fn detect_local<P: AsRef<Path>>(root: P, build_config: Option<&CascConfig>) -> Self {
        let root = root.as_ref();
        const LAYOUT: &[(&str, GameType)] = &[
            ("HeroesData", GameType::HotS),
            ("SC2Data", GameType::S2),
            ("Hearthstone_Data", GameType::Hearthstone),
            ("Diablo III.exe", GameType::D3),
            ("Overwatch.exe", GameType::Overwatch),
            ("Warcraft III.exe", GameType::WC3),
            ("StarCraft.exe", GameType::S1),
        ];
        if let Some((_, game)) = LAYOUT.iter().find(|(name, _)| root.join(name).exists()) {
            return *game;
        }

        if root.join("Data").join("data").exists() && root.join("_retail_").exists() {
            return GameType::WoW;
        }

        build_config
            .and_then(|config| {
                config
                    .value("build-uid", 0)
                    .or_else(|| config.value("build-product", 0))
            })
            .map(Self::from_uid)
            .unwrap_or(GameType::Unknown)
    }

    /// The folder under the installation root holding `config/`, `data/` and `indices/`.
    pub fn data_folder(self) -> &'static str {
        match self {
            GameType::HotS => "HeroesData",
            GameType::S2 => "SC2Data",
            GameType::Hearthstone => "Hearthstone_Data",
            _ => "Data",
        }
    }

    /// Titles whose root exists but whose layout is not modelled.
    pub fn has_placeholder_root(self) -> bool {
        matches!(
            self,
            GameType::Agent
                | GameType::Bna
                | GameType::Client
                | GameType::D3
                | GameType::Overwatch
                | GameType::HotS
                | GameType::S2
                | GameType::Hearthstone
                | GameType::D4
        )
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_prefix() {
        assert_eq!(GameType::from_uid("wow_classic_era"), GameType::WoW);
        assert_eq!(GameType::from_uid("hero"), GameType::HotS);
        assert_eq!(GameType::from_uid("Pro"), GameType::Overwatch);
        assert_eq!(GameType::from_uid("fenris"), GameType::D4);
        assert_eq!(GameType::from_uid("odin"), GameType::CoD);
        assert_eq!(GameType::from_uid("foo"), GameType::Unknown);
    }

    #[test]
    fn data_folder_per_title() {
        assert_eq!(GameType::S2.data_folder(), "SC2Data");
        assert_eq!(GameType::WoW.data_folder(), "Data");
        assert_eq!(GameType::Unknown.data_folder(), "Data");
    }

    #[test]
    fn local_detection_uses_layout_then_build_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("SC2Data")).unwrap();
        assert_eq!(GameType::detect_local(dir.path(), None), GameType::S2);

        let empty = tempfile::tempdir().unwrap();
        let config = CascConfig::parse_str("build-uid = w3\n", "build").unwrap();
        assert_eq!(GameType::detect_local(empty.path(), Some(&config)), GameType::WC3);
        assert_eq!(GameType::detect_local(empty.path(), None), GameType::Unknown);
    }
}
