use bitflags::bitflags;

bitflags! {
    /// Bitmask of locales a root entry applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    pub struct LocaleFlags: u32 {
        const EN_US = 0x2;
        const KO_KR = 0x4;
        const FR_FR = 0x10;
        const DE_DE = 0x20;
        const ZH_CN = 0x40;
        const ES_ES = 0x80;
        const ZH_TW = 0x100;
        const EN_GB = 0x200;
        const EN_CN = 0x400;
        const EN_TW = 0x800;
        const ES_MX = 0x1000;
        const RU_RU = 0x2000;
        const PT_BR = 0x4000;
        const IT_IT = 0x8000;
        const PT_PT = 0x10000;
        const ALL = 0xFFFF_FFFF;
    }
}

bitflags! {
    /// Content flags attached to legacy root blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    pub struct ContentFlags: u32 {
        const HIGH_RES_TEXTURE = 0x1;
        const INSTALL = 0x4;
        const WINDOWS = 0x8;
        const MACOS = 0x10;
        const X86_32 = 0x20;
        const X86_64 = 0x40;
        const LOW_VIOLENCE = 0x80;
        const DO_NOT_LOAD = 0x100;
        const UPDATE_PLUGIN = 0x800;
        const ARM64 = 0x8000;
        const ENCRYPTED = 0x800_0000;
        const NO_NAME_HASH = 0x1000_0000;
        const UNCOMMON_RESOLUTION = 0x2000_0000;
        const BUNDLE = 0x4000_0000;
        const NO_COMPRESSION = 0x8000_0000;
    }
}

const LOCALE_NAMES: &[(LocaleFlags, &str)] = &[
    (LocaleFlags::EN_US, "enUS"),
    (LocaleFlags::KO_KR, "koKR"),
    (LocaleFlags::FR_FR, "frFR"),
    (LocaleFlags::DE_DE, "deDE"),
    (LocaleFlags::ZH_CN, "zhCN"),
    (LocaleFlags::ES_ES, "esES"),
    (LocaleFlags::ZH_TW, "zhTW"),
    (LocaleFlags::EN_GB, "enGB"),
    (LocaleFlags::EN_CN, "enCN"),
    (LocaleFlags::EN_TW, "enTW"),
    (LocaleFlags::ES_MX, "esMX"),
    (LocaleFlags::RU_RU, "ruRU"),
    (LocaleFlags::PT_BR, "ptBR"),
    (LocaleFlags::IT_IT, "itIT"),
    (LocaleFlags::PT_PT, "ptPT"),
];

impl LocaleFlags {
    /// Parses a manifest tag name such as `enUS` (case-insensitive).
    pub fn from_tag(tag: &str) -> Option<Self> {
        LOCALE_NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(tag))
            .map(|(flag, _)| *flag)
    }

    /// Tag names of every single locale contained in `self`.
    pub fn tag_names(self) -> Vec<&'static str> {
        LOCALE_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    /// `true` if an entry carrying `self` should be served to `wanted`.
    pub fn matches(self, wanted: LocaleFlags) -> bool {
        self == LocaleFlags::ALL || wanted == LocaleFlags::ALL || self.intersects(wanted)
    }
}
