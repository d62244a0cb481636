//! Behaviour switches threaded through [`CascStorage`](crate::casc_storage::CascStorage).

use crate::locale_flags::LocaleFlags;
use bitflags::bitflags;
use std::path::PathBuf;

bitflags! {
    /// Optional manifests loaded while opening a storage.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LoadFlags: u32 {
        const DOWNLOAD = 0x1;
        const INSTALL = 0x2;
        const FILE_INDEX = 0x4;
    }
}

/// Options controlling how a storage is opened and how lookups fail.
#[derive(Debug, Clone)]
pub struct CascOptions {
    /// Optional manifests to load after encoding and root.
    pub load_flags: LoadFlags,
    /// Locale used to pick between regional root and install entries.
    pub locale: LocaleFlags,
    /// Raise [`CascError::FileNotFound`](crate::error::CascError::FileNotFound)
    /// instead of returning an empty result.
    pub throw_on_file_not_found: bool,
    /// Raise [`CascError::MissingDecryptionKey`](crate::error::CascError::MissingDecryptionKey)
    /// instead of zero-filling frames encrypted with an unknown key.
    pub throw_on_missing_decryption_key: bool,
    /// Fetch keys absent from local indexes from the CDN (needs a fetcher).
    pub online_fallback: bool,
    /// Online only: activate the build named by the versions manifest instead of the first one.
    pub use_current_build: bool,
    /// Verify BLTE frame checksums and local span headers while reading.
    pub validate_data: bool,
    /// Directory holding `fakecdnconfig`, `fakebuildconfig` and their `*hash` variants.
    pub override_dir: Option<PathBuf>,
    /// Region used to pick rows of the `versions` and `cdns` manifests.
    pub region: String,
}

impl Default for CascOptions {
    fn default() -> Self {
        Self {
            load_flags: LoadFlags::empty(),
            locale: LocaleFlags::EN_US,
            throw_on_file_not_found: true,
            throw_on_missing_decryption_key: true,
            online_fallback: false,
            use_current_build: false,
            validate_data: false,
            override_dir: None,
            region: "us".to_string(),
        }
    }
}

impl CascOptions {
    /// Options that return empty results instead of raising not-found errors.
    pub fn tolerant() -> Self {
        Self {
            throw_on_file_not_found: false,
            throw_on_missing_decryption_key: false,
            ..Self::default()
        }
    }

    pub fn with_load_flags(mut self, flags: LoadFlags) -> Self {
        self.load_flags = flags;
        self
    }

    pub fn with_locale(mut self, locale: LocaleFlags) -> Self {
        self.locale = locale;
        self
    }
}
