//! 16-byte content-addressed identifiers.
//!
//! A [`ContentKey`] names *what* a file contains, an [`EncodingKey`] names one
//! physical (possibly compressed or chunked) encoding of it.

use crate::error::{CascError, Result};
use std::fmt;

/// Length in bytes of a content or encoding key.
pub const KEY_LENGTH: usize = 16;

/// Number of encoding key bytes stored in local `.idx` files.
pub const LOCAL_KEY_LENGTH: usize = 9;

macro_rules! md5_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; KEY_LENGTH]);

        impl $name {
            /// Parses a key from exactly 32 hexadecimal digits.
            pub fn from_hex(text: &str) -> Result<Self> {
                let mut key = [0u8; KEY_LENGTH];
                hex::decode_to_slice(text.trim(), &mut key).map_err(|e| {
                    CascError::InvalidData(format!(
                        "Invalid {} '{}': {e}",
                        stringify!($name),
                        text
                    ))
                })?;
                Ok(Self(key))
            }

            /// Builds a key from a slice that must be exactly 16 bytes long.
            pub fn from_slice(bytes: &[u8]) -> Result<Self> {
                let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| {
                    CascError::InvalidData(format!(
                        "{} must be {KEY_LENGTH} bytes, got {}",
                        stringify!($name),
                        bytes.len()
                    ))
                })?;
                Ok(Self(key))
            }

            /// Lowercase hexadecimal form, as used in config files and CDN paths.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|&b| b == 0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl From<[u8; KEY_LENGTH]> for $name {
            fn from(bytes: [u8; KEY_LENGTH]) -> Self {
                Self(bytes)
            }
        }
    };
}

md5_key!(
    /// Identifies the logical content of a file, independent of storage.
    ContentKey
);

md5_key!(
    /// Identifies one stored encoding of some content.
    EncodingKey
);

impl EncodingKey {
    /// The truncated key that local `.idx` files store.
    pub fn prefix9(&self) -> [u8; LOCAL_KEY_LENGTH] {
        let mut prefix = [0u8; LOCAL_KEY_LENGTH];
        prefix.copy_from_slice(&self.0[..LOCAL_KEY_LENGTH]);
        prefix
    }
}

/// Splits a hex key into the `xx/yy/key` form used by config and CDN paths.
pub(crate) fn hex_path(key: &str) -> Result<String> {
    let key = key.to_ascii_lowercase();
    if key.len() < 4 || !key.is_ascii() {
        return Err(CascError::InvalidData(format!("Key '{key}' is too short")));
    }
    Ok(format!("{}/{}/{}", &key[0..2], &key[2..4], key))
}
