//! Named 16-byte keys for encrypted BLTE frames, and the Salsa20 variant they use.

use crate::error::{CascError, Result};
use parking_lot::RwLock;
use salsa20::cipher::{KeyIvInit, StreamCipher};
use salsa20::Salsa20;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Thread-safe store of decryption keys by 64-bit key name.
#[derive(Debug, Default)]
pub struct KeyStore {
    keys: RwLock<HashMap<u64, [u8; 16]>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: u64, key: [u8; 16]) {
        self.keys.write().insert(name, key);
    }

    pub fn get(&self, name: u64) -> Option<[u8; 16]> {
        self.keys.read().get(&name).copied()
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    /// Adds keys from text lines of `<key name hex> <key hex>`.
    ///
    /// Lines that do not parse are skipped. Returns the number of keys added.
    pub fn load_str(&self, text: &str) -> usize {
        let mut added = 0;
        let mut keys = self.keys.write();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(name), Some(key)) = (parts.next(), parts.next()) else {
                warn!("Skipping key line {}: expected name and key", number + 1);
                continue;
            };
            let Ok(name) = u64::from_str_radix(name, 16) else {
                warn!("Skipping key line {}: bad key name", number + 1);
                continue;
            };
            let mut bytes = [0u8; 16];
            if hex::decode_to_slice(key, &mut bytes).is_err() {
                warn!("Skipping key line {}: bad key", number + 1);
                continue;
            }
            keys.insert(name, bytes);
            added += 1;
        }
        debug!("Loaded {added} decryption keys");
        added
    }

    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|_| CascError::FileNotFound(path.display().to_string()))?;
        Ok(self.load_str(&text))
    }
}

/// Applies the BLTE Salsa20 keystream to `data` in place.
///
/// The 16-byte key is repeated to 32 bytes, the IV is repeated to 8 bytes and
/// the frame index is XORed into its first four bytes.
pub fn salsa20_apply(key: &[u8; 16], iv: &[u8], frame_index: usize, data: &mut [u8]) -> Result<()> {
    if iv.is_empty() || iv.len() > 8 {
        return Err(CascError::InvalidData(format!(
            "Invalid Salsa20 IV length {}",
            iv.len()
        )));
    }

    let mut full_key = [0u8; 32];
    full_key[..16].copy_from_slice(key);
    full_key[16..].copy_from_slice(key);

    let mut full_iv = [0u8; 8];
    for (i, byte) in full_iv.iter_mut().enumerate() {
        *byte = iv[i % iv.len()];
    }
    for (i, byte) in (frame_index as u32).to_le_bytes().iter().enumerate() {
        full_iv[i] ^= byte;
    }

    let mut cipher = Salsa20::new(&full_key.into(), &full_iv.into());
    cipher.apply_keystream(data);
    Ok(())
}
