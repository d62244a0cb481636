//! BLTE: the chunked, optionally compressed and encrypted container every
//! stored blob is wrapped in.

pub mod block_table_encoder_type;
pub mod block_table_entry;
pub mod block_table_header;

use crate::error::{CascError, Result};
use crate::tact_keys::{salsa20_apply, KeyStore};
use block_table_encoder_type::BlockTableEncoderType;
use block_table_entry::BlockTableEntry;
use block_table_header::BlockTableHeader;
use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use std::io::{Cursor, Read};
use tracing::{trace, warn};

/// Decodes BLTE frames with a key store and the storage's failure policy.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder<'a> {
    keys: &'a KeyStore,
    throw_on_missing_key: bool,
    validate: bool,
}

impl<'a> FrameDecoder<'a> {
    pub fn new(keys: &'a KeyStore, throw_on_missing_key: bool, validate: bool) -> Self {
        Self {
            keys,
            throw_on_missing_key,
            validate,
        }
    }

    /// Decodes a whole in-memory BLTE blob.
    pub fn decode_blte(&self, blob: &[u8]) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(blob);
        let header = BlockTableHeader::read(&mut cursor)?;

        if header.frames.is_empty() {
            return self.decode_frame(&blob[8..], 0, None);
        }

        let mut output = Vec::with_capacity(header.content_size().unwrap_or(0) as usize);
        let mut offset = header.header_size as usize;
        for (index, frame) in header.frames.iter().enumerate() {
            let end = offset + frame.encoded_size as usize;
            let encoded = blob.get(offset..end).ok_or_else(|| {
                CascError::InvalidData(format!(
                    "BLTE frame {index} ends at {end}, past the blob end {}",
                    blob.len()
                ))
            })?;
            output.extend_from_slice(&self.decode_frame(encoded, index, Some(frame))?);
            offset = end;
        }
        Ok(output)
    }

    /// Decodes one encoded frame (mode byte included).
    ///
    /// `index` is the frame's position in its blob; it feeds the decryption IV.
    pub fn decode_frame(
        &self,
        encoded: &[u8],
        index: usize,
        entry: Option<&BlockTableEntry>,
    ) -> Result<Vec<u8>> {
        if let Some(entry) = entry.filter(|_| self.validate) {
            let digest = md5::compute(encoded);
            if digest.0 != entry.hash {
                return Err(CascError::ChecksumMismatch(format!(
                    "BLTE frame {index}: expected {}, got {}",
                    hex::encode(entry.hash),
                    hex::encode(digest.0)
                )));
            }
        }

        let (&mode, payload) = encoded
            .split_first()
            .ok_or_else(|| CascError::InvalidData(format!("BLTE frame {index} is empty")))?;
        let expected = entry.map(|e| e.content_size as usize);

        let decoded = match BlockTableEncoderType::from(mode) {
            BlockTableEncoderType::Raw => payload.to_vec(),
            BlockTableEncoderType::ZLib => {
                let mut decoder = ZlibDecoder::new(payload);
                let mut output = Vec::with_capacity(expected.unwrap_or(payload.len() * 2));
                decoder.read_to_end(&mut output)?;
                output
            }
            BlockTableEncoderType::Encrypted => self.decrypt_frame(payload, index, expected)?,
            BlockTableEncoderType::Unknown(other) => {
                return Err(CascError::UnsupportedEncoding(other))
            }
        };

        if let Some(expected) = expected {
            if decoded.len() != expected {
                return Err(CascError::InvalidData(format!(
                    "BLTE frame {index} decoded to {} bytes, expected {expected}",
                    decoded.len()
                )));
            }
        }
        Ok(decoded)
    }

    fn decrypt_frame(&self, payload: &[u8], index: usize, expected: Option<usize>) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(payload);

        let key_name_size = cursor.read_u8()?;
        if key_name_size != 8 {
            return Err(CascError::InvalidData(format!(
                "Encrypted frame {index}: key name size {key_name_size}"
            )));
        }
        let key_name = cursor.read_u64::<LittleEndian>()?;

        let iv_size = cursor.read_u8()? as usize;
        let start = cursor.position() as usize;
        let iv = payload.get(start..start + iv_size).ok_or_else(|| {
            CascError::InvalidData(format!("Encrypted frame {index}: truncated IV"))
        })?;
        cursor.set_position((start + iv_size) as u64);

        let kind = cursor.read_u8()?;
        if kind != b'S' {
            return Err(CascError::InvalidData(format!(
                "Encrypted frame {index}: unsupported cipher {kind:#04x}"
            )));
        }

        let Some(key) = self.keys.get(key_name) else {
            if self.throw_on_missing_key {
                return Err(CascError::MissingDecryptionKey(key_name));
            }
            warn!("Key {key_name:016X} missing, zero-filling frame {index}");
            return Ok(vec![0u8; expected.unwrap_or(0)]);
        };

        let mut data = payload[cursor.position() as usize..].to_vec();
        salsa20_apply(&key, iv, index, &mut data)?;
        trace!("Decrypted frame {index} with key {key_name:016X}");

        // The plaintext is a frame of its own, mode byte first.
        self.decode_frame(&data, index, None)
    }
}
