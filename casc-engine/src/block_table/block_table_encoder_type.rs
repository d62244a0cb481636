/// Represents the encoding type used for frames in the block table.
///
/// The first byte of every encoded frame names how the rest of it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTableEncoderType {
    /// Plain raw data, uncompressed and unencrypted.
    Raw,
    /// Zlib compressed data.
    ZLib,
    /// Encrypted data wrapping another frame.
    Encrypted,
    /// Unknown or unsupported type, stores the raw byte value.
    Unknown(u8),
}

impl From<u8> for BlockTableEncoderType {
    fn from(byte: u8) -> Self {
        match byte {
            b'N' => BlockTableEncoderType::Raw,
            b'Z' => BlockTableEncoderType::ZLib,
            b'E' => BlockTableEncoderType::Encrypted,
            other => BlockTableEncoderType::Unknown(other),
        }
    }
}
