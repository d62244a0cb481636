use crate::block_table::block_table_header::{BlockTableHeader, BLTE_SIGNATURE};
use crate::block_table::FrameDecoder;
use crate::casc_file_frame::CascFileFrame;
use crate::error::{CascError, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

/// Where the encoded bytes of a span live.
#[derive(Debug, Clone)]
pub(crate) enum SpanSource {
    /// A shared handle to a local `data.NNN` file.
    Local(Arc<Mutex<File>>),
    /// A blob already in memory, fetched from a CDN or decoded up front.
    Memory(Arc<Vec<u8>>),
}

impl SpanSource {
    pub(crate) fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        match self {
            SpanSource::Local(file) => {
                let mut buffer = vec![0u8; length];
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut buffer)?;
                Ok(buffer)
            }
            SpanSource::Memory(data) => {
                let start = offset as usize;
                data.get(start..start + length)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| {
                        CascError::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("Read of {length} bytes at {offset} past end of blob"),
                        ))
                    })
            }
        }
    }
}

/// Represents a span in a CASC file: one BLTE blob, or a byte range of one,
/// placed at a position in the logical file.
#[derive(Debug, Clone)]
pub(crate) struct CascFileSpan {
    source: SpanSource,
    /// The logical start offset of the span in the file.
    pub(crate) virtual_start_offset: u64,
    /// The logical end offset of the span in the file.
    pub(crate) virtual_end_offset: u64,
    /// Decoded bytes of the blob skipped before the span starts.
    content_offset: u64,
    /// The file frames of the blob, offsets relative to the decoded blob.
    pub(crate) frames: Vec<CascFileFrame>,
}

impl CascFileSpan {
    /// Reads the block table of the blob at `blob_offset` in `source`.
    ///
    /// `range` restricts the span to `(offset, length)` of the decoded blob.
    /// A blob without a block table is decoded immediately.
    pub(crate) fn new(
        source: SpanSource,
        blob_offset: u64,
        blob_length: u64,
        virtual_start_offset: u64,
        range: Option<(u64, u64)>,
        decoder: &FrameDecoder<'_>,
    ) -> Result<Self> {
        let prefix = source.read_at(blob_offset, 8)?;
        let signature = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        if signature != BLTE_SIGNATURE {
            return Err(CascError::BadMagic {
                what: "BLTE",
                found: signature,
            });
        }
        let header_size = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);

        let (source, frames) = if header_size == 0 {
            let encoded = source.read_at(blob_offset + 8, blob_length.saturating_sub(8) as usize)?;
            let mut decoded = vec![b'N'];
            decoded.extend(decoder.decode_frame(&encoded, 0, None)?);
            let size = decoded.len() as u64 - 1;
            let frame = CascFileFrame {
                virtual_start_offset: 0,
                virtual_end_offset: size,
                archive_offset: 0,
                entry: None,
                index: 0,
                encoded_size: decoded.len() as u32,
            };
            (SpanSource::Memory(Arc::new(decoded)), vec![frame])
        } else {
            let raw = source.read_at(blob_offset, header_size as usize)?;
            let header = BlockTableHeader::read(&mut Cursor::new(raw))?;

            let mut archive_offset = blob_offset + header.encoded_length();
            let mut virtual_offset = 0u64;
            let mut frames = Vec::with_capacity(header.frames.len());
            for (index, entry) in header.frames.iter().enumerate() {
                frames.push(CascFileFrame {
                    virtual_start_offset: virtual_offset,
                    virtual_end_offset: virtual_offset + entry.content_size as u64,
                    archive_offset,
                    entry: Some(*entry),
                    index,
                    encoded_size: entry.encoded_size,
                });
                archive_offset += entry.encoded_size as u64;
                virtual_offset += entry.content_size as u64;
            }
            if archive_offset > blob_offset + blob_length {
                return Err(CascError::InvalidData(format!(
                    "BLTE frames run {} bytes past the blob",
                    archive_offset - blob_offset - blob_length
                )));
            }
            (source, frames)
        };

        let decoded_size = frames.last().map(|f| f.virtual_end_offset).unwrap_or(0);
        let (content_offset, content_length) = range.unwrap_or((0, decoded_size));
        if content_offset + content_length > decoded_size {
            return Err(CascError::InvalidData(format!(
                "Span range {content_offset}+{content_length} exceeds blob size {decoded_size}"
            )));
        }

        Ok(Self {
            source,
            virtual_start_offset,
            virtual_end_offset: virtual_start_offset + content_length,
            content_offset,
            frames,
        })
    }

    pub(crate) fn len(&self) -> u64 {
        self.virtual_end_offset - self.virtual_start_offset
    }

    /// Maps a logical file position inside this span to a decoded blob position.
    pub(crate) fn blob_position(&self, position: u64) -> u64 {
        position - self.virtual_start_offset + self.content_offset
    }

    /// Index of the frame holding the decoded blob position.
    pub(crate) fn frame_index(&self, blob_position: u64) -> Option<usize> {
        let index = self
            .frames
            .partition_point(|f| f.virtual_end_offset <= blob_position);
        (index < self.frames.len()).then_some(index)
    }

    pub(crate) fn decode(&self, frame_index: usize, decoder: &FrameDecoder<'_>) -> Result<Vec<u8>> {
        let frame = self.frames.get(frame_index).ok_or_else(|| {
            CascError::InvalidData(format!("Frame {frame_index} out of range"))
        })?;
        let encoded = self
            .source
            .read_at(frame.archive_offset, frame.encoded_size as usize)?;
        decoder.decode_frame(&encoded, frame.index, frame.entry.as_ref())
    }

    /// Decodes the span frame by frame into `writer`. Returns the bytes written.
    pub(crate) fn write_to<W: Write>(&self, writer: &mut W, decoder: &FrameDecoder<'_>) -> Result<u64> {
        let start = self.content_offset;
        let end = self.content_offset + self.len();
        let mut written = 0u64;

        let Some(first) = self.frame_index(start) else {
            return Ok(0);
        };
        for index in first..self.frames.len() {
            let frame = &self.frames[index];
            if frame.virtual_start_offset >= end {
                break;
            }
            let data = self.decode(index, decoder)?;
            let from = start.saturating_sub(frame.virtual_start_offset) as usize;
            let to = (end.min(frame.virtual_end_offset) - frame.virtual_start_offset) as usize;
            writer.write_all(&data[from..to])?;
            written += (to - from) as u64;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tact_keys::KeyStore;

    fn span_of(blob: Vec<u8>) -> Result<CascFileSpan> {
        let keys = KeyStore::new();
        let decoder = FrameDecoder::new(&keys, true, false);
        let length = blob.len() as u64;
        CascFileSpan::new(SpanSource::Memory(Arc::new(blob)), 0, length, 0, None, &decoder)
    }

    #[test]
    fn headerless_blob_decodes_as_one_frame() {
        let mut blob = b"BLTE".to_vec();
        blob.extend_from_slice(&0u32.to_be_bytes());
        blob.extend_from_slice(b"Nhello");

        let span = span_of(blob).unwrap();
        assert_eq!(span.len(), 5);
        assert_eq!(span.frames.len(), 1);
    }

    #[test]
    fn headerless_blob_without_signature_is_rejected() {
        let mut blob = b"XXXX".to_vec();
        blob.extend_from_slice(&0u32.to_be_bytes());
        blob.extend_from_slice(b"Nhello");

        assert!(matches!(
            span_of(blob),
            Err(CascError::BadMagic { what: "BLTE", found: 0x5858_5858 })
        ));
    }
}
