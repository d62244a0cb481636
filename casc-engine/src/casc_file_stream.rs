use crate::block_table::FrameDecoder;
use crate::casc_file_span::CascFileSpan;
use crate::tact_keys::KeyStore;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

/// A readable, seekable view of one file stored in a CASC storage.
///
/// The file may be made of several spans (independently stored blobs);
/// reads cross span boundaries transparently. Frames are decoded on demand
/// and the most recent one is cached.
pub struct CascFileStream {
    spans: Vec<CascFileSpan>,
    length: u64,
    position: u64,
    keys: Arc<KeyStore>,
    throw_on_missing_key: bool,
    validate: bool,
    /// (span, frame, decoded bytes) of the last decoded frame.
    cache: Option<(usize, usize, Vec<u8>)>,
}

impl fmt::Debug for CascFileStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CascFileStream")
            .field("spans", &self.spans.len())
            .field("length", &self.length)
            .field("position", &self.position)
            .finish()
    }
}

impl CascFileStream {
    pub(crate) fn new(
        spans: Vec<CascFileSpan>,
        keys: Arc<KeyStore>,
        throw_on_missing_key: bool,
        validate: bool,
    ) -> Self {
        let length = spans.last().map(|s| s.virtual_end_offset).unwrap_or(0);
        CascFileStream {
            spans,
            length,
            position: 0,
            keys,
            throw_on_missing_key,
            validate,
            cache: None,
        }
    }

    /// Returns the total size of the file.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of independently stored chunks the file is made of.
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    fn cached_frame(&mut self, span_index: usize, frame_index: usize) -> io::Result<&[u8]> {
        let hit = matches!(&self.cache, Some((s, f, _)) if *s == span_index && *f == frame_index);
        if !hit {
            let decoder = FrameDecoder::new(&self.keys, self.throw_on_missing_key, self.validate);
            let data = self.spans[span_index].decode(frame_index, &decoder)?;
            self.cache = Some((span_index, frame_index, data));
        }
        match &self.cache {
            Some((_, _, data)) => Ok(data),
            None => Err(io::Error::other("Frame cache empty")),
        }
    }
}

impl Read for CascFileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut consumed = 0;

        while consumed < buf.len() && self.position < self.length {
            let position = self.position;
            let span_index = self
                .spans
                .partition_point(|s| s.virtual_end_offset <= position);
            let span = self
                .spans
                .get(span_index)
                .ok_or_else(|| io::Error::other("Span not found"))?;
            let span_end = span.virtual_end_offset;
            let blob_position = span.blob_position(position);
            let frame_index = span
                .frame_index(blob_position)
                .ok_or_else(|| io::Error::other("Frame not found"))?;
            let frame_start = span.frames[frame_index].virtual_start_offset;

            let data = self.cached_frame(span_index, frame_index)?;
            let in_frame = (blob_position - frame_start) as usize;
            let available = (data.len().saturating_sub(in_frame) as u64).min(span_end - position) as usize;
            if available == 0 {
                return Err(io::Error::other("Decoded frame shorter than its table entry"));
            }
            let n = available.min(buf.len() - consumed);
            buf[consumed..consumed + n].copy_from_slice(&data[in_frame..in_frame + n]);
            consumed += n;
            self.position += n as u64;
        }
        Ok(consumed)
    }
}

impl Seek for CascFileStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(offset) => self.position.checked_add_signed(offset),
            SeekFrom::End(offset) => self.length.checked_add_signed(offset),
        };
        self.position = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Seek before start of stream")
        })?;
        Ok(self.position)
    }
}
