use byteorder::{BigEndian, ReadBytesExt};
use std::io::{self, Cursor, Read, Seek, SeekFrom};

/// Look-ahead on seekable readers.
pub trait PeekExt: Read + Seek {
    /// Reads one byte and steps back over it.
    fn peek_byte(&mut self) -> io::Result<u8> {
        let byte = self.read_u8()?;
        self.seek(SeekFrom::Current(-1))?;
        Ok(byte)
    }
}

impl<T: Read + Seek> PeekExt for T {}

/// Fixed and variable width reads used by the binary manifests.
pub trait BinaryReadExt: Read {
    /// Reads exactly `length` bytes.
    fn read_bytes(&mut self, length: usize) -> io::Result<Vec<u8>>;

    /// Reads a fixed-size array.
    fn read_fixed<const N: usize>(&mut self) -> io::Result<[u8; N]>;

    /// Reads a 40-bit big-endian integer.
    fn read_u40_be(&mut self) -> io::Result<u64>;

    /// Reads a big-endian integer of `width` bytes (0 to 8).
    fn read_uint_be(&mut self, width: usize) -> io::Result<u64>;

    /// Reads a NUL-terminated string.
    fn read_cstring(&mut self) -> io::Result<String>;
}

impl<T> BinaryReadExt for T
where
    T: Read,
{
    fn read_bytes(&mut self, length: usize) -> io::Result<Vec<u8>> {
        let mut result = Vec::new();
        self.take(length as u64).read_to_end(&mut result)?;
        if result.len() != length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Wanted {length} bytes, got {}", result.len()),
            ));
        }
        Ok(result)
    }

    fn read_fixed<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut result = [0u8; N];
        self.read_exact(&mut result)?;
        Ok(result)
    }

    fn read_u40_be(&mut self) -> io::Result<u64> {
        self.read_uint_be(5)
    }

    fn read_uint_be(&mut self, width: usize) -> io::Result<u64> {
        match width {
            0 => Ok(0),
            1..=8 => self.read_uint::<BigEndian>(width),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Integer width {width} out of range"),
            )),
        }
    }

    fn read_cstring(&mut self) -> io::Result<String> {
        let mut bytes = Vec::new();
        loop {
            let byte = self.read_u8()?;
            if byte == 0 {
                break;
            }
            bytes.push(byte);
        }
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Bounds for record counts read from untrusted headers.
pub trait RemainingExt {
    /// Bytes left after the current position.
    fn remaining_len(&self) -> usize;

    /// Capacity for `count` records of at least `record_size` bytes each,
    /// capped by what the remaining bytes can hold.
    fn capacity_for(&self, count: usize, record_size: usize) -> usize {
        count.min(self.remaining_len() / record_size.max(1))
    }
}

impl<T: AsRef<[u8]>> RemainingExt for Cursor<T> {
    fn remaining_len(&self) -> usize {
        let len = self.get_ref().as_ref().len();
        len.saturating_sub(usize::try_from(self.position()).unwrap_or(len))
    }
}

/// Utility methods for working with seekable streams.
pub trait SeekExt: Seek {
    /// Skips over the given number of bytes from the current position.
    fn skip<P: Copy + 'static>(&mut self, size: P) -> io::Result<u64>
    where
        u64: TryFrom<P>;
}

impl<T> SeekExt for T
where
    T: Seek,
{
    fn skip<P: Copy + 'static>(&mut self, size: P) -> io::Result<u64>
    where
        u64: TryFrom<P>,
    {
        let size = u64::try_from(size).map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?;
        let size = i64::try_from(size).map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?;

        self.seek(SeekFrom::Current(size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_wide_and_terminated_values() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 1, 0, b'h', b'i', 0, 0xAB]);
        assert_eq!(cursor.read_u40_be().unwrap(), 256);
        assert_eq!(cursor.read_cstring().unwrap(), "hi");
        assert_eq!(cursor.peek_byte().unwrap(), 0xAB);
        assert_eq!(cursor.read_fixed::<1>().unwrap(), [0xAB]);
        assert!(cursor.peek_byte().is_err());
    }

    #[test]
    fn skips_and_reads_variable_widths() {
        let mut cursor = Cursor::new(vec![9, 9, 0x01, 0x02, 0x03, b'b']);
        cursor.skip(2u8).unwrap();
        assert_eq!(cursor.read_uint_be(3).unwrap(), 0x010203);
        assert_eq!(cursor.read_bytes(1).unwrap(), b"b");
        assert!(cursor.read_uint_be(9).is_err());
    }

    #[test]
    fn oversized_lengths_fail_without_allocating() {
        let mut cursor = Cursor::new(vec![1u8, 2, 3]);
        assert_eq!(cursor.capacity_for(u32::MAX as usize, 2), 1);
        let err = cursor.read_bytes(usize::MAX / 2).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        cursor.set_position(10);
        assert_eq!(cursor.remaining_len(), 0);
        assert_eq!(cursor.capacity_for(5, 0), 0);
    }
}
