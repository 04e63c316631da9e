//! The seekable byte stream every other component decodes from.
//!
//! The whole file is pulled into memory up front; the reader then hands out
//! primitives at the declared endianness and pointer width. Endianness and
//! pointer width are not known until the file header has been parsed, so the
//! reader starts with placeholder values and [`StreamReader::set_layout`] is
//! called once the header flags are in.

use crate::error::{FormatError, Result};
use crate::parsers::primitive::{
    parse_address, parse_f32, parse_f64, parse_i16, parse_i32, parse_i64, parse_i8, parse_u16,
    parse_u32, parse_u64, parse_u8,
};
use crate::parsers::{Endianness, PointerSize};
use std::fmt;

pub struct StreamReader {
    data: Vec<u8>,
    position: usize,
    endianness: Endianness,
    pointer_size: PointerSize,
}

// The backing buffer is the whole file; report the cursor, not the bytes.
impl fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader")
            .field("position", &self.position)
            .field("len", &self.data.len())
            .field("endianness", &self.endianness)
            .field("pointer_size", &self.pointer_size)
            .finish()
    }
}

impl StreamReader {
    pub fn new(data: Vec<u8>) -> StreamReader {
        StreamReader {
            data,
            position: 0,
            endianness: Endianness::Little,
            pointer_size: PointerSize::Bits64,
        }
    }

    /// Installs the endianness and pointer width read from the file header.
    /// Must happen before any multi-byte or pointer-sized read.
    pub fn set_layout(&mut self, endianness: Endianness, pointer_size: PointerSize) {
        self.endianness = endianness;
        self.pointer_size = pointer_size;
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn pointer_size(&self) -> PointerSize {
        self.pointer_size
    }

    pub fn position(&self) -> u64 {
        self.position as u64
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Absolute seek. Seeking to the exact end of the stream is allowed,
    /// anything past it is not.
    pub fn set_position(&mut self, position: u64) -> Result<()> {
        if position > self.data.len() as u64 {
            return Err(FormatError::BadSeek {
                position,
                len: self.data.len() as u64,
            });
        }
        self.position = position as usize;
        Ok(())
    }

    /// Relative skip, bounds-checked like a seek.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.set_position(self.position as u64 + len as u64)
    }

    /// Advances to the next multiple of `boundary`. Block headers sit on
    /// 4-byte boundaries regardless of the preceding payload length.
    pub fn align(&mut self, boundary: usize) -> Result<()> {
        let rem = self.position % boundary;
        if rem != 0 {
            self.skip(boundary - rem)?;
        }
        Ok(())
    }

    /// Returns the next `len` bytes and advances past them.
    pub fn read_exact(&mut self, len: usize) -> Result<&[u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(FormatError::OutOfBounds {
                position: self.position as u64,
                wanted: len,
                len: self.data.len() as u64,
            })?;
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let endianness = self.endianness;
        Ok(parse_u8(self.read_exact(1)?, endianness))
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        let endianness = self.endianness;
        Ok(parse_i8(self.read_exact(1)?, endianness))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let endianness = self.endianness;
        Ok(parse_u16(self.read_exact(2)?, endianness))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let endianness = self.endianness;
        Ok(parse_i16(self.read_exact(2)?, endianness))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let endianness = self.endianness;
        Ok(parse_u32(self.read_exact(4)?, endianness))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let endianness = self.endianness;
        Ok(parse_i32(self.read_exact(4)?, endianness))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let endianness = self.endianness;
        Ok(parse_u64(self.read_exact(8)?, endianness))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let endianness = self.endianness;
        Ok(parse_i64(self.read_exact(8)?, endianness))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let endianness = self.endianness;
        Ok(parse_f32(self.read_exact(4)?, endianness))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let endianness = self.endianness;
        Ok(parse_f64(self.read_exact(8)?, endianness))
    }

    /// Reads one pointer-width address, widened to `u64`.
    pub fn read_pointer(&mut self) -> Result<u64> {
        let endianness = self.endianness;
        let pointer_size = self.pointer_size;
        Ok(parse_address(
            self.read_exact(pointer_size.bytes_num())?,
            endianness,
            pointer_size,
        ))
    }

    /// Drops the backing buffer. Called when the load context closes; any
    /// later read fails its bounds check.
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &[u8]) -> StreamReader {
        StreamReader::new(bytes.to_vec())
    }

    #[test]
    fn reads_follow_declared_endianness() {
        let mut r = reader(&[0x01, 0x02, 0x01, 0x02]);
        r.set_layout(Endianness::Little, PointerSize::Bits64);
        assert_eq!(r.read_u16().unwrap(), 0x0201);
        r.set_layout(Endianness::Big, PointerSize::Bits64);
        assert_eq!(r.read_u16().unwrap(), 0x0102);
    }

    #[test]
    fn pointer_width_drives_address_reads() {
        let bytes = [0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut r = reader(&bytes);
        r.set_layout(Endianness::Little, PointerSize::Bits32);
        assert_eq!(r.read_pointer().unwrap(), 0x10);
        assert_eq!(r.position(), 4);

        let mut r = reader(&bytes);
        r.set_layout(Endianness::Little, PointerSize::Bits64);
        assert_eq!(r.read_pointer().unwrap(), 0x10);
        assert_eq!(r.position(), 8);
    }

    #[test]
    fn align_pads_to_the_boundary() {
        let mut r = reader(&[0; 16]);
        r.skip(1).unwrap();
        r.align(4).unwrap();
        assert_eq!(r.position(), 4);
        r.align(4).unwrap();
        assert_eq!(r.position(), 4);
    }

    #[test]
    fn seeks_and_reads_are_bounds_checked() {
        let mut r = reader(&[0; 4]);
        assert!(matches!(
            r.set_position(5),
            Err(FormatError::BadSeek { position: 5, len: 4 })
        ));
        r.set_position(4).unwrap();
        assert!(matches!(
            r.read_u8(),
            Err(FormatError::OutOfBounds { position: 4, wanted: 1, len: 4 })
        ));
    }

    #[test]
    fn debug_output_shows_the_cursor_not_the_buffer() {
        let mut r = reader(&[1, 2, 3, 4]);
        r.skip(2).unwrap();
        let printed = format!("{:?}", r);
        assert!(printed.contains("position: 2"), "{}", printed);
        assert!(!printed.contains("1, 2, 3, 4"), "{}", printed);
    }

    #[test]
    fn release_empties_the_stream() {
        let mut r = reader(&[1, 2, 3, 4]);
        r.release();
        assert!(r.is_empty());
        assert!(r.read_u8().is_err());
    }
}
