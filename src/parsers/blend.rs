//! The file header and the block catalog.
//!
//! A .blend file is a 12-byte header followed by a flat sequence of tagged
//! blocks. Each block header records the code, the payload size, the memory
//! address the payload lived at when the exporting process saved the file,
//! the DNA structure index describing the payload and how many consecutive
//! elements of that structure the payload holds. The catalog scan indexes
//! every block by its recorded address so pointer fields can be chased later
//! without touching any payload.

use crate::error::{FormatError, Result};
use crate::parsers::{Endianness, PointerSize};
use crate::reader::StreamReader;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, Ordering};

/// Code of the block carrying the embedded schema.
pub const CODE_DNA: [u8; 4] = *b"DNA1";
/// Code of the terminal block. It has no payload and ends the scan.
pub const CODE_END: [u8; 4] = *b"ENDB";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// The fixed-size file header. Immutable, created once per load; the pointer
/// width is required to decode every block header that follows, so any
/// problem here is fatal.
#[derive(Debug, Clone)]
pub struct FileHeader {
    /// The pointer size on the machine used to export the file.
    pub pointer_size: PointerSize,
    /// The endianness on the machine used to export the file.
    pub endianness: Endianness,
    /// The exporting tool's version, three ASCII digits (e.g. `b"279"`).
    pub version: [u8; 3],
}

impl FileHeader {
    pub fn version_str(&self) -> String {
        String::from_utf8_lossy(&self.version).into_owned()
    }
}

/// Reads magic, pointer-width flag, endianness flag and version, and
/// installs the decoded layout on the reader.
pub fn parse_header(reader: &mut StreamReader) -> Result<FileHeader> {
    let magic = reader.read_exact(7)?;
    if magic != &b"BLENDER"[..] {
        if magic[..2] == GZIP_MAGIC {
            return Err(FormatError::CompressedNotSupported);
        }
        return Err(FormatError::BadMagic);
    }

    let position = reader.position();
    let pointer_size = match reader.read_u8()? {
        b'_' => PointerSize::Bits32,
        b'-' => PointerSize::Bits64,
        flag => return Err(FormatError::UnknownPointerSizeFlag { flag, position }),
    };

    let position = reader.position();
    let endianness = match reader.read_u8()? {
        b'v' => Endianness::Little,
        b'V' => Endianness::Big,
        flag => return Err(FormatError::UnknownEndiannessFlag { flag, position }),
    };

    let version_bytes = reader.read_exact(3)?;
    let version = [version_bytes[0], version_bytes[1], version_bytes[2]];

    let header = FileHeader {
        pointer_size,
        endianness,
        version,
    };
    reader.set_layout(header.endianness, header.pointer_size);
    Ok(header)
}

/// One catalogued block. The payload itself stays in the stream; only its
/// position is recorded here, structures are materialized from it on demand.
#[derive(Debug, Clone)]
pub struct FileBlock {
    pub code: [u8; 4],
    /// Payload size in bytes.
    pub size: usize,
    /// The export-time memory address. `None` when the recorded address was
    /// zero; such blocks can never be the target of a pointer.
    pub address: Option<NonZeroU64>,
    /// Index into the DNA structure table describing the payload layout.
    pub dna_index: usize,
    /// How many consecutive structure elements the payload holds.
    pub count: usize,
    /// Absolute stream position of the first payload byte.
    pub payload_position: u64,
}

impl FileBlock {
    /// The block code with trailing NULs stripped, for display.
    pub fn code_str(&self) -> String {
        self.code
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect()
    }
}

/// The address-to-block index built by the catalog scan.
#[derive(Debug)]
pub struct BlockCatalog {
    blocks: Vec<FileBlock>,
    by_address: HashMap<NonZeroU64, usize>,
}

impl BlockCatalog {
    /// Scans block headers from the reader's current position until the
    /// terminal block. Returns the catalog and the DNA block, which is
    /// captured separately and never indexed.
    ///
    /// `cancel` is checked once per header, never mid-header; a header and
    /// its payload skip are treated as an atomic unit.
    pub fn scan(
        reader: &mut StreamReader,
        cancel: Option<&AtomicBool>,
    ) -> Result<(BlockCatalog, FileBlock)> {
        let mut blocks = Vec::new();
        let mut by_address = HashMap::new();
        let mut dna_block = None;

        loop {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(FormatError::Cancelled);
                }
            }

            // Headers sit on 4-byte boundaries.
            reader.align(4)?;
            let header_position = reader.position();

            let code_bytes = reader.read_exact(4)?;
            let code = [code_bytes[0], code_bytes[1], code_bytes[2], code_bytes[3]];
            let size = reader.read_u32()? as usize;
            let address = reader.read_pointer()?;
            let dna_index = reader.read_u32()? as usize;
            let count = reader.read_u32()? as usize;
            let payload_position = reader.position();

            if code == CODE_END {
                break;
            }

            let block = FileBlock {
                code,
                size,
                address: NonZeroU64::new(address),
                dna_index,
                count,
                payload_position,
            };
            reader.skip(size)?;

            if code == CODE_DNA {
                dna_block = Some(block);
                continue;
            }

            match block.address {
                Some(address) => {
                    if by_address.insert(address, blocks.len()).is_some() {
                        return Err(FormatError::DuplicateBlockAddress {
                            address: address.get(),
                            position: header_position,
                        });
                    }
                }
                None => log::trace!(
                    "block {} at {} has address 0, not indexing it",
                    block.code_str(),
                    header_position
                ),
            }
            blocks.push(block);
        }

        let dna_block = dna_block.ok_or(FormatError::MissingDnaBlock)?;
        Ok((
            BlockCatalog {
                blocks,
                by_address,
            },
            dna_block,
        ))
    }

    /// All catalogued blocks in file order, address-zero blocks included.
    pub fn blocks(&self) -> &[FileBlock] {
        &self.blocks
    }

    pub fn by_address(&self, address: NonZeroU64) -> Option<&FileBlock> {
        self.by_address.get(&address).map(|&index| &self.blocks[index])
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Every catalogued block must name a structure that exists in the DNA,
    /// otherwise it could never be materialized.
    pub fn validate_dna_indexes(&self, known: usize) -> Result<()> {
        for block in &self.blocks {
            if block.dna_index >= known {
                return Err(FormatError::InvalidDnaIndex {
                    code: block.code_str(),
                    position: block.payload_position,
                    index: block.dna_index,
                    known,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(pointer_flag: u8, endian_flag: u8) -> Vec<u8> {
        let mut bytes = b"BLENDER".to_vec();
        bytes.push(pointer_flag);
        bytes.push(endian_flag);
        bytes.extend_from_slice(b"280");
        bytes
    }

    #[test]
    fn header_flags_decode() {
        let mut reader = StreamReader::new(header_bytes(b'-', b'v'));
        let header = parse_header(&mut reader).unwrap();
        assert_eq!(header.pointer_size, PointerSize::Bits64);
        assert_eq!(header.endianness, Endianness::Little);
        assert_eq!(header.version_str(), "280");

        let mut reader = StreamReader::new(header_bytes(b'_', b'V'));
        let header = parse_header(&mut reader).unwrap();
        assert_eq!(header.pointer_size, PointerSize::Bits32);
        assert_eq!(header.endianness, Endianness::Big);
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut reader = StreamReader::new(b"NOTBLEND.v280".to_vec());
        assert!(matches!(
            parse_header(&mut reader),
            Err(FormatError::BadMagic)
        ));
    }

    #[test]
    fn gzip_magic_is_reported_as_compressed() {
        let mut reader = StreamReader::new(vec![0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            parse_header(&mut reader),
            Err(FormatError::CompressedNotSupported)
        ));
    }

    #[test]
    fn unknown_flags_are_fatal() {
        let mut reader = StreamReader::new(header_bytes(b'x', b'v'));
        assert!(matches!(
            parse_header(&mut reader),
            Err(FormatError::UnknownPointerSizeFlag { flag: b'x', position: 7 })
        ));

        let mut reader = StreamReader::new(header_bytes(b'-', b'x'));
        assert!(matches!(
            parse_header(&mut reader),
            Err(FormatError::UnknownEndiannessFlag { flag: b'x', position: 8 })
        ));
    }
}
