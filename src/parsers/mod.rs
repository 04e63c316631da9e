pub mod blend;
pub mod dna;
pub mod field;
pub mod primitive;

/// Size of a pointer on the machine that exported the file. Every recorded
/// address and every pointer field in a block payload uses this width.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PointerSize {
    Bits32,
    Bits64,
}

impl PointerSize {
    /// Returns the pointer size in bytes.
    pub fn bytes_num(self) -> usize {
        match self {
            PointerSize::Bits32 => 4,
            PointerSize::Bits64 => 8,
        }
    }
}

/// Endianness of the machine that exported the file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}
