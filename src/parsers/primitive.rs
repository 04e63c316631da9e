//! Primitive decoding over raw byte slices.
//!
//! All callers guarantee the slice is exactly as long as the primitive they
//! ask for; the layout machinery in [`crate::parsers::dna`] computes those
//! lengths before any payload byte is touched.

use super::{Endianness, PointerSize};
use nom::number::complete::{
    be_f32, be_f64, be_i16, be_i32, be_i64, be_i8, be_u16, be_u32, be_u64, le_f32, le_f64, le_i16,
    le_i32, le_i64, le_i8, le_u16, le_u32, le_u64,
};

/// A decoded primitive scalar. The variants follow the machine representation
/// of the DNA primitive types, not their spelling: `char` and `uchar` both
/// decode to `U8`, `long` widens to `I64` regardless of its on-disk size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrimitiveValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

/// The leaf types a DNA type name can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    Long,
    ULong,
    Float,
    Double,
    Int64,
    UInt64,
}

impl PrimitiveKind {
    /// Maps a DNA type name to a primitive kind. Returns `None` for names
    /// that are not leaf types (structures, `void`, anything unknown).
    pub fn from_type_name(name: &str) -> Option<PrimitiveKind> {
        match name {
            "char" => Some(PrimitiveKind::Char),
            "uchar" => Some(PrimitiveKind::UChar),
            "short" => Some(PrimitiveKind::Short),
            "ushort" => Some(PrimitiveKind::UShort),
            "int" => Some(PrimitiveKind::Int),
            "long" => Some(PrimitiveKind::Long),
            "ulong" => Some(PrimitiveKind::ULong),
            "float" => Some(PrimitiveKind::Float),
            "double" => Some(PrimitiveKind::Double),
            "int64_t" => Some(PrimitiveKind::Int64),
            "uint64_t" => Some(PrimitiveKind::UInt64),
            _ => None,
        }
    }

    /// Whether a declared byte size is one this kind can decode from. The
    /// DNA layout pass rejects fields whose `TLEN` entry disagrees, so
    /// [`PrimitiveKind::decode`] never sees a wrong-sized slice.
    pub fn size_matches(self, bytes_len: usize) -> bool {
        match self {
            PrimitiveKind::Char | PrimitiveKind::UChar => bytes_len == 1,
            PrimitiveKind::Short | PrimitiveKind::UShort => bytes_len == 2,
            PrimitiveKind::Int | PrimitiveKind::Float => bytes_len == 4,
            PrimitiveKind::Double | PrimitiveKind::Int64 | PrimitiveKind::UInt64 => bytes_len == 8,
            // Saved as 4 bytes on some exporting platforms, 8 on others.
            PrimitiveKind::Long | PrimitiveKind::ULong => bytes_len == 4 || bytes_len == 8,
        }
    }

    /// Decodes one scalar from `slice`. The slice length is the declared
    /// size of the type, which matters for `long`/`ulong`: those are 4 bytes
    /// on some exporting platforms and 8 on others.
    pub fn decode(self, slice: &[u8], endianness: Endianness) -> PrimitiveValue {
        match self {
            PrimitiveKind::Char | PrimitiveKind::UChar => {
                PrimitiveValue::U8(parse_u8(slice, endianness))
            }
            PrimitiveKind::Short => PrimitiveValue::I16(parse_i16(slice, endianness)),
            PrimitiveKind::UShort => PrimitiveValue::U16(parse_u16(slice, endianness)),
            PrimitiveKind::Int => PrimitiveValue::I32(parse_i32(slice, endianness)),
            PrimitiveKind::Long | PrimitiveKind::Int64 => PrimitiveValue::I64(match slice.len() {
                8 => parse_i64(slice, endianness),
                _ => i64::from(parse_i32(slice, endianness)),
            }),
            PrimitiveKind::ULong | PrimitiveKind::UInt64 => {
                PrimitiveValue::U64(match slice.len() {
                    8 => parse_u64(slice, endianness),
                    _ => u64::from(parse_u32(slice, endianness)),
                })
            }
            PrimitiveKind::Float => PrimitiveValue::F32(parse_f32(slice, endianness)),
            PrimitiveKind::Double => PrimitiveValue::F64(parse_f64(slice, endianness)),
        }
    }
}

/// Implemented by the Rust types the typed structure accessors can return.
/// `blender_name` names the DNA type in type-mismatch errors.
pub(crate) trait BlendPrimitive: Sized {
    fn blender_name() -> &'static str;
    fn extract(value: PrimitiveValue) -> Option<Self>;
}

impl BlendPrimitive for u8 {
    fn blender_name() -> &'static str {
        "char"
    }
    fn extract(value: PrimitiveValue) -> Option<Self> {
        match value {
            PrimitiveValue::U8(v) => Some(v),
            _ => None,
        }
    }
}

impl BlendPrimitive for i8 {
    fn blender_name() -> &'static str {
        "char"
    }
    fn extract(value: PrimitiveValue) -> Option<Self> {
        match value {
            PrimitiveValue::U8(v) => Some(v as i8),
            PrimitiveValue::I8(v) => Some(v),
            _ => None,
        }
    }
}

impl BlendPrimitive for i16 {
    fn blender_name() -> &'static str {
        "short"
    }
    fn extract(value: PrimitiveValue) -> Option<Self> {
        match value {
            PrimitiveValue::I16(v) => Some(v),
            _ => None,
        }
    }
}

impl BlendPrimitive for u16 {
    fn blender_name() -> &'static str {
        "ushort"
    }
    fn extract(value: PrimitiveValue) -> Option<Self> {
        match value {
            PrimitiveValue::U16(v) => Some(v),
            _ => None,
        }
    }
}

impl BlendPrimitive for i32 {
    fn blender_name() -> &'static str {
        "int"
    }
    fn extract(value: PrimitiveValue) -> Option<Self> {
        match value {
            PrimitiveValue::I32(v) => Some(v),
            _ => None,
        }
    }
}

impl BlendPrimitive for i64 {
    fn blender_name() -> &'static str {
        "int64_t"
    }
    fn extract(value: PrimitiveValue) -> Option<Self> {
        match value {
            PrimitiveValue::I64(v) => Some(v),
            _ => None,
        }
    }
}

impl BlendPrimitive for u64 {
    fn blender_name() -> &'static str {
        "uint64_t"
    }
    fn extract(value: PrimitiveValue) -> Option<Self> {
        match value {
            PrimitiveValue::U64(v) => Some(v),
            _ => None,
        }
    }
}

impl BlendPrimitive for f32 {
    fn blender_name() -> &'static str {
        "float"
    }
    fn extract(value: PrimitiveValue) -> Option<Self> {
        match value {
            PrimitiveValue::F32(v) => Some(v),
            _ => None,
        }
    }
}

impl BlendPrimitive for f64 {
    fn blender_name() -> &'static str {
        "double"
    }
    fn extract(value: PrimitiveValue) -> Option<Self> {
        match value {
            PrimitiveValue::F64(v) => Some(v),
            _ => None,
        }
    }
}

// Callers hand these exact-size slices: the reader bounds-checks its reads
// and the DNA layout pass validates every field length up front, so the
// expect is unreachable on any loadable file.
macro_rules! slice_parser {
    ($name:ident, $ty:ty, $le:ident, $be:ident) => {
        pub fn $name(slice: &[u8], endianness: Endianness) -> $ty {
            let (_, val) = match endianness {
                Endianness::Little => $le::<()>(slice).expect(stringify!($name)),
                Endianness::Big => $be::<()>(slice).expect(stringify!($name)),
            };
            val
        }
    };
}

slice_parser!(parse_i8, i8, le_i8, be_i8);
slice_parser!(parse_u16, u16, le_u16, be_u16);
slice_parser!(parse_i16, i16, le_i16, be_i16);
slice_parser!(parse_u32, u32, le_u32, be_u32);
slice_parser!(parse_i32, i32, le_i32, be_i32);
slice_parser!(parse_u64, u64, le_u64, be_u64);
slice_parser!(parse_i64, i64, le_i64, be_i64);
slice_parser!(parse_f32, f32, le_f32, be_f32);
slice_parser!(parse_f64, f64, le_f64, be_f64);

pub fn parse_u8(slice: &[u8], _endianness: Endianness) -> u8 {
    *slice.first().expect("parse_u8")
}

/// Reads one recorded address at the file's declared pointer width. A 32-bit
/// address widens to `u64`; the value is a foreign key into the block
/// catalog, never a real memory location.
pub fn parse_address(slice: &[u8], endianness: Endianness, pointer_size: PointerSize) -> u64 {
    match pointer_size {
        PointerSize::Bits32 => u64::from(parse_u32(slice, endianness)),
        PointerSize::Bits64 => parse_u64(slice, endianness),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_widens_by_declared_size() {
        let four = [0xff, 0xff, 0xff, 0xff];
        let eight = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7f];

        assert_eq!(
            PrimitiveKind::Long.decode(&four, Endianness::Little),
            PrimitiveValue::I64(-1)
        );
        assert_eq!(
            PrimitiveKind::Long.decode(&eight, Endianness::Little),
            PrimitiveValue::I64(0x7fff_ffff_ffff_ffff)
        );
        assert_eq!(
            PrimitiveKind::ULong.decode(&four, Endianness::Little),
            PrimitiveValue::U64(0xffff_ffff)
        );
    }

    #[test]
    fn floats_respect_endianness() {
        let bytes = 1.5f32.to_bits().to_be_bytes();
        assert_eq!(
            PrimitiveKind::Float.decode(&bytes, Endianness::Big),
            PrimitiveValue::F32(1.5)
        );
    }

    #[test]
    fn addresses_widen_to_u64() {
        let bytes = [0x00, 0x10, 0x00, 0x00];
        assert_eq!(
            parse_address(&bytes, Endianness::Little, PointerSize::Bits32),
            0x1000
        );
        assert_eq!(
            parse_address(&bytes, Endianness::Big, PointerSize::Bits32),
            0x0010_0000
        );
    }

    #[test]
    fn declared_sizes_are_checked_per_kind() {
        assert!(PrimitiveKind::Int.size_matches(4));
        assert!(!PrimitiveKind::Int.size_matches(2));
        assert!(PrimitiveKind::Long.size_matches(4));
        assert!(PrimitiveKind::Long.size_matches(8));
        assert!(!PrimitiveKind::Long.size_matches(2));
        assert!(PrimitiveKind::Char.size_matches(1));
        assert!(!PrimitiveKind::Double.size_matches(4));
    }

    #[test]
    fn unknown_names_are_not_primitives() {
        assert_eq!(PrimitiveKind::from_type_name("void"), None);
        assert_eq!(PrimitiveKind::from_type_name("Object"), None);
    }
}
