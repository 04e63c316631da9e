//! In-memory file construction shared by the integration tests.
//!
//! Nothing here touches the filesystem: a `SyntheticBlend` assembles a
//! complete file byte by byte, including the DNA block, so every test is
//! explicit about the exact layout it exercises.

#![allow(dead_code)]

/// Header flag for 64-bit recorded addresses.
pub const PTR_64: u8 = b'-';
/// Header flag for 32-bit recorded addresses.
pub const PTR_32: u8 = b'_';
/// Header flag for little-endian payloads.
pub const LITTLE: u8 = b'v';
/// Header flag for big-endian payloads.
pub const BIG: u8 = b'V';

pub fn put_u16(buf: &mut Vec<u8>, v: u16, big: bool) {
    buf.extend_from_slice(&if big { v.to_be_bytes() } else { v.to_le_bytes() });
}

pub fn put_u32(buf: &mut Vec<u8>, v: u32, big: bool) {
    buf.extend_from_slice(&if big { v.to_be_bytes() } else { v.to_le_bytes() });
}

pub fn put_u64(buf: &mut Vec<u8>, v: u64, big: bool) {
    buf.extend_from_slice(&if big { v.to_be_bytes() } else { v.to_le_bytes() });
}

pub fn put_i32(buf: &mut Vec<u8>, v: i32, big: bool) {
    buf.extend_from_slice(&if big { v.to_be_bytes() } else { v.to_le_bytes() });
}

pub fn put_f32(buf: &mut Vec<u8>, v: f32, big: bool) {
    let bits = v.to_bits();
    buf.extend_from_slice(&if big { bits.to_be_bytes() } else { bits.to_le_bytes() });
}

/// Writes one recorded address at the given pointer width.
pub fn put_ptr(buf: &mut Vec<u8>, v: u64, big: bool, ptr_width: usize) {
    if ptr_width == 4 {
        put_u32(buf, v as u32, big);
    } else {
        put_u64(buf, v, big);
    }
}

/// Builds a complete file: the 12-byte header, then blocks in push order,
/// then the terminal block.
pub struct SyntheticBlend {
    bytes: Vec<u8>,
    big: bool,
    ptr_width: usize,
}

impl SyntheticBlend {
    /// A little-endian 64-bit file, the common case.
    pub fn new() -> SyntheticBlend {
        SyntheticBlend::with_layout(PTR_64, LITTLE)
    }

    pub fn with_layout(pointer_flag: u8, endian_flag: u8) -> SyntheticBlend {
        let mut bytes = b"BLENDER".to_vec();
        bytes.push(pointer_flag);
        bytes.push(endian_flag);
        bytes.extend_from_slice(b"280");
        SyntheticBlend {
            bytes,
            big: endian_flag == BIG,
            ptr_width: if pointer_flag == PTR_32 { 4 } else { 8 },
        }
    }

    pub fn big(&self) -> bool {
        self.big
    }

    pub fn ptr_width(&self) -> usize {
        self.ptr_width
    }

    /// Appends one block. The header is placed on the next 4-byte boundary,
    /// padding with zeros, exactly as exporting tools do after an unaligned
    /// payload.
    pub fn push_block(
        &mut self,
        code: &[u8; 4],
        address: u64,
        dna_index: u32,
        count: u32,
        payload: &[u8],
    ) -> &mut SyntheticBlend {
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
        self.bytes.extend_from_slice(code);
        put_u32(&mut self.bytes, payload.len() as u32, self.big);
        put_ptr(&mut self.bytes, address, self.big, self.ptr_width);
        put_u32(&mut self.bytes, dna_index, self.big);
        put_u32(&mut self.bytes, count, self.big);
        self.bytes.extend_from_slice(payload);
        self
    }

    pub fn push_dna(&mut self, payload: &[u8]) -> &mut SyntheticBlend {
        self.push_block(b"DNA1", 0, 0, 1, payload)
    }

    /// Appends the terminal block and returns the finished file.
    pub fn finish(mut self) -> Vec<u8> {
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
        self.bytes.extend_from_slice(b"ENDB");
        put_u32(&mut self.bytes, 0, self.big);
        put_ptr(&mut self.bytes, 0, self.big, self.ptr_width);
        put_u32(&mut self.bytes, 0, self.big);
        put_u32(&mut self.bytes, 0, self.big);
        self.bytes
    }

    /// The finished file without a terminal block, for truncation tests.
    pub fn finish_without_end(self) -> Vec<u8> {
        self.bytes
    }
}

/// Encodes a DNA block payload from its four tables.
pub fn dna_payload(
    names: &[&str],
    types: &[(&str, u16)],
    structs: &[(u16, &[(u16, u16)])],
    big: bool,
) -> Vec<u8> {
    fn string_table(buf: &mut Vec<u8>, tag: &str, entries: &[&str], big: bool) {
        buf.extend_from_slice(tag.as_bytes());
        put_u32(buf, entries.len() as u32, big);
        let mut consumed = 0;
        for entry in entries {
            buf.extend_from_slice(entry.as_bytes());
            buf.push(0);
            consumed += entry.len() + 1;
        }
        buf.resize(buf.len() + (4 - consumed % 4) % 4, 0);
    }

    let mut buf = b"SDNA".to_vec();
    string_table(&mut buf, "NAME", names, big);
    let type_names: Vec<&str> = types.iter().map(|(name, _)| *name).collect();
    string_table(&mut buf, "TYPE", &type_names, big);

    buf.extend_from_slice(b"TLEN");
    for (_, bytes_len) in types {
        put_u16(&mut buf, *bytes_len, big);
    }
    buf.resize(buf.len() + (4 - (types.len() * 2) % 4) % 4, 0);

    buf.extend_from_slice(b"STRC");
    put_u32(&mut buf, structs.len() as u32, big);
    for (type_index, fields) in structs {
        put_u16(&mut buf, *type_index, big);
        put_u16(&mut buf, fields.len() as u16, big);
        for (field_type, field_name) in *fields {
            put_u16(&mut buf, *field_type, big);
            put_u16(&mut buf, *field_name, big);
        }
    }
    buf
}

/// DNA index of the `Id` structure in the standard schema.
pub const DNA_ID: u32 = 0;
/// DNA index of the `Object` structure in the standard schema.
pub const DNA_OBJECT: u32 = 1;

/// The schema most tests decode against:
///
/// ```text
/// struct Id     { char name[24]; }
/// struct Object { Id id; int flag; float loc[3];
///                 Object *parent; float mat[4][4]; char pad[4]; }
/// ```
///
/// `Object` is 116 bytes with 64-bit addresses, 112 with 32-bit ones.
pub fn standard_dna(big: bool) -> Vec<u8> {
    dna_payload(
        &["name[24]", "id", "flag", "loc[3]", "*parent", "mat[4][4]", "pad[4]"],
        &[("char", 1), ("int", 4), ("float", 4), ("Id", 24), ("Object", 116)],
        &[
            (3, &[(0, 0)]),
            (4, &[(3, 1), (1, 2), (2, 3), (4, 4), (2, 5), (0, 6)]),
        ],
        big,
    )
}

/// One `Id` payload: the name, NUL-padded to 24 bytes.
pub fn id_payload(name: &str) -> Vec<u8> {
    let mut bytes = vec![0; 24];
    bytes[..name.len()].copy_from_slice(name.as_bytes());
    bytes
}

/// One `Object` payload for the standard schema, with an identity `mat`.
pub fn object_payload(
    name: &str,
    flag: i32,
    loc: [f32; 3],
    parent: u64,
    big: bool,
    ptr_width: usize,
) -> Vec<u8> {
    let mut buf = id_payload(name);
    put_i32(&mut buf, flag, big);
    for v in &loc {
        put_f32(&mut buf, *v, big);
    }
    put_ptr(&mut buf, parent, big, ptr_width);
    for row in 0..4 {
        for col in 0..4 {
            put_f32(&mut buf, if row == col { 1.0 } else { 0.0 }, big);
        }
    }
    buf.extend_from_slice(&[0; 4]);
    buf
}
