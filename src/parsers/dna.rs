//! The DNA catalog: the schema embedded in every file.
//!
//! The DNA block payload carries four tables: names (`NAME`), type names
//! (`TYPE`), type byte sizes (`TLEN`) and structure definitions (`STRC`).
//! Everything else in the file is decoded against these tables, which is why
//! the format survives schema drift between exporting tool versions: the
//! parser never hardcodes a field layout.
//!
//! Besides the raw tables this module precomputes one [`StructLayout`] per
//! structure: fields in declaration order with their byte offsets and sizes
//! resolved, ready for the structure resolver. Composite sizes are derived
//! from the fields (pointer fields always take the file's pointer width), so
//! a `TLEN` entry recorded on a different platform cannot skew offsets.

use crate::error::{FormatError, Result as FormatResult};
use crate::parsers::field::{parse_field, FieldInfo, FieldParseError};
use crate::parsers::primitive::PrimitiveKind;
use crate::parsers::{Endianness, PointerSize};
use nom::{
    bytes::complete::{tag, take, take_while},
    combinator::map,
    error::{ErrorKind, ParseError},
    multi::count,
    number::complete::{be_u16, be_u32, le_u16, le_u32},
    sequence::terminated,
    Err, IResult,
};
use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Debug)]
pub enum DnaParseError {
    NomError {
        kind: ErrorKind,
        other: Option<Box<DnaParseError>>,
    },
}

impl ParseError<&[u8]> for DnaParseError {
    fn from_error_kind(_input: &[u8], kind: ErrorKind) -> Self {
        DnaParseError::NomError { kind, other: None }
    }

    fn append(_input: &[u8], kind: ErrorKind, other: Self) -> Self {
        DnaParseError::NomError {
            kind,
            other: Some(Box::new(other)),
        }
    }
}

type Result<'a, T> = IResult<&'a [u8], T, DnaParseError>;

/// A type-table entry: the type name and its declared byte size. The size is
/// authoritative for leaf types only; composite sizes are recomputed from
/// the fields.
#[derive(Debug)]
pub struct DnaType {
    pub name: String,
    pub bytes_len: usize,
}

/// A (type, name) pair inside a structure definition. Both are indices into
/// the DNA tables.
#[derive(Debug)]
pub struct DnaField {
    pub type_index: usize,
    pub name_index: usize,
}

/// A structure definition: its own type plus its fields in declaration
/// order. Field order determines byte offsets within an instance.
#[derive(Debug)]
pub struct DnaStruct {
    pub type_index: usize,
    pub fields: Vec<DnaField>,
}

/// One field of a precomputed layout: the bare name (modifiers stripped),
/// the parsed shape and the resolved byte range within an instance.
#[derive(Debug, Clone)]
pub struct FieldTemplate {
    pub name: String,
    pub info: FieldInfo,
    /// Index of the field's type in the type table.
    pub type_index: usize,
    pub type_name: String,
    /// Byte offset of the field within one structure instance.
    pub data_start: usize,
    /// Byte length the field occupies within one structure instance.
    pub data_len: usize,
    /// True when the field's type has no structure definition of its own.
    pub is_primitive: bool,
}

/// A structure definition with every field offset resolved. `bytes_len` is
/// the instance stride: the sum of the field sizes.
#[derive(Debug, Clone)]
pub struct StructLayout {
    pub struct_index: usize,
    pub type_index: usize,
    pub type_name: String,
    pub bytes_len: usize,
    pub fields: Vec<FieldTemplate>,
}

/// What a type name resolves to: a full structure definition, or a plain
/// byte size for leaf types.
#[derive(Debug)]
pub enum TypeInfo<'a> {
    Structure(&'a StructLayout),
    Primitive(usize),
}

/// The decoded schema plus the precomputed layouts.
#[derive(Debug)]
pub struct Dna {
    pub names: Vec<String>,
    pub types: Vec<DnaType>,
    pub structs: Vec<DnaStruct>,
    layouts: Vec<StructLayout>,
    by_type_index: HashMap<usize, usize>,
    by_type_name: HashMap<String, usize>,
}

struct DnaParseContext {
    endianness: Endianness,
}

impl DnaParseContext {
    /// A `NAME`/`TYPE`-style table: a count, then that many NUL-terminated
    /// strings, padded to a 4-byte boundary.
    fn name_table<'a>(&self, table_tag: &'static str, input: &'a [u8]) -> Result<'a, Vec<String>> {
        let (input, _) = tag(table_tag)(input)?;
        let (input, table_len) = match self.endianness {
            Endianness::Little => le_u32(input)?,
            Endianness::Big => be_u32(input)?,
        };

        let consumed = RefCell::new(0_usize);
        let (input, names) = count(
            terminated(
                map(take_while(|b: u8| b != 0), |b: &[u8]| {
                    *consumed.borrow_mut() += b.len() + 1; //+1 for the NUL separator
                    String::from_utf8_lossy(b).into_owned()
                }),
                tag("\0"),
            ),
            table_len as usize,
        )(input)?;

        let pad = (4 - *consumed.borrow() % 4) % 4;
        let (input, _) = take(pad)(input)?;

        Ok((input, names))
    }

    /// The `TLEN` table: one u16 byte size per type-table entry.
    fn type_lengths<'a>(&self, types_len: usize, input: &'a [u8]) -> Result<'a, Vec<u16>> {
        let (input, _) = tag("TLEN")(input)?;
        let (input, lengths) = match self.endianness {
            Endianness::Little => count(le_u16, types_len)(input)?,
            Endianness::Big => count(be_u16, types_len)(input)?,
        };

        let pad = (4 - (types_len * 2) % 4) % 4;
        let (input, _) = take(pad)(input)?;

        Ok((input, lengths))
    }

    /// The `STRC` table: per structure a type index, a field count and the
    /// (type index, name index) pairs.
    fn structs<'a>(&self, input: &'a [u8]) -> Result<'a, Vec<DnaStruct>> {
        let (input, _) = tag("STRC")(input)?;
        let (mut input, structs_len) = match self.endianness {
            Endianness::Little => le_u32(input)?,
            Endianness::Big => be_u32(input)?,
        };

        let read_u16 = |input| match self.endianness {
            Endianness::Little => le_u16(input),
            Endianness::Big => be_u16(input),
        };

        let mut structs = Vec::new();
        for _ in 0..structs_len {
            let (rest, type_index) = read_u16(input)?;
            let (mut rest, fields_len) = read_u16(rest)?;

            let mut fields = Vec::new();
            for _ in 0..fields_len {
                let (after, field_type_index) = read_u16(rest)?;
                let (after, field_name_index) = read_u16(after)?;
                rest = after;

                fields.push(DnaField {
                    type_index: field_type_index.into(),
                    name_index: field_name_index.into(),
                });
            }
            input = rest;

            structs.push(DnaStruct {
                type_index: type_index.into(),
                fields,
            });
        }

        Ok((input, structs))
    }

    fn tables<'a>(&self, input: &'a [u8]) -> Result<'a, (Vec<String>, Vec<DnaType>, Vec<DnaStruct>)> {
        let (input, _) = tag("SDNA")(input)?;
        let (input, names) = self.name_table("NAME", input)?;
        let (input, type_names) = self.name_table("TYPE", input)?;
        let (input, type_lengths) = self.type_lengths(type_names.len(), input)?;
        let (input, structs) = self.structs(input)?;

        let types = type_names
            .into_iter()
            .zip(type_lengths)
            .map(|(name, bytes_len)| DnaType {
                name,
                bytes_len: bytes_len.into(),
            })
            .collect();

        Ok((input, (names, types, structs)))
    }
}

fn corrupt(err: Err<DnaParseError>) -> FormatError {
    let reason = match err {
        Err::Error(e) | Err::Failure(e) => format!("{:?}", e),
        Err::Incomplete(..) => "truncated DNA block".to_owned(),
    };
    FormatError::DnaCorrupt { reason }
}

/// Memoized recursive size computation over the type graph. Pointer and
/// function-pointer fields take the pointer width; everything else takes
/// the field type's size, composites recursively.
struct SizeResolver<'a> {
    types: &'a [DnaType],
    structs: &'a [DnaStruct],
    names_info: &'a [(String, FieldInfo)],
    by_type_index: &'a HashMap<usize, usize>,
    pointer_size: PointerSize,
    sizes: Vec<SizeState>,
}

#[derive(Clone, Copy, PartialEq)]
enum SizeState {
    Unresolved,
    InProgress,
    Done(usize),
}

impl<'a> SizeResolver<'a> {
    fn type_size(&mut self, type_index: usize) -> FormatResult<usize> {
        match self.sizes[type_index] {
            SizeState::Done(size) => return Ok(size),
            SizeState::InProgress => {
                return Err(FormatError::DnaCorrupt {
                    reason: format!(
                        "cyclic by-value definition involving type {:?}",
                        self.types[type_index].name
                    ),
                })
            }
            SizeState::Unresolved => {}
        }

        self.sizes[type_index] = SizeState::InProgress;
        let size = match self.by_type_index.get(&type_index) {
            Some(&struct_index) => {
                let fields = &self.structs[struct_index].fields;
                let mut sum = 0;
                for field in fields {
                    sum += self.field_size(field)?;
                }
                sum
            }
            None => self.types[type_index].bytes_len,
        };
        self.sizes[type_index] = SizeState::Done(size);
        Ok(size)
    }

    fn field_size(&mut self, field: &DnaField) -> FormatResult<usize> {
        let info = &self.names_info[field.name_index].1;
        Ok(match info {
            FieldInfo::Pointer { .. } | FieldInfo::FnPointer => self.pointer_size.bytes_num(),
            FieldInfo::PointerArray { len, .. } => self.pointer_size.bytes_num() * len,
            FieldInfo::Value => self.type_size(field.type_index)?,
            FieldInfo::ValueArray { len, .. } => self.type_size(field.type_index)? * len,
        })
    }
}

impl Dna {
    /// Decodes the DNA block payload and precomputes every structure layout.
    pub fn parse(
        payload: &[u8],
        endianness: Endianness,
        pointer_size: PointerSize,
    ) -> FormatResult<Dna> {
        let ctx = DnaParseContext { endianness };
        let (_, (names, types, structs)) = ctx.tables(payload).map_err(corrupt)?;
        Dna::build(names, types, structs, pointer_size)
    }

    fn build(
        names: Vec<String>,
        types: Vec<DnaType>,
        structs: Vec<DnaStruct>,
        pointer_size: PointerSize,
    ) -> FormatResult<Dna> {
        // The modifiers are embedded in the name strings; strip them once.
        let mut names_info = Vec::with_capacity(names.len());
        for name in &names {
            let (rest, (bare, info)) = parse_field(name).map_err(|_: Err<FieldParseError>| {
                FormatError::BadFieldName { name: name.clone() }
            })?;
            if !rest.is_empty() {
                return Err(FormatError::BadFieldName { name: name.clone() });
            }
            names_info.push((bare.to_owned(), info));
        }

        let by_type_index: HashMap<usize, usize> = structs
            .iter()
            .enumerate()
            .map(|(struct_index, s)| (s.type_index, struct_index))
            .collect();

        for s in &structs {
            if s.type_index >= types.len() {
                return Err(FormatError::DnaCorrupt {
                    reason: format!("structure type index {} out of range", s.type_index),
                });
            }
            for field in &s.fields {
                if field.type_index >= types.len() || field.name_index >= names_info.len() {
                    return Err(FormatError::DnaCorrupt {
                        reason: format!(
                            "field indexes ({}, {}) out of range in {:?}",
                            field.type_index, field.name_index, types[s.type_index].name
                        ),
                    });
                }
            }
        }

        let mut resolver = SizeResolver {
            types: &types,
            structs: &structs,
            names_info: &names_info,
            by_type_index: &by_type_index,
            pointer_size,
            sizes: vec![SizeState::Unresolved; types.len()],
        };

        let mut layouts = Vec::with_capacity(structs.len());
        for (struct_index, s) in structs.iter().enumerate() {
            let mut fields = Vec::with_capacity(s.fields.len());
            let mut data_start = 0;

            for field in &s.fields {
                let (bare, info) = &names_info[field.name_index];
                let data_len = resolver.field_size(field)?;
                let is_primitive = !by_type_index.contains_key(&field.type_index);

                // A TLEN entry that disagrees with the primitive's machine
                // width would poison every offset computed from it.
                if is_primitive {
                    if let Some(kind) = PrimitiveKind::from_type_name(&types[field.type_index].name)
                    {
                        let element_len = match info {
                            FieldInfo::Value => Some(data_len),
                            FieldInfo::ValueArray { len, .. } if *len > 0 => Some(data_len / len),
                            _ => None,
                        };
                        if let Some(element_len) = element_len {
                            if !kind.size_matches(element_len) {
                                return Err(FormatError::DnaCorrupt {
                                    reason: format!(
                                        "field {:?} of {:?} declares {} bytes for a {:?}",
                                        bare,
                                        types[s.type_index].name,
                                        element_len,
                                        types[field.type_index].name
                                    ),
                                });
                            }
                        }
                    }
                }

                fields.push(FieldTemplate {
                    name: bare.clone(),
                    info: info.clone(),
                    type_index: field.type_index,
                    type_name: types[field.type_index].name.clone(),
                    data_start,
                    data_len,
                    is_primitive,
                });
                data_start += data_len;
            }

            layouts.push(StructLayout {
                struct_index,
                type_index: s.type_index,
                type_name: types[s.type_index].name.clone(),
                bytes_len: data_start,
                fields,
            });
        }

        let by_type_name = layouts
            .iter()
            .map(|layout| (layout.type_name.clone(), layout.struct_index))
            .collect();

        Ok(Dna {
            names,
            types,
            structs,
            layouts,
            by_type_index,
            by_type_name,
        })
    }

    /// The layout for a block's DNA index.
    pub fn struct_by_index(&self, struct_index: usize) -> Option<&StructLayout> {
        self.layouts.get(struct_index)
    }

    /// The layout for a field's type index, if the type is a structure.
    pub fn layout_for_type_index(&self, type_index: usize) -> Option<&StructLayout> {
        self.by_type_index
            .get(&type_index)
            .map(|&struct_index| &self.layouts[struct_index])
    }

    pub fn layouts(&self) -> &[StructLayout] {
        &self.layouts
    }

    /// Resolves a type name to a structure definition or a primitive size.
    pub fn type_info(&self, name: &str) -> FormatResult<TypeInfo> {
        if let Some(&struct_index) = self.by_type_name.get(name) {
            return Ok(TypeInfo::Structure(&self.layouts[struct_index]));
        }
        if let Some(leaf) = self.types.iter().find(|t| t.name == name) {
            return Ok(TypeInfo::Primitive(leaf.bytes_len));
        }
        Err(FormatError::UnknownDnaType {
            name: name.to_owned(),
        })
    }
}
