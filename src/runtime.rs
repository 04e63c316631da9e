//! Structure materialization and the per-load context.
//!
//! [`BlendFile`] owns everything a loaded file needs: the parsed header, the
//! block catalog, the decoded DNA and the byte stream. Block payloads are
//! materialized into [`Structure`]s on demand and cached by the block's
//! recorded address, so chasing the same pointer twice hands back the same
//! structures.
//!
//! The context is single-threaded by construction; interior mutability goes
//! through `RefCell`/`Cell`, which also keeps `BlendFile` out of `Sync`.

use crate::error::{FormatError, LoadError, Result as FormatResult};
use crate::parsers::blend::{parse_header, BlockCatalog, FileBlock, FileHeader};
use crate::parsers::dna::{Dna, FieldTemplate, StructLayout};
use crate::parsers::field::FieldInfo;
use crate::parsers::primitive::{parse_address, BlendPrimitive, PrimitiveKind, PrimitiveValue};
use crate::parsers::{Endianness, PointerSize};
use crate::reader::StreamReader;
use linked_hash_map::LinkedHashMap;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::num::NonZeroU64;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;

/// Where a load context is in its lifecycle. The pipeline advances through
/// the states in order; queries are only served in `Resolvable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Uninitialized,
    HeaderRead,
    BlocksCatalogued,
    DnaReady,
    Resolvable,
    Closed,
}

impl LoadState {
    /// Names the work performed in this stage, for load-failure messages.
    pub fn describe(self) -> &'static str {
        match self {
            LoadState::Uninitialized => "opening the stream",
            LoadState::HeaderRead => "reading the file header",
            LoadState::BlocksCatalogued => "cataloguing file blocks",
            LoadState::DnaReady => "decoding the DNA catalog",
            LoadState::Resolvable => "validating the catalog",
            LoadState::Closed => "closed",
        }
    }
}

/// A decoded field value. The variants are closed: every DNA field shape
/// maps onto exactly one of them.
#[derive(Debug, Clone)]
pub enum Value {
    Primitive(PrimitiveValue),
    Pointer(PointerValue),
    Struct(Box<Structure>),
    Array(Vec<Value>),
}

/// A recorded address waiting to be chased. The address is a foreign key
/// into the block catalog, not a usable memory location; it only means
/// something within the context that decoded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerValue {
    address: u64,
}

impl PointerValue {
    pub(crate) fn new(address: u64) -> PointerValue {
        PointerValue { address }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn is_null(&self) -> bool {
        self.address == 0
    }

    /// Chases the address through the catalog. A null address and an address
    /// no catalogued block was exported under both yield no structures; only
    /// structural problems are errors.
    pub fn resolve(&self, file: &BlendFile) -> FormatResult<Vec<Rc<Structure>>> {
        file.structures_at(self.address)
    }
}

/// One materialized structure instance: its DNA identity, the decoded
/// fields in declaration order and the payload bytes it was decoded from.
#[derive(Debug, Clone)]
pub struct Structure {
    type_name: String,
    struct_index: usize,
    fields: LinkedHashMap<String, Value>,
    data: Vec<u8>,
}

impl Structure {
    pub(crate) fn new(
        type_name: String,
        struct_index: usize,
        fields: LinkedHashMap<String, Value>,
        data: Vec<u8>,
    ) -> Structure {
        Structure {
            type_name,
            struct_index,
            fields,
            data,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Index of this structure's definition in the DNA structure table.
    pub fn struct_index(&self) -> usize {
        self.struct_index
    }

    /// The raw payload bytes this instance was decoded from.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The decoded fields in declaration order.
    pub fn fields(&self) -> &LinkedHashMap<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> FormatResult<&Value> {
        self.fields
            .get(field)
            .ok_or_else(|| FormatError::FieldNotFound {
                type_name: self.type_name.clone(),
                field: field.to_owned(),
            })
    }

    fn mismatch(&self, field: &str, expected: &'static str) -> FormatError {
        FormatError::FieldTypeMismatch {
            type_name: self.type_name.clone(),
            field: field.to_owned(),
            expected,
        }
    }

    fn primitive_field<T: BlendPrimitive>(&self, field: &str) -> FormatResult<T> {
        match self.get(field)? {
            Value::Primitive(value) => {
                T::extract(*value).ok_or_else(|| self.mismatch(field, T::blender_name()))
            }
            _ => Err(self.mismatch(field, T::blender_name())),
        }
    }

    pub fn get_u8(&self, field: &str) -> FormatResult<u8> {
        self.primitive_field(field)
    }

    pub fn get_i8(&self, field: &str) -> FormatResult<i8> {
        self.primitive_field(field)
    }

    pub fn get_i16(&self, field: &str) -> FormatResult<i16> {
        self.primitive_field(field)
    }

    pub fn get_u16(&self, field: &str) -> FormatResult<u16> {
        self.primitive_field(field)
    }

    pub fn get_i32(&self, field: &str) -> FormatResult<i32> {
        self.primitive_field(field)
    }

    pub fn get_i64(&self, field: &str) -> FormatResult<i64> {
        self.primitive_field(field)
    }

    pub fn get_u64(&self, field: &str) -> FormatResult<u64> {
        self.primitive_field(field)
    }

    pub fn get_f32(&self, field: &str) -> FormatResult<f32> {
        self.primitive_field(field)
    }

    pub fn get_f64(&self, field: &str) -> FormatResult<f64> {
        self.primitive_field(field)
    }

    /// Reads a `char` array field as a string, stopping at the first NUL.
    pub fn get_string(&self, field: &str) -> FormatResult<String> {
        let mut bytes = Vec::new();
        match self.get(field)? {
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::Primitive(PrimitiveValue::U8(b)) => {
                            if *b == 0 {
                                break;
                            }
                            bytes.push(*b);
                        }
                        _ => return Err(self.mismatch(field, "char array")),
                    }
                }
            }
            Value::Primitive(PrimitiveValue::U8(b)) => {
                if *b != 0 {
                    bytes.push(*b);
                }
            }
            _ => return Err(self.mismatch(field, "char array")),
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// An embedded (by-value) structure field.
    pub fn get_struct(&self, field: &str) -> FormatResult<&Structure> {
        match self.get(field)? {
            Value::Struct(inner) => Ok(inner),
            _ => Err(self.mismatch(field, "struct")),
        }
    }

    pub fn get_pointer(&self, field: &str) -> FormatResult<PointerValue> {
        match self.get(field)? {
            Value::Pointer(pointer) => Ok(*pointer),
            _ => Err(self.mismatch(field, "pointer")),
        }
    }

    /// An array field's elements, flattened in declaration order.
    pub fn get_array(&self, field: &str) -> FormatResult<&[Value]> {
        match self.get(field)? {
            Value::Array(items) => Ok(items),
            _ => Err(self.mismatch(field, "array")),
        }
    }

    fn primitive_vec<T: BlendPrimitive>(&self, field: &str) -> FormatResult<Vec<T>> {
        match self.get(field)? {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    match item {
                        Value::Primitive(value) => T::extract(*value),
                        _ => None,
                    }
                    .ok_or_else(|| self.mismatch(field, T::blender_name()))
                })
                .collect(),
            _ => Err(self.mismatch(field, T::blender_name())),
        }
    }

    pub fn get_u8_vec(&self, field: &str) -> FormatResult<Vec<u8>> {
        self.primitive_vec(field)
    }

    pub fn get_i32_vec(&self, field: &str) -> FormatResult<Vec<i32>> {
        self.primitive_vec(field)
    }

    pub fn get_f32_vec(&self, field: &str) -> FormatResult<Vec<f32>> {
        self.primitive_vec(field)
    }

    pub fn get_f64_vec(&self, field: &str) -> FormatResult<Vec<f64>> {
        self.primitive_vec(field)
    }
}

fn decode_structure(
    dna: &Dna,
    layout: &StructLayout,
    data: &[u8],
    endianness: Endianness,
    pointer_size: PointerSize,
) -> FormatResult<Structure> {
    let mut fields = LinkedHashMap::with_capacity(layout.fields.len());
    for template in &layout.fields {
        let end = template.data_start + template.data_len;
        let slice =
            data.get(template.data_start..end)
                .ok_or_else(|| FormatError::OutOfBounds {
                    position: template.data_start as u64,
                    wanted: template.data_len,
                    len: data.len() as u64,
                })?;
        let value = decode_field(dna, template, slice, endianness, pointer_size)?;
        fields.insert(template.name.clone(), value);
    }
    Ok(Structure::new(
        layout.type_name.clone(),
        layout.struct_index,
        fields,
        data.to_vec(),
    ))
}

fn decode_field(
    dna: &Dna,
    template: &FieldTemplate,
    slice: &[u8],
    endianness: Endianness,
    pointer_size: PointerSize,
) -> FormatResult<Value> {
    match &template.info {
        // A function pointer carries an address like any other pointer; it
        // just never targets a catalogued block.
        FieldInfo::Pointer { .. } | FieldInfo::FnPointer => Ok(Value::Pointer(PointerValue::new(
            parse_address(slice, endianness, pointer_size),
        ))),
        FieldInfo::PointerArray { len, .. } => {
            let width = pointer_size.bytes_num();
            let mut items = Vec::with_capacity(*len);
            for chunk in slice.chunks_exact(width).take(*len) {
                items.push(Value::Pointer(PointerValue::new(parse_address(
                    chunk,
                    endianness,
                    pointer_size,
                ))));
            }
            Ok(Value::Array(items))
        }
        FieldInfo::Value => decode_scalar(dna, template, slice, endianness, pointer_size),
        FieldInfo::ValueArray { len, .. } => {
            if *len == 0 || template.data_len == 0 {
                return Ok(Value::Array(Vec::new()));
            }
            let element_len = template.data_len / len;
            if element_len == 0 {
                return Ok(Value::Array(Vec::new()));
            }
            let mut items = Vec::with_capacity(*len);
            for chunk in slice.chunks_exact(element_len).take(*len) {
                items.push(decode_scalar(dna, template, chunk, endianness, pointer_size)?);
            }
            Ok(Value::Array(items))
        }
    }
}

fn decode_scalar(
    dna: &Dna,
    template: &FieldTemplate,
    slice: &[u8],
    endianness: Endianness,
    pointer_size: PointerSize,
) -> FormatResult<Value> {
    if let Some(layout) = dna.layout_for_type_index(template.type_index) {
        let inner = decode_structure(dna, layout, slice, endianness, pointer_size)?;
        return Ok(Value::Struct(Box::new(inner)));
    }
    let kind = PrimitiveKind::from_type_name(&template.type_name).ok_or_else(|| {
        FormatError::UnknownDnaType {
            name: template.type_name.clone(),
        }
    })?;
    Ok(Value::Primitive(kind.decode(slice, endianness)))
}

/// A loaded file: header, catalog, DNA and the stream, plus the cache of
/// structures already materialized by address.
#[derive(Debug)]
pub struct BlendFile {
    header: FileHeader,
    catalog: BlockCatalog,
    dna: Dna,
    reader: RefCell<StreamReader>,
    cache: RefCell<HashMap<NonZeroU64, Vec<Rc<Structure>>>>,
    state: Cell<LoadState>,
}

impl BlendFile {
    /// Loads a file from disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<BlendFile, LoadError> {
        let file = path.as_ref().display().to_string();
        let data = fs::read(path).map_err(|source| LoadError {
            file: file.clone(),
            stage: LoadState::Uninitialized,
            position: 0,
            source: source.into(),
        })?;
        BlendFile::load(file, data, None)
    }

    /// Loads a file from any byte source, for streams that never touch disk.
    pub fn from_data<R: Read>(data: R) -> Result<BlendFile, LoadError> {
        BlendFile::from_reader(data, None)
    }

    /// Like [`BlendFile::from_data`], but the catalog scan stops with
    /// [`FormatError::Cancelled`] once `cancel` is raised. The flag is
    /// checked between block headers, never inside one.
    pub fn from_data_with_cancel<R: Read>(
        data: R,
        cancel: &AtomicBool,
    ) -> Result<BlendFile, LoadError> {
        BlendFile::from_reader(data, Some(cancel))
    }

    fn from_reader<R: Read>(
        mut data: R,
        cancel: Option<&AtomicBool>,
    ) -> Result<BlendFile, LoadError> {
        let file = "<memory>".to_owned();
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes).map_err(|source| LoadError {
            file: file.clone(),
            stage: LoadState::Uninitialized,
            position: 0,
            source: source.into(),
        })?;
        BlendFile::load(file, bytes, cancel)
    }

    fn load(
        file: String,
        data: Vec<u8>,
        cancel: Option<&AtomicBool>,
    ) -> Result<BlendFile, LoadError> {
        let mut reader = StreamReader::new(data);
        let fail = |stage: LoadState, position: u64, source: FormatError| LoadError {
            file: file.clone(),
            stage,
            position,
            source,
        };

        let header = parse_header(&mut reader)
            .map_err(|e| fail(LoadState::HeaderRead, reader.position(), e))?;

        let (catalog, dna_block) = BlockCatalog::scan(&mut reader, cancel)
            .map_err(|e| fail(LoadState::BlocksCatalogued, reader.position(), e))?;

        let dna = (|| {
            reader.set_position(dna_block.payload_position)?;
            let payload = reader.read_exact(dna_block.size)?.to_vec();
            Dna::parse(&payload, header.endianness, header.pointer_size)
        })()
        .map_err(|e| fail(LoadState::DnaReady, reader.position(), e))?;

        catalog
            .validate_dna_indexes(dna.layouts().len())
            .map_err(|e| fail(LoadState::Resolvable, reader.position(), e))?;

        log::trace!(
            "loaded {}: {} blocks, {} DNA structures",
            file,
            catalog.len(),
            dna.layouts().len()
        );

        Ok(BlendFile {
            header,
            catalog,
            dna,
            reader: RefCell::new(reader),
            cache: RefCell::new(HashMap::new()),
            state: Cell::new(LoadState::Resolvable),
        })
    }

    fn ensure_resolvable(&self) -> FormatResult<()> {
        if self.state.get() != LoadState::Resolvable {
            return Err(FormatError::ContextClosed);
        }
        Ok(())
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn dna(&self) -> &Dna {
        &self.dna
    }

    /// The exporting tool's version digits, e.g. `"280"`.
    pub fn version(&self) -> String {
        self.header.version_str()
    }

    pub fn state(&self) -> LoadState {
        self.state.get()
    }

    /// All catalogued blocks in file order.
    pub fn blocks(&self) -> FormatResult<&[FileBlock]> {
        self.ensure_resolvable()?;
        Ok(self.catalog.blocks())
    }

    pub fn block_by_address(&self, address: u64) -> FormatResult<Option<&FileBlock>> {
        self.ensure_resolvable()?;
        Ok(NonZeroU64::new(address).and_then(|address| self.catalog.by_address(address)))
    }

    /// The blocks carrying a given code, in file order.
    pub fn find_by_code(&self, code: [u8; 4]) -> FormatResult<Vec<&FileBlock>> {
        self.ensure_resolvable()?;
        Ok(self
            .catalog
            .blocks()
            .iter()
            .filter(|block| block.code == code)
            .collect())
    }

    /// Materializes every structure of the named DNA type, across all blocks.
    pub fn find_by_type_name(&self, name: &str) -> FormatResult<Vec<Rc<Structure>>> {
        self.ensure_resolvable()?;
        let mut found = Vec::new();
        for block in self.catalog.blocks() {
            let layout = match self.dna.struct_by_index(block.dna_index) {
                Some(layout) => layout,
                None => continue,
            };
            if layout.type_name == name {
                found.extend(self.structures(block)?);
            }
        }
        Ok(found)
    }

    /// Materializes a block into its `count` structures. Results for blocks
    /// with a recorded address are cached; asking again hands back the same
    /// `Rc`s.
    pub fn structures(&self, block: &FileBlock) -> FormatResult<Vec<Rc<Structure>>> {
        self.ensure_resolvable()?;
        let address = match block.address {
            Some(address) => address,
            // Address-zero blocks cannot be pointer targets, so there is no
            // identity to preserve for them.
            None => return self.materialize(block),
        };

        if let Some(cached) = self.cache.borrow().get(&address) {
            log::trace!("cache hit for address {:#x}", address);
            return Ok(cached.clone());
        }

        let structures = self.materialize(block)?;
        self.cache.borrow_mut().insert(address, structures.clone());
        Ok(structures)
    }

    /// Resolves a recorded address to structures. Null and unknown addresses
    /// yield no structures.
    pub fn structures_at(&self, address: u64) -> FormatResult<Vec<Rc<Structure>>> {
        self.ensure_resolvable()?;
        let address = match NonZeroU64::new(address) {
            Some(address) => address,
            None => return Ok(Vec::new()),
        };

        if let Some(cached) = self.cache.borrow().get(&address) {
            log::trace!("cache hit for address {:#x}", address);
            return Ok(cached.clone());
        }

        let block = match self.catalog.by_address(address) {
            Some(block) => block,
            None => {
                // The pointer target was not exported into this file.
                log::debug!("address {:#x} targets no catalogued block", address);
                return Ok(Vec::new());
            }
        };

        let structures = self.materialize(block)?;
        self.cache.borrow_mut().insert(address, structures.clone());
        Ok(structures)
    }

    fn materialize(&self, block: &FileBlock) -> FormatResult<Vec<Rc<Structure>>> {
        let layout =
            self.dna
                .struct_by_index(block.dna_index)
                .ok_or_else(|| FormatError::InvalidDnaIndex {
                    code: block.code_str(),
                    position: block.payload_position,
                    index: block.dna_index,
                    known: self.dna.layouts().len(),
                })?;

        let stride = layout.bytes_len;
        let needed = stride * block.count;
        if needed > block.size {
            return Err(FormatError::TruncatedBlock {
                code: block.code_str(),
                position: block.payload_position,
                size: block.size,
                needed,
            });
        }

        let payload = {
            let mut reader = self.reader.borrow_mut();
            reader.set_position(block.payload_position)?;
            reader.read_exact(needed)?.to_vec()
        };

        let mut structures = Vec::with_capacity(block.count);
        for element in payload.chunks_exact(stride.max(1)).take(block.count) {
            structures.push(Rc::new(decode_structure(
                &self.dna,
                layout,
                element,
                self.header.endianness,
                self.header.pointer_size,
            )?));
        }
        Ok(structures)
    }

    /// Closes the context: the cache is cleared and the stream buffer is
    /// released. Every later query fails with
    /// [`FormatError::ContextClosed`].
    pub fn close(&mut self) {
        self.state.set(LoadState::Closed);
        self.cache.borrow_mut().clear();
        self.reader.borrow_mut().release();
    }
}

impl Drop for BlendFile {
    fn drop(&mut self) {
        if self.state.get() != LoadState::Closed {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_structure() -> Structure {
        let mut fields = LinkedHashMap::new();
        fields.insert("flag".to_owned(), Value::Primitive(PrimitiveValue::I32(7)));
        fields.insert(
            "name".to_owned(),
            Value::Array(vec![
                Value::Primitive(PrimitiveValue::U8(b'h')),
                Value::Primitive(PrimitiveValue::U8(b'i')),
                Value::Primitive(PrimitiveValue::U8(0)),
                Value::Primitive(PrimitiveValue::U8(b'x')),
            ]),
        );
        fields.insert(
            "parent".to_owned(),
            Value::Pointer(PointerValue::new(0)),
        );
        Structure::new("Object".to_owned(), 1, fields, Vec::new())
    }

    #[test]
    fn typed_accessors_read_their_fields() {
        let s = sample_structure();
        assert_eq!(s.get_i32("flag").unwrap(), 7);
        assert_eq!(s.get_string("name").unwrap(), "hi");
        assert!(s.get_pointer("parent").unwrap().is_null());
    }

    #[test]
    fn access_failures_are_explicit() {
        let s = sample_structure();
        assert!(matches!(
            s.get_i32("missing"),
            Err(FormatError::FieldNotFound { .. })
        ));
        assert!(matches!(
            s.get_f32("flag"),
            Err(FormatError::FieldTypeMismatch {
                expected: "float",
                ..
            })
        ));
        assert!(matches!(
            s.get_string("flag"),
            Err(FormatError::FieldTypeMismatch { .. })
        ));
    }

    #[test]
    fn fields_keep_declaration_order() {
        let s = sample_structure();
        let names: Vec<&str> = s.fields().keys().map(String::as_str).collect();
        assert_eq!(names, ["flag", "name", "parent"]);
    }
}
