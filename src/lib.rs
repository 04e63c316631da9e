//! A parser for the binary container format saved by Blender-style tools.
//!
//! A file of this format is a crash dump: the exporting process walks its
//! in-memory data and writes each allocation out as a tagged block, recording
//! the allocation's address in the block header. Alongside the data it writes
//! a DNA block, a full description of every structure layout the build was
//! compiled with. Decoding therefore never depends on a hardcoded schema;
//! the same code reads files saved by any tool version, old or new.
//!
//! Loading happens in stages. [`BlendFile::from_path`] (or
//! [`BlendFile::from_data`] for in-memory bytes) parses the 12-byte header,
//! catalogs every block by its recorded address, decodes the DNA and checks
//! that each block's structure index exists. Payloads stay untouched until
//! asked for: [`BlendFile::structures`] materializes a block into decoded
//! [`Structure`]s, and pointer fields are chased lazily through
//! [`PointerValue::resolve`]. A pointer to a block that was never exported is
//! not an error, it just resolves to nothing.
//!
//! ```no_run
//! use blendfile::BlendFile;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = BlendFile::from_path("scene.blend")?;
//!
//! for object in file.find_by_type_name("Object")? {
//!     let id = object.get_struct("id")?;
//!     println!("{}", id.get_string("name")?);
//!
//!     for parent in object.get_pointer("parent")?.resolve(&file)? {
//!         println!("  child of {}", parent.get_struct("id")?.get_string("name")?);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Compressed files are detected and rejected with
//! [`FormatError::CompressedNotSupported`]; decompress the stream before
//! handing it over.

pub mod error;
pub mod parsers;
pub mod reader;
pub mod runtime;

pub use crate::error::{FormatError, LoadError, Result};
pub use crate::parsers::blend::{FileBlock, FileHeader, CODE_DNA, CODE_END};
pub use crate::parsers::dna::{Dna, DnaStruct, DnaType, FieldTemplate, StructLayout, TypeInfo};
pub use crate::parsers::field::FieldInfo;
pub use crate::parsers::primitive::PrimitiveValue;
pub use crate::parsers::{Endianness, PointerSize};
pub use crate::runtime::{BlendFile, LoadState, PointerValue, Structure, Value};
