//! Grammar for DNA field names.
//!
//! The schema tables do not carry pointer or array flags; they are embedded
//! in the field name string itself. `*next` is a pointer, `**mat` a pointer
//! to pointer, `loc[3]` a 3-element array, `mat[4][4]` a two-dimensional
//! array and `(*poin)()` a function pointer. This module strips those
//! modifiers off and reports them as a [`FieldInfo`].

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_until},
    combinator::complete,
    error::{ErrorKind, ParseError},
    multi::{many0, many1},
    sequence::delimited,
    Err, IResult,
};

#[derive(Debug)]
pub enum FieldParseError {
    NomError {
        kind: ErrorKind,
        other: Option<Box<FieldParseError>>,
    },
    InvalidArrayExtent,
}

impl ParseError<&str> for FieldParseError {
    fn from_error_kind(_input: &str, kind: ErrorKind) -> Self {
        FieldParseError::NomError { kind, other: None }
    }

    fn append(_input: &str, kind: ErrorKind, other: Self) -> Self {
        FieldParseError::NomError {
            kind,
            other: Some(Box::new(other)),
        }
    }
}

type Result<'a, T> = IResult<&'a str, T, FieldParseError>;

/// The shape of one field, as recovered from its name string. Array lengths
/// are flattened (`len` is the product of the extents) but the declared
/// extents stay available in `dimensions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldInfo {
    Value,
    ValueArray {
        len: usize,
        dimensions: Vec<usize>,
    },
    Pointer {
        indirection: usize,
    },
    PointerArray {
        indirection: usize,
        len: usize,
        dimensions: Vec<usize>,
    },
    FnPointer,
}

fn array_extents(input: &str) -> Result<Vec<usize>> {
    let (input, extents) = many0(complete(delimited(tag("["), take_until("]"), tag("]"))))(input)?;

    let mut dimensions = Vec::with_capacity(extents.len());
    for extent in extents {
        dimensions.push(
            extent
                .parse::<usize>()
                .map_err(|_| Err::Failure(FieldParseError::InvalidArrayExtent))?,
        );
    }

    Ok((input, dimensions))
}

fn fn_pointer(input: &str) -> Result<(&str, FieldInfo)> {
    let (input, name) = delimited(tag("(*"), take_until(")"), tag(")"))(input)?;
    let (input, _) = delimited(tag("("), take_until(")"), tag(")"))(input)?;

    Ok((input, (name, FieldInfo::FnPointer)))
}

fn pointer(input: &str) -> Result<(&str, FieldInfo)> {
    let (input, asterisks) = many1(tag("*"))(input)?;
    let (input, name) = take_till(|c| c == '[')(input)?;

    if input.is_empty() {
        return Ok((
            input,
            (
                name,
                FieldInfo::Pointer {
                    indirection: asterisks.len(),
                },
            ),
        ));
    }

    let (input, dimensions) = array_extents(input)?;
    let len = dimensions.iter().product();
    Ok((
        input,
        (
            name,
            FieldInfo::PointerArray {
                indirection: asterisks.len(),
                len,
                dimensions,
            },
        ),
    ))
}

fn value(input: &str) -> Result<(&str, FieldInfo)> {
    let (input, name) = take_till(|c| c == '[')(input)?;

    if input.is_empty() {
        return Ok((input, (name, FieldInfo::Value)));
    }

    let (input, dimensions) = array_extents(input)?;
    let len = dimensions.iter().product();
    Ok((input, (name, FieldInfo::ValueArray { len, dimensions })))
}

/// Splits a raw DNA field name into the bare identifier and its shape.
pub fn parse_field(input: &str) -> Result<(&str, FieldInfo)> {
    alt((fn_pointer, pointer, value))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(input: &str) -> (&str, FieldInfo) {
        let (rest, parsed) = parse_field(input).expect("field should parse");
        assert!(rest.is_empty(), "unparsed trailer {:?}", rest);
        parsed
    }

    #[test]
    fn plain_value() {
        assert_eq!(parsed("flag"), ("flag", FieldInfo::Value));
    }

    #[test]
    fn value_arrays_flatten_their_extents() {
        assert_eq!(
            parsed("loc[3]"),
            (
                "loc",
                FieldInfo::ValueArray {
                    len: 3,
                    dimensions: vec![3],
                }
            )
        );
        assert_eq!(
            parsed("mat[4][4]"),
            (
                "mat",
                FieldInfo::ValueArray {
                    len: 16,
                    dimensions: vec![4, 4],
                }
            )
        );
    }

    #[test]
    fn pointers_count_indirection() {
        assert_eq!(parsed("*next"), ("next", FieldInfo::Pointer { indirection: 1 }));
        assert_eq!(parsed("**mat"), ("mat", FieldInfo::Pointer { indirection: 2 }));
    }

    #[test]
    fn pointer_arrays() {
        assert_eq!(
            parsed("*mtex[18]"),
            (
                "mtex",
                FieldInfo::PointerArray {
                    indirection: 1,
                    len: 18,
                    dimensions: vec![18],
                }
            )
        );
    }

    #[test]
    fn function_pointers() {
        assert_eq!(parsed("(*exec)()"), ("exec", FieldInfo::FnPointer));
    }

    #[test]
    fn bad_extent_is_rejected() {
        assert!(parse_field("loc[x]").is_err());
    }
}
