//! Order-preserving tuple encoding for store keys.
//!
//! A tuple is a sequence of elements packed into a single byte string such
//! that the byte order of packed tuples matches the element-wise order of
//! the tuples themselves.
//!
//! # Element Codes
//!
//! ```text
//! 0x01 <bytes, 0x00 escaped as 0x00 0xFF> 0x00   byte string
//! 0x02 <utf-8, 0x00 escaped as 0x00 0xFF> 0x00   text string
//! 0x15 <8 bytes big-endian of (v ^ i64::MIN)>     signed integer
//! ```

// Sign-bit flips are intentional bit reinterpretations
#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

const BYTES_CODE: u8 = 0x01;
const STRING_CODE: u8 = 0x02;
const INT_CODE: u8 = 0x15;
const ESCAPE: u8 = 0xFF;

/// One element of a tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Element {
    Bytes(Vec<u8>),
    String(String),
    Int(i64),
}

impl From<i64> for Element {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Element {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<&[u8]> for Element {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

/// Pack a tuple into its binary key form.
#[must_use]
pub fn pack(elements: &[Element]) -> Vec<u8> {
    let mut out = Vec::new();
    for element in elements {
        pack_element(&mut out, element);
    }
    out
}

/// Append one element to `out`.
pub fn pack_element(out: &mut Vec<u8>, element: &Element) {
    match element {
        Element::Bytes(bytes) => {
            out.push(BYTES_CODE);
            pack_escaped(out, bytes);
        }
        Element::String(text) => {
            out.push(STRING_CODE);
            pack_escaped(out, text.as_bytes());
        }
        Element::Int(value) => {
            out.push(INT_CODE);
            out.extend_from_slice(&((*value ^ i64::MIN) as u64).to_be_bytes());
        }
    }
}

fn pack_escaped(out: &mut Vec<u8>, bytes: &[u8]) {
    for &byte in bytes {
        out.push(byte);
        if byte == 0x00 {
            out.push(ESCAPE);
        }
    }
    out.push(0x00);
}

/// Unpack a binary key into its elements.
pub fn unpack(mut bytes: &[u8]) -> Result<Vec<Element>, TupleError> {
    let mut elements = Vec::new();
    while !bytes.is_empty() {
        let (element, rest) = unpack_element(bytes)?;
        elements.push(element);
        bytes = rest;
    }
    Ok(elements)
}

fn unpack_element(bytes: &[u8]) -> Result<(Element, &[u8]), TupleError> {
    let (&code, rest) = bytes.split_first().ok_or(TupleError::UnexpectedEnd)?;
    match code {
        BYTES_CODE => {
            let (raw, rest) = unpack_escaped(rest)?;
            Ok((Element::Bytes(raw), rest))
        }
        STRING_CODE => {
            let (raw, rest) = unpack_escaped(rest)?;
            let text = String::from_utf8(raw).map_err(|_| TupleError::InvalidUtf8)?;
            Ok((Element::String(text), rest))
        }
        INT_CODE => {
            if rest.len() < 8 {
                return Err(TupleError::UnexpectedEnd);
            }
            let (raw, rest) = rest.split_at(8);
            let mut buf = [0u8; 8];
            buf.copy_from_slice(raw);
            let value = (u64::from_be_bytes(buf) as i64) ^ i64::MIN;
            Ok((Element::Int(value), rest))
        }
        other => Err(TupleError::UnknownCode(other)),
    }
}

fn unpack_escaped(bytes: &[u8]) -> Result<(Vec<u8>, &[u8]), TupleError> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0x00 {
            if bytes.get(i + 1) == Some(&ESCAPE) {
                out.push(0x00);
                i += 2;
                continue;
            }
            return Ok((out, &bytes[i + 1..]));
        }
        out.push(bytes[i]);
        i += 1;
    }
    Err(TupleError::UnexpectedEnd)
}

/// A key prefix under which related keys are grouped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subspace {
    prefix: Vec<u8>,
}

impl Subspace {
    /// Create a subspace from a tuple prefix.
    #[must_use]
    pub fn new(elements: &[Element]) -> Self {
        Self {
            prefix: pack(elements),
        }
    }

    /// Create a subspace from raw prefix bytes.
    #[must_use]
    pub const fn from_bytes(prefix: Vec<u8>) -> Self {
        Self { prefix }
    }

    #[must_use]
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// A nested subspace with `elements` appended to this prefix.
    #[must_use]
    pub fn subspace(&self, elements: &[Element]) -> Self {
        Self {
            prefix: self.pack(elements),
        }
    }

    /// Pack a tuple under this prefix.
    #[must_use]
    pub fn pack(&self, elements: &[Element]) -> Vec<u8> {
        let mut key = self.prefix.clone();
        for element in elements {
            pack_element(&mut key, element);
        }
        key
    }

    /// Strip this prefix and unpack the remainder.
    pub fn unpack(&self, key: &[u8]) -> Result<Vec<Element>, TupleError> {
        let rest = key
            .strip_prefix(self.prefix.as_slice())
            .ok_or(TupleError::PrefixMismatch)?;
        unpack(rest)
    }

    /// Half-open key range `[begin, end)` covering every key strictly inside
    /// this subspace.
    #[must_use]
    pub fn range(&self) -> (Vec<u8>, Vec<u8>) {
        let mut begin = self.prefix.clone();
        begin.push(0x00);
        let mut end = self.prefix.clone();
        end.push(0xFF);
        (begin, end)
    }
}

/// Errors that can occur when decoding a packed tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleError {
    /// Input ended inside an element.
    UnexpectedEnd,
    /// Unrecognized element type code.
    UnknownCode(u8),
    /// A string element was not valid UTF-8.
    InvalidUtf8,
    /// The key does not start with the subspace prefix.
    PrefixMismatch,
}

impl std::fmt::Display for TupleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedEnd => write!(f, "unexpected end of tuple"),
            Self::UnknownCode(code) => write!(f, "unknown tuple element code 0x{code:02x}"),
            Self::InvalidUtf8 => write!(f, "tuple string is not valid utf-8"),
            Self::PrefixMismatch => write!(f, "key is outside the subspace"),
        }
    }
}

impl std::error::Error for TupleError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_order_matches_byte_order() {
        let values = [i64::MIN, -1000, -1, 0, 1, 255, 256, i64::MAX];
        let packed: Vec<Vec<u8>> = values
            .iter()
            .map(|&v| pack(&[Element::Int(v)]))
            .collect();
        for pair in packed.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_bytes_with_nul_roundtrip() {
        let tuple = vec![
            Element::Bytes(vec![0, 1, 0, 0xFF]),
            Element::String("a\0b".to_owned()),
            Element::Int(-7),
        ];
        assert_eq!(unpack(&pack(&tuple)).expect("unpack"), tuple);
    }

    #[test]
    fn test_shorter_bytes_sort_first() {
        let a = pack(&[Element::Bytes(b"ab".to_vec()), Element::Int(9)]);
        let b = pack(&[Element::Bytes(b"ab\0".to_vec()), Element::Int(0)]);
        let c = pack(&[Element::Bytes(b"abc".to_vec())]);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_subspace_range_contains_children() {
        let space = Subspace::new(&[Element::from("tree")]);
        let (begin, end) = space.range();
        let key = space.pack(&[Element::Int(i64::MIN)]);
        assert!(begin.as_slice() <= key.as_slice());
        assert!(key.as_slice() < end.as_slice());
        assert_eq!(
            space.unpack(&key).expect("unpack"),
            vec![Element::Int(i64::MIN)]
        );
    }

    #[test]
    fn test_unpack_rejects_truncated_input() {
        let mut key = pack(&[Element::Int(5)]);
        key.pop();
        assert_eq!(unpack(&key), Err(TupleError::UnexpectedEnd));
        assert_eq!(unpack(&[0x42]), Err(TupleError::UnknownCode(0x42)));
    }
}
