//! Value classification and byte-layout packing
//!
//! Bridges the gap between the host's shapeless values and the fixed
//! layouts native code expects:
//!
//! - [`classify`] maps a [`Value`] onto its ABI-level representation
//!   (32-bit integer, null-terminated text, or raw fixed-layout buffer)
//! - [`pack_word`] / [`unpack_word`] convert a 32-bit word to and from a
//!   packed byte layout described by a descriptor string
//! - [`pack_text`] produces the null-terminated byte sequence for a string
//!
//! # Layout descriptors
//!
//! A descriptor is a sequence of letter+count components, e.g. `"x4L"` is
//! four bytes of padding followed by one 4-byte word. Recognized letters:
//!
//! | letter | meaning            | size |
//! |--------|--------------------|------|
//! | `L`    | 32-bit word        | 4    |
//! | `S`    | 16-bit half word   | 2    |
//! | `C`    | 8-bit byte         | 1    |
//! | `x`    | padding byte       | 1    |
//!
//! A missing count means 1. Packing and unpacking are symmetric:
//! `unpack_word(pack_word(v, f), f) == v` for every `v` the first
//! value-bearing component of `f` can represent.

use crate::value::Value;
use thiserror::Error;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unsupported layout descriptor component '{0}'")]
    UnsupportedFormat(char),

    #[error("layout descriptor has no value-bearing component")]
    EmptyFormat,

    #[error("ABI class of a {0} value cannot be determined")]
    AmbiguousArgumentType(&'static str),

    #[error("value {value:#x} out of range for layout component '{component}'")]
    ValueOutOfRange { value: u32, component: char },

    #[error("text contains an interior null byte at offset {0}")]
    InvalidText(usize),

    #[error("buffer too short for layout: need {need} bytes, have {have}")]
    ShortBuffer { need: usize, have: usize },
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// ABI-level representation of a host value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiClass {
    /// Fits a native 32-bit word, passed by value
    Integer,
    /// Null-terminated byte string, passed by reference
    Text,
    /// Fixed-layout buffer, passed by reference
    Raw,
}

/// Classify a host value into its ABI-level representation.
///
/// `Value::Null` has no decidable class — it could be the zero word or the
/// null pointer — and is rejected rather than guessed at.
pub fn classify(value: &Value) -> CodecResult<AbiClass> {
    match value {
        Value::Word(_) => Ok(AbiClass::Integer),
        Value::Text(_) => Ok(AbiClass::Text),
        Value::Raw(_) => Ok(AbiClass::Raw),
        Value::Null => Err(CodecError::AmbiguousArgumentType(value.type_name())),
    }
}

/// One component of a parsed layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component {
    Word,
    Half,
    Byte,
    Pad,
}

impl Component {
    fn from_letter(letter: char) -> CodecResult<Self> {
        match letter {
            'L' => Ok(Component::Word),
            'S' => Ok(Component::Half),
            'C' => Ok(Component::Byte),
            'x' => Ok(Component::Pad),
            other => Err(CodecError::UnsupportedFormat(other)),
        }
    }

    fn letter(self) -> char {
        match self {
            Component::Word => 'L',
            Component::Half => 'S',
            Component::Byte => 'C',
            Component::Pad => 'x',
        }
    }

    fn unit_size(self) -> usize {
        match self {
            Component::Word => 4,
            Component::Half => 2,
            Component::Byte | Component::Pad => 1,
        }
    }

    fn max_value(self) -> u32 {
        match self {
            Component::Word => u32::MAX,
            Component::Half => u16::MAX as u32,
            Component::Byte => u8::MAX as u32,
            Component::Pad => 0,
        }
    }
}

/// A parsed layout descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    components: Vec<(Component, usize)>,
}

impl Layout {
    /// Parse a descriptor string, rejecting unrecognized components
    pub fn parse(descriptor: &str) -> CodecResult<Self> {
        let mut components = Vec::new();
        let mut chars = descriptor.chars().peekable();

        while let Some(letter) = chars.next() {
            let component = Component::from_letter(letter)?;
            let mut count: Option<usize> = None;
            while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                count = Some(count.unwrap_or(0) * 10 + digit as usize);
                chars.next();
            }
            // missing count means 1
            components.push((component, count.unwrap_or(1)));
        }

        Ok(Layout { components })
    }

    /// Total byte size: the sum of repeat count times unit size per component
    pub fn byte_len(&self) -> usize {
        self.components
            .iter()
            .map(|(c, n)| c.unit_size() * n)
            .sum()
    }

    /// Byte offset and kind of the first value-bearing component
    fn first_slot(&self) -> CodecResult<(usize, Component)> {
        let mut offset = 0;
        for &(component, count) in &self.components {
            if component != Component::Pad && count > 0 {
                return Ok((offset, component));
            }
            offset += component.unit_size() * count;
        }
        Err(CodecError::EmptyFormat)
    }
}

/// Pack a 32-bit word into the layout described by `descriptor`.
///
/// The word lands in the first value-bearing component (little-endian);
/// padding and any remaining components are zeroed.
pub fn pack_word(value: u32, descriptor: &str) -> CodecResult<Vec<u8>> {
    let layout = Layout::parse(descriptor)?;
    let (offset, component) = layout.first_slot()?;

    if value > component.max_value() {
        return Err(CodecError::ValueOutOfRange {
            value,
            component: component.letter(),
        });
    }

    let mut bytes = vec![0u8; layout.byte_len()];
    let size = component.unit_size();
    bytes[offset..offset + size].copy_from_slice(&value.to_le_bytes()[..size]);
    Ok(bytes)
}

/// Unpack the first value-bearing component of a packed layout.
pub fn unpack_word(bytes: &[u8], descriptor: &str) -> CodecResult<u32> {
    let layout = Layout::parse(descriptor)?;
    let (offset, component) = layout.first_slot()?;
    let size = component.unit_size();

    if bytes.len() < offset + size {
        return Err(CodecError::ShortBuffer {
            need: offset + size,
            have: bytes.len(),
        });
    }

    let mut word = [0u8; 4];
    word[..size].copy_from_slice(&bytes[offset..offset + size]);
    Ok(u32::from_le_bytes(word))
}

/// Produce the null-terminated byte sequence for a text value.
///
/// The result is always `text.len() + 1` bytes with a trailing zero;
/// interior null bytes are rejected because native code would truncate
/// the string there.
pub fn pack_text(text: &str) -> CodecResult<Vec<u8>> {
    if let Some(at) = text.bytes().position(|b| b == 0) {
        return Err(CodecError::InvalidText(at));
    }
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(0);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_classify_by_shape() {
        assert_eq!(classify(&Value::Word(7)).unwrap(), AbiClass::Integer);
        assert_eq!(classify(&Value::text("hi")).unwrap(), AbiClass::Text);
        assert_eq!(classify(&Value::Raw(vec![1, 2])).unwrap(), AbiClass::Raw);
    }

    #[test]
    fn test_classify_null_is_ambiguous() {
        assert!(matches!(
            classify(&Value::Null),
            Err(CodecError::AmbiguousArgumentType(_))
        ));
    }

    #[rstest]
    #[case("L", 4)]
    #[case("L2", 8)]
    #[case("x4L", 8)]
    #[case("S", 2)]
    #[case("C3", 3)]
    #[case("x2SC", 5)]
    fn test_layout_byte_len(#[case] descriptor: &str, #[case] expected: usize) {
        assert_eq!(Layout::parse(descriptor).unwrap().byte_len(), expected);
    }

    #[test]
    fn test_unknown_component_rejected() {
        assert_eq!(
            Layout::parse("L2Q").unwrap_err(),
            CodecError::UnsupportedFormat('Q')
        );
        assert!(matches!(
            pack_word(1, "Z"),
            Err(CodecError::UnsupportedFormat('Z'))
        ));
    }

    #[test]
    fn test_pack_word_layout() {
        assert_eq!(pack_word(0x0403_0201, "L").unwrap(), vec![1, 2, 3, 4]);
        // Padding precedes the word and is zeroed
        assert_eq!(
            pack_word(0xAABB, "x4L").unwrap(),
            vec![0, 0, 0, 0, 0xBB, 0xAA, 0, 0]
        );
    }

    #[test]
    fn test_pack_word_out_of_range_for_component() {
        assert!(matches!(
            pack_word(0x1_00, "C"),
            Err(CodecError::ValueOutOfRange { component: 'C', .. })
        ));
        assert!(matches!(
            pack_word(0x1_0000, "S"),
            Err(CodecError::ValueOutOfRange { component: 'S', .. })
        ));
    }

    #[test]
    fn test_unpack_short_buffer() {
        assert!(matches!(
            unpack_word(&[1, 2], "L"),
            Err(CodecError::ShortBuffer { need: 4, have: 2 })
        ));
    }

    #[test]
    fn test_pad_only_layout_has_no_slot() {
        assert!(matches!(pack_word(0, "x4"), Err(CodecError::EmptyFormat)));
    }

    #[test]
    fn test_pack_text_appends_terminator() {
        assert_eq!(pack_text("hi").unwrap(), vec![b'h', b'i', 0]);
        assert_eq!(pack_text("").unwrap(), vec![0]);
    }

    #[test]
    fn test_pack_text_rejects_interior_null() {
        assert_eq!(
            pack_text("a\0b").unwrap_err(),
            CodecError::InvalidText(1)
        );
    }

    proptest! {
        #[test]
        fn prop_word_round_trip(v in any::<u32>()) {
            let packed = pack_word(v, "L").unwrap();
            prop_assert_eq!(unpack_word(&packed, "L").unwrap(), v);
        }

        #[test]
        fn prop_padded_word_round_trip(v in any::<u32>()) {
            let packed = pack_word(v, "x4L").unwrap();
            prop_assert_eq!(unpack_word(&packed, "x4L").unwrap(), v);
        }

        #[test]
        fn prop_half_word_round_trip(v in 0u32..=u16::MAX as u32) {
            let packed = pack_word(v, "S").unwrap();
            prop_assert_eq!(unpack_word(&packed, "S").unwrap(), v);
        }

        #[test]
        fn prop_text_is_terminated(s in "[^\\x00]{0,64}") {
            let packed = pack_text(&s).unwrap();
            prop_assert!(packed.len() >= s.len() + 1);
            prop_assert_eq!(*packed.last().unwrap(), 0);
        }
    }
}
