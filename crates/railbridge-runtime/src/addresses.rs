//! Emulated pointers for a pointerless caller
//!
//! The host runtime has no address-of operator, so "pass by reference"
//! has to be manufactured: [`AddressTable::take_reference`] packs a value
//! into an owned, heap-pinned buffer and hands out the buffer's storage
//! address as the pointer word native code receives. The table is the
//! single source of truth for which addresses this system owns —
//! dereferencing anything else fails instead of silently misreading
//! native-owned memory.
//!
//! Addresses are 32-bit words because the target ABI is a 32-bit process.
//! Entries stay pinned (the buffer never moves) until [`release`]d;
//! whether native code still holds the address after release is the
//! caller's contract to manage, which is why release is explicit rather
//! than tied to scope.
//!
//! [`release`]: AddressTable::release

use crate::codec::{self, CodecError};
use crate::value::{NativeValue, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Address table errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The address was not allocated by this table; it belongs to native
    /// code or to a released entry
    #[error("foreign address {0:#010x}: not allocated by this table")]
    ForeignAddress(u32),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Result type for address table operations
pub type AddressResult<T> = Result<T, AddressError>;

/// Process-wide table mapping emulated addresses to owned byte buffers.
#[derive(Default)]
pub struct AddressTable {
    entries: HashMap<u32, Box<[u8]>>,
}

impl AddressTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Pack `value` into an owned buffer and return its address as a
    /// native word.
    ///
    /// The buffer's storage does not move for the lifetime of the entry,
    /// so the returned word can be handed to native code as a pointer
    /// argument. Words pack as one 32-bit slot (usable as an out
    /// parameter), text packs null-terminated, raw buffers are taken as
    /// given.
    pub fn take_reference(&mut self, value: &Value) -> AddressResult<NativeValue> {
        let buffer: Box<[u8]> = match value {
            Value::Word(w) => codec::pack_word(*w, "L")?.into(),
            Value::Text(s) => codec::pack_text(s)?.into(),
            Value::Raw(bytes) => bytes.clone().into(),
            Value::Null => {
                return Err(CodecError::AmbiguousArgumentType(value.type_name()).into());
            }
        };

        let address = buffer.as_ptr() as usize as u32;
        self.entries.insert(address, buffer);
        Ok(NativeValue::from_raw(address))
    }

    /// Read back the first 32-bit word of the buffer at `address`.
    ///
    /// Fails with [`AddressError::ForeignAddress`] unless the address was
    /// produced by [`take_reference`](AddressTable::take_reference) on
    /// this table and has not been released — a lifetime or ownership bug
    /// that must not be silently misread as native data.
    pub fn dereference(&self, address: u32) -> AddressResult<u32> {
        let buffer = self
            .entries
            .get(&address)
            .ok_or(AddressError::ForeignAddress(address))?;
        Ok(codec::unpack_word(buffer, "L")?)
    }

    /// Drop the entry at `address`, unpinning its storage.
    ///
    /// Returns whether an entry was present. Native access to the address
    /// after release is undefined; callers avoid it by not retaining the
    /// address past the call it was an argument to.
    pub fn release(&mut self, address: u32) -> bool {
        self.entries.remove(&address).is_some()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no live entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_word_reference_round_trip() {
        let mut table = AddressTable::new();
        let addr = table.take_reference(&Value::Word(0xBEEF)).unwrap();
        assert!(!addr.is_null());
        assert_eq!(table.dereference(addr.raw()).unwrap(), 0xBEEF);
    }

    #[test]
    fn test_foreign_address_rejected() {
        let table = AddressTable::new();
        assert_eq!(
            table.dereference(0x1234_5678).unwrap_err(),
            AddressError::ForeignAddress(0x1234_5678)
        );
    }

    #[test]
    fn test_release_makes_address_foreign() {
        let mut table = AddressTable::new();
        let addr = table.take_reference(&Value::Word(1)).unwrap();
        assert!(table.release(addr.raw()));
        assert!(!table.release(addr.raw()));
        assert!(matches!(
            table.dereference(addr.raw()),
            Err(AddressError::ForeignAddress(_))
        ));
    }

    #[test]
    fn test_text_reference_is_terminated() {
        let mut table = AddressTable::new();
        let addr = table.take_reference(&Value::text("ok")).unwrap();
        // First word of "ok\0" little-endian, buffer shorter than a word
        assert!(matches!(
            table.dereference(addr.raw()),
            Err(AddressError::Codec(CodecError::ShortBuffer { .. }))
        ));
        assert!(table.release(addr.raw()));
    }

    #[test]
    fn test_null_has_no_reference() {
        let mut table = AddressTable::new();
        assert!(matches!(
            table.take_reference(&Value::Null),
            Err(AddressError::Codec(CodecError::AmbiguousArgumentType(_)))
        ));
    }

    #[test]
    fn test_entries_are_independent() {
        let mut table = AddressTable::new();
        let a = table.take_reference(&Value::Word(1)).unwrap();
        let b = table.take_reference(&Value::Word(2)).unwrap();
        assert_ne!(a.raw(), b.raw());
        assert_eq!(table.len(), 2);

        table.release(a.raw());
        assert_eq!(table.dereference(b.raw()).unwrap(), 2);
    }

    proptest! {
        #[test]
        fn prop_dereference_inverts_take_reference(v in any::<u32>()) {
            let mut table = AddressTable::new();
            let addr = table.take_reference(&Value::Word(v)).unwrap();
            prop_assert_eq!(table.dereference(addr.raw()).unwrap(), v);
            table.release(addr.raw());
        }
    }
}
