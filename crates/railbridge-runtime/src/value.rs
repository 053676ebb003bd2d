//! Bridge value types
//!
//! Defines the two value types that cross the FFI boundary:
//! - `Value`: host-side argument values handed to the dispatcher
//! - `NativeValue`: the 32-bit word every native call returns
//!
//! The target ABI is a 32-bit process: every native return value, handle
//! and address is one 4-byte word. `NativeValue` deliberately does not
//! decide what that word means — the same bit pattern can be a boolean, a
//! handle, or a result code depending on the call, so the caller picks the
//! interpretation.

/// A host-side value passed as a native call argument.
///
/// The host runtime has no static type signatures, so the dispatcher
/// classifies each `Value` by shape at call time (see `codec`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// 32-bit integer, passed by value
    Word(u32),
    /// String, passed by reference as a null-terminated byte sequence
    Text(String),
    /// Pre-formatted fixed-layout buffer, passed by reference
    Raw(Vec<u8>),
    /// No value. Has no decidable ABI class; rejected at call time.
    Null,
}

impl Value {
    /// Convenience constructor for text arguments
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Name of this value's shape, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Word(_) => "word",
            Value::Text(_) => "text",
            Value::Raw(_) => "raw",
            Value::Null => "null",
        }
    }
}

impl From<u32> for Value {
    fn from(w: u32) -> Self {
        Value::Word(w)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<NativeValue> for Value {
    fn from(v: NativeValue) -> Self {
        Value::Word(v.raw())
    }
}

/// The 32-bit word returned by a native call.
///
/// Exposes the three interpretations callers need; which one applies is a
/// per-call contract the dispatcher knows nothing about:
///
/// - [`as_bool`](NativeValue::as_bool) for calls returning a truth value
///   (only the low byte is significant on this ABI)
/// - [`is_null`](NativeValue::is_null) for calls returning a handle or
///   pointer
/// - [`ok`](NativeValue::ok) for calls returning a result code, where zero
///   is success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeValue(u32);

impl NativeValue {
    /// The null word
    pub const NULL: NativeValue = NativeValue(0);

    /// Wrap a raw 32-bit result word
    pub fn from_raw(raw: u32) -> Self {
        NativeValue(raw)
    }

    /// The raw result word
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Boolean interpretation: the low byte is non-zero
    pub fn as_bool(&self) -> bool {
        self.0 & 0xFF != 0
    }

    /// Pointer interpretation: the word is the null address
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Result-code interpretation: zero is success
    pub fn ok(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for NativeValue {
    fn from(raw: u32) -> Self {
        NativeValue(raw)
    }
}
