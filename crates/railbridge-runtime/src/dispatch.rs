//! Dynamic call dispatch into the platform SDK
//!
//! The host runtime has no static type signatures, so the dispatcher
//! derives each call's native signature from the shapes of the arguments
//! actually supplied: integers go by value as 32-bit words, strings and
//! raw buffers go by reference. Entry points are resolved lazily on first
//! use through a [`SymbolResolver`] and cached per operation name for the
//! life of the dispatcher; names marked volatile re-resolve on every call.
//!
//! Logical operation names map onto exported symbols with a fixed
//! `{prefix}_{name}` convention, so `invoke("Initialize", ..)` with the
//! `Rail` prefix resolves `Rail_Initialize`.
//!
//! The foreign call itself is built at runtime with `libffi`: every
//! argument is either a 32-bit word or a pointer, and every call returns
//! one 32-bit word wrapped in [`NativeValue`].

use crate::codec::{self, AbiClass, CodecError};
use crate::value::{NativeValue, Value};
use libffi::middle::{Arg, Cif, CodePtr, Type};
use libloading::Library;
use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::path::Path;
use thiserror::Error;

/// Dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("native symbol '{0}' not found")]
    NativeSymbolNotFound(String),

    #[error("failed to load library '{library}': {reason}")]
    LibraryLoadFailed { library: String, reason: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// How one argument slot is passed on the native ABI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgPass {
    /// By value, 32-bit word
    Word,
    /// By reference, pointer to null-terminated or fixed-layout bytes
    Pointer,
}

/// An import signature derived from runtime argument shapes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    args: Vec<ArgPass>,
}

impl Signature {
    /// Derive the signature for a concrete argument list
    pub fn infer(args: &[Value]) -> Result<Self, CodecError> {
        let args = args
            .iter()
            .map(|value| {
                Ok(match codec::classify(value)? {
                    AbiClass::Integer => ArgPass::Word,
                    AbiClass::Text | AbiClass::Raw => ArgPass::Pointer,
                })
            })
            .collect::<Result<Vec<_>, CodecError>>()?;
        Ok(Signature { args })
    }

    /// Number of argument slots
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Argument slot classes in call order
    pub fn args(&self) -> &[ArgPass] {
        &self.args
    }
}

/// A resolved native entry point.
///
/// Only valid while the library it came out of stays loaded; the resolver
/// that produced it owns that lifetime.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoint {
    addr: *const (),
}

impl EntryPoint {
    /// Wrap a resolved code address
    pub fn new(addr: *const ()) -> Self {
        EntryPoint { addr }
    }

    /// The code address
    pub fn addr(&self) -> *const () {
        self.addr
    }
}

/// Resolves an exported symbol name to an entry point.
///
/// The seam between the dispatcher and the platform library: production
/// code uses [`NativeLibrary`], tests substitute a counting double.
pub trait SymbolResolver {
    /// Resolve `symbol`, consulting `signature` if the backing mechanism
    /// needs the import shape up front
    fn resolve(&mut self, symbol: &str, signature: &Signature) -> DispatchResult<EntryPoint>;
}

/// A loaded platform SDK library.
///
/// Owns the `libloading` handle; entry points resolved out of it stay
/// valid until the library is dropped, which the dispatcher guarantees by
/// owning its resolver.
pub struct NativeLibrary {
    name: String,
    library: Library,
}

impl NativeLibrary {
    /// Load the library at `path`.
    ///
    /// # Safety considerations
    ///
    /// Loading runs the library's initialization code in-process; the
    /// caller must trust the SDK it points the bridge at.
    pub fn open(path: &Path) -> DispatchResult<Self> {
        let name = path.display().to_string();
        let library = unsafe {
            Library::new(path).map_err(|e| DispatchError::LibraryLoadFailed {
                library: name.clone(),
                reason: e.to_string(),
            })?
        };
        Ok(NativeLibrary { name, library })
    }

    /// The library's display name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SymbolResolver for NativeLibrary {
    fn resolve(&mut self, symbol: &str, _signature: &Signature) -> DispatchResult<EntryPoint> {
        let func: libloading::Symbol<'_, unsafe extern "C" fn()> = unsafe {
            self.library
                .get(symbol.as_bytes())
                .map_err(|_| DispatchError::NativeSymbolNotFound(symbol.to_string()))?
        };
        Ok(EntryPoint::new(*func as *const ()))
    }
}

struct CachedEntry {
    entry: EntryPoint,
    /// Signature observed when the binding was created; marshalling always
    /// follows the current call's arguments, this is kept for diagnostics
    #[allow(dead_code)]
    signature: Signature,
}

/// Marshalled argument storage kept alive across the foreign call
enum Marshalled {
    Word(u32),
    Bytes(Vec<u8>),
}

/// Dynamic call dispatcher with per-name entry point caching.
pub struct CallDispatcher<R: SymbolResolver> {
    resolver: R,
    prefix: String,
    cache: HashMap<String, CachedEntry>,
    volatile: HashSet<String>,
}

impl<R: SymbolResolver> CallDispatcher<R> {
    /// Create a dispatcher resolving `{prefix}_{name}` through `resolver`
    pub fn new(resolver: R, prefix: impl Into<String>) -> Self {
        CallDispatcher {
            resolver,
            prefix: prefix.into(),
            cache: HashMap::new(),
            volatile: HashSet::new(),
        }
    }

    /// Declare a binding non-cacheable: every call re-resolves the entry
    /// point. For operations whose argument shapes are not stable from
    /// call to call.
    pub fn mark_volatile(&mut self, name: &str) {
        self.volatile.insert(name.to_string());
    }

    /// The exported symbol an operation name maps onto
    pub fn symbol_for(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    /// Invoke the named operation with the given arguments.
    ///
    /// First use of a name resolves its entry point with the signature
    /// derived from `args`; later uses reuse the cached entry point unless
    /// the name was marked volatile. The returned word carries no
    /// interpretation — the caller knows whether it is a truth value, a
    /// handle, or a result code.
    pub fn invoke(&mut self, name: &str, args: &[Value]) -> DispatchResult<NativeValue> {
        let signature = Signature::infer(args)?;
        let entry = self.entry_for(name, &signature)?;
        let marshalled = marshal(args)?;
        Ok(call(entry, &signature, &marshalled))
    }

    fn entry_for(&mut self, name: &str, signature: &Signature) -> DispatchResult<EntryPoint> {
        if !self.volatile.contains(name) {
            if let Some(cached) = self.cache.get(name) {
                return Ok(cached.entry);
            }
        }

        let entry = self.resolver.resolve(&self.symbol_for(name), signature)?;
        self.cache.insert(
            name.to_string(),
            CachedEntry {
                entry,
                signature: signature.clone(),
            },
        );
        Ok(entry)
    }
}

fn marshal(args: &[Value]) -> Result<Vec<Marshalled>, CodecError> {
    args.iter()
        .map(|value| {
            Ok(match value {
                Value::Word(w) => Marshalled::Word(*w),
                Value::Text(s) => Marshalled::Bytes(codec::pack_text(s)?),
                Value::Raw(bytes) => Marshalled::Bytes(bytes.clone()),
                Value::Null => {
                    return Err(CodecError::AmbiguousArgumentType(value.type_name()));
                }
            })
        })
        .collect()
}

/// Perform the foreign call through a runtime-built call interface.
///
/// Pointer cells are materialized before any `Arg` borrows into them, and
/// both vectors outlive the call, so every argument libffi reads is
/// backed by live storage.
fn call(entry: EntryPoint, signature: &Signature, marshalled: &[Marshalled]) -> NativeValue {
    let mut cells: Vec<*mut c_void> = Vec::with_capacity(marshalled.len());
    for stored in marshalled {
        if let Marshalled::Bytes(bytes) = stored {
            cells.push(bytes.as_ptr() as *mut c_void);
        }
    }

    let mut types = Vec::with_capacity(marshalled.len());
    let mut ffi_args = Vec::with_capacity(marshalled.len());
    let mut next_cell = 0;
    for stored in marshalled {
        match stored {
            Marshalled::Word(word) => {
                types.push(Type::u32());
                ffi_args.push(Arg::new(word));
            }
            Marshalled::Bytes(_) => {
                types.push(Type::pointer());
                ffi_args.push(Arg::new(&cells[next_cell]));
                next_cell += 1;
            }
        }
    }
    debug_assert_eq!(types.len(), signature.arity());

    let cif = Cif::new(types, Type::u32());
    let code = CodePtr(entry.addr() as *mut c_void);
    let raw: u32 = unsafe { cif.call(code, &ffi_args) };
    NativeValue::from_raw(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::os::raw::c_char;
    use std::rc::Rc;

    extern "C" fn native_add(a: u32, b: u32) -> u32 {
        a.wrapping_add(b)
    }

    extern "C" fn native_strlen(s: *const c_char) -> u32 {
        let mut len = 0;
        unsafe {
            while *s.add(len as usize) != 0 {
                len += 1;
            }
        }
        len
    }

    extern "C" fn native_nullary() -> u32 {
        0x4A
    }

    /// Test double that counts resolutions and serves fixed entry points
    struct CountingResolver {
        resolutions: Rc<Cell<usize>>,
        missing: bool,
    }

    impl CountingResolver {
        fn new() -> (Self, Rc<Cell<usize>>) {
            let count = Rc::new(Cell::new(0));
            (
                CountingResolver {
                    resolutions: count.clone(),
                    missing: false,
                },
                count,
            )
        }
    }

    impl SymbolResolver for CountingResolver {
        fn resolve(&mut self, symbol: &str, _signature: &Signature) -> DispatchResult<EntryPoint> {
            self.resolutions.set(self.resolutions.get() + 1);
            if self.missing {
                return Err(DispatchError::NativeSymbolNotFound(symbol.to_string()));
            }
            let addr = match symbol {
                "Rail_Add" => native_add as *const (),
                "Rail_TextLen" => native_strlen as *const (),
                "Rail_Nullary" => native_nullary as *const (),
                _ => return Err(DispatchError::NativeSymbolNotFound(symbol.to_string())),
            };
            Ok(EntryPoint::new(addr))
        }
    }

    #[test]
    fn test_invoke_word_arguments() {
        let (resolver, _count) = CountingResolver::new();
        let mut dispatcher = CallDispatcher::new(resolver, "Rail");
        let result = dispatcher
            .invoke("Add", &[Value::Word(40), Value::Word(2)])
            .unwrap();
        assert_eq!(result.raw(), 42);
    }

    #[test]
    fn test_invoke_text_argument_by_reference() {
        let (resolver, _count) = CountingResolver::new();
        let mut dispatcher = CallDispatcher::new(resolver, "Rail");
        let result = dispatcher
            .invoke("TextLen", &[Value::text("hello")])
            .unwrap();
        assert_eq!(result.raw(), 5);
    }

    #[test]
    fn test_invoke_no_arguments() {
        let (resolver, _count) = CountingResolver::new();
        let mut dispatcher = CallDispatcher::new(resolver, "Rail");
        let result = dispatcher.invoke("Nullary", &[]).unwrap();
        assert_eq!(result.raw(), 0x4A);
    }

    #[test]
    fn test_entry_point_resolved_once() {
        let (resolver, count) = CountingResolver::new();
        let mut dispatcher = CallDispatcher::new(resolver, "Rail");

        dispatcher
            .invoke("Add", &[Value::Word(1), Value::Word(2)])
            .unwrap();
        assert_eq!(count.get(), 1);

        dispatcher
            .invoke("Add", &[Value::Word(3), Value::Word(4)])
            .unwrap();
        assert_eq!(count.get(), 1, "second call must reuse the cached entry");
    }

    #[test]
    fn test_volatile_binding_re_resolves() {
        let (resolver, count) = CountingResolver::new();
        let mut dispatcher = CallDispatcher::new(resolver, "Rail");
        dispatcher.mark_volatile("Add");

        dispatcher
            .invoke("Add", &[Value::Word(1), Value::Word(2)])
            .unwrap();
        dispatcher
            .invoke("Add", &[Value::Word(1), Value::Word(2)])
            .unwrap();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_missing_symbol_is_not_fatal_to_dispatcher() {
        let (mut resolver, _count) = CountingResolver::new();
        resolver.missing = true;
        let mut dispatcher = CallDispatcher::new(resolver, "Rail");

        let err = dispatcher.invoke("Add", &[Value::Word(1)]).unwrap_err();
        assert!(matches!(err, DispatchError::NativeSymbolNotFound(s) if s == "Rail_Add"));
    }

    #[test]
    fn test_failed_resolution_is_not_cached() {
        let (resolver, count) = CountingResolver::new();
        let mut dispatcher = CallDispatcher::new(resolver, "Rail");

        assert!(dispatcher.invoke("Unknown", &[]).is_err());
        assert!(dispatcher.invoke("Unknown", &[]).is_err());
        assert_eq!(count.get(), 2, "failed bindings must not be cached");
    }

    #[test]
    fn test_null_argument_is_ambiguous() {
        let (resolver, count) = CountingResolver::new();
        let mut dispatcher = CallDispatcher::new(resolver, "Rail");

        let err = dispatcher.invoke("Add", &[Value::Null]).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Codec(CodecError::AmbiguousArgumentType(_))
        ));
        assert_eq!(count.get(), 0, "classification precedes resolution");
    }

    #[test]
    fn test_signature_inference() {
        let sig =
            Signature::infer(&[Value::Word(1), Value::text("x"), Value::Raw(vec![0u8; 8])])
                .unwrap();
        assert_eq!(
            sig.args(),
            &[ArgPass::Word, ArgPass::Pointer, ArgPass::Pointer]
        );
    }

    #[test]
    fn test_symbol_naming_convention() {
        let (resolver, _count) = CountingResolver::new();
        let dispatcher = CallDispatcher::new(resolver, "Rail");
        assert_eq!(dispatcher.symbol_for("Initialize"), "Rail_Initialize");
    }
}
