//! Runtime-assembled native callback
//!
//! The SDK delivers events through a registered native function pointer,
//! which the host runtime cannot express — so the bridge fabricates one.
//! [`assemble`] produces a fixed 45-byte IA-32 routine, parameterized
//! only by two literal addresses patched into the template: where the
//! event-id table starts and where the parallel value table starts.
//!
//! The generated routine's contract, which event registration relies on:
//!
//! - stdcall shape: two 4-byte stack arguments (event id, payload word),
//!   `ret 8` consumes them
//! - scans the id table from the first patched address, one word at a
//!   time, until the zero sentinel
//! - on the matching id, stores the payload through the parallel slot of
//!   the second patched address; no match stores nothing
//! - always returns to its caller
//!
//! ```text
//! push esi               ; 56
//! push edi               ; 57
//! mov  esi, ids          ; BE <imm32>      patched
//! mov  edi, values       ; BF <imm32>      patched
//! mov  eax, [esp+12]     ; 8B 44 24 0C     event id argument
//! mov  ecx, [esp+16]     ; 8B 4C 24 10     payload argument
//! scan:
//! mov  edx, [esi]        ; 8B 16
//! test edx, edx          ; 85 D2
//! jz   done              ; 74 0E           sentinel reached
//! cmp  edx, eax          ; 39 C2
//! jne  next              ; 75 02
//! mov  [edi], ecx        ; 89 0F           store into the value slot
//! next:
//! add  esi, 4            ; 83 C6 04
//! add  edi, 4            ; 83 C7 04
//! jmp  scan              ; EB EC
//! done:
//! pop  edi               ; 5F
//! pop  esi               ; 5E
//! ret  8                 ; C2 08 00
//! ```
//!
//! This is the one privileged routine in the crate: the bytes land in a
//! page mapped writable and executable, which must stay put (never
//! relocated, never reclaimed) for as long as the callback is registered
//! with native code. Everything outside this module deals in safe
//! wrappers. The design targets a single ABI family — a 32-bit process
//! with stack-based calls; the two table addresses are 32-bit literal
//! operands, and on a wider host only their low words are encodable.

use crate::events::EventTable;
use thiserror::Error;

/// Trampoline errors
#[derive(Error, Debug)]
pub enum TrampolineError {
    #[error("no events configured: the id table is empty")]
    NoEventsConfigured,

    #[error("slot address is null")]
    NullSlotAddress,

    #[error("failed to allocate executable memory: {0}")]
    AllocFailed(String),
}

/// Byte length of the assembled routine
pub const TEMPLATE_LEN: usize = 45;

/// Offset of the id-table literal inside the template
const IDS_PATCH_OFFSET: usize = 3;
/// Offset of the value-table literal inside the template
const VALUES_PATCH_OFFSET: usize = 8;

const TEMPLATE: [u8; TEMPLATE_LEN] = [
    0x56, // push esi
    0x57, // push edi
    0xBE, 0, 0, 0, 0, // mov esi, ids
    0xBF, 0, 0, 0, 0, // mov edi, values
    0x8B, 0x44, 0x24, 0x0C, // mov eax, [esp+12]
    0x8B, 0x4C, 0x24, 0x10, // mov ecx, [esp+16]
    0x8B, 0x16, // scan: mov edx, [esi]
    0x85, 0xD2, // test edx, edx
    0x74, 0x0E, // jz done
    0x39, 0xC2, // cmp edx, eax
    0x75, 0x02, // jne next
    0x89, 0x0F, // mov [edi], ecx
    0x83, 0xC6, 0x04, // next: add esi, 4
    0x83, 0xC7, 0x04, // add edi, 4
    0xEB, 0xEC, // jmp scan
    0x5F, // done: pop edi
    0x5E, // pop esi
    0xC2, 0x08, 0x00, // ret 8
];

/// Assemble the routine with the two table addresses patched in.
///
/// Pure byte construction; placing the result in executable memory is
/// [`Trampoline::build`]'s job.
pub fn assemble(ids_addr: u32, values_addr: u32) -> [u8; TEMPLATE_LEN] {
    let mut code = TEMPLATE;
    code[IDS_PATCH_OFFSET..IDS_PATCH_OFFSET + 4].copy_from_slice(&ids_addr.to_le_bytes());
    code[VALUES_PATCH_OFFSET..VALUES_PATCH_OFFSET + 4]
        .copy_from_slice(&values_addr.to_le_bytes());
    code
}

/// A page-backed executable copy of generated code.
///
/// The mapping is created once and freed only on drop, so the entry
/// address is stable for the owner's lifetime.
struct ExecutableMemory {
    ptr: *mut u8,
    len: usize,
}

impl ExecutableMemory {
    fn from_code(code: &[u8]) -> Result<Self, TrampolineError> {
        let len = code.len();
        let ptr = alloc_executable(len)?;
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, len);
        }
        Ok(ExecutableMemory { ptr, len })
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        free_executable(self.ptr, self.len);
    }
}

/// The registered-callback body, pinned in executable memory.
pub struct Trampoline {
    memory: ExecutableMemory,
}

impl Trampoline {
    /// Assemble and pin the callback routine for `table`.
    ///
    /// The table addresses are validated before patching: an empty table
    /// has nothing to scan, and a null address would bake a wild store
    /// into code handed to native code.
    pub fn build(table: &EventTable) -> Result<Self, TrampolineError> {
        if table.is_empty() {
            return Err(TrampolineError::NoEventsConfigured);
        }
        let ids_addr = table.ids_addr();
        let values_addr = table.values_addr();
        if ids_addr == 0 || values_addr == 0 {
            return Err(TrampolineError::NullSlotAddress);
        }

        let code = assemble(ids_addr as u32, values_addr as u32);
        let memory = ExecutableMemory::from_code(&code)?;
        Ok(Trampoline { memory })
    }

    /// The bare entry address, handed to native code as the callback
    /// identity. Deliberately not an emulated address: nothing on this
    /// side ever dereferences it.
    pub fn entry(&self) -> *const () {
        self.memory.ptr as *const ()
    }

    /// The entry address as the 32-bit word the registration call passes
    pub fn entry_word(&self) -> u32 {
        self.memory.ptr as usize as u32
    }

    /// The assembled bytes, as placed in the executable mapping
    pub fn code(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.memory.ptr, self.memory.len) }
    }
}

#[cfg(unix)]
fn alloc_executable(len: usize) -> Result<*mut u8, TrampolineError> {
    #[cfg(target_os = "macos")]
    const FLAGS: libc::c_int = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_JIT;
    #[cfg(not(target_os = "macos"))]
    const FLAGS: libc::c_int = libc::MAP_ANON | libc::MAP_PRIVATE;

    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            FLAGS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(TrampolineError::AllocFailed(format!(
            "mmap failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(ptr as *mut u8)
}

#[cfg(unix)]
fn free_executable(ptr: *mut u8, len: usize) {
    if !ptr.is_null() {
        unsafe {
            libc::munmap(ptr as *mut libc::c_void, len);
        }
    }
}

#[cfg(windows)]
fn alloc_executable(len: usize) -> Result<*mut u8, TrampolineError> {
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
    };

    let ptr = unsafe {
        VirtualAlloc(
            std::ptr::null_mut(),
            len,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_EXECUTE_READWRITE,
        ) as *mut u8
    };
    if ptr.is_null() {
        return Err(TrampolineError::AllocFailed(format!(
            "VirtualAlloc failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(ptr)
}

#[cfg(windows)]
fn free_executable(ptr: *mut u8, _len: usize) {
    use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};

    if !ptr.is_null() {
        unsafe {
            VirtualFree(ptr as *mut _, 0, MEM_RELEASE);
        }
    }
}
