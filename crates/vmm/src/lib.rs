#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Virtual Memory Manager (VMM)
//!
//! The Virtual Memory Manager (VMM) is the demand-paging core of the Nachos teaching kernel.
//! It provides:
//!
//! - Per-process address spaces loaded from NOFF executables.
//! - A shared physical frame allocator and address space identifier pool.
//! - Page replacement with FIFO or second chance (clock) victim selection.
//! - Write-back of evicted pages to the executable or a per-process swap file.
//! - Software emulation of the machine and filesystem for testing in host environments.
//!
//! The CPU simulator and the filesystem are reached through the [`Machine`], [`FileSystem`]
//! and [`OpenFile`] traits.

extern crate alloc;

mod address_space;
mod bitmap;
mod config;
mod error;
mod file;
mod frame_allocator;
mod loader;
mod machine;
mod memory_manager;
mod numbers;
mod page_table;
mod replacement;
mod space_id;
mod swap;
mod translate;

#[cfg(any(test, feature = "software-emulation"))]
mod emulation;


pub use address_space::{AddressSpace, PagingStats, SWAP_FILE_SUFFIX};
pub use bitmap::Bitmap;
pub use config::{
    ConfigError, DEFAULT_AVAILABLE_PAGES, DEFAULT_NUM_PHYS_PAGES, DEFAULT_USER_STACK_SIZE,
    MAX_SPACES, PAGE_SIZE, ReplacementPolicy, STACK_SAFETY_MARGIN, VmConfig,
};
pub use error::{AccessError, VmError};
pub use file::{FileSystem, OpenFile};
pub use frame_allocator::{AllocError, FrameAllocator};
pub use machine::{INSTRUCTION_SIZE, Machine, NUM_TOTAL_REGS, Register, TranslationContext};
pub use memory_manager::MemoryManager;
pub use numbers::{FrameNumber, PageNumber, SwapSlot};
pub use page_table::{PageTable, PageTableDump, SegmentKind, TranslationEntry};
pub use replacement::ResidentSet;
pub use space_id::{SpaceId, SpaceIdHandle, SpaceIdPool};
pub use swap::{SwapAllocator, SwapSpace};
pub use translate::{SegmentLayout, TranslateError};

#[cfg(any(test, feature = "software-emulation"))]
pub use emulation::{EmulatedMachine, MemFile, MemFileSystem};
