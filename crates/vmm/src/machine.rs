//! Interface to the simulated CPU: main memory, the register file and the active
//! translation context.

use core::fmt;

use crate::{FrameNumber, PAGE_SIZE, SpaceId};

macro_rules! machine_registers {
    (
        $(
            $name:ident = $value:expr,
        )*
    ) => {
        /// Index into the machine's register file.
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct Register(usize);

        impl Register {
            $(
                pub const $name: Self = Self($value);
            )*

            /// Creates a register index from a raw value.
            pub const fn new(index: usize) -> Self {
                Self(index)
            }

            /// Returns the raw index.
            pub const fn index(&self) -> usize {
                self.0
            }

            /// Returns the conventional name of the register, if it has one.
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $(
                        $value => Some(stringify!($name)),
                    )*
                    _ => None,
                }
            }
        }

        impl fmt::Debug for Register {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if let Some(name) = self.name() {
                    write!(f, "Register::{}({})", name, self.0)
                } else {
                    write!(f, "Register({})", self.0)
                }
            }
        }
    }
}

machine_registers! {
    STACK = 29,
    RET_ADDR = 31,
    HI = 32,
    LO = 33,
    PC = 34,
    NEXT_PC = 35,
    PREV_PC = 36,
    LOAD = 37,
    LOAD_VALUE = 38,
    BAD_VADDR = 39,
}

/// Number of registers in the register file.
pub const NUM_TOTAL_REGS: usize = 40;

/// Width of one instruction in bytes.
pub const INSTRUCTION_SIZE: u32 = 4;

/// What the machine needs to know to translate addresses for the running address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationContext {
    pub space: SpaceId,
    pub page_count: usize,
}

/// The parts of the simulated machine the paging code touches.
pub trait Machine {
    /// Returns main memory.
    fn main_memory(&self) -> &[u8];

    /// Returns main memory for writing.
    fn main_memory_mut(&mut self) -> &mut [u8];

    fn read_register(&self, register: Register) -> u32;

    fn write_register(&mut self, register: Register, value: u32);

    /// Makes `context` the active translation context.
    fn install_translation(&mut self, context: TranslationContext);

    /// Returns the bytes of one physical frame.
    ///
    /// # Panics
    /// Panics if the frame lies outside main memory.
    fn frame(&self, frame: FrameNumber) -> &[u8] {
        let start = frame.byte_offset();
        &self.main_memory()[start..start + PAGE_SIZE]
    }

    /// Returns the bytes of one physical frame for writing.
    ///
    /// # Panics
    /// Panics if the frame lies outside main memory.
    fn frame_mut(&mut self, frame: FrameNumber) -> &mut [u8] {
        let start = frame.byte_offset();
        &mut self.main_memory_mut()[start..start + PAGE_SIZE]
    }

    /// Returns the number of whole frames in main memory.
    fn num_frames(&self) -> usize {
        self.main_memory().len() / PAGE_SIZE
    }
}
