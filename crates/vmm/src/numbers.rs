//! Page, frame and swap-slot number types.
//!
//! This module provides newtypes for the three kinds of page-granular index used by the
//! paging code, so a virtual page number can never be passed where a physical frame number
//! is expected.

use crate::config::PAGE_SIZE;
use core::{
    fmt,
    ops::{Add, Sub},
};

/// Macro to define common page/frame number functionality.
///
/// This macro generates the basic structure and methods common to every page-granular
/// index type, reducing code duplication.
macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new page/frame number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw page/frame number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Returns the byte offset of the start of this page within its address space,
            /// memory or file.
            #[inline]
            pub const fn byte_offset(self) -> usize {
                self.0 * PAGE_SIZE
            }

            /// Returns the number of the page containing the given byte offset.
            #[inline]
            pub const fn containing(offset: usize) -> Self {
                Self(offset / PAGE_SIZE)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_page_number_common!(
    FrameNumber,
    "A physical memory frame number.\n\n\
     Frame `n` occupies bytes `n * PAGE_SIZE .. (n + 1) * PAGE_SIZE` of main memory."
);

impl_page_number_common!(
    PageNumber,
    "A virtual page number.\n\n\
     Indexes the page table of one address space."
);

impl_page_number_common!(
    SwapSlot,
    "A page-sized slot in an address space's swap file."
);
