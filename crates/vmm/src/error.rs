//! Errors reported by address space operations.

use alloc::string::String;
use core::fmt;

use noff::HeaderError;

use crate::{AllocError, ConfigError, TranslateError};

/// Errors that can occur while creating an address space or servicing a page fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// The executable does not exist.
    ExecutableNotFound(String),
    /// The executable's header could not be decoded.
    Header(HeaderError),
    /// The program needs more pages than the machine has frames.
    TooLarge { pages: usize, frames: usize },
    /// The segments, each rounded up to whole pages, need more pages than the address
    /// space has. Only possible with a stack of fewer than two pages.
    SegmentsOverflow { pages: usize, limit: usize },
    /// The swap file could not be created.
    SwapCreateFailed { name: String },
    /// A dirty page could not be written back in full. The page stays resident and dirty.
    ShortWrite {
        file: String,
        offset: usize,
        len: usize,
        written: usize,
    },
    Alloc(AllocError),
    Translate(TranslateError),
    Config(ConfigError),
}

impl VmError {
    /// Returns true if the process that caused the error cannot continue.
    ///
    /// A missing executable is reported back to the caller of `Exec`, and a bad address is
    /// the faulting program's problem; everything else means the process must be halted.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            VmError::ExecutableNotFound(_) | VmError::Translate(_)
        )
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::ExecutableNotFound(name) => write!(f, "unable to open file {}", name),
            VmError::Header(err) => write!(f, "bad executable: {}", err),
            VmError::TooLarge { pages, frames } => write!(
                f,
                "program needs {} pages but the machine has {} frames",
                pages, frames
            ),
            VmError::SegmentsOverflow { pages, limit } => write!(
                f,
                "segments need {} pages but the address space has {}",
                pages, limit
            ),
            VmError::SwapCreateFailed { name } => {
                write!(f, "unable to create swap file {}", name)
            }
            VmError::ShortWrite {
                file,
                offset,
                len,
                written,
            } => write!(
                f,
                "short write to {}: {} of {} bytes at {:#x}",
                file, written, len, offset
            ),
            VmError::Alloc(err) => write!(f, "{}", err),
            VmError::Translate(err) => write!(f, "{}", err),
            VmError::Config(err) => write!(f, "invalid configuration: {}", err),
        }
    }
}

impl core::error::Error for VmError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            VmError::Header(err) => Some(err),
            VmError::Alloc(err) => Some(err),
            VmError::Translate(err) => Some(err),
            VmError::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<HeaderError> for VmError {
    fn from(err: HeaderError) -> Self {
        VmError::Header(err)
    }
}

impl From<AllocError> for VmError {
    fn from(err: AllocError) -> Self {
        VmError::Alloc(err)
    }
}

impl From<TranslateError> for VmError {
    fn from(err: TranslateError) -> Self {
        VmError::Translate(err)
    }
}

impl From<ConfigError> for VmError {
    fn from(err: ConfigError) -> Self {
        VmError::Config(err)
    }
}

/// Errors from a user-mode memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    /// The page holding `addr` is not resident. Service the fault and retry.
    PageFault { addr: usize },
    /// `addr` is outside the address space.
    AddressError { addr: usize },
    /// The access starting at `addr` runs past the end of its page.
    CrossesPage { addr: usize, len: usize },
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessError::PageFault { addr } => write!(f, "page fault at {:#x}", addr),
            AccessError::AddressError { addr } => write!(f, "address error at {:#x}", addr),
            AccessError::CrossesPage { addr, len } => {
                write!(f, "{}-byte access at {:#x} crosses a page boundary", len, addr)
            }
        }
    }
}

impl core::error::Error for AccessError {}
