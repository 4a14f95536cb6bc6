//! Machine geometry and paging configuration.

use core::fmt;

/// Size of a page (and of a physical frame) in bytes.
pub const PAGE_SIZE: usize = 128;

/// Number of address spaces that may exist at the same time.
pub const MAX_SPACES: usize = 128;

/// Bytes kept free at the top of the stack when the stack register is initialized.
pub const STACK_SAFETY_MARGIN: usize = 16;

pub const DEFAULT_NUM_PHYS_PAGES: usize = 32;
pub const DEFAULT_AVAILABLE_PAGES: usize = 4;
pub const DEFAULT_USER_STACK_SIZE: usize = 1024;

/// Algorithm used to pick the resident page evicted on a page fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementPolicy {
    /// Evict pages in the order they became resident.
    Fifo,
    /// Clock algorithm: referenced pages get their use bit cleared and are skipped once.
    SecondChance,
}

impl Default for ReplacementPolicy {
    fn default() -> Self {
        #[cfg(feature = "second-chance")]
        return ReplacementPolicy::SecondChance;
        #[cfg(not(feature = "second-chance"))]
        return ReplacementPolicy::Fifo;
    }
}

impl fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacementPolicy::Fifo => write!(f, "fifo"),
            ReplacementPolicy::SecondChance => write!(f, "second-chance"),
        }
    }
}

/// Errors reported by [`VmConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The machine has no physical memory.
    ZeroPhysicalPages,
    /// Address spaces would not be allowed any resident pages.
    ZeroAvailablePages,
    /// The user stack must be a whole number of pages.
    StackNotPageAligned { size: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroPhysicalPages => write!(f, "machine has no physical pages"),
            ConfigError::ZeroAvailablePages => write!(f, "available pages must be at least 1"),
            ConfigError::StackNotPageAligned { size } => write!(
                f,
                "user stack size {} is not a multiple of the page size ({})",
                size, PAGE_SIZE
            ),
        }
    }
}

impl core::error::Error for ConfigError {}

/// Paging parameters shared by every address space created against one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Number of physical frames in main memory.
    pub num_phys_pages: usize,
    /// Maximum number of resident pages per address space.
    pub available_pages: usize,
    /// Size of the user stack region in bytes.
    pub user_stack_size: usize,
    /// Page replacement algorithm.
    pub policy: ReplacementPolicy,
}

impl VmConfig {
    pub fn new() -> Self {
        Self {
            num_phys_pages: DEFAULT_NUM_PHYS_PAGES,
            available_pages: DEFAULT_AVAILABLE_PAGES,
            user_stack_size: DEFAULT_USER_STACK_SIZE,
            policy: ReplacementPolicy::default(),
        }
    }

    pub fn with_phys_pages(mut self, pages: usize) -> Self {
        self.num_phys_pages = pages;
        self
    }

    pub fn with_available_pages(mut self, pages: usize) -> Self {
        self.available_pages = pages;
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.user_stack_size = bytes;
        self
    }

    pub fn with_policy(mut self, policy: ReplacementPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of pages occupied by the user stack.
    pub const fn stack_pages(&self) -> usize {
        self.user_stack_size / PAGE_SIZE
    }

    /// Size of main memory in bytes.
    pub const fn memory_size(&self) -> usize {
        self.num_phys_pages * PAGE_SIZE
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_phys_pages == 0 {
            return Err(ConfigError::ZeroPhysicalPages);
        }
        if self.available_pages == 0 {
            return Err(ConfigError::ZeroAvailablePages);
        }
        if self.user_stack_size % PAGE_SIZE != 0 {
            return Err(ConfigError::StackNotPageAligned {
                size: self.user_stack_size,
            });
        }
        Ok(())
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new()
    }
}
