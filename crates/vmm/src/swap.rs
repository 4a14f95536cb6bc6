//! Per-address-space swap storage.
//!
//! Pages with no backing copy in the executable (uninitialized data and stack) are written
//! to a private swap file when evicted dirty. The file is divided into page-sized slots; a
//! slot is claimed on write-back and released as soon as the page is read back in.

use alloc::string::String;

use crate::{AllocError, FileSystem, OpenFile, PAGE_SIZE, SwapSlot, VmError, bitmap::Bitmap};

/// Tracks which slots of a swap file hold a page.
pub struct SwapAllocator {
    slots: Bitmap,
}

impl SwapAllocator {
    pub fn new(num_slots: usize) -> Self {
        Self {
            slots: Bitmap::new(num_slots),
        }
    }

    /// Claims the lowest free slot.
    pub fn find(&mut self) -> Result<SwapSlot, AllocError> {
        self.slots
            .find()
            .map(SwapSlot::new)
            .ok_or(AllocError::OutOfSwapSlots)
    }

    /// Releases a slot.
    ///
    /// # Panics
    /// Panics if the slot was not claimed.
    pub fn clear(&mut self, slot: SwapSlot) {
        self.slots.clear(slot.as_usize());
    }

    pub fn is_claimed(&self, slot: SwapSlot) -> bool {
        self.slots.test(slot.as_usize())
    }

    pub fn num_slots(&self) -> usize {
        self.slots.capacity()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.num_clear()
    }
}

/// A swap file together with its slot allocator.
pub struct SwapSpace<F> {
    name: String,
    file: F,
    slots: SwapAllocator,
}

impl<F: OpenFile> SwapSpace<F> {
    /// Creates (or truncates) the swap file `name` with room for `num_slots` pages.
    pub fn create<FS>(filesystem: &FS, name: String, num_slots: usize) -> Result<Self, VmError>
    where
        FS: FileSystem<File = F>,
    {
        let size = num_slots * PAGE_SIZE;
        if !filesystem.create(&name, size) {
            return Err(VmError::SwapCreateFailed { name });
        }
        let Some(file) = filesystem.open(&name) else {
            return Err(VmError::SwapCreateFailed { name });
        };

        log::debug!("created swap file {} ({} slots)", name, num_slots);
        Ok(Self {
            name,
            file,
            slots: SwapAllocator::new(num_slots),
        })
    }

    /// Name of the swap file.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slots(&self) -> &SwapAllocator {
        &self.slots
    }

    /// Writes a page to a newly claimed slot and returns the slot's byte offset.
    ///
    /// If the file takes fewer bytes than the page holds, the slot is released again and
    /// [`VmError::ShortWrite`] is returned.
    pub fn store(&mut self, page: &[u8]) -> Result<usize, VmError> {
        let slot = self.slots.find()?;
        let offset = slot.byte_offset();
        let written = self.file.write_at(page, offset);
        if written < page.len() {
            self.slots.clear(slot);
            log::error!(
                "short write to swap file {}: {} of {} bytes at {:#x}",
                self.name,
                written,
                page.len(),
                offset
            );
            return Err(VmError::ShortWrite {
                file: self.name.clone(),
                offset,
                len: page.len(),
                written,
            });
        }
        log::trace!("swap {}: stored page in slot {}", self.name, slot);
        Ok(offset)
    }

    /// Reads the page stored at `offset` into `page` and releases its slot.
    ///
    /// # Panics
    /// Panics if no page is stored at `offset`.
    pub fn load_and_release(&mut self, page: &mut [u8], offset: usize) {
        let read = self.file.read_at(page, offset);
        page[read..].fill(0);

        let slot = SwapSlot::containing(offset);
        self.slots.clear(slot);
        log::trace!("swap {}: loaded and released slot {}", self.name, slot);
    }
}
