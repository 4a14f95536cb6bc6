//! User address spaces.
//!
//! An [`AddressSpace`] is created when a program is loaded and dropped when the process
//! exits. Only a fixed number of its pages are resident at a time. The frames for those
//! pages are claimed up front; when the program touches a page that is not resident, the
//! fault handler picks one of the resident pages as a victim, writes it back if it is
//! dirty, and reuses its frame for the faulting page.
//!
//! Pages are written back to where they came from: code and initialized data pages to the
//! executable, uninitialized data and stack pages to a swap file private to the address
//! space. A stack or uninitialized data page that has never been written back is
//! zero-filled when it is first brought in.

use alloc::{format, string::String, string::ToString, sync::Arc, vec::Vec};
use core::fmt;

use noff::{Endian, NoffHeader};

use crate::{
    AccessError, AllocError, FileSystem, FrameNumber, Machine, MemoryManager, OpenFile,
    PAGE_SIZE, PageNumber, Register, SpaceId, SpaceIdHandle, TranslateError,
    TranslationContext, VmError, loader,
    machine::{INSTRUCTION_SIZE, NUM_TOTAL_REGS},
    page_table::{PageTable, PageTableDump, TranslationEntry},
    replacement::ResidentSet,
    swap::SwapSpace,
    translate::SegmentLayout,
};

/// Suffix appended to a process name to form the name of its swap file.
pub const SWAP_FILE_SUFFIX: &str = ".va";

/// Paging activity of one address space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PagingStats {
    /// Faults that brought a page in. Spurious faults on resident pages are not counted.
    pub page_faults: usize,
    pub evictions: usize,
    /// Dirty code or initialized data pages written back to the executable.
    pub executable_writes: usize,
    /// Dirty uninitialized data or stack pages written to the swap file.
    pub swap_writes: usize,
    pub executable_reads: usize,
    pub swap_reads: usize,
    pub zero_fills: usize,
}

impl fmt::Display for PagingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "page faults:       {}", self.page_faults)?;
        writeln!(f, "evictions:         {}", self.evictions)?;
        writeln!(f, "executable writes: {}", self.executable_writes)?;
        writeln!(f, "swap writes:       {}", self.swap_writes)?;
        writeln!(f, "executable reads:  {}", self.executable_reads)?;
        writeln!(f, "swap reads:        {}", self.swap_reads)?;
        write!(f, "zero fills:        {}", self.zero_fills)
    }
}

/// The virtual memory of one user process.
pub struct AddressSpace<FS: FileSystem> {
    id: SpaceIdHandle,
    name: String,
    endian: Endian,
    layout: SegmentLayout,
    page_table: PageTable,
    resident: ResidentSet,
    executable: FS::File,
    swap: SwapSpace<FS::File>,
    filesystem: Arc<FS>,
    memory: Arc<MemoryManager>,
    stats: PagingStats,
}

impl<FS: FileSystem> AddressSpace<FS> {
    /// Opens the executable at `path` and loads it for the process `name`.
    ///
    /// A missing executable is reported as [`VmError::ExecutableNotFound`], which the caller
    /// may recover from. Every other error is fatal to the process.
    pub fn open<M>(
        memory: &Arc<MemoryManager>,
        filesystem: Arc<FS>,
        machine: &mut M,
        path: &str,
        name: &str,
    ) -> Result<Self, VmError>
    where
        M: Machine + ?Sized,
    {
        let Some(executable) = filesystem.open(path) else {
            log::warn!("unable to open file {}", path);
            return Err(VmError::ExecutableNotFound(path.to_string()));
        };
        Self::new(memory, filesystem, machine, executable, name)
    }

    /// Creates an address space for the process `name` running `executable`.
    ///
    /// The first pages of the program, up to the per-space residency limit, are given
    /// frames and loaded immediately. A swap file named `<name>.va` is created.
    ///
    /// # Panics
    /// Panics if `machine` has less main memory than the manager's configuration describes.
    pub fn new<M>(
        memory: &Arc<MemoryManager>,
        filesystem: Arc<FS>,
        machine: &mut M,
        mut executable: FS::File,
        name: &str,
    ) -> Result<Self, VmError>
    where
        M: Machine + ?Sized,
    {
        let config = *memory.config();
        assert!(
            machine.num_frames() >= config.num_phys_pages,
            "machine has {} frames but {} are configured",
            machine.num_frames(),
            config.num_phys_pages
        );

        let (header, endian) = loader::read_header(&mut executable)?;
        if endian == Endian::Big {
            log::debug!("{}: big-endian executable, header byte-swapped", name);
        }

        let layout = SegmentLayout::new(&header, config.user_stack_size);
        let page_count = layout.page_count();
        if page_count > config.num_phys_pages {
            log::error!(
                "{}: program needs {} pages, machine has {} frames",
                name,
                page_count,
                config.num_phys_pages
            );
            return Err(VmError::TooLarge {
                pages: page_count,
                frames: config.num_phys_pages,
            });
        }
        if layout.segment_pages() > page_count {
            return Err(VmError::SegmentsOverflow {
                pages: layout.segment_pages(),
                limit: page_count,
            });
        }
        if layout.stack_overlap() > 0 {
            log::warn!(
                "{}: segments are not page aligned, {} stack pages hold segment contents",
                name,
                layout.stack_overlap()
            );
        }

        let id = SpaceIdHandle::claim(memory)?;
        let frames = claim_frames(memory, config.available_pages.min(page_count))?;

        let swap_name = format!("{}{}", name, SWAP_FILE_SUFFIX);
        let swap = match SwapSpace::create(&*filesystem, swap_name, page_count) {
            Ok(swap) => swap,
            Err(err) => {
                release_frames(memory, &frames);
                return Err(err);
            }
        };

        let mut page_table = PageTable::for_layout(&layout);
        for (index, &frame) in frames.iter().enumerate() {
            let entry = &mut page_table[PageNumber::new(index)];
            entry.physical_frame = Some(frame);
            entry.referenced = true;
        }
        let resident = ResidentSet::new((0..frames.len()).map(PageNumber::new).collect());

        loader::load_initial_pages(&mut executable, &layout, &mut page_table, machine);

        log::info!(
            "{}: loaded as space {}, {} pages ({} resident)",
            name,
            id.id(),
            page_count,
            frames.len()
        );
        log::debug!("{}: initial page table\n{}", name, page_table.dump());

        Ok(Self {
            id,
            name: name.to_string(),
            endian,
            layout,
            page_table,
            resident,
            executable,
            swap,
            filesystem,
            memory: Arc::clone(memory),
            stats: PagingStats::default(),
        })
    }

    pub fn id(&self) -> SpaceId {
        self.id.id()
    }

    /// Name of the owning process.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &NoffHeader {
        self.layout.header()
    }

    /// Byte order the executable's header was written in.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn layout(&self) -> &SegmentLayout {
        &self.layout
    }

    pub fn page_count(&self) -> usize {
        self.layout.page_count()
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn entry(&self, page: PageNumber) -> Option<&TranslationEntry> {
        self.page_table.get(page)
    }

    /// Iterates over the resident pages in eviction order, starting at the cursor slot.
    pub fn resident_pages(&self) -> impl Iterator<Item = PageNumber> + '_ {
        let cursor = self.resident.cursor();
        let capacity = self.resident.capacity();
        (0..capacity).map(move |step| self.resident.page_at((cursor + step) % capacity))
    }

    /// Name of the swap file.
    pub fn swap_name(&self) -> &str {
        self.swap.name()
    }

    pub fn stats(&self) -> &PagingStats {
        &self.stats
    }

    /// Returns a displayable dump of the page table.
    pub fn dump(&self) -> PageTableDump<'_> {
        self.page_table.dump()
    }

    /// Translates a virtual address to its page and in-page offset.
    pub fn translate(&self, addr: usize) -> Result<(PageNumber, usize), TranslateError> {
        self.layout.translate(addr)
    }

    /// Sets the initial user register state: everything zero except the program counters,
    /// which start at address 0, and the stack pointer, just below the top of the address
    /// space.
    pub fn init_registers<M: Machine + ?Sized>(&self, machine: &mut M) {
        for index in 0..NUM_TOTAL_REGS {
            machine.write_register(Register::new(index), 0);
        }
        machine.write_register(Register::PC, 0);
        machine.write_register(Register::NEXT_PC, INSTRUCTION_SIZE);

        let stack_top = self.layout.stack_top() as u32;
        machine.write_register(Register::STACK, stack_top);
        log::debug!("{}: initializing stack register to {:#x}", self.name, stack_top);
    }

    /// Saves machine state specific to this address space on a context switch. There is
    /// none.
    pub fn save_state<M: Machine + ?Sized>(&self, _machine: &mut M) {}

    /// Installs this address space's translation context in the machine.
    pub fn restore_state<M: Machine + ?Sized>(&self, machine: &mut M) {
        machine.install_translation(TranslationContext {
            space: self.id(),
            page_count: self.page_count(),
        });
    }

    /// Makes the page containing `addr` resident, evicting another page to free its frame.
    ///
    /// Returns the page that was brought in. A fault on a page that is already resident
    /// changes nothing.
    pub fn handle_page_fault<M>(
        &mut self,
        machine: &mut M,
        addr: usize,
    ) -> Result<PageNumber, VmError>
    where
        M: Machine + ?Sized,
    {
        let (page, _) = self.layout.translate(addr)?;
        if self.page_table[page].is_resident() {
            log::trace!(
                "{}: spurious fault at {:#x}, page {} resident",
                self.name,
                addr,
                page
            );
            return Ok(page);
        }

        let policy = self.memory.config().policy;
        let slot = self.resident.select_victim(policy, &mut self.page_table);
        let victim = self.resident.page_at(slot);
        log::debug!(
            "{}: page fault at {:#x} (page {}), evicting page {} from slot {} ({})",
            self.name,
            addr,
            page,
            victim,
            slot,
            policy
        );

        self.swap_page(machine, victim, page)?;
        self.resident.replace(slot, page);
        self.stats.page_faults += 1;

        #[cfg(feature = "detailed-logging")]
        log::debug!("{}: page table after swap\n{}", self.name, self.dump());

        Ok(page)
    }

    /// Moves the frame of the resident page `old` to the non-resident page `new`.
    fn swap_page<M>(
        &mut self,
        machine: &mut M,
        old: PageNumber,
        new: PageNumber,
    ) -> Result<(), VmError>
    where
        M: Machine + ?Sized,
    {
        let frame = self.resident_frame(old);
        self.write_back(machine, old, frame)?;

        let old_entry = &mut self.page_table[old];
        old_entry.physical_frame = None;
        old_entry.referenced = false;

        let new_entry = &mut self.page_table[new];
        new_entry.physical_frame = Some(frame);
        new_entry.referenced = true;
        new_entry.dirty = false;

        self.read_in(machine, new, frame);
        self.stats.evictions += 1;
        Ok(())
    }

    /// Writes `page` to its backing store if it is dirty.
    ///
    /// A write the backing file does not take in full fails with [`VmError::ShortWrite`]
    /// and leaves the page dirty.
    fn write_back<M>(
        &mut self,
        machine: &M,
        page: PageNumber,
        frame: FrameNumber,
    ) -> Result<(), VmError>
    where
        M: Machine + ?Sized,
    {
        let entry = self.page_table[page];
        if !entry.dirty {
            return Ok(());
        }

        let contents = machine.frame(frame);
        if entry.kind.is_file_backed() {
            let extent = self.layout.file_extent(page);
            debug_assert!(extent.is_some(), "{} page {} has no file extent", entry.kind, page);
            let Some((offset, len)) = extent else {
                log::error!(
                    "{}: {} page {} has no file extent, dropping its contents",
                    self.name,
                    entry.kind,
                    page
                );
                return Ok(());
            };

            let written = self.executable.write_at(&contents[..len], offset);
            if written < len {
                log::error!(
                    "{}: short write of page {} to executable: {} of {} bytes at {:#x}",
                    self.name,
                    page,
                    written,
                    len,
                    offset
                );
                return Err(VmError::ShortWrite {
                    file: format!("executable of {}", self.name),
                    offset,
                    len,
                    written,
                });
            }
            self.stats.executable_writes += 1;
            log::trace!(
                "{}: wrote page {} to executable at {:#x}",
                self.name,
                page,
                offset
            );
        } else {
            let offset = self.swap.store(contents)?;
            self.page_table[page].backing_offset = Some(offset);
            self.stats.swap_writes += 1;
            log::trace!("{}: wrote page {} to swap at {:#x}", self.name, page, offset);
        }

        self.page_table[page].dirty = false;
        Ok(())
    }

    /// Fills `frame` with the contents of `page`.
    fn read_in<M>(&mut self, machine: &mut M, page: PageNumber, frame: FrameNumber)
    where
        M: Machine + ?Sized,
    {
        let memory = machine.frame_mut(frame);
        let entry = &mut self.page_table[page];
        match entry.backing_offset {
            Some(offset) if entry.kind.is_file_backed() => {
                loader::read_page(&mut self.executable, memory, offset);
                self.stats.executable_reads += 1;
            }
            Some(offset) => {
                // The slot is released, so the frame now holds the only copy. Marking it
                // dirty makes the next eviction write it out again.
                self.swap.load_and_release(memory, offset);
                entry.backing_offset = None;
                entry.dirty = true;
                self.stats.swap_reads += 1;
            }
            None => {
                memory.fill(0);
                self.stats.zero_fills += 1;
            }
        }
    }

    fn resident_frame(&self, page: PageNumber) -> FrameNumber {
        match self.page_table[page].physical_frame {
            Some(frame) => frame,
            None => panic!("page {} is in the resident set without a frame", page),
        }
    }

    /// Resolves a user access of `len` bytes at `addr` to a resident frame and offset,
    /// marking the page referenced (and dirty for writes).
    fn access(
        &mut self,
        addr: usize,
        len: usize,
        write: bool,
    ) -> Result<(FrameNumber, usize), AccessError> {
        let (page, offset) = self
            .layout
            .translate(addr)
            .map_err(|_| AccessError::AddressError { addr })?;
        if offset + len > PAGE_SIZE {
            return Err(AccessError::CrossesPage { addr, len });
        }

        let entry = &mut self.page_table[page];
        let Some(frame) = entry.physical_frame else {
            return Err(AccessError::PageFault { addr });
        };
        entry.referenced = true;
        if write {
            entry.dirty = true;
        }
        Ok((frame, offset))
    }

    /// Reads user memory at `addr` into `buf`.
    ///
    /// Fails with [`AccessError::PageFault`] if the page is not resident; the caller should
    /// run [`AddressSpace::handle_page_fault`] and retry.
    pub fn read_mem<M>(
        &mut self,
        machine: &M,
        addr: usize,
        buf: &mut [u8],
    ) -> Result<(), AccessError>
    where
        M: Machine + ?Sized,
    {
        let (frame, offset) = self.access(addr, buf.len(), false)?;
        buf.copy_from_slice(&machine.frame(frame)[offset..offset + buf.len()]);
        Ok(())
    }

    /// Writes `bytes` to user memory at `addr`.
    pub fn write_mem<M>(
        &mut self,
        machine: &mut M,
        addr: usize,
        bytes: &[u8],
    ) -> Result<(), AccessError>
    where
        M: Machine + ?Sized,
    {
        let (frame, offset) = self.access(addr, bytes.len(), true)?;
        machine.frame_mut(frame)[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_word<M>(&mut self, machine: &M, addr: usize) -> Result<u32, AccessError>
    where
        M: Machine + ?Sized,
    {
        let mut bytes = [0u8; 4];
        self.read_mem(machine, addr, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write_word<M>(
        &mut self,
        machine: &mut M,
        addr: usize,
        value: u32,
    ) -> Result<(), AccessError>
    where
        M: Machine + ?Sized,
    {
        self.write_mem(machine, addr, &value.to_le_bytes())
    }
}

impl<FS: FileSystem> Drop for AddressSpace<FS> {
    fn drop(&mut self) {
        {
            let mut frames = self.memory.frames().lock();
            for (_, frame) in self.page_table.resident() {
                frames.clear(frame);
            }
        }

        if !self.filesystem.remove(self.swap.name()) {
            log::warn!("{}: swap file {} already removed", self.name, self.swap.name());
        }
        log::debug!("{}: address space {} destroyed", self.name, self.id());
    }
}

/// Claims `count` frames, or none at all.
fn claim_frames(memory: &MemoryManager, count: usize) -> Result<Vec<FrameNumber>, AllocError> {
    let mut allocator = memory.frames().lock();
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        match allocator.find() {
            Ok(frame) => frames.push(frame),
            Err(err) => {
                for frame in frames {
                    allocator.clear(frame);
                }
                return Err(err);
            }
        }
    }
    Ok(frames)
}

fn release_frames(memory: &MemoryManager, frames: &[FrameNumber]) {
    let mut allocator = memory.frames().lock();
    for &frame in frames {
        allocator.clear(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        VmConfig,
        emulation::{EmulatedMachine, MemFileSystem},
    };
    use noff::NoffBuilder;

    fn setup(config: VmConfig) -> (Arc<MemoryManager>, Arc<MemFileSystem>, EmulatedMachine) {
        let machine = EmulatedMachine::new(config.num_phys_pages);
        let memory = Arc::new(MemoryManager::new(config).unwrap());
        (memory, Arc::new(MemFileSystem::new()), machine)
    }

    fn small_config() -> VmConfig {
        VmConfig::default()
            .with_phys_pages(8)
            .with_available_pages(2)
            .with_stack_size(PAGE_SIZE)
    }

    #[test]
    fn registers_start_at_zero_with_stack_at_top() {
        let (memory, fs, mut machine) = setup(small_config());
        fs.insert("prog", &NoffBuilder::new(128).code(&[0; 128]).build());
        let space = AddressSpace::open(&memory, fs, &mut machine, "prog", "p").unwrap();

        machine.write_register(Register::new(5), 99);
        space.init_registers(&mut machine);

        assert_eq!(machine.read_register(Register::new(5)), 0);
        assert_eq!(machine.read_register(Register::PC), 0);
        assert_eq!(machine.read_register(Register::NEXT_PC), 4);
        assert_eq!(
            machine.read_register(Register::STACK) as usize,
            space.page_count() * PAGE_SIZE - 16
        );
    }

    #[test]
    fn restore_state_installs_translation() {
        let (memory, fs, mut machine) = setup(small_config());
        fs.insert("prog", &NoffBuilder::new(128).code(&[0; 128]).build());
        let space = AddressSpace::open(&memory, fs, &mut machine, "prog", "p").unwrap();

        space.save_state(&mut machine);
        assert_eq!(machine.translation(), None);
        space.restore_state(&mut machine);
        assert_eq!(
            machine.translation(),
            Some(TranslationContext {
                space: space.id(),
                page_count: 2
            })
        );
    }

    #[test]
    fn creates_and_removes_swap_file() {
        let (memory, fs, mut machine) = setup(small_config());
        fs.insert("prog", &NoffBuilder::new(128).code(&[0; 128]).build());
        let space =
            AddressSpace::open(&memory, Arc::clone(&fs), &mut machine, "prog", "sort").unwrap();

        assert_eq!(space.swap_name(), "sort.va");
        assert_eq!(fs.contents("sort.va").unwrap().len(), 2 * PAGE_SIZE);

        drop(space);
        assert!(!fs.exists("sort.va"));
        assert!(fs.exists("prog"));
    }

    #[test]
    fn access_marks_use_and_dirty_bits() {
        let (memory, fs, mut machine) = setup(small_config());
        fs.insert("prog", &NoffBuilder::new(128).code(&[3; 128]).build());
        let mut space = AddressSpace::open(&memory, fs, &mut machine, "prog", "p").unwrap();

        space.page_table[PageNumber::new(0)].referenced = false;
        assert_eq!(space.read_word(&machine, 0), Ok(0x0303_0303));
        let entry = space.entry(PageNumber::new(0)).unwrap();
        assert!(entry.referenced);
        assert!(!entry.dirty);

        space.write_word(&mut machine, 8, 0xDEAD_BEEF).unwrap();
        assert!(space.entry(PageNumber::new(0)).unwrap().dirty);
        assert_eq!(space.read_word(&machine, 8), Ok(0xDEAD_BEEF));
    }

    #[test]
    fn rejects_bad_accesses() {
        let (memory, fs, mut machine) = setup(small_config());
        fs.insert("prog", &NoffBuilder::new(128).code(&[0; 128]).build());
        let mut space = AddressSpace::open(&memory, fs, &mut machine, "prog", "p").unwrap();

        assert_eq!(
            space.read_word(&machine, 126),
            Err(AccessError::CrossesPage { addr: 126, len: 4 })
        );
        assert_eq!(
            space.read_word(&machine, 2 * PAGE_SIZE),
            Err(AccessError::AddressError {
                addr: 2 * PAGE_SIZE
            })
        );
    }

    #[test]
    fn spurious_fault_changes_nothing() {
        let (memory, fs, mut machine) = setup(small_config());
        fs.insert("prog", &NoffBuilder::new(128).code(&[0; 128]).build());
        let mut space = AddressSpace::open(&memory, fs, &mut machine, "prog", "p").unwrap();

        let before = space.page_table().clone();
        assert_eq!(
            space.handle_page_fault(&mut machine, 4),
            Ok(PageNumber::new(0))
        );
        assert_eq!(space.page_table(), &before);
        assert_eq!(space.stats().page_faults, 0);
    }

    #[test]
    fn fault_outside_address_space_is_not_fatal() {
        let (memory, fs, mut machine) = setup(small_config());
        fs.insert("prog", &NoffBuilder::new(128).code(&[0; 128]).build());
        let mut space = AddressSpace::open(&memory, fs, &mut machine, "prog", "p").unwrap();

        let err = space.handle_page_fault(&mut machine, 10 * PAGE_SIZE).unwrap_err();
        assert!(matches!(err, VmError::Translate(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn stats_display() {
        let stats = PagingStats {
            page_faults: 3,
            ..PagingStats::default()
        };
        let text = stats.to_string();
        assert!(text.starts_with("page faults:       3"));
        assert_eq!(text.lines().count(), 7);
    }
}
