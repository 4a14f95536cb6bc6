//! Linear page tables.

use alloc::vec::Vec;
use core::{
    fmt,
    ops::{Index, IndexMut},
};

use crate::{FrameNumber, PageNumber, translate::SegmentLayout};

/// The region of the address space a page belongs to. Decides where the page's contents
/// come from and where they are written back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Code,
    InitData,
    UninitData,
    Stack,
}

impl SegmentKind {
    /// Returns true if pages of this kind are backed by the executable rather than swap.
    pub const fn is_file_backed(self) -> bool {
        matches!(self, SegmentKind::Code | SegmentKind::InitData)
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentKind::Code => "code",
            SegmentKind::InitData => "init",
            SegmentKind::UninitData => "uninit",
            SegmentKind::Stack => "stack",
        };
        f.pad(name)
    }
}

/// Translation state of one virtual page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    pub virtual_page: PageNumber,
    /// The frame holding the page. `None` while the page is not resident.
    pub physical_frame: Option<FrameNumber>,
    /// The page was written since it was last loaded or written back.
    pub dirty: bool,
    /// Use bit, consulted by the clock algorithm.
    pub referenced: bool,
    /// Recorded but not enforced.
    pub read_only: bool,
    pub kind: SegmentKind,
    /// Byte offset of the page's backing copy: in the executable for code and initialized
    /// data, in the swap file for everything else. Uninitialized data and stack pages have
    /// none until they are first written back.
    pub backing_offset: Option<usize>,
}

impl TranslationEntry {
    /// Creates a non-resident entry with no backing copy.
    pub const fn new(virtual_page: PageNumber, kind: SegmentKind) -> Self {
        Self {
            virtual_page,
            physical_frame: None,
            dirty: false,
            referenced: false,
            read_only: false,
            kind,
            backing_offset: None,
        }
    }

    pub const fn is_resident(&self) -> bool {
        self.physical_frame.is_some()
    }
}

/// One entry per virtual page, indexed by page number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTable {
    entries: Vec<TranslationEntry>,
}

impl PageTable {
    /// Creates a table of non-resident entries, with the segment of page `n` given by
    /// `kind_of(n)`.
    pub fn new(page_count: usize, mut kind_of: impl FnMut(PageNumber) -> SegmentKind) -> Self {
        let entries = (0..page_count)
            .map(PageNumber::new)
            .map(|page| TranslationEntry::new(page, kind_of(page)))
            .collect();
        Self { entries }
    }

    /// Creates a table covering every page of `layout`, all non-resident.
    pub fn for_layout(layout: &SegmentLayout) -> Self {
        let entries = (0..layout.page_count())
            .map(PageNumber::new)
            .filter_map(|page| {
                layout
                    .kind_of(page)
                    .map(|kind| TranslationEntry::new(page, kind))
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, page: PageNumber) -> Option<&TranslationEntry> {
        self.entries.get(page.as_usize())
    }

    pub fn iter(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.entries.iter()
    }

    /// Iterates over the entries currently holding a frame.
    pub fn resident(&self) -> impl Iterator<Item = (PageNumber, FrameNumber)> + '_ {
        self.entries
            .iter()
            .filter_map(|entry| entry.physical_frame.map(|frame| (entry.virtual_page, frame)))
    }

    /// Returns a displayable dump of the table.
    pub fn dump(&self) -> PageTableDump<'_> {
        PageTableDump(self)
    }
}

impl Index<PageNumber> for PageTable {
    type Output = TranslationEntry;

    fn index(&self, page: PageNumber) -> &Self::Output {
        &self.entries[page.as_usize()]
    }
}

impl IndexMut<PageNumber> for PageTable {
    fn index_mut(&mut self, page: PageNumber) -> &mut Self::Output {
        &mut self.entries[page.as_usize()]
    }
}

/// Page table formatted one entry per line.
///
/// Flags are `R` (referenced), `D` (dirty) and `O` (read-only), with `-` for a clear flag.
pub struct PageTableDump<'a>(&'a PageTable);

impl fmt::Display for PageTableDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>5} {:>6} {:<5} {:<6} backing", "vpn", "frame", "flags", "kind")?;
        for entry in self.0.iter() {
            let flag = |set: bool, c: char| if set { c } else { '-' };
            write!(f, "{:>5} ", entry.virtual_page.as_usize())?;
            match entry.physical_frame {
                Some(frame) => write!(f, "{:>6} ", frame.as_usize())?,
                None => write!(f, "{:>6} ", "-")?,
            }
            write!(
                f,
                "{}{}{}   {:<6} ",
                flag(entry.referenced, 'R'),
                flag(entry.dirty, 'D'),
                flag(entry.read_only, 'O'),
                entry.kind
            )?;
            match entry.backing_offset {
                Some(offset) => writeln!(f, "{:#x}", offset)?,
                None => writeln!(f, "-")?,
            }
        }
        Ok(())
    }
}
