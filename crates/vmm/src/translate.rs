//! Virtual address translation.
//!
//! An address space is laid out as the code, initialized data and uninitialized data
//! segments of the executable (in that page order), followed by the user stack in the last
//! pages. Translation maps a virtual byte address to the virtual page holding it and the
//! offset within that page. It depends only on the layout, never on whether the page is
//! resident.

use core::fmt;

use noff::{NoffHeader, Segment};

use crate::{PAGE_SIZE, PageNumber, config::STACK_SAFETY_MARGIN, page_table::SegmentKind};

/// Error returned when an address lies outside the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateError {
    /// The address is below the code segment or at or beyond the end of the address space.
    OutOfRange { addr: usize, limit: usize },
}

impl fmt::Display for TranslateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslateError::OutOfRange { addr, limit } => write!(
                f,
                "virtual address {:#x} outside address space of {:#x} bytes",
                addr, limit
            ),
        }
    }
}

impl core::error::Error for TranslateError {}

/// Page-granular layout of one address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    header: NoffHeader,
    page_count: usize,
    stack_size: usize,
    code_pages: usize,
    init_pages: usize,
    uninit_pages: usize,
}

impl SegmentLayout {
    /// Computes the layout for an executable with a `stack_size`-byte stack.
    ///
    /// `stack_size` is expected to be a multiple of [`PAGE_SIZE`].
    pub fn new(header: &NoffHeader, stack_size: usize) -> Self {
        Self {
            header: *header,
            page_count: (header.segments_size() + stack_size).div_ceil(PAGE_SIZE),
            stack_size,
            code_pages: pages_spanned(&header.code),
            init_pages: pages_spanned(&header.init_data),
            uninit_pages: pages_spanned(&header.uninit_data),
        }
    }

    pub fn header(&self) -> &NoffHeader {
        &self.header
    }

    /// Number of virtual pages in the address space.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Size of the address space in bytes.
    pub fn size(&self) -> usize {
        self.page_count * PAGE_SIZE
    }

    pub fn stack_pages(&self) -> usize {
        self.stack_size / PAGE_SIZE
    }

    /// First page of the stack region.
    pub fn stack_base(&self) -> PageNumber {
        PageNumber::new(self.page_count.saturating_sub(self.stack_pages()))
    }

    /// Initial value of the stack pointer: the top of the address space, less a safety margin.
    pub fn stack_top(&self) -> usize {
        self.size().saturating_sub(STACK_SAFETY_MARGIN)
    }

    /// First page of the given segment.
    fn first_page(&self, kind: SegmentKind) -> PageNumber {
        match kind {
            SegmentKind::Code => PageNumber::new(0),
            SegmentKind::InitData => PageNumber::new(self.code_pages),
            SegmentKind::UninitData => PageNumber::new(self.code_pages + self.init_pages),
            SegmentKind::Stack => self.stack_base(),
        }
    }

    /// Translates a virtual address into its page and the offset within that page.
    ///
    /// The stack region takes precedence, then uninitialized data, then initialized data
    /// (each only if non-empty and the address is at or above its start); everything else
    /// is code.
    pub fn translate(&self, addr: usize) -> Result<(PageNumber, usize), TranslateError> {
        let out_of_range = TranslateError::OutOfRange {
            addr,
            limit: self.size(),
        };
        if addr >= self.size() {
            return Err(out_of_range);
        }

        let (base_addr, base_page) = if addr >= self.size().saturating_sub(self.stack_size) {
            let base = self.stack_base();
            (base.byte_offset(), base)
        } else if !self.header.uninit_data.is_empty()
            && addr >= self.header.uninit_data.virtual_addr as usize
        {
            (
                self.header.uninit_data.virtual_addr as usize,
                self.first_page(SegmentKind::UninitData),
            )
        } else if !self.header.init_data.is_empty()
            && addr >= self.header.init_data.virtual_addr as usize
        {
            (
                self.header.init_data.virtual_addr as usize,
                self.first_page(SegmentKind::InitData),
            )
        } else if addr >= self.header.code.virtual_addr as usize {
            (self.header.code.virtual_addr as usize, PageNumber::new(0))
        } else {
            return Err(out_of_range);
        };

        let relative = addr - base_addr;
        let page = base_page + relative / PAGE_SIZE;
        if page.as_usize() >= self.page_count {
            return Err(out_of_range);
        }
        Ok((page, relative % PAGE_SIZE))
    }

    /// Returns the segment a page belongs to, or `None` past the end of the address space.
    ///
    /// The pages of the executable's segments come first. When a segment does not end on a
    /// page boundary those pages can reach into the stack region; such a page keeps its
    /// segment's kind so its contents are still loaded from (and written back to) the
    /// executable.
    pub fn kind_of(&self, page: PageNumber) -> Option<SegmentKind> {
        let page = page.as_usize();
        if page >= self.page_count {
            return None;
        }

        let init_start = self.code_pages;
        let uninit_start = init_start + self.init_pages;
        let kind = if page < init_start {
            SegmentKind::Code
        } else if page < uninit_start {
            SegmentKind::InitData
        } else if page < self.segment_pages() {
            SegmentKind::UninitData
        } else {
            SegmentKind::Stack
        };
        Some(kind)
    }

    /// Number of pages spanned by the code, initialized data and uninitialized data
    /// segments, each rounded up to a whole page.
    pub fn segment_pages(&self) -> usize {
        self.code_pages + self.init_pages + self.uninit_pages
    }

    /// Number of segment pages that lie in the stack region. Non-zero only for executables
    /// whose segments are not page aligned.
    pub fn stack_overlap(&self) -> usize {
        self.segment_pages().saturating_sub(self.stack_base().as_usize())
    }

    /// Returns the `(offset, len)` of the executable bytes backing a code or initialized
    /// data page, or `None` for pages with no file contents.
    ///
    /// `len` is at most [`PAGE_SIZE`]. It is shorter for the last page of a segment, so
    /// writing a page back never spills into the next segment's bytes.
    pub fn file_extent(&self, page: PageNumber) -> Option<(usize, usize)> {
        let kind = self.kind_of(page)?;
        let segment = match kind {
            SegmentKind::Code => &self.header.code,
            SegmentKind::InitData => &self.header.init_data,
            SegmentKind::UninitData | SegmentKind::Stack => return None,
        };

        let consumed = (page - self.first_page(kind)) * PAGE_SIZE;
        let remaining = (segment.size as usize).checked_sub(consumed)?;
        if remaining == 0 {
            return None;
        }
        Some((
            segment.in_file_addr as usize + consumed,
            remaining.min(PAGE_SIZE),
        ))
    }
}

fn pages_spanned(segment: &Segment) -> usize {
    (segment.size as usize).div_ceil(PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One page each of code, initialized data and uninitialized data, two pages of stack.
    fn layout() -> SegmentLayout {
        let header = NoffHeader::new(
            Segment::new(128, 0, 40),
            Segment::new(128, 128, 168),
            Segment::new(128, 256, 0),
        );
        SegmentLayout::new(&header, 2 * PAGE_SIZE)
    }

    #[test]
    fn counts_pages() {
        let layout = layout();
        assert_eq!(layout.page_count(), 5);
        assert_eq!(layout.stack_base(), PageNumber::new(3));
        assert_eq!(layout.stack_top(), 5 * PAGE_SIZE - 16);
    }

    #[test]
    fn page_count_rounds_up() {
        let header = NoffHeader::new(
            Segment::new(10, 0, 40),
            Segment::default(),
            Segment::default(),
        );
        let layout = SegmentLayout::new(&header, PAGE_SIZE);
        assert_eq!(layout.page_count(), 2);
    }

    #[test]
    fn translates_each_region() {
        let layout = layout();
        assert_eq!(layout.translate(5), Ok((PageNumber::new(0), 5)));
        assert_eq!(layout.translate(130), Ok((PageNumber::new(1), 2)));
        assert_eq!(layout.translate(256), Ok((PageNumber::new(2), 0)));
        assert_eq!(layout.translate(3 * PAGE_SIZE + 7), Ok((PageNumber::new(3), 7)));
        assert_eq!(layout.translate(5 * PAGE_SIZE - 1), Ok((PageNumber::new(4), 127)));
    }

    /// Code and initialized data that do not end on a page boundary, so the segments'
    /// pages reach into the stack region.
    fn unaligned_layout() -> SegmentLayout {
        let header = NoffHeader::new(
            Segment::new(300, 0, 40),
            Segment::new(20, 300, 340),
            Segment::new(50, 320, 0),
        );
        SegmentLayout::new(&header, 8 * PAGE_SIZE)
    }

    fn assert_segments_translate_to_their_kind(layout: &SegmentLayout) {
        let header = *layout.header();
        for (segment, kind) in [
            (header.code, SegmentKind::Code),
            (header.init_data, SegmentKind::InitData),
            (header.uninit_data, SegmentKind::UninitData),
        ] {
            let start = segment.virtual_addr as usize;
            for addr in start..start + segment.size as usize {
                let (page, offset) = layout.translate(addr).unwrap();
                assert!(offset < PAGE_SIZE);
                assert_eq!(layout.kind_of(page), Some(kind), "address {:#x}", addr);
            }
        }
    }

    #[test]
    fn translation_is_consistent() {
        let layout = layout();
        for addr in 0..layout.size() {
            let (page, offset) = layout.translate(addr).unwrap();
            assert!(page.as_usize() < layout.page_count());
            assert!(offset < PAGE_SIZE);
        }
        assert_segments_translate_to_their_kind(&layout);
    }

    #[test]
    fn unaligned_segments_keep_their_kind() {
        let layout = unaligned_layout();
        assert_eq!(layout.page_count(), 11);
        assert_eq!(layout.stack_base(), PageNumber::new(3));
        assert_eq!(layout.segment_pages(), 5);
        assert_eq!(layout.stack_overlap(), 2);

        assert_eq!(layout.translate(300), Ok((PageNumber::new(3), 0)));
        assert_eq!(layout.kind_of(PageNumber::new(3)), Some(SegmentKind::InitData));
        assert_eq!(layout.kind_of(PageNumber::new(4)), Some(SegmentKind::UninitData));
        assert_eq!(layout.kind_of(PageNumber::new(5)), Some(SegmentKind::Stack));
        assert_segments_translate_to_their_kind(&layout);
    }

    #[test]
    fn unaligned_init_data_has_file_extent() {
        let layout = unaligned_layout();
        assert_eq!(layout.file_extent(PageNumber::new(2)), Some((296, 44)));
        assert_eq!(layout.file_extent(PageNumber::new(3)), Some((340, 20)));
        assert_eq!(layout.file_extent(PageNumber::new(4)), None);

        for page in (0..layout.page_count()).map(PageNumber::new) {
            let file_backed = layout.kind_of(page).is_some_and(|kind| kind.is_file_backed());
            assert_eq!(layout.file_extent(page).is_some(), file_backed, "page {}", page);
        }
    }

    #[test]
    fn rejects_addresses_past_end() {
        let layout = layout();
        assert_eq!(
            layout.translate(5 * PAGE_SIZE),
            Err(TranslateError::OutOfRange {
                addr: 5 * PAGE_SIZE,
                limit: 5 * PAGE_SIZE
            })
        );
    }

    #[test]
    fn rejects_addresses_below_code() {
        let header = NoffHeader::new(
            Segment::new(128, 64, 40),
            Segment::default(),
            Segment::default(),
        );
        let layout = SegmentLayout::new(&header, PAGE_SIZE);
        assert!(layout.translate(10).is_err());
        assert_eq!(layout.translate(64), Ok((PageNumber::new(0), 0)));
        assert_eq!(layout.translate(100), Ok((PageNumber::new(0), 36)));
    }

    #[test]
    fn empty_segments_fall_through_to_code() {
        let header = NoffHeader::new(
            Segment::new(256, 0, 40),
            Segment::new(0, 0, 0),
            Segment::new(0, 0, 0),
        );
        let layout = SegmentLayout::new(&header, PAGE_SIZE);
        assert_eq!(layout.translate(200), Ok((PageNumber::new(1), 72)));
    }

    #[test]
    fn classifies_pages() {
        let layout = layout();
        let kinds: Vec<_> = (0..5)
            .map(|page| layout.kind_of(PageNumber::new(page)).unwrap())
            .collect();
        assert_eq!(
            kinds,
            [
                SegmentKind::Code,
                SegmentKind::InitData,
                SegmentKind::UninitData,
                SegmentKind::Stack,
                SegmentKind::Stack
            ]
        );
        assert_eq!(layout.kind_of(PageNumber::new(5)), None);
    }

    #[test]
    fn kinds_agree_with_translation() {
        let layout = layout();
        for segment in [layout.header.code, layout.header.init_data, layout.header.uninit_data] {
            let (page, _) = layout.translate(segment.virtual_addr as usize).unwrap();
            assert_ne!(layout.kind_of(page), Some(SegmentKind::Stack));
        }
    }

    #[test]
    fn file_extents() {
        let header = NoffHeader::new(
            Segment::new(200, 0, 40),
            Segment::new(50, 256, 240),
            Segment::new(128, 384, 0),
        );
        let layout = SegmentLayout::new(&header, 2 * PAGE_SIZE);
        assert_eq!(layout.file_extent(PageNumber::new(0)), Some((40, 128)));
        assert_eq!(layout.file_extent(PageNumber::new(1)), Some((168, 72)));
        assert_eq!(layout.file_extent(PageNumber::new(2)), Some((240, 50)));
        assert_eq!(layout.file_extent(PageNumber::new(3)), None);
    }
}
