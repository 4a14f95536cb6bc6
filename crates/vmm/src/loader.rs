//! Loading executables into an address space.

use noff::{Endian, HEADER_SIZE, HeaderError, NoffHeader};

use crate::{Machine, OpenFile, PageNumber, page_table::PageTable, translate::SegmentLayout};

/// Reads and decodes the header at the start of an executable.
pub fn read_header<F: OpenFile>(executable: &mut F) -> Result<(NoffHeader, Endian), HeaderError> {
    let mut bytes = [0u8; HEADER_SIZE];
    let read = executable.read_at(&mut bytes, 0);
    NoffHeader::from_bytes(&bytes[..read])
}

/// Fills `page` with bytes of `file` starting at `offset`. Bytes past the end of the file
/// read as zero. Returns the number of bytes actually read.
pub fn read_page<F: OpenFile>(file: &mut F, page: &mut [u8], offset: usize) -> usize {
    let read = file.read_at(page, offset);
    page[read..].fill(0);
    read
}

/// Records where every code and initialized data page lives in the executable, and fills
/// the frames of the pages that are already resident.
///
/// Resident uninitialized data and stack pages are zeroed, since their frame may still hold
/// a page of an address space that has since exited.
pub fn load_initial_pages<F, M>(
    executable: &mut F,
    layout: &SegmentLayout,
    table: &mut PageTable,
    machine: &mut M,
) where
    F: OpenFile,
    M: Machine + ?Sized,
{
    for page in (0..table.len()).map(PageNumber::new) {
        let entry = &mut table[page];
        entry.backing_offset = layout.file_extent(page).map(|(offset, _)| offset);

        let Some(frame) = entry.physical_frame else {
            continue;
        };
        let memory = machine.frame_mut(frame);
        match entry.backing_offset {
            Some(offset) => {
                let read = read_page(executable, memory, offset);
                log::trace!(
                    "loaded {} page {} into frame {} ({} bytes from {:#x})",
                    entry.kind,
                    page,
                    frame,
                    read,
                    offset
                );
            }
            None => memory.fill(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        FileSystem, FrameNumber, PAGE_SIZE,
        emulation::{EmulatedMachine, MemFileSystem},
    };
    use noff::NoffBuilder;

    #[test]
    fn reads_header_from_file() {
        let fs = MemFileSystem::new();
        fs.insert("prog", &NoffBuilder::new(128).code(&[1; 10]).build());

        let (header, endian) = read_header(&mut fs.open("prog").unwrap()).unwrap();
        assert_eq!(endian, Endian::Little);
        assert_eq!(header.code.size, 10);
    }

    #[test]
    fn short_file_is_truncated_header() {
        let fs = MemFileSystem::new();
        fs.insert("prog", &[0xAD, 0xDF]);

        let result = read_header(&mut fs.open("prog").unwrap());
        assert_eq!(result, Err(HeaderError::Truncated { len: 2 }));
    }

    #[test]
    fn read_page_zero_fills_past_end() {
        let fs = MemFileSystem::new();
        fs.insert("data", &[7; 10]);

        let mut page = [0xFFu8; PAGE_SIZE];
        assert_eq!(read_page(&mut fs.open("data").unwrap(), &mut page, 4), 6);
        assert!(page[..6].iter().all(|&b| b == 7));
        assert!(page[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn loads_resident_pages_and_records_offsets() {
        let code = [0xC0u8; 2 * PAGE_SIZE];
        let data = [0xDAu8; PAGE_SIZE];
        let image = NoffBuilder::new(PAGE_SIZE as u32)
            .code(&code)
            .init_data(&data)
            .uninit_size(PAGE_SIZE as u32)
            .build();
        let fs = MemFileSystem::new();
        fs.insert("prog", &image);
        let mut executable = fs.open("prog").unwrap();
        let (header, _) = read_header(&mut executable).unwrap();

        let layout = SegmentLayout::new(&header, PAGE_SIZE);
        let mut table = PageTable::for_layout(&layout);
        let mut machine = EmulatedMachine::new(4);
        machine.main_memory_mut().fill(0xEE);

        // Code page 0 and the uninitialized page are resident.
        table[PageNumber::new(0)].physical_frame = Some(FrameNumber::new(1));
        table[PageNumber::new(3)].physical_frame = Some(FrameNumber::new(2));

        load_initial_pages(&mut executable, &layout, &mut table, &mut machine);

        assert_eq!(table[PageNumber::new(0)].backing_offset, Some(40));
        assert_eq!(
            table[PageNumber::new(1)].backing_offset,
            Some(40 + PAGE_SIZE)
        );
        assert_eq!(
            table[PageNumber::new(2)].backing_offset,
            Some(40 + 2 * PAGE_SIZE)
        );
        assert_eq!(table[PageNumber::new(3)].backing_offset, None);
        assert_eq!(table[PageNumber::new(4)].backing_offset, None);

        assert!(machine.frame(FrameNumber::new(1)).iter().all(|&b| b == 0xC0));
        assert!(machine.frame(FrameNumber::new(2)).iter().all(|&b| b == 0));
        // Frames of non-resident pages are left alone.
        assert!(machine.frame(FrameNumber::new(0)).iter().all(|&b| b == 0xEE));
    }
}
