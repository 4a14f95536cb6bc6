#![no_std]

//! # NOFF images
//!
//! User programs are loaded from NOFF ("Nachos Object File Format") images. An image is a
//! fixed 40-byte header followed by the raw bytes of the code and initialized-data
//! segments:
//!
//! ```text
//! offset  field
//! 0       magic                 (NOFF_MAGIC)
//! 4       code.size
//! 8       code.virtual_addr
//! 12      code.in_file_addr
//! 16      init_data.size
//! 20      init_data.virtual_addr
//! 24      init_data.in_file_addr
//! 28      uninit_data.size
//! 32      uninit_data.virtual_addr
//! 36      uninit_data.in_file_addr
//! ```
//!
//! Every field is a 32-bit word. Images are normally little-endian; an image written on a
//! machine of the opposite byte order is recognised by its byte-swapped magic and decoded
//! accordingly.

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

/// Magic number identifying a NOFF image.
pub const NOFF_MAGIC: u32 = 0x00BA_DFAD;

/// Size of the on-disk header in bytes.
pub const HEADER_SIZE: usize = 40;

/// Byte order of an image's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endian::Little => write!(f, "little-endian"),
            Endian::Big => write!(f, "big-endian"),
        }
    }
}

/// Errors produced while decoding a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// Fewer than [`HEADER_SIZE`] bytes were available.
    Truncated { len: usize },
    /// The magic word matched neither byte order.
    BadMagic { found: u32 },
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderError::Truncated { len } => {
                write!(f, "header truncated: {} of {} bytes", len, HEADER_SIZE)
            }
            HeaderError::BadMagic { found } => {
                write!(f, "bad magic {:#010x} (expected {:#010x})", found, NOFF_MAGIC)
            }
        }
    }
}

impl core::error::Error for HeaderError {}

/// Location of one segment, both in the program's address space and in the image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    /// Size of the segment in bytes.
    pub size: u32,
    /// Virtual address the segment starts at.
    pub virtual_addr: u32,
    /// Offset of the segment's bytes within the image. Meaningless for uninitialized data.
    pub in_file_addr: u32,
}

impl Segment {
    pub const fn new(size: u32, virtual_addr: u32, in_file_addr: u32) -> Self {
        Self {
            size,
            virtual_addr,
            in_file_addr,
        }
    }

    /// Returns true if the segment occupies no bytes.
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the first virtual address past the end of the segment.
    pub const fn virtual_end(&self) -> u32 {
        self.virtual_addr + self.size
    }

    const fn swapped(self) -> Self {
        Self {
            size: self.size.swap_bytes(),
            virtual_addr: self.virtual_addr.swap_bytes(),
            in_file_addr: self.in_file_addr.swap_bytes(),
        }
    }
}

/// Decoded NOFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoffHeader {
    pub magic: u32,
    pub code: Segment,
    pub init_data: Segment,
    pub uninit_data: Segment,
}

impl NoffHeader {
    /// Creates a header with the standard magic.
    pub const fn new(code: Segment, init_data: Segment, uninit_data: Segment) -> Self {
        Self {
            magic: NOFF_MAGIC,
            code,
            init_data,
            uninit_data,
        }
    }

    /// Decodes a header from the start of `data`.
    ///
    /// The words are first read as little-endian. If the magic does not match, every field
    /// is byte-swapped and the magic checked again. Returns the header together with the
    /// byte order it was found in.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, Endian), HeaderError> {
        if data.len() < HEADER_SIZE {
            return Err(HeaderError::Truncated { len: data.len() });
        }

        let word = |index: usize| {
            let start = index * 4;
            u32::from_le_bytes([
                data[start],
                data[start + 1],
                data[start + 2],
                data[start + 3],
            ])
        };

        let raw = Self {
            magic: word(0),
            code: Segment::new(word(1), word(2), word(3)),
            init_data: Segment::new(word(4), word(5), word(6)),
            uninit_data: Segment::new(word(7), word(8), word(9)),
        };

        if raw.magic == NOFF_MAGIC {
            return Ok((raw, Endian::Little));
        }

        let swapped = raw.byte_swapped();
        if swapped.magic == NOFF_MAGIC {
            return Ok((swapped, Endian::Big));
        }

        Err(HeaderError::BadMagic { found: raw.magic })
    }

    /// Encodes the header in the given byte order.
    pub fn to_bytes(&self, endian: Endian) -> [u8; HEADER_SIZE] {
        let words = [
            self.magic,
            self.code.size,
            self.code.virtual_addr,
            self.code.in_file_addr,
            self.init_data.size,
            self.init_data.virtual_addr,
            self.init_data.in_file_addr,
            self.uninit_data.size,
            self.uninit_data.virtual_addr,
            self.uninit_data.in_file_addr,
        ];

        let mut out = [0u8; HEADER_SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            let bytes = match endian {
                Endian::Little => word.to_le_bytes(),
                Endian::Big => word.to_be_bytes(),
            };
            chunk.copy_from_slice(&bytes);
        }
        out
    }

    /// Returns the header with every field byte-swapped.
    pub const fn byte_swapped(self) -> Self {
        Self {
            magic: self.magic.swap_bytes(),
            code: self.code.swapped(),
            init_data: self.init_data.swapped(),
            uninit_data: self.uninit_data.swapped(),
        }
    }

    /// Total bytes of program memory described by the three segments.
    pub const fn segments_size(&self) -> usize {
        self.code.size as usize + self.init_data.size as usize + self.uninit_data.size as usize
    }
}

/// Builds a complete image from raw segment contents.
///
/// Segments are laid out back to back in the file, directly after the header. In the
/// address space the code segment starts at 0 and each following segment starts at the
/// next multiple of `align`.
///
/// ```
/// use noff::{NoffBuilder, NoffHeader, Endian};
///
/// let image = NoffBuilder::new(128)
///     .code(&[0xAA; 100])
///     .init_data(&[0xBB; 10])
///     .uninit_size(64)
///     .build();
///
/// let (header, endian) = NoffHeader::from_bytes(&image).unwrap();
/// assert_eq!(endian, Endian::Little);
/// assert_eq!(header.code.in_file_addr, 40);
/// assert_eq!(header.init_data.virtual_addr, 128);
/// assert_eq!(header.uninit_data.virtual_addr, 256);
/// assert_eq!(image.len(), 40 + 100 + 10);
/// ```
#[derive(Debug, Clone)]
pub struct NoffBuilder<'a> {
    align: u32,
    code: &'a [u8],
    init_data: &'a [u8],
    uninit_size: u32,
    endian: Endian,
}

impl<'a> NoffBuilder<'a> {
    /// Creates a builder aligning segment virtual addresses to `align` bytes.
    ///
    /// # Panics
    /// Panics if `align` is zero.
    pub fn new(align: u32) -> Self {
        assert!(align > 0, "segment alignment must be non-zero");
        Self {
            align,
            code: &[],
            init_data: &[],
            uninit_size: 0,
            endian: Endian::Little,
        }
    }

    pub fn code(mut self, code: &'a [u8]) -> Self {
        self.code = code;
        self
    }

    pub fn init_data(mut self, data: &'a [u8]) -> Self {
        self.init_data = data;
        self
    }

    pub fn uninit_size(mut self, size: u32) -> Self {
        self.uninit_size = size;
        self
    }

    pub fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Returns the header the image will carry.
    pub fn header(&self) -> NoffHeader {
        let code_size = self.code.len() as u32;
        let init_size = self.init_data.len() as u32;

        let code = Segment::new(code_size, 0, HEADER_SIZE as u32);
        let init_data = Segment::new(
            init_size,
            align_up(code.virtual_end(), self.align),
            HEADER_SIZE as u32 + code_size,
        );
        let uninit_base = if init_data.is_empty() {
            align_up(code.virtual_end(), self.align)
        } else {
            align_up(init_data.virtual_end(), self.align)
        };
        let uninit_data = Segment::new(self.uninit_size, uninit_base, 0);

        NoffHeader::new(code, init_data, uninit_data)
    }

    /// Serializes the header and segment contents.
    pub fn build(&self) -> Vec<u8> {
        let header = self.header();
        let mut image = Vec::with_capacity(HEADER_SIZE + self.code.len() + self.init_data.len());
        image.extend_from_slice(&header.to_bytes(self.endian));
        image.extend_from_slice(self.code);
        image.extend_from_slice(self.init_data);
        image
    }
}

const fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> NoffHeader {
        NoffHeader::new(
            Segment::new(256, 0, 40),
            Segment::new(32, 256, 296),
            Segment::new(100, 384, 0),
        )
    }

    mod decode {
        use super::*;

        #[test]
        fn reads_little_endian() {
            let header = sample_header();
            let bytes = header.to_bytes(Endian::Little);

            let (decoded, endian) = NoffHeader::from_bytes(&bytes).unwrap();
            assert_eq!(endian, Endian::Little);
            assert_eq!(decoded, header);
        }

        #[test]
        fn swaps_big_endian() {
            let header = sample_header();
            let bytes = header.to_bytes(Endian::Big);

            let (decoded, endian) = NoffHeader::from_bytes(&bytes).unwrap();
            assert_eq!(endian, Endian::Big);
            assert_eq!(decoded.code.size, 256);
            assert_eq!(decoded.init_data.in_file_addr, 296);
            assert_eq!(decoded.uninit_data.virtual_addr, 384);
        }

        #[test]
        fn rejects_bad_magic() {
            let mut bytes = sample_header().to_bytes(Endian::Little);
            bytes[0] = 0x12;

            let err = NoffHeader::from_bytes(&bytes).unwrap_err();
            assert!(matches!(err, HeaderError::BadMagic { .. }));
        }

        #[test]
        fn rejects_short_input() {
            let bytes = sample_header().to_bytes(Endian::Little);
            assert_eq!(
                NoffHeader::from_bytes(&bytes[..12]),
                Err(HeaderError::Truncated { len: 12 })
            );
        }

        #[test]
        fn ignores_trailing_bytes() {
            let mut image = Vec::from(sample_header().to_bytes(Endian::Little));
            image.extend_from_slice(&[0xFF; 16]);

            let (decoded, _) = NoffHeader::from_bytes(&image).unwrap();
            assert_eq!(decoded, sample_header());
        }
    }

    mod builder {
        use super::*;

        #[test]
        fn places_segments_back_to_back_in_file() {
            let code = [1u8; 10];
            let data = [2u8; 5];
            let image = NoffBuilder::new(128).code(&code).init_data(&data).build();

            let (header, _) = NoffHeader::from_bytes(&image).unwrap();
            let code_start = header.code.in_file_addr as usize;
            let data_start = header.init_data.in_file_addr as usize;
            assert_eq!(&image[code_start..code_start + 10], &code);
            assert_eq!(&image[data_start..data_start + 5], &data);
        }

        #[test]
        fn uninit_follows_code_when_no_data() {
            let header = NoffBuilder::new(128)
                .code(&[0; 130])
                .uninit_size(10)
                .header();

            assert!(header.init_data.is_empty());
            assert_eq!(header.uninit_data.virtual_addr, 256);
        }

        #[test]
        fn big_endian_images_round_trip() {
            let image = NoffBuilder::new(64)
                .code(&[7; 3])
                .endian(Endian::Big)
                .build();

            let (header, endian) = NoffHeader::from_bytes(&image).unwrap();
            assert_eq!(endian, Endian::Big);
            assert_eq!(header.code.size, 3);
        }

        #[test]
        fn segments_size_sums_all_segments() {
            assert_eq!(sample_header().segments_size(), 256 + 32 + 100);
        }
    }
}
