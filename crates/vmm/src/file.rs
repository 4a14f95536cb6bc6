//! Interface to the filesystem holding executables and swap files.

/// An open file supporting random-access reads and writes.
///
/// Files have a fixed length. Reads and writes that run past the end are truncated, and both
/// return the number of bytes actually transferred.
pub trait OpenFile {
    fn read_at(&mut self, buf: &mut [u8], offset: usize) -> usize;

    fn write_at(&mut self, buf: &[u8], offset: usize) -> usize;

    /// Returns the length of the file in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A flat namespace of files.
pub trait FileSystem {
    type File: OpenFile;

    /// Opens an existing file, or returns `None` if it does not exist.
    fn open(&self, name: &str) -> Option<Self::File>;

    /// Creates (or truncates) a zero-filled file of `size` bytes.
    fn create(&self, name: &str, size: usize) -> bool;

    /// Deletes a file. Returns false if it did not exist.
    fn remove(&self, name: &str) -> bool;
}
