//! Read-only, memory mapped access to PE images and PDB files.

use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;

/// The contents of a file on disk.
///
/// Images and PDBs can be large, so files are memory mapped rather than read into a buffer. The
/// view dereferences into `&[u8]`. Empty files cannot be mapped and yield an empty view.
///
/// # Example
///
/// ```
/// use std::io::Write;
/// use pdbsym_common::ByteView;
///
/// fn main() -> Result<(), std::io::Error> {
///     let mut file = tempfile::NamedTempFile::new()?;
///     file.write_all(b"MZ")?;
///
///     let view = ByteView::open(file.path())?;
///     assert_eq!(view.as_slice(), b"MZ");
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct ByteView {
    mmap: Option<Mmap>,
}

impl ByteView {
    /// Opens and memory maps the file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(ByteView { mmap: None });
        }

        // The file must not be truncated while it is mapped.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(ByteView { mmap: Some(mmap) })
    }

    /// The mapped bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or_default()
    }
}

impl AsRef<[u8]> for ByteView {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Deref for ByteView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use similar_asserts::assert_eq;

    #[test]
    fn test_open_empty_file() -> Result<(), io::Error> {
        let tmp = tempfile::NamedTempFile::new()?;
        let view = ByteView::open(tmp.path())?;
        assert_eq!(view.len(), 0);
        Ok(())
    }

    #[test]
    fn test_open_file() -> Result<(), io::Error> {
        let mut tmp = tempfile::NamedTempFile::new()?;
        tmp.write_all(b"Microsoft C/C++ MSF 7.00")?;
        tmp.flush()?;

        let view = ByteView::open(tmp.path())?;
        assert_eq!(&view[..9], b"Microsoft");
        Ok(())
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ByteView::open(dir.path().join("missing.dll")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
