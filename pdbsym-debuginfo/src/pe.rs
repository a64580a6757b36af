//! Support for Portable Executables, the image format on Windows.
//!
//! Only the parts needed to locate the matching PDB are read: the CodeView debug record and the
//! size of the mapped image.

use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::path::Path;

use goblin::pe;
use thiserror::Error;

use pdbsym_common::{file_name, ByteView, ImageIdentity, PdbIdentity, PdbSignature};

/// The kind of a [`PeError`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeErrorKind {
    /// The image file could not be opened or read.
    Io,

    /// The file is not a valid PE image.
    BadObject,

    /// The image carries no CodeView record, so there is no PDB to look for.
    MissingDebugInfo,
}

impl fmt::Display for PeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "failed to read image"),
            Self::BadObject => write!(f, "invalid PE file"),
            Self::MissingDebugInfo => write!(f, "image has no pdb debug information"),
        }
    }
}

/// An error when dealing with [`PeImage`].
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct PeError {
    kind: PeErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl PeError {
    /// Creates a new PE error from a known kind of error as well as an arbitrary error payload.
    fn new<E>(kind: PeErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`PeErrorKind`] for this error.
    pub fn kind(&self) -> PeErrorKind {
        self.kind
    }
}

impl From<PeErrorKind> for PeError {
    fn from(kind: PeErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<goblin::error::Error> for PeError {
    fn from(e: goblin::error::Error) -> Self {
        Self::new(PeErrorKind::BadObject, e)
    }
}

/// A parsed Portable Executable.
///
/// The image references its PDB through a CodeView `RSDS` record in the debug directory. That
/// record holds the path of the PDB on the build machine, the build GUID and the age.
pub struct PeImage<'data> {
    pe: pe::PE<'data>,
}

impl<'data> PeImage<'data> {
    /// Tests whether the buffer could contain a PE image.
    pub fn test(data: &[u8]) -> bool {
        use scroll::{Pread, LE};
        matches!(
            data.pread_with::<u16>(0, LE),
            Ok(pe::header::DOS_MAGIC)
        )
    }

    /// Tries to parse a PE image from the given slice.
    pub fn parse(data: &'data [u8]) -> Result<Self, PeError> {
        if !Self::test(data) {
            return Err(PeError::new(PeErrorKind::BadObject, "missing MZ header"));
        }

        let pe = pe::PE::parse(data)?;
        Ok(PeImage { pe })
    }

    fn codeview(&self) -> Option<&pe::debug::CodeviewPDB70DebugInfo<'data>> {
        self.pe
            .debug_data
            .as_ref()
            .and_then(|debug_data| debug_data.codeview_pdb70_debug_info.as_ref())
    }

    /// The PDB path recorded at link time, usually an absolute path on the build machine.
    pub fn debug_file_name(&self) -> Option<Cow<'_, str>> {
        let debug_info = self.codeview()?;
        let end = debug_info
            .filename
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(debug_info.filename.len());
        Some(String::from_utf8_lossy(&debug_info.filename[..end]))
    }

    /// The signature of the referenced PDB.
    pub fn pdb_signature(&self) -> Option<PdbSignature> {
        let debug_info = self.codeview()?;
        // PE stores the GUID with little endian fields.
        Some(PdbSignature::from_guid_le(
            debug_info.signature,
            debug_info.age,
        ))
    }

    /// The PDB identity this image was linked with.
    ///
    /// The base name is the file name component of [`debug_file_name`](Self::debug_file_name).
    pub fn pdb_identity(&self) -> Option<PdbIdentity> {
        let signature = self.pdb_signature()?;
        let debug_file = self.debug_file_name()?;
        let basename = file_name(&debug_file);
        if basename.is_empty() {
            return None;
        }

        Some(PdbIdentity::new(basename, signature))
    }

    /// The size of the image when mapped into memory.
    pub fn image_size(&self) -> u64 {
        self.pe
            .header
            .optional_header
            .as_ref()
            .map_or(0, |header| u64::from(header.windows_fields.size_of_image))
    }
}

impl fmt::Debug for PeImage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeImage")
            .field("debug_file_name", &self.debug_file_name())
            .field("pdb_signature", &self.pdb_signature())
            .field("image_size", &format_args!("{:#x}", self.image_size()))
            .finish()
    }
}

/// Reads the PDB identity from the image at `path`.
///
/// Fails with [`PeErrorKind::Io`] if the file cannot be read, [`PeErrorKind::BadObject`] if it is
/// not a PE image and [`PeErrorKind::MissingDebugInfo`] if it does not reference a PDB.
pub fn index_image(path: &Path) -> Result<ImageIdentity, PeError> {
    let view = ByteView::open(path).map_err(|e| PeError::new(PeErrorKind::Io, e))?;
    let image = PeImage::parse(&view)?;
    let pdb = image
        .pdb_identity()
        .ok_or(PeErrorKind::MissingDebugInfo)?;

    tracing::debug!(
        image = %path.display(),
        debug_file = ?image.debug_file_name(),
        signature = %pdb.signature,
        "indexed image"
    );

    Ok(ImageIdentity {
        image_path: path.to_path_buf(),
        image_size: image.image_size(),
        pdb,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use similar_asserts::assert_eq;

    #[test]
    fn test_magic() {
        assert!(PeImage::test(b"MZ\x90\x00"));
        assert!(!PeImage::test(b"\x7fELF"));
        assert!(!PeImage::test(b"M"));
    }

    #[test]
    fn test_parse_not_pe() {
        let err = PeImage::parse(b"Microsoft C/C++ MSF 7.00\r\n").unwrap_err();
        assert_eq!(err.kind(), PeErrorKind::BadObject);
    }

    #[test]
    fn test_index_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = index_image(&dir.path().join("mylib.dll")).unwrap_err();
        assert_eq!(err.kind(), PeErrorKind::Io);
    }

    #[test]
    fn test_index_truncated_image() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"MZ\x90\x00\x03\x00\x00\x00").unwrap();

        let err = index_image(file.path()).unwrap_err();
        assert_eq!(err.kind(), PeErrorKind::BadObject);
    }
}
