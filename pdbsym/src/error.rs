use std::error::Error as StdError;
use std::fmt;
use std::io;

use thiserror::Error;

use pdbsym_debuginfo::{PdbError, PeError};

/// The kind of an [`Error`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A malformed frame, configuration or text input.
    Parse,

    /// The image file referenced by a frame does not exist.
    ImageNotFound,

    /// The image could not be read or carries no PDB reference.
    ImageIndexFailed,

    /// No PDB matching the image was found in any configured location.
    PdbNotFound,

    /// A symbol server cache directory does not exist.
    InvalidCacheDir,

    /// The cache already holds the PDB that was about to be downloaded.
    CacheCollision,

    /// A symbol server request failed.
    DownloadFailed,

    /// The symbol engine was initialized twice.
    AlreadyInitialized,

    /// The symbol engine could not be initialized.
    EngineInitFailed,

    /// A PDB could not be loaded into the symbol engine.
    LoadFailed,

    /// A PDB could not be unloaded from the symbol engine.
    UnloadFailed,

    /// No address range could be reserved for a PDB.
    ReserveFailed,

    /// The symbol engine failed to answer an address query.
    SymbolLookupFailed,

    /// A file system operation failed.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "failed to parse input"),
            Self::ImageNotFound => write!(f, "image not found"),
            Self::ImageIndexFailed => write!(f, "failed to read pdb reference from image"),
            Self::PdbNotFound => write!(f, "pdb not found"),
            Self::InvalidCacheDir => write!(f, "invalid symbol server cache directory"),
            Self::CacheCollision => write!(f, "symbol cache already has the pdb"),
            Self::DownloadFailed => write!(f, "failed to download pdb"),
            Self::AlreadyInitialized => write!(f, "symbol engine already initialized"),
            Self::EngineInitFailed => write!(f, "failed to initialize symbol engine"),
            Self::LoadFailed => write!(f, "failed to load pdb"),
            Self::UnloadFailed => write!(f, "failed to unload pdb"),
            Self::ReserveFailed => write!(f, "failed to reserve address range"),
            Self::SymbolLookupFailed => write!(f, "symbol lookup failed"),
            Self::Io => write!(f, "i/o error"),
        }
    }
}

/// An error returned while resolving call stacks.
///
/// The [`kind`](Self::kind) places the error in the failure taxonomy. Details, such as the
/// offending path or frame, are carried by the [source](std::error::Error::source) and are printed
/// by alternate formatting of error chains (for example `{:#}` in `anyhow`).
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl Error {
    /// Creates a new error from a known kind of error as well as an arbitrary error payload.
    pub fn new<E>(kind: ErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::new(ErrorKind::Io, e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Self::new(ErrorKind::Io, e)
        } else {
            Self::new(ErrorKind::Parse, e)
        }
    }
}

impl From<PeError> for Error {
    fn from(e: PeError) -> Self {
        Self::new(ErrorKind::ImageIndexFailed, e)
    }
}

impl From<PdbError> for Error {
    fn from(e: PdbError) -> Self {
        Self::new(ErrorKind::LoadFailed, e)
    }
}
