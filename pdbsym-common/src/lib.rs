//! Common functionality for `pdbsym`.
//!
//! This crate exposes a set of key types:
//!
//!  - [`ByteView`]: Memory mapped access to files on disk.
//!  - [`PdbSignature`]: The content-addressed key of a PDB, derived from GUID and age.
//!  - [`PdbIdentity`] and [`ImageIdentity`]: What an image declares about its PDB.
//!  - Functions to deal with paths from different platforms.

#![warn(missing_docs)]

mod byteview;
mod path;
mod types;

pub use crate::byteview::*;
pub use crate::path::*;
pub use crate::types::*;

pub use uuid::Uuid;
