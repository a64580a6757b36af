//! Access to the debug information `pdbsym` needs from Windows binaries.
//!
//! Two container formats are involved when resolving a `module+offset` frame:
//!
//!  - [`PeImage`]: the executable or library. It carries a CodeView record naming the PDB it was
//!    linked with, together with the GUID and age that make up the [`PdbSignature`].
//!  - [`PdbSymbols`]: the function and line tables read from a PDB file, addressed by relative
//!    virtual address (RVA).
//!
//! [`PdbSignature`]: pdbsym_common::PdbSignature

#![warn(missing_docs)]

mod base;

pub mod pdb;
pub mod pe;

pub use crate::base::*;
pub use crate::pdb::{PdbError, PdbErrorKind, PdbSymbols};
pub use crate::pe::{PeError, PeErrorKind, PeImage};
