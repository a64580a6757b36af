//! Resolve module-relative call stack frames into symbols.
//!
//! Crash logs often only carry frames such as `mylib.dll+0x1a4`. This crate turns them into
//! function names and source lines by locating the matching PDB for each image and looking the
//! offset up in it:
//!
//!  1. [`parse_frame`] splits a raw frame into module and offset.
//!  2. The [`PdbLocator`] reads the PDB identity from the image and searches cache directories,
//!     flat directories and symbol servers for it.
//!  3. The [`SymbolEngineAdapter`] maps the PDB into a private address space and answers address
//!     queries through a [`SymbolEngine`].
//!  4. The [`Resolver`] drives these steps for every frame of a [`Context`], which is finally
//!     rendered with [`write_readable`] or [`write_json`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use pdbsym::{Context, Resolver};
//!
//! # fn main() -> Result<(), pdbsym::Error> {
//! let mut context = Context::new();
//! context.read_config_file(Path::new("config.json"))?;
//! context.parse_callstacks(false)?;
//!
//! let mut resolver = Resolver::from_context(&context)?;
//! resolver.resolve(&mut context);
//! resolver.finalize()?;
//!
//! pdbsym::write_readable(&context, std::io::stdout())?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod context;
mod discovery;
mod download;
mod engine;
mod error;
mod frame;
mod output;
mod pdb_engine;
mod resolver;

pub use crate::context::*;
pub use crate::discovery::*;
pub use crate::download::*;
pub use crate::engine::*;
pub use crate::error::*;
pub use crate::frame::*;
pub use crate::output::{to_json, write_json, write_readable, ReadableFrame, READABLE_HEADER};
pub use crate::pdb_engine::*;
pub use crate::resolver::*;
