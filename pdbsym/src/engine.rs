//! Binding PDBs to virtual addresses and answering address queries.
//!
//! A [`SymbolEngine`] works on absolute addresses: each PDB is loaded at a base address, and
//! queries are made with `base + offset`. The [`SymbolEngineAdapter`] hands out disjoint base
//! addresses, keeps track of what is loaded and translates image offsets into queries.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use pdbsym_common::pdb_key;

use crate::context::DisplayChain;
use crate::error::{Error, ErrorKind};

const MIB: u64 = 1 << 20;

/// The span used to load a PDB whose real span is not known yet.
pub const PREFLIGHT_SPAN: u64 = 2 << 30;

/// A symbol returned by a [`SymbolEngine`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SymbolInfo {
    /// The undecorated symbol name.
    pub name: String,
    /// Absolute address of the symbol.
    pub address: u64,
}

/// A line record returned by a [`SymbolEngine`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LineInfo {
    /// Path of the source file.
    pub file: String,
    /// One-based line number.
    pub line: u32,
    /// Absolute address of the first instruction of the line.
    pub address: u64,
}

/// A symbol engine that maps PDBs into a virtual address space.
///
/// Implementations are not reentrant. All calls go through a single [`SymbolEngineAdapter`].
pub trait SymbolEngine {
    /// Prepares the engine. Called once before any other method.
    fn initialize(&mut self) -> Result<(), Error>;

    /// Loads the PDB at `path` into `[base, base + span)`.
    fn load(&mut self, path: &Path, base: u64, span: u64) -> Result<(), Error>;

    /// Unloads the PDB loaded at `base`.
    fn unload(&mut self, base: u64) -> Result<(), Error>;

    /// The span the PDB at `path` occupies, if the engine can compute it without loading.
    ///
    /// When this returns `None`, the adapter loads the PDB with [`PREFLIGHT_SPAN`] first and
    /// derives the span from the highest symbol.
    fn exact_span(&mut self, path: &Path) -> Option<u64> {
        let _ = path;
        None
    }

    /// The symbol at `address`.
    ///
    /// Engines may return the closest symbol preceding the address.
    fn symbol_at(&self, address: u64) -> Option<SymbolInfo>;

    /// The line record covering `address`.
    fn line_at(&self, address: u64) -> Option<LineInfo>;

    /// Releases all engine resources.
    fn shutdown(&mut self) -> Result<(), Error>;
}

fn round_up_mib(size: u64) -> Option<u64> {
    size.checked_add(MIB - 1).map(|size| size & !(MIB - 1))
}

/// Hands out disjoint, MiB-aligned address ranges.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressSpace {
    start: u64,
    next: u64,
    end: u64,
}

impl AddressSpace {
    /// Creates an address space over `[start, end)`.
    pub fn new(start: u64, end: u64) -> Self {
        let start = round_up_mib(start).unwrap_or(end);
        AddressSpace {
            start,
            next: start,
            end,
        }
    }

    /// Reserves a range of at least `size` bytes, rounded up to whole MiB.
    pub fn reserve(&mut self, size: u64) -> Result<u64, Error> {
        let base = self.next;
        let end = round_up_mib(size.max(1))
            .and_then(|size| base.checked_add(size))
            .filter(|&end| end <= self.end)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::ReserveFailed,
                    format!("no room for {size:#x} bytes at {base:#x}"),
                )
            })?;

        self.next = end;
        Ok(base)
    }

    /// Releases all reservations.
    pub fn release_all(&mut self) {
        self.next = self.start;
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        // Above 4 GiB and within the 47-bit user address space.
        Self::new(0x1_0000_0000, 0x7fff_0000_0000)
    }
}

/// A PDB loaded into the engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadedPdb {
    /// Path of the PDB, with a lowercase `.pdb` extension.
    pub pdb_path: PathBuf,
    /// Virtual address the PDB is loaded at.
    pub base_address: u64,
    /// Size of the virtual range reserved for the PDB.
    pub image_span: u64,
}

/// Symbol and line information for an image offset.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AddressInfo {
    /// The undecorated function name.
    pub function: Option<String>,
    /// Offset from the start of the function.
    pub function_offset: Option<u64>,
    /// Path of the source file.
    pub file: Option<String>,
    /// One-based line number.
    pub line: Option<u32>,
    /// Offset from the first instruction of the line.
    pub line_offset: Option<u64>,
}

/// Owns a [`SymbolEngine`] for the duration of a run.
///
/// The engine is initialized on construction and shut down by [`finalize`](Self::finalize), or on
/// drop if `finalize` was not called. Each PDB is loaded at most once.
pub struct SymbolEngineAdapter<E: SymbolEngine> {
    engine: E,
    space: AddressSpace,
    preflight_base: Option<u64>,
    loaded: BTreeMap<PathBuf, LoadedPdb>,
    initialized: bool,
}

impl<E: SymbolEngine> SymbolEngineAdapter<E> {
    /// Creates an adapter and initializes the engine.
    pub fn new(engine: E) -> Result<Self, Error> {
        Self::with_address_space(engine, AddressSpace::default())
    }

    /// Creates an adapter that reserves ranges from `space`.
    pub fn with_address_space(engine: E, space: AddressSpace) -> Result<Self, Error> {
        let mut adapter = SymbolEngineAdapter {
            engine,
            space,
            preflight_base: None,
            loaded: BTreeMap::new(),
            initialized: false,
        };
        adapter.init()?;
        Ok(adapter)
    }

    /// Initializes the engine.
    ///
    /// Fails with [`ErrorKind::AlreadyInitialized`] if the engine is already running.
    pub fn init(&mut self) -> Result<(), Error> {
        if self.initialized {
            return Err(ErrorKind::AlreadyInitialized.into());
        }

        self.engine
            .initialize()
            .map_err(|e| Error::new(ErrorKind::EngineInitFailed, e))?;
        self.initialized = true;
        Ok(())
    }

    /// The engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// All loaded PDBs.
    pub fn loaded(&self) -> impl Iterator<Item = &LoadedPdb> {
        self.loaded.values()
    }

    /// Loads the PDB at `pdb_path`, unless it is already loaded.
    pub fn load_pdb(&mut self, pdb_path: &Path) -> Result<&LoadedPdb, Error> {
        if !self.initialized {
            return Err(Error::new(ErrorKind::LoadFailed, "symbol engine is not initialized"));
        }

        let key = pdb_key(pdb_path).ok_or_else(|| {
            Error::new(
                ErrorKind::LoadFailed,
                format!("not a pdb file: {:?}", pdb_path.display().to_string()),
            )
        })?;

        if !self.loaded.contains_key(&key) {
            let loaded = self.load_new(pdb_path, key.clone())?;
            tracing::info!(
                pdb = %loaded.pdb_path.display(),
                base = %format!("{:#x}", loaded.base_address),
                span = %format!("{:#x}", loaded.image_span),
                "loaded pdb"
            );
            self.loaded.insert(key.clone(), loaded);
        }

        self.loaded
            .get(&key)
            .ok_or_else(|| Error::new(ErrorKind::LoadFailed, "pdb vanished after load"))
    }

    /// Loads a PDB from `path`. The key only normalizes the extension, the file is always read
    /// from `path` as given.
    fn load_new(&mut self, path: &Path, key: PathBuf) -> Result<LoadedPdb, Error> {
        let span = match self.engine.exact_span(path) {
            Some(span) => span,
            None => self.preflight(path)?,
        };

        let base = self.space.reserve(span)?;
        self.engine
            .load(path, base, span)
            .map_err(|e| Error::new(ErrorKind::LoadFailed, e))?;

        Ok(LoadedPdb {
            pdb_path: key,
            base_address: base,
            image_span: span,
        })
    }

    /// Loads the PDB with a large span to find its highest symbol.
    fn preflight(&mut self, path: &Path) -> Result<u64, Error> {
        let base = match self.preflight_base {
            Some(base) => base,
            None => {
                let base = self.space.reserve(PREFLIGHT_SPAN)?;
                self.preflight_base = Some(base);
                base
            }
        };

        self.engine
            .load(path, base, PREFLIGHT_SPAN)
            .map_err(|e| Error::new(ErrorKind::LoadFailed, e))?;

        let highest = self
            .engine
            .symbol_at(base + PREFLIGHT_SPAN - 1)
            .map_or(base, |symbol| symbol.address.max(base));

        self.engine
            .unload(base)
            .map_err(|e| Error::new(ErrorKind::UnloadFailed, e))?;

        let span = round_up_mib(highest - base)
            .and_then(|span| span.checked_add(MIB))
            .unwrap_or(PREFLIGHT_SPAN);
        tracing::debug!(pdb = %path.display(), span = %format!("{span:#x}"), "measured pdb");
        Ok(span)
    }

    /// Looks up the function and line at `offset` in a loaded PDB.
    ///
    /// Missing line information is not an error.
    pub fn resolve_address(&self, pdb_path: &Path, offset: u64) -> Result<AddressInfo, Error> {
        let loaded = pdb_key(pdb_path)
            .and_then(|key| self.loaded.get(&key))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::SymbolLookupFailed,
                    format!("pdb is not loaded: {:?}", pdb_path.display().to_string()),
                )
            })?;

        if offset >= loaded.image_span {
            tracing::debug!(
                pdb = %pdb_path.display(),
                offset = %format!("{offset:#x}"),
                "offset is outside of the pdb span"
            );
        }

        let target = loaded.base_address.wrapping_add(offset);
        let mut info = AddressInfo::default();

        if let Some(symbol) = self.engine.symbol_at(target) {
            info.function_offset = Some(target.wrapping_sub(symbol.address));
            info.function = Some(symbol.name);
        }

        if let Some(line) = self.engine.line_at(target) {
            info.line_offset = Some(target.wrapping_sub(line.address));
            info.file = Some(line.file);
            info.line = Some(line.line);
        }

        Ok(info)
    }

    /// Unloads every PDB and shuts the engine down.
    ///
    /// Unload failures are logged and do not stop the remaining PDBs from being unloaded. The
    /// first failure is returned.
    pub fn finalize(&mut self) -> Result<(), Error> {
        if !self.initialized {
            return Ok(());
        }

        let mut first_error = None;
        for (_, loaded) in std::mem::take(&mut self.loaded) {
            if let Err(e) = self.engine.unload(loaded.base_address) {
                let e = Error::new(ErrorKind::UnloadFailed, e);
                tracing::error!(pdb = %loaded.pdb_path.display(), error = %DisplayChain(&e), "failed to unload pdb");
                first_error.get_or_insert(e);
            }
        }

        self.space.release_all();
        self.preflight_base = None;
        self.initialized = false;

        if let Err(e) = self.engine.shutdown() {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<E: SymbolEngine> Drop for SymbolEngineAdapter<E> {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            tracing::error!(error = %DisplayChain(&e), "failed to finalize symbol engine");
        }
    }
}

impl<E: SymbolEngine> fmt::Debug for SymbolEngineAdapter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolEngineAdapter")
            .field("space", &self.space)
            .field("loaded", &self.loaded)
            .field("initialized", &self.initialized)
            .finish()
    }
}
