//! A portable [`SymbolEngine`] backed by parsed PDB files.
//!
//! Each loaded PDB is placed at its base address and looked up by relative address. See
//! [`PdbEngine`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use pdbsym_debuginfo::PdbSymbols;

use crate::engine::{LineInfo, SymbolEngine, SymbolInfo};
use crate::error::{Error, ErrorKind};

/// The span given to PDBs whose sections do not cover any address.
const FALLBACK_SPAN: u64 = 1 << 20;

#[derive(Debug)]
struct Module {
    span: u64,
    symbols: PdbSymbols,
}

/// A [`SymbolEngine`] that reads PDBs directly.
///
/// The span of a PDB is computed from its section headers, so PDBs are only parsed once. Function
/// names from procedure records take precedence over public symbols at the same address.
#[derive(Debug, Default)]
pub struct PdbEngine {
    modules: BTreeMap<u64, Module>,
    parsed: HashMap<PathBuf, PdbSymbols>,
    initialized: bool,
}

impl PdbEngine {
    /// Creates a new engine.
    pub fn new() -> Self {
        Self::default()
    }

    fn module_at(&self, address: u64) -> Option<(u64, &Module)> {
        let (&base, module) = self.modules.range(..=address).next_back()?;
        (address - base < module.span).then_some((base, module))
    }

    fn module_span(image_span: u64) -> u64 {
        match image_span {
            0 => FALLBACK_SPAN,
            span => span,
        }
    }

    fn parse(path: &Path) -> Result<PdbSymbols, Error> {
        PdbSymbols::open(path).map_err(|e| {
            Error::new(
                ErrorKind::LoadFailed,
                format!("{}: {}", path.display(), crate::context::DisplayChain(&e)),
            )
        })
    }
}

impl SymbolEngine for PdbEngine {
    fn initialize(&mut self) -> Result<(), Error> {
        if self.initialized {
            return Err(ErrorKind::AlreadyInitialized.into());
        }
        self.initialized = true;
        Ok(())
    }

    fn load(&mut self, path: &Path, base: u64, span: u64) -> Result<(), Error> {
        if span == 0 {
            return Err(Error::new(ErrorKind::LoadFailed, "empty span"));
        }

        let overlaps = self.module_at(base).is_some()
            || self
                .modules
                .range(base..)
                .next()
                .map_or(false, |(&next, _)| next - base < span);
        if overlaps {
            return Err(Error::new(
                ErrorKind::LoadFailed,
                format!("range {base:#x}+{span:#x} is already in use"),
            ));
        }

        let symbols = match self.parsed.remove(path) {
            Some(symbols) => symbols,
            None => Self::parse(path)?,
        };

        tracing::debug!(
            pdb = %path.display(),
            signature = %symbols.signature(),
            functions = symbols.functions().len(),
            lines = symbols.lines().len(),
            "parsed pdb"
        );

        self.modules.insert(base, Module { span, symbols });
        Ok(())
    }

    fn unload(&mut self, base: u64) -> Result<(), Error> {
        match self.modules.remove(&base) {
            Some(_) => Ok(()),
            None => Err(Error::new(
                ErrorKind::UnloadFailed,
                format!("nothing loaded at {base:#x}"),
            )),
        }
    }

    fn exact_span(&mut self, path: &Path) -> Option<u64> {
        // Errors surface again from `load`.
        let symbols = Self::parse(path).ok()?;
        let span = Self::module_span(symbols.image_span());
        if symbols.image_span() == 0 {
            tracing::debug!(pdb = %path.display(), "pdb has no sections, using fallback span");
        }
        self.parsed.insert(path.to_path_buf(), symbols);
        Some(span)
    }

    fn symbol_at(&self, address: u64) -> Option<SymbolInfo> {
        let (base, module) = self.module_at(address)?;
        let function = module.symbols.lookup_function(address - base)?;
        Some(SymbolInfo {
            name: function.name.clone(),
            address: base + function.address,
        })
    }

    fn line_at(&self, address: u64) -> Option<LineInfo> {
        let (base, module) = self.module_at(address)?;
        let line = module.symbols.lookup_line(address - base)?;
        Some(LineInfo {
            file: line.file.clone(),
            line: line.line,
            address: base + line.address,
        })
    }

    fn shutdown(&mut self) -> Result<(), Error> {
        self.modules.clear();
        self.parsed.clear();
        self.initialized = false;
        Ok(())
    }
}
