//! Support for Program Database, the debug companion format on Windows.
//!
//! [`PdbSymbols`] reads a PDB once and keeps owned, sorted function and line tables. Lookups are
//! then plain binary searches over relative virtual addresses.

use std::error::Error;
use std::fmt;
use std::io::Cursor;
use std::path::Path;

use pdb_addr2line::pdb::{
    self, AddressMap, FallibleIterator, LineProgram, ModuleInfo, StringTable, SymbolData,
};
use thiserror::Error;

use pdbsym_common::{ByteView, PdbSignature, Uuid};

use crate::base::*;

type Pdb<'data> = pdb::PDB<'data, Cursor<&'data [u8]>>;

const MAGIC_BIG: &[u8] = b"Microsoft C/C++ MSF 7.00\r\n\x1a\x44\x53\x00\x00\x00";

/// The kind of a [`PdbError`].
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PdbErrorKind {
    /// The PDB file could not be opened or read.
    Io,

    /// The PDB file is corrupted. See the cause for more information.
    BadObject,
}

impl fmt::Display for PdbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "failed to read pdb file"),
            Self::BadObject => write!(f, "invalid pdb file"),
        }
    }
}

/// An error when dealing with [`PdbSymbols`].
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct PdbError {
    kind: PdbErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl PdbError {
    fn new<E>(kind: PdbErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`PdbErrorKind`] for this error.
    pub fn kind(&self) -> PdbErrorKind {
        self.kind
    }
}

impl From<PdbErrorKind> for PdbError {
    fn from(kind: PdbErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<pdb::Error> for PdbError {
    fn from(e: pdb::Error) -> Self {
        Self::new(PdbErrorKind::BadObject, e)
    }
}

/// Function and line tables of a PDB.
///
/// All addresses are relative to the start of the image the PDB belongs to. Function names come
/// from procedure records in the module streams, which are already undecorated. Public symbols
/// fill the gaps for code without private symbols; their decorated names are undecorated with
/// `msvc-demangler`.
#[derive(Clone, Debug)]
pub struct PdbSymbols {
    signature: PdbSignature,
    functions: FunctionTable,
    lines: LineTable,
    image_span: u64,
}

impl PdbSymbols {
    /// Tests whether the buffer could contain a PDB.
    pub fn test(data: &[u8]) -> bool {
        // NB: "Microsoft C/C++ program database 2.00" is not supported by the pdb crate.
        data.starts_with(MAGIC_BIG)
    }

    /// Reads and parses the PDB at the given path.
    pub fn open(path: &Path) -> Result<Self, PdbError> {
        let view = ByteView::open(path).map_err(|e| PdbError::new(PdbErrorKind::Io, e))?;
        Self::parse(&view)
    }

    /// Parses a PDB from the given slice.
    pub fn parse(data: &[u8]) -> Result<Self, PdbError> {
        if !Self::test(data) {
            return Err(PdbError::new(PdbErrorKind::BadObject, "missing MSF 7.00 header"));
        }

        let mut pdb = Pdb::open(Cursor::new(data))?;
        let signature = read_signature(&mut pdb)?;
        let debug_info = pdb.debug_information()?;
        let address_map = pdb.address_map()?;

        // The string table is missing in some PDBs, which only means that file names are unknown.
        let string_table = match pdb.string_table() {
            Ok(string_table) => Some(string_table),
            Err(pdb::Error::StreamNameNotFound) => None,
            Err(e) => return Err(e.into()),
        };

        let mut functions = Vec::new();
        let mut lines = Vec::new();

        let mut modules = debug_info.modules()?;
        while let Some(module) = modules.next()? {
            let module_info = match pdb.module_info(&module)? {
                Some(module_info) => module_info,
                None => continue,
            };

            let reader = ModuleReader {
                address_map: &address_map,
                string_table: string_table.as_ref(),
            };
            reader.collect_functions(&module_info, &mut functions)?;
            reader.collect_lines(&module_info, &mut lines)?;
        }

        collect_public_symbols(&mut pdb, &address_map, &mut functions)?;

        let functions = FunctionTable::from(functions);
        let lines = LineTable::from(lines);

        let image_span = match pdb.sections() {
            Ok(Some(sections)) => sections
                .iter()
                .map(|s| {
                    let size = s.virtual_size.max(s.size_of_raw_data);
                    u64::from(s.virtual_address) + u64::from(size)
                })
                .max(),
            _ => None,
        }
        .into_iter()
        .chain(functions.max_address())
        .chain(lines.max_address())
        .max()
        .unwrap_or(0);

        Ok(PdbSymbols {
            signature,
            functions,
            lines,
            image_span,
        })
    }

    /// Reads only the signature of the PDB at the given path.
    ///
    /// This skips the symbol and line streams, so it is much cheaper than [`open`](Self::open).
    pub fn read_signature(path: &Path) -> Result<PdbSignature, PdbError> {
        let view = ByteView::open(path).map_err(|e| PdbError::new(PdbErrorKind::Io, e))?;
        if !Self::test(&view) {
            return Err(PdbError::new(PdbErrorKind::BadObject, "missing MSF 7.00 header"));
        }

        let mut pdb = Pdb::open(Cursor::new(view.as_slice()))?;
        read_signature(&mut pdb)
    }

    /// The signature stored in the PDB itself.
    pub fn signature(&self) -> PdbSignature {
        self.signature
    }

    /// The number of bytes of image address space covered by this PDB.
    ///
    /// This is computed from the section headers and covers every function and line record.
    pub fn image_span(&self) -> u64 {
        self.image_span
    }

    /// All functions, sorted by address.
    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// All line records, sorted by address.
    pub fn lines(&self) -> &LineTable {
        &self.lines
    }

    /// Looks up the function covering the relative address.
    pub fn lookup_function(&self, rva: u64) -> Option<&FunctionRecord> {
        self.functions.lookup(rva)
    }

    /// Looks up the line record covering the relative address.
    pub fn lookup_line(&self, rva: u64) -> Option<&LineRecord> {
        self.lines.lookup(rva)
    }
}

struct ModuleReader<'a, 'd> {
    address_map: &'a AddressMap<'d>,
    string_table: Option<&'a StringTable<'d>>,
}

impl<'a, 'd> ModuleReader<'a, 'd> {
    fn collect_functions(
        &self,
        module: &ModuleInfo<'_>,
        functions: &mut Vec<FunctionRecord>,
    ) -> Result<(), PdbError> {
        let mut symbols = module.symbols()?;
        while let Some(symbol) = symbols.next()? {
            // The pdb crate does not implement every symbol kind. Skip what it cannot parse.
            let procedure = match symbol.parse() {
                Ok(SymbolData::Procedure(procedure)) => procedure,
                _ => continue,
            };

            let address = match procedure.offset.to_rva(self.address_map) {
                Some(rva) => u64::from(rva.0),
                None => continue,
            };

            functions.push(FunctionRecord {
                address,
                size: procedure.len.into(),
                name: procedure.name.to_string().into_owned(),
            });
        }

        Ok(())
    }

    fn collect_lines(
        &self,
        module: &ModuleInfo<'_>,
        lines: &mut Vec<LineRecord>,
    ) -> Result<(), PdbError> {
        let program = module.line_program()?;
        let mut line_iter = program.lines();

        while let Some(line_info) = line_iter.next()? {
            let address = match line_info.offset.to_rva(self.address_map) {
                Some(rva) => u64::from(rva.0),
                None => continue,
            };

            // skip 0-sized line infos
            let size = line_info.length.map(u64::from);
            if size == Some(0) {
                continue;
            }

            lines.push(LineRecord {
                address,
                size,
                file: self.file_name(&program, line_info.file_index)?,
                line: line_info.line_start,
            });
        }

        Ok(())
    }

    fn file_name(
        &self,
        program: &LineProgram<'_>,
        index: pdb::FileIndex,
    ) -> Result<String, PdbError> {
        let file_info = program.get_file_info(index)?;
        Ok(match self.string_table {
            Some(string_table) => file_info
                .name
                .to_raw_string(string_table)?
                .to_string()
                .into_owned(),
            None => String::new(),
        })
    }
}

fn read_signature(pdb: &mut Pdb<'_>) -> Result<PdbSignature, PdbError> {
    let pdb_info = pdb.pdb_information()?;
    let debug_info = pdb.debug_information()?;

    // Prefer the age from the debug information stream, it matches the image more reliably
    // than the PDB info header.
    let age = debug_info.age().unwrap_or(pdb_info.age);
    let guid = Uuid::from_slice(pdb_info.guid.as_bytes())
        .map_err(|e| PdbError::new(PdbErrorKind::BadObject, e))?;

    Ok(PdbSignature::from_parts(guid, age))
}

fn collect_public_symbols(
    pdb: &mut Pdb<'_>,
    address_map: &AddressMap<'_>,
    functions: &mut Vec<FunctionRecord>,
) -> Result<(), PdbError> {
    let public_syms = pdb.global_symbols()?;
    let mut symbols = public_syms.iter();

    while let Some(symbol) = symbols.next()? {
        let public = match symbol.parse() {
            Ok(SymbolData::Public(public)) if public.function => public,
            _ => continue,
        };

        let address = match public.offset.to_rva(address_map) {
            Some(rva) => u64::from(rva.0),
            None => continue,
        };

        functions.push(FunctionRecord {
            address,
            // Computed from the next symbol in `FunctionTable`.
            size: 0,
            name: undecorate(&public.name.to_string()),
        });
    }

    Ok(())
}

/// Undecorates an MSVC symbol name.
///
/// Names that are not decorated, or fail to undecorate, are returned with a leading `_` of the C
/// calling convention removed.
pub fn undecorate(name: &str) -> String {
    use msvc_demangler::DemangleFlags;

    if name.starts_with('?') || name.starts_with("@?") {
        let flags = DemangleFlags::NAME_ONLY | DemangleFlags::NO_FUNCTION_RETURNS;
        if let Ok(undecorated) = msvc_demangler::demangle(name, flags) {
            return undecorated;
        }
    }

    name.strip_prefix('_').unwrap_or(name).to_owned()
}
