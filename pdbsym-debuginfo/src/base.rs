use std::fmt;
use std::ops::Deref;

/// A function with its address range, as recorded in a PDB.
#[derive(Clone, Eq, PartialEq)]
pub struct FunctionRecord {
    /// Relative address of the first instruction.
    pub address: u64,
    /// Size of the function in bytes. Zero if unknown.
    pub size: u64,
    /// The undecorated function name.
    pub name: String,
}

impl FunctionRecord {
    /// Determines whether the given address is covered by this function.
    ///
    /// If the size is unknown, every address at or after the start is considered covered.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && (self.size == 0 || address < self.address + self.size)
    }

    /// The first address after this function, if the size is known.
    pub fn end_address(&self) -> Option<u64> {
        match self.size {
            0 => None,
            size => self.address.checked_add(size),
        }
    }
}

impl fmt::Debug for FunctionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRecord")
            .field("name", &self.name)
            .field("address", &format_args!("{:#x}", self.address))
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}

/// A sorted list of functions, suitable for quick lookups.
///
/// Records are sorted by address. When multiple records start at the same address, the one that
/// was inserted first wins, so callers list more precise sources (procedure records) before
/// fallback sources (public symbols). Records without a size are assigned the distance to the
/// next record.
///
/// ```
/// use pdbsym_debuginfo::{FunctionRecord, FunctionTable};
///
/// let table = FunctionTable::from(vec![
///     FunctionRecord { name: "B".into(), address: 0x2000, size: 0 },
///     FunctionRecord { name: "A".into(), address: 0x1000, size: 0 },
/// ]);
///
/// assert_eq!(table[0].size, 0x1000);
/// assert_eq!(table.lookup(0x1abc).map(|f| f.name.as_str()), Some("A"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct FunctionTable {
    functions: Vec<FunctionRecord>,
}

impl FunctionTable {
    /// Looks up the function covering the given address.
    pub fn lookup(&self, address: u64) -> Option<&FunctionRecord> {
        match self.functions.binary_search_by_key(&address, |f| f.address) {
            Ok(index) => Some(&self.functions[index]),
            Err(0) => None,
            Err(next_index) => {
                let function = &self.functions[next_index - 1];
                function.contains(address).then_some(function)
            }
        }
    }

    /// The highest end address of any function with a known size.
    pub fn max_address(&self) -> Option<u64> {
        self.functions.iter().filter_map(|f| f.end_address()).max()
    }
}

impl Deref for FunctionTable {
    type Target = [FunctionRecord];

    fn deref(&self) -> &Self::Target {
        &self.functions
    }
}

impl From<Vec<FunctionRecord>> for FunctionTable {
    fn from(mut functions: Vec<FunctionRecord>) -> Self {
        // Stable, so that the first inserted record at an address survives the dedup below.
        functions.sort_by_key(|f| f.address);
        functions.dedup_by(|next, function| {
            if function.size == 0 {
                function.size = next.address - function.address;
            }
            function.address == next.address
        });

        FunctionTable { functions }
    }
}

impl FromIterator<FunctionRecord> for FunctionTable {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = FunctionRecord>,
    {
        Vec::from_iter(iter).into()
    }
}

/// A line record mapping a range of instructions to a source line.
#[derive(Clone, Eq, PartialEq)]
pub struct LineRecord {
    /// Relative address of the first instruction of this line.
    pub address: u64,
    /// Number of bytes covered by this line, if known.
    pub size: Option<u64>,
    /// Path of the source file, as stored in the PDB.
    pub file: String,
    /// One-based line number.
    pub line: u32,
}

impl LineRecord {
    fn contains(&self, address: u64) -> bool {
        address >= self.address
            && match self.size {
                Some(size) => address - self.address < size,
                None => true,
            }
    }
}

impl fmt::Debug for LineRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineRecord")
            .field("address", &format_args!("{:#x}", self.address))
            .field("size", &self.size.map(|s| format!("{s:#x}")))
            .field("file", &self.file)
            .field("line", &self.line)
            .finish()
    }
}

/// A sorted list of line records.
///
/// Consecutive records that point at the same file and line are merged.
#[derive(Clone, Debug, Default)]
pub struct LineTable {
    lines: Vec<LineRecord>,
}

impl LineTable {
    /// Looks up the line record covering the given address.
    pub fn lookup(&self, address: u64) -> Option<&LineRecord> {
        let index = match self.lines.binary_search_by_key(&address, |l| l.address) {
            Ok(index) => index,
            Err(0) => return None,
            Err(next_index) => next_index - 1,
        };

        let line = &self.lines[index];
        line.contains(address).then_some(line)
    }

    /// The highest end address of any line record with a known size.
    pub fn max_address(&self) -> Option<u64> {
        self.lines
            .iter()
            .filter_map(|l| l.size.and_then(|size| l.address.checked_add(size)))
            .max()
    }
}

impl Deref for LineTable {
    type Target = [LineRecord];

    fn deref(&self) -> &Self::Target {
        &self.lines
    }
}

impl From<Vec<LineRecord>> for LineTable {
    fn from(mut lines: Vec<LineRecord>) -> Self {
        lines.sort_by_key(|line| line.address);

        // Records that only differ in columns are split by the compiler. Merge them so that the
        // line offset is measured from the first instruction of the line.
        lines.dedup_by(|current, prev| {
            let prev_end = prev.size.and_then(|size| prev.address.checked_add(size));
            let is_consecutive = prev_end == Some(current.address);
            if is_consecutive && prev.file == current.file && prev.line == current.line {
                prev.size = prev
                    .size
                    .map(|size| size.saturating_add(current.size.unwrap_or(0)));
                return true;
            }
            false
        });

        LineTable { lines }
    }
}
