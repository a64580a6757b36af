//! The in-memory state of one run: inputs and resolved frames.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};

use pdbsym_common::PdbSignature;

use crate::error::{Error, ErrorKind};
use crate::frame::parse_frame;

/// A configured location to look for PDBs.
///
/// A source is valid when a `server` comes with a `cache`, or when it has at least a `cache` or a
/// `direct` directory.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct SymbolSource {
    /// Base URL of a symbol server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// A cache directory using the `<name>/<signature>/<name>` layout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<PathBuf>,
    /// A flat directory holding PDBs by file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct: Option<PathBuf>,
    /// Whether a missing `cache` directory is created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_create_cache_dir: Option<bool>,
}

/// Symbol information resolved for a frame that names a module.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModuleFrame {
    /// Absolute path of the image.
    pub image: Option<PathBuf>,
    /// Absolute path of the PDB.
    pub pdb: Option<PathBuf>,
    /// Signature of the PDB, when it was located through the image.
    pub pdb_signature: Option<PdbSignature>,
    /// Offset from the image base.
    pub image_offset: u64,
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

impl ModuleFrame {
    /// The name shown for this frame: the file name of the image, or of the PDB.
    pub fn module_name(&self) -> &str {
        self.image
            .as_deref()
            .or(self.pdb.as_deref())
            .and_then(|p| p.to_str())
            .map(pdbsym_common::file_name)
            .unwrap_or_default()
    }

    /// Whether a function was found for this frame.
    pub fn is_resolved(&self) -> bool {
        self.function.is_some()
    }
}

/// A frame in the output.
///
/// Frames that cannot be parsed, or whose module cannot be found, are kept as comments with the
/// raw input so that the output lines up with the input.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(into = "crate::output::FrameRepr", try_from = "crate::output::FrameRepr")]
pub enum ResolvedFrame {
    /// The raw input of a frame that could not be used.
    Comment(String),
    /// A frame naming an image or PDB.
    Module(ModuleFrame),
}

impl ResolvedFrame {
    /// Whether this frame is a comment.
    pub fn is_comment(&self) -> bool {
        matches!(self, Self::Comment(_))
    }

    /// The module frame, unless this is a comment.
    pub fn as_module(&self) -> Option<&ModuleFrame> {
        match self {
            Self::Comment(_) => None,
            Self::Module(frame) => Some(frame),
        }
    }
}

/// Inputs and results of a run.
///
/// The context holds the configured symbol sources, the path overrides used for bare module names,
/// the raw frame strings, and one [`ResolvedFrame`] per raw frame in input order.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Context {
    symbols: Vec<SymbolSource>,
    #[serde(serialize_with = "serialize_path_values")]
    paths: BTreeMap<String, PathBuf>,
    callstacks: Vec<String>,
    resolved_callstacks: Vec<ResolvedFrame>,
}

fn serialize_path_values<S>(paths: &BTreeMap<String, PathBuf>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(paths.values())
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// The configured symbol sources, in declaration order.
    pub fn symbols(&self) -> &[SymbolSource] {
        &self.symbols
    }

    /// The path overrides, keyed by file name.
    pub fn paths(&self) -> &BTreeMap<String, PathBuf> {
        &self.paths
    }

    /// The raw frame strings.
    pub fn callstacks(&self) -> &[String] {
        &self.callstacks
    }

    /// The resolved frames, in input order.
    pub fn resolved(&self) -> &[ResolvedFrame] {
        &self.resolved_callstacks
    }

    /// Adds a symbol source.
    pub fn add_symbol_source(&mut self, source: SymbolSource) {
        self.symbols.push(source);
    }

    /// Adds a path override, keyed by its file name.
    ///
    /// The first entry for a file name wins. Later entries with the same file name are ignored.
    pub fn add_path(&mut self, path: PathBuf) -> Result<(), Error> {
        let name = path
            .to_str()
            .map(pdbsym_common::file_name)
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::Parse,
                    format!("invalid path {:?}", path.display().to_string()),
                )
            })?
            .to_owned();

        self.paths.entry(name).or_insert(path);
        Ok(())
    }

    /// Adds a raw frame string.
    pub fn add_callstack(&mut self, frame: impl Into<String>) {
        self.callstacks.push(frame.into());
    }

    /// Appends a resolved frame.
    pub fn append_resolved(&mut self, frame: ResolvedFrame) {
        self.resolved_callstacks.push(frame);
    }

    /// Removes and returns all resolved frames.
    pub fn take_resolved(&mut self) -> Vec<ResolvedFrame> {
        std::mem::take(&mut self.resolved_callstacks)
    }

    /// Parses every raw frame into a [`ResolvedFrame`].
    ///
    /// Relative module names are resolved against the current directory. See
    /// [`parse_callstacks_in`](Self::parse_callstacks_in).
    pub fn parse_callstacks(&mut self, strict: bool) -> Result<(), Error> {
        let cwd = env::current_dir()?;
        self.parse_callstacks_in(strict, &cwd)
    }

    /// Parses every raw frame into a [`ResolvedFrame`], resolving relative names against `cwd`.
    ///
    /// A relative module name is first looked up in the path overrides. Otherwise it is joined to
    /// `cwd`, and must exist there. Frames that fail to parse, or name a module that cannot be
    /// found, become comments. With `strict`, the first such failure is returned instead.
    pub fn parse_callstacks_in(&mut self, strict: bool, cwd: &Path) -> Result<(), Error> {
        let mut resolved = Vec::with_capacity(self.callstacks.len());

        for raw in &self.callstacks {
            match self.parse_callstack(raw, cwd) {
                Ok(frame) => resolved.push(ResolvedFrame::Module(frame)),
                Err(e) if strict => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %DisplayChain(&e), "keeping frame as comment");
                    resolved.push(ResolvedFrame::Comment(raw.clone()));
                }
            }
        }

        self.resolved_callstacks.extend(resolved);
        Ok(())
    }

    fn parse_callstack(&self, raw: &str, cwd: &Path) -> Result<ModuleFrame, Error> {
        let parsed = parse_frame(raw)?;

        let mut path = PathBuf::from(parsed.image);
        if path.is_relative() {
            match self.paths.get(parsed.image) {
                Some(overridden) => path = overridden.clone(),
                None => {
                    path = cwd.join(path);
                    if !path.exists() {
                        let what = if parsed.is_pdb { "pdb" } else { "image" };
                        return Err(Error::new(
                            ErrorKind::ImageNotFound,
                            format!("cannot find {what} file {:?} of frame {raw:?}", parsed.image),
                        ));
                    }
                }
            }
        }

        let mut frame = ModuleFrame {
            image_offset: parsed.offset,
            ..ModuleFrame::default()
        };
        if parsed.is_pdb {
            frame.pdb = Some(path);
        } else {
            frame.image = Some(path);
        }

        Ok(frame)
    }
}

/// Formats an error with all of its sources, separated by colons.
pub(crate) struct DisplayChain<'a>(pub &'a (dyn std::error::Error + 'static));

impl std::fmt::Display for DisplayChain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    fn context(frames: &[&str]) -> Context {
        let mut context = Context::new();
        for frame in frames {
            context.add_callstack(*frame);
        }
        context
    }

    #[test]
    fn test_bad_frame_becomes_comment() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = context(&["notes.txt+0x10"]);
        context.parse_callstacks_in(false, dir.path()).unwrap();

        assert_eq!(
            context.resolved(),
            &[ResolvedFrame::Comment("notes.txt+0x10".into())]
        );
    }

    #[test]
    fn test_bad_frame_strict() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = context(&["notes.txt+0x10"]);
        let err = context.parse_callstacks_in(true, dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_path_override() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = context(&["mylib.dll+0x1A4"]);
        context
            .add_path(PathBuf::from("/opt/app/bin/mylib.dll"))
            .unwrap();
        context.parse_callstacks_in(false, dir.path()).unwrap();

        let frame = context.resolved()[0].as_module().unwrap();
        assert_eq!(frame.image.as_deref(), Some(Path::new("/opt/app/bin/mylib.dll")));
        assert_eq!(frame.image_offset, 0x1a4);
        assert_eq!(frame.pdb, None);
    }

    #[test]
    fn test_relative_image_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.exe"), b"MZ").unwrap();

        let mut context = context(&["app.exe+16", "other.exe+16"]);
        context.parse_callstacks_in(false, dir.path()).unwrap();

        let frame = context.resolved()[0].as_module().unwrap();
        assert_eq!(frame.image.as_deref(), Some(dir.path().join("app.exe").as_path()));
        assert!(context.resolved()[1].is_comment());
    }

    #[test]
    fn test_missing_image_strict() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = context(&["other.exe+16"]);
        let err = context.parse_callstacks_in(true, dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImageNotFound);
    }

    #[test]
    fn test_pdb_frame_sets_pdb() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = context(&["/sym/mylib.pdb+0x1000"]);
        context.parse_callstacks_in(false, dir.path()).unwrap();

        let frame = context.resolved()[0].as_module().unwrap();
        assert_eq!(frame.pdb.as_deref(), Some(Path::new("/sym/mylib.pdb")));
        assert_eq!(frame.image, None);
        assert_eq!(frame.module_name(), "mylib.pdb");
    }

    #[test]
    fn test_add_path_windows_style() {
        let mut context = Context::new();
        context
            .add_path(PathBuf::from("D:\\build\\bin\\mylib.dll"))
            .unwrap();
        assert!(context.paths().contains_key("mylib.dll"));
        assert!(context.add_path(PathBuf::from("/")).is_err());
    }

    #[test]
    fn test_add_path_keeps_first() {
        let mut context = Context::new();
        context.add_path(PathBuf::from("/first/app.exe")).unwrap();
        context.add_path(PathBuf::from("/second/app.exe")).unwrap();

        assert_eq!(
            context.paths().get("app.exe"),
            Some(&PathBuf::from("/first/app.exe"))
        );
        assert_eq!(context.paths().len(), 1);
    }

    #[test]
    fn test_order_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let mut context = context(&["a.dll+1", "junk", "b.dll+2"]);
        context.add_path(PathBuf::from("/x/a.dll")).unwrap();
        context.add_path(PathBuf::from("/x/b.dll")).unwrap();
        context.parse_callstacks_in(false, dir.path()).unwrap();

        let kinds: Vec<_> = context
            .resolved()
            .iter()
            .map(|f| f.as_module().map(|m| m.image_offset))
            .collect();
        assert_eq!(kinds, vec![Some(1), None, Some(2)]);
    }
}
