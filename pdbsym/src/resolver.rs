//! The per-frame driver: discover, load, query.

use std::fmt;
use std::path::Path;

use crate::context::{Context, DisplayChain, ModuleFrame, ResolvedFrame};
use crate::discovery::{Downloader, ImageIndexer, PdbLocator, PeIndexer, SearchLists};
use crate::download::HttpDownloader;
use crate::engine::{SymbolEngine, SymbolEngineAdapter};
use crate::error::{Error, ErrorKind};
use crate::pdb_engine::PdbEngine;

/// Counts of the terminal states reached by frames.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResolveSummary {
    /// Frames with a function name.
    pub resolved: usize,
    /// Frames that were attempted but ended without a function name.
    pub partial: usize,
    /// Frames kept as comments.
    pub comments: usize,
}

impl fmt::Display for ResolveSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} resolved, {} partially resolved, {} comments",
            self.resolved, self.partial, self.comments
        )
    }
}

/// Resolves the frames of a [`Context`].
///
/// Failures are confined to the frame they occur in: they are logged, the frame keeps what was
/// learned so far, and the next frame is attempted.
#[derive(Debug)]
pub struct Resolver<E: SymbolEngine, I, D> {
    locator: PdbLocator<I, D>,
    engine: SymbolEngineAdapter<E>,
}

impl Resolver<PdbEngine, PeIndexer, HttpDownloader> {
    /// Creates a resolver reading PE images and PDBs from disk, downloading over HTTP.
    pub fn from_context(context: &Context) -> Result<Self, Error> {
        let lists = SearchLists::from_sources(context.symbols());
        let locator = PdbLocator::new(lists, PeIndexer, HttpDownloader::default());
        let engine = SymbolEngineAdapter::new(PdbEngine::new())?;
        Ok(Self::new(locator, engine))
    }
}

impl<E, I, D> Resolver<E, I, D>
where
    E: SymbolEngine,
    I: ImageIndexer,
    D: Downloader,
{
    /// Creates a resolver from its parts.
    pub fn new(locator: PdbLocator<I, D>, engine: SymbolEngineAdapter<E>) -> Self {
        Resolver { locator, engine }
    }

    /// The PDB locator.
    pub fn locator(&self) -> &PdbLocator<I, D> {
        &self.locator
    }

    /// The symbol engine adapter.
    pub fn engine(&self) -> &SymbolEngineAdapter<E> {
        &self.engine
    }

    /// Resolves every frame of the context in input order.
    pub fn resolve(&mut self, context: &mut Context) -> ResolveSummary {
        let mut summary = ResolveSummary::default();

        for frame in context.take_resolved() {
            let frame = match frame {
                ResolvedFrame::Comment(raw) => {
                    summary.comments += 1;
                    ResolvedFrame::Comment(raw)
                }
                ResolvedFrame::Module(mut frame) => {
                    if let Err(e) = self.resolve_frame(&mut frame) {
                        tracing::error!(
                            module = frame.module_name(),
                            offset = %format!("{:#x}", frame.image_offset),
                            error = %DisplayChain(&e),
                            "failed to resolve frame"
                        );
                    }

                    if frame.is_resolved() {
                        summary.resolved += 1;
                    } else {
                        summary.partial += 1;
                    }
                    ResolvedFrame::Module(frame)
                }
            };

            context.append_resolved(frame);
        }

        tracing::info!(%summary, "resolved call stacks");
        summary
    }

    fn resolve_frame(&mut self, frame: &mut ModuleFrame) -> Result<(), Error> {
        if frame.pdb.is_none() {
            let image = frame.image.as_deref().ok_or_else(|| {
                Error::new(ErrorKind::ImageNotFound, "frame names neither image nor pdb")
            })?;

            let located = self.locator.locate(image)?;
            frame.pdb = Some(located.path);
            frame.pdb_signature = Some(located.signature);
        }

        let pdb = match frame.pdb {
            Some(ref pdb) => pdb.as_path(),
            None => return Err(ErrorKind::PdbNotFound.into()),
        };

        self.engine.load_pdb(pdb)?;
        let info = self.engine.resolve_address(pdb, frame.image_offset)?;
        log_result(pdb, frame.image_offset, info.function.as_deref());

        frame.function = info.function;
        frame.function_offset = info.function_offset;
        frame.file = info.file;
        frame.line = info.line;
        frame.line_offset = info.line_offset;

        Ok(())
    }

    /// Unloads all PDBs and shuts the engine down.
    pub fn finalize(&mut self) -> Result<(), Error> {
        self.engine.finalize()
    }
}

fn log_result(pdb: &Path, offset: u64, function: Option<&str>) {
    match function {
        Some(function) => tracing::debug!(pdb = %pdb.display(), function, "resolved frame"),
        None => tracing::warn!(
            pdb = %pdb.display(),
            offset = %format!("{offset:#x}"),
            "no symbol at offset"
        ),
    }
}
