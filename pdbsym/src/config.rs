//! Reading the JSON configuration and the plain-text input.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use pdbsym_common::normalize_path;

use crate::context::{Context, SymbolSource};
use crate::error::{Error, ErrorKind};

const PATHS_SECTION: &str = "--- paths";
const CALLSTACKS_SECTION: &str = "--- callstacks";

/// The configuration document as written by users.
///
/// Unknown keys are ignored, which allows a JSON dump of a [`Context`] to be read back.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    symbols: Vec<SymbolSourceConfig>,
    paths: Vec<String>,
    callstacks: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SymbolSourceConfig {
    server: Option<String>,
    cache: Option<String>,
    direct: Option<String>,
    force_create_cache_dir: Option<bool>,
}

fn parse_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Parse, message.into())
}

/// Makes `path` absolute against `root` and checks that it is a directory.
fn resolve_dir(path: &str, root: Option<&Path>, create: bool) -> Result<PathBuf, Error> {
    let path = Path::new(path);
    let path = match root {
        Some(root) => normalize_path(root, path),
        None if path.is_absolute() => path.to_path_buf(),
        None => {
            return Err(parse_error(format!(
                "relative path can't be used without a config file: {:?}",
                path.display().to_string()
            )))
        }
    };

    if create && !path.exists() {
        tracing::info!(path = %path.display(), "creating cache directory");
        fs::create_dir_all(&path).map_err(|e| {
            Error::new(
                ErrorKind::Io,
                format!("failed to create directory {}: {e}", path.display()),
            )
        })?;
    }

    if !path.is_dir() {
        return Err(parse_error(format!(
            "{:?} is not a valid directory",
            path.display().to_string()
        )));
    }

    Ok(path)
}

impl SymbolSourceConfig {
    fn resolve(self, root: Option<&Path>) -> Result<Option<SymbolSource>, Error> {
        if self.server.is_some() && self.cache.is_none() {
            return Err(parse_error(
                "a valid \"cache\" directory is needed when specifying a server",
            ));
        }

        if self.server.is_none() && self.cache.is_none() && self.direct.is_none() {
            return Ok(None);
        }

        let create = self.force_create_cache_dir.unwrap_or(false);
        let cache = self
            .cache
            .map(|cache| resolve_dir(&cache, root, create))
            .transpose()?;
        let direct = self
            .direct
            .map(|direct| resolve_dir(&direct, root, false))
            .transpose()?;

        Ok(Some(SymbolSource {
            server: self.server.map(|s| s.trim_end_matches('/').to_owned()),
            cache,
            direct,
            force_create_cache_dir: self.force_create_cache_dir,
        }))
    }
}

impl Context {
    fn add_path_entry(&mut self, entry: &str, root: Option<&Path>) -> Result<(), Error> {
        if entry.is_empty() {
            return Err(parse_error("empty path entry"));
        }

        let path = Path::new(entry);
        let path = match root {
            Some(root) if path.is_relative() => normalize_path(root, path),
            _ => path.to_path_buf(),
        };
        self.add_path(path)
    }

    /// Reads a JSON configuration.
    ///
    /// Relative directories are resolved against `root`. The `callstacks` of the document are
    /// only taken when the context does not have any frames yet.
    pub fn read_config<R: Read>(&mut self, reader: R, root: Option<&Path>) -> Result<(), Error> {
        let config: ConfigFile = serde_json::from_reader(reader)?;

        for source in config.symbols {
            if let Some(source) = source.resolve(root)? {
                self.add_symbol_source(source);
            }
        }

        for entry in &config.paths {
            self.add_path_entry(entry, root)?;
        }

        if self.callstacks().is_empty() {
            for frame in config.callstacks {
                self.add_callstack(frame);
            }
        }

        Ok(())
    }

    /// Reads a JSON configuration file. Relative paths are resolved against its directory.
    pub fn read_config_file(&mut self, path: &Path) -> Result<(), Error> {
        let file = open_file(path)?;
        self.read_config(BufReader::new(file), path.parent())
            .map_err(|e| in_file(e, "config file", path))
    }

    /// Reads plain-text input.
    ///
    /// Lines after `--- paths` are path overrides, lines after `--- callstacks` are raw frames.
    /// Empty lines and lines before the first section marker are ignored.
    pub fn read_text<R: BufRead>(&mut self, reader: R, root: Option<&Path>) -> Result<(), Error> {
        enum Section {
            None,
            Paths,
            Callstacks,
        }

        let mut section = Section::None;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            if line.starts_with(PATHS_SECTION) {
                section = Section::Paths;
            } else if line.starts_with(CALLSTACKS_SECTION) {
                section = Section::Callstacks;
            } else {
                match section {
                    Section::None => {}
                    Section::Paths => self.add_path_entry(line.trim(), root)?,
                    Section::Callstacks => self.add_callstack(line),
                }
            }
        }

        Ok(())
    }

    /// Reads a plain-text input file. Relative paths are resolved against its directory.
    pub fn read_text_file(&mut self, path: &Path) -> Result<(), Error> {
        let file = open_file(path)?;
        self.read_text(BufReader::new(file), path.parent())
            .map_err(|e| in_file(e, "input text file", path))
    }
}

fn open_file(path: &Path) -> Result<File, Error> {
    File::open(path).map_err(|e| {
        Error::new(
            ErrorKind::Io,
            io::Error::new(e.kind(), format!("failed to open {}: {e}", path.display())),
        )
    })
}

fn in_file(error: Error, what: &str, path: &Path) -> Error {
    let kind = error.kind();
    let message = format!(
        "error in {what} {}: {}",
        path.display(),
        crate::context::DisplayChain(&error)
    );
    Error::new(kind, message)
}
