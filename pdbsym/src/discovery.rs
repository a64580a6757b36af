//! Locating the PDB that belongs to an image.
//!
//! PDBs are searched in this order, stopping at the first hit:
//!
//!  1. Cache directories using the `<name>/<signature>/<name>` layout.
//!  2. Flat directories holding PDBs by file name.
//!  3. Symbol servers, whose responses are stored in their cache directory. This step only runs
//!     the first time an image is looked up, and is followed by another pass over the caches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use pdbsym_common::{ImageIdentity, PdbIdentity, PdbSignature};
use pdbsym_debuginfo::{pe, PdbSymbols};

use crate::context::{DisplayChain, SymbolSource};
use crate::error::{Error, ErrorKind};

/// Reads the debug identity of images and PDBs.
pub trait ImageIndexer {
    /// Reads the PDB identity declared by the image at `path`.
    fn index_image(&mut self, path: &Path) -> Result<ImageIdentity, Error>;

    /// Reads the signature stored in the PDB at `path`, if it can be read.
    fn pdb_signature(&mut self, path: &Path) -> Option<PdbSignature>;
}

/// Fetches a file over the network.
pub trait Downloader {
    /// Downloads `url` and stores the body at `dest`.
    ///
    /// The file at `dest` must only appear once the body was received completely. Existing files
    /// are never replaced.
    fn download(&mut self, url: &str, dest: &Path) -> Result<(), Error>;
}

/// Reads identities from PE images and PDB files on disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct PeIndexer;

impl ImageIndexer for PeIndexer {
    fn index_image(&mut self, path: &Path) -> Result<ImageIdentity, Error> {
        Ok(pe::index_image(path)?)
    }

    fn pdb_signature(&mut self, path: &Path) -> Option<PdbSignature> {
        match PdbSymbols::read_signature(path) {
            Ok(signature) => Some(signature),
            Err(e) => {
                let error = DisplayChain(&e);
                tracing::debug!(pdb = %path.display(), %error, "cannot read pdb signature");
                None
            }
        }
    }
}

/// A symbol server and the cache directory its downloads go to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SymbolServer {
    /// Base URL without trailing slash.
    pub url: String,
    /// The cache directory downloads are stored in.
    pub cache: PathBuf,
}

impl SymbolServer {
    /// The URL of a PDB on this server.
    pub fn pdb_url(&self, pdb: &PdbIdentity) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), pdb.server_path())
    }
}

/// The ordered search locations derived from the configured symbol sources.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SearchLists {
    /// Cache directories, from every source with a `cache`.
    pub storage: Vec<PathBuf>,
    /// Flat directories, from every source with a `direct`.
    pub direct: Vec<PathBuf>,
    /// Symbol servers, from every source with both `server` and `cache`.
    pub servers: Vec<SymbolServer>,
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) {
    if !list.contains(&item) {
        list.push(item);
    }
}

impl SearchLists {
    /// Builds the search lists in declaration order, dropping duplicates.
    pub fn from_sources(sources: &[SymbolSource]) -> Self {
        let mut lists = SearchLists::default();

        for source in sources {
            if let Some(ref cache) = source.cache {
                push_unique(&mut lists.storage, cache.clone());
                if let Some(ref url) = source.server {
                    push_unique(
                        &mut lists.servers,
                        SymbolServer {
                            url: url.clone(),
                            cache: cache.clone(),
                        },
                    );
                }
            }

            if let Some(ref direct) = source.direct {
                push_unique(&mut lists.direct, direct.clone());
            }
        }

        lists
    }
}

/// The outcome of a successful search.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocatedPdb {
    /// The local path of the PDB.
    pub path: PathBuf,
    /// The signature the image asked for.
    pub signature: PdbSignature,
}

/// Finds PDBs for images, remembering everything it has learned.
///
/// Images are indexed once per path. Located PDBs are remembered per [`PdbIdentity`], so images
/// sharing an identity share the PDB.
#[derive(Debug)]
pub struct PdbLocator<I, D> {
    lists: SearchLists,
    indexer: I,
    downloader: D,
    images: HashMap<PathBuf, ImageIdentity>,
    located: HashMap<PdbIdentity, PathBuf>,
}

impl<I: ImageIndexer, D: Downloader> PdbLocator<I, D> {
    /// Creates a locator over the given search lists.
    pub fn new(lists: SearchLists, indexer: I, downloader: D) -> Self {
        PdbLocator {
            lists,
            indexer,
            downloader,
            images: HashMap::new(),
            located: HashMap::new(),
        }
    }

    /// The search lists.
    pub fn lists(&self) -> &SearchLists {
        &self.lists
    }

    /// The image indexer.
    pub fn indexer(&self) -> &I {
        &self.indexer
    }

    /// The downloader.
    pub fn downloader(&self) -> &D {
        &self.downloader
    }

    /// Locates the PDB for the image at `image_path`.
    pub fn locate(&mut self, image_path: &Path) -> Result<LocatedPdb, Error> {
        let first_time = !self.images.contains_key(image_path);
        let identity = match self.images.get(image_path) {
            Some(identity) => identity.pdb.clone(),
            None => {
                let image = self.indexer.index_image(image_path)?;
                let identity = image.pdb.clone();
                self.images.insert(image_path.to_path_buf(), image);
                identity
            }
        };

        let signature = identity.signature;
        let found = |path: &Path| LocatedPdb {
            path: path.to_path_buf(),
            signature,
        };

        if let Some(path) = self.located.get(&identity) {
            tracing::debug!(pdb = %path.display(), "pdb already located");
            return Ok(found(path));
        }

        let path = match self.search_storage(&identity) {
            Some(path) => Some(path),
            None => self.search_direct(&identity),
        };

        let path = match path {
            Some(path) => Some(path),
            None if first_time => {
                self.fetch_from_servers(&identity)?;
                self.search_storage(&identity)
            }
            None => None,
        };

        match path {
            Some(path) => {
                let located = found(&path);
                self.located.insert(identity, path);
                Ok(located)
            }
            None => Err(Error::new(
                ErrorKind::PdbNotFound,
                format!(
                    "failed to find {identity} for {:?}",
                    image_path.display().to_string()
                ),
            )),
        }
    }

    fn search_storage(&self, identity: &PdbIdentity) -> Option<PathBuf> {
        self.lists.storage.iter().find_map(|storage| {
            let path = identity.cache_path(storage);
            check_pdb(&path).then_some(path)
        })
    }

    fn search_direct(&mut self, identity: &PdbIdentity) -> Option<PathBuf> {
        let path = self.lists.direct.iter().find_map(|dir| {
            let path = dir.join(&identity.basename);
            check_pdb(&path).then_some(path)
        })?;

        // Files in direct directories are trusted, a mismatch is only reported.
        match self.indexer.pdb_signature(&path) {
            Some(signature) if signature != identity.signature => {
                tracing::warn!(
                    pdb = %path.display(),
                    expected = %identity.signature,
                    found = %signature,
                    "pdb signature does not match the image"
                );
            }
            _ => {}
        }

        Some(path)
    }

    fn fetch_from_servers(&mut self, identity: &PdbIdentity) -> Result<(), Error> {
        for server in &self.lists.servers {
            if !server.cache.is_dir() {
                return Err(Error::new(
                    ErrorKind::InvalidCacheDir,
                    format!("{:?}", server.cache.display().to_string()),
                ));
            }

            let dest = identity.cache_path(&server.cache);
            if dest.exists() {
                return Err(Error::new(
                    ErrorKind::CacheCollision,
                    format!("{:?}", dest.display().to_string()),
                ));
            }

            let url = server.pdb_url(identity);
            tracing::info!(%url, "downloading pdb");
            match self.downloader.download(&url, &dest) {
                Ok(()) => {
                    tracing::info!(pdb = %dest.display(), "downloaded pdb");
                    break;
                }
                Err(e) => {
                    tracing::warn!(%url, error = %DisplayChain(&e), "download failed");
                }
            }
        }

        Ok(())
    }
}

fn check_pdb(path: &Path) -> bool {
    let exists = path.is_file();
    tracing::debug!(pdb = %path.display(), found = exists, "checking pdb");
    exists
}
