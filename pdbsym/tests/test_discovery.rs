use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use pdbsym::{
    Downloader, Error, ErrorKind, HttpDownloader, ImageIndexer, PdbLocator, SearchLists,
    SymbolServer,
};
use pdbsym_common::{ImageIdentity, PdbIdentity, PdbSignature};
use pdbsym_testutils::{cache_entry, write_file, Response, TestServer};

use similar_asserts::assert_eq;

const SIGNATURE: &str = "ABCDEF0123456789ABCDEF01234567802";

fn identity() -> PdbIdentity {
    PdbIdentity::new("mylib.pdb", SIGNATURE.parse().unwrap())
}

/// Serves identities for known image paths.
#[derive(Debug, Default)]
struct FakeIndexer {
    images: HashMap<PathBuf, PdbIdentity>,
    signatures: HashMap<PathBuf, PdbSignature>,
    calls: usize,
}

impl FakeIndexer {
    fn with_image(image: &Path) -> Self {
        let mut indexer = Self::default();
        indexer.images.insert(image.to_path_buf(), identity());
        indexer
    }
}

impl ImageIndexer for FakeIndexer {
    fn index_image(&mut self, path: &Path) -> Result<ImageIdentity, Error> {
        self.calls += 1;
        let pdb = self
            .images
            .get(path)
            .cloned()
            .ok_or(ErrorKind::ImageIndexFailed)?;

        Ok(ImageIdentity {
            image_path: path.to_path_buf(),
            image_size: 0x10000,
            pdb,
        })
    }

    fn pdb_signature(&mut self, path: &Path) -> Option<PdbSignature> {
        self.signatures.get(path).copied()
    }
}

/// Records requested URLs and serves a fixed body, or fails when there is none.
#[derive(Debug, Default)]
struct RecordingDownloader {
    body: Option<Vec<u8>>,
    urls: Vec<String>,
}

impl Downloader for RecordingDownloader {
    fn download(&mut self, url: &str, dest: &Path) -> Result<(), Error> {
        self.urls.push(url.to_owned());
        match self.body {
            Some(ref body) => {
                write_file(dest, body);
                Ok(())
            }
            None => Err(Error::new(ErrorKind::DownloadFailed, "404")),
        }
    }
}

fn storage_only(cache: &Path) -> SearchLists {
    SearchLists {
        storage: vec![cache.to_path_buf()],
        ..Default::default()
    }
}

fn with_server(url: &str, cache: &Path) -> SearchLists {
    SearchLists {
        storage: vec![cache.to_path_buf()],
        direct: vec![],
        servers: vec![SymbolServer {
            url: url.to_owned(),
            cache: cache.to_path_buf(),
        }],
    }
}

#[test]
fn test_cache_hit() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("mylib.dll");
    let cached = cache_entry(dir.path().join("c"), "mylib.pdb", SIGNATURE, b"pdb");

    let lists = with_server("http://srv", &dir.path().join("c"));
    let mut locator = PdbLocator::new(
        lists,
        FakeIndexer::with_image(&image),
        RecordingDownloader::default(),
    );

    let located = locator.locate(&image).unwrap();
    assert_eq!(located.path, cached);
    assert_eq!(located.signature.to_string(), SIGNATURE);
    assert!(locator.downloader().urls.is_empty());
}

#[test]
fn test_storage_before_direct() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("mylib.dll");
    let cached = cache_entry(dir.path().join("c"), "mylib.pdb", SIGNATURE, b"cached");
    write_file(dir.path().join("d/mylib.pdb"), b"direct");

    let lists = SearchLists {
        storage: vec![dir.path().join("c")],
        direct: vec![dir.path().join("d")],
        servers: vec![],
    };
    let mut locator = PdbLocator::new(
        lists,
        FakeIndexer::with_image(&image),
        RecordingDownloader::default(),
    );

    assert_eq!(locator.locate(&image).unwrap().path, cached);
}

#[test]
fn test_direct_directory_is_trusted() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("mylib.dll");
    let direct = write_file(dir.path().join("d2/mylib.pdb"), b"direct");

    let mut indexer = FakeIndexer::with_image(&image);
    // A different signature is reported but the file is still used.
    indexer
        .signatures
        .insert(direct.clone(), PdbSignature::default());

    let lists = SearchLists {
        storage: vec![],
        direct: vec![dir.path().join("d1"), dir.path().join("d2")],
        servers: vec![],
    };
    let mut locator = PdbLocator::new(lists, indexer, RecordingDownloader::default());

    assert_eq!(locator.locate(&image).unwrap().path, direct);
}

#[test]
fn test_server_fetch_then_hit() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("c");
    fs::create_dir(&cache).unwrap();
    let image = dir.path().join("mylib.dll");

    let server = TestServer::start(vec![Response::ok(&b"PDB BYTES"[..])]);
    let lists = with_server(server.url(), &cache);
    let mut locator = PdbLocator::new(
        lists,
        FakeIndexer::with_image(&image),
        HttpDownloader::default(),
    );

    let located = locator.locate(&image).unwrap();
    let expected = cache.join("mylib.pdb").join(SIGNATURE).join("mylib.pdb");
    assert_eq!(located.path, expected);
    assert_eq!(fs::read(&expected).unwrap(), b"PDB BYTES");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request_line = format!("GET /mylib.pdb/{SIGNATURE}/mylib.pdb HTTP/1.1\r\n");
    assert!(requests[0].starts_with(&request_line), "{}", requests[0]);

    let user_agent = format!("user-agent: {}", pdbsym::USER_AGENT.to_lowercase());
    assert!(
        requests[0].to_lowercase().contains(&user_agent),
        "{}",
        requests[0]
    );
}

#[test]
fn test_server_failure_tries_next_server() {
    let dir = tempfile::tempdir().unwrap();
    let first_cache = dir.path().join("c1");
    let second_cache = dir.path().join("c2");
    fs::create_dir(&first_cache).unwrap();
    fs::create_dir(&second_cache).unwrap();
    let image = dir.path().join("mylib.dll");

    let missing = TestServer::start(vec![Response::status(404)]);
    let serving = TestServer::start(vec![Response::ok(&b"PDB"[..])]);

    let lists = SearchLists {
        storage: vec![first_cache.clone(), second_cache.clone()],
        direct: vec![],
        servers: vec![
            SymbolServer {
                url: missing.url().to_owned(),
                cache: first_cache.clone(),
            },
            SymbolServer {
                url: serving.url().to_owned(),
                cache: second_cache.clone(),
            },
        ],
    };
    let mut locator = PdbLocator::new(
        lists,
        FakeIndexer::with_image(&image),
        HttpDownloader::default(),
    );

    let located = locator.locate(&image).unwrap();
    assert!(located.path.starts_with(&second_cache));

    // The failed download leaves nothing behind.
    assert_eq!(fs::read_dir(&first_cache).unwrap().count(), 0);

    assert_eq!(missing.requests().len(), 1);
    assert_eq!(serving.requests().len(), 1);
}

#[test]
fn test_network_is_contacted_once_per_image() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("c");
    fs::create_dir(&cache).unwrap();
    let image = dir.path().join("mylib.dll");

    let mut locator = PdbLocator::new(
        with_server("http://srv", &cache),
        FakeIndexer::with_image(&image),
        RecordingDownloader::default(),
    );

    let err = locator.locate(&image).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PdbNotFound);
    let err = locator.locate(&image).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PdbNotFound);

    assert_eq!(
        locator.downloader().urls,
        vec![format!("http://srv/mylib.pdb/{SIGNATURE}/mylib.pdb")]
    );
    assert_eq!(locator.indexer().calls, 1);
}

#[test]
fn test_located_pdb_is_remembered() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("c");
    fs::create_dir(&cache).unwrap();
    let first = dir.path().join("a/mylib.dll");
    let second = dir.path().join("b/mylib.dll");

    let mut indexer = FakeIndexer::with_image(&first);
    indexer.images.insert(second.clone(), identity());
    let downloader = RecordingDownloader {
        body: Some(b"PDB".to_vec()),
        urls: vec![],
    };
    let mut locator = PdbLocator::new(with_server("http://srv", &cache), indexer, downloader);

    let a = locator.locate(&first).unwrap();
    let b = locator.locate(&second).unwrap();
    let again = locator.locate(&first).unwrap();

    assert_eq!(a, b);
    assert_eq!(a, again);
    assert_eq!(locator.downloader().urls.len(), 1);
    assert_eq!(locator.indexer().calls, 2);
}

#[test]
fn test_missing_server_cache() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("mylib.dll");

    let mut locator = PdbLocator::new(
        with_server("http://srv", &dir.path().join("missing")),
        FakeIndexer::with_image(&image),
        RecordingDownloader::default(),
    );

    let err = locator.locate(&image).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCacheDir);
    assert!(locator.downloader().urls.is_empty());
}

#[test]
fn test_cache_collision() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("c");
    let image = dir.path().join("mylib.dll");
    cache_entry(&cache, "mylib.pdb", SIGNATURE, b"pdb");

    // The server cache is not searched as storage, so the existing entry is only noticed when
    // downloading.
    let lists = SearchLists {
        storage: vec![],
        direct: vec![],
        servers: vec![SymbolServer {
            url: "http://srv".into(),
            cache,
        }],
    };
    let mut locator = PdbLocator::new(
        lists,
        FakeIndexer::with_image(&image),
        RecordingDownloader::default(),
    );

    let err = locator.locate(&image).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CacheCollision);
}

#[test]
fn test_unknown_image() {
    let dir = tempfile::tempdir().unwrap();
    let mut locator = PdbLocator::new(
        storage_only(dir.path()),
        FakeIndexer::default(),
        RecordingDownloader::default(),
    );

    let err = locator.locate(&dir.path().join("other.dll")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImageIndexFailed);
}

#[test]
fn test_http_downloader_does_not_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let dest = write_file(dir.path().join("x/mylib.pdb"), b"old");

    let server = TestServer::start(vec![Response::ok(&b"new"[..])]);
    let mut downloader = HttpDownloader::default();
    let err = downloader
        .download(&format!("{}/mylib.pdb", server.url()), &dest)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CacheCollision);
    assert_eq!(fs::read(&dest).unwrap(), b"old");
    assert_eq!(fs::read_dir(dir.path().join("x")).unwrap().count(), 1);
    assert_eq!(server.requests().len(), 1);
}

#[test]
fn test_http_downloader_truncated_body() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("c/mylib.pdb").join(SIGNATURE).join("mylib.pdb");

    let server = TestServer::start(vec![Response::truncated(&b"PDB"[..], 4096)]);
    let mut downloader = HttpDownloader::default();
    let err = downloader
        .download(&format!("{}/mylib.pdb", server.url()), &dest)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DownloadFailed);
    assert!(!dest.exists());
    let leftovers = fs::read_dir(dest.parent().unwrap()).unwrap().count();
    assert_eq!(leftovers, 0);
    assert_eq!(server.requests().len(), 1);
}

#[test]
fn test_truncated_download_is_not_located() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("c");
    fs::create_dir(&cache).unwrap();
    let image = dir.path().join("mylib.dll");

    let server = TestServer::start(vec![Response::truncated(&b"PDB"[..], 4096)]);
    let lists = with_server(server.url(), &cache);
    let mut locator = PdbLocator::new(
        lists,
        FakeIndexer::with_image(&image),
        HttpDownloader::default(),
    );

    let err = locator.locate(&image).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PdbNotFound);
    let key = cache.join("mylib.pdb").join(SIGNATURE).join("mylib.pdb");
    assert!(!key.exists());
    assert_eq!(server.requests().len(), 1);
}
