//! Downloads from symbol servers.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use tempfile::NamedTempFile;

use crate::discovery::Downloader;
use crate::error::{Error, ErrorKind};

/// The user agent sent to symbol servers.
///
/// Some servers reject requests without a browser-like user agent.
pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; MSIE 10.0; Windows NT 6.2; WOW64; Trident/6.0)";

const CHUNK_SIZE: usize = 64 * 1024;

/// Downloads files with a blocking HTTP client.
///
/// The body is streamed into a temporary file next to the destination, which is moved into place
/// once the transfer has completed. A failed transfer leaves nothing behind.
#[derive(Debug)]
pub struct HttpDownloader {
    agent: ureq::Agent,
}

impl HttpDownloader {
    /// Creates a downloader that follows redirects and applies the given connect timeout.
    pub fn new(connect_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(USER_AGENT)
            .redirects(8)
            .timeout_connect(connect_timeout)
            .build();
        HttpDownloader { agent }
    }

    fn request(&self, url: &str) -> Result<ureq::Response, Error> {
        match self.agent.get(url).call() {
            Ok(response) if (200..300).contains(&response.status()) => Ok(response),
            Ok(response) => Err(Error::new(
                ErrorKind::DownloadFailed,
                format!("{url}: status {}", response.status()),
            )),
            Err(ureq::Error::Status(status, _)) => Err(Error::new(
                ErrorKind::DownloadFailed,
                format!("{url}: status {status}"),
            )),
            Err(e) => Err(Error::new(ErrorKind::DownloadFailed, e)),
        }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Downloader for HttpDownloader {
    fn download(&mut self, url: &str, dest: &Path) -> Result<(), Error> {
        let response = self.request(url)?;
        let total: Option<u64> = response
            .header("Content-Length")
            .and_then(|len| len.parse().ok());

        let dir = dest
            .parent()
            .ok_or_else(|| Error::new(ErrorKind::Io, format!("invalid destination {dest:?}")))?;
        fs::create_dir_all(dir)?;

        // Dropping the temporary file on error removes it.
        let mut file = NamedTempFile::new_in(dir)?;
        let received = copy_with_progress(url, response.into_reader(), &mut file, total)?;
        file.as_file().sync_all()?;

        file.persist_noclobber(dest).map_err(|e| {
            let kind = match e.error.kind() {
                io::ErrorKind::AlreadyExists => ErrorKind::CacheCollision,
                _ => ErrorKind::Io,
            };
            Error::new(kind, e.error)
        })?;

        tracing::debug!(url, bytes = received, dest = %dest.display(), "download complete");
        Ok(())
    }
}

fn copy_with_progress<R, W>(
    url: &str,
    mut reader: R,
    writer: &mut W,
    total: Option<u64>,
) -> Result<u64, Error>
where
    R: Read,
    W: Write,
{
    let mut buf = vec![0; CHUNK_SIZE];
    let mut received = 0u64;

    loop {
        let len = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::new(ErrorKind::DownloadFailed, e)),
        };

        writer.write_all(&buf[..len])?;
        received += len as u64;
        tracing::trace!(url, received, total, "download progress");
    }

    if let Some(total) = total {
        if received != total {
            return Err(Error::new(
                ErrorKind::DownloadFailed,
                format!("{url}: received {received} of {total} bytes"),
            ));
        }
    }

    Ok(received)
}
