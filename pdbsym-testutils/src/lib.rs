//! Test helpers for `pdbsym`.
#![warn(missing_docs)]

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

/// Writes `contents` to `path`, creating parent directories.
///
/// # Example
///
/// ```
/// let dir = std::env::temp_dir().join("pdbsym-testutils-doc");
/// let path = pdbsym_testutils::write_file(dir.join("a/b.txt"), b"x");
/// assert_eq!(std::fs::read(&path).unwrap(), b"x");
/// # std::fs::remove_dir_all(dir).unwrap();
/// ```
pub fn write_file<P: AsRef<Path>>(path: P, contents: &[u8]) -> PathBuf {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create parent directory");
    }
    fs::write(path, contents).expect("failed to write file");
    path.to_path_buf()
}

/// Places a PDB into a cache directory at `<name>/<signature>/<name>`.
pub fn cache_entry<P: AsRef<Path>>(cache: P, name: &str, signature: &str, contents: &[u8]) -> PathBuf {
    write_file(cache.as_ref().join(name).join(signature).join(name), contents)
}

/// A canned HTTP response.
#[derive(Clone, Debug)]
pub struct Response {
    /// The status code.
    pub status: u16,
    /// The response body.
    pub body: Vec<u8>,
    /// The announced `Content-Length`, if it differs from the length of `body`.
    pub content_length: Option<usize>,
}

impl Response {
    /// A `200 OK` response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Response {
            status: 200,
            body: body.into(),
            content_length: None,
        }
    }

    /// A `200 OK` response that announces `content_length` bytes but closes the connection after
    /// sending `body`.
    pub fn truncated(body: impl Into<Vec<u8>>, content_length: usize) -> Self {
        Response {
            content_length: Some(content_length),
            ..Self::ok(body)
        }
    }

    /// An empty response with the given status.
    pub fn status(status: u16) -> Self {
        Response {
            status,
            body: Vec::new(),
            content_length: None,
        }
    }
}

/// An HTTP server on the loopback interface that answers a fixed sequence of requests.
///
/// Every response closes its connection. The server stops after the last response.
pub struct TestServer {
    url: String,
    handle: JoinHandle<Vec<String>>,
}

impl TestServer {
    /// Starts a server that answers one request per response, in order.
    pub fn start(responses: Vec<Response>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind test server");
        let url = format!("http://{}", listener.local_addr().expect("no local address"));

        let handle = thread::spawn(move || {
            let mut requests = Vec::new();
            for response in responses {
                let (stream, _) = listener.accept().expect("failed to accept connection");
                requests.push(respond(stream, &response));
            }
            requests
        });

        TestServer { url, handle }
    }

    /// The base URL of the server, without trailing slash.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Waits until all responses were sent and returns the request lines that were received,
    /// for example `GET /mylib.pdb/…/mylib.pdb HTTP/1.1`, followed by the request headers.
    pub fn requests(self) -> Vec<String> {
        self.handle.join().expect("test server panicked")
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

fn respond(mut stream: TcpStream, response: &Response) -> String {
    let mut reader = BufReader::new(stream.try_clone().expect("failed to clone stream"));
    let mut head = String::new();
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).expect("failed to read request");
        if read == 0 || line == "\r\n" {
            break;
        }
        head.push_str(&line);
    }

    write!(
        stream,
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason(response.status),
        response.content_length.unwrap_or(response.body.len())
    )
    .expect("failed to write response head");
    stream
        .write_all(&response.body)
        .expect("failed to write response body");
    stream.flush().expect("failed to flush response");

    head
}
