use std::fs::{create_dir, create_dir_all, File};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use poolhttpd::fs::FileSystem;
use poolhttpd::{AccessLogTarget, Config, WorkerPool};
use tempfile::{tempdir, TempDir};

/// A worker pool serving `<tempdir>/www` on an ephemeral loopback port.
pub struct Server {
    pool: WorkerPool,
    dir: TempDir,
}

impl Server {
    pub fn start() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        Self::build(adjust, None)
    }

    pub fn with_fs(fs: Arc<dyn FileSystem>) -> Self {
        Self::build(|_| {}, Some(fs))
    }

    fn build(adjust: impl FnOnce(&mut Config), fs: Option<Arc<dyn FileSystem>>) -> Self {
        let dir = tempdir().expect("failed to create tempdir");
        let root = dir.path().join("www");
        create_dir(&root).expect("failed to create document root");

        let mut config = Config::new(&root);
        config.bind_port = 0;
        config.worker_count = 4;
        config.access_log = AccessLogTarget::Off;
        adjust(&mut config);

        let pool = match fs {
            Some(fs) => WorkerPool::start_with(config, fs),
            None => WorkerPool::start(config),
        }
        .expect("failed to start server");
        Self { pool, dir }
    }

    pub fn pool(&mut self) -> &mut WorkerPool {
        &mut self.pool
    }

    pub fn addr(&self) -> SocketAddr {
        self.pool.local_addr()
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("www")
    }

    pub fn create_dir(&self, name: &str) {
        create_dir_all(self.root().join(name)).expect("failed to create directory");
    }

    pub fn create_file(&self, name: &str, contents: &[u8]) {
        File::create(self.root().join(name))
            .and_then(|mut file| file.write_all(contents))
            .expect("failed to create file");
    }

    pub fn stream(&self) -> TcpStream {
        connect(self.addr())
    }

    /// Send raw bytes and read until the server closes the connection.
    pub fn request(&self, raw: &[u8]) -> Response {
        request(self.addr(), raw)
    }

    /// Send raw bytes, close our sending side, and read until the server closes.
    pub fn request_then_close(&self, raw: &[u8]) -> Response {
        let mut stream = self.stream();
        stream.write_all(raw).expect("failed to send request");
        stream.shutdown(Shutdown::Write).expect("failed to shut down");
        read_response(&mut stream)
    }

    pub fn get(&self, path: &str) -> Response {
        self.request(format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).as_bytes())
    }

    pub fn head(&self, path: &str) -> Response {
        self.request(format!("HEAD {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).as_bytes())
    }
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("failed to connect to server");
    // Set timeouts to prevent tests from hanging
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
        .set_write_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

/// Send raw bytes and read until the server closes the connection.
pub fn request(addr: SocketAddr, raw: &[u8]) -> Response {
    let mut stream = connect(addr);
    stream.write_all(raw).expect("failed to send request");
    read_response(&mut stream)
}

pub fn read_response(stream: &mut TcpStream) -> Response {
    let mut raw = Vec::new();
    stream
        .read_to_end(&mut raw)
        .expect("failed to read response");
    Response::parse(raw)
}

/// HTTP response as received on the wire.
#[derive(Debug)]
pub struct Response {
    pub raw: Vec<u8>,
    status_line: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    fn parse(raw: Vec<u8>) -> Self {
        let split = raw
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .unwrap_or(raw.len());
        let head = String::from_utf8(raw[..split].to_vec()).expect("head is not valid UTF-8");
        let body = raw.get(split + 4..).unwrap_or_default().to_vec();

        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default().to_string();
        let headers = lines
            .filter(|line| !line.is_empty())
            .map(|line| {
                let mut header = line.splitn(2, ": ");
                let name = header.next().expect("invalid header").to_string();
                let value = header.next().expect("invalid header").to_string();
                (name, value)
            })
            .collect();
        Self {
            raw,
            status_line,
            headers,
            body,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn status_line(&self) -> &str {
        &self.status_line
    }

    /// Status code and reason, e.g. "200 OK".
    pub fn status(&self) -> &str {
        self.status_line
            .splitn(2, ' ')
            .nth(1)
            .expect("invalid response line")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn header_names(&self) -> Vec<&str> {
        self.headers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Headers without `Date`, which changes between otherwise identical responses.
    pub fn stable_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter(|(name, _)| name != "Date")
            .cloned()
            .collect()
    }

    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.body).expect("body is not valid UTF-8")
    }
}
