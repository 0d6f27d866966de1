use std::path::PathBuf;
use std::time::Duration;

use crate::error::StartError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_INDEX_NAME: &str = "index.html";
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
pub const DEFAULT_MAX_REQUEST_LENGTH: usize = 64 * 1024;
pub const DEFAULT_BACKLOG: usize = 5;

/// Where to put the access log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessLogTarget {
    Stdout,
    Syslog,
    File(PathBuf),
    Off,
}

impl Default for AccessLogTarget {
    fn default() -> Self {
        Self::Stdout
    }
}

/// Everything the pool needs to know before it starts. Shared read-only by all workers.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_host: String,
    pub bind_port: u16,
    pub worker_count: usize,
    pub document_root: PathBuf,
    pub index_name: String,
    /// Upper bound on one wait for an incoming connection. Workers check for shutdown this often.
    pub accept_timeout: Duration,
    /// Per-operation read and write timeout on accepted connections.
    pub io_timeout: Duration,
    /// How long shutdown waits for each worker before abandoning it.
    pub join_timeout: Duration,
    pub max_request_len: usize,
    pub backlog: usize,
    pub default_mimetype: String,
    pub mimetypes_file: Option<PathBuf>,
    pub access_log: AccessLogTarget,
}

impl Config {
    pub fn new(document_root: impl Into<PathBuf>) -> Self {
        Self {
            bind_host: DEFAULT_HOST.to_string(),
            bind_port: DEFAULT_PORT,
            worker_count: DEFAULT_WORKERS,
            document_root: document_root.into(),
            index_name: DEFAULT_INDEX_NAME.to_string(),
            accept_timeout: Duration::from_millis(200),
            io_timeout: Duration::from_secs(1),
            join_timeout: Duration::from_secs(2),
            max_request_len: DEFAULT_MAX_REQUEST_LENGTH,
            backlog: DEFAULT_BACKLOG,
            default_mimetype: DEFAULT_MIME_TYPE.to_string(),
            mimetypes_file: None,
            access_log: AccessLogTarget::default(),
        }
    }

    /// Check invariants and make `document_root` absolute.
    pub(crate) fn validate(mut self) -> Result<Self, StartError> {
        if self.worker_count == 0 {
            return Err(StartError::Config(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.index_name.is_empty() || self.index_name.contains('/') {
            return Err(StartError::Config(format!(
                "index name `{}' must be a plain file name",
                self.index_name
            )));
        }
        for (name, timeout) in [
            ("accept", self.accept_timeout),
            ("io", self.io_timeout),
            ("join", self.join_timeout),
        ] {
            if timeout.is_zero() {
                return Err(StartError::Config(format!("{} timeout must be non-zero", name)));
            }
        }
        if self.max_request_len == 0 {
            return Err(StartError::Config(
                "maximum request length must be non-zero".to_string(),
            ));
        }
        self.document_root = self.document_root.canonicalize().map_err(|e| {
            StartError::Config(format!(
                "document root {}: {}",
                self.document_root.display(),
                e
            ))
        })?;
        if !self.document_root.is_dir() {
            return Err(StartError::Config(format!(
                "document root {} is not a directory",
                self.document_root.display()
            )));
        }
        Ok(self)
    }
}
