use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Reasons `WorkerPool::start` can fail. None of these are retried.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to resolve bind address {host}:{port}")]
    Address {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to create listening socket for {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to load mimetypes from {}", path.display())]
    MimeTypes {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open access log {}", path.display())]
    AccessLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn worker {index}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },
}
