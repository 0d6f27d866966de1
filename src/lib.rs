//! A static file HTTP server run by a fixed pool of worker threads.
//!
//! Every worker waits on the same listening socket, serves one request per connection and closes
//! it. `WorkerPool::start` brings the server up; `WorkerPool::shutdown` (or dropping the pool)
//! stops it.

pub mod access_log;
pub mod config;
pub mod connection;
pub mod error;
pub mod fs;
pub mod mime;
pub mod pool;
pub mod request;
pub mod resolve;
pub mod response;
pub mod stats;
pub mod status;

pub use config::{AccessLogTarget, Config};
pub use error::StartError;
pub use pool::{ShutdownSignal, WorkerPool};
pub use status::Status;
