use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use thiserror::Error;
use tracing::debug;

use crate::access_log::{AccessLog, Entry};
use crate::config::Config;
use crate::fs::FileSystem;
use crate::mime::MimeMap;
use crate::request::{find, Method, Request};
use crate::resolve::resolve;
use crate::response::Response;
use crate::stats::ServerStats;
use crate::status::Status;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 4096;
// Upper bound on what is discarded from a client whose request was refused unread.
const MAX_DISCARD: usize = 1 << 20;

/// State shared read-only by all workers.
pub struct Site {
    pub document_root: PathBuf,
    pub index_name: String,
    pub max_request_len: usize,
    pub io_timeout: Duration,
    pub mime_map: MimeMap,
    pub fs: Arc<dyn FileSystem>,
    pub access_log: AccessLog,
    pub stats: ServerStats,
}

impl Site {
    pub fn new(
        config: &Config,
        mime_map: MimeMap,
        fs: Arc<dyn FileSystem>,
        access_log: AccessLog,
    ) -> Self {
        Self {
            document_root: config.document_root.clone(),
            index_name: config.index_name.clone(),
            max_request_len: config.max_request_len,
            io_timeout: config.io_timeout,
            mime_map,
            fs,
            access_log,
            stats: ServerStats::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("connection closed before a request was sent")]
    Empty,
    #[error("connection closed in the middle of the request head")]
    Truncated,
    #[error("request head is longer than {0} bytes")]
    TooLarge(usize),
    #[error("timed out waiting for the request head")]
    TimedOut,
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn is_timeout(e: &io::Error) -> bool {
    // Unix reports an expired SO_RCVTIMEO/SO_SNDTIMEO as EAGAIN.
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Read up to the blank line that ends the request headers and return what came before it.
///
/// Anything after the terminator is discarded since request bodies are not supported.
pub fn read_head<R: Read>(
    reader: &mut R,
    max_len: usize,
    stats: &ServerStats,
) -> Result<Vec<u8>, ReadError> {
    let mut request = Vec::new();
    let mut buf = [0; READ_CHUNK];
    loop {
        let recvd = match reader.read(&mut buf) {
            Ok(0) if request.is_empty() => return Err(ReadError::Empty),
            Ok(0) => return Err(ReadError::Truncated),
            Ok(recvd) => recvd,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) => return Err(ReadError::TimedOut),
            Err(e) => return Err(ReadError::Io(e)),
        };
        stats.add_in(recvd as u64);

        // The terminator may straddle two reads.
        let search_from = request.len().saturating_sub(HEADER_TERMINATOR.len() - 1);
        request.extend_from_slice(&buf[..recvd]);
        if let Some(pos) = find(HEADER_TERMINATOR, &request[search_from..]) {
            let end = search_from + pos;
            if end > max_len {
                return Err(ReadError::TooLarge(max_len));
            }
            request.truncate(end);
            return Ok(request);
        }
        if request.len() > max_len {
            return Err(ReadError::TooLarge(max_len));
        }
    }
}

/// Stop sending and swallow whatever the client is still sending, so closing the socket does not
/// reset the connection before the client has read the response. Gives up after `limit` in
/// total, however the client paces its bytes.
fn discard_pending(stream: &mut TcpStream, limit: Duration) {
    if stream.shutdown(Shutdown::Write).is_err() {
        return;
    }
    let deadline = Instant::now() + limit;
    let mut buf = [0; READ_CHUNK];
    let mut discarded = 0;
    while discarded < MAX_DISCARD {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || stream.set_read_timeout(Some(remaining)).is_err() {
            break;
        }
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => discarded += n,
        }
    }
}

/// Serve exactly one request on `stream`. The stream is closed when this returns.
///
/// Protocol problems are answered with a 400. Timeouts end the connection silently. Only
/// transport errors are returned.
pub fn handle(mut stream: TcpStream, client: SocketAddr, site: &Site) -> io::Result<()> {
    stream.set_read_timeout(Some(site.io_timeout))?;
    stream.set_write_timeout(Some(site.io_timeout))?;

    let mut refused_unread = false;
    let head = read_head(&mut stream, site.max_request_len, &site.stats);
    let now = SystemTime::now();
    let (request, response) = match head {
        Ok(head) => {
            site.stats.add_request();
            match Request::parse(&head) {
                Ok(request) => {
                    let target = resolve(
                        &request,
                        &site.document_root,
                        &site.index_name,
                        site.fs.as_ref(),
                    );
                    debug!(
                        "{}: {} {} -> {}",
                        client,
                        request.method.as_str(),
                        request.path,
                        target.status
                    );
                    let head_only = request.method == Method::Head;
                    let response = Response::for_target(
                        &target,
                        head_only,
                        &site.mime_map,
                        site.fs.as_ref(),
                        now,
                    );
                    (Some(request), response)
                }
                Err(e) => {
                    debug!("{}: malformed request: {}", client, e);
                    (None, Response::error(Status::BadRequest, false, now))
                }
            }
        }
        Err(ReadError::Empty) => {
            debug!("{}: closed without sending a request", client);
            return Ok(());
        }
        Err(ReadError::TimedOut) => {
            debug!("{}: timed out reading request", client);
            return Ok(());
        }
        Err(e @ ReadError::Truncated) | Err(e @ ReadError::TooLarge(_)) => {
            debug!("{}: {}", client, e);
            refused_unread = matches!(e, ReadError::TooLarge(_));
            (None, Response::error(Status::BadRequest, false, now))
        }
        Err(ReadError::Io(e)) => return Err(e),
    };

    let sent = response.write_to(&mut stream)?;
    site.stats.add_out(sent);
    site.access_log.record(
        &Entry {
            client: client.ip(),
            request: request.as_ref(),
            status: response.status,
            bytes_sent: sent,
        },
        now,
    );

    if refused_unread {
        discard_pending(&mut stream, site.io_timeout);
    }
    Ok(())
}
