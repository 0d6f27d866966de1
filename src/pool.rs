use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::socket::{
    self, sockopt, AddressFamily, InetAddr, SockAddr, SockFlag, SockType,
};
use tracing::{debug, error, info, warn};

use crate::access_log::AccessLog;
use crate::config::{AccessLogTarget, Config};
use crate::connection::{self, Site};
use crate::error::StartError;
use crate::fs::{FileSystem, LocalFileSystem};
use crate::mime::MimeMap;
use crate::stats::StatsSnapshot;

/// Stop flag broadcast to every worker of a pool. Once triggered it stays triggered.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    /// Set the flag. Returns false if it was already set.
    pub fn trigger(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sends the worker's index to the pool when the worker thread ends, even by unwinding.
struct ExitNotice {
    index: usize,
    exited: Sender<usize>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        // The pool may already have given up on this worker.
        self.exited.send(self.index).ok();
    }
}

struct Worker {
    index: usize,
    handle: JoinHandle<()>,
}

/// A fixed number of threads accepting from one shared listening socket.
///
/// Each worker serves one connection at a time, so `worker_count` is also the number of
/// connections served concurrently. Further connections wait in the kernel's accept backlog.
pub struct WorkerPool {
    local_addr: SocketAddr,
    signal: ShutdownSignal,
    site: Arc<Site>,
    listener: Option<Arc<TcpListener>>,
    workers: Vec<Worker>,
    exited: Receiver<usize>,
    join_timeout: Duration,
}

impl WorkerPool {
    /// Bind the configured address and start serving files from the local filesystem.
    pub fn start(config: Config) -> Result<Self, StartError> {
        Self::start_with(config, Arc::new(LocalFileSystem))
    }

    /// Like `start`, reading files through `fs`.
    pub fn start_with(config: Config, fs: Arc<dyn FileSystem>) -> Result<Self, StartError> {
        let config = config.validate()?;

        let mut mime_map = MimeMap::with_default(&config.default_mimetype);
        if let Some(path) = &config.mimetypes_file {
            mime_map
                .load_file(path)
                .map_err(|source| StartError::MimeTypes {
                    path: path.clone(),
                    source,
                })?;
        }
        let access_log = AccessLog::open(&config.access_log).map_err(|source| {
            let path = match &config.access_log {
                AccessLogTarget::File(path) => path.clone(),
                _ => Default::default(),
            };
            StartError::AccessLog { path, source }
        })?;

        let addr = resolve_addr(&config.bind_host, config.bind_port)?;
        let listener = create_listener(addr, config.backlog)
            .map_err(|source| StartError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| StartError::Bind { addr, source })?;
        info!(
            "listening on: http://{}/ with {} workers, serving {}",
            local_addr,
            config.worker_count,
            config.document_root.display()
        );

        let listener = Arc::new(listener);
        let site = Arc::new(Site::new(&config, mime_map, fs, access_log));
        let (exit_tx, exited) = mpsc::channel();
        let mut pool = Self {
            local_addr,
            signal: ShutdownSignal::default(),
            site,
            listener: Some(Arc::clone(&listener)),
            workers: Vec::with_capacity(config.worker_count),
            exited,
            join_timeout: config.join_timeout,
        };

        for index in 0..config.worker_count {
            let notice = ExitNotice {
                index,
                exited: exit_tx.clone(),
            };
            let listener = Arc::clone(&listener);
            let signal = pool.signal.clone();
            let site = Arc::clone(&pool.site);
            let accept_timeout = config.accept_timeout;
            let spawned = thread::Builder::new()
                .name(format!("worker-{}", index))
                .spawn(move || {
                    let _notice = notice;
                    worker_loop(index, &listener, &signal, &site, accept_timeout);
                });
            match spawned {
                Ok(handle) => pool.workers.push(Worker { index, handle }),
                Err(source) => {
                    pool.shutdown();
                    return Err(StartError::Spawn { index, source });
                }
            }
        }
        Ok(pool)
    }

    /// Address actually bound, which differs from the configured one when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.site.stats.snapshot()
    }

    /// Stop all workers and close the listening socket. Calls after the first do nothing.
    ///
    /// Each worker gets up to the configured join timeout to finish the connection it is serving.
    /// A worker that does not make it is abandoned; it exits by itself once its connection's I/O
    /// timeouts expire. New connections are refused as soon as this returns either way.
    pub fn shutdown(&mut self) {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => return,
        };
        self.signal.trigger();
        info!("shutting down {} workers", self.workers.len());

        let mut finished = Vec::with_capacity(self.workers.len());
        while finished.len() < self.workers.len() {
            match self.exited.recv_timeout(self.join_timeout) {
                Ok(index) => finished.push(index),
                Err(_) => break,
            }
        }
        for worker in self.workers.drain(..) {
            if !finished.contains(&worker.index) {
                warn!(
                    "worker {} did not stop within {:?}, abandoning it",
                    worker.index, self.join_timeout
                );
            } else if worker.handle.join().is_err() {
                error!("worker {} panicked", worker.index);
            }
        }

        // Abandoned workers still hold clones of the listener, so dropping ours may not close the
        // descriptor. Shutting it down makes the kernel refuse new connections either way.
        if let Err(e) = socket::shutdown(listener.as_raw_fd(), socket::Shutdown::Both) {
            if e.as_errno() != Some(Errno::ENOTCONN) {
                warn!("failed to shut down listening socket: {}", e);
            }
        }
        drop(listener);
        info!("listening socket on {} closed", self.local_addr);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, StartError> {
    let address_error = |source| StartError::Address {
        host: host.to_string(),
        port,
        source,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(address_error)?
        .next()
        .ok_or_else(|| {
            address_error(io::Error::new(
                io::ErrorKind::NotFound,
                "no addresses found",
            ))
        })
}

fn nix_error(e: nix::Error) -> io::Error {
    match e.as_errno() {
        Some(errno) => io::Error::from_raw_os_error(errno as i32),
        None => io::Error::new(io::ErrorKind::Other, e),
    }
}

/// Create the socket we accept connections from. Unlike `TcpListener::bind` this lets us choose
/// the backlog.
fn create_listener(addr: SocketAddr, backlog: usize) -> io::Result<TcpListener> {
    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };
    let fd = socket::socket(family, SockType::Stream, SockFlag::empty(), None)
        .map_err(nix_error)?;
    // Owning the descriptor right away closes it on every error path below.
    let listener = unsafe { TcpListener::from_raw_fd(fd) };
    socket::setsockopt(fd, sockopt::ReuseAddr, &true).map_err(nix_error)?;
    socket::bind(fd, &SockAddr::new_inet(InetAddr::from_std(&addr))).map_err(nix_error)?;
    socket::listen(fd, backlog).map_err(nix_error)?;
    // Several workers wake up for the same connection; the losers must not block in accept().
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Wait until `fd` is readable or `timeout` passes. Returns whether it is readable.
fn wait_readable(fd: RawFd, timeout: Duration) -> nix::Result<bool> {
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    let timeout_ms = timeout.as_millis().clamp(1, libc::c_int::MAX as u128) as libc::c_int;
    // Errors and hangups count too; accept() reports them.
    Ok(poll(&mut fds, timeout_ms)? > 0)
}

fn worker_loop(
    index: usize,
    listener: &TcpListener,
    signal: &ShutdownSignal,
    site: &Site,
    accept_timeout: Duration,
) {
    debug!("worker {} started", index);
    while !signal.is_triggered() {
        match wait_readable(listener.as_raw_fd(), accept_timeout) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) if e.as_errno() == Some(Errno::EINTR) => continue,
            Err(e) => {
                warn!("worker {}: poll() failed: {}", index, e);
                thread::sleep(accept_timeout);
                continue;
            }
        }
        if signal.is_triggered() {
            break;
        }
        let (stream, client) = match listener.accept() {
            Ok(accepted) => accepted,
            // another worker took it
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                warn!("worker {}: accept() failed: {}", index, e);
                if matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE)) {
                    // Out of descriptors; give in-flight connections a chance to close.
                    thread::sleep(accept_timeout);
                }
                continue;
            }
        };
        serve(stream, client, site);
    }
    debug!("worker {} stopped", index);
}

/// Run the connection handler, containing every failure it can produce.
fn serve(stream: TcpStream, client: SocketAddr, site: &Site) {
    // Accepted sockets may inherit O_NONBLOCK from the listener on some platforms.
    if let Err(e) = stream.set_nonblocking(false) {
        warn!("{}: failed to make socket blocking: {}", client, e);
        return;
    }
    match panic::catch_unwind(AssertUnwindSafe(|| {
        connection::handle(stream, client, site)
    })) {
        Ok(Ok(())) => {}
        Ok(Err(e))
            if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ) =>
        {
            debug!("{}: timed out: {}", client, e)
        }
        Ok(Err(e)) => warn!("{}: connection failed: {}", client, e),
        Err(_) => error!("{}: panic while serving connection", client),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::net::{Ipv4Addr, SocketAddrV4};
    use tempfile::tempdir;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    #[test]
    fn shutdown_signal_is_set_once() {
        let signal = ShutdownSignal::default();
        let other = signal.clone();
        assert!(!other.is_triggered());
        assert!(signal.trigger());
        assert!(other.is_triggered());
        assert!(!other.trigger());
        assert!(signal.is_triggered());
    }

    #[test]
    fn create_listener_picks_port() {
        let listener = create_listener(loopback(0), 5).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(TcpStream::connect(addr).is_ok());
    }

    #[test]
    fn create_listener_fails_when_in_use() {
        let first = create_listener(loopback(0), 5).unwrap();
        let addr = first.local_addr().unwrap();
        let e = create_listener(addr, 5).unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::AddrInUse);
    }

    #[test]
    fn wait_readable_times_out() {
        let listener = create_listener(loopback(0), 5).unwrap();
        assert!(!wait_readable(listener.as_raw_fd(), Duration::from_millis(10)).unwrap());
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        assert!(wait_readable(listener.as_raw_fd(), Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn resolve_addr_works() {
        assert_eq!(resolve_addr("127.0.0.1", 8080).unwrap(), loopback(8080));
        assert!(matches!(
            resolve_addr("not an address", 80),
            Err(StartError::Address { .. })
        ));
    }

    #[test]
    fn start_rejects_bad_config() {
        let root = tempdir().unwrap();
        let mut config = Config::new(root.path());
        config.worker_count = 0;
        assert!(matches!(
            WorkerPool::start(config),
            Err(StartError::Config(_))
        ));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let root = tempdir().unwrap();
        let mut config = Config::new(root.path());
        config.bind_port = 0;
        config.worker_count = 2;
        config.access_log = AccessLogTarget::Off;
        let mut pool = WorkerPool::start(config).unwrap();
        assert_eq!(pool.worker_count(), 2);
        pool.shutdown();
        assert_eq!(pool.worker_count(), 0);
        pool.shutdown();
        assert!(TcpStream::connect(pool.local_addr()).is_err());
    }
}
