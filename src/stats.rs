use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by every worker.
#[derive(Debug, Default)]
pub struct ServerStats {
    num_requests: AtomicU64,
    total_in: AtomicU64,
    total_out: AtomicU64,
}

/// Point-in-time copy of `ServerStats`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub num_requests: u64,
    pub total_in: u64,
    pub total_out: u64,
}

impl ServerStats {
    pub fn add_request(&self) {
        self.num_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_in(&self, bytes: u64) {
        self.total_in.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_out(&self, bytes: u64) {
        self.total_out.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            num_requests: self.num_requests.load(Ordering::Relaxed),
            total_in: self.total_in.load(Ordering::Relaxed),
            total_out: self.total_out.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Print CPU usage of the process and the request counters.
    pub fn print(&self) -> std::io::Result<()> {
        let rusage = getrusage()?;
        println!(
            "CPU time used: {}.{:02} user, {}.{:02} system",
            rusage.ru_utime.tv_sec,
            rusage.ru_utime.tv_usec / 10000,
            rusage.ru_stime.tv_sec,
            rusage.ru_stime.tv_usec / 10000,
        );
        println!("Requests: {}", self.num_requests);
        println!("Bytes: {} in, {} out", self.total_in, self.total_out);
        Ok(())
    }
}

/// Safe wrapper for `libc::getrusage`.
fn getrusage() -> std::io::Result<libc::rusage> {
    let mut rusage = MaybeUninit::<libc::rusage>::zeroed();
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, rusage.as_mut_ptr()) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(unsafe { rusage.assume_init() })
}
