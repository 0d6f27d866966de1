use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::warn;

use crate::config::AccessLogTarget;
use crate::request::Request;
use crate::status::Status;

/// Where access log lines end up.
#[derive(Debug)]
enum LogSink {
    Stdout,
    Syslog,
    File(BufWriter<File>),
}

impl LogSink {
    fn log(&mut self, message: &str) -> std::io::Result<()> {
        match self {
            Self::Stdout => {
                let stdout = std::io::stdout();
                let mut stdout = stdout.lock();
                stdout.write_all(message.as_bytes())?;
                stdout.flush()?;
            }
            Self::Syslog => {
                // LogEncoded guarantees there are no NUL bytes.
                let message = CString::new(message.trim_end())?;
                unsafe {
                    libc::syslog(
                        libc::LOG_INFO,
                        b"%s\0".as_ptr() as *const libc::c_char,
                        message.as_ptr(),
                    )
                };
            }
            Self::File(file) => {
                file.write_all(message.as_bytes())?;
                file.flush()?;
            }
        }
        Ok(())
    }
}

/// Common Log Format access log shared by all workers.
#[derive(Debug)]
pub struct AccessLog {
    sink: Option<Mutex<LogSink>>,
}

impl AccessLog {
    pub fn open(target: &AccessLogTarget) -> std::io::Result<Self> {
        let sink = match target {
            AccessLogTarget::Off => None,
            AccessLogTarget::Stdout => Some(LogSink::Stdout),
            AccessLogTarget::Syslog => Some(LogSink::Syslog),
            AccessLogTarget::File(path) => Some(LogSink::File(BufWriter::new(
                OpenOptions::new().append(true).create(true).open(path)?,
            ))),
        };
        Ok(Self {
            sink: sink.map(Mutex::new),
        })
    }

    /// Add a connection's details to the log. Failures are reported but never stop the caller.
    pub fn record(&self, entry: &Entry<'_>, now: SystemTime) {
        let sink = match &self.sink {
            Some(sink) => sink,
            None => return,
        };
        let message = entry.format(now);
        // A worker that panicked while holding the lock leaves the sink itself intact.
        let mut sink = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = sink.log(&message) {
            warn!("failed to write access log: {}", e);
        }
    }
}

/// One served connection.
#[derive(Debug)]
pub struct Entry<'a> {
    pub client: IpAddr,
    /// `None` if the request line could not be parsed.
    pub request: Option<&'a Request>,
    pub status: Status,
    pub bytes_sent: u64,
}

impl<'a> Entry<'a> {
    fn format(&self, now: SystemTime) -> String {
        match self.request {
            Some(request) => format!(
                "{} - - {} \"{} {} {}\" {} {}\n",
                self.client,
                ClfDate(now),
                LogEncoded(request.method.as_str()),
                LogEncoded(&request.raw_path),
                LogEncoded(&request.protocol),
                self.status.code(),
                self.bytes_sent,
            ),
            None => format!(
                "{} - - {} \"-\" {} {}\n",
                self.client,
                ClfDate(now),
                self.status.code(),
                self.bytes_sent,
            ),
        }
    }
}

/// Common Log Format (CLF) formatted date in local timezone.
struct ClfDate(SystemTime);

impl std::fmt::Display for ClfDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let datetime = DateTime::<Local>::from(self.0);
        write!(f, "{}", datetime.format("[%d/%b/%Y:%H:%M:%S %z]"))
    }
}

/// Encode string for logging. Logs should not contain control characters or double quotes.
struct LogEncoded<'a>(&'a str);

impl<'a> std::fmt::Display for LogEncoded<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for c in self.0.chars() {
            if !c.is_ascii() || c.is_ascii_control() || c == '"' {
                let mut buf = [0; 4];
                for b in c.encode_utf8(&mut buf).as_bytes() {
                    write!(f, "%{:02X}", b)?;
                }
            } else {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}
