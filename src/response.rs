use std::io::Write;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::fs::FileSystem;
use crate::mime::MimeMap;
use crate::resolve::Target;
use crate::status::Status;

const HTML_MIME_TYPE: &str = "text/html; charset=UTF-8";

/// Value of the `Server` header.
pub const SERVER_ID: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// RFC1123 formatted date.
pub struct HttpDate(pub SystemTime);

impl std::fmt::Display for HttpDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let datetime = DateTime::<Utc>::from(self.0);
        write!(f, "{}", datetime.format("%a, %d %b %Y %H:%M:%S GMT"))
    }
}

/// Body of every non-200 response.
fn error_page(status: Status) -> String {
    format!(
        "<html><head><title>{} {}</title></head><body>\n\
        <h1>{}</h1>\n\
        {}\n\
        <hr>\n\
        Generated by {}\n\
        </body></html>\n",
        status.code(),
        status.reason(),
        status.reason(),
        status.explanation(),
        SERVER_ID,
    )
}

/// A complete response. For HEAD requests `body` is `None` but `Content-Length` still describes
/// the body a GET would have received.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    headers: Vec<(&'static str, String)>,
    pub body: Option<Vec<u8>>,
}

impl Response {
    fn new(
        status: Status,
        now: SystemTime,
        content_type: &str,
        content_length: u64,
        body: Option<Vec<u8>>,
    ) -> Self {
        let headers = vec![
            ("Date", HttpDate(now).to_string()),
            ("Server", SERVER_ID.to_string()),
            ("Connection", "close".to_string()),
            ("Content-Type", content_type.to_string()),
            ("Content-Length", content_length.to_string()),
        ];
        Self {
            status,
            headers,
            body,
        }
    }

    /// HTML error response for `status`.
    pub fn error(status: Status, head_only: bool, now: SystemTime) -> Self {
        let page = error_page(status).into_bytes();
        let length = page.len() as u64;
        let body = if head_only { None } else { Some(page) };
        Self::new(status, now, HTML_MIME_TYPE, length, body)
    }

    /// Response for a resolved target. Reading the file is the only step that can still fail, in
    /// which case the response becomes a 500.
    pub fn for_target(
        target: &Target,
        head_only: bool,
        mime_map: &MimeMap,
        fs: &dyn FileSystem,
        now: SystemTime,
    ) -> Self {
        let path = match (&target.path, target.status) {
            (Some(path), Status::Ok) => path,
            (None, Status::Ok) => return Self::error(Status::NotFound, head_only, now),
            (_, status) => return Self::error(status, head_only, now),
        };
        let content_type = mime_map.content_type(path);
        // HEAD reads the file too, so it fails exactly when GET would.
        match fs.read_all(path) {
            Ok(body) => {
                let length = body.len() as u64;
                let body = if head_only { None } else { Some(body) };
                Self::new(Status::Ok, now, content_type, length, body)
            }
            Err(e) => {
                warn!("failed to read {}: {}", path.display(), e);
                Self::error(Status::InternalServerError, head_only, now)
            }
        }
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(|(name, value)| (*name, value.as_str()))
    }

    /// Status line and header block, including the terminating blank line.
    pub fn head(&self) -> String {
        let mut head = format!("HTTP/1.1 {}\r\n", self.status);
        for (name, value) in self.headers() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        head
    }

    /// Write the whole response. Returns the number of bytes written.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<u64> {
        let head = self.head();
        writer.write_all(head.as_bytes())?;
        let mut sent = head.len() as u64;
        if let Some(body) = &self.body {
            writer.write_all(body)?;
            sent += body.len() as u64;
        }
        writer.flush()?;
        Ok(sent)
    }
}
