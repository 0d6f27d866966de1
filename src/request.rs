use thiserror::Error;

/// Request method, upper-cased. Anything but GET and HEAD is kept so it can be logged and refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Other(String),
}

impl Method {
    fn parse(token: &str) -> Self {
        match token.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            _ => Self::Other(token.to_ascii_uppercase()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Other(method) => method,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("request line is not valid UTF-8")]
    NotUtf8,
    #[error("expected `METHOD PATH PROTOCOL', got {0} fields")]
    FieldCount(usize),
    #[error("request line has an empty field")]
    EmptyField,
    #[error("decoded path is not valid UTF-8")]
    PathNotUtf8,
}

/// The request line of an HTTP request. Header lines are not interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Path exactly as sent, for the access log.
    pub raw_path: String,
    /// Percent-decoded path with any query or fragment removed.
    pub path: String,
    pub protocol: String,
}

impl Request {
    /// Parse the request head, i.e. everything before the blank line that ends the headers.
    pub fn parse(head: &[u8]) -> Result<Self, ParseError> {
        let line = match find(b"\r\n", head) {
            Some(end) => &head[..end],
            None => head,
        };
        let line = std::str::from_utf8(line).map_err(|_| ParseError::NotUtf8)?;

        let fields: Vec<&str> = line.split(' ').collect();
        let (method, raw_path, protocol) = match fields.as_slice() {
            [method, raw_path, protocol] => (*method, *raw_path, *protocol),
            _ => return Err(ParseError::FieldCount(fields.len())),
        };
        if method.is_empty() || raw_path.is_empty() || protocol.is_empty() {
            return Err(ParseError::EmptyField);
        }

        // strip query and fragment
        let stripped = raw_path.split(|c| matches!(c, '?' | '#')).next().unwrap_or("");
        let path = String::from_utf8(url_decode(stripped)).map_err(|_| ParseError::PathNotUtf8)?;

        Ok(Self {
            method: Method::parse(method),
            raw_path: raw_path.to_string(),
            path,
            protocol: protocol.to_string(),
        })
    }
}

/// Return index of first occurrence of `needle` in `haystack`.
pub(crate) fn find(needle: &[u8], haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Decode URL by converting %XX (where XX are hexadecimal digits) to the byte it represents.
/// Malformed escapes are left as they are.
pub fn url_decode(url: &str) -> Vec<u8> {
    let url = url.as_bytes();
    let mut decoded = Vec::with_capacity(url.len());
    let mut i = 0;
    while i < url.len() {
        let c = url[i];
        if c == b'%'
            && i + 2 < url.len()
            && url[i + 1].is_ascii_hexdigit()
            && url[i + 2].is_ascii_hexdigit()
        {
            decoded.push(hex_to_digit(url[i + 1]) * 16 + hex_to_digit(url[i + 2]));
            i += 3;
        } else {
            decoded.push(c);
            i += 1;
        }
    }
    decoded
}

/// Convert hex digit to integer.
fn hex_to_digit(hex: u8) -> u8 {
    match hex {
        b'A'..=b'F' => hex - b'A' + 10,
        b'a'..=b'f' => hex - b'a' + 10,
        _ => hex - b'0',
    }
}
