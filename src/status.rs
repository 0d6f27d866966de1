/// Response status codes this server can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    // Not produced by the current resolution rules.
    Forbidden,
    NotFound,
    MethodNotAllowed,
    InternalServerError,
    // Not produced until protocol versions are checked.
    HttpVersionNotSupported,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::InternalServerError => 500,
            Self::HttpVersionNotSupported => 505,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::InternalServerError => "Internal Server Error",
            Self::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// Sentence shown on the HTML error page.
    pub fn explanation(self) -> &'static str {
        match self {
            Self::Ok => "",
            Self::BadRequest => "You sent a request that the server couldn't understand.",
            Self::Forbidden => "You don't have permission to access this URL.",
            Self::NotFound => "The URL you requested was not found.",
            Self::MethodNotAllowed => "The method you specified is not allowed.",
            Self::InternalServerError => "The URL you requested cannot be returned.",
            Self::HttpVersionNotSupported => "The protocol version you used is not supported.",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}
