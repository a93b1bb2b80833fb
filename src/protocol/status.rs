use std::fmt;

/// Result code carried as the first field of every response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok = 200,
    Created = 201,
    BadRequest = 400,
    Forbidden = 403,
    NotFound = 404,
    Invalid = 405,
    Conflict = 409,
    InternalError = 500,
    Unavailable = 503,
    Timeout = 504,
    VersionMismatch = 505,
}

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn is_success(self) -> bool {
        matches!(self, StatusCode::Ok | StatusCode::Created)
    }

    pub fn reason(self) -> &'static str {
        match self {
            StatusCode::Ok => "ok",
            StatusCode::Created => "created",
            StatusCode::BadRequest => "invalid field(s)",
            StatusCode::Forbidden => "forbidden",
            StatusCode::NotFound => "not found",
            StatusCode::Invalid => "unsupported action",
            StatusCode::Conflict => "conflict",
            StatusCode::InternalError => "internal server error",
            StatusCode::Unavailable => "service unavailable",
            StatusCode::Timeout => "timed out",
            StatusCode::VersionMismatch => "protocol version not supported",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}
